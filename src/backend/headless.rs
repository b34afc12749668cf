// Headless backend - in-memory GPU device
//
// Buffers are byte vectors, command lists are replayable command logs, and
// nothing "executes" until retire_gpu_work() is called. That makes GPU
// progress an explicit event tests control: fences stay unsignaled, deletion
// requests stay guarded, and frame slots stay busy until the test says the
// device caught up.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use super::{BufferUsage, GpuBackend, MemoryClass, QueueKind, WaitPoint};
use crate::mesh::IndexFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(u64);

#[derive(Debug, Clone)]
enum Command {
    Copy { src: BufferId, dst: BufferId, size: u64 },
    BindVertexBuffers(Vec<BufferId>),
    BindIndexBuffer(BufferId, IndexFormat),
    Draw { first: u32, count: u32, indexed: bool },
    BeginRender(u32),
    EndRender(u32),
}

/// Recorded command log. Owned by the caller (the frame slot), replayed by
/// the backend when the submission executes.
#[derive(Debug, Clone)]
pub struct CommandLog {
    queue: QueueKind,
    open: bool,
    commands: Vec<Command>,
}

#[derive(Debug, Clone)]
struct PendingSubmission {
    commands: Vec<Command>,
    waits: Vec<(SemaphoreId, WaitPoint)>,
    signals: Vec<SemaphoreId>,
    fence: Option<FenceId>,
}

/// Snapshot of what a draw actually consumed at execution time. The bytes
/// are copied out of the bound buffers when the draw runs, so a draw that
/// executed before its upload shows the pre-upload contents.
#[derive(Debug, Clone)]
pub struct ExecutedDraw {
    pub vertex_arrays: Vec<Vec<u8>>,
    pub index_bytes: Option<Vec<u8>>,
    pub first: u32,
    pub count: u32,
    pub indexed: bool,
}

struct StoredBuffer {
    bytes: Vec<u8>,
    #[allow(dead_code)]
    usage: BufferUsage,
    memory: MemoryClass,
}

pub struct HeadlessBackend {
    next_id: u64,
    buffers: HashMap<u64, StoredBuffer>,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    pending: Vec<PendingSubmission>,
    pending_presents: Vec<(u32, SemaphoreId)>,
    image_count: u32,
    next_image: u32,
    presented: Vec<u32>,
    draws: Vec<ExecutedDraw>,
    bound_vertex: Vec<BufferId>,
    bound_index: Option<(BufferId, IndexFormat)>,
    buffers_created: u64,
    buffers_destroyed: u64,
    submissions_made: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_images(2)
    }

    pub fn with_images(image_count: u32) -> Self {
        Self {
            next_id: 1,
            buffers: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            pending: Vec::new(),
            pending_presents: Vec::new(),
            image_count,
            next_image: 0,
            presented: Vec::new(),
            draws: Vec::new(),
            bound_vertex: Vec::new(),
            bound_index: None,
            buffers_created: 0,
            buffers_destroyed: 0,
            submissions_made: 0,
        }
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Executes every pending submission whose waits are satisfied, then
    /// completes any presents whose gate fired. Repeats until no progress.
    /// This is the test's "the GPU ran" lever.
    pub fn retire_gpu_work(&mut self) {
        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < self.pending.len() {
                let ready = self.pending[i]
                    .waits
                    .iter()
                    .all(|(sem, _)| self.semaphores.get(&sem.0).copied().unwrap_or(false));
                if ready {
                    let submission = self.pending.remove(i);
                    self.execute(submission);
                    progressed = true;
                } else {
                    i += 1;
                }
            }
            let mut j = 0;
            while j < self.pending_presents.len() {
                let (image, wait) = self.pending_presents[j];
                if self.semaphores.get(&wait.0).copied().unwrap_or(false) {
                    self.semaphores.insert(wait.0, false);
                    self.presented.push(image);
                    self.pending_presents.remove(j);
                    progressed = true;
                } else {
                    j += 1;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn execute(&mut self, submission: PendingSubmission) {
        for (sem, _) in &submission.waits {
            // Binary token: consumed by the wait.
            self.semaphores.insert(sem.0, false);
        }
        for command in submission.commands {
            match command {
                Command::Copy { src, dst, size } => {
                    let bytes = self
                        .buffers
                        .get(&src.0)
                        .map(|b| b.bytes[..size as usize].to_vec())
                        .unwrap_or_default();
                    if let Some(target) = self.buffers.get_mut(&dst.0) {
                        target.bytes[..bytes.len()].copy_from_slice(&bytes);
                    }
                }
                Command::BindVertexBuffers(ids) => self.bound_vertex = ids,
                Command::BindIndexBuffer(id, format) => self.bound_index = Some((id, format)),
                Command::Draw { first, count, indexed } => {
                    let vertex_arrays = self
                        .bound_vertex
                        .iter()
                        .map(|id| {
                            self.buffers
                                .get(&id.0)
                                .map(|b| b.bytes.clone())
                                .unwrap_or_default()
                        })
                        .collect();
                    let index_bytes = self
                        .bound_index
                        .and_then(|(id, _)| self.buffers.get(&id.0).map(|b| b.bytes.clone()));
                    self.draws.push(ExecutedDraw {
                        vertex_arrays,
                        index_bytes,
                        first,
                        count,
                        indexed,
                    });
                }
                Command::BeginRender(_) | Command::EndRender(_) => {}
            }
        }
        for sem in submission.signals {
            self.semaphores.insert(sem.0, true);
        }
        if let Some(fence) = submission.fence {
            self.fences.insert(fence.0, true);
        }
    }

    // Test inspection surface.

    pub fn buffer_bytes(&self, buffer: &BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.bytes.as_slice())
    }

    pub fn buffer_alive(&self, buffer: &BufferId) -> bool {
        self.buffers.contains_key(&buffer.0)
    }

    pub fn executed_draws(&self) -> &[ExecutedDraw] {
        &self.draws
    }

    pub fn presented_images(&self) -> &[u32] {
        &self.presented
    }

    pub fn pending_submissions(&self) -> usize {
        self.pending.len()
    }

    pub fn submissions_made(&self) -> u64 {
        self.submissions_made
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers_destroyed(&self) -> u64 {
        self.buffers_destroyed
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for HeadlessBackend {
    type Buffer = BufferId;
    type CommandList = CommandLog;
    type Fence = FenceId;
    type Semaphore = SemaphoreId;

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryClass,
    ) -> Result<Self::Buffer> {
        let id = self.fresh_id();
        self.buffers.insert(
            id,
            StoredBuffer {
                bytes: vec![0u8; size as usize],
                usage,
                memory,
            },
        );
        self.buffers_created += 1;
        Ok(BufferId(id))
    }

    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        if self.buffers.remove(&buffer.0).is_some() {
            self.buffers_destroyed += 1;
        }
    }

    fn write_buffer(&mut self, buffer: &mut Self::Buffer, data: &[u8]) -> Result<()> {
        let stored = self
            .buffers
            .get_mut(&buffer.0)
            .context("write to destroyed buffer")?;
        if stored.memory != MemoryClass::CpuVisible {
            bail!("buffer is not CPU-visible");
        }
        if data.len() > stored.bytes.len() {
            bail!(
                "write of {} bytes into {}-byte buffer",
                data.len(),
                stored.bytes.len()
            );
        }
        stored.bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> Result<Self::Fence> {
        let id = self.fresh_id();
        self.fences.insert(id, signaled);
        Ok(FenceId(id))
    }

    fn destroy_fence(&mut self, fence: Self::Fence) {
        self.fences.remove(&fence.0);
    }

    fn wait_fence(&mut self, fence: &Self::Fence, timeout: Duration) -> Result<()> {
        match self.fences.get(&fence.0) {
            Some(true) => Ok(()),
            // The simulated GPU only makes progress via retire_gpu_work(),
            // so an unsignaled fence here is exactly a timed-out wait.
            Some(false) => Err(anyhow!("fence wait timed out after {:?}", timeout)),
            None => Err(anyhow!("wait on destroyed fence")),
        }
    }

    fn reset_fence(&mut self, fence: &Self::Fence) -> Result<()> {
        self.fences
            .insert(fence.0, false)
            .context("reset of destroyed fence")?;
        Ok(())
    }

    fn fence_signaled(&mut self, fence: &Self::Fence) -> Result<bool> {
        self.fences
            .get(&fence.0)
            .copied()
            .context("status of destroyed fence")
    }

    fn create_semaphore(&mut self) -> Result<Self::Semaphore> {
        let id = self.fresh_id();
        self.semaphores.insert(id, false);
        Ok(SemaphoreId(id))
    }

    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore) {
        self.semaphores.remove(&semaphore.0);
    }

    fn create_command_list(&mut self, queue: QueueKind) -> Result<Self::CommandList> {
        Ok(CommandLog {
            queue,
            open: false,
            commands: Vec::new(),
        })
    }

    fn destroy_command_list(&mut self, _commands: Self::CommandList) {}

    fn begin_commands(&mut self, commands: &mut Self::CommandList) -> Result<()> {
        commands.commands.clear();
        commands.open = true;
        Ok(())
    }

    fn end_commands(&mut self, commands: &mut Self::CommandList) -> Result<()> {
        if !commands.open {
            bail!("command list is not recording");
        }
        commands.open = false;
        Ok(())
    }

    fn record_copy(
        &mut self,
        commands: &mut Self::CommandList,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: u64,
    ) -> Result<()> {
        commands.commands.push(Command::Copy {
            src: *src,
            dst: *dst,
            size,
        });
        Ok(())
    }

    fn record_bind_vertex_buffers(
        &mut self,
        commands: &mut Self::CommandList,
        buffers: &[&Self::Buffer],
    ) -> Result<()> {
        commands
            .commands
            .push(Command::BindVertexBuffers(buffers.iter().map(|b| **b).collect()));
        Ok(())
    }

    fn record_bind_index_buffer(
        &mut self,
        commands: &mut Self::CommandList,
        buffer: &Self::Buffer,
        format: IndexFormat,
    ) -> Result<()> {
        commands
            .commands
            .push(Command::BindIndexBuffer(*buffer, format));
        Ok(())
    }

    fn record_draw(
        &mut self,
        commands: &mut Self::CommandList,
        first: u32,
        count: u32,
        indexed: bool,
    ) -> Result<()> {
        commands.commands.push(Command::Draw { first, count, indexed });
        Ok(())
    }

    fn begin_render(&mut self, commands: &mut Self::CommandList, image_index: u32) -> Result<()> {
        commands.commands.push(Command::BeginRender(image_index));
        Ok(())
    }

    fn end_render(&mut self, commands: &mut Self::CommandList, image_index: u32) -> Result<()> {
        commands.commands.push(Command::EndRender(image_index));
        Ok(())
    }

    fn submit(
        &mut self,
        queue: QueueKind,
        commands: Option<&Self::CommandList>,
        waits: &[(Self::Semaphore, WaitPoint)],
        signals: &[Self::Semaphore],
        fence: Option<&Self::Fence>,
    ) -> Result<()> {
        if let Some(log) = commands {
            if log.open {
                bail!("submitted command list is still recording");
            }
            if log.queue != queue {
                bail!("command list recorded for {:?} submitted on {:?}", log.queue, queue);
            }
        }
        self.pending.push(PendingSubmission {
            commands: commands.map(|c| c.commands.clone()).unwrap_or_default(),
            waits: waits.to_vec(),
            signals: signals.to_vec(),
            fence: fence.cloned(),
        });
        self.submissions_made += 1;
        Ok(())
    }

    fn acquire_image(&mut self, signal: &Self::Semaphore, _timeout: Duration) -> Result<u32> {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        // The fake swapchain always has an image ready.
        self.semaphores.insert(signal.0, true);
        Ok(image)
    }

    fn present(&mut self, image_index: u32, wait: &Self::Semaphore) -> Result<()> {
        self.pending_presents.push((image_index, *wait));
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.retire_gpu_work();
        // Anything still pending is gated on a token no prior submission
        // will signal; a real device idle would still drain it eventually.
        while !self.pending.is_empty() {
            let submission = self.pending.remove(0);
            self.execute(submission);
        }
        self.pending_presents.clear();
        Ok(())
    }
}
