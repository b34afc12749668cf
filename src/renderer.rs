// Renderer - public frame-cycle contract
//
// Ties the frame ring, transfer stage, deletion queue and buffer registry
// together over one backend. The public operations return bool: internals
// are Result-based and any failure is logged with its full context chain
// before being collapsed to false.
//
// A frame runs:
//   begin_prepare -> stage_upload* -> end_prepare
//   begin_frame -> begin_frame_surface? -> draw* -> end_frame_surface? -> end_frame

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::backend::{BufferUsage, GpuBackend, QueueKind, WaitPoint};
use crate::deletion::DeletionQueue;
use crate::frame::FrameRing;
use crate::mesh::{IndexData, IndexFormat, Mesh, VertexData, VertexFormat};
use crate::resource::{BufferEntry, BufferHandle, BufferTable};
use crate::transfer::TransferStage;

/// Renderer construction knobs, normally filled from config.
#[derive(Debug, Clone, Copy)]
pub struct RendererOptions {
    pub frames_in_flight: usize,
    /// Upper bound on any single GPU wait. Hitting it fails the operation
    /// instead of hanging the loop.
    pub gpu_timeout: Duration,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            gpu_timeout: Duration::from_millis(2000),
        }
    }
}

pub struct Renderer<B: GpuBackend> {
    backend: B,
    ring: FrameRing<B>,
    buffers: BufferTable<B::Buffer>,
    transfer: TransferStage<B>,
    deletion: DeletionQueue<B>,
    /// Guard fences created by this frame's deletion pass, armed as empty
    /// submissions right after the draw submit.
    guards_to_arm: Vec<(QueueKind, B::Fence)>,
    gpu_timeout: Duration,
    recording_frame: bool,
    surface_open: bool,
    shut_down: bool,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(mut backend: B, options: RendererOptions) -> Result<Self> {
        let ring = FrameRing::new(&mut backend, options.frames_in_flight)?;
        log::info!(
            "Renderer initialized ({} frames in flight, {}ms GPU timeout)",
            ring.len(),
            options.gpu_timeout.as_millis()
        );
        Ok(Self {
            backend,
            ring,
            buffers: BufferTable::new(),
            transfer: TransferStage::new(),
            deletion: DeletionQueue::new(),
            guards_to_arm: Vec::new(),
            gpu_timeout: options.gpu_timeout,
            recording_frame: false,
            surface_open: false,
            shut_down: false,
        })
    }

    // ---- resource creation -------------------------------------------------

    /// Allocates caller-owned vertex storage: one zeroed CPU array and one
    /// registry handle per vertex array in `format`. Device-local buffers
    /// are created lazily on first upload.
    pub fn make_vertex_buffer(&mut self, format: VertexFormat, num_vertices: usize) -> VertexData {
        let mut arrays = Vec::with_capacity(format.arrays.len());
        let mut buffers = Vec::with_capacity(format.arrays.len());
        for array_format in &format.arrays {
            let size = array_format.row_stride() * num_vertices;
            arrays.push(vec![0u8; size]);
            buffers.push(self.buffers.insert(BufferEntry {
                gpu: None,
                size: size as u64,
                usage: BufferUsage::Vertex,
                last_queue: QueueKind::Transfer,
            }));
        }
        VertexData {
            format,
            arrays,
            buffers,
        }
    }

    /// Allocates caller-owned index storage and its registry handle.
    pub fn make_index_buffer(&mut self, format: IndexFormat, num_indices: usize) -> IndexData {
        let size = format.stride() * num_indices;
        let buffer = self.buffers.insert(BufferEntry {
            gpu: None,
            size: size as u64,
            usage: BufferUsage::Index,
            last_queue: QueueKind::Transfer,
        });
        IndexData {
            format,
            data: vec![0u8; size],
            buffer,
        }
    }

    /// Retires the buffer behind `handle`. The registry entry is removed at
    /// once (the handle goes stale), the device allocation is destroyed only
    /// after the queue that last touched it has provably moved past it.
    pub fn enqueue_deletion(&mut self, handle: BufferHandle) {
        if let Some(entry) = self.buffers.remove(handle) {
            self.deletion.enqueue(entry.gpu, entry.last_queue);
        } else {
            log::warn!("deletion requested for a stale buffer handle");
        }
    }

    /// Retires every buffer a vertex payload owns.
    pub fn retire_vertex_data(&mut self, data: &VertexData) {
        for handle in &data.buffers {
            self.enqueue_deletion(*handle);
        }
    }

    /// Retires the buffer an index payload owns.
    pub fn retire_index_data(&mut self, data: &IndexData) {
        self.enqueue_deletion(data.buffer);
    }

    // ---- prepare phase -----------------------------------------------------

    /// Opens the upload batch for this frame. Also runs one deletion pass,
    /// so resources retired N frames ago get destroyed here.
    pub fn begin_prepare(&mut self) -> bool {
        let result = self.try_begin_prepare();
        self.report("begin_prepare", result)
    }

    fn try_begin_prepare(&mut self) -> Result<()> {
        let armed = self.deletion.process(&mut self.backend)?;
        self.guards_to_arm.extend(armed);
        self.transfer
            .begin(&mut self.backend, self.ring.active_mut(), self.gpu_timeout)
    }

    /// Queues `data` for upload into the buffer behind `handle`.
    pub fn stage_upload(&mut self, handle: BufferHandle, data: &[u8]) -> bool {
        let result = self
            .transfer
            .stage(&mut self.backend, &mut self.buffers, handle, data);
        self.report("stage_upload", result)
    }

    /// Stages every vertex array of `data` from its CPU bytes.
    pub fn stage_vertex_data(&mut self, data: &VertexData) -> bool {
        for (handle, bytes) in data.buffers.iter().zip(&data.arrays) {
            if !self.stage_upload(*handle, bytes) {
                return false;
            }
        }
        true
    }

    /// Stages the index array of `data` from its CPU bytes.
    pub fn stage_index_data(&mut self, data: &IndexData) -> bool {
        self.stage_upload(data.buffer, &data.data)
    }

    /// Closes the batch and submits it on the transfer queue. With nothing
    /// staged this is a no-op submit-wise and always safe to call.
    pub fn end_prepare(&mut self) -> bool {
        let result = self.transfer.end(
            &mut self.backend,
            self.ring.active_mut(),
            &self.buffers,
            &mut self.deletion,
        );
        self.report("end_prepare", result.map(|_| ()))
    }

    // ---- frame phase -------------------------------------------------------

    /// Waits (bounded) for this slot's previous draw to retire, then opens
    /// the frame's draw command list.
    pub fn begin_frame(&mut self) -> bool {
        let result = self.try_begin_frame();
        self.report("begin_frame", result)
    }

    fn try_begin_frame(&mut self) -> Result<()> {
        if self.recording_frame {
            bail!("begin_frame called while a frame is already open");
        }
        let slot = self.ring.active_mut();
        self.backend
            .wait_fence(&slot.draw_fence, self.gpu_timeout)
            .context("previous frame's draw did not retire in time")?;
        self.backend
            .begin_commands(&mut slot.draw_commands)
            .context("failed to begin draw recording")?;
        slot.image_index = None;
        self.recording_frame = true;
        Ok(())
    }

    /// Acquires the next target image and opens rendering to it.
    pub fn begin_frame_surface(&mut self) -> bool {
        let result = self.try_begin_frame_surface();
        self.report("begin_frame_surface", result)
    }

    fn try_begin_frame_surface(&mut self) -> Result<()> {
        if !self.recording_frame {
            bail!("begin_frame_surface called outside a frame");
        }
        let slot = self.ring.active_mut();
        let signal = slot.image_acquired.clone();
        let image_index = self
            .backend
            .acquire_image(&signal, self.gpu_timeout)
            .context("failed to acquire target image")?;
        let slot = self.ring.active_mut();
        slot.image_index = Some(image_index);
        self.backend
            .begin_render(&mut slot.draw_commands, image_index)?;
        self.surface_open = true;
        Ok(())
    }

    /// Records one mesh draw into the open frame.
    pub fn draw(&mut self, mesh: &Mesh) -> bool {
        let result = self.try_draw(mesh);
        self.report("draw", result)
    }

    fn try_draw(&mut self, mesh: &Mesh) -> Result<()> {
        if !self.recording_frame {
            bail!("draw called outside a frame");
        }

        let total = if let Some(index_data) = mesh.index_data {
            index_data.num_indices() as u32
        } else {
            mesh.vertex_data.num_vertices() as u32
        };
        debug_assert!(mesh.first <= total, "draw range starts past the data");
        let count = if mesh.count == 0 {
            total.saturating_sub(mesh.first)
        } else {
            mesh.count
        };
        debug_assert!(
            mesh.first.saturating_add(count) <= total,
            "draw range ends past the data"
        );
        if count == 0 {
            return Ok(());
        }

        let mut vertex_buffers = Vec::with_capacity(mesh.vertex_data.buffers.len());
        for handle in &mesh.vertex_data.buffers {
            let entry = self
                .buffers
                .get(*handle)
                .context("draw references a retired vertex buffer")?;
            vertex_buffers.push(
                entry
                    .gpu
                    .as_ref()
                    .context("draw references a vertex buffer that was never uploaded")?,
            );
        }
        let index_buffer = match mesh.index_data {
            Some(index_data) => {
                let entry = self
                    .buffers
                    .get(index_data.buffer)
                    .context("draw references a retired index buffer")?;
                let gpu = entry
                    .gpu
                    .as_ref()
                    .context("draw references an index buffer that was never uploaded")?;
                Some((gpu, index_data.format))
            }
            None => None,
        };

        let slot = self.ring.active_mut();
        self.backend
            .record_bind_vertex_buffers(&mut slot.draw_commands, &vertex_buffers)?;
        if let Some((gpu, format)) = index_buffer {
            self.backend
                .record_bind_index_buffer(&mut slot.draw_commands, gpu, format)?;
        }
        self.backend.record_draw(
            &mut slot.draw_commands,
            mesh.first,
            count,
            mesh.is_indexed(),
        )?;

        // The graphics queue is now the last to touch these buffers, so
        // their deletion guards must be armed there.
        for handle in &mesh.vertex_data.buffers {
            if let Some(entry) = self.buffers.get_mut(*handle) {
                entry.last_queue = QueueKind::Graphics;
            }
        }
        if let Some(index_data) = mesh.index_data {
            if let Some(entry) = self.buffers.get_mut(index_data.buffer) {
                entry.last_queue = QueueKind::Graphics;
            }
        }
        Ok(())
    }

    /// Closes rendering to the acquired image.
    pub fn end_frame_surface(&mut self) -> bool {
        let result = self.try_end_frame_surface();
        self.report("end_frame_surface", result)
    }

    fn try_end_frame_surface(&mut self) -> Result<()> {
        if !self.surface_open {
            bail!("end_frame_surface called without begin_frame_surface");
        }
        let slot = self.ring.active_mut();
        let image_index = slot
            .image_index
            .context("surface open without an acquired image")?;
        self.backend.end_render(&mut slot.draw_commands, image_index)?;
        self.surface_open = false;
        Ok(())
    }

    /// Submits the frame, arms deletion guards, presents, cycles the ring.
    pub fn end_frame(&mut self) -> bool {
        let result = self.try_end_frame();
        self.report("end_frame", result)
    }

    fn try_end_frame(&mut self) -> Result<()> {
        if !self.recording_frame {
            bail!("end_frame called without begin_frame");
        }
        if self.surface_open {
            bail!("end_frame called with the surface still open");
        }
        self.recording_frame = false;

        let slot = self.ring.active_mut();
        self.backend
            .end_commands(&mut slot.draw_commands)
            .context("failed to end draw recording")?;

        // Couple the draw to everything it must run after. The transfer
        // wait only exists when a transfer was actually submitted; waiting
        // on a token nothing signals would stall the queue.
        let mut waits = Vec::with_capacity(2);
        if slot.image_index.is_some() {
            waits.push((slot.image_acquired.clone(), WaitPoint::ColorOutput));
        }
        if slot.transfer_submitted {
            waits.push((slot.transfer_done.clone(), WaitPoint::VertexInput));
        }

        self.backend.reset_fence(&slot.draw_fence)?;
        self.backend
            .submit(
                QueueKind::Graphics,
                Some(&slot.draw_commands),
                &waits,
                &[slot.draw_done.clone()],
                Some(&slot.draw_fence),
            )
            .context("draw submission failed")?;

        // Empty submissions behind the real work: each guard signals once
        // its queue has retired everything queued before this point.
        for (queue, fence) in self.guards_to_arm.drain(..) {
            self.backend
                .submit(queue, None, &[], &[], Some(&fence))
                .context("failed to arm deletion guard")?;
        }

        let slot = self.ring.active_mut();
        if let Some(image_index) = slot.image_index.take() {
            let wait = slot.draw_done.clone();
            self.backend
                .present(image_index, &wait)
                .context("present failed")?;
        }

        self.ring.cycle();
        log::trace!("frame {} cycled to slot {}", self.ring.frame_number(), self.ring.index());
        Ok(())
    }

    // ---- shutdown ----------------------------------------------------------

    /// Idles the device and destroys everything the renderer owns. Runs at
    /// most once; Drop calls it if the caller did not.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(err) = self.backend.wait_idle() {
            log::error!("wait_idle during shutdown failed: {err:#}");
        }
        self.deletion.drain_all(&mut self.backend);
        for entry in self.buffers.drain() {
            if let Some(gpu) = entry.gpu {
                self.backend.destroy_buffer(gpu);
            }
        }
        for (_, fence) in self.guards_to_arm.drain(..) {
            self.backend.destroy_fence(fence);
        }
        self.ring.destroy(&mut self.backend);
        log::info!("Renderer shut down ({} deferred releases)", self.deletion.released());
    }

    // ---- accessors ---------------------------------------------------------

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The device-local buffer behind `handle`, if it exists and has been
    /// uploaded to.
    pub fn device_buffer(&self, handle: BufferHandle) -> Option<&B::Buffer> {
        self.buffers.get(handle).and_then(|e| e.gpu.as_ref())
    }

    pub fn pending_deletions(&self) -> usize {
        self.deletion.pending()
    }

    pub fn frame_index(&self) -> usize {
        self.ring.index()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    fn report(&self, op: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                log::error!("{op} failed: {err:#}");
                false
            }
        }
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
