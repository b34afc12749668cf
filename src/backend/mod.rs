// Backend module - GPU device abstraction
//
// The synchronization core never talks to a device API directly; everything
// goes through the GpuBackend trait below. The vulkan module implements it
// over ash, the headless module implements it in memory so the frame-cycle
// and deletion machinery can be exercised without a GPU.

use std::time::Duration;

use anyhow::Result;

use crate::mesh::IndexFormat;

pub mod headless;
pub mod vulkan;

pub use headless::HeadlessBackend;
pub use vulkan::VulkanBackend;

/// Logical queue a command list or submission targets. A distinct present
/// queue, if the hardware has one, is resolved inside the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Transfer,
}

/// Pipeline point a submission wait is anchored to. The draw submission
/// couples "image acquired" to color-attachment output and "transfer
/// complete" to vertex input, so the GPU enforces both orderings itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPoint {
    ColorOutput,
    VertexInput,
}

/// What a buffer will be bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// CPU-visible transfer source, only alive until its copy retires.
    Staging,
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    DeviceLocal,
    CpuVisible,
}

/// Minimal device interface the synchronization core is written against.
///
/// Guards (fences) are CPU-observable; tokens (semaphores) order submissions
/// on the GPU timeline. All waits are bounded: a timeout is an error, never
/// an indefinite block.
pub trait GpuBackend {
    type Buffer;
    type CommandList;
    type Fence: Clone;
    type Semaphore: Clone;

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryClass,
    ) -> Result<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
    /// Map a CPU-visible buffer and copy `data` into it.
    fn write_buffer(&mut self, buffer: &mut Self::Buffer, data: &[u8]) -> Result<()>;

    fn create_fence(&mut self, signaled: bool) -> Result<Self::Fence>;
    fn destroy_fence(&mut self, fence: Self::Fence);
    fn wait_fence(&mut self, fence: &Self::Fence, timeout: Duration) -> Result<()>;
    fn reset_fence(&mut self, fence: &Self::Fence) -> Result<()>;
    fn fence_signaled(&mut self, fence: &Self::Fence) -> Result<bool>;

    fn create_semaphore(&mut self) -> Result<Self::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);

    fn create_command_list(&mut self, queue: QueueKind) -> Result<Self::CommandList>;
    fn destroy_command_list(&mut self, commands: Self::CommandList);
    /// Resets the list and opens a new recording session.
    fn begin_commands(&mut self, commands: &mut Self::CommandList) -> Result<()>;
    fn end_commands(&mut self, commands: &mut Self::CommandList) -> Result<()>;

    fn record_copy(
        &mut self,
        commands: &mut Self::CommandList,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: u64,
    ) -> Result<()>;
    fn record_bind_vertex_buffers(
        &mut self,
        commands: &mut Self::CommandList,
        buffers: &[&Self::Buffer],
    ) -> Result<()>;
    fn record_bind_index_buffer(
        &mut self,
        commands: &mut Self::CommandList,
        buffer: &Self::Buffer,
        format: IndexFormat,
    ) -> Result<()>;
    fn record_draw(
        &mut self,
        commands: &mut Self::CommandList,
        first: u32,
        count: u32,
        indexed: bool,
    ) -> Result<()>;

    /// Transitions the target image and opens the render pass equivalent.
    fn begin_render(&mut self, commands: &mut Self::CommandList, image_index: u32) -> Result<()>;
    /// Closes rendering and transitions the image toward presentation.
    fn end_render(&mut self, commands: &mut Self::CommandList, image_index: u32) -> Result<()>;

    /// Submits `commands` (or an empty batch, for fence-only arming) on
    /// `queue`. Each wait token is coupled to the pipeline point given with
    /// it; all signal tokens and the optional guard fire when the batch
    /// retires.
    fn submit(
        &mut self,
        queue: QueueKind,
        commands: Option<&Self::CommandList>,
        waits: &[(Self::Semaphore, WaitPoint)],
        signals: &[Self::Semaphore],
        fence: Option<&Self::Fence>,
    ) -> Result<()>;

    /// Acquires the next target image, signaling `signal` once the image is
    /// actually ready on the GPU timeline.
    fn acquire_image(&mut self, signal: &Self::Semaphore, timeout: Duration) -> Result<u32>;
    /// Queues presentation of `image_index`, gated on `wait`.
    fn present(&mut self, image_index: u32, wait: &Self::Semaphore) -> Result<()>;

    /// Blocks until the device has retired all submitted work.
    fn wait_idle(&mut self) -> Result<()>;
}
