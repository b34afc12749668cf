// Renderer core
//
// Frame-cycle synchronization, staged CPU->GPU uploads and deferred
// resource reclamation, generic over a small GPU backend trait. The
// vulkan backend drives a real device; the headless backend runs the
// same machinery in memory for tests.

pub mod backend;
pub mod config;
pub mod deletion;
pub mod frame;
pub mod mesh;
pub mod renderer;
pub mod resource;
pub mod transfer;

pub use backend::{BufferUsage, GpuBackend, HeadlessBackend, MemoryClass, QueueKind, VulkanBackend, WaitPoint};
pub use config::Config;
pub use mesh::{
    IndexData, IndexFormat, Mesh, PrimitiveTopology, VertexArrayFormat, VertexColumn, VertexData,
    VertexFormat,
};
pub use renderer::{Renderer, RendererOptions};
pub use resource::BufferHandle;
