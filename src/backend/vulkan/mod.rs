// Vulkan backend
//
// GpuBackend implementation over ash + gpu-allocator. Owns the device,
// swapchain and the fixed graphics pipeline; buffers, fences, semaphores
// and command buffers map one-to-one onto their Vulkan objects.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::config::Config;
use crate::mesh::{IndexFormat, VertexFormat};

use super::{BufferUsage, GpuBackend, MemoryClass, QueueKind, WaitPoint};

pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;

/// A Vulkan buffer with its backing allocation.
pub struct VulkanBuffer {
    raw: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl VulkanBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A command buffer tagged with the queue it was allocated for.
pub struct VulkanCommands {
    raw: vk::CommandBuffer,
    queue: QueueKind,
}

fn wait_stage(point: WaitPoint) -> vk::PipelineStageFlags {
    match point {
        WaitPoint::ColorOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        WaitPoint::VertexInput => vk::PipelineStageFlags::VERTEX_INPUT,
    }
}

fn buffer_usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Vertex => {
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Index => {
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
    }
}

fn memory_location(memory: MemoryClass) -> MemoryLocation {
    match memory {
        MemoryClass::DeviceLocal => MemoryLocation::GpuOnly,
        MemoryClass::CpuVisible => MemoryLocation::CpuToGpu,
    }
}

pub struct VulkanBackend {
    // Declared before `device`: the swapchain holds an Arc clone, so the
    // device outlives it either way, but the drop order keeps validation
    // quiet.
    swapchain: Swapchain,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
    clear_color: [f32; 4],
    push_constants: [u8; pipeline::PUSH_CONSTANT_SIZE as usize],
}

impl VulkanBackend {
    /// Builds the full Vulkan stack for one window. `vertex_format` fixes
    /// the pipeline's vertex input layout.
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
        vertex_format: &VertexFormat,
        config: &Config,
    ) -> Result<Self> {
        let device = VulkanDevice::new(
            &config.window.title,
            display,
            window,
            config.debug.validation_layers,
        )?;

        let swapchain = Swapchain::new(
            device.clone(),
            width,
            height,
            config.get_present_mode(),
        )?;

        let vert_shader = shader::load_shader(&device, &config.graphics.vertex_shader)?;
        let frag_shader = shader::load_shader(&device, &config.graphics.fragment_shader)?;

        let pipeline_result = pipeline::create_graphics_pipeline(
            &device,
            swapchain.format,
            swapchain.depth_format,
            vertex_format,
            vert_shader,
            frag_shader,
        );

        // Modules are compiled into the pipeline; not needed afterwards.
        unsafe {
            device.device.destroy_shader_module(vert_shader, None);
            device.device.destroy_shader_module(frag_shader, None);
        }
        let (pipeline, pipeline_layout) = pipeline_result?;

        Ok(Self {
            swapchain,
            pipeline,
            pipeline_layout,
            device,
            clear_color: config.graphics.clear_color,
            push_constants: [0; pipeline::PUSH_CONSTANT_SIZE as usize],
        })
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Sets the push-constant block recorded with every subsequent draw.
    pub fn set_push_constants(&mut self, data: &[u8]) {
        let len = data.len().min(self.push_constants.len());
        self.push_constants[..len].copy_from_slice(&data[..len]);
    }

    fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.device.graphics_queue,
            QueueKind::Transfer => self.device.transfer_queue,
        }
    }

    fn pool(&self, kind: QueueKind) -> vk::CommandPool {
        match kind {
            QueueKind::Graphics => self.device.graphics_pool,
            QueueKind::Transfer => self.device.transfer_pool,
        }
    }
}

impl GpuBackend for VulkanBackend {
    type Buffer = VulkanBuffer;
    type CommandList = VulkanCommands;
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryClass,
    ) -> Result<Self::Buffer> {
        let families = [self.device.families.graphics, self.device.families.transfer];
        let mut create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(buffer_usage_flags(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // Device-local buffers are written on the transfer queue and read on
        // the graphics queue; with distinct families they must be shared.
        if memory == MemoryClass::DeviceLocal
            && self.device.families.graphics != self.device.families.transfer
        {
            create_info = create_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families);
        }

        let raw = unsafe { self.device.device.create_buffer(&create_info, None) }
            .context("Failed to create buffer")?;
        let requirements = unsafe { self.device.device.get_buffer_memory_requirements(raw) };

        let allocation = self
            .device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location: memory_location(memory),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate buffer memory")?;

        unsafe {
            self.device
                .device
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())
        }
        .context("Failed to bind buffer memory")?;

        Ok(VulkanBuffer {
            raw,
            allocation: Some(allocation),
            size,
        })
    }

    fn destroy_buffer(&mut self, mut buffer: Self::Buffer) {
        if let Some(allocation) = buffer.allocation.take() {
            let _ = self.device.allocator.lock().free(allocation);
        }
        unsafe {
            self.device.device.destroy_buffer(buffer.raw, None);
        }
    }

    fn write_buffer(&mut self, buffer: &mut Self::Buffer, data: &[u8]) -> Result<()> {
        if data.len() as u64 > buffer.size {
            bail!(
                "write of {} bytes into {}-byte buffer",
                data.len(),
                buffer.size
            );
        }
        let mapped = buffer
            .allocation
            .as_mut()
            .context("buffer has no allocation")?
            .mapped_slice_mut()
            .context("buffer memory is not host visible")?;
        mapped[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> Result<Self::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.device.create_fence(&create_info, None) }
            .context("Failed to create fence")
    }

    fn destroy_fence(&mut self, fence: Self::Fence) {
        unsafe {
            self.device.device.destroy_fence(fence, None);
        }
    }

    fn wait_fence(&mut self, fence: &Self::Fence, timeout: Duration) -> Result<()> {
        let result = unsafe {
            self.device
                .device
                .wait_for_fences(&[*fence], true, timeout.as_nanos() as u64)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                bail!("fence wait timed out after {:?}", timeout)
            }
            Err(e) => Err(e).context("fence wait failed"),
        }
    }

    fn reset_fence(&mut self, fence: &Self::Fence) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[*fence]) }.context("Failed to reset fence")
    }

    fn fence_signaled(&mut self, fence: &Self::Fence) -> Result<bool> {
        unsafe { self.device.device.get_fence_status(*fence) }
            .context("Failed to query fence status")
    }

    fn create_semaphore(&mut self) -> Result<Self::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.device.create_semaphore(&create_info, None) }
            .context("Failed to create semaphore")
    }

    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore) {
        unsafe {
            self.device.device.destroy_semaphore(semaphore, None);
        }
    }

    fn create_command_list(&mut self, queue: QueueKind) -> Result<Self::CommandList> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool(queue))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.device.allocate_command_buffers(&allocate_info) }
            .context("Failed to allocate command buffer")?;
        Ok(VulkanCommands {
            raw: buffers[0],
            queue,
        })
    }

    fn destroy_command_list(&mut self, commands: Self::CommandList) {
        unsafe {
            self.device
                .device
                .free_command_buffers(self.pool(commands.queue), &[commands.raw]);
        }
    }

    fn begin_commands(&mut self, commands: &mut Self::CommandList) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_command_buffer(commands.raw, vk::CommandBufferResetFlags::empty())
        }
        .context("Failed to reset command buffer")?;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.device.begin_command_buffer(commands.raw, &begin_info) }
            .context("Failed to begin command buffer")
    }

    fn end_commands(&mut self, commands: &mut Self::CommandList) -> Result<()> {
        unsafe { self.device.device.end_command_buffer(commands.raw) }
            .context("Failed to end command buffer")
    }

    fn record_copy(
        &mut self,
        commands: &mut Self::CommandList,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: u64,
    ) -> Result<()> {
        let region = vk::BufferCopy::builder().size(size).build();
        unsafe {
            self.device
                .device
                .cmd_copy_buffer(commands.raw, src.raw, dst.raw, &[region]);
        }
        Ok(())
    }

    fn record_bind_vertex_buffers(
        &mut self,
        commands: &mut Self::CommandList,
        buffers: &[&Self::Buffer],
    ) -> Result<()> {
        let raws: Vec<vk::Buffer> = buffers.iter().map(|b| b.raw).collect();
        let offsets = vec![0u64; raws.len()];
        unsafe {
            self.device
                .device
                .cmd_bind_vertex_buffers(commands.raw, 0, &raws, &offsets);
        }
        Ok(())
    }

    fn record_bind_index_buffer(
        &mut self,
        commands: &mut Self::CommandList,
        buffer: &Self::Buffer,
        format: IndexFormat,
    ) -> Result<()> {
        let index_type = match format {
            IndexFormat::U16 => vk::IndexType::UINT16,
            IndexFormat::U32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.device
                .device
                .cmd_bind_index_buffer(commands.raw, buffer.raw, 0, index_type);
        }
        Ok(())
    }

    fn record_draw(
        &mut self,
        commands: &mut Self::CommandList,
        first: u32,
        count: u32,
        indexed: bool,
    ) -> Result<()> {
        unsafe {
            self.device.device.cmd_push_constants(
                commands.raw,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                &self.push_constants,
            );
            if indexed {
                self.device
                    .device
                    .cmd_draw_indexed(commands.raw, count, 1, first, 0, 0);
            } else {
                self.device.device.cmd_draw(commands.raw, count, 1, first, 0);
            }
        }
        Ok(())
    }

    fn begin_render(&mut self, commands: &mut Self::CommandList, image_index: u32) -> Result<()> {
        let image = *self
            .swapchain
            .images
            .get(image_index as usize)
            .context("image index out of range")?;
        let view = self.swapchain.image_views[image_index as usize];
        let extent = self.swapchain.extent;

        // UNDEFINED -> COLOR_ATTACHMENT for the target image, UNDEFINED ->
        // DEPTH_STENCIL for the depth buffer (its contents never carry over).
        let color_barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();
        let depth_barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.swapchain.depth_image())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                commands.raw,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[color_barrier, depth_barrier],
            );
        }

        let color_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            })
            .build();
        let depth_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(self.swapchain.depth_view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            })
            .build();

        let color_attachments = [color_attachment];
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        unsafe {
            self.device
                .device
                .cmd_begin_rendering(commands.raw, &rendering_info);
            self.device.device.cmd_bind_pipeline(
                commands.raw,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            );
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            self.device.device.cmd_set_viewport(commands.raw, 0, &[viewport]);
            self.device.device.cmd_set_scissor(commands.raw, 0, &[scissor]);
        }
        Ok(())
    }

    fn end_render(&mut self, commands: &mut Self::CommandList, image_index: u32) -> Result<()> {
        let image = *self
            .swapchain
            .images
            .get(image_index as usize)
            .context("image index out of range")?;

        unsafe {
            self.device.device.cmd_end_rendering(commands.raw);
        }

        // COLOR_ATTACHMENT -> PRESENT_SRC for the presentation engine.
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                commands.raw,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
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
        let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|(s, _)| *s).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            waits.iter().map(|(_, p)| wait_stage(*p)).collect();
        let command_buffers: Vec<vk::CommandBuffer> =
            commands.iter().map(|c| c.raw).collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(signals)
            .build();

        unsafe {
            self.device.device.queue_submit(
                self.queue(queue),
                &[submit_info],
                fence.copied().unwrap_or_else(vk::Fence::null),
            )
        }
        .context("queue submit failed")
    }

    fn acquire_image(&mut self, signal: &Self::Semaphore, timeout: Duration) -> Result<u32> {
        self.swapchain
            .acquire_next_image(timeout.as_nanos() as u64, *signal)
    }

    fn present(&mut self, image_index: u32, wait: &Self::Semaphore) -> Result<()> {
        self.swapchain
            .present(self.device.present_queue, image_index, &[*wait])
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}
