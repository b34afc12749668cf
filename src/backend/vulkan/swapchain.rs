// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// plus the shared depth buffer. Images are CONCURRENT-shared when the
// graphics and present queues live in different families.

use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::VulkanDevice;

const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub depth_format: vk::Format,
    pub depth_view: vk::ImageView,
    depth_image: vk::Image,
    depth_allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface = device.surface;

        let surface_caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, surface)
        }?;

        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, surface)
        }?;

        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;

        // Choose surface format (prefer SRGB)
        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .context("No suitable surface format")?;

        // Preferred mode if available, else MAILBOX, else FIFO which is
        // guaranteed by the spec.
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == preferred_present_mode)
            .or_else(|| {
                present_modes
                    .iter()
                    .copied()
                    .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            })
            .unwrap_or(vk::PresentModeKHR::FIFO);

        log::info!("Present mode: {:?}", present_mode);

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let families = [device.families.graphics, device.families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        create_info = if device.families.graphics != device.families.present {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;

        log::info!("Created swapchain with {} images", images.len());

        let image_views: Result<Vec<_>> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    device
                        .device
                        .create_image_view(&create_info, None)
                        .context("Failed to create image view")
                }
            })
            .collect();

        let (depth_image, depth_allocation, depth_view) =
            Self::create_depth_buffer(&device, extent)?;

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: image_views?,
            format: surface_format.format,
            extent,
            depth_format: DEPTH_FORMAT,
            depth_view,
            depth_image,
            depth_allocation: Some(depth_allocation),
            device,
        })
    }

    fn create_depth_buffer(
        device: &VulkanDevice,
        extent: vk::Extent2D,
    ) -> Result<(vk::Image, Allocation, vk::ImageView)> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.device.create_image(&create_info, None) }
            .context("Failed to create depth image")?;
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name: "depth buffer",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.device.create_image_view(&view_info, None) }
            .context("Failed to create depth image view")?;

        Ok((image, allocation, view))
    }

    pub fn depth_image(&self) -> vk::Image {
        self.depth_image
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<u32> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, _suboptimal)) => Ok(index),
            Err(vk::Result::TIMEOUT) => {
                anyhow::bail!("image acquire timed out")
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                anyhow::bail!("Swapchain out of date")
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(_suboptimal) => Ok(()),
            // Stale but still presentable; recreation is out of scope.
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.depth_view, None);
            self.device.device.destroy_image(self.depth_image, None);
            if let Some(allocation) = self.depth_allocation.take() {
                let _ = self.device.allocator.lock().free(allocation);
            }
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
