// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. This module provides
// utilities to load compiled shaders and create shader modules.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;

use super::VulkanDevice;

/// Load SPIR-V shader from bytes and create a shader module
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    let code = read_spv(&mut Cursor::new(code)).context("Shader bytecode is not valid SPIR-V")?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Load a compiled shader from disk and create a shader module
pub fn load_shader<P: AsRef<Path>>(device: &VulkanDevice, path: P) -> Result<vk::ShaderModule> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader file: {:?}", path))?;
    create_shader_module(device, &bytes)
}
