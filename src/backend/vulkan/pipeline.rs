// Graphics pipeline creation
//
// Single fixed pipeline built for dynamic rendering: no render pass, the
// color/depth formats go straight into the pipeline, viewport and scissor
// are dynamic state. Vertex input is derived from the renderer's vertex
// format descriptor.

use anyhow::{Context, Result};
use ash::vk;

use crate::mesh::{VertexColumn, VertexFormat};

use super::VulkanDevice;

/// Push constants: two 4x4 matrices (view-projection + model), 128 bytes,
/// the guaranteed minimum push-constant budget.
pub const PUSH_CONSTANT_SIZE: u32 = 128;

fn column_format(column: VertexColumn) -> vk::Format {
    match column {
        VertexColumn::Position => vk::Format::R32G32B32_SFLOAT,
        VertexColumn::Color => vk::Format::R8G8B8A8_UNORM,
        VertexColumn::Texcoord => vk::Format::R32G32_SFLOAT,
        VertexColumn::Normal => vk::Format::R32G32B32_SFLOAT,
        VertexColumn::Tangent => vk::Format::R32G32B32_SFLOAT,
    }
}

const COLUMNS: [VertexColumn; VertexColumn::COUNT] = [
    VertexColumn::Position,
    VertexColumn::Color,
    VertexColumn::Texcoord,
    VertexColumn::Normal,
    VertexColumn::Tangent,
];

/// One binding per vertex array; attribute locations follow column order
/// across all arrays.
pub fn vertex_input_info(
    format: &VertexFormat,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let mut bindings = Vec::new();
    let mut attributes = Vec::new();
    let mut location = 0u32;

    for (binding, array) in format.arrays.iter().enumerate() {
        bindings.push(
            vk::VertexInputBindingDescription::builder()
                .binding(binding as u32)
                .stride(array.row_stride() as u32)
                .input_rate(vk::VertexInputRate::VERTEX)
                .build(),
        );
        for column in COLUMNS {
            if !array.contains(column) {
                continue;
            }
            attributes.push(
                vk::VertexInputAttributeDescription::builder()
                    .binding(binding as u32)
                    .location(location)
                    .format(column_format(column))
                    .offset(array.column_offset(column) as u32)
                    .build(),
            );
            location += 1;
        }
    }

    (bindings, attributes)
}

/// Create the graphics pipeline for dynamic rendering
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    color_format: vk::Format,
    depth_format: vk::Format,
    vertex_format: &VertexFormat,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    let entry_point = std::ffi::CString::new("main").unwrap();

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(&entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader)
        .name(&entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    let (bindings, attributes) = vertex_input_info(vertex_format);
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport/scissor are dynamic; only the counts matter here.
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .offset(0)
        .size(PUSH_CONSTANT_SIZE)
        .build();

    let push_constant_ranges = &[push_constant_range];

    let layout_info =
        vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(push_constant_ranges);

    let pipeline_layout = unsafe {
        device
            .device
            .create_pipeline_layout(&layout_info, None)
            .context("Failed to create pipeline layout")?
    };

    let color_formats = [color_format];
    let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .dynamic_state(&dynamic_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .layout(pipeline_layout)
        .push_next(&mut rendering_info)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)
            .context("Failed to create graphics pipeline")?
    };

    Ok((pipelines[0], pipeline_layout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_layout_follows_format() {
        let format = VertexFormat::single(&[VertexColumn::Position, VertexColumn::Color]);
        let (bindings, attributes) = vertex_input_info(&format);

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 16);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attributes[1].format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].location, 1);
    }
}
