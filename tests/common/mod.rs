// Shared fixtures for the integration suites: a renderer over the headless
// backend plus small payload builders.

use gfx_renderer::{
    HeadlessBackend, IndexData, IndexFormat, Renderer, RendererOptions, VertexColumn, VertexData,
    VertexFormat,
};

pub fn renderer() -> Renderer<HeadlessBackend> {
    Renderer::new(HeadlessBackend::new(), RendererOptions::default())
        .expect("headless renderer construction cannot fail")
}

pub fn position_format() -> VertexFormat {
    VertexFormat::single(&[VertexColumn::Position])
}

/// A triangle: three position-only vertices with recognizable bytes.
pub fn triangle(renderer: &mut Renderer<HeadlessBackend>) -> VertexData {
    let mut data = renderer.make_vertex_buffer(position_format(), 3);
    for (i, byte) in data.arrays[0].iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    data
}

pub fn triangle_indices(renderer: &mut Renderer<HeadlessBackend>) -> IndexData {
    let mut data = renderer.make_index_buffer(IndexFormat::U16, 3);
    data.data.copy_from_slice(&[0, 0, 1, 0, 2, 0]);
    data
}

/// One frame with nothing staged and nothing drawn, asserting every phase
/// reports success.
pub fn run_empty_frame(renderer: &mut Renderer<HeadlessBackend>) {
    assert!(renderer.begin_prepare());
    assert!(renderer.end_prepare());
    assert!(renderer.begin_frame());
    assert!(renderer.begin_frame_surface());
    assert!(renderer.end_frame_surface());
    assert!(renderer.end_frame());
}
