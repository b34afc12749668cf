// Upload properties: staged bytes land intact, draws never observe a
// half-applied upload, and stale or never-uploaded handles are rejected.

mod common;

use common::{renderer, triangle, triangle_indices};
use gfx_renderer::{Mesh, PrimitiveTopology};

#[test]
fn staged_bytes_round_trip() {
    let mut r = renderer();
    let vertices = triangle(&mut r);

    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.end_prepare());

    let handle = vertices.buffers[0];
    let gpu = *r.device_buffer(handle).expect("device buffer exists after staging");

    // The copy only lands once the device executes it.
    assert_ne!(r.backend().buffer_bytes(&gpu).unwrap(), &vertices.arrays[0][..]);
    r.backend_mut().retire_gpu_work();
    assert_eq!(r.backend().buffer_bytes(&gpu).unwrap(), &vertices.arrays[0][..]);
}

#[test]
fn reupload_overwrites_destination() {
    let mut r = renderer();
    let mut vertices = triangle(&mut r);

    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.end_prepare());
    r.backend_mut().retire_gpu_work();

    for byte in vertices.arrays[0].iter_mut() {
        *byte = 0xAB;
    }
    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.end_prepare());
    r.backend_mut().retire_gpu_work();

    let gpu = *r.device_buffer(vertices.buffers[0]).unwrap();
    assert!(r.backend().buffer_bytes(&gpu).unwrap().iter().all(|&b| b == 0xAB));
}

#[test]
fn draw_waits_for_same_frame_upload() {
    let mut r = renderer();
    let vertices = triangle(&mut r);
    let indices = triangle_indices(&mut r);

    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.stage_index_data(&indices));
    assert!(r.end_prepare());

    assert!(r.begin_frame());
    assert!(r.begin_frame_surface());
    let mesh = Mesh {
        vertex_data: &vertices,
        index_data: Some(&indices),
        first: 0,
        count: 0,
        topology: PrimitiveTopology::TriangleList,
    };
    assert!(r.draw(&mesh));
    assert!(r.end_frame_surface());
    assert!(r.end_frame());

    assert!(r.backend().executed_draws().is_empty());
    r.backend_mut().retire_gpu_work();

    // The draw executed after the copy: its snapshot shows the uploaded
    // bytes, not the zero-initialized buffer.
    let draws = r.backend().executed_draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].vertex_arrays[0], vertices.arrays[0]);
    assert_eq!(draws[0].index_bytes.as_deref(), Some(&indices.data[..]));
    assert_eq!(draws[0].count, 3);
    assert!(draws[0].indexed);
}

#[test]
fn draw_range_defaults_to_everything() {
    let mut r = renderer();
    let vertices = triangle(&mut r);

    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.end_prepare());

    assert!(r.begin_frame());
    let mesh = Mesh {
        vertex_data: &vertices,
        index_data: None,
        first: 1,
        count: 0,
        topology: PrimitiveTopology::TriangleList,
    };
    assert!(r.draw(&mesh));
    assert!(r.end_frame());

    r.backend_mut().retire_gpu_work();
    let draws = r.backend().executed_draws();
    assert_eq!(draws[0].first, 1);
    assert_eq!(draws[0].count, 2);
    assert!(!draws[0].indexed);
}

#[test]
fn draw_of_never_uploaded_buffer_fails() {
    let mut r = renderer();
    let vertices = triangle(&mut r);

    assert!(r.begin_frame());
    let mesh = Mesh {
        vertex_data: &vertices,
        index_data: None,
        first: 0,
        count: 0,
        topology: PrimitiveTopology::TriangleList,
    };
    assert!(!r.draw(&mesh));
}

#[test]
fn staging_buffers_do_not_accumulate() {
    let mut r = renderer();
    let vertices = triangle(&mut r);

    // Three upload frames; every staging buffer should pass through the
    // deletion queue and be reclaimed once its copy retires.
    for _ in 0..3 {
        assert!(r.begin_prepare());
        assert!(r.stage_vertex_data(&vertices));
        assert!(r.end_prepare());
        assert!(r.begin_frame());
        assert!(r.end_frame());
        r.backend_mut().retire_gpu_work();
    }
    // Two more deletion passes release everything in flight.
    assert!(r.begin_prepare());
    assert!(r.end_prepare());
    assert!(r.begin_frame());
    assert!(r.end_frame());
    r.backend_mut().retire_gpu_work();
    assert!(r.begin_prepare());
    assert!(r.end_prepare());

    assert_eq!(r.pending_deletions(), 0);
    // Only the one device-local vertex buffer remains.
    assert_eq!(r.backend().live_buffers(), 1);
}

#[test]
fn stage_outside_prepare_fails() {
    let mut r = renderer();
    let vertices = triangle(&mut r);
    assert!(!r.stage_vertex_data(&vertices));
}
