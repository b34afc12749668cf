// Deferred reclamation properties driven through the full frame cycle:
// a retired buffer outlives every queued draw that references it, is
// destroyed exactly once, and stale handles stay inert.

mod common;

use common::{renderer, run_empty_frame, triangle};
use gfx_renderer::{Mesh, PrimitiveTopology};

#[test]
fn retired_buffer_survives_in_flight_draws() {
    let mut r = renderer();
    let vertices = triangle(&mut r);

    // Upload and draw, leaving the work queued on the stalled device.
    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.end_prepare());
    assert!(r.begin_frame());
    assert!(r.begin_frame_surface());
    let mesh = Mesh {
        vertex_data: &vertices,
        index_data: None,
        first: 0,
        count: 0,
        topology: PrimitiveTopology::TriangleList,
    };
    assert!(r.draw(&mesh));
    assert!(r.end_frame_surface());
    assert!(r.end_frame());

    let gpu = *r.device_buffer(vertices.buffers[0]).unwrap();
    r.retire_vertex_data(&vertices);

    // The handle is gone immediately, the device buffer is not.
    assert!(r.device_buffer(vertices.buffers[0]).is_none());
    assert!(r.backend().buffer_alive(&gpu));

    // Next frame guards the request; the buffer still must not go away
    // while the queued draw has not executed.
    run_empty_frame(&mut r);
    assert!(r.backend().buffer_alive(&gpu));

    // Guard fence was armed behind the draw; once the device retires it
    // the following deletion pass destroys the buffer.
    r.backend_mut().retire_gpu_work();
    assert!(r.begin_prepare());
    assert!(r.end_prepare());
    assert!(!r.backend().buffer_alive(&gpu));

    // The queued draw consumed the bytes it was recorded with.
    let draws = r.backend().executed_draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].vertex_arrays[0], vertices.arrays[0]);
}

#[test]
fn destruction_happens_exactly_once() {
    let mut r = renderer();
    let vertices = triangle(&mut r);

    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.end_prepare());
    r.retire_vertex_data(&vertices);

    // Several full cycles with the device keeping pace.
    for _ in 0..4 {
        r.backend_mut().retire_gpu_work();
        run_empty_frame(&mut r);
    }
    r.backend_mut().retire_gpu_work();
    assert!(r.begin_prepare());
    assert!(r.end_prepare());
    assert_eq!(r.pending_deletions(), 0);

    // One staging buffer + one device-local buffer, each destroyed once.
    assert_eq!(r.backend().buffers_destroyed(), 2);
    assert_eq!(r.backend().live_buffers(), 0);
}

#[test]
fn stale_handle_operations_are_inert() {
    let mut r = renderer();
    let vertices = triangle(&mut r);
    let handle = vertices.buffers[0];

    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.end_prepare());
    r.retire_vertex_data(&vertices);
    r.backend_mut().retire_gpu_work();

    // Staging to a retired handle fails without touching anything.
    assert!(r.begin_prepare());
    assert!(!r.stage_upload(handle, &[1, 2, 3, 4]));
    assert!(r.end_prepare());

    // A second retire of the same handle is a no-op, not a double free.
    r.retire_vertex_data(&vertices);
    for _ in 0..4 {
        r.backend_mut().retire_gpu_work();
        run_empty_frame(&mut r);
    }
    r.backend_mut().retire_gpu_work();
    assert!(r.begin_prepare());
    assert!(r.end_prepare());
    assert_eq!(r.backend().buffers_destroyed(), 2);
}

#[test]
fn never_uploaded_buffer_releases_without_guard() {
    let mut r = renderer();
    let vertices = triangle(&mut r);

    // No upload ever happened, so there is no device allocation and no
    // queue to guard against.
    r.retire_vertex_data(&vertices);
    assert_eq!(r.pending_deletions(), 1);

    assert!(r.begin_prepare());
    assert!(r.end_prepare());
    assert!(r.begin_prepare());
    assert!(r.end_prepare());

    assert_eq!(r.pending_deletions(), 0);
    assert_eq!(r.backend().buffers_destroyed(), 0);
    // No guard submission was ever made for it either.
    assert_eq!(r.backend().submissions_made(), 0);
}

#[test]
fn shutdown_reclaims_everything() {
    let mut r = renderer();
    let vertices = triangle(&mut r);

    assert!(r.begin_prepare());
    assert!(r.stage_vertex_data(&vertices));
    assert!(r.end_prepare());
    r.retire_vertex_data(&vertices);

    // Drop with work still queued: shutdown idles the device and drains
    // both the deletion queue and the registry.
    r.shutdown();
    assert_eq!(r.backend().live_buffers(), 0);
}
