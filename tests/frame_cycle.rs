// Frame-cycle properties: ring advance, backpressure against a stalled
// device, and idempotence of empty prepare phases.

mod common;

use common::{renderer, run_empty_frame};

#[test]
fn ring_advances_one_slot_per_frame() {
    let mut r = renderer();
    assert_eq!(r.frames_in_flight(), 2);

    assert_eq!(r.frame_index(), 0);
    run_empty_frame(&mut r);
    r.backend_mut().retire_gpu_work();
    assert_eq!(r.frame_index(), 1);
    run_empty_frame(&mut r);
    r.backend_mut().retire_gpu_work();
    assert_eq!(r.frame_index(), 0);
}

#[test]
fn empty_prepare_phase_is_idempotent() {
    let mut r = renderer();
    // No uploads means no transfer submission and no fence reset, so this
    // must keep succeeding without the device making any progress.
    for _ in 0..5 {
        assert!(r.begin_prepare());
        assert!(r.end_prepare());
    }
    assert_eq!(r.backend().submissions_made(), 0);
}

#[test]
fn third_frame_times_out_when_gpu_stalls() {
    let mut r = renderer();
    // Two frames fit in the ring without the device retiring anything.
    run_empty_frame(&mut r);
    run_empty_frame(&mut r);

    // The third frame reuses slot 0, whose draw guard never signaled.
    assert!(r.begin_prepare());
    assert!(r.end_prepare());
    assert!(!r.begin_frame());

    // Once the device catches up the same slot becomes usable again.
    r.backend_mut().retire_gpu_work();
    assert!(r.begin_frame());
    assert!(r.begin_frame_surface());
    assert!(r.end_frame_surface());
    assert!(r.end_frame());
}

#[test]
fn frames_present_their_acquired_images() {
    let mut r = renderer();
    run_empty_frame(&mut r);
    run_empty_frame(&mut r);
    // Nothing reaches the display until the device executes the work.
    assert!(r.backend().presented_images().is_empty());
    r.backend_mut().retire_gpu_work();
    assert_eq!(r.backend().presented_images(), &[0, 1]);
}

#[test]
fn frame_phases_reject_misuse() {
    let mut r = renderer();
    // end_frame without begin_frame.
    assert!(!r.end_frame());
    // draw outside a frame.
    let vertices = common::triangle(&mut r);
    let mesh = gfx_renderer::Mesh {
        vertex_data: &vertices,
        index_data: None,
        first: 0,
        count: 0,
        topology: gfx_renderer::PrimitiveTopology::TriangleList,
    };
    assert!(!r.draw(&mesh));
    // double begin_frame.
    assert!(r.begin_frame());
    assert!(!r.begin_frame());
}
