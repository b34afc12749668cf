// Frame ring - per-frame synchronization state
//
// One slot per frame in flight. Each slot owns the command lists and sync
// objects for one frame's draw and transfer work; cycling the ring is the
// only way the active slot changes.

use anyhow::{Context, Result};

use crate::backend::{GpuBackend, QueueKind};

/// Everything one in-flight frame owns.
pub struct FrameSlot<B: GpuBackend> {
    /// Graphics command list for this frame's draws.
    pub draw_commands: B::CommandList,
    /// Guard fence armed by the draw submission. Created signaled so the
    /// first wait on a fresh slot passes immediately.
    pub draw_fence: B::Fence,
    /// Signaled when the swapchain image is actually ready.
    pub image_acquired: B::Semaphore,
    /// Signaled when this frame's draw submission retires; gates present.
    pub draw_done: B::Semaphore,

    /// Transfer command list for this frame's staged uploads.
    pub transfer_commands: B::CommandList,
    /// Guard fence for the transfer submission. Also created signaled.
    pub transfer_fence: B::Fence,
    /// Signaled when this frame's uploads land; the draw submission waits
    /// on it at vertex input, but only if a transfer was submitted.
    pub transfer_done: B::Semaphore,
    /// Whether end_prepare actually submitted transfer work this frame.
    pub transfer_submitted: bool,

    /// Swapchain image index acquired for this frame, if any.
    pub image_index: Option<u32>,
}

impl<B: GpuBackend> FrameSlot<B> {
    fn new(backend: &mut B) -> Result<Self> {
        Ok(Self {
            draw_commands: backend
                .create_command_list(QueueKind::Graphics)
                .context("failed to create draw command list")?,
            draw_fence: backend
                .create_fence(true)
                .context("failed to create draw fence")?,
            image_acquired: backend.create_semaphore()?,
            draw_done: backend.create_semaphore()?,
            transfer_commands: backend
                .create_command_list(QueueKind::Transfer)
                .context("failed to create transfer command list")?,
            transfer_fence: backend
                .create_fence(true)
                .context("failed to create transfer fence")?,
            transfer_done: backend.create_semaphore()?,
            transfer_submitted: false,
            image_index: None,
        })
    }

    fn destroy(self, backend: &mut B) {
        backend.destroy_command_list(self.draw_commands);
        backend.destroy_command_list(self.transfer_commands);
        backend.destroy_fence(self.draw_fence);
        backend.destroy_fence(self.transfer_fence);
        backend.destroy_semaphore(self.image_acquired);
        backend.destroy_semaphore(self.draw_done);
        backend.destroy_semaphore(self.transfer_done);
    }
}

/// Ring of frame slots. The active slot advances only via `cycle`, after a
/// frame's submissions are all queued.
pub struct FrameRing<B: GpuBackend> {
    slots: Vec<FrameSlot<B>>,
    active: usize,
    /// Monotonic count of completed cycles, for logging.
    frame_number: u64,
}

impl<B: GpuBackend> FrameRing<B> {
    pub fn new(backend: &mut B, frames_in_flight: usize) -> Result<Self> {
        let count = frames_in_flight.max(1);
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(FrameSlot::new(backend)?);
        }
        log::info!("Frame ring initialized with {} slots", count);
        Ok(Self {
            slots,
            active: 0,
            frame_number: 0,
        })
    }

    pub fn active(&self) -> &FrameSlot<B> {
        &self.slots[self.active]
    }

    pub fn active_mut(&mut self) -> &mut FrameSlot<B> {
        &mut self.slots[self.active]
    }

    /// Advances to the next slot. The slot just left keeps its in-flight
    /// state until the ring comes back around and its fences are waited.
    pub fn cycle(&mut self) {
        self.active = (self.active + 1) % self.slots.len();
        self.frame_number += 1;
    }

    pub fn index(&self) -> usize {
        self.active
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Tears every slot down. Caller must have idled the device first.
    pub fn destroy(&mut self, backend: &mut B) {
        for slot in self.slots.drain(..) {
            slot.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn ring_cycles_through_slots() {
        let mut backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(&mut backend, 2).unwrap();
        assert_eq!(ring.index(), 0);
        ring.cycle();
        assert_eq!(ring.index(), 1);
        ring.cycle();
        assert_eq!(ring.index(), 0);
        assert_eq!(ring.frame_number(), 2);
        ring.destroy(&mut backend);
    }

    #[test]
    fn fences_start_signaled() {
        let mut backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(&mut backend, 2).unwrap();
        let draw = ring.active().draw_fence.clone();
        let transfer = ring.active().transfer_fence.clone();
        assert!(backend.fence_signaled(&draw).unwrap());
        assert!(backend.fence_signaled(&transfer).unwrap());
        ring.destroy(&mut backend);
    }

    #[test]
    fn at_least_one_slot() {
        let mut backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(&mut backend, 0).unwrap();
        assert_eq!(ring.len(), 1);
        ring.destroy(&mut backend);
    }
}
