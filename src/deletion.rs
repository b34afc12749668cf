// Deletion queue - deferred GPU resource reclamation
//
// A buffer the GPU may still be reading cannot be destroyed on the spot.
// Requests enter unguarded, get a fresh fence armed behind the last queue
// that touched the resource, and are destroyed only once that fence reports
// signaled. Release removes the request, so each resource is destroyed at
// most once.

use anyhow::{Context, Result};

use crate::backend::{GpuBackend, QueueKind};

struct Request<B: GpuBackend> {
    /// None for registry entries that never got a device allocation; those
    /// release immediately since there is nothing the GPU could be reading.
    buffer: Option<B::Buffer>,
    queue: QueueKind,
    guard: Option<B::Fence>,
}

/// Queue of pending destructions, processed once per frame.
pub struct DeletionQueue<B: GpuBackend> {
    requests: Vec<Request<B>>,
    released: u64,
}

impl<B: GpuBackend> Default for DeletionQueue<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> DeletionQueue<B> {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            released: 0,
        }
    }

    /// Requests destruction of `buffer` once `queue` has retired all work
    /// that could touch it.
    pub fn enqueue(&mut self, buffer: Option<B::Buffer>, queue: QueueKind) {
        self.requests.push(Request {
            buffer,
            queue,
            guard: None,
        });
    }

    /// Runs one step of the state machine.
    ///
    /// Guarded requests whose fence has signaled are destroyed and removed.
    /// Unguarded requests get a fresh unsignaled fence; the returned list of
    /// (queue, fence) pairs must be armed as fence-only submissions on their
    /// queues after this frame's real work is submitted, so each fence
    /// signals only once everything previously queued has retired.
    pub fn process(&mut self, backend: &mut B) -> Result<Vec<(QueueKind, B::Fence)>> {
        let mut i = 0;
        while i < self.requests.len() {
            let done = match &self.requests[i].guard {
                Some(fence) => backend.fence_signaled(fence)?,
                None => false,
            };
            if done {
                let request = self.requests.swap_remove(i);
                if let Some(buffer) = request.buffer {
                    backend.destroy_buffer(buffer);
                }
                if let Some(fence) = request.guard {
                    backend.destroy_fence(fence);
                }
                self.released += 1;
            } else {
                i += 1;
            }
        }

        let mut to_arm = Vec::new();
        for request in &mut self.requests {
            if request.guard.is_none() {
                match request.buffer {
                    Some(_) => {
                        let fence = backend
                            .create_fence(false)
                            .context("failed to create deletion guard fence")?;
                        request.guard = Some(fence.clone());
                        to_arm.push((request.queue, fence));
                    }
                    // Nothing on the device; fake an already-fired guard so
                    // the request releases on the next process pass.
                    None => {
                        request.guard = Some(
                            backend
                                .create_fence(true)
                                .context("failed to create deletion guard fence")?,
                        );
                    }
                }
            }
        }
        Ok(to_arm)
    }

    /// Destroys everything immediately. Caller must have idled the device.
    pub fn drain_all(&mut self, backend: &mut B) {
        for request in self.requests.drain(..) {
            if let Some(buffer) = request.buffer {
                backend.destroy_buffer(buffer);
            }
            if let Some(fence) = request.guard {
                backend.destroy_fence(fence);
            }
            self.released += 1;
        }
    }

    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    pub fn released(&self) -> u64 {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferUsage, HeadlessBackend, MemoryClass};

    fn make_buffer(backend: &mut HeadlessBackend) -> crate::backend::headless::BufferId {
        backend
            .create_buffer(64, BufferUsage::Vertex, MemoryClass::DeviceLocal)
            .unwrap()
    }

    #[test]
    fn resource_survives_until_guard_signals() {
        let mut backend = HeadlessBackend::new();
        let buffer = make_buffer(&mut backend);
        let mut queue = DeletionQueue::new();
        queue.enqueue(Some(buffer), QueueKind::Transfer);

        // First pass guards the request; nothing is destroyed.
        let armed = queue.process(&mut backend).unwrap();
        assert_eq!(armed.len(), 1);
        assert!(backend.buffer_alive(&buffer));
        for (kind, fence) in &armed {
            backend.submit(*kind, None, &[], &[], Some(fence)).unwrap();
        }

        // Guard not yet signaled: still alive.
        assert!(queue.process(&mut backend).unwrap().is_empty());
        assert!(backend.buffer_alive(&buffer));

        // Once the GPU retires the empty submission the next pass releases.
        backend.retire_gpu_work();
        queue.process(&mut backend).unwrap();
        assert!(!backend.buffer_alive(&buffer));
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.released(), 1);
    }

    #[test]
    fn release_happens_at_most_once() {
        let mut backend = HeadlessBackend::new();
        let buffer = make_buffer(&mut backend);
        let mut queue = DeletionQueue::new();
        queue.enqueue(Some(buffer), QueueKind::Graphics);

        let armed = queue.process(&mut backend).unwrap();
        for (kind, fence) in &armed {
            backend.submit(*kind, None, &[], &[], Some(fence)).unwrap();
        }
        backend.retire_gpu_work();
        queue.process(&mut backend).unwrap();
        let destroyed = backend.buffers_destroyed();
        // Further passes must not touch the already-released resource.
        queue.process(&mut backend).unwrap();
        queue.process(&mut backend).unwrap();
        assert_eq!(backend.buffers_destroyed(), destroyed);
        assert_eq!(queue.released(), 1);
    }

    #[test]
    fn bufferless_request_releases_next_pass() {
        let mut backend = HeadlessBackend::new();
        let mut queue: DeletionQueue<HeadlessBackend> = DeletionQueue::new();
        queue.enqueue(None, QueueKind::Transfer);

        let armed = queue.process(&mut backend).unwrap();
        assert!(armed.is_empty());
        queue.process(&mut backend).unwrap();
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.released(), 1);
    }

    #[test]
    fn drain_all_destroys_everything() {
        let mut backend = HeadlessBackend::new();
        let a = make_buffer(&mut backend);
        let b = make_buffer(&mut backend);
        let mut queue = DeletionQueue::new();
        queue.enqueue(Some(a), QueueKind::Transfer);
        queue.enqueue(Some(b), QueueKind::Graphics);
        queue.process(&mut backend).unwrap();

        queue.drain_all(&mut backend);
        assert!(!backend.buffer_alive(&a));
        assert!(!backend.buffer_alive(&b));
        assert_eq!(queue.pending(), 0);
    }
}
