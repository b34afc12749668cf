// Transfer stage - CPU to GPU staged uploads
//
// Uploads are batched per frame between begin() and end(). Each stage()
// call lands the bytes in a CPU-visible staging buffer; end() records all
// the copies into the frame's transfer command list, hands the staging
// buffers to the deletion queue, and submits on the transfer queue. A frame
// with no uploads closes the recording and submits nothing, leaving the
// transfer fence signaled so the next begin() does not block.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::backend::{BufferUsage, GpuBackend, MemoryClass, QueueKind};
use crate::deletion::DeletionQueue;
use crate::frame::FrameSlot;
use crate::resource::{BufferEntry, BufferHandle, BufferTable};

struct PendingUpload<B: GpuBackend> {
    staging: Option<B::Buffer>,
    target: BufferHandle,
    size: u64,
}

/// Per-frame upload batcher. One instance serves the whole ring; the frame
/// slot passed to begin/end supplies the command list and sync objects.
pub struct TransferStage<B: GpuBackend> {
    pending: Vec<PendingUpload<B>>,
    preparing: bool,
}

impl<B: GpuBackend> Default for TransferStage<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> TransferStage<B> {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            preparing: false,
        }
    }

    /// Opens the upload batch for the active frame. Waits (bounded) for the
    /// slot's previous transfer to retire before reusing its command list.
    pub fn begin(
        &mut self,
        backend: &mut B,
        slot: &mut FrameSlot<B>,
        timeout: Duration,
    ) -> Result<()> {
        if self.preparing {
            bail!("upload batch is already open");
        }
        backend
            .wait_fence(&slot.transfer_fence, timeout)
            .context("previous transfer did not retire in time")?;
        backend
            .begin_commands(&mut slot.transfer_commands)
            .context("failed to begin transfer recording")?;
        slot.transfer_submitted = false;
        self.preparing = true;
        Ok(())
    }

    /// Queues `data` for upload into the buffer behind `handle`. Creates the
    /// device-local buffer on first upload.
    pub fn stage(
        &mut self,
        backend: &mut B,
        buffers: &mut BufferTable<B::Buffer>,
        handle: BufferHandle,
        data: &[u8],
    ) -> Result<()> {
        if !self.preparing {
            bail!("stage_upload called outside begin_prepare/end_prepare");
        }
        let entry = buffers
            .get_mut(handle)
            .context("upload targets a retired buffer handle")?;
        if data.len() as u64 > entry.size {
            bail!(
                "upload of {} bytes exceeds buffer size {}",
                data.len(),
                entry.size
            );
        }
        if entry.gpu.is_none() {
            let gpu = backend
                .create_buffer(entry.size, entry.usage, MemoryClass::DeviceLocal)
                .context("failed to create device-local buffer")?;
            entry.gpu = Some(gpu);
        }
        entry.last_queue = QueueKind::Transfer;

        let mut staging = backend
            .create_buffer(data.len() as u64, BufferUsage::Staging, MemoryClass::CpuVisible)
            .context("failed to create staging buffer")?;
        backend.write_buffer(&mut staging, data)?;
        self.pending.push(PendingUpload {
            staging: Some(staging),
            target: handle,
            size: data.len() as u64,
        });
        Ok(())
    }

    /// Closes the batch. Records every pending copy, retires the staging
    /// buffers through the deletion queue, and submits on the transfer
    /// queue signaling the slot's transfer_done token. Returns whether a
    /// submission was actually made.
    pub fn end(
        &mut self,
        backend: &mut B,
        slot: &mut FrameSlot<B>,
        buffers: &BufferTable<B::Buffer>,
        deletion: &mut DeletionQueue<B>,
    ) -> Result<bool> {
        if !self.preparing {
            bail!("end_prepare called without begin_prepare");
        }
        self.preparing = false;

        let had_uploads = !self.pending.is_empty();
        for upload in &mut self.pending {
            let staging = upload.staging.take();
            let entry = buffers
                .get(upload.target)
                .context("upload target vanished before copy was recorded")?;
            let dst = entry
                .gpu
                .as_ref()
                .context("upload target lost its device allocation")?;
            if let Some(src) = staging.as_ref() {
                backend.record_copy(&mut slot.transfer_commands, src, dst, upload.size)?;
            }
            // Staging memory is read by the copy; it retires with the queue.
            deletion.enqueue(staging, QueueKind::Transfer);
        }
        self.pending.clear();

        backend
            .end_commands(&mut slot.transfer_commands)
            .context("failed to end transfer recording")?;

        if !had_uploads {
            // No submission, so the fence stays signaled and the next
            // begin() on this slot passes straight through.
            return Ok(false);
        }

        backend.reset_fence(&slot.transfer_fence)?;
        backend
            .submit(
                QueueKind::Transfer,
                Some(&slot.transfer_commands),
                &[],
                &[slot.transfer_done.clone()],
                Some(&slot.transfer_fence),
            )
            .context("transfer submission failed")?;
        slot.transfer_submitted = true;
        Ok(true)
    }

    pub fn is_preparing(&self) -> bool {
        self.preparing
    }

    pub fn pending_uploads(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::frame::FrameRing;

    const TIMEOUT: Duration = Duration::from_millis(2000);

    fn vertex_handle(
        buffers: &mut BufferTable<<HeadlessBackend as GpuBackend>::Buffer>,
        size: u64,
    ) -> BufferHandle {
        buffers.insert(BufferEntry {
            gpu: None,
            size,
            usage: BufferUsage::Vertex,
            last_queue: QueueKind::Transfer,
        })
    }

    #[test]
    fn upload_lands_after_gpu_retires() {
        let mut backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(&mut backend, 2).unwrap();
        let mut buffers = BufferTable::new();
        let mut deletion = DeletionQueue::new();
        let mut stage = TransferStage::new();
        let handle = vertex_handle(&mut buffers, 8);
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];

        stage.begin(&mut backend, ring.active_mut(), TIMEOUT).unwrap();
        stage.stage(&mut backend, &mut buffers, handle, &payload).unwrap();
        let submitted = stage
            .end(&mut backend, ring.active_mut(), &buffers, &mut deletion)
            .unwrap();
        assert!(submitted);
        assert!(ring.active().transfer_submitted);

        let gpu = buffers.get(handle).unwrap().gpu.unwrap();
        // Copy has not executed yet.
        assert_ne!(backend.buffer_bytes(&gpu).unwrap(), &payload);
        backend.retire_gpu_work();
        assert_eq!(backend.buffer_bytes(&gpu).unwrap(), &payload);

        ring.destroy(&mut backend);
    }

    #[test]
    fn empty_batch_submits_nothing_and_keeps_fence_signaled() {
        let mut backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(&mut backend, 2).unwrap();
        let buffers: BufferTable<<HeadlessBackend as GpuBackend>::Buffer> = BufferTable::new();
        let mut deletion = DeletionQueue::new();
        let mut stage = TransferStage::new();

        stage.begin(&mut backend, ring.active_mut(), TIMEOUT).unwrap();
        let submitted = stage
            .end(&mut backend, ring.active_mut(), &buffers, &mut deletion)
            .unwrap();
        assert!(!submitted);
        assert!(!ring.active().transfer_submitted);
        assert_eq!(backend.submissions_made(), 0);

        let fence = ring.active().transfer_fence.clone();
        assert!(backend.fence_signaled(&fence).unwrap());

        // A second empty cycle must also pass without blocking.
        stage.begin(&mut backend, ring.active_mut(), TIMEOUT).unwrap();
        stage
            .end(&mut backend, ring.active_mut(), &buffers, &mut deletion)
            .unwrap();
        ring.destroy(&mut backend);
    }

    #[test]
    fn staging_buffers_go_through_deletion_queue() {
        let mut backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(&mut backend, 2).unwrap();
        let mut buffers = BufferTable::new();
        let mut deletion = DeletionQueue::new();
        let mut stage = TransferStage::new();
        let handle = vertex_handle(&mut buffers, 4);

        stage.begin(&mut backend, ring.active_mut(), TIMEOUT).unwrap();
        stage
            .stage(&mut backend, &mut buffers, handle, &[9, 9, 9, 9])
            .unwrap();
        stage
            .end(&mut backend, ring.active_mut(), &buffers, &mut deletion)
            .unwrap();

        // Staging buffer is parked in the queue, not destroyed inline.
        assert_eq!(deletion.pending(), 1);
        let armed = deletion.process(&mut backend).unwrap();
        for (kind, fence) in &armed {
            backend.submit(*kind, None, &[], &[], Some(fence)).unwrap();
        }
        backend.retire_gpu_work();
        deletion.process(&mut backend).unwrap();
        assert_eq!(deletion.pending(), 0);
        // Only the device-local target remains.
        assert_eq!(backend.live_buffers(), 1);
        ring.destroy(&mut backend);
    }

    #[test]
    fn stage_outside_batch_is_rejected() {
        let mut backend = HeadlessBackend::new();
        let mut buffers = BufferTable::new();
        let mut stage: TransferStage<HeadlessBackend> = TransferStage::new();
        let handle = vertex_handle(&mut buffers, 4);
        assert!(stage
            .stage(&mut backend, &mut buffers, handle, &[0; 4])
            .is_err());
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let mut backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(&mut backend, 2).unwrap();
        let mut buffers = BufferTable::new();
        let mut stage = TransferStage::new();
        let handle = vertex_handle(&mut buffers, 4);

        stage.begin(&mut backend, ring.active_mut(), TIMEOUT).unwrap();
        assert!(stage
            .stage(&mut backend, &mut buffers, handle, &[0; 8])
            .is_err());
        ring.destroy(&mut backend);
    }
}
