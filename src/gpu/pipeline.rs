//! Multi-buffered upload of decoded frames.

use std::time::Duration;

use super::GpuError;
use super::backend::{DrawBatch, FenceWait, GpuBackend};
use crate::schema::UploadConfig;

/// How frames reach the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// A ring of persistent buffers, each guarded by a fence.
    Ring,
    /// One buffer whose storage is replaced on every upload.
    Orphan,
}

/// Counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub uploads: u64,
    pub bytes_uploaded: u64,
    pub fence_timeouts: u64,
    pub reallocations: u64,
}

struct UploadSlot<B: GpuBackend> {
    buffer: B::Buffer,
    /// Marks the last draw that read this slot.
    fence: Option<B::Fence>,
}

/// Rotates upload buffers so the CPU can run ahead of the GPU by up to
/// `ring_size - 1` frames without overwriting data still being drawn.
pub struct UploadPipeline<B: GpuBackend> {
    backend: B,
    mode: UploadMode,
    ring_size: usize,
    initial_size: u64,
    fence_timeout: Duration,
    capacity: u64,
    slots: Vec<UploadSlot<B>>,
    next_slot: usize,
    stats: UploadStats,
}

impl<B: GpuBackend> UploadPipeline<B> {
    pub fn new(backend: B, config: &UploadConfig) -> Result<Self, GpuError> {
        let mode = if config.persistent_mapping && backend.supports_persistent_mapping() {
            UploadMode::Ring
        } else {
            UploadMode::Orphan
        };
        let mut pipeline = Self {
            backend,
            mode,
            ring_size: config.ring_size.max(1),
            initial_size: config.initial_buffer_size,
            fence_timeout: Duration::from_millis(config.fence_timeout_ms),
            capacity: 0,
            slots: Vec::new(),
            next_slot: 0,
            stats: UploadStats::default(),
        };
        pipeline.rebuild(config.initial_buffer_size)?;
        log::info!(
            "Upload pipeline ready: {mode:?}, {} x {} bytes",
            pipeline.slots.len(),
            pipeline.capacity
        );
        Ok(pipeline)
    }

    pub fn mode(&self) -> UploadMode {
        self.mode
    }

    /// Size of each upload buffer in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Upload `data` and issue `batch` against it.
    pub fn submit(&mut self, data: &[u8], batch: &DrawBatch) -> Result<(), GpuError> {
        if data.is_empty() {
            return Ok(());
        }
        let needed = data.len() as u64;
        if needed > self.capacity {
            let size = (self.capacity * 2).max(needed);
            log::info!("Upload buffers growing: {} -> {size} bytes", self.capacity);
            self.rebuild(size)?;
            self.stats.reallocations += 1;
        }

        match self.mode {
            UploadMode::Ring => {
                let index = self.next_slot;
                self.next_slot = (index + 1) % self.slots.len();
                let slot = &mut self.slots[index];

                if let Some(fence) = slot.fence.take() {
                    match self.backend.wait_fence(fence, self.fence_timeout) {
                        FenceWait::Signaled => {}
                        FenceWait::TimedOut => {
                            self.stats.fence_timeouts += 1;
                            log::warn!("Upload slot {index} fence timed out, overwriting anyway");
                        }
                        FenceWait::Failed => {
                            log::warn!("Upload slot {index} fence wait failed");
                        }
                    }
                }
                self.backend.write_persistent(&mut slot.buffer, data);
                self.backend.draw(&slot.buffer, batch);
                slot.fence = Some(self.backend.insert_fence());
            }
            UploadMode::Orphan => {
                let slot = &mut self.slots[0];
                self.backend.orphan_upload(&mut slot.buffer, data);
                self.backend.draw(&slot.buffer, batch);
            }
        }

        self.stats.uploads += 1;
        self.stats.bytes_uploaded += needed;
        Ok(())
    }

    /// Return to the initial buffer size if the buffers have grown.
    pub fn shrink(&mut self) -> Result<(), GpuError> {
        if self.capacity > self.initial_size {
            log::info!(
                "Upload buffers shrinking: {} -> {} bytes",
                self.capacity,
                self.initial_size
            );
            self.rebuild(self.initial_size)?;
        }
        Ok(())
    }

    fn rebuild(&mut self, size: u64) -> Result<(), GpuError> {
        self.release_buffers();
        let count = match self.mode {
            UploadMode::Ring => self.ring_size,
            UploadMode::Orphan => 1,
        };
        let persistent = self.mode == UploadMode::Ring;
        for _ in 0..count {
            let buffer = self.backend.create_buffer(size, persistent)?;
            self.slots.push(UploadSlot {
                buffer,
                fence: None,
            });
        }
        self.capacity = size;
        self.next_slot = 0;
        Ok(())
    }

    fn release_buffers(&mut self) {
        for slot in self.slots.drain(..) {
            self.backend.destroy_buffer(slot.buffer);
        }
        self.capacity = 0;
    }
}

impl<B: GpuBackend> Drop for UploadPipeline<B> {
    fn drop(&mut self) {
        self.release_buffers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HostBackend;

    fn batch(n: u32) -> DrawBatch {
        DrawBatch {
            particle_count: n,
            offset: [0.0; 3],
            interpolation: 1.0,
            texture: None,
        }
    }

    fn config(size: u64) -> UploadConfig {
        UploadConfig {
            ring_size: 3,
            initial_buffer_size: size,
            fence_timeout_ms: 10,
            persistent_mapping: true,
        }
    }

    /// Records fence traffic; fences below `signaled_below` are complete.
    #[derive(Default)]
    struct FenceLog {
        next: u64,
        signaled_below: u64,
        waits: Vec<u64>,
        writes: Vec<usize>,
    }

    impl GpuBackend for FenceLog {
        type Buffer = usize;
        type Fence = u64;

        fn supports_persistent_mapping(&self) -> bool {
            true
        }
        fn create_buffer(&mut self, _size: u64, _persistent: bool) -> Result<usize, GpuError> {
            self.next += 1;
            Ok(self.next as usize)
        }
        fn destroy_buffer(&mut self, _buffer: usize) {}
        fn write_persistent(&mut self, buffer: &mut usize, _data: &[u8]) {
            self.writes.push(*buffer);
        }
        fn orphan_upload(&mut self, buffer: &mut usize, _data: &[u8]) {
            self.writes.push(*buffer);
        }
        fn draw(&mut self, _buffer: &usize, _batch: &DrawBatch) {}
        fn insert_fence(&mut self) -> u64 {
            self.next += 1;
            self.next
        }
        fn wait_fence(&mut self, fence: u64, _timeout: Duration) -> FenceWait {
            self.waits.push(fence);
            if fence < self.signaled_below {
                FenceWait::Signaled
            } else {
                FenceWait::TimedOut
            }
        }
    }

    #[test]
    fn test_ring_rotates_and_waits_before_reuse() {
        let mut pipeline = UploadPipeline::new(FenceLog::default(), &config(1024)).unwrap();
        assert_eq!(pipeline.mode(), UploadMode::Ring);

        for _ in 0..3 {
            pipeline.submit(&[0u8; 48], &batch(1)).unwrap();
        }
        // First pass over the ring never waits
        assert!(pipeline.backend().waits.is_empty());
        assert_eq!(pipeline.backend().writes, vec![1, 2, 3]);

        pipeline.backend_mut().signaled_below = u64::MAX;
        pipeline.submit(&[0u8; 48], &batch(1)).unwrap();
        // Slot 0 reused after waiting on the fence from its first draw
        assert_eq!(pipeline.backend().waits, vec![4]);
        assert_eq!(pipeline.backend().writes[3], 1);
        assert_eq!(pipeline.stats().fence_timeouts, 0);
    }

    #[test]
    fn test_fence_timeout_is_not_fatal() {
        let mut pipeline = UploadPipeline::new(FenceLog::default(), &config(1024)).unwrap();
        for _ in 0..5 {
            pipeline.submit(&[0u8; 48], &batch(1)).unwrap();
        }
        assert_eq!(pipeline.stats().fence_timeouts, 2);
        assert_eq!(pipeline.stats().uploads, 5);
    }

    #[test]
    fn test_growth_doubles_or_fits() {
        let mut pipeline = UploadPipeline::new(HostBackend::new(), &config(100)).unwrap();
        pipeline.submit(&[1u8; 150], &batch(3)).unwrap();
        assert_eq!(pipeline.capacity(), 200);

        pipeline.submit(&[1u8; 1000], &batch(20)).unwrap();
        assert_eq!(pipeline.capacity(), 1000);
        assert_eq!(pipeline.stats().reallocations, 2);
        assert_eq!(pipeline.backend().live_buffers(), 3);

        pipeline.shrink().unwrap();
        assert_eq!(pipeline.capacity(), 100);
        assert_eq!(pipeline.backend().live_buffers(), 3);
    }

    #[test]
    fn test_orphan_fallback_uses_single_buffer() {
        let mut cfg = config(256);
        cfg.persistent_mapping = false;
        let mut pipeline = UploadPipeline::new(HostBackend::new(), &cfg).unwrap();
        assert_eq!(pipeline.mode(), UploadMode::Orphan);
        assert_eq!(pipeline.backend().live_buffers(), 1);

        pipeline.submit(&[7u8; 96], &batch(2)).unwrap();
        pipeline.submit(&[9u8; 48], &batch(1)).unwrap();
        assert_eq!(pipeline.backend().draw_calls(), 2);
        assert_eq!(pipeline.backend().particles_drawn(), 3);
        assert_eq!(pipeline.backend().last_upload(), Some(&[9u8; 48][..]));
    }

    #[test]
    fn test_empty_upload_skipped() {
        let mut pipeline = UploadPipeline::new(HostBackend::new(), &config(64)).unwrap();
        pipeline.submit(&[], &batch(0)).unwrap();
        assert_eq!(pipeline.stats().uploads, 0);
        assert_eq!(pipeline.backend().draw_calls(), 0);
    }
}
