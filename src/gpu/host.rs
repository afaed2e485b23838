//! CPU-side backend for headless playback and tests.

use std::time::Duration;

use super::GpuError;
use super::backend::{DrawBatch, FenceWait, GpuBackend};

/// Buffer held in host memory.
#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    capacity: u64,
    data: Vec<u8>,
}

impl HostBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes of the most recent upload.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

/// Executes nothing; records what would have been drawn.
#[derive(Debug)]
pub struct HostBackend {
    persistent_mapping: bool,
    next_id: u64,
    created: u64,
    destroyed: u64,
    draw_calls: u64,
    particles_drawn: u64,
    last_batch: Option<DrawBatch>,
    last_upload: Vec<u8>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self {
            persistent_mapping: true,
            next_id: 0,
            created: 0,
            destroyed: 0,
            draw_calls: 0,
            particles_drawn: 0,
            last_batch: None,
            last_upload: Vec::new(),
        }
    }

    pub fn with_persistent_mapping(mut self, supported: bool) -> Self {
        self.persistent_mapping = supported;
        self
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls
    }

    pub fn particles_drawn(&self) -> u64 {
        self.particles_drawn
    }

    pub fn last_batch(&self) -> Option<&DrawBatch> {
        self.last_batch.as_ref()
    }

    /// Contents of the buffer bound by the most recent draw.
    pub fn last_upload(&self) -> Option<&[u8]> {
        self.last_batch.map(|_| self.last_upload.as_slice())
    }

    pub fn live_buffers(&self) -> usize {
        (self.created - self.destroyed) as usize
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for HostBackend {
    type Buffer = HostBuffer;
    type Fence = ();

    fn supports_persistent_mapping(&self) -> bool {
        self.persistent_mapping
    }

    fn create_buffer(&mut self, size: u64, _persistent: bool) -> Result<HostBuffer, GpuError> {
        if usize::try_from(size).is_err() {
            return Err(GpuError::BufferCreation {
                size,
                reason: "exceeds address space".to_string(),
            });
        }
        self.next_id += 1;
        self.created += 1;
        Ok(HostBuffer {
            id: self.next_id,
            capacity: size,
            data: Vec::new(),
        })
    }

    fn destroy_buffer(&mut self, buffer: HostBuffer) {
        log::trace!("Destroying host buffer {}", buffer.id);
        self.destroyed += 1;
    }

    fn write_persistent(&mut self, buffer: &mut HostBuffer, data: &[u8]) {
        buffer.data.clear();
        buffer.data.extend_from_slice(data);
    }

    fn orphan_upload(&mut self, buffer: &mut HostBuffer, data: &[u8]) {
        buffer.data = data.to_vec();
    }

    fn draw(&mut self, buffer: &HostBuffer, batch: &DrawBatch) {
        self.draw_calls += 1;
        self.particles_drawn += u64::from(batch.particle_count);
        self.last_batch = Some(*batch);
        self.last_upload.clear();
        self.last_upload.extend_from_slice(&buffer.data);
    }

    fn insert_fence(&mut self) {}

    fn wait_fence(&mut self, _fence: (), _timeout: Duration) -> FenceWait {
        FenceWait::Signaled
    }
}
