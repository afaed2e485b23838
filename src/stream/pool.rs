//! Recycled byte buffers for decoded frames.

use std::collections::TryReserveError;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::decode::GPU_PARTICLE_SIZE;
use crate::schema::PoolConfig;

/// Buffer allocation failed even after reclaiming the free list.
#[derive(Debug, thiserror::Error)]
#[error("Failed to allocate {bytes} byte frame buffer: {source}")]
pub struct PoolError {
    pub bytes: usize,
    #[source]
    pub source: TryReserveError,
}

/// One decoded frame of packed GPU records.
///
/// A buffer with zero capacity marks end of stream. It never comes from
/// the pool and is never returned to it.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    len: usize,
    frame: u32,
    /// Seek generation of the decoder when this buffer was queued.
    generation: u64,
}

impl FrameBuffer {
    /// The end-of-stream marker.
    pub fn end_of_stream() -> Self {
        Self {
            data: Vec::new(),
            len: 0,
            frame: u32::MAX,
            generation: 0,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.data.capacity() == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Bytes of valid records.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn particle_count(&self) -> usize {
        self.len / GPU_PARTICLE_SIZE
    }

    /// Frame number this buffer was decoded from.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn set_frame(&mut self, frame: u32) {
        self.frame = frame;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

/// Free list of frame buffers shared by every session.
pub struct BufferPool {
    config: PoolConfig,
    free: Mutex<Vec<Vec<u8>>>,
    allocated_bytes: AtomicUsize,
}

impl BufferPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            free: Mutex::new(Vec::new()),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    /// Get a buffer holding exactly `size` bytes of records.
    pub fn acquire(&self, size: usize) -> Result<FrameBuffer, PoolError> {
        {
            let mut free = self.free.lock();
            if let Some(pos) = free.iter().position(|b| b.capacity() >= size) {
                let mut data = free.swap_remove(pos);
                data.resize(size, 0);
                return Ok(FrameBuffer {
                    data,
                    len: size,
                    frame: 0,
                    generation: 0,
                });
            }
        }

        let target = ((size as f64 * self.config.growth_factor) as usize)
            .max(self.config.min_allocation)
            .max(size);
        let data = match allocate(target) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("Frame buffer allocation of {target} bytes failed ({err}), reclaiming pool");
                self.reclaim();
                allocate(target).map_err(|source| PoolError {
                    bytes: target,
                    source,
                })?
            }
        };
        self.allocated_bytes
            .fetch_add(data.capacity(), Ordering::Relaxed);
        log::debug!("Allocated frame buffer: {} bytes", data.capacity());

        let mut data = data;
        data.resize(size, 0);
        Ok(FrameBuffer {
            data,
            len: size,
            frame: 0,
            generation: 0,
        })
    }

    /// Return a buffer. The end-of-stream marker is ignored; oversized
    /// buffers and buffers beyond the free-list bound are dropped.
    pub fn release(&self, buffer: FrameBuffer) {
        if buffer.is_end_of_stream() {
            return;
        }
        let capacity = buffer.capacity();
        if capacity > self.config.max_retained_capacity {
            log::debug!("Dropping oversized frame buffer: {capacity} bytes");
            self.forget(capacity);
            return;
        }

        let mut free = self.free.lock();
        if free.len() >= self.config.max_pooled_buffers {
            drop(free);
            self.forget(capacity);
            return;
        }
        free.push(buffer.data);
    }

    /// Drop every pooled buffer. Returns bytes freed.
    pub fn reclaim(&self) -> usize {
        let drained: Vec<Vec<u8>> = std::mem::take(&mut *self.free.lock());
        let bytes: usize = drained.iter().map(|b| b.capacity()).sum();
        self.forget(bytes);
        bytes
    }

    /// Buffers currently in the free list.
    pub fn pooled_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Bytes held by live and pooled buffers allocated by this pool.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    fn forget(&self, bytes: usize) {
        self.allocated_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

fn allocate(bytes: usize) -> Result<Vec<u8>, TryReserveError> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)?;
    Ok(data)
}
