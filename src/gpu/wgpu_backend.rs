//! [`GpuBackend`] on top of a wgpu device.

use std::time::Duration;

use super::GpuError;
use super::backend::{DrawBatch, FenceWait, GpuBackend};

/// Issues the host's particle draw against an uploaded buffer.
pub type DrawCallback = Box<dyn FnMut(&wgpu::Buffer, &DrawBatch) + Send>;

/// Upload buffers live in device memory and are filled through the queue's
/// staging belt. Fences are queue submission indices.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    draw: Option<DrawCallback>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            draw: None,
        }
    }

    /// Create a backend on the first available adapter, without a surface.
    pub async fn headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Nebula particle player"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        log::info!("Using adapter: {}", adapter.get_info().name);
        Ok(Self::new(device, queue))
    }

    /// Install the callback that records the draw for each upload.
    pub fn with_draw_callback(mut self, draw: DrawCallback) -> Self {
        self.draw = Some(draw);
        self
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Fence = wgpu::SubmissionIndex;

    fn supports_persistent_mapping(&self) -> bool {
        true
    }

    fn create_buffer(&mut self, size: u64, _persistent: bool) -> Result<wgpu::Buffer, GpuError> {
        let size = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let limit = self.device.limits().max_buffer_size;
        if size > limit {
            return Err(GpuError::BufferCreation {
                size,
                reason: format!("device limit is {limit} bytes"),
            });
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Upload Buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn destroy_buffer(&mut self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn write_persistent(&mut self, buffer: &mut wgpu::Buffer, data: &[u8]) {
        self.queue.write_buffer(buffer, 0, data);
    }

    fn orphan_upload(&mut self, buffer: &mut wgpu::Buffer, data: &[u8]) {
        // write_buffer already stages into fresh memory per call
        self.queue.write_buffer(buffer, 0, data);
    }

    fn draw(&mut self, buffer: &wgpu::Buffer, batch: &DrawBatch) {
        if let Some(draw) = self.draw.as_mut() {
            draw(buffer, batch);
        }
    }

    fn insert_fence(&mut self) -> wgpu::SubmissionIndex {
        self.queue.submit(std::iter::empty::<wgpu::CommandBuffer>())
    }

    fn wait_fence(&mut self, fence: wgpu::SubmissionIndex, timeout: Duration) -> FenceWait {
        match self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(fence),
            timeout: Some(timeout),
        }) {
            Ok(_) => FenceWait::Signaled,
            Err(wgpu::PollError::Timeout) => FenceWait::TimedOut,
            Err(e) => {
                log::warn!("Fence wait failed: {e}");
                FenceWait::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::UploadPipeline;
    use crate::schema::UploadConfig;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_wgpu_ring_upload() {
        let backend = match pollster::block_on(WgpuBackend::headless()) {
            Ok(b) => b,
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                return;
            }
            Err(e) => panic!("Failed to create GPU backend: {:?}", e),
        };

        let drawn = Arc::new(AtomicU64::new(0));
        let counter = drawn.clone();
        let backend = backend.with_draw_callback(Box::new(move |_, batch| {
            counter.fetch_add(u64::from(batch.particle_count), Ordering::Relaxed);
        }));

        let config = UploadConfig {
            initial_buffer_size: 1024,
            ..UploadConfig::default()
        };
        let mut pipeline = UploadPipeline::new(backend, &config).unwrap();
        let batch = DrawBatch {
            particle_count: 2,
            offset: [0.0; 3],
            interpolation: 1.0,
            texture: None,
        };
        for _ in 0..5 {
            pipeline.submit(&[0u8; 96], &batch).unwrap();
        }
        // Growth path on a real device
        pipeline.submit(&[0u8; 4096], &batch).unwrap();

        assert_eq!(drawn.load(Ordering::Relaxed), 12);
        assert_eq!(pipeline.capacity(), 4096);
        assert_eq!(pipeline.stats().uploads, 6);
    }
}
