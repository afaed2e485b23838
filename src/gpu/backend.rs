//! Interface to the host's GPU command layer.

use std::time::Duration;

use super::GpuError;
use super::texture::TextureHandle;

/// Outcome of waiting on a completion marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
    Failed,
}

/// Parameters of one particle draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawBatch {
    pub particle_count: u32,
    /// Animation origin relative to the camera.
    pub offset: [f32; 3],
    /// Blend factor between previous and current positions.
    pub interpolation: f32,
    pub texture: Option<TextureHandle>,
}

/// Buffer storage, upload, fence and draw primitives.
///
/// Buffers created with `persistent = true` are written in place with
/// [`GpuBackend::write_persistent`] once the GPU is known to be done with
/// them; the others are refilled with [`GpuBackend::orphan_upload`].
pub trait GpuBackend {
    type Buffer;
    type Fence;

    /// Whether in-place writes to long-lived buffers are available.
    fn supports_persistent_mapping(&self) -> bool;

    fn create_buffer(&mut self, size: u64, persistent: bool) -> Result<Self::Buffer, GpuError>;

    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// Write `data` at offset 0 of a buffer the GPU no longer reads.
    fn write_persistent(&mut self, buffer: &mut Self::Buffer, data: &[u8]);

    /// Discard the buffer's storage and upload `data` into fresh storage.
    fn orphan_upload(&mut self, buffer: &mut Self::Buffer, data: &[u8]);

    fn draw(&mut self, buffer: &Self::Buffer, batch: &DrawBatch);

    /// Marker signalled once every command issued so far has completed.
    fn insert_fence(&mut self) -> Self::Fence;

    fn wait_fence(&mut self, fence: Self::Fence, timeout: Duration) -> FenceWait;
}
