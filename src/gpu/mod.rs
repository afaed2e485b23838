//! GPU side of playback: upload pipeline, backends and atlas cache.

mod backend;
mod host;
mod pipeline;
mod texture;
mod wgpu_backend;

pub use backend::{DrawBatch, FenceWait, GpuBackend};
pub use host::{HostBackend, HostBuffer};
pub use pipeline::{UploadMode, UploadPipeline, UploadStats};
pub use texture::{
    HeadlessUploader, LayerRange, SharedTexture, TextureAtlasMap, TextureCache, TextureError,
    TextureHandle, TextureResource, TextureUploader, UploadedAtlas,
};
pub use wgpu_backend::{DrawCallback, WgpuBackend};

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Failed to create {size} byte buffer: {reason}")]
    BufferCreation { size: u64, reason: String },
}
