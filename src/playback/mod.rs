//! Consumer side of playback: time sources, sessions and their scheduler.

mod clock;
mod manager;
mod session;

use std::io;

pub use clock::{ExternalClock, TimeSample, TimeSource, WallClock};
pub use manager::{FrameStats, SessionManager};
pub use session::{PlaybackSession, SessionId, SessionState, StopReason, WorldBounds};

use crate::animation::{FormatError, FrameError};
use crate::gpu::{GpuError, TextureError};
use crate::schema::ConfigError;
use crate::stream::PoolError;

/// Error type for opening and playing animations.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Invalid animation file: {0}")]
    Format(#[from] FormatError),

    #[error("Invalid frame payload: {0}")]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Texture error: {0}")]
    Texture(#[from] TextureError),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn decoder thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
