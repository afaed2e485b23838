//! Nebula player - streaming playback of pre-baked particle animations.
//!
//! Animations are stored in the `.nbl` format: a fixed header, a texture
//! table, a frame index and zstd-compressed intra/delta frames. Each playing
//! animation gets its own decoder thread that reconstructs particle state and
//! packs it into GPU-ready records, handing finished buffers to the render
//! side through a bounded queue.
//!
//! # Architecture
//!
//! - `animation`: File format, frame payloads, recorder and sequential player
//! - `decode`: Particle state store, frame decoder and seek resolution
//! - `stream`: Buffer pool, frame queue and the decoder thread
//! - `playback`: Time sources, sessions, scheduling and the session manager
//! - `gpu`: Upload pipeline, GPU backends and the texture cache
//! - `schema`: Configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use nebula_player::{
//!     gpu::{HeadlessUploader, HostBackend, TextureCache, UploadPipeline},
//!     playback::{SessionManager, WallClock},
//!     schema::PlayerConfig,
//!     stream::BufferPool,
//! };
//!
//! let config = PlayerConfig::default();
//! let pool = Arc::new(BufferPool::new(config.pool.clone()));
//! let textures = TextureCache::new(Arc::new(HeadlessUploader::new()));
//! let mut pipeline = UploadPipeline::new(HostBackend::new(), &config.upload).unwrap();
//! let mut manager = SessionManager::new(config, Arc::new(WallClock::new()), pool, textures);
//!
//! manager.start_session("explosion.nbl", [0.0, 64.0, 0.0]).unwrap();
//!
//! // Once per host tick
//! let stats = manager.render(&mut pipeline, [0.0, 70.0, 10.0], |_| true).unwrap();
//! println!("{} particles drawn", stats.particles);
//! ```

pub mod animation;
pub mod decode;
pub mod gpu;
pub mod playback;
pub mod schema;
pub mod stream;

#[cfg(test)]
mod fixtures;

// Re-export commonly used types
pub use animation::{AnimationFile, AnimationPlayer, AnimationRecorder};
pub use playback::{PlayerError, SessionId, SessionManager};
pub use schema::PlayerConfig;
