//! Configuration types for animation playback.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Decoded frames buffered between a decoder thread and its consumer.
    pub queue_capacity: usize,
    /// Seeks further ahead than this reset to a keyframe instead of fast-forwarding.
    pub hard_reset_distance: u32,
    /// Scheduler drift (in frames) that triggers a seek.
    pub resync_threshold: u32,
    /// Frames an interactive session may consume per tick.
    pub max_catch_up_frames: u32,
    /// Delta frames with at least this many particles decode in parallel.
    pub parallel_threshold: usize,
    /// Initial particle state capacity per session.
    pub initial_particle_capacity: usize,
    /// Frames referencing a particle id at or above this are dropped.
    pub max_particle_id: u32,
    /// Frame buffer pool settings.
    pub pool: PoolConfig,
    /// GPU upload ring settings.
    pub upload: UploadConfig,
    /// When false, sessions only start while exporting.
    pub render_in_game: bool,
    /// How off-screen sessions are treated.
    pub culling: CullingBehavior,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            hard_reset_distance: 30,
            resync_threshold: 30,
            max_catch_up_frames: 5,
            parallel_threshold: 5000,
            initial_particle_capacity: 65536,
            max_particle_id: 1 << 22,
            pool: PoolConfig::default(),
            upload: UploadConfig::default(),
            render_in_game: true,
            culling: CullingBehavior::default(),
        }
    }
}

/// Frame buffer pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Smallest buffer the pool allocates, in bytes.
    pub min_allocation: usize,
    /// Headroom multiplier applied to requested sizes.
    pub growth_factor: f64,
    /// Buffers larger than this are dropped on release.
    pub max_retained_capacity: usize,
    /// Free-list length bound.
    pub max_pooled_buffers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_allocation: 1024 * 1024,
            growth_factor: 1.2,
            max_retained_capacity: 8 * 1024 * 1024,
            max_pooled_buffers: 32,
        }
    }
}

/// Multi-buffered GPU upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Buffers rotated round-robin.
    pub ring_size: usize,
    /// Initial size of each upload buffer, in bytes.
    pub initial_buffer_size: u64,
    /// Bounded wait on a slot's completion marker.
    pub fence_timeout_ms: u64,
    /// Use the ring when the backend supports it; false forces orphaning.
    pub persistent_mapping: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            ring_size: 3,
            initial_buffer_size: 8 * 1024 * 1024,
            fence_timeout_ms: 1000,
            persistent_mapping: true,
        }
    }
}

/// Behavior of sessions whose bounds are outside the view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CullingBehavior {
    /// Keep consuming frames but skip drawing.
    #[default]
    SimulateOnly,
    /// Skip the session entirely; it resyncs by seeking when visible again.
    PauseAndHide,
}

impl PlayerConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.max_catch_up_frames == 0 {
            return Err(ConfigError::InvalidCatchUp);
        }
        if self.parallel_threshold == 0 {
            return Err(ConfigError::InvalidParallelThreshold);
        }
        if self.max_particle_id == 0 {
            return Err(ConfigError::InvalidParticleLimit);
        }
        if !(self.pool.growth_factor >= 1.0) {
            return Err(ConfigError::InvalidGrowthFactor(self.pool.growth_factor));
        }
        if self.pool.min_allocation > self.pool.max_retained_capacity {
            return Err(ConfigError::InvalidPoolBounds {
                min: self.pool.min_allocation,
                max: self.pool.max_retained_capacity,
            });
        }
        if self.upload.ring_size == 0 {
            return Err(ConfigError::InvalidRingSize);
        }
        if self.upload.initial_buffer_size == 0 {
            return Err(ConfigError::InvalidUploadSize);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Queue capacity must be non-zero")]
    InvalidQueueCapacity,
    #[error("Catch-up frame limit must be non-zero")]
    InvalidCatchUp,
    #[error("Parallel threshold must be non-zero")]
    InvalidParallelThreshold,
    #[error("Particle id limit must be non-zero")]
    InvalidParticleLimit,
    #[error("Pool growth factor must be at least 1.0, got {0}")]
    InvalidGrowthFactor(f64),
    #[error("Pool minimum allocation {min} exceeds maximum retained capacity {max}")]
    InvalidPoolBounds { min: usize, max: usize },
    #[error("Upload ring size must be non-zero")]
    InvalidRingSize,
    #[error("Upload buffer size must be non-zero")]
    InvalidUploadSize,
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.hard_reset_distance, 30);
        assert_eq!(config.pool.max_retained_capacity, 8 * 1024 * 1024);
        assert_eq!(config.upload.ring_size, 3);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: PlayerConfig =
            serde_json::from_str(r#"{"queue_capacity": 4, "culling": "pause_and_hide"}"#).unwrap();
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.culling, CullingBehavior::PauseAndHide);
        assert_eq!(config.max_catch_up_frames, 5);
        assert_eq!(config.pool.min_allocation, 1024 * 1024);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = PlayerConfig::default();
        config.queue_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidQueueCapacity)
        ));

        let mut config = PlayerConfig::default();
        config.max_particle_id = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParticleLimit)
        ));

        let mut config = PlayerConfig::default();
        config.pool.growth_factor = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidGrowthFactor(_))
        ));

        let mut config = PlayerConfig::default();
        config.pool.min_allocation = 16 * 1024 * 1024;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPoolBounds { .. })
        ));
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        let mut config = PlayerConfig::default();
        config.upload.persistent_mapping = false;
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = PlayerConfig::from_json_file(&path).unwrap();
        assert!(!loaded.upload.persistent_mapping);
        assert_eq!(loaded.culling, CullingBehavior::SimulateOnly);
    }
}
