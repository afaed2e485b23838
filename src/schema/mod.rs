//! Schema module - Configuration types for the animation player.

mod config;

pub use config::*;
