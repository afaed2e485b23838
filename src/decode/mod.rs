//! Frame decoding: particle state, GPU records and seek resolution.

mod decoder;
mod record;
mod seek;
mod state;

pub use decoder::FrameDecoder;
pub use record::{GPU_PARTICLE_SIZE, GpuParticle, pack_color};
pub use seek::{SeekPlan, SeekResolver};
pub use state::{NEVER_SEEN, ParticleSlot, ParticleStateStore};
