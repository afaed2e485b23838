//! GPU hand-off record.

use bytemuck::{Pod, Zeroable};

use super::state::ParticleSlot;

/// Size of one packed particle record in bytes.
pub const GPU_PARTICLE_SIZE: usize = 48;

/// One particle as read by the particle shader.
///
/// Three 16-byte groups: previous position + size, current position +
/// packed RGBA, texture layer + padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuParticle {
    pub prev_position: [f32; 3],
    pub size: f32,
    pub position: [f32; 3],
    /// RGBA, red in the low byte.
    pub color: u32,
    pub layer: f32,
    pub _pad: [f32; 3],
}

const _: () = assert!(std::mem::size_of::<GpuParticle>() == GPU_PARTICLE_SIZE);

impl GpuParticle {
    pub fn from_slot(slot: &ParticleSlot, layer: f32) -> Self {
        Self {
            prev_position: slot.previous,
            size: slot.size,
            position: slot.position,
            color: pack_color(slot.color),
            layer,
            _pad: [0.0; 3],
        }
    }

    /// Write into a 48-byte chunk of a frame buffer.
    pub fn write_to(&self, dst: &mut [u8]) {
        dst.copy_from_slice(bytemuck::bytes_of(self));
    }

    /// Read record `index` out of a packed frame.
    pub fn read_at(bytes: &[u8], index: usize) -> Self {
        let start = index * GPU_PARTICLE_SIZE;
        bytemuck::pod_read_unaligned(&bytes[start..start + GPU_PARTICLE_SIZE])
    }
}

/// Pack RGBA bytes into a `u32`, red in the low byte.
pub fn pack_color(color: [u8; 4]) -> u32 {
    u32::from_le_bytes(color)
}
