//! Per-session particle state, stored as one array per attribute.

/// `last_seen` value of a slot that holds no live particle.
pub const NEVER_SEEN: u32 = u32::MAX;

/// Slots added beyond the largest incoming id when the store grows.
const GROWTH_HEADROOM: usize = 4096;

/// All attributes of one particle slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParticleSlot {
    pub position: [f32; 3],
    pub previous: [f32; 3],
    pub size: f32,
    pub color: [u8; 4],
    pub tex: u8,
    pub seq: u8,
}

/// Structure-of-arrays particle table keyed by dense particle id.
///
/// Capacity only grows. [`ParticleStateStore::reset`] invalidates every slot
/// but keeps the arrays for reuse.
#[derive(Debug, Clone)]
pub struct ParticleStateStore {
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    prev_x: Vec<f32>,
    prev_y: Vec<f32>,
    prev_z: Vec<f32>,
    size: Vec<f32>,
    r: Vec<u8>,
    g: Vec<u8>,
    b: Vec<u8>,
    a: Vec<u8>,
    tex: Vec<u8>,
    seq: Vec<u8>,
    last_seen: Vec<u32>,
}

impl ParticleStateStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            x: vec![0.0; capacity],
            y: vec![0.0; capacity],
            z: vec![0.0; capacity],
            prev_x: vec![0.0; capacity],
            prev_y: vec![0.0; capacity],
            prev_z: vec![0.0; capacity],
            size: vec![0.0; capacity],
            r: vec![0; capacity],
            g: vec![0; capacity],
            b: vec![0; capacity],
            a: vec![0; capacity],
            tex: vec![0; capacity],
            seq: vec![0; capacity],
            last_seen: vec![NEVER_SEEN; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.last_seen.len()
    }

    /// Grow so that `max_id` is addressable.
    pub fn ensure_capacity(&mut self, max_id: u32) {
        let needed = max_id as usize + 1;
        let old = self.capacity();
        if needed <= old {
            return;
        }
        let new_cap = (old * 2).max(max_id as usize + GROWTH_HEADROOM);
        log::warn!("Particle state store growing: {old} -> {new_cap} (max id {max_id})");

        for column in [
            &mut self.x,
            &mut self.y,
            &mut self.z,
            &mut self.prev_x,
            &mut self.prev_y,
            &mut self.prev_z,
            &mut self.size,
        ] {
            column.resize(new_cap, 0.0);
        }
        for column in [
            &mut self.r,
            &mut self.g,
            &mut self.b,
            &mut self.a,
            &mut self.tex,
            &mut self.seq,
        ] {
            column.resize(new_cap, 0);
        }
        self.last_seen.resize(new_cap, NEVER_SEEN);
    }

    /// Invalidate every slot. Arrays are kept.
    pub fn reset(&mut self) {
        self.last_seen.fill(NEVER_SEEN);
    }

    /// Frame a particle was last written in, if ever.
    pub fn last_seen(&self, id: u32) -> Option<u32> {
        match self.last_seen.get(id as usize) {
            Some(&frame) if frame != NEVER_SEEN => Some(frame),
            _ => None,
        }
    }

    /// Basis for a delta applied in `frame`: the stored slot if the particle
    /// was present in the previous frame, `None` if it is spawning.
    ///
    /// `id` must be within capacity.
    pub fn basis(&self, id: u32, frame: u32) -> Option<ParticleSlot> {
        let i = id as usize;
        (frame > 0 && self.last_seen[i] == frame - 1).then(|| self.read(i))
    }

    /// Stored slot of a particle that has been seen since the last reset.
    pub fn slot(&self, id: u32) -> Option<ParticleSlot> {
        self.last_seen(id).map(|_| self.read(id as usize))
    }

    /// Overwrite a slot and mark it seen in `frame`.
    ///
    /// `id` must be within capacity.
    pub fn write(&mut self, id: u32, slot: &ParticleSlot, frame: u32) {
        let i = id as usize;
        [self.x[i], self.y[i], self.z[i]] = slot.position;
        [self.prev_x[i], self.prev_y[i], self.prev_z[i]] = slot.previous;
        self.size[i] = slot.size;
        [self.r[i], self.g[i], self.b[i], self.a[i]] = slot.color;
        self.tex[i] = slot.tex;
        self.seq[i] = slot.seq;
        self.last_seen[i] = frame;
    }

    /// Particles written in exactly `frame`, in id order.
    pub fn live_particles(&self, frame: u32) -> impl Iterator<Item = (u32, ParticleSlot)> + '_ {
        self.last_seen
            .iter()
            .enumerate()
            .filter(move |&(_, &seen)| seen == frame)
            .map(|(i, _)| (i as u32, self.read(i)))
    }

    fn read(&self, i: usize) -> ParticleSlot {
        ParticleSlot {
            position: [self.x[i], self.y[i], self.z[i]],
            previous: [self.prev_x[i], self.prev_y[i], self.prev_z[i]],
            size: self.size[i],
            color: [self.r[i], self.g[i], self.b[i], self.a[i]],
            tex: self.tex[i],
            seq: self.seq[i],
        }
    }
}
