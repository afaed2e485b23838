//! Applies frame payloads to the particle state and packs GPU records.

use std::sync::Arc;

use rayon::prelude::*;

use super::record::{GPU_PARTICLE_SIZE, GpuParticle};
use super::state::{ParticleSlot, ParticleStateStore};
use crate::animation::{DeltaFrame, FramePayload, IntraFrame, MIN_PARTICLE_SIZE};
use crate::gpu::{SharedTexture, TextureAtlasMap};

/// Decodes frames of one session into its private particle state.
///
/// Holds a reference on the session's texture resource for as long as it
/// lives, so layer lookups stay valid.
pub struct FrameDecoder {
    state: ParticleStateStore,
    atlas: Arc<TextureAtlasMap>,
    parallel_threshold: usize,
    /// Scratch for the parallel path: computed slots before scatter.
    updates: Vec<(u32, ParticleSlot)>,
    _texture: Option<SharedTexture>,
}

impl FrameDecoder {
    pub fn new(initial_capacity: usize, parallel_threshold: usize) -> Self {
        Self {
            state: ParticleStateStore::new(initial_capacity),
            atlas: Arc::new(TextureAtlasMap::default()),
            parallel_threshold: parallel_threshold.max(1),
            updates: Vec::new(),
            _texture: None,
        }
    }

    /// Use the layer layout of `texture` and keep it alive.
    pub fn with_texture(mut self, texture: SharedTexture) -> Self {
        self.atlas = Arc::clone(texture.atlas());
        self._texture = Some(texture);
        self
    }

    pub fn state(&self) -> &ParticleStateStore {
        &self.state
    }

    /// Invalidate all particle state (hard reset).
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Apply `payload` as frame number `frame`.
    ///
    /// With `output`, one 48-byte record per particle is written in payload
    /// order; the slice must be exactly `particle_count * 48` bytes. Without
    /// it only the state advances (fast-forward).
    pub fn decode(&mut self, payload: &FramePayload<'_>, frame: u32, output: Option<&mut [u8]>) {
        if let Some(out) = output.as_deref() {
            debug_assert_eq!(out.len(), payload.particle_count() * GPU_PARTICLE_SIZE);
        }
        // Grow once, before any writer touches the arrays
        if let Some(max_id) = payload.max_id() {
            self.state.ensure_capacity(max_id);
        }

        match payload {
            FramePayload::Intra(f) => self.apply_intra(f, frame, output),
            FramePayload::Delta(f) => {
                if output.is_some() && f.len() >= self.parallel_threshold {
                    self.apply_delta_parallel(f, frame, output);
                } else {
                    self.apply_delta_sequential(f, frame, output);
                }
            }
        }
    }

    fn apply_intra(&mut self, f: &IntraFrame<'_>, frame: u32, mut output: Option<&mut [u8]>) {
        for i in 0..f.len() {
            let position = f.position(i);
            let slot = ParticleSlot {
                position,
                // Intra frames carry no motion history
                previous: position,
                size: f.size(i),
                color: f.color(i),
                tex: f.tex(i),
                seq: f.seq(i),
            };
            self.state.write(f.id(i), &slot, frame);
            if let Some(out) = output.as_deref_mut() {
                self.pack(&slot, &mut out[i * GPU_PARTICLE_SIZE..(i + 1) * GPU_PARTICLE_SIZE]);
            }
        }
    }

    fn apply_delta_sequential(
        &mut self,
        f: &DeltaFrame<'_>,
        frame: u32,
        mut output: Option<&mut [u8]>,
    ) {
        for i in 0..f.len() {
            let id = f.id(i);
            let slot = apply_delta(self.state.basis(id, frame), f, i);
            self.state.write(id, &slot, frame);
            if let Some(out) = output.as_deref_mut() {
                self.pack(&slot, &mut out[i * GPU_PARTICLE_SIZE..(i + 1) * GPU_PARTICLE_SIZE]);
            }
        }
    }

    /// Compute every slot from the pre-frame state in parallel, pack the
    /// records in parallel, then scatter into the store.
    fn apply_delta_parallel(&mut self, f: &DeltaFrame<'_>, frame: u32, output: Option<&mut [u8]>) {
        let state = &self.state;
        (0..f.len())
            .into_par_iter()
            .map(|i| {
                let id = f.id(i);
                (id, apply_delta(state.basis(id, frame), f, i))
            })
            .collect_into_vec(&mut self.updates);

        if let Some(out) = output {
            let atlas = &*self.atlas;
            out.par_chunks_mut(GPU_PARTICLE_SIZE)
                .zip(self.updates.par_iter())
                .for_each(|(chunk, (_, slot))| {
                    GpuParticle::from_slot(slot, atlas.layer(slot.tex, slot.seq)).write_to(chunk);
                });
        }

        for (id, slot) in self.updates.drain(..) {
            self.state.write(id, &slot, frame);
        }
    }

    fn pack(&self, slot: &ParticleSlot, chunk: &mut [u8]) {
        GpuParticle::from_slot(slot, self.atlas.layer(slot.tex, slot.seq)).write_to(chunk);
    }
}

/// Add delta `i` to `basis`; `None` means the particle spawns from zero.
fn apply_delta(basis: Option<ParticleSlot>, f: &DeltaFrame<'_>, i: usize) -> ParticleSlot {
    let spawned = basis.is_none();
    let base = basis.unwrap_or_default();

    let d = f.position_delta(i);
    let position = [
        base.position[0] + d[0],
        base.position[1] + d[1],
        base.position[2] + d[2],
    ];

    let dc = f.color_delta(i);
    let alpha = (i16::from(base.color[3]) + i16::from(dc[3])).clamp(0, 255) as u8;
    let color = [
        base.color[0].wrapping_add_signed(dc[0]),
        base.color[1].wrapping_add_signed(dc[1]),
        base.color[2].wrapping_add_signed(dc[2]),
        alpha,
    ];

    ParticleSlot {
        position,
        // A spawn has no meaningful previous position
        previous: if spawned { position } else { base.position },
        size: (base.size + f.size_delta(i)).max(MIN_PARTICLE_SIZE),
        color,
        tex: base.tex.wrapping_add_signed(f.tex_delta(i)),
        seq: base.seq.wrapping_add_signed(f.seq_delta(i)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{DeltaRecord, IntraRecord, TextureEntry, encode_delta, encode_intra};
    use crate::gpu::{HeadlessUploader, TextureCache};

    fn intra(records: &[IntraRecord]) -> Vec<u8> {
        encode_intra(records)
    }

    fn delta(records: &[DeltaRecord]) -> Vec<u8> {
        encode_delta(records)
    }

    fn decode(dec: &mut FrameDecoder, bytes: &[u8], frame: u32) -> Vec<u8> {
        let payload = FramePayload::parse(bytes).unwrap();
        let mut out = vec![0u8; payload.particle_count() * GPU_PARTICLE_SIZE];
        dec.decode(&payload, frame, Some(&mut out));
        out
    }

    fn move_x(id: u32, dx: i16) -> DeltaRecord {
        DeltaRecord {
            id,
            position: [dx, 0, 0],
            ..Default::default()
        }
    }

    #[test]
    fn test_intra_overwrites_and_snaps() {
        let mut dec = FrameDecoder::new(16, 5000);
        let bytes = intra(&[IntraRecord {
            id: 2,
            position: [1.0, 2.0, 3.0],
            color: [9, 8, 7, 6],
            size: 50,
            tex: 0,
            seq: 0,
        }]);
        let out = decode(&mut dec, &bytes, 0);

        let slot = dec.state().slot(2).unwrap();
        assert_eq!(slot.position, [1.0, 2.0, 3.0]);
        assert_eq!(slot.previous, slot.position);
        assert!((slot.size - 0.5).abs() < 1e-6);

        let record = GpuParticle::read_at(&out, 0);
        assert_eq!(record.prev_position, record.position);
        assert_eq!(record.color, u32::from_le_bytes([9, 8, 7, 6]));
    }

    #[test]
    fn test_spawn_has_previous_equal_current() {
        let mut dec = FrameDecoder::new(16, 5000);
        decode(&mut dec, &delta(&[move_x(1, 10)]), 0);
        let slot = dec.state().slot(1).unwrap();
        assert!((slot.position[0] - 0.010).abs() < 1e-6);
        assert_eq!(slot.previous, slot.position);

        // Continuing particle keeps its pre-delta position
        decode(&mut dec, &delta(&[move_x(1, 10)]), 1);
        let slot = dec.state().slot(1).unwrap();
        assert!((slot.previous[0] - 0.010).abs() < 1e-6);
        assert!((slot.position[0] - 0.020).abs() < 1e-6);
    }

    #[test]
    fn test_gap_respawns_from_zero() {
        let mut dec = FrameDecoder::new(16, 5000);
        decode(&mut dec, &delta(&[move_x(3, 500)]), 0);
        decode(&mut dec, &delta(&[move_x(3, 500)]), 1);
        // Absent in frame 2, back in frame 3: zero basis again
        decode(&mut dec, &delta(&[]), 2);
        decode(&mut dec, &delta(&[move_x(3, 500)]), 3);

        let slot = dec.state().slot(3).unwrap();
        assert!((slot.position[0] - 0.5).abs() < 1e-6);
        assert_eq!(slot.previous, slot.position);
    }

    #[test]
    fn test_color_wraps_and_alpha_clamps() {
        let mut dec = FrameDecoder::new(4, 5000);
        decode(
            &mut dec,
            &intra(&[IntraRecord {
                id: 0,
                color: [250, 5, 128, 250],
                size: 100,
                tex: 255,
                ..Default::default()
            }]),
            0,
        );
        decode(
            &mut dec,
            &delta(&[DeltaRecord {
                id: 0,
                color: [10, -10, 0, 20],
                size: -500,
                tex: 2,
                ..Default::default()
            }]),
            1,
        );
        let slot = dec.state().slot(0).unwrap();
        assert_eq!(slot.color, [4, 251, 128, 255]);
        assert_eq!(slot.tex, 1);
        assert_eq!(slot.size, MIN_PARTICLE_SIZE);

        decode(
            &mut dec,
            &delta(&[DeltaRecord {
                id: 0,
                color: [0, 0, 0, -128],
                ..Default::default()
            }]),
            2,
        );
        decode(
            &mut dec,
            &delta(&[DeltaRecord {
                id: 0,
                color: [0, 0, 0, -128],
                ..Default::default()
            }]),
            3,
        );
        assert_eq!(dec.state().slot(0).unwrap().color[3], 0);
    }

    #[test]
    fn test_store_grows_for_large_ids() {
        let mut dec = FrameDecoder::new(8, 5000);
        decode(&mut dec, &delta(&[move_x(100_000, 1)]), 0);
        assert!(dec.state().capacity() > 100_000);
        assert!(dec.state().slot(100_000).is_some());
    }

    #[test]
    fn test_fast_forward_advances_state_without_output() {
        let mut dec = FrameDecoder::new(8, 1);
        let bytes = delta(&[move_x(0, 10)]);
        for frame in 0..3 {
            let payload = FramePayload::parse(&bytes).unwrap();
            dec.decode(&payload, frame, None);
        }
        assert!((dec.state().slot(0).unwrap().position[0] - 0.03).abs() < 1e-6);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let n = 2000u32;
        let spawn: Vec<DeltaRecord> = (0..n)
            .map(|id| DeltaRecord {
                id,
                position: [id as i16, -(id as i16), 7],
                color: [id as i8, 1, 2, 100],
                size: 100,
                tex: 0,
                seq: (id % 5) as i8,
            })
            .collect();
        // Second frame moves even ids only, and spawns a new block of ids
        let step: Vec<DeltaRecord> = (0..n)
            .filter(|id| id % 2 == 0)
            .chain(n..n + 100)
            .map(|id| DeltaRecord {
                id,
                position: [3, 3, -3],
                color: [1, 1, 1, -1],
                size: 1,
                tex: 0,
                seq: 1,
            })
            .collect();

        let cache = TextureCache::new(Arc::new(HeadlessUploader::new()));
        let texture = cache
            .acquire("bench.nbl", &[TextureEntry::new("sheet", 2, 3)])
            .unwrap();

        let mut seq = FrameDecoder::new(16, usize::MAX).with_texture(texture.clone());
        let mut par = FrameDecoder::new(16, 1).with_texture(texture);

        for (frame, records) in [&spawn, &step].into_iter().enumerate() {
            let bytes = delta(records);
            let a = decode(&mut seq, &bytes, frame as u32);
            let b = decode(&mut par, &bytes, frame as u32);
            assert_eq!(a, b);
        }
        assert!(
            seq.state()
                .live_particles(1)
                .eq(par.state().live_particles(1))
        );
    }

    #[test]
    fn test_texture_layer_in_record() {
        let cache = TextureCache::new(Arc::new(HeadlessUploader::new()));
        let texture = cache
            .acquire(
                "layers.nbl",
                &[TextureEntry::new("a", 1, 2), TextureEntry::new("b", 2, 2)],
            )
            .unwrap();
        let mut dec = FrameDecoder::new(4, 5000).with_texture(texture);
        let out = decode(
            &mut dec,
            &intra(&[IntraRecord {
                id: 0,
                tex: 1,
                seq: 6,
                ..Default::default()
            }]),
            0,
        );
        // Entry 1 starts at layer 2, 6 % 4 = 2
        assert_eq!(GpuParticle::read_at(&out, 0).layer, 4.0);
        drop(dec);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_intra_reencode_reproduces_record() {
        let record = IntraRecord {
            id: 5,
            position: [0.25, -3.5, 12.0],
            color: [1, 2, 3, 4],
            size: 275,
            tex: 0,
            seq: 0,
        };
        let mut dec = FrameDecoder::new(8, 5000);
        let first = decode(&mut dec, &intra(&[record]), 0);

        // Re-encode the visible state as a fresh intra frame
        let slot = dec.state().slot(5).unwrap();
        let again = IntraRecord {
            id: 5,
            position: slot.position,
            color: slot.color,
            size: (slot.size * 100.0).round() as u16,
            tex: slot.tex,
            seq: slot.seq,
        };
        let mut other = FrameDecoder::new(8, 5000);
        let second = decode(&mut other, &intra(&[again]), 0);
        assert_eq!(first, second);
    }
}
