//! Sequential animation player: reads, decompresses and decodes frames on
//! the calling thread. The streamer runs one of these per session.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use super::format::{AnimationFile, decompress_frame, read_payload};
use super::frame::FramePayload;
use crate::decode::{FrameDecoder, GPU_PARTICLE_SIZE, ParticleStateStore, SeekPlan, SeekResolver};
use crate::playback::PlayerError;
use crate::schema::PlayerConfig;
use crate::stream::{BufferPool, FrameBuffer};

/// Result of advancing the player by one frame.
#[derive(Debug)]
pub enum FrameStep {
    /// Decoded into a pooled buffer.
    Emitted(FrameBuffer),
    /// Decoded without output (fast-forward or no pool given).
    Skipped(u32),
    /// Payload was unreadable or corrupt; state was not touched.
    Dropped(u32),
    /// No frames left.
    End,
}

/// Animation player for decoding a recorded file front to back.
///
/// Usage:
/// ```ignore
/// let mut player = AnimationPlayer::open("burst.nbl", &PlayerConfig::default())?;
/// player.play_to(45)?;
/// for (id, slot) in player.state().live_particles(45) {
///     // ...
/// }
/// ```
pub struct AnimationPlayer {
    file: Arc<AnimationFile>,
    reader: BufReader<File>,
    /// Byte offset of `reader`.
    position: u64,
    decoder: FrameDecoder,
    hard_reset_distance: u32,
    max_particle_id: u32,
    /// Next frame to decode.
    current: u32,
    fast_forward_to: Option<u32>,
    compressed: Vec<u8>,
    decompressed: Vec<u8>,
}

impl AnimationPlayer {
    /// Open an animation file for playback.
    pub fn open<P: AsRef<Path>>(path: P, config: &PlayerConfig) -> Result<Self, PlayerError> {
        let file = Arc::new(AnimationFile::open(&path)?);
        let decoder = FrameDecoder::new(config.initial_particle_capacity, config.parallel_threshold);
        Self::with_decoder(path, file, decoder, config)
    }

    /// Build a player over an already parsed file.
    pub fn with_decoder<P: AsRef<Path>>(
        path: P,
        file: Arc<AnimationFile>,
        decoder: FrameDecoder,
        config: &PlayerConfig,
    ) -> Result<Self, PlayerError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(Self {
            file,
            reader,
            position: 0,
            decoder,
            hard_reset_distance: config.hard_reset_distance,
            max_particle_id: config.max_particle_id,
            current: 0,
            fast_forward_to: None,
            compressed: Vec::new(),
            decompressed: Vec::new(),
        })
    }

    pub fn file(&self) -> &AnimationFile {
        &self.file
    }

    /// Next frame number to be decoded.
    pub fn current_frame(&self) -> u32 {
        self.current
    }

    pub fn is_at_end(&self) -> bool {
        self.current >= self.file.total_frames()
    }

    pub fn state(&self) -> &ParticleStateStore {
        self.decoder.state()
    }

    /// Reposition towards `requested`. A hard reset clears particle state;
    /// the caller is responsible for flushing frames it already emitted.
    pub fn seek(&mut self, requested: u32) -> SeekPlan {
        let plan = SeekResolver::new(
            self.file.keyframes(),
            self.file.total_frames(),
            self.hard_reset_distance,
        )
        .resolve(self.current, requested);

        match plan {
            SeekPlan::FastForward { target } => {
                log::debug!("Seek {} -> {target}: fast-forward", self.current);
            }
            SeekPlan::HardReset { keyframe, target } => {
                log::debug!(
                    "Seek {} -> {target}: reset to keyframe {keyframe}",
                    self.current
                );
                self.current = keyframe;
                self.decoder.reset();
            }
        }
        self.fast_forward_to = Some(plan.target());
        plan
    }

    /// Decode the next frame. Output goes to a buffer from `pool` unless
    /// the player is fast-forwarding or `pool` is `None`.
    pub fn advance(&mut self, pool: Option<&BufferPool>) -> Result<FrameStep, PlayerError> {
        let frame = self.current;
        let Some(index) = self.file.frame_index(frame) else {
            return Ok(FrameStep::End);
        };
        self.current += 1;

        let skipping = match self.fast_forward_to {
            Some(target) if frame < target => true,
            _ => {
                self.fast_forward_to = None;
                false
            }
        };

        if let Err(err) = read_payload(
            &mut self.reader,
            &mut self.position,
            index,
            self.file.byte_len(),
            &mut self.compressed,
        ) {
            log::error!("Failed to read frame {frame}: {err}");
            return Ok(FrameStep::Dropped(frame));
        }
        if let Err(err) = decompress_frame(&self.compressed, &mut self.decompressed) {
            log::error!("Failed to decompress frame {frame}: {err}");
            return Ok(FrameStep::Dropped(frame));
        }
        let payload = match FramePayload::parse(&self.decompressed) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("Skipping corrupt frame {frame}: {err}");
                return Ok(FrameStep::Dropped(frame));
            }
        };
        if let Some(id) = payload.max_id().filter(|&id| id >= self.max_particle_id) {
            log::error!(
                "Skipping frame {frame}: particle id {id} exceeds limit {}",
                self.max_particle_id
            );
            return Ok(FrameStep::Dropped(frame));
        }

        match pool {
            Some(pool) if !skipping => {
                let mut buffer = pool.acquire(payload.particle_count() * GPU_PARTICLE_SIZE)?;
                buffer.set_frame(frame);
                self.decoder
                    .decode(&payload, frame, Some(buffer.as_mut_slice()));
                Ok(FrameStep::Emitted(buffer))
            }
            _ => {
                self.decoder.decode(&payload, frame, None);
                Ok(FrameStep::Skipped(frame))
            }
        }
    }

    /// Seek to `target` and decode up to and including it without output.
    pub fn play_to(&mut self, target: u32) -> Result<(), PlayerError> {
        let target = self.seek(target).target();
        while self.current <= target {
            if let FrameStep::End = self.advance(None)? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimationRecorder, ParticleSample, RecorderConfig};
    use crate::fixtures::{churn_file, corrupt_frame, drifting_particle_file, truncate_in_frame};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn config() -> PlayerConfig {
        PlayerConfig {
            initial_particle_capacity: 64,
            ..Default::default()
        }
    }

    fn live(player: &AnimationPlayer, frame: u32) -> Vec<(u32, crate::decode::ParticleSlot)> {
        player.state().live_particles(frame).collect()
    }

    #[test]
    fn test_drift_reaches_030_after_30_frames() {
        let dir = tempdir().unwrap();
        let path = drifting_particle_file(dir.path());

        let mut player = AnimationPlayer::open(&path, &config()).unwrap();
        assert_eq!(player.file().keyframes(), &[0]);
        for _ in 0..=30 {
            player.advance(None).unwrap();
        }
        let slot = player.state().slot(0).unwrap();
        assert!((slot.position[0] - 0.30).abs() < 1e-4, "x = {}", slot.position[0]);
    }

    #[test]
    fn test_seek_45_resets_and_matches_sequential() {
        let dir = tempdir().unwrap();
        let path = drifting_particle_file(dir.path());

        let mut sequential = AnimationPlayer::open(&path, &config()).unwrap();
        for _ in 0..=45 {
            sequential.advance(None).unwrap();
        }

        let mut seeking = AnimationPlayer::open(&path, &config()).unwrap();
        let plan = seeking.seek(45);
        assert_eq!(
            plan,
            SeekPlan::HardReset {
                keyframe: 0,
                target: 45
            }
        );
        while seeking.current_frame() <= 45 {
            seeking.advance(None).unwrap();
        }

        assert_eq!(live(&sequential, 45), live(&seeking, 45));
        assert_eq!(live(&seeking, 45).len(), 1);
    }

    #[test]
    fn test_short_seek_keeps_state() {
        let dir = tempdir().unwrap();
        let path = drifting_particle_file(dir.path());

        let mut player = AnimationPlayer::open(&path, &config()).unwrap();
        for _ in 0..8 {
            player.advance(None).unwrap();
        }
        let before = player.state().slot(0).unwrap();
        assert_eq!(player.state().last_seen(0), Some(7));

        assert_eq!(player.seek(10), SeekPlan::FastForward { target: 10 });
        // Not cleared
        assert_eq!(player.state().slot(0), Some(before));
        assert_eq!(player.current_frame(), 8);

        let pool = BufferPool::default();
        assert!(matches!(player.advance(Some(&pool)).unwrap(), FrameStep::Skipped(8)));
        assert!(matches!(player.advance(Some(&pool)).unwrap(), FrameStep::Skipped(9)));
        match player.advance(Some(&pool)).unwrap() {
            FrameStep::Emitted(buffer) => {
                assert_eq!(buffer.frame(), 10);
                assert_eq!(buffer.particle_count(), 1);
                pool.release(buffer);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_end_of_file() {
        let dir = tempdir().unwrap();
        let path = drifting_particle_file(dir.path());
        let mut player = AnimationPlayer::open(&path, &config()).unwrap();
        player.play_to(59).unwrap();
        assert!(player.is_at_end());
        assert!(matches!(player.advance(None).unwrap(), FrameStep::End));

        // Seeking from the end always resets
        assert!(matches!(player.seek(58), SeekPlan::HardReset { .. }));
    }

    #[test]
    fn test_corrupt_frame_skipped() {
        let dir = tempdir().unwrap();
        let path = drifting_particle_file(dir.path());
        corrupt_frame(&path, 3);

        let mut player = AnimationPlayer::open(&path, &config()).unwrap();
        for _ in 0..3 {
            player.advance(None).unwrap();
        }
        assert!(matches!(player.advance(None).unwrap(), FrameStep::Dropped(3)));
        assert_eq!(player.current_frame(), 4);
        // Frame 4 sees a gap and respawns the particle from zero
        player.advance(None).unwrap();
        let slot = player.state().slot(0).unwrap();
        assert_eq!(slot.previous, slot.position);
    }

    #[test]
    fn test_truncated_payload_dropped() {
        let dir = tempdir().unwrap();
        let path = drifting_particle_file(dir.path());
        truncate_in_frame(&path, 59, 1);

        let mut player = AnimationPlayer::open(&path, &config()).unwrap();
        let pool = BufferPool::default();
        for frame in 0..59 {
            match player.advance(Some(&pool)).unwrap() {
                FrameStep::Emitted(buffer) => {
                    assert_eq!(buffer.frame(), frame);
                    pool.release(buffer);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(matches!(player.advance(Some(&pool)).unwrap(), FrameStep::Dropped(59)));
        assert!(matches!(player.advance(Some(&pool)).unwrap(), FrameStep::End));

        // The failed read leaves nothing stale behind for a later seek
        player.play_to(10).unwrap();
        let slot = player.state().slot(0).unwrap();
        assert!((slot.position[0] - 0.10).abs() < 1e-4, "x = {}", slot.position[0]);
    }

    #[test]
    fn test_particle_id_over_limit_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.nbl");
        let mut recorder = AnimationRecorder::new(&path, RecorderConfig::default()).unwrap();
        recorder
            .record_frame(&[ParticleSample::at(0, [0.0; 3])])
            .unwrap();
        recorder
            .record_frame(&[
                ParticleSample::at(0, [0.1, 0.0, 0.0]),
                ParticleSample::at(3_000_000_000, [1.0, 0.0, 0.0]),
            ])
            .unwrap();
        recorder
            .record_frame(&[ParticleSample::at(0, [0.2, 0.0, 0.0])])
            .unwrap();
        recorder.finalize().unwrap();

        let config = PlayerConfig {
            max_particle_id: 1024,
            ..config()
        };
        let mut player = AnimationPlayer::open(&path, &config).unwrap();
        assert!(matches!(player.advance(None).unwrap(), FrameStep::Skipped(0)));
        assert!(matches!(player.advance(None).unwrap(), FrameStep::Dropped(1)));
        assert!(matches!(player.advance(None).unwrap(), FrameStep::Skipped(2)));
        assert_eq!(player.state().capacity(), 64);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_seek_equivalent_to_sequential(start in 0u32..80, target in 0u32..80) {
            let dir = tempdir().unwrap();
            let path = churn_file(dir.path(), 80, 12);

            let mut sequential = AnimationPlayer::open(&path, &config()).unwrap();
            for _ in 0..=target {
                sequential.advance(None).unwrap();
            }

            let mut seeking = AnimationPlayer::open(&path, &config()).unwrap();
            seeking.play_to(start).unwrap();
            seeking.play_to(target).unwrap();

            prop_assert_eq!(live(&sequential, target), live(&seeking, target));
        }
    }
}
