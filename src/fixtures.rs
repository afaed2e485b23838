//! Animation files shared by unit tests.

use std::path::{Path, PathBuf};

use crate::animation::{
    AnimationFile, AnimationRecorder, ParticleSample, RecorderConfig, TextureEntry,
};

/// 60 frames at 30 fps, one keyframe at frame 0. Particle 0 starts at the
/// origin and moves +0.01 along x every frame.
pub fn drifting_particle_file(dir: &Path) -> PathBuf {
    let path = dir.join("drift.nbl");
    let config = RecorderConfig {
        fps: 30,
        keyframe_interval: 1000,
        ..Default::default()
    };
    let mut recorder = AnimationRecorder::new(&path, config).unwrap();
    for frame in 0..60 {
        let x = frame as f32 * 0.01;
        recorder
            .record_frame(&[ParticleSample::at(0, [x, 0.0, 0.0])])
            .unwrap();
    }
    recorder.finalize().unwrap();
    path
}

/// Particles that spawn, move, recolor and die at staggered frames, with a
/// keyframe every `keyframe_interval` frames.
pub fn churn_file(dir: &Path, frames: u32, keyframe_interval: u32) -> PathBuf {
    let path = dir.join("churn.nbl");
    let config = RecorderConfig {
        fps: 30,
        keyframe_interval,
        textures: vec![TextureEntry::new("nebula:spark", 2, 2)],
        ..Default::default()
    };
    let mut recorder = AnimationRecorder::new(&path, config).unwrap();
    for frame in 0..frames {
        let particles: Vec<ParticleSample> = (0..24u32)
            .filter(|id| {
                // Each id lives for a window and then disappears
                let birth = id * 3;
                let life = 10 + id % 7;
                frame >= birth % frames && frame < birth % frames + life
            })
            .map(|id| {
                let t = frame as f32;
                ParticleSample {
                    id,
                    position: [
                        id as f32 * 0.5 + t * 0.013,
                        (t * 0.2 + id as f32).sin(),
                        -t * 0.007,
                    ],
                    color: [
                        (frame * 7 + id) as u8,
                        200,
                        (id * 11) as u8,
                        120u32.saturating_sub(frame) as u8,
                    ],
                    size: 0.5 + (id % 4) as f32 * 0.25,
                    tex: (id % 2) as u8,
                    seq: (frame / 2) as u8,
                }
            })
            .collect();
        recorder.record_frame(&particles).unwrap();
    }
    recorder.finalize().unwrap();
    path
}

/// Overwrite the compressed payload of `frame` with garbage.
pub fn corrupt_frame(path: &Path, frame: u32) {
    let index = AnimationFile::open(path).unwrap().frame_index(frame).unwrap();
    let mut bytes = std::fs::read(path).unwrap();
    let start = index.offset as usize;
    bytes[start..start + index.size as usize].fill(0xEE);
    std::fs::write(path, bytes).unwrap();
}

/// Cut the file `keep` bytes into the payload of `frame`.
pub fn truncate_in_frame(path: &Path, frame: u32, keep: u64) {
    let index = AnimationFile::open(path).unwrap().frame_index(frame).unwrap();
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(index.offset + keep).unwrap();
}
