//! Animation recorder that writes `.nbl` files.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::format::{
    BoundingBox, FrameIndex, NBL_VERSION, NblHeader, TextureEntry, compress_frame,
};
use super::frame::{
    DeltaRecord, IntraRecord, MIN_PARTICLE_SIZE, POSITION_SCALE, SIZE_SCALE, encode_delta,
    encode_intra,
};

/// Configuration for animation recording.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Target playback frame rate.
    pub fps: u16,
    /// Force an intra frame every N frames.
    pub keyframe_interval: u32,
    /// zstd compression level.
    pub compression_level: i32,
    /// Texture table written to the file.
    pub textures: Vec<TextureEntry>,
    /// Attribute flags stored in the header.
    pub attributes: u16,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            keyframe_interval: 60,
            compression_level: 3,
            textures: Vec::new(),
            attributes: 0,
        }
    }
}

/// One particle as observed by the exporter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleSample {
    pub id: u32,
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub size: f32,
    pub tex: u8,
    pub seq: u8,
}

impl ParticleSample {
    pub fn at(id: u32, position: [f32; 3]) -> Self {
        Self {
            id,
            position,
            color: [255; 4],
            size: 1.0,
            tex: 0,
            seq: 0,
        }
    }

    fn zeroed(id: u32) -> Self {
        Self {
            id,
            position: [0.0; 3],
            color: [0; 4],
            size: 0.0,
            tex: 0,
            seq: 0,
        }
    }
}

/// Which kind of frame the recorder emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Intra,
    Delta,
}

/// Summary of a finalized recording.
#[derive(Debug, Clone)]
pub struct RecordingStats {
    pub frame_count: u32,
    pub keyframe_count: u32,
    pub data_bytes: u64,
    pub file_bytes: u64,
}

impl fmt::Display for RecordingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Frames:     {}", self.frame_count)?;
        writeln!(f, "Keyframes:  {}", self.keyframe_count)?;
        writeln!(
            f,
            "Data:       {:.2} KB ({:.1} B/frame)",
            self.data_bytes as f64 / 1024.0,
            self.data_bytes as f64 / self.frame_count.max(1) as f64
        )?;
        write!(f, "File:       {:.2} KB", self.file_bytes as f64 / 1024.0)
    }
}

/// Records particle frames and writes a complete `.nbl` file on finalize.
///
/// The index precedes the payloads in the file, so compressed frames are
/// held in memory until [`AnimationRecorder::finalize`].
///
/// Usage:
/// ```ignore
/// let mut recorder = AnimationRecorder::new("burst.nbl", RecorderConfig::default())?;
/// for frame in frames {
///     recorder.record_frame(&frame)?;
/// }
/// let stats = recorder.finalize()?;
/// ```
pub struct AnimationRecorder {
    writer: BufWriter<File>,
    config: RecorderConfig,
    blobs: Vec<Vec<u8>>,
    keyframes: Vec<u32>,
    /// What the decoder will hold after the last recorded frame.
    reconstructed: HashMap<u32, ParticleSample>,
    bbox: Option<BoundingBox>,
    frames_since_keyframe: u32,
}

impl AnimationRecorder {
    /// Create a recorder writing to `path`.
    pub fn new<P: AsRef<Path>>(path: P, config: RecorderConfig) -> io::Result<Self> {
        if config.fps == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fps must be non-zero",
            ));
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            config,
            blobs: Vec::new(),
            keyframes: Vec::new(),
            reconstructed: HashMap::new(),
            bbox: None,
            frames_since_keyframe: 0,
        })
    }

    /// Number of frames recorded so far.
    pub fn frame_count(&self) -> u32 {
        self.blobs.len() as u32
    }

    /// Record the next frame.
    pub fn record_frame(&mut self, particles: &[ParticleSample]) -> io::Result<FrameKind> {
        let frame = self.frame_count();
        let interval_due = self.frames_since_keyframe >= self.config.keyframe_interval.max(1);

        let (raw, kind, next) = if frame == 0 || interval_due {
            let (raw, next) = self.encode_intra(particles);
            (raw, FrameKind::Intra, next)
        } else {
            match self.encode_delta(particles) {
                Some((raw, next)) => (raw, FrameKind::Delta, next),
                None => {
                    log::debug!("Delta overflow at frame {frame}, writing intra frame");
                    let (raw, next) = self.encode_intra(particles);
                    (raw, FrameKind::Intra, next)
                }
            }
        };

        if kind == FrameKind::Intra {
            self.keyframes.push(frame);
            self.frames_since_keyframe = 1;
        } else {
            self.frames_since_keyframe += 1;
        }

        for sample in next.values() {
            match self.bbox.as_mut() {
                Some(bbox) => bbox.include(sample.position),
                None => self.bbox = Some(BoundingBox::around(sample.position)),
            }
        }
        self.reconstructed = next;
        self.blobs
            .push(compress_frame(&raw, self.config.compression_level)?);
        Ok(kind)
    }

    fn encode_intra(&self, particles: &[ParticleSample]) -> (Vec<u8>, HashMap<u32, ParticleSample>) {
        let mut next = HashMap::with_capacity(particles.len());
        let records: Vec<IntraRecord> = particles
            .iter()
            .map(|p| {
                let size = (p.size * SIZE_SCALE).round().clamp(0.0, f32::from(u16::MAX)) as u16;
                next.insert(
                    p.id,
                    ParticleSample {
                        size: (f32::from(size) / SIZE_SCALE).max(MIN_PARTICLE_SIZE),
                        ..*p
                    },
                );
                IntraRecord {
                    id: p.id,
                    position: p.position,
                    color: p.color,
                    size,
                    tex: p.tex,
                    seq: p.seq,
                }
            })
            .collect();
        (encode_intra(&records), next)
    }

    /// `None` if any delta does not fit its fixed-point range.
    fn encode_delta(
        &self,
        particles: &[ParticleSample],
    ) -> Option<(Vec<u8>, HashMap<u32, ParticleSample>)> {
        let mut next = HashMap::with_capacity(particles.len());
        let mut records = Vec::with_capacity(particles.len());

        for p in particles {
            // Ids missing from the previous frame decode from zero
            let basis = self
                .reconstructed
                .get(&p.id)
                .copied()
                .unwrap_or_else(|| ParticleSample::zeroed(p.id));

            let mut position = [0i16; 3];
            let mut decoded = basis;
            for axis in 0..3 {
                let d = quantize(p.position[axis] - basis.position[axis], POSITION_SCALE)?;
                position[axis] = d;
                decoded.position[axis] = basis.position[axis] + f32::from(d) / POSITION_SCALE;
            }

            let mut color = [0i8; 4];
            for channel in 0..3 {
                color[channel] = p.color[channel].wrapping_sub(basis.color[channel]) as i8;
                decoded.color[channel] = p.color[channel];
            }
            let da = i16::from(p.color[3]) - i16::from(basis.color[3]);
            color[3] = i8::try_from(da).ok()?;
            decoded.color[3] = p.color[3];

            let size = quantize(p.size - basis.size, SIZE_SCALE)?;
            decoded.size = (basis.size + f32::from(size) / SIZE_SCALE).max(MIN_PARTICLE_SIZE);

            let tex = p.tex.wrapping_sub(basis.tex) as i8;
            let seq = p.seq.wrapping_sub(basis.seq) as i8;
            decoded.tex = p.tex;
            decoded.seq = p.seq;

            records.push(DeltaRecord {
                id: p.id,
                position,
                color,
                size,
                tex,
                seq,
            });
            next.insert(p.id, decoded);
        }

        Some((encode_delta(&records), next))
    }

    /// Write header, tables and payloads, then flush.
    pub fn finalize(mut self) -> io::Result<RecordingStats> {
        let frame_count = self.frame_count();
        let texture_count = u16::try_from(self.config.textures.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "too many texture entries")
        })?;

        let header = NblHeader {
            version: NBL_VERSION,
            fps: self.config.fps,
            total_frames: frame_count,
            texture_count,
            attributes: self.config.attributes,
            bbox: self.bbox.unwrap_or_default(),
        };

        let texture_bytes: usize = self.config.textures.iter().map(|t| t.encoded_len()).sum();
        let data_start = (NblHeader::SIZE
            + texture_bytes
            + frame_count as usize * FrameIndex::SIZE
            + 4
            + self.keyframes.len() * 4) as u64;

        header.write_to(&mut self.writer)?;
        for texture in &self.config.textures {
            texture.write_to(&mut self.writer)?;
        }

        let mut offset = data_start;
        for blob in &self.blobs {
            FrameIndex {
                offset,
                size: blob.len() as u32,
            }
            .write_to(&mut self.writer)?;
            offset += blob.len() as u64;
        }

        self.writer
            .write_all(&(self.keyframes.len() as u32).to_le_bytes())?;
        for keyframe in &self.keyframes {
            self.writer.write_all(&keyframe.to_le_bytes())?;
        }

        for blob in &self.blobs {
            self.writer.write_all(blob)?;
        }
        self.writer.flush()?;

        let stats = RecordingStats {
            frame_count,
            keyframe_count: self.keyframes.len() as u32,
            data_bytes: offset - data_start,
            file_bytes: offset,
        };
        log::info!(
            "Recorded {} frames ({} keyframes, {} bytes)",
            stats.frame_count,
            stats.keyframe_count,
            stats.file_bytes
        );
        Ok(stats)
    }
}

fn quantize(delta: f32, scale: f32) -> Option<i16> {
    let q = (delta * scale).round();
    if q >= f32::from(i16::MIN) && q <= f32::from(i16::MAX) {
        Some(q as i16)
    } else {
        None
    }
}
