//! Nebula particle animation files: reading, frame payloads, recording and
//! sequential playback.
//!
//! # File Format
//!
//! The `.nbl` format stores per-frame particle data as zstd-compressed
//! column arrays. All fields are little-endian.
//!
//! ```text
//! Header (48 bytes):
//!   Magic: "NEBULAFX" (8 bytes)
//!   Version: u16
//!   Target FPS: u16
//!   Total frames: u32
//!   Texture count: u16
//!   Attributes: u16
//!   BBox min: 3 x f32
//!   BBox max: 3 x f32
//!   Reserved: 4 bytes
//!
//! Texture table (texture_count entries):
//!   Path length: u16, path: UTF-8, rows: u8, cols: u8
//!
//! Frame index (total_frames * 12 bytes):
//!   Offset: u64
//!   Compressed size: u32
//!
//! Keyframe index:
//!   Count: u32, then count * u32 frame numbers (ascending)
//!
//! Frame data (variable):
//!   zstd stream of [type: u8][count: u32][columns...]
//! ```

mod format;
mod frame;
mod player;
mod recorder;

pub use format::{
    AnimationFile, BoundingBox, FormatError, FrameIndex, NBL_MAGIC, NBL_VERSION, NblHeader,
    TextureEntry, compress_frame, decompress_frame, read_payload,
};
pub use frame::{
    DELTA_BYTES_PER_PARTICLE, DeltaFrame, DeltaRecord, FRAME_TYPE_DELTA, FRAME_TYPE_INTRA,
    FrameError, FramePayload, INTRA_BYTES_PER_PARTICLE, IntraFrame, IntraRecord,
    MIN_PARTICLE_SIZE, POSITION_SCALE, SIZE_SCALE, encode_delta, encode_intra,
};
pub use player::{AnimationPlayer, FrameStep};
pub use recorder::{AnimationRecorder, FrameKind, ParticleSample, RecorderConfig, RecordingStats};
