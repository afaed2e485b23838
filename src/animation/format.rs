//! Binary format definitions for Nebula particle animation (`.nbl`) files.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Magic bytes identifying a Nebula animation file.
pub const NBL_MAGIC: &[u8; 8] = b"NEBULAFX";

/// Format version written by the recorder.
pub const NBL_VERSION: u16 = 1;

/// Errors raised while parsing an animation file.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Invalid NBL magic bytes: {0:02X?}")]
    InvalidMagic([u8; 8]),
    #[error("Target frame rate must be non-zero")]
    ZeroFrameRate,
    #[error("Texture path {index} is not valid UTF-8")]
    InvalidTexturePath { index: usize },
    #[error("Keyframe {frame} out of range (total frames {total})")]
    KeyframeOutOfRange { frame: u32, total: u32 },
    #[error("Keyframe index not sorted ascending at position {position}")]
    UnsortedKeyframes { position: usize },
    #[error("{section} needs {needed} bytes but only {available} remain in the file")]
    Truncated {
        section: &'static str,
        needed: u64,
        available: u64,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Axis-aligned bounds of an animation in its local space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    /// Grow the box to contain `point`.
    pub fn include(&mut self, point: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }

    /// A degenerate box around a single point.
    pub fn around(point: [f32; 3]) -> Self {
        Self {
            min: point,
            max: point,
        }
    }
}

/// Fixed 48-byte file header.
#[derive(Debug, Clone, PartialEq)]
pub struct NblHeader {
    /// Format version.
    pub version: u16,
    /// Target playback frame rate.
    pub fps: u16,
    /// Total number of frames.
    pub total_frames: u32,
    /// Number of entries in the texture table.
    pub texture_count: u16,
    /// Attribute flags, reserved for the exporter.
    pub attributes: u16,
    /// Local-space bounds of all particles.
    pub bbox: BoundingBox,
}

impl NblHeader {
    /// Size of header in bytes.
    /// Magic(8) + Version(2) + Fps(2) + Frames(4) + Textures(2) + Attributes(2) +
    /// BBox(24) + Reserved(4) = 48
    pub const SIZE: usize = 48;

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(NBL_MAGIC)?;
        w.write_u16::<LittleEndian>(self.version)?;
        w.write_u16::<LittleEndian>(self.fps)?;
        w.write_u32::<LittleEndian>(self.total_frames)?;
        w.write_u16::<LittleEndian>(self.texture_count)?;
        w.write_u16::<LittleEndian>(self.attributes)?;
        for v in self.bbox.min.iter().chain(self.bbox.max.iter()) {
            w.write_f32::<LittleEndian>(*v)?;
        }
        // Reserved bytes
        w.write_all(&[0u8; 4])?;
        Ok(())
    }

    /// Read header from input.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, FormatError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != NBL_MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }

        let version = r.read_u16::<LittleEndian>()?;
        let fps = r.read_u16::<LittleEndian>()?;
        let total_frames = r.read_u32::<LittleEndian>()?;
        let texture_count = r.read_u16::<LittleEndian>()?;
        let attributes = r.read_u16::<LittleEndian>()?;

        let mut bbox = BoundingBox::default();
        r.read_f32_into::<LittleEndian>(&mut bbox.min)?;
        r.read_f32_into::<LittleEndian>(&mut bbox.max)?;

        // Skip reserved bytes
        let mut reserved = [0u8; 4];
        r.read_exact(&mut reserved)?;

        Ok(Self {
            version,
            fps,
            total_frames,
            texture_count,
            attributes,
            bbox,
        })
    }
}

/// One sprite sheet referenced by the animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureEntry {
    /// Resource path of the sheet image.
    pub path: String,
    /// Sprite-sheet rows.
    pub rows: u8,
    /// Sprite-sheet columns.
    pub cols: u8,
}

impl TextureEntry {
    pub fn new(path: impl Into<String>, rows: u8, cols: u8) -> Self {
        Self {
            path: path.into(),
            rows,
            cols,
        }
    }

    /// Number of atlas layers this sheet occupies.
    pub fn frame_count(&self) -> u32 {
        u32::from(self.rows) * u32::from(self.cols)
    }

    /// Encoded size in the texture table.
    pub fn encoded_len(&self) -> usize {
        2 + self.path.len() + 2
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let bytes = self.path.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "texture path longer than 65535 bytes")
        })?;
        w.write_u16::<LittleEndian>(len)?;
        w.write_all(bytes)?;
        w.write_u8(self.rows)?;
        w.write_u8(self.cols)?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R, index: usize) -> Result<Self, FormatError> {
        let len = r.read_u16::<LittleEndian>()? as usize;
        let mut path = vec![0u8; len];
        r.read_exact(&mut path)?;
        let path = String::from_utf8(path).map_err(|_| FormatError::InvalidTexturePath { index })?;
        let rows = r.read_u8()?;
        let cols = r.read_u8()?;
        Ok(Self { path, rows, cols })
    }
}

/// Index entry for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIndex {
    /// Byte offset from start of file.
    pub offset: u64,
    /// Compressed size in bytes.
    pub size: u32,
}

impl FrameIndex {
    /// Size of one index entry in bytes.
    pub const SIZE: usize = 12;

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.offset)?;
        w.write_u32::<LittleEndian>(self.size)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let offset = r.read_u64::<LittleEndian>()?;
        let size = r.read_u32::<LittleEndian>()?;
        Ok(Self { offset, size })
    }
}

/// Parsed header, texture table, frame index and keyframe index.
///
/// Immutable once loaded; shared between the decoder thread and the session
/// that spawned it.
#[derive(Debug, Clone)]
pub struct AnimationFile {
    header: NblHeader,
    textures: Vec<TextureEntry>,
    frames: Vec<FrameIndex>,
    keyframes: Vec<u32>,
    byte_len: u64,
}

impl AnimationFile {
    /// Open and parse an animation file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    /// Parse everything up to (not including) the frame payloads.
    ///
    /// Index sizes declared in the header are checked against the length of
    /// the stream before anything is allocated for them.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> Result<Self, FormatError> {
        let header = NblHeader::read_from(r)?;
        if header.fps == 0 {
            return Err(FormatError::ZeroFrameRate);
        }

        let textures = (0..header.texture_count as usize)
            .map(|i| TextureEntry::read_from(r, i))
            .collect::<Result<Vec<_>, _>>()?;

        let start = r.stream_position()?;
        let byte_len = r.seek(SeekFrom::End(0))?;
        r.seek(SeekFrom::Start(start))?;
        let mut available = byte_len.saturating_sub(start);

        let needed = u64::from(header.total_frames) * FrameIndex::SIZE as u64 + 4;
        ensure_available("Frame index", needed, available)?;
        available -= needed;

        let mut frames = Vec::with_capacity(header.total_frames as usize);
        for _ in 0..header.total_frames {
            frames.push(FrameIndex::read_from(r)?);
        }

        let keyframe_count = r.read_u32::<LittleEndian>()?;
        ensure_available("Keyframe index", u64::from(keyframe_count) * 4, available)?;
        let mut keyframes = vec![0u32; keyframe_count as usize];
        r.read_u32_into::<LittleEndian>(&mut keyframes)?;

        for (position, &frame) in keyframes.iter().enumerate() {
            if frame >= header.total_frames {
                return Err(FormatError::KeyframeOutOfRange {
                    frame,
                    total: header.total_frames,
                });
            }
            if position > 0 && keyframes[position - 1] >= frame {
                return Err(FormatError::UnsortedKeyframes { position });
            }
        }

        log::info!(
            "Parsed NBL header: fps={}, frames={}, textures={}, keyframes={}",
            header.fps,
            header.total_frames,
            header.texture_count,
            keyframes.len()
        );
        log::debug!(
            "  bbox min={:?} max={:?}",
            header.bbox.min,
            header.bbox.max
        );

        Ok(Self {
            header,
            textures,
            frames,
            keyframes,
            byte_len,
        })
    }

    /// Read only the texture table, without allocating the frame or keyframe
    /// index. Used to load textures before the decoder is created.
    pub fn pre_scan_textures<P: AsRef<Path>>(path: P) -> Result<Vec<TextureEntry>, FormatError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = NblHeader::read_from(&mut reader)?;
        (0..header.texture_count as usize)
            .map(|i| TextureEntry::read_from(&mut reader, i))
            .collect()
    }

    pub fn header(&self) -> &NblHeader {
        &self.header
    }

    pub fn fps(&self) -> u16 {
        self.header.fps
    }

    pub fn total_frames(&self) -> u32 {
        self.header.total_frames
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        f64::from(self.header.total_frames) / f64::from(self.header.fps)
    }

    pub fn bbox(&self) -> BoundingBox {
        self.header.bbox
    }

    pub fn textures(&self) -> &[TextureEntry] {
        &self.textures
    }

    pub fn keyframes(&self) -> &[u32] {
        &self.keyframes
    }

    /// Index entry for `frame`, if it exists.
    pub fn frame_index(&self, frame: u32) -> Option<FrameIndex> {
        self.frames.get(frame as usize).copied()
    }

    /// Length of the file when it was parsed.
    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }
}

fn ensure_available(section: &'static str, needed: u64, available: u64) -> Result<(), FormatError> {
    if needed > available {
        return Err(FormatError::Truncated {
            section,
            needed,
            available,
        });
    }
    Ok(())
}

/// Read a compressed frame payload into `buf`.
///
/// `position` tracks the reader's offset so sequential frames skip the seek.
/// Payloads reaching past `byte_len` are rejected before `buf` grows. On
/// any error `position` is set to `u64::MAX` so the next read seeks.
pub fn read_payload<R: Read + Seek>(
    r: &mut R,
    position: &mut u64,
    index: FrameIndex,
    byte_len: u64,
    buf: &mut Vec<u8>,
) -> io::Result<()> {
    let end = index.offset.saturating_add(u64::from(index.size));
    if end > byte_len {
        *position = u64::MAX;
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "payload at {} ({} bytes) runs past end of file ({byte_len} bytes)",
                index.offset, index.size
            ),
        ));
    }

    let result = (|| -> io::Result<()> {
        if *position != index.offset {
            r.seek(SeekFrom::Start(index.offset))?;
        }
        buf.resize(index.size as usize, 0);
        r.read_exact(buf)
    })();
    *position = match result {
        Ok(()) => end,
        Err(_) => u64::MAX,
    };
    result
}

/// Compress a raw frame payload with zstd.
pub fn compress_frame(data: &[u8], level: i32) -> io::Result<Vec<u8>> {
    zstd::encode_all(data, level)
}

/// Decompress a zstd frame payload into a reusable buffer.
pub fn decompress_frame(data: &[u8], output: &mut Vec<u8>) -> io::Result<()> {
    output.clear();
    zstd::stream::copy_decode(data, output)
}
