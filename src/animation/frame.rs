//! Frame payload layout.
//!
//! A decompressed payload is a 1-byte type tag, a little-endian `u32`
//! particle count, then one column per attribute. Columns are borrowed
//! straight out of the payload; nothing is copied until the decoder
//! applies them.

use byteorder::{ByteOrder, LittleEndian};

/// Type tag of a self-contained frame. Any other value is a delta frame.
pub const FRAME_TYPE_INTRA: u8 = 0;
/// Type tag written for delta frames.
pub const FRAME_TYPE_DELTA: u8 = 1;

/// Type tag + particle count.
pub const FRAME_HEADER_SIZE: usize = 5;

/// x,y,z (f32) + r,g,b,a (u8) + size (u16) + tex,seq (u8) + id (u32)
pub const INTRA_BYTES_PER_PARTICLE: usize = 24;

/// dx,dy,dz (i16) + dr,dg,db,da (i8) + dsize (i16) + dtex,dseq (i8) + id (u32)
pub const DELTA_BYTES_PER_PARTICLE: usize = 18;

/// Fixed-point divisor for position deltas.
pub const POSITION_SCALE: f32 = 1000.0;

/// Fixed-point divisor for sizes and size deltas.
pub const SIZE_SCALE: f32 = 100.0;

/// Smallest size a particle can have after decoding.
pub const MIN_PARTICLE_SIZE: f32 = 0.01;

/// Errors raised while interpreting a decompressed payload.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame payload too short for header: {0} bytes")]
    MissingHeader(usize),
    #[error("Frame payload truncated: {count} particles need {expected} bytes, got {actual}")]
    Truncated {
        count: u32,
        expected: usize,
        actual: usize,
    },
}

/// A parsed frame: either absolute attributes or deltas.
#[derive(Debug, Clone, Copy)]
pub enum FramePayload<'a> {
    Intra(IntraFrame<'a>),
    Delta(DeltaFrame<'a>),
}

impl<'a> FramePayload<'a> {
    /// Split a decompressed payload into column views.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::MissingHeader(bytes.len()));
        }
        let tag = bytes[0];
        let count = LittleEndian::read_u32(&bytes[1..5]);
        let body = &bytes[FRAME_HEADER_SIZE..];

        let stride = if tag == FRAME_TYPE_INTRA {
            INTRA_BYTES_PER_PARTICLE
        } else {
            DELTA_BYTES_PER_PARTICLE
        };
        let expected = (count as usize)
            .checked_mul(stride)
            .ok_or(FrameError::Truncated {
                count,
                expected: usize::MAX,
                actual: body.len(),
            })?;
        if body.len() < expected {
            return Err(FrameError::Truncated {
                count,
                expected,
                actual: body.len(),
            });
        }

        let n = count as usize;
        let mut cols = Columns { rest: body };
        if tag == FRAME_TYPE_INTRA {
            Ok(Self::Intra(IntraFrame {
                count: n,
                x: cols.take(n * 4),
                y: cols.take(n * 4),
                z: cols.take(n * 4),
                r: cols.take(n),
                g: cols.take(n),
                b: cols.take(n),
                a: cols.take(n),
                size: cols.take(n * 2),
                tex: cols.take(n),
                seq: cols.take(n),
                ids: cols.take(n * 4),
            }))
        } else {
            Ok(Self::Delta(DeltaFrame {
                count: n,
                dx: cols.take(n * 2),
                dy: cols.take(n * 2),
                dz: cols.take(n * 2),
                dr: cols.take(n),
                dg: cols.take(n),
                db: cols.take(n),
                da: cols.take(n),
                dsize: cols.take(n * 2),
                dtex: cols.take(n),
                dseq: cols.take(n),
                ids: cols.take(n * 4),
            }))
        }
    }

    pub fn particle_count(&self) -> usize {
        match self {
            Self::Intra(f) => f.count,
            Self::Delta(f) => f.count,
        }
    }

    pub fn is_intra(&self) -> bool {
        matches!(self, Self::Intra(_))
    }

    /// Largest particle id in the frame.
    pub fn max_id(&self) -> Option<u32> {
        let (ids, count) = match self {
            Self::Intra(f) => (f.ids, f.count),
            Self::Delta(f) => (f.ids, f.count),
        };
        (0..count).map(|i| LittleEndian::read_u32(&ids[i * 4..])).max()
    }
}

struct Columns<'a> {
    rest: &'a [u8],
}

impl<'a> Columns<'a> {
    // Length is validated before any column is taken.
    fn take(&mut self, len: usize) -> &'a [u8] {
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        head
    }
}

/// Absolute particle attributes.
#[derive(Debug, Clone, Copy)]
pub struct IntraFrame<'a> {
    count: usize,
    x: &'a [u8],
    y: &'a [u8],
    z: &'a [u8],
    r: &'a [u8],
    g: &'a [u8],
    b: &'a [u8],
    a: &'a [u8],
    size: &'a [u8],
    tex: &'a [u8],
    seq: &'a [u8],
    ids: &'a [u8],
}

impl IntraFrame<'_> {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn id(&self, i: usize) -> u32 {
        LittleEndian::read_u32(&self.ids[i * 4..])
    }

    pub fn position(&self, i: usize) -> [f32; 3] {
        [
            LittleEndian::read_f32(&self.x[i * 4..]),
            LittleEndian::read_f32(&self.y[i * 4..]),
            LittleEndian::read_f32(&self.z[i * 4..]),
        ]
    }

    pub fn color(&self, i: usize) -> [u8; 4] {
        [self.r[i], self.g[i], self.b[i], self.a[i]]
    }

    /// Decoded size, clamped to [`MIN_PARTICLE_SIZE`].
    pub fn size(&self, i: usize) -> f32 {
        (f32::from(LittleEndian::read_u16(&self.size[i * 2..])) / SIZE_SCALE).max(MIN_PARTICLE_SIZE)
    }

    pub fn tex(&self, i: usize) -> u8 {
        self.tex[i]
    }

    pub fn seq(&self, i: usize) -> u8 {
        self.seq[i]
    }
}

/// Incremental particle attributes relative to the previous frame.
#[derive(Debug, Clone, Copy)]
pub struct DeltaFrame<'a> {
    count: usize,
    dx: &'a [u8],
    dy: &'a [u8],
    dz: &'a [u8],
    dr: &'a [u8],
    dg: &'a [u8],
    db: &'a [u8],
    da: &'a [u8],
    dsize: &'a [u8],
    dtex: &'a [u8],
    dseq: &'a [u8],
    ids: &'a [u8],
}

impl DeltaFrame<'_> {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn id(&self, i: usize) -> u32 {
        LittleEndian::read_u32(&self.ids[i * 4..])
    }

    pub fn position_delta(&self, i: usize) -> [f32; 3] {
        [
            f32::from(LittleEndian::read_i16(&self.dx[i * 2..])) / POSITION_SCALE,
            f32::from(LittleEndian::read_i16(&self.dy[i * 2..])) / POSITION_SCALE,
            f32::from(LittleEndian::read_i16(&self.dz[i * 2..])) / POSITION_SCALE,
        ]
    }

    pub fn color_delta(&self, i: usize) -> [i8; 4] {
        [
            self.dr[i] as i8,
            self.dg[i] as i8,
            self.db[i] as i8,
            self.da[i] as i8,
        ]
    }

    pub fn size_delta(&self, i: usize) -> f32 {
        f32::from(LittleEndian::read_i16(&self.dsize[i * 2..])) / SIZE_SCALE
    }

    pub fn tex_delta(&self, i: usize) -> i8 {
        self.dtex[i] as i8
    }

    pub fn seq_delta(&self, i: usize) -> i8 {
        self.dseq[i] as i8
    }
}

/// One particle of an intra frame in wire units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntraRecord {
    pub id: u32,
    pub position: [f32; 3],
    pub color: [u8; 4],
    /// Size multiplied by [`SIZE_SCALE`].
    pub size: u16,
    pub tex: u8,
    pub seq: u8,
}

/// One particle of a delta frame in wire units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaRecord {
    pub id: u32,
    /// Position delta multiplied by [`POSITION_SCALE`].
    pub position: [i16; 3],
    pub color: [i8; 4],
    /// Size delta multiplied by [`SIZE_SCALE`].
    pub size: i16,
    pub tex: i8,
    pub seq: i8,
}

/// Encode an intra payload in column order.
pub fn encode_intra(records: &[IntraRecord]) -> Vec<u8> {
    let n = records.len();
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + n * INTRA_BYTES_PER_PARTICLE);
    out.push(FRAME_TYPE_INTRA);
    out.extend_from_slice(&(n as u32).to_le_bytes());
    for axis in 0..3 {
        for r in records {
            out.extend_from_slice(&r.position[axis].to_le_bytes());
        }
    }
    for channel in 0..4 {
        out.extend(records.iter().map(|r| r.color[channel]));
    }
    for r in records {
        out.extend_from_slice(&r.size.to_le_bytes());
    }
    out.extend(records.iter().map(|r| r.tex));
    out.extend(records.iter().map(|r| r.seq));
    for r in records {
        out.extend_from_slice(&r.id.to_le_bytes());
    }
    out
}

/// Encode a delta payload in column order.
pub fn encode_delta(records: &[DeltaRecord]) -> Vec<u8> {
    let n = records.len();
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + n * DELTA_BYTES_PER_PARTICLE);
    out.push(FRAME_TYPE_DELTA);
    out.extend_from_slice(&(n as u32).to_le_bytes());
    for axis in 0..3 {
        for r in records {
            out.extend_from_slice(&r.position[axis].to_le_bytes());
        }
    }
    for channel in 0..4 {
        out.extend(records.iter().map(|r| r.color[channel] as u8));
    }
    for r in records {
        out.extend_from_slice(&r.size.to_le_bytes());
    }
    out.extend(records.iter().map(|r| r.tex as u8));
    out.extend(records.iter().map(|r| r.seq as u8));
    for r in records {
        out.extend_from_slice(&r.id.to_le_bytes());
    }
    out
}
