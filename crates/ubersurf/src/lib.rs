//! UBERSURF: a single flat raster covering a whole terrain dataset for one
//! coverage channel, padded so it subdivides evenly into terrain cells.
//!
//! File layout (little-endian):
//!   00  : u32     magic = 0xA3D3E3C3
//!   04  : u32     width  (samples)
//!   08  : u32     height (samples)
//!   0C  : u32     reserved (written as 0, ignored on read)
//!   10  : f32[width * height] samples, row-major, uncompressed
//!
//! The header is always encoded/decoded field by field. The payload begins
//! immediately after the header, so every row starts on a 4-byte boundary
//! of a page-aligned mapping.

use std::borrow::Cow;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use memmap2::{Mmap, MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};

pub const UBER_MAGIC: u32 = 0xa3d3_e3c3;
pub const HEADER_LEN: usize = 16;
pub const SAMPLE_LEN: usize = std::mem::size_of::<f32>();

/// Width and height of a raster, in samples.
///
/// `(0, 0)` is what a failed probe reports; anything with a zero side is
/// treated as "no raster".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RasterExtent {
    pub width: u32,
    pub height: u32,
}

impl RasterExtent {
    pub const EMPTY: Self = Self::new(0, 0);

    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.area() == 0
    }

    /// Rounds each side up to the next multiple of `step`. Sides that are
    /// already a multiple are left alone. Returns `None` on `u32` overflow.
    pub fn round_up_to(self, step: u32) -> Option<Self> {
        debug_assert!(step > 0);

        let round = |v: u32| match v % step {
            0 => Some(v),
            rem => v.checked_add(step - rem),
        };

        Some(Self::new(round(self.width)?, round(self.height)?))
    }

    #[inline]
    pub fn is_multiple_of(self, step: u32) -> bool {
        step != 0 && self.width % step == 0 && self.height % step == 0
    }

    /// Integer division of both sides.
    #[inline]
    pub fn divide_by(self, step: u32) -> Self {
        Self::new(self.width / step, self.height / step)
    }
}

impl fmt::Display for RasterExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The fixed record at the start of every uber-surface file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UberHeader {
    pub width: u32,
    pub height: u32,
    pub reserved: u32,
}

impl UberHeader {
    #[inline]
    pub fn new(extent: RasterExtent) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
            reserved: 0,
        }
    }

    #[inline]
    pub fn extent(&self) -> RasterExtent {
        RasterExtent::new(self.width, self.height)
    }

    /// Byte length of the sample payload, or `None` if it does not fit in `usize`.
    pub fn payload_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(SAMPLE_LEN)
    }

    #[inline]
    pub fn row_len(&self) -> usize {
        self.width as usize * SAMPLE_LEN
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&UBER_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.width.to_le_bytes());
        out[8..12].copy_from_slice(&self.height.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated uber surface"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parse the header from the start of a byte slice. Trailing bytes are ignored.
pub fn parse_header(mut p: &[u8]) -> io::Result<UberHeader> {
    if le_u32(&mut p)? != UBER_MAGIC {
        return Err(bad("bad uber surface magic"));
    }

    Ok(UberHeader {
        width: le_u32(&mut p)?,
        height: le_u32(&mut p)?,
        reserved: le_u32(&mut p)?,
    })
}

/// Reads only the header of an uber-surface file and returns its dimensions.
///
/// The payload length is not checked against the header.
pub fn read_extent<P: AsRef<Path>>(path: P) -> io::Result<RasterExtent> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; HEADER_LEN];
    file.read_exact(&mut buf)?;
    Ok(parse_header(&buf)?.extent())
}

/// Identifies the data channel an uber-surface carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageId(pub u32);

impl CoverageId {
    pub const HEIGHTS: Self = Self(1);
    pub const ANGLE_BASED_SHADOWS: Self = Self(2);

    /// File name of this channel's uber-surface inside a dataset directory.
    pub fn file_name(self) -> String {
        match self {
            Self::HEIGHTS => "ubersurface.dat".to_owned(),
            Self::ANGLE_BASED_SHADOWS => "ubershadowingsurface.dat".to_owned(),
            Self(id) => format!("ubersurface_{:08x}.dat", id),
        }
    }
}

impl fmt::Display for CoverageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::HEIGHTS => f.write_str("heights"),
            Self::ANGLE_BASED_SHADOWS => f.write_str("shadows"),
            Self(id) => write!(f, "0x{:08x}", id),
        }
    }
}

impl FromStr for CoverageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.eq_ignore_ascii_case("heights") {
            return Ok(Self::HEIGHTS);
        }
        if s.eq_ignore_ascii_case("shadows") {
            return Ok(Self::ANGLE_BASED_SHADOWS);
        }

        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse::<u32>(),
        };

        parsed
            .map(Self)
            .map_err(|_| format!("unknown coverage channel '{}'", s))
    }
}

/// Deterministic location of a channel's uber-surface inside `dir`.
pub fn uber_surface_path<P: AsRef<Path>>(dir: P, id: CoverageId) -> PathBuf {
    dir.as_ref().join(id.file_name())
}

/// Writable, memory-mapped uber-surface. The header is written on creation.
pub struct UberSurfaceMut {
    header: UberHeader,
    map: MmapMut,
}

impl UberSurfaceMut {
    /// Creates (or reuses) the file at `path`, sizes it to exactly
    /// header + payload and maps it for writing.
    ///
    /// Existing contents are not cleared; callers are expected to write every
    /// sample.
    pub fn create<P: AsRef<Path>>(path: P, extent: RasterExtent) -> io::Result<Self> {
        let header = UberHeader::new(extent);
        let total = header
            .payload_len()
            .and_then(|len| len.checked_add(HEADER_LEN))
            .ok_or_else(|| bad("uber surface size overflow"))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(total as u64)?;

        // Safety: the file was just sized by us and stays exclusively owned
        // by this builder until the map is dropped.
        let mut map = unsafe { MmapOptions::new().len(total).map_mut(&file)? };
        map[..HEADER_LEN].copy_from_slice(&header.encode());

        Ok(Self { header, map })
    }

    #[inline]
    pub fn extent(&self) -> RasterExtent {
        self.header.extent()
    }

    /// The whole sample payload as raw little-endian bytes.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.map[HEADER_LEN..]
    }

    /// Raw bytes of row `y`. Panics if `y` is outside the surface.
    pub fn row_bytes_mut(&mut self, y: u32) -> &mut [u8] {
        assert!(y < self.header.height, "row {} out of range", y);
        let row_len = self.header.row_len();
        let start = y as usize * row_len;
        &mut self.payload_mut()[start..start + row_len]
    }

    /// Writes `samples` at the start of row `y`.
    pub fn write_row(&mut self, y: u32, samples: &[f32]) {
        let row = self.row_bytes_mut(y);
        let dst = &mut row[..samples.len() * SAMPLE_LEN];

        #[cfg(target_endian = "little")]
        {
            dst.copy_from_slice(bytemuck::cast_slice(samples));
        }

        #[cfg(not(target_endian = "little"))]
        {
            for (out, v) in dst.chunks_exact_mut(SAMPLE_LEN).zip(samples) {
                out.copy_from_slice(&v.to_le_bytes());
            }
        }
    }

    pub fn fill_zero(&mut self) {
        self.payload_mut().fill(0);
    }

    /// Flushes outstanding writes and releases the mapping.
    pub fn flush(self) -> io::Result<()> {
        self.map.flush()
    }
}

/// Creates an uber-surface whose every sample is `0.0`.
pub fn write_zeroed<P: AsRef<Path>>(path: P, extent: RasterExtent) -> io::Result<()> {
    let mut surface = UberSurfaceMut::create(path, extent)?;
    surface.fill_zero();
    surface.flush()
}

/// Read-only, memory-mapped uber-surface.
pub struct UberSurface {
    header: UberHeader,
    map: Mmap,
}

impl UberSurface {
    /// Maps the file and validates the header and payload length.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        // Safety: readers only open files whose build has completed.
        let map = unsafe { MmapOptions::new().map(&file)? };

        let header = parse_header(&map)?;
        let payload = header
            .payload_len()
            .ok_or_else(|| bad("uber surface size overflow"))?;
        need(&map[HEADER_LEN..], payload)?;

        Ok(Self { header, map })
    }

    #[inline]
    pub fn extent(&self) -> RasterExtent {
        self.header.extent()
    }

    #[inline]
    pub fn header(&self) -> UberHeader {
        self.header
    }

    /// Samples of row `y`, borrowed straight from the mapping where possible.
    pub fn row(&self, y: u32) -> Option<Cow<'_, [f32]>> {
        if y >= self.header.height {
            return None;
        }

        let row_len = self.header.row_len();
        let start = HEADER_LEN + y as usize * row_len;
        let raw = &self.map[start..start + row_len];

        #[cfg(target_endian = "little")]
        {
            if let Ok(samples) = bytemuck::try_cast_slice::<u8, f32>(raw) {
                return Some(Cow::Borrowed(samples));
            }
        }

        Some(Cow::Owned(
            raw.chunks_exact(SAMPLE_LEN)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ))
    }

    pub fn sample(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.header.width || y >= self.header.height {
            return None;
        }

        let at = HEADER_LEN + (y as usize * self.header.width as usize + x as usize) * SAMPLE_LEN;
        let b = &self.map[at..at + SAMPLE_LEN];
        Some(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
