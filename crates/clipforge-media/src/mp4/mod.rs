//! ISO-BMFF box primitives.
//!
//! Recording segments are small: initialization segments and `moof` boxes are
//! parsed in memory, where byte offsets double as patch points. Only `mdat`
//! payloads are streamed. [`walk_boxes`] produces [`BoxRegion`]s whose offsets
//! are relative to the buffer walked, so callers can slice child payloads or
//! rewrite fields in place.

mod init;

pub use init::{parse_init_segment, DurationField, Handler, InitSegment, TrackHeader, TrexDefaults};

use std::io::Read;

use crate::error::Mp4Error;

pub(crate) type Result<T> = std::result::Result<T, Mp4Error>;

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const SIDX: Self = Self(*b"sidx");
    pub const PRFT: Self = Self(*b"prft");
    pub const FREE: Self = Self(*b"free");
    pub const SKIP: Self = Self(*b"skip");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const EDTS: Self = Self(*b"edts");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const MVEX: Self = Self(*b"mvex");
    pub const MEHD: Self = Self(*b"mehd");
    pub const TREX: Self = Self(*b"trex");
    pub const UDTA: Self = Self(*b"udta");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MFRA: Self = Self(*b"mfra");
    pub const TFRA: Self = Self(*b"tfra");
    pub const MFRO: Self = Self(*b"mfro");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A box located within an in-memory buffer.
#[derive(Debug, Clone, Copy)]
pub struct BoxRegion {
    /// Box type code.
    pub box_type: BoxType,
    /// Offset of the first header byte.
    pub start: usize,
    /// Header length in bytes (8, or 16 for 64-bit sizes).
    pub header_len: usize,
    /// Offset one past the last payload byte.
    pub end: usize,
}

impl BoxRegion {
    /// Offset of the first payload byte.
    pub fn payload_start(&self) -> usize {
        self.start + self.header_len
    }

    /// Slice the payload out of the buffer this region was parsed from.
    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.payload_start()..self.end]
    }

    /// Total length including the header.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the region is zero-length.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Walk the boxes laid out back to back in `buf[start..end]`.
///
/// Handles 64-bit sizes and a trailing `size == 0` (extends to end) box.
/// Fails when a header is truncated or a box overruns `end`.
pub fn walk_boxes(buf: &[u8], start: usize, end: usize) -> Result<Vec<BoxRegion>> {
    debug_assert!(end <= buf.len());
    let mut regions = Vec::new();
    let mut pos = start;
    while pos < end {
        if end - pos < 8 {
            return Err(Mp4Error::invalid(format!(
                "truncated box header at offset {pos}"
            )));
        }
        let size32 = read_u32(buf, pos);
        let box_type = BoxType::from_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);
        let (size, header_len) = match size32 {
            0 => ((end - pos) as u64, 8),
            1 => {
                if end - pos < 16 {
                    return Err(Mp4Error::invalid(format!(
                        "truncated 64-bit box header at offset {pos}"
                    )));
                }
                (read_u64(buf, pos + 8), 16)
            }
            n => (u64::from(n), 8),
        };
        if size < header_len as u64 || size > (end - pos) as u64 {
            return Err(Mp4Error::invalid(format!(
                "box {box_type} at offset {pos} declares {size} bytes with {} available",
                end - pos
            )));
        }
        regions.push(BoxRegion {
            box_type,
            start: pos,
            header_len,
            end: pos + size as usize,
        });
        pos += size as usize;
    }
    Ok(regions)
}

/// Find the first region of the given type.
pub fn find_box(regions: &[BoxRegion], box_type: BoxType) -> Option<BoxRegion> {
    regions.iter().copied().find(|r| r.box_type == box_type)
}

/// Split a full-box payload into (version, flags, body).
pub fn full_box(payload: &[u8]) -> Result<(u8, u32, &[u8])> {
    if payload.len() < 4 {
        return Err(Mp4Error::invalid("full box shorter than version/flags"));
    }
    let version = payload[0];
    let flags = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]);
    Ok((version, flags, &payload[4..]))
}

/// A top-level box header read from a byte stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamBox {
    /// Box type code.
    pub box_type: BoxType,
    /// Total size including the header.
    pub size: u64,
    /// Header bytes already consumed from the stream (8 or 16).
    pub header_len: u8,
}

impl StreamBox {
    /// Payload bytes still to be consumed after the header.
    pub fn payload_size(&self) -> u64 {
        self.size - u64::from(self.header_len)
    }
}

/// Read the next top-level box header from a stream, or `None` at clean EOF.
///
/// `remaining` is the byte count left in the stream; it bounds `size == 0`
/// (extends-to-EOF) boxes and catches declarations that overrun the file.
pub fn read_stream_box<R: Read>(reader: &mut R, remaining: u64) -> Result<Option<StreamBox>> {
    if remaining == 0 {
        return Ok(None);
    }
    if remaining < 8 {
        return Err(Mp4Error::invalid(
            "trailing bytes too short for a box header",
        ));
    }
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let box_type = BoxType::from_bytes([header[4], header[5], header[6], header[7]]);
    let (size, header_len) = match size32 {
        0 => (remaining, 8u8),
        1 => {
            if remaining < 16 {
                return Err(Mp4Error::invalid("truncated 64-bit box header"));
            }
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext)?;
            (u64::from_be_bytes(ext), 16u8)
        }
        n => (u64::from(n), 8u8),
    };
    if size < u64::from(header_len) || size > remaining {
        return Err(Mp4Error::invalid(format!(
            "box {box_type} declares {size} bytes with {remaining} remaining"
        )));
    }
    Ok(Some(StreamBox {
        box_type,
        size,
        header_len,
    }))
}

/// Read a big-endian u32 at `off`.
pub fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Read a big-endian u64 at `off`.
pub fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(bytes)
}

/// Write a big-endian u32 at `off`.
pub fn write_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

/// Write a big-endian u64 at `off`.
pub fn write_u64(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_be_bytes());
}
