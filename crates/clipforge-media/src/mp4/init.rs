//! Initialization-segment parsing.
//!
//! An initialization segment carries `ftyp` plus a `moov` whose sample tables
//! are empty and whose `mvex` declares per-track fragment defaults. Besides
//! decoding the fields assembly needs, the parser records the byte regions and
//! field offsets required to splice tracks into a merged movie header and to
//! back-patch durations once the fragment pass has summed them.

use super::{find_box, full_box, read_u32, walk_boxes, BoxRegion, BoxType, Result};
use crate::error::Mp4Error;

/// Sample-entry codes the assembler will carry without re-encoding.
///
/// Encrypted variants (`encv`, `enca`) are deliberately absent; their
/// auxiliary-data offsets would be invalidated by rebasing.
const SUPPORTED_SAMPLE_ENTRIES: &[[u8; 4]] = &[
    *b"avc1", *b"avc3", *b"hvc1", *b"hev1", *b"av01", *b"vp09", *b"mp4a", *b"Opus", *b"fLaC",
    *b"ac-3", *b"ec-3",
];

/// Whether a sample-entry code names a codec the assembler can carry.
pub fn is_supported_sample_entry(fourcc: &[u8; 4]) -> bool {
    SUPPORTED_SAMPLE_ENTRIES.contains(fourcc)
}

/// A duration field to be back-patched after the fragment pass.
#[derive(Debug, Clone, Copy)]
pub struct DurationField {
    /// Absolute byte offset of the field in the buffer it was parsed from.
    pub offset: usize,
    /// Full-box version; 0 stores the duration as u32, 1 as u64.
    pub version: u8,
}

/// Track handler kind from `hdlr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Video,
    Audio,
    Other([u8; 4]),
}

impl Handler {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            _ => Self::Other(bytes),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// Header data extracted from one `trak` box.
///
/// Offsets are absolute within the init segment's buffer; when the `trak`
/// bytes are copied into a merged movie the caller translates them by the
/// region's displacement.
#[derive(Debug, Clone)]
pub struct TrackHeader {
    /// Track ID declared by `tkhd`.
    pub track_id: u32,
    /// Byte region of the whole `trak` box.
    pub region: BoxRegion,
    /// Offset of the `tkhd` track_ID field.
    pub track_id_offset: usize,
    /// `tkhd` duration field, in movie timescale units.
    pub tkhd_duration: DurationField,
    /// `mdhd` duration field, in media timescale units.
    pub mdhd_duration: DurationField,
    /// Media timescale from `mdhd`.
    pub timescale: u32,
    /// Handler kind from `hdlr`.
    pub handler: Handler,
    /// Sample-entry code of the first `stsd` entry.
    pub sample_entry: [u8; 4],
}

impl TrackHeader {
    /// The sample-entry code as a displayable string.
    pub fn codec_str(&self) -> String {
        String::from_utf8_lossy(&self.sample_entry).into_owned()
    }

    /// Whether the track's codec can be carried without re-encoding.
    pub fn codec_supported(&self) -> bool {
        is_supported_sample_entry(&self.sample_entry)
    }
}

/// Per-track fragment defaults from a `trex` box.
#[derive(Debug, Clone)]
pub struct TrexDefaults {
    /// Track ID the defaults apply to.
    pub track_id: u32,
    /// Byte region of the whole `trex` box.
    pub region: BoxRegion,
    /// Offset of the track_ID field.
    pub track_id_offset: usize,
    /// Fallback sample duration for fragments that declare none.
    pub default_sample_duration: u32,
}

/// A parsed initialization segment.
#[derive(Debug, Clone)]
pub struct InitSegment {
    /// Raw file contents.
    pub data: Vec<u8>,
    /// `ftyp` region, when present.
    pub ftyp: Option<BoxRegion>,
    /// The whole `moov` region.
    pub moov: BoxRegion,
    /// `mvhd` region.
    pub mvhd: BoxRegion,
    /// Movie timescale from `mvhd`.
    pub movie_timescale: u32,
    /// `mvhd` duration field.
    pub movie_duration: DurationField,
    /// Offset of the `mvhd` next_track_ID field.
    pub next_track_id_offset: usize,
    /// Tracks in declaration order.
    pub tracks: Vec<TrackHeader>,
    /// Fragment defaults declared by `mvex`.
    pub trex: Vec<TrexDefaults>,
    /// `moov` children that are neither `mvhd`, `trak` nor `mvex`.
    pub extra: Vec<BoxRegion>,
}

impl InitSegment {
    /// Fragment defaults for the given source track ID.
    pub fn trex_for(&self, track_id: u32) -> Option<&TrexDefaults> {
        self.trex.iter().find(|t| t.track_id == track_id)
    }
}

/// Parse an initialization segment from its raw bytes.
pub fn parse_init_segment(data: Vec<u8>) -> Result<InitSegment> {
    let top = walk_boxes(&data, 0, data.len())?;
    let ftyp = find_box(&top, BoxType::FTYP);
    let moov = find_box(&top, BoxType::MOOV)
        .ok_or_else(|| Mp4Error::invalid("initialization segment has no moov box"))?;
    let children = walk_boxes(&data, moov.payload_start(), moov.end)?;

    let mvhd = find_box(&children, BoxType::MVHD)
        .ok_or_else(|| Mp4Error::invalid("moov has no mvhd box"))?;
    let (movie_timescale, movie_duration, next_track_id_offset) = parse_mvhd(&data, mvhd)?;

    let mut tracks = Vec::new();
    let mut trex = Vec::new();
    let mut extra = Vec::new();
    for child in &children {
        match child.box_type {
            BoxType::MVHD => {}
            BoxType::TRAK => tracks.push(parse_trak(&data, *child)?),
            BoxType::MVEX => {
                for entry in walk_boxes(&data, child.payload_start(), child.end)? {
                    // mehd carries the pre-declared duration; it is rebuilt
                    // from the patched mvhd on output, so only trex matters.
                    if entry.box_type == BoxType::TREX {
                        trex.push(parse_trex(&data, entry)?);
                    }
                }
            }
            _ => extra.push(*child),
        }
    }

    if tracks.is_empty() {
        return Err(Mp4Error::invalid("moov declares no tracks"));
    }
    if trex.is_empty() {
        return Err(Mp4Error::invalid(
            "moov has no mvex/trex; not a fragmented-MP4 initialization segment",
        ));
    }

    Ok(InitSegment {
        data,
        ftyp,
        moov,
        mvhd,
        movie_timescale,
        movie_duration,
        next_track_id_offset,
        tracks,
        trex,
        extra,
    })
}

fn parse_mvhd(data: &[u8], region: BoxRegion) -> Result<(u32, DurationField, usize)> {
    let payload = region.payload(data);
    let version = payload.first().copied().unwrap_or(0);
    let base = region.payload_start();
    let (timescale_off, duration_off, next_id_off, min_len) = if version == 1 {
        (20, 24, 108, 112)
    } else {
        (12, 16, 96, 100)
    };
    if payload.len() < min_len {
        return Err(Mp4Error::invalid("mvhd too short"));
    }
    let timescale = read_u32(data, base + timescale_off);
    if timescale == 0 {
        return Err(Mp4Error::invalid("mvhd declares a zero timescale"));
    }
    Ok((
        timescale,
        DurationField {
            offset: base + duration_off,
            version,
        },
        base + next_id_off,
    ))
}

fn parse_trak(data: &[u8], region: BoxRegion) -> Result<TrackHeader> {
    let children = walk_boxes(data, region.payload_start(), region.end)?;
    let tkhd = find_box(&children, BoxType::TKHD)
        .ok_or_else(|| Mp4Error::invalid("trak has no tkhd box"))?;
    let mdia = find_box(&children, BoxType::MDIA)
        .ok_or_else(|| Mp4Error::invalid("trak has no mdia box"))?;

    let (track_id, track_id_offset, tkhd_duration) = parse_tkhd(data, tkhd)?;

    let mdia_children = walk_boxes(data, mdia.payload_start(), mdia.end)?;
    let mdhd = find_box(&mdia_children, BoxType::MDHD)
        .ok_or_else(|| Mp4Error::invalid("mdia has no mdhd box"))?;
    let hdlr = find_box(&mdia_children, BoxType::HDLR)
        .ok_or_else(|| Mp4Error::invalid("mdia has no hdlr box"))?;
    let minf = find_box(&mdia_children, BoxType::MINF)
        .ok_or_else(|| Mp4Error::invalid("mdia has no minf box"))?;

    let (timescale, mdhd_duration) = parse_mdhd(data, mdhd)?;
    let handler = parse_hdlr(data, hdlr)?;

    let minf_children = walk_boxes(data, minf.payload_start(), minf.end)?;
    let stbl = find_box(&minf_children, BoxType::STBL)
        .ok_or_else(|| Mp4Error::invalid("minf has no stbl box"))?;
    let stbl_children = walk_boxes(data, stbl.payload_start(), stbl.end)?;
    let stsd = find_box(&stbl_children, BoxType::STSD)
        .ok_or_else(|| Mp4Error::invalid("stbl has no stsd box"))?;
    let sample_entry = parse_stsd(data, stsd)?;

    Ok(TrackHeader {
        track_id,
        region,
        track_id_offset,
        tkhd_duration,
        mdhd_duration,
        timescale,
        handler,
        sample_entry,
    })
}

fn parse_tkhd(data: &[u8], region: BoxRegion) -> Result<(u32, usize, DurationField)> {
    let payload = region.payload(data);
    let version = payload.first().copied().unwrap_or(0);
    let base = region.payload_start();
    let (id_off, duration_off, min_len) = if version == 1 { (20, 28, 96) } else { (12, 20, 84) };
    if payload.len() < min_len {
        return Err(Mp4Error::invalid("tkhd too short"));
    }
    Ok((
        read_u32(data, base + id_off),
        base + id_off,
        DurationField {
            offset: base + duration_off,
            version,
        },
    ))
}

fn parse_mdhd(data: &[u8], region: BoxRegion) -> Result<(u32, DurationField)> {
    let payload = region.payload(data);
    let version = payload.first().copied().unwrap_or(0);
    let base = region.payload_start();
    let (timescale_off, duration_off, min_len) = if version == 1 { (20, 24, 36) } else { (12, 16, 24) };
    if payload.len() < min_len {
        return Err(Mp4Error::invalid("mdhd too short"));
    }
    let timescale = read_u32(data, base + timescale_off);
    if timescale == 0 {
        return Err(Mp4Error::invalid("mdhd declares a zero timescale"));
    }
    Ok((
        timescale,
        DurationField {
            offset: base + duration_off,
            version,
        },
    ))
}

fn parse_hdlr(data: &[u8], region: BoxRegion) -> Result<Handler> {
    let payload = region.payload(data);
    if payload.len() < 12 {
        return Err(Mp4Error::invalid("hdlr too short"));
    }
    Ok(Handler::from_bytes([
        payload[8], payload[9], payload[10], payload[11],
    ]))
}

fn parse_stsd(data: &[u8], region: BoxRegion) -> Result<[u8; 4]> {
    let payload = region.payload(data);
    let (_, _, body) = full_box(payload)?;
    if body.len() < 4 {
        return Err(Mp4Error::invalid("stsd too short"));
    }
    let entry_count = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    if entry_count == 0 || body.len() < 12 {
        return Err(Mp4Error::invalid("stsd has no sample entries"));
    }
    Ok([body[8], body[9], body[10], body[11]])
}

fn parse_trex(data: &[u8], region: BoxRegion) -> Result<TrexDefaults> {
    let payload = region.payload(data);
    if payload.len() < 24 {
        return Err(Mp4Error::invalid("trex too short"));
    }
    let base = region.payload_start();
    Ok(TrexDefaults {
        track_id: read_u32(data, base + 4),
        region,
        track_id_offset: base + 4,
        default_sample_duration: read_u32(data, base + 12),
    })
}
