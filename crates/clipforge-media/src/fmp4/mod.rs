//! Fragment rebasing and movie-level box construction.
//!
//! Assembly rewrites each `moof` for its place in the output file: the
//! sequence number is renumbered globally, track IDs are mapped into the
//! merged movie, an explicit base data offset is repointed at the fragment's
//! new file position, and the `tfdt` decode time is rebased onto a per-track
//! accumulator so the output timeline starts at zero and never jumps.
//!
//! A version-0 `tfdt` whose rebased time no longer fits in 32 bits is widened
//! to version 1. That grows the box by four bytes, which shifts the `mdat`
//! relative to the `moof`, so every trun data offset in the fragment moves by
//! the total growth.

use bytes::{BufMut, BytesMut};

use crate::error::Mp4Error;
use crate::mp4::{
    find_box, full_box, read_u32, walk_boxes, write_u32, write_u64, BoxRegion, BoxType,
    DurationField, InitSegment, Result,
};

const TFHD_BASE_DATA_OFFSET: u32 = 0x0000_0001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x0000_0002;
const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x0000_0008;
const TFHD_DEFAULT_SAMPLE_SIZE: u32 = 0x0000_0010;
const TFHD_DEFAULT_SAMPLE_FLAGS: u32 = 0x0000_0020;

const TRUN_DATA_OFFSET: u32 = 0x0000_0001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x0000_0004;
const TRUN_SAMPLE_DURATION: u32 = 0x0000_0100;
const TRUN_SAMPLE_SIZE: u32 = 0x0000_0200;
const TRUN_SAMPLE_FLAGS: u32 = 0x0000_0400;
const TRUN_SAMPLE_CTS: u32 = 0x0000_0800;

/// Per-track state threaded through the fragment pass.
#[derive(Debug)]
pub struct TrackAccumulator {
    /// Track ID as it appears in the source fragments.
    pub source_id: u32,
    /// Track ID in the merged movie.
    pub output_id: u32,
    /// Media timescale.
    pub timescale: u32,
    /// Fallback sample duration from `trex`.
    pub trex_default_duration: u32,
    /// Decode time the track's next fragment will be rebased to; equals the
    /// duration accumulated so far.
    pub next_decode_time: u64,
}

impl TrackAccumulator {
    /// Accumulated duration in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.next_decode_time as f64 / f64::from(self.timescale)
        }
    }
}

/// One random-access entry recorded while rebasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfraEntry {
    /// Rebased decode time of the fragment's first sample.
    pub time: u64,
    /// Absolute file offset of the rebased moof.
    pub moof_offset: u64,
}

/// A moof rewritten for its position in the output timeline.
#[derive(Debug)]
pub struct RebasedMoof {
    /// The rewritten bytes; four bytes longer per widened tfdt.
    pub data: Vec<u8>,
    /// Random-access entries keyed by output track ID.
    pub tfra: Vec<(u32, TfraEntry)>,
}

struct TrafPlan {
    region: BoxRegion,
    track_index: usize,
    track_id_offset: usize,
    base_data_offset: Option<usize>,
    tfdt_region: BoxRegion,
    tfdt_version: u8,
    tfdt_time_offset: usize,
    trun_data_offsets: Vec<usize>,
    duration: u64,
}

/// Rewrite a single `moof` box for the output timeline.
///
/// `moof` must hold exactly one moof box. `moof_offset` is the absolute file
/// offset the rewritten box will land at. Accumulators are advanced by each
/// traf's duration, taken from trun sample durations when present, otherwise
/// from the tfhd default, otherwise from the track's trex default.
pub fn rebase_moof(
    moof: &[u8],
    sequence_number: u32,
    moof_offset: u64,
    tracks: &mut [TrackAccumulator],
) -> Result<RebasedMoof> {
    let top = walk_boxes(moof, 0, moof.len())?;
    let moof_region = match top.as_slice() {
        [only] if only.box_type == BoxType::MOOF => *only,
        _ => return Err(Mp4Error::invalid("buffer does not hold a single moof box")),
    };
    let children = walk_boxes(moof, moof_region.payload_start(), moof_region.end)?;

    let mfhd = find_box(&children, BoxType::MFHD)
        .ok_or_else(|| Mp4Error::invalid("moof has no mfhd box"))?;
    if mfhd.end - mfhd.payload_start() < 8 {
        return Err(Mp4Error::invalid("mfhd too short"));
    }
    let sequence_offset = mfhd.payload_start() + 4;

    let mut plans = Vec::new();
    for child in children.iter().filter(|c| c.box_type == BoxType::TRAF) {
        plans.push(plan_traf(moof, *child, tracks)?);
    }
    if plans.is_empty() {
        return Err(Mp4Error::invalid("moof has no traf boxes"));
    }

    // Decide rebased times in declaration order so repeated trafs for one
    // track stay monotonic.
    let mut rebased_times = Vec::with_capacity(plans.len());
    let mut tfra = Vec::with_capacity(plans.len());
    let mut expansions = Vec::new();
    for plan in &plans {
        let acc = &mut tracks[plan.track_index];
        let rebased = acc.next_decode_time;
        rebased_times.push(rebased);
        tfra.push((
            acc.output_id,
            TfraEntry {
                time: rebased,
                moof_offset,
            },
        ));
        if plan.tfdt_version == 0 && rebased > u64::from(u32::MAX) {
            expansions.push(plan.tfdt_time_offset);
        }
        acc.next_decode_time = rebased
            .checked_add(plan.duration)
            .ok_or_else(|| Mp4Error::invalid("track decode time overflows 64 bits"))?;
    }

    let mut out = moof.to_vec();

    // Patches that leave the layout untouched go in at source offsets.
    write_u32(&mut out, sequence_offset, sequence_number);
    for (plan, &rebased) in plans.iter().zip(&rebased_times) {
        write_u32(
            &mut out,
            plan.track_id_offset,
            tracks[plan.track_index].output_id,
        );
        if let Some(off) = plan.base_data_offset {
            write_u64(&mut out, off, moof_offset);
        }
        match plan.tfdt_version {
            1 => write_u64(&mut out, plan.tfdt_time_offset, rebased),
            _ if rebased <= u64::from(u32::MAX) => {
                write_u32(&mut out, plan.tfdt_time_offset, rebased as u32)
            }
            _ => {} // widened below
        }
    }

    if !expansions.is_empty() {
        widen_tfdts(&mut out, &plans, &rebased_times, &expansions)?;
    }

    let total_len = out.len() as u64;
    set_box_size(&mut out, moof_region.start, moof_region.header_len, total_len)?;
    Ok(RebasedMoof { data: out, tfra })
}

/// Splice four bytes into each overflowing version-0 tfdt and fix everything
/// that moves: box sizes grow, fields past an insertion shift, and all trun
/// data offsets move by the total growth. The moof's own size field is
/// rewritten by the caller from the final buffer length.
fn widen_tfdts(
    out: &mut Vec<u8>,
    plans: &[TrafPlan],
    rebased_times: &[u64],
    expansions: &[usize],
) -> Result<()> {
    let delta = (4 * expansions.len()) as i32;
    let shifted =
        |off: usize| off + 4 * expansions.iter().filter(|&&at| at < off).count();

    for &at in expansions.iter().rev() {
        out.splice(at..at, [0u8; 4]);
    }

    for (plan, &rebased) in plans.iter().zip(rebased_times) {
        if plan.tfdt_version == 0 && rebased > u64::from(u32::MAX) {
            out[shifted(plan.tfdt_region.payload_start())] = 1;
            write_u64(out, shifted(plan.tfdt_time_offset), rebased);
            set_box_size(
                out,
                shifted(plan.tfdt_region.start),
                plan.tfdt_region.header_len,
                plan.tfdt_region.len() as u64 + 4,
            )?;
            let grown = expansions
                .iter()
                .filter(|&&at| plan.region.start <= at && at < plan.region.end)
                .count();
            set_box_size(
                out,
                shifted(plan.region.start),
                plan.region.header_len,
                (plan.region.len() + 4 * grown) as u64,
            )?;
        }
        for &off in &plan.trun_data_offsets {
            let off = shifted(off);
            let old = read_u32(out, off) as i32;
            write_u32(out, off, (old + delta) as u32);
        }
    }

    Ok(())
}

fn set_box_size(buf: &mut [u8], start: usize, header_len: usize, size: u64) -> Result<()> {
    if header_len == 16 {
        write_u64(buf, start + 8, size);
    } else {
        if size > u64::from(u32::MAX) {
            return Err(Mp4Error::invalid("box too large for a 32-bit size field"));
        }
        write_u32(buf, start, size as u32);
    }
    Ok(())
}

fn plan_traf(moof: &[u8], region: BoxRegion, tracks: &[TrackAccumulator]) -> Result<TrafPlan> {
    let children = walk_boxes(moof, region.payload_start(), region.end)?;

    let tfhd = find_box(&children, BoxType::TFHD)
        .ok_or_else(|| Mp4Error::invalid("traf has no tfhd box"))?;
    let (_, flags, body) = full_box(tfhd.payload(moof))?;
    if body.len() < 4 {
        return Err(Mp4Error::invalid("tfhd too short"));
    }
    let track_id_offset = tfhd.payload_start() + 4;
    let track_id = read_u32(moof, track_id_offset);
    let track_index = tracks
        .iter()
        .position(|t| t.source_id == track_id)
        .ok_or_else(|| {
            Mp4Error::invalid(format!("fragment references undeclared track {track_id}"))
        })?;

    let mut cursor = tfhd.payload_start() + 8;
    let mut base_data_offset = None;
    let mut default_duration_at = None;
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        base_data_offset = Some(cursor);
        cursor += 8;
    }
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        cursor += 4;
    }
    if flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
        default_duration_at = Some(cursor);
        cursor += 4;
    }
    if flags & TFHD_DEFAULT_SAMPLE_SIZE != 0 {
        cursor += 4;
    }
    if flags & TFHD_DEFAULT_SAMPLE_FLAGS != 0 {
        cursor += 4;
    }
    if cursor > tfhd.end {
        return Err(Mp4Error::invalid("tfhd fields overrun the box"));
    }
    let tfhd_default_duration = default_duration_at.map(|at| read_u32(moof, at));

    let tfdt = find_box(&children, BoxType::TFDT)
        .ok_or_else(|| Mp4Error::invalid("traf has no tfdt box"))?;
    let (tfdt_version, _, tfdt_body) = full_box(tfdt.payload(moof))?;
    let needed = if tfdt_version == 1 { 8 } else { 4 };
    if tfdt_body.len() < needed {
        return Err(Mp4Error::invalid("tfdt too short"));
    }
    let tfdt_time_offset = tfdt.payload_start() + 4;

    let mut trun_data_offsets = Vec::new();
    let mut duration = 0u64;
    let mut total_samples = 0u64;
    for trun in children.iter().filter(|c| c.box_type == BoxType::TRUN) {
        let (_, tflags, tbody) = full_box(trun.payload(moof))?;
        if tbody.len() < 4 {
            return Err(Mp4Error::invalid("trun too short"));
        }
        let sample_count = u32::from_be_bytes([tbody[0], tbody[1], tbody[2], tbody[3]]);

        let mut cursor = trun.payload_start() + 8;
        if tflags & TRUN_DATA_OFFSET != 0 {
            trun_data_offsets.push(cursor);
            cursor += 4;
        }
        if tflags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            cursor += 4;
        }
        let mut entry_len = 0usize;
        for flag in [
            TRUN_SAMPLE_DURATION,
            TRUN_SAMPLE_SIZE,
            TRUN_SAMPLE_FLAGS,
            TRUN_SAMPLE_CTS,
        ] {
            if tflags & flag != 0 {
                entry_len += 4;
            }
        }
        let table_end = cursor + entry_len * sample_count as usize;
        if table_end > trun.end {
            return Err(Mp4Error::invalid("trun sample table overruns the box"));
        }

        duration += if tflags & TRUN_SAMPLE_DURATION != 0 {
            (0..sample_count as usize)
                .map(|i| u64::from(read_u32(moof, cursor + i * entry_len)))
                .sum()
        } else {
            let default =
                tfhd_default_duration.unwrap_or(tracks[track_index].trex_default_duration);
            u64::from(default) * u64::from(sample_count)
        };
        total_samples += u64::from(sample_count);
    }

    if total_samples == 0 {
        return Err(Mp4Error::invalid("traf carries no samples"));
    }
    if duration == 0 {
        return Err(Mp4Error::invalid("traf contributes zero duration"));
    }

    Ok(TrafPlan {
        region,
        track_index,
        track_id_offset,
        base_data_offset,
        tfdt_region: tfdt,
        tfdt_version,
        tfdt_time_offset,
        trun_data_offsets,
        duration,
    })
}

/// Layout of a written merged moov: everything assembly patches afterwards,
/// with offsets relative to the moov's first byte.
#[derive(Debug, Clone)]
pub struct MoovLayout {
    /// Total moov length in bytes.
    pub len: usize,
    /// Movie timescale from the primary init.
    pub movie_timescale: u32,
    /// mvhd duration field.
    pub movie_duration: DurationField,
    /// Per-track patch points, in output order.
    pub tracks: Vec<MoovTrack>,
}

/// Patch points for one track in a merged moov.
#[derive(Debug, Clone)]
pub struct MoovTrack {
    /// Track ID in the merged movie.
    pub output_id: u32,
    /// Media timescale.
    pub timescale: u32,
    /// tkhd duration field, in movie timescale units.
    pub tkhd_duration: DurationField,
    /// mdhd duration field, in media timescale units.
    pub mdhd_duration: DurationField,
}

/// Build a merged `moov` from per-track initialization segments.
///
/// The first init contributes the movie-level boxes; every init contributes
/// its trak and trex boxes patched to `output_ids`, flattened across inits in
/// declaration order. Duration fields are zeroed here and patched once the
/// fragment pass has accumulated per-track totals.
pub fn build_merged_moov(
    inits: &[InitSegment],
    output_ids: &[u32],
) -> Result<(Vec<u8>, MoovLayout)> {
    let primary = inits
        .first()
        .ok_or_else(|| Mp4Error::invalid("no initialization segments to merge"))?;
    let total_tracks: usize = inits.iter().map(|i| i.tracks.len()).sum();
    if output_ids.len() != total_tracks {
        return Err(Mp4Error::invalid(
            "track ID assignment does not match track count",
        ));
    }

    let mut flat = Vec::with_capacity(total_tracks);
    let mut next = 0;
    for init in inits {
        for track in &init.tracks {
            flat.push((init, track, output_ids[next]));
            next += 1;
        }
    }

    let mut buf = BytesMut::new();
    let moov = begin_box(&mut buf, b"moov");

    // mvhd comes from the primary init, with next_track_ID raised past the
    // merged set.
    let mvhd_start = buf.len();
    buf.put_slice(&primary.data[primary.mvhd.start..primary.mvhd.end]);
    let movie_duration = DurationField {
        offset: mvhd_start + (primary.movie_duration.offset - primary.mvhd.start),
        version: primary.movie_duration.version,
    };
    zero_duration(&mut buf, &movie_duration);
    let next_id_at = mvhd_start + (primary.next_track_id_offset - primary.mvhd.start);
    let max_id = output_ids.iter().copied().max().unwrap_or(0);
    write_u32(&mut buf, next_id_at, max_id + 1);

    let mut tracks = Vec::with_capacity(total_tracks);
    for (init, track, output_id) in &flat {
        let trak_start = buf.len();
        buf.put_slice(&init.data[track.region.start..track.region.end]);
        let moved = |old: usize| trak_start + (old - track.region.start);

        write_u32(&mut buf, moved(track.track_id_offset), *output_id);
        let tkhd_duration = DurationField {
            offset: moved(track.tkhd_duration.offset),
            version: track.tkhd_duration.version,
        };
        let mdhd_duration = DurationField {
            offset: moved(track.mdhd_duration.offset),
            version: track.mdhd_duration.version,
        };
        zero_duration(&mut buf, &tkhd_duration);
        zero_duration(&mut buf, &mdhd_duration);
        tracks.push(MoovTrack {
            output_id: *output_id,
            timescale: track.timescale,
            tkhd_duration,
            mdhd_duration,
        });
    }

    let mvex = begin_box(&mut buf, b"mvex");
    for (init, track, output_id) in &flat {
        let trex = init.trex_for(track.track_id).ok_or_else(|| {
            Mp4Error::invalid(format!("no trex defaults for track {}", track.track_id))
        })?;
        let trex_start = buf.len();
        buf.put_slice(&init.data[trex.region.start..trex.region.end]);
        write_u32(
            &mut buf,
            trex_start + (trex.track_id_offset - trex.region.start),
            *output_id,
        );
    }
    end_box(&mut buf, mvex);

    // Movie-level extras (udta and friends) ride along from the primary init.
    for extra in &primary.extra {
        buf.put_slice(&primary.data[extra.start..extra.end]);
    }

    end_box(&mut buf, moov);

    let layout = MoovLayout {
        len: buf.len(),
        movie_timescale: primary.movie_timescale,
        movie_duration,
        tracks,
    };
    Ok((buf.to_vec(), layout))
}

/// Serialize the random-access index collected during the fragment pass.
///
/// One `tfra` per track plus the closing `mfro`, whose size field lets a
/// player locate the index from the end of the file.
pub fn build_mfra(tracks: &[(u32, Vec<TfraEntry>)]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mfra = begin_box(&mut buf, b"mfra");
    for (track_id, entries) in tracks {
        let tfra = begin_box(&mut buf, b"tfra");
        buf.put_u32(0x0100_0000); // version 1: 64-bit times and offsets
        buf.put_u32(*track_id);
        buf.put_u32(0); // 1-byte traf/trun/sample numbers
        buf.put_u32(entries.len() as u32);
        for entry in entries {
            buf.put_u64(entry.time);
            buf.put_u64(entry.moof_offset);
            buf.put_u8(1); // traf_number
            buf.put_u8(1); // trun_number
            buf.put_u8(1); // sample_number
        }
        end_box(&mut buf, tfra);
    }
    let mfro = begin_box(&mut buf, b"mfro");
    buf.put_u32(0);
    buf.put_u32(buf.len() as u32 + 4); // whole mfra including this field
    end_box(&mut buf, mfro);
    end_box(&mut buf, mfra);
    buf.to_vec()
}

fn begin_box(buf: &mut BytesMut, fourcc: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(fourcc);
    start
}

fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn zero_duration(buf: &mut [u8], field: &DurationField) {
    if field.version == 1 {
        write_u64(buf, field.offset, 0);
    } else {
        write_u32(buf, field.offset, 0);
    }
}
