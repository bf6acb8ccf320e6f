//! Single-file container assembly.
//!
//! Takes a resolved clip and writes one seekable MP4: the primary track's
//! compatibility header, a merged movie header, every media fragment with its
//! decode timeline rebased onto a shared zero origin, and a trailing random
//! access index. Sample payloads are streamed through untouched; only box
//! headers and timing fields are rewritten.
//!
//! The output is staged in a temporary file next to the destination and
//! renamed into place, so a crash or failure mid-write never leaves a partial
//! container at the destination path.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{AssembleError, Mp4Error};
use crate::fmp4::{self, TfraEntry, TrackAccumulator};
use crate::mp4::{parse_init_segment, read_stream_box, BoxType, DurationField, StreamBox};
use crate::resolve::{ResolvedClip, ResolvedSegment};

type Result<T> = std::result::Result<T, AssembleError>;

/// A moof larger than this is not a recording fragment.
const MAX_MOOF_LEN: u64 = 1 << 26;

/// Knobs for [`assemble`].
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Replace an existing file at the output path instead of refusing.
    pub overwrite: bool,
    /// Abort with [`AssembleError::DeadlineExceeded`] once this instant has
    /// passed. Checked between fragment writes, never mid-write.
    pub deadline: Option<Instant>,
}

/// Summary of a finished assembly.
#[derive(Debug, Clone)]
pub struct AssembledContainer {
    /// Where the container was written.
    pub output_path: PathBuf,
    /// Longest track duration in seconds.
    pub total_duration: f64,
    /// Number of media segment files consumed.
    pub segment_count: usize,
    /// Number of tracks in the merged movie.
    pub track_count: usize,
    /// Final container size in bytes.
    pub output_len: u64,
}

/// Per-track progress through the clip's media segments.
struct TrackState<'a> {
    rep_id: &'a str,
    media: &'a [ResolvedSegment],
    next: usize,
    /// One accumulator per trak declared by this track's init segment.
    accumulators: Vec<TrackAccumulator>,
}

impl TrackState<'_> {
    fn exhausted(&self) -> bool {
        self.next >= self.media.len()
    }

    fn elapsed_secs(&self) -> f64 {
        self.accumulators
            .first()
            .map_or(0.0, TrackAccumulator::elapsed_secs)
    }
}

/// Assemble a resolved clip into a single MP4 at `output_path`.
///
/// Fragments from different tracks are interleaved by accumulated duration:
/// each step appends the next segment of the track that is furthest behind,
/// ties going to the earliest-declared track. The result is deterministic for
/// a given clip.
pub fn assemble(
    clip: &ResolvedClip,
    output_path: &Path,
    options: &AssembleOptions,
) -> Result<AssembledContainer> {
    if !options.overwrite && output_path.exists() {
        return Err(AssembleError::OutputExists(output_path.to_path_buf()));
    }
    check_deadline(options)?;

    // Parse every init segment up front; codec and structure problems should
    // surface before any output is staged.
    let mut inits = Vec::with_capacity(clip.tracks.len());
    for track in &clip.tracks {
        let init = track
            .init
            .as_ref()
            .ok_or_else(|| AssembleError::NoInitSegment(track.id.clone()))?;
        let data = fs::read(&init.path)?;
        let parsed = parse_init_segment(data).map_err(|e| AssembleError::CorruptFragment {
            index: init.index,
            detail: format!("init segment of track {}: {e}", track.id),
        })?;
        for header in &parsed.tracks {
            if !header.codec_supported() {
                return Err(AssembleError::UnsupportedCodec(header.codec_str()));
            }
        }
        inits.push(parsed);
    }

    // Assign merged-movie track IDs in declaration order and set up one
    // accumulator per source trak.
    let mut output_ids = Vec::new();
    let mut states = Vec::with_capacity(clip.tracks.len());
    let mut next_output_id = 1u32;
    for (track, init) in clip.tracks.iter().zip(&inits) {
        let mut accumulators = Vec::with_capacity(init.tracks.len());
        for header in &init.tracks {
            let trex_default = init
                .trex_for(header.track_id)
                .map_or(0, |t| t.default_sample_duration);
            accumulators.push(TrackAccumulator {
                source_id: header.track_id,
                output_id: next_output_id,
                timescale: header.timescale,
                trex_default_duration: trex_default,
                next_decode_time: 0,
            });
            output_ids.push(next_output_id);
            next_output_id += 1;
        }
        states.push(TrackState {
            rep_id: &track.id,
            media: &track.media,
            next: 0,
            accumulators,
        });
    }

    let (moov, layout) =
        fmp4::build_merged_moov(&inits, &output_ids).map_err(|e| AssembleError::CorruptFragment {
            index: 0,
            detail: e.to_string(),
        })?;

    let parent = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".clipforge-")
        .suffix(".tmp")
        .tempfile_in(parent)?;

    let mut written = 0u64;
    let mut sequence = 0u32;
    let mut segment_count = 0usize;
    let mut tfra: BTreeMap<u32, Vec<TfraEntry>> =
        output_ids.iter().map(|&id| (id, Vec::new())).collect();
    let moov_start;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());

        let primary = &inits[0];
        let ftyp = primary
            .ftyp
            .as_ref()
            .ok_or_else(|| AssembleError::CorruptFragment {
                index: 0,
                detail: format!(
                    "init segment of track {} has no ftyp box",
                    states[0].rep_id
                ),
            })?;
        out.write_all(&primary.data[ftyp.start..ftyp.end])?;
        written += (ftyp.end - ftyp.start) as u64;

        moov_start = written;
        out.write_all(&moov)?;
        written += moov.len() as u64;

        while let Some(idx) = next_track(&states) {
            check_deadline(options)?;
            let state = &mut states[idx];
            let media = state.media;
            let segment = &media[state.next];
            state.next += 1;
            segment_count += 1;
            append_segment(
                &mut out,
                segment,
                state,
                &mut written,
                &mut sequence,
                &mut tfra,
            )?;
        }

        let entries: Vec<(u32, Vec<TfraEntry>)> = tfra.into_iter().collect();
        let mfra = fmp4::build_mfra(&entries);
        out.write_all(&mfra)?;
        written += mfra.len() as u64;
        out.flush()?;
    }

    // Fragment totals are now known; patch the zeroed durations in place.
    let mut totals: BTreeMap<u32, (u64, f64)> = BTreeMap::new();
    for acc in states.iter().flat_map(|s| &s.accumulators) {
        totals.insert(acc.output_id, (acc.next_decode_time, acc.elapsed_secs()));
    }
    let total_duration = totals.values().map(|&(_, secs)| secs).fold(0.0, f64::max);
    let movie_units = (total_duration * f64::from(layout.movie_timescale)).round() as u64;

    let file = tmp.as_file_mut();
    patch_duration(file, moov_start, layout.movie_duration, movie_units)?;
    for track in &layout.tracks {
        let (media_units, secs) = totals.get(&track.output_id).copied().unwrap_or((0, 0.0));
        let tkhd_units = (secs * f64::from(layout.movie_timescale)).round() as u64;
        patch_duration(file, moov_start, track.tkhd_duration, tkhd_units)?;
        patch_duration(file, moov_start, track.mdhd_duration, media_units)?;
    }

    if options.overwrite {
        tmp.persist(output_path)
            .map_err(|e| AssembleError::Io(e.error))?;
    } else {
        // Catches a file that appeared since the preflight check.
        match tmp.persist_noclobber(output_path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(AssembleError::OutputExists(output_path.to_path_buf()));
            }
            Err(e) => return Err(AssembleError::Io(e.error)),
        }
    }

    Ok(AssembledContainer {
        output_path: output_path.to_path_buf(),
        total_duration,
        segment_count,
        track_count: totals.len(),
        output_len: written,
    })
}

/// Pick the track that is furthest behind, first-declared on ties.
fn next_track(states: &[TrackState]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, state) in states.iter().enumerate() {
        if state.exhausted() {
            continue;
        }
        match best {
            Some(b) if state.elapsed_secs() >= states[b].elapsed_secs() => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Stream one media segment file into the output, rebasing each moof.
fn append_segment<W: Write>(
    out: &mut W,
    segment: &ResolvedSegment,
    state: &mut TrackState,
    written: &mut u64,
    sequence: &mut u32,
    tfra: &mut BTreeMap<u32, Vec<TfraEntry>>,
) -> Result<()> {
    let file = File::open(&segment.path)?;
    let mut reader = BufReader::new(file);
    let mut remaining = segment.len;
    let mut saw_moof = false;

    while let Some(header) =
        read_stream_box(&mut reader, remaining).map_err(|e| media_error(segment.index, e))?
    {
        remaining -= header.size;
        let payload = header.payload_size();
        match header.box_type {
            BoxType::MOOF => {
                saw_moof = true;
                if payload > MAX_MOOF_LEN {
                    return Err(AssembleError::CorruptFragment {
                        index: segment.index,
                        detail: format!("implausibly large moof ({} bytes)", header.size),
                    });
                }
                let mut moof = header_bytes(&header);
                let body_at = moof.len();
                moof.resize(body_at + payload as usize, 0);
                reader.read_exact(&mut moof[body_at..])?;

                *sequence += 1;
                let rebased = fmp4::rebase_moof(&moof, *sequence, *written, &mut state.accumulators)
                    .map_err(|e| media_error(segment.index, e))?;
                out.write_all(&rebased.data)?;
                *written += rebased.data.len() as u64;
                for (output_id, entry) in rebased.tfra {
                    tfra.entry(output_id).or_default().push(entry);
                }
            }
            // Per-segment framing; meaningless (or wrong) in the merged file.
            BoxType::FTYP | BoxType::STYP | BoxType::SIDX | BoxType::PRFT | BoxType::FREE
            | BoxType::SKIP => {
                skip_payload(&mut reader, payload, segment.index)?;
            }
            // mdat and anything else rides along unchanged.
            _ => {
                let head = header_bytes(&header);
                out.write_all(&head)?;
                let copied = io::copy(&mut (&mut reader).take(payload), out)?;
                if copied != payload {
                    return Err(AssembleError::CorruptFragment {
                        index: segment.index,
                        detail: format!("truncated {} box", header.box_type),
                    });
                }
                *written += head.len() as u64 + payload;
            }
        }
    }

    if !saw_moof {
        return Err(AssembleError::CorruptFragment {
            index: segment.index,
            detail: format!(
                "segment of track {} contains no movie fragment",
                state.rep_id
            ),
        });
    }
    Ok(())
}

/// Reconstruct a box header for the output stream.
///
/// Open-ended (`size == 0`) boxes come back from [`read_stream_box`] with
/// their real length, so the written header is always explicit.
fn header_bytes(header: &StreamBox) -> Vec<u8> {
    let mut head = Vec::with_capacity(16);
    if header.header_len == 16 || header.size > u64::from(u32::MAX) {
        head.extend_from_slice(&1u32.to_be_bytes());
        head.extend_from_slice(&header.box_type.0);
        head.extend_from_slice(&header.size.to_be_bytes());
    } else {
        head.extend_from_slice(&(header.size as u32).to_be_bytes());
        head.extend_from_slice(&header.box_type.0);
    }
    head
}

fn skip_payload<R: Read>(reader: &mut R, payload: u64, index: u64) -> Result<()> {
    let skipped = io::copy(&mut reader.take(payload), &mut io::sink())?;
    if skipped != payload {
        return Err(AssembleError::CorruptFragment {
            index,
            detail: "truncated box".into(),
        });
    }
    Ok(())
}

fn media_error(index: u64, err: Mp4Error) -> AssembleError {
    match err {
        Mp4Error::Io(e) => AssembleError::Io(e),
        other => AssembleError::CorruptFragment {
            index,
            detail: other.to_string(),
        },
    }
}

fn check_deadline(options: &AssembleOptions) -> Result<()> {
    match options.deadline {
        Some(deadline) if Instant::now() >= deadline => Err(AssembleError::DeadlineExceeded),
        _ => Ok(()),
    }
}

/// Overwrite a zeroed duration field inside the staged output.
fn patch_duration(
    file: &mut File,
    moov_start: u64,
    field: DurationField,
    units: u64,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(moov_start + field.offset as u64))?;
    if field.version == 1 {
        file.write_all(&units.to_be_bytes())
    } else {
        let clamped = u32::try_from(units).unwrap_or(u32::MAX);
        file.write_all(&clamped.to_be_bytes())
    }
}
