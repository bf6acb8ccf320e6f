//! Segment resolution: binding manifest descriptors to files on disk.
//!
//! Resolution is the gate between "the manifest says" and "the directory
//! has". Every declared segment is stat'ed exactly once; the first violation
//! aborts with an error naming the track and segment index, so a rename or a
//! half-deleted session surfaces before any assembly work starts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ResolveError;
use crate::mpd::{SegmentKind, SegmentManifest, TrackKind, TrackManifest};

/// Knobs for [`resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Allowed absolute difference between a declared segment size and the
    /// on-disk length. Zero means exact.
    pub size_tolerance: u64,
}

/// A manifest segment bound to an existing file.
#[derive(Debug, Clone)]
pub struct ResolvedSegment {
    /// Declared index within the track.
    pub index: u64,
    /// Absolute (or caller-relative) path of the segment file.
    pub path: PathBuf,
    /// On-disk length in bytes.
    pub len: u64,
    /// Declared duration in track timescale units, when present.
    pub expected_duration: Option<u64>,
}

/// One track with all of its segments located.
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    /// Representation ID from the manifest.
    pub id: String,
    pub kind: TrackKind,
    pub codecs: Option<String>,
    /// Manifest timescale, for reporting declared durations.
    pub timescale: u32,
    /// Initialization segment, when the track declares one.
    pub init: Option<ResolvedSegment>,
    /// Media segments in ascending index order.
    pub media: Vec<ResolvedSegment>,
}

impl ResolvedTrack {
    /// Total on-disk bytes across init and media segments.
    pub fn total_bytes(&self) -> u64 {
        self.init.iter().map(|s| s.len).sum::<u64>()
            + self.media.iter().map(|s| s.len).sum::<u64>()
    }
}

/// A fully resolved clip, ready for assembly.
#[derive(Debug, Clone)]
pub struct ResolvedClip {
    /// Directory the segment paths live in.
    pub segment_dir: PathBuf,
    /// Tracks in manifest declaration order.
    pub tracks: Vec<ResolvedTrack>,
}

impl ResolvedClip {
    /// Total on-disk bytes across all tracks.
    pub fn total_bytes(&self) -> u64 {
        self.tracks.iter().map(ResolvedTrack::total_bytes).sum()
    }

    /// Total number of media segments across all tracks.
    pub fn total_media_segments(&self) -> usize {
        self.tracks.iter().map(|t| t.media.len()).sum()
    }
}

/// Bind every segment the manifest declares to a file under `segment_dir`.
///
/// Fails on the first missing file or declared-size mismatch. Directory
/// entries the manifest does not mention are ignored here; they are the
/// cleanup stage's concern.
pub fn resolve(
    manifest: &SegmentManifest,
    segment_dir: &Path,
    options: &ResolveOptions,
) -> Result<ResolvedClip, ResolveError> {
    let mut tracks = Vec::with_capacity(manifest.tracks.len());
    for track in &manifest.tracks {
        tracks.push(resolve_track(track, segment_dir, options)?);
    }
    Ok(ResolvedClip {
        segment_dir: segment_dir.to_path_buf(),
        tracks,
    })
}

fn resolve_track(
    track: &TrackManifest,
    segment_dir: &Path,
    options: &ResolveOptions,
) -> Result<ResolvedTrack, ResolveError> {
    let mut init = None;
    let mut media = Vec::with_capacity(track.segments.len());
    for segment in &track.segments {
        let path = segment_dir.join(&segment.file_name);
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ResolveError::MissingSegment {
                    track: track.id.clone(),
                    index: segment.index,
                    path,
                });
            }
            Err(e) => return Err(ResolveError::Io(e)),
        };
        if let Some(expected) = segment.expected_size {
            if len.abs_diff(expected) > options.size_tolerance {
                return Err(ResolveError::SizeMismatch {
                    track: track.id.clone(),
                    index: segment.index,
                    expected,
                    actual: len,
                });
            }
        }
        let resolved = ResolvedSegment {
            index: segment.index,
            path,
            len,
            expected_duration: segment.expected_duration,
        };
        match segment.kind {
            SegmentKind::Init => init = Some(resolved),
            SegmentKind::Media => media.push(resolved),
        }
    }
    Ok(ResolvedTrack {
        id: track.id.clone(),
        kind: track.kind,
        codecs: track.codecs.clone(),
        timescale: track.timescale,
        init,
        media,
    })
}
