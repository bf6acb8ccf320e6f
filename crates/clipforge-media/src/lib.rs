//! Clipforge-Media: DASH manifest parsing, fMP4 rebasing, and single-file
//! MP4 assembly.
//!
//! This crate turns a fragmented game recording (an MPD-style manifest plus a
//! directory of `.m4s` init and media segments) into one seekable MP4 without
//! touching the encoded samples.
//!
//! # Modules
//!
//! - `mpd` - Session manifest parsing (SegmentTemplate/SegmentList, timelines)
//! - `resolve` - Binding manifest descriptors to files on disk
//! - `mp4` - ISO-BMFF box walking and init-segment parsing
//! - `fmp4` - Fragment timestamp rebasing, moov merging, mfra generation
//! - `assemble` - Streaming the rebased container to disk
//!
//! # Architecture
//!
//! An export runs in three passes:
//!
//! 1. Parse the manifest and stat every declared segment (`mpd`, `resolve`)
//! 2. Stream fragments into a temp file, rebasing each moof's decode time
//!    onto a shared zero origin and recording random-access entries (`fmp4`,
//!    `assemble`)
//! 3. Patch the real durations into the movie header and rename the temp
//!    file over the destination
//!
//! Sample data (`mdat` payloads) is copied byte for byte; only box headers,
//! track IDs, and timing fields are rewritten.

pub mod assemble;
pub mod error;
pub mod fmp4;
pub mod mp4;
pub mod mpd;
pub mod resolve;

#[cfg(test)]
pub(crate) mod testutil;

pub use assemble::{assemble, AssembleOptions, AssembledContainer};
pub use error::{AssembleError, ParseError, ResolveError};
pub use mpd::{SegmentManifest, TrackKind};
pub use resolve::{resolve, ResolveOptions, ResolvedClip};
