//! Source cleanup after verified exports.
//!
//! Deletes the manifest and fragment files of clips whose export succeeded.
//! Every deletion is gated on the output file existing and being non-empty at
//! deletion time; the in-memory report is never trusted on its own. The pass
//! is idempotent: files that are already gone count as clean, not as errors.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::catalog::Clip;
use crate::names::{existing_output, output_stem, GameNames};
use crate::scheduler::{ExportJob, ExportReport, JobState};

use clipforge_media::AssembledContainer;

/// How a cleanup pass was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    /// Right after an export run, against its fresh report.
    PostExport,
    /// Standalone, against a report reconstructed from existing outputs.
    CleanupOnly,
}

/// Conditions that prevent a cleanup pass from running at all.
///
/// Per-clip problems never land here; they become [`ClipOutcome`]s.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// The output directory a cleanup-only report should be built from does
    /// not exist.
    #[error("output directory does not exist: {0}")]
    OutputDirMissing(std::path::PathBuf),
}

/// What happened to one clip's source files.
#[derive(Debug)]
pub enum ClipOutcome {
    /// Sources removed; the count includes the manifest.
    Deleted { files_removed: usize },
    /// Nothing left to remove. The idempotent re-run case.
    AlreadyClean,
    /// The exported output is missing or empty; sources were kept.
    Unverifiable(String),
    /// Deletion itself failed part-way.
    Failed(String),
}

/// Aggregate result of one cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupResult {
    /// One entry per Succeeded job, in report order.
    pub outcomes: Vec<(Clip, ClipOutcome)>,
}

impl CleanupResult {
    pub fn deleted_count(&self) -> usize {
        self.count(|o| matches!(o, ClipOutcome::Deleted { .. }))
    }

    pub fn unverifiable_count(&self) -> usize {
        self.count(|o| matches!(o, ClipOutcome::Unverifiable(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, ClipOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&ClipOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Remove source fragments for every Succeeded job in the report.
///
/// Failed jobs are ignored entirely; their sources stay untouched.
pub fn cleanup(report: &ExportReport, mode: CleanupMode) -> CleanupResult {
    let mut result = CleanupResult::default();
    for job in report.succeeded() {
        let outcome = cleanup_clip(job);
        match &outcome {
            ClipOutcome::Deleted { files_removed } => tracing::info!(
                "Removed {} source files of {}",
                files_removed,
                job.clip.clip_id
            ),
            ClipOutcome::AlreadyClean => {
                tracing::debug!("Sources of {} already clean", job.clip.clip_id)
            }
            ClipOutcome::Unverifiable(reason) => tracing::warn!(
                "Keeping sources of {}: {}",
                job.clip.clip_id,
                reason
            ),
            ClipOutcome::Failed(e) => {
                tracing::error!("Cleanup of {} failed: {}", job.clip.clip_id, e)
            }
        }
        result.outcomes.push((job.clip.clone(), outcome));
    }
    tracing::info!(
        "Cleanup ({:?}): {} cleaned, {} unverifiable, {} failed",
        mode,
        result.deleted_count(),
        result.unverifiable_count(),
        result.failed_count()
    );
    result
}

/// Reconstruct a report for `CleanupOnly` mode from clips whose expected
/// output already exists in `output_dir`.
///
/// Clips with no matching output are left out; a later export can still pick
/// them up. Summary fields of the synthesized containers reflect only what a
/// stat call can tell.
pub fn report_from_existing(
    clips: Vec<Clip>,
    output_dir: &Path,
    names: &GameNames,
) -> Result<ExportReport, CleanupError> {
    if !output_dir.is_dir() {
        return Err(CleanupError::OutputDirMissing(output_dir.to_path_buf()));
    }
    let mut jobs = Vec::new();
    for clip in clips {
        let stem = output_stem(&names.resolve(&clip.game_id), clip.captured_at);
        let Some(output_path) = existing_output(output_dir, &stem, "mp4") else {
            tracing::debug!("No exported file for {}, skipping", clip.clip_id);
            continue;
        };
        let output_len = fs::metadata(&output_path).map(|m| m.len()).unwrap_or(0);
        jobs.push(ExportJob {
            clip,
            state: JobState::Succeeded(AssembledContainer {
                output_path: output_path.clone(),
                total_duration: 0.0,
                segment_count: 0,
                track_count: 0,
                output_len,
            }),
            output_path,
        });
    }
    Ok(ExportReport { jobs })
}

fn cleanup_clip(job: &ExportJob) -> ClipOutcome {
    match fs::metadata(&job.output_path) {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => {
            return ClipOutcome::Unverifiable(format!(
                "output file is empty: {:?}",
                job.output_path
            ));
        }
        Err(_) => {
            return ClipOutcome::Unverifiable(format!(
                "output file is missing: {:?}",
                job.output_path
            ));
        }
    }

    match remove_sources(&job.clip) {
        Ok(0) => ClipOutcome::AlreadyClean,
        Ok(n) => ClipOutcome::Deleted { files_removed: n },
        Err(e) => ClipOutcome::Failed(e.to_string()),
    }
}

/// Delete the manifest and every `.m4s` under the segment directory, then
/// prune directories that this left empty, up to and including the clip
/// folder.
fn remove_sources(clip: &Clip) -> std::io::Result<usize> {
    let mut removed = 0;
    removed += remove_if_present(&clip.manifest_path)?;

    if clip.segment_dir.is_dir() {
        for entry in fs::read_dir(&clip.segment_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "m4s") {
                removed += remove_if_present(&path)?;
            }
        }
    }

    // Walk upward from the segment directory; stop at the first non-empty
    // level or once the clip folder itself is gone.
    let mut dir = clip.segment_dir.clone();
    loop {
        if dir.is_dir() && dir_is_empty(&dir)? {
            fs::remove_dir(&dir)?;
        }
        if dir == clip.clip_dir {
            break;
        }
        match dir.parent() {
            Some(parent) if parent.starts_with(&clip.clip_dir) => {
                dir = parent.to_path_buf();
            }
            _ => break,
        }
    }
    Ok(removed)
}

fn remove_if_present(path: &Path) -> std::io::Result<usize> {
    match fs::remove_file(path) {
        Ok(()) => Ok(1),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

fn dir_is_empty(dir: &Path) -> std::io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}
