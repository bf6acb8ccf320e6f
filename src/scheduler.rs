//! Batch export scheduling.
//!
//! Runs parse → resolve → assemble for many clips across a bounded pool of
//! worker threads. Output paths are assigned sequentially before any worker
//! starts, so the set of outcomes is a pure function of the input clips and
//! the on-disk state, whatever the worker interleaving. Workers send terminal
//! jobs back over an mpsc channel; nothing mutable is shared between them
//! beyond the claim counter.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use clipforge_media::{
    assemble, resolve, AssembleError, AssembleOptions, AssembledContainer, ParseError,
    ResolveError, ResolveOptions, SegmentManifest,
};

use crate::catalog::Clip;
use crate::names::{output_stem, GameNames};

/// Why a job ended in `Failed`.
#[derive(Debug)]
pub enum FailReason {
    Parse(ParseError),
    Resolve(ResolveError),
    Assemble(AssembleError),
    /// The run was cancelled before this job started.
    Cancelled,
    /// The per-job time limit elapsed.
    Timeout,
}

impl FailReason {
    /// Stable short name for reports and filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Resolve(_) => "resolve",
            Self::Assemble(_) => "assemble",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::Resolve(e) => write!(f, "{e}"),
            Self::Assemble(e) => write!(f, "{e}"),
            Self::Cancelled => write!(f, "cancelled before start"),
            Self::Timeout => write!(f, "per-job time limit exceeded"),
        }
    }
}

/// Lifecycle of one export job. Terminal states are never left.
#[derive(Debug)]
pub enum JobState {
    Pending,
    Running,
    Succeeded(AssembledContainer),
    Failed(FailReason),
}

impl JobState {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One clip bound to one output path for one run.
#[derive(Debug)]
pub struct ExportJob {
    pub clip: Clip,
    pub output_path: PathBuf,
    pub state: JobState,
}

/// Terminal job states of one scheduler run, in input clip order.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub jobs: Vec<ExportJob>,
}

impl ExportReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ExportJob> {
        self.jobs.iter().filter(|j| j.state.is_succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExportJob> {
        self.jobs.iter().filter(|j| j.state.is_failed())
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }
}

/// Knobs for [`run`].
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Where exported MP4s land. Created if absent; unwritable is run-fatal.
    pub output_dir: PathBuf,
    /// Worker thread count; clamped to the job count.
    pub workers: usize,
    /// Replace existing outputs instead of failing the clip.
    pub overwrite: bool,
    /// Passed through to segment resolution.
    pub size_tolerance: u64,
    /// Per-job time limit; `None` disables it.
    pub job_timeout: Option<Duration>,
    /// Checked between clips; set by the caller to stop the run early.
    pub cancel: Arc<AtomicBool>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            workers: 1,
            overwrite: false,
            size_tolerance: 0,
            job_timeout: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Export every clip, isolating per-clip failures.
///
/// The only fatal error is an output directory that cannot be created;
/// everything after that lands in the report.
pub fn run(clips: Vec<Clip>, names: &GameNames, options: &ExportOptions) -> Result<ExportReport> {
    fs::create_dir_all(&options.output_dir).with_context(|| {
        format!(
            "Cannot create output directory: {:?}",
            options.output_dir
        )
    })?;

    let jobs = prepare_jobs(clips, names, options);
    let total = jobs.len();
    if total == 0 {
        return Ok(ExportReport::default());
    }

    let workers = options.workers.clamp(1, total);
    tracing::info!("Exporting {} clips with {} workers", total, workers);

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, ExportJob)>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let jobs = &jobs;
            let next = &next;
            scope.spawn(move || worker_loop(jobs, next, &tx, options));
        }
        drop(tx);

        let mut finished: Vec<(usize, ExportJob)> = rx.iter().collect();
        finished.sort_by_key(|(i, _)| *i);
        let report = ExportReport {
            jobs: finished.into_iter().map(|(_, job)| job).collect(),
        };
        tracing::info!(
            "Export run finished: {} succeeded, {} failed",
            report.succeeded_count(),
            report.failed_count()
        );
        Ok(report)
    })
}

/// A job plus everything a worker needs to run it, fixed before distribution.
struct PreparedJob {
    clip: Clip,
    output_path: PathBuf,
}

/// Assign output paths in clip order.
///
/// Name lookups and uniquification happen here, sequentially, so two clips of
/// the same game and second never race for a file name.
fn prepare_jobs(clips: Vec<Clip>, names: &GameNames, options: &ExportOptions) -> Vec<PreparedJob> {
    let mut taken: HashSet<PathBuf> = HashSet::new();
    let mut jobs = Vec::with_capacity(clips.len());
    for clip in clips {
        let stem = output_stem(&names.resolve(&clip.game_id), clip.captured_at);
        let mut candidate = options.output_dir.join(format!("{stem}.mp4"));
        let mut counter = 1;
        while taken.contains(&candidate) || (!options.overwrite && candidate.exists()) {
            candidate = options.output_dir.join(format!("{stem}_{counter}.mp4"));
            counter += 1;
        }
        taken.insert(candidate.clone());
        jobs.push(PreparedJob {
            clip,
            output_path: candidate,
        });
    }
    jobs
}

fn worker_loop(
    jobs: &[PreparedJob],
    next: &AtomicUsize,
    tx: &mpsc::Sender<(usize, ExportJob)>,
    options: &ExportOptions,
) {
    loop {
        let idx = next.fetch_add(1, Ordering::SeqCst);
        let Some(prepared) = jobs.get(idx) else {
            return;
        };
        let state = if options.cancel.load(Ordering::SeqCst) {
            tracing::debug!("Skipping {} after cancellation", prepared.clip.clip_id);
            JobState::Failed(FailReason::Cancelled)
        } else {
            export_clip(prepared, options)
        };
        match &state {
            JobState::Succeeded(container) => tracing::info!(
                "Exported {} -> {:?} ({:.1}s, {} segments)",
                prepared.clip.clip_id,
                container.output_path,
                container.total_duration,
                container.segment_count
            ),
            JobState::Failed(reason) => tracing::warn!(
                "Export of {} failed ({}): {}",
                prepared.clip.clip_id,
                reason.kind(),
                reason
            ),
            _ => {}
        }
        let job = ExportJob {
            clip: prepared.clip.clone(),
            output_path: prepared.output_path.clone(),
            state,
        };
        if tx.send((idx, job)).is_err() {
            return;
        }
    }
}

/// Parse → resolve → assemble for one clip. Never panics; every failure maps
/// to a terminal state.
fn export_clip(prepared: &PreparedJob, options: &ExportOptions) -> JobState {
    let clip = &prepared.clip;
    let deadline = options.job_timeout.map(|t| Instant::now() + t);

    let xml = match fs::read_to_string(&clip.manifest_path) {
        Ok(xml) => xml,
        Err(e) => return JobState::Failed(FailReason::Resolve(ResolveError::Io(e))),
    };
    let manifest = match SegmentManifest::parse(&xml) {
        Ok(m) => m,
        Err(e) => return JobState::Failed(FailReason::Parse(e)),
    };

    let resolve_options = ResolveOptions {
        size_tolerance: options.size_tolerance,
    };
    let resolved = match resolve(&manifest, &clip.segment_dir, &resolve_options) {
        Ok(r) => r,
        Err(e) => return JobState::Failed(FailReason::Resolve(e)),
    };

    let assemble_options = AssembleOptions {
        overwrite: options.overwrite,
        deadline,
    };
    match assemble(&resolved, &prepared.output_path, &assemble_options) {
        Ok(container) => JobState::Succeeded(container),
        Err(AssembleError::DeadlineExceeded) => JobState::Failed(FailReason::Timeout),
        Err(e) => JobState::Failed(FailReason::Assemble(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steam::MediaType;
    use std::path::Path;

    fn offline_names(dir: &Path) -> GameNames {
        GameNames::load(&dir.join("names.json"), true)
    }

    fn fake_clip(dir: &Path, id: &str) -> Clip {
        Clip {
            clip_id: id.to_owned(),
            game_id: "570".to_owned(),
            steam_id: "1001".to_owned(),
            media_type: MediaType::Manual,
            captured_at: None,
            manifest_path: dir.join(id).join("session.mpd"),
            segment_dir: dir.join(id),
            clip_dir: dir.join(id),
        }
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let names = offline_names(dir.path());
        let options = ExportOptions {
            output_dir: dir.path().join("out"),
            ..ExportOptions::default()
        };
        let report = run(Vec::new(), &names, &options).unwrap();
        assert!(report.jobs.is_empty());
        // The output directory is still created up front.
        assert!(dir.path().join("out").is_dir());
    }

    #[test]
    fn missing_manifest_fails_the_job_only() {
        let dir = tempfile::tempdir().unwrap();
        let names = offline_names(dir.path());
        let options = ExportOptions {
            output_dir: dir.path().join("out"),
            workers: 2,
            ..ExportOptions::default()
        };
        let clips = vec![fake_clip(dir.path(), "a"), fake_clip(dir.path(), "b")];
        let report = run(clips, &names, &options).unwrap();
        assert_eq!(report.jobs.len(), 2);
        assert_eq!(report.failed_count(), 2);
        for job in &report.jobs {
            assert!(matches!(
                job.state,
                JobState::Failed(FailReason::Resolve(ResolveError::Io(_)))
            ));
        }
    }

    #[test]
    fn cancellation_marks_unstarted_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let names = offline_names(dir.path());
        let cancel = Arc::new(AtomicBool::new(true));
        let options = ExportOptions {
            output_dir: dir.path().join("out"),
            cancel: Arc::clone(&cancel),
            ..ExportOptions::default()
        };
        let clips = vec![fake_clip(dir.path(), "a"), fake_clip(dir.path(), "b")];
        let report = run(clips, &names, &options).unwrap();
        assert_eq!(report.failed_count(), 2);
        for job in &report.jobs {
            assert!(matches!(job.state, JobState::Failed(FailReason::Cancelled)));
        }
    }

    #[test]
    fn duplicate_stems_get_distinct_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let names = offline_names(dir.path());
        let options = ExportOptions {
            output_dir: dir.path().join("out"),
            ..ExportOptions::default()
        };
        // Same game, no capture time: identical stems.
        let clips = vec![fake_clip(dir.path(), "a"), fake_clip(dir.path(), "b")];
        let jobs = prepare_jobs(clips, &names, &options);
        assert_ne!(jobs[0].output_path, jobs[1].output_path);
    }
}
