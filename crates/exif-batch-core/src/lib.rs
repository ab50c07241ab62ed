pub mod cancel;
pub mod collection;
pub mod date;
pub mod error;
pub mod media;
pub mod metadata;
pub mod source;
pub mod writer;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::NaiveDateTime;
use img_parts::Bytes;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use cancel::CancellationToken;
pub use collection::{Download, PhotoCollection, PhotoSource};
pub use error::{CancelledError, CollectionError, MetadataError};
pub use media::{Artifact, EntryState, PhotoEntry};

use collection::{RewriteJob, RewriteOutcome};

fn default_set_mtime() -> bool {
    true
}

/// Move the entry at position `from` to position `to` (both zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

impl FromStr for Move {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once(':')
            .ok_or_else(|| format!("expected FROM:TO, got '{}'", s))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| format!("'{}' is not a position", part))
        };
        Ok(Move {
            from: parse(from)?,
            to: parse(to)?,
        })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.from, self.to)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOptions {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub base_date: NaiveDateTime,
    #[serde(default)]
    pub reverse: bool,
    /// Names to drop from the selection, applied before any reordering.
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub moves: Vec<Move>,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_set_mtime")]
    pub set_mtime: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Final state of one photo.
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub name: String,
    pub position: usize,
    /// Capture date found in the input before rewriting
    pub previous_date: Option<NaiveDateTime>,
    pub timestamp: Option<NaiveDateTime>,
    pub state: EntryState,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessResult {
    pub total_photos: u64,
    pub rendered: u64,
    pub failed: u64,
    pub files_written: u64,
    pub dry_run: bool,
    pub warnings: Vec<String>,
    pub entries: Vec<EntryReport>,
}

/// Control options for process execution.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn check(&self) -> Result<(), CancelledError> {
        match &self.cancel_token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }
}

/// Progress callback: `(stage, current, total, message)`.
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Rate limiter in front of a [`ProgressCallback`]. Parallel stages call
/// `report` once per photo; the callback sees a call every 200ms at most,
/// plus the final one of each stage.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        let start = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        Self {
            inner,
            last_emit: Mutex::new(start),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(PoisonError::into_inner);
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run the whole batch with progress reporting.
pub fn process(options: &BatchOptions, progress_callback: &ProgressCallback) -> anyhow::Result<ProcessResult> {
    process_with_control(options, &ProcessControl::default(), progress_callback)
}

/// Run the whole batch: scan, read, arrange, render, write.
pub fn process_with_control(
    options: &BatchOptions,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<ProcessResult> {
    let tp = ThrottledProgress::new(progress_callback);
    control.check()?;

    // Stage 1: Scan inputs
    let paths = source::collect_inputs(&options.inputs)?;
    let total = paths.len() as u64;
    tp.report("scan", total, total, "Inputs scanned");
    info!(photos = total, "scanned inputs");

    if paths.is_empty() {
        return Ok(ProcessResult {
            dry_run: options.dry_run,
            ..ProcessResult::default()
        });
    }

    let mut warnings = Vec::new();
    let mut collection = PhotoCollection::new();
    let mut by_name: HashMap<String, PathBuf> = HashMap::with_capacity(paths.len());
    let mut names = Vec::with_capacity(paths.len());
    for path in paths {
        let name = source::display_name(&path);
        by_name.entry(name.clone()).or_insert(path);
        names.push(name);
    }

    let added = collection.add_pending(names);
    for name in &added.duplicates {
        warnings.push(format!("{}: duplicate name, skipped", name));
    }

    control.check()?;

    // Stage 2: Read contents in parallel
    let read_total = added.tickets.len() as u64;
    let counter = AtomicU64::new(0);
    let reads: Vec<_> = added
        .tickets
        .par_iter()
        .map(|ticket| {
            let result = by_name
                .get(ticket.name())
                .context("missing path")
                .and_then(|path| {
                    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
                })
                .map(|data| {
                    let bytes = Bytes::from(data);
                    let previous = metadata::read_capture_date(bytes.clone());
                    (bytes, previous)
                });
            let current = counter.fetch_add(1, Ordering::Relaxed);
            tp.report("read", current, read_total, "Reading photos");
            (ticket, result)
        })
        .collect();

    let mut previous_dates: HashMap<String, NaiveDateTime> = HashMap::new();
    for (ticket, result) in reads {
        match result {
            Ok((bytes, previous)) => {
                if let Some(previous) = previous {
                    previous_dates.insert(ticket.name().to_string(), previous);
                }
                collection.fill_content(ticket, bytes);
            }
            Err(e) => {
                warn!(name = ticket.name(), error = %e, "dropping unreadable photo");
                warnings.push(format!("{}: {:#}", ticket.name(), e));
                collection.remove_photo(ticket.name());
            }
        }
    }

    control.check()?;

    // Stage 3: Arrange and assign
    for name in &options.remove {
        if !collection.remove_photo(name) {
            warnings.push(format!("{}: not selected, nothing to remove", name));
        }
    }
    if options.reverse {
        collection.reverse_order();
    }
    for mv in &options.moves {
        collection
            .reorder(mv.from, mv.to)
            .with_context(|| format!("cannot apply move {}", mv))?;
    }
    collection.set_base_date(Some(options.base_date));
    info!(photos = collection.len(), base = %options.base_date, "timestamps assigned");

    control.check()?;

    // Stage 4: Render artifacts
    let jobs = collection.pending_jobs();
    let render_total = jobs.len() as u64;
    let counter = AtomicU64::new(0);
    let outcomes: Vec<RewriteOutcome> = jobs
        .into_par_iter()
        .map(|job: RewriteJob| {
            debug!(name = job.name(), "rewriting metadata");
            let outcome = job.run();
            let current = counter.fetch_add(1, Ordering::Relaxed);
            tp.report("render", current, render_total, "Rewriting metadata");
            outcome
        })
        .collect();
    for outcome in outcomes {
        collection.apply(outcome);
    }

    let mut rendered = 0u64;
    let mut failed = 0u64;
    for entry in collection.entries() {
        match entry.artifact() {
            Artifact::Ready(_) => rendered += 1,
            Artifact::Failed(e) => {
                failed += 1;
                warnings.push(format!("{}: {}", entry.name(), e));
            }
            Artifact::Absent => {}
        }
    }

    control.check()?;

    // Stage 5: Write output
    let mut outputs: HashMap<String, PathBuf> = HashMap::new();
    let mut files_written = 0;
    if options.dry_run {
        info!("dry run, nothing written");
    } else {
        let downloads = collection.downloads();
        let write_result = writer::write_output(
            &downloads,
            &options.output,
            options.force,
            options.set_mtime,
            &tp,
            control.cancel_token.as_ref(),
        )?;
        files_written = write_result.files_written;
        for (download, dest) in downloads.iter().zip(write_result.assignments) {
            outputs.insert(download.name.to_string(), dest);
        }
        info!(files = files_written, output = %options.output.display(), "output written");
    }

    let entries = collection
        .entries()
        .iter()
        .map(|entry| EntryReport {
            name: entry.name().to_string(),
            position: entry.position(),
            previous_date: previous_dates.get(entry.name()).copied(),
            timestamp: entry.timestamp(),
            state: entry.state(),
            output: outputs.remove(entry.name()),
            error: entry.error().map(|e| e.to_string()),
        })
        .collect();

    Ok(ProcessResult {
        total_photos: collection.len() as u64,
        rendered,
        failed,
        files_written,
        dry_run: options.dry_run,
        warnings,
        entries,
    })
}
