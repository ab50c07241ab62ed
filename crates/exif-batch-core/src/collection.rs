use chrono::NaiveDateTime;
use img_parts::Bytes;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::date;
use crate::error::{CollectionError, MetadataError};
use crate::media::{Artifact, EntryId, PhotoEntry};
use crate::metadata;

/// A selected photo whose bytes are already in memory.
#[derive(Debug, Clone)]
pub struct PhotoSource {
    pub name: String,
    pub content: Bytes,
}

impl PhotoSource {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Handle for a read started by [`PhotoCollection::add_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadTicket {
    id: EntryId,
    name: String,
}

impl ReadTicket {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// What an add call did.
#[derive(Debug, Default)]
pub struct AddReport {
    pub added: Vec<String>,
    /// Names already present in the collection (or repeated in the batch); not inserted.
    pub duplicates: Vec<String>,
    /// One ticket per added entry whose content is still to be read.
    pub tickets: Vec<ReadTicket>,
}

/// Snapshot of the inputs needed to render one artifact. Runs without
/// access to the collection, so it can be moved to a worker thread.
#[derive(Debug, Clone)]
pub struct RewriteJob {
    id: EntryId,
    name: String,
    content: Bytes,
    timestamp: NaiveDateTime,
}

impl RewriteJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(self) -> RewriteOutcome {
        let result = metadata::rewrite(self.content, &self.timestamp);
        RewriteOutcome {
            id: self.id,
            name: self.name,
            timestamp: self.timestamp,
            result,
        }
    }
}

#[derive(Debug)]
pub struct RewriteOutcome {
    id: EntryId,
    name: String,
    timestamp: NaiveDateTime,
    pub result: Result<Bytes, MetadataError>,
}

/// A ready artifact, as handed to whatever saves it.
#[derive(Debug, Clone, Copy)]
pub struct Download<'a> {
    pub name: &'a str,
    pub timestamp: NaiveDateTime,
    pub bytes: &'a Bytes,
}

/// Ordered batch of photos sharing one base date.
///
/// Every mutating method re-derives the timestamps of the whole collection
/// before returning, so `entries()[i].timestamp()` is always
/// `base + i seconds` (or `None` without a base date). Artifacts are rendered
/// separately, see [`PhotoCollection::render`].
#[derive(Debug, Default)]
pub struct PhotoCollection {
    entries: Vec<PhotoEntry>,
    base_date: Option<NaiveDateTime>,
    next_id: u64,
}

impl PhotoCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PhotoEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&PhotoEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn base_date(&self) -> Option<NaiveDateTime> {
        self.base_date
    }

    /// Append photos at the end, in the given order.
    ///
    /// An existing base date is kept and immediately extended to the new
    /// entries. Names already in the collection are skipped.
    pub fn add_photos<I>(&mut self, sources: I) -> AddReport
    where
        I: IntoIterator<Item = PhotoSource>,
    {
        let mut report = AddReport::default();
        for source in sources {
            if self.insert(source.name.clone(), Some(source.content)).is_some() {
                report.added.push(source.name);
            } else {
                report.duplicates.push(source.name);
            }
        }
        self.rederive();
        report
    }

    /// Append photos whose bytes are still being read. Complete each read
    /// with [`PhotoCollection::fill_content`].
    pub fn add_pending<I, S>(&mut self, names: I) -> AddReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut report = AddReport::default();
        for name in names {
            let name = name.into();
            match self.insert(name.clone(), None) {
                Some(id) => {
                    report.tickets.push(ReadTicket {
                        id,
                        name: name.clone(),
                    });
                    report.added.push(name);
                }
                None => report.duplicates.push(name),
            }
        }
        self.rederive();
        report
    }

    fn insert(&mut self, name: String, content: Option<Bytes>) -> Option<EntryId> {
        if self.entry(&name).is_some() {
            warn!(name = %name, "a photo with this name is already selected, skipping");
            return None;
        }
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(PhotoEntry::new(id, name, content));
        Some(id)
    }

    /// Deliver the bytes of a pending read. Returns false (and drops the
    /// bytes) when the entry was removed in the meantime.
    pub fn fill_content(&mut self, ticket: &ReadTicket, content: Bytes) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == ticket.id) else {
            debug!(name = %ticket.name, "discarding read for a removed photo");
            return false;
        };
        if entry.content.is_some() {
            return false;
        }
        entry.content = Some(content);
        true
    }

    /// Remove the photo with this name. Unknown names are ignored.
    pub fn remove_photo(&mut self, name: &str) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.name == name) else {
            return false;
        };
        self.entries.remove(index);
        self.rederive();
        true
    }

    /// Move the entry at `from` to `to`, shifting the ones in between.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), CollectionError> {
        let len = self.entries.len();
        for position in [from, to] {
            if position >= len {
                return Err(CollectionError::InvalidPosition { position, len });
            }
        }
        let moved = self.entries.remove(from);
        self.entries.insert(to, moved);
        self.rederive();
        Ok(())
    }

    pub fn reverse_order(&mut self) {
        self.entries.reverse();
        self.rederive();
    }

    pub fn set_base_date(&mut self, base_date: Option<NaiveDateTime>) {
        self.base_date = base_date;
        self.rederive();
    }

    /// Drop every entry and the base date.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.base_date = None;
    }

    /// Recompute position and timestamp of every entry. A ready artifact
    /// whose timestamp moved is invalidated; a failed one stays failed since
    /// the failure depends on the content alone.
    fn rederive(&mut self) {
        let stamps: Vec<Option<NaiveDateTime>> = match self.base_date {
            Some(base) => date::assign(base, self.entries.len()).into_iter().map(Some).collect(),
            None => vec![None; self.entries.len()],
        };

        for (position, (entry, stamp)) in self.entries.iter_mut().zip(stamps).enumerate() {
            entry.position = position;
            if entry.timestamp != stamp {
                entry.timestamp = stamp;
                if matches!(entry.artifact, Artifact::Ready(_)) {
                    entry.artifact = Artifact::Absent;
                }
            }
        }
    }

    /// Jobs for every entry that has content and a timestamp but no artifact yet.
    pub fn pending_jobs(&self) -> Vec<RewriteJob> {
        self.entries
            .iter()
            .filter(|e| e.needs_render())
            .filter_map(|e| {
                Some(RewriteJob {
                    id: e.id,
                    name: e.name.clone(),
                    content: e.content.clone()?,
                    timestamp: e.timestamp?,
                })
            })
            .collect()
    }

    /// Store a finished job. Results for removed entries, or for entries whose
    /// timestamp changed since the job was taken, are dropped.
    pub fn apply(&mut self, outcome: RewriteOutcome) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == outcome.id) else {
            debug!(name = %outcome.name, "discarding artifact for a removed photo");
            return false;
        };
        if entry.timestamp != Some(outcome.timestamp) {
            debug!(name = %outcome.name, "discarding stale artifact");
            return false;
        }

        entry.artifact = match outcome.result {
            Ok(bytes) => Artifact::Ready(bytes),
            Err(e) => {
                warn!(name = %outcome.name, error = %e, "cannot rewrite photo");
                Artifact::Failed(e)
            }
        };
        true
    }

    /// Render every pending artifact in parallel. Returns how many were stored.
    pub fn render(&mut self) -> usize {
        let outcomes: Vec<RewriteOutcome> = self
            .pending_jobs()
            .into_par_iter()
            .map(RewriteJob::run)
            .collect();

        let mut applied = 0;
        for outcome in outcomes {
            if self.apply(outcome) {
                applied += 1;
            }
        }
        applied
    }

    /// Render one entry on demand and return its artifact.
    pub fn render_entry(&mut self, name: &str) -> Option<&Artifact> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        let entry = &self.entries[index];
        if entry.needs_render() {
            if let (Some(content), Some(timestamp)) = (entry.content.clone(), entry.timestamp) {
                let job = RewriteJob {
                    id: entry.id,
                    name: entry.name.clone(),
                    content,
                    timestamp,
                };
                self.apply(job.run());
            }
        }
        Some(&self.entries[index].artifact)
    }

    /// The rewritten photo for `name`, if it is ready.
    pub fn download(&self, name: &str) -> Option<Download<'_>> {
        self.entry(name).and_then(as_download)
    }

    /// All ready artifacts, in collection order.
    pub fn downloads(&self) -> Vec<Download<'_>> {
        self.entries.iter().filter_map(as_download).collect()
    }
}

fn as_download(entry: &PhotoEntry) -> Option<Download<'_>> {
    match (&entry.artifact, entry.timestamp) {
        (Artifact::Ready(bytes), Some(timestamp)) => Some(Download {
            name: &entry.name,
            timestamp,
            bytes,
        }),
        _ => None,
    }
}
