use chrono::NaiveDateTime;
use img_parts::Bytes;
use serde::Serialize;

use crate::error::MetadataError;

/// Identity of one insertion into a collection. Never reused, so a result
/// computed for an entry that has since been removed (or removed and re-added
/// under the same name) can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) u64);

/// Rewritten photo bytes, or why they could not be produced.
#[derive(Debug, Clone, Default)]
pub enum Artifact {
    #[default]
    Absent,
    Ready(Bytes),
    Failed(MetadataError),
}

/// Lifecycle position of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryState {
    /// Content is still being read.
    Added,
    /// Content loaded, no base date yet.
    TimestampPending,
    TimestampAssigned,
    ArtifactReady,
    /// The photo could not be parsed; no artifact will be produced.
    Malformed,
}

#[derive(Debug, Clone)]
pub struct PhotoEntry {
    pub(crate) id: EntryId,
    pub(crate) name: String,
    pub(crate) position: usize,
    /// Raw photo bytes (None while the read is in flight)
    pub(crate) content: Option<Bytes>,
    /// Assigned capture date
    pub(crate) timestamp: Option<NaiveDateTime>,
    pub(crate) artifact: Artifact,
}

impl PhotoEntry {
    pub(crate) fn new(id: EntryId, name: String, content: Option<Bytes>) -> Self {
        Self {
            id,
            name,
            position: 0,
            content,
            timestamp: None,
            artifact: Artifact::Absent,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn error(&self) -> Option<&MetadataError> {
        match &self.artifact {
            Artifact::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn state(&self) -> EntryState {
        match (&self.artifact, &self.content, &self.timestamp) {
            (Artifact::Failed(_), _, _) => EntryState::Malformed,
            (Artifact::Ready(_), _, _) => EntryState::ArtifactReady,
            (_, None, _) => EntryState::Added,
            (_, _, None) => EntryState::TimestampPending,
            _ => EntryState::TimestampAssigned,
        }
    }

    /// Whether a render job should be scheduled for this entry.
    pub(crate) fn needs_render(&self) -> bool {
        matches!(self.artifact, Artifact::Absent) && self.content.is_some() && self.timestamp.is_some()
    }
}
