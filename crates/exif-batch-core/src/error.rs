use thiserror::Error;

/// Failure rewriting one photo. Recorded per entry; siblings are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// Not a JPEG/PNG stream, or its EXIF segment cannot be parsed or re-encoded.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl MetadataError {
    pub(crate) fn malformed(reason: impl std::fmt::Display) -> Self {
        MetadataError::MalformedInput(reason.to_string())
    }
}

impl From<exif::Error> for MetadataError {
    fn from(e: exif::Error) -> Self {
        MetadataError::malformed(format!("EXIF: {}", e))
    }
}

impl From<img_parts::Error> for MetadataError {
    fn from(e: img_parts::Error) -> Self {
        MetadataError::malformed(format!("container: {}", e))
    }
}

/// Contract violation by a caller of the collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error("position {position} is out of range for a collection of {len}")]
    InvalidPosition { position: usize, len: usize },
}

/// The operation was cancelled through a [`crate::CancellationToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Operation cancelled")]
pub struct CancelledError;
