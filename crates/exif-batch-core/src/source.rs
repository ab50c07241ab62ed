use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use mime_guess::mime;
use tracing::debug;

/// Whether the file name says JPEG or PNG, the containers the rewriter handles.
pub fn is_supported_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map_or(false, |m| m == mime::IMAGE_JPEG || m == mime::IMAGE_PNG)
}

/// Name an entry is known by: the file name, lossily decoded.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Expand the inputs into an ordered list of photo paths.
///
/// Files are taken as given, in order. A directory contributes its supported
/// images (not recursively), sorted by file name.
pub fn collect_inputs(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut photos = Vec::new();
    for input in inputs {
        let meta = fs::metadata(input).with_context(|| format!("cannot access {}", input.display()))?;
        if !meta.is_dir() {
            photos.push(input.clone());
            continue;
        }

        let mut found: Vec<PathBuf> = fs::read_dir(input)
            .with_context(|| format!("cannot list {}", input.display()))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_supported_image(path))
            .collect();
        found.sort_by_key(|path| display_name(path));
        debug!(dir = %input.display(), count = found.len(), "scanned directory");
        photos.extend(found);
    }
    Ok(photos)
}
