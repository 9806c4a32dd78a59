use std::path::PathBuf;

use thiserror::Error;

use crate::manifest::{ManifestError, MANIFEST_FILE};
use crate::remap::RemapError;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("no {} found in archive {}", MANIFEST_FILE, .0.display())]
    MissingManifest(PathBuf),

    /// The merge's own class bookkeeping is inconsistent with a label file.
    #[error("label mapping defect in {path}: {source}")]
    Remap {
        path: String,
        #[source]
        source: RemapError,
    },

    #[error("output directory already exists and is not empty: {}", .0.display())]
    OutputExists(PathBuf),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
