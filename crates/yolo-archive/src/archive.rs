//! Extracted, read-only views over dataset zips.

use std::fs::File;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{ArchiveError, Result};
use crate::manifest::{label_dir_for, DatasetManifest, Split, MANIFEST_FILE};

/// One archive extracted into a private temporary directory.
///
/// The directory is removed when the handle is dropped.
pub struct ArchiveHandle {
    source: PathBuf,
    root: PathBuf,
    manifest: DatasetManifest,
    prefix: String,
    dir: TempDir,
}

impl ArchiveHandle {
    pub fn open(path: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("yolo-archive-").tempdir()?;

        let file = File::open(path)?;
        let mut zip = ZipArchive::new(file)?;
        // `extract` refuses entries whose names escape the target directory.
        zip.extract(dir.path())?;

        let manifest_path =
            find_manifest(dir.path())?.ok_or_else(|| ArchiveError::MissingManifest(path.to_path_buf()))?;
        let manifest = DatasetManifest::from_path(&manifest_path)?;
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.path().to_path_buf());
        let prefix = path_prefix(dir.path());

        debug!(archive = %path.display(), extracted = %dir.path().display(), %prefix, classes = manifest.nc(), "archive extracted");

        Ok(Self {
            source: path.to_path_buf(),
            root,
            manifest,
            prefix,
            dir,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Directory holding the archive's `data.yaml`; split paths resolve against it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extraction_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn manifest(&self) -> &DatasetManifest {
        &self.manifest
    }

    /// Collision-safe file name prefix unique to this extraction.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn image_dir(&self, split: Split) -> Option<PathBuf> {
        self.manifest.image_dir(split).map(|d| self.root.join(d))
    }

    pub fn label_dir(&self, split: Split) -> Option<PathBuf> {
        self.manifest
            .image_dir(split)
            .map(|d| self.root.join(label_dir_for(&d)))
    }
}

/// Shallowest `data.yaml` under `root`.
fn find_manifest(root: &Path) -> Result<Option<PathBuf>> {
    let mut best: Option<(usize, PathBuf)> = None;
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
            continue;
        }
        if best.as_ref().map_or(true, |(depth, _)| entry.depth() < *depth) {
            best = Some((entry.depth(), entry.into_path()));
        }
    }
    Ok(best.map(|(_, p)| p))
}

fn path_prefix(dir: &Path) -> String {
    let digest = blake3::hash(dir.to_string_lossy().as_bytes());
    hex::encode(&digest.as_bytes()[..6])
}
