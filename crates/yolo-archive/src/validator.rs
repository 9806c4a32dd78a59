//! Structural checks for YOLO dataset zips.
//!
//! The archive is read in place; nothing is extracted.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::annotation::{is_image_path, AnnotationRecord, LineError};
use crate::manifest::{label_dir_for, DatasetManifest, ManifestError, Split, MANIFEST_FILE};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("cannot open archive: {0}")]
    Open(#[source] std::io::Error),

    #[error("not a readable zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive has no root-level {}", MANIFEST_FILE)]
    MissingManifest,

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("image directory not found in archive: {0}")]
    MissingImageDir(String),

    #[error("label directory not found in archive: {0}")]
    MissingLabelDir(String),

    #[error("cannot read {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: {source}")]
    Annotation {
        file: String,
        line: usize,
        #[source]
        source: LineError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub split: Split,
    pub images: usize,
    pub labels: usize,
    pub missing_labels: usize,
    pub annotations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub classes: usize,
    pub splits: Vec<SplitReport>,
}

impl ValidationReport {
    pub fn images(&self) -> usize {
        self.splits.iter().map(|s| s.images).sum()
    }

    pub fn missing_labels(&self) -> usize {
        self.splits.iter().map(|s| s.missing_labels).sum()
    }

    pub fn split(&self, split: Split) -> Option<&SplitReport> {
        self.splits.iter().find(|s| s.split == split)
    }
}

/// Returns `true` when the archive at `path` is a well-formed YOLO dataset.
///
/// Never fails: every reason for rejection is logged instead.
pub fn validate(path: &Path) -> bool {
    match check_archive(path) {
        Ok(report) => {
            info!(
                archive = %path.display(),
                images = report.images(),
                missing_labels = report.missing_labels(),
                classes = report.classes,
                "YOLO dataset verified"
            );
            true
        }
        Err(e) => {
            error!(archive = %path.display(), error = %e, "YOLO dataset verification failed");
            false
        }
    }
}

pub fn check_archive(path: &Path) -> Result<ValidationReport, ValidationError> {
    let file = File::open(path).map_err(ValidationError::Open)?;
    check_reader(file)
}

pub fn check_reader<R: Read + Seek>(reader: R) -> Result<ValidationReport, ValidationError> {
    let mut zip = ZipArchive::new(reader)?;
    let names: Vec<String> = zip.file_names().map(str::to_owned).collect();
    let name_set: HashSet<&str> = names.iter().map(String::as_str).collect();

    if !name_set.contains(MANIFEST_FILE) {
        return Err(ValidationError::MissingManifest);
    }
    let manifest = DatasetManifest::from_reader(zip.by_name(MANIFEST_FILE)?)?;
    let num_classes = manifest.nc();

    let mut report = ValidationReport {
        classes: num_classes,
        splits: Vec::new(),
    };

    for split in Split::ALL {
        let Some(image_dir) = manifest.image_dir(split) else {
            continue;
        };
        let label_dir = label_dir_for(&image_dir);
        let image_prefix = dir_prefix(&image_dir);
        let label_prefix = dir_prefix(&label_dir);

        if !names.iter().any(|n| n.starts_with(&image_prefix)) {
            return Err(ValidationError::MissingImageDir(image_dir));
        }
        if !names.iter().any(|n| n.starts_with(&label_prefix)) {
            return Err(ValidationError::MissingLabelDir(label_dir));
        }

        let mut sr = SplitReport {
            split,
            images: 0,
            labels: 0,
            missing_labels: 0,
            annotations: 0,
        };

        let images = names
            .iter()
            .filter(|n| n.starts_with(&image_prefix) && is_image_path(Path::new(n.as_str())));
        for image in images {
            sr.images += 1;
            let label = expected_label(&image[image_prefix.len()..], &label_prefix);
            if !name_set.contains(label.as_str()) {
                warn!(%image, "missing label file, continuing without label");
                sr.missing_labels += 1;
                continue;
            }
            sr.annotations += check_label(&mut zip, &label, num_classes)?;
            sr.labels += 1;
        }

        debug!(%split, images = sr.images, labels = sr.labels, "split verified");
        report.splits.push(sr);
    }

    Ok(report)
}

fn dir_prefix(dir: &str) -> String {
    if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    }
}

/// `sub/img.JPG` under `labels/train/` -> `labels/train/sub/img.txt`.
fn expected_label(image_rel: &str, label_prefix: &str) -> String {
    let stem = match image_rel.rfind('.') {
        Some(dot) if !image_rel[dot..].contains('/') => &image_rel[..dot],
        _ => image_rel,
    };
    format!("{label_prefix}{stem}.txt")
}

/// Checks every line of one label member; returns the annotation count.
fn check_label<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    label: &str,
    num_classes: usize,
) -> Result<usize, ValidationError> {
    let mut content = String::new();
    zip.by_name(label)?
        .read_to_string(&mut content)
        .map_err(|source| ValidationError::Read {
            file: label.to_string(),
            source,
        })?;

    let mut count = 0;
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        AnnotationRecord::parse(line, num_classes).map_err(|source| ValidationError::Annotation {
            file: label.to_string(),
            line: i + 1,
            source,
        })?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_path_derivation() {
        assert_eq!(expected_label("a.jpg", "labels/train/"), "labels/train/a.txt");
        assert_eq!(expected_label("sub/b.v2.PNG", "labels/val/"), "labels/val/sub/b.v2.txt");
        assert_eq!(expected_label("x.jpeg", ""), "x.txt");
    }
}
