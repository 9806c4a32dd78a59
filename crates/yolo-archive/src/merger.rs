//! Merging independently labelled archives into one training set.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, error, info};

use crate::annotation::is_image_path;
use crate::archive::ArchiveHandle;
use crate::error::{ArchiveError, Result};
use crate::manifest::{DatasetManifest, Split, CLASSES_FILE, MANIFEST_FILE};
use crate::remap::{index_to_name, name_to_index, remap, ClassMapping};

#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Share of train samples moved to test when no archive supplies a test split.
    pub test_percent: u32,
    /// Fixes the test-split sample for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            test_percent: 10,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub success: bool,
    pub classes: BTreeSet<String>,
}

impl MergeOutcome {
    fn failed() -> Self {
        Self {
            success: false,
            classes: BTreeSet::new(),
        }
    }
}

/// A merged dataset on disk.
#[derive(Debug, Clone)]
pub struct UnifiedDataset {
    pub root: PathBuf,
    pub manifest: DatasetManifest,
    pub images: BTreeMap<Split, usize>,
    /// Train samples relocated into the synthesized test split.
    pub moved_to_test: usize,
}

impl UnifiedDataset {
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn classes(&self) -> BTreeSet<String> {
        self.manifest.names.iter().cloned().collect()
    }
}

pub fn merge<P: AsRef<Path>>(archive_paths: &[P], output_dir: &Path) -> MergeOutcome {
    merge_with(archive_paths, output_dir, &MergeOptions::default())
}

/// All-or-nothing merge. Failures are logged and reported as
/// `success == false`; a partially written `output_dir` is left behind.
pub fn merge_with<P: AsRef<Path>>(archive_paths: &[P], output_dir: &Path, options: &MergeOptions) -> MergeOutcome {
    match try_merge(archive_paths, output_dir, options) {
        Ok(dataset) => MergeOutcome {
            success: true,
            classes: dataset.classes(),
        },
        Err(e @ ArchiveError::Remap { .. }) => {
            error!(output = %output_dir.display(), error = ?e, "merge aborted: class bookkeeping is inconsistent");
            MergeOutcome::failed()
        }
        Err(e) => {
            error!(output = %output_dir.display(), archives = archive_paths.len(), error = ?e, "merge failed");
            MergeOutcome::failed()
        }
    }
}

pub fn try_merge<P: AsRef<Path>>(
    archive_paths: &[P],
    output_dir: &Path,
    options: &MergeOptions,
) -> Result<UnifiedDataset> {
    let layout = OutputLayout::create(output_dir)?;
    let mut classes: BTreeSet<String> = BTreeSet::new();

    for path in archive_paths {
        let handle = ArchiveHandle::open(path.as_ref())?;
        let copied = ingest_archive(&handle, &layout)?;
        classes.extend(handle.manifest().names.iter().cloned());
        info!(archive = %handle.source().display(), prefix = handle.prefix(), copied, "archive merged");
    }

    let moved_to_test = if list_images(&layout.images(Split::Test))?.is_empty() {
        synthesize_test_split(&layout, options)?
    } else {
        0
    };

    let names: Vec<String> = classes.into_iter().collect();
    for split in Split::ALL {
        fs::write(layout.labels(split).join(CLASSES_FILE), names.join("\n"))?;
    }

    let to_global = name_to_index(&names);
    for split in Split::ALL {
        reindex_split(&layout.labels(split), &to_global)?;
    }

    let manifest = DatasetManifest {
        train: Some(layout.relative_images(Split::Train)),
        val: Some(layout.relative_images(Split::Val)),
        test: Some(layout.relative_images(Split::Test)),
        names,
    };
    manifest.write_to(&output_dir.join(MANIFEST_FILE))?;

    let mut images = BTreeMap::new();
    for split in Split::ALL {
        images.insert(split, list_images(&layout.images(split))?.len());
    }

    info!(output = %output_dir.display(), classes = manifest.nc(), ?images, moved_to_test, "merged dataset written");

    Ok(UnifiedDataset {
        root: output_dir.to_path_buf(),
        manifest,
        images,
        moved_to_test,
    })
}

/// `images/{train,val,test}` and `labels/{train,val,test}` under one root.
struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    fn create(root: &Path) -> Result<Self> {
        if root.exists() && fs::read_dir(root)?.next().is_some() {
            return Err(ArchiveError::OutputExists(root.to_path_buf()));
        }
        let layout = Self {
            root: root.to_path_buf(),
        };
        for split in Split::ALL {
            fs::create_dir_all(layout.images(split))?;
            fs::create_dir_all(layout.labels(split))?;
        }
        Ok(layout)
    }

    fn images(&self, split: Split) -> PathBuf {
        self.root.join("images").join(split.as_str())
    }

    fn labels(&self, split: Split) -> PathBuf {
        self.root.join("labels").join(split.as_str())
    }

    fn relative_images(&self, split: Split) -> String {
        format!("images/{}", split.as_str())
    }
}

/// Copies one archive's samples into the layout with labels rewritten to
/// class names. Returns the number of images copied.
fn ingest_archive(handle: &ArchiveHandle, layout: &OutputLayout) -> Result<usize> {
    let to_name = index_to_name(&handle.manifest().names);
    let mut copied = 0;

    for split in Split::ALL {
        let (Some(image_dir), Some(label_dir)) = (handle.image_dir(split), handle.label_dir(split)) else {
            continue;
        };
        let images = list_images(&image_dir)?;
        if images.is_empty() {
            continue;
        }

        for image in images {
            let Some(file_name) = image.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            fs::copy(&image, layout.images(split).join(format!("{}_{file_name}", handle.prefix())))?;
            copied += 1;

            let stem = label_stem(&image);
            let label_name = format!("{stem}.txt");
            if label_name == CLASSES_FILE {
                continue;
            }
            let label = label_dir.join(&label_name);
            if label.is_file() {
                let dest = layout.labels(split).join(format!("{}_{label_name}", handle.prefix()));
                remap_file(&label, &dest, &to_name)?;
            }
        }
        debug!(archive = %handle.source().display(), %split, "split copied");
    }

    Ok(copied)
}

/// Moves ceil(`test_percent`% of train) image/label pairs from train to test.
fn synthesize_test_split(layout: &OutputLayout, options: &MergeOptions) -> Result<usize> {
    let mut train = list_images(&layout.images(Split::Train))?;
    let count = test_sample_size(train.len(), options.test_percent);
    if count == 0 {
        return Ok(0);
    }

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    train.shuffle(&mut rng);

    for image in train.iter().take(count) {
        let Some(file_name) = image.file_name() else {
            continue;
        };
        fs::rename(image, layout.images(Split::Test).join(file_name))?;

        let label_name = format!("{}.txt", label_stem(image));
        let label = layout.labels(Split::Train).join(&label_name);
        if label.is_file() {
            fs::rename(&label, layout.labels(Split::Test).join(&label_name))?;
        }
    }

    info!(moved = count, remaining = train.len() - count, "synthesized test split from train");
    Ok(count)
}

pub(crate) fn test_sample_size(train: usize, percent: u32) -> usize {
    if train == 0 {
        return 0;
    }
    let n = (train * percent as usize + 99) / 100;
    n.clamp(1, train)
}

/// Rewrites every label in `dir` from class names to global indices.
fn reindex_split(dir: &Path, to_global: &ClassMapping) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_label = path.extension().is_some_and(|e| e == "txt");
        if !is_label || path.file_name().is_some_and(|n| n == CLASSES_FILE) {
            continue;
        }
        remap_file(&path, &path, to_global)?;
    }
    Ok(())
}

fn remap_file(src: &Path, dest: &Path, mapping: &ClassMapping) -> Result<()> {
    let content = fs::read_to_string(src)?;
    let lines = remap(content.lines(), mapping).map_err(|source| ArchiveError::Remap {
        path: src.display().to_string(),
        source,
    })?;
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    fs::write(dest, out)?;
    Ok(())
}

fn label_stem(image: &Path) -> String {
    image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Image files directly inside `dir`, sorted. A missing directory is empty.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image_path(&path) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
