//! YOLO dataset archives
//!
//! Validation, class remapping and merging of zip-packaged YOLO object
//! detection datasets.

mod annotation;
mod archive;
mod error;
mod manifest;
mod merger;
mod remap;
mod validator;

pub use annotation::{is_image_path, AnnotationRecord, LineError, IMAGE_EXTENSIONS};
pub use archive::ArchiveHandle;
pub use error::{ArchiveError, Result};
pub use manifest::{label_dir_for, normalize_relative, DatasetManifest, ManifestError, Split, CLASSES_FILE, MANIFEST_FILE};
pub use merger::{merge, merge_with, try_merge, MergeOptions, MergeOutcome, UnifiedDataset};
pub use remap::{index_to_name, name_to_index, remap, ClassMapping, RemapError};
pub use validator::{check_archive, check_reader, validate, SplitReport, ValidationError, ValidationReport};
