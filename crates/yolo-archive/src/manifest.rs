//! `data.yaml` dataset descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the descriptor expected at an archive root.
pub const MANIFEST_FILE: &str = "data.yaml";

/// Per-split class list written next to label files. Never a label itself.
pub const CLASSES_FILE: &str = "classes.txt";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error reading manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("manifest has no 'names' key")]
    MissingNames,

    #[error("manifest path for '{split}' must be relative, got '{path}'")]
    AbsolutePath { split: Split, path: String },

    #[error("manifest path for '{split}' must stay inside the archive, got '{path}'")]
    ParentPath { split: Split, path: String },

    #[error("'names' map must be keyed 0..{count} without gaps, found key {key}")]
    SparseNames { count: usize, key: u32 },

    #[error("class name {0:?} is empty or has surrounding whitespace")]
    BadClassName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ultralytics accepts `names` either as a list or as an `{index: name}` map.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawNames {
    List(Vec<String>),
    Map(BTreeMap<u32, String>),
}

#[derive(Deserialize)]
struct RawManifest {
    train: Option<String>,
    val: Option<String>,
    test: Option<String>,
    names: Option<RawNames>,
}

#[derive(Serialize)]
struct ManifestDoc<'a> {
    train: Option<&'a str>,
    val: Option<&'a str>,
    test: Option<&'a str>,
    nc: usize,
    names: &'a [String],
}

/// One dataset descriptor: split directories plus the ordered class list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetManifest {
    pub train: Option<String>,
    pub val: Option<String>,
    pub test: Option<String>,
    pub names: Vec<String>,
}

impl DatasetManifest {
    pub fn from_yaml_str(s: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_yaml::from_str(s)?;
        let names = match raw.names.ok_or(ManifestError::MissingNames)? {
            RawNames::List(v) => v,
            RawNames::Map(m) => {
                let count = m.len();
                if let Some((_, &key)) = m.keys().enumerate().find(|(i, k)| **k as usize != *i) {
                    return Err(ManifestError::SparseNames { count, key });
                }
                m.into_values().collect()
            }
        };
        if let Some(bad) = names.iter().find(|n| n.is_empty() || n.trim() != n.as_str()) {
            return Err(ManifestError::BadClassName(bad.clone()));
        }

        let manifest = Self {
            train: raw.train,
            val: raw.val,
            test: raw.test,
            names,
        };
        for split in Split::ALL {
            if let Some(p) = manifest.split_path(split) {
                if is_absolute(p) {
                    return Err(ManifestError::AbsolutePath { split, path: p.to_string() });
                }
                if p.split(['/', '\\']).any(|seg| seg == "..") {
                    return Err(ManifestError::ParentPath { split, path: p.to_string() });
                }
            }
        }
        Ok(manifest)
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ManifestError> {
        let mut s = String::new();
        reader.read_to_string(&mut s)?;
        Self::from_yaml_str(&s)
    }

    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&s)
    }

    /// Number of declared classes (`nc`).
    pub fn nc(&self) -> usize {
        self.names.len()
    }

    pub fn split_path(&self, split: Split) -> Option<&str> {
        match split {
            Split::Train => self.train.as_deref(),
            Split::Val => self.val.as_deref(),
            Split::Test => self.test.as_deref(),
        }
    }

    /// Normalized image directory for `split`, relative to the archive root.
    pub fn image_dir(&self, split: Split) -> Option<String> {
        self.split_path(split).map(normalize_relative)
    }

    pub fn to_yaml_string(&self) -> Result<String, ManifestError> {
        let doc = ManifestDoc {
            train: self.train.as_deref(),
            val: self.val.as_deref(),
            test: self.test.as_deref(),
            nc: self.nc(),
            names: &self.names,
        };
        Ok(serde_yaml::to_string(&doc)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ManifestError> {
        std::fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }
}

/// Label directory paired with an image directory.
pub fn label_dir_for(image_dir: &str) -> String {
    image_dir.replace("images", "labels")
}

fn is_absolute(p: &str) -> bool {
    p.starts_with('/') || p.starts_with('\\') || Path::new(p).is_absolute()
}

/// Lexically normalizes a manifest path into `a/b/c` form. Empty and `.`
/// segments are dropped; manifests carrying `..` are refused at load.
pub fn normalize_relative(p: &str) -> String {
    p.split(['/', '\\'])
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_names() {
        let m = DatasetManifest::from_yaml_str(
            "train: images/train\nval: images/val\nnames: ['car', 'bus']\n",
        )
        .unwrap();
        assert_eq!(m.nc(), 2);
        assert_eq!(m.split_path(Split::Train), Some("images/train"));
        assert_eq!(m.split_path(Split::Test), None);
    }

    #[test]
    fn parses_map_names_in_index_order() {
        let m = DatasetManifest::from_yaml_str("train: images/train\nnames:\n  1: bus\n  0: car\n").unwrap();
        assert_eq!(m.names, vec!["car".to_string(), "bus".to_string()]);
    }

    #[test]
    fn missing_names_is_an_error() {
        let err = DatasetManifest::from_yaml_str("train: images/train\n").unwrap_err();
        assert!(matches!(err, ManifestError::MissingNames));
    }

    #[test]
    fn absolute_split_path_rejected() {
        let err = DatasetManifest::from_yaml_str("train: /data/images/train\nnames: [a]\n").unwrap_err();
        assert!(matches!(err, ManifestError::AbsolutePath { split: Split::Train, .. }));
    }

    #[test]
    fn normalize_drops_dot_segments() {
        assert_eq!(normalize_relative("./images/train/"), "images/train");
        assert_eq!(normalize_relative("images\\val"), "images/val");
        assert_eq!(normalize_relative("."), "");
    }

    #[test]
    fn parent_segments_rejected() {
        let err = DatasetManifest::from_yaml_str("train: ../train/images
names: [a]
").unwrap_err();
        assert!(matches!(err, ManifestError::ParentPath { split: Split::Train, .. }));
        let err = DatasetManifest::from_yaml_str("train: images/train
val: images/../../val
names: [a]
").unwrap_err();
        assert!(matches!(err, ManifestError::ParentPath { split: Split::Val, .. }));
    }

    #[test]
    fn names_map_with_gap_rejected() {
        let err = DatasetManifest::from_yaml_str("train: images/train
names:
  0: a
  2: b
").unwrap_err();
        assert!(matches!(err, ManifestError::SparseNames { count: 2, key: 2 }));
        let err = DatasetManifest::from_yaml_str("train: images/train
names:
  1: a
").unwrap_err();
        assert!(matches!(err, ManifestError::SparseNames { key: 1, .. }));
    }

    #[test]
    fn padded_or_empty_class_names_rejected() {
        for yaml in ["names: [' car']\n", "names: ['bus ']\n", "names: ['car', '']\n"] {
            let err = DatasetManifest::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, ManifestError::BadClassName(_)), "{yaml}");
        }
        assert!(DatasetManifest::from_yaml_str("names: ['traffic light']\n").is_ok());
    }

    #[test]
    fn label_dir_substitutes_images_segment() {
        assert_eq!(label_dir_for("images/train"), "labels/train");
        assert_eq!(label_dir_for("train_images"), "train_labels");
    }

    #[test]
    fn yaml_output_carries_nc() {
        let m = DatasetManifest {
            train: Some("images/train".into()),
            val: Some("images/val".into()),
            test: Some("images/test".into()),
            names: vec!["bus".into(), "car".into()],
        };
        let back = m.to_yaml_string().unwrap();
        assert!(back.contains("nc: 2"));
        assert_eq!(DatasetManifest::from_yaml_str(&back).unwrap(), m);
    }
}
