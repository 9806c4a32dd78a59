#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub fn write_zip(dir: &Path, name: &str, entries: &[(String, String)]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (entry, body) in entries {
        zip.start_file(entry.as_str(), options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// Builder for a conventional `images/<split>` + `labels/<split>` archive.
pub struct Dataset {
    classes: Vec<String>,
    splits: Vec<&'static str>,
    entries: Vec<(String, String)>,
    manifest: bool,
}

impl Dataset {
    pub fn new(classes: &[&str]) -> Self {
        Self {
            classes: classes.iter().map(|c| c.to_string()).collect(),
            splits: vec!["train", "val"],
            entries: Vec::new(),
            manifest: true,
        }
    }

    pub fn with_test_split(mut self) -> Self {
        self.splits.push("test");
        self
    }

    pub fn without_manifest(mut self) -> Self {
        self.manifest = false;
        self
    }

    /// Adds `images/<split>/<stem>.jpg` and, when given, its label file.
    pub fn sample(mut self, split: &str, stem: &str, label: Option<&str>) -> Self {
        self.entries
            .push((format!("images/{split}/{stem}.jpg"), "jpeg-bytes".to_string()));
        if let Some(label) = label {
            self.entries
                .push((format!("labels/{split}/{stem}.txt"), label.to_string()));
        }
        self
    }

    pub fn raw(mut self, entry: &str, body: &str) -> Self {
        self.entries.push((entry.to_string(), body.to_string()));
        self
    }

    pub fn write(self, dir: &Path, name: &str) -> PathBuf {
        let mut entries = Vec::new();
        if self.manifest {
            let mut yaml = String::new();
            for split in &self.splits {
                yaml.push_str(&format!("{split}: images/{split}\n"));
            }
            let names: Vec<String> = self.classes.iter().map(|c| format!("'{c}'")).collect();
            yaml.push_str(&format!("nc: {}\nnames: [{}]\n", self.classes.len(), names.join(", ")));
            entries.push(("data.yaml".to_string(), yaml));
        }
        entries.extend(self.entries);
        write_zip(dir, name, &entries)
    }
}
