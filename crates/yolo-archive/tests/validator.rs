mod common;

use std::io::Cursor;

use common::{write_zip, Dataset};
use yolo_archive::{check_archive, check_reader, validate, LineError, ManifestError, Split, ValidationError};

const OK: &str = "0 0.5 0.5 0.25 0.25\n1 0.1 0.9 0.05 0.1\n";

fn two_class() -> Dataset {
    Dataset::new(&["car", "bus"])
        .sample("train", "a", Some(OK))
        .sample("train", "b", Some("1 0 0 1 1"))
        .sample("val", "c", Some(OK))
}

#[test]
fn well_formed_archive_passes() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class().write(dir.path(), "ok.zip");

    assert!(validate(&path));

    let report = check_archive(&path).unwrap();
    assert_eq!(report.classes, 2);
    assert_eq!(report.images(), 3);
    assert_eq!(report.split(Split::Train).unwrap().annotations, 3);
    assert!(report.split(Split::Test).is_none());
}

#[test]
fn missing_manifest_fails_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class().without_manifest().write(dir.path(), "nomanifest.zip");

    assert!(!validate(&path));
    assert!(matches!(check_archive(&path), Err(ValidationError::MissingManifest)));
}

#[test]
fn width_out_of_bounds_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class()
        .sample("train", "bad", Some("0 0.5 0.5 1.5 1.0"))
        .write(dir.path(), "bad.zip");

    assert!(!validate(&path));
    match check_archive(&path) {
        Err(ValidationError::Annotation { file, line, source }) => {
            assert_eq!(file, "labels/train/bad.txt");
            assert_eq!(line, 1);
            assert_eq!(source, LineError::GeometryRange(1.5));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn four_token_line_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class()
        .sample("val", "short", Some("0 0.5 0.5 0.5 0.5\n0 0.5 0.5 1.0\n"))
        .write(dir.path(), "short.zip");

    assert!(!validate(&path));
    assert!(matches!(
        check_archive(&path),
        Err(ValidationError::Annotation { line: 2, source: LineError::FieldCount(4), .. })
    ));
}

#[test]
fn class_index_beyond_declared_classes_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class()
        .sample("train", "range", Some("2 0.5 0.5 0.5 0.5"))
        .write(dir.path(), "range.zip");

    assert!(!validate(&path));
}

#[test]
fn missing_label_file_is_only_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class().sample("train", "unlabelled", None).write(dir.path(), "partial.zip");

    assert!(validate(&path));
    let report = check_archive(&path).unwrap();
    assert_eq!(report.missing_labels(), 1);
    assert_eq!(report.split(Split::Train).unwrap().images, 3);
}

#[test]
fn empty_label_file_is_valid() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class().sample("train", "background", Some("")).write(dir.path(), "bg.zip");
    assert!(validate(&path));
}

#[test]
fn declared_split_without_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class().with_test_split().write(dir.path(), "notest.zip");

    assert!(!validate(&path));
    assert!(matches!(
        check_archive(&path),
        Err(ValidationError::MissingImageDir(d)) if d == "images/test"
    ));
}

#[test]
fn label_directory_required() {
    let dir = tempfile::tempdir().unwrap();
    let path = Dataset::new(&["car"])
        .sample("train", "a", Some("0 0.5 0.5 0.5 0.5"))
        .sample("val", "b", None)
        .write(dir.path(), "nolabels.zip");

    assert!(matches!(
        check_archive(&path),
        Err(ValidationError::MissingLabelDir(d)) if d == "labels/val"
    ));
}

#[test]
fn uppercase_extensions_are_images() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_class()
        .raw("images/train/UP.PNG", "png")
        .raw("labels/train/UP.txt", "0 0.5 0.5 9 0.5")
        .write(dir.path(), "upper.zip");

    assert!(!validate(&path));
}

#[test]
fn sibling_directory_layout() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<(String, String)> = [
        ("data.yaml", "train: 'train_images'\nval: 'train_images'\nnames: ['class1', 'class2']\n"),
        ("train_images/image1.jpg", "img"),
        ("train_images/image2.png", "img"),
        ("train_labels/image1.txt", "0 0.5 0.5 0.1 0.1\n"),
        ("train_labels/image2.txt", "1 0.5 0.5 0.1 0.1\n"),
    ]
    .iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect();
    let path = write_zip(dir.path(), "sibling.zip", &entries);

    assert!(validate(&path));
}

#[test]
fn garbage_bytes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.zip");
    std::fs::write(&path, b"definitely not a zip").unwrap();

    assert!(!validate(&path));
    assert!(matches!(check_reader(Cursor::new(b"nope".to_vec())), Err(ValidationError::Zip(_))));
    assert!(!validate(&dir.path().join("absent.zip")));
}

fn manifest_only(dir: &std::path::Path, name: &str, yaml: &str) -> std::path::PathBuf {
    let entries = vec![
        ("data.yaml".to_string(), yaml.to_string()),
        ("images/train/a.jpg".to_string(), "img".to_string()),
        ("labels/train/a.txt".to_string(), "0 0.5 0.5 0.5 0.5\n".to_string()),
        ("train/images/a.jpg".to_string(), "img".to_string()),
        ("train/labels/a.txt".to_string(), "0 0.5 0.5 0.5 0.5\n".to_string()),
    ];
    write_zip(dir, name, &entries)
}

#[test]
fn manifest_escaping_archive_root_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = manifest_only(dir.path(), "parent.zip", "train: ../train/images\nnames: ['car']\n");

    assert!(!validate(&path));
    assert!(matches!(
        check_archive(&path),
        Err(ValidationError::Manifest(ManifestError::ParentPath { split: Split::Train, .. }))
    ));
}

#[test]
fn names_map_with_missing_index_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = manifest_only(dir.path(), "gap.zip", "train: images/train\nnames:\n  0: car\n  2: bus\n");

    assert!(!validate(&path));
    assert!(matches!(
        check_archive(&path),
        Err(ValidationError::Manifest(ManifestError::SparseNames { key: 2, .. }))
    ));
}

#[test]
fn padded_class_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = manifest_only(dir.path(), "padded.zip", "train: images/train\nnames: ['car ']\n");

    assert!(!validate(&path));
    assert!(matches!(
        check_archive(&path),
        Err(ValidationError::Manifest(ManifestError::BadClassName(n))) if n == "car "
    ));
}
