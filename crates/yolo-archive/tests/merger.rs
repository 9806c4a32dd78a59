mod common;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use common::Dataset;
use yolo_archive::{merge, merge_with, try_merge, ArchiveError, DatasetManifest, MergeOptions, Split};

fn set(v: &[&str]) -> BTreeSet<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn files(dir: &Path, ext: &str) -> Vec<String> {
    let mut out: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(ext) && n != "classes.txt")
        .collect();
    out.sort();
    out
}

fn label_for(dir: &Path, suffix: &str) -> String {
    let name = files(dir, ".txt")
        .into_iter()
        .find(|n| n.ends_with(suffix))
        .unwrap_or_else(|| panic!("no label ending in {suffix} under {}", dir.display()));
    fs::read_to_string(dir.join(name)).unwrap()
}

#[test]
fn shared_class_resolves_to_one_global_index() {
    let dir = tempfile::tempdir().unwrap();
    let a = Dataset::new(&["car", "bus"])
        .with_test_split()
        .sample("train", "a_bus", Some("1 0.1 0.2 0.3 0.4\n"))
        .sample("val", "a_car", Some("0 0.5 0.5 0.5 0.5\n"))
        .sample("test", "a_t", Some("0 0.5 0.5 0.5 0.5\n"))
        .write(dir.path(), "a.zip");
    let b = Dataset::new(&["bus", "truck"])
        .sample("train", "b_bus", Some("0 0.6 0.7 0.8 0.9\n"))
        .sample("val", "b_truck", Some("1 0.5 0.5 0.5 0.5\n"))
        .write(dir.path(), "b.zip");
    let out = dir.path().join("merged");

    let outcome = merge(&[a, b], &out);

    assert!(outcome.success);
    assert_eq!(outcome.classes, set(&["car", "bus", "truck"]));

    let manifest = DatasetManifest::from_path(&out.join("data.yaml")).unwrap();
    assert_eq!(manifest.names, vec!["bus", "car", "truck"]);
    assert_eq!(manifest.train.as_deref(), Some("images/train"));
    assert_eq!(manifest.test.as_deref(), Some("images/test"));

    let labels = out.join("labels/train");
    assert_eq!(label_for(&labels, "_a_bus.txt"), "0 0.1 0.2 0.3 0.4\n");
    assert_eq!(label_for(&labels, "_b_bus.txt"), "0 0.6 0.7 0.8 0.9\n");
    assert_eq!(label_for(&out.join("labels/val"), "_b_truck.txt"), "2 0.5 0.5 0.5 0.5\n");
    assert_eq!(label_for(&out.join("labels/val"), "_a_car.txt"), "1 0.5 0.5 0.5 0.5\n");
}

#[test]
fn disjoint_vocabularies_add_up() {
    let dir = tempfile::tempdir().unwrap();
    let a = Dataset::new(&["cat", "dog", "bird"])
        .sample("train", "x", Some("2 0.5 0.5 0.5 0.5"))
        .write(dir.path(), "a.zip");
    let b = Dataset::new(&["apple", "pear"])
        .sample("train", "y", Some("1 0.5 0.5 0.5 0.5"))
        .write(dir.path(), "b.zip");
    let out = dir.path().join("merged");

    let dataset = try_merge(&[a, b], &out, &MergeOptions::default()).unwrap();

    assert_eq!(dataset.manifest.nc(), 5);
    for split in ["train", "val", "test"] {
        let classes = fs::read_to_string(out.join("labels").join(split).join("classes.txt")).unwrap();
        assert_eq!(classes, "apple\nbird\ncat\ndog\npear");
    }
    let yaml = fs::read_to_string(dataset.manifest_path()).unwrap();
    assert!(yaml.contains("nc: 5"));
}

#[test]
fn identical_file_names_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let a = Dataset::new(&["car"])
        .sample("train", "img", Some("0 0.1 0.1 0.1 0.1"))
        .write(dir.path(), "a.zip");
    let b = Dataset::new(&["car"])
        .sample("train", "img", Some("0 0.2 0.2 0.2 0.2"))
        .write(dir.path(), "b.zip");
    let out = dir.path().join("merged");

    let dataset = try_merge(
        &[a, b],
        &out,
        &MergeOptions {
            test_percent: 10,
            seed: Some(7),
        },
    )
    .unwrap();

    let total = dataset.images[&Split::Train] + dataset.images[&Split::Test];
    assert_eq!(total, 2);
    let labels = files(&out.join("labels/train"), ".txt").len() + files(&out.join("labels/test"), ".txt").len();
    assert_eq!(labels, 2);
}

#[test]
fn test_split_synthesized_from_train() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = Dataset::new(&["car"]).sample("val", "v", Some("0 0.5 0.5 0.5 0.5"));
    for i in 0..10 {
        ds = ds.sample("train", &format!("t{i}"), Some("0 0.5 0.5 0.5 0.5"));
    }
    let a = ds.write(dir.path(), "a.zip");
    let out = dir.path().join("merged");

    let dataset = try_merge(
        &[a],
        &out,
        &MergeOptions {
            test_percent: 10,
            seed: Some(42),
        },
    )
    .unwrap();

    assert_eq!(dataset.moved_to_test, 1);
    assert_eq!(dataset.images[&Split::Train], 9);
    assert_eq!(dataset.images[&Split::Test], 1);

    let moved_image = files(&out.join("images/test"), ".jpg").remove(0);
    let moved_label = files(&out.join("labels/test"), ".txt").remove(0);
    assert_eq!(moved_image.trim_end_matches(".jpg"), moved_label.trim_end_matches(".txt"));
    assert_eq!(files(&out.join("labels/train"), ".txt").len(), 9);
}

#[test]
fn eleven_train_samples_move_two() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = Dataset::new(&["car"]);
    for i in 0..11 {
        ds = ds.sample("train", &format!("t{i}"), Some("0 0.5 0.5 0.5 0.5"));
    }
    let a = ds.write(dir.path(), "a.zip");
    let out = dir.path().join("merged");

    let dataset = try_merge(&[a], &out, &MergeOptions::default()).unwrap();

    assert_eq!(dataset.moved_to_test, 2);
    assert_eq!(dataset.images[&Split::Train], 9);
}

#[test]
fn supplied_test_split_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let a = Dataset::new(&["car"])
        .with_test_split()
        .sample("train", "t0", Some("0 0.5 0.5 0.5 0.5"))
        .sample("train", "t1", Some("0 0.5 0.5 0.5 0.5"))
        .sample("test", "x", Some("0 0.5 0.5 0.5 0.5"))
        .write(dir.path(), "a.zip");
    let out = dir.path().join("merged");

    let dataset = try_merge(&[a], &out, &MergeOptions::default()).unwrap();

    assert_eq!(dataset.moved_to_test, 0);
    assert_eq!(dataset.images[&Split::Train], 2);
    assert_eq!(dataset.images[&Split::Test], 1);
}

#[test]
fn geometry_is_byte_identical_after_reindexing() {
    let dir = tempfile::tempdir().unwrap();
    let source = "1 0.123456 0.5  0.25 1\n0 0 0 0.000001 0.999999\n";
    let a = Dataset::new(&["zebra", "ant"])
        .with_test_split()
        .sample("train", "s", Some(source))
        .sample("test", "t", Some("0 0.5 0.5 0.5 0.5"))
        .write(dir.path(), "a.zip");
    let out = dir.path().join("merged");

    assert!(merge(&[a], &out).success);

    let merged = label_for(&out.join("labels/train"), "_s.txt");
    assert_eq!(merged, "0 0.123456 0.5  0.25 1\n1 0 0 0.000001 0.999999\n");
}

#[test]
fn second_merge_into_same_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let a = Dataset::new(&["car"])
        .sample("train", "t", Some("0 0.5 0.5 0.5 0.5"))
        .write(dir.path(), "a.zip");
    let out = dir.path().join("merged");

    assert!(merge(&[a.clone()], &out).success);

    let again = merge(&[a.clone()], &out);
    assert!(!again.success);
    assert!(again.classes.is_empty());
    assert!(matches!(
        try_merge(&[a], &out, &MergeOptions::default()),
        Err(ArchiveError::OutputExists(_))
    ));
}

#[test]
fn out_of_range_label_aborts_merge() {
    let dir = tempfile::tempdir().unwrap();
    let a = Dataset::new(&["car"])
        .sample("train", "t", Some("4 0.5 0.5 0.5 0.5"))
        .write(dir.path(), "a.zip");
    let out = dir.path().join("merged");

    assert!(matches!(
        try_merge(&[a.clone()], &out, &MergeOptions::default()),
        Err(ArchiveError::Remap { .. })
    ));
    assert_eq!(merge(&[a], &dir.path().join("merged2")), yolo_archive::MergeOutcome {
        success: false,
        classes: BTreeSet::new(),
    });
}

#[test]
fn missing_archive_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = merge_with(
        &[dir.path().join("nope.zip")],
        &dir.path().join("merged"),
        &MergeOptions::default(),
    );
    assert!(!outcome.success);
    assert!(outcome.classes.is_empty());
}

#[test]
fn archive_without_manifest_fails_merge() {
    let dir = tempfile::tempdir().unwrap();
    let a = Dataset::new(&["car"])
        .without_manifest()
        .sample("train", "t", Some("0 0.5 0.5 0.5 0.5"))
        .write(dir.path(), "a.zip");

    assert!(matches!(
        try_merge(&[a], &dir.path().join("merged"), &MergeOptions::default()),
        Err(ArchiveError::MissingManifest(_))
    ));
}

#[test]
fn nested_manifest_is_found() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<(String, String)> = [
        ("export/data.yaml", "train: images/train\nval: images/val\nnames: ['car']\n"),
        ("export/images/train/a.jpg", "img"),
        ("export/labels/train/a.txt", "0 0.5 0.5 0.5 0.5\n"),
    ]
    .iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect();
    let a = common::write_zip(dir.path(), "nested.zip", &entries);

    let dataset = try_merge(&[a], &dir.path().join("merged"), &MergeOptions::default()).unwrap();
    assert_eq!(dataset.images[&Split::Test], 1);
    assert_eq!(dataset.images[&Split::Train], 0);
}
