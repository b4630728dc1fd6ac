// SPDX-License-Identifier: MIT

use super::*;
use archive_core::job::JobDescriptor;
use tempfile::tempdir;

fn sample_history() -> JobHistory {
    let mut history = JobHistory::new();
    let desc = JobDescriptor::builder()
        .output_path(PathBuf::from("/tmp/out/j1"))
        .staging_path(PathBuf::from("/tmp/stage/j1"))
        .build();
    let job = JobState::new(desc.clone(), 1_000);
    history.insert(desc.job_id, job);
    history
}

#[test]
fn load_missing_file_returns_empty_history() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path().join("history.bin"));

    let history = store.load().unwrap();

    assert!(history.is_empty());
}

#[test]
fn flush_then_load_roundtrips() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path().join("history.bin"));
    let history = sample_history();

    store.flush(&history).unwrap();
    let loaded = store.load().unwrap();

    assert_eq!(loaded.len(), 1);
    let (id, job) = history.iter().next().unwrap();
    assert_eq!(loaded[id].phase, job.phase);
    assert_eq!(loaded[id].desc.output_path, job.desc.output_path);
}

#[test]
fn flush_creates_parent_directories() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("deep").join("history.bin");
    let store = FileStore::new(&path);

    store.flush(&sample_history()).unwrap();

    assert!(path.exists());
}

#[test]
fn flush_is_atomic_no_leftover_tmp_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("history.bin");
    let store = FileStore::new(&path);

    store.flush(&sample_history()).unwrap();

    assert!(path.exists());
    assert!(!dir.path().join("history.bin.tmp").exists());
}

#[test]
fn flush_overwrites_previous_snapshot() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path().join("history.bin"));

    store.flush(&sample_history()).unwrap();
    store.flush(&JobHistory::new()).unwrap();

    let loaded = store.load().unwrap();
    assert!(loaded.is_empty());
}

#[test]
fn corrupt_file_surfaces_as_corrupt_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("history.bin");
    fs::write(&path, b"not a gzip stream").unwrap();
    let store = FileStore::new(&path);

    let result = store.load();

    assert!(result.is_err());
}
