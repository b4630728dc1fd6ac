// SPDX-License-Identifier: MIT

use super::*;

fn desc() -> JobDescriptor {
    JobDescriptor::builder()
        .output_path(PathBuf::from("/tmp/archive-test/out"))
        .staging_path(PathBuf::from("/tmp/archive-test/stage"))
        .build()
}

#[test]
fn new_job_starts_queued_with_zero_counters() {
    let job = JobState::new(desc(), 1_000);
    assert_eq!(job.phase, Phase::Queued);
    assert_eq!(job.bytes_total, 0);
    assert_eq!(job.items_done, 0);
    assert!(job.manifest.is_empty());
}

#[test]
fn complete_entry_is_idempotent() {
    let mut job = JobState::new(desc(), 0);
    job.manifest.insert(
        "a.txt".to_string(),
        EntryCheckpoint::new(EntryKind::File, 11),
    );
    job.complete_entry("a.txt", Some("deadbeef".to_string()));
    job.complete_entry("a.txt", Some("deadbeef".to_string()));
    assert_eq!(job.items_done, 1);
    assert_eq!(job.manifest["a.txt"].state, EntryState::Complete);
}

#[test]
fn skip_entry_does_not_double_count_after_complete() {
    let mut job = JobState::new(desc(), 0);
    job.manifest.insert(
        "b.txt".to_string(),
        EntryCheckpoint::new(EntryKind::File, 4),
    );
    job.complete_entry("b.txt", Some("hash".to_string()));
    job.skip_entry("b.txt");
    assert_eq!(job.items_done, 1);
    assert_eq!(job.manifest["b.txt"].state, EntryState::Complete);
}

#[test]
fn retry_target_maps_working_phases_to_eligible_phases() {
    assert_eq!(Phase::Indexing.retry_target(), Some(Phase::Queued));
    assert_eq!(Phase::Copying.retry_target(), Some(Phase::Indexed));
    assert_eq!(Phase::Packaging.retry_target(), Some(Phase::Copied));
    assert_eq!(Phase::Done.retry_target(), None);
}

#[test]
fn is_running_only_true_for_working_phases() {
    assert!(Phase::Indexing.is_running());
    assert!(Phase::Copying.is_running());
    assert!(Phase::Packaging.is_running());
    assert!(!Phase::Queued.is_running());
    assert!(!Phase::Paused.is_running());
    assert!(!Phase::Error.is_running());
}

#[test]
fn final_archive_path_tar_gz_appends_suffix_to_output_path() {
    let d = JobDescriptor::builder()
        .output_path(PathBuf::from("/tmp/out/job1"))
        .staging_path(PathBuf::from("/tmp/stage/job1"))
        .build();
    assert_eq!(
        d.final_archive_path(crate::config::ArchiveFormat::TarGz),
        PathBuf::from("/tmp/out/job1.tar.gz")
    );
}

#[test]
fn final_archive_path_zip_lives_under_staging() {
    let d = JobDescriptor::builder()
        .output_path(PathBuf::from("/tmp/out/job1"))
        .staging_path(PathBuf::from("/tmp/stage/job1"))
        .build();
    assert_eq!(
        d.final_archive_path(crate::config::ArchiveFormat::Zip),
        PathBuf::from("/tmp/stage/job1/job1.zip")
    );
}

#[test]
fn serde_roundtrip_preserves_manifest_and_phase() {
    let mut job = JobState::new(desc(), 42);
    job.phase = Phase::Copying;
    job.manifest.insert(
        "x".to_string(),
        EntryCheckpoint::new(EntryKind::Directory, 0),
    );
    let json = serde_json::to_string(&job).unwrap();
    let back: JobState = serde_json::from_str(&json).unwrap();
    assert_eq!(back.phase, Phase::Copying);
    assert_eq!(back.manifest.len(), 1);
}
