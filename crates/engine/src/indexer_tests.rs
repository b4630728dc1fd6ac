// SPDX-License-Identifier: MIT

use super::*;
use archive_adapters::FakeContentSource;
use archive_core::job::{EntryKind, JobDescriptorBuilder};

fn job() -> JobState {
    let desc = JobDescriptorBuilder::default().build();
    JobState::new(desc, 0)
}

#[tokio::test]
async fn run_indexing_builds_manifest_and_totals() {
    let source = FakeContentSource::new();
    source.add_file("a.txt", b"hello".to_vec());
    source.add_file("b.txt", b"world!".to_vec());
    source.add_directory("sub");

    let result = run_indexing(&job(), &source, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.items_total, 3);
    assert_eq!(result.bytes_total, 11);
    assert_eq!(result.manifest["a.txt"].size_bytes, 5);
    assert_eq!(result.manifest["sub"].kind, EntryKind::Directory);
}

#[tokio::test]
async fn run_indexing_honours_pre_cancelled_token() {
    let source = FakeContentSource::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_indexing(&job(), &source, &cancel).await;

    assert!(matches!(result, Err(IndexError::Cancelled)));
}

#[tokio::test]
async fn run_indexing_empty_source_yields_zero_totals() {
    let source = FakeContentSource::new();

    let result = run_indexing(&job(), &source, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.items_total, 0);
    assert_eq!(result.bytes_total, 0);
}
