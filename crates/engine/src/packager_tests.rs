// SPDX-License-Identifier: MIT

use super::*;
use tempfile::tempdir;

fn make_staging() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
    std::fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();
    dir
}

#[test]
fn package_tar_gz_produces_a_readable_archive() {
    let staging = make_staging();
    let out = tempdir().unwrap();
    let archive_path = out.path().join("archive.tar.gz");

    let bytes = package(staging.path(), &archive_path, ArchiveFormat::TarGz, false, &CancellationToken::new())
        .unwrap();

    assert!(bytes > 0);
    assert!(archive_path.exists());
    assert!(!staging.path().exists());

    let file = File::open(&archive_path).unwrap();
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.contains("a.txt")));
}

#[test]
fn package_zip_produces_a_readable_archive() {
    let staging = make_staging();
    let out = tempdir().unwrap();
    let archive_path = out.path().join("archive.zip");

    package(staging.path(), &archive_path, ArchiveFormat::Zip, false, &CancellationToken::new()).unwrap();

    let file = File::open(&archive_path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut names = Vec::new();
    for i in 0..archive.len() {
        names.push(archive.by_index(i).unwrap().name().to_string());
    }
    assert!(names.iter().any(|n| n.ends_with("a.txt")));
}

#[test]
fn package_without_overwrite_final_refuses_existing_archive() {
    let staging = make_staging();
    let out = tempdir().unwrap();
    let archive_path = out.path().join("archive.tar.gz");
    std::fs::write(&archive_path, b"already here").unwrap();

    let result = package(staging.path(), &archive_path, ArchiveFormat::TarGz, false, &CancellationToken::new());

    assert!(matches!(result, Err(PackageError::AlreadyExists(_))));
}

#[test]
fn package_with_overwrite_final_replaces_existing_archive() {
    let staging = make_staging();
    let out = tempdir().unwrap();
    let archive_path = out.path().join("archive.tar.gz");
    std::fs::write(&archive_path, b"already here").unwrap();

    let result = package(staging.path(), &archive_path, ArchiveFormat::TarGz, true, &CancellationToken::new());

    assert!(result.is_ok());
}

#[test]
fn package_cancelled_before_start_errors_and_leaves_staging() {
    let staging = make_staging();
    let out = tempdir().unwrap();
    let archive_path = out.path().join("archive.tar.gz");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = package(staging.path(), &archive_path, ArchiveFormat::TarGz, false, &cancel);

    assert!(matches!(result, Err(PackageError::Cancelled)));
    assert!(staging.path().exists());
}
