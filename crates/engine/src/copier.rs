// SPDX-License-Identifier: MIT

//! Copying stage (§4.3.2): streams each manifest entry from the content
//! source into the job's workspace directory, resuming from the
//! destination's current size and verifying integrity with SHA-256 before
//! trusting a partial copy.

use archive_adapters::{ContentSource, SourceError};
use archive_core::job::{EntryCheckpoint, EntryKind};
use filetime::FileTime;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("copy cancelled")]
    Cancelled,
    #[error("symlink target escapes the job root: {0}")]
    SymlinkEscapesRoot(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of copying one manifest entry.
pub struct EntryOutcome {
    pub hash_hex: Option<String>,
    pub skipped: bool,
}

/// Copy or resume-copy a single entry into `workspace_dir`. `on_progress`
/// is invoked once per 64 KiB chunk with the signed byte delta to apply to
/// `bytes_done` (negative when a mismatched resume is discarded and
/// restarted from scratch).
pub async fn copy_entry(
    path: &str,
    checkpoint: &EntryCheckpoint,
    source: &dyn ContentSource,
    workspace_dir: &Path,
    chunk_bytes: usize,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(i64),
) -> Result<EntryOutcome, CopyError> {
    let dest = workspace_dir.join(path);

    match checkpoint.kind {
        EntryKind::Directory => {
            tokio::fs::create_dir_all(&dest).await?;
            set_mode(&dest, 0o755).await?;
            set_mtime(&dest, checkpoint.modified_epoch_secs).await?;
            Ok(EntryOutcome { hash_hex: None, skipped: false })
        }
        EntryKind::Symlink => {
            let Some(target) = checkpoint.link_target.as_deref() else {
                return Ok(EntryOutcome { hash_hex: None, skipped: true });
            };
            if escapes_root(workspace_dir, &dest, target) {
                return Ok(EntryOutcome { hash_hex: None, skipped: true });
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let _ = tokio::fs::remove_file(&dest).await;
            create_symlink(target, &dest).await?;
            Ok(EntryOutcome { hash_hex: None, skipped: false })
        }
        EntryKind::File | EntryKind::Executable => {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let hash = copy_file(path, &dest, source, chunk_bytes, cancel, &mut on_progress).await?;
            let mode = if checkpoint.kind == EntryKind::Executable { 0o755 } else { 0o644 };
            set_mode(&dest, mode).await?;
            set_mtime(&dest, checkpoint.modified_epoch_secs).await?;
            Ok(EntryOutcome { hash_hex: Some(hash), skipped: false })
        }
    }
}

async fn copy_file(
    path: &str,
    dest: &Path,
    source: &dyn ContentSource,
    chunk_bytes: usize,
    cancel: &CancellationToken,
    on_progress: &mut impl FnMut(i64),
) -> Result<String, CopyError> {
    let dst_size = match tokio::fs::metadata(dest).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    if dst_size == 0 {
        return fresh_copy(path, dest, source, chunk_bytes, cancel, on_progress).await;
    }

    let appended = stream_append(path, dest, source, dst_size, chunk_bytes, cancel, on_progress).await?;

    let src_hash = hash_source(path, source, chunk_bytes, cancel).await?;
    let dst_hash = hash_file(dest, chunk_bytes, cancel).await?;

    if src_hash == dst_hash {
        return Ok(src_hash);
    }

    // Integrity mismatch: discard the whole resumed file (the pre-existing
    // `dst_size` prefix plus what `stream_append` just appended) and restart.
    on_progress(-((dst_size + appended) as i64));
    fresh_copy(path, dest, source, chunk_bytes, cancel, on_progress).await
}

async fn fresh_copy(
    path: &str,
    dest: &Path,
    source: &dyn ContentSource,
    chunk_bytes: usize,
    cancel: &CancellationToken,
    on_progress: &mut impl FnMut(i64),
) -> Result<String, CopyError> {
    let mut reader = source.open_range(path, 0).await?;
    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_bytes];

    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        on_progress(n as i64);
    }
    file.flush().await?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Appends the source's remaining bytes (from `offset`) to `dest`, returning
/// how many bytes were appended so the caller can fully unwind the progress
/// counter if the resumed file later fails its integrity check.
#[allow(clippy::too_many_arguments)]
async fn stream_append(
    path: &str,
    dest: &Path,
    source: &dyn ContentSource,
    offset: u64,
    chunk_bytes: usize,
    cancel: &CancellationToken,
    on_progress: &mut impl FnMut(i64),
) -> Result<u64, CopyError> {
    let mut reader = source.open_range(path, offset).await?;
    let mut file = tokio::fs::OpenOptions::new().append(true).open(dest).await?;
    let mut buf = vec![0u8; chunk_bytes];
    let mut appended = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        on_progress(n as i64);
        appended += n as u64;
    }
    file.flush().await?;
    Ok(appended)
}

async fn hash_source(
    path: &str,
    source: &dyn ContentSource,
    chunk_bytes: usize,
    cancel: &CancellationToken,
) -> Result<String, CopyError> {
    let mut reader = source.open_range(path, 0).await?;
    hash_reader(&mut *reader, chunk_bytes, cancel).await
}

async fn hash_file(path: &Path, chunk_bytes: usize, cancel: &CancellationToken) -> Result<String, CopyError> {
    let mut file = tokio::fs::File::open(path).await?;
    hash_reader(&mut file, chunk_bytes, cancel).await
}

async fn hash_reader(
    reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
    chunk_bytes: usize,
    cancel: &CancellationToken,
) -> Result<String, CopyError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_bytes];
    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// True if joining `root`-relative `dest`'s directory with `target` would
/// resolve outside of `root`. Follow-and-reject-on-error: any absolute
/// target, or a relative target with enough `..` segments to climb past
/// root, is treated as escaping.
fn escapes_root(root: &Path, dest: &Path, target: &str) -> bool {
    let target_path = Path::new(target);
    if target_path.is_absolute() {
        return true;
    }
    let base = dest.parent().unwrap_or(dest);
    let mut resolved = PathBuf::from(base);
    for component in target_path.components() {
        match component {
            Component::ParentDir => {
                if !resolved.pop() {
                    return true;
                }
            }
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    !resolved.starts_with(root)
}

#[cfg(unix)]
async fn create_symlink(target: &str, dest: &Path) -> std::io::Result<()> {
    let target = target.to_string();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || std::os::unix::fs::symlink(target, dest))
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e)))
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    tokio::fs::set_permissions(path, perms).await
}

/// Stamp `path`'s modification time from the source entry's recorded value
/// (§4.3.2). A 0 timestamp means the source never reported one; leave the
/// freshly-written file's own mtime alone rather than resetting it to the
/// epoch.
async fn set_mtime(path: &Path, epoch_secs: i64) -> std::io::Result<()> {
    if epoch_secs == 0 {
        return Ok(());
    }
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        filetime::set_file_mtime(&path, FileTime::from_unix_time(epoch_secs, 0))
    })
    .await
    .unwrap_or_else(|e| Err(std::io::Error::other(e)))
}

#[cfg(test)]
#[path = "copier_tests.rs"]
mod tests;
