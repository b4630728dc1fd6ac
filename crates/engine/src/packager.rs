// SPDX-License-Identifier: MIT

//! Packaging stage (§4.3.4): walk the staging directory and emit a single
//! compressed archive, either gzip-compressed tar or deflate-compressed
//! zip. The variant is a system-wide choice (`EngineConfig::archive_format`),
//! not a per-job one.

use archive_core::ArchiveFormat;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("packaging cancelled")]
    Cancelled,
    #[error("archive already exists at {0}")]
    AlreadyExists(std::path::PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

/// Package `staging_dir` into `archive_path` using `format`. Opens the
/// destination with exclusive-create unless `overwrite_final` is set; on
/// success the staging directory is removed, on failure the partial
/// archive is left for inspection.
pub fn package(
    staging_dir: &Path,
    archive_path: &Path,
    format: ArchiveFormat,
    overwrite_final: bool,
    cancel: &CancellationToken,
) -> Result<u64, PackageError> {
    if cancel.is_cancelled() {
        return Err(PackageError::Cancelled);
    }

    let file = open_destination(archive_path, overwrite_final)?;

    let bytes_packaged = match format {
        ArchiveFormat::TarGz => package_tar_gz(staging_dir, file, cancel)?,
        ArchiveFormat::Zip => package_zip(staging_dir, file, cancel)?,
    };

    std::fs::remove_dir_all(staging_dir)?;
    Ok(bytes_packaged)
}

fn open_destination(path: &Path, overwrite_final: bool) -> Result<File, PackageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).truncate(true);
    if overwrite_final {
        opts.create(true);
    } else {
        opts.create_new(true);
    }
    opts.open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            PackageError::AlreadyExists(path.to_path_buf())
        } else {
            PackageError::Io(e)
        }
    })
}

fn package_tar_gz(
    staging_dir: &Path,
    file: File,
    cancel: &CancellationToken,
) -> Result<u64, PackageError> {
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(CountingWriter::new(encoder, cancel.clone()));
    builder.append_dir_all(".", staging_dir)?;
    let counting = builder.into_inner()?;
    let bytes_packaged = counting.bytes_written();
    let encoder = counting.into_inner()?;
    encoder.finish()?;
    Ok(bytes_packaged)
}

fn package_zip(staging_dir: &Path, file: File, cancel: &CancellationToken) -> Result<u64, PackageError> {
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let mut bytes_packaged = 0u64;

    let mut entries: Vec<_> = walkdir(staging_dir)?;
    entries.sort();

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(PackageError::Cancelled);
        }
        let relative = entry.strip_prefix(staging_dir).unwrap_or(&entry);
        let name = relative.to_string_lossy().replace('\\', "/");
        let metadata = std::fs::symlink_metadata(&entry)?;

        if metadata.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(&entry)?;
            zip.add_symlink(name, target.to_string_lossy(), options)?;
        } else {
            zip.start_file(name, options)?;
            let mut source = File::open(&entry)?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                if cancel.is_cancelled() {
                    return Err(PackageError::Cancelled);
                }
                use std::io::Read;
                let n = source.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                zip.write_all(&buf[..n])?;
                bytes_packaged += n as u64;
            }
        }
    }

    zip.finish()?;
    Ok(bytes_packaged)
}

fn walkdir(root: &Path) -> io::Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && !path.is_symlink() {
                stack.push(path.clone());
            }
            out.push(path);
        }
    }
    Ok(out)
}

/// Wraps a `Write` to count bytes passed through it, checking the
/// cancellation token roughly once per 64 KiB (tar writes variable-sized
/// chunks internally, so this is an approximation of the chunk boundary
/// named in §4.3.4).
struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
    cancel: CancellationToken,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W, cancel: CancellationToken) -> Self {
        Self { inner, written: 0, cancel }
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }

    fn into_inner(self) -> Result<W, PackageError> {
        if self.cancel.is_cancelled() {
            return Err(PackageError::Cancelled);
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("packaging cancelled"));
        }
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
#[path = "packager_tests.rs"]
mod tests;
