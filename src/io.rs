// File-level helpers for single-file diffs.
//
// Provides `diff_file()` and `patch_file()` convenience functions that wrap
// the encoder and the streaming patcher with buffered I/O. Optionally
// computes streaming SHA-256 checksums (feature-gated behind `file-io`).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

#[cfg(feature = "file-io")]
use sha2::Digest;
use thiserror::Error;

use crate::compress::decoder::{FileSource, PatchDecoder, PatchError, PatchOptions};
use crate::compress::encoder::{DiffError, DiffOptions, create_diff};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `diff_file()`.
#[derive(Debug, Clone)]
pub struct DiffFileStats {
    pub old_size: u64,
    pub new_size: u64,
    /// Diff output size in bytes.
    pub diff_size: u64,
    pub cover_count: u64,
    pub covered_bytes: u64,
    /// Compression plugin named in the header (`""` if none).
    pub compress_type: &'static str,
    /// SHA-256 of the old file (if `file-io` feature is enabled).
    pub old_sha256: Option<[u8; 32]>,
    /// SHA-256 of the new file (if `file-io` feature is enabled).
    pub new_sha256: Option<[u8; 32]>,
}

/// Statistics returned by `patch_file()`.
#[derive(Debug, Clone)]
pub struct PatchFileStats {
    pub old_size: u64,
    pub diff_size: u64,
    /// Reconstructed output size in bytes.
    pub output_size: u64,
    pub cover_count: u64,
    /// SHA-256 of the reconstructed output (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file operations.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("diff error: {0}")]
    Diff(#[from] DiffError),
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),
}

// ---------------------------------------------------------------------------
// Default buffer size
// ---------------------------------------------------------------------------

pub(crate) const BUF_SIZE: usize = 64 * 1024; // 64 KiB

// ---------------------------------------------------------------------------
// diff_file
// ---------------------------------------------------------------------------

/// Diff `old_path` to `new_path`, writing an `HDIFF13` diff to `diff_path`.
///
/// Both inputs are read fully into memory; the matcher needs random access
/// to each. The diff output uses `BufWriter`.
pub fn diff_file(
    old_path: &Path,
    new_path: &Path,
    diff_path: &Path,
    opts: &DiffOptions,
) -> Result<DiffFileStats, IoError> {
    let old = std::fs::read(old_path)?;
    let new = std::fs::read(new_path)?;

    let diff_file = File::create(diff_path)?;
    let mut writer = BufWriter::with_capacity(BUF_SIZE, diff_file);
    let stats = create_diff(&old, &new, &mut writer, opts)?;
    writer.flush()?;

    #[cfg(feature = "file-io")]
    let (old_sha256, new_sha256) = (
        Some(sha2::Sha256::digest(&old).into()),
        Some(sha2::Sha256::digest(&new).into()),
    );
    #[cfg(not(feature = "file-io"))]
    let (old_sha256, new_sha256): (Option<[u8; 32]>, Option<[u8; 32]>) = (None, None);

    Ok(DiffFileStats {
        old_size: stats.old_size,
        new_size: stats.new_size,
        diff_size: stats.diff_size,
        cover_count: stats.cover_count,
        covered_bytes: stats.covered_bytes,
        compress_type: stats.compress_type,
        old_sha256,
        new_sha256,
    })
}

// ---------------------------------------------------------------------------
// patch_file
// ---------------------------------------------------------------------------

/// Apply the diff at `diff_path` to `old_path`, writing to `output_path`.
///
/// The old file is read on demand, the diff is streamed through a
/// `BufReader`, and output is produced in `cache_size` chunks.
///
/// When the `file-io` feature is enabled, a SHA-256 checksum of the output
/// is computed incrementally.
pub fn patch_file(
    old_path: &Path,
    diff_path: &Path,
    output_path: &Path,
    opts: PatchOptions,
) -> Result<PatchFileStats, IoError> {
    let mut old = FileSource::open(old_path)?;

    let diff = File::open(diff_path)?;
    let diff_size = diff.metadata()?.len();
    let decoder = PatchDecoder::new(BufReader::with_capacity(BUF_SIZE, diff), opts)?;

    let output_file = File::create(output_path)?;
    let mut output_writer = BufWriter::with_capacity(BUF_SIZE, output_file);

    #[cfg(feature = "file-io")]
    let mut output_hasher = sha2::Sha256::new();

    #[cfg(feature = "file-io")]
    let stats = {
        let mut hashing_writer = HashingWriter {
            inner: &mut output_writer,
            hasher: &mut output_hasher,
        };
        decoder.patch_to(&mut old, &mut hashing_writer)?
    };

    #[cfg(not(feature = "file-io"))]
    let stats = decoder.patch_to(&mut old, &mut output_writer)?;

    output_writer.flush()?;

    #[cfg(feature = "file-io")]
    let output_sha256 = Some(output_hasher.finalize().into());
    #[cfg(not(feature = "file-io"))]
    let output_sha256: Option<[u8; 32]> = None;

    Ok(PatchFileStats {
        old_size: stats.old_size,
        diff_size,
        output_size: stats.new_size,
        cover_count: stats.cover_count,
        output_sha256,
    })
}

// ---------------------------------------------------------------------------
// Hashing writer (used with file-io feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "file-io")]
struct HashingWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: &'a mut sha2::Sha256,
}

#[cfg(feature = "file-io")]
impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::codec::Compression;
    use std::path::PathBuf;

    fn write_temp_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn diff_patch_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let old_data = b"The quick brown fox jumps over the lazy dog. 1234567890";
        let new_data = b"The quick brown cat sits on the lazy mat. 1234567890!!!";

        let old_path = write_temp_file(dir.path(), "old.bin", old_data);
        let new_path = write_temp_file(dir.path(), "new.bin", new_data);
        let diff_path = dir.path().join("patch.hdiff");
        let out_path = dir.path().join("out.bin");

        let d = diff_file(&old_path, &new_path, &diff_path, &DiffOptions::default()).unwrap();
        assert_eq!(d.old_size, old_data.len() as u64);
        assert_eq!(d.new_size, new_data.len() as u64);
        assert_eq!(d.diff_size, std::fs::metadata(&diff_path).unwrap().len());

        let p = patch_file(&old_path, &diff_path, &out_path, PatchOptions::default()).unwrap();
        assert_eq!(p.output_size, new_data.len() as u64);
        assert_eq!(std::fs::read(&out_path).unwrap(), new_data);
    }

    #[test]
    fn empty_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let new_data = b"standalone data without any old file";
        let old_path = write_temp_file(dir.path(), "old.bin", b"");
        let new_path = write_temp_file(dir.path(), "new.bin", new_data);
        let diff_path = dir.path().join("patch.hdiff");
        let out_path = dir.path().join("out.bin");

        diff_file(&old_path, &new_path, &diff_path, &DiffOptions::default()).unwrap();
        patch_file(&old_path, &diff_path, &out_path, PatchOptions::default()).unwrap();
        assert_eq!(std::fs::read(&out_path).unwrap(), new_data);
    }

    #[cfg(feature = "file-io")]
    #[test]
    fn sha256_checksums_computed() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = write_temp_file(dir.path(), "old.bin", b"old for checksum test");
        let new_path = write_temp_file(dir.path(), "new.bin", b"new for checksum test");
        let diff_path = dir.path().join("patch.hdiff");
        let out_path = dir.path().join("out.bin");

        let d = diff_file(&old_path, &new_path, &diff_path, &DiffOptions::default()).unwrap();
        assert!(d.old_sha256.is_some());
        let p = patch_file(&old_path, &diff_path, &out_path, PatchOptions::default()).unwrap();
        assert_eq!(p.output_sha256, d.new_sha256);
    }

    #[test]
    fn large_file_small_cache() {
        let dir = tempfile::tempdir().unwrap();
        let old_data: Vec<u8> = (0..=255u8).cycle().take(1 << 20).collect();
        let mut new_data = old_data.clone();
        for i in (0..new_data.len()).step_by(4096) {
            new_data[i] = new_data[i].wrapping_add(1);
        }

        let old_path = write_temp_file(dir.path(), "old.bin", &old_data);
        let new_path = write_temp_file(dir.path(), "new.bin", &new_data);
        let diff_path = dir.path().join("patch.hdiff");
        let out_path = dir.path().join("out.bin");

        let opts = DiffOptions {
            level: 2,
            compression: Compression::None,
            ..DiffOptions::default()
        };
        let d = diff_file(&old_path, &new_path, &diff_path, &opts).unwrap();
        assert!(d.diff_size < d.new_size / 4, "diff {} too large", d.diff_size);

        let p = patch_file(
            &old_path,
            &diff_path,
            &out_path,
            PatchOptions { cache_size: 8 << 10 },
        )
        .unwrap();
        assert_eq!(p.output_size, new_data.len() as u64);
        assert_eq!(std::fs::read(&out_path).unwrap(), new_data);
    }

    #[test]
    fn patch_with_wrong_old_fails() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = write_temp_file(dir.path(), "old.bin", b"first version of the file");
        let new_path = write_temp_file(dir.path(), "new.bin", b"second version of the file");
        let other_path = write_temp_file(dir.path(), "other.bin", b"short");
        let diff_path = dir.path().join("patch.hdiff");

        diff_file(&old_path, &new_path, &diff_path, &DiffOptions::default()).unwrap();
        let err = patch_file(
            &other_path,
            &diff_path,
            &dir.path().join("out.bin"),
            PatchOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IoError::Patch(PatchError::OldSizeMismatch { .. })));
    }
}
