// Directory diffs.
//
// - `ignore`: `#`-separated ignore patterns
// - `manifest`: sorted listing of a file or directory tree
// - `header`: `HDIFF19` header and head data
// - `diff`: dir_diff: old tree + new tree -> HDIFF19
// - `patch`: DirPatcher: apply HDIFF19 into a new tree or in place
// - `res_limit`: LRU bound on open file handles
// - `ref_stream`: old ref files read as one concatenated OldSource
// - `new_output`: new ref files written as one concatenated stream
//
// Paths inside a diff are relative, `/`-separated, directories end in `/`,
// and the root itself is `""`.

pub mod diff;
pub mod header;
pub mod ignore;
pub mod manifest;
pub mod new_output;
pub mod patch;
pub mod ref_stream;
pub mod res_limit;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::compress::decoder::PatchError;
use crate::compress::encoder::DiffError;
use crate::format::varint::VarIntError;

pub use diff::{DirDiffOptions, DirDiffStats, dir_diff};
pub use header::{DirDiffHeader, DirDiffInfo, HeadData};
pub use ignore::IgnoreList;
pub use manifest::{Manifest, ManifestError};
pub use patch::{DirPatchOptions, DirPatchStats, DirPatcher};

#[derive(Debug, Error)]
pub enum DirError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Manifest(#[from] ManifestError),
    #[error("diff error: {0}")]
    Diff(#[from] DiffError),
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),
    #[error("corrupt head data: {0}")]
    Packed(#[from] VarIntError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("old file {path}: {reason}")]
    OldMismatch { path: String, reason: String },
    #[error("checksum mismatch in {what}")]
    ChecksumMismatch { what: &'static str },
}

impl DirError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Whether a listing path names a directory.
pub fn is_dir_path(path: &str) -> bool {
    path.is_empty() || path.ends_with('/')
}

/// Resolve a listing path against a root on disk.
///
/// `""` is the root itself; a trailing `/` is dropped.
pub fn resolve(root: &Path, path: &str) -> PathBuf {
    let rel = path.trim_end_matches('/');
    if rel.is_empty() {
        return root.to_path_buf();
    }
    let mut out = root.to_path_buf();
    out.extend(rel.split('/'));
    out
}

/// Reject listing paths that could escape the root when resolved.
pub fn validate_path(path: &str) -> Result<(), DirError> {
    let rel = path.strip_suffix('/').unwrap_or(path);
    if rel.is_empty() {
        return if path.is_empty() {
            Ok(())
        } else {
            Err(DirError::invalid("path \"/\" in listing"))
        };
    }
    for part in rel.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') || part.contains('\0') {
            return Err(DirError::invalid(format!("unsafe path {path:?} in listing")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_paths() {
        assert!(is_dir_path(""));
        assert!(is_dir_path("a/b/"));
        assert!(!is_dir_path("a/b"));
    }

    #[test]
    fn resolve_paths() {
        let root = Path::new("/tmp/root");
        assert_eq!(resolve(root, ""), PathBuf::from("/tmp/root"));
        assert_eq!(resolve(root, "a/b/"), Path::new("/tmp/root").join("a").join("b"));
        assert_eq!(resolve(root, "a/c.txt"), Path::new("/tmp/root").join("a").join("c.txt"));
    }

    #[test]
    fn unsafe_paths_rejected() {
        for ok in ["", "a", "a/", "a/b.txt", "dir/sub/"] {
            assert!(validate_path(ok).is_ok(), "{ok}");
        }
        for bad in ["/", "/etc/passwd", "../x", "a/../../b", "a//b", "./a", "a\\b"] {
            assert!(validate_path(bad).is_err(), "{bad}");
        }
    }
}
