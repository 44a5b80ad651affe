//! Oxidiff: binary and directory diff/patch in Rust.
//!
//! The crate provides:
//! - A compact single-file diff format (`HDIFF13`) built from suffix-array
//!   or rolling-block matches (`hash`, `compress`, `format`)
//! - A streaming patcher that reads old data on demand (`compress::decoder`)
//! - Directory diffs (`HDIFF19`) with rename detection, ignore patterns and
//!   checksums (`dir`)
//! - In-memory and file-level helpers (`engine`, `io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! let old = b"hello old world, hello old world";
//! let new = b"hello new world, hello new world!";
//!
//! let diff = oxidiff::engine::diff(old, new).unwrap();
//! let patched = oxidiff::engine::patch(old, &diff).unwrap();
//! assert_eq!(patched, new);
//! ```
//!
//! Directories:
//!
//! ```no_run
//! use std::path::Path;
//! use oxidiff::dir::{DirDiffOptions, DirPatchOptions, DirPatcher, dir_diff};
//!
//! let mut diff = Vec::new();
//! dir_diff(Path::new("v1"), Path::new("v2"), &mut diff, &DirDiffOptions::default()).unwrap();
//! DirPatcher::open(diff.as_slice())
//!     .unwrap()
//!     .patch(Path::new("v1"), Path::new("v2-rebuilt"), &DirPatchOptions::default())
//!     .unwrap();
//! ```

pub mod checksum;
pub mod compress;
pub mod dir;
pub mod engine;
pub mod format;
pub mod hash;
pub mod io;

#[cfg(feature = "cli")]
pub mod cli;
