// Directory patcher: apply an HDIFF19 diff into a new tree or in place.
//
// Order of work in `patch`:
//   1. check the old files the diff references
//   2. create directories
//   3. copy same-file pairs
//   4. create empty new files
//   5. stream the main diff from the old refs into the new refs
//   6. set executable bits
//   7. verify the new ref and diff checksums

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::header::{DirDiffInfo, SLOT_DIFF, SLOT_NEW_REF, SLOT_OLD_REF, SLOT_SAME_FILES};
use super::manifest::feed_file;
use super::new_output::NewDirOutput;
use super::ref_stream::RefStream;
use super::{DirError, is_dir_path, resolve};
use crate::checksum::{ChecksumKind, Hasher};
use crate::compress::decoder::{DEFAULT_CACHE_SIZE, PatchDecoder, PatchOptions, PatchStats};

/// Fewest open files a patch may use: one new output plus two old refs.
pub const MIN_OPEN_FILES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct DirPatchOptions {
    /// Bytes of new data reconstructed per step.
    pub cache_size: usize,
    /// Upper bound on files held open at once (old refs plus one output).
    pub max_open_files: usize,
    /// Verify the checksums stored in the diff.
    pub verify_checksum: bool,
}

impl Default for DirPatchOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            max_open_files: 48,
            verify_checksum: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirPatchStats {
    pub dirs_created: u64,
    pub same_files_copied: u64,
    pub empty_files_created: u64,
    pub new_ref_files: u64,
    pub new_ref_size: u64,
    pub old_ref_size: u64,
    pub exec_files: u64,
    /// Old paths removed by an in-place patch.
    pub removed_paths: u64,
    /// Whether checksums were compared.
    pub checksum_verified: bool,
    pub main: PatchStats,
}

// ---------------------------------------------------------------------------
// Checksum plumbing
// ---------------------------------------------------------------------------

struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

struct HashingWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn check_digest(actual: Vec<u8>, expected: &[u8], what: &'static str) -> Result<(), DirError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DirError::ChecksumMismatch { what })
    }
}

// ---------------------------------------------------------------------------
// Patcher
// ---------------------------------------------------------------------------

pub struct DirPatcher<R: Read> {
    reader: R,
    info: DirDiffInfo,
}

impl<R: Read> DirPatcher<R> {
    /// Parse everything before the main diff.
    pub fn open(mut reader: R) -> Result<Self, DirError> {
        let info = DirDiffInfo::read(&mut reader)?;
        debug!(
            "dir patch: {} old paths, {} new paths, {} same files, compress {:?}",
            info.head.old_paths.len(),
            info.head.new_paths.len(),
            info.head.same_pairs.len(),
            info.header.compress_type
        );
        Ok(Self { reader, info })
    }

    pub fn info(&self) -> &DirDiffInfo {
        &self.info
    }

    fn old_path(&self, root: &Path, idx: usize) -> PathBuf {
        resolve(root, &self.info.head.old_paths[idx])
    }

    fn new_path(&self, root: &Path, idx: usize) -> PathBuf {
        resolve(root, &self.info.head.new_paths[idx])
    }

    /// Check the kind of the old root and the size of every referenced old file.
    fn check_old_sizes(&self, old_root: &Path) -> Result<(), DirError> {
        let mismatch = |path: &str, reason: String| DirError::OldMismatch {
            path: path.to_string(),
            reason,
        };
        let root_meta = fs::metadata(old_root)
            .map_err(|e| mismatch("", format!("{}: {e}", old_root.display())))?;
        if root_meta.is_dir() != self.info.header.old_is_dir {
            let want = if self.info.header.old_is_dir { "a directory" } else { "a file" };
            return Err(mismatch("", format!("{} is not {want}", old_root.display())));
        }

        let head = &self.info.head;
        let file_size = |idx: usize| -> Result<u64, DirError> {
            let rel = &head.old_paths[idx];
            let meta = fs::metadata(self.old_path(old_root, idx))
                .map_err(|e| mismatch(rel, e.to_string()))?;
            if !meta.is_file() {
                return Err(mismatch(rel, "not a regular file".into()));
            }
            Ok(meta.len())
        };
        for (&idx, &size) in head.old_ref_indices.iter().zip(&head.old_ref_sizes) {
            let actual = file_size(idx)?;
            if actual != size {
                return Err(mismatch(
                    &head.old_paths[idx],
                    format!("size {actual}, expected {size}"),
                ));
            }
        }
        let mut same_size = 0u64;
        for &(_, o) in &head.same_pairs {
            same_size += file_size(o)?;
        }
        if same_size != self.info.header.same_file_size {
            return Err(mismatch(
                "",
                format!(
                    "same-file sources total {same_size} bytes, expected {}",
                    self.info.header.same_file_size
                ),
            ));
        }
        Ok(())
    }

    /// Verify that `old_root` holds the old files this diff was made from.
    ///
    /// Sizes are always checked; contents are checked when the diff carries
    /// a checksum this build understands.
    pub fn check_old(&self, old_root: &Path) -> Result<(), DirError> {
        self.check_old_sizes(old_root)?;
        let Some(kind) = self.info.verifiable_checksum() else {
            return Ok(());
        };
        let head = &self.info.head;

        let mut h = kind.hasher();
        for &idx in &head.old_ref_indices {
            feed_file(&mut h, &self.old_path(old_root, idx))?;
        }
        check_digest(h.finish(), &self.info.checksums[SLOT_OLD_REF], "old ref data")?;

        let mut h = kind.hasher();
        for &(_, o) in &head.same_pairs {
            feed_file(&mut h, &self.old_path(old_root, o))?;
        }
        check_digest(h.finish(), &self.info.checksums[SLOT_SAME_FILES], "same-file data")?;
        debug!("old tree {} verified", old_root.display());
        Ok(())
    }

    /// Reconstruct the new tree (or file) at `new_root` from `old_root`.
    pub fn patch(
        mut self,
        old_root: &Path,
        new_root: &Path,
        options: &DirPatchOptions,
    ) -> Result<DirPatchStats, DirError> {
        self.apply(old_root, new_root, options)
    }

    fn apply(
        &mut self,
        old_root: &Path,
        new_root: &Path,
        options: &DirPatchOptions,
    ) -> Result<DirPatchStats, DirError> {
        let checksum: Option<ChecksumKind> = if options.verify_checksum {
            self.info.verifiable_checksum()
        } else {
            None
        };
        if checksum.is_some() {
            self.check_old(old_root)?;
        } else {
            self.check_old_sizes(old_root)?;
        }
        let mut stats = DirPatchStats {
            checksum_verified: checksum.is_some(),
            ..Default::default()
        };
        let head = &self.info.head;
        let new_is_dir = self.info.header.new_is_dir;

        // Directories.
        if new_is_dir {
            for (i, p) in head.new_paths.iter().enumerate() {
                if is_dir_path(p) {
                    fs::create_dir_all(self.new_path(new_root, i))?;
                    stats.dirs_created += 1;
                }
            }
        } else if let Some(parent) = new_root.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Same files.
        for &(n, o) in &head.same_pairs {
            let dst = self.new_path(new_root, n);
            fs::copy(self.old_path(old_root, o), &dst)?;
            // fs::copy carries the source mode; exec bits come from the new listing.
            clear_executable(&dst)?;
            stats.same_files_copied += 1;
        }

        // Empty files: every new file that is neither a ref nor a pair target.
        let mut filled: HashSet<usize> = head.new_ref_indices.iter().copied().collect();
        filled.extend(head.same_pairs.iter().map(|&(n, _)| n));
        for (i, p) in head.new_paths.iter().enumerate() {
            if (!new_is_dir || !is_dir_path(p)) && !filled.contains(&i) {
                File::create(self.new_path(new_root, i))?;
                stats.empty_files_created += 1;
            }
        }

        // Main diff.
        let old_refs: Vec<(PathBuf, u64)> = head
            .old_ref_indices
            .iter()
            .zip(&head.old_ref_sizes)
            .map(|(&i, &s)| (self.old_path(old_root, i), s))
            .collect();
        let new_refs: Vec<(PathBuf, u64)> = head
            .new_ref_indices
            .iter()
            .zip(&head.new_ref_sizes)
            .map(|(&i, &s)| (self.new_path(new_root, i), s))
            .collect();
        stats.new_ref_files = new_refs.len() as u64;
        stats.old_ref_size = self.info.header.old_ref_size;
        stats.new_ref_size = self.info.header.new_ref_size;

        let hash_kind = checksum.unwrap_or(ChecksumKind::None);
        let mut diff_reader = HashingReader {
            inner: &mut self.reader,
            hasher: hash_kind.hasher(),
        };
        let decoder = PatchDecoder::new(
            &mut diff_reader,
            PatchOptions {
                cache_size: options.cache_size,
            },
        )?;
        let dh = decoder.header();
        if dh.old_size != self.info.header.old_ref_size
            || dh.new_size != self.info.header.new_ref_size
        {
            return Err(DirError::invalid(format!(
                "main diff is {} -> {} bytes, refs are {} -> {}",
                dh.old_size,
                dh.new_size,
                self.info.header.old_ref_size,
                self.info.header.new_ref_size
            )));
        }

        let max_open = options.max_open_files.max(MIN_OPEN_FILES);
        let mut old_stream = RefStream::new(old_refs, max_open - 1);
        let mut new_out = HashingWriter {
            inner: NewDirOutput::new(new_refs),
            hasher: hash_kind.hasher(),
        };
        stats.main = decoder.patch_to(&mut old_stream, &mut new_out)?;
        old_stream.close();
        let HashingWriter { inner, hasher: new_hasher } = new_out;
        inner.finish()?;
        // Anything after the main diff counts against the diff checksum.
        io::copy(&mut diff_reader, &mut io::sink())?;
        let diff_hasher = diff_reader.hasher;

        // Executable bits.
        for &i in &head.new_exec_indices {
            set_executable(&self.new_path(new_root, i))?;
            stats.exec_files += 1;
        }

        if checksum.is_some() {
            check_digest(new_hasher.finish(), &self.info.checksums[SLOT_NEW_REF], "new ref data")?;
            check_digest(diff_hasher.finish(), &self.info.checksums[SLOT_DIFF], "diff data")?;
        }
        info!(
            "dir patch: {} dirs, {} copied, {} empty, {} patched files ({} bytes)",
            stats.dirs_created,
            stats.same_files_copied,
            stats.empty_files_created,
            stats.new_ref_files,
            stats.new_ref_size
        );
        Ok(stats)
    }

    /// Patch `root` so it becomes the new tree.
    ///
    /// The new tree is built in a sibling temporary directory first; `root`
    /// is only touched once that succeeded.
    pub fn patch_in_place(
        mut self,
        root: &Path,
        options: &DirPatchOptions,
    ) -> Result<DirPatchStats, DirError> {
        let header = &self.info.header;
        if header.old_is_dir != header.new_is_dir {
            return Err(DirError::Unsupported(
                "in-place patch between a file and a directory".into(),
            ));
        }
        let tmp = temp_sibling(root)?;
        if fs::symlink_metadata(&tmp).is_ok() {
            return Err(DirError::invalid(format!(
                "temporary path {} already exists",
                tmp.display()
            )));
        }

        let mut stats = match self.apply(root, &tmp, options) {
            Ok(stats) => stats,
            Err(e) => {
                remove_quietly(&tmp);
                return Err(e);
            }
        };

        if !self.info.header.new_is_dir {
            fs::rename(&tmp, root)?;
            return Ok(stats);
        }

        stats.removed_paths = self.remove_stale(root)?;
        let head = &self.info.head;
        for (i, p) in head.new_paths.iter().enumerate() {
            let dst = self.new_path(root, i);
            if is_dir_path(p) {
                fs::create_dir_all(&dst)?;
                continue;
            }
            if fs::symlink_metadata(&dst).is_ok_and(|m| !m.is_dir()) {
                fs::remove_file(&dst)?;
            }
            fs::rename(self.new_path(&tmp, i), &dst)?;
        }
        fs::remove_dir_all(&tmp)?;
        info!("dir patch: {} patched in place", root.display());
        Ok(stats)
    }

    /// Delete old paths that the new listing does not contain.
    fn remove_stale(&self, root: &Path) -> Result<u64, DirError> {
        let head = &self.info.head;
        let keep: HashSet<&str> = head.new_paths.iter().map(String::as_str).collect();
        let stale: Vec<usize> = (0..head.old_paths.len())
            .filter(|&i| !keep.contains(head.old_paths[i].as_str()))
            .collect();

        let mut removed = 0u64;
        for &i in stale.iter().filter(|&&i| !is_dir_path(&head.old_paths[i])) {
            match fs::remove_file(self.old_path(root, i)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        // Listing order puts children after parents.
        for &i in stale.iter().rev().filter(|&&i| is_dir_path(&head.old_paths[i])) {
            let dir = self.old_path(root, i);
            match fs::remove_dir(&dir) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("keeping {}: {e}", dir.display()),
            }
        }
        Ok(removed)
    }
}

fn temp_sibling(root: &Path) -> Result<PathBuf, DirError> {
    let name = root
        .file_name()
        .ok_or_else(|| DirError::invalid(format!("{} has no file name", root.display())))?;
    let tmp_name = format!(
        ".{}.oxidiff-tmp-{}",
        name.to_string_lossy(),
        std::process::id()
    );
    Ok(root.with_file_name(tmp_name))
}

fn remove_quietly(path: &Path) {
    let res = match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(e) = res {
        warn!("could not remove {}: {e}", path.display());
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    let mode = perms.mode();
    // Grant execute wherever read is granted.
    perms.set_mode(mode | ((mode & 0o444) >> 2));
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn clear_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    let mode = perms.mode();
    if mode & 0o111 != 0 {
        perms.set_mode(mode & !0o111);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn clear_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::codec::Compression;
    use crate::compress::encoder::DiffOptions;
    use crate::dir::diff::{DirDiffOptions, dir_diff};
    use crate::dir::manifest::Manifest;
    use crate::dir::IgnoreList;

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    fn sample_trees() -> (tempfile::TempDir, tempfile::TempDir) {
        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        let big: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let mut big2 = big.clone();
        big2[10_000..10_010].copy_from_slice(b"0123456789");

        write(old.path(), "lib/big.bin", &big);
        write(old.path(), "readme.txt", b"old readme");
        write(old.path(), "assets/logo.png", &[9u8; 500]);
        write(old.path(), "obsolete/file.txt", b"remove me");

        write(new.path(), "lib/big.bin", &big2);
        write(new.path(), "readme.txt", b"new readme, longer");
        write(new.path(), "img/logo.png", &[9u8; 500]);
        write(new.path(), "empty.txt", b"");
        fs::create_dir_all(new.path().join("cache")).unwrap();
        (old, new)
    }

    fn make_diff(old: &Path, new: &Path) -> Vec<u8> {
        let opts = DirDiffOptions {
            diff: DiffOptions {
                compression: Compression::None,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut out = Vec::new();
        dir_diff(old, new, &mut out, &opts).unwrap();
        out
    }

    fn assert_same_tree(a: &Path, b: &Path) {
        let ma = Manifest::scan(a, &IgnoreList::default()).unwrap();
        let mb = Manifest::scan(b, &IgnoreList::default()).unwrap();
        let paths = |m: &Manifest| m.entries().iter().map(|e| e.path.clone()).collect::<Vec<_>>();
        assert_eq!(paths(&ma), paths(&mb));
        for e in ma.files() {
            assert_eq!(
                fs::read(resolve(a, &e.path)).unwrap(),
                fs::read(resolve(b, &e.path)).unwrap(),
                "{}",
                e.path
            );
        }
    }

    #[test]
    fn patch_into_new_directory() {
        let (old, new) = sample_trees();
        let diff = make_diff(old.path(), new.path());
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("result");

        let patcher = DirPatcher::open(diff.as_slice()).unwrap();
        patcher.check_old(old.path()).unwrap();
        let stats = patcher
            .patch(old.path(), &target, &DirPatchOptions::default())
            .unwrap();
        assert!(stats.checksum_verified);
        assert_eq!(stats.same_files_copied, 1);
        assert_eq!(stats.empty_files_created, 1);
        assert_same_tree(new.path(), &target);
    }

    #[test]
    fn tiny_cache_and_handle_limit() {
        let (old, new) = sample_trees();
        let diff = make_diff(old.path(), new.path());
        let target = tempfile::tempdir().unwrap();
        let opts = DirPatchOptions {
            cache_size: 64,
            max_open_files: 0,
            verify_checksum: true,
        };
        DirPatcher::open(diff.as_slice())
            .unwrap()
            .patch(old.path(), target.path(), &opts)
            .unwrap();
        assert_same_tree(new.path(), target.path());
    }

    #[test]
    fn modified_old_file_rejected() {
        let (old, new) = sample_trees();
        let diff = make_diff(old.path(), new.path());
        // Same size, different bytes.
        fs::write(old.path().join("readme.txt"), b"OLD README").unwrap();

        let patcher = DirPatcher::open(diff.as_slice()).unwrap();
        assert!(matches!(
            patcher.check_old(old.path()),
            Err(DirError::ChecksumMismatch { .. })
        ));

        fs::write(old.path().join("readme.txt"), b"short").unwrap();
        let patcher = DirPatcher::open(diff.as_slice()).unwrap();
        let target = tempfile::tempdir().unwrap();
        let opts = DirPatchOptions {
            verify_checksum: false,
            ..Default::default()
        };
        assert!(matches!(
            patcher.patch(old.path(), target.path(), &opts),
            Err(DirError::OldMismatch { .. })
        ));
    }

    #[test]
    fn in_place_patch() {
        let (old, new) = sample_trees();
        let diff = make_diff(old.path(), new.path());
        let stats = DirPatcher::open(diff.as_slice())
            .unwrap()
            .patch_in_place(old.path(), &DirPatchOptions::default())
            .unwrap();
        assert!(stats.removed_paths >= 3);
        assert_same_tree(new.path(), old.path());
        let tmp = temp_sibling(old.path()).unwrap();
        assert!(!tmp.exists());
    }

    #[cfg(unix)]
    #[test]
    fn executable_bit_restored() {
        use std::os::unix::fs::PermissionsExt;
        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        write(new.path(), "bin/run.sh", b"#!/bin/sh\necho hi\n");
        let script = new.path().join("bin/run.sh");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let diff = make_diff(old.path(), new.path());
        let target = tempfile::tempdir().unwrap();
        let stats = DirPatcher::open(diff.as_slice())
            .unwrap()
            .patch(old.path(), target.path(), &DirPatchOptions::default())
            .unwrap();
        assert_eq!(stats.exec_files, 1);
        let mode = fs::metadata(target.path().join("bin/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o111, 0);
    }

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[cfg(unix)]
    fn exec_dropped_trees() -> (tempfile::TempDir, tempfile::TempDir) {
        use std::os::unix::fs::PermissionsExt;
        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        let body: Vec<u8> = (0..4096u32).map(|i| (i * 13 % 251) as u8).collect();
        write(old.path(), "tool", &body);
        write(old.path(), "keep.sh", b"#!/bin/sh\nexit 0\n");
        fs::set_permissions(old.path().join("tool"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(old.path().join("keep.sh"), fs::Permissions::from_mode(0o755)).unwrap();

        write(new.path(), "data.bin", &body);
        write(new.path(), "keep.sh", b"#!/bin/sh\nexit 0\n");
        fs::set_permissions(new.path().join("data.bin"), fs::Permissions::from_mode(0o644)).unwrap();
        fs::set_permissions(new.path().join("keep.sh"), fs::Permissions::from_mode(0o644)).unwrap();
        (old, new)
    }

    #[cfg(unix)]
    #[test]
    fn copied_file_takes_mode_from_new_listing() {
        let (old, new) = exec_dropped_trees();
        let diff = make_diff(old.path(), new.path());
        let target = tempfile::tempdir().unwrap();
        let stats = DirPatcher::open(diff.as_slice())
            .unwrap()
            .patch(old.path(), target.path(), &DirPatchOptions::default())
            .unwrap();
        assert_eq!(stats.same_files_copied, 2);
        assert_eq!(stats.exec_files, 0);
        assert_eq!(mode_of(&target.path().join("data.bin")) & 0o111, 0);
        assert_eq!(mode_of(&target.path().join("keep.sh")) & 0o111, 0);

        let m = Manifest::scan(target.path(), &IgnoreList::default()).unwrap();
        assert!(m.files().all(|e| !e.executable));
    }

    #[cfg(unix)]
    #[test]
    fn in_place_patch_drops_exec_bit() {
        let (old, new) = exec_dropped_trees();
        let diff = make_diff(old.path(), new.path());
        DirPatcher::open(diff.as_slice())
            .unwrap()
            .patch_in_place(old.path(), &DirPatchOptions::default())
            .unwrap();
        assert_same_tree(new.path(), old.path());
        assert!(!old.path().join("tool").exists());
        assert_eq!(mode_of(&old.path().join("data.bin")) & 0o111, 0);
        assert_eq!(mode_of(&old.path().join("keep.sh")) & 0o111, 0);
    }
}
