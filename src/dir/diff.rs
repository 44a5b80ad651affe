// Directory differ: old tree + new tree -> HDIFF19.
//
// Files whose contents already exist somewhere in the old tree (same size
// and SHA-256) become same-file pairs and are copied by the patcher. All
// other non-empty files are concatenated in listing order on each side and
// diffed as one HDIFF13 stream. Adds and removes fall out of the listings.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, info};

use super::header::{
    DirDiffHeader, HeadData, SLOT_DIFF, SLOT_NEW_REF, SLOT_OLD_REF, SLOT_SAME_FILES, path_sum_size,
};
use super::ignore::IgnoreList;
use super::manifest::{self, Manifest};
use super::{DirError, resolve};
use crate::checksum::ChecksumKind;
use crate::compress::codec;
use crate::compress::encoder::{DiffOptions, DiffStats, create_diff};

#[derive(Debug, Clone, Default)]
pub struct DirDiffOptions {
    /// Options for the main diff; its compression also applies to head data.
    pub diff: DiffOptions,
    pub checksum: ChecksumKind,
    pub ignore: IgnoreList,
    /// Opaque bytes carried in the diff for the caller.
    pub extern_data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct DirDiffStats {
    pub old_path_count: u64,
    pub new_path_count: u64,
    pub old_ref_files: u64,
    pub new_ref_files: u64,
    pub old_ref_size: u64,
    pub new_ref_size: u64,
    pub same_file_pairs: u64,
    pub same_file_size: u64,
    pub new_exec_files: u64,
    pub head_data_size: u64,
    pub head_data_compressed_size: u64,
    /// Whole directory diff.
    pub diff_size: u64,
    pub main: DiffStats,
}

/// Listing paths of the root entries plus everything below.
fn paths(m: &Manifest) -> Vec<String> {
    m.entries().iter().map(|e| e.path.clone()).collect()
}

/// `(new index, old index)` for new files whose contents exist in the old tree.
fn find_same_pairs(old: &Manifest, new: &Manifest) -> Result<Vec<(usize, usize)>, DirError> {
    let file_sizes = |m: &Manifest| -> HashSet<u64> {
        m.files().filter(|e| e.size > 0).map(|e| e.size).collect()
    };
    let new_sizes = file_sizes(new);
    let old_sizes = file_sizes(old);

    let mut by_content: HashMap<(u64, Vec<u8>), usize> = HashMap::new();
    for (i, e) in old.entries().iter().enumerate() {
        if e.is_dir || e.size == 0 || !new_sizes.contains(&e.size) {
            continue;
        }
        let digest = manifest::digest_file(&resolve(old.root(), &e.path), ChecksumKind::Sha256)?;
        by_content.entry((e.size, digest)).or_insert(i);
    }

    let mut pairs = Vec::new();
    for (n, e) in new.entries().iter().enumerate() {
        if e.is_dir || e.size == 0 || !old_sizes.contains(&e.size) {
            continue;
        }
        let digest = manifest::digest_file(&resolve(new.root(), &e.path), ChecksumKind::Sha256)?;
        if let Some(&o) = by_content.get(&(e.size, digest)) {
            debug!("same content: {:?} <- {:?}", e.path, old.entries()[o].path);
            pairs.push((n, o));
        }
    }
    Ok(pairs)
}

/// Read and concatenate files, checking each still has its listed size.
fn load_refs(m: &Manifest, indices: &[usize], total: u64) -> Result<Vec<u8>, DirError> {
    let cap = usize::try_from(total).map_err(|_| DirError::invalid("ref data too large"))?;
    let mut data = Vec::with_capacity(cap);
    for &i in indices {
        let e = &m.entries()[i];
        let before = data.len();
        fs::File::open(resolve(m.root(), &e.path))?.read_to_end(&mut data)?;
        if (data.len() - before) as u64 != e.size {
            return Err(DirError::invalid(format!(
                "{:?} changed size while diffing",
                e.path
            )));
        }
    }
    Ok(data)
}

/// Diff the tree (or file) at `old` against `new`, writing HDIFF19 to `out`.
pub fn dir_diff<W: Write + ?Sized>(
    old: &Path,
    new: &Path,
    out: &mut W,
    options: &DirDiffOptions,
) -> Result<DirDiffStats, DirError> {
    if !options.checksum.is_available() {
        return Err(DirError::Unsupported(format!(
            "checksum {} is not enabled in this build",
            options.checksum
        )));
    }
    let old_m = Manifest::scan(old, &options.ignore)?;
    let new_m = Manifest::scan(new, &options.ignore)?;
    info!(
        "dir diff: {} old entries, {} new entries",
        old_m.entries().len(),
        new_m.entries().len()
    );

    let same_pairs = find_same_pairs(&old_m, &new_m)?;
    let pair_sources: HashSet<usize> = same_pairs.iter().map(|&(_, o)| o).collect();
    let pair_targets: HashSet<usize> = same_pairs.iter().map(|&(n, _)| n).collect();

    let mut head = HeadData {
        old_paths: paths(&old_m),
        new_paths: paths(&new_m),
        same_pairs,
        ..Default::default()
    };
    for (i, e) in old_m.entries().iter().enumerate() {
        if !e.is_dir && e.size > 0 && !pair_sources.contains(&i) {
            head.old_ref_indices.push(i);
            head.old_ref_sizes.push(e.size);
        }
    }
    for (i, e) in new_m.entries().iter().enumerate() {
        if e.is_dir {
            continue;
        }
        if e.size > 0 && !pair_targets.contains(&i) {
            head.new_ref_indices.push(i);
            head.new_ref_sizes.push(e.size);
        }
        if e.executable {
            head.new_exec_indices.push(i);
        }
    }

    let old_ref_size: u64 = head.old_ref_sizes.iter().sum();
    let new_ref_size: u64 = head.new_ref_sizes.iter().sum();
    let same_file_size: u64 = head
        .same_pairs
        .iter()
        .map(|&(n, _)| new_m.entries()[n].size)
        .sum();
    info!(
        "dir diff: {} old refs ({old_ref_size} bytes), {} new refs ({new_ref_size} bytes), {} same files",
        head.old_ref_indices.len(),
        head.new_ref_indices.len(),
        head.same_pairs.len()
    );

    let old_data = load_refs(&old_m, &head.old_ref_indices, old_ref_size)?;
    let new_data = load_refs(&new_m, &head.new_ref_indices, new_ref_size)?;
    let mut main = Vec::new();
    let main_stats = create_diff(&old_data, &new_data, &mut main, &options.diff)?;

    let kind = options.checksum;
    let mut checksums: [Vec<u8>; 4] = Default::default();
    checksums[SLOT_OLD_REF] = kind.digest(&old_data);
    checksums[SLOT_NEW_REF] = kind.digest(&new_data);
    checksums[SLOT_DIFF] = kind.digest(&main);
    let mut same = kind.hasher();
    for &(_, o) in &head.same_pairs {
        manifest::feed_file(&mut same, &resolve(old_m.root(), &old_m.entries()[o].path))?;
    }
    checksums[SLOT_SAME_FILES] = same.finish();
    drop(old_data);
    drop(new_data);

    let head_bytes = head.encode();
    let compression = options.diff.compression;
    let head_codec = compression.codec();
    let head_packed = codec::compress_section(head_codec.as_deref(), &head_bytes)?;

    let header = DirDiffHeader {
        compress_type: compression.name().to_string(),
        checksum_type: kind.name().to_string(),
        old_is_dir: old_m.root_is_dir(),
        new_is_dir: new_m.root_is_dir(),
        old_path_count: head.old_paths.len() as u64,
        old_path_sum_size: path_sum_size(&head.old_paths),
        new_path_count: head.new_paths.len() as u64,
        new_path_sum_size: path_sum_size(&head.new_paths),
        old_ref_file_count: head.old_ref_indices.len() as u64,
        old_ref_size,
        new_ref_file_count: head.new_ref_indices.len() as u64,
        new_ref_size,
        same_file_pair_count: head.same_pairs.len() as u64,
        same_file_size,
        new_execute_count: head.new_exec_indices.len() as u64,
        private_reserved_data_size: 0,
        private_extern_data_size: 0,
        extern_data_size: options.extern_data.len() as u64,
        head_data_size: head_bytes.len() as u64,
        head_data_compressed_size: head_packed.as_ref().map_or(0, |p| p.len() as u64),
        checksum_byte_size: kind.byte_size() as u64,
    };

    let header_bytes = header.to_bytes();
    out.write_all(&header_bytes)?;
    for c in &checksums {
        out.write_all(c)?;
    }
    let head_stored = head_packed.as_deref().unwrap_or(&head_bytes);
    out.write_all(head_stored)?;
    out.write_all(&options.extern_data)?;
    out.write_all(&main)?;

    let diff_size = (header_bytes.len()
        + checksums.iter().map(Vec::len).sum::<usize>()
        + head_stored.len()
        + options.extern_data.len()
        + main.len()) as u64;
    info!(
        "dir diff: {diff_size} bytes ({} main diff, {} head data)",
        main.len(),
        head_stored.len()
    );

    Ok(DirDiffStats {
        old_path_count: header.old_path_count,
        new_path_count: header.new_path_count,
        old_ref_files: header.old_ref_file_count,
        new_ref_files: header.new_ref_file_count,
        old_ref_size,
        new_ref_size,
        same_file_pairs: header.same_file_pair_count,
        same_file_size,
        new_exec_files: header.new_execute_count,
        head_data_size: header.head_data_size,
        head_data_compressed_size: header.head_data_compressed_size,
        diff_size,
        main: main_stats,
    })
}
