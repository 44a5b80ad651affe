// `HDIFF19` directory diff header and head data.
//
//   "HDIFF19&" <compress> "&" <checksum> "\0" <old_is_dir u8> <new_is_dir u8>
//   17 packed integers (see DirDiffHeader, in field order)
//   4 checksums of checksum_byte_size bytes:
//       old ref data, new ref data, same-file data, main diff bytes
//   head data (compressed iff head_data_compressed_size > 0)
//   private extern data, extern data
//   main diff (HDIFF13 over the concatenated ref files)
//
// Index lists in the head data are increment-packed: each entry stores
// `idx - (last + 1)`, `last` starting at -1.

use std::io::{self, Read};

use log::warn;

use super::{DirError, is_dir_path, validate_path};
use crate::checksum::ChecksumKind;
use crate::compress::codec::{self, Codec};
use crate::format::DIR_DIFF_MAGIC;
use crate::format::header::MAX_TYPE_LEN;
use crate::format::varint::{self, ByteReader};

/// Checksum slot: concatenated old ref files.
pub const SLOT_OLD_REF: usize = 0;
/// Checksum slot: concatenated new ref files.
pub const SLOT_NEW_REF: usize = 1;
/// Checksum slot: same-file pair contents, in pair order.
pub const SLOT_SAME_FILES: usize = 2;
/// Checksum slot: main diff bytes.
pub const SLOT_DIFF: usize = 3;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirDiffHeader {
    pub compress_type: String,
    pub checksum_type: String,
    pub old_is_dir: bool,
    pub new_is_dir: bool,
    pub old_path_count: u64,
    pub old_path_sum_size: u64,
    pub new_path_count: u64,
    pub new_path_sum_size: u64,
    pub old_ref_file_count: u64,
    pub old_ref_size: u64,
    pub new_ref_file_count: u64,
    pub new_ref_size: u64,
    pub same_file_pair_count: u64,
    pub same_file_size: u64,
    pub new_execute_count: u64,
    pub private_reserved_data_size: u64,
    pub private_extern_data_size: u64,
    pub extern_data_size: u64,
    pub head_data_size: u64,
    pub head_data_compressed_size: u64,
    pub checksum_byte_size: u64,
}

impl DirDiffHeader {
    fn fields(&self) -> [u64; 17] {
        [
            self.old_path_count,
            self.old_path_sum_size,
            self.new_path_count,
            self.new_path_sum_size,
            self.old_ref_file_count,
            self.old_ref_size,
            self.new_ref_file_count,
            self.new_ref_size,
            self.same_file_pair_count,
            self.same_file_size,
            self.new_execute_count,
            self.private_reserved_data_size,
            self.private_extern_data_size,
            self.extern_data_size,
            self.head_data_size,
            self.head_data_compressed_size,
            self.checksum_byte_size,
        ]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);
        out.extend_from_slice(DIR_DIFF_MAGIC);
        out.extend_from_slice(self.compress_type.as_bytes());
        out.push(b'&');
        out.extend_from_slice(self.checksum_type.as_bytes());
        out.push(0);
        out.push(u8::from(self.old_is_dir));
        out.push(u8::from(self.new_is_dir));
        for v in self.fields() {
            varint::pack_uint(&mut out, v);
        }
        out
    }

    /// Parse the fixed header, leaving `r` at the checksums.
    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self, DirError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != DIR_DIFF_MAGIC {
            return Err(DirError::invalid("bad magic: not an HDIFF19 diff"));
        }
        let types = varint::stream_read_cstr(r, 2 * MAX_TYPE_LEN + 1)?;
        let types =
            String::from_utf8(types).map_err(|_| DirError::invalid("type names not UTF-8"))?;
        let (compress_type, checksum_type) = types
            .split_once('&')
            .ok_or_else(|| DirError::invalid("missing checksum type"))?;

        let mut flags = [0u8; 2];
        r.read_exact(&mut flags)?;
        if flags.iter().any(|&f| f > 1) {
            return Err(DirError::invalid("bad directory flags"));
        }

        let mut v = [0u64; 17];
        for slot in &mut v {
            *slot = varint::stream_read_uint(r)?;
        }
        Ok(Self {
            compress_type: compress_type.to_string(),
            checksum_type: checksum_type.to_string(),
            old_is_dir: flags[0] == 1,
            new_is_dir: flags[1] == 1,
            old_path_count: v[0],
            old_path_sum_size: v[1],
            new_path_count: v[2],
            new_path_sum_size: v[3],
            old_ref_file_count: v[4],
            old_ref_size: v[5],
            new_ref_file_count: v[6],
            new_ref_size: v[7],
            same_file_pair_count: v[8],
            same_file_size: v[9],
            new_execute_count: v[10],
            private_reserved_data_size: v[11],
            private_extern_data_size: v[12],
            extern_data_size: v[13],
            head_data_size: v[14],
            head_data_compressed_size: v[15],
            checksum_byte_size: v[16],
        })
    }
}

// ---------------------------------------------------------------------------
// Head data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadData {
    pub old_paths: Vec<String>,
    pub new_paths: Vec<String>,
    /// Indices into `old_paths`, ascending.
    pub old_ref_indices: Vec<usize>,
    /// Indices into `new_paths`, ascending.
    pub new_ref_indices: Vec<usize>,
    pub old_ref_sizes: Vec<u64>,
    pub new_ref_sizes: Vec<u64>,
    /// `(new index, old index)`, ascending by new index.
    pub same_pairs: Vec<(usize, usize)>,
    /// Indices into `new_paths` of executable files, ascending.
    pub new_exec_indices: Vec<usize>,
}

/// Σ(len + 1) over a path list.
pub fn path_sum_size(paths: &[String]) -> u64 {
    paths.iter().map(|p| p.len() as u64 + 1).sum()
}

fn pack_increments(out: &mut Vec<u8>, indices: impl IntoIterator<Item = usize>) {
    let mut next = 0usize;
    for idx in indices {
        varint::pack_uint(out, (idx - next) as u64);
        next = idx + 1;
    }
}

fn read_increments(
    r: &mut ByteReader<'_>,
    count: usize,
    limit: usize,
    what: &str,
) -> Result<Vec<usize>, DirError> {
    let mut out = Vec::with_capacity(count.min(r.remaining()));
    let mut next = 0usize;
    for _ in 0..count {
        let idx = next
            .checked_add(r.read_usize()?)
            .filter(|&i| i < limit)
            .ok_or_else(|| DirError::invalid(format!("{what} index out of range")))?;
        out.push(idx);
        next = idx + 1;
    }
    Ok(out)
}

fn count(v: u64, what: &str) -> Result<usize, DirError> {
    usize::try_from(v).map_err(|_| DirError::invalid(format!("{what} count too large")))
}

impl HeadData {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for p in self.old_paths.iter().chain(&self.new_paths) {
            out.extend_from_slice(p.as_bytes());
            out.push(0);
        }
        pack_increments(&mut out, self.old_ref_indices.iter().copied());
        pack_increments(&mut out, self.new_ref_indices.iter().copied());
        for &s in self.old_ref_sizes.iter().chain(&self.new_ref_sizes) {
            varint::pack_uint(&mut out, s);
        }
        pack_increments(&mut out, self.same_pairs.iter().map(|&(n, _)| n));
        let mut last_old = 0usize;
        for &(_, o) in &self.same_pairs {
            let (delta, back) = if o >= last_old {
                (o - last_old, 0)
            } else {
                (last_old - o, 1)
            };
            varint::pack_uint_with_tag(&mut out, delta as u64, back, 1);
            last_old = o;
        }
        pack_increments(&mut out, self.new_exec_indices.iter().copied());
        out
    }

    /// Decode and validate head data against its header.
    pub fn decode(buf: &[u8], h: &DirDiffHeader) -> Result<Self, DirError> {
        let mut r = ByteReader::new(buf);
        let old_count = count(h.old_path_count, "old path")?;
        let new_count = count(h.new_path_count, "new path")?;

        let old_paths = read_paths(&mut r, old_count, h.old_is_dir, "old")?;
        let new_paths = read_paths(&mut r, new_count, h.new_is_dir, "new")?;
        if path_sum_size(&old_paths) != h.old_path_sum_size
            || path_sum_size(&new_paths) != h.new_path_sum_size
        {
            return Err(DirError::invalid("path sizes disagree with header"));
        }

        let old_ref_indices =
            read_increments(&mut r, count(h.old_ref_file_count, "old ref")?, old_count, "old ref")?;
        let new_ref_indices =
            read_increments(&mut r, count(h.new_ref_file_count, "new ref")?, new_count, "new ref")?;
        let old_ref_sizes = read_sizes(&mut r, old_ref_indices.len(), h.old_ref_size, "old ref")?;
        let new_ref_sizes = read_sizes(&mut r, new_ref_indices.len(), h.new_ref_size, "new ref")?;

        let pair_count = count(h.same_file_pair_count, "same pair")?;
        let pair_new = read_increments(&mut r, pair_count, new_count, "same pair")?;
        let mut same_pairs = Vec::with_capacity(pair_new.len());
        let mut last_old = 0usize;
        for n in pair_new {
            let (delta, back) = r.read_uint_with_tag(1)?;
            let delta = usize::try_from(delta).ok();
            let o = if back != 0 {
                delta.and_then(|d| last_old.checked_sub(d))
            } else {
                delta.and_then(|d| last_old.checked_add(d))
            }
            .filter(|&o| o < old_count)
            .ok_or_else(|| DirError::invalid("same pair old index out of range"))?;
            same_pairs.push((n, o));
            last_old = o;
        }

        let new_exec_indices =
            read_increments(&mut r, count(h.new_execute_count, "exec")?, new_count, "exec")?;
        if !r.is_empty() {
            return Err(DirError::invalid(format!(
                "{} trailing bytes in head data",
                r.remaining()
            )));
        }

        let head = Self {
            old_paths,
            new_paths,
            old_ref_indices,
            new_ref_indices,
            old_ref_sizes,
            new_ref_sizes,
            same_pairs,
            new_exec_indices,
        };
        head.check_files(h.old_is_dir, h.new_is_dir)?;
        Ok(head)
    }

    /// Every referenced entry must be a file. A non-directory root is the
    /// single file `""`.
    fn check_files(&self, old_is_dir: bool, new_is_dir: bool) -> Result<(), DirError> {
        let old_file = |i: &usize| !old_is_dir || !is_dir_path(&self.old_paths[*i]);
        let new_file = |i: &usize| !new_is_dir || !is_dir_path(&self.new_paths[*i]);
        let ok = self.old_ref_indices.iter().all(old_file)
            && self.new_ref_indices.iter().all(new_file)
            && self.same_pairs.iter().all(|(n, o)| new_file(n) && old_file(o))
            && self.new_exec_indices.iter().all(new_file);
        if ok {
            Ok(())
        } else {
            Err(DirError::invalid("reference to a directory entry"))
        }
    }
}

fn read_paths(
    r: &mut ByteReader<'_>,
    count: usize,
    is_dir: bool,
    what: &str,
) -> Result<Vec<String>, DirError> {
    let mut paths: Vec<String> = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        let p = r.read_cstr()?;
        validate_path(p)?;
        if let Some(prev) = paths.last() {
            if prev.as_bytes() >= p.as_bytes() {
                return Err(DirError::invalid(format!("{what} paths not sorted")));
            }
        }
        paths.push(p.to_string());
    }
    let root_ok = match paths.first() {
        Some(first) => first.is_empty() && (is_dir || paths.len() == 1),
        None => false,
    };
    if !root_ok {
        return Err(DirError::invalid(format!("{what} listing has no root entry")));
    }
    Ok(paths)
}

fn read_sizes(
    r: &mut ByteReader<'_>,
    count: usize,
    total: u64,
    what: &str,
) -> Result<Vec<u64>, DirError> {
    let mut sizes = Vec::with_capacity(count.min(r.remaining()));
    let mut sum = 0u64;
    for _ in 0..count {
        let s = r.read_uint()?;
        if s == 0 {
            return Err(DirError::invalid(format!("empty {what} file")));
        }
        sum = sum
            .checked_add(s)
            .ok_or_else(|| DirError::invalid(format!("{what} sizes overflow")))?;
        sizes.push(s);
    }
    if sum != total {
        return Err(DirError::invalid(format!(
            "{what} sizes sum to {sum}, header says {total}"
        )));
    }
    Ok(sizes)
}

// ---------------------------------------------------------------------------
// Full info
// ---------------------------------------------------------------------------

/// Everything in a directory diff before the main diff.
#[derive(Debug, Clone)]
pub struct DirDiffInfo {
    pub header: DirDiffHeader,
    pub head: HeadData,
    /// `None` when the checksum plugin is unknown to this build.
    pub checksum: Option<ChecksumKind>,
    /// Indexed by the `SLOT_*` constants.
    pub checksums: [Vec<u8>; 4],
    pub private_extern_data: Vec<u8>,
    pub extern_data: Vec<u8>,
}

impl DirDiffInfo {
    /// Parse header, checksums, head data and extern data, leaving `r` at
    /// the main diff.
    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self, DirError> {
        let header = DirDiffHeader::read(r)?;
        if header.private_reserved_data_size != 0 {
            return Err(DirError::Unsupported("private reserved data".into()));
        }

        let checksum = ChecksumKind::from_name(&header.checksum_type);
        match checksum {
            Some(kind) if kind.byte_size() as u64 != header.checksum_byte_size => {
                return Err(DirError::invalid("checksum width disagrees with plugin"));
            }
            None => warn!(
                "unknown checksum plugin {:?}, skipping verification",
                header.checksum_type
            ),
            _ => {}
        }
        let width = count(header.checksum_byte_size, "checksum")?;
        if width > 64 {
            return Err(DirError::invalid("checksum too wide"));
        }
        let mut checksums: [Vec<u8>; 4] = Default::default();
        for slot in &mut checksums {
            *slot = read_vec(r, width as u64, "checksum")?;
        }

        let head_codec = codec::codec_for_name(&header.compress_type)?;
        let head = if header.head_data_compressed_size > 0 {
            let packed = read_vec(r, header.head_data_compressed_size, "head data")?;
            let codec: &dyn Codec = head_codec
                .as_deref()
                .ok_or_else(|| DirError::invalid("compressed head data without a compress type"))?;
            codec.decompress(&packed, header.head_data_size)?
        } else {
            read_vec(r, header.head_data_size, "head data")?
        };
        let head = HeadData::decode(&head, &header)?;

        let private_extern_data = read_vec(r, header.private_extern_data_size, "private extern data")?;
        let extern_data = read_vec(r, header.extern_data_size, "extern data")?;

        Ok(Self {
            header,
            head,
            checksum,
            checksums,
            private_extern_data,
            extern_data,
        })
    }

    /// Checksum plugin when verification is possible.
    pub fn verifiable_checksum(&self) -> Option<ChecksumKind> {
        self.checksum.filter(|k| *k != ChecksumKind::None)
    }
}

fn read_vec<R: Read + ?Sized>(r: &mut R, len: u64, what: &str) -> Result<Vec<u8>, DirError> {
    let cap = usize::try_from(len).map_err(|_| DirError::invalid(format!("{what} too large")))?;
    let mut out = Vec::with_capacity(cap.min(1 << 24));
    r.take(len).read_to_end(&mut out)?;
    if out.len() != cap {
        return Err(DirError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("truncated {what}"),
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_head() -> HeadData {
        HeadData {
            old_paths: ["", "a.txt", "dir/", "dir/b.bin", "gone.txt"].map(String::from).to_vec(),
            new_paths: ["", "a.txt", "dir/", "dir/b.bin", "dir/c.bin", "run.sh"]
                .map(String::from)
                .to_vec(),
            old_ref_indices: vec![1, 4],
            new_ref_indices: vec![1, 4],
            old_ref_sizes: vec![10, 20],
            new_ref_sizes: vec![12, 7],
            same_pairs: vec![(3, 3), (5, 1)],
            new_exec_indices: vec![5],
        }
    }

    fn header_for(head: &HeadData, body: &[u8]) -> DirDiffHeader {
        DirDiffHeader {
            compress_type: String::new(),
            checksum_type: "fadler64".into(),
            old_is_dir: true,
            new_is_dir: true,
            old_path_count: head.old_paths.len() as u64,
            old_path_sum_size: path_sum_size(&head.old_paths),
            new_path_count: head.new_paths.len() as u64,
            new_path_sum_size: path_sum_size(&head.new_paths),
            old_ref_file_count: head.old_ref_indices.len() as u64,
            old_ref_size: head.old_ref_sizes.iter().sum(),
            new_ref_file_count: head.new_ref_indices.len() as u64,
            new_ref_size: head.new_ref_sizes.iter().sum(),
            same_file_pair_count: head.same_pairs.len() as u64,
            same_file_size: 0,
            new_execute_count: head.new_exec_indices.len() as u64,
            head_data_size: body.len() as u64,
            checksum_byte_size: 8,
            ..Default::default()
        }
    }

    #[test]
    fn head_data_roundtrip() {
        let head = sample_head();
        let body = head.encode();
        let h = header_for(&head, &body);
        assert_eq!(HeadData::decode(&body, &h).unwrap(), head);
    }

    #[test]
    fn increments_are_compact() {
        let mut out = Vec::new();
        pack_increments(&mut out, [0usize, 1, 2, 10]);
        assert_eq!(out, vec![0, 0, 0, 7]);
    }

    #[test]
    fn header_roundtrip_and_info() {
        let head = sample_head();
        let body = head.encode();
        let h = header_for(&head, &body);

        let mut stream = h.to_bytes();
        for slot in 0..4u8 {
            stream.extend_from_slice(&[slot; 8]);
        }
        stream.extend_from_slice(&body);
        stream.extend_from_slice(b"MAIN");

        let mut r = stream.as_slice();
        let info = DirDiffInfo::read(&mut r).unwrap();
        assert_eq!(info.header, h);
        assert_eq!(info.head, head);
        assert_eq!(info.checksums[SLOT_DIFF], vec![3u8; 8]);
        assert_eq!(info.verifiable_checksum(), Some(ChecksumKind::Fadler64));
        assert_eq!(r, b"MAIN");
    }

    #[test]
    fn rejects_unsafe_or_unsorted_paths() {
        let mut head = sample_head();
        head.new_paths[4] = "../evil".into();
        let body = head.encode();
        assert!(HeadData::decode(&body, &header_for(&head, &body)).is_err());

        let mut head = sample_head();
        head.old_paths.swap(1, 2);
        let body = head.encode();
        assert!(HeadData::decode(&body, &header_for(&head, &body)).is_err());
    }

    #[test]
    fn rejects_ref_to_directory() {
        let mut head = sample_head();
        head.old_ref_indices = vec![1, 2];
        let body = head.encode();
        assert!(HeadData::decode(&body, &header_for(&head, &body)).is_err());
    }

    #[test]
    fn single_file_listing() {
        let head = HeadData {
            old_paths: vec![String::new()],
            new_paths: vec![String::new()],
            old_ref_indices: vec![0],
            new_ref_indices: vec![0],
            old_ref_sizes: vec![5],
            new_ref_sizes: vec![6],
            ..Default::default()
        };
        let body = head.encode();
        let mut h = header_for(&head, &body);
        h.old_is_dir = false;
        h.new_is_dir = false;
        assert_eq!(HeadData::decode(&body, &h).unwrap(), head);
    }
}
