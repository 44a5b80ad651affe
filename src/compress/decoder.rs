// Streaming patch applier.
//
// PatchDecoder reads an `HDIFF13` diff:
//   - header, cover list, RLE ctrl and RLE code are loaded into memory
//   - the new-data section stays in the stream and is pulled through the
//     codec's reader as uncovered bytes are needed
//   - output is produced in chunks of at most `cache_size` bytes, so memory
//     use does not grow with the size of old or new data

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use thiserror::Error;

use super::codec::{Codec, codec_for_name};
use crate::format::covers::{self, Cover, CoverError};
use crate::format::header::{DiffHeader, HeaderError, SectionSize};
use crate::format::rle::RleDecoder;
use crate::format::varint::VarIntError;

/// Default reconstruction buffer size.
pub const DEFAULT_CACHE_SIZE: usize = 1 << 20;

/// Smallest reconstruction buffer accepted.
pub const MIN_CACHE_SIZE: usize = 4 << 10;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("section of {0} bytes does not fit in memory")]
    TooLarge(u64),
    #[error("{0}")]
    Header(#[from] HeaderError),
    #[error("bad cover list: {0}")]
    Cover(#[from] CoverError),
    #[error("corrupt packed data: {0}")]
    Packed(#[from] VarIntError),
    #[error("old data is {actual} bytes, diff expects {expected}")]
    OldSizeMismatch { expected: u64, actual: u64 },
    #[error("produced {actual} bytes, diff declares {expected}")]
    OutputSizeMismatch { expected: u64, actual: u64 },
    #[error("checksum mismatch in {what}")]
    ChecksumMismatch { what: &'static str },
}

// ---------------------------------------------------------------------------
// Old data access
// ---------------------------------------------------------------------------

/// Random-access view of the old data a diff applies to.
pub trait OldSource {
    /// Total length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the bytes at `pos..pos + buf.len()`.
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), PatchError>;
}

fn slice_read_at(data: &[u8], pos: u64, buf: &mut [u8]) -> Result<(), PatchError> {
    let start = usize::try_from(pos).map_err(|_| PatchError::TooLarge(pos))?;
    let src = start
        .checked_add(buf.len())
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| PatchError::InvalidInput(format!("old read at {pos} out of range")))?;
    buf.copy_from_slice(src);
    Ok(())
}

impl OldSource for &[u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), PatchError> {
        slice_read_at(self, pos, buf)
    }
}

impl OldSource for Vec<u8> {
    fn len(&self) -> u64 {
        Vec::len(self) as u64
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), PatchError> {
        slice_read_at(self, pos, buf)
    }
}

impl<S: OldSource + ?Sized> OldSource for &mut S {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), PatchError> {
        (**self).read_at(pos, buf)
    }
}

/// Old data backed by a file. Seeks only when reads are not sequential.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
    pos: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::from_file(File::open(path)?)
    }

    pub fn from_file(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self { file, len, pos: 0 })
    }
}

impl OldSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), PatchError> {
        let end = pos.checked_add(buf.len() as u64).unwrap_or(u64::MAX);
        if end > self.len {
            return Err(PatchError::InvalidInput(format!(
                "old read {pos}..{end} past end of file ({})",
                self.len
            )));
        }
        if pos != self.pos {
            self.file.seek(SeekFrom::Start(pos))?;
        }
        self.file.read_exact(buf)?;
        self.pos = end;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Options and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PatchOptions {
    /// Reconstruction buffer size in bytes (clamped to `MIN_CACHE_SIZE`).
    pub cache_size: usize,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Summary of one patch application.
#[derive(Debug, Clone, Default)]
pub struct PatchStats {
    pub old_size: u64,
    pub new_size: u64,
    pub cover_count: u64,
    /// New bytes produced from old data plus the RLE sub-diff.
    pub covered_bytes: u64,
    /// New bytes copied from the new-data section.
    pub new_data_bytes: u64,
    pub compress_type: String,
}

// ---------------------------------------------------------------------------
// PatchDecoder
// ---------------------------------------------------------------------------

/// Applies an `HDIFF13` diff read from `R`.
pub struct PatchDecoder<R: Read> {
    reader: R,
    header: DiffHeader,
    codec: Option<Box<dyn Codec>>,
    covers: Vec<Cover>,
    rle_ctrl: Vec<u8>,
    rle_code: Vec<u8>,
    cache_size: usize,
}

impl<R: Read> PatchDecoder<R> {
    /// Parse the header and the in-memory sections. The reader is left at
    /// the start of the new-data section.
    pub fn new(mut reader: R, options: PatchOptions) -> Result<Self, PatchError> {
        let header = DiffHeader::read(&mut reader)?;
        let codec = codec_for_name(&header.compress_type)?;

        let cover_buf = read_section(&mut reader, header.covers, codec.as_deref(), "cover")?;
        let count = usize::try_from(header.cover_count)
            .map_err(|_| PatchError::TooLarge(header.cover_count))?;
        let covers = covers::read_covers(&cover_buf, count)?;
        covers::validate_covers(&covers, header.old_size, header.new_size)?;

        let covered = covers::covered_len(&covers);
        if header.new_size - covered != header.new_data.size {
            return Err(PatchError::InvalidInput(format!(
                "new-data section is {} bytes, uncovered output is {}",
                header.new_data.size,
                header.new_size - covered
            )));
        }

        let rle_ctrl = read_section(&mut reader, header.rle_ctrl, codec.as_deref(), "RLE ctrl")?;
        let rle_code = read_section(&mut reader, header.rle_code, codec.as_deref(), "RLE code")?;

        debug!(
            "diff header: new={} old={} covers={} compress={:?}",
            header.new_size, header.old_size, header.cover_count, header.compress_type
        );

        Ok(Self {
            reader,
            header,
            codec,
            covers,
            rle_ctrl,
            rle_code,
            cache_size: options.cache_size.max(MIN_CACHE_SIZE),
        })
    }

    pub fn header(&self) -> &DiffHeader {
        &self.header
    }

    pub fn covers(&self) -> &[Cover] {
        &self.covers
    }

    /// Reconstruct the new data from `old`, writing it to `writer`.
    pub fn patch_to<S, W>(mut self, old: &mut S, writer: &mut W) -> Result<PatchStats, PatchError>
    where
        S: OldSource + ?Sized,
        W: Write + ?Sized,
    {
        let header = &self.header;
        if old.len() != header.old_size {
            return Err(PatchError::OldSizeMismatch {
                expected: header.old_size,
                actual: old.len(),
            });
        }

        let section = header.new_data;
        let mut raw = (&mut self.reader).take(section.stored_len());
        let mut new_data: Box<dyn Read + '_> = if section.is_compressed() {
            let codec = self.codec.as_deref().ok_or_else(|| {
                PatchError::InvalidInput("compressed new-data section without a compress type".into())
            })?;
            codec.reader(Box::new(&mut raw))?
        } else {
            Box::new(&mut raw)
        };
        let mut rle = RleDecoder::new(&self.rle_ctrl, &self.rle_code);

        let new_size = header.new_size;
        let cache = usize::try_from(new_size)
            .unwrap_or(usize::MAX)
            .clamp(1, self.cache_size);
        let mut buf = vec![0u8; cache];
        let mut pos = 0u64;
        let mut next_cover = 0usize;
        let mut covered_bytes = 0u64;
        let mut new_data_bytes = 0u64;

        while pos < new_size {
            let n = (new_size - pos).min(cache as u64) as usize;
            let chunk = &mut buf[..n];
            let mut off = 0usize;
            while off < n {
                let p = pos + off as u64;
                while next_cover < self.covers.len() && self.covers[next_cover].new_end() <= p {
                    next_cover += 1;
                }
                match self.covers.get(next_cover) {
                    Some(c) if c.new_pos <= p => {
                        let take = (c.new_end() - p).min((n - off) as u64) as usize;
                        let seg = &mut chunk[off..off + take];
                        old.read_at(c.old_pos + (p - c.new_pos), seg)?;
                        rle.add_to(seg).map_err(|e| {
                            PatchError::InvalidInput(format!("RLE stream too short: {e}"))
                        })?;
                        covered_bytes += take as u64;
                        off += take;
                    }
                    other => {
                        let gap_end = other.map_or(new_size, |c| c.new_pos);
                        let take = (gap_end - p).min((n - off) as u64) as usize;
                        read_stream_exact(&mut new_data, &mut chunk[off..off + take], "new-data")?;
                        new_data_bytes += take as u64;
                        off += take;
                    }
                }
            }
            writer.write_all(chunk)?;
            pos += n as u64;
        }

        if !rle.is_finished() {
            return Err(PatchError::InvalidInput("trailing bytes in RLE stream".into()));
        }
        let mut probe = [0u8; 1];
        if new_data.read(&mut probe)? != 0 {
            return Err(PatchError::InvalidInput("trailing bytes in new-data section".into()));
        }
        // Leave the stream positioned after the diff.
        drop(new_data);
        io::copy(&mut raw, &mut io::sink())?;
        let produced = covered_bytes + new_data_bytes;
        if produced != new_size {
            return Err(PatchError::OutputSizeMismatch {
                expected: new_size,
                actual: produced,
            });
        }

        Ok(PatchStats {
            old_size: header.old_size,
            new_size,
            cover_count: header.cover_count,
            covered_bytes,
            new_data_bytes,
            compress_type: header.compress_type.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Section helpers
// ---------------------------------------------------------------------------

/// Load a whole section into memory, decompressing if needed.
fn read_section<R: Read + ?Sized>(
    reader: &mut R,
    section: SectionSize,
    codec: Option<&dyn Codec>,
    what: &str,
) -> Result<Vec<u8>, PatchError> {
    let stored = section.stored_len();
    let cap = usize::try_from(stored).map_err(|_| PatchError::TooLarge(stored))?;
    let mut data = Vec::with_capacity(cap.min(1 << 24));
    reader.take(stored).read_to_end(&mut data)?;
    if (data.len() as u64) < stored {
        return Err(PatchError::InvalidInput(format!(
            "truncated {what} section ({} of {stored} bytes)",
            data.len()
        )));
    }
    if !section.is_compressed() {
        return Ok(data);
    }
    let codec = codec.ok_or_else(|| {
        PatchError::InvalidInput(format!("compressed {what} section without a compress type"))
    })?;
    codec.decompress(&data, section.size)
}

fn read_stream_exact(r: &mut dyn Read, buf: &mut [u8], what: &str) -> Result<(), PatchError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            PatchError::InvalidInput(format!("{what} section too short"))
        }
        _ => PatchError::Io(e),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::codec::Compression;
    use crate::compress::encoder::{DiffOptions, create_diff};

    fn make_diff(old: &[u8], new: &[u8], compression: Compression) -> Vec<u8> {
        let mut out = Vec::new();
        let opts = DiffOptions {
            compression,
            ..DiffOptions::default()
        };
        create_diff(old, new, &mut out, &opts).unwrap();
        out
    }

    fn sample() -> (Vec<u8>, Vec<u8>) {
        let old: Vec<u8> = (0..20_000u32).map(|i| (i * 13 % 251) as u8).collect();
        let mut new = old.clone();
        new[100..110].copy_from_slice(b"0123456789");
        new.splice(5000..5000, b"inserted text".iter().copied());
        new.truncate(18_000);
        (old, new)
    }

    #[test]
    fn small_cache_reconstructs_exactly() {
        let (old, new) = sample();
        let diff = make_diff(&old, &new, Compression::None);
        let dec = PatchDecoder::new(
            diff.as_slice(),
            PatchOptions {
                cache_size: 1, // clamped to MIN_CACHE_SIZE
            },
        )
        .unwrap();
        let mut out = Vec::new();
        let stats = dec.patch_to(&mut old.as_slice(), &mut out).unwrap();
        assert_eq!(out, new);
        assert_eq!(stats.covered_bytes + stats.new_data_bytes, new.len() as u64);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn compressed_new_data_streams() {
        let (old, new) = sample();
        let diff = make_diff(&old, &new, Compression::Zstd { level: 3 });
        let dec = PatchDecoder::new(diff.as_slice(), PatchOptions::default()).unwrap();
        let mut out = Vec::new();
        dec.patch_to(&mut old.clone(), &mut out).unwrap();
        assert_eq!(out, new);
    }

    #[test]
    fn wrong_old_size_rejected() {
        let (old, new) = sample();
        let diff = make_diff(&old, &new, Compression::None);
        let dec = PatchDecoder::new(diff.as_slice(), PatchOptions::default()).unwrap();
        let err = dec
            .patch_to(&mut &old[..old.len() - 1], &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, PatchError::OldSizeMismatch { .. }));
    }

    #[test]
    fn truncated_diff_rejected() {
        let (old, new) = sample();
        let diff = make_diff(&old, &new, Compression::None);
        let cut = &diff[..diff.len() - 1];
        let result = PatchDecoder::new(cut, PatchOptions::default())
            .and_then(|d| d.patch_to(&mut old.as_slice(), &mut Vec::new()));
        assert!(result.is_err());
    }

    #[test]
    fn bad_magic_rejected() {
        let err = PatchDecoder::new(&b"HDIFF99&\0\0\0\0"[..], PatchOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, PatchError::Header(HeaderError::BadMagic { .. })));
    }

    #[test]
    fn file_source_reads_ranges() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let mut src = FileSource::open(tmp.path()).unwrap();
        assert_eq!(src.len(), 10);
        let mut buf = [0u8; 3];
        src.read_at(7, &mut buf).unwrap();
        assert_eq!(&buf, b"789");
        src.read_at(2, &mut buf).unwrap();
        assert_eq!(&buf, b"234");
        assert!(src.read_at(8, &mut buf).is_err());
    }
}
