// `HDIFF13` compressed single-diff header.
//
//   "HDIFF13&" <compress type> "\0"
//   new_data_size old_data_size cover_count
//   (size, compressed size) for: covers, rle ctrl, rle code, new data
//
// All integers are untagged packed integers. Sections follow the header in
// the same order; a section is compressed iff its compressed size is non-zero.

use std::io::{self, Read, Write};

use thiserror::Error;

use super::varint;

/// Magic prefix of a single compressed diff (including the separator).
pub const DIFF_MAGIC: &[u8] = b"HDIFF13&";

/// Longest compress type name accepted while parsing.
pub const MAX_TYPE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("bad magic: not a {expected} diff")]
    BadMagic { expected: &'static str },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Section sizes
// ---------------------------------------------------------------------------

/// Raw and compressed size of one section. `compressed == 0` means stored raw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionSize {
    pub size: u64,
    pub compressed: u64,
}

impl SectionSize {
    pub fn raw(size: u64) -> Self {
        Self {
            size,
            compressed: 0,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed > 0
    }

    /// Number of bytes the section occupies in the diff stream.
    pub fn stored_len(&self) -> u64 {
        if self.is_compressed() {
            self.compressed
        } else {
            self.size
        }
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffHeader {
    /// Compression plugin name (`""` when nothing is compressed).
    pub compress_type: String,
    pub new_size: u64,
    pub old_size: u64,
    pub cover_count: u64,
    pub covers: SectionSize,
    pub rle_ctrl: SectionSize,
    pub rle_code: SectionSize,
    pub new_data: SectionSize,
}

impl DiffHeader {
    /// Serialize the header.
    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(DIFF_MAGIC);
        out.extend_from_slice(self.compress_type.as_bytes());
        out.push(0);
        for v in [self.new_size, self.old_size, self.cover_count] {
            varint::pack_uint(&mut out, v);
        }
        for s in self.sections() {
            varint::pack_uint(&mut out, s.size);
            varint::pack_uint(&mut out, s.compressed);
        }
        out
    }

    /// Parse a header from a stream, leaving it positioned at the cover section.
    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != DIFF_MAGIC {
            return Err(HeaderError::BadMagic {
                expected: "HDIFF13",
            });
        }
        let ty = varint::stream_read_cstr(r, MAX_TYPE_LEN)?;
        let compress_type = String::from_utf8(ty)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "compress type not UTF-8"))?;

        let new_size = varint::stream_read_uint(r)?;
        let old_size = varint::stream_read_uint(r)?;
        let cover_count = varint::stream_read_uint(r)?;
        let mut sections = [SectionSize::default(); 4];
        for s in &mut sections {
            s.size = varint::stream_read_uint(r)?;
            s.compressed = varint::stream_read_uint(r)?;
        }
        let [covers, rle_ctrl, rle_code, new_data] = sections;
        Ok(Self {
            compress_type,
            new_size,
            old_size,
            cover_count,
            covers,
            rle_ctrl,
            rle_code,
            new_data,
        })
    }

    /// Section sizes in stream order.
    pub fn sections(&self) -> [SectionSize; 4] {
        [self.covers, self.rle_ctrl, self.rle_code, self.new_data]
    }

    /// Bytes following the header.
    pub fn body_len(&self) -> u64 {
        self.sections().iter().map(SectionSize::stored_len).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DiffHeader {
        DiffHeader {
            compress_type: "zstd".into(),
            new_size: 1 << 20,
            old_size: 12345,
            cover_count: 7,
            covers: SectionSize {
                size: 40,
                compressed: 0,
            },
            rle_ctrl: SectionSize {
                size: 300,
                compressed: 120,
            },
            rle_code: SectionSize::raw(9),
            new_data: SectionSize {
                size: 100_000,
                compressed: 5_000,
            },
        }
    }

    #[test]
    fn write_read_roundtrip() {
        let h = sample();
        let bytes = h.to_bytes();
        assert!(bytes.starts_with(b"HDIFF13&zstd\0"));
        let parsed = DiffHeader::read(&mut io::Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(h.body_len(), 40 + 120 + 9 + 5_000);
    }

    #[test]
    fn uncompressed_type_is_empty_string() {
        let h = DiffHeader::default();
        let bytes = h.to_bytes();
        assert!(bytes.starts_with(b"HDIFF13&\0"));
        assert_eq!(DiffHeader::read(&mut io::Cursor::new(&bytes)).unwrap(), h);
    }

    #[test]
    fn bad_magic() {
        let err = DiffHeader::read(&mut io::Cursor::new(b"HDIFF19&zstd&\0")).unwrap_err();
        assert!(matches!(err, HeaderError::BadMagic { .. }));
    }

    #[test]
    fn truncated_header() {
        let bytes = sample().to_bytes();
        let err = DiffHeader::read(&mut io::Cursor::new(&bytes[..bytes.len() - 1])).unwrap_err();
        assert!(matches!(err, HeaderError::Io(_)));
    }
}
