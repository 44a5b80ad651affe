// Diff wire format.
//
// # Modules
//
// - `varint`: packed unsigned integers with high tag bits
// - `rle`: run-length coding of cover sub-diffs (ctrl + code streams)
// - `covers`: cover list serialization and validation
// - `header`: `HDIFF13` single-diff header
//
// The directory diff header (`HDIFF19`) lives in `dir::header`.

pub mod covers;
pub mod header;
pub mod rle;
pub mod varint;

pub use covers::{Cover, CoverError};
pub use header::{DIFF_MAGIC, DiffHeader, HeaderError, SectionSize};
pub use varint::{ByteReader, VarIntError};

/// Magic prefix of a directory diff.
pub const DIR_DIFF_MAGIC: &[u8] = b"HDIFF19&";

/// Kind of diff stream, detected from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// `HDIFF13`: one old byte stream to one new byte stream.
    Single,
    /// `HDIFF19`: old file or directory to new file or directory.
    Dir,
}

/// Identify a diff from its leading bytes.
pub fn detect(prefix: &[u8]) -> Option<DiffKind> {
    if prefix.starts_with(DIFF_MAGIC) {
        Some(DiffKind::Single)
    } else if prefix.starts_with(DIR_DIFF_MAGIC) {
        Some(DiffKind::Dir)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_both_kinds() {
        assert_eq!(detect(b"HDIFF13&zlib\0..."), Some(DiffKind::Single));
        assert_eq!(detect(b"HDIFF19&&\0"), Some(DiffKind::Dir));
        assert_eq!(detect(b"HDIFF1"), None);
        assert_eq!(detect(b"\xD6\xC3\xC4\x00"), None);
    }
}
