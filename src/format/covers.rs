// Cover list: regions of new data that are derived from old data.
//
// Serialized relative to the previous cover's end positions so sequential
// covers cost a few bytes each. The old position is a signed delta stored as
// magnitude + 1-bit sign tag (1 = backwards).

use thiserror::Error;

use super::varint::{self, ByteReader, VarIntError};

/// `new[new_pos..new_pos + len]` is derived from `old[old_pos..old_pos + len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cover {
    pub old_pos: u64,
    pub new_pos: u64,
    pub len: u64,
}

impl Cover {
    pub fn new(old_pos: u64, new_pos: u64, len: u64) -> Self {
        Self {
            old_pos,
            new_pos,
            len,
        }
    }

    #[inline]
    pub fn old_end(&self) -> u64 {
        self.old_pos + self.len
    }

    #[inline]
    pub fn new_end(&self) -> u64 {
        self.new_pos + self.len
    }

    /// Diagonal identifier: covers on the same diagonal can be merged.
    #[inline]
    pub fn diagonal(&self) -> i128 {
        i128::from(self.old_pos) - i128::from(self.new_pos)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoverError {
    #[error("cover #{index} has zero length")]
    Empty { index: usize },
    #[error("cover #{index} overlaps or precedes the previous cover")]
    Unordered { index: usize },
    #[error("cover #{index} exceeds old data ({end} > {size})")]
    OldOutOfRange { index: usize, end: u64, size: u64 },
    #[error("cover #{index} exceeds new data ({end} > {size})")]
    NewOutOfRange { index: usize, end: u64, size: u64 },
    #[error("cover buffer: {0}")]
    Packed(#[from] VarIntError),
    #[error("cover buffer has {0} trailing bytes")]
    Trailing(usize),
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Serialize covers (already sorted by `new_pos`) into a cover buffer.
pub fn write_covers(covers: &[Cover]) -> Vec<u8> {
    let mut out = Vec::with_capacity(covers.len() * 4);
    let mut last_old_end = 0u64;
    let mut last_new_end = 0u64;
    for c in covers {
        if c.old_pos >= last_old_end {
            varint::pack_uint_with_tag(&mut out, c.old_pos - last_old_end, 0, 1);
        } else {
            varint::pack_uint_with_tag(&mut out, last_old_end - c.old_pos, 1, 1);
        }
        varint::pack_uint(&mut out, c.new_pos - last_new_end);
        varint::pack_uint(&mut out, c.len);
        last_old_end = c.old_end();
        last_new_end = c.new_end();
    }
    out
}

/// Parse exactly `count` covers from a cover buffer.
pub fn read_covers(buf: &[u8], count: usize) -> Result<Vec<Cover>, CoverError> {
    let mut r = ByteReader::new(buf);
    // Each cover takes at least 3 bytes; don't trust `count` for allocation.
    let mut covers = Vec::with_capacity(count.min(buf.len() / 3));
    let mut last_old_end = 0u64;
    let mut last_new_end = 0u64;
    for _ in 0..count {
        let (delta, back) = r.read_uint_with_tag(1)?;
        let old_pos = if back != 0 {
            last_old_end.checked_sub(delta)
        } else {
            last_old_end.checked_add(delta)
        }
        .ok_or(VarIntError::Overflow)?;
        let new_pos = last_new_end
            .checked_add(r.read_uint()?)
            .ok_or(VarIntError::Overflow)?;
        let len = r.read_uint()?;
        let cover = Cover::new(old_pos, new_pos, len);
        last_old_end = old_pos.checked_add(len).ok_or(VarIntError::Overflow)?;
        last_new_end = new_pos.checked_add(len).ok_or(VarIntError::Overflow)?;
        covers.push(cover);
    }
    if !r.is_empty() {
        return Err(CoverError::Trailing(r.remaining()));
    }
    Ok(covers)
}

/// Check ordering and bounds of a cover list against the data sizes.
pub fn validate_covers(covers: &[Cover], old_size: u64, new_size: u64) -> Result<(), CoverError> {
    let mut last_new_end = 0u64;
    for (index, c) in covers.iter().enumerate() {
        if c.len == 0 {
            return Err(CoverError::Empty { index });
        }
        if c.new_pos < last_new_end {
            return Err(CoverError::Unordered { index });
        }
        let old_end = c.old_pos.checked_add(c.len).unwrap_or(u64::MAX);
        if old_end > old_size {
            return Err(CoverError::OldOutOfRange {
                index,
                end: old_end,
                size: old_size,
            });
        }
        let new_end = c.new_pos.checked_add(c.len).unwrap_or(u64::MAX);
        if new_end > new_size {
            return Err(CoverError::NewOutOfRange {
                index,
                end: new_end,
                size: new_size,
            });
        }
        last_new_end = new_end;
    }
    Ok(())
}

/// Total number of new bytes covered.
pub fn covered_len(covers: &[Cover]) -> u64 {
    covers.iter().map(|c| c.len).sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_backward_old_positions() {
        let covers = vec![
            Cover::new(100, 0, 10),
            Cover::new(20, 15, 5), // jumps backwards in old
            Cover::new(25, 20, 30),
        ];
        let buf = write_covers(&covers);
        assert_eq!(read_covers(&buf, covers.len()).unwrap(), covers);
    }

    #[test]
    fn sequential_covers_are_compact() {
        let covers = vec![Cover::new(0, 0, 100), Cover::new(100, 100, 100)];
        let buf = write_covers(&covers);
        // Three single-byte fields per cover.
        assert_eq!(buf.len(), 6, "buf={buf:?}");
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut buf = write_covers(&[Cover::new(1, 2, 3)]);
        buf.push(0);
        assert_eq!(read_covers(&buf, 1), Err(CoverError::Trailing(1)));
    }

    #[test]
    fn backwards_underflow_rejected() {
        let mut buf = Vec::new();
        varint::pack_uint_with_tag(&mut buf, 5, 1, 1);
        varint::pack_uint(&mut buf, 0);
        varint::pack_uint(&mut buf, 1);
        assert!(read_covers(&buf, 1).is_err());
    }

    #[test]
    fn validation() {
        let ok = [Cover::new(0, 0, 4), Cover::new(0, 4, 4)];
        assert!(validate_covers(&ok, 8, 8).is_ok());

        let overlap = [Cover::new(0, 0, 4), Cover::new(0, 3, 4)];
        assert_eq!(
            validate_covers(&overlap, 8, 8),
            Err(CoverError::Unordered { index: 1 })
        );

        let old_oob = [Cover::new(6, 0, 4)];
        assert!(matches!(
            validate_covers(&old_oob, 8, 8),
            Err(CoverError::OldOutOfRange { .. })
        ));

        let empty = [Cover::new(0, 0, 0)];
        assert_eq!(
            validate_covers(&empty, 8, 8),
            Err(CoverError::Empty { index: 0 })
        );
    }
}
