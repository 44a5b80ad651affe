// Block index for the rolling-hash matcher.
//
// Old data is cut into non-overlapping blocks of `width` bytes. Each block's
// rolling checksum is hashed into a bucket; buckets hold the most recent
// block and chain to earlier blocks with the same bucket via `next`.
//
// Stored values are `block + 1` so that 0 means "empty". Memory is
// O(old / width) regardless of how the old data looks.

use super::rolling::RollingHash;

pub struct BlockTable {
    /// `heads[bucket] = block + 1` or 0.
    heads: Vec<u32>,
    /// `next[block] = earlier block + 1` in the same bucket, or 0.
    next: Vec<u32>,
    mask: usize,
    width: usize,
}

impl BlockTable {
    /// Index every full block of `old`.
    pub fn build(old: &[u8], hasher: &RollingHash) -> Self {
        let width = hasher.width();
        let blocks = (old.len() / width).min(u32::MAX as usize - 1);
        let buckets = (blocks * 2).max(16).next_power_of_two();
        let mask = buckets - 1;
        let mut heads = vec![0u32; buckets];
        let mut next = vec![0u32; blocks];

        // Insert from the back so chains yield earlier blocks first.
        for block in (0..blocks).rev() {
            let pos = block * width;
            let cksum = hasher.checksum(&old[pos..pos + width]);
            let bucket = bucket_of(cksum, mask);
            next[block] = heads[bucket];
            heads[bucket] = block as u32 + 1;
        }

        Self {
            heads,
            next,
            mask,
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of indexed blocks.
    pub fn blocks(&self) -> usize {
        self.next.len()
    }

    /// Old positions whose block shares a bucket with `cksum`.
    ///
    /// Candidates are only hash-equal; callers verify the bytes.
    pub fn candidates(&self, cksum: u32) -> Candidates<'_> {
        Candidates {
            table: self,
            cur: self.heads[bucket_of(cksum, self.mask)],
        }
    }
}

#[inline(always)]
fn bucket_of(cksum: u32, mask: usize) -> usize {
    (cksum.wrapping_mul(0x9E37_79B1) >> 7) as usize & mask
}

pub struct Candidates<'a> {
    table: &'a BlockTable,
    cur: u32,
}

impl Iterator for Candidates<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.cur == 0 {
            return None;
        }
        let block = (self.cur - 1) as usize;
        self.cur = self.table.next[block];
        Some(block as u64 * self.table.width as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_identical_block() {
        let old: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 253) as u8).collect();
        let h = RollingHash::new(32);
        let table = BlockTable::build(&old, &h);
        assert_eq!(table.blocks(), 128);

        let probe = &old[640..672];
        let hits: Vec<u64> = table.candidates(h.checksum(probe)).collect();
        assert!(hits.contains(&640));
    }

    #[test]
    fn chains_repeated_blocks_in_order() {
        let old = b"ABCDEFGH".repeat(4);
        let h = RollingHash::new(8);
        let table = BlockTable::build(&old, &h);
        let hits: Vec<u64> = table.candidates(h.checksum(b"ABCDEFGH")).collect();
        assert_eq!(hits, vec![0, 8, 16, 24]);
    }

    #[test]
    fn short_old_has_no_blocks() {
        let h = RollingHash::new(64);
        let table = BlockTable::build(b"tiny", &h);
        assert_eq!(table.blocks(), 0);
        assert_eq!(table.candidates(h.checksum(&[0u8; 64])).count(), 0);
    }
}
