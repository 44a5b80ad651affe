// Suffix array over old data.
//
// Built by prefix doubling: suffixes are sorted by their first `k` bytes,
// then re-sorted by (rank of first k, rank of next k) until all ranks are
// distinct. Indices are `u32`, so old data must stay below 4 GiB.

/// Largest old data the suffix matcher accepts.
pub const MAX_SUFFIX_LEN: u64 = u32::MAX as u64;

/// Sorted start positions of every suffix of the old data.
///
/// The array does not keep the data; `longest_match` must be passed the
/// same slice the array was built from.
pub struct SuffixArray {
    sa: Vec<u32>,
}

impl SuffixArray {
    /// Build the suffix array of `data`, or `None` if it is too large.
    pub fn new(data: &[u8]) -> Option<Self> {
        if data.len() as u64 >= MAX_SUFFIX_LEN {
            return None;
        }
        Some(Self { sa: build(data) })
    }

    pub fn len(&self) -> usize {
        self.sa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sa.is_empty()
    }

    /// Suffix start positions in sorted order.
    pub fn as_slice(&self) -> &[u32] {
        &self.sa
    }

    /// Find the suffix of `data` sharing the longest prefix with `needle`.
    ///
    /// Returns `(position, length)` with `data[position..position + length]
    /// == needle[..length]`; length 0 when nothing matches. `data` must be
    /// the slice passed to `new`.
    ///
    /// The binary search narrows to two neighbouring suffixes around
    /// `needle` and the longer of their common prefixes wins; ties go to the
    /// lower one. Cost is O(|needle| log n).
    pub fn longest_match(&self, data: &[u8], needle: &[u8]) -> (u64, usize) {
        if self.sa.is_empty() || needle.is_empty() {
            return (0, 0);
        }
        let suffix = |i: usize| &data[self.sa[i] as usize..];

        let mut lo = 0usize;
        let mut hi = self.sa.len() - 1;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            let s = suffix(mid);
            let n = s.len().min(needle.len());
            if s[..n] < needle[..n] {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let lo_len = common_prefix(suffix(lo), needle);
        let hi_len = common_prefix(suffix(hi), needle);
        if hi_len > lo_len {
            (u64::from(self.sa[hi]), hi_len)
        } else {
            (u64::from(self.sa[lo]), lo_len)
        }
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    super::rolling::match_forward(a, b)
}

/// Prefix doubling. After the round with step `k`, `rank[i]` orders
/// suffixes by their first `2k` bytes; the loop ends once every rank is
/// distinct.
fn build(data: &[u8]) -> Vec<u32> {
    let n = data.len();
    let mut sa: Vec<u32> = (0..n as u32).collect();
    if n < 2 {
        return sa;
    }
    let mut rank: Vec<u32> = data.iter().map(|&b| u32::from(b)).collect();
    let mut keys = vec![0u64; n];
    let mut next_rank = vec![0u32; n];

    let mut k = 1usize;
    loop {
        for i in 0..n {
            let second = if i + k < n { u64::from(rank[i + k]) + 1 } else { 0 };
            keys[i] = (u64::from(rank[i]) << 32) | second;
        }
        sort_by_keys(&mut sa, &keys);

        next_rank[sa[0] as usize] = 0;
        for w in 1..n {
            let (prev, cur) = (sa[w - 1] as usize, sa[w] as usize);
            let bump = u32::from(keys[cur] != keys[prev]);
            next_rank[cur] = next_rank[prev] + bump;
        }
        std::mem::swap(&mut rank, &mut next_rank);

        if rank[sa[n - 1] as usize] as usize == n - 1 || k >= n {
            break;
        }
        k *= 2;
    }
    sa
}

#[cfg(feature = "parallel")]
fn sort_by_keys(sa: &mut [u32], keys: &[u64]) {
    use rayon::prelude::*;
    sa.par_sort_unstable_by_key(|&i| keys[i as usize]);
}

#[cfg(not(feature = "parallel"))]
fn sort_by_keys(sa: &mut [u32], keys: &[u64]) {
    sa.sort_unstable_by_key(|&i| keys[i as usize]);
}
