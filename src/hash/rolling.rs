// Rolling block checksum and byte-run comparison helpers.
//
// The checksum is Adler-style with scrambled input bytes: `low` is the sum of
// scrambled bytes, `high` the sum of prefix sums, both truncated to 16 bits.
// Scrambling spreads small alphabets (text, zero-heavy binaries) across the
// table instead of clustering them in a few buckets.

/// Byte scrambling table, generated at compile time.
static SCRAMBLE: [u32; 256] = build_scramble();

const fn build_scramble() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let x = (i as u32).wrapping_mul(0x9E37_79B1).rotate_left(13) ^ 0x5BD1_E995;
        table[i] = x & 0xFFFF;
        i += 1;
    }
    table
}

// ---------------------------------------------------------------------------
// Rolling hash
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RollingHash {
    width: usize,
    width_u32: u32,
}

impl RollingHash {
    pub fn new(width: usize) -> Self {
        debug_assert!(width > 0);
        Self {
            width,
            width_u32: width as u32,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Checksum of the first `width` bytes of `base`.
    #[inline]
    pub fn checksum(&self, base: &[u8]) -> u32 {
        debug_assert!(base.len() >= self.width);
        let mut low: u32 = 0;
        let mut high: u32 = 0;
        for &b in &base[..self.width] {
            low = low.wrapping_add(SCRAMBLE[b as usize]);
            high = high.wrapping_add(low);
        }
        ((high & 0xFFFF) << 16) | (low & 0xFFFF)
    }

    /// Slide the window one byte: drop `out`, append `inp`.
    #[inline(always)]
    pub fn update(&self, cksum: u32, out: u8, inp: u8) -> u32 {
        let old_c = SCRAMBLE[out as usize];
        let new_c = SCRAMBLE[inp as usize];
        let low = (cksum & 0xFFFF).wrapping_sub(old_c).wrapping_add(new_c) & 0xFFFF;
        let high = (cksum >> 16)
            .wrapping_sub(old_c.wrapping_mul(self.width_u32))
            .wrapping_add(low)
            & 0xFFFF;
        (high << 16) | low
    }
}

// ---------------------------------------------------------------------------
// Match helpers
// ---------------------------------------------------------------------------

/// Length of the common prefix of `a` and `b`.
#[inline]
pub fn match_forward(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);

    let mut i = 0usize;
    while i + 8 <= n {
        let x = u64::from_ne_bytes(a[i..i + 8].try_into().unwrap_or([0; 8]));
        let y = u64::from_ne_bytes(b[i..i + 8].try_into().unwrap_or([0; 8]));
        if x != y {
            break;
        }
        i += 8;
    }
    while i < n && a[i] == b[i] {
        i += 1;
    }
    i
}

/// Length of the common suffix of `a` and `b`.
#[inline]
pub fn match_backward(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_update_matches_full_checksum() {
        let data: Vec<u8> = (0..500u32).map(|i| (i * 7 % 256) as u8).collect();
        for width in [1usize, 8, 16, 64] {
            let h = RollingHash::new(width);
            let mut ck = h.checksum(&data);
            for i in 1..=data.len() - width {
                ck = h.update(ck, data[i - 1], data[i + width - 1]);
                assert_eq!(ck, h.checksum(&data[i..]), "width={width} i={i}");
            }
        }
    }

    #[test]
    fn scramble_spreads_small_alphabet() {
        let mut seen = std::collections::HashSet::new();
        for b in 0u8..=255 {
            seen.insert(SCRAMBLE[b as usize]);
        }
        assert!(seen.len() > 250);
    }

    #[test]
    fn forward_and_backward() {
        assert_eq!(match_forward(b"abcdefghijklmnop", b"abcdefghijklmnoX"), 15);
        assert_eq!(match_forward(b"abc", b"abcdef"), 3);
        assert_eq!(match_forward(b"", b"x"), 0);
        assert_eq!(match_backward(b"xxhello", b"yhello"), 5);
        assert_eq!(match_backward(b"a", b"b"), 0);
    }
}
