// Match finding between old and new data.
//
// MatchEngine runs the profile's matcher and returns exact covers, sorted by
// new position and non-overlapping in new:
//   1. Store:  nothing
//   2. Suffix: at each new position take the longest match in old (suffix
//      array lookup); skip past it when long enough, else advance one byte
//   3. Block:  slide a rolling checksum over new, look up indexed old blocks,
//      verify bytes, then extend the hit forward and backward exactly

use log::debug;

use super::config::{MatcherConfig, MatcherKind};
use super::rolling::{RollingHash, match_backward, match_forward};
use super::suffix::SuffixArray;
use super::table::BlockTable;
use crate::compress::encoder::DiffError;
use crate::format::Cover;

/// Exact-match finder for one matcher profile.
///
/// The engine holds no index between calls; each `find_covers` builds the
/// suffix array or block table it needs over `old` and drops it on return.
pub struct MatchEngine {
    config: MatcherConfig,
}

impl MatchEngine {
    /// Create an engine for `config`, usually from `config_for_level`.
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Find exact covers of `new` in `old`.
    ///
    /// Every returned cover satisfies `old[old_pos..old_end] ==
    /// new[new_pos..new_end]`. Covers are sorted by `new_pos` and never
    /// overlap in new; they may overlap or repeat in old.
    ///
    /// Empty inputs and the store profile yield no covers. The suffix
    /// profile fails with `DiffError::TooLarge` when `old` is 4 GiB or
    /// more; the block profile has no size limit.
    pub fn find_covers(&self, old: &[u8], new: &[u8]) -> Result<Vec<Cover>, DiffError> {
        if old.is_empty() || new.is_empty() {
            return Ok(Vec::new());
        }
        let covers = match self.config.kind {
            MatcherKind::Store => Vec::new(),
            MatcherKind::Suffix => self.suffix_covers(old, new)?,
            MatcherKind::Block => self.block_covers(old, new),
        };
        debug!(
            "matcher {}: {} exact covers over {} new bytes",
            self.config.name,
            covers.len(),
            new.len()
        );
        Ok(covers)
    }

    /// Greedy scan of `new` against a suffix array of `old`.
    ///
    /// At each position the previous cover's diagonal is tried first, then
    /// the longest suffix-array match. A hit of at least `min_match` bytes
    /// becomes a cover and the scan jumps past it; otherwise the scan
    /// advances by one byte. Memory is O(old).
    fn suffix_covers(&self, old: &[u8], new: &[u8]) -> Result<Vec<Cover>, DiffError> {
        let sa = SuffixArray::new(old).ok_or(DiffError::TooLarge(old.len() as u64))?;
        let min_match = self.config.min_match;
        let mut covers: Vec<Cover> = Vec::new();
        let mut i = 0usize;

        while i + min_match <= new.len() {
            // Continuing the previous cover's diagonal is free to encode.
            if let Some(last) = covers.last() {
                let diag_old = (i as u64).checked_add_signed(last.diagonal() as i64);
                if let Some(o) = diag_old.filter(|&o| o < old.len() as u64) {
                    let run = match_forward(&old[o as usize..], &new[i..]);
                    if run >= min_match {
                        covers.push(Cover::new(o, i as u64, run as u64));
                        i += run;
                        continue;
                    }
                }
            }

            let (pos, len) = sa.longest_match(old, &new[i..]);
            if len >= min_match {
                covers.push(Cover::new(pos, i as u64, len as u64));
                i += len;
            } else {
                i += 1;
            }
        }
        Ok(covers)
    }

    /// Rolling-checksum scan of `new` against block-aligned chunks of `old`.
    ///
    /// Only full `block_size` blocks of `old` are indexed, so inputs shorter
    /// than one block produce nothing. A candidate is accepted only after a
    /// byte comparison. Hits are extended forward without limit and
    /// backward no further than the end of the previous cover. At most
    /// `max_chain` candidates are examined per position. Memory is
    /// O(old / block_size).
    fn block_covers(&self, old: &[u8], new: &[u8]) -> Vec<Cover> {
        let width = self.config.block_size;
        let mut covers = Vec::new();
        if old.len() < width || new.len() < width {
            return covers;
        }
        let hasher = RollingHash::new(width);
        let table = BlockTable::build(old, &hasher);
        debug!("block table: {} blocks of {width} bytes", table.blocks());

        let mut last_new_end = 0usize;
        let mut i = 0usize;
        let mut cksum: Option<u32> = None;

        while i + width <= new.len() {
            let ck = match cksum {
                Some(c) => c,
                None => hasher.checksum(&new[i..]),
            };

            let mut best: Option<(usize, usize, usize)> = None; // (old_pos, back, fwd)
            for cand in table.candidates(ck).take(self.config.max_chain) {
                let o = cand as usize;
                if old[o..o + width] != new[i..i + width] {
                    continue;
                }
                let fwd = width + match_forward(&old[o + width..], &new[i + width..]);
                let back = match_backward(&old[..o], &new[last_new_end..i]);
                if best.is_none_or(|(_, b, f)| back + fwd > b + f) {
                    best = Some((o, back, fwd));
                }
            }

            match best {
                Some((o, back, fwd)) => {
                    covers.push(Cover::new(
                        (o - back) as u64,
                        (i - back) as u64,
                        (back + fwd) as u64,
                    ));
                    i += fwd;
                    last_new_end = i;
                    cksum = None;
                }
                None => {
                    cksum = (i + width < new.len())
                        .then(|| hasher.update(ck, new[i], new[i + width]));
                    i += 1;
                }
            }
        }
        covers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::covers::validate_covers;
    use crate::hash::config::{self, MIN_MATCH};

    fn data(len: usize, seed: u32) -> Vec<u8> {
        let mut x = seed;
        (0..len)
            .map(|_| {
                x = x.wrapping_mul(1_103_515_245).wrapping_add(12345);
                (x >> 16) as u8
            })
            .collect()
    }

    fn check_exact(covers: &[Cover], old: &[u8], new: &[u8]) {
        validate_covers(covers, old.len() as u64, new.len() as u64).unwrap();
        for c in covers {
            let (o, n, l) = (c.old_pos as usize, c.new_pos as usize, c.len as usize);
            assert_eq!(old[o..o + l], new[n..n + l]);
        }
    }

    #[test]
    fn suffix_finds_moved_block() {
        let old = data(10_000, 1);
        let mut new = data(500, 2);
        new.extend_from_slice(&old[7000..9000]);
        new.extend_from_slice(&old[100..1100]);

        let engine = MatchEngine::new(config::DEFAULT);
        let covers = engine.find_covers(&old, &new).unwrap();
        check_exact(&covers, &old, &new);
        let covered: u64 = covers.iter().map(|c| c.len).sum();
        assert!(covered >= 3000, "covered {covered}");
    }

    #[test]
    fn block_finds_shifted_copy() {
        let old = data(8192, 3);
        let mut new = b"prefix-bytes".to_vec();
        new.extend_from_slice(&old[1000..5000]);

        for profile in [config::BLOCK_COARSE, config::BLOCK, config::BLOCK_FINE] {
            let covers = MatchEngine::new(profile).find_covers(&old, &new).unwrap();
            check_exact(&covers, &old, &new);
            let covered: u64 = covers.iter().map(|c| c.len).sum();
            // Backward extension may swallow a coincidental prefix byte.
            assert!((4000..=4012).contains(&covered), "{}: {covered}", profile.name);
        }
    }

    #[test]
    fn store_and_empty_inputs() {
        let old = data(1000, 4);
        assert!(MatchEngine::new(config::STORE).find_covers(&old, &old).unwrap().is_empty());
        let engine = MatchEngine::new(config::DEFAULT);
        assert!(engine.find_covers(&[], &old).unwrap().is_empty());
        assert!(engine.find_covers(&old, &[]).unwrap().is_empty());
    }

    #[test]
    fn unrelated_data_has_no_long_covers() {
        let old = data(4000, 5);
        let new = data(4000, 6);
        let engine = MatchEngine::new(config::SUFFIX_FAST);
        let covers = engine.find_covers(&old, &new).unwrap();
        check_exact(&covers, &old, &new);
        assert!(covers.iter().all(|c| c.len as usize >= MIN_MATCH));
    }
}
