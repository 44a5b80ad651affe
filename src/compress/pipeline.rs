// Cover refinement.
//
// Runs between matching and serialization:
//   1. Approximate extension: grow each cover forward and backward across
//      bytes that mostly agree (the sub-diff for those bytes is cheap to
//      RLE-encode), never into a neighbouring cover
//   2. Diagonal merge: join consecutive covers on the same diagonal when the
//      gap between them is small or zero
//   3. Minimum length: drop covers shorter than the profile minimum
//
// Input covers must be sorted by new position and non-overlapping in new;
// the output keeps that property.

use log::debug;

use crate::format::Cover;
use crate::hash::config::{EXTEND_GIVE_UP, MAX_MERGE_GAP, MatcherConfig};

/// Refine exact covers into the final cover list.
pub fn refine(covers: Vec<Cover>, old: &[u8], new: &[u8], config: &MatcherConfig) -> Vec<Cover> {
    let before = covers.len();
    let mut covers = covers;
    if config.extend {
        extend_covers(&mut covers, old, new);
    }
    let covers = merge_diagonals(covers);
    let covers: Vec<Cover> = covers
        .into_iter()
        .filter(|c| c.len >= config.min_match as u64)
        .collect();
    debug!("refine: {before} covers in, {} out", covers.len());
    covers
}

// ---------------------------------------------------------------------------
// Approximate extension
// ---------------------------------------------------------------------------

/// Best extension length over a sequence of equal/unequal byte pairs.
///
/// Scores +1 per equal pair and -2 per differing pair; stops once the
/// score falls `EXTEND_GIVE_UP` below the best seen.
fn best_extension(pairs: impl Iterator<Item = (u8, u8)>) -> usize {
    let mut score = 0i64;
    let mut best_score = 0i64;
    let mut best_len = 0usize;
    for (j, (a, b)) in pairs.enumerate() {
        score += if a == b { 1 } else { -2 };
        if score > best_score {
            best_score = score;
            best_len = j + 1;
        } else if score < best_score - EXTEND_GIVE_UP {
            break;
        }
    }
    best_len
}

fn extend_covers(covers: &mut [Cover], old: &[u8], new: &[u8]) {
    let mut prev_new_end = 0u64;
    for k in 0..covers.len() {
        let next_new_pos = covers
            .get(k + 1)
            .map_or(new.len() as u64, |c| c.new_pos);
        let c = &mut covers[k];

        // Backward, bounded by the previous cover's (already extended) end.
        let room = (c.new_pos - prev_new_end).min(c.old_pos) as usize;
        if room > 0 {
            let (o, n) = (c.old_pos as usize, c.new_pos as usize);
            let back = best_extension(
                old[o - room..o]
                    .iter()
                    .rev()
                    .copied()
                    .zip(new[n - room..n].iter().rev().copied()),
            ) as u64;
            c.old_pos -= back;
            c.new_pos -= back;
            c.len += back;
        }

        // Forward, bounded by the next cover's start.
        let room = (next_new_pos - c.new_end()).min(old.len() as u64 - c.old_end()) as usize;
        if room > 0 {
            let (o, n) = (c.old_end() as usize, c.new_end() as usize);
            let fwd = best_extension(
                old[o..o + room]
                    .iter()
                    .copied()
                    .zip(new[n..n + room].iter().copied()),
            ) as u64;
            c.len += fwd;
        }

        prev_new_end = c.new_end();
    }
}

// ---------------------------------------------------------------------------
// Diagonal merge
// ---------------------------------------------------------------------------

fn merge_diagonals(covers: Vec<Cover>) -> Vec<Cover> {
    let mut out: Vec<Cover> = Vec::with_capacity(covers.len());
    for c in covers {
        if let Some(last) = out.last_mut() {
            let gap = c.new_pos - last.new_end();
            if last.diagonal() == c.diagonal() && gap <= MAX_MERGE_GAP {
                last.len = c.new_end() - last.new_pos;
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::covers::validate_covers;
    use crate::hash::config;

    #[test]
    fn extension_scoring() {
        let eq = |n: usize| std::iter::repeat_n((1u8, 1u8), n);
        let ne = |n: usize| std::iter::repeat_n((1u8, 2u8), n);
        assert_eq!(best_extension(eq(10)), 10);
        assert_eq!(best_extension(ne(10)), 0);
        // One mismatch inside a long agreeing run is absorbed.
        assert_eq!(best_extension(eq(5).chain(ne(1)).chain(eq(5))), 11);
        // Agreement after a long mismatching stretch is never reached.
        assert_eq!(best_extension(eq(2).chain(ne(20)).chain(eq(100))), 2);
    }

    #[test]
    fn extends_across_single_byte_edits() {
        let old: Vec<u8> = (0..200u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut new = old.clone();
        new[50] ^= 0xFF;
        new[120] ^= 0xFF;
        let exact = vec![Cover::new(60, 60, 50)];
        let out = refine(exact, &old, &new, &config::DEFAULT);
        assert_eq!(out, vec![Cover::new(0, 0, 200)]);
    }

    #[test]
    fn merges_same_diagonal() {
        let covers = vec![
            Cover::new(100, 0, 10),
            Cover::new(120, 20, 10),
            Cover::new(500, 30, 10),
            Cover::new(510, 40, 10),
        ];
        assert_eq!(
            merge_diagonals(covers),
            vec![Cover::new(100, 0, 30), Cover::new(500, 30, 20)]
        );
    }

    #[test]
    fn merge_gap_is_bounded() {
        let gap = MAX_MERGE_GAP;
        let bridged = vec![Cover::new(0, 0, 10), Cover::new(10 + gap, 10 + gap, 10)];
        assert_eq!(merge_diagonals(bridged), vec![Cover::new(0, 0, 20 + gap)]);

        let apart = vec![Cover::new(0, 0, 10), Cover::new(11 + gap, 11 + gap, 10)];
        assert_eq!(merge_diagonals(apart.clone()), apart);
    }

    #[test]
    fn bridged_gap_roundtrips() {
        let old: Vec<u8> = (0..300u32).map(|i| (i * 31 % 251) as u8).collect();
        let mut new = old.clone();
        for b in &mut new[100..120] {
            *b = b.wrapping_add(0x55);
        }
        let covers = vec![Cover::new(0, 0, 100), Cover::new(120, 120, 180)];
        let out = refine(covers, &old, &new, &config::DEFAULT);
        assert_eq!(out, vec![Cover::new(0, 0, 300)]);
        let diff = crate::engine::diff(&old, &new).unwrap();
        assert_eq!(crate::engine::patch(&old, &diff).unwrap(), new);
    }

    #[test]
    fn drops_short_and_keeps_invariants() {
        let old = vec![7u8; 100];
        let new = vec![9u8; 100];
        let covers = vec![Cover::new(0, 0, 3), Cover::new(50, 10, 20)];
        let out = refine(covers, &old, &new, &config::DEFAULT);
        validate_covers(&out, 100, 100).unwrap();
        assert_eq!(out, vec![Cover::new(50, 10, 20)]);
    }
}
