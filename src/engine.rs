// In-memory diff engine.
//
// Thin conveniences over the compress module for callers that hold both
// inputs in memory:
//   - diff / diff_with_options: old + new -> HDIFF13 bytes
//   - patch / patch_with_options: old + diff -> new bytes

use crate::compress::decoder::{PatchDecoder, PatchError, PatchOptions};
use crate::compress::encoder::{DiffError, DiffOptions, DiffStats, create_diff};

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Diff `old` to `new` with default options.
pub fn diff(old: &[u8], new: &[u8]) -> Result<Vec<u8>, DiffError> {
    diff_with_options(old, new, &DiffOptions::default()).map(|(d, _)| d)
}

/// Diff with custom options, returning the diff and its stats.
pub fn diff_with_options(
    old: &[u8],
    new: &[u8],
    opts: &DiffOptions,
) -> Result<(Vec<u8>, DiffStats), DiffError> {
    let mut out = Vec::new();
    let stats = create_diff(old, new, &mut out, opts)?;
    Ok((out, stats))
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// Apply `diff` to `old`.
pub fn patch(old: &[u8], diff: &[u8]) -> Result<Vec<u8>, PatchError> {
    patch_with_options(old, diff, PatchOptions::default())
}

pub fn patch_with_options(
    old: &[u8],
    diff: &[u8],
    opts: PatchOptions,
) -> Result<Vec<u8>, PatchError> {
    let decoder = PatchDecoder::new(diff, opts)?;
    let cap = usize::try_from(decoder.header().new_size).unwrap_or(0);
    let mut out = Vec::with_capacity(cap.min(1 << 28));
    decoder.patch_to(&mut &old[..], &mut out)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::codec::Compression;

    fn roundtrip(old: &[u8], new: &[u8]) {
        let d = diff(old, new).expect("diff failed");
        let rebuilt = patch(old, &d).expect("patch failed");
        assert_eq!(
            rebuilt,
            new,
            "roundtrip mismatch (old={}, new={}, diff={})",
            old.len(),
            new.len(),
            d.len()
        );
    }

    #[test]
    fn roundtrip_identical() {
        let data = b"The quick brown fox jumps over the lazy dog.";
        roundtrip(data, data);
    }

    #[test]
    fn roundtrip_small_edit() {
        roundtrip(
            b"Hello, world! This is a test of the diff engine.",
            b"Hello, earth! This is a test of the diff engine.",
        );
    }

    #[test]
    fn roundtrip_no_old() {
        roundtrip(b"", b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
    }

    #[test]
    fn roundtrip_empty_new() {
        roundtrip(b"some old data", b"");
    }

    #[test]
    fn roundtrip_reordered_blocks() {
        roundtrip(
            b"AAAA BBBB CCCC DDDD EEEE FFFF GGGG HHHH",
            b"AAAA CCCC DDDD EEEE xxxx GGGG HHHH IIII",
        );
    }

    #[test]
    fn roundtrip_binary_edits() {
        let old: Vec<u8> = (0..=255).cycle().take(4096).collect();
        let mut new = old.clone();
        new[100] = 0xFF;
        new[200] = 0x00;
        new[1000] = 0x42;
        roundtrip(&old, &new);
    }

    #[test]
    fn roundtrip_all_levels_and_codecs() {
        let old = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789abcdefghijklmnopqrstuvwxyz".repeat(20);
        let mut new = old.clone();
        new.splice(300..310, b"--CHANGED--".iter().copied());

        let mut codecs = vec![Compression::None];
        #[cfg(feature = "zlib")]
        codecs.push(Compression::Zlib { level: 6 });
        #[cfg(feature = "zstd")]
        codecs.push(Compression::Zstd { level: 3 });
        #[cfg(feature = "lzma")]
        codecs.push(Compression::Lzma);

        for compression in codecs {
            for level in [0, 1, 3, 6, 9] {
                let opts = DiffOptions {
                    level,
                    compression,
                    ..Default::default()
                };
                let (d, _) = diff_with_options(&old, &new, &opts).expect("diff failed");
                let rebuilt = patch(&old, &d).expect("patch failed");
                assert_eq!(rebuilt, new, "level {level} {compression:?} roundtrip failed");
            }
        }
    }

    #[test]
    fn diff_is_smaller_for_similar_data() {
        let old: Vec<u8> = (0..=255).cycle().take(8192).collect();
        let mut new = old.clone();
        new[4096] ^= 0xFF;
        let d = diff(&old, &new).unwrap();
        assert!(
            d.len() < new.len() / 20,
            "diff ({}) should be much smaller than new ({})",
            d.len(),
            new.len()
        );
    }

    #[test]
    fn patch_against_wrong_old_fails() {
        let d = diff(b"original old data here", b"original new data here").unwrap();
        assert!(patch(b"something else entirely!", &d).is_err());
    }
}
