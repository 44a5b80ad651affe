// Diff encoder.
//
// create_diff turns (old, new) into an `HDIFF13` diff:
//   1. match:      MatchEngine finds exact covers with the level's profile
//   2. refine:     covers are extended, merged and filtered (pipeline)
//   3. sections:   RLE of `new - old` over covered bytes, raw uncovered bytes,
//                  and the serialized cover list
//   4. compress:   each section is compressed when that makes it smaller
//   5. write:      header followed by the four sections

use std::io::{self, Write};

use log::debug;
use thiserror::Error;

use super::codec::{Compression, compress_sections};
use super::pipeline;
use crate::format::covers::{self, Cover};
use crate::format::header::{DiffHeader, SectionSize};
use crate::format::rle::RleEncoder;
use crate::hash::config::{self, MatcherConfig};
use crate::hash::matching::MatchEngine;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for the diff encoder.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Compression level (0-9). Level 0 = store only (no matching).
    pub level: u32,
    /// Section compression plugin.
    pub compression: Compression,
    /// Override the profile's minimum cover length.
    pub min_match: Option<usize>,
    /// Use the block matcher with this block width.
    pub block_size: Option<usize>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            level: 6,
            compression: default_compression(),
            min_match: None,
            block_size: None,
        }
    }
}

impl DiffOptions {
    /// Matcher profile after applying overrides.
    pub fn matcher_config(&self) -> MatcherConfig {
        let mut cfg = config::config_for_level(self.level.min(9));
        if let Some(block) = self.block_size {
            cfg = cfg.with_block_size(block);
        }
        if let Some(min) = self.min_match {
            cfg = cfg.with_min_match(min);
        }
        cfg
    }
}

/// Best compression compiled into this build.
pub fn default_compression() -> Compression {
    #[cfg(feature = "zstd")]
    {
        Compression::Zstd { level: 19 }
    }
    #[cfg(all(not(feature = "zstd"), feature = "zlib"))]
    {
        Compression::Zlib { level: 9 }
    }
    #[cfg(all(not(feature = "zstd"), not(feature = "zlib")))]
    {
        Compression::None
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(
        "old data of {0} bytes is too large for the suffix matcher; use level 1-3 or a block size"
    )]
    TooLarge(u64),
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DiffStats {
    pub old_size: u64,
    pub new_size: u64,
    pub cover_count: u64,
    pub covered_bytes: u64,
    /// Total diff size, header included.
    pub diff_size: u64,
    pub compress_type: &'static str,
    /// Cover, RLE ctrl, RLE code and new-data sections.
    pub sections: [SectionSize; 4],
}

impl DiffStats {
    /// Diff size relative to new size.
    pub fn ratio(&self) -> f64 {
        if self.new_size == 0 {
            0.0
        } else {
            self.diff_size as f64 / self.new_size as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode the diff from `old` to `new` into `out`.
pub fn create_diff<W: Write + ?Sized>(
    old: &[u8],
    new: &[u8],
    out: &mut W,
    options: &DiffOptions,
) -> Result<DiffStats, DiffError> {
    let cfg = options.matcher_config();
    let exact = MatchEngine::new(cfg).find_covers(old, new)?;
    let covers = pipeline::refine(exact, old, new, &cfg);
    write_diff(old, new, &covers, out, options.compression)
}

/// Serialize a diff for an already computed cover list.
pub fn write_diff<W: Write + ?Sized>(
    old: &[u8],
    new: &[u8],
    covers: &[Cover],
    out: &mut W,
    compression: Compression,
) -> Result<DiffStats, DiffError> {
    covers::validate_covers(covers, old.len() as u64, new.len() as u64)
        .map_err(|e| DiffError::InvalidOption(format!("cover list: {e}")))?;

    let (rle_ctrl, rle_code, new_data) = build_sections(old, new, covers);
    let cover_buf = covers::write_covers(covers);
    let raw: [&[u8]; 4] = [&cover_buf, &rle_ctrl, &rle_code, &new_data];

    let codec = compression.codec();
    let packed = compress_sections(codec.as_deref(), &raw)?;

    let mut sections = [SectionSize::default(); 4];
    for (s, (r, p)) in sections.iter_mut().zip(raw.iter().zip(&packed)) {
        s.size = r.len() as u64;
        s.compressed = p.as_ref().map_or(0, |p| p.len() as u64);
    }
    let any_compressed = sections.iter().any(SectionSize::is_compressed);
    let compress_type = match &codec {
        Some(c) if any_compressed => c.name(),
        _ => "",
    };

    let [covers_sz, rle_ctrl_sz, rle_code_sz, new_data_sz] = sections;
    let header = DiffHeader {
        compress_type: compress_type.to_string(),
        new_size: new.len() as u64,
        old_size: old.len() as u64,
        cover_count: covers.len() as u64,
        covers: covers_sz,
        rle_ctrl: rle_ctrl_sz,
        rle_code: rle_code_sz,
        new_data: new_data_sz,
    };
    let head = header.to_bytes();
    out.write_all(&head)?;
    for (r, p) in raw.iter().zip(&packed) {
        out.write_all(p.as_deref().unwrap_or(*r))?;
    }

    let stats = DiffStats {
        old_size: header.old_size,
        new_size: header.new_size,
        cover_count: header.cover_count,
        covered_bytes: covers::covered_len(covers),
        diff_size: head.len() as u64 + header.body_len(),
        compress_type,
        sections,
    };
    debug!(
        "diff: {} covers, {} covered bytes, {} new-data bytes, {} total",
        stats.cover_count, stats.covered_bytes, new_data_sz.size, stats.diff_size
    );
    Ok(stats)
}

/// Build (RLE ctrl, RLE code, new data) for a cover list.
fn build_sections(old: &[u8], new: &[u8], covers: &[Cover]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let mut rle = RleEncoder::new();
    let mut new_data = Vec::new();
    let mut last = 0usize;
    for c in covers {
        let (o, n, len) = (c.old_pos as usize, c.new_pos as usize, c.len as usize);
        new_data.extend_from_slice(&new[last..n]);
        rle.append_sub(&new[n..n + len], &old[o..o + len]);
        last = n + len;
    }
    new_data.extend_from_slice(&new[last..]);
    let (ctrl, code) = rle.finish();
    (ctrl, code, new_data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::decoder::{PatchDecoder, PatchOptions};

    fn roundtrip(old: &[u8], new: &[u8], opts: &DiffOptions) -> DiffStats {
        let mut diff = Vec::new();
        let stats = create_diff(old, new, &mut diff, opts).unwrap();
        assert_eq!(stats.diff_size, diff.len() as u64);
        let dec = PatchDecoder::new(diff.as_slice(), PatchOptions::default()).unwrap();
        let mut out = Vec::new();
        dec.patch_to(&mut &old[..], &mut out).unwrap();
        assert_eq!(out, new);
        stats
    }

    fn text(n: usize) -> Vec<u8> {
        (0..n)
            .flat_map(|i| format!("line {i}: some repeated content\n").into_bytes())
            .collect()
    }

    #[test]
    fn every_level_roundtrips() {
        let old = text(400);
        let mut new = old.clone();
        new.splice(2000..2100, b"REPLACED".iter().copied());
        new.extend_from_slice(b"tail");
        for level in 0..=9 {
            let opts = DiffOptions {
                level,
                compression: Compression::None,
                ..DiffOptions::default()
            };
            roundtrip(&old, &new, &opts);
        }
    }

    #[test]
    fn level_zero_stores_everything() {
        let old = text(50);
        let opts = DiffOptions {
            level: 0,
            compression: Compression::None,
            ..DiffOptions::default()
        };
        let stats = roundtrip(&old, &old, &opts);
        assert_eq!(stats.cover_count, 0);
        assert_eq!(stats.sections[3].size, old.len() as u64);
    }

    #[test]
    fn similar_inputs_give_small_diff() {
        let old = text(2000);
        let mut new = old.clone();
        new[10_000] = b'#';
        let stats = roundtrip(&old, &new, &DiffOptions::default());
        assert!(stats.diff_size < 200, "diff size {}", stats.diff_size);
        assert_eq!(stats.covered_bytes, new.len() as u64);
    }

    #[test]
    fn empty_inputs() {
        let opts = DiffOptions::default();
        roundtrip(b"", b"", &opts);
        roundtrip(b"old only", b"", &opts);
        roundtrip(b"", b"new only", &opts);
    }

    #[test]
    fn block_size_override_switches_matcher() {
        let opts = DiffOptions {
            block_size: Some(16),
            ..DiffOptions::default()
        };
        assert_eq!(opts.matcher_config().kind, config::MatcherKind::Block);
        let old = text(300);
        let mut new = text(310);
        new.rotate_left(777);
        roundtrip(&old, &new, &opts);
    }

    #[test]
    fn uncompressed_header_names_no_plugin() {
        let mut diff = Vec::new();
        let opts = DiffOptions {
            compression: Compression::None,
            ..DiffOptions::default()
        };
        create_diff(b"abc", b"abd", &mut diff, &opts).unwrap();
        assert!(diff.starts_with(b"HDIFF13&\0"));
    }
}
