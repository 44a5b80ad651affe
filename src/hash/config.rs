// Matcher profiles.
//
// Each compression level maps to a profile selecting the matching strategy
// and its tuning:
//   - Store:  no matching, the whole new data is emitted as new-data bytes
//   - Block:  rolling-hash block matcher, index memory O(old / block_size)
//   - Suffix: suffix-array matcher, memory O(old) but finds every match

/// Absolute floor for a match to become a cover.
pub const MIN_MATCH: usize = 4;

/// Default block width for the block matcher.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// Smallest allowed block width.
pub const MIN_BLOCK_SIZE: usize = 8;

/// Gap (in bytes) between two covers on the same diagonal that is bridged
/// by merging them.
pub const MAX_MERGE_GAP: u64 = 32;

/// Score headroom before approximate extension gives up.
pub const EXTEND_GIVE_UP: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Store,
    Block,
    Suffix,
}

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Name for display purposes.
    pub name: &'static str,
    pub kind: MatcherKind,
    /// Minimum cover length kept after refinement.
    pub min_match: usize,
    /// Block width (block matcher only).
    pub block_size: usize,
    /// Maximum candidates examined per block checksum.
    pub max_chain: usize,
    /// Extend covers across mismatching bytes when it pays off.
    pub extend: bool,
}

impl MatcherConfig {
    /// Override the minimum match length.
    pub fn with_min_match(mut self, min_match: usize) -> Self {
        self.min_match = min_match.max(MIN_MATCH);
        self
    }

    /// Switch to the block matcher with the given block width.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.kind = MatcherKind::Block;
        self.block_size = block_size.max(MIN_BLOCK_SIZE);
        self.min_match = self.min_match.max(self.block_size.min(32));
        self
    }
}

/// Compression levels mapping to profiles.
///
/// - Level 0: store
/// - Levels 1-3: block matcher, coarse to fine
/// - Levels 4-5: suffix matcher, long minimum match
/// - Level 6: default
/// - Levels 7-9: suffix matcher, short minimum match
pub fn config_for_level(level: u32) -> MatcherConfig {
    match level {
        0 => STORE,
        1 => BLOCK_COARSE,
        2 => BLOCK,
        3 => BLOCK_FINE,
        4 | 5 => SUFFIX_FAST,
        6 => DEFAULT,
        _ => SLOW,
    }
}

// ---------------------------------------------------------------------------
// Profile definitions
// ---------------------------------------------------------------------------

pub const STORE: MatcherConfig = MatcherConfig {
    name: "store",
    kind: MatcherKind::Store,
    min_match: MIN_MATCH,
    block_size: DEFAULT_BLOCK_SIZE,
    max_chain: 0,
    extend: false,
};

pub const BLOCK_COARSE: MatcherConfig = MatcherConfig {
    name: "block-coarse",
    kind: MatcherKind::Block,
    min_match: 32,
    block_size: 64,
    max_chain: 4,
    extend: true,
};

pub const BLOCK: MatcherConfig = MatcherConfig {
    name: "block",
    kind: MatcherKind::Block,
    min_match: 24,
    block_size: 32,
    max_chain: 8,
    extend: true,
};

pub const BLOCK_FINE: MatcherConfig = MatcherConfig {
    name: "block-fine",
    kind: MatcherKind::Block,
    min_match: 16,
    block_size: 16,
    max_chain: 16,
    extend: true,
};

pub const SUFFIX_FAST: MatcherConfig = MatcherConfig {
    name: "suffix-fast",
    kind: MatcherKind::Suffix,
    min_match: 12,
    block_size: DEFAULT_BLOCK_SIZE,
    max_chain: 0,
    extend: true,
};

pub const DEFAULT: MatcherConfig = MatcherConfig {
    name: "default",
    kind: MatcherKind::Suffix,
    min_match: 8,
    block_size: DEFAULT_BLOCK_SIZE,
    max_chain: 0,
    extend: true,
};

pub const SLOW: MatcherConfig = MatcherConfig {
    name: "slow",
    kind: MatcherKind::Suffix,
    min_match: 6,
    block_size: DEFAULT_BLOCK_SIZE,
    max_chain: 0,
    extend: true,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping() {
        assert_eq!(config_for_level(0).name, "store");
        assert_eq!(config_for_level(1).name, "block-coarse");
        assert_eq!(config_for_level(2).name, "block");
        assert_eq!(config_for_level(3).name, "block-fine");
        assert_eq!(config_for_level(5).name, "suffix-fast");
        assert_eq!(config_for_level(6).name, "default");
        assert_eq!(config_for_level(9).name, "slow");
    }

    #[test]
    fn block_profiles_have_sane_widths() {
        for p in [BLOCK_COARSE, BLOCK, BLOCK_FINE] {
            assert!(p.block_size >= MIN_BLOCK_SIZE, "{}", p.name);
            assert!(p.max_chain > 0, "{}", p.name);
        }
    }

    #[test]
    fn overrides_clamp() {
        let c = DEFAULT.with_min_match(1);
        assert_eq!(c.min_match, MIN_MATCH);
        let b = DEFAULT.with_block_size(2);
        assert_eq!(b.kind, MatcherKind::Block);
        assert_eq!(b.block_size, MIN_BLOCK_SIZE);
    }
}
