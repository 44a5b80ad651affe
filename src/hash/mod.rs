// Match finding between old and new data.
//
// This module provides:
// - Suffix array over old data (exhaustive matcher)
// - Rolling block checksum and block index (memory-limited matcher)
// - Matcher profiles per level (store, block, suffix)
// - MatchEngine, which produces exact covers

pub mod config;
pub mod matching;
pub mod rolling;
pub mod suffix;
pub mod table;

pub use config::{MatcherConfig, MatcherKind, config_for_level};
pub use matching::MatchEngine;
