// Diff creation and application.
//
// - `encoder`: create_diff: match, refine, build sections, write HDIFF13
// - `decoder`: PatchDecoder: streaming patch application over OldSource
// - `pipeline`: cover refinement (extension, diagonal merge, filtering)
// - `codec`: pluggable section compression (zlib, zstd, lzma)

pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod pipeline;

pub use codec::{Codec, Compression};
pub use decoder::{FileSource, OldSource, PatchDecoder, PatchError, PatchOptions, PatchStats};
pub use encoder::{DiffError, DiffOptions, DiffStats, create_diff};
