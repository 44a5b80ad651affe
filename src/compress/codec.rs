// Section compression plugins.
//
// A diff names its compression plugin in the header; each section is then
// either stored raw or compressed with that plugin. Built-in plugins:
//   - "zlib" (flate2, feature `zlib`)
//   - "zstd" (zstd, feature `zstd`)
//   - "lzma" (lzma-rs, feature `lzma`)
//   - ""     (no compression)

use std::io::{self, Read};

use super::decoder::PatchError;

/// Minimum section size worth compressing.
const MIN_COMPRESS_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Codec trait
// ---------------------------------------------------------------------------

/// A pluggable section compressor.
///
/// # Implementing a custom codec
///
/// ```no_run
/// use oxidiff::compress::codec::Codec;
/// use oxidiff::compress::decoder::PatchError;
///
/// struct Identity;
///
/// impl Codec for Identity {
///     fn name(&self) -> &'static str { "identity" }
///     fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
///         Ok(data.to_vec())
///     }
///     fn reader<'a>(&self, input: Box<dyn std::io::Read + 'a>)
///         -> Result<Box<dyn std::io::Read + 'a>, PatchError> {
///         Ok(input)
///     }
/// }
/// ```
pub trait Codec: Send + Sync {
    /// Plugin name stored in the diff header.
    fn name(&self) -> &'static str;

    /// Compress a whole section.
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Wrap a compressed stream in a decompressing reader.
    fn reader<'a>(&self, input: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>, PatchError>;

    /// Decompress a whole section that must expand to exactly `expected` bytes.
    fn decompress(&self, data: &[u8], expected: u64) -> Result<Vec<u8>, PatchError> {
        let cap = usize::try_from(expected).map_err(|_| PatchError::TooLarge(expected))?;
        let mut out = Vec::with_capacity(cap.min(1 << 26));
        self.reader(Box::new(data))?
            .take(expected.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| PatchError::InvalidInput(format!("{} decompression failed: {e}", self.name())))?;
        if out.len() as u64 != expected {
            return Err(PatchError::InvalidInput(format!(
                "{} section expands to {} bytes, header says {expected}",
                self.name(),
                out.len()
            )));
        }
        Ok(out)
    }

    /// Whether this section is worth compressing. Default: skip if < 32 bytes.
    fn should_compress(&self, data: &[u8]) -> bool {
        data.len() >= MIN_COMPRESS_SIZE
    }
}

// ---------------------------------------------------------------------------
// Zlib
// ---------------------------------------------------------------------------

#[cfg(feature = "zlib")]
#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: flate2::Compression,
}

#[cfg(feature = "zlib")]
impl ZlibCodec {
    /// Create a zlib codec with the given level (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

#[cfg(feature = "zlib")]
impl Default for ZlibCodec {
    fn default() -> Self {
        Self::new(6)
    }
}

#[cfg(feature = "zlib")]
impl Codec for ZlibCodec {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        use flate2::write::ZlibEncoder;
        use io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn reader<'a>(&self, input: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>, PatchError> {
        Ok(Box::new(flate2::read::ZlibDecoder::new(input)))
    }
}

// ---------------------------------------------------------------------------
// Zstd
// ---------------------------------------------------------------------------

#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

#[cfg(feature = "zstd")]
impl ZstdCodec {
    /// Create a zstd codec with the given level (1-22).
    pub fn new(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }
}

#[cfg(feature = "zstd")]
impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(19)
    }
}

#[cfg(feature = "zstd")]
impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::stream::encode_all(data, self.level)
    }

    fn reader<'a>(&self, input: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>, PatchError> {
        let decoder = zstd::stream::read::Decoder::new(input)?;
        Ok(Box::new(decoder))
    }
}

// ---------------------------------------------------------------------------
// LZMA
// ---------------------------------------------------------------------------

/// LZMA codec. lzma-rs has no pull-based decoder, so sections are expanded
/// in memory before being handed out as a reader.
#[cfg(feature = "lzma")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaCodec;

#[cfg(feature = "lzma")]
impl Codec for LzmaCodec {
    fn name(&self) -> &'static str {
        "lzma"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut input = io::Cursor::new(data);
        let mut output = Vec::new();
        lzma_rs::lzma_compress(&mut input, &mut output)?;
        Ok(output)
    }

    fn reader<'a>(&self, input: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>, PatchError> {
        let mut input = io::BufReader::new(input);
        let mut output = Vec::new();
        lzma_rs::lzma_decompress(&mut input, &mut output)
            .map_err(|e| PatchError::InvalidInput(format!("LZMA decompression failed: {e}")))?;
        Ok(Box::new(io::Cursor::new(output)))
    }
}

// ---------------------------------------------------------------------------
// Compression selection
// ---------------------------------------------------------------------------

/// Compression selected by the encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    #[cfg(feature = "zlib")]
    Zlib { level: u32 },
    #[cfg(feature = "zstd")]
    Zstd { level: i32 },
    #[cfg(feature = "lzma")]
    Lzma,
}

impl Compression {
    /// Build the codec, or `None` when sections are stored raw.
    pub fn codec(&self) -> Option<Box<dyn Codec>> {
        match *self {
            Self::None => None,
            #[cfg(feature = "zlib")]
            Self::Zlib { level } => Some(Box::new(ZlibCodec::new(level))),
            #[cfg(feature = "zstd")]
            Self::Zstd { level } => Some(Box::new(ZstdCodec::new(level))),
            #[cfg(feature = "lzma")]
            Self::Lzma => Some(Box::new(LzmaCodec)),
        }
    }

    /// Header name for this compression.
    pub fn name(&self) -> &'static str {
        self.codec().map_or("", |c| c.name())
    }

    /// Parse a CLI/config name with the plugin's default level.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "none" => Some(Self::None),
            #[cfg(feature = "zlib")]
            "zlib" => Some(Self::Zlib { level: 9 }),
            #[cfg(feature = "zstd")]
            "zstd" => Some(Self::Zstd { level: 19 }),
            #[cfg(feature = "lzma")]
            "lzma" => Some(Self::Lzma),
            _ => None,
        }
    }
}

/// Decode-side dispatch from the header's compress type.
pub fn codec_for_name(name: &str) -> Result<Option<Box<dyn Codec>>, PatchError> {
    match name {
        "" => Ok(None),
        #[cfg(feature = "zlib")]
        "zlib" => Ok(Some(Box::new(ZlibCodec::default()))),
        #[cfg(feature = "zstd")]
        "zstd" => Ok(Some(Box::new(ZstdCodec::default()))),
        #[cfg(feature = "lzma")]
        "lzma" => Ok(Some(Box::new(LzmaCodec))),
        other => Err(PatchError::Unsupported(format!(
            "compression plugin '{other}' is not available in this build"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Section helpers
// ---------------------------------------------------------------------------

/// Compress a section if it helps.
///
/// Returns the compressed bytes only when they are strictly smaller.
pub fn compress_section(codec: Option<&dyn Codec>, data: &[u8]) -> io::Result<Option<Vec<u8>>> {
    let Some(codec) = codec else {
        return Ok(None);
    };
    if !codec.should_compress(data) {
        return Ok(None);
    }
    let compressed = codec.compress(data)?;
    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

/// Compress several sections, concurrently under the `parallel` feature.
pub fn compress_sections(
    codec: Option<&dyn Codec>,
    sections: &[&[u8]],
) -> io::Result<Vec<Option<Vec<u8>>>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        sections
            .par_iter()
            .map(|s| compress_section(codec, s))
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        sections
            .iter()
            .map(|s| compress_section(codec, s))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn compressible() -> Vec<u8> {
        b"abcabcabcabc-some-repeated-text-".repeat(64)
    }

    fn roundtrip(c: Compression) {
        let codec = c.codec().expect("codec");
        let data = compressible();
        let packed = compress_section(Some(codec.as_ref()), &data)
            .unwrap()
            .expect("should compress");
        assert!(packed.len() < data.len());

        let dec = codec_for_name(c.name()).unwrap().expect("decoder");
        assert_eq!(dec.decompress(&packed, data.len() as u64).unwrap(), data);
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn zlib_roundtrip() {
        roundtrip(Compression::Zlib { level: 6 });
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_roundtrip() {
        roundtrip(Compression::Zstd { level: 3 });
    }

    #[cfg(feature = "lzma")]
    #[test]
    fn lzma_roundtrip() {
        roundtrip(Compression::Lzma);
    }

    #[test]
    fn none_never_compresses() {
        assert!(compress_section(None, &compressible()).unwrap().is_none());
        assert_eq!(Compression::None.name(), "");
        assert!(codec_for_name("").unwrap().is_none());
    }

    #[test]
    fn unknown_plugin_is_unsupported() {
        assert!(matches!(
            codec_for_name("bz2"),
            Err(PatchError::Unsupported(_))
        ));
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn size_mismatch_detected() {
        let codec = ZlibCodec::default();
        let data = compressible();
        let packed = codec.compress(&data).unwrap();
        assert!(codec.decompress(&packed, data.len() as u64 - 1).is_err());
        assert!(codec.decompress(&packed, data.len() as u64 + 1).is_err());
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn tiny_sections_stay_raw() {
        let codec = ZlibCodec::default();
        assert!(compress_section(Some(&codec), b"short").unwrap().is_none());
    }
}
