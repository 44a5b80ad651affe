// Checksum plugins for directory diffs.
//
// The plugin name is stored in the `HDIFF19` header; the digest width is
// stored next to it so a patcher can skip checksums it does not understand.
//
//   ""         no checksum (0 bytes)
//   "adler32"  Adler-32 (simd-adler32 when the `adler32` feature is on)
//   "fadler64" 64-bit Adler sum modulo the largest 32-bit prime
//   "crc32"    CRC-32 (flate2, requires the `zlib` feature)
//   "sha256"   SHA-256

use sha2::Digest;

/// Largest prime below 2^32, the fadler64 modulus.
const FADLER64_MOD: u64 = 4_294_967_291;

/// Bytes folded into fadler64 before reducing; keeps `b` below 2^64.
const FADLER64_NMAX: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumKind {
    None,
    Adler32,
    #[default]
    Fadler64,
    Crc32,
    Sha256,
}

impl ChecksumKind {
    /// Name stored in diff headers.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Adler32 => "adler32",
            Self::Fadler64 => "fadler64",
            Self::Crc32 => "crc32",
            Self::Sha256 => "sha256",
        }
    }

    /// Decode-side dispatch from a header name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" => Some(Self::None),
            "adler32" => Some(Self::Adler32),
            "fadler64" => Some(Self::Fadler64),
            "crc32" if cfg!(feature = "zlib") => Some(Self::Crc32),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Digest width in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Adler32 | Self::Crc32 => 4,
            Self::Fadler64 => 8,
            Self::Sha256 => 32,
        }
    }

    /// Whether this build can compute the checksum. `crc32` needs `zlib`.
    pub fn is_available(self) -> bool {
        match self {
            Self::Crc32 => cfg!(feature = "zlib"),
            _ => true,
        }
    }

    pub fn hasher(self) -> Hasher {
        match self {
            Self::None => Hasher::None,
            Self::Adler32 => Hasher::Adler32(Adler32::new()),
            Self::Fadler64 => Hasher::Fadler64(Fadler64::new()),
            #[cfg(feature = "zlib")]
            Self::Crc32 => Hasher::Crc32(flate2::Crc::new()),
            #[cfg(not(feature = "zlib"))]
            Self::Crc32 => Hasher::None,
            Self::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut h = self.hasher();
        h.update(data);
        h.finish()
    }
}

impl std::fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            other => f.write_str(other.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming hasher
// ---------------------------------------------------------------------------

pub enum Hasher {
    None,
    Adler32(Adler32),
    Fadler64(Fadler64),
    #[cfg(feature = "zlib")]
    Crc32(flate2::Crc),
    Sha256(sha2::Sha256),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::None => {}
            Self::Adler32(h) => h.update(data),
            Self::Fadler64(h) => h.update(data),
            #[cfg(feature = "zlib")]
            Self::Crc32(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Digest bytes, big-endian for the integer sums.
    pub fn finish(self) -> Vec<u8> {
        match self {
            Self::None => Vec::new(),
            Self::Adler32(h) => h.finish().to_be_bytes().to_vec(),
            Self::Fadler64(h) => h.finish().to_be_bytes().to_vec(),
            #[cfg(feature = "zlib")]
            Self::Crc32(h) => h.sum().to_be_bytes().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Adler-32
// ---------------------------------------------------------------------------

pub struct Adler32 {
    #[cfg(feature = "adler32")]
    inner: simd_adler32::Adler32,
    #[cfg(not(feature = "adler32"))]
    a: u32,
    #[cfg(not(feature = "adler32"))]
    b: u32,
}

impl Adler32 {
    pub fn new() -> Self {
        #[cfg(feature = "adler32")]
        {
            Self {
                inner: simd_adler32::Adler32::new(),
            }
        }
        #[cfg(not(feature = "adler32"))]
        {
            Self { a: 1, b: 0 }
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        #[cfg(feature = "adler32")]
        {
            self.inner.write(data);
        }
        #[cfg(not(feature = "adler32"))]
        {
            const MOD_ADLER: u32 = 65521;
            for &byte in data {
                self.a = (self.a + u32::from(byte)) % MOD_ADLER;
                self.b = (self.b + self.a) % MOD_ADLER;
            }
        }
    }

    pub fn finish(&self) -> u32 {
        #[cfg(feature = "adler32")]
        {
            self.inner.finish()
        }
        #[cfg(not(feature = "adler32"))]
        {
            (self.b << 16) | self.a
        }
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// fadler64
// ---------------------------------------------------------------------------

/// Adler-style sum with two 32-bit halves modulo a 32-bit prime.
///
/// Reduction is deferred for up to `FADLER64_NMAX` bytes at a time, which
/// keeps both accumulators in range while avoiding a division per byte.
#[derive(Debug, Clone)]
pub struct Fadler64 {
    a: u64,
    b: u64,
}

impl Fadler64 {
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(FADLER64_NMAX) {
            for &byte in chunk {
                self.a += u64::from(byte);
                self.b += self.a;
            }
            self.a %= FADLER64_MOD;
            self.b %= FADLER64_MOD;
        }
    }

    pub fn finish(&self) -> u64 {
        (self.b << 32) | self.a
    }
}

impl Default for Fadler64 {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
