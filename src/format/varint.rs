// Packed unsigned integers with optional high tag bits.
//
// Big-endian, 7 value bits per continuation byte. The first byte reserves
// `tag_bits` high bits for a caller-defined tag, then one continuation bit,
// then the most-significant value bits:
//
//   first byte:  [tag .. tag_bits][more][value .. 7 - tag_bits]
//   next bytes:  [more][value .. 7]

use std::io::{self, Read};

use thiserror::Error;

/// Maximum encoded length for a 64-bit value with no tag bits.
pub const MAX_PACKED_LEN: usize = 10;

/// Overflow guard: if any of these bits are set, the next `<< 7` loses data.
const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarIntError {
    /// Not enough input bytes to complete the integer.
    #[error("packed integer underflow (truncated input)")]
    Underflow,
    /// Value would overflow 64 bits.
    #[error("packed integer overflow")]
    Overflow,
    /// A NUL-terminated string was not valid UTF-8.
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
}

impl From<VarIntError> for io::Error {
    fn from(e: VarIntError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append `value` to `out`, storing `tag` in the top `tag_bits` bits of the
/// first byte.
#[inline]
pub fn pack_uint_with_tag(out: &mut Vec<u8>, mut value: u64, tag: u8, tag_bits: u32) {
    debug_assert!(tag_bits < 7);
    debug_assert!(tag_bits == 0 || u32::from(tag) < (1 << tag_bits));

    let max_first: u64 = (1u64 << (7 - tag_bits)) - 1;
    let mut low = [0u8; MAX_PACKED_LEN];
    let mut n = 0usize;
    while value > max_first {
        low[n] = (value & 0x7F) as u8;
        n += 1;
        value >>= 7;
    }

    let tag_part = if tag_bits == 0 {
        0
    } else {
        tag << (8 - tag_bits)
    };
    let more = if n > 0 { 1u8 << (7 - tag_bits) } else { 0 };
    out.push(value as u8 | tag_part | more);

    while n > 0 {
        n -= 1;
        let more = if n > 0 { 0x80 } else { 0 };
        out.push(low[n] | more);
    }
}

/// Append an untagged packed integer.
#[inline]
pub fn pack_uint(out: &mut Vec<u8>, value: u64) {
    pack_uint_with_tag(out, value, 0, 0);
}

/// Encoded byte-length of `value` with `tag_bits` reserved in the first byte.
pub fn packed_len(value: u64, tag_bits: u32) -> usize {
    let first_bits = 7 - tag_bits;
    let bits = 64 - value.leading_zeros();
    if bits <= first_bits {
        1
    } else {
        1 + (bits - first_bits).div_ceil(7) as usize
    }
}

// ---------------------------------------------------------------------------
// Decoding from byte slices
// ---------------------------------------------------------------------------

/// Forward-only reader over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, VarIntError> {
        let b = *self.data.get(self.pos).ok_or(VarIntError::Underflow)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], VarIntError> {
        if self.remaining() < len {
            return Err(VarIntError::Underflow);
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Read a packed integer, returning `(value, tag)`.
    pub fn read_uint_with_tag(&mut self, tag_bits: u32) -> Result<(u64, u8), VarIntError> {
        let first = self.read_u8()?;
        let (mut value, tag, mut more) = split_first_byte(first, tag_bits);
        while more {
            let b = self.read_u8()?;
            value = push_group(value, b)?;
            more = b & 0x80 != 0;
        }
        Ok((value, tag))
    }

    pub fn read_uint(&mut self) -> Result<u64, VarIntError> {
        Ok(self.read_uint_with_tag(0)?.0)
    }

    /// Read a packed integer that must fit in `usize`.
    pub fn read_usize(&mut self) -> Result<usize, VarIntError> {
        usize::try_from(self.read_uint()?).map_err(|_| VarIntError::Overflow)
    }

    /// Read a NUL-terminated UTF-8 string (terminator consumed, not returned).
    pub fn read_cstr(&mut self) -> Result<&'a str, VarIntError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(VarIntError::Underflow)?;
        let s = std::str::from_utf8(&rest[..end]).map_err(|_| VarIntError::InvalidUtf8)?;
        self.pos += end + 1;
        Ok(s)
    }
}

#[inline]
fn split_first_byte(first: u8, tag_bits: u32) -> (u64, u8, bool) {
    let tag = if tag_bits == 0 {
        0
    } else {
        first >> (8 - tag_bits)
    };
    let more = first & (1 << (7 - tag_bits)) != 0;
    let value = u64::from(first & ((1u8 << (7 - tag_bits)) - 1));
    (value, tag, more)
}

#[inline]
fn push_group(value: u64, b: u8) -> Result<u64, VarIntError> {
    if value & U64_OVERFLOW_MASK != 0 {
        return Err(VarIntError::Overflow);
    }
    Ok((value << 7) | u64::from(b & 0x7F))
}

// ---------------------------------------------------------------------------
// Decoding from `Read` (streaming)
// ---------------------------------------------------------------------------

/// Read a tagged packed integer from a streaming source.
pub fn stream_read_uint_with_tag<R: Read + ?Sized>(
    r: &mut R,
    tag_bits: u32,
) -> io::Result<(u64, u8)> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    let (mut value, tag, mut more) = split_first_byte(buf[0], tag_bits);
    while more {
        r.read_exact(&mut buf)?;
        value = push_group(value, buf[0])?;
        more = buf[0] & 0x80 != 0;
    }
    Ok((value, tag))
}

/// Read an untagged packed integer from a streaming source.
pub fn stream_read_uint<R: Read + ?Sized>(r: &mut R) -> io::Result<u64> {
    Ok(stream_read_uint_with_tag(r, 0)?.0)
}

/// Read bytes up to and including a NUL terminator, returning them without it.
///
/// Gives up after `max_len` bytes so a corrupt stream cannot grow the buffer
/// without bound.
pub fn stream_read_cstr<R: Read + ?Sized>(r: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1];
    loop {
        r.read_exact(&mut buf)?;
        if buf[0] == 0 {
            return Ok(out);
        }
        if out.len() == max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unterminated string in header",
            ));
        }
        out.push(buf[0]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
