// Byte run-length coding for cover sub-diffs.
//
// Covered new bytes are stored as `new - old` (wrapping). Those differences
// are mostly zero, so they are run-length coded into two streams:
//   - ctrl: one packed integer per run, `len - 1` tagged with the run kind
//   - code: payload bytes for `Value` and `Literal` runs

use super::varint::{self, ByteReader, VarIntError};

/// Tag bits used by ctrl entries.
const KIND_BITS: u32 = 2;

/// Shortest zero/0xFF run worth its own ctrl entry.
const MIN_FIXED_RUN: usize = 2;
/// Shortest single-value run worth its own ctrl entry.
const MIN_VALUE_RUN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunKind {
    Zero = 0,
    Ones = 1,
    Value = 2,
    Literal = 3,
}

impl RunKind {
    fn from_tag(tag: u8) -> Self {
        match tag & 0x03 {
            0 => Self::Zero,
            1 => Self::Ones,
            2 => Self::Value,
            _ => Self::Literal,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Incremental RLE encoder. Bytes can be appended in pieces (one per cover).
#[derive(Debug, Default)]
pub struct RleEncoder {
    ctrl: Vec<u8>,
    code: Vec<u8>,
    pending: Vec<u8>,
    total: u64,
}

impl RleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the logical stream.
    pub fn append(&mut self, data: &[u8]) {
        self.total += data.len() as u64;
        self.pending.extend_from_slice(data);
    }

    /// Append the byte-wise difference `new - old` of two equal-length slices.
    pub fn append_sub(&mut self, new: &[u8], old: &[u8]) {
        debug_assert_eq!(new.len(), old.len());
        self.total += new.len() as u64;
        self.pending
            .extend(new.iter().zip(old).map(|(&n, &o)| n.wrapping_sub(o)));
    }

    /// Total logical bytes appended so far.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Encode everything appended and return `(ctrl, code)`.
    pub fn finish(mut self) -> (Vec<u8>, Vec<u8>) {
        let data = std::mem::take(&mut self.pending);
        self.encode(&data);
        (self.ctrl, self.code)
    }

    fn encode(&mut self, data: &[u8]) {
        let mut literal_start = 0usize;
        let mut i = 0usize;
        while i < data.len() {
            let b = data[i];
            let run = run_length(&data[i..], b);
            let min = if b == 0 || b == 0xFF {
                MIN_FIXED_RUN
            } else {
                MIN_VALUE_RUN
            };
            if run >= min {
                self.emit_literal(&data[literal_start..i]);
                self.emit_run(b, run);
                i += run;
                literal_start = i;
            } else {
                i += run;
            }
        }
        self.emit_literal(&data[literal_start..]);
    }

    fn emit_run(&mut self, b: u8, len: usize) {
        let kind = match b {
            0 => RunKind::Zero,
            0xFF => RunKind::Ones,
            _ => RunKind::Value,
        };
        varint::pack_uint_with_tag(&mut self.ctrl, len as u64 - 1, kind as u8, KIND_BITS);
        if kind == RunKind::Value {
            self.code.push(b);
        }
    }

    fn emit_literal(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        varint::pack_uint_with_tag(
            &mut self.ctrl,
            bytes.len() as u64 - 1,
            RunKind::Literal as u8,
            KIND_BITS,
        );
        self.code.extend_from_slice(bytes);
    }
}

#[inline]
fn run_length(data: &[u8], b: u8) -> usize {
    data.iter().take_while(|&&x| x == b).count()
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Incremental RLE decoder over in-memory ctrl/code streams.
#[derive(Debug)]
pub struct RleDecoder<'a> {
    ctrl: ByteReader<'a>,
    code: ByteReader<'a>,
    kind: RunKind,
    value: u8,
    left: u64,
}

impl<'a> RleDecoder<'a> {
    pub fn new(ctrl: &'a [u8], code: &'a [u8]) -> Self {
        Self {
            ctrl: ByteReader::new(ctrl),
            code: ByteReader::new(code),
            kind: RunKind::Zero,
            value: 0,
            left: 0,
        }
    }

    fn next_run(&mut self) -> Result<(), VarIntError> {
        let (len, tag) = self.ctrl.read_uint_with_tag(KIND_BITS)?;
        self.kind = RunKind::from_tag(tag);
        self.left = len.checked_add(1).ok_or(VarIntError::Overflow)?;
        self.value = match self.kind {
            RunKind::Zero => 0,
            RunKind::Ones => 0xFF,
            RunKind::Value => self.code.read_u8()?,
            RunKind::Literal => 0,
        };
        Ok(())
    }

    /// Add the next `dst.len()` decoded bytes onto `dst` (wrapping).
    pub fn add_to(&mut self, dst: &mut [u8]) -> Result<(), VarIntError> {
        let mut done = 0usize;
        while done < dst.len() {
            if self.left == 0 {
                self.next_run()?;
            }
            let n = (self.left.min((dst.len() - done) as u64)) as usize;
            let out = &mut dst[done..done + n];
            match self.kind {
                RunKind::Zero => {}
                RunKind::Ones | RunKind::Value => {
                    let v = self.value;
                    out.iter_mut().for_each(|b| *b = b.wrapping_add(v));
                }
                RunKind::Literal => {
                    let lit = self.code.read_bytes(n)?;
                    out.iter_mut()
                        .zip(lit)
                        .for_each(|(b, &d)| *b = b.wrapping_add(d));
                }
            }
            self.left -= n as u64;
            done += n;
        }
        Ok(())
    }

    /// True once every run has been consumed and both streams are exhausted.
    pub fn is_finished(&self) -> bool {
        self.left == 0 && self.ctrl.is_empty() && self.code.is_empty()
    }
}

/// Decode a full RLE stream of `len` bytes (for inspection and tests).
pub fn decode_all(ctrl: &[u8], code: &[u8], len: usize) -> Result<Vec<u8>, VarIntError> {
    let mut out = vec![0u8; len];
    let mut dec = RleDecoder::new(ctrl, code);
    dec.add_to(&mut out)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
