// New ref files written as one concatenated stream.
//
// Each file is created when the stream reaches its first byte and closed as
// soon as its last byte is written, so at most one output handle is open.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use crate::io::BUF_SIZE;

pub struct NewDirOutput {
    files: Vec<(PathBuf, u64)>,
    /// Index of the file being written (or about to be).
    next: usize,
    current: Option<BufWriter<File>>,
    remaining: u64,
    written: u64,
}

impl NewDirOutput {
    /// `files` pairs each path with its size; sizes are non-zero.
    pub fn new(files: Vec<(PathBuf, u64)>) -> Self {
        Self {
            files,
            next: 0,
            current: None,
            remaining: 0,
            written: 0,
        }
    }

    pub fn total_len(&self) -> u64 {
        self.files.iter().map(|(_, s)| s).sum()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Close the last file; fails if fewer bytes arrived than declared.
    pub fn finish(mut self) -> io::Result<()> {
        self.close_current()?;
        if self.next < self.files.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "new data ended after {} of {} bytes",
                    self.written,
                    self.total_len()
                ),
            ));
        }
        Ok(())
    }

    fn close_current(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.current.take() {
            w.flush()?;
            self.next += 1;
        }
        Ok(())
    }
}

impl Write for NewDirOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.current.is_none() {
            let Some((path, size)) = self.files.get(self.next) else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "new data longer than the declared files",
                ));
            };
            let file = File::create(path)?;
            self.current = Some(BufWriter::with_capacity(BUF_SIZE, file));
            self.remaining = *size;
        }
        let take = (buf.len() as u64).min(self.remaining) as usize;
        let n = match self.current.as_mut() {
            Some(w) => w.write(&buf[..take])?,
            None => 0,
        };
        self.remaining -= n as u64;
        self.written += n as u64;
        if self.remaining == 0 {
            self.close_current()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}
