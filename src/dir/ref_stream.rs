// Old ref files read as one concatenated OldSource.

use std::path::PathBuf;

use log::debug;

use super::res_limit::ResHandleLimit;
use crate::compress::decoder::{FileSource, OldSource, PatchError};

pub struct RefStream {
    paths: Vec<PathBuf>,
    sizes: Vec<u64>,
    /// `starts[i]` is the stream offset of file `i`; one extra entry holds the total.
    starts: Vec<u64>,
    handles: ResHandleLimit<usize, FileSource>,
}

impl RefStream {
    /// `files` pairs each path with its expected size. At most `max_open`
    /// files are held open at once.
    pub fn new(files: Vec<(PathBuf, u64)>, max_open: usize) -> Self {
        let mut starts = Vec::with_capacity(files.len() + 1);
        let mut total = 0u64;
        starts.push(0);
        let (paths, sizes): (Vec<_>, Vec<_>) = files.into_iter().unzip();
        for &s in &sizes {
            total = total.saturating_add(s);
            starts.push(total);
        }
        Self {
            paths,
            sizes,
            starts,
            handles: ResHandleLimit::new(max_open),
        }
    }

    pub fn file_count(&self) -> usize {
        self.paths.len()
    }

    /// Index of the file holding stream offset `pos` (`pos` < total).
    fn locate(&self, pos: u64) -> usize {
        self.starts[1..].partition_point(|&end| end <= pos)
    }

    pub fn close(&mut self) {
        self.handles.close_all();
        debug!(
            "ref stream: {} opens over {} files",
            self.handles.opened(),
            self.paths.len()
        );
    }

    #[cfg(test)]
    fn handles(&self) -> &ResHandleLimit<usize, FileSource> {
        &self.handles
    }
}

impl OldSource for RefStream {
    fn len(&self) -> u64 {
        self.starts.last().copied().unwrap_or(0)
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), PatchError> {
        let end = pos.checked_add(buf.len() as u64).unwrap_or(u64::MAX);
        if end > self.len() {
            return Err(PatchError::InvalidInput(format!(
                "old ref read {pos}..{end} past end ({})",
                self.len()
            )));
        }
        let mut pos = pos;
        let mut done = 0usize;
        while done < buf.len() {
            let i = self.locate(pos);
            let in_file = pos - self.starts[i];
            let take = ((self.sizes[i] - in_file) as usize).min(buf.len() - done);
            let (paths, sizes) = (&self.paths, &self.sizes);
            let file = self.handles.get_or_open(&i, |&i| {
                let f = FileSource::open(&paths[i])?;
                if f.len() != sizes[i] {
                    return Err(PatchError::InvalidInput(format!(
                        "{}: size {} differs from recorded {}",
                        paths[i].display(),
                        f.len(),
                        sizes[i]
                    )));
                }
                Ok(f)
            })?;
            file.read_at(in_file, &mut buf[done..done + take])?;
            done += take;
            pos += take as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_across_file_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        let mut all = Vec::new();
        for (i, body) in [&b"alpha"[..], b"be", b"gamma-delta"].iter().enumerate() {
            let p = dir.path().join(format!("f{i}"));
            fs::write(&p, body).unwrap();
            files.push((p, body.len() as u64));
            all.extend_from_slice(body);
        }

        let mut s = RefStream::new(files, 2);
        assert_eq!(s.len(), all.len() as u64);
        assert_eq!(s.file_count(), 3);
        for start in 0..all.len() {
            for len in 0..=(all.len() - start) {
                let mut buf = vec![0u8; len];
                s.read_at(start as u64, &mut buf).unwrap();
                assert_eq!(buf, &all[start..start + len]);
            }
        }
        assert!(s.handles().open_count() <= 2);
        assert!(s.handles().closed() > 0);

        let mut buf = [0u8; 2];
        assert!(s.read_at(all.len() as u64 - 1, &mut buf).is_err());
        s.close();
    }

    #[test]
    fn size_change_detected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        fs::write(&p, b"12345").unwrap();
        let mut s = RefStream::new(vec![(p, 4)], 1);
        let mut buf = [0u8; 1];
        assert!(s.read_at(0, &mut buf).is_err());
    }
}
