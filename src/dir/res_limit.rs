// Bounded set of open handles with least-recently-used eviction.
//
// Directory patches may reference more old files than the process can keep
// open. Handles are opened on demand and the least recently used one is
// dropped once `limit` are open.

#[derive(Debug)]
pub struct ResHandleLimit<K, H> {
    limit: usize,
    /// Most recently used last.
    slots: Vec<(K, H)>,
    opened: u64,
    closed: u64,
}

impl<K: PartialEq + Clone, H> ResHandleLimit<K, H> {
    /// `limit` is clamped to at least one handle.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            slots: Vec::with_capacity(limit),
            opened: 0,
            closed: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Handles currently open.
    pub fn open_count(&self) -> usize {
        self.slots.len()
    }

    pub fn opened(&self) -> u64 {
        self.opened
    }

    pub fn closed(&self) -> u64 {
        self.closed
    }

    /// The handle for `key`, opening it with `open` if needed.
    pub fn get_or_open<E>(
        &mut self,
        key: &K,
        open: impl FnOnce(&K) -> Result<H, E>,
    ) -> Result<&mut H, E> {
        if let Some(i) = self.slots.iter().position(|(k, _)| k == key) {
            let hit = self.slots.remove(i);
            self.slots.push(hit);
        } else {
            let handle = open(key)?;
            if self.slots.len() == self.limit {
                self.slots.remove(0);
                self.closed += 1;
            }
            self.slots.push((key.clone(), handle));
            self.opened += 1;
        }
        let last = self.slots.len() - 1;
        Ok(&mut self.slots[last].1)
    }

    pub fn close_all(&mut self) {
        self.closed += self.slots.len() as u64;
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(k: &usize) -> Result<String, ()> {
        Ok(format!("file{k}"))
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut lim = ResHandleLimit::new(2);
        assert_eq!(lim.get_or_open(&1, open).unwrap(), "file1");
        lim.get_or_open(&2, open).unwrap();
        // Touch 1 so 2 becomes the eviction candidate.
        lim.get_or_open(&1, open).unwrap();
        lim.get_or_open(&3, open).unwrap();
        assert_eq!((lim.opened(), lim.closed()), (3, 1));

        // 1 is still open; 2 must be reopened.
        lim.get_or_open(&1, |_| Err(())).unwrap();
        assert!(lim.get_or_open(&2, |_| Err(())).is_err());
        lim.get_or_open(&2, open).unwrap();
        assert_eq!(lim.open_count(), 2);

        lim.close_all();
        assert_eq!(lim.open_count(), 0);
        assert_eq!(lim.closed(), lim.opened());
    }

    #[test]
    fn zero_limit_keeps_one() {
        let mut lim: ResHandleLimit<usize, String> = ResHandleLimit::new(0);
        assert_eq!(lim.limit(), 1);
        lim.get_or_open(&1, open).unwrap();
        lim.get_or_open(&2, open).unwrap();
        assert_eq!(lim.open_count(), 1);
    }
}
