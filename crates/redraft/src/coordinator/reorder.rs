use crate::chunk::Chunk;
use std::collections::BTreeMap;

/// Holds out-of-order chunk completions until every lower index has been
/// released.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    pending: BTreeMap<usize, Chunk>,
    next: usize,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next chunk that will be released.
    pub const fn next_expected(&self) -> usize {
        self.next
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Buffers `chunk`. Chunks below the release pointer and duplicates are
    /// refused and handed back.
    pub fn insert(&mut self, chunk: Chunk) -> Result<(), Chunk> {
        if chunk.index < self.next || self.pending.contains_key(&chunk.index) {
            return Err(chunk);
        }
        self.pending.insert(chunk.index, chunk);
        Ok(())
    }

    /// Releases the next chunk if it has arrived.
    pub fn pop_ready(&mut self) -> Option<Chunk> {
        let chunk = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WordBand;

    fn chunk(index: usize) -> Chunk {
        Chunk::new(index, String::new(), 0, 1, WordBand { min: 1, max: 1 })
    }

    fn drain(buffer: &mut ReorderBuffer) -> Vec<usize> {
        core::iter::from_fn(|| buffer.pop_ready())
            .map(|c| c.index)
            .collect()
    }

    #[test]
    fn releases_strictly_in_index_order() {
        let mut buffer = ReorderBuffer::new();
        buffer.insert(chunk(2)).unwrap();
        buffer.insert(chunk(1)).unwrap();
        assert!(drain(&mut buffer).is_empty());
        assert_eq!(buffer.buffered(), 2);

        buffer.insert(chunk(0)).unwrap();
        assert_eq!(drain(&mut buffer), [0, 1, 2]);
        assert_eq!(buffer.next_expected(), 3);

        buffer.insert(chunk(4)).unwrap();
        assert!(drain(&mut buffer).is_empty());
        buffer.insert(chunk(3)).unwrap();
        assert_eq!(drain(&mut buffer), [3, 4]);
    }

    #[test]
    fn refuses_stale_and_duplicate_chunks() {
        let mut buffer = ReorderBuffer::new();
        buffer.insert(chunk(0)).unwrap();
        assert_eq!(buffer.pop_ready().map(|c| c.index), Some(0));

        assert_eq!(buffer.insert(chunk(0)).unwrap_err().index, 0);
        buffer.insert(chunk(1)).unwrap();
        assert_eq!(buffer.insert(chunk(1)).unwrap_err().index, 1);
    }
}
