/// Reorder buffer between the fetcher pool and the arranger.
///
/// Fetchers deposit blocks in whatever order they complete; the arranger
/// drains them strictly by height. One mutex guards the map together with
/// the high-water mark and the next height handed to fetchers.
use std::collections::HashMap;
use std::sync::Mutex;

use crate::rpc::types::RawBlock;

pub struct BlockBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    /// Highest height currently known to the buffer.
    max_height: i64,
    /// Next height to hand out to a fetcher.
    next_height: i64,
    blocks: HashMap<i64, RawBlock>,
}

impl BlockBuffer {
    pub fn new(height: i64) -> Self {
        BlockBuffer {
            inner: Mutex::new(Inner {
                max_height: height,
                next_height: height,
                blocks: HashMap::new(),
            }),
        }
    }

    /// Removes and returns the block at `index`, if buffered.
    pub fn pop(&self, index: i64) -> Option<RawBlock> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.blocks.remove(&index)
    }

    pub fn highest(&self) -> i64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.max_height
    }

    /// Atomically increments and returns the next height to fetch.
    pub fn next_pending(&self) -> i64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_height += 1;
        inner.next_height
    }

    pub fn put(&self, block: RawBlock) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let index = block.index as i64;
        inner.blocks.insert(index, block);
        if inner.max_height < index {
            inner.max_height = index;
        }
    }

    pub fn size(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u32) -> RawBlock {
        RawBlock {
            index,
            ..Default::default()
        }
    }

    #[test]
    fn test_put_pop() {
        let buffer = BlockBuffer::new(-1);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.pop(0).is_none());

        buffer.put(block(0));
        buffer.put(block(2));
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.highest(), 2);

        let popped = buffer.pop(0).unwrap();
        assert_eq!(popped.index, 0);
        assert_eq!(buffer.size(), 1);
        // Popping does not lower the high-water mark.
        assert_eq!(buffer.highest(), 2);
    }

    #[test]
    fn test_next_pending_increments() {
        let buffer = BlockBuffer::new(10);
        assert_eq!(buffer.next_pending(), 11);
        assert_eq!(buffer.next_pending(), 12);
    }

    #[test]
    fn test_highest_tracks_max_only() {
        let buffer = BlockBuffer::new(5);
        buffer.put(block(3));
        assert_eq!(buffer.highest(), 5);
        buffer.put(block(9));
        assert_eq!(buffer.highest(), 9);
    }
}
