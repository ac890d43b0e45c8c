//! Forward iteration over B+Tree leaves.

use crate::key::IndexKey;
use crate::node::LeafNode;
use basalt_buffer::BufferPoolManager;
use basalt_common::page::PageId;
use basalt_common::types::Rid;
use basalt_common::Result;

/// Forward iterator over a tree's `(key, rid)` entries.
///
/// The iterator keeps its current leaf pinned; advancing across a leaf
/// boundary fetches the successor before unpinning the predecessor, and
/// dropping the iterator releases the remaining pin.
pub struct IndexIterator<'a, K: IndexKey> {
    bpm: &'a BufferPoolManager,
    /// Pinned leaf currently being walked; None once exhausted.
    leaf: Option<LeafNode<K>>,
    page_id: PageId,
    index: usize,
}

impl<'a, K: IndexKey> IndexIterator<'a, K> {
    /// An iterator that is already at the end.
    pub(crate) fn exhausted(bpm: &'a BufferPoolManager) -> Self {
        Self {
            bpm,
            leaf: None,
            page_id: PageId::INVALID,
            index: 0,
        }
    }

    /// Starts at `index` within the given leaf, pinning it.
    pub(crate) fn at(bpm: &'a BufferPoolManager, page_id: PageId, index: usize) -> Result<Self> {
        let frame = bpm.fetch_page(page_id)?;
        let leaf = LeafNode::<K>::from_bytes(&frame.read_data());
        Ok(Self {
            bpm,
            leaf: Some(leaf),
            page_id,
            index,
        })
    }

    /// Starts at the lower-bound position of `key` within the given leaf.
    pub(crate) fn at_key(bpm: &'a BufferPoolManager, page_id: PageId, key: &K) -> Result<Self> {
        let frame = bpm.fetch_page(page_id)?;
        let leaf = LeafNode::<K>::from_bytes(&frame.read_data());
        let index = leaf.key_position(key);
        Ok(Self {
            bpm,
            leaf: Some(leaf),
            page_id,
            index,
        })
    }
}

impl<K: IndexKey> Iterator for IndexIterator<'_, K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            let leaf = self.leaf.as_ref()?;

            if self.index < leaf.size() {
                let item = (leaf.key_at(self.index), leaf.rid_at(self.index));
                self.index += 1;
                return Some(item);
            }

            let next_id = leaf.next_page_id();
            if !next_id.is_valid() {
                self.bpm.unpin_page(self.page_id, false);
                self.leaf = None;
                return None;
            }

            // Fetch the successor leaf, then release the current one
            let frame = self
                .bpm
                .fetch_page(next_id)
                .expect("buffer pool exhausted while advancing index iterator");
            let next_leaf = LeafNode::<K>::from_bytes(&frame.read_data());
            self.bpm.unpin_page(self.page_id, false);

            self.leaf = Some(next_leaf);
            self.page_id = next_id;
            self.index = 0;
        }
    }
}

impl<K: IndexKey> Drop for IndexIterator<'_, K> {
    fn drop(&mut self) {
        if self.leaf.is_some() {
            self.bpm.unpin_page(self.page_id, false);
        }
    }
}
