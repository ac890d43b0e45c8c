//! Disk-resident B+Tree index built on the buffer pool.

use crate::header::HeaderPage;
use crate::iterator::IndexIterator;
use crate::key::IndexKey;
use crate::node::{page_node_type, set_page_parent, InternalNode, LeafNode, NodeType};
use crate::transaction::Transaction;
use basalt_buffer::BufferPoolManager;
use basalt_common::page::{PageId, HEADER_PAGE_ID};
use basalt_common::types::Rid;
use basalt_common::{BasaltError, Result};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A B+Tree index mapping fixed-width keys to record ids.
///
/// Pages are borrowed from the buffer pool in pin/unpin scopes; the tree
/// itself holds only page ids. The root page id is persisted in the header
/// page under the tree's name, so reopening an index over the same data file
/// finds its root again.
///
/// Concurrent readers may traverse freely; mutating operations assume a
/// single writer (an external writer lock, if callers need one, is out of
/// scope here).
pub struct BPlusTree<K: IndexKey> {
    /// Name under which the root page id is persisted.
    index_name: String,
    /// Current root page id; `INVALID` means the tree is empty.
    root_page_id: AtomicI32,
    /// Buffer pool backing this index.
    bpm: Arc<BufferPoolManager>,
    /// Maximum entries per leaf page.
    leaf_max_size: usize,
    /// Maximum entries per internal page.
    internal_max_size: usize,
    /// Phantom marker so the tree is specific to key type `K`.
    _key: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Opens (or implicitly creates) the index named `name`.
    ///
    /// The root page id is looked up in the header page; an unknown name
    /// starts out empty.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = name.into();

        if !(2..=LeafNode::<K>::CAPACITY).contains(&leaf_max_size) {
            return Err(BasaltError::InvalidParameter {
                name: "leaf_max_size".to_string(),
                value: leaf_max_size.to_string(),
            });
        }
        if !(3..=InternalNode::<K>::CAPACITY).contains(&internal_max_size) {
            return Err(BasaltError::InvalidParameter {
                name: "internal_max_size".to_string(),
                value: internal_max_size.to_string(),
            });
        }

        let frame = bpm.fetch_page(HEADER_PAGE_ID)?;
        let root = {
            let data = frame.read_data();
            HeaderPage::from_bytes(&data).get_root_id(&index_name)
        }
        .unwrap_or(PageId::INVALID);
        bpm.unpin_page(HEADER_PAGE_ID, false);

        Ok(Self {
            index_name,
            root_page_id: AtomicI32::new(root.0),
            bpm,
            leaf_max_size,
            internal_max_size,
            _key: PhantomData,
        })
    }

    /// Returns the name this index is registered under.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns the current root page id.
    pub fn root_page_id(&self) -> PageId {
        PageId(self.root_page_id.load(Ordering::Acquire))
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>> {
        if self.is_empty() {
            return Ok(None);
        }

        let leaf_id = self.find_leaf_page(Some(key))?;
        let frame = self.bpm.fetch_page(leaf_id)?;
        let result = {
            let data = frame.read_data();
            LeafNode::<K>::from_bytes(&data).lookup(key)
        };
        self.bpm.unpin_page(leaf_id, false);
        Ok(result)
    }

    /// Inserts a key. Returns false if the key already exists.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, rid)
    }

    /// Removes a key. Returns false if it was not present.
    ///
    /// Pages emptied by the rebalance are queued on `txn` and physically
    /// released through the buffer pool once the operation completes.
    pub fn remove(&self, key: &K, txn: &mut Transaction) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        let leaf_id = self.find_leaf_page(Some(key))?;
        let frame = self.bpm.fetch_page(leaf_id)?;
        let mut leaf = LeafNode::<K>::from_bytes(&frame.read_data());

        if !leaf.remove(key) {
            self.bpm.unpin_page(leaf_id, false);
            return Ok(false);
        }
        frame.copy_from(leaf.as_bytes());

        self.rebalance_leaf(leaf_id, txn)?;
        self.bpm.unpin_page(leaf_id, true);

        for page_id in txn.take_deleted_pages() {
            self.bpm.delete_page(page_id)?;
        }
        Ok(true)
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> Result<IndexIterator<'_, K>> {
        if self.is_empty() {
            return Ok(IndexIterator::exhausted(&self.bpm));
        }
        let leaf_id = self.find_leaf_page(None)?;
        IndexIterator::at(&self.bpm, leaf_id, 0)
    }

    /// Iterates over all entries with keys not less than `key`.
    pub fn iter_from(&self, key: &K) -> Result<IndexIterator<'_, K>> {
        if self.is_empty() {
            return Ok(IndexIterator::exhausted(&self.bpm));
        }
        let leaf_id = self.find_leaf_page(Some(key))?;
        IndexIterator::at_key(&self.bpm, leaf_id, key)
    }

    /// Descends from the root to the leaf covering `key`, or to the leftmost
    /// leaf when no key is given. Every page on the path is unpinned again;
    /// the returned leaf id is re-fetched by the caller.
    fn find_leaf_page(&self, key: Option<&K>) -> Result<PageId> {
        let mut page_id = self.root_page_id();

        loop {
            let frame = self.bpm.fetch_page(page_id)?;
            let data = frame.read_data();
            match page_node_type(&**data) {
                Some(NodeType::Leaf) => {
                    drop(data);
                    self.bpm.unpin_page(page_id, false);
                    return Ok(page_id);
                }
                Some(NodeType::Internal) => {
                    let node = InternalNode::<K>::from_bytes(&data);
                    let child = match key {
                        Some(key) => node.search(key),
                        None => node.value_at(0),
                    };
                    drop(data);
                    self.bpm.unpin_page(page_id, false);
                    page_id = child;
                }
                None => {
                    drop(data);
                    self.bpm.unpin_page(page_id, false);
                    return Err(BasaltError::TreeCorrupted(format!(
                        "{page_id} is not a tree page"
                    )));
                }
            }
        }
    }

    /// Creates the first leaf and registers it as the root.
    fn start_new_tree(&self, key: K, rid: Rid) -> Result<()> {
        let (page_id, frame) = self.bpm.new_page()?;
        let mut leaf = LeafNode::<K>::new(page_id, PageId::INVALID, self.leaf_max_size);
        leaf.insert(key, rid);
        frame.copy_from(leaf.as_bytes());
        self.bpm.unpin_page(page_id, true);

        self.set_root_page_id(page_id)
    }

    /// Inserts into the covering leaf, splitting upward on overflow.
    fn insert_into_leaf(&self, key: K, rid: Rid) -> Result<bool> {
        let leaf_id = self.find_leaf_page(Some(&key))?;
        let frame = self.bpm.fetch_page(leaf_id)?;
        let mut leaf = LeafNode::<K>::from_bytes(&frame.read_data());

        let old_size = leaf.size();
        let new_size = leaf.insert(key, rid);

        if new_size == old_size {
            // Duplicate key
            self.bpm.unpin_page(leaf_id, false);
            return Ok(false);
        }

        if new_size < self.leaf_max_size {
            frame.copy_from(leaf.as_bytes());
            self.bpm.unpin_page(leaf_id, true);
            return Ok(true);
        }

        // The leaf reached max_size: split and splice the leaf chain
        let (new_leaf_id, new_frame) = self.bpm.new_page()?;
        let mut new_leaf =
            LeafNode::<K>::new(new_leaf_id, leaf.parent_page_id(), self.leaf_max_size);
        leaf.split_into(&mut new_leaf);
        new_leaf.set_next_page_id(leaf.next_page_id());
        leaf.set_next_page_id(new_leaf_id);

        let risen_key = new_leaf.key_at(0);

        frame.copy_from(leaf.as_bytes());
        new_frame.copy_from(new_leaf.as_bytes());

        self.insert_risen_key_into_parent(risen_key, leaf_id, leaf.parent_page_id(), new_leaf_id)?;

        self.bpm.unpin_page(new_leaf_id, true);
        self.bpm.unpin_page(leaf_id, true);
        Ok(true)
    }

    /// Installs the separator produced by a split into the parent, splitting
    /// the parent in turn when it is already full.
    fn insert_risen_key_into_parent(
        &self,
        risen_key: K,
        origin_id: PageId,
        parent_id: PageId,
        split_id: PageId,
    ) -> Result<()> {
        if !parent_id.is_valid() {
            // The origin was the root: grow the tree by one level
            let (root_id, root_frame) = self.bpm.new_page()?;
            let mut root = InternalNode::<K>::new(root_id, PageId::INVALID, self.internal_max_size);
            root.init_with_children(risen_key, origin_id, split_id);
            root_frame.copy_from(root.as_bytes());
            self.bpm.unpin_page(root_id, true);

            self.set_parent(origin_id, root_id)?;
            self.set_parent(split_id, root_id)?;
            return self.set_root_page_id(root_id);
        }

        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let mut parent = InternalNode::<K>::from_bytes(&parent_frame.read_data());

        if parent.size() < self.internal_max_size {
            parent.insert(risen_key, split_id);
            parent_frame.copy_from(parent.as_bytes());
            self.bpm.unpin_page(parent_id, true);
            return Ok(());
        }

        // The parent is full: split it with the risen pair virtually included
        let (new_parent_id, new_parent_frame) = self.bpm.new_page()?;
        let mut new_parent = InternalNode::<K>::new(
            new_parent_id,
            parent.parent_page_id(),
            self.internal_max_size,
        );
        parent.split_into(&mut new_parent, risen_key, split_id);
        let parent_risen_key = new_parent.key_at(0);

        parent_frame.copy_from(parent.as_bytes());
        new_parent_frame.copy_from(new_parent.as_bytes());

        // Children that moved to the new sibling point at a new parent now
        for i in 0..new_parent.size() {
            self.set_parent(new_parent.value_at(i), new_parent_id)?;
        }

        self.insert_risen_key_into_parent(
            parent_risen_key,
            parent_id,
            parent.parent_page_id(),
            new_parent_id,
        )?;

        self.bpm.unpin_page(new_parent_id, true);
        self.bpm.unpin_page(parent_id, true);
        Ok(())
    }

    /// Restores the leaf minimum after a removal, by redistribution or by
    /// coalescing with a sibling.
    fn rebalance_leaf(&self, leaf_id: PageId, txn: &mut Transaction) -> Result<()> {
        let leaf_frame = self.bpm.fetch_page(leaf_id)?;
        let mut leaf = LeafNode::<K>::from_bytes(&leaf_frame.read_data());

        if !leaf.parent_page_id().is_valid() {
            // Root leaf: the tree empties when its last key goes
            if leaf.size() == 0 {
                txn.add_deleted_page(leaf_id);
                self.set_root_page_id(PageId::INVALID)?;
            }
            self.bpm.unpin_page(leaf_id, false);
            return Ok(());
        }

        if leaf.size() >= leaf.min_size() {
            self.bpm.unpin_page(leaf_id, false);
            return Ok(());
        }

        let parent_id = leaf.parent_page_id();
        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let mut parent = InternalNode::<K>::from_bytes(&parent_frame.read_data());

        let pos = parent.value_position(leaf_id).ok_or_else(|| {
            BasaltError::TreeCorrupted(format!("{leaf_id} missing from its parent"))
        })?;

        // Prefer the left sibling; the leftmost child pairs with its right
        let prev_sibling = pos > 0;
        let sibling_pos = if prev_sibling { pos - 1 } else { pos + 1 };
        let sibling_id = parent.value_at(sibling_pos);
        let sibling_frame = self.bpm.fetch_page(sibling_id)?;
        let mut sibling = LeafNode::<K>::from_bytes(&sibling_frame.read_data());

        if sibling.size() > sibling.min_size() {
            // Redistribute one entry across the pair
            if prev_sibling {
                sibling.move_rear_to_front_of(&mut leaf);
                parent.set_key_at(pos, leaf.key_at(0));
            } else {
                sibling.move_front_to_rear_of(&mut leaf);
                parent.set_key_at(sibling_pos, sibling.key_at(0));
            }

            leaf_frame.copy_from(leaf.as_bytes());
            sibling_frame.copy_from(sibling.as_bytes());
            parent_frame.copy_from(parent.as_bytes());

            self.bpm.unpin_page(sibling_id, true);
            self.bpm.unpin_page(parent_id, true);
            self.bpm.unpin_page(leaf_id, true);
            return Ok(());
        }

        // Coalesce: the right page of the pair merges into the left
        if prev_sibling {
            leaf.move_all_to(&mut sibling);
            parent.remove_at(pos);
            txn.add_deleted_page(leaf_id);
        } else {
            sibling.move_all_to(&mut leaf);
            parent.remove_at(sibling_pos);
            txn.add_deleted_page(sibling_id);
        }

        leaf_frame.copy_from(leaf.as_bytes());
        sibling_frame.copy_from(sibling.as_bytes());
        parent_frame.copy_from(parent.as_bytes());

        self.rebalance_internal(parent_id, txn)?;

        self.bpm.unpin_page(sibling_id, true);
        self.bpm.unpin_page(parent_id, true);
        self.bpm.unpin_page(leaf_id, true);
        Ok(())
    }

    /// Restores the internal minimum after a child was removed, recursing
    /// toward the root.
    fn rebalance_internal(&self, page_id: PageId, txn: &mut Transaction) -> Result<()> {
        let frame = self.bpm.fetch_page(page_id)?;
        let mut node = InternalNode::<K>::from_bytes(&frame.read_data());

        if !node.parent_page_id().is_valid() {
            if node.size() == 1 {
                // The root shrank to a single child: promote it
                let only_child = node.value_at(0);
                self.set_parent(only_child, PageId::INVALID)?;
                self.set_root_page_id(only_child)?;
                txn.add_deleted_page(page_id);
            }
            self.bpm.unpin_page(page_id, false);
            return Ok(());
        }

        if node.size() >= node.min_size() {
            self.bpm.unpin_page(page_id, false);
            return Ok(());
        }

        let parent_id = node.parent_page_id();
        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let mut parent = InternalNode::<K>::from_bytes(&parent_frame.read_data());

        let pos = parent.value_position(page_id).ok_or_else(|| {
            BasaltError::TreeCorrupted(format!("{page_id} missing from its parent"))
        })?;

        let prev_sibling = pos > 0;
        let sibling_pos = if prev_sibling { pos - 1 } else { pos + 1 };
        let sibling_id = parent.value_at(sibling_pos);
        let sibling_frame = self.bpm.fetch_page(sibling_id)?;
        let mut sibling = InternalNode::<K>::from_bytes(&sibling_frame.read_data());

        if sibling.size() > sibling.min_size() {
            // Redistribute one entry, rotating it through the separator
            if prev_sibling {
                sibling.move_rear_to_front_of(&mut node, parent.key_at(pos));
                parent.set_key_at(pos, node.key_at(0));

                frame.copy_from(node.as_bytes());
                sibling_frame.copy_from(sibling.as_bytes());
                parent_frame.copy_from(parent.as_bytes());

                self.set_parent(node.value_at(0), page_id)?;
            } else {
                sibling.move_front_to_rear_of(&mut node, parent.key_at(sibling_pos));
                parent.set_key_at(sibling_pos, sibling.key_at(0));

                frame.copy_from(node.as_bytes());
                sibling_frame.copy_from(sibling.as_bytes());
                parent_frame.copy_from(parent.as_bytes());

                self.set_parent(node.value_at(node.size() - 1), page_id)?;
            }

            self.bpm.unpin_page(sibling_id, true);
            self.bpm.unpin_page(parent_id, true);
            self.bpm.unpin_page(page_id, true);
            return Ok(());
        }

        // Coalesce, pulling the separator down into the merged page
        if prev_sibling {
            let old_size = sibling.size();
            node.move_all_to(&mut sibling, parent.key_at(pos));
            parent.remove_at(pos);
            txn.add_deleted_page(page_id);

            frame.copy_from(node.as_bytes());
            sibling_frame.copy_from(sibling.as_bytes());
            parent_frame.copy_from(parent.as_bytes());

            for i in old_size..sibling.size() {
                self.set_parent(sibling.value_at(i), sibling_id)?;
            }
        } else {
            let old_size = node.size();
            sibling.move_all_to(&mut node, parent.key_at(sibling_pos));
            parent.remove_at(sibling_pos);
            txn.add_deleted_page(sibling_id);

            frame.copy_from(node.as_bytes());
            sibling_frame.copy_from(sibling.as_bytes());
            parent_frame.copy_from(parent.as_bytes());

            for i in old_size..node.size() {
                self.set_parent(node.value_at(i), page_id)?;
            }
        }

        self.rebalance_internal(parent_id, txn)?;

        self.bpm.unpin_page(sibling_id, true);
        self.bpm.unpin_page(parent_id, true);
        self.bpm.unpin_page(page_id, true);
        Ok(())
    }

    /// Rewrites a page's parent pointer in place.
    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let frame = self.bpm.fetch_page(page_id)?;
        {
            let mut data = frame.write_data();
            set_page_parent(&mut **data, parent_id);
        }
        self.bpm.unpin_page(page_id, true);
        Ok(())
    }

    /// Updates the in-memory root id and persists it in the header page.
    fn set_root_page_id(&self, root_id: PageId) -> Result<()> {
        self.root_page_id.store(root_id.0, Ordering::Release);
        debug!(index = %self.index_name, %root_id, "root page changed");

        let frame = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::from_bytes(&frame.read_data());
        if !header.update_record(&self.index_name, root_id)
            && !header.insert_record(&self.index_name, root_id)
        {
            self.bpm.unpin_page(HEADER_PAGE_ID, false);
            return Err(BasaltError::HeaderPageFull(self.index_name.clone()));
        }
        frame.copy_from(header.as_bytes());
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }
}
