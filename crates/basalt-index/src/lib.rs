//! Disk-resident B+Tree index for BasaltDB.
//!
//! This crate provides ordered indexing on top of the buffer pool:
//! - Leaf and internal page layouts with in-place entry arrays
//! - Tree-level search, insert, and delete with split, redistribution, and
//!   coalescing
//! - Forward range iteration over the leaf chain
//! - Root persistence via the header page

mod header;
mod iterator;
mod key;
mod node;
mod transaction;
mod tree;

pub use header::HeaderPage;
pub use iterator::IndexIterator;
pub use key::IndexKey;
pub use node::{page_node_type, page_parent, InternalNode, LeafNode, NodeType, NODE_HEADER_SIZE};
pub use transaction::Transaction;
pub use tree::BPlusTree;
