//! Disk-resident B+ tree index for VellumDB.
//!
//! The index maps 32-bit signed integer keys to external record identifiers.
//! Leaves hold `(key, RecordId)` pairs and are doubly linked for range
//! scans; index nodes hold `(separator, child)` pairs plus a left link
//! covering keys below the first separator. The tree stays balanced and
//! half-full under arbitrary insert/delete workloads: splits promote one
//! separator upward, underflow is repaired by borrowing from a sibling
//! before merging, and the root collapses when an index root runs out of
//! separators.
//!
//! Pages live in the buffer pool and are accessed through RAII pin guards;
//! the root page identifier is persisted in the file catalog under the
//! index's name.

mod catalog;
mod index_node;
mod leaf;
mod record;
mod scan;
mod sorted_page;
mod stats;
mod tree;

pub use catalog::FileCatalog;
pub use index_node::{ChildLookup, ChildRef, IndexEntry, IndexNode, INDEX_ENTRY_SIZE};
pub use leaf::{LeafEntry, LeafNode, LEAF_ENTRY_SIZE};
pub use record::RecordId;
pub use scan::TreeScan;
pub use sorted_page::{SortedPage, DATA_AREA_SIZE, SLOT_SIZE};
pub use stats::{FillStats, TreeStats};
pub use tree::BTree;
