//! B+ tree index (internal) node adapter over the sorted page.

use crate::record::RecordId;
use crate::sorted_page::{SortedPage, SLOT_SIZE};
use bytes::{Bytes, BytesMut};
use vellum_common::page::{PageId, PageType, PAGE_SIZE};
use vellum_common::{Result, VellumError};

/// On-disk size of an index entry: key(4) + file_id(4) + page_num(4).
pub const INDEX_ENTRY_SIZE: usize = 12;

/// A `(separator, child)` pair stored in an index node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// The separator key.
    pub key: i32,
    /// The child covering keys in `[key, next separator)`.
    pub child: PageId,
}

impl IndexEntry {
    /// Serializes the entry to bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(INDEX_ENTRY_SIZE);
        buf.extend_from_slice(&self.key.to_le_bytes());
        buf.extend_from_slice(&self.child.file_id.to_le_bytes());
        buf.extend_from_slice(&self.child.page_num.to_le_bytes());
        buf.freeze()
    }

    /// Deserializes an entry from bytes.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < INDEX_ENTRY_SIZE {
            return None;
        }
        let key = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let file_id = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let page_num = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);

        Some(Self {
            key,
            child: PageId::new(file_id, page_num),
        })
    }
}

/// The child an index node routes a search key to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    /// Separator bounding the child from below; None for the left link.
    pub sep: Option<i32>,
    /// The child page.
    pub pid: PageId,
}

/// The covering child plus its immediate siblings within one index node.
///
/// `prev` and `next` are None when the covering child is the left link or
/// the last child, respectively. When a sibling is present the separator on
/// its side is present too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLookup {
    /// Separator bounding the covering child from below; None for the left
    /// link.
    pub cur_sep: Option<i32>,
    /// Separator bounding the next sibling from below.
    pub next_sep: Option<i32>,
    /// The covering child.
    pub cur: PageId,
    /// The sibling immediately before the covering child.
    pub prev: Option<PageId>,
    /// The sibling immediately after the covering child.
    pub next: Option<PageId>,
}

/// B+ tree index node.
///
/// Stores a left link plus `(separator, child)` pairs sorted ascending by
/// separator. A search key descends to the left link if it is below the
/// first separator, otherwise to the child of the greatest separator not
/// exceeding it.
pub struct IndexNode {
    page: SortedPage,
}

impl IndexNode {
    /// Creates a new empty index node with no left link.
    pub fn init(page_id: PageId) -> Self {
        Self {
            page: SortedPage::init(page_id, PageType::Index),
        }
    }

    /// Attaches to a page image, checking the node type tag.
    pub fn from_bytes(data: [u8; PAGE_SIZE]) -> Result<Self> {
        let page = SortedPage::from_bytes(data);
        if page.page_type() != Some(PageType::Index) {
            return Err(VellumError::InvalidNodeType);
        }
        Ok(Self { page })
    }

    /// Returns the raw page image.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        self.page.as_bytes()
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns the left link.
    pub fn left_link(&self) -> Option<PageId> {
        self.page.left_link()
    }

    /// Sets the left link.
    pub fn set_left_link(&mut self, page_id: PageId) {
        self.page.set_left_link(Some(page_id));
    }

    /// Returns the number of separator entries (the left link not counted).
    pub fn num_entries(&self) -> u16 {
        self.page.slot_count()
    }

    /// Returns the entry at the given slot.
    pub fn entry(&self, slot_no: u16) -> Option<IndexEntry> {
        IndexEntry::from_bytes(self.page.record(slot_no)?)
    }

    /// Returns the first entry in separator order.
    pub fn first_entry(&self) -> Option<IndexEntry> {
        self.entry(0)
    }

    /// Returns the last entry in separator order.
    pub fn last_entry(&self) -> Option<IndexEntry> {
        let n = self.num_entries();
        if n == 0 {
            None
        } else {
            self.entry(n - 1)
        }
    }

    /// Returns all entries in separator order.
    pub fn entries(&self) -> Vec<IndexEntry> {
        (0..self.num_entries()).filter_map(|i| self.entry(i)).collect()
    }

    /// Returns the bytes free for new entries.
    pub fn available_space(&self) -> usize {
        self.page.available_space()
    }

    /// Returns true if one more entry fits.
    pub fn can_fit(&self) -> bool {
        self.available_space() >= INDEX_ENTRY_SIZE + SLOT_SIZE
    }

    /// Inserts a `(separator, child)` pair, maintaining separator order.
    pub fn insert(&mut self, key: i32, child: PageId) -> Result<RecordId> {
        let entry = IndexEntry { key, child };
        let slot_no = self.page.insert_record(&entry.to_bytes())?;
        Ok(RecordId::new(self.page_id(), slot_no))
    }

    /// Deletes the entry with the given separator.
    ///
    /// Returns the slot it occupied, or `EntryNotFound`.
    pub fn delete(&mut self, key: i32) -> Result<RecordId> {
        for slot_no in 0..self.num_entries() {
            let entry = self.entry(slot_no).ok_or(VellumError::InvalidSlot(slot_no))?;
            if entry.key > key {
                break;
            }
            if entry.key == key {
                self.page.delete_record(slot_no)?;
                return Ok(RecordId::new(self.page_id(), slot_no));
            }
        }
        Err(VellumError::EntryNotFound)
    }

    /// Removes the entry at the given slot.
    pub(crate) fn remove_at(&mut self, slot_no: u16) -> Result<()> {
        self.page.delete_record(slot_no)
    }

    /// Index of the first entry whose separator exceeds the search key.
    fn upper_bound(&self, key: i32) -> u16 {
        let mut lo = 0u16;
        let mut hi = self.num_entries();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.entry(mid) {
                Some(entry) if entry.key <= key => lo = mid + 1,
                _ => hi = mid,
            }
        }
        lo
    }

    /// Locates the child covering the search key.
    ///
    /// The chosen child is the one whose separator is the greatest not
    /// exceeding the key, or the left link if every separator exceeds it.
    pub fn find_child(&self, key: i32) -> Result<ChildRef> {
        let idx = self.upper_bound(key);
        if idx == 0 {
            let pid = self.left_link().ok_or_else(|| {
                VellumError::TreeCorrupted(format!(
                    "index node {} has no left link",
                    self.page_id()
                ))
            })?;
            Ok(ChildRef { sep: None, pid })
        } else {
            let entry = self.entry(idx - 1).ok_or(VellumError::InvalidSlot(idx - 1))?;
            Ok(ChildRef {
                sep: Some(entry.key),
                pid: entry.child,
            })
        }
    }

    /// Locates the covering child together with its neighboring siblings and
    /// the separators that bound them.
    pub fn find_child_with_siblings(&self, key: i32) -> Result<ChildLookup> {
        let idx = self.upper_bound(key);
        let left_link = self.left_link().ok_or_else(|| {
            VellumError::TreeCorrupted(format!("index node {} has no left link", self.page_id()))
        })?;

        if idx == 0 {
            let next = self.entry(0);
            return Ok(ChildLookup {
                cur_sep: None,
                next_sep: next.map(|e| e.key),
                cur: left_link,
                prev: None,
                next: next.map(|e| e.child),
            });
        }

        let cur = self.entry(idx - 1).ok_or(VellumError::InvalidSlot(idx - 1))?;
        let prev = if idx >= 2 {
            self.entry(idx - 2).map(|e| e.child)
        } else {
            Some(left_link)
        };
        let next = self.entry(idx);

        Ok(ChildLookup {
            cur_sep: Some(cur.key),
            next_sep: next.map(|e| e.key),
            cur: cur.child,
            prev,
            next: next.map(|e| e.child),
        })
    }

    /// Returns true if used space is at least 50% of the data area.
    pub fn is_at_least_half_full(&self) -> bool {
        self.page.is_at_least_half_full()
    }

    /// Returns true if the node would remain at least half full after one
    /// deletion.
    ///
    /// Probes by deleting and reinserting the first entry; the page content
    /// is unchanged on return.
    pub fn is_at_least_half_full_after_delete(&mut self) -> bool {
        if !self.is_at_least_half_full() {
            return false;
        }
        let first = match self.first_entry() {
            Some(entry) => entry,
            None => return false,
        };
        if self.page.delete_record(0).is_err() {
            return false;
        }
        let still_half_full = self.is_at_least_half_full();
        let _ = self.insert(first.key, first.child);
        still_half_full
    }
}
