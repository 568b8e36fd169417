//! Positioned forward scan over a key range.

use crate::leaf::LeafNode;
use crate::record::RecordId;
use crate::tree::BTree;
use vellum_common::Result;
use vellum_common::VellumError;

/// A forward iterator over the entries in `[low, high]`.
///
/// The cursor caches the last returned `(key, rid)` pair and re-resolves its
/// leaf position from the low key on every step, so it tolerates the tree
/// mutating underneath it — including deletion of its own current entry.
pub struct TreeScan<'a> {
    tree: &'a mut BTree,
    /// Lower bound; advanced to each returned key.
    low: i32,
    /// Inclusive upper bound.
    high: i32,
    /// Key of the last entry handed out.
    last_key: Option<i32>,
    /// Data record of the last entry handed out.
    last_rid: Option<RecordId>,
    done: bool,
}

impl<'a> TreeScan<'a> {
    /// Positions a scan over `[low, high]`; absent bounds resolve to the
    /// tree's current extremes.
    pub(crate) fn open(
        tree: &'a mut BTree,
        low: Option<i32>,
        high: Option<i32>,
    ) -> Result<TreeScan<'a>> {
        let mut done = tree.root().is_none();

        let low = match low {
            Some(low) => low,
            None => match tree.min_key()? {
                Some(key) => key,
                None => {
                    done = true;
                    0
                }
            },
        };
        let high = match high {
            Some(high) => high,
            None => match tree.max_key()? {
                Some(key) => key,
                None => {
                    done = true;
                    0
                }
            },
        };

        Ok(TreeScan {
            tree,
            low,
            high,
            last_key: None,
            last_rid: None,
            done,
        })
    }

    /// Returns the next `(key, rid)` pair in ascending key order, or `None`
    /// when the range is exhausted.
    pub fn get_next(&mut self) -> Result<Option<(i32, RecordId)>> {
        if self.done {
            return Ok(None);
        }
        if self.low > self.high {
            self.done = true;
            return Ok(None);
        }

        // Re-resolve the leaf from the cursor key; cached positions may have
        // been merged away by deletions
        let mut pid = match self.tree.find_leaf_for(self.low)? {
            Some(pid) => pid,
            None => {
                self.done = true;
                return Ok(None);
            }
        };

        loop {
            let guard = self.tree.pool.pin(pid)?;
            let leaf = LeafNode::from_bytes(guard.page())?;

            let mut found = None;
            for slot_no in 0..leaf.num_entries() {
                let entry = leaf
                    .entry(slot_no)
                    .ok_or(VellumError::InvalidSlot(slot_no))?;
                if entry.key >= self.low && Some(entry.key) != self.last_key {
                    found = Some(entry);
                    break;
                }
            }

            match found {
                Some(entry) => {
                    if entry.key > self.high {
                        self.done = true;
                        return Ok(None);
                    }
                    self.low = entry.key;
                    self.last_key = Some(entry.key);
                    self.last_rid = Some(entry.rid);
                    return Ok(Some((entry.key, entry.rid)));
                }
                None => match leaf.next_page() {
                    Some(next) => pid = next,
                    None => {
                        self.done = true;
                        return Ok(None);
                    }
                },
            }
        }
    }

    /// Deletes the entry returned by the previous [`TreeScan::get_next`].
    ///
    /// The scan remains valid and resumes after the deleted key.
    pub fn delete_current(&mut self) -> Result<()> {
        let (key, rid) = match (self.last_key, self.last_rid) {
            (Some(key), Some(rid)) => (key, rid),
            _ => return Err(VellumError::EntryNotFound),
        };
        self.tree.delete(key, rid)
    }
}
