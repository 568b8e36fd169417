//! B+ tree engine: open/create, insert with split-promote, delete with
//! redistribute-or-merge, root management, and destroy.

use crate::catalog::FileCatalog;
use crate::index_node::{ChildLookup, IndexNode};
use crate::leaf::LeafNode;
use crate::record::RecordId;
use crate::scan::TreeScan;
use crate::sorted_page::SortedPage;
use std::sync::Arc;
use tracing::debug;
use vellum_buffer::{BufferPool, PageGuard};
use vellum_common::page::{PageId, PageType};
use vellum_common::{Result, VellumError};

/// File holding all index pages.
pub(crate) const INDEX_FILE_ID: u32 = 1;

/// Outcome a recursive insert reports to its parent.
enum InsertOutcome {
    /// The entry fit without structural change.
    Clean,
    /// The child split; the parent must route `sep` to the new right page.
    Split { sep: i32, right: PageId },
}

/// Outcome a recursive delete reports to its parent.
enum DeleteOutcome {
    /// No separator change required.
    Clean,
    /// Underflow repaired by borrowing; the parent must rebind `child`
    /// under `new_sep` in place of `replaced_sep`.
    Redistributed {
        replaced_sep: i32,
        new_sep: i32,
        child: PageId,
    },
    /// Underflow repaired by merging; the parent must drop `dropped_sep`.
    Merged { dropped_sep: i32 },
}

/// A disk-resident B+ tree index keyed by `i32`.
///
/// The tree is identified by a logical file name; the catalog stores its
/// root page. All non-root nodes stay at least half full under arbitrary
/// insert/delete workloads.
pub struct BTree {
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) catalog: Arc<FileCatalog>,
    pub(crate) name: String,
    pub(crate) root: Option<PageId>,
}

impl BTree {
    /// Opens the index under `name`, creating it if the catalog has no
    /// entry.
    ///
    /// A created index starts as a single empty leaf registered as root.
    pub fn open(pool: Arc<BufferPool>, catalog: Arc<FileCatalog>, name: &str) -> Result<Self> {
        let mut tree = Self {
            pool,
            catalog,
            name: name.to_string(),
            root: None,
        };

        match tree.catalog.get_entry(name) {
            Some(root) => tree.root = Some(root),
            None => {
                let root = tree.allocate_leaf_root()?;
                tree.catalog.add_entry(name, root)?;
                tree.root = Some(root);
                debug!(index = name, root = %root, "created index");
            }
        }

        Ok(tree)
    }

    /// Returns the root page, if the tree exists.
    pub fn root(&self) -> Option<PageId> {
        self.root
    }

    /// Returns the index's logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn allocate_leaf_root(&self) -> Result<PageId> {
        let guard = self.pool.new_page(INDEX_FILE_ID)?;
        let leaf = LeafNode::init(guard.page_id());
        guard.commit(leaf.as_bytes());
        Ok(guard.page_id())
    }

    fn set_root(&mut self, root: PageId) -> Result<()> {
        self.root = Some(root);
        self.catalog.update_entry(&self.name, root)
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a `(key, rid)` entry.
    pub fn insert(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let root = match self.root {
            Some(root) => root,
            None => {
                // Destroyed tree: recreate root and catalog entry lazily
                let root = self.allocate_leaf_root()?;
                self.catalog.add_entry(&self.name, root)?;
                self.root = Some(root);
                root
            }
        };

        match self.insert_into(root, key, rid)? {
            InsertOutcome::Clean => Ok(()),
            InsertOutcome::Split { sep, right } => {
                // The root split: grow the tree by one level
                let guard = self.pool.new_page(INDEX_FILE_ID)?;
                let new_root_pid = guard.page_id();
                let mut new_root = IndexNode::init(new_root_pid);
                new_root.set_left_link(root);
                new_root.insert(sep, right)?;
                guard.commit(new_root.as_bytes());
                drop(guard);

                self.set_root(new_root_pid)?;
                debug!(index = %self.name, root = %new_root_pid, sep, "root split, height grew");
                Ok(())
            }
        }
    }

    fn insert_into(&self, pid: PageId, key: i32, rid: RecordId) -> Result<InsertOutcome> {
        let guard = self.pool.pin(pid)?;
        let bytes = guard.page();

        match SortedPage::page_type_of(&bytes) {
            Some(PageType::Index) => {
                let node = IndexNode::from_bytes(bytes)?;
                let child = node.find_child(key)?.pid;
                drop(guard);

                match self.insert_into(child, key, rid)? {
                    InsertOutcome::Clean => Ok(InsertOutcome::Clean),
                    InsertOutcome::Split { sep, right } => {
                        let guard = self.pool.pin(pid)?;
                        let mut node = IndexNode::from_bytes(guard.page())?;
                        if node.can_fit() {
                            node.insert(sep, right)?;
                            guard.commit(node.as_bytes());
                            Ok(InsertOutcome::Clean)
                        } else {
                            let (promoted, new_pid) = self.split_index(&mut node, sep, right)?;
                            guard.commit(node.as_bytes());
                            Ok(InsertOutcome::Split {
                                sep: promoted,
                                right: new_pid,
                            })
                        }
                    }
                }
            }
            Some(PageType::Leaf) => {
                let mut leaf = LeafNode::from_bytes(bytes)?;
                if leaf.can_fit() {
                    leaf.insert(key, rid)?;
                    guard.commit(leaf.as_bytes());
                    Ok(InsertOutcome::Clean)
                } else {
                    let (sep, new_pid) = self.split_leaf(&mut leaf, key, rid)?;
                    guard.commit(leaf.as_bytes());
                    Ok(InsertOutcome::Split {
                        sep,
                        right: new_pid,
                    })
                }
            }
            _ => Err(VellumError::TreeCorrupted(format!(
                "page {pid} has no node type"
            ))),
        }
    }

    /// Splits a full leaf, inserting `(key, rid)` on whichever side it
    /// belongs.
    ///
    /// Entries are balanced until the two pages' free space converges. The
    /// new leaf becomes `old`'s successor and the promoted separator is its
    /// first key.
    fn split_leaf(&self, old: &mut LeafNode, key: i32, rid: RecordId) -> Result<(i32, PageId)> {
        let new_guard = self.pool.new_page(INDEX_FILE_ID)?;
        let new_pid = new_guard.page_id();
        let mut new = LeafNode::init(new_pid);

        // Move everything to the new page, then move entries back in
        // ascending order until free space converges
        while let Some(entry) = old.entry(0) {
            new.insert(entry.key, entry.rid)?;
            old.remove_at(0)?;
        }

        let mut inserted = false;
        while old.available_space() > new.available_space() {
            let first = match new.first_entry() {
                Some(entry) => entry,
                None => break,
            };
            if !inserted && key < first.key {
                old.insert(key, rid)?;
                inserted = true;
            } else {
                old.insert(first.key, first.rid)?;
                new.remove_at(0)?;
            }
        }
        if !inserted {
            new.insert(key, rid)?;
        }

        let sep = new
            .first_entry()
            .ok_or_else(|| VellumError::TreeCorrupted("leaf split produced empty page".into()))?
            .key;

        // Stitch the sibling list: old <-> new <-> old's former successor
        let old_next = old.next_page();
        new.set_prev_page(Some(old.page_id()));
        new.set_next_page(old_next);
        if let Some(successor) = old_next {
            let guard = self.pool.pin(successor)?;
            let mut next_leaf = LeafNode::from_bytes(guard.page())?;
            next_leaf.set_prev_page(Some(new_pid));
            guard.commit(next_leaf.as_bytes());
        }
        old.set_next_page(Some(new_pid));

        new_guard.commit(new.as_bytes());
        debug!(old = %old.page_id(), new = %new_pid, sep, "leaf split");
        Ok((sep, new_pid))
    }

    /// Splits a full index node, inserting `(key, child)` on whichever side
    /// it belongs.
    ///
    /// The balanced new page's first entry is promoted: its child becomes
    /// the new page's left link and its key goes up to the parent.
    fn split_index(&self, old: &mut IndexNode, key: i32, child: PageId) -> Result<(i32, PageId)> {
        let new_guard = self.pool.new_page(INDEX_FILE_ID)?;
        let new_pid = new_guard.page_id();
        let mut new = IndexNode::init(new_pid);

        while let Some(entry) = old.entry(0) {
            new.insert(entry.key, entry.child)?;
            old.remove_at(0)?;
        }

        let mut inserted = false;
        while old.available_space() > new.available_space() {
            let first = match new.first_entry() {
                Some(entry) => entry,
                None => break,
            };
            if !inserted && key < first.key {
                old.insert(key, child)?;
                inserted = true;
            } else {
                old.insert(first.key, first.child)?;
                new.remove_at(0)?;
            }
        }
        if !inserted {
            new.insert(key, child)?;
        }

        // The new page's first entry is not stored: its child is addressed
        // through the left link and its key is the promoted separator
        let first = new
            .first_entry()
            .ok_or_else(|| VellumError::TreeCorrupted("index split produced empty page".into()))?;
        new.set_left_link(first.child);
        new.remove_at(0)?;

        new_guard.commit(new.as_bytes());
        debug!(old = %old.page_id(), new = %new_pid, sep = first.key, "index split");
        Ok((first.key, new_pid))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Deletes the `(key, rid)` entry. Fails if the pair is not present.
    pub fn delete(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let root = self.root.ok_or(VellumError::EntryNotFound)?;
        let guard = self.pool.pin(root)?;
        let bytes = guard.page();

        match SortedPage::page_type_of(&bytes) {
            Some(PageType::Leaf) => {
                // A root leaf has no minimum-fill requirement
                let mut leaf = LeafNode::from_bytes(bytes)?;
                leaf.delete(key, rid)?;
                guard.commit(leaf.as_bytes());
                Ok(())
            }
            Some(PageType::Index) => {
                let node = IndexNode::from_bytes(bytes)?;
                let lookup = node.find_child_with_siblings(key)?;
                drop(guard);

                match self.delete_from(key, rid, lookup)? {
                    DeleteOutcome::Clean => Ok(()),
                    DeleteOutcome::Redistributed {
                        replaced_sep,
                        new_sep,
                        child,
                    } => {
                        let guard = self.pool.pin(root)?;
                        let mut node = IndexNode::from_bytes(guard.page())?;
                        node.delete(replaced_sep)?;
                        node.insert(new_sep, child)?;
                        guard.commit(node.as_bytes());
                        Ok(())
                    }
                    DeleteOutcome::Merged { dropped_sep } => {
                        let guard = self.pool.pin(root)?;
                        let mut node = IndexNode::from_bytes(guard.page())?;
                        node.delete(dropped_sep)?;

                        if node.num_entries() == 0 {
                            // Root collapse: the lone left-link child takes over
                            let new_root = node.left_link().ok_or_else(|| {
                                VellumError::TreeCorrupted(
                                    "collapsing root has no left link".into(),
                                )
                            })?;
                            drop(guard);
                            self.pool.free_page(root)?;
                            self.set_root(new_root)?;
                            debug!(index = %self.name, root = %new_root, "root collapsed");
                        } else {
                            guard.commit(node.as_bytes());
                        }
                        Ok(())
                    }
                }
            }
            _ => Err(VellumError::TreeCorrupted(format!(
                "page {root} has no node type"
            ))),
        }
    }

    fn delete_from(&self, key: i32, rid: RecordId, lookup: ChildLookup) -> Result<DeleteOutcome> {
        let guard = self.pool.pin(lookup.cur)?;
        let bytes = guard.page();

        match SortedPage::page_type_of(&bytes) {
            Some(PageType::Index) => {
                let node = IndexNode::from_bytes(bytes)?;
                let child_lookup = node.find_child_with_siblings(key)?;
                drop(guard);

                match self.delete_from(key, rid, child_lookup)? {
                    DeleteOutcome::Clean => Ok(DeleteOutcome::Clean),
                    DeleteOutcome::Redistributed {
                        replaced_sep,
                        new_sep,
                        child,
                    } => {
                        let guard = self.pool.pin(lookup.cur)?;
                        let mut node = IndexNode::from_bytes(guard.page())?;
                        node.delete(replaced_sep)?;
                        node.insert(new_sep, child)?;
                        guard.commit(node.as_bytes());
                        Ok(DeleteOutcome::Clean)
                    }
                    DeleteOutcome::Merged { dropped_sep } => {
                        let guard = self.pool.pin(lookup.cur)?;
                        let mut node = IndexNode::from_bytes(guard.page())?;
                        node.delete(dropped_sep)?;

                        if node.is_at_least_half_full() {
                            guard.commit(node.as_bytes());
                            Ok(DeleteOutcome::Clean)
                        } else {
                            self.index_underflow(guard, node, &lookup)
                        }
                    }
                }
            }
            Some(PageType::Leaf) => {
                let mut leaf = LeafNode::from_bytes(bytes)?;
                leaf.delete(key, rid)?;

                if leaf.is_at_least_half_full() {
                    guard.commit(leaf.as_bytes());
                    Ok(DeleteOutcome::Clean)
                } else {
                    self.leaf_underflow(guard, leaf, &lookup)
                }
            }
            _ => Err(VellumError::TreeCorrupted(format!(
                "page {} has no node type",
                lookup.cur
            ))),
        }
    }

    /// Repairs an underfull leaf: borrow from the previous sibling, else the
    /// next, else merge.
    fn leaf_underflow(
        &self,
        guard: PageGuard<'_>,
        mut leaf: LeafNode,
        lookup: &ChildLookup,
    ) -> Result<DeleteOutcome> {
        let cur_sep = |lookup: &ChildLookup| {
            lookup.cur_sep.ok_or_else(|| {
                VellumError::TreeCorrupted("leaf with previous sibling but no separator".into())
            })
        };
        let next_sep = |lookup: &ChildLookup| {
            lookup.next_sep.ok_or_else(|| {
                VellumError::TreeCorrupted("leaf with next sibling but no separator".into())
            })
        };

        // Borrow the previous sibling's last entry
        if let Some(prev_pid) = lookup.prev {
            let prev_guard = self.pool.pin(prev_pid)?;
            let mut prev = LeafNode::from_bytes(prev_guard.page())?;
            if prev.is_at_least_half_full_after_delete() {
                let borrowed = prev.last_entry().ok_or_else(|| {
                    VellumError::TreeCorrupted("half-full leaf has no entries".into())
                })?;
                prev.remove_at(prev.num_entries() - 1)?;
                leaf.insert(borrowed.key, borrowed.rid)?;

                let new_sep = leaf
                    .first_entry()
                    .ok_or_else(|| VellumError::TreeCorrupted("leaf empty after borrow".into()))?
                    .key;

                prev_guard.commit(prev.as_bytes());
                guard.commit(leaf.as_bytes());
                debug!(leaf = %leaf.page_id(), from = %prev_pid, new_sep, "leaf redistributed");
                return Ok(DeleteOutcome::Redistributed {
                    replaced_sep: cur_sep(lookup)?,
                    new_sep,
                    child: lookup.cur,
                });
            }
        }

        // Borrow the next sibling's first entry
        if let Some(next_pid) = lookup.next {
            let next_guard = self.pool.pin(next_pid)?;
            let mut next = LeafNode::from_bytes(next_guard.page())?;
            if next.is_at_least_half_full_after_delete() {
                let borrowed = next.first_entry().ok_or_else(|| {
                    VellumError::TreeCorrupted("half-full leaf has no entries".into())
                })?;
                next.remove_at(0)?;
                leaf.insert(borrowed.key, borrowed.rid)?;

                // The next sibling keeps its binding but under its new first key
                let new_sep = next
                    .first_entry()
                    .ok_or_else(|| VellumError::TreeCorrupted("leaf empty after borrow".into()))?
                    .key;

                next_guard.commit(next.as_bytes());
                guard.commit(leaf.as_bytes());
                debug!(leaf = %leaf.page_id(), from = %next_pid, new_sep, "leaf redistributed");
                return Ok(DeleteOutcome::Redistributed {
                    replaced_sep: next_sep(lookup)?,
                    new_sep,
                    child: next_pid,
                });
            }
        }

        // Merge: absorb the next sibling, or fold into the previous one when
        // this is the rightmost leaf
        if let Some(next_pid) = lookup.next {
            let next_guard = self.pool.pin(next_pid)?;
            let mut next = LeafNode::from_bytes(next_guard.page())?;

            while let Some(entry) = next.entry(0) {
                leaf.insert(entry.key, entry.rid)?;
                next.remove_at(0)?;
            }

            let new_next = next.next_page();
            leaf.set_next_page(new_next);
            if let Some(successor) = new_next {
                let successor_guard = self.pool.pin(successor)?;
                let mut successor_leaf = LeafNode::from_bytes(successor_guard.page())?;
                successor_leaf.set_prev_page(Some(leaf.page_id()));
                successor_guard.commit(successor_leaf.as_bytes());
            }

            // The emptied sibling stays allocated; nothing references it
            next_guard.commit(next.as_bytes());
            guard.commit(leaf.as_bytes());
            debug!(leaf = %leaf.page_id(), absorbed = %next_pid, "leaf merged with next");
            Ok(DeleteOutcome::Merged {
                dropped_sep: next_sep(lookup)?,
            })
        } else {
            let prev_pid = lookup.prev.ok_or_else(|| {
                VellumError::TreeCorrupted("underfull leaf has no siblings".into())
            })?;
            let prev_guard = self.pool.pin(prev_pid)?;
            let mut prev = LeafNode::from_bytes(prev_guard.page())?;

            while let Some(entry) = leaf.entry(0) {
                prev.insert(entry.key, entry.rid)?;
                leaf.remove_at(0)?;
            }
            prev.set_next_page(leaf.next_page());

            prev_guard.commit(prev.as_bytes());
            guard.commit(leaf.as_bytes());
            debug!(leaf = %leaf.page_id(), into = %prev_pid, "leaf merged into previous");
            Ok(DeleteOutcome::Merged {
                dropped_sep: cur_sep(lookup)?,
            })
        }
    }

    /// Repairs an underfull index node with the protocol symmetric to
    /// [`Self::leaf_underflow`], rotating entries through the left link.
    fn index_underflow(
        &self,
        guard: PageGuard<'_>,
        mut node: IndexNode,
        lookup: &ChildLookup,
    ) -> Result<DeleteOutcome> {
        let left_link = |node: &IndexNode| {
            node.left_link().ok_or_else(|| {
                VellumError::TreeCorrupted(format!(
                    "index node {} has no left link",
                    node.page_id()
                ))
            })
        };
        let cur_sep = lookup.cur_sep;
        let next_sep = lookup.next_sep;

        // Borrow the previous sibling's last entry: the separator rotates
        // down in front of the left link, the borrowed child becomes the new
        // left link, and the borrowed key rotates up
        if let Some(prev_pid) = lookup.prev {
            let prev_guard = self.pool.pin(prev_pid)?;
            let mut prev = IndexNode::from_bytes(prev_guard.page())?;
            if prev.is_at_least_half_full_after_delete() {
                let borrowed = prev.last_entry().ok_or_else(|| {
                    VellumError::TreeCorrupted("half-full index node has no entries".into())
                })?;
                prev.remove_at(prev.num_entries() - 1)?;

                let sep = cur_sep.ok_or_else(|| {
                    VellumError::TreeCorrupted("node with previous sibling but no separator".into())
                })?;
                let old_left = left_link(&node)?;
                node.insert(sep, old_left)?;
                node.set_left_link(borrowed.child);

                prev_guard.commit(prev.as_bytes());
                guard.commit(node.as_bytes());
                debug!(node = %node.page_id(), from = %prev_pid, "index node redistributed");
                return Ok(DeleteOutcome::Redistributed {
                    replaced_sep: sep,
                    new_sep: borrowed.key,
                    child: lookup.cur,
                });
            }
        }

        // Borrow the next sibling's first entry
        if let Some(next_pid) = lookup.next {
            let next_guard = self.pool.pin(next_pid)?;
            let mut next = IndexNode::from_bytes(next_guard.page())?;
            if next.is_at_least_half_full_after_delete() {
                let borrowed = next.first_entry().ok_or_else(|| {
                    VellumError::TreeCorrupted("half-full index node has no entries".into())
                })?;
                next.remove_at(0)?;

                let sep = next_sep.ok_or_else(|| {
                    VellumError::TreeCorrupted("node with next sibling but no separator".into())
                })?;
                let next_left = left_link(&next)?;
                node.insert(sep, next_left)?;
                next.set_left_link(borrowed.child);

                next_guard.commit(next.as_bytes());
                guard.commit(node.as_bytes());
                debug!(node = %node.page_id(), from = %next_pid, "index node redistributed");
                return Ok(DeleteOutcome::Redistributed {
                    replaced_sep: sep,
                    new_sep: borrowed.key,
                    child: next_pid,
                });
            }
        }

        // Merge: the separator joins the two nodes as a real entry in front
        // of the absorbed node's left link
        if let Some(next_pid) = lookup.next {
            let next_guard = self.pool.pin(next_pid)?;
            let mut next = IndexNode::from_bytes(next_guard.page())?;

            let sep = next_sep.ok_or_else(|| {
                VellumError::TreeCorrupted("node with next sibling but no separator".into())
            })?;
            let next_left = left_link(&next)?;
            node.insert(sep, next_left)?;
            while let Some(entry) = next.entry(0) {
                node.insert(entry.key, entry.child)?;
                next.remove_at(0)?;
            }

            next_guard.commit(next.as_bytes());
            guard.commit(node.as_bytes());
            debug!(node = %node.page_id(), absorbed = %next_pid, "index node merged with next");
            Ok(DeleteOutcome::Merged { dropped_sep: sep })
        } else {
            let prev_pid = lookup.prev.ok_or_else(|| {
                VellumError::TreeCorrupted("underfull index node has no siblings".into())
            })?;
            let prev_guard = self.pool.pin(prev_pid)?;
            let mut prev = IndexNode::from_bytes(prev_guard.page())?;

            let sep = cur_sep.ok_or_else(|| {
                VellumError::TreeCorrupted("node with previous sibling but no separator".into())
            })?;
            let old_left = left_link(&node)?;
            prev.insert(sep, old_left)?;
            while let Some(entry) = node.entry(0) {
                prev.insert(entry.key, entry.child)?;
                node.remove_at(0)?;
            }

            prev_guard.commit(prev.as_bytes());
            guard.commit(node.as_bytes());
            debug!(node = %node.page_id(), into = %prev_pid, "index node merged into previous");
            Ok(DeleteOutcome::Merged { dropped_sep: sep })
        }
    }

    // =========================================================================
    // Destroy
    // =========================================================================

    /// Frees every page reachable from the root and removes the catalog
    /// entry.
    ///
    /// A subsequent insert recreates the index from scratch.
    pub fn destroy(&mut self) -> Result<()> {
        if let Some(root) = self.root.take() {
            self.destroy_subtree(root)?;
            self.pool.free_page(root)?;
        }
        self.catalog.delete_entry(&self.name)?;
        debug!(index = %self.name, "destroyed index");
        Ok(())
    }

    fn destroy_subtree(&self, pid: PageId) -> Result<()> {
        let guard = self.pool.pin(pid)?;
        let bytes = guard.page();

        if SortedPage::page_type_of(&bytes) == Some(PageType::Index) {
            let node = IndexNode::from_bytes(bytes)?;
            let left = node.left_link();
            let children: Vec<PageId> = node.entries().iter().map(|e| e.child).collect();
            drop(guard);

            if let Some(left) = left {
                self.destroy_subtree(left)?;
                self.pool.free_page(left)?;
            }
            for child in children {
                self.destroy_subtree(child)?;
                self.pool.free_page(child)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Lookup helpers
    // =========================================================================

    /// Descends to the leaf that would contain `key`.
    pub fn find_leaf_for(&self, key: i32) -> Result<Option<PageId>> {
        let Some(mut pid) = self.root else {
            return Ok(None);
        };

        loop {
            let guard = self.pool.pin(pid)?;
            let bytes = guard.page();
            match SortedPage::page_type_of(&bytes) {
                Some(PageType::Leaf) => return Ok(Some(pid)),
                Some(PageType::Index) => {
                    let node = IndexNode::from_bytes(bytes)?;
                    pid = node.find_child(key)?.pid;
                }
                _ => {
                    return Err(VellumError::TreeCorrupted(format!(
                        "page {pid} has no node type"
                    )))
                }
            }
        }
    }

    /// Descends along left links to the leftmost leaf.
    pub(crate) fn leftmost_leaf(&self) -> Result<Option<PageId>> {
        let Some(mut pid) = self.root else {
            return Ok(None);
        };

        loop {
            let guard = self.pool.pin(pid)?;
            let bytes = guard.page();
            match SortedPage::page_type_of(&bytes) {
                Some(PageType::Leaf) => return Ok(Some(pid)),
                Some(PageType::Index) => {
                    let node = IndexNode::from_bytes(bytes)?;
                    pid = node.left_link().ok_or_else(|| {
                        VellumError::TreeCorrupted(format!("index node {pid} has no left link"))
                    })?;
                }
                _ => {
                    return Err(VellumError::TreeCorrupted(format!(
                        "page {pid} has no node type"
                    )))
                }
            }
        }
    }

    /// Descends along last children to the rightmost leaf.
    pub(crate) fn rightmost_leaf(&self) -> Result<Option<PageId>> {
        let Some(mut pid) = self.root else {
            return Ok(None);
        };

        loop {
            let guard = self.pool.pin(pid)?;
            let bytes = guard.page();
            match SortedPage::page_type_of(&bytes) {
                Some(PageType::Leaf) => return Ok(Some(pid)),
                Some(PageType::Index) => {
                    let node = IndexNode::from_bytes(bytes)?;
                    pid = match node.last_entry() {
                        Some(entry) => entry.child,
                        None => node.left_link().ok_or_else(|| {
                            VellumError::TreeCorrupted(format!(
                                "index node {pid} has no left link"
                            ))
                        })?,
                    };
                }
                _ => {
                    return Err(VellumError::TreeCorrupted(format!(
                        "page {pid} has no node type"
                    )))
                }
            }
        }
    }

    /// Returns the smallest key in the tree.
    pub(crate) fn min_key(&self) -> Result<Option<i32>> {
        let Some(pid) = self.leftmost_leaf()? else {
            return Ok(None);
        };
        let guard = self.pool.pin(pid)?;
        let leaf = LeafNode::from_bytes(guard.page())?;
        Ok(leaf.first_entry().map(|e| e.key))
    }

    /// Returns the largest key in the tree.
    pub(crate) fn max_key(&self) -> Result<Option<i32>> {
        let Some(pid) = self.rightmost_leaf()? else {
            return Ok(None);
        };
        let guard = self.pool.pin(pid)?;
        let leaf = LeafNode::from_bytes(guard.page())?;
        Ok(leaf.last_entry().map(|e| e.key))
    }

    // =========================================================================
    // Scan
    // =========================================================================

    /// Opens a forward scan over `[low, high]`.
    ///
    /// An absent bound resolves against the tree's current extremes.
    pub fn open_scan(&mut self, low: Option<i32>, high: Option<i32>) -> Result<TreeScan<'_>> {
        TreeScan::open(self, low, high)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Prints every node of the tree in depth-first order.
    pub fn print(&self) -> Result<()> {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.render_node(root, 0, &mut out)?;
        } else {
            out.push_str("(empty tree)\n");
        }
        println!("{out}");
        Ok(())
    }

    fn render_node(&self, pid: PageId, depth: usize, out: &mut String) -> Result<()> {
        use std::fmt::Write;

        let guard = self.pool.pin(pid)?;
        let bytes = guard.page();
        let pad = "  ".repeat(depth);

        match SortedPage::page_type_of(&bytes) {
            Some(PageType::Index) => {
                let node = IndexNode::from_bytes(bytes)?;
                drop(guard);
                let _ = writeln!(
                    out,
                    "{pad}index {} [{} entries, left={}]",
                    pid,
                    node.num_entries(),
                    node.left_link().map(|p| p.to_string()).unwrap_or_default(),
                );
                if let Some(left) = node.left_link() {
                    self.render_node(left, depth + 1, out)?;
                }
                for entry in node.entries() {
                    let _ = writeln!(out, "{pad}  sep {}", entry.key);
                    self.render_node(entry.child, depth + 1, out)?;
                }
            }
            Some(PageType::Leaf) => {
                let leaf = LeafNode::from_bytes(bytes)?;
                let keys: Vec<String> =
                    leaf.entries().iter().map(|e| e.key.to_string()).collect();
                let _ = writeln!(
                    out,
                    "{pad}leaf {} [{} entries] {{{}}}",
                    pid,
                    leaf.num_entries(),
                    keys.join(", "),
                );
            }
            _ => {
                return Err(VellumError::TreeCorrupted(format!(
                    "page {pid} has no node type"
                )))
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vellum_buffer::DiskManager;
    use vellum_common::StorageConfig;

    fn test_tree(name: &str) -> (tempfile::TempDir, BTree) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::with_data_dir(dir.path());
        let disk = DiskManager::new(&config).unwrap();
        let pool = Arc::new(BufferPool::new(disk, (&config).into()));
        let catalog = Arc::new(FileCatalog::open(dir.path()).unwrap());
        let tree = BTree::open(pool, catalog, name).unwrap();
        (dir, tree)
    }

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId::new(0, n), 0)
    }

    #[test]
    fn test_open_creates_leaf_root() {
        let (_dir, tree) = test_tree("t");

        let root = tree.root().unwrap();
        assert_eq!(tree.catalog.get_entry("t"), Some(root));

        let guard = tree.pool.pin(root).unwrap();
        let leaf = LeafNode::from_bytes(guard.page()).unwrap();
        assert_eq!(leaf.num_entries(), 0);
    }

    #[test]
    fn test_open_adopts_existing_root() {
        let (_dir, mut tree) = test_tree("t");
        tree.insert(1, rid(1)).unwrap();
        let root = tree.root().unwrap();

        let reopened =
            BTree::open(Arc::clone(&tree.pool), Arc::clone(&tree.catalog), "t").unwrap();
        assert_eq!(reopened.root(), Some(root));
    }

    #[test]
    fn test_insert_and_find_leaf() {
        let (_dir, mut tree) = test_tree("t");

        tree.insert(42, rid(7)).unwrap();

        let leaf_pid = tree.find_leaf_for(42).unwrap().unwrap();
        let guard = tree.pool.pin(leaf_pid).unwrap();
        let leaf = LeafNode::from_bytes(guard.page()).unwrap();
        assert_eq!(leaf.entries()[0].key, 42);
        assert_eq!(leaf.entries()[0].rid, rid(7));
    }

    #[test]
    fn test_root_split_grows_height() {
        let (_dir, mut tree) = test_tree("t");
        let old_root = tree.root().unwrap();

        // 54 inserts overflow a 53-entry leaf root
        for key in 0..54 {
            tree.insert(key, rid(key as u32)).unwrap();
        }

        let root = tree.root().unwrap();
        assert_ne!(root, old_root);
        assert_eq!(tree.catalog.get_entry("t"), Some(root));

        let guard = tree.pool.pin(root).unwrap();
        let node = IndexNode::from_bytes(guard.page()).unwrap();
        assert_eq!(node.left_link(), Some(old_root));
        assert_eq!(node.num_entries(), 1);
    }

    #[test]
    fn test_split_stitches_sibling_links() {
        let (_dir, mut tree) = test_tree("t");

        for key in 0..54 {
            tree.insert(key, rid(key as u32)).unwrap();
        }

        let left_pid = tree.leftmost_leaf().unwrap().unwrap();
        let guard = tree.pool.pin(left_pid).unwrap();
        let left = LeafNode::from_bytes(guard.page()).unwrap();
        let right_pid = left.next_page().unwrap();
        drop(guard);

        let guard = tree.pool.pin(right_pid).unwrap();
        let right = LeafNode::from_bytes(guard.page()).unwrap();
        assert_eq!(right.prev_page(), Some(left_pid));
        assert_eq!(right.next_page(), None);
        assert!(left.last_entry().unwrap().key < right.first_entry().unwrap().key);
    }

    #[test]
    fn test_delete_from_root_leaf() {
        let (_dir, mut tree) = test_tree("t");

        tree.insert(1, rid(1)).unwrap();
        tree.delete(1, rid(1)).unwrap();

        assert!(matches!(
            tree.delete(1, rid(1)),
            Err(VellumError::EntryNotFound)
        ));
        assert_eq!(tree.min_key().unwrap(), None);
    }

    #[test]
    fn test_delete_wrong_rid_fails() {
        let (_dir, mut tree) = test_tree("t");

        tree.insert(5, rid(10)).unwrap();
        assert!(matches!(
            tree.delete(5, rid(11)),
            Err(VellumError::EntryNotFound)
        ));
        tree.delete(5, rid(10)).unwrap();
    }

    #[test]
    fn test_min_max_keys() {
        let (_dir, mut tree) = test_tree("t");
        assert_eq!(tree.min_key().unwrap(), None);
        assert_eq!(tree.max_key().unwrap(), None);

        for key in [5, -3, 12, 0] {
            tree.insert(key, rid(0)).unwrap();
        }
        assert_eq!(tree.min_key().unwrap(), Some(-3));
        assert_eq!(tree.max_key().unwrap(), Some(12));
    }

    #[test]
    fn test_destroy_removes_entry_and_allows_reopen() {
        let (_dir, mut tree) = test_tree("t");

        for key in 0..100 {
            tree.insert(key, rid(key as u32)).unwrap();
        }

        tree.destroy().unwrap();
        assert_eq!(tree.root(), None);
        assert_eq!(tree.catalog.get_entry("t"), None);

        // Lazy recreation on the next insert
        tree.insert(7, rid(7)).unwrap();
        assert!(tree.root().is_some());
        assert_eq!(tree.catalog.get_entry("t"), tree.root());
        assert_eq!(tree.min_key().unwrap(), Some(7));
    }

    #[test]
    fn test_destroyed_tree_delete_fails() {
        let (_dir, mut tree) = test_tree("t");
        tree.insert(1, rid(1)).unwrap();
        tree.destroy().unwrap();

        assert!(matches!(
            tree.delete(1, rid(1)),
            Err(VellumError::EntryNotFound)
        ));
    }
}
