//! Tree statistics gathering and structural verification.

use crate::index_node::{IndexNode, INDEX_ENTRY_SIZE};
use crate::leaf::LeafNode;
use crate::sorted_page::{SortedPage, DATA_AREA_SIZE, SLOT_SIZE};
use crate::tree::BTree;
use tracing::warn;
use vellum_common::page::{PageId, PageType};
use vellum_common::{Result, VellumError};

/// Min/mean/max fill factors over a set of nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FillStats {
    /// Smallest fill factor observed.
    pub min: f64,
    /// Largest fill factor observed.
    pub max: f64,
    /// Mean fill factor.
    pub mean: f64,
}

impl FillStats {
    fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        Self { min, max, mean }
    }
}

/// Statistics describing the tree's shape and occupancy.
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    /// Number of levels (1 = the root is a leaf).
    pub height: u32,
    /// Number of leaf nodes.
    pub leaf_nodes: usize,
    /// Number of index nodes.
    pub index_nodes: usize,
    /// Total entries across leaves.
    pub leaf_entries: usize,
    /// Total separator entries across index nodes.
    pub index_entries: usize,
    /// Fill factors over leaves.
    pub leaf_fill: FillStats,
    /// Fill factors over index nodes.
    pub index_fill: FillStats,
}

impl std::fmt::Display for TreeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "height:        {}", self.height)?;
        writeln!(f, "leaf nodes:    {}", self.leaf_nodes)?;
        writeln!(f, "index nodes:   {}", self.index_nodes)?;
        writeln!(f, "leaf entries:  {}", self.leaf_entries)?;
        writeln!(f, "index entries: {}", self.index_entries)?;
        writeln!(
            f,
            "leaf fill:     min {:.2} mean {:.2} max {:.2}",
            self.leaf_fill.min, self.leaf_fill.mean, self.leaf_fill.max
        )?;
        write!(
            f,
            "index fill:    min {:.2} mean {:.2} max {:.2}",
            self.index_fill.min, self.index_fill.mean, self.index_fill.max
        )
    }
}

fn fill_factor(available: usize) -> f64 {
    1.0 - available as f64 / DATA_AREA_SIZE as f64
}

impl BTree {
    /// Gathers node counts, entry counts, height, and fill factors.
    pub fn statistics(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let Some(root) = self.root() else {
            return Ok(stats);
        };

        let mut index_fills = Vec::new();
        stats.height = self.gather_index_stats(root, &mut stats, &mut index_fills)?;
        stats.index_fill = FillStats::from_samples(&index_fills);

        // Leaves are walked through the sibling chain
        let mut leaf_fills = Vec::new();
        let mut next = self.leftmost_leaf()?;
        while let Some(pid) = next {
            let guard = self.pool.pin(pid)?;
            let leaf = LeafNode::from_bytes(guard.page())?;
            stats.leaf_nodes += 1;
            stats.leaf_entries += leaf.num_entries() as usize;
            leaf_fills.push(fill_factor(leaf.available_space()));
            next = leaf.next_page();
        }
        stats.leaf_fill = FillStats::from_samples(&leaf_fills);

        Ok(stats)
    }

    /// Prints the statistics gathered by [`BTree::statistics`].
    pub fn dump_statistics(&self) -> Result<()> {
        println!("{}", self.statistics()?);
        Ok(())
    }

    fn gather_index_stats(
        &self,
        pid: PageId,
        stats: &mut TreeStats,
        fills: &mut Vec<f64>,
    ) -> Result<u32> {
        let guard = self.pool.pin(pid)?;
        let bytes = guard.page();

        match SortedPage::page_type_of(&bytes) {
            Some(PageType::Leaf) => Ok(1),
            Some(PageType::Index) => {
                let node = IndexNode::from_bytes(bytes)?;
                drop(guard);

                stats.index_nodes += 1;
                stats.index_entries += node.num_entries() as usize;
                fills.push(fill_factor(node.available_space()));

                let left = node.left_link().ok_or_else(|| {
                    VellumError::TreeCorrupted(format!("index node {pid} has no left link"))
                })?;
                let mut depth = self.gather_index_stats(left, stats, fills)?;
                for entry in node.entries() {
                    depth = self.gather_index_stats(entry.child, stats, fills)?;
                }
                Ok(depth + 1)
            }
            _ => Err(VellumError::TreeCorrupted(format!(
                "page {pid} has no node type"
            ))),
        }
    }

    /// Verifies the tree's structural invariants, failing with
    /// `TreeCorrupted` on the first violation:
    ///
    /// - every non-root node is at least half full (index nodes may sit one
    ///   entry shy, the residue a split leaves after promoting a separator),
    /// - separators bound their subtrees (`left < sep <= right`),
    /// - all leaves are at the same depth,
    /// - the leaf chain is doubly linked in ascending key order.
    pub fn check_invariants(&self) -> Result<()> {
        let Some(root) = self.root() else {
            return Ok(());
        };
        self.verify_node(root, None, None, true)?;
        self.verify_leaf_chain()
    }

    fn verify_node(
        &self,
        pid: PageId,
        lo: Option<i32>,
        hi: Option<i32>,
        is_root: bool,
    ) -> Result<u32> {
        let corrupt = |message: String| {
            warn!(page = %pid, %message, "invariant violation");
            VellumError::TreeCorrupted(message)
        };

        let guard = self.pool.pin(pid)?;
        let bytes = guard.page();

        match SortedPage::page_type_of(&bytes) {
            Some(PageType::Leaf) => {
                let leaf = LeafNode::from_bytes(bytes)?;

                if !is_root && !leaf.is_at_least_half_full() {
                    return Err(corrupt(format!("leaf {pid} below half full")));
                }

                let mut last = None;
                for entry in leaf.entries() {
                    if let Some(last) = last {
                        if entry.key < last {
                            return Err(corrupt(format!("leaf {pid} keys out of order")));
                        }
                    }
                    if let Some(lo) = lo {
                        if entry.key < lo {
                            return Err(corrupt(format!(
                                "leaf {pid} key {} below separator {lo}",
                                entry.key
                            )));
                        }
                    }
                    if let Some(hi) = hi {
                        if entry.key >= hi {
                            return Err(corrupt(format!(
                                "leaf {pid} key {} not below separator {hi}",
                                entry.key
                            )));
                        }
                    }
                    last = Some(entry.key);
                }

                Ok(1)
            }
            Some(PageType::Index) => {
                let node = IndexNode::from_bytes(bytes)?;
                drop(guard);

                if !is_root
                    && node.available_space() > DATA_AREA_SIZE / 2 + INDEX_ENTRY_SIZE + SLOT_SIZE
                {
                    return Err(corrupt(format!("index node {pid} below half full")));
                }
                if !is_root && node.num_entries() == 0 {
                    return Err(corrupt(format!("index node {pid} has no entries")));
                }

                let entries = node.entries();
                for window in entries.windows(2) {
                    if window[1].key < window[0].key {
                        return Err(corrupt(format!("index node {pid} separators out of order")));
                    }
                }

                let left = node
                    .left_link()
                    .ok_or_else(|| corrupt(format!("index node {pid} has no left link")))?;

                let first_sep = entries.first().map(|e| e.key);
                let mut depth = self.verify_node(left, lo, first_sep.or(hi), false)?;
                if first_sep.is_none() {
                    // Transient single-child node; nothing else to descend
                    return Ok(depth + 1);
                }

                for (i, entry) in entries.iter().enumerate() {
                    let child_hi = entries.get(i + 1).map(|e| e.key).or(hi);
                    let child_depth =
                        self.verify_node(entry.child, Some(entry.key), child_hi, false)?;
                    if child_depth != depth {
                        return Err(corrupt(format!(
                            "index node {pid} children at unequal depths"
                        )));
                    }
                    depth = child_depth;
                }

                Ok(depth + 1)
            }
            _ => Err(corrupt(format!("page {pid} has no node type"))),
        }
    }

    fn verify_leaf_chain(&self) -> Result<()> {
        let corrupt = |message: String| {
            warn!(%message, "invariant violation");
            VellumError::TreeCorrupted(message)
        };

        let Some(first) = self.leftmost_leaf()? else {
            return Ok(());
        };

        let mut pid = first;
        let mut prev: Option<PageId> = None;
        let mut last_first_key: Option<i32> = None;

        loop {
            let guard = self.pool.pin(pid)?;
            let leaf = LeafNode::from_bytes(guard.page())?;

            if leaf.prev_page() != prev {
                return Err(corrupt(format!(
                    "leaf {pid} prev link {:?} does not match chain",
                    leaf.prev_page()
                )));
            }

            if let (Some(last), Some(entry)) = (last_first_key, leaf.first_entry()) {
                if entry.key < last {
                    return Err(corrupt(format!("leaf chain out of order at {pid}")));
                }
            }
            last_first_key = leaf.first_entry().map(|e| e.key).or(last_first_key);

            match leaf.next_page() {
                Some(next) => {
                    prev = Some(pid);
                    pid = next;
                }
                None => return Ok(()),
            }
        }
    }
}
