//! Page table mapping page IDs to buffer frames.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashMap;
use vellum_common::page::PageId;

/// Maps resident PageIds to the frames that hold them.
///
/// The index engine is single-writer, so a mutex-guarded map is all the
/// concurrency the table needs.
pub struct PageTable {
    entries: Mutex<HashMap<u64, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Looks up a page ID and returns its frame ID if resident.
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.lock().get(&page_id.as_u64()).copied()
    }

    /// Inserts a page ID to frame ID mapping.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.entries.lock().insert(page_id.as_u64(), frame_id);
    }

    /// Removes a mapping, returning the frame it pointed at.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.lock().remove(&page_id.as_u64())
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.lock().contains_key(&page_id.as_u64())
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Calls the closure for each (page, frame) pair. Iteration stops if the
    /// closure returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId) -> bool,
    {
        for (&key, &frame_id) in self.entries.lock().iter() {
            if !f(PageId::from_u64(key), frame_id) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let table = PageTable::new(8);
        let pid = PageId::new(1, 5);

        assert_eq!(table.get(pid), None);
        assert!(table.is_empty());

        table.insert(pid, FrameId(2));
        assert_eq!(table.get(pid), Some(FrameId(2)));
        assert!(table.contains(pid));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove(pid), Some(FrameId(2)));
        assert_eq!(table.get(pid), None);
        assert_eq!(table.remove(pid), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let table = PageTable::new(8);
        let pid = PageId::new(0, 1);

        table.insert(pid, FrameId(1));
        table.insert(pid, FrameId(9));
        assert_eq!(table.get(pid), Some(FrameId(9)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_for_each_visits_all() {
        let table = PageTable::new(8);
        for i in 0..5 {
            table.insert(PageId::new(1, i), FrameId(i));
        }

        let mut visited = 0;
        table.for_each(|_, _| {
            visited += 1;
            true
        });
        assert_eq!(visited, 5);

        // Early exit
        let mut visited = 0;
        table.for_each(|_, _| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);
    }
}
