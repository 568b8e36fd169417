//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use parking_lot::Mutex;
use std::cell::Cell;
use sysinfo::System;
use tracing::debug;
use vellum_common::page::{PageId, PAGE_SIZE};
use vellum_common::{Result, VellumError};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 256 }
    }
}

impl From<&vellum_common::StorageConfig> for BufferPoolConfig {
    fn from(config: &vellum_common::StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_frames,
        }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames over the disk manager:
/// - Page ID to frame ID mapping
/// - Free frame list for new pages
/// - Clock replacement with dirty write-back on eviction
/// - Pin counting enforced through [`PageGuard`]
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Backing store for pages.
    disk: DiskManager,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool over the given disk manager.
    pub fn new(disk: DiskManager, config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            disk,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames to ensure useful caching on low-memory systems.
    pub fn auto_sized(disk: DiskManager) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(disk, BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Allocates a fresh page and returns it pinned.
    ///
    /// The page is zero-filled on disk and in the frame.
    pub fn new_page(&self, file_id: u32) -> Result<PageGuard<'_>> {
        let page_id = self.disk.allocate_page(file_id)?;
        let frame_id = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.insert(page_id, frame_id);

        Ok(PageGuard {
            pool: self,
            page_id,
            frame,
            dirty: Cell::new(false),
        })
    }

    /// Pins a page, reading it from disk if it is not resident.
    ///
    /// The returned guard unpins on drop, marking the page dirty iff it was
    /// committed through the guard.
    pub fn pin(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(PageGuard {
                pool: self,
                page_id,
                frame,
                dirty: Cell::new(false),
            });
        }

        // Miss: read the page in from disk
        let data = self.disk.read_page(page_id)?;
        let frame_id = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.copy_from(&data);
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.insert(page_id, frame_id);

        Ok(PageGuard {
            pool: self,
            page_id,
            frame,
            dirty: Cell::new(false),
        })
    }

    /// Frees a page: drops its frame (must be unpinned) and deallocates it
    /// on disk.
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                return Err(VellumError::PagePinned {
                    page_id: page_id.as_u64(),
                });
            }

            self.page_table.remove(page_id);
            self.replacer.remove(frame_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
        }

        self.disk.deallocate_page(page_id)
    }

    /// Writes a single page back to disk if dirty. Returns true if flushed.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data)?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Writes all dirty pages back to disk. Returns the number flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let mut dirty_pages = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            if self.frames[frame_id.0 as usize].is_dirty() {
                dirty_pages.push((page_id, frame_id));
            }
            true
        });

        let mut flushed = 0;
        for (page_id, frame_id) in dirty_pages {
            let frame = &self.frames[frame_id.0 as usize];
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
            drop(data);
            frame.set_dirty(false);
            flushed += 1;
        }

        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
            true
        });

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }

    /// Allocates a frame, evicting an unpinned page if necessary.
    fn allocate_frame(&self) -> Result<FrameId> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok(frame_id);
            }
        }

        let victim_id = self.replacer.evict().ok_or(VellumError::BufferPoolFull)?;
        let frame = &self.frames[victim_id.0 as usize];

        // Write back dirty victims before the frame is reused
        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(old_page_id, &data)?;
                drop(data);
                debug!(page = %old_page_id, "evicted dirty page written back");
            }
            self.page_table.remove(old_page_id);
        }

        Ok(victim_id)
    }

    /// Releases a pin taken by a guard.
    fn unpin_page(&self, page_id: PageId, dirty: bool) {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if dirty {
                frame.set_dirty(true);
            }
            if frame.unpin() == 0 {
                self.replacer.set_evictable(frame_id, true);
            }
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII pin on a buffer page.
///
/// Holds the page pinned for its lifetime and unpins on drop, on every exit
/// path. The dirty flag handed to the pool at unpin time is set by
/// [`PageGuard::commit`], the mutating accessor.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
    dirty: Cell<bool>,
}

impl PageGuard<'_> {
    /// Returns the pinned page's ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Copies the page image out of the frame.
    pub fn page(&self) -> [u8; PAGE_SIZE] {
        **self.frame.read_data()
    }

    /// Copies a page image into the frame and marks the page dirty.
    pub fn commit(&self, data: &[u8; PAGE_SIZE]) {
        self.frame.copy_from(data);
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vellum_common::StorageConfig;

    fn test_pool(num_frames: usize) -> (tempfile::TempDir, BufferPool) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::with_data_dir(dir.path());
        let disk = DiskManager::new(&config).unwrap();
        (dir, BufferPool::new(disk, BufferPoolConfig { num_frames }))
    }

    #[test]
    fn test_buffer_pool_new() {
        let (_dir, pool) = test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_new_page_is_pinned() {
        let (_dir, pool) = test_pool(10);

        let guard = pool.new_page(1).unwrap();
        let pid = guard.page_id();

        assert!(pool.contains(pid));
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.stats().pinned_frames == 1);
    }

    #[test]
    fn test_guard_unpins_on_drop() {
        let (_dir, pool) = test_pool(10);

        let pid = {
            let guard = pool.new_page(1).unwrap();
            guard.page_id()
        };

        assert_eq!(pool.stats().pinned_frames, 0);

        // Still resident and pinnable
        let guard = pool.pin(pid).unwrap();
        assert_eq!(guard.page_id(), pid);
    }

    #[test]
    fn test_commit_marks_dirty() {
        let (_dir, pool) = test_pool(10);

        let pid = {
            let guard = pool.new_page(1).unwrap();
            let mut data = guard.page();
            data[0] = 0xAB;
            guard.commit(&data);
            guard.page_id()
        };

        assert_eq!(pool.stats().dirty_frames, 1);

        let guard = pool.pin(pid).unwrap();
        assert_eq!(guard.page()[0], 0xAB);
    }

    #[test]
    fn test_read_only_guard_stays_clean() {
        let (_dir, pool) = test_pool(10);

        let pid = {
            let guard = pool.new_page(1).unwrap();
            guard.page_id()
        };

        {
            let guard = pool.pin(pid).unwrap();
            let _ = guard.page();
        }

        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_eviction_and_reload() {
        let (_dir, pool) = test_pool(2);

        // Write a page and drop the pin
        let pid = {
            let guard = pool.new_page(1).unwrap();
            let mut data = guard.page();
            data[100] = 42;
            guard.commit(&data);
            guard.page_id()
        };

        // Fill the pool past capacity so pid gets evicted
        let _p2 = {
            let g = pool.new_page(1).unwrap();
            g.page_id()
        };
        let _p3 = {
            let g = pool.new_page(1).unwrap();
            g.page_id()
        };

        // Dirty data must survive eviction via write-back
        let guard = pool.pin(pid).unwrap();
        assert_eq!(guard.page()[100], 42);
    }

    #[test]
    fn test_pool_full_when_all_pinned() {
        let (_dir, pool) = test_pool(2);

        let _g1 = pool.new_page(1).unwrap();
        let _g2 = pool.new_page(1).unwrap();

        let result = pool.new_page(1);
        assert!(matches!(result, Err(VellumError::BufferPoolFull)));
    }

    #[test]
    fn test_free_page() {
        let (_dir, pool) = test_pool(10);

        let pid = {
            let guard = pool.new_page(1).unwrap();
            guard.page_id()
        };

        pool.free_page(pid).unwrap();
        assert!(!pool.contains(pid));
        assert_eq!(pool.free_count(), 10);

        // Freed page number is reused by the next allocation
        let guard = pool.new_page(1).unwrap();
        assert_eq!(guard.page_id(), pid);
    }

    #[test]
    fn test_free_pinned_page_fails() {
        let (_dir, pool) = test_pool(10);

        let guard = pool.new_page(1).unwrap();
        let pid = guard.page_id();

        let result = pool.free_page(pid);
        assert!(matches!(result, Err(VellumError::PagePinned { .. })));
        drop(guard);

        pool.free_page(pid).unwrap();
    }

    #[test]
    fn test_flush_all() {
        let (_dir, pool) = test_pool(10);

        for _ in 0..3 {
            let guard = pool.new_page(1).unwrap();
            let data = guard.page();
            guard.commit(&data);
        }

        assert_eq!(pool.flush_all().unwrap(), 3);
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_pin_unknown_page_fails() {
        let (_dir, pool) = test_pool(10);
        assert!(pool.pin(PageId::new(1, 404)).is_err());
    }

    #[test]
    fn test_stats() {
        let (_dir, pool) = test_pool(10);

        let _g1 = pool.new_page(1).unwrap();
        let g2 = pool.new_page(1).unwrap();
        let data = g2.page();
        g2.commit(&data);
        drop(g2);

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.used_frames, 2);
        assert_eq!(stats.pinned_frames, 1);
        assert_eq!(stats.dirty_frames, 1);
    }
}
