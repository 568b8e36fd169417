//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use vellum_common::config::StorageConfig;
use vellum_common::page::{PageId, PAGE_SIZE};
use vellum_common::{Result, VellumError};

/// Manages reading and writing pages to disk files.
///
/// Each file_id maps to a separate data file. Freed page numbers are kept on
/// a per-file free list and handed out again before the file is extended.
pub struct DiskManager {
    /// Base directory for data files.
    data_dir: PathBuf,
    /// Enable fsync after writes.
    fsync_enabled: bool,
    /// Open file handles keyed by file_id.
    files: Mutex<HashMap<u32, FileHandle>>,
}

/// Handle for an open data file.
struct FileHandle {
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
    /// Page numbers freed by deallocation, available for reuse.
    free_pages: Vec<u32>,
}

impl DiskManager {
    /// Creates a new disk manager rooted at the configured data directory.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Generates the file path for a given file ID.
    fn file_path(&self, file_id: u32) -> PathBuf {
        self.data_dir.join(format!("{:08}.vlm", file_id))
    }

    /// Opens or creates a data file.
    fn open_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();

        if files.contains_key(&file_id) {
            return Ok(());
        }

        let path = self.file_path(file_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        files.insert(
            file_id,
            FileHandle {
                file,
                num_pages,
                free_pages: Vec::new(),
            },
        );

        Ok(())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| VellumError::Internal(format!("file {} not open", page_id.file_id)))?;

        if page_id.page_num >= handle.num_pages {
            return Err(VellumError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| VellumError::Internal(format!("file {} not open", page_id.file_id)))?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.fsync_enabled {
            handle.file.sync_all()?;
        }

        // Update page count if we extended the file
        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Allocates a page in the specified file.
    ///
    /// Reuses a previously freed page number if one is available, otherwise
    /// extends the file with a zeroed page.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        self.open_file(file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&file_id)
            .ok_or_else(|| VellumError::Internal(format!("file {} not open", file_id)))?;

        let (page_num, extends) = match handle.free_pages.pop() {
            Some(page_num) => (page_num, false),
            None => (handle.num_pages, true),
        };

        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.fsync_enabled {
            handle.file.sync_all()?;
        }
        if extends {
            handle.num_pages = page_num + 1;
        }

        Ok(PageId::new(file_id, page_num))
    }

    /// Returns a page number to the free list for later reuse.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| VellumError::Internal(format!("file {} not open", page_id.file_id)))?;

        if page_id.page_num >= handle.num_pages {
            return Err(VellumError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        handle.free_pages.push(page_id.page_num);
        Ok(())
    }

    /// Returns the number of pages in a file (including freed ones).
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.open_file(file_id)?;
        let files = self.files.lock();
        Ok(files.get(&file_id).map(|h| h.num_pages).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_disk() -> (tempfile::TempDir, DiskManager) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::with_data_dir(dir.path());
        let disk = DiskManager::new(&config).unwrap();
        (dir, disk)
    }

    #[test]
    fn test_allocate_and_write_read() {
        let (_dir, disk) = test_disk();

        let pid = disk.allocate_page(1).unwrap();
        assert_eq!(pid, PageId::new(1, 0));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(pid, &data).unwrap();

        let read = disk.read_page(pid).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_allocate_is_zeroed() {
        let (_dir, disk) = test_disk();

        let pid = disk.allocate_page(1).unwrap();
        let read = disk.read_page(pid).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sequential_allocation() {
        let (_dir, disk) = test_disk();

        for i in 0..5 {
            let pid = disk.allocate_page(1).unwrap();
            assert_eq!(pid.page_num, i);
        }
        assert_eq!(disk.num_pages(1).unwrap(), 5);
    }

    #[test]
    fn test_deallocate_reuses_page_num() {
        let (_dir, disk) = test_disk();

        let p0 = disk.allocate_page(1).unwrap();
        let _p1 = disk.allocate_page(1).unwrap();

        disk.deallocate_page(p0).unwrap();
        let reused = disk.allocate_page(1).unwrap();
        assert_eq!(reused, p0);

        // File was not extended
        assert_eq!(disk.num_pages(1).unwrap(), 2);
    }

    #[test]
    fn test_read_unallocated_page_fails() {
        let (_dir, disk) = test_disk();

        let result = disk.read_page(PageId::new(1, 99));
        assert!(matches!(result, Err(VellumError::PageNotFound { .. })));
    }

    #[test]
    fn test_separate_files_per_file_id() {
        let (_dir, disk) = test_disk();

        let a = disk.allocate_page(1).unwrap();
        let b = disk.allocate_page(2).unwrap();
        assert_eq!(a.page_num, 0);
        assert_eq!(b.page_num, 0);

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 1;
        disk.write_page(a, &data).unwrap();
        data[0] = 2;
        disk.write_page(b, &data).unwrap();

        assert_eq!(disk.read_page(a).unwrap()[0], 1);
        assert_eq!(disk.read_page(b).unwrap()[0], 2);
    }

    #[test]
    fn test_persistence_across_managers() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::with_data_dir(dir.path());

        let pid = {
            let disk = DiskManager::new(&config).unwrap();
            let pid = disk.allocate_page(1).unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[7] = 77;
            disk.write_page(pid, &data).unwrap();
            pid
        };

        let disk = DiskManager::new(&config).unwrap();
        assert_eq!(disk.num_pages(1).unwrap(), 1);
        assert_eq!(disk.read_page(pid).unwrap()[7], 77);
    }
}
