//! File-entry catalog mapping logical index names to root pages.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use vellum_common::page::PageId;
use vellum_common::{Result, VellumError};

/// On-disk representation of the catalog.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    /// Logical file name to root page id (packed as u64).
    entries: HashMap<String, u64>,
}

/// Catalog of logical file names, persisted as JSON in the data directory.
///
/// The root page identifier is the sole datum stored per index.
pub struct FileCatalog {
    path: PathBuf,
    entries: Mutex<HashMap<String, u64>>,
}

impl FileCatalog {
    const FILE_NAME: &'static str = "catalog.json";

    /// Opens the catalog in the given data directory, loading any existing
    /// entries.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(Self::FILE_NAME);

        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let file: CatalogFile = serde_json::from_str(&contents)
                .map_err(|e| VellumError::CatalogFailure(e.to_string()))?;
            file.entries
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Looks up the root page of a file entry.
    pub fn get_entry(&self, name: &str) -> Option<PageId> {
        self.entries.lock().get(name).copied().map(PageId::from_u64)
    }

    /// Registers a new file entry. Fails if the name is taken.
    pub fn add_entry(&self, name: &str, root: PageId) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(name) {
                return Err(VellumError::FileEntryExists(name.to_string()));
            }
            entries.insert(name.to_string(), root.as_u64());
        }
        self.persist()
    }

    /// Points an existing file entry at a new root page.
    pub fn update_entry(&self, name: &str, root: PageId) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            match entries.get_mut(name) {
                Some(slot) => *slot = root.as_u64(),
                None => return Err(VellumError::FileEntryNotFound(name.to_string())),
            }
        }
        self.persist()
    }

    /// Removes a file entry. Fails if absent.
    pub fn delete_entry(&self, name: &str) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            if entries.remove(name).is_none() {
                return Err(VellumError::FileEntryNotFound(name.to_string()));
            }
        }
        self.persist()
    }

    /// Returns the number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn persist(&self) -> Result<()> {
        let file = CatalogFile {
            entries: self.entries.lock().clone(),
        };
        let contents = serde_json::to_string_pretty(&file)
            .map_err(|e| VellumError::CatalogFailure(e.to_string()))?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}
