//! Template/profile file storage
//!
//! The stream-tunnel config builder reads a template and writes the patched
//! result back to a fixed path. Storage sits behind [`FileStore`] so tests
//! can run against an in-memory map.

use log::info;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

const APP_NAME: &str = "Skybridge";

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait FileStore: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>, FileStoreError>;
    fn write(&self, path: &str, data: &[u8]) -> Result<(), FileStoreError>;
    fn remove(&self, path: &str) -> Result<(), FileStoreError>;
}

/// Disk-backed store rooted in the app's local data directory.
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    pub fn new() -> Result<Self, FileStoreError> {
        let root = dirs::data_local_dir()
            .map(|d| d.join(APP_NAME))
            .ok_or_else(|| {
                FileStoreError::Io(std::io::Error::other(
                    "could not determine data directory",
                ))
            })?;
        std::fs::create_dir_all(&root)?;
        info!("File store rooted at {:?}", root);
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FileStore for DiskFileStore {
    fn read(&self, path: &str) -> Result<Vec<u8>, FileStoreError> {
        let full = self.resolve(path);
        if !full.exists() {
            return Err(FileStoreError::NotFound(path.to_string()));
        }
        Ok(std::fs::read(full)?)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), FileStoreError> {
        Ok(std::fs::write(self.resolve(path), data)?)
    }

    fn remove(&self, path: &str) -> Result<(), FileStoreError> {
        let full = self.resolve(path);
        if full.exists() {
            std::fs::remove_file(full)?;
        }
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn with_file(path: &str, data: &[u8]) -> Self {
        let store = Self::default();
        store.files.lock().insert(path.to_string(), data.to_vec());
        store
    }
}

impl FileStore for MemoryFileStore {
    fn read(&self, path: &str) -> Result<Vec<u8>, FileStoreError> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| FileStoreError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), FileStoreError> {
        self.files.lock().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), FileStoreError> {
        self.files.lock().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryFileStore::default();
        assert!(matches!(
            store.read("a.conf"),
            Err(FileStoreError::NotFound(_))
        ));
        store.write("a.conf", b"hello").unwrap();
        assert_eq!(store.read("a.conf").unwrap(), b"hello");
        store.remove("a.conf").unwrap();
        assert!(store.read("a.conf").is_err());
    }

    #[test]
    fn test_memory_store_with_file() {
        let store = MemoryFileStore::with_file("t.conf", b"template");
        assert_eq!(store.read("t.conf").unwrap(), b"template");
    }
}
