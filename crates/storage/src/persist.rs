//! JSON persistence for stores and metadata.
//!
//! Files are written to a sibling temp file, flushed to disk, and renamed
//! into place, so a crash mid-write leaves the previous version readable.

use crate::error::StorageResult;
use crate::store::VectorStore;
use sculpin_core::VectorRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Serialized form of a [`VectorStore`].
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub dimension: usize,
    /// Live records in insertion order.
    pub records: Vec<VectorRecord>,
}

impl StoreSnapshot {
    pub fn of(store: &VectorStore) -> Self {
        Self {
            dimension: store.dimension(),
            records: store.to_records(),
        }
    }

    pub fn into_store(self) -> StorageResult<VectorStore> {
        VectorStore::from_records(self.dimension, self.records)
    }
}

/// Write `value` as JSON to `path`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(value)?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_parent(path)
}

/// Flush the directory entry created by the rename.
#[cfg(unix)]
fn sync_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StorageResult<()> {
    Ok(())
}

/// Read JSON from `path`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
