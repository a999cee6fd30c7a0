//! Catalog of named collections.
//!
//! A catalog is either purely in memory or backed by a directory laid out as
//!
//! ```text
//! <base>/catalog.json          collection names
//! <base>/<name>/meta.json      CollectionConfig
//! <base>/<name>/vectors.json   StoreSnapshot
//! ```

use crate::collection::{Collection, CollectionConfig};
use crate::error::{QueryError, QueryResult};
use crate::pipeline::OperatorRegistry;
use parking_lot::{Mutex, RwLock};
use sculpin_storage::{load_json, save_json, StorageError, StoreSnapshot, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CATALOG_FILE: &str = "catalog.json";
const META_FILE: &str = "meta.json";
const VECTORS_FILE: &str = "vectors.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogMeta {
    collections: Vec<String>,
}

/// Thread-safe map of collection name to collection.
pub struct Catalog {
    base_path: Option<PathBuf>,
    registry: Arc<OperatorRegistry>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    /// Serializes writes to the data directory.
    persist_lock: Mutex<()>,
}

impl Catalog {
    /// A catalog that never touches disk.
    pub fn in_memory(registry: Arc<OperatorRegistry>) -> Self {
        Self {
            base_path: None,
            registry,
            collections: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Open or create a catalog in `path`.
    ///
    /// A collection that fails to load is logged and skipped. Loaded
    /// collections are retrained when they qualify for automatic indexing.
    pub fn open(path: &Path, registry: Arc<OperatorRegistry>) -> QueryResult<Self> {
        fs::create_dir_all(path).map_err(StorageError::from)?;

        let catalog_path = path.join(CATALOG_FILE);
        let meta: CatalogMeta = if catalog_path.exists() {
            load_json(&catalog_path)?
        } else {
            CatalogMeta::default()
        };

        let mut collections = HashMap::new();
        for name in meta.collections {
            match load_collection(&path.join(&name), &registry) {
                Ok(collection) => {
                    collections.insert(name, Arc::new(collection));
                }
                Err(e) => {
                    tracing::warn!("Failed to load collection {}: {}", name, e);
                }
            }
        }

        for collection in collections.values() {
            collection.maintain();
        }
        tracing::info!(
            "Opened catalog at {} with {} collections",
            path.display(),
            collections.len()
        );

        Ok(Self {
            base_path: Some(path.to_path_buf()),
            registry,
            collections: RwLock::new(collections),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    /// Create an empty collection.
    pub fn create(&self, config: CollectionConfig) -> QueryResult<Arc<Collection>> {
        let collection = Arc::new(Collection::new(config, &self.registry)?);
        let name = collection.name().to_string();

        {
            let mut collections = self.collections.write();
            if collections.contains_key(&name) {
                return Err(QueryError::CollectionAlreadyExists(name));
            }
            collections.insert(name.clone(), Arc::clone(&collection));
        }

        if let Err(e) = self.persist(&collection).and_then(|_| self.save()) {
            self.collections.write().remove(&name);
            return Err(e);
        }
        tracing::info!(
            "Created collection {} (dimension {})",
            name,
            collection.dimension()
        );
        Ok(collection)
    }

    /// Remove a collection and its files.
    pub fn drop_collection(&self, name: &str) -> QueryResult<()> {
        if self.collections.write().remove(name).is_none() {
            return Err(QueryError::CollectionNotFound(name.to_string()));
        }

        if let Some(base) = &self.base_path {
            let _guard = self.persist_lock.lock();
            let dir = base.join(name);
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(StorageError::from)?;
            }
        }
        self.save()?;
        tracing::info!("Dropped collection {}", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> QueryResult<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::CollectionNotFound(name.to_string()))
    }

    /// Collection names in sorted order.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Write the list of collection names.
    pub fn save(&self) -> QueryResult<()> {
        let Some(base) = &self.base_path else {
            return Ok(());
        };
        let meta = CatalogMeta {
            collections: self.list(),
        };
        let _guard = self.persist_lock.lock();
        save_json(&base.join(CATALOG_FILE), &meta)?;
        Ok(())
    }

    /// Write a collection's settings and records.
    ///
    /// The snapshot is taken under the persist lock, so the last write to
    /// land on disk always reflects every mutation acknowledged before it.
    /// A collection that is no longer the catalog's entry for its name is
    /// skipped.
    pub fn persist(&self, collection: &Arc<Collection>) -> QueryResult<()> {
        let Some(base) = &self.base_path else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock();
        let current = self
            .collections
            .read()
            .get(collection.name())
            .is_some_and(|entry| Arc::ptr_eq(entry, collection));
        if !current {
            return Ok(());
        }

        let snapshot = collection.with_store(StoreSnapshot::of);
        let dir = base.join(collection.name());
        fs::create_dir_all(&dir).map_err(StorageError::from)?;
        save_json(&dir.join(META_FILE), collection.config())?;
        save_json(&dir.join(VECTORS_FILE), &snapshot)?;
        tracing::debug!(
            "Persisted collection {} ({} records)",
            collection.name(),
            snapshot.records.len()
        );
        Ok(())
    }
}

fn load_collection(dir: &Path, registry: &OperatorRegistry) -> QueryResult<Collection> {
    let config: CollectionConfig = load_json(&dir.join(META_FILE))?;
    let vectors_path = dir.join(VECTORS_FILE);
    let store = if vectors_path.exists() {
        let snapshot: StoreSnapshot = load_json(&vectors_path)?;
        if snapshot.dimension != config.dimension {
            return Err(QueryError::InvalidConfig(format!(
                "{} has dimension {}, meta.json says {}",
                vectors_path.display(),
                snapshot.dimension,
                config.dimension
            )));
        }
        snapshot.into_store()?
    } else {
        VectorStore::new(config.dimension)
    };
    Collection::from_store(config, registry, store)
}
