//! Storage layer for Sculpin.
//!
//! Provides the in-memory vector store and its JSON persistence format.

pub mod error;
pub mod persist;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use persist::{load_json, save_json, StoreSnapshot};
pub use store::{Scan, VectorStore};
