//! Inverted-file (IVF) indexing for Sculpin.
//!
//! - [`kmeans`]: Lloyd's k-means partitioner
//! - [`ivf`]: per-partition posting lists with an id -> partition lookup
//! - [`search`]: probe search and the exact brute-force scan

pub mod cancel;
pub mod error;
pub mod ivf;
pub mod kmeans;
pub mod search;

pub use cancel::CancelFlag;
pub use error::{IndexError, IndexResult};
pub use ivf::IvfIndex;
pub use kmeans::{KMeansConfig, Partitioner};
pub use search::{brute_force_search, search_index, SearchResult};
