//! Core vector types, distance metrics and configuration for Sculpin.

pub mod config;
pub mod distance;
pub mod metric;
pub mod types;

pub use config::{CollectionSettings, QuerySettings, SculpinConfig, ServerSettings};
pub use distance::{cosine_distance, l2_distance, l2_distance_squared};
pub use metric::Metric;
pub use types::{VectorId, VectorRecord};
