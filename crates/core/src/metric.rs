//! Distance metric definitions.

use serde::{Deserialize, Serialize};

/// Supported distance metrics for ranking candidates.
///
/// Partition assignment always uses squared Euclidean distance; the metric
/// only decides how candidates inside probed partitions are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared Euclidean (L2) distance - lower is more similar
    #[default]
    L2,
    /// Cosine distance (1 - cosine_similarity) - lower is more similar
    Cosine,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::L2 => write!(f, "l2"),
            Metric::Cosine => write!(f, "cosine"),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            _ => Err(format!("Unknown metric: {}", s)),
        }
    }
}
