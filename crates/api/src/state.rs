//! Application state.

use sculpin_core::SculpinConfig;
use sculpin_query::{Catalog, OperatorRegistry, QueryEngine};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub engine: Arc<QueryEngine>,
}

impl AppState {
    pub fn new(catalog: Arc<Catalog>, config: &SculpinConfig) -> Self {
        let engine = Arc::new(QueryEngine::new(
            catalog.clone(),
            config.query.clone(),
            config.collection.clone(),
        ));
        Self { catalog, engine }
    }

    /// State over an in-memory catalog with the built-in operators.
    pub fn in_memory(config: &SculpinConfig) -> Self {
        let registry = Arc::new(OperatorRegistry::builtin());
        Self::new(Arc::new(Catalog::in_memory(registry)), config)
    }
}
