//! Shared application state

use std::sync::Arc;

use kpath_core::Config;
use kpath_db::{ApiKeyStore, SqliteFeedbackStore, SqliteRegistry};
use kpath_search_core::{IndexManager, SearchPipeline};

/// Everything a request handler needs, cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    /// Validated startup configuration
    pub config: Arc<Config>,
    /// The access-filtered query pipeline
    pub pipeline: Arc<SearchPipeline>,
    /// Index lifecycle owner (status, rebuild, initialize)
    pub manager: Arc<IndexManager>,
    /// Authoritative registry (also the change-event emitter)
    pub registry: Arc<SqliteRegistry>,
    /// Feedback store (selection recording)
    pub feedback: Arc<SqliteFeedbackStore>,
    /// API key lookup
    pub api_keys: Arc<ApiKeyStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
