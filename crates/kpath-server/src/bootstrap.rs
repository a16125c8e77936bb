//! Runtime wiring
//!
//! Builds the whole stack from a validated [`Config`]: database pool,
//! registry + feedback + API-key stores, embedder, index manager (with
//! its worker thread), and the query pipeline. The registry's change
//! events feed the manager's queue; the worker's quiescent ticks drive
//! the feedback retention sweep.

use std::sync::Arc;
use std::thread::JoinHandle;

use kpath_core::{Config, PolicyEvaluator};
use kpath_db::{ApiKeyStore, DbPool, SqliteFeedbackStore, SqliteRegistry};
use kpath_search_core::{
    Embedder, FeedbackSource, IndexManager, ManagerConfig, PipelineConfig, SearchError,
    SearchPipeline, SearchResult, SnapshotStore, build_index,
};

use crate::state::AppState;

/// The running stack: shared state plus the indexing worker.
pub struct Runtime {
    /// Handler state (clone freely)
    pub state: AppState,
    worker: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Build the index (snapshot-aware cold start). Call once before
    /// serving traffic.
    ///
    /// # Errors
    /// Propagates registry and embedder faults; the server can still be
    /// started and initialized later via the admin endpoint.
    pub fn initialize_index(&self) -> SearchResult<()> {
        self.state.manager.initialize()
    }

    /// Stop the indexing worker and wait for it.
    pub fn shutdown(&mut self) {
        self.state.manager.shutdown();
        if let Some(worker) = self.worker.take()
            && let Err(err) = worker.join()
        {
            tracing::error!(?err, "index worker panicked");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Construct the full runtime from configuration.
///
/// # Errors
/// Fails when the database cannot be opened or the embedder cannot be
/// constructed.
pub fn build_runtime(config: &Config) -> SearchResult<Runtime> {
    let config = Arc::new(config.clone());

    let pool = DbPool::open(&config.database_path, config.database_pool_size)
        .map_err(|err| SearchError::Internal(format!("cannot open database: {err}")))?;
    let registry = Arc::new(SqliteRegistry::new(Arc::clone(&pool)));
    let feedback = Arc::new(SqliteFeedbackStore::new(
        Arc::clone(&pool),
        config.feedback_window_days,
        config.feedback_retention_days,
    ));
    let api_keys = Arc::new(ApiKeyStore::new(Arc::clone(&pool)));

    let embedder = make_embedder(&config)?;
    if embedder.dimension() != config.embedding_dimension {
        return Err(SearchError::Internal(format!(
            "embedder dimension {} does not match configured dimension {}",
            embedder.dimension(),
            config.embedding_dimension
        )));
    }

    let manager = {
        let factory_config = Arc::clone(&config);
        Arc::new(IndexManager::new(
            Arc::clone(&embedder),
            Arc::clone(&registry) as Arc<dyn kpath_search_core::RegistrySource>,
            Box::new(move || build_index(&factory_config)),
            SnapshotStore::new(&config.snapshot_dir),
            ManagerConfig::from(config.as_ref()),
        ))
    };

    // Registry mutations flow straight into the manager's bounded queue
    {
        let manager = Arc::clone(&manager);
        registry.subscribe(move |event| {
            manager.enqueue(event);
        });
    }

    let pipeline = Arc::new(SearchPipeline::new(
        embedder,
        manager.index_handle(),
        Arc::clone(&registry) as Arc<dyn kpath_search_core::RegistrySource>,
        Arc::clone(&feedback) as Arc<dyn FeedbackSource>,
        PolicyEvaluator::new(config.admin_role.clone()),
        PipelineConfig::from(config.as_ref()),
        manager.ready_flag(),
    ));

    // Single indexing worker; quiescent ticks sweep expired feedback
    let worker = {
        let manager = Arc::clone(&manager);
        let feedback = Arc::clone(&feedback);
        std::thread::Builder::new()
            .name("kpath-index-worker".to_owned())
            .spawn(move || {
                manager.run_worker(&move || {
                    if let Err(err) = feedback.prune_expired() {
                        tracing::warn!(%err, "feedback retention sweep failed");
                    }
                });
            })
            .map_err(|err| SearchError::Internal(format!("cannot spawn worker: {err}")))?
    };

    Ok(Runtime {
        state: AppState {
            config,
            pipeline,
            manager,
            registry,
            feedback,
            api_keys,
        },
        worker: Some(worker),
    })
}

#[cfg(feature = "onnx-embedder")]
fn make_embedder(config: &Config) -> SearchResult<Arc<dyn Embedder>> {
    Ok(Arc::new(kpath_search_core::FastEmbedder::load(
        &config.embedding_model,
    )?))
}

/// Without the ONNX feature the server falls back to the deterministic
/// hash embedder — useful for development and CI, not for production
/// relevance.
#[cfg(not(feature = "onnx-embedder"))]
fn make_embedder(config: &Config) -> SearchResult<Arc<dyn Embedder>> {
    tracing::warn!(
        dimension = config.embedding_dimension,
        "onnx-embedder feature disabled; using the deterministic development embedder"
    );
    Ok(Arc::new(kpath_search_core::StubEmbedder::new(
        config.embedding_dimension,
    )))
}
