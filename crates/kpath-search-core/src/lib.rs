//! Semantic search engine and access-filtered retrieval pipeline for KPATH
//!
//! This crate is the discovery core:
//! - [`Embedder`] — text → unit-norm vector of fixed dimension
//! - [`canonical`] — deterministic embeddable text and query hashing
//! - [`index`] — dense vector index backends (`exact`, `ivf`, `hnsw`)
//! - [`snapshot`] — self-describing on-disk index persistence
//! - [`IndexManager`] — cold build, incremental reconciliation, atomic rebuild
//! - [`SearchPipeline`] — embed → ANN → hydrate → filter → policy → rerank
//! - [`RegistrySource`] / [`FeedbackSource`] — narrow collaborator traits the
//!   persistence layer implements
//!
//! The crate is intentionally synchronous; async integration with the HTTP
//! surface happens at the wiring layer, not here.

#![forbid(unsafe_code)]

pub mod canonical;
pub mod embedder;
pub mod error;
pub mod index;
pub mod manager;
pub mod pipeline;
pub mod query;
pub mod results;
pub mod snapshot;
pub mod sources;
pub mod testing;

#[cfg(feature = "onnx-embedder")]
pub mod fastembed;

pub use canonical::{content_hash, embeddable_text, query_hash};
pub use embedder::{Embedder, StubEmbedder, normalize_l2};
pub use error::{SearchError, SearchResult};
pub use index::{IndexEntry, SimilarityHit, VectorIndex, build_index};
pub use manager::{IndexHealth, IndexManager, ManagerConfig, coalesce_changes};
pub use pipeline::{PipelineConfig, SearchPipeline};
pub use query::SearchRequest;
pub use results::{
    CapabilityProjection, ResultEntry, SearchEvent, SearchResponse, ServiceProjection,
};
pub use snapshot::{Snapshot, SnapshotStore};
pub use sources::{FeedbackSource, RegistrySource};

#[cfg(feature = "onnx-embedder")]
pub use fastembed::FastEmbedder;
