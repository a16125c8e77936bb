//! Dense vector index backends
//!
//! The index holds one unit-norm vector per discoverable service and
//! answers cosine top-k queries. Three backends share the [`VectorIndex`]
//! trait:
//!
//! - [`exact::ExactIndex`] — brute force; exact answers, fine below ~10k
//! - [`ivf::IvfIndex`] — inverted file ANN with deterministic training
//! - [`hnsw::HnswIndex`] — graph ANN backed by `hnsw_rs`
//!
//! The backend is selected once at startup from configuration and never
//! changes thereafter. All scores are normalized cosine `(1 + cos) / 2`
//! in `[0, 1]`; ties break toward the larger `service_id` so result order
//! is deterministic.

pub mod exact;
pub mod hnsw;
pub mod ivf;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use kpath_core::{Config, IndexKind, ServiceId};

use crate::error::SearchResult;

/// A scored candidate from vector similarity search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimilarityHit {
    /// The matched service
    pub service_id: ServiceId,
    /// Normalized cosine score in `[0, 1]`
    pub score: f64,
}

impl SimilarityHit {
    /// Create a new hit.
    #[must_use]
    pub const fn new(service_id: ServiceId, score: f64) -> Self {
        Self { service_id, score }
    }
}

/// Ordering: score descending, then `service_id` descending for stability.
impl Ord for SimilarityHit {
    fn cmp(&self, other: &Self) -> Ordering {
        match other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Equal => other.service_id.cmp(&self.service_id),
            ord => ord,
        }
    }
}

impl PartialOrd for SimilarityHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for SimilarityHit {}

impl PartialEq for SimilarityHit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// One vector plus identity, as stored in the index and in snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The service this vector belongs to
    pub service_id: ServiceId,
    /// Unit-norm embedding
    pub vector: Vec<f32>,
    /// Registry revision this vector was embedded at
    pub version_tag: i64,
}

/// Dense vector index over service embeddings.
///
/// Exactly one entry per service; `upsert` replaces, `remove` is
/// idempotent. Implementations are not internally synchronized — the
/// owning manager wraps the index in a readers–writer lock.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the entry for `service_id`.
    ///
    /// The vector is L2-normalized on the way in.
    ///
    /// # Errors
    /// Returns `InvalidRequest` on dimension mismatch.
    fn upsert(&mut self, service_id: ServiceId, vector: &[f32], version_tag: i64)
    -> SearchResult<()>;

    /// Remove the entry for `service_id`. Idempotent; returns whether an
    /// entry was present.
    fn remove(&mut self, service_id: ServiceId) -> bool;

    /// Return up to `k * over` candidates ordered by descending normalized
    /// cosine score, ties broken by larger `service_id`.
    ///
    /// # Errors
    /// Returns `InvalidRequest` on query dimension mismatch.
    fn top_k(&self, query: &[f32], k: usize, over: usize) -> SearchResult<Vec<SimilarityHit>>;

    /// Whether an entry exists for `service_id`.
    fn contains(&self, service_id: ServiceId) -> bool;

    /// The version tag of the entry for `service_id`, if present.
    fn version_tag(&self, service_id: ServiceId) -> Option<i64>;

    /// Bump the version tag of an existing entry without re-embedding
    /// (used when a registry revision leaves the embeddable text
    /// untouched). Returns whether the entry was present.
    fn update_version_tag(&mut self, service_id: ServiceId, version_tag: i64) -> bool;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Whether the index holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The vector dimension `D` this index accepts.
    fn dimension(&self) -> usize;

    /// All live entries, in unspecified order (snapshot + rebuild input).
    fn entries(&self) -> Vec<IndexEntry>;
}

/// Construct the configured index backend, empty.
#[must_use]
pub fn build_index(config: &Config) -> Box<dyn VectorIndex> {
    match config.index_kind {
        IndexKind::Exact => Box::new(exact::ExactIndex::new(config.embedding_dimension)),
        IndexKind::Ivf => Box::new(ivf::IvfIndex::new(
            config.embedding_dimension,
            config.ivf_nlist,
            config.ivf_nprobe,
        )),
        IndexKind::Hnsw => Box::new(hnsw::HnswIndex::new(
            config.embedding_dimension,
            hnsw::HnswParams {
                max_connections: config.hnsw_max_connections,
                ef_construction: config.hnsw_ef_construction,
                ef_search: config.hnsw_ef_search,
            },
        )),
    }
}

/// Normalized cosine score between two unit vectors: `(1 + cos) / 2`.
#[inline]
#[must_use]
pub(crate) fn normalized_cosine(a: &[f32], b: &[f32]) -> f64 {
    let cos: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let cos = f64::from(cos).clamp(-1.0, 1.0);
    (1.0 + cos) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_ordering_by_score() {
        let a = SimilarityHit::new(1, 0.9);
        let b = SimilarityHit::new(2, 0.8);
        assert!(a < b); // higher score sorts first
    }

    #[test]
    fn hit_tie_breaks_toward_larger_id() {
        let a = SimilarityHit::new(1, 0.9);
        let b = SimilarityHit::new(2, 0.9);
        assert!(b < a); // same score: larger id first
    }

    #[test]
    fn normalized_cosine_bounds() {
        let up = [0.0_f32, 1.0];
        let down = [0.0_f32, -1.0];
        let right = [1.0_f32, 0.0];

        assert!((normalized_cosine(&up, &up) - 1.0).abs() < 1e-9);
        assert!(normalized_cosine(&up, &down).abs() < 1e-9);
        assert!((normalized_cosine(&up, &right) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn build_index_honors_kind() {
        let mut config = Config {
            embedding_dimension: 4,
            ..Config::default()
        };

        config.index_kind = IndexKind::Exact;
        assert_eq!(build_index(&config).dimension(), 4);

        config.index_kind = IndexKind::Ivf;
        assert_eq!(build_index(&config).dimension(), 4);

        config.index_kind = IndexKind::Hnsw;
        assert_eq!(build_index(&config).dimension(), 4);
    }

    #[test]
    fn index_entry_serde_roundtrip() {
        let entry = IndexEntry {
            service_id: 42,
            vector: vec![0.6, 0.8],
            version_tag: 7,
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: IndexEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.service_id, 42);
        assert_eq!(back.version_tag, 7);
        assert_eq!(back.vector, entry.vector);
    }
}
