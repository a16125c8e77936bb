//! Brute-force cosine index
//!
//! Vectors live contiguously in insertion order with a side map from
//! `service_id` to position; removal is O(1) swap-remove. Every query
//! scans all entries, which is exact and entirely adequate below ~10k
//! vectors.

use std::collections::HashMap;

use kpath_core::ServiceId;

use super::{IndexEntry, SimilarityHit, VectorIndex, normalized_cosine};
use crate::embedder::normalize_l2;
use crate::error::{SearchError, SearchResult};

/// In-memory exact-search index.
#[derive(Debug, Default)]
pub struct ExactIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
    /// Map from `service_id` to position in `entries`
    positions: HashMap<ServiceId, usize>,
}

impl ExactIndex {
    /// Create an empty index accepting vectors of `dimension`.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn check_dimension(&self, len: usize, what: &str) -> SearchResult<()> {
        if len == self.dimension {
            Ok(())
        } else {
            Err(SearchError::InvalidRequest(format!(
                "{what} dimension mismatch: expected {}, got {len}",
                self.dimension
            )))
        }
    }
}

impl VectorIndex for ExactIndex {
    fn upsert(
        &mut self,
        service_id: ServiceId,
        vector: &[f32],
        version_tag: i64,
    ) -> SearchResult<()> {
        self.check_dimension(vector.len(), "vector")?;
        let entry = IndexEntry {
            service_id,
            vector: normalize_l2(vector),
            version_tag,
        };
        if let Some(&pos) = self.positions.get(&service_id) {
            self.entries[pos] = entry;
        } else {
            self.positions.insert(service_id, self.entries.len());
            self.entries.push(entry);
        }
        Ok(())
    }

    fn remove(&mut self, service_id: ServiceId) -> bool {
        if let Some(pos) = self.positions.remove(&service_id) {
            self.entries.swap_remove(pos);
            // Re-point the entry that was swapped into `pos` (if any)
            if pos < self.entries.len() {
                let moved = self.entries[pos].service_id;
                self.positions.insert(moved, pos);
            }
            true
        } else {
            false
        }
    }

    fn top_k(&self, query: &[f32], k: usize, over: usize) -> SearchResult<Vec<SimilarityHit>> {
        self.check_dimension(query.len(), "query")?;
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = normalize_l2(query);
        let mut hits: Vec<SimilarityHit> = self
            .entries
            .iter()
            .map(|entry| {
                SimilarityHit::new(entry.service_id, normalized_cosine(&query, &entry.vector))
            })
            .collect();

        hits.sort();
        hits.truncate(k.saturating_mul(over.max(1)));
        Ok(hits)
    }

    fn contains(&self, service_id: ServiceId) -> bool {
        self.positions.contains_key(&service_id)
    }

    fn version_tag(&self, service_id: ServiceId) -> Option<i64> {
        self.positions
            .get(&service_id)
            .map(|&pos| self.entries[pos].version_tag)
    }

    fn update_version_tag(&mut self, service_id: ServiceId, version_tag: i64) -> bool {
        if let Some(&pos) = self.positions.get(&service_id) {
            self.entries[pos].version_tag = version_tag;
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn entries(&self) -> Vec<IndexEntry> {
        self.entries.clone()
    }
}
