//! HNSW ANN index backed by `hnsw_rs`
//!
//! Wraps `hnsw_rs::Hnsw<f32, DistCosine>` with a bidirectional
//! `service_id` ↔ internal-id mapping and soft deletion via a filtered
//! search. The graph cannot remove points, so replaced and removed
//! entries accumulate as tombstones; when tombstones outnumber live
//! entries the graph is rebuilt from the live set.

use std::collections::{HashMap, HashSet};

use hnsw_rs::prelude::*;

use kpath_core::ServiceId;

use super::{IndexEntry, SimilarityHit, VectorIndex};
use crate::embedder::normalize_l2;
use crate::error::{SearchError, SearchResult};

/// Graph layer bound; `hnsw_rs` caps internally at 16.
const MAX_LAYER: usize = 16;

/// Initial graph capacity; doubled on overflow via rebuild.
const INITIAL_CAPACITY: usize = 4_096;

/// HNSW tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Max connections per node (`M`)
    pub max_connections: usize,
    /// Construction beam width
    pub ef_construction: usize,
    /// Search beam width floor
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

struct Slot {
    internal: usize,
    version_tag: i64,
    vector: Vec<f32>,
}

/// HNSW index with soft deletion.
pub struct HnswIndex {
    /// `'static`: all point data is heap-owned, not memory-mapped
    hnsw: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    params: HnswParams,
    capacity: usize,
    /// Live entries by service
    slots: HashMap<ServiceId, Slot>,
    /// Reverse map, indexed by internal id
    internal_to_service: Vec<ServiceId>,
    /// Tombstoned internal ids, excluded from search
    deleted: HashSet<usize>,
    next_internal: usize,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.dimension)
            .field("live", &self.slots.len())
            .field("tombstones", &self.deleted.len())
            .finish_non_exhaustive()
    }
}

impl HnswIndex {
    /// Create an empty HNSW index.
    #[must_use]
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        Self {
            hnsw: Self::make_graph(&params, INITIAL_CAPACITY),
            dimension,
            params,
            capacity: INITIAL_CAPACITY,
            slots: HashMap::new(),
            internal_to_service: Vec::new(),
            deleted: HashSet::new(),
            next_internal: 0,
        }
    }

    fn make_graph(params: &HnswParams, capacity: usize) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::new(
            params.max_connections,
            capacity,
            MAX_LAYER,
            params.ef_construction,
            DistCosine,
        )
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

    /// Rebuild the graph from the live set, dropping all tombstones and
    /// reassigning internal ids.
    fn rebuild_graph(&mut self, capacity: usize) {
        let graph = Self::make_graph(&self.params, capacity);
        self.internal_to_service.clear();
        self.deleted.clear();
        self.next_internal = 0;
        self.capacity = capacity;

        // Insert in service_id order so rebuilds are reproducible
        let mut ids: Vec<ServiceId> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        for service_id in ids {
            let slot = self.slots.get_mut(&service_id).expect("slot exists");
            slot.internal = self.next_internal;
            self.next_internal += 1;
            self.internal_to_service.push(service_id);
            graph.insert((slot.vector.as_slice(), slot.internal));
        }
        self.hnsw = graph;
    }

    fn ensure_room(&mut self) {
        if self.next_internal >= self.capacity {
            let capacity = (self.slots.len().max(1) * 2).max(self.capacity);
            tracing::info!(capacity, "hnsw graph rebuild: capacity");
            self.rebuild_graph(capacity);
        } else if self.deleted.len() > self.slots.len().max(16) {
            tracing::debug!(
                tombstones = self.deleted.len(),
                live = self.slots.len(),
                "hnsw graph rebuild: tombstone pressure"
            );
            self.rebuild_graph(self.capacity);
        }
    }
}

impl VectorIndex for HnswIndex {
    fn upsert(
        &mut self,
        service_id: ServiceId,
        vector: &[f32],
        version_tag: i64,
    ) -> SearchResult<()> {
        self.check_dimension(vector.len(), "vector")?;
        let vector = normalize_l2(vector);

        // Tombstone a replaced entry's old graph point
        if let Some(old) = self.slots.get(&service_id) {
            self.deleted.insert(old.internal);
        }
        self.ensure_room();
        // A rebuild inside ensure_room re-inserts the old vector live;
        // tombstone its fresh internal id too
        if let Some(old) = self.slots.get(&service_id) {
            self.deleted.insert(old.internal);
        }

        let internal = self.next_internal;
        self.next_internal += 1;
        self.internal_to_service.push(service_id);
        self.hnsw.insert((vector.as_slice(), internal));
        self.slots.insert(
            service_id,
            Slot {
                internal,
                version_tag,
                vector,
            },
        );
        Ok(())
    }

    fn remove(&mut self, service_id: ServiceId) -> bool {
        if let Some(slot) = self.slots.remove(&service_id) {
            self.deleted.insert(slot.internal);
            self.ensure_room();
            true
        } else {
            false
        }
    }

    fn top_k(&self, query: &[f32], k: usize, over: usize) -> SearchResult<Vec<SimilarityHit>> {
        self.check_dimension(query.len(), "query")?;
        if self.slots.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = normalize_l2(query);
        let limit = k.saturating_mul(over.max(1));
        let ef = self.params.ef_search.max(limit);

        let deleted = &self.deleted;
        let filter_fn = |id: &usize| -> bool { !deleted.contains(id) };
        let neighbours = if deleted.is_empty() {
            self.hnsw.search(&query, limit, ef)
        } else {
            self.hnsw.search_filter(&query, limit, ef, Some(&filter_fn))
        };

        let mut hits: Vec<SimilarityHit> = neighbours
            .into_iter()
            .filter_map(|n| {
                self.internal_to_service.get(n.d_id).map(|&service_id| {
                    // DistCosine distance is 1 - cos; normalize to [0, 1]
                    let score = (f64::from(2.0 - n.distance) / 2.0).clamp(0.0, 1.0);
                    SimilarityHit::new(service_id, score)
                })
            })
            .collect();

        hits.sort();
        hits.truncate(limit);
        Ok(hits)
    }

    fn contains(&self, service_id: ServiceId) -> bool {
        self.slots.contains_key(&service_id)
    }

    fn version_tag(&self, service_id: ServiceId) -> Option<i64> {
        self.slots.get(&service_id).map(|slot| slot.version_tag)
    }

    fn update_version_tag(&mut self, service_id: ServiceId, version_tag: i64) -> bool {
        if let Some(slot) = self.slots.get_mut(&service_id) {
            slot.version_tag = version_tag;
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn entries(&self) -> Vec<IndexEntry> {
        self.slots
            .iter()
            .map(|(&service_id, slot)| IndexEntry {
                service_id,
                vector: slot.vector.clone(),
                version_tag: slot.version_tag,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(dim: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i] = 1.0;
        v
    }

    fn small_index() -> HnswIndex {
        let mut index = HnswIndex::new(4, HnswParams::default());
        index.upsert(1, &axis(4, 0), 1).unwrap();
        index.upsert(2, &axis(4, 1), 1).unwrap();
        index.upsert(3, &axis(4, 2), 1).unwrap();
        index
    }

    #[test]
    fn upsert_and_search() {
        let index = small_index();
        let hits = index.top_k(&axis(4, 1), 3, 1).unwrap();
        assert_eq!(hits[0].service_id, 2);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn remove_tombstones_entry() {
        let mut index = small_index();
        assert!(index.remove(2));
        assert!(!index.remove(2));
        assert_eq!(index.len(), 2);

        let hits = index.top_k(&axis(4, 1), 3, 1).unwrap();
        assert!(hits.iter().all(|h| h.service_id != 2));
    }

    #[test]
    fn upsert_replaces_vector() {
        let mut index = small_index();
        index.upsert(1, &axis(4, 3), 5).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.version_tag(1), Some(5));

        let hits = index.top_k(&axis(4, 3), 1, 1).unwrap();
        assert_eq!(hits[0].service_id, 1);

        // The old position must no longer surface
        let old = index.top_k(&axis(4, 0), 3, 1).unwrap();
        assert!(old.first().is_none_or(|h| h.score < 0.999));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut index = HnswIndex::new(4, HnswParams::default());
        assert!(index.upsert(1, &[1.0], 1).is_err());
        assert!(index.top_k(&[1.0], 1, 1).is_err());
    }

    #[test]
    fn tombstone_pressure_triggers_rebuild() {
        let mut index = HnswIndex::new(4, HnswParams::default());
        for round in 0..40_i64 {
            index.upsert(1, &axis(4, (round % 4) as usize), round).unwrap();
        }
        // Rebuilds must have kept tombstones bounded
        assert!(index.deleted.len() <= 17);
        assert_eq!(index.len(), 1);
        assert_eq!(index.version_tag(1), Some(39));
    }

    #[test]
    fn entries_reflect_live_set() {
        let mut index = small_index();
        index.remove(3);
        let mut ids: Vec<_> = index.entries().iter().map(|e| e.service_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn search_empty_index() {
        let index = HnswIndex::new(4, HnswParams::default());
        assert!(index.top_k(&axis(4, 0), 5, 2).unwrap().is_empty());
    }

    #[test]
    fn larger_set_recall() {
        let mut index = HnswIndex::new(8, HnswParams::default());
        for id in 0..200_i64 {
            let mut v = vec![0.0_f32; 8];
            let slot = usize::try_from(id).unwrap() % 8;
            v[slot] = 1.0;
            v[(slot + 1) % 8] = 0.001 * (id as f32);
            index.upsert(id, &v, 1).unwrap();
        }

        let hits = index.top_k(&axis(8, 3), 10, 2).unwrap();
        assert!(!hits.is_empty());
        // Every returned hit should be from the queried direction's cluster
        for hit in hits.iter().take(5) {
            assert_eq!(usize::try_from(hit.service_id).unwrap() % 8, 3);
        }
    }
}
