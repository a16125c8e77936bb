//! Inverted-file ANN index
//!
//! Vectors are partitioned into `nlist` clusters around trained centroids;
//! a query scores only the `nprobe` nearest clusters instead of every
//! vector. Training is deterministic: seeds are evenly spaced over entries
//! in `service_id` order and refined with a fixed number of Lloyd
//! iterations, so identical registry states produce identical indexes.
//!
//! Below `nlist * MIN_POINTS_PER_LIST` entries the index degrades to an
//! exact scan — clustering tiny sets buys nothing and hurts recall.

use std::collections::HashMap;
use std::sync::Mutex;

use kpath_core::ServiceId;

use super::{IndexEntry, SimilarityHit, VectorIndex, normalized_cosine};
use crate::embedder::normalize_l2;
use crate::error::{SearchError, SearchResult};

/// Entries per list below which training is skipped entirely.
const MIN_POINTS_PER_LIST: usize = 4;

/// Lloyd refinement iterations; fixed for reproducibility.
const TRAIN_ITERATIONS: usize = 5;

struct TrainedLists {
    /// Mutation revision the training reflects
    revision: u64,
    /// Unit-norm cluster centers
    centroids: Vec<Vec<f32>>,
    /// Entry positions per centroid
    lists: Vec<Vec<usize>>,
}

/// IVF index with lazily retrained coarse quantizer.
pub struct IvfIndex {
    dimension: usize,
    nlist: usize,
    nprobe: usize,
    entries: Vec<IndexEntry>,
    positions: HashMap<ServiceId, usize>,
    /// Bumped on every mutation; invalidates training
    revision: u64,
    trained: Mutex<Option<TrainedLists>>,
}

impl std::fmt::Debug for IvfIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IvfIndex")
            .field("dimension", &self.dimension)
            .field("nlist", &self.nlist)
            .field("nprobe", &self.nprobe)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl IvfIndex {
    /// Create an empty IVF index.
    #[must_use]
    pub fn new(dimension: usize, nlist: usize, nprobe: usize) -> Self {
        Self {
            dimension,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            entries: Vec::new(),
            positions: HashMap::new(),
            revision: 0,
            trained: Mutex::new(None),
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

    /// Train centroids over the current entries. Returns `None` when the
    /// set is too small to be worth partitioning.
    fn train(&self) -> Option<TrainedLists> {
        if self.entries.len() < self.nlist * MIN_POINTS_PER_LIST {
            return None;
        }

        // Deterministic seeding: evenly spaced entries in service_id order
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&pos| self.entries[pos].service_id);
        let stride = order.len() / self.nlist;
        let mut centroids: Vec<Vec<f32>> = (0..self.nlist)
            .map(|i| self.entries[order[i * stride]].vector.clone())
            .collect();

        let mut assignments = vec![0_usize; self.entries.len()];
        for _ in 0..TRAIN_ITERATIONS {
            // Assign each entry to its nearest centroid
            for (pos, entry) in self.entries.iter().enumerate() {
                let best = centroids
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| {
                        normalized_cosine(&entry.vector, a)
                            .partial_cmp(&normalized_cosine(&entry.vector, b))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map_or(0, |(i, _)| i);
                assignments[pos] = best;
            }

            // Recompute centroids as normalized means; empty clusters keep
            // their previous center
            let mut sums = vec![vec![0.0_f32; self.dimension]; self.nlist];
            let mut counts = vec![0_usize; self.nlist];
            for (pos, entry) in self.entries.iter().enumerate() {
                let cluster = assignments[pos];
                counts[cluster] += 1;
                for (acc, x) in sums[cluster].iter_mut().zip(&entry.vector) {
                    *acc += x;
                }
            }
            for (cluster, sum) in sums.into_iter().enumerate() {
                if counts[cluster] > 0 {
                    centroids[cluster] = normalize_l2(&sum);
                }
            }
        }

        let mut lists: Vec<Vec<usize>> = vec![Vec::new(); self.nlist];
        for (pos, &cluster) in assignments.iter().enumerate() {
            lists[cluster].push(pos);
        }

        Some(TrainedLists {
            revision: self.revision,
            centroids,
            lists,
        })
    }

    /// Score all entries (exact fallback path).
    fn scan_all(&self, query: &[f32]) -> Vec<SimilarityHit> {
        self.entries
            .iter()
            .map(|entry| {
                SimilarityHit::new(entry.service_id, normalized_cosine(query, &entry.vector))
            })
            .collect()
    }

    fn scan_probed(&self, query: &[f32], trained: &TrainedLists, limit: usize) -> Vec<SimilarityHit> {
        // Rank centroids by similarity and probe the best nprobe lists
        let mut ranked: Vec<(usize, f64)> = trained
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, normalized_cosine(query, c)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut candidates: Vec<usize> = Vec::new();
        for &(cluster, _) in ranked.iter().take(self.nprobe) {
            candidates.extend_from_slice(&trained.lists[cluster]);
        }

        // Not enough probed candidates to satisfy the request: widen to an
        // exact scan rather than returning a short, lossy answer
        if candidates.len() < limit {
            return self.scan_all(query);
        }

        candidates
            .into_iter()
            .map(|pos| {
                let entry = &self.entries[pos];
                SimilarityHit::new(entry.service_id, normalized_cosine(query, &entry.vector))
            })
            .collect()
    }
}

impl VectorIndex for IvfIndex {
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
        self.revision += 1;
        Ok(())
    }

    fn remove(&mut self, service_id: ServiceId) -> bool {
        if let Some(pos) = self.positions.remove(&service_id) {
            self.entries.swap_remove(pos);
            if pos < self.entries.len() {
                let moved = self.entries[pos].service_id;
                self.positions.insert(moved, pos);
            }
            self.revision += 1;
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
        let limit = k.saturating_mul(over.max(1));

        let mut guard = self
            .trained
            .lock()
            .map_err(|_| SearchError::Internal("ivf training lock poisoned".to_owned()))?;
        if guard.as_ref().is_none_or(|t| t.revision != self.revision) {
            *guard = self.train();
        }

        let mut hits = match guard.as_ref() {
            Some(trained) => self.scan_probed(&query, trained, limit),
            None => self.scan_all(&query),
        };
        drop(guard);

        hits.sort();
        hits.truncate(limit);
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
            // Vector unchanged: training stays valid, no revision bump
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
