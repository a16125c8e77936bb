//! Index lifecycle management
//!
//! [`IndexManager`] owns the vector index and keeps it consistent with the
//! registry: cold build (snapshot-aware), incremental reconciliation from
//! a bounded change queue, operator-triggered atomic rebuilds, and
//! periodic snapshots.
//!
//! Query handling is parallel; index mutation is serialized through a
//! single worker draining the queue ([`IndexManager::run_worker`]).
//! Events for the same service arriving within a small window are
//! coalesced and processed at their latest state, so each burst costs at
//! most one embedding call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use kpath_core::{ChangeEvent, ChangeKind, Config, IndexingState, ServiceId};

use crate::canonical::{content_hash, embeddable_text};
use crate::embedder::Embedder;
use crate::error::{SearchError, SearchResult};
use crate::index::VectorIndex;
use crate::snapshot::SnapshotStore;
use crate::sources::RegistrySource;

/// Tuning for the index manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Snapshot after this many applied changes
    pub snapshot_every_changes: usize,
    /// Snapshot after this long without changes
    pub quiescence: Duration,
    /// Window over which same-service events are coalesced
    pub coalesce_window: Duration,
    /// Bound on the pending change queue
    pub queue_capacity: usize,
    /// First retry delay for an unavailable embedder
    pub backoff_initial: Duration,
    /// Retry delay ceiling
    pub backoff_cap: Duration,
    /// Give up on one embed attempt after this long and requeue the event
    pub embed_attempt_budget: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            snapshot_every_changes: 500,
            quiescence: Duration::from_secs(60),
            coalesce_window: Duration::from_millis(200),
            queue_capacity: 10_000,
            backoff_initial: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(30),
            embed_attempt_budget: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for ManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            snapshot_every_changes: config.snapshot_every_changes,
            quiescence: Duration::from_secs(config.snapshot_quiescence_seconds),
            queue_capacity: config.change_queue_capacity,
            ..Self::default()
        }
    }
}

/// Health of the index, as reported by `/search/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHealth {
    /// Whether queries can be served
    pub ready: bool,
    /// Entries currently in the index
    pub total_vectors: usize,
    /// Services awaiting (re-)embedding
    pub pending: usize,
    /// Services whose text permanently exceeds the model context
    pub unindexable: usize,
    /// Newest snapshot generation on disk
    pub snapshot_generation: u64,
    /// Sticky flag set while snapshot writes are failing
    pub degraded: bool,
    /// Embedding model identifier
    pub embedding_model: String,
    /// Micros-since-epoch of the last applied change, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied_ts: Option<i64>,
}

struct TrackedService {
    state: IndexingState,
    content_hash: String,
}

/// Owns the vector index and reconciles it with the registry.
pub struct IndexManager {
    embedder: Arc<dyn Embedder>,
    registry: Arc<dyn RegistrySource>,
    index: Arc<RwLock<Box<dyn VectorIndex>>>,
    factory: Box<dyn Fn() -> Box<dyn VectorIndex> + Send + Sync>,
    snapshots: SnapshotStore,
    config: ManagerConfig,

    queue: Mutex<VecDeque<ChangeEvent>>,
    queue_cv: Condvar,
    states: Mutex<HashMap<ServiceId, TrackedService>>,

    ready: Arc<AtomicBool>,
    degraded: AtomicBool,
    rebuild_requested: AtomicBool,
    shutdown: AtomicBool,
    generation: AtomicU64,
    changes_since_snapshot: AtomicUsize,
    last_applied_ts: AtomicI64,
}

impl IndexManager {
    /// Create a manager around an empty index produced by `factory`.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        registry: Arc<dyn RegistrySource>,
        factory: Box<dyn Fn() -> Box<dyn VectorIndex> + Send + Sync>,
        snapshots: SnapshotStore,
        config: ManagerConfig,
    ) -> Self {
        let generation = snapshots.latest_generation();
        Self {
            embedder,
            registry,
            index: Arc::new(RwLock::new(factory())),
            factory,
            snapshots,
            config,
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            states: Mutex::new(HashMap::new()),
            ready: Arc::new(AtomicBool::new(false)),
            degraded: AtomicBool::new(false),
            rebuild_requested: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            generation: AtomicU64::new(generation),
            changes_since_snapshot: AtomicUsize::new(0),
            last_applied_ts: AtomicI64::new(0),
        }
    }

    /// Shared handle to the index (the pipeline takes read locks on it).
    #[must_use]
    pub fn index_handle(&self) -> Arc<RwLock<Box<dyn VectorIndex>>> {
        Arc::clone(&self.index)
    }

    /// Shared readiness flag.
    #[must_use]
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    /// Whether the index is serving queries.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Current indexing state of one service.
    #[must_use]
    pub fn service_state(&self, service_id: ServiceId) -> IndexingState {
        self.states
            .lock()
            .expect("state lock poisoned")
            .get(&service_id)
            .map_or(IndexingState::Absent, |t| t.state)
    }

    /// Build the index at startup.
    ///
    /// A compatible snapshot (same model and dimension) seeds the index;
    /// entries whose version tag matches the registry are reused verbatim,
    /// mismatched services are re-embedded, and entries for services no
    /// longer discoverable are dropped. Without a snapshot this is a full
    /// cold build.
    ///
    /// # Errors
    /// Propagates registry faults and embedder faults that outlast the
    /// attempt budget; the index stays not-ready in that case.
    pub fn initialize(&self) -> SearchResult<()> {
        let started = Instant::now();
        let snapshot = self
            .snapshots
            .load_latest(self.embedder.model_id(), self.embedder.dimension())?;

        let mut seeded: HashMap<ServiceId, (Vec<f32>, i64)> = HashMap::new();
        if let Some((generation, snap)) = snapshot {
            tracing::info!(generation, entries = snap.entries.len(), "seeding from snapshot");
            for entry in snap.entries {
                seeded.insert(entry.service_id, (entry.vector, entry.version_tag));
            }
        }

        let records = self.registry.get_discoverable_services()?;
        let mut reused = 0_usize;
        let mut embedded = 0_usize;
        let mut skipped = 0_usize;

        {
            let mut index = self.write_index()?;
            let mut states = self.states.lock().expect("state lock poisoned");
            for record in &records {
                let text = embeddable_text(record);
                let hash = content_hash(&text);
                let seeded_entry = seeded.remove(&record.service_id);
                let stale = seeded_entry
                    .as_ref()
                    .is_some_and(|(_, tag)| *tag != record.version_tag);
                if let Some((vector, tag)) = seeded_entry
                    && !stale
                {
                    index.upsert(record.service_id, &vector, tag)?;
                    states.insert(
                        record.service_id,
                        TrackedService {
                            state: IndexingState::Indexed,
                            content_hash: hash,
                        },
                    );
                    reused += 1;
                    continue;
                }
                if stale {
                    // Snapshot vector is from an older revision; stale
                    // until the fresh embedding lands
                    states.insert(
                        record.service_id,
                        TrackedService {
                            state: IndexingState::Stale,
                            content_hash: hash.clone(),
                        },
                    );
                }

                match self.embed_with_budget(&text) {
                    Ok(vector) => {
                        index.upsert(record.service_id, &vector, record.version_tag)?;
                        states.insert(
                            record.service_id,
                            TrackedService {
                                state: IndexingState::Indexed,
                                content_hash: hash,
                            },
                        );
                        embedded += 1;
                    }
                    Err(err) if err.is_permanent_for_input() => {
                        tracing::warn!(
                            service_id = record.service_id,
                            %err,
                            "service unindexable, skipping"
                        );
                        states.insert(
                            record.service_id,
                            TrackedService {
                                state: IndexingState::Unindexable,
                                content_hash: hash,
                            },
                        );
                        skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
            // Entries left in `seeded` belong to services that are gone or
            // no longer discoverable; they simply never enter the index.
        }

        self.ready.store(true, Ordering::Release);
        tracing::info!(
            services = records.len(),
            reused,
            embedded,
            skipped,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "index initialized"
        );

        if embedded > 0 || reused != records.len() || self.generation.load(Ordering::SeqCst) == 0 {
            self.snapshot_now();
        }
        Ok(())
    }

    /// Enqueue a registry change for the indexing worker.
    ///
    /// On overflow, a queued event for the same service is replaced in
    /// place first (coalescable duplicate); if none exists the queue is
    /// abandoned in favor of a full rebuild and `false` is returned.
    pub fn enqueue(&self, event: ChangeEvent) -> bool {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        if queue.len() >= self.config.queue_capacity {
            if let Some(existing) = queue
                .iter_mut()
                .find(|queued| queued.service_id == event.service_id)
            {
                *existing = event;
                self.queue_cv.notify_one();
                return true;
            }
            tracing::warn!(
                capacity = self.config.queue_capacity,
                "change queue overflow, degrading to full rebuild"
            );
            queue.clear();
            self.rebuild_requested.store(true, Ordering::SeqCst);
            self.queue_cv.notify_one();
            return false;
        }
        queue.push_back(event);
        self.queue_cv.notify_one();
        true
    }

    /// Request an atomic rebuild (served by the worker).
    pub fn request_rebuild(&self) {
        self.rebuild_requested.store(true, Ordering::SeqCst);
        self.queue_cv.notify_one();
    }

    /// Signal the worker to exit after its current step.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue_cv.notify_all();
    }

    /// Single-threaded reconciliation loop; run on a dedicated thread.
    ///
    /// `on_quiescent` fires once per idle period (after the quiescence
    /// snapshot, if one was due) and is the hook for opportunistic
    /// maintenance such as feedback retention sweeps.
    pub fn run_worker(&self, on_quiescent: &(dyn Fn() + Sync)) {
        let mut last_activity = Instant::now();
        let mut quiesced = false;

        while !self.shutdown.load(Ordering::SeqCst) {
            if self.rebuild_requested.swap(false, Ordering::SeqCst) {
                if let Err(err) = self.rebuild() {
                    tracing::error!(%err, "rebuild failed");
                }
                last_activity = Instant::now();
                quiesced = false;
                continue;
            }

            let batch = self.collect_batch();
            if batch.is_empty() {
                if !quiesced && last_activity.elapsed() >= self.config.quiescence {
                    if self.changes_since_snapshot.load(Ordering::SeqCst) > 0 {
                        self.snapshot_now();
                    }
                    on_quiescent();
                    quiesced = true;
                }
                continue;
            }

            let batch = coalesce_changes(batch);
            let mut applied = 0_usize;
            for event in batch {
                match self.apply_change(&event) {
                    Ok(true) => applied += 1,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::error!(service_id = event.service_id, %err, "change failed");
                    }
                }
            }

            if applied > 0 {
                self.last_applied_ts
                    .store(chrono::Utc::now().timestamp_micros(), Ordering::SeqCst);
                let total = self
                    .changes_since_snapshot
                    .fetch_add(applied, Ordering::SeqCst)
                    + applied;
                if total >= self.config.snapshot_every_changes {
                    self.snapshot_now();
                }
            }
            last_activity = Instant::now();
            quiesced = false;
        }
    }

    /// Pull everything currently queued, waiting briefly for the first
    /// event and then letting the coalescing window close.
    fn collect_batch(&self) -> Vec<ChangeEvent> {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        if queue.is_empty() {
            let (guard, _timeout) = self
                .queue_cv
                .wait_timeout(queue, Duration::from_millis(250))
                .expect("queue lock poisoned");
            queue = guard;
        }
        if queue.is_empty() {
            return Vec::new();
        }
        let mut batch: Vec<ChangeEvent> = queue.drain(..).collect();
        drop(queue);

        // Let same-service bursts land before processing
        std::thread::sleep(self.config.coalesce_window);
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        batch.extend(queue.drain(..));
        batch
    }

    /// Apply one (already coalesced) change. Returns whether the index was
    /// mutated.
    fn apply_change(&self, event: &ChangeEvent) -> SearchResult<bool> {
        if event.kind == ChangeKind::Deleted {
            return Ok(self.remove_service(event.service_id));
        }

        let record = self.registry.get(event.service_id)?;
        let Some(record) = record else {
            return Ok(self.remove_service(event.service_id));
        };
        if !record.status.is_discoverable() {
            return Ok(self.remove_service(record.service_id));
        }

        let text = embeddable_text(&record);
        let hash = content_hash(&text);

        // Unchanged text at a new revision: reuse the vector
        let unchanged = {
            let states = self.states.lock().expect("state lock poisoned");
            states
                .get(&record.service_id)
                .is_some_and(|t| t.state == IndexingState::Indexed && t.content_hash == hash)
        };
        if unchanged {
            let mut index = self.write_index()?;
            if index.update_version_tag(record.service_id, record.version_tag) {
                return Ok(true);
            }
        }

        self.set_state(record.service_id, IndexingState::Pending, hash.clone());
        match self.embed_with_budget(&text) {
            Ok(vector) => {
                let mut index = self.write_index()?;
                index.upsert(record.service_id, &vector, record.version_tag)?;
                drop(index);
                self.set_state(record.service_id, IndexingState::Indexed, hash);
                Ok(true)
            }
            Err(err) if err.is_permanent_for_input() => {
                tracing::warn!(service_id = record.service_id, %err, "service unindexable");
                let mut index = self.write_index()?;
                index.remove(record.service_id);
                drop(index);
                self.set_state(record.service_id, IndexingState::Unindexable, hash);
                Ok(true)
            }
            Err(err) => {
                // Attempt budget exhausted: leave the service pending and
                // requeue so the next pass retries
                tracing::warn!(service_id = record.service_id, %err, "embed deferred, requeueing");
                self.enqueue(event.clone());
                Ok(false)
            }
        }
    }

    fn remove_service(&self, service_id: ServiceId) -> bool {
        let removed = match self.write_index() {
            Ok(mut index) => index.remove(service_id),
            Err(err) => {
                tracing::error!(%err, "index lock poisoned during remove");
                false
            }
        };
        let mut states = self.states.lock().expect("state lock poisoned");
        states.insert(
            service_id,
            TrackedService {
                state: IndexingState::Removed,
                content_hash: String::new(),
            },
        );
        removed
    }

    /// Rebuild the entire index into a shadow instance, then swap it in
    /// under the write lock. Queries keep using the live instance until
    /// the swap.
    ///
    /// # Errors
    /// Propagates registry faults; the live index stays untouched.
    pub fn rebuild(&self) -> SearchResult<()> {
        let started = Instant::now();
        let mut shadow = (self.factory)();
        let mut shadow_states: HashMap<ServiceId, TrackedService> = HashMap::new();

        let records = self.registry.get_discoverable_services()?;
        for record in &records {
            let text = embeddable_text(record);
            let hash = content_hash(&text);
            match self.embed_with_budget(&text) {
                Ok(vector) => {
                    shadow.upsert(record.service_id, &vector, record.version_tag)?;
                    shadow_states.insert(
                        record.service_id,
                        TrackedService {
                            state: IndexingState::Indexed,
                            content_hash: hash,
                        },
                    );
                }
                Err(err) if err.is_permanent_for_input() => {
                    tracing::warn!(service_id = record.service_id, %err, "unindexable in rebuild");
                    shadow_states.insert(
                        record.service_id,
                        TrackedService {
                            state: IndexingState::Unindexable,
                            content_hash: hash,
                        },
                    );
                }
                Err(err) => return Err(err),
            }
        }

        {
            let mut index = self.write_index()?;
            *index = shadow;
        }
        *self.states.lock().expect("state lock poisoned") = shadow_states;
        self.ready.store(true, Ordering::Release);
        self.snapshot_now();

        tracing::info!(
            services = records.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "index rebuilt"
        );
        Ok(())
    }

    /// Write a snapshot of the current index. Failures keep the previous
    /// snapshot and set the degraded flag; the next trigger retries.
    pub fn snapshot_now(&self) {
        let entries = match self.index.read() {
            Ok(index) => index.entries(),
            Err(_) => {
                tracing::error!("index lock poisoned during snapshot");
                return;
            }
        };
        let generation = self.generation.load(Ordering::SeqCst) + 1;
        match self.snapshots.write(
            generation,
            self.embedder.model_id(),
            self.embedder.dimension(),
            &entries,
        ) {
            Ok(_) => {
                self.generation.store(generation, Ordering::SeqCst);
                self.changes_since_snapshot.store(0, Ordering::SeqCst);
                self.degraded.store(false, Ordering::SeqCst);
            }
            Err(err) => {
                tracing::error!(%err, "snapshot write failed, keeping previous generation");
                self.degraded.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Current health for `/search/status`.
    #[must_use]
    pub fn health(&self) -> IndexHealth {
        let (pending, unindexable) = {
            let states = self.states.lock().expect("state lock poisoned");
            let pending = states
                .values()
                .filter(|t| t.state == IndexingState::Pending)
                .count();
            let unindexable = states
                .values()
                .filter(|t| t.state == IndexingState::Unindexable)
                .count();
            (pending, unindexable)
        };
        let total_vectors = self.index.read().map_or(0, |index| index.len());
        let last_applied = self.last_applied_ts.load(Ordering::SeqCst);
        IndexHealth {
            ready: self.is_ready(),
            total_vectors,
            pending,
            unindexable,
            snapshot_generation: self.generation.load(Ordering::SeqCst),
            degraded: self.degraded.load(Ordering::SeqCst),
            embedding_model: self.embedder.model_id().to_owned(),
            last_applied_ts: (last_applied > 0).then_some(last_applied),
        }
    }

    fn set_state(&self, service_id: ServiceId, state: IndexingState, content_hash: String) {
        self.states.lock().expect("state lock poisoned").insert(
            service_id,
            TrackedService {
                state,
                content_hash,
            },
        );
    }

    fn write_index(
        &self,
    ) -> SearchResult<std::sync::RwLockWriteGuard<'_, Box<dyn VectorIndex>>> {
        self.index
            .write()
            .map_err(|_| SearchError::Internal("index lock poisoned".to_owned()))
    }

    /// Embed with exponential backoff, bounded by the attempt budget.
    fn embed_with_budget(&self, text: &str) -> SearchResult<Vec<f32>> {
        let deadline = Instant::now() + self.config.embed_attempt_budget;
        let mut backoff = self.config.backoff_initial;
        loop {
            match self.embedder.embed(text) {
                Err(
                    err @ (SearchError::EmbedderUnavailable(_)
                    | SearchError::TransientDependency(_)),
                ) => {
                    if Instant::now() + backoff >= deadline || self.shutdown.load(Ordering::SeqCst)
                    {
                        return Err(err);
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.config.backoff_cap);
                }
                other => return other,
            }
        }
    }
}

/// Collapse repeated events for the same service, keeping the latest
/// event at the position of the first occurrence.
#[must_use]
pub fn coalesce_changes(changes: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut seen: HashMap<ServiceId, usize> = HashMap::new();
    let mut result: Vec<ChangeEvent> = Vec::with_capacity(changes.len());
    for change in changes {
        if let Some(&idx) = seen.get(&change.service_id) {
            result[idx] = change;
        } else {
            seen.insert(change.service_id, result.len());
            result.push(change);
        }
    }
    result
}
