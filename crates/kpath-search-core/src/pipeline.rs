//! End-to-end query pipeline
//!
//! `embed → ANN top-k (with over-fetch) → hydrate → metadata filter →
//! policy filter → rerank → truncate → project`. Transient dependency
//! faults are retried with backoff inside the request deadline and then
//! surfaced as `Timeout`; everything else propagates to the API edge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use kpath_core::{Config, PolicyEvaluator, Principal, ServiceRecord, ServiceStatus};

use crate::canonical::query_hash;
use crate::embedder::Embedder;
use crate::error::{SearchError, SearchResult};
use crate::index::{SimilarityHit, VectorIndex};
use crate::query::SearchRequest;
use crate::results::{
    ResultEntry, SearchEvent, SearchImpression, SearchResponse, ServiceProjection,
};
use crate::sources::{FeedbackSource, RegistrySource};

/// Hard ceiling on the over-fetch multiplier.
const MAX_OVER: usize = 20;

/// Initial backoff for transient-fault retries.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);

/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Ranking and sizing knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Result count when the request does not specify one
    pub default_k: usize,
    /// Upper bound on requested result counts
    pub max_k: usize,
    /// Over-fetch multiplier (`over = max(4, k * factor)`)
    pub oversample_factor: usize,
    /// Similarity weight in the final blend
    pub alpha: f64,
    /// Feedback-prior weight in the final blend
    pub beta: f64,
    /// Multiplier applied to deprecated services after blending
    pub deprecated_multiplier: f64,
    /// Per-search deadline
    pub default_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            max_k: 100,
            oversample_factor: 3,
            alpha: 0.85,
            beta: 0.15,
            deprecated_multiplier: 0.5,
            default_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_k: config.search_default_k,
            max_k: config.search_max_k,
            oversample_factor: config.search_oversample_factor,
            alpha: config.search_alpha,
            beta: config.search_beta,
            deprecated_multiplier: config.deprecated_multiplier,
            default_timeout: Duration::from_millis(config.search_default_timeout_ms),
        }
    }
}

/// The access-filtered retrieval pipeline.
///
/// Cheap to clone-per-worker via the shared `Arc`s; many searches run
/// concurrently, each taking only the index read lock.
pub struct SearchPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<RwLock<Box<dyn VectorIndex>>>,
    registry: Arc<dyn RegistrySource>,
    feedback: Arc<dyn FeedbackSource>,
    policy: PolicyEvaluator,
    config: PipelineConfig,
    ready: Arc<AtomicBool>,
}

impl SearchPipeline {
    /// Wire up a pipeline over shared components.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<RwLock<Box<dyn VectorIndex>>>,
        registry: Arc<dyn RegistrySource>,
        feedback: Arc<dyn FeedbackSource>,
        policy: PolicyEvaluator,
        config: PipelineConfig,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            embedder,
            index,
            registry,
            feedback,
            policy,
            config,
            ready,
        }
    }

    /// Execute a discovery query for a principal.
    ///
    /// # Errors
    /// - `InvalidRequest` for malformed input
    /// - `IndexNotReady` before the first successful build
    /// - `Timeout` when the deadline expires (including exhausted
    ///   transient-fault retries)
    pub fn search(
        &self,
        request: &SearchRequest,
        principal: &Principal,
    ) -> SearchResult<SearchResponse> {
        let started = Instant::now();
        let deadline = started + self.config.default_timeout;

        let (k, min_score) = request.validate(self.config.default_k, self.config.max_k)?;

        if !self.ready.load(Ordering::Acquire) {
            return Err(SearchError::IndexNotReady(
                "vector index has not finished building".to_owned(),
            ));
        }

        let qhash = query_hash(&request.query);
        let query_vector =
            self.retry_transient(deadline, || self.embedder.embed(request.query.trim()))?;

        // over = max(4, k * factor), bounded so the ANN scan stays within
        // k * over <= 2000 regardless of request size
        let mut over = 4.max(k.saturating_mul(self.config.oversample_factor));
        if k.saturating_mul(over) > 2_000 {
            over = (2_000 / k).max(1);
        }
        let mut ranked;
        let mut widened = false;
        loop {
            let candidates = self.top_k(&query_vector, k, over)?;
            check_deadline(deadline)?;

            let fetched = candidates.len();
            ranked = self.filter_and_rank(request, principal, &candidates, &qhash, deadline)?;

            // At most one widening retry, and only when filtering ate into
            // k while the index plausibly holds candidates beyond the
            // fetched window
            if widened
                || ranked.len() >= k
                || fetched < k.saturating_mul(over)
                || over >= MAX_OVER
            {
                break;
            }
            over = (over * 2).min(MAX_OVER);
            widened = true;
            tracing::debug!(over, "over-fetch widened after filtering");
        }

        ranked.retain(|(_, _, final_score)| *final_score >= min_score);
        ranked.truncate(k);

        let results: Vec<ResultEntry> = ranked
            .iter()
            .enumerate()
            .map(|(i, (record, base_score, final_score))| ResultEntry {
                service_id: record.service_id,
                rank: i + 1,
                score: *final_score,
                service: ServiceProjection::from(record),
                distance: 1.0 - base_score,
            })
            .collect();

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let response = SearchResponse {
            query: request.query.clone(),
            total_results: results.len(),
            search_time_ms: elapsed_ms,
            results,
        };

        self.emit_event(&response, principal, &qhash, elapsed_ms);
        Ok(response)
    }

    /// Take the read lock just long enough for the ANN call.
    fn top_k(&self, query: &[f32], k: usize, over: usize) -> SearchResult<Vec<SimilarityHit>> {
        let guard = self
            .index
            .read()
            .map_err(|_| SearchError::Internal("index lock poisoned".to_owned()))?;
        guard.top_k(query, k, over)
    }

    /// Hydrate, filter, and rerank ANN candidates. Returns
    /// `(record, base_score, final_score)` sorted best-first.
    fn filter_and_rank(
        &self,
        request: &SearchRequest,
        principal: &Principal,
        candidates: &[SimilarityHit],
        qhash: &str,
        deadline: Instant,
    ) -> SearchResult<Vec<(ServiceRecord, f64, f64)>> {
        let ids: Vec<i64> = candidates.iter().map(|hit| hit.service_id).collect();
        let hydrated =
            self.retry_transient(deadline, || self.registry.batch_get(&ids))?;
        let by_id: HashMap<i64, ServiceRecord> = hydrated
            .into_iter()
            .map(|record| (record.service_id, record))
            .collect();

        let mut ranked: Vec<(ServiceRecord, f64, f64)> = Vec::with_capacity(candidates.len());
        for hit in candidates {
            let Some(record) = by_id.get(&hit.service_id) else {
                continue; // dropped from the registry since indexing
            };
            if !record.status.is_discoverable() {
                continue;
            }
            if !record.has_domains(&request.domains)
                || !record.has_capabilities(&request.capabilities)
            {
                continue;
            }
            if !self.policy.visible(principal, record) {
                continue;
            }

            // Prior lookup failures degrade to "no prior" rather than
            // failing the search
            let prior = match self.feedback.prior(qhash, hit.service_id) {
                Ok(prior) => prior.clamp(0.0, 1.0),
                Err(err) => {
                    tracing::warn!(service_id = hit.service_id, %err, "prior lookup failed");
                    0.0
                }
            };

            let mut final_score =
                (self.config.alpha * hit.score + self.config.beta * prior).clamp(0.0, 1.0);
            if record.status == ServiceStatus::Deprecated {
                final_score *= self.config.deprecated_multiplier;
            }

            ranked.push((record.clone(), hit.score, final_score));
        }

        // Final order: blended score descending, service_id ascending
        ranked.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.service_id.cmp(&b.0.service_id))
        });
        Ok(ranked)
    }

    /// Retry transient dependency faults with exponential backoff until
    /// the deadline, then surface `Timeout`.
    fn retry_transient<T>(
        &self,
        deadline: Instant,
        mut op: impl FnMut() -> SearchResult<T>,
    ) -> SearchResult<T> {
        let mut backoff = BACKOFF_INITIAL;
        loop {
            match op() {
                Err(
                    err @ (SearchError::TransientDependency(_)
                    | SearchError::EmbedderUnavailable(_)),
                ) => {
                    if Instant::now() + backoff >= deadline {
                        return Err(SearchError::Timeout(format!(
                            "deadline exhausted retrying transient fault: {err}"
                        )));
                    }
                    tracing::debug!(%err, backoff_ms = backoff.as_millis() as u64, "retrying");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
                other => return other,
            }
        }
    }

    /// Emit the telemetry event; failures are logged, never surfaced.
    fn emit_event(
        &self,
        response: &SearchResponse,
        principal: &Principal,
        qhash: &str,
        elapsed_ms: u64,
    ) {
        let event = SearchEvent {
            search_id: uuid::Uuid::new_v4().to_string(),
            query_hash: qhash.to_owned(),
            principal_id: principal.principal_id.clone(),
            impressions: response
                .results
                .iter()
                .map(|entry| SearchImpression {
                    service_id: entry.service_id,
                    rank: u32::try_from(entry.rank).unwrap_or(u32::MAX),
                })
                .collect(),
            elapsed_ms,
            created_ts: chrono::Utc::now().timestamp_micros(),
        };
        if let Err(err) = self.feedback.record_search(&event) {
            tracing::warn!(%err, "failed to record search event");
        }
    }
}

fn check_deadline(deadline: Instant) -> SearchResult<()> {
    if Instant::now() >= deadline {
        return Err(SearchError::Timeout("search deadline exceeded".to_owned()));
    }
    Ok(())
}
