//! Append-only feedback store
//!
//! Impressions arrive from search telemetry events; selections arrive from
//! the surrounding application via [`SqliteFeedbackStore::record_selection`].
//! The reranker consumes the Laplace-smoothed click-through prior over a
//! trailing window. Rows expire via the retention sweep.

use std::sync::Arc;

use rusqlite::{OptionalExtension, params};

use kpath_core::ServiceId;
use kpath_search_core::{FeedbackSource, SearchEvent, SearchResult};

use crate::error::{DbError, DbResult};
use crate::pool::DbPool;

/// SQLite-backed feedback store.
pub struct SqliteFeedbackStore {
    pool: Arc<DbPool>,
    window_days: u32,
    retention_days: u32,
}

impl std::fmt::Debug for SqliteFeedbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteFeedbackStore")
            .field("window_days", &self.window_days)
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}

const MICROS_PER_DAY: i64 = 86_400_000_000;

impl SqliteFeedbackStore {
    /// Wrap a pool with the given prior window and retention horizon.
    #[must_use]
    pub const fn new(pool: Arc<DbPool>, window_days: u32, retention_days: u32) -> Self {
        Self {
            pool,
            window_days,
            retention_days,
        }
    }

    /// Record an explicit selection against an earlier search.
    ///
    /// # Errors
    /// `NotFound` when the `search_id` has no recorded impressions (there
    /// is nothing to attribute the click to).
    pub fn record_selection(
        &self,
        search_id: &str,
        service_id: ServiceId,
        position: u32,
    ) -> DbResult<()> {
        let now = chrono::Utc::now().timestamp_micros();
        self.pool.with(|conn| {
            let query_hash: Option<String> = conn
                .query_row(
                    "SELECT query_hash FROM feedback_events WHERE search_id = ?1 LIMIT 1",
                    params![search_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(query_hash) = query_hash else {
                return Err(DbError::NotFound(format!("search {search_id}")));
            };
            conn.execute(
                "INSERT INTO feedback_events
                     (search_id, query_hash, service_id, rank_position, selected, created_ts)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![search_id, query_hash, service_id, position, now],
            )?;
            Ok(())
        })
    }

    /// Count `(clicks, impressions)` for a pair inside the window.
    fn counts(&self, query_hash: &str, service_id: ServiceId) -> DbResult<(i64, i64)> {
        let cutoff =
            chrono::Utc::now().timestamp_micros() - i64::from(self.window_days) * MICROS_PER_DAY;
        self.pool.with(|conn| {
            let (clicks, impressions): (i64, i64) = conn.query_row(
                "SELECT
                     COALESCE(SUM(CASE WHEN selected = 1 THEN 1 ELSE 0 END), 0),
                     COALESCE(SUM(CASE WHEN selected = 0 THEN 1 ELSE 0 END), 0)
                 FROM feedback_events
                 WHERE query_hash = ?1 AND service_id = ?2 AND created_ts >= ?3",
                params![query_hash, service_id, cutoff],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok((clicks, impressions))
        })
    }
}

impl FeedbackSource for SqliteFeedbackStore {
    fn prior(&self, query_hash: &str, service_id: ServiceId) -> SearchResult<f64> {
        let (clicks, impressions) = self.counts(query_hash, service_id)?;
        if clicks == 0 && impressions == 0 {
            return Ok(0.0);
        }
        // Laplace smoothing over the empirical CTR
        #[allow(clippy::cast_precision_loss)]
        let prior = (clicks + 1) as f64 / (impressions + 2) as f64;
        Ok(prior.clamp(0.0, 1.0))
    }

    fn record_search(&self, event: &SearchEvent) -> SearchResult<()> {
        self.pool.with(|conn| {
            let tx = conn.transaction()?;
            for impression in &event.impressions {
                tx.execute(
                    "INSERT INTO feedback_events
                         (search_id, query_hash, service_id, rank_position, selected, created_ts)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                    params![
                        event.search_id,
                        event.query_hash,
                        impression.service_id,
                        impression.rank,
                        event.created_ts,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })?;
        Ok(())
    }

    fn prune_expired(&self) -> SearchResult<usize> {
        let cutoff =
            chrono::Utc::now().timestamp_micros() - i64::from(self.retention_days) * MICROS_PER_DAY;
        let removed = self.pool.with(|conn| {
            let removed = conn.execute(
                "DELETE FROM feedback_events WHERE created_ts < ?1",
                params![cutoff],
            )?;
            Ok(removed)
        })?;
        if removed > 0 {
            tracing::info!(removed, "expired feedback pruned");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpath_search_core::results::SearchImpression;

    fn store() -> (SqliteFeedbackStore, Arc<DbPool>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = DbPool::open(tmp.path().join("kpath.sqlite3"), 2).unwrap();
        (
            SqliteFeedbackStore::new(Arc::clone(&pool), 30, 180),
            pool,
            tmp,
        )
    }

    fn event(search_id: &str, query_hash: &str, service_ids: &[ServiceId]) -> SearchEvent {
        SearchEvent {
            search_id: search_id.to_owned(),
            query_hash: query_hash.to_owned(),
            principal_id: "p".to_owned(),
            impressions: service_ids
                .iter()
                .enumerate()
                .map(|(i, &service_id)| SearchImpression {
                    service_id,
                    rank: u32::try_from(i + 1).unwrap(),
                })
                .collect(),
            elapsed_ms: 5,
            created_ts: chrono::Utc::now().timestamp_micros(),
        }
    }

    #[test]
    fn prior_is_zero_without_feedback() {
        let (store, _pool, _tmp) = store();
        assert!(store.prior("qh", 1).unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn impressions_without_clicks_give_smoothed_low_prior() {
        let (store, _pool, _tmp) = store();
        store.record_search(&event("s1", "qh", &[1, 2])).unwrap();
        store.record_search(&event("s2", "qh", &[1])).unwrap();

        // clicks = 0, impressions = 2 → (0+1)/(2+2) = 0.25
        let prior = store.prior("qh", 1).unwrap();
        assert!((prior - 0.25).abs() < 1e-9);
    }

    #[test]
    fn selections_raise_the_prior() {
        let (store, _pool, _tmp) = store();
        store.record_search(&event("s1", "qh", &[1, 2])).unwrap();
        store.record_selection("s1", 1, 1).unwrap();

        // service 1: clicks = 1, impressions = 1 → (1+1)/(1+2) ≈ 0.667
        let chosen = store.prior("qh", 1).unwrap();
        assert!((chosen - 2.0 / 3.0).abs() < 1e-9);

        // service 2 was shown but never chosen → (0+1)/(1+2) ≈ 0.333
        let passed_over = store.prior("qh", 2).unwrap();
        assert!((passed_over - 1.0 / 3.0).abs() < 1e-9);
        assert!(chosen > passed_over);
    }

    #[test]
    fn selection_requires_known_search() {
        let (store, _pool, _tmp) = store();
        let err = store.record_selection("ghost", 1, 1).unwrap_err();
        assert_eq!(err.error_type(), "NOT_FOUND");
    }

    #[test]
    fn priors_are_scoped_per_query_hash() {
        let (store, _pool, _tmp) = store();
        store.record_search(&event("s1", "qh-a", &[1])).unwrap();
        store.record_selection("s1", 1, 1).unwrap();

        assert!(store.prior("qh-a", 1).unwrap() > 0.5);
        assert!(store.prior("qh-b", 1).unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn events_outside_window_are_ignored() {
        let (store, pool, _tmp) = store();
        let mut old = event("s1", "qh", &[1]);
        old.created_ts -= 40 * MICROS_PER_DAY; // outside the 30-day window
        store.record_search(&old).unwrap();

        assert!(store.prior("qh", 1).unwrap().abs() < f64::EPSILON);

        // Still on disk until retention catches up
        let rows: i64 = pool
            .with(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM feedback_events", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn retention_sweep_deletes_expired_rows() {
        let (store, pool, _tmp) = store();
        let mut ancient = event("s1", "qh", &[1]);
        ancient.created_ts -= 200 * MICROS_PER_DAY; // beyond 180-day retention
        store.record_search(&ancient).unwrap();
        store.record_search(&event("s2", "qh", &[2])).unwrap();

        let removed = store.prune_expired().unwrap();
        assert_eq!(removed, 1);

        let rows: i64 = pool
            .with(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM feedback_events", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }
}
