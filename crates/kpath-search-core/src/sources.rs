//! Collaborator traits for the registry and feedback store
//!
//! The discovery core never talks to a database directly; the persistence
//! layer implements these narrow traits. Tests supply deterministic
//! in-memory doubles (see [`crate::testing`]).

use kpath_core::{ServiceId, ServiceRecord};

use crate::error::SearchResult;
use crate::results::SearchEvent;

/// Read-only view of the authoritative service registry.
///
/// "Discoverable" means status `active` or `deprecated`; `inactive`
/// services are invisible to the index and the query path.
pub trait RegistrySource: Send + Sync {
    /// All discoverable services (cold build and rebuild input).
    ///
    /// # Errors
    /// Returns `TransientDependency` on data access failures.
    fn get_discoverable_services(&self) -> SearchResult<Vec<ServiceRecord>>;

    /// A single service by id, regardless of status.
    ///
    /// # Errors
    /// Returns `TransientDependency` on data access failures.
    fn get(&self, service_id: ServiceId) -> SearchResult<Option<ServiceRecord>>;

    /// Fetch a batch of services by id; missing ids are silently omitted.
    ///
    /// # Errors
    /// Returns `TransientDependency` on data access failures.
    fn batch_get(&self, service_ids: &[ServiceId]) -> SearchResult<Vec<ServiceRecord>>;
}

/// Append-only feedback store exposing per-(query, service) priors.
pub trait FeedbackSource: Send + Sync {
    /// Smoothed click-through prior in `[0, 1]` for a query/service pair;
    /// `0` when no feedback exists.
    ///
    /// # Errors
    /// Returns `TransientDependency` on data access failures.
    fn prior(&self, query_hash: &str, service_id: ServiceId) -> SearchResult<f64>;

    /// Record a search's impressions for later prior computation.
    ///
    /// # Errors
    /// Returns `TransientDependency` on data access failures.
    fn record_search(&self, event: &SearchEvent) -> SearchResult<()>;

    /// Delete feedback older than the retention window. Returns the number
    /// of rows removed.
    ///
    /// # Errors
    /// Returns `TransientDependency` on data access failures.
    fn prune_expired(&self) -> SearchResult<usize> {
        Ok(0)
    }
}
