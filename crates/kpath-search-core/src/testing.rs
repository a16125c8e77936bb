//! Deterministic in-memory doubles for the collaborator traits
//!
//! Used by this crate's tests and by downstream crates that exercise the
//! pipeline without a database.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use kpath_core::{ServiceId, ServiceRecord};

use crate::error::{SearchError, SearchResult};
use crate::results::SearchEvent;
use crate::sources::{FeedbackSource, RegistrySource};

/// In-memory registry double keyed by `service_id`.
#[derive(Default)]
pub struct InMemoryRegistry {
    services: Mutex<HashMap<ServiceId, ServiceRecord>>,
    fail_next: AtomicUsize,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn put(&self, record: ServiceRecord) {
        self.services
            .lock()
            .expect("registry lock poisoned")
            .insert(record.service_id, record);
    }

    /// Remove a record entirely.
    pub fn delete(&self, service_id: ServiceId) {
        self.services
            .lock()
            .expect("registry lock poisoned")
            .remove(&service_id);
    }

    /// Make the next `n` reads fail with `TransientDependency`.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn check_failure(&self) -> SearchResult<()> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(SearchError::TransientDependency(
                "registry scripted failure".to_owned(),
            ));
        }
        Ok(())
    }
}

impl RegistrySource for InMemoryRegistry {
    fn get_discoverable_services(&self) -> SearchResult<Vec<ServiceRecord>> {
        self.check_failure()?;
        let services = self.services.lock().expect("registry lock poisoned");
        let mut records: Vec<ServiceRecord> = services
            .values()
            .filter(|r| r.status.is_discoverable())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.service_id);
        Ok(records)
    }

    fn get(&self, service_id: ServiceId) -> SearchResult<Option<ServiceRecord>> {
        self.check_failure()?;
        Ok(self
            .services
            .lock()
            .expect("registry lock poisoned")
            .get(&service_id)
            .cloned())
    }

    fn batch_get(&self, service_ids: &[ServiceId]) -> SearchResult<Vec<ServiceRecord>> {
        self.check_failure()?;
        let services = self.services.lock().expect("registry lock poisoned");
        Ok(service_ids
            .iter()
            .filter_map(|id| services.get(id).cloned())
            .collect())
    }
}

/// In-memory feedback double with directly settable priors.
#[derive(Default)]
pub struct InMemoryFeedback {
    priors: Mutex<HashMap<(String, ServiceId), f64>>,
    events: Mutex<Vec<SearchEvent>>,
}

impl InMemoryFeedback {
    /// Create an empty feedback store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the prior for a query/service pair.
    pub fn set_prior(&self, query_hash: impl Into<String>, service_id: ServiceId, prior: f64) {
        self.priors
            .lock()
            .expect("feedback lock poisoned")
            .insert((query_hash.into(), service_id), prior);
    }

    /// All events recorded so far.
    #[must_use]
    pub fn recorded_events(&self) -> Vec<SearchEvent> {
        self.events.lock().expect("feedback lock poisoned").clone()
    }
}

impl FeedbackSource for InMemoryFeedback {
    fn prior(&self, query_hash: &str, service_id: ServiceId) -> SearchResult<f64> {
        Ok(self
            .priors
            .lock()
            .expect("feedback lock poisoned")
            .get(&(query_hash.to_owned(), service_id))
            .copied()
            .unwrap_or(0.0))
    }

    fn record_search(&self, event: &SearchEvent) -> SearchResult<()> {
        self.events
            .lock()
            .expect("feedback lock poisoned")
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpath_core::{ServiceStatus, VisibilityPolicy};

    fn record(id: ServiceId, status: ServiceStatus) -> ServiceRecord {
        ServiceRecord {
            service_id: id,
            name: format!("svc-{id}"),
            description: "does things".to_owned(),
            status,
            version: None,
            endpoint: None,
            capabilities: Vec::new(),
            domains: indexmap::IndexSet::new(),
            visibility: VisibilityPolicy::Open,
            version_tag: 1,
        }
    }

    #[test]
    fn discoverable_excludes_inactive() {
        let registry = InMemoryRegistry::new();
        registry.put(record(1, ServiceStatus::Active));
        registry.put(record(2, ServiceStatus::Inactive));
        registry.put(record(3, ServiceStatus::Deprecated));

        let ids: Vec<_> = registry
            .get_discoverable_services()
            .unwrap()
            .iter()
            .map(|r| r.service_id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn batch_get_omits_missing() {
        let registry = InMemoryRegistry::new();
        registry.put(record(1, ServiceStatus::Active));
        let got = registry.batch_get(&[1, 99]).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn scripted_failures_expire() {
        let registry = InMemoryRegistry::new();
        registry.fail_next(1);
        assert!(registry.get(1).is_err());
        assert!(registry.get(1).is_ok());
    }

    #[test]
    fn feedback_prior_defaults_to_zero() {
        let feedback = InMemoryFeedback::new();
        assert!(feedback.prior("q", 1).unwrap().abs() < f64::EPSILON);

        feedback.set_prior("q", 1, 0.4);
        assert!((feedback.prior("q", 1).unwrap() - 0.4).abs() < f64::EPSILON);
    }
}
