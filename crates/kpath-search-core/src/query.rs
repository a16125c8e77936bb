//! Search request model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{SearchError, SearchResult};

/// A discovery query as it arrives on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Natural-language prompt
    pub query: String,
    /// Requested result count (`1..=max_k`); server default applies when
    /// absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Minimum final score; results below are dropped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Required domain tags (case-insensitive; empty = no constraint)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub domains: BTreeSet<String>,
    /// Required capability names (case-insensitive; empty = no constraint)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<String>,
}

impl SearchRequest {
    /// Create a request with defaults for everything but the query.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Builder: set the result count.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder: set the score floor.
    #[must_use]
    pub const fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Builder: require a domain tag.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.insert(domain.into());
        self
    }

    /// Builder: require a capability name.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Validate and resolve `(k, min_score)` against configured bounds.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for an empty query, out-of-range `k`, or a
    /// score floor outside `[0, 1]`.
    pub fn validate(&self, default_k: usize, max_k: usize) -> SearchResult<(usize, f64)> {
        if self.query.trim().is_empty() {
            return Err(SearchError::InvalidRequest("query is empty".to_owned()));
        }
        let k = self.limit.unwrap_or(default_k);
        if k == 0 || k > max_k {
            return Err(SearchError::InvalidRequest(format!(
                "limit {k} out of range 1..={max_k}"
            )));
        }
        let min_score = self.min_score.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&min_score) {
            return Err(SearchError::InvalidRequest(format!(
                "min_score {min_score} outside [0, 1]"
            )));
        }
        Ok((k, min_score))
    }
}
