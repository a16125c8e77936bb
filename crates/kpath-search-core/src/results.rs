//! Search result and telemetry models

use serde::{Deserialize, Serialize};

use kpath_core::{ServiceId, ServiceRecord, ServiceStatus};

/// Public projection of a capability inside a result entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityProjection {
    /// Operation name, when the capability has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// What the operation does
    pub description: String,
}

/// Public projection of a service inside a result entry.
///
/// Deliberately omits visibility policy and version tags: nothing in a
/// response discloses who else may see a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProjection {
    /// Stable service id
    pub id: ServiceId,
    /// Unique name
    pub name: String,
    /// Human description
    pub description: String,
    /// Invocation endpoint, if registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Opaque version string, if registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Lifecycle status
    pub status: ServiceStatus,
    /// Capabilities in insertion order
    pub capabilities: Vec<CapabilityProjection>,
    /// Domain tags in insertion order
    pub domains: Vec<String>,
}

impl From<&ServiceRecord> for ServiceProjection {
    fn from(record: &ServiceRecord) -> Self {
        Self {
            id: record.service_id,
            name: record.name.clone(),
            description: record.description.clone(),
            endpoint: record.endpoint.clone(),
            version: record.version.clone(),
            status: record.status,
            capabilities: record
                .capabilities
                .iter()
                .map(|c| CapabilityProjection {
                    name: c.name.clone(),
                    description: c.description.clone(),
                })
                .collect(),
            domains: record.domains.iter().cloned().collect(),
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    /// The matched service id
    pub service_id: ServiceId,
    /// 1-based rank
    pub rank: usize,
    /// Final blended score in `[0, 1]`
    pub score: f64,
    /// Public projection of the service
    pub service: ServiceProjection,
    /// Cosine distance of the raw similarity (`1 - similarity`)
    pub distance: f64,
}

/// The full response to a discovery query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Echo of the query text
    pub query: String,
    /// Ranked results, best first
    pub results: Vec<ResultEntry>,
    /// Number of results returned
    pub total_results: usize,
    /// Wall-clock time spent serving the query
    pub search_time_ms: u64,
}

/// One shown result inside a [`SearchEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchImpression {
    /// The service shown
    pub service_id: ServiceId,
    /// 1-based rank it was shown at
    pub rank: u32,
}

/// Telemetry emitted after each successful search.
///
/// Consumed asynchronously by the feedback store as impressions; explicit
/// selections reference the `search_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEvent {
    /// Unique id for this search (selection events reference it)
    pub search_id: String,
    /// Stable hash of the normalized query
    pub query_hash: String,
    /// Who asked
    pub principal_id: String,
    /// What was shown, in rank order
    pub impressions: Vec<SearchImpression>,
    /// Wall-clock serve time
    pub elapsed_ms: u64,
    /// Event time in microseconds since epoch
    pub created_ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpath_core::{Capability, VisibilityPolicy};

    fn record() -> ServiceRecord {
        ServiceRecord {
            service_id: 5,
            name: "mailer".to_owned(),
            description: "Send email to recipients".to_owned(),
            status: ServiceStatus::Active,
            version: Some("1.0".to_owned()),
            endpoint: Some("https://mail.internal/api".to_owned()),
            capabilities: vec![Capability::named("send", "Send a message")],
            domains: ["comms"].into_iter().map(str::to_owned).collect(),
            visibility: VisibilityPolicy::Restricted {
                allowed_roles: ["Ops".to_owned()].into(),
                attribute_predicate: None,
            },
            version_tag: 4,
        }
    }

    #[test]
    fn projection_copies_public_fields() {
        let projection = ServiceProjection::from(&record());
        assert_eq!(projection.id, 5);
        assert_eq!(projection.name, "mailer");
        assert_eq!(projection.status, ServiceStatus::Active);
        assert_eq!(projection.capabilities.len(), 1);
        assert_eq!(projection.domains, vec!["comms"]);
    }

    #[test]
    fn projection_discloses_no_policy() {
        let json = serde_json::to_string(&ServiceProjection::from(&record())).unwrap();
        assert!(!json.contains("visibility"));
        assert!(!json.contains("allowed_roles"));
        assert!(!json.contains("version_tag"));
    }

    #[test]
    fn response_serde_roundtrip() {
        let response = SearchResponse {
            query: "send email".to_owned(),
            results: vec![ResultEntry {
                service_id: 5,
                rank: 1,
                score: 0.91,
                service: ServiceProjection::from(&record()),
                distance: 0.09,
            }],
            total_results: 1,
            search_time_ms: 12,
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: SearchResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_results, 1);
        assert_eq!(back.results[0].rank, 1);
        assert_eq!(back.results[0].service.name, "mailer");
    }

    #[test]
    fn search_event_serde() {
        let event = SearchEvent {
            search_id: "s-1".to_owned(),
            query_hash: "abc".to_owned(),
            principal_id: "p-1".to_owned(),
            impressions: vec![SearchImpression {
                service_id: 5,
                rank: 1,
            }],
            elapsed_ms: 3,
            created_ts: 1_700_000_000_000_000,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SearchEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.impressions.len(), 1);
        assert_eq!(back.impressions[0].rank, 1);
    }
}
