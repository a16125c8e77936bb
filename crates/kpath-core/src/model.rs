//! Data model for KPATH discovery
//!
//! Services are the unit of discovery. Each service carries a description,
//! zero or more capabilities and domain tags, and an optional visibility
//! policy evaluated against the querying principal.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable integer identity of a service; never reused.
pub type ServiceId = i64;

// ────────────────────────────────────────────────────────────────────
// Service records
// ────────────────────────────────────────────────────────────────────

/// Lifecycle status of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Fully discoverable
    Active,
    /// Withdrawn from discovery entirely
    Inactive,
    /// Still discoverable, ranked below active equivalents
    Deprecated,
}

impl ServiceStatus {
    /// Whether services in this status participate in retrieval at all.
    ///
    /// Deprecated services remain in the index so callers can still find
    /// them (at a rank penalty); only `Inactive` drops a service from the
    /// index outright.
    #[must_use]
    pub const fn is_discoverable(self) -> bool {
        matches!(self, Self::Active | Self::Deprecated)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(format!("unknown service status: {other}")),
        }
    }
}

/// A discrete operation a service offers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Short operation name (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// What the operation does; feeds the embedding text
    pub description: String,
    /// JSON schema of the operation input (opaque to the core)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// JSON schema of the operation output (opaque to the core)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

impl Capability {
    /// Create a capability with just a description.
    #[must_use]
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            name: None,
            description: description.into(),
            input_schema: None,
            output_schema: None,
        }
    }

    /// Create a named capability.
    #[must_use]
    pub fn named(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: description.into(),
            input_schema: None,
            output_schema: None,
        }
    }
}

/// The authoritative record of a discoverable service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Stable identity, never reused
    pub service_id: ServiceId,
    /// Unique human-facing name
    pub name: String,
    /// Non-empty description; primary embedding text
    pub description: String,
    /// Lifecycle status
    pub status: ServiceStatus,
    /// Optional opaque version string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Optional invocation endpoint (informational only; never called)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Discrete operations, in insertion order
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Domain tags, insertion order preserved
    #[serde(default)]
    pub domains: IndexSet<String>,
    /// Who may see this service in results
    #[serde(default)]
    pub visibility: VisibilityPolicy,
    /// Monotonically increasing per-service revision counter
    pub version_tag: i64,
}

impl ServiceRecord {
    /// Case-insensitive check that this record carries every requested
    /// capability name.
    #[must_use]
    pub fn has_capabilities(&self, wanted: &BTreeSet<String>) -> bool {
        wanted.iter().all(|w| {
            self.capabilities.iter().any(|c| {
                c.name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(w))
            })
        })
    }

    /// Case-insensitive check that this record carries every requested
    /// domain tag.
    #[must_use]
    pub fn has_domains(&self, wanted: &BTreeSet<String>) -> bool {
        wanted
            .iter()
            .all(|w| self.domains.iter().any(|d| d.eq_ignore_ascii_case(w)))
    }
}

// ────────────────────────────────────────────────────────────────────
// Visibility policies and predicates
// ────────────────────────────────────────────────────────────────────

/// Row-level visibility rule attached to a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityPolicy {
    /// Visible to every principal
    #[default]
    Open,
    /// Visible only to principals holding one of the allowed roles and
    /// (when present) satisfying the attribute predicate
    Restricted {
        /// Roles granting visibility; non-empty
        allowed_roles: BTreeSet<String>,
        /// Optional ABAC predicate over principal attributes
        #[serde(skip_serializing_if = "Option::is_none")]
        attribute_predicate: Option<Predicate>,
    },
}

impl VisibilityPolicy {
    /// True when the policy admits every principal.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Validate a policy at write time.
    ///
    /// # Errors
    /// Returns a human-readable reason when the policy is structurally
    /// invalid (empty role set, malformed predicate).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Open => Ok(()),
            Self::Restricted {
                allowed_roles,
                attribute_predicate,
            } => {
                if allowed_roles.is_empty() {
                    return Err("restricted policy requires at least one role".to_owned());
                }
                if let Some(pred) = attribute_predicate {
                    pred.validate()?;
                }
                Ok(())
            }
        }
    }
}

/// Scalar attribute value carried by a principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// String attribute
    String(String),
    /// Numeric attribute
    Number(f64),
    /// Boolean attribute
    Bool(bool),
}

impl AttrValue {
    /// Numeric view, when this value is a number.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Numeric comparison operator for [`Predicate::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    /// Strictly less than
    Lt,
    /// Less than or equal
    Le,
    /// Strictly greater than
    Gt,
    /// Greater than or equal
    Ge,
}

impl CmpOp {
    /// Apply the comparison.
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// Closed attribute-predicate mini-language.
///
/// Boolean combinations of equality, set membership, and numeric
/// comparison over principal attributes. Evaluation is total: an unknown
/// attribute or a type mismatch evaluates to `false`, never to an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// `attributes[attribute] == value`
    Eq {
        /// Attribute name
        attribute: String,
        /// Expected value
        value: AttrValue,
    },
    /// `attributes[attribute] ∈ values`
    In {
        /// Attribute name
        attribute: String,
        /// Accepted values; non-empty
        values: Vec<AttrValue>,
    },
    /// Numeric comparison `attributes[attribute] <op> value`
    Cmp {
        /// Attribute name
        attribute: String,
        /// Comparison operator
        op: CmpOp,
        /// Right-hand side
        value: f64,
    },
    /// Conjunction; non-empty
    All {
        /// Sub-predicates, all of which must hold
        clauses: Vec<Predicate>,
    },
    /// Disjunction; non-empty
    Any {
        /// Sub-predicates, at least one of which must hold
        clauses: Vec<Predicate>,
    },
    /// Negation
    Not {
        /// The negated sub-predicate
        clause: Box<Predicate>,
    },
}

impl Predicate {
    /// Validate predicate structure at policy-write time.
    ///
    /// # Errors
    /// Returns a human-readable reason for the first structural problem
    /// found (empty attribute name, empty clause list, non-finite bound).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Eq { attribute, .. } => {
                if attribute.is_empty() {
                    return Err("eq predicate requires an attribute name".to_owned());
                }
                Ok(())
            }
            Self::In { attribute, values } => {
                if attribute.is_empty() {
                    return Err("in predicate requires an attribute name".to_owned());
                }
                if values.is_empty() {
                    return Err("in predicate requires at least one value".to_owned());
                }
                Ok(())
            }
            Self::Cmp {
                attribute, value, ..
            } => {
                if attribute.is_empty() {
                    return Err("cmp predicate requires an attribute name".to_owned());
                }
                if !value.is_finite() {
                    return Err("cmp predicate bound must be finite".to_owned());
                }
                Ok(())
            }
            Self::All { clauses } | Self::Any { clauses } => {
                if clauses.is_empty() {
                    return Err("boolean predicate requires at least one clause".to_owned());
                }
                clauses.iter().try_for_each(Self::validate)
            }
            Self::Not { clause } => clause.validate(),
        }
    }

    /// Evaluate against a principal's attribute map.
    ///
    /// Unknown attributes and type mismatches evaluate to `false`.
    #[must_use]
    pub fn evaluate(&self, attributes: &BTreeMap<String, AttrValue>) -> bool {
        match self {
            Self::Eq { attribute, value } => {
                attributes.get(attribute).is_some_and(|got| got == value)
            }
            Self::In { attribute, values } => attributes
                .get(attribute)
                .is_some_and(|got| values.contains(got)),
            Self::Cmp {
                attribute,
                op,
                value,
            } => attributes
                .get(attribute)
                .and_then(AttrValue::as_number)
                .is_some_and(|lhs| op.apply(lhs, *value)),
            Self::All { clauses } => clauses.iter().all(|c| c.evaluate(attributes)),
            Self::Any { clauses } => clauses.iter().any(|c| c.evaluate(attributes)),
            Self::Not { clause } => !clause.evaluate(attributes),
        }
    }
}

// ────────────────────────────────────────────────────────────────────
// Principals
// ────────────────────────────────────────────────────────────────────

/// Identity and authorization context of a query caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Opaque caller identifier
    pub principal_id: String,
    /// Role set used for RBAC checks
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Scalar attributes used for ABAC predicates
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Principal {
    /// Create a principal with roles and no attributes.
    #[must_use]
    pub fn with_roles<I, S>(principal_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal_id: principal_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder: attach an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// ────────────────────────────────────────────────────────────────────
// Change events and feedback
// ────────────────────────────────────────────────────────────────────

/// What happened to a service in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new service was registered
    Created,
    /// An existing service's record changed
    Updated,
    /// The service was deleted
    Deleted,
    /// Only the lifecycle status changed
    StatusChanged,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::StatusChanged => write!(f, "status_changed"),
        }
    }
}

/// A registry mutation the index must reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened
    pub kind: ChangeKind,
    /// Which service
    pub service_id: ServiceId,
    /// The revision after the mutation (absent for deletions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_tag: Option<i64>,
}

impl ChangeEvent {
    /// Convenience constructor.
    #[must_use]
    pub const fn new(kind: ChangeKind, service_id: ServiceId, version_tag: Option<i64>) -> Self {
        Self {
            kind,
            service_id,
            version_tag,
        }
    }
}

/// A recorded impression or selection from the search surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Stable hash of the normalized query text
    pub query_hash: String,
    /// The service shown or chosen
    pub service_id: ServiceId,
    /// 1-based rank at which the service was shown
    pub rank_position: u32,
    /// Whether the caller selected this result
    pub selected: bool,
    /// Event time in microseconds since epoch
    pub created_ts: i64,
}

// ────────────────────────────────────────────────────────────────────
// Per-service indexing state
// ────────────────────────────────────────────────────────────────────

/// Lifecycle of a service inside the index manager.
///
/// `absent → pending → indexed → (stale | unindexable | removed)`; only
/// `indexed` services are eligible for retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingState {
    /// Never seen by the index manager
    Absent,
    /// Awaiting (re-)embedding
    Pending,
    /// Embedded at the current version tag; retrievable
    Indexed,
    /// Indexed at an older version tag; re-embedding scheduled
    Stale,
    /// Embedding permanently failed for the current text
    Unindexable,
    /// Deleted or withdrawn from discovery
    Removed,
}

impl IndexingState {
    /// Only `indexed` services are served from the query path.
    #[must_use]
    pub const fn is_retrievable(self) -> bool {
        matches!(self, Self::Indexed)
    }
}

impl std::fmt::Display for IndexingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Pending => write!(f, "pending"),
            Self::Indexed => write!(f, "indexed"),
            Self::Stale => write!(f, "stale"),
            Self::Unindexable => write!(f, "unindexable"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttrValue)]) -> BTreeMap<String, AttrValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn sample_record() -> ServiceRecord {
        ServiceRecord {
            service_id: 7,
            name: "calendar".to_owned(),
            description: "Schedule meetings on the corporate calendar".to_owned(),
            status: ServiceStatus::Active,
            version: Some("2.1".to_owned()),
            endpoint: None,
            capabilities: vec![
                Capability::named("create_event", "Create a calendar event"),
                Capability::named("list_events", "List upcoming events"),
            ],
            domains: ["productivity", "calendar"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            visibility: VisibilityPolicy::Open,
            version_tag: 3,
        }
    }

    // ── ServiceStatus ───────────────────────────────────────────────────

    #[test]
    fn status_discoverability() {
        assert!(ServiceStatus::Active.is_discoverable());
        assert!(ServiceStatus::Deprecated.is_discoverable());
        assert!(!ServiceStatus::Inactive.is_discoverable());
    }

    #[test]
    fn status_display_and_parse_roundtrip() {
        for status in [
            ServiceStatus::Active,
            ServiceStatus::Inactive,
            ServiceStatus::Deprecated,
        ] {
            let parsed: ServiceStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("weird".parse::<ServiceStatus>().is_err());
    }

    #[test]
    fn status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Deprecated).unwrap(),
            "\"deprecated\""
        );
    }

    // ── ServiceRecord filters ───────────────────────────────────────────

    #[test]
    fn has_capabilities_case_insensitive() {
        let record = sample_record();
        let wanted: BTreeSet<String> = ["CREATE_EVENT".to_owned()].into();
        assert!(record.has_capabilities(&wanted));

        let missing: BTreeSet<String> = ["delete_event".to_owned()].into();
        assert!(!record.has_capabilities(&missing));
    }

    #[test]
    fn has_domains_case_insensitive() {
        let record = sample_record();
        let wanted: BTreeSet<String> = ["Calendar".to_owned()].into();
        assert!(record.has_domains(&wanted));

        let missing: BTreeSet<String> = ["travel".to_owned()].into();
        assert!(!record.has_domains(&missing));
    }

    #[test]
    fn empty_filters_always_match() {
        let record = sample_record();
        assert!(record.has_capabilities(&BTreeSet::new()));
        assert!(record.has_domains(&BTreeSet::new()));
    }

    #[test]
    fn service_record_serde_roundtrip() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: ServiceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.service_id, record.service_id);
        assert_eq!(back.name, record.name);
        assert_eq!(back.version_tag, record.version_tag);
        assert_eq!(back.domains, record.domains);
    }

    // ── VisibilityPolicy validation ─────────────────────────────────────

    #[test]
    fn open_policy_validates() {
        assert!(VisibilityPolicy::Open.validate().is_ok());
    }

    #[test]
    fn restricted_policy_requires_roles() {
        let policy = VisibilityPolicy::Restricted {
            allowed_roles: BTreeSet::new(),
            attribute_predicate: None,
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn restricted_policy_validates_predicate() {
        let policy = VisibilityPolicy::Restricted {
            allowed_roles: ["ops".to_owned()].into(),
            attribute_predicate: Some(Predicate::In {
                attribute: "region".to_owned(),
                values: Vec::new(),
            }),
        };
        assert!(policy.validate().is_err());
    }

    // ── Predicate evaluation ────────────────────────────────────────────

    #[test]
    fn eq_predicate() {
        let pred = Predicate::Eq {
            attribute: "team".to_owned(),
            value: "platform".into(),
        };
        assert!(pred.evaluate(&attrs(&[("team", "platform".into())])));
        assert!(!pred.evaluate(&attrs(&[("team", "sales".into())])));
    }

    #[test]
    fn unknown_attribute_is_false() {
        let pred = Predicate::Eq {
            attribute: "clearance".to_owned(),
            value: "secret".into(),
        };
        assert!(!pred.evaluate(&BTreeMap::new()));
    }

    #[test]
    fn in_predicate() {
        let pred = Predicate::In {
            attribute: "region".to_owned(),
            values: vec!["eu".into(), "us".into()],
        };
        assert!(pred.evaluate(&attrs(&[("region", "eu".into())])));
        assert!(!pred.evaluate(&attrs(&[("region", "apac".into())])));
    }

    #[test]
    fn cmp_predicate_requires_number() {
        let pred = Predicate::Cmp {
            attribute: "level".to_owned(),
            op: CmpOp::Ge,
            value: 5.0,
        };
        assert!(pred.evaluate(&attrs(&[("level", 7.0.into())])));
        assert!(!pred.evaluate(&attrs(&[("level", 3.0.into())])));
        // Type mismatch: string where a number is expected
        assert!(!pred.evaluate(&attrs(&[("level", "seven".into())])));
    }

    #[test]
    fn cmp_operators() {
        assert!(CmpOp::Lt.apply(1.0, 2.0));
        assert!(CmpOp::Le.apply(2.0, 2.0));
        assert!(CmpOp::Gt.apply(3.0, 2.0));
        assert!(CmpOp::Ge.apply(2.0, 2.0));
        assert!(!CmpOp::Lt.apply(2.0, 2.0));
    }

    #[test]
    fn boolean_combinators() {
        let pred = Predicate::All {
            clauses: vec![
                Predicate::Eq {
                    attribute: "team".to_owned(),
                    value: "platform".into(),
                },
                Predicate::Any {
                    clauses: vec![
                        Predicate::Cmp {
                            attribute: "level".to_owned(),
                            op: CmpOp::Ge,
                            value: 5.0,
                        },
                        Predicate::Eq {
                            attribute: "oncall".to_owned(),
                            value: true.into(),
                        },
                    ],
                },
            ],
        };

        let both = attrs(&[("team", "platform".into()), ("oncall", true.into())]);
        assert!(pred.evaluate(&both));

        let wrong_team = attrs(&[("team", "sales".into()), ("oncall", true.into())]);
        assert!(!pred.evaluate(&wrong_team));
    }

    #[test]
    fn not_predicate() {
        let pred = Predicate::Not {
            clause: Box::new(Predicate::Eq {
                attribute: "banned".to_owned(),
                value: true.into(),
            }),
        };
        assert!(pred.evaluate(&BTreeMap::new()));
        assert!(!pred.evaluate(&attrs(&[("banned", true.into())])));
    }

    // ── Predicate validation ────────────────────────────────────────────

    #[test]
    fn validate_rejects_empty_attribute() {
        let pred = Predicate::Eq {
            attribute: String::new(),
            value: "x".into(),
        };
        assert!(pred.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_clause_list() {
        assert!(Predicate::All { clauses: vec![] }.validate().is_err());
        assert!(Predicate::Any { clauses: vec![] }.validate().is_err());
    }

    #[test]
    fn validate_rejects_nan_bound() {
        let pred = Predicate::Cmp {
            attribute: "level".to_owned(),
            op: CmpOp::Lt,
            value: f64::NAN,
        };
        assert!(pred.validate().is_err());
    }

    #[test]
    fn validate_recurses() {
        let pred = Predicate::Not {
            clause: Box::new(Predicate::In {
                attribute: "region".to_owned(),
                values: Vec::new(),
            }),
        };
        assert!(pred.validate().is_err());
    }

    #[test]
    fn predicate_serde_roundtrip() {
        let pred = Predicate::Any {
            clauses: vec![
                Predicate::Eq {
                    attribute: "team".to_owned(),
                    value: "platform".into(),
                },
                Predicate::Cmp {
                    attribute: "level".to_owned(),
                    op: CmpOp::Gt,
                    value: 3.0,
                },
            ],
        };
        let json = serde_json::to_string(&pred).unwrap();
        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert!(back.validate().is_ok());
        assert!(back.evaluate(&attrs(&[("level", 4.0.into())])));
    }

    // ── Principal ───────────────────────────────────────────────────────

    #[test]
    fn principal_builder() {
        let p = Principal::with_roles("agent-1", ["Engineering", "TravelDept"])
            .with_attribute("level", 6.0);
        assert_eq!(p.principal_id, "agent-1");
        assert!(p.roles.contains("Engineering"));
        assert_eq!(p.attributes["level"].as_number(), Some(6.0));
    }

    // ── ChangeEvent / FeedbackEvent ─────────────────────────────────────

    #[test]
    fn change_event_serde() {
        let event = ChangeEvent::new(ChangeKind::Updated, 42, Some(9));
        let json = serde_json::to_string(&event).unwrap();
        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ChangeKind::Updated);
        assert_eq!(back.service_id, 42);
        assert_eq!(back.version_tag, Some(9));
    }

    #[test]
    fn change_event_delete_omits_version() {
        let event = ChangeEvent::new(ChangeKind::Deleted, 1, None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("version_tag"));
    }

    #[test]
    fn change_kind_display() {
        assert_eq!(ChangeKind::StatusChanged.to_string(), "status_changed");
        assert_eq!(ChangeKind::Created.to_string(), "created");
    }

    // ── IndexingState ───────────────────────────────────────────────────

    #[test]
    fn only_indexed_is_retrievable() {
        for state in [
            IndexingState::Absent,
            IndexingState::Pending,
            IndexingState::Stale,
            IndexingState::Unindexable,
            IndexingState::Removed,
        ] {
            assert!(!state.is_retrievable(), "{state} must not be retrievable");
        }
        assert!(IndexingState::Indexed.is_retrievable());
    }

    #[test]
    fn indexing_state_display() {
        assert_eq!(IndexingState::Unindexable.to_string(), "unindexable");
        assert_eq!(IndexingState::Pending.to_string(), "pending");
    }
}
