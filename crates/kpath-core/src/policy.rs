//! Row-level visibility evaluation
//!
//! [`PolicyEvaluator`] decides whether a principal may see a service in
//! search results. It is a pure function of its inputs: no I/O, no clock,
//! no allocation beyond what the predicate walk needs. Predicate
//! compilation errors belong to policy writes and never reach this path.

use crate::model::{Principal, ServiceRecord, VisibilityPolicy};

/// Decides service visibility for a principal (RBAC by role set, ABAC by
/// attribute predicate).
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    admin_role: String,
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new("admin")
    }
}

impl PolicyEvaluator {
    /// Create an evaluator with the given distinguished admin role.
    #[must_use]
    pub fn new(admin_role: impl Into<String>) -> Self {
        Self {
            admin_role: admin_role.into(),
        }
    }

    /// The role that bypasses restriction checks.
    #[must_use]
    pub fn admin_role(&self) -> &str {
        &self.admin_role
    }

    /// Whether `principal` may see `service` in search results.
    ///
    /// - `Open` policies admit everyone.
    /// - `Restricted` policies require a non-empty role intersection AND
    ///   (when present) a satisfied attribute predicate.
    /// - The admin role bypasses restriction checks entirely.
    #[must_use]
    pub fn visible(&self, principal: &Principal, service: &ServiceRecord) -> bool {
        match &service.visibility {
            VisibilityPolicy::Open => true,
            VisibilityPolicy::Restricted {
                allowed_roles,
                attribute_predicate,
            } => {
                if principal.roles.contains(&self.admin_role) {
                    return true;
                }
                let role_match = principal.roles.iter().any(|r| allowed_roles.contains(r));
                if !role_match {
                    return false;
                }
                attribute_predicate
                    .as_ref()
                    .is_none_or(|pred| pred.evaluate(&principal.attributes))
            }
        }
    }
}
