//! Principal extraction
//!
//! A request authenticates with exactly one of:
//! - `Authorization: Bearer <JWT>` (HS256, secret from configuration)
//! - `X-API-Key: <secret>` header
//! - `api_key=<secret>` query parameter
//!
//! API keys resolve through their SHA-256 hash; revoked and expired keys
//! fail closed. JWT roles come from the `roles` claim, attributes from an
//! optional `attrs` claim.

use std::collections::{BTreeMap, BTreeSet};

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use kpath_core::{AttrValue, Principal};
use kpath_search_core::{SearchError, SearchResult};

use crate::state::AppState;

/// JWT claim shape accepted by the bearer path.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id
    pub sub: String,
    /// Expiry (seconds since epoch); enforced by the decoder
    pub exp: i64,
    /// Role set
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Scalar attributes for ABAC predicates
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

/// Resolve the caller's principal, or fail with `Unauthenticated`.
///
/// # Errors
/// `Unauthenticated` when no usable credential is presented or the
/// presented one is invalid, revoked, or expired.
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_api_key: Option<&str>,
) -> SearchResult<Principal> {
    if let Some(token) = bearer_token(headers) {
        return authenticate_bearer(state, token);
    }

    let header_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    if let Some(secret) = header_key.or(query_api_key) {
        return authenticate_api_key(state, secret);
    }

    Err(SearchError::Unauthenticated(
        "no credential presented".to_owned(),
    ))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn authenticate_bearer(state: &AppState, token: &str) -> SearchResult<Principal> {
    let Some(secret) = state.config.jwt_secret.as_deref() else {
        return Err(SearchError::Unauthenticated(
            "bearer authentication is not configured".to_owned(),
        ));
    };

    let validation = Validation::new(Algorithm::HS256);
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|err| {
        tracing::debug!(%err, "jwt rejected");
        SearchError::Unauthenticated("invalid bearer token".to_owned())
    })?;

    Ok(Principal {
        principal_id: data.claims.sub,
        roles: data.claims.roles,
        attributes: data.claims.attrs,
    })
}

fn authenticate_api_key(state: &AppState, secret: &str) -> SearchResult<Principal> {
    match state.api_keys.authenticate(secret) {
        Ok(Some(principal)) => Ok(principal),
        Ok(None) => Err(SearchError::Unauthenticated(
            "unknown, revoked, or expired api key".to_owned(),
        )),
        Err(err) => Err(SearchError::TransientDependency(err.to_string())),
    }
}

/// Whether the principal holds the configured admin role.
#[must_use]
pub fn is_admin(state: &AppState, principal: &Principal) -> bool {
    principal.roles.contains(&state.config.admin_role)
}
