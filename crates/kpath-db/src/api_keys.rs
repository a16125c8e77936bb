//! API key storage and lookup
//!
//! Keys are never stored in the clear: the table holds the SHA-256 of the
//! presented secret. Lookup resolves a secret to a [`Principal`] and
//! touches `last_used_ts`; revoked and expired keys resolve to nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};

use kpath_core::{AttrValue, Principal};

use crate::error::{DbError, DbResult};
use crate::pool::DbPool;

/// SHA-256 hex digest of a presented API key secret.
#[must_use]
pub fn hash_api_key(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Stored metadata about one API key (the secret itself is gone forever).
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    /// Row id
    pub id: i64,
    /// The principal this key authenticates as
    pub principal_id: String,
    /// Roles granted to the principal
    pub roles: BTreeSet<String>,
    /// Whether the key has been revoked
    pub revoked: bool,
    /// Expiry in micros since epoch, if any
    pub expires_ts: Option<i64>,
}

/// SQLite-backed API key store.
pub struct ApiKeyStore {
    pool: Arc<DbPool>,
}

impl std::fmt::Debug for ApiKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyStore").finish_non_exhaustive()
    }
}

impl ApiKeyStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Mint a new key for a principal. Returns `(record, secret)` — the
    /// only time the secret is ever available.
    ///
    /// # Errors
    /// Propagates database faults.
    pub fn create_key(
        &self,
        principal_id: &str,
        roles: &BTreeSet<String>,
        attributes: &BTreeMap<String, AttrValue>,
        expires_ts: Option<i64>,
    ) -> DbResult<(ApiKeyRecord, String)> {
        let secret = format!("kp_{}", uuid::Uuid::new_v4().simple());
        let key_hash = hash_api_key(&secret);
        let now = chrono::Utc::now().timestamp_micros();
        let roles_json = serde_json::to_string(roles)?;
        let attributes_json = serde_json::to_string(attributes)?;

        let id = self.pool.with(|conn| {
            conn.execute(
                "INSERT INTO api_keys
                     (key_hash, principal_id, roles, attributes, revoked, expires_ts, created_ts)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                params![key_hash, principal_id, roles_json, attributes_json, expires_ts, now],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        tracing::info!(principal_id, key_id = id, "api key created");
        Ok((
            ApiKeyRecord {
                id,
                principal_id: principal_id.to_owned(),
                roles: roles.clone(),
                revoked: false,
                expires_ts,
            },
            secret,
        ))
    }

    /// Resolve a presented secret to a principal.
    ///
    /// Returns `None` for unknown, revoked, or expired keys. A successful
    /// lookup records `last_used_ts`.
    ///
    /// # Errors
    /// Propagates database faults.
    pub fn authenticate(&self, secret: &str) -> DbResult<Option<Principal>> {
        let key_hash = hash_api_key(secret);
        let now = chrono::Utc::now().timestamp_micros();

        self.pool.with(|conn| {
            let row: Option<(i64, String, String, String, bool, Option<i64>)> = conn
                .query_row(
                    "SELECT id, principal_id, roles, attributes, revoked, expires_ts
                     FROM api_keys WHERE key_hash = ?1",
                    params![key_hash],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, principal_id, roles_json, attributes_json, revoked, expires_ts)) = row
            else {
                return Ok(None);
            };
            if revoked {
                return Ok(None);
            }
            if expires_ts.is_some_and(|expiry| expiry <= now) {
                return Ok(None);
            }

            conn.execute(
                "UPDATE api_keys SET last_used_ts = ?1 WHERE id = ?2",
                params![now, id],
            )?;

            let roles: BTreeSet<String> = serde_json::from_str(&roles_json)?;
            let attributes: BTreeMap<String, AttrValue> =
                serde_json::from_str(&attributes_json)?;
            Ok(Some(Principal {
                principal_id,
                roles,
                attributes,
            }))
        })
    }

    /// Revoke a key by id.
    ///
    /// # Errors
    /// `NotFound` when no key has that id.
    pub fn revoke(&self, key_id: i64) -> DbResult<()> {
        self.pool.with(|conn| {
            let updated = conn.execute(
                "UPDATE api_keys SET revoked = 1 WHERE id = ?1",
                params![key_id],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound(format!("api key {key_id}")));
            }
            Ok(())
        })
    }
}
