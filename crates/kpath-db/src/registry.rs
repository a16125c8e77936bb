//! The authoritative service registry
//!
//! [`SqliteRegistry`] owns service CRUD and is the only writer of service
//! rows. Every mutation bumps the service's `version_tag` and emits a
//! `ChangeEvent` to subscribers — the index manager subscribes and
//! reconciles asynchronously. Reads implement the core's
//! [`RegistrySource`] trait.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};

use kpath_core::{
    Capability, ChangeEvent, ChangeKind, ServiceId, ServiceRecord, ServiceStatus,
    VisibilityPolicy,
};
use kpath_search_core::{RegistrySource, SearchResult};

use crate::error::{DbError, DbResult};
use crate::pool::DbPool;

/// Input for creating or replacing a service.
#[derive(Debug, Clone)]
pub struct NewService {
    /// Unique human-facing name
    pub name: String,
    /// Non-empty description
    pub description: String,
    /// Lifecycle status
    pub status: ServiceStatus,
    /// Optional opaque version string
    pub version: Option<String>,
    /// Optional invocation endpoint (informational)
    pub endpoint: Option<String>,
    /// Capabilities in intended order
    pub capabilities: Vec<Capability>,
    /// Domain tags in intended order
    pub domains: Vec<String>,
    /// Visibility policy
    pub visibility: VisibilityPolicy,
}

impl NewService {
    /// Minimal constructor; everything else defaults to open/active/empty.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: ServiceStatus::Active,
            version: None,
            endpoint: None,
            capabilities: Vec::new(),
            domains: Vec::new(),
            visibility: VisibilityPolicy::Open,
        }
    }

    fn validate(&self) -> DbResult<()> {
        if self.name.trim().is_empty() {
            return Err(DbError::InvalidPolicy("service name is empty".to_owned()));
        }
        if self.description.trim().is_empty() {
            return Err(DbError::InvalidPolicy(
                "service description is empty".to_owned(),
            ));
        }
        self.visibility.validate().map_err(DbError::InvalidPolicy)
    }
}

type ChangeListener = Box<dyn Fn(ChangeEvent) + Send + Sync>;

/// SQLite-backed registry implementation.
pub struct SqliteRegistry {
    pool: Arc<DbPool>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl std::fmt::Debug for SqliteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRegistry").finish_non_exhaustive()
    }
}

impl SqliteRegistry {
    /// Wrap a pool.
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self {
            pool,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to change events. Listeners run synchronously on the
    /// mutating thread and must be cheap (the index manager's listener
    /// just enqueues).
    pub fn subscribe(&self, listener: impl Fn(ChangeEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push(Box::new(listener));
    }

    fn emit(&self, event: ChangeEvent) {
        let listeners = self.listeners.lock().expect("listener lock poisoned");
        for listener in listeners.iter() {
            listener(event.clone());
        }
    }

    /// Register a new service; returns the stored record with its assigned
    /// id and `version_tag = 1`.
    ///
    /// # Errors
    /// `InvalidPolicy` for structurally invalid input, `Conflict` for a
    /// duplicate name.
    pub fn create_service(&self, input: &NewService) -> DbResult<ServiceRecord> {
        input.validate()?;
        let now = chrono::Utc::now().timestamp_micros();
        let visibility_json = serde_json::to_string(&input.visibility)?;

        let record = self.pool.with(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO services (name, description, status, version, endpoint, visibility,
                                       version_tag, created_ts, updated_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
                params![
                    input.name,
                    input.description,
                    input.status.to_string(),
                    input.version,
                    input.endpoint,
                    visibility_json,
                    now,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Err(DbError::Conflict(format!(
                        "service name already registered: {}",
                        input.name
                    )));
                }
                Err(err) => return Err(err.into()),
            }
            let service_id = tx.last_insert_rowid();
            write_children(&tx, service_id, input)?;
            let record = load_record(&tx, service_id)?
                .ok_or_else(|| DbError::NotFound(format!("service {service_id}")))?;
            tx.commit()?;
            Ok(record)
        })?;

        tracing::info!(service_id = record.service_id, name = %record.name, "service created");
        self.emit(ChangeEvent::new(
            ChangeKind::Created,
            record.service_id,
            Some(record.version_tag),
        ));
        Ok(record)
    }

    /// Replace a service's mutable fields; bumps `version_tag`.
    ///
    /// # Errors
    /// `NotFound` when the id does not exist; `InvalidPolicy` for invalid
    /// input.
    pub fn update_service(
        &self,
        service_id: ServiceId,
        input: &NewService,
    ) -> DbResult<ServiceRecord> {
        input.validate()?;
        let now = chrono::Utc::now().timestamp_micros();
        let visibility_json = serde_json::to_string(&input.visibility)?;

        let record = self.pool.with(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE services
                 SET name = ?1, description = ?2, status = ?3, version = ?4, endpoint = ?5,
                     visibility = ?6, version_tag = version_tag + 1, updated_ts = ?7
                 WHERE id = ?8",
                params![
                    input.name,
                    input.description,
                    input.status.to_string(),
                    input.version,
                    input.endpoint,
                    visibility_json,
                    now,
                    service_id,
                ],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound(format!("service {service_id}")));
            }
            tx.execute(
                "DELETE FROM capabilities WHERE service_id = ?1",
                params![service_id],
            )?;
            tx.execute(
                "DELETE FROM domains WHERE service_id = ?1",
                params![service_id],
            )?;
            write_children(&tx, service_id, input)?;
            let record = load_record(&tx, service_id)?
                .ok_or_else(|| DbError::NotFound(format!("service {service_id}")))?;
            tx.commit()?;
            Ok(record)
        })?;

        self.emit(ChangeEvent::new(
            ChangeKind::Updated,
            service_id,
            Some(record.version_tag),
        ));
        Ok(record)
    }

    /// Transition a service's lifecycle status; bumps `version_tag`.
    ///
    /// # Errors
    /// `NotFound` when the id does not exist.
    pub fn set_status(&self, service_id: ServiceId, status: ServiceStatus) -> DbResult<i64> {
        let now = chrono::Utc::now().timestamp_micros();
        let version_tag = self.pool.with(|conn| {
            let updated = conn.execute(
                "UPDATE services
                 SET status = ?1, version_tag = version_tag + 1, updated_ts = ?2
                 WHERE id = ?3",
                params![status.to_string(), now, service_id],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound(format!("service {service_id}")));
            }
            let tag: i64 = conn.query_row(
                "SELECT version_tag FROM services WHERE id = ?1",
                params![service_id],
                |row| row.get(0),
            )?;
            Ok(tag)
        })?;

        self.emit(ChangeEvent::new(
            ChangeKind::StatusChanged,
            service_id,
            Some(version_tag),
        ));
        Ok(version_tag)
    }

    /// Delete a service outright (capabilities and domains cascade).
    ///
    /// # Errors
    /// `NotFound` when the id does not exist.
    pub fn delete_service(&self, service_id: ServiceId) -> DbResult<()> {
        self.pool.with(|conn| {
            let deleted = conn.execute("DELETE FROM services WHERE id = ?1", params![service_id])?;
            if deleted == 0 {
                return Err(DbError::NotFound(format!("service {service_id}")));
            }
            Ok(())
        })?;

        self.emit(ChangeEvent::new(ChangeKind::Deleted, service_id, None));
        Ok(())
    }

    /// Fetch one record (any status).
    ///
    /// # Errors
    /// Propagates database faults.
    pub fn get_service(&self, service_id: ServiceId) -> DbResult<Option<ServiceRecord>> {
        self.pool.with(|conn| load_record(conn, service_id))
    }
}

impl RegistrySource for SqliteRegistry {
    fn get_discoverable_services(&self) -> SearchResult<Vec<ServiceRecord>> {
        let records = self.pool.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM services WHERE status IN ('active', 'deprecated') ORDER BY id",
            )?;
            let ids: Vec<ServiceId> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            ids.iter()
                .filter_map(|&id| load_record(conn, id).transpose())
                .collect::<DbResult<Vec<_>>>()
        })?;
        Ok(records)
    }

    fn get(&self, service_id: ServiceId) -> SearchResult<Option<ServiceRecord>> {
        Ok(self.get_service(service_id)?)
    }

    fn batch_get(&self, service_ids: &[ServiceId]) -> SearchResult<Vec<ServiceRecord>> {
        let records = self.pool.with(|conn| {
            service_ids
                .iter()
                .filter_map(|&id| load_record(conn, id).transpose())
                .collect::<DbResult<Vec<_>>>()
        })?;
        Ok(records)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn write_children(conn: &Connection, service_id: ServiceId, input: &NewService) -> DbResult<()> {
    for (position, capability) in input.capabilities.iter().enumerate() {
        conn.execute(
            "INSERT INTO capabilities (service_id, name, description, input_schema,
                                       output_schema, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                service_id,
                capability.name,
                capability.description,
                capability
                    .input_schema
                    .as_ref()
                    .map(serde_json::Value::to_string),
                capability
                    .output_schema
                    .as_ref()
                    .map(serde_json::Value::to_string),
                position as i64,
            ],
        )?;
    }
    for (position, tag) in input.domains.iter().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO domains (service_id, tag, position) VALUES (?1, ?2, ?3)",
            params![service_id, tag, position as i64],
        )?;
    }
    Ok(())
}

fn load_record(conn: &Connection, service_id: ServiceId) -> DbResult<Option<ServiceRecord>> {
    let base = conn
        .query_row(
            "SELECT id, name, description, status, version, endpoint, visibility, version_tag
             FROM services WHERE id = ?1",
            params![service_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, description, status, version, endpoint, visibility_json, version_tag)) =
        base
    else {
        return Ok(None);
    };

    let status: ServiceStatus = status
        .parse()
        .map_err(|e: String| DbError::InvalidPolicy(e))?;
    let visibility: VisibilityPolicy = serde_json::from_str(&visibility_json)?;

    let mut stmt = conn.prepare(
        "SELECT name, description, input_schema, output_schema
         FROM capabilities WHERE service_id = ?1 ORDER BY position",
    )?;
    let capabilities: Vec<Capability> = stmt
        .query_map(params![id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(cap_name, cap_description, input_schema, output_schema)| {
            Ok(Capability {
                name: cap_name,
                description: cap_description,
                input_schema: input_schema
                    .map(|s| serde_json::from_str(&s))
                    .transpose()?,
                output_schema: output_schema
                    .map(|s| serde_json::from_str(&s))
                    .transpose()?,
            })
        })
        .collect::<DbResult<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT tag FROM domains WHERE service_id = ?1 ORDER BY position",
    )?;
    let domains: indexmap::IndexSet<String> = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    Ok(Some(ServiceRecord {
        service_id: id,
        name,
        description,
        status,
        version,
        endpoint,
        capabilities,
        domains,
        visibility,
        version_tag,
    }))
}
