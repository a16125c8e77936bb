//! SQLite persistence for KPATH
//!
//! The authoritative registry (services, capabilities, domains, visibility
//! policies), the append-only feedback log, and hashed API keys all live in
//! one SQLite database accessed through a small connection pool.
//!
//! [`SqliteRegistry`] implements the core's `RegistrySource` trait and
//! emits `ChangeEvent`s to subscribers on every mutation;
//! [`SqliteFeedbackStore`] implements `FeedbackSource`.

#![forbid(unsafe_code)]

pub mod api_keys;
pub mod error;
pub mod feedback;
pub mod pool;
pub mod registry;
pub mod schema;

pub use api_keys::{ApiKeyRecord, ApiKeyStore, hash_api_key};
pub use error::{DbError, DbResult};
pub use feedback::SqliteFeedbackStore;
pub use pool::{DbPool, PooledConnection};
pub use registry::{NewService, SqliteRegistry};
