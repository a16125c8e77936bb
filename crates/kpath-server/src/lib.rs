//! HTTP surface and runtime wiring for KPATH
//!
//! - [`state`] — shared application state handed to every handler
//! - [`auth`] — principal extraction from JWTs and API keys
//! - [`routes`] — the `/api/v1` router and error → status mapping
//! - [`bootstrap`] — one-call construction of the whole stack (pool,
//!   registry, embedder, index manager, worker thread)

#![forbid(unsafe_code)]

pub mod auth;
pub mod bootstrap;
pub mod routes;
pub mod state;

pub use bootstrap::{Runtime, build_runtime};
pub use routes::router;
pub use state::AppState;
