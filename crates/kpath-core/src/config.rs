//! Configuration management for KPATH
//!
//! Configuration is loaded from `KPATH_*` environment variables into a
//! [`Config`] struct once at startup. Every field has a default so a bare
//! environment yields a runnable development configuration; validation
//! failures are [`ConfigError`]s raised before the server accepts traffic.

use std::env;
use std::path::PathBuf;

use crate::error::{ConfigError, ConfigResult};

/// Which vector index backend to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// Brute-force cosine over all vectors; fine below ~10k entries
    #[default]
    Exact,
    /// Inverted-file ANN: coarse centroids + probed posting lists
    Ivf,
    /// Hierarchical navigable small world graph ANN
    Hnsw,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Ivf => write!(f, "ivf"),
            Self::Hnsw => write!(f, "hnsw"),
        }
    }
}

impl std::str::FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "ivf" => Ok(Self::Ivf),
            "hnsw" => Ok(Self::Hnsw),
            other => Err(format!("unknown index kind: {other}")),
        }
    }
}

/// Main configuration struct for the KPATH service.
#[derive(Debug, Clone)]
pub struct Config {
    // Embedding
    /// Embedding model identifier (`M`); baked into snapshots
    pub embedding_model: String,
    /// Embedding dimension (`D`); must match the model
    pub embedding_dimension: usize,

    // Index
    /// Vector index backend
    pub index_kind: IndexKind,
    /// IVF: number of coarse centroids
    pub ivf_nlist: usize,
    /// IVF: posting lists probed per query
    pub ivf_nprobe: usize,
    /// HNSW: max connections per node
    pub hnsw_max_connections: usize,
    /// HNSW: construction beam width
    pub hnsw_ef_construction: usize,
    /// HNSW: search beam width
    pub hnsw_ef_search: usize,
    /// Directory holding vector snapshots
    pub snapshot_dir: PathBuf,
    /// Snapshot after this many applied changes
    pub snapshot_every_changes: usize,
    /// Snapshot after this many seconds without changes
    pub snapshot_quiescence_seconds: u64,
    /// Bound on the pending change queue
    pub change_queue_capacity: usize,

    // Search
    /// Result count when the request does not specify one
    pub search_default_k: usize,
    /// Upper bound on requested result counts
    pub search_max_k: usize,
    /// Over-fetch multiplier for post-filter headroom
    pub search_oversample_factor: usize,
    /// Similarity weight in the rerank blend
    pub search_alpha: f64,
    /// Feedback-prior weight in the rerank blend
    pub search_beta: f64,
    /// Rank multiplier applied to deprecated services
    pub deprecated_multiplier: f64,
    /// Per-search deadline in milliseconds
    pub search_default_timeout_ms: u64,

    // Feedback
    /// Days of feedback contributing to priors
    pub feedback_window_days: u32,
    /// Days after which feedback events are pruned
    pub feedback_retention_days: u32,

    // Policy
    /// Role that bypasses restriction checks
    pub admin_role: String,

    // Persistence
    /// Path of the SQLite database file
    pub database_path: PathBuf,
    /// Connections kept in the pool
    pub database_pool_size: usize,

    // HTTP
    /// Bind host
    pub http_host: String,
    /// Bind port
    pub http_port: u16,
    /// HMAC secret for bearer JWTs; bearer auth disabled when unset
    pub jwt_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_model: "all-MiniLM-L6-v2".to_owned(),
            embedding_dimension: 384,
            index_kind: IndexKind::Exact,
            ivf_nlist: 64,
            ivf_nprobe: 8,
            hnsw_max_connections: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            snapshot_dir: PathBuf::from("./data/snapshots"),
            snapshot_every_changes: 500,
            snapshot_quiescence_seconds: 60,
            change_queue_capacity: 10_000,
            search_default_k: 10,
            search_max_k: 100,
            search_oversample_factor: 3,
            search_alpha: 0.85,
            search_beta: 0.15,
            deprecated_multiplier: 0.5,
            search_default_timeout_ms: 2_000,
            feedback_window_days: 30,
            feedback_retention_days: 180,
            admin_role: "admin".to_owned(),
            database_path: PathBuf::from("./data/kpath.sqlite3"),
            database_pool_size: 8,
            http_host: "127.0.0.1".to_owned(),
            http_port: 8000,
            jwt_secret: None,
        }
    }
}

impl Config {
    /// Load configuration from `KPATH_*` environment variables.
    ///
    /// Unset variables fall back to defaults; set-but-unparseable values
    /// fall back too (with a warning) so a typo cannot take the service
    /// down. Cross-field consistency is checked by [`Config::validate`].
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            embedding_model: env_string("KPATH_EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_dimension: env_usize(
                "KPATH_EMBEDDING_DIMENSION",
                defaults.embedding_dimension,
            ),
            index_kind: env_parse("KPATH_INDEX_KIND", defaults.index_kind),
            ivf_nlist: env_usize("KPATH_INDEX_IVF_NLIST", defaults.ivf_nlist),
            ivf_nprobe: env_usize("KPATH_INDEX_IVF_NPROBE", defaults.ivf_nprobe),
            hnsw_max_connections: env_usize(
                "KPATH_INDEX_HNSW_MAX_CONNECTIONS",
                defaults.hnsw_max_connections,
            ),
            hnsw_ef_construction: env_usize(
                "KPATH_INDEX_HNSW_EF_CONSTRUCTION",
                defaults.hnsw_ef_construction,
            ),
            hnsw_ef_search: env_usize("KPATH_INDEX_HNSW_EF_SEARCH", defaults.hnsw_ef_search),
            snapshot_dir: env_path("KPATH_SNAPSHOT_DIR", &defaults.snapshot_dir),
            snapshot_every_changes: env_usize(
                "KPATH_SNAPSHOT_EVERY_CHANGES",
                defaults.snapshot_every_changes,
            ),
            snapshot_quiescence_seconds: env_u64(
                "KPATH_SNAPSHOT_QUIESCENCE_SECONDS",
                defaults.snapshot_quiescence_seconds,
            ),
            change_queue_capacity: env_usize(
                "KPATH_CHANGE_QUEUE_CAPACITY",
                defaults.change_queue_capacity,
            ),
            search_default_k: env_usize("KPATH_SEARCH_DEFAULT_K", defaults.search_default_k),
            search_max_k: env_usize("KPATH_SEARCH_MAX_K", defaults.search_max_k),
            search_oversample_factor: env_usize(
                "KPATH_SEARCH_OVERSAMPLE_FACTOR",
                defaults.search_oversample_factor,
            ),
            search_alpha: env_f64("KPATH_SEARCH_ALPHA", defaults.search_alpha),
            search_beta: env_f64("KPATH_SEARCH_BETA", defaults.search_beta),
            deprecated_multiplier: env_f64(
                "KPATH_DEPRECATED_MULTIPLIER",
                defaults.deprecated_multiplier,
            ),
            search_default_timeout_ms: env_u64(
                "KPATH_SEARCH_DEFAULT_TIMEOUT_MS",
                defaults.search_default_timeout_ms,
            ),
            feedback_window_days: env_u32(
                "KPATH_FEEDBACK_WINDOW_DAYS",
                defaults.feedback_window_days,
            ),
            feedback_retention_days: env_u32(
                "KPATH_FEEDBACK_RETENTION_DAYS",
                defaults.feedback_retention_days,
            ),
            admin_role: env_string("KPATH_POLICY_ADMIN_ROLE", &defaults.admin_role),
            database_path: env_path("KPATH_DATABASE_URL", &defaults.database_path),
            database_pool_size: env_usize(
                "KPATH_DATABASE_POOL_SIZE",
                defaults.database_pool_size,
            ),
            http_host: env_string("KPATH_HTTP_HOST", &defaults.http_host),
            http_port: env_u16("KPATH_HTTP_PORT", defaults.http_port),
            jwt_secret: env::var("KPATH_JWT_SECRET").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a field is out of range or two fields
    /// are mutually inconsistent (`alpha + beta > 1`, `default_k > max_k`).
    pub fn validate(&self) -> ConfigResult<()> {
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "KPATH_EMBEDDING_DIMENSION",
                value: self.embedding_dimension.to_string(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.search_max_k == 0 || self.search_max_k > 100 {
            return Err(ConfigError::InvalidValue {
                key: "KPATH_SEARCH_MAX_K",
                value: self.search_max_k.to_string(),
                reason: "must be in 1..=100".to_owned(),
            });
        }
        if self.search_default_k == 0 || self.search_default_k > self.search_max_k {
            return Err(ConfigError::Inconsistent(format!(
                "default_k ({}) must be in 1..=max_k ({})",
                self.search_default_k, self.search_max_k
            )));
        }
        if !(0.0..=1.0).contains(&self.search_alpha) || !(0.0..=1.0).contains(&self.search_beta) {
            return Err(ConfigError::Inconsistent(
                "alpha and beta must each lie in [0, 1]".to_owned(),
            ));
        }
        if self.search_alpha + self.search_beta > 1.0 + f64::EPSILON {
            return Err(ConfigError::Inconsistent(format!(
                "alpha ({}) + beta ({}) must not exceed 1",
                self.search_alpha, self.search_beta
            )));
        }
        if self.search_oversample_factor == 0 {
            return Err(ConfigError::InvalidValue {
                key: "KPATH_SEARCH_OVERSAMPLE_FACTOR",
                value: "0".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.ivf_nprobe > self.ivf_nlist {
            return Err(ConfigError::Inconsistent(format!(
                "ivf_nprobe ({}) cannot exceed ivf_nlist ({})",
                self.ivf_nprobe, self.ivf_nlist
            )));
        }
        Ok(())
    }

    /// Bind address string for the HTTP listener.
    #[must_use]
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

// ────────────────────────────────────────────────────────────────────
// Environment parsing helpers
// ────────────────────────────────────────────────────────────────────

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn env_path(key: &str, default: &std::path::Path) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| default.to_path_buf(), PathBuf::from)
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => match raw.parse() {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, raw, %err, "unparseable env value, using default");
                default
            }
        },
        _ => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env_parse(key, default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_parse(key, default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_parse(key, default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_parse(key, default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_parse(key, default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn default_blend_is_authoritative() {
        let config = Config::default();
        assert!((config.search_alpha - 0.85).abs() < f64::EPSILON);
        assert!((config.search_beta - 0.15).abs() < f64::EPSILON);
        assert!((config.deprecated_multiplier - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn alpha_beta_sum_checked() {
        let config = Config {
            search_alpha: 0.9,
            search_beta: 0.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_dimension_rejected() {
        let config = Config {
            embedding_dimension: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_k_bounded_by_max_k() {
        let config = Config {
            search_default_k: 50,
            search_max_k: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_k_capped_at_one_hundred() {
        let config = Config {
            search_max_k: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn nprobe_bounded_by_nlist() {
        let config = Config {
            ivf_nlist: 4,
            ivf_nprobe: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn index_kind_parses() {
        assert_eq!("exact".parse::<IndexKind>().unwrap(), IndexKind::Exact);
        assert_eq!("IVF".parse::<IndexKind>().unwrap(), IndexKind::Ivf);
        assert_eq!("hnsw".parse::<IndexKind>().unwrap(), IndexKind::Hnsw);
        assert!("faiss".parse::<IndexKind>().is_err());
    }

    #[test]
    fn index_kind_display_roundtrip() {
        for kind in [IndexKind::Exact, IndexKind::Ivf, IndexKind::Hnsw] {
            assert_eq!(kind.to_string().parse::<IndexKind>().unwrap(), kind);
        }
    }

    #[test]
    fn http_addr_formats() {
        let config = Config::default();
        assert_eq!(config.http_addr(), "127.0.0.1:8000");
    }

    #[test]
    fn from_env_does_not_panic() {
        let _config = Config::from_env();
    }
}
