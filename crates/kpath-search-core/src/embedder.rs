//! Embedding abstraction
//!
//! [`Embedder`] maps text to an L2-normalized vector of fixed dimension.
//! Implementations must be deterministic for a fixed `(model, dimension)`
//! pair up to numeric tolerance, and internally thread-safe; batching is
//! performed by the caller.
//!
//! The production backend lives in [`crate::fastembed`] behind the
//! `onnx-embedder` feature. [`StubEmbedder`] is a deterministic double for
//! tests and offline development.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{SearchError, SearchResult};

/// Maps text to unit-norm vectors of a fixed dimension.
pub trait Embedder: Send + Sync {
    /// Embed a single text into an L2-normalized vector.
    ///
    /// # Errors
    /// - [`SearchError::InvalidRequest`] for empty text
    /// - [`SearchError::InputTooLarge`] when the text exceeds the model
    ///   context (permanent for this input)
    /// - [`SearchError::EmbedderUnavailable`] when the model cannot be
    ///   loaded or invoked (transient)
    fn embed(&self, text: &str) -> SearchResult<Vec<f32>>;

    /// Embed a batch of texts. Equivalent to mapping [`Embedder::embed`];
    /// backends may override with something faster.
    ///
    /// # Errors
    /// Same as [`Embedder::embed`]; the first failure aborts the batch.
    fn embed_batch(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// The embedding dimension `D`.
    fn dimension(&self) -> usize;

    /// The embedding model identifier `M`; baked into snapshots.
    fn model_id(&self) -> &str;

    /// Upper bound on input size in characters; larger inputs are
    /// permanently unembeddable.
    fn max_input_chars(&self) -> usize {
        8_192
    }
}

/// Return an L2-normalized copy of `vector`.
///
/// The zero vector is returned unchanged (there is no direction to keep).
#[must_use]
pub fn normalize_l2(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vector.to_vec()
    }
}

// ────────────────────────────────────────────────────────────────────
// Deterministic stub
// ────────────────────────────────────────────────────────────────────

/// Deterministic embedder double.
///
/// Texts registered via [`StubEmbedder::with_mapping`] embed to the given
/// vector (normalized); any other text embeds to a pseudo-random but fully
/// deterministic unit vector derived from its SHA-256 digest. Optionally
/// fails the next `n` calls to exercise retry paths.
pub struct StubEmbedder {
    dimension: usize,
    mappings: HashMap<String, Vec<f32>>,
    max_input_chars: usize,
    fail_next: Mutex<usize>,
}

impl StubEmbedder {
    /// Create a stub producing vectors of the given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            mappings: HashMap::new(),
            max_input_chars: 8_192,
            fail_next: Mutex::new(0),
        }
    }

    /// Builder: fix the embedding of a specific text.
    #[must_use]
    pub fn with_mapping(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.mappings.insert(text.into(), normalize_l2(&vector));
        self
    }

    /// Builder: lower the input-size limit (to exercise `InputTooLarge`).
    #[must_use]
    pub const fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }

    /// Make the next `n` embed calls fail with `EmbedderUnavailable`.
    pub fn fail_next(&self, n: usize) {
        *self.fail_next.lock().expect("stub lock poisoned") = n;
    }

    fn derived_vector(&self, text: &str) -> Vec<f32> {
        // Stretch the digest over the dimension by re-hashing with a counter
        let mut values = Vec::with_capacity(self.dimension);
        let mut counter = 0_u32;
        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest {
                if values.len() == self.dimension {
                    break;
                }
                values.push((f32::from(byte) - 127.5) / 127.5);
            }
            counter += 1;
        }
        normalize_l2(&values)
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        {
            let mut failures = self.fail_next.lock().expect("stub lock poisoned");
            if *failures > 0 {
                *failures -= 1;
                return Err(SearchError::EmbedderUnavailable(
                    "stub scripted failure".to_owned(),
                ));
            }
        }
        if text.is_empty() {
            return Err(SearchError::InvalidRequest("empty text".to_owned()));
        }
        if text.chars().count() > self.max_input_chars {
            return Err(SearchError::InputTooLarge {
                len: text.chars().count(),
                max: self.max_input_chars,
            });
        }
        Ok(self
            .mappings
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.derived_vector(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "stub-embedder"
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}
