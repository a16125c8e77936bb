//! FastEmbed-backed production embedder
//!
//! Uses ONNX transformer models for quality semantic embeddings. Slower
//! than a static-embedding tier but markedly better on paraphrase-heavy
//! discovery prompts.
//!
//! # Supported Models
//!
//! - `all-MiniLM-L6-v2` (384 dims) — the default
//! - `bge-small-en-v1.5` (384 dims)

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::embedder::{Embedder, normalize_l2};
use crate::error::{SearchError, SearchResult};

/// Model name constant for MiniLM-L6-v2 (the default).
pub const MODEL_MINILM_L6_V2: &str = "all-MiniLM-L6-v2";

/// Model name constant for BGE Small.
pub const MODEL_BGE_SMALL: &str = "bge-small-en-v1.5";

/// FastEmbed-backed semantic embedder.
///
/// Uses ONNX runtime for transformer inference. Thread-safe via internal
/// mutex.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    id: String,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("id", &self.id)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl FastEmbedder {
    /// Load a model by its configured name.
    ///
    /// # Errors
    /// Returns [`SearchError::EmbedderUnavailable`] for unknown names or
    /// when model loading fails.
    pub fn load(model_name: &str) -> SearchResult<Self> {
        match model_name {
            MODEL_MINILM_L6_V2 => Self::load_model(EmbeddingModel::AllMiniLML6V2, model_name, 384),
            MODEL_BGE_SMALL => Self::load_model(EmbeddingModel::BGESmallENV15, model_name, 384),
            other => Err(SearchError::EmbedderUnavailable(format!(
                "unsupported embedding model: {other}"
            ))),
        }
    }

    fn load_model(model: EmbeddingModel, id: &str, dimension: usize) -> SearchResult<Self> {
        let options = InitOptions::new(model).with_show_download_progress(false);

        let text_embedding = TextEmbedding::try_new(options).map_err(|e| {
            SearchError::EmbedderUnavailable(format!("failed to load {id}: {e}"))
        })?;

        tracing::info!(model = id, dimension, "FastEmbed model loaded");

        Ok(Self {
            model: Mutex::new(text_embedding),
            id: id.to_owned(),
            dimension,
        })
    }

    fn embed_texts(&self, texts: Vec<&str>) -> SearchResult<Vec<Vec<f32>>> {
        let model = self
            .model
            .lock()
            .map_err(|_| SearchError::Internal("fastembed lock poisoned".to_owned()))?;

        let embeddings = model
            .embed(texts, None)
            .map_err(|e| SearchError::EmbedderUnavailable(format!("embed failed: {e}")))?;

        embeddings
            .into_iter()
            .map(|embedding| {
                if embedding.len() == self.dimension {
                    Ok(normalize_l2(&embedding))
                } else {
                    Err(SearchError::Internal(format!(
                        "dimension mismatch: expected {}, got {}",
                        self.dimension,
                        embedding.len()
                    )))
                }
            })
            .collect()
    }

    fn check_input(&self, text: &str) -> SearchResult<()> {
        if text.is_empty() {
            return Err(SearchError::InvalidRequest("empty text".to_owned()));
        }
        let len = text.chars().count();
        let max = self.max_input_chars();
        if len > max {
            return Err(SearchError::InputTooLarge { len, max });
        }
        Ok(())
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        self.check_input(text)?;
        let mut vectors = self.embed_texts(vec![text])?;
        vectors
            .pop()
            .ok_or_else(|| SearchError::Internal("fastembed returned no embedding".to_owned()))
    }

    fn embed_batch(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
        for text in texts {
            self.check_input(text)?;
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_texts(texts.iter().map(String::as_str).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_constants() {
        assert_eq!(MODEL_MINILM_L6_V2, "all-MiniLM-L6-v2");
        assert_eq!(MODEL_BGE_SMALL, "bge-small-en-v1.5");
    }

    #[test]
    fn unknown_model_is_unavailable() {
        let err = FastEmbedder::load("made-up-model").unwrap_err();
        assert_eq!(err.error_type(), "EMBEDDER_UNAVAILABLE");
    }

    // Integration tests require model download
    #[test]
    #[ignore = "requires model download"]
    fn minilm_embeds_unit_vectors() {
        let embedder = FastEmbedder::load(MODEL_MINILM_L6_V2).expect("should load");
        let embedding = embedder.embed("hello world").expect("should embed");

        assert_eq!(embedding.len(), 384);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
