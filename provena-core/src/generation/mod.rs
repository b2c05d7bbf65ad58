//! Derivative text sources.
//!
//! Provides the [`ContentSource`] trait and its implementations:
//! - [`TemplateSource`]: deterministic field template
//! - [`OllamaSource`]: local generative model via Ollama's HTTP API
//!
//! [`ThrottledSource`] wraps any source with the run-wide single-flight gate,
//! per-call timeout, and retry with exponential backoff.

pub mod ollama;
pub mod template;
pub mod throttle;

use crate::config::{GenerationBackend, GenerationConfig};
use crate::error::GenerationError;
use crate::record::Record;
use async_trait::async_trait;
use std::sync::Arc;

pub use ollama::OllamaSource;
pub use template::TemplateSource;
pub use throttle::{ThrottledSource, with_retry};

/// What to generate.
#[derive(Debug, Clone, Copy)]
pub enum GenerationRequest<'a> {
    /// Hop 1: summarize a source record.
    Summary {
        stream: &'a str,
        record: &'a Record,
        fields: &'a [String],
    },
    /// Hop 2: interpret a hop-1 summary.
    Interpretation { stream: &'a str, summary: &'a str },
}

impl GenerationRequest<'_> {
    pub fn stream(&self) -> &str {
        match self {
            GenerationRequest::Summary { stream, .. }
            | GenerationRequest::Interpretation { stream, .. } => stream,
        }
    }
}

/// A producer of derivative text.
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether calls hit a generative model (and count as model calls).
    fn is_model(&self) -> bool {
        false
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

/// Build the configured content source.
pub fn create_source(config: &GenerationConfig) -> Result<Arc<dyn ContentSource>, GenerationError> {
    match config.backend {
        GenerationBackend::Template => Ok(Arc::new(TemplateSource)),
        GenerationBackend::Ollama => Ok(Arc::new(OllamaSource::new(config)?)),
    }
}

/// Collapse all whitespace runs to single spaces.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
