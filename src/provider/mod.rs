//! The remote AI service seam: describe an image, generate a view.

mod gemini;

pub use gemini::{GeminiProvider, GeminiProviderBuilder};

use crate::error::Result;
use crate::image::{GeneratedImage, SourceImage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which remote service an implementation talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini multimodal models.
    Gemini,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// A request for one rendered view.
#[derive(Debug, Clone)]
pub struct ViewRequest {
    /// Full prompt text (base description + view phrase + qualifiers).
    pub prompt: String,
    /// Source image to condition on (edit mode). Text-only when absent.
    pub source: Option<SourceImage>,
    /// Seed for deterministic generation, where the service supports it.
    pub seed: Option<u64>,
}

impl ViewRequest {
    /// Creates a text-only request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            source: None,
            seed: None,
        }
    }

    /// Conditions the request on a source image (edit mode).
    pub fn with_source(mut self, source: SourceImage) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets a seed for deterministic generation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// True when this request edits a source image rather than generating
    /// from text alone.
    pub fn is_edit(&self) -> bool {
        self.source.is_some()
    }
}

/// A remote service that can describe an image and render views of it.
///
/// Both operations are single-shot: no internal retry. Transport and service
/// failures surface as [`crate::TurnaroundError`] values for the caller to
/// report.
#[async_trait]
pub trait ViewProvider: Send + Sync {
    /// Describes the main subject of the image in one concise phrase,
    /// suitable as the base of a generation prompt.
    async fn describe(&self, image: &SourceImage) -> Result<String>;

    /// Renders one view from the request's prompt, conditioned on the
    /// source image when present.
    async fn generate_view(&self, request: &ViewRequest) -> Result<GeneratedImage>;

    /// Returns the kind of this provider.
    fn kind(&self) -> ProviderKind;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str {
        match self.kind() {
            ProviderKind::Gemini => "Gemini (Google)",
        }
    }

    /// Checks that the provider is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}
