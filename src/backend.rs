//! The seam between the pipeline and the remote inference service.
//!
//! Everything network-facing sits behind [`VisionBackend`]: listing the model
//! catalog and running one generation request. The production implementation
//! is [`crate::gemini::GeminiClient`]; tests plug in deterministic stubs via
//! [`crate::config::PipelineConfigBuilder::backend`].

use crate::config::SafetyThreshold;
use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Prefix the catalog puts in front of every model identifier.
pub const MODEL_ID_PREFIX: &str = "models/";

/// Strip the catalog's `models/` prefix, if present.
pub fn normalise_model_id(id: &str) -> &str {
    id.strip_prefix(MODEL_ID_PREFIX).unwrap_or(id)
}

/// One entry of the remote model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier without the `models/` prefix.
    pub id: String,
    /// Human-readable name, when the catalog provides one.
    pub display_name: Option<String>,
    /// Whether the model accepts content-generation requests.
    pub supports_generation: bool,
}

impl ModelDescriptor {
    pub fn new(id: impl AsRef<str>, supports_generation: bool) -> Self {
        Self {
            id: normalise_model_id(id.as_ref()).to_string(),
            display_name: None,
            supports_generation,
        }
    }
}

/// Everything needed to ask the model about one page.
///
/// Built once per page and reused across retry attempts, so the base64
/// payload is encoded only once.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub prompt: String,
    pub mime_type: String,
    /// Base64 (standard alphabet) page bytes.
    pub data_base64: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub safety_threshold: SafetyThreshold,
}

/// A remote vision-language service.
///
/// Implementations must be `Send + Sync`: the concurrent dispatcher shares
/// one backend across all workers.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "backend"
    }

    /// Fetch the model catalog.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError>;

    /// Run one extraction request against `model` and return the raw text.
    async fn generate(&self, model: &str, request: &PageRequest) -> Result<String, BackendError>;
}
