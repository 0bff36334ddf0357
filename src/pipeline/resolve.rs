//! Model resolution: pick one usable model identifier per run.
//!
//! The order of precedence is:
//!
//! 1. an explicit `config.model`, used as-is without contacting the catalog;
//! 2. the first generation-capable catalog entry whose identifier contains a
//!    preference fragment, scanning fragments in order;
//! 3. the first generation-capable catalog entry;
//! 4. `config.fallback_model`.
//!
//! Resolution never fails. A catalog that cannot be fetched, or that lists no
//! capable model, degrades to the fallback with a `warn!`. Whether that model
//! actually exists is discovered at submission time, where a 404 moves the
//! page on to the next alternate.

use crate::backend::{normalise_model_id, ModelDescriptor, VisionBackend};
use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Alternates kept after the primary, excluding the fallback.
pub const MAX_ALTERNATES: usize = 3;

/// How the primary model was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionSource {
    /// Named explicitly in the configuration.
    Configured,
    /// Matched this preference fragment.
    Preferred(String),
    /// First capable catalog entry; no preference matched.
    FirstCapable,
    /// Catalog unavailable or empty.
    Fallback,
}

/// The model chosen for a run, with ordered substitutes for model-not-found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedModel {
    pub primary: String,
    pub alternates: Vec<String>,
    pub source: ResolutionSource,
}

impl ResolvedModel {
    /// A single model with no alternates.
    pub fn fixed(model: impl AsRef<str>, source: ResolutionSource) -> Self {
        Self {
            primary: normalise_model_id(model.as_ref()).to_string(),
            alternates: Vec::new(),
            source,
        }
    }

    /// Primary first, then alternates in order.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.alternates.iter().map(String::as_str))
    }
}

/// Choose a model from a fetched catalog. Pure.
pub fn select_model(
    catalog: &[ModelDescriptor],
    preferences: &[String],
    fallback: &str,
) -> ResolvedModel {
    let fallback = normalise_model_id(fallback);
    let capable: Vec<&str> = catalog
        .iter()
        .filter(|m| m.supports_generation)
        .map(|m| normalise_model_id(&m.id))
        .collect();

    let Some(&first_capable) = capable.first() else {
        return ResolvedModel::fixed(fallback, ResolutionSource::Fallback);
    };

    let mut matched: Vec<(&str, &str)> = Vec::new();
    for pref in preferences.iter().filter(|p| !p.is_empty()) {
        for &id in capable.iter().filter(|id| id.contains(pref.as_str())) {
            if !matched.iter().any(|(m, _)| *m == id) {
                matched.push((id, pref.as_str()));
            }
        }
    }

    let (primary, source) = match matched.first() {
        Some(&(id, pref)) => (id, ResolutionSource::Preferred(pref.to_string())),
        None => (first_capable, ResolutionSource::FirstCapable),
    };

    let mut alternates: Vec<String> = matched
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| *id != primary && *id != fallback)
        .take(MAX_ALTERNATES)
        .map(str::to_string)
        .collect();
    if primary != fallback {
        alternates.push(fallback.to_string());
    }

    ResolvedModel {
        primary: primary.to_string(),
        alternates,
        source,
    }
}

/// Resolve the model for a run. Never fails.
pub async fn resolve_model(backend: &dyn VisionBackend, config: &PipelineConfig) -> ResolvedModel {
    if let Some(ref model) = config.model {
        debug!("Using configured model '{}', catalog skipped", model);
        return ResolvedModel::fixed(model, ResolutionSource::Configured);
    }

    let resolved = match backend.list_models().await {
        Ok(catalog) => {
            debug!("{} returned {} catalog entries", backend.name(), catalog.len());
            let resolved = select_model(&catalog, &config.model_preferences, &config.fallback_model);
            if resolved.source == ResolutionSource::Fallback {
                warn!(
                    "Catalog lists no generation-capable model; falling back to '{}'",
                    resolved.primary
                );
            }
            resolved
        }
        Err(e) => {
            warn!(
                "Model catalog unavailable ({}); falling back to '{}'",
                e, config.fallback_model
            );
            ResolvedModel::fixed(&config.fallback_model, ResolutionSource::Fallback)
        }
    };

    info!(
        "Resolved model '{}' ({:?}, {} alternates)",
        resolved.primary,
        resolved.source,
        resolved.alternates.len()
    );
    resolved
}
