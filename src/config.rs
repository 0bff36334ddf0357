//! Configuration types for the page-processing pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Credentials, retry policy, and dispatch
//! strategy are all explicit fields: nothing in the library reads the process
//! environment mid-call. The only environment access is the opt-in
//! [`PipelineConfigBuilder::api_key_from_env`].

use crate::backend::VisionBackend;
use crate::error::MedNotesError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default endpoint of the Generative Language REST API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when catalog discovery fails or yields nothing usable.
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-1.5-flash";

/// Preferred model-name fragments, fastest and cheapest first.
pub const DEFAULT_MODEL_PREFERENCES: &[&str] = &[
    "gemini-1.5-flash",
    "gemini-2.0-flash",
    "flash",
    "gemini-1.5-pro",
    "pro",
];

/// Environment variables consulted by [`PipelineConfigBuilder::api_key_from_env`].
pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Upper bound accepted for [`RetryPolicy::max_attempts`].
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Upper bound accepted for [`DispatchStrategy::Concurrent`] workers.
pub const MAX_WORKERS: usize = 16;

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use mednotes::{DispatchStrategy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .api_key("test-key")
///     .dispatch(DispatchStrategy::Concurrent { workers: 2 })
///     .max_attempts(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.retry.max_attempts, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// API key for the inference endpoint. Required unless `backend` is set.
    pub api_key: Option<String>,

    /// Base URL of the REST API. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,

    /// Explicit model identifier. When set, catalog discovery is skipped.
    pub model: Option<String>,

    /// Ordered name fragments scanned against the model catalog.
    /// Default: [`DEFAULT_MODEL_PREFERENCES`].
    pub model_preferences: Vec<String>,

    /// Identifier used when discovery fails. Default: [`DEFAULT_FALLBACK_MODEL`].
    pub fallback_model: String,

    /// Custom extraction prompt. If None, uses [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model to be faithful to the page, not creative.
    pub temperature: f32,

    /// Maximum output tokens per page. Default: 8192.
    pub max_output_tokens: u32,

    /// Threshold applied to every safety category. Default: [`SafetyThreshold::BlockNone`].
    ///
    /// Clinical and anatomical imagery is routinely flagged by the default
    /// filters, so the pipeline disables blocking unless told otherwise.
    pub safety_threshold: SafetyThreshold,

    /// Attempt bound and backoff policy applied to every page.
    pub retry: RetryPolicy,

    /// Sequential or bounded-concurrent dispatch.
    pub dispatch: DispatchStrategy,

    /// Emit a "Page: <name>" heading before each page. Default: true.
    pub include_source_headings: bool,

    /// Optional top-level document title.
    pub document_title: Option<String>,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Pre-constructed backend. Takes precedence over `api_key`/`base_url`.
    pub backend: Option<Arc<dyn VisionBackend>>,

    /// Optional progress callback. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: None,
            model_preferences: DEFAULT_MODEL_PREFERENCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            prompt: None,
            temperature: 0.1,
            max_output_tokens: 8192,
            safety_threshold: SafetyThreshold::default(),
            retry: RetryPolicy::default(),
            dispatch: DispatchStrategy::default(),
            include_source_headings: true,
            document_title: None,
            api_timeout_secs: 60,
            backend: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("model_preferences", &self.model_preferences)
            .field("fallback_model", &self.fallback_model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("safety_threshold", &self.safety_threshold)
            .field("retry", &self.retry)
            .field("dispatch", &self.dispatch)
            .field("include_source_headings", &self.include_source_headings)
            .field("document_title", &self.document_title)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn VisionBackend>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Take the API key from `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    ///
    /// Leaves an already-set key untouched.
    pub fn api_key_from_env(mut self) -> Self {
        if self.config.api_key.is_none() {
            self.config.api_key = API_KEY_ENV_VARS
                .iter()
                .filter_map(|var| std::env::var(var).ok())
                .find(|v| !v.trim().is_empty());
        }
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn model_preferences<I, S>(mut self, prefs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.model_preferences = prefs.into_iter().map(Into::into).collect();
        self
    }

    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config.fallback_model = model.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn safety_threshold(mut self, threshold: SafetyThreshold) -> Self {
        self.config.safety_threshold = threshold;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.retry.backoff = backoff;
        self
    }

    pub fn dispatch(mut self, strategy: DispatchStrategy) -> Self {
        self.config.dispatch = strategy;
        self
    }

    pub fn include_source_headings(mut self, v: bool) -> Self {
        self.config.include_source_headings = v;
        self
    }

    pub fn document_title(mut self, title: impl Into<String>) -> Self {
        self.config.document_title = Some(title.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, MedNotesError> {
        let c = &self.config;
        if c.retry.max_attempts == 0 || c.retry.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(MedNotesError::InvalidConfig(format!(
                "max attempts must be 1–{}, got {}",
                MAX_ATTEMPTS_LIMIT, c.retry.max_attempts
            )));
        }
        if let DispatchStrategy::Concurrent { workers } = c.dispatch {
            if workers == 0 || workers > MAX_WORKERS {
                return Err(MedNotesError::InvalidConfig(format!(
                    "worker count must be 1–{}, got {}",
                    MAX_WORKERS, workers
                )));
            }
        }
        if let BackoffPolicy::Exponential { jitter, .. } = c.retry.backoff {
            if !(0.0..=1.0).contains(&jitter) {
                return Err(MedNotesError::InvalidConfig(format!(
                    "jitter must be within 0.0–1.0, got {}",
                    jitter
                )));
            }
        }
        if c.base_url.trim().is_empty() {
            return Err(MedNotesError::InvalidConfig("base URL is empty".into()));
        }
        if c.fallback_model.trim().is_empty() {
            return Err(MedNotesError::InvalidConfig(
                "fallback model is empty".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(MedNotesError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Blocking threshold sent for each content-safety category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SafetyThreshold {
    /// Never block (default).
    #[default]
    BlockNone,
    /// Block only high-probability harm.
    BlockOnlyHigh,
    /// Block medium and high.
    BlockMediumAndAbove,
    /// Block low, medium and high.
    BlockLowAndAbove,
}

impl SafetyThreshold {
    /// Wire name used by the inference API.
    pub fn as_api_str(self) -> &'static str {
        match self {
            SafetyThreshold::BlockNone => "BLOCK_NONE",
            SafetyThreshold::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            SafetyThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            SafetyThreshold::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
        }
    }
}

/// Bounded retry policy applied per page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first. Default: 3.
    pub max_attempts: u32,

    /// Delay schedule between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Delay schedule between attempts.
///
/// `attempt` is the 1-indexed number of the attempt that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackoffPolicy {
    /// Same delay after every failure.
    Fixed { delay: Duration },
    /// `base × attempt`, capped at `max`.
    Linear { base: Duration, max: Duration },
    /// `base × 2^(attempt-1)`, capped at `max`, plus up to `jitter × delay`.
    Exponential {
        base: Duration,
        max: Duration,
        jitter: f64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(2),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following `attempt`.
    ///
    /// `jitter_sample` is a value in `[0, 1)`; it only affects
    /// [`BackoffPolicy::Exponential`]. Keeping the random draw outside makes
    /// this a pure function.
    pub fn delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            BackoffPolicy::Fixed { delay } => delay,
            BackoffPolicy::Linear { base, max } => base.saturating_mul(attempt).min(max),
            BackoffPolicy::Exponential { base, max, jitter } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                let delay = base.saturating_mul(factor).min(max);
                let spread = jitter.clamp(0.0, 1.0) * jitter_sample.clamp(0.0, 1.0);
                delay.saturating_add(delay.mul_f64(spread)).min(max)
            }
        }
    }

    /// Largest delay this policy can produce.
    pub fn max_delay(&self) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay } => delay,
            BackoffPolicy::Linear { max, .. } | BackoffPolicy::Exponential { max, .. } => max,
        }
    }
}

/// How pages are fanned out to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStrategy {
    /// One page at a time, pausing `inter_page_delay` between pages to stay
    /// under the provider's requests-per-minute ceiling.
    Sequential { inter_page_delay: Duration },
    /// Bounded pool of simultaneous in-flight pages.
    ///
    /// More workers finish sooner but hit rate limits more often.
    Concurrent { workers: usize },
}

impl Default for DispatchStrategy {
    fn default() -> Self {
        DispatchStrategy::Concurrent { workers: 3 }
    }
}

impl DispatchStrategy {
    /// Number of pages in flight at once.
    pub fn parallelism(&self) -> usize {
        match self {
            DispatchStrategy::Sequential { .. } => 1,
            DispatchStrategy::Concurrent { workers } => *workers,
        }
    }
}
