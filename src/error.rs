//! Error types for the mednotes library.
//!
//! Three error types cover three distinct failure scopes:
//!
//! * [`MedNotesError`]: **Fatal**, the run cannot proceed at all (no input,
//!   unreadable file, missing API key, invalid configuration). Returned as
//!   `Err(MedNotesError)` from the top-level `convert*` functions.
//!
//! * [`BackendError`]: a single remote call failed. Produced by a
//!   [`crate::backend::VisionBackend`] and classified by
//!   [`crate::pipeline::retry::decide`] as retryable or terminal.
//!
//! * [`PageError`]: **Non-fatal**, a single page ultimately failed. Stored
//!   inside [`crate::output::PageResult`] and rendered as a visible marker in
//!   the assembled document; the remaining pages still complete.

use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of response-body characters kept for diagnostics.
pub(crate) const MAX_BODY_CHARS: usize = 500;

/// All fatal errors returned by the mednotes library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum MedNotesError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// No pages were supplied.
    #[error("No input pages were supplied")]
    NoInput,

    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file failed for another reason.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither the file contents nor its extension identify a supported format.
    #[error("Unsupported input '{path}': {detail}\nSupported: PNG, JPEG, WebP, PDF.")]
    UnsupportedFormat { path: PathBuf, detail: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// No API key was configured and no pre-built backend was supplied.
    #[error(
        "No API key configured.\n\
Set GEMINI_API_KEY (or GOOGLE_API_KEY), pass --api-key, or supply a backend."
    )]
    MissingApiKey,

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    /// An explicitly requested catalog listing failed.
    #[error("Model catalog request failed: {0}")]
    Catalog(#[source] BackendError),

    /// Some pages failed during an otherwise complete run.
    ///
    /// Returned by [`crate::output::ConversionOutput::into_result`] when the
    /// caller wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed during conversion")]
    PartialFailure { failed: usize, total: usize },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not serialise the document.
    #[error("Failed to serialise document: {0}")]
    Serialise(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single call to the vision backend.
///
/// The variants mirror the response classes of the inference endpoint so the
/// retry controller can decide on the variant alone, never on message text.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum BackendError {
    /// The page bytes could not be encoded or validated.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// HTTP 429.
    #[error("rate limited (HTTP 429){}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited {
        retry_after_secs: Option<u64>,
        body: String,
    },

    /// HTTP 502 / 503 / 504.
    #[error("service unavailable (HTTP {status})")]
    Unavailable { status: u16, body: String },

    /// HTTP 404 for the requested model.
    #[error("model '{model}' not found (HTTP 404)")]
    ModelNotFound { model: String, body: String },

    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection, timeout, or transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The response body was not the expected JSON shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The provider refused to answer (prompt or candidate blocked).
    #[error("response blocked: {reason}")]
    Blocked { reason: String },

    /// The response carried no text.
    #[error("response contained no text")]
    EmptyResponse,
}

impl BackendError {
    /// Classify a non-success HTTP status.
    pub fn from_status(
        status: u16,
        model: &str,
        body: &str,
        retry_after_secs: Option<u64>,
    ) -> Self {
        let body = truncate_body(body);
        match status {
            429 => BackendError::RateLimited {
                retry_after_secs,
                body,
            },
            502..=504 => BackendError::Unavailable { status, body },
            404 => BackendError::ModelNotFound {
                model: model.to_string(),
                body,
            },
            _ => BackendError::Http { status, body },
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Rate limiting, transient unavailability, and transport failures are
    /// retried. Everything else is terminal for the page.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited { .. }
                | BackendError::Unavailable { .. }
                | BackendError::Network(_)
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            BackendError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// The HTTP status behind this error, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::RateLimited { .. } => Some(429),
            BackendError::Unavailable { status, .. } | BackendError::Http { status, .. } => {
                Some(*status)
            }
            BackendError::ModelNotFound { .. } => Some(404),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

/// Truncate a response body on a char boundary.
pub(crate) fn truncate_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => format!("{}\u{2026}", &body[..idx]),
        None => body.to_string(),
    }
}

/// A non-fatal error for a single page.
///
/// `page` is the 1-indexed position in upload order and `name` the display
/// name of the page's source.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page bytes were unreadable or of an unsupported type.
    #[error("Page {page} ({name}): input rejected: {detail}")]
    InvalidInput {
        page: usize,
        name: String,
        detail: String,
    },

    /// Every permitted attempt hit a retryable failure.
    #[error("Page {page} ({name}): gave up after {attempts} attempts: {detail}")]
    AttemptsExhausted {
        page: usize,
        name: String,
        attempts: u32,
        detail: String,
    },

    /// The endpoint returned a non-retryable status.
    #[error("Page {page} ({name}): request rejected: {detail}")]
    Rejected {
        page: usize,
        name: String,
        status: Option<u16>,
        detail: String,
    },

    /// No candidate model existed on the endpoint.
    #[error("Page {page} ({name}): model '{model}' not found")]
    ModelNotFound {
        page: usize,
        name: String,
        model: String,
    },

    /// The provider refused to produce text for the page.
    #[error("Page {page} ({name}): response blocked: {reason}")]
    Blocked {
        page: usize,
        name: String,
        reason: String,
    },
}

impl PageError {
    /// Map a terminal backend failure onto a page error.
    pub fn from_backend(
        page: usize,
        name: &str,
        attempts: u32,
        exhausted: bool,
        error: BackendError,
    ) -> Self {
        let name = name.to_string();
        if exhausted {
            return PageError::AttemptsExhausted {
                page,
                name,
                attempts,
                detail: error.to_string(),
            };
        }
        match error {
            BackendError::InvalidInput(detail) => PageError::InvalidInput { page, name, detail },
            BackendError::ModelNotFound { model, .. } => {
                PageError::ModelNotFound { page, name, model }
            }
            BackendError::Blocked { reason } => PageError::Blocked { page, name, reason },
            other => PageError::Rejected {
                page,
                name,
                status: other.status(),
                detail: other.to_string(),
            },
        }
    }

    /// 1-indexed page number.
    pub fn page(&self) -> usize {
        match self {
            PageError::InvalidInput { page, .. }
            | PageError::AttemptsExhausted { page, .. }
            | PageError::Rejected { page, .. }
            | PageError::ModelNotFound { page, .. }
            | PageError::Blocked { page, .. } => *page,
        }
    }

    /// The tagged text placed in the page's slot of the assembled document.
    pub fn marker(&self) -> String {
        format!("[EXTRACTION FAILED] {self}")
    }
}
