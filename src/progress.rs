//! Progress-callback trait for per-page pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as pages are dispatched, retried, and completed. The CLI drives its
//! progress bar from these; library callers can forward them anywhere.
//!
//! # Example
//!
//! ```rust
//! use mednotes::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} chars)", page_num, total_pages, text_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// Under [`crate::config::DispatchStrategy::Concurrent`] the per-page methods
/// may be called from several tasks at once. Protect shared mutable state with
/// `Mutex` or atomics.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before any page is dispatched.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once the model for the run has been chosen.
    fn on_model_resolved(&self, model: &str) {
        let _ = model;
    }

    /// Called just before the first request for a page is sent.
    ///
    /// `page_num` is 1-indexed.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a retryable failure will be followed by another attempt.
    ///
    /// `attempt` is the number of the attempt that just failed.
    fn on_page_retry(&self, page_num: usize, attempt: u32, delay: Duration, reason: &str) {
        let _ = (page_num, attempt, delay, reason);
    }

    /// Called when a page produced text.
    ///
    /// `text_len` is the character count of the text after
    /// [`crate::pipeline::postprocess::clean_text`], as it will be assembled.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (page_num, total_pages, text_len);
    }

    /// Called when a page ultimately failed.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has a result.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

/// The configured callback, or a no-op.
pub(crate) fn callback_or_noop(cb: Option<&ProgressCallback>) -> ProgressCallback {
    cb.cloned().unwrap_or_else(|| Arc::new(NoopProgressCallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start(5);
        cb.on_model_resolved("gemini-1.5-flash");
        cb.on_page_start(1, 5);
        cb.on_page_retry(1, 1, Duration::from_secs(2), "rate limited");
        cb.on_page_complete(1, 5, 42);
        cb.on_page_error(2, 5, "some error");
        cb.on_conversion_complete(5, 4);
    }

    #[test]
    fn missing_callback_becomes_noop() {
        let cb = callback_or_noop(None);
        cb.on_conversion_start(1);
    }
}
