//! Page submission: drive one page through the backend until it succeeds or
//! fails terminally.
//!
//! This module is the I/O half of the retry state machine. Every transition is
//! decided by [`crate::pipeline::retry::decide`]; this loop only performs the
//! call, draws the jitter sample, and sleeps.
//!
//! ## Model-not-found fallback
//!
//! A 404 means the model itself is unusable, so retrying it is pointless. The
//! page moves on to the next candidate from the [`ResolvedModel`] and the
//! attempt counter restarts. The candidate list is finite, so total work per
//! page stays bounded by `candidates × max_attempts`.

use crate::backend::VisionBackend;
use crate::config::PipelineConfig;
use crate::error::{BackendError, PageError};
use crate::output::{Outcome, PageResult};
use crate::page::Page;
use crate::pipeline::encode;
use crate::pipeline::resolve::ResolvedModel;
use crate::pipeline::retry::{decide, Decision};
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Extract one page.
///
/// Always returns a [`PageResult`]; a failed page never aborts the run.
pub async fn process_page(
    backend: &dyn VisionBackend,
    resolved: &ResolvedModel,
    page: &Page,
    config: &PipelineConfig,
) -> PageResult {
    let start = Instant::now();
    let page_num = page.page_num();

    let request = match encode::build_request(page, config) {
        Ok(r) => r,
        Err(e) => {
            warn!("Page {} ({}): not submitted: {}", page_num, page.name(), e);
            let error = PageError::from_backend(page_num, page.name(), 0, false, e);
            return finish(page, Outcome::Failed { error }, 0, "", start);
        }
    };

    let candidates: Vec<&str> = resolved.candidates().collect();
    let max_attempts = config.retry.max_attempts;
    let mut total_attempts = 0u32;
    let mut model_idx = 0usize;

    loop {
        let model = candidates[model_idx];
        let mut attempt = 0u32;

        let (error, exhausted) = loop {
            attempt += 1;
            total_attempts += 1;
            debug!(
                "Page {}: attempt {}/{} on '{}'",
                page_num, attempt, max_attempts, model
            );

            let outcome = backend.generate(model, &request).await;
            let reason = outcome.as_ref().err().map(ToString::to_string);

            match decide(attempt, outcome, &config.retry, fastrand::f64()) {
                Decision::Succeed(text) => {
                    debug!(
                        "Page {}: {} chars from '{}' in {:?}",
                        page_num,
                        text.chars().count(),
                        model,
                        start.elapsed()
                    );
                    return finish(page, Outcome::Extracted { text }, total_attempts, model, start);
                }
                Decision::Retry(delay) => {
                    let reason = reason.unwrap_or_default();
                    warn!(
                        "Page {}: attempt {}/{} failed ({}); retrying in {:?}",
                        page_num, attempt, max_attempts, reason, delay
                    );
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_page_retry(page_num, attempt, delay, &reason);
                    }
                    sleep(delay).await;
                }
                Decision::Fail { error, exhausted } => break (error, exhausted),
            }
        };

        if matches!(error, BackendError::ModelNotFound { .. }) && model_idx + 1 < candidates.len() {
            warn!(
                "Page {}: model '{}' not found; trying '{}'",
                page_num,
                model,
                candidates[model_idx + 1]
            );
            model_idx += 1;
            continue;
        }

        let error = PageError::from_backend(page_num, page.name(), attempt, exhausted, error);
        warn!("{}", error);
        return finish(page, Outcome::Failed { error }, total_attempts, model, start);
    }
}

fn finish(page: &Page, outcome: Outcome, attempts: u32, model: &str, start: Instant) -> PageResult {
    PageResult {
        ordinal: page.ordinal(),
        name: page.name().to_string(),
        outcome,
        attempts,
        model: model.to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
