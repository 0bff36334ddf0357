//! Streaming API: emit page results as they complete.
//!
//! Unlike the eager [`crate::convert::convert`], which returns only after all
//! pages finish, [`convert_stream`] yields each [`crate::output::PageResult`]
//! as soon as its page is done. Under concurrent dispatch pages arrive in
//! completion order; sort by `ordinal` (or pass the collected results to
//! [`crate::pipeline::assemble::assemble`]) when order matters.

use crate::config::PipelineConfig;
use crate::convert::resolve_backend;
use crate::error::MedNotesError;
use crate::page::Page;
use crate::output::PageResult;
use crate::pipeline::{dispatch, resolve};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

pub use crate::pipeline::dispatch::PageStream;

/// Resolve the model, then stream page results as they are ready.
///
/// Fatal errors (no pages, no API key) are returned before the stream is
/// created. Page failures arrive as results with a failed outcome.
///
/// The progress callback sees the same events as in [`crate::convert::convert`]:
/// `on_conversion_complete` fires once the stream is drained, after the last
/// result has been yielded. A stream dropped early never fires it.
///
/// # Example
/// ```rust,no_run
/// use mednotes::{convert_stream, Page, PipelineConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("scan-1.png")?;
/// let page = Page::from_bytes(0, "scan-1.png", bytes).expect("supported image");
/// let config = PipelineConfig::builder().api_key_from_env().build()?;
/// let mut stream = convert_stream(vec![page], &config).await?;
/// while let Some(result) = stream.next().await {
///     match result.error() {
///         None => println!("Page {}: {} chars", result.page_num(), result.text().unwrap_or("").len()),
///         Some(e) => eprintln!("{e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_stream(
    pages: Vec<Page>,
    config: &PipelineConfig,
) -> Result<PageStream, MedNotesError> {
    if pages.is_empty() {
        return Err(MedNotesError::NoInput);
    }
    info!("Starting streaming conversion of {} pages", pages.len());

    let total = pages.len();
    let backend = resolve_backend(config)?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(pages.len());
    }
    let resolved = resolve::resolve_model(backend.as_ref(), config).await;
    if let Some(ref cb) = config.progress_callback {
        cb.on_model_resolved(&resolved.primary);
    }

    let results = dispatch::page_stream(backend, Arc::new(resolved), pages, Arc::new(config.clone()));

    let successes = Arc::new(AtomicUsize::new(0));
    let counted = {
        let successes = Arc::clone(&successes);
        results.inspect(move |r| {
            if r.is_success() {
                successes.fetch_add(1, Ordering::Relaxed);
            }
        })
    };
    let cb = config.progress_callback.clone();
    let complete = stream::once(async move {
        let done = successes.load(Ordering::Relaxed);
        info!("Streaming conversion complete: {}/{} pages", done, total);
        if let Some(cb) = cb {
            cb.on_conversion_complete(total, done);
        }
    })
    .filter_map(|()| futures::future::ready(None::<PageResult>));

    Ok(Box::pin(counted.chain(complete)))
}
