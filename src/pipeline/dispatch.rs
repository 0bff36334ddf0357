//! Page dispatch: sequential or through a bounded concurrent pool.
//!
//! Both strategies produce a stream of [`PageResult`]s in completion order.
//! [`dispatch`] collects that stream and restores ordinal order, which is the
//! only order the assembler ever sees. [`crate::stream::convert_stream`] hands
//! the raw stream to the caller instead.
//!
//! The stream owns everything it touches (backend, resolved model, pages,
//! config), so it is `'static` and can outlive the call that built it.

use crate::backend::VisionBackend;
use crate::config::{DispatchStrategy, PipelineConfig};
use crate::output::PageResult;
use crate::page::Page;
use crate::pipeline::llm;
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::resolve::ResolvedModel;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_stream::Stream;
use tracing::debug;

/// A boxed stream of page results in completion order.
pub type PageStream = Pin<Box<dyn Stream<Item = PageResult> + Send>>;

/// Shared state cloned into every page future.
#[derive(Clone)]
struct Shared {
    backend: Arc<dyn VisionBackend>,
    resolved: Arc<ResolvedModel>,
    config: Arc<PipelineConfig>,
    total: usize,
}

/// Build the result stream for the configured strategy.
pub fn page_stream(
    backend: Arc<dyn VisionBackend>,
    resolved: Arc<ResolvedModel>,
    pages: Vec<Page>,
    config: Arc<PipelineConfig>,
) -> PageStream {
    let strategy = config.dispatch;
    let shared = Shared {
        backend,
        resolved,
        total: pages.len(),
        config,
    };
    match strategy {
        DispatchStrategy::Sequential { inter_page_delay } => {
            process_sequential(shared, pages, inter_page_delay)
        }
        DispatchStrategy::Concurrent { workers } => process_concurrent(shared, pages, workers),
    }
}

/// Run every page and return the results sorted by ordinal.
pub async fn dispatch(
    backend: Arc<dyn VisionBackend>,
    resolved: Arc<ResolvedModel>,
    pages: Vec<Page>,
    config: Arc<PipelineConfig>,
) -> Vec<PageResult> {
    let mut results: Vec<PageResult> = page_stream(backend, resolved, pages, config)
        .collect()
        .await;
    results.sort_by_key(|r| r.ordinal);
    results
}

/// One page at a time, pausing between pages but not after the last.
fn process_sequential(shared: Shared, pages: Vec<Page>, inter_page_delay: Duration) -> PageStream {
    let s = stream::iter(pages.into_iter().enumerate()).then(move |(i, page)| {
        let shared = shared.clone();
        async move {
            if i > 0 && !inter_page_delay.is_zero() {
                debug!("Waiting {:?} before page {}", inter_page_delay, page.page_num());
                sleep(inter_page_delay).await;
            }
            run_page(&shared, &page).await
        }
    });
    Box::pin(s)
}

/// Up to `workers` pages in flight; results arrive as they finish.
fn process_concurrent(shared: Shared, pages: Vec<Page>, workers: usize) -> PageStream {
    let s = stream::iter(pages.into_iter().map(move |page| {
        let shared = shared.clone();
        async move { run_page(&shared, &page).await }
    }))
    .buffer_unordered(workers.max(1));
    Box::pin(s)
}

/// Process one page, firing the per-page progress events around it.
async fn run_page(shared: &Shared, page: &Page) -> PageResult {
    let page_num = page.page_num();
    let cb = shared.config.progress_callback.as_ref();

    if let Some(cb) = cb {
        cb.on_page_start(page_num, shared.total);
    }
    let result = llm::process_page(
        shared.backend.as_ref(),
        &shared.resolved,
        page,
        &shared.config,
    )
    .await;
    if let Some(cb) = cb {
        match result.error() {
            None => cb.on_page_complete(
                page_num,
                shared.total,
                result.text().map_or(0, |t| clean_text(t).chars().count()),
            ),
            Some(e) => cb.on_page_error(page_num, shared.total, &e.to_string()),
        }
    }
    result
}
