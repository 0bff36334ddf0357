//! Eager (whole-run) entry points.
//!
//! These wait for every page, then return the assembled document together
//! with per-page results and statistics. Use [`crate::stream::convert_stream`]
//! to receive pages as they complete instead.

use crate::backend::{ModelDescriptor, VisionBackend};
use crate::config::PipelineConfig;
use crate::document::OutputFormat;
use crate::error::MedNotesError;
use crate::gemini::GeminiClient;
use crate::output::{ConversionOutput, ConversionStats};
use crate::page::Page;
use crate::pipeline::{assemble, dispatch, input, resolve};
use crate::progress::callback_or_noop;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run the pipeline over in-memory pages.
///
/// # Returns
/// `Ok(ConversionOutput)` whenever the run completes, even if some or all
/// pages failed: each failure sits in its page's slot as an error notice
/// (check `output.stats.failed_pages`, or call
/// [`ConversionOutput::into_result`]).
///
/// # Errors
/// Only fatal conditions: no pages, no API key (and no pre-built backend),
/// or an HTTP client that cannot be constructed.
pub async fn convert(
    pages: Vec<Page>,
    config: &PipelineConfig,
) -> Result<ConversionOutput, MedNotesError> {
    if pages.is_empty() {
        return Err(MedNotesError::NoInput);
    }
    let total_start = Instant::now();
    let total_pages = pages.len();
    info!("Starting conversion of {} pages", total_pages);

    // ── Step 1: Backend ──────────────────────────────────────────────────
    let backend = resolve_backend(config)?;
    let cb = callback_or_noop(config.progress_callback.as_ref());
    cb.on_conversion_start(total_pages);

    // ── Step 2: Model ────────────────────────────────────────────────────
    let resolve_start = Instant::now();
    let resolved = resolve::resolve_model(backend.as_ref(), config).await;
    let resolve_duration_ms = resolve_start.elapsed().as_millis() as u64;
    cb.on_model_resolved(&resolved.primary);

    // ── Step 3: Dispatch ─────────────────────────────────────────────────
    let dispatch_start = Instant::now();
    let model = resolved.primary.clone();
    let results = dispatch::dispatch(
        backend,
        Arc::new(resolved),
        pages,
        Arc::new(config.clone()),
    )
    .await;
    let dispatch_duration_ms = dispatch_start.elapsed().as_millis() as u64;

    // ── Step 4: Assemble ─────────────────────────────────────────────────
    let document = assemble::assemble(&results, config);
    debug!("Assembled {} blocks", document.blocks.len());

    let stats = ConversionStats {
        model,
        resolve_duration_ms,
        dispatch_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        ..ConversionStats::tally(&results)
    };

    info!(
        "Conversion complete: {}/{} pages, {} attempts, {}ms total",
        stats.processed_pages, stats.total_pages, stats.total_attempts, stats.total_duration_ms
    );
    if stats.failed_pages > 0 {
        warn!("{} of {} pages failed", stats.failed_pages, stats.total_pages);
    }
    cb.on_conversion_complete(total_pages, stats.processed_pages);

    Ok(ConversionOutput {
        document,
        pages: results,
        stats,
    })
}

/// Load files in argument order and run the pipeline over them.
pub async fn convert_files<P: AsRef<Path>>(
    paths: &[P],
    config: &PipelineConfig,
) -> Result<ConversionOutput, MedNotesError> {
    let pages = input::load_pages(paths).await?;
    convert(pages, config).await
}

/// Convert files and write the rendered document to `output_path`.
///
/// The file is written atomically (temp file in the same directory, then
/// rename), so a crash never leaves a half-written document behind.
pub async fn convert_to_file<P: AsRef<Path>>(
    paths: &[P],
    output_path: impl AsRef<Path>,
    format: OutputFormat,
    config: &PipelineConfig,
) -> Result<ConversionOutput, MedNotesError> {
    let output = convert_files(paths, config).await?;
    let bytes = output.document.render(format)?;
    write_output(output_path.as_ref(), bytes).await?;
    Ok(output)
}

/// Synchronous wrapper around [`convert_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync<P: AsRef<Path>>(
    paths: &[P],
    config: &PipelineConfig,
) -> Result<ConversionOutput, MedNotesError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MedNotesError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_files(paths, config))
}

/// Fetch the remote model catalog.
///
/// Unlike resolution during a run, a failure here is reported.
pub async fn list_models(config: &PipelineConfig) -> Result<Vec<ModelDescriptor>, MedNotesError> {
    let backend = resolve_backend(config)?;
    backend.list_models().await.map_err(MedNotesError::Catalog)
}

/// Resolve the model a run with this configuration would use.
pub async fn preview_model(config: &PipelineConfig) -> Result<resolve::ResolvedModel, MedNotesError> {
    let backend = resolve_backend(config)?;
    Ok(resolve::resolve_model(backend.as_ref(), config).await)
}

/// The configured backend, or a Gemini client built from the API key.
pub fn resolve_backend(config: &PipelineConfig) -> Result<Arc<dyn VisionBackend>, MedNotesError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    Ok(Arc::new(GeminiClient::from_config(config)?))
}

/// Atomically write `bytes` to `path`, creating parent directories.
pub async fn write_output(path: &Path, bytes: Vec<u8>) -> Result<(), MedNotesError> {
    let path = path.to_path_buf();
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|e| MedNotesError::Internal(format!("write task failed: {e}")))?
        .map_err(|source| MedNotesError::OutputWriteFailed { path, source })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
