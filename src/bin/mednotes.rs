//! CLI binary for mednotes.
//!
//! A thin shim over the library crate: maps flags onto `PipelineConfig`,
//! shows a live progress bar, warns about failed pages, and writes the
//! assembled document to a file or stdout.

use anyhow::{Context, Result};
use clap::Parser;
use mednotes::config::{DEFAULT_BASE_URL, DEFAULT_FALLBACK_MODEL, DEFAULT_MODEL_PREFERENCES};
use mednotes::pipeline::resolve::select_model;
use mednotes::{
    convert_files, list_models, write_output, BackoffPolicy, DispatchStrategy, OutputFormat,
    PipelineConfig, PipelineProgressCallback, ProgressCallback, SafetyThreshold,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Shorten to `max` characters, appending an ellipsis when cut.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    }
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page.
/// Pages may complete out of order under concurrent dispatch.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` supplies the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map_or(0.0, |t| t.elapsed().as_secs_f64())
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total_pages} pages…"))
        ));
    }

    fn on_model_resolved(&self, model: &str) {
        self.bar
            .println(format!("  {} model {}", dim("·"), bold(model)));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32, delay: Duration, reason: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}  attempt {} failed: {}  {}",
            yellow("↻"),
            page_num,
            attempt,
            truncate(reason, 60),
            dim(&format!("retry in {:.1}s", delay.as_secs_f64())),
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, text_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract two photographed pages to stdout (Markdown)
  mednotes page1.jpg page2.jpg

  # Write a file; format follows the extension (.md, .txt, .json)
  mednotes scans/*.png -o notes.md

  # One page at a time with a 2 s gap, for low rate limits
  mednotes --sequential --inter-page-delay-ms 2000 scans/*.png -o notes.md

  # More retries with fixed 5 s backoff
  mednotes --max-attempts 5 --backoff fixed --backoff-base-ms 5000 scan.jpg

  # Show the model catalog and which model would be used
  mednotes --list-models

  # Fail the process if any page could not be extracted
  mednotes --strict scans/*.png -o notes.md

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY        API key (GOOGLE_API_KEY is also accepted)
  MEDNOTES_MODEL        Model ID; skips catalog discovery
  MEDNOTES_BASE_URL     Override the API endpoint
  RUST_LOG              Log filter, e.g. mednotes=debug

FAILED PAGES:
  A page that cannot be extracted is kept in place as a visible
  "[EXTRACTION FAILED] Page N (name): reason" notice. The rest of the
  document is still written. Use --strict to exit non-zero in that case.
"#;

/// Extract text from medical note images with a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "mednotes",
    version,
    about = "Extract text from medical note images with a Vision LLM",
    long_about = "Send photographed or scanned medical notes (PNG, JPEG, WebP, or PDF) to a \
Gemini vision model page by page, with bounded retry on rate limits, and assemble the \
extracted text into one Markdown, text, or JSON document in upload order.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Page images or PDFs, in page order.
    #[arg(required_unless_present = "list_models")]
    inputs: Vec<PathBuf>,

    /// Write the document to this file instead of stdout.
    #[arg(short, long, env = "MEDNOTES_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format. Default: inferred from --output, else markdown.
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// API key for the Generative Language API.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API base URL.
    #[arg(long, env = "MEDNOTES_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Model ID (e.g. gemini-1.5-flash). Skips catalog discovery.
    #[arg(short, long, env = "MEDNOTES_MODEL")]
    model: Option<String>,

    /// Comma-separated model-name fragments, most preferred first.
    #[arg(long, value_delimiter = ',')]
    prefer: Vec<String>,

    /// Model used when the catalog is unavailable.
    #[arg(long, default_value = DEFAULT_FALLBACK_MODEL)]
    fallback_model: String,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "MEDNOTES_PROMPT")]
    prompt_file: Option<PathBuf>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens per page.
    #[arg(long, default_value_t = 8192)]
    max_output_tokens: u32,

    /// Safety-filter threshold applied to every category.
    #[arg(long, value_enum, default_value = "none")]
    safety: SafetyArg,

    /// Attempts per page, including the first (1–10).
    #[arg(long, env = "MEDNOTES_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// Backoff schedule between attempts.
    #[arg(long, value_enum, default_value = "exponential")]
    backoff: BackoffArg,

    /// Backoff base delay in milliseconds.
    #[arg(long, default_value_t = 2000)]
    backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    backoff_max_ms: u64,

    /// Exponential backoff jitter fraction (0.0–1.0).
    #[arg(long, default_value_t = 0.25)]
    jitter: f64,

    /// Process one page at a time instead of a concurrent pool.
    #[arg(long)]
    sequential: bool,

    /// Pause between pages in sequential mode, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    inter_page_delay_ms: u64,

    /// Pages in flight at once (1–16).
    #[arg(short, long, env = "MEDNOTES_CONCURRENCY", default_value_t = 3,
          value_parser = clap::value_parser!(u64).range(1..=16))]
    concurrency: u64,

    /// Document title.
    #[arg(long, default_value = "Medical Notes")]
    title: String,

    /// Omit the document title.
    #[arg(long)]
    no_title: bool,

    /// Omit the "Page: <name>" heading before each page.
    #[arg(long)]
    no_source_headings: bool,

    /// Per-request timeout in seconds.
    #[arg(long, env = "MEDNOTES_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Print the model catalog and the model that would be used, then exit.
    #[arg(long)]
    list_models: bool,

    /// Exit non-zero if any page failed.
    #[arg(long)]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "MEDNOTES_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Text,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SafetyArg {
    None,
    OnlyHigh,
    Medium,
    Low,
}

impl From<SafetyArg> for SafetyThreshold {
    fn from(v: SafetyArg) -> Self {
        match v {
            SafetyArg::None => SafetyThreshold::BlockNone,
            SafetyArg::OnlyHigh => SafetyThreshold::BlockOnlyHigh,
            SafetyArg::Medium => SafetyThreshold::BlockMediumAndAbove,
            SafetyArg::Low => SafetyThreshold::BlockLowAndAbove,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackoffArg {
    Fixed,
    Linear,
    Exponential,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar is the user-facing feedback; keep library logs quiet
    // while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.list_models;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Catalog mode ─────────────────────────────────────────────────────
    if cli.list_models {
        return print_catalog(&config).await;
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let output = convert_files(&cli.inputs, &config)
        .await
        .context("Conversion failed")?;

    let format = output_format(cli.format, cli.output.as_deref());
    let bytes = output
        .document
        .render(format)
        .context("Failed to render document")?;

    if let Some(ref path) = cli.output {
        write_output(path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(&bytes)
            .context("Failed to write to stdout")?;
        handle.flush().ok();
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        for page in output.failed_pages() {
            if let Some(err) = page.error() {
                eprintln!("{} {}", yellow("warning:"), err.marker());
            }
        }

        let stats = &output.stats;
        let destination = cli
            .output
            .as_ref()
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default();
        eprintln!(
            "{}  {}/{} pages  {} attempts  {}ms  {}{}",
            if stats.failed_pages == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.processed_pages,
            stats.total_pages,
            stats.total_attempts,
            stats.total_duration_ms,
            dim(&stats.model),
            destination,
        );
    }

    if cli.strict {
        output
            .into_result()
            .context("Strict mode: at least one page failed")?;
    }

    Ok(())
}

/// Print the catalog and the model a run would use.
async fn print_catalog(config: &PipelineConfig) -> Result<()> {
    let models = list_models(config)
        .await
        .context("Failed to fetch model catalog")?;

    let mut capable = 0usize;
    for m in &models {
        if m.supports_generation {
            capable += 1;
        }
        println!(
            "{} {:<40} {}",
            if m.supports_generation { green("✓") } else { dim("·") },
            m.id,
            dim(m.display_name.as_deref().unwrap_or("")),
        );
    }
    println!();
    println!("{} models, {} support generateContent", models.len(), capable);

    match config.model {
        Some(ref model) => println!("Would use: {} {}", bold(model), dim("(configured)")),
        None => {
            let resolved = select_model(&models, &config.model_preferences, &config.fallback_model);
            println!(
                "Would use: {} {}",
                bold(&resolved.primary),
                dim(&format!("({:?})", resolved.source))
            );
            if !resolved.alternates.is_empty() {
                println!("Alternates: {}", resolved.alternates.join(", "));
            }
        }
    }
    Ok(())
}

/// Explicit `--format`, else the output file's extension, else Markdown.
fn output_format(explicit: Option<FormatArg>, output: Option<&Path>) -> OutputFormat {
    if let Some(f) = explicit {
        return f.into();
    }
    match output
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputFormat::Json,
        Some("txt") | Some("text") => OutputFormat::Text,
        _ => OutputFormat::Markdown,
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let prompt = if let Some(ref path) = cli.prompt_file {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let base = Duration::from_millis(cli.backoff_base_ms);
    let max = Duration::from_millis(cli.backoff_max_ms);
    let backoff = match cli.backoff {
        BackoffArg::Fixed => BackoffPolicy::Fixed { delay: base },
        BackoffArg::Linear => BackoffPolicy::Linear { base, max },
        BackoffArg::Exponential => BackoffPolicy::Exponential {
            base,
            max,
            jitter: cli.jitter,
        },
    };

    let dispatch = if cli.sequential {
        DispatchStrategy::Sequential {
            inter_page_delay: Duration::from_millis(cli.inter_page_delay_ms),
        }
    } else {
        DispatchStrategy::Concurrent {
            workers: cli.concurrency as usize,
        }
    };

    let preferences: Vec<String> = if cli.prefer.is_empty() {
        DEFAULT_MODEL_PREFERENCES.iter().map(|s| s.to_string()).collect()
    } else {
        cli.prefer.clone()
    };

    let mut builder = PipelineConfig::builder()
        .base_url(&cli.base_url)
        .model_preferences(preferences)
        .fallback_model(&cli.fallback_model)
        .temperature(cli.temperature)
        .max_output_tokens(cli.max_output_tokens)
        .safety_threshold(cli.safety.into())
        .max_attempts(cli.max_attempts)
        .backoff(backoff)
        .dispatch(dispatch)
        .include_source_headings(!cli.no_source_headings)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    builder = builder.api_key_from_env();
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(prompt) = prompt {
        builder = builder.prompt(prompt);
    }
    if !cli.no_title {
        builder = builder.document_title(&cli.title);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
