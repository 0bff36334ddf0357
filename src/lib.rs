//! # mednotes
//!
//! Extract text from photographed or scanned medical notes with a hosted
//! Vision Language Model, and assemble the pages into one structured document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images / PDFs
//!  │
//!  ├─ 1. Input     load files, sniff MIME types, assign ordinals
//!  ├─ 2. Resolve   pick a model from the catalog (or the configured one)
//!  ├─ 3. Dispatch  sequential, or a bounded concurrent pool
//!  ├─ 4. Submit    one generateContent call per attempt, bounded retry/backoff
//!  ├─ 5. Assemble  "# " lines → headings, other lines → paragraphs, by ordinal
//!  └─ 6. Output    Markdown / plain text / JSON, written atomically
//! ```
//!
//! A page that fails never aborts the run. Its slot in the document holds a
//! visible `[EXTRACTION FAILED]` notice and the other pages complete normally.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mednotes::{convert_files, OutputFormat, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads GEMINI_API_KEY (or GOOGLE_API_KEY).
//!     let config = PipelineConfig::builder()
//!         .api_key_from_env()
//!         .document_title("Medical Notes")
//!         .build()?;
//!     let output = convert_files(&["scan-1.jpg", "scan-2.jpg"], &config).await?;
//!     let markdown = output.document.render(OutputFormat::Markdown)?;
//!     println!("{}", String::from_utf8_lossy(&markdown));
//!     eprintln!("{}/{} pages", output.stats.processed_pages, output.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mednotes` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mednotes = { version = "0.3", default-features = false }
//! ```
//!
//! ## Testing Without a Network
//!
//! Every remote call goes through [`VisionBackend`]. Supply your own
//! implementation with [`PipelineConfigBuilder::backend`] to run the whole
//! pipeline against a deterministic stub.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod gemini;
pub mod output;
pub mod page;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{ModelDescriptor, PageRequest, VisionBackend};
pub use config::{
    BackoffPolicy, DispatchStrategy, PipelineConfig, PipelineConfigBuilder, RetryPolicy,
    SafetyThreshold,
};
pub use convert::{
    convert, convert_files, convert_sync, convert_to_file, list_models, preview_model,
    write_output,
};
pub use document::{AssembledDocument, Block, OutputFormat};
pub use error::{BackendError, MedNotesError, PageError};
pub use gemini::GeminiClient;
pub use output::{ConversionOutput, ConversionStats, Outcome, PageResult};
pub use page::Page;
pub use pipeline::resolve::{ResolutionSource, ResolvedModel};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use stream::{convert_stream, PageStream};
