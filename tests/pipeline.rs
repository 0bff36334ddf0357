//! Pipeline integration tests against a scripted in-process backend.
//!
//! No network access: every run injects a [`VisionBackend`] stub whose replies
//! are keyed by page content, so pages can be told apart under concurrency.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use mednotes::{
    convert, convert_stream, convert_to_file, BackendError, BackoffPolicy, Block,
    DispatchStrategy, MedNotesError, ModelDescriptor, OutputFormat, Page, PageRequest,
    PipelineConfig, PipelineConfigBuilder, PipelineProgressCallback, VisionBackend,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Text(&'static str),
    RateLimitedThen(u32, &'static str),
    AlwaysRateLimited,
}

/// Replies per page (keyed by the base64 payload), with optional latency.
#[derive(Default)]
struct Stub {
    catalog: Option<Vec<ModelDescriptor>>,
    missing_models: Vec<String>,
    replies: HashMap<String, (Reply, u64)>,
    calls: Mutex<HashMap<String, u32>>,
    models_seen: Mutex<Vec<String>>,
}

impl Stub {
    fn with_pages(pages: &[Page], replies: Vec<(Reply, u64)>) -> Self {
        let replies = pages
            .iter()
            .zip(replies)
            .map(|(p, r)| (STANDARD.encode(p.bytes()), r))
            .collect();
        Self {
            catalog: Some(vec![ModelDescriptor::new("models/gemini-1.5-flash", true)]),
            replies,
            ..Self::default()
        }
    }

    fn calls_for(&self, page: &Page) -> u32 {
        let key = STANDARD.encode(page.bytes());
        self.calls.lock().unwrap().get(&key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl VisionBackend for Stub {
    fn name(&self) -> &str {
        "stub"
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        self.catalog
            .clone()
            .ok_or_else(|| BackendError::Network("connection refused".into()))
    }

    async fn generate(&self, model: &str, req: &PageRequest) -> Result<String, BackendError> {
        self.models_seen.lock().unwrap().push(model.to_string());
        if self.missing_models.iter().any(|m| m == model) {
            return Err(BackendError::ModelNotFound {
                model: model.to_string(),
                body: String::new(),
            });
        }

        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(req.data_base64.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let (reply, latency_ms) = self
            .replies
            .get(&req.data_base64)
            .cloned()
            .unwrap_or((Reply::Text("unscripted"), 0));
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        let rate_limited = BackendError::RateLimited {
            retry_after_secs: None,
            body: "quota".into(),
        };
        match reply {
            Reply::Text(t) => Ok(t.to_string()),
            Reply::RateLimitedThen(k, t) if n > k => Ok(t.to_string()),
            Reply::RateLimitedThen(..) | Reply::AlwaysRateLimited => Err(rate_limited),
        }
    }
}

/// A distinct 4x4 PNG per page.
fn png(shade: u8) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([shade, 0, 0, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn pages(names: &[&str]) -> Vec<Page> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Page::new(i, *name, "image/png", png(i as u8 * 40)))
        .collect()
}

fn base_config(backend: Arc<Stub>) -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .backend(backend)
        .backoff(BackoffPolicy::Fixed {
            delay: Duration::from_millis(1),
        })
        .dispatch(DispatchStrategy::Concurrent { workers: 4 })
        .include_source_headings(false)
}

fn group_text(group: &[Block]) -> Vec<String> {
    group
        .iter()
        .map(|b| match b {
            Block::Heading { text, .. } | Block::Paragraph { text } | Block::ErrorNotice { text } => {
                text.clone()
            }
            Block::PageBreak => "---".into(),
        })
        .collect()
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    retried: AtomicUsize,
    completed: AtomicUsize,
    errored: AtomicUsize,
    chars: AtomicUsize,
    finished: AtomicUsize,
    successes: AtomicUsize,
}

impl PipelineProgressCallback for Counting {
    fn on_page_start(&self, _page_num: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_retry(&self, _page_num: usize, _attempt: u32, _delay: Duration, _reason: &str) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page_num: usize, _total: usize, text_len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.chars.fetch_add(text_len, Ordering::SeqCst);
    }
    fn on_page_error(&self, _page_num: usize, _total: usize, _error: &str) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }
    fn on_conversion_complete(&self, _total: usize, success_count: usize) {
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.successes.store(success_count, Ordering::SeqCst);
    }
}

// ── Ordering ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_results_follow_upload_order() {
    let input = pages(&["a.png", "b.png", "c.png", "d.png"]);
    // Later pages answer first.
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![
            (Reply::Text("# Visit A\nalpha"), 80),
            (Reply::Text("# Visit B\nbeta"), 60),
            (Reply::Text("# Visit C\ngamma"), 40),
            (Reply::Text("# Visit D\ndelta"), 20),
        ],
    ));
    let config = base_config(stub).build().unwrap();

    let output = assert_ok!(convert(input, &config).await);

    let ordinals: Vec<usize> = output.pages.iter().map(|p| p.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2, 3]);

    let groups = output.document.page_groups();
    assert_eq!(groups.len(), 4);
    assert_eq!(groups[0], &[Block::heading(1, "Visit A"), Block::paragraph("alpha")][..]);
    assert_eq!(group_text(groups[3]), vec!["Visit D", "delta"]);
}

#[tokio::test]
async fn sequential_dispatch_keeps_order() {
    let input = pages(&["a.png", "b.png", "c.png"]);
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![
            (Reply::Text("one"), 10),
            (Reply::Text("two"), 0),
            (Reply::Text("three"), 5),
        ],
    ));
    let config = base_config(stub)
        .dispatch(DispatchStrategy::Sequential {
            inter_page_delay: Duration::from_millis(1),
        })
        .build()
        .unwrap();

    let output = assert_ok!(convert(input, &config).await);
    let texts: Vec<&str> = output.pages.iter().filter_map(|p| p.text()).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}

// ── Retry ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limits_below_the_bound_recover() {
    let input = pages(&["a.png"]);
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![(Reply::RateLimitedThen(2, "recovered"), 0)],
    ));
    let config = base_config(Arc::clone(&stub)).max_attempts(3).build().unwrap();

    let output = assert_ok!(convert(input.clone(), &config).await);

    assert_eq!(output.stats.failed_pages, 0);
    assert_eq!(output.pages[0].text(), Some("recovered"));
    assert_eq!(output.pages[0].attempts, 3);
    assert_eq!(output.stats.total_attempts, 3);
    assert_eq!(stub.calls_for(&input[0]), 3);
}

#[tokio::test]
async fn exhausted_page_keeps_its_slot_and_file_is_written() {
    let input = pages(&["a.png", "b.png", "c.png"]);
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![
            (Reply::Text("# Intake\nBP 120/80"), 0),
            (Reply::AlwaysRateLimited, 0),
            (Reply::Text("Follow up in 2 weeks"), 0),
        ],
    ));
    let config = base_config(Arc::clone(&stub)).max_attempts(3).build().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.md");
    let paths: Vec<_> = input
        .iter()
        .map(|p| {
            let f = dir.path().join(p.name());
            std::fs::write(&f, p.bytes()).unwrap();
            f
        })
        .collect();

    let output = assert_ok!(convert_to_file(&paths, &path, OutputFormat::Markdown, &config).await);

    assert_eq!(stub.calls_for(&input[1]), 3);
    assert_eq!(output.stats.failed_pages, 1);
    assert_eq!(output.stats.processed_pages, 2);

    let groups = output.document.page_groups();
    assert_eq!(groups.len(), 3);
    assert_eq!(group_text(groups[0]), vec!["Intake", "BP 120/80"]);
    match groups[1] {
        [Block::ErrorNotice { text }] => {
            assert!(text.starts_with("[EXTRACTION FAILED] Page 2 (b.png)"), "{text}");
            assert!(text.contains("3 attempts"), "{text}");
        }
        other => panic!("expected a single error notice, got {other:?}"),
    }
    assert_eq!(group_text(groups[2]), vec!["Follow up in 2 weeks"]);

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("BP 120/80"));
    assert!(written.contains("[EXTRACTION FAILED] Page 2 (b.png)"));
    assert!(written.contains("Follow up in 2 weeks"));
    assert!(written.find("BP 120/80") < written.find("[EXTRACTION FAILED]"));

    let err = assert_err!(output.into_result());
    assert!(matches!(err, MedNotesError::PartialFailure { failed: 1, total: 3 }));
}

#[tokio::test]
async fn every_page_failing_still_produces_a_document() {
    let input = pages(&["a.png", "b.png"]);
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![(Reply::AlwaysRateLimited, 0), (Reply::AlwaysRateLimited, 0)],
    ));
    let config = base_config(stub)
        .max_attempts(1)
        .document_title("Medical Notes")
        .build()
        .unwrap();

    let output = assert_ok!(convert(input, &config).await);

    assert_eq!(output.stats.failed_pages, 2);
    let md = output.document.to_markdown();
    assert!(md.starts_with("# Medical Notes\n"));
    assert_eq!(md.matches("[EXTRACTION FAILED]").count(), 2);
}

// ── Determinism ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_runs_assemble_identical_documents() {
    let replies = || {
        vec![
            (Reply::Text("```markdown\n# Plan\n\n\n\nRest   \n```"), 30),
            (Reply::RateLimitedThen(1, "## Meds\nIbuprofen 200mg"), 0),
        ]
    };
    let input = pages(&["a.png", "b.png"]);

    let mut documents = Vec::new();
    for _ in 0..2 {
        let stub = Arc::new(Stub::with_pages(&input, replies()));
        let config = base_config(stub)
            .include_source_headings(true)
            .document_title("Medical Notes")
            .build()
            .unwrap();
        documents.push(assert_ok!(convert(input.clone(), &config).await).document);
    }

    assert_eq!(documents[0], documents[1]);
    assert_eq!(
        documents[0].page_groups()[0],
        &[
            Block::heading(1, "Page: a.png"),
            Block::heading(1, "Plan"),
            Block::paragraph("Rest"),
        ][..]
    );
}

// ── Model resolution ─────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_model_moves_page_to_next_candidate() {
    let input = pages(&["a.png"]);
    let mut stub = Stub::with_pages(&input, vec![(Reply::Text("ok"), 0)]);
    stub.catalog = Some(vec![
        ModelDescriptor::new("models/gemini-1.5-flash", true),
        ModelDescriptor::new("models/gemini-2.0-flash", true),
        ModelDescriptor::new("models/embedding-001", false),
    ]);
    stub.missing_models = vec!["gemini-1.5-flash".into()];
    let stub = Arc::new(stub);
    let config = base_config(Arc::clone(&stub)).build().unwrap();

    let output = assert_ok!(convert(input, &config).await);

    assert_eq!(output.stats.model, "gemini-1.5-flash");
    assert_eq!(output.pages[0].model, "gemini-2.0-flash");
    assert_eq!(output.pages[0].text(), Some("ok"));
    assert_eq!(
        *stub.models_seen.lock().unwrap(),
        vec!["gemini-1.5-flash".to_string(), "gemini-2.0-flash".to_string()]
    );
}

#[tokio::test]
async fn unreachable_catalog_falls_back() {
    let input = pages(&["a.png"]);
    let mut stub = Stub::with_pages(&input, vec![(Reply::Text("ok"), 0)]);
    stub.catalog = None;
    let config = base_config(Arc::new(stub))
        .fallback_model("vision-fallback")
        .build()
        .unwrap();

    let output = assert_ok!(convert(input, &config).await);
    assert_eq!(output.stats.model, "vision-fallback");
    assert_eq!(output.stats.failed_pages, 0);
}

#[tokio::test]
async fn configured_model_skips_the_catalog() {
    let input = pages(&["a.png"]);
    let mut stub = Stub::with_pages(&input, vec![(Reply::Text("ok"), 0)]);
    stub.catalog = None;
    let stub = Arc::new(stub);
    let config = base_config(Arc::clone(&stub))
        .model("models/custom-vision")
        .build()
        .unwrap();

    let output = assert_ok!(convert(input, &config).await);
    assert_eq!(output.pages[0].model, "custom-vision");
}

// ── Progress and streaming ───────────────────────────────────────────────────

#[tokio::test]
async fn progress_callback_sees_every_page() {
    let input = pages(&["a.png", "b.png", "c.png"]);
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![
            (Reply::Text("one"), 0),
            (Reply::RateLimitedThen(1, "two"), 0),
            (Reply::AlwaysRateLimited, 0),
        ],
    ));
    let counting = Arc::new(Counting::default());
    let config = base_config(stub)
        .max_attempts(2)
        .progress_callback(Arc::clone(&counting) as Arc<dyn PipelineProgressCallback>)
        .build()
        .unwrap();

    assert_ok!(convert(input, &config).await);

    assert_eq!(counting.started.load(Ordering::SeqCst), 3);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 2);
    assert_eq!(counting.errored.load(Ordering::SeqCst), 1);
    // One retry for page 2, one before page 3 gives up.
    assert_eq!(counting.retried.load(Ordering::SeqCst), 2);
    assert_eq!(counting.successes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn completed_length_counts_cleaned_text() {
    let input = pages(&["a.png"]);
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![(Reply::Text("```markdown\nBP 120/80\n```"), 0)],
    ));
    let counting = Arc::new(Counting::default());
    let config = base_config(stub)
        .progress_callback(Arc::clone(&counting) as Arc<dyn PipelineProgressCallback>)
        .build()
        .unwrap();

    assert_ok!(convert(input, &config).await);
    assert_eq!(counting.chars.load(Ordering::SeqCst), "BP 120/80\n".chars().count());
}

#[tokio::test]
async fn drained_stream_reports_completion() {
    let input = pages(&["a.png", "b.png", "c.png"]);
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![
            (Reply::Text("one"), 20),
            (Reply::AlwaysRateLimited, 0),
            (Reply::Text("three"), 0),
        ],
    ));
    let counting = Arc::new(Counting::default());
    let config = base_config(stub)
        .max_attempts(1)
        .progress_callback(Arc::clone(&counting) as Arc<dyn PipelineProgressCallback>)
        .build()
        .unwrap();

    let mut stream = assert_ok!(convert_stream(input, &config).await);
    let mut seen = 0;
    while let Some(_result) = stream.next().await {
        assert_eq!(counting.finished.load(Ordering::SeqCst), 0);
        seen += 1;
    }

    assert_eq!(seen, 3);
    assert_eq!(counting.finished.load(Ordering::SeqCst), 1);
    assert_eq!(counting.successes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stream_yields_every_page() {
    let input = pages(&["a.png", "b.png"]);
    let stub = Arc::new(Stub::with_pages(
        &input,
        vec![(Reply::Text("slow"), 40), (Reply::Text("fast"), 0)],
    ));
    let config = base_config(stub).build().unwrap();

    let stream = assert_ok!(convert_stream(input, &config).await);
    let mut results: Vec<_> = stream.collect().await;
    assert_eq!(results.len(), 2);

    results.sort_by_key(|r| r.ordinal);
    assert_eq!(results[0].text(), Some("slow"));
    assert_eq!(results[1].text(), Some("fast"));
}

#[tokio::test]
async fn stream_rejects_empty_input() {
    let config = base_config(Arc::new(Stub::default())).build().unwrap();
    match convert_stream(Vec::new(), &config).await {
        Err(MedNotesError::NoInput) => {}
        Err(other) => panic!("expected NoInput, got {other}"),
        Ok(_) => panic!("expected NoInput, got a stream"),
    }
}
