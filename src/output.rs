//! Per-page results, run statistics, and the combined conversion output.

use crate::document::AssembledDocument;
use crate::error::{MedNotesError, PageError};
use serde::{Deserialize, Serialize};

/// What happened to one page.
///
/// The discriminant is explicit: failure is never inferred from the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The model returned text for the page.
    Extracted { text: String },
    /// Every permitted attempt failed, or a terminal error occurred.
    Failed { error: PageError },
}

/// Result for a single page. Every submitted page yields exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-based position in upload order.
    pub ordinal: usize,

    /// Display name of the page's source.
    pub name: String,

    pub outcome: Outcome,

    /// Requests sent for this page, across all candidate models.
    pub attempts: u32,

    /// Model that produced the outcome. Empty if no request was sent.
    pub model: String,

    /// Wall-clock time spent on the page, including backoff sleeps.
    pub duration_ms: u64,
}

impl PageResult {
    /// 1-indexed page number.
    pub fn page_num(&self) -> usize {
        self.ordinal + 1
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Extracted { .. })
    }

    /// Extracted text, if the page succeeded.
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Extracted { text } => Some(text),
            Outcome::Failed { .. } => None,
        }
    }

    /// The page's error, if it failed.
    pub fn error(&self) -> Option<&PageError> {
        match &self.outcome {
            Outcome::Extracted { .. } => None,
            Outcome::Failed { error } => Some(error),
        }
    }
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Pages submitted.
    pub total_pages: usize,

    /// Pages that produced text.
    pub processed_pages: usize,

    /// Pages that ended in a [`PageError`].
    pub failed_pages: usize,

    /// Requests sent across all pages.
    pub total_attempts: u64,

    /// Model chosen by the resolver.
    pub model: String,

    /// Time spent resolving the model.
    pub resolve_duration_ms: u64,

    /// Time spent dispatching pages.
    pub dispatch_duration_ms: u64,

    /// Wall-clock time for the whole run.
    pub total_duration_ms: u64,
}

impl ConversionStats {
    pub(crate) fn tally(pages: &[PageResult]) -> Self {
        let processed = pages.iter().filter(|p| p.is_success()).count();
        Self {
            total_pages: pages.len(),
            processed_pages: processed,
            failed_pages: pages.len() - processed,
            total_attempts: pages.iter().map(|p| u64::from(p.attempts)).sum(),
            ..Default::default()
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// The assembled document, ready to render.
    pub document: AssembledDocument,

    /// Per-page results in ordinal order.
    pub pages: Vec<PageResult>,

    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Results of pages that failed, in ordinal order.
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageResult> {
        self.pages.iter().filter(|p| !p.is_success())
    }

    /// Treat any page failure as an error.
    pub fn into_result(self) -> Result<Self, MedNotesError> {
        if self.stats.failed_pages > 0 {
            return Err(MedNotesError::PartialFailure {
                failed: self.stats.failed_pages,
                total: self.stats.total_pages,
            });
        }
        Ok(self)
    }
}
