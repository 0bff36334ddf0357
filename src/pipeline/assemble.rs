//! Document assembly: ordered page results → [`AssembledDocument`].
//!
//! Each page contributes one group of blocks:
//!
//! ```text
//! [Heading "Page: <name>"]      (unless source headings are disabled)
//! Heading | Paragraph ...       (one per non-blank line of extracted text)
//!   or ErrorNotice              (the page's failure marker)
//! PageBreak
//! ```
//!
//! Classification is a pure function of one line, so identical model output
//! always yields an identical block sequence.

use crate::config::PipelineConfig;
use crate::document::{AssembledDocument, Block, MAX_HEADING_LEVEL};
use crate::output::{Outcome, PageResult};
use crate::pipeline::postprocess::clean_text;

/// Classify one line of extracted text.
///
/// Returns `None` for blank lines and for lines made only of `#` markers.
pub fn classify_line(line: &str) -> Option<Block> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 {
        return Some(Block::paragraph(line));
    }

    let text = line[hashes..].trim();
    if text.is_empty() {
        return None;
    }
    let level = hashes.min(usize::from(MAX_HEADING_LEVEL)) as u8;
    Some(Block::heading(level, text))
}

/// Build the document from page results.
///
/// Results are placed by ordinal regardless of the order they are given in.
pub fn assemble(results: &[PageResult], config: &PipelineConfig) -> AssembledDocument {
    let mut ordered: Vec<&PageResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.ordinal);

    let mut doc = AssembledDocument::new(config.document_title.clone());
    for result in ordered {
        if config.include_source_headings {
            doc.push(Block::heading(1, format!("Page: {}", result.name)));
        }
        match &result.outcome {
            Outcome::Extracted { text } => {
                for block in clean_text(text).lines().filter_map(classify_line) {
                    doc.push(block);
                }
            }
            Outcome::Failed { error } => doc.push(Block::ErrorNotice {
                text: error.marker(),
            }),
        }
        doc.push(Block::PageBreak);
    }
    doc
}
