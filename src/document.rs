//! The assembled document: an ordered list of structural blocks.
//!
//! [`crate::pipeline::assemble`] builds an [`AssembledDocument`] once, after
//! every page has a result. Rendering is a separate, pure step so the same
//! document can be written as Markdown, plain text, or JSON.

use crate::error::MedNotesError;
use serde::{Deserialize, Serialize};

/// Deepest heading level emitted.
pub const MAX_HEADING_LEVEL: u8 = 6;

/// One structural element of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Section heading, `level` in `1..=6`.
    Heading { level: u8, text: String },
    /// Body text.
    Paragraph { text: String },
    /// Visible marker standing in for a page that failed.
    ///
    /// Paragraph-class: it carries one line of body text and renders like a
    /// paragraph in plain text. JSON consumers that only know headings and
    /// paragraphs can treat it as a paragraph.
    ErrorNotice { text: String },
    /// End of one page's group.
    PageBreak,
}

impl Block {
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Block::Heading {
            level: level.clamp(1, MAX_HEADING_LEVEL),
            text: text.into(),
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Block::Paragraph { text: text.into() }
    }
}

/// Output serialisation for an [`AssembledDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// CommonMark with `---` between pages.
    #[default]
    Markdown,
    /// Plain lines, pages separated by a form feed.
    Text,
    /// The block list as pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
        }
    }
}

/// Ordered blocks plus an optional title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledDocument {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    pub blocks: Vec<Block>,
}

impl AssembledDocument {
    pub fn new(title: Option<String>) -> Self {
        Self {
            title,
            blocks: Vec::new(),
        }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Blocks of each page, split at page breaks. Breaks are not included.
    pub fn page_groups(&self) -> Vec<&[Block]> {
        if self.blocks.is_empty() {
            return Vec::new();
        }
        let mut groups: Vec<&[Block]> = self
            .blocks
            .split(|b| matches!(b, Block::PageBreak))
            .collect();
        // A trailing break leaves an empty tail.
        if self.blocks.last() == Some(&Block::PageBreak) {
            groups.pop();
        }
        groups
    }

    /// Render as Markdown.
    ///
    /// The title becomes the only level-1 heading and every other heading is
    /// shifted one level down.
    pub fn to_markdown(&self) -> String {
        let shift = u8::from(self.title.is_some());
        let mut parts: Vec<String> = Vec::with_capacity(self.blocks.len() + 1);

        if let Some(ref title) = self.title {
            parts.push(format!("# {title}"));
        }
        for block in &self.blocks {
            parts.push(match block {
                Block::Heading { level, text } => {
                    let level = level.saturating_add(shift).min(MAX_HEADING_LEVEL);
                    format!("{} {}", "#".repeat(usize::from(level)), text)
                }
                Block::Paragraph { text } => text.clone(),
                Block::ErrorNotice { text } => format!("> **\u{26A0} {text}**"),
                Block::PageBreak => "---".to_string(),
            });
        }

        finish_lines(parts.join("\n\n"))
    }

    /// Render as plain text.
    pub fn to_text(&self) -> String {
        let mut lines: Vec<String> = Vec::with_capacity(self.blocks.len() + 2);

        if let Some(ref title) = self.title {
            lines.push(title.clone());
            lines.push(String::new());
        }
        for block in &self.blocks {
            match block {
                Block::Heading { text, .. }
                | Block::Paragraph { text }
                | Block::ErrorNotice { text } => lines.push(text.clone()),
                Block::PageBreak => lines.push("\u{000C}".to_string()),
            }
        }

        finish_lines(lines.join("\n"))
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self).map(finish_lines)
    }

    /// Render in the requested format.
    pub fn render(&self, format: OutputFormat) -> Result<Vec<u8>, MedNotesError> {
        let s = match format {
            OutputFormat::Markdown => self.to_markdown(),
            OutputFormat::Text => self.to_text(),
            OutputFormat::Json => self.to_json()?,
        };
        Ok(s.into_bytes())
    }
}

/// Ensure exactly one trailing newline on non-empty output.
fn finish_lines(s: String) -> String {
    let trimmed = s.trim_end_matches('\n');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(title: Option<&str>) -> AssembledDocument {
        let mut doc = AssembledDocument::new(title.map(str::to_string));
        doc.push(Block::heading(1, "Page: a.png"));
        doc.push(Block::heading(1, "Diagnosis"));
        doc.push(Block::paragraph("Patient presents with fever."));
        doc.push(Block::PageBreak);
        doc.push(Block::heading(1, "Page: b.png"));
        doc.push(Block::ErrorNotice {
            text: "[EXTRACTION FAILED] Page 2 (b.png): blocked".into(),
        });
        doc.push(Block::PageBreak);
        doc
    }

    #[test]
    fn heading_level_is_clamped() {
        assert_eq!(Block::heading(0, "x"), Block::heading(1, "x"));
        assert!(matches!(Block::heading(9, "x"), Block::Heading { level: 6, .. }));
    }

    #[test]
    fn page_groups_split_on_breaks() {
        let doc = sample(None);
        let groups = doc.page_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 3);
        assert!(matches!(groups[1][1], Block::ErrorNotice { .. }));
    }

    #[test]
    fn markdown_without_title() {
        let md = sample(None).to_markdown();
        assert!(md.starts_with("# Page: a.png\n\n# Diagnosis\n\nPatient presents with fever.\n\n---"));
        assert!(md.contains("> **\u{26A0} [EXTRACTION FAILED] Page 2 (b.png): blocked**"));
        assert!(md.ends_with("---\n"));
    }

    #[test]
    fn markdown_title_shifts_headings() {
        let md = sample(Some("Medical Notes")).to_markdown();
        assert!(md.starts_with("# Medical Notes\n\n## Page: a.png\n\n## Diagnosis"));
    }

    #[test]
    fn text_uses_form_feed_between_pages() {
        let txt = sample(None).to_text();
        assert_eq!(txt.matches('\u{000C}').count(), 2);
        assert!(txt.starts_with("Page: a.png\nDiagnosis\n"));
    }

    #[test]
    fn json_tags_block_types() {
        let json = sample(Some("T")).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["title"], "T");
        assert_eq!(value["blocks"][0]["type"], "heading");
        assert_eq!(value["blocks"][3]["type"], "page_break");
        assert_eq!(value["blocks"][5]["type"], "error_notice");
        assert_eq!(
            value["blocks"][5]["text"],
            "[EXTRACTION FAILED] Page 2 (b.png): blocked"
        );
        let back: AssembledDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample(Some("T")));
    }

    #[test]
    fn empty_document_renders_empty() {
        let doc = AssembledDocument::default();
        assert_eq!(doc.to_markdown(), "");
        assert!(doc.page_groups().is_empty());
    }
}
