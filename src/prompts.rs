//! Instruction prompts sent alongside every page image.
//!
//! The prompt is the contract between the model and the
//! [assembler](crate::pipeline::assemble): the assembler recognises exactly
//! one piece of markup, a leading `#` on heading lines, and treats every other
//! line as body text. Anything else the model emits (bold markers, tables,
//! fences) would leak into the document verbatim, hence the explicit "no other
//! markup" rule.
//!
//! Callers can override the default via [`crate::config::PipelineConfig::prompt`].

/// Default extraction prompt.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r###"You are transcribing a page of medical notes (handwritten or printed) for a clinician.

Rules:
1. Extract ALL text on the page, in natural reading order.
2. Keep medical terms, drug names, doses, units, and abbreviations exactly as written.
3. Put each heading or section title on its own line, starting with "# ".
   Use "## " for sub-headings.
4. Put each paragraph, list item, or table row on its own line.
5. Do NOT use any other markup: no bold, no italics, no tables, no code fences.
6. If a word is illegible, write [illegible] in its place. Do not guess.
7. Output ONLY the transcription. No commentary, no preamble."###;

/// Resolve the prompt for a run.
pub fn extraction_prompt(custom: Option<&str>) -> &str {
    match custom {
        Some(p) if !p.trim().is_empty() => p,
        _ => DEFAULT_EXTRACTION_PROMPT,
    }
}
