//! Page encoding: validated bytes → base64 [`PageRequest`].
//!
//! Inline-data requests carry the page as standard base64 in the JSON body.
//! Before encoding, image pages are probed with the `image` crate so a
//! truncated or mislabelled upload fails here, locally and terminally, instead
//! of burning retry attempts on a request the server will reject anyway.

use crate::backend::PageRequest;
use crate::config::PipelineConfig;
use crate::error::BackendError;
use crate::page::{Page, SUPPORTED_MIME_TYPES};
use crate::prompts::extraction_prompt;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageReader;
use std::io::Cursor;
use tracing::debug;

/// Validate a page and build the request reused across its attempts.
pub fn build_request(page: &Page, config: &PipelineConfig) -> Result<PageRequest, BackendError> {
    validate_page(page)?;

    let data_base64 = STANDARD.encode(page.bytes());
    debug!(
        "Page {}: encoded {} bytes → {} bytes base64",
        page.page_num(),
        page.bytes().len(),
        data_base64.len()
    );

    Ok(PageRequest {
        prompt: extraction_prompt(config.prompt.as_deref()).to_string(),
        mime_type: page.mime_type().to_string(),
        data_base64,
        temperature: config.temperature,
        max_output_tokens: config.max_output_tokens,
        safety_threshold: config.safety_threshold,
    })
}

/// Reject empty, unsupported, or undecodable page bytes.
pub fn validate_page(page: &Page) -> Result<(), BackendError> {
    if page.bytes().is_empty() {
        return Err(BackendError::InvalidInput("page is empty".into()));
    }
    if !SUPPORTED_MIME_TYPES.contains(&page.mime_type()) {
        return Err(BackendError::InvalidInput(format!(
            "unsupported MIME type '{}'",
            page.mime_type()
        )));
    }
    if page.mime_type() == "application/pdf" {
        if !page.bytes().starts_with(b"%PDF") {
            return Err(BackendError::InvalidInput(
                "declared as PDF but has no %PDF header".into(),
            ));
        }
        return Ok(());
    }

    let (width, height) = ImageReader::new(Cursor::new(page.bytes()))
        .with_guessed_format()
        .map_err(|e| BackendError::InvalidInput(format!("unreadable image: {e}")))?
        .into_dimensions()
        .map_err(|e| BackendError::InvalidInput(format!("unreadable image: {e}")))?;
    if width == 0 || height == 0 {
        return Err(BackendError::InvalidInput(format!(
            "image has zero size ({width}x{height})"
        )));
    }
    Ok(())
}
