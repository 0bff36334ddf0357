//! Input loading: turn user-supplied file paths into ordered [`Page`]s.
//!
//! The MIME type is sniffed from the file's magic bytes first and from its
//! extension second. A file whose extension claims an image but whose bytes
//! are unreadable still becomes a page: the failure is then reported inline
//! for that page by [`crate::pipeline::encode`], and the other pages proceed.

use crate::error::MedNotesError;
use crate::page::{mime_from_extension, sniff_mime, Page};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load every path in order; ordinals follow the slice order.
pub async fn load_pages<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Page>, MedNotesError> {
    if paths.is_empty() {
        return Err(MedNotesError::NoInput);
    }
    let mut pages = Vec::with_capacity(paths.len());
    for (ordinal, path) in paths.iter().enumerate() {
        pages.push(load_page(path.as_ref(), ordinal).await?);
    }
    Ok(pages)
}

/// Load one file as a page.
pub async fn load_page(path: &Path, ordinal: usize) -> Result<Page, MedNotesError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MedNotesError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => MedNotesError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => MedNotesError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let mime = sniff_mime(&bytes)
        .or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .and_then(mime_from_extension)
        })
        .ok_or_else(|| MedNotesError::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: "unrecognised file contents and extension".into(),
        })?;

    let name = display_name(path);
    debug!(
        "Loaded page {} '{}' ({}, {} bytes)",
        ordinal + 1,
        name,
        mime,
        bytes.len()
    );
    Ok(Page::new(ordinal, name, mime, bytes))
}

/// File name shown in headings and progress output.
fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}
