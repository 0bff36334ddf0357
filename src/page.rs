//! The unit of work: one image (or pass-through PDF) in upload order.

use serde::{Deserialize, Serialize};

/// MIME types the pipeline accepts.
pub const SUPPORTED_MIME_TYPES: &[&str] =
    &["image/png", "image/jpeg", "image/webp", "application/pdf"];

/// One page submitted for extraction.
///
/// Immutable once built. `ordinal` is the 0-based position in the original
/// upload order and is the only key used to reassemble results.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    ordinal: usize,
    name: String,
    mime_type: String,
    #[serde(skip)]
    bytes: Vec<u8>,
}

impl Page {
    /// Create a page with an explicit MIME type.
    pub fn new(
        ordinal: usize,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            ordinal,
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Create a page, sniffing the MIME type from the leading bytes.
    ///
    /// Returns `None` when the bytes match no supported format.
    pub fn from_bytes(ordinal: usize, name: impl Into<String>, bytes: Vec<u8>) -> Option<Self> {
        let mime = sniff_mime(&bytes)?;
        Some(Self::new(ordinal, name, mime, bytes))
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// 1-indexed page number for display.
    pub fn page_num(&self) -> usize {
        self.ordinal + 1
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Identify a supported format from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        return Some("application/pdf");
    }
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// Map a file extension onto a supported MIME type.
pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}
