//! Document discovery, fingerprinting and decoding.

mod discover;
mod fingerprint;
mod loader;
mod pdf;
mod xml;

pub use discover::discover;
pub use fingerprint::{fingerprint_bytes, fingerprint_file, fingerprint_or_composite};
pub use loader::FsDocumentLoader;
pub use pdf::PdfTextExtractor;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DocumentError;
use crate::models::task::Fingerprint;

/// Broad category of a document, which decides the extraction route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Decoded text (PDF text layer, XML, plain text).
    Text,
    /// Raw image bytes.
    Image,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Text => "text",
            DocumentKind::Image => "image",
        }
    }
}

/// File formats recognized by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Xml,
    PlainText,
    Image(&'static str),
    /// OFD e-invoice container. Discovered and listed, but not decoded.
    Ofd,
}

impl DocumentFormat {
    /// Detect the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "xml" => Some(DocumentFormat::Xml),
            "txt" => Some(DocumentFormat::PlainText),
            "jpg" | "jpeg" => Some(DocumentFormat::Image("image/jpeg")),
            "png" => Some(DocumentFormat::Image("image/png")),
            "bmp" => Some(DocumentFormat::Image("image/bmp")),
            "gif" => Some(DocumentFormat::Image("image/gif")),
            "webp" => Some(DocumentFormat::Image("image/webp")),
            "ofd" => Some(DocumentFormat::Ofd),
            _ => None,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentFormat::Image(_) => DocumentKind::Image,
            _ => DocumentKind::Text,
        }
    }
}

/// Decoded document content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Text(String),
    Image { bytes: Vec<u8>, mime: &'static str },
}

/// A decoded document ready for extraction.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub content: DocumentContent,
}

impl Document {
    pub fn text(path: impl Into<PathBuf>, fingerprint: Fingerprint, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fingerprint,
            content: DocumentContent::Text(text.into()),
        }
    }

    pub fn image(
        path: impl Into<PathBuf>,
        fingerprint: Fingerprint,
        bytes: Vec<u8>,
        mime: &'static str,
    ) -> Self {
        Self {
            path: path.into(),
            fingerprint,
            content: DocumentContent::Image { bytes, mime },
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self.content {
            DocumentContent::Text(_) => DocumentKind::Text,
            DocumentContent::Image { .. } => DocumentKind::Image,
        }
    }

    /// Decoded text, if this is a text document.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            DocumentContent::Text(t) => Some(t),
            DocumentContent::Image { .. } => None,
        }
    }
}

/// Decodes a file into a [`Document`].
///
/// Decoding is blocking; the orchestrator runs it on the blocking pool.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path, fingerprint: &Fingerprint) -> Result<Document, DocumentError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/INV.PDF")),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("scan.jpeg")).map(|f| f.kind()),
            Some(DocumentKind::Image)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("invoice.OFD")),
            Some(DocumentFormat::Ofd)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("invoice.docx")), None);
        assert_eq!(DocumentFormat::from_path(Path::new("README")), None);
    }
}
