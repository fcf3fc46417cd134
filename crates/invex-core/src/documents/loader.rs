//! Filesystem document loader with invoice pre-filters.

use std::path::Path;

use tracing::debug;

use super::pdf::PdfTextExtractor;
use super::{Document, DocumentFormat, DocumentLoader, xml};
use crate::error::DocumentError;
use crate::models::config::DocumentConfig;
use crate::models::task::Fingerprint;

/// Loads documents from disk, applying size and keyword pre-filters.
pub struct FsDocumentLoader {
    config: DocumentConfig,
    pdf: PdfTextExtractor,
    keywords: Vec<String>,
}

impl FsDocumentLoader {
    pub fn new(config: DocumentConfig) -> Self {
        let keywords = config.keywords.iter().map(|k| k.to_lowercase()).collect();
        Self {
            pdf: PdfTextExtractor::new(config.max_pdf_pages),
            config,
            keywords,
        }
    }

    /// Number of distinct configured keywords found in `text`.
    pub fn keyword_hits(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| !k.is_empty() && lower.contains(k.as_str()))
            .count()
    }

    fn check_keywords(&self, text: &str) -> Result<(), DocumentError> {
        let required = self.config.min_keyword_hits;
        if required == 0 {
            return Ok(());
        }
        let found = self.keyword_hits(text);
        if found < required {
            return Err(DocumentError::NotAnInvoice { found, required });
        }
        Ok(())
    }
}

impl Default for FsDocumentLoader {
    fn default() -> Self {
        Self::new(DocumentConfig::default())
    }
}

impl DocumentLoader for FsDocumentLoader {
    fn load(&self, path: &Path, fingerprint: &Fingerprint) -> Result<Document, DocumentError> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| {
            DocumentError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("<none>")
                    .to_string(),
            )
        })?;

        let size = std::fs::metadata(path)?.len();
        let limit = self.config.max_file_size_bytes();
        if limit > 0 && size > limit {
            return Err(DocumentError::TooLarge { size, limit });
        }

        let data = std::fs::read(path)?;
        let text = match format {
            DocumentFormat::Image(mime) => {
                debug!("Loaded image {} ({} bytes)", path.display(), data.len());
                return Ok(Document::image(path, fingerprint.clone(), data, mime));
            }
            DocumentFormat::Pdf => self.pdf.extract(&data)?,
            DocumentFormat::Xml => xml::extract_text(&String::from_utf8_lossy(&data))?,
            DocumentFormat::PlainText => String::from_utf8_lossy(&data).into_owned(),
            DocumentFormat::Ofd => return Err(DocumentError::UnsupportedFormat("ofd".to_string())),
        };

        if text.trim().is_empty() {
            return Err(DocumentError::Empty(path.to_path_buf()));
        }
        self.check_keywords(&text)?;

        debug!("Decoded {} chars from {}", text.len(), path.display());
        Ok(Document::text(path, fingerprint.clone(), text))
    }
}
