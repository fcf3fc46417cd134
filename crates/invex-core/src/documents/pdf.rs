//! PDF text extraction using lopdf and pdf-extract.

use lopdf::Document;
use tracing::{debug, trace};

use crate::error::DocumentError;

/// Text extractor for PDFs with an embedded text layer.
pub struct PdfTextExtractor {
    max_pages: usize,
}

impl PdfTextExtractor {
    /// Create an extractor that reads at most `max_pages` pages (0 = all).
    pub fn new(max_pages: usize) -> Self {
        Self { max_pages }
    }

    /// Extract text from PDF bytes.
    ///
    /// Tries lopdf page by page first and falls back to pdf-extract over the
    /// whole (decrypted) document when lopdf yields nothing.
    pub fn extract(&self, data: &[u8]) -> Result<String, DocumentError> {
        let mut doc = Document::load_mem(data).map_err(|e| DocumentError::Pdf(e.to_string()))?;

        // Handle PDFs with empty password encryption
        let mut raw = None;
        if doc.is_encrypted() {
            doc.decrypt("")
                .map_err(|_| DocumentError::Pdf("encrypted with a non-empty password".into()))?;
            debug!("Decrypted PDF with empty password");

            let mut decrypted = Vec::new();
            doc.save_to(&mut decrypted)
                .map_err(|e| DocumentError::Pdf(format!("failed to save decrypted PDF: {}", e)))?;
            raw = Some(decrypted);
        }

        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        if pages.is_empty() {
            return Err(DocumentError::Pdf("document has no pages".into()));
        }

        let selected = if self.max_pages == 0 {
            &pages[..]
        } else {
            &pages[..pages.len().min(self.max_pages)]
        };

        let mut text = String::new();
        for page in selected {
            match doc.extract_text(&[*page]) {
                Ok(page_text) if !page_text.trim().is_empty() => {
                    if !text.is_empty() {
                        text.push_str("\n\n");
                    }
                    text.push_str(page_text.trim());
                }
                Ok(_) => trace!("Page {} has no text layer", page),
                Err(e) => trace!("lopdf failed on page {}: {}", page, e),
            }
        }

        if !text.is_empty() {
            debug!(
                "lopdf extracted {} chars from {} of {} pages",
                text.len(),
                selected.len(),
                pages.len()
            );
            return Ok(text);
        }

        debug!("lopdf found no text, falling back to pdf-extract");
        let bytes = raw.as_deref().unwrap_or(data);
        pdf_extract::extract_text_from_mem(bytes)
            .map(|t| t.trim().to_string())
            .map_err(|e| DocumentError::Pdf(e.to_string()))
    }
}

impl Default for PdfTextExtractor {
    fn default() -> Self {
        Self::new(5)
    }
}
