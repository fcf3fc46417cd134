//! Text extraction from XML e-invoices.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::DocumentError;

/// Collect every text and CDATA node, one per line.
pub fn extract_text(xml: &str) -> Result<String, DocumentError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut lines = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|e| DocumentError::Xml(e.to_string()))?;
                if !text.trim().is_empty() {
                    lines.push(text.trim().to_string());
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).trim().to_string();
                if !text.is_empty() {
                    lines.push(text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(DocumentError::Xml(format!(
                    "at position {}: {}",
                    reader.error_position(),
                    e
                )));
            }
        }
    }

    Ok(lines.join("\n"))
}
