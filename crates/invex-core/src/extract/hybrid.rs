//! Hybrid extractor: deterministic and model passes with cross-validation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::compare::ComparisonPolicy;
use super::deterministic::DeterministicExtractor;
use super::model::ModelExtractor;
use super::rules::{is_valid_invoice_number, is_valid_tax_id};
use super::{ExtractionContext, Extractor, source_ref};
use crate::documents::Document;
use crate::error::ExtractError;
use crate::models::invoice::{ExtractionMode, InvoiceFields, InvoiceRecord, ValidationStatus};

/// Runs both passes and compares them field by field.
///
/// The model value wins on disagreement; fields the model left out are
/// filled from the deterministic pass. When the model pass fails entirely
/// the deterministic result is returned as `unvalidated`, provided it has
/// the required fields. Model identifiers with an impossible format are
/// replaced by the deterministic value or dropped before comparison.
pub struct HybridExtractor {
    deterministic: DeterministicExtractor,
    model: Arc<ModelExtractor>,
    policy: ComparisonPolicy,
}

impl HybridExtractor {
    pub fn new(model: Arc<ModelExtractor>, policy: ComparisonPolicy) -> Self {
        Self {
            deterministic: DeterministicExtractor::new(),
            model,
            policy,
        }
    }

    fn degrade(
        &self,
        document: &Document,
        deterministic: InvoiceFields,
        reason: &str,
        cause: ExtractError,
    ) -> Result<InvoiceRecord, ExtractError> {
        if !deterministic.missing_required().is_empty() {
            debug!(
                "Cannot degrade {}: deterministic pass lacks required fields",
                document.path.display()
            );
            return Err(cause);
        }

        warn!(
            "Model pass failed for {} ({}), using deterministic result",
            document.path.display(),
            reason
        );
        Ok(InvoiceRecord::new(
            deterministic,
            ExtractionMode::Hybrid,
            ValidationStatus::Unvalidated,
            source_ref(document),
        )
        .with_warning(format!("model pass failed, deterministic result used: {}", reason)))
    }
}

/// Replace or drop model identifiers whose format cannot be right.
///
/// A malformed invoice number is replaced only when the text yields a
/// well-formed one; malformed tax ids are dropped and later filled from the
/// deterministic pass. Returns one warning per changed field.
fn check_formats(model: &mut InvoiceFields, deterministic: &InvoiceFields) -> Vec<String> {
    let mut warnings = Vec::new();

    let bad_number = model
        .invoice_number
        .clone()
        .filter(|number| !is_valid_invoice_number(number));
    let found = deterministic
        .invoice_number
        .as_deref()
        .filter(|number| is_valid_invoice_number(number));
    if let (Some(bad), Some(found)) = (bad_number, found) {
        warnings.push(format!(
            "model invoice number '{}' replaced by '{}' found in text",
            bad, found
        ));
        model.invoice_number = Some(found.to_string());
    }

    for (party, tax_id) in [
        ("seller", &mut model.seller_tax_id),
        ("buyer", &mut model.buyer_tax_id),
    ] {
        if tax_id.as_deref().is_some_and(|id| !is_valid_tax_id(id)) {
            if let Some(dropped) = tax_id.take() {
                warnings.push(format!("model {} tax id '{}' dropped: malformed", party, dropped));
            }
        }
    }
    warnings
}

#[async_trait]
impl Extractor for HybridExtractor {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn extract(&self, document: &Document, ctx: &ExtractionContext) -> Result<InvoiceRecord, ExtractError> {
        let text = document.as_text().ok_or(ExtractError::UnsupportedDocument {
            strategy: self.name(),
            kind: document.kind().as_str(),
        })?;

        let deterministic = self.deterministic.extract_fields(text);

        if !self.model.is_available().await {
            let missing = deterministic.missing_required();
            return self.degrade(
                document,
                deterministic,
                "provider unavailable",
                ExtractError::SchemaValidation { missing },
            );
        }

        let (mut model_fields, raw) = match self.model.fields_from_text(text).await {
            Ok(answer) => answer,
            Err(ExtractError::Provider(e)) if e.is_auth() => return Err(ExtractError::Provider(e)),
            Err(ExtractError::Provider(e)) if e.is_transient() && !ctx.is_final_attempt() => {
                return Err(ExtractError::Provider(e));
            }
            Err(e) => {
                let reason = e.to_string();
                return self.degrade(document, deterministic, &reason, e);
            }
        };

        let format_warnings = check_formats(&mut model_fields, &deterministic);
        for warning in &format_warnings {
            debug!("{}: {}", document.path.display(), warning);
        }

        let check = self.policy.compare(&deterministic, &model_fields);
        let status = if check.mismatches.is_empty() {
            if check.compared > 0 {
                ValidationStatus::Validated
            } else {
                ValidationStatus::Unvalidated
            }
        } else {
            ValidationStatus::Mismatched
        };

        if !check.mismatches.is_empty() {
            debug!(
                "{} mismatched fields for {}",
                check.mismatches.len(),
                document.path.display()
            );
        }

        let mut merged = model_fields;
        merged.fill_missing_from(&deterministic);

        let mut record = InvoiceRecord::new(merged, ExtractionMode::Hybrid, status, source_ref(document))
            .with_mismatches(check.mismatches)
            .with_raw_response(raw.text);
        for warning in format_warnings {
            record = record.with_warning(warning);
        }
        if check.compared == 0 {
            record = record.with_warning("no overlapping fields to cross-validate");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::fingerprint_bytes;
    use crate::error::ProviderError;
    use crate::extract::prompts::PromptSet;
    use crate::models::invoice::Field;
    use crate::testing::{ScriptedProvider, rate_limited};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const TEXT: &str = "发票号码：12345678\n销售方名称：Acme\n价税合计：¥100.00\n";

    fn doc() -> Document {
        Document::text("inv.txt", fingerprint_bytes(TEXT.as_bytes()), TEXT)
    }

    fn hybrid(provider: ScriptedProvider) -> HybridExtractor {
        let model = ModelExtractor::new(Arc::new(provider), PromptSet::default());
        HybridExtractor::new(Arc::new(model), ComparisonPolicy::default())
    }

    fn attempt(n: u32) -> ExtractionContext {
        ExtractionContext {
            attempt: n,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_agreement_is_validated() {
        let extractor = hybrid(ScriptedProvider::answering(
            r#"{"invoice_number": "12345678", "total_amount": "100.00", "buyer_name": "Globex"}"#,
        ));
        let record = extractor.extract(&doc(), &attempt(1)).await.unwrap();

        assert_eq!(record.validation_status, ValidationStatus::Validated);
        assert_eq!(record.extraction_mode, ExtractionMode::Hybrid);
        // model-missing seller filled from the deterministic pass
        assert_eq!(record.fields.seller_name.as_deref(), Some("Acme"));
        assert_eq!(record.fields.buyer_name.as_deref(), Some("Globex"));
    }

    #[tokio::test]
    async fn test_disagreement_is_mismatched_model_preferred() {
        let extractor = hybrid(ScriptedProvider::answering(
            r#"{"invoice_number": "12345678", "total_amount": 120.00}"#,
        ));
        let record = extractor.extract(&doc(), &attempt(1)).await.unwrap();

        assert_eq!(record.validation_status, ValidationStatus::Mismatched);
        assert_eq!(record.fields.total_amount, Some(Decimal::from_str("120.00").unwrap()));
        let mismatch = record.mismatch(Field::TotalAmount).unwrap();
        assert_eq!(mismatch.deterministic, "100.00");
        assert_eq!(mismatch.model, "120.0");
    }

    #[tokio::test]
    async fn test_malformed_model_invoice_number_is_replaced() {
        let extractor = hybrid(ScriptedProvider::answering(
            r#"{"invoice_number": "1234567", "total_amount": 100.00}"#,
        ));
        let record = extractor.extract(&doc(), &attempt(1)).await.unwrap();

        assert_eq!(record.fields.invoice_number.as_deref(), Some("12345678"));
        assert_eq!(record.validation_status, ValidationStatus::Validated);
        assert!(record.warnings[0].contains("'1234567' replaced by '12345678'"));
    }

    #[tokio::test]
    async fn test_malformed_number_kept_without_better_candidate() {
        let text = "Invoice No: INV-2024-7\nSeller: Acme\nTotal: 100.00\n";
        let document = Document::text("inv.txt", fingerprint_bytes(text.as_bytes()), text);
        let extractor = hybrid(ScriptedProvider::answering(
            r#"{"invoice_number": "INV-2024-7", "total_amount": 100.00}"#,
        ));
        let record = extractor.extract(&document, &attempt(1)).await.unwrap();

        assert_eq!(record.fields.invoice_number.as_deref(), Some("INV-2024-7"));
        assert!(record.warnings.iter().all(|w| !w.contains("replaced")));
    }

    #[tokio::test]
    async fn test_malformed_model_tax_id_is_dropped() {
        let text = "发票号码：12345678\n销售方名称：Acme\n纳税人识别号：91310000MA1FL8XQ30\n价税合计：¥100.00\n";
        let document = Document::text("inv.txt", fingerprint_bytes(text.as_bytes()), text);
        let extractor = hybrid(ScriptedProvider::answering(
            r#"{"invoice_number": "12345678", "total_amount": 100.00, "seller_tax_id": "ABC", "buyer_tax_id": "310101123456789"}"#,
        ));
        let record = extractor.extract(&document, &attempt(1)).await.unwrap();

        assert_eq!(record.fields.buyer_tax_id.as_deref(), Some("310101123456789"));
        assert_ne!(record.fields.seller_tax_id.as_deref(), Some("ABC"));
        assert!(
            record
                .warnings
                .iter()
                .any(|w| w.contains("seller tax id 'ABC' dropped"))
        );
    }

    #[tokio::test]
    async fn test_unavailable_model_degrades() {
        let provider = ScriptedProvider::answering("{}").unavailable();
        let record = hybrid(provider).extract(&doc(), &attempt(1)).await.unwrap();

        assert_eq!(record.validation_status, ValidationStatus::Unvalidated);
        assert_eq!(record.fields.invoice_number.as_deref(), Some("12345678"));
        assert_eq!(record.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_retried_until_final_attempt() {
        let extractor = hybrid(ScriptedProvider::failing(rate_limited()));

        let err = extractor.extract(&doc(), &attempt(1)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Provider(ref e) if e.is_transient()));

        let record = extractor.extract(&doc(), &attempt(3)).await.unwrap();
        assert_eq!(record.validation_status, ValidationStatus::Unvalidated);
    }

    #[tokio::test]
    async fn test_auth_error_propagates() {
        let extractor = hybrid(ScriptedProvider::failing(ProviderError::AuthConfig {
            provider: "scripted".into(),
            detail: "HTTP 401".into(),
        }));
        let err = extractor.extract(&doc(), &attempt(3)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Provider(ref e) if e.is_auth()));
    }

    #[tokio::test]
    async fn test_no_degradation_without_required_fields() {
        let text = "Just a receipt for coffee";
        let document = Document::text("r.txt", fingerprint_bytes(text.as_bytes()), text);
        let extractor = hybrid(ScriptedProvider::answering("not json at all"));

        let err = extractor.extract(&document, &attempt(1)).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Provider(ProviderError::MalformedResponse { .. })
        ));
    }
}
