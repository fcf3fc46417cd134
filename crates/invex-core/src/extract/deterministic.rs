//! Pattern-only extractor. No network, always available.

use async_trait::async_trait;
use tracing::debug;

use super::rules::patterns::{
    INVOICE_NUMBER_CN, INVOICE_NUMBER_DIGITAL, INVOICE_NUMBER_EN, INVOICE_TYPE, REMARKS,
};
use super::rules::{extract_amounts, extract_issue_date, extract_parties};
use super::{ExtractionContext, Extractor, source_ref};
use crate::documents::Document;
use crate::error::ExtractError;
use crate::models::invoice::{ExtractionMode, InvoiceFields, InvoiceRecord, ValidationStatus};

/// Regex-based invoice extractor.
#[derive(Debug, Default, Clone)]
pub struct DeterministicExtractor;

impl DeterministicExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Run every rule over `text`. No schema validation.
    pub fn extract_fields(&self, text: &str) -> InvoiceFields {
        let amounts = extract_amounts(text);
        let parties = extract_parties(text);

        let invoice_number = INVOICE_NUMBER_CN
            .captures(text)
            .or_else(|| INVOICE_NUMBER_EN.captures(text))
            .or_else(|| INVOICE_NUMBER_DIGITAL.captures(text))
            .map(|caps| caps[1].to_string());

        let fields = InvoiceFields {
            invoice_number,
            invoice_type: INVOICE_TYPE.captures(text).map(|caps| caps[1].to_string()),
            issue_date: extract_issue_date(text),
            seller_name: parties.seller_name,
            seller_tax_id: parties.seller_tax_id,
            buyer_name: parties.buyer_name,
            buyer_tax_id: parties.buyer_tax_id,
            pre_tax_amount: amounts.pre_tax,
            tax_amount: amounts.tax,
            total_amount: amounts.total,
            line_items: Vec::new(),
            remarks: REMARKS
                .captures(text)
                .map(|caps| caps[1].trim().to_string())
                .filter(|r| !r.is_empty()),
        };

        debug!(
            "Deterministic pass: number={:?}, total={:?}, completeness={:.2}",
            fields.invoice_number,
            fields.total_amount,
            fields.completeness()
        );
        fields
    }
}

#[async_trait]
impl Extractor for DeterministicExtractor {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn extract(&self, document: &Document, _ctx: &ExtractionContext) -> Result<InvoiceRecord, ExtractError> {
        let text = document.as_text().ok_or(ExtractError::UnsupportedDocument {
            strategy: self.name(),
            kind: document.kind().as_str(),
        })?;

        let fields = self.extract_fields(text);
        let missing = fields.missing_required();
        if !missing.is_empty() {
            return Err(ExtractError::SchemaValidation { missing });
        }

        Ok(InvoiceRecord::new(
            fields,
            ExtractionMode::RegexFallback,
            ValidationStatus::Unvalidated,
            source_ref(document),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::fingerprint_bytes;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const CN_INVOICE: &str = "电子发票（增值税专用发票）\n\
        发票号码：24442000000123456789\n\
        开票日期：2024年03月15日\n\
        购买方名称：上海某某科技有限公司\n\
        纳税人识别号：91310000MA1FL4XQ3N\n\
        销售方名称：北京某某贸易有限公司\n\
        纳税人识别号：911100007109353123\n\
        合 计 ¥100.00 ¥13.00\n\
        价税合计（大写） 壹佰壹拾叁圆整 （小写）¥113.00\n\
        备注：项目A\n";

    #[test]
    fn test_chinese_invoice_fields() {
        let fields = DeterministicExtractor::new().extract_fields(CN_INVOICE);

        assert_eq!(fields.invoice_number.as_deref(), Some("24442000000123456789"));
        assert_eq!(fields.invoice_type.as_deref(), Some("电子发票（增值税专用发票）"));
        assert_eq!(fields.issue_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(fields.buyer_name.as_deref(), Some("上海某某科技有限公司"));
        assert_eq!(fields.seller_tax_id.as_deref(), Some("911100007109353123"));
        assert_eq!(fields.pre_tax_amount, Some(Decimal::from_str("100.00").unwrap()));
        assert_eq!(fields.tax_amount, Some(Decimal::from_str("13.00").unwrap()));
        assert_eq!(fields.total_amount, Some(Decimal::from_str("113.00").unwrap()));
        assert_eq!(fields.remarks.as_deref(), Some("项目A"));
    }

    #[test]
    fn test_english_invoice_fields() {
        let text = "TAX INVOICE\nInvoice No: INV-2024-001\nInvoice Date: 2024-01-31\n\
                    Seller: Acme Ltd\nBill To: Globex Corp\nSubtotal: $200.00\nTax: $26.00\nTotal: $226.00\n";
        let fields = DeterministicExtractor::new().extract_fields(text);

        assert_eq!(fields.invoice_number.as_deref(), Some("INV-2024-001"));
        assert_eq!(fields.issue_date, NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(fields.seller_name.as_deref(), Some("Acme Ltd"));
        assert_eq!(fields.buyer_name.as_deref(), Some("Globex Corp"));
        assert_eq!(fields.total_amount, Some(Decimal::from_str("226.00").unwrap()));
        assert_eq!(fields.tax_amount, Some(Decimal::from_str("26.00").unwrap()));
    }

    #[tokio::test]
    async fn test_missing_required_is_schema_error() {
        let doc = Document::text("a.txt", fingerprint_bytes(b"a"), "Seller: Acme\nnothing else");
        let err = DeterministicExtractor::new()
            .extract(&doc, &ExtractionContext::single())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::SchemaValidation { .. }));
    }

    #[tokio::test]
    async fn test_image_is_unsupported() {
        let doc = Document::image("a.png", fingerprint_bytes(b"a"), vec![1, 2], "image/png");
        let err = DeterministicExtractor::new()
            .extract(&doc, &ExtractionContext::single())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExtractError::UnsupportedDocument {
                strategy: "deterministic",
                kind: "image"
            }
        );
    }

    #[tokio::test]
    async fn test_record_is_unvalidated_regex_fallback() {
        let doc = Document::text("cn.txt", fingerprint_bytes(CN_INVOICE.as_bytes()), CN_INVOICE);
        let record = DeterministicExtractor::new()
            .extract(&doc, &ExtractionContext::single())
            .await
            .unwrap();
        assert_eq!(record.extraction_mode, ExtractionMode::RegexFallback);
        assert_eq!(record.validation_status, ValidationStatus::Unvalidated);
        assert_eq!(record.source.path, std::path::PathBuf::from("cn.txt"));
    }
}
