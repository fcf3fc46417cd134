//! Invoice record model produced by the extraction strategies.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::documents::DocumentKind;
use crate::models::task::Fingerprint;

/// Outcome of cross-validation for a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Deterministic and model passes agree on every compared field.
    Validated,
    /// At least one compared field disagrees.
    Mismatched,
    /// Only one pass produced a result.
    #[default]
    Unvalidated,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Validated => "validated",
            ValidationStatus::Mismatched => "mismatched",
            ValidationStatus::Unvalidated => "unvalidated",
        }
    }
}

/// Extraction mode, both as requested in configuration and as recorded on a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Deterministic + model with cross-validation.
    #[default]
    Hybrid,
    /// Model over decoded text.
    Llm,
    /// Model over raw image bytes.
    Vision,
    /// Pattern matching only.
    RegexFallback,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::Hybrid => "hybrid",
            ExtractionMode::Llm => "llm",
            ExtractionMode::Vision => "vision",
            ExtractionMode::RegexFallback => "regex_fallback",
        }
    }

    /// Whether this mode needs a provider adapter.
    pub fn needs_provider(&self) -> bool {
        !matches!(self, ExtractionMode::RegexFallback)
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "hybrid" => Ok(ExtractionMode::Hybrid),
            "llm" => Ok(ExtractionMode::Llm),
            "vision" => Ok(ExtractionMode::Vision),
            "regex_fallback" | "regex" => Ok(ExtractionMode::RegexFallback),
            other => Err(format!(
                "unknown extraction mode '{}' (expected hybrid, llm, vision or regex_fallback)",
                other
            )),
        }
    }
}

/// Names of the fields compared during cross-validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    InvoiceNumber,
    IssueDate,
    SellerName,
    BuyerName,
    SellerTaxId,
    BuyerTaxId,
    PreTaxAmount,
    TaxAmount,
    TotalAmount,
}

impl Field {
    /// All comparable fields in report order.
    pub const ALL: [Field; 9] = [
        Field::InvoiceNumber,
        Field::IssueDate,
        Field::SellerName,
        Field::BuyerName,
        Field::SellerTaxId,
        Field::BuyerTaxId,
        Field::PreTaxAmount,
        Field::TaxAmount,
        Field::TotalAmount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::InvoiceNumber => "invoice_number",
            Field::IssueDate => "issue_date",
            Field::SellerName => "seller_name",
            Field::BuyerName => "buyer_name",
            Field::SellerTaxId => "seller_tax_id",
            Field::BuyerTaxId => "buyer_tax_id",
            Field::PreTaxAmount => "pre_tax_amount",
            Field::TaxAmount => "tax_amount",
            Field::TotalAmount => "total_amount",
        }
    }

    pub fn is_amount(&self) -> bool {
        matches!(
            self,
            Field::PreTaxAmount | Field::TaxAmount | Field::TotalAmount
        )
    }
}

/// A single line item on the invoice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Goods or service description.
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,

    /// Line amount before tax.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,

    /// Tax rate as printed (e.g. "13%").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_rate: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Decimal>,
}

/// Extracted invoice fields. Every field is optional until schema validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,

    /// Invoice type as printed (e.g. "VAT special invoice").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_tax_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_tax_id: Option<String>,

    /// Amount before tax.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_tax_amount: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Decimal>,

    /// Amount including tax.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<LineItem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

impl InvoiceFields {
    /// Names of required fields that are absent.
    ///
    /// The invoice number and at least one amount are mandatory.
    pub fn missing_required(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self
            .invoice_number
            .as_deref()
            .map(|n| n.trim().is_empty())
            .unwrap_or(true)
        {
            missing.push(Field::InvoiceNumber.as_str().to_string());
        }
        if !self.has_any_amount() {
            missing.push("amount".to_string());
        }
        missing
    }

    pub fn has_any_amount(&self) -> bool {
        self.pre_tax_amount.is_some() || self.tax_amount.is_some() || self.total_amount.is_some()
    }

    /// Share of key fields present (0.0 - 1.0).
    pub fn completeness(&self) -> f32 {
        let present = [
            self.invoice_number.is_some(),
            self.invoice_type.is_some(),
            self.issue_date.is_some(),
            self.buyer_name.is_some(),
            self.buyer_tax_id.is_some(),
            self.seller_name.is_some(),
            self.seller_tax_id.is_some(),
            self.total_amount.is_some(),
        ];
        present.iter().filter(|p| **p).count() as f32 / present.len() as f32
    }

    /// Text value of a text field.
    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::InvoiceNumber => self.invoice_number.as_deref(),
            Field::SellerName => self.seller_name.as_deref(),
            Field::BuyerName => self.buyer_name.as_deref(),
            Field::SellerTaxId => self.seller_tax_id.as_deref(),
            Field::BuyerTaxId => self.buyer_tax_id.as_deref(),
            _ => None,
        }
    }

    /// Decimal value of an amount field.
    pub fn amount(&self, field: Field) -> Option<Decimal> {
        match field {
            Field::PreTaxAmount => self.pre_tax_amount,
            Field::TaxAmount => self.tax_amount,
            Field::TotalAmount => self.total_amount,
            _ => None,
        }
    }

    /// Display form of any field, used when recording mismatches.
    pub fn display(&self, field: Field) -> Option<String> {
        match field {
            Field::IssueDate => self.issue_date.map(|d| d.to_string()),
            f if f.is_amount() => self.amount(f).map(|a| a.to_string()),
            f => self.text(f).map(str::to_string),
        }
    }

    /// Fill every absent field from `other`.
    pub fn fill_missing_from(&mut self, other: &InvoiceFields) {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                *slot = from.clone();
            }
        }
        fill(&mut self.invoice_number, &other.invoice_number);
        fill(&mut self.invoice_type, &other.invoice_type);
        fill(&mut self.issue_date, &other.issue_date);
        fill(&mut self.seller_name, &other.seller_name);
        fill(&mut self.seller_tax_id, &other.seller_tax_id);
        fill(&mut self.buyer_name, &other.buyer_name);
        fill(&mut self.buyer_tax_id, &other.buyer_tax_id);
        fill(&mut self.pre_tax_amount, &other.pre_tax_amount);
        fill(&mut self.tax_amount, &other.tax_amount);
        fill(&mut self.total_amount, &other.total_amount);
        fill(&mut self.remarks, &other.remarks);
        if self.line_items.is_empty() {
            self.line_items = other.line_items.clone();
        }
    }
}

/// Reference to the document a record was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub kind: DocumentKind,
}

/// Both candidate values of a field the two passes disagree on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMismatch {
    pub field: Field,
    pub deterministic: String,
    pub model: String,
}

/// A successfully extracted invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Final field values.
    pub fields: InvoiceFields,

    pub validation_status: ValidationStatus,

    /// Strategy that produced the record.
    pub extraction_mode: ExtractionMode,

    pub source: SourceRef,

    /// Disagreements found during cross-validation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<FieldMismatch>,

    /// Share of key fields present (0.0 - 1.0).
    pub completeness: f32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Raw backend answer, kept in memory for debugging only.
    #[serde(skip)]
    pub raw_response: Option<String>,
}

impl InvoiceRecord {
    pub fn new(
        fields: InvoiceFields,
        extraction_mode: ExtractionMode,
        validation_status: ValidationStatus,
        source: SourceRef,
    ) -> Self {
        let completeness = fields.completeness();
        Self {
            fields,
            validation_status,
            extraction_mode,
            source,
            mismatches: Vec::new(),
            completeness,
            warnings: Vec::new(),
            raw_response: None,
        }
    }

    pub fn with_mismatches(mut self, mismatches: Vec<FieldMismatch>) -> Self {
        self.mismatches = mismatches;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }

    /// Candidate values for a mismatched field.
    pub fn mismatch(&self, field: Field) -> Option<&FieldMismatch> {
        self.mismatches.iter().find(|m| m.field == field)
    }
}
