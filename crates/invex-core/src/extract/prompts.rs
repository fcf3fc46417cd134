//! Prompt templates sent to model backends.

use serde::{Deserialize, Serialize};

const TEXT_PROMPT: &str = r#"You are an invoice data extraction engine.
Read the invoice text below and answer with ONE JSON object and nothing else.
Use exactly these keys; use null when a value is not present:
{
  "invoice_number": string,
  "invoice_type": string,
  "issue_date": "YYYY-MM-DD",
  "seller_name": string,
  "seller_tax_id": string,
  "buyer_name": string,
  "buyer_tax_id": string,
  "pre_tax_amount": number,
  "tax_amount": number,
  "total_amount": number,
  "line_items": [{"description": string, "quantity": number, "unit_price": number, "amount": number, "tax_rate": string, "tax_amount": number}],
  "remarks": string
}
Amounts are plain numbers without currency symbols or thousands separators.
Invoice text:"#;

const VISION_PROMPT: &str = r#"You are an invoice data extraction engine.
Read the attached invoice image and answer with ONE JSON object and nothing else.
Use exactly these keys; use null when a value is not present:
invoice_number, invoice_type, issue_date (YYYY-MM-DD), seller_name, seller_tax_id,
buyer_name, buyer_tax_id, pre_tax_amount, tax_amount, total_amount, line_items, remarks.
Amounts are plain numbers without currency symbols or thousands separators."#;

/// Prompt templates. The document text is appended to the text prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub text_extraction: String,
    pub vision_extraction: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            text_extraction: TEXT_PROMPT.to_string(),
            vision_extraction: VISION_PROMPT.to_string(),
        }
    }
}
