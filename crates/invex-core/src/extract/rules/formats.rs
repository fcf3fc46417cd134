//! Format checks for identifiers printed on Chinese VAT invoices.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// 18-character unified social credit code.
    static ref CREDIT_CODE: Regex = Regex::new(
        r"^[0-9A-HJ-NPQRTUWXY]{2}[0-9]{6}[0-9A-HJ-NPQRTUWXY]{10}$"
    ).unwrap();
}

/// 8-digit paper invoice number or 20-digit fully digital e-invoice number.
pub fn is_valid_invoice_number(number: &str) -> bool {
    matches!(number.len(), 8 | 20) && number.bytes().all(|b| b.is_ascii_digit())
}

/// Unified social credit code, or a legacy 15-character taxpayer id.
pub fn is_valid_tax_id(tax_id: &str) -> bool {
    if tax_id.len() == 15 {
        return tax_id.bytes().all(|b| b.is_ascii_alphanumeric());
    }
    CREDIT_CODE.is_match(tax_id)
}
