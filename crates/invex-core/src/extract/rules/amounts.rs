//! Amount extraction.

use rust_decimal::Decimal;
use std::str::FromStr;

use super::patterns::{
    CURRENCY_AMOUNT, PRE_TAX_CN, PRE_TAX_EN, SUBTOTAL_ROW_CN, TAX_CN, TAX_EN, TOTAL_CN, TOTAL_EN,
};
use super::{FieldExtractor, RuleMatch, first_non_rate};

/// Extracts every currency-marked amount.
#[derive(Debug, Default)]
pub struct AmountExtractor;

impl FieldExtractor for AmountExtractor {
    type Output = RuleMatch<Decimal>;

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        CURRENCY_AMOUNT
            .captures_iter(text)
            .filter_map(|caps| {
                let full = caps.get(0)?;
                let amount = parse_amount(&caps[1])?;
                Some(RuleMatch::new(amount, full.start(), full.as_str()))
            })
            .collect()
    }
}

/// Labelled amounts found on an invoice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceAmounts {
    /// Amount before tax.
    pub pre_tax: Option<Decimal>,
    pub tax: Option<Decimal>,
    /// Amount including tax.
    pub total: Option<Decimal>,
}

/// Extract pre-tax, tax and total amounts from invoice text.
pub fn extract_amounts(text: &str) -> InvoiceAmounts {
    let mut result = InvoiceAmounts {
        total: labelled(&TOTAL_CN, text).or_else(|| labelled(&TOTAL_EN, text)),
        ..Default::default()
    };

    // "合计 ¥100.00 ¥13.00", but not the tail of "价税合计"
    let row = SUBTOTAL_ROW_CN.captures_iter(text).find(|caps| {
        caps.get(0)
            .map(|m| !text[..m.start()].trim_end().ends_with('税'))
            .unwrap_or(false)
    });
    if let Some(caps) = row {
        result.pre_tax = parse_amount(&caps[1]);
        result.tax = parse_amount(&caps[2]);
    }

    if result.pre_tax.is_none() {
        result.pre_tax = labelled(&PRE_TAX_CN, text).or_else(|| labelled(&PRE_TAX_EN, text));
    }
    if result.tax.is_none() {
        result.tax = labelled(&TAX_CN, text).or_else(|| labelled(&TAX_EN, text));
    }

    // Derive the missing third amount when two are known
    match (result.pre_tax, result.tax, result.total) {
        (Some(pre), Some(tax), None) => result.total = Some(pre + tax),
        (Some(pre), None, Some(total)) if total >= pre => result.tax = Some(total - pre),
        (None, Some(tax), Some(total)) if total >= tax => result.pre_tax = Some(total - tax),
        _ => {}
    }

    // Last resort: the largest currency-marked amount is the total
    if result.total.is_none() {
        result.total = AmountExtractor
            .extract_all(text)
            .into_iter()
            .map(|m| m.value)
            .max();
    }

    result
}

fn labelled(pattern: &regex::Regex, text: &str) -> Option<Decimal> {
    first_non_rate(pattern, text).and_then(|caps| parse_amount(&caps[1]))
}

/// Parse an amount such as `¥1,234.56`, `￥ 113.00` or `1，000`.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '¥' | '￥' | '$' | ',' | '，') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}
