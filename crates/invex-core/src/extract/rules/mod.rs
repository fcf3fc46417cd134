//! Rule-based field extractors for invoice text.

pub mod amounts;
pub mod dates;
pub mod formats;
pub mod parties;
pub mod patterns;

pub use amounts::{AmountExtractor, InvoiceAmounts, extract_amounts, parse_amount};
pub use dates::{DateExtractor, extract_issue_date};
pub use formats::{is_valid_invoice_number, is_valid_tax_id};
pub use parties::{Parties, extract_parties};

use regex::{Captures, Regex};

/// Trait for field extractors.
pub trait FieldExtractor {
    /// The type of value this extractor produces.
    type Output;

    /// Extract the first occurrence of the field.
    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    /// Extract all occurrences of the field, in text order.
    fn extract_all(&self, text: &str) -> Vec<Self::Output>;
}

/// A value matched in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch<T> {
    pub value: T,
    /// Byte offset of the match.
    pub start: usize,
    /// Matched source text.
    pub source: String,
}

impl<T> RuleMatch<T> {
    pub fn new(value: T, start: usize, source: impl Into<String>) -> Self {
        Self {
            value,
            start,
            source: source.into(),
        }
    }
}

/// First capture of `pattern` whose match is not immediately followed by `%`.
pub(crate) fn first_non_rate<'t>(pattern: &Regex, text: &'t str) -> Option<Captures<'t>> {
    pattern.captures_iter(text).find(|caps| {
        let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        !text[end..].starts_with('%')
    })
}
