//! Field-by-field cross-validation between two extraction passes.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::models::invoice::{Field, FieldMismatch, InvoiceFields};

/// Tolerances used when comparing deterministic and model values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonPolicy {
    /// Maximum absolute difference for amounts to be considered equal.
    pub amount_tolerance: Decimal,

    /// Both amounts are rounded to this many decimal places first.
    pub amount_scale: u32,

    pub case_insensitive: bool,

    /// Drop all whitespace before comparing text.
    pub ignore_whitespace: bool,

    /// Drop ASCII and CJK punctuation before comparing text.
    pub ignore_punctuation: bool,
}

impl Default for ComparisonPolicy {
    fn default() -> Self {
        Self {
            amount_tolerance: Decimal::new(1, 2),
            amount_scale: 2,
            case_insensitive: true,
            ignore_whitespace: true,
            ignore_punctuation: false,
        }
    }
}

/// Result of comparing two passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossCheck {
    /// Number of fields present in both passes.
    pub compared: usize,
    pub mismatches: Vec<FieldMismatch>,
}

impl CrossCheck {
    pub fn agrees(&self) -> bool {
        self.compared > 0 && self.mismatches.is_empty()
    }
}

impl ComparisonPolicy {
    /// Compare every field present in both passes.
    pub fn compare(&self, deterministic: &InvoiceFields, model: &InvoiceFields) -> CrossCheck {
        let mut check = CrossCheck::default();

        for field in Field::ALL {
            let equal = match field {
                Field::IssueDate => match (deterministic.issue_date, model.issue_date) {
                    (Some(a), Some(b)) => Some(a == b),
                    _ => None,
                },
                f if f.is_amount() => match (deterministic.amount(f), model.amount(f)) {
                    (Some(a), Some(b)) => Some(self.amounts_match(a, b)),
                    _ => None,
                },
                f => match (deterministic.text(f), model.text(f)) {
                    (Some(a), Some(b)) => Some(self.texts_match(a, b)),
                    _ => None,
                },
            };

            let Some(equal) = equal else { continue };
            check.compared += 1;
            if !equal {
                check.mismatches.push(FieldMismatch {
                    field,
                    deterministic: deterministic.display(field).unwrap_or_default(),
                    model: model.display(field).unwrap_or_default(),
                });
            }
        }

        check
    }

    pub fn amounts_match(&self, a: Decimal, b: Decimal) -> bool {
        let round = |d: Decimal| {
            d.round_dp_with_strategy(self.amount_scale, RoundingStrategy::MidpointAwayFromZero)
        };
        (round(a) - round(b)).abs() <= self.amount_tolerance
    }

    pub fn texts_match(&self, a: &str, b: &str) -> bool {
        self.normalize(a) == self.normalize(b)
    }

    fn normalize(&self, s: &str) -> String {
        let mut out: String = s
            .trim()
            .chars()
            .filter(|c| !(self.ignore_whitespace && c.is_whitespace()))
            .filter(|c| !(self.ignore_punctuation && is_punctuation(*c)))
            .collect();
        if self.case_insensitive {
            out = out.to_lowercase();
        }
        out
    }
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(c,
            '\u{3000}'..='\u{303F}'
            | '\u{FF01}'..='\u{FF0F}'
            | '\u{FF1A}'..='\u{FF20}'
            | '\u{FF3B}'..='\u{FF40}'
            | '\u{FF5B}'..='\u{FF65}'
            | '\u{2018}'..='\u{201F}'
            | '\u{00B7}'
            | '\u{2014}'
            | '\u{2026}')
}
