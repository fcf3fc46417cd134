//! Parsing of model answers into invoice fields.
//!
//! Models wrap JSON in code fences, prepend a BOM, leave trailing commas or
//! answer with single quotes. Keys may be English or Chinese.

use std::str::FromStr;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::debug;

use super::rules::{DateExtractor, FieldExtractor, parse_amount};
use crate::models::invoice::{InvoiceFields, LineItem};

lazy_static! {
    static ref TRAILING_COMMA: Regex = Regex::new(r",\s*([}\]])").unwrap();
}

const INVOICE_NUMBER: &[&str] = &["invoice_number", "invoice_no", "number", "发票号码"];
const INVOICE_TYPE: &[&str] = &["invoice_type", "type", "发票类型"];
const ISSUE_DATE: &[&str] = &["issue_date", "invoice_date", "date", "开票日期"];
const SELLER_NAME: &[&str] = &["seller_name", "seller", "销售方名称"];
const SELLER_TAX_ID: &[&str] = &["seller_tax_id", "销售方纳税人识别号"];
const BUYER_NAME: &[&str] = &["buyer_name", "buyer", "购买方名称"];
const BUYER_TAX_ID: &[&str] = &["buyer_tax_id", "购买方纳税人识别号"];
const PRE_TAX_AMOUNT: &[&str] = &["pre_tax_amount", "amount_before_tax", "subtotal", "金额"];
const TAX_AMOUNT: &[&str] = &["tax_amount", "tax", "税额"];
const TOTAL_AMOUNT: &[&str] = &["total_amount", "total", "价税合计"];
const REMARKS: &[&str] = &["remarks", "notes", "备注"];
const LINE_ITEMS: &[&str] = &["line_items", "items", "明细"];
const CONTENT: &[&str] = &["content", "发票内容"];

const ITEM_DESCRIPTION: &[&str] = &["description", "name", "项目名称", "名称"];
const ITEM_QUANTITY: &[&str] = &["quantity", "数量"];
const ITEM_UNIT_PRICE: &[&str] = &["unit_price", "单价"];
const ITEM_AMOUNT: &[&str] = &["amount", "金额"];
const ITEM_TAX_RATE: &[&str] = &["tax_rate", "税率"];
const ITEM_TAX_AMOUNT: &[&str] = &["tax_amount", "税额"];

/// Parse a model answer.
///
/// Returns the fields found, without schema validation. When the answer is
/// not valid JSON a key-by-key scan is attempted; it only succeeds if it
/// recovers the required fields.
pub fn parse_response(raw: &str) -> Result<InvoiceFields, String> {
    let cleaned = clean_json(raw);

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => Ok(fields_from_object(&map)),
        Ok(Value::Array(items)) => match items.into_iter().next() {
            Some(Value::Object(map)) => Ok(fields_from_object(&map)),
            _ => Err("expected a JSON object, got an array".to_string()),
        },
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => {
            let scanned = scan_keys(&cleaned);
            if scanned.missing_required().is_empty() {
                debug!("Recovered fields from unparseable answer by key scan");
                Ok(scanned)
            } else {
                Err(format!("invalid JSON: {}", e))
            }
        }
    }
}

/// Strip BOM and code fences, cut to the outermost object and repair common
/// syntax slips.
pub fn clean_json(raw: &str) -> String {
    let mut s = raw.trim_start_matches('\u{feff}').trim();

    if let Some(start) = s.find("```") {
        let after = &s[start + 3..];
        // Skip the language tag line
        let body = match after.find('\n') {
            Some(nl) if !after[..nl].contains('{') => &after[nl + 1..],
            _ => after,
        };
        s = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
    }

    let s = match (s.find('{'), s.rfind('}')) {
        (Some(open), Some(close)) if open < close => &s[open..=close],
        _ => s,
    };

    let mut out = TRAILING_COMMA.replace_all(s.trim(), "$1").into_owned();
    if !out.contains('"') && out.contains('\'') {
        out = out.replace('\'', "\"");
    }
    out
}

fn fields_from_object(map: &Map<String, Value>) -> InvoiceFields {
    let mut fields = InvoiceFields {
        invoice_number: lookup(map, INVOICE_NUMBER).and_then(text_value),
        invoice_type: lookup(map, INVOICE_TYPE).and_then(text_value),
        issue_date: lookup(map, ISSUE_DATE).and_then(date_value),
        seller_name: lookup(map, SELLER_NAME).and_then(text_value),
        seller_tax_id: lookup(map, SELLER_TAX_ID).and_then(text_value),
        buyer_name: lookup(map, BUYER_NAME).and_then(text_value),
        buyer_tax_id: lookup(map, BUYER_TAX_ID).and_then(text_value),
        pre_tax_amount: lookup(map, PRE_TAX_AMOUNT).and_then(amount_value),
        tax_amount: lookup(map, TAX_AMOUNT).and_then(amount_value),
        total_amount: lookup(map, TOTAL_AMOUNT).and_then(amount_value),
        remarks: lookup(map, REMARKS).and_then(text_value),
        line_items: Vec::new(),
    };

    if let Some(Value::Array(items)) = lookup(map, LINE_ITEMS) {
        fields.line_items = items
            .iter()
            .filter_map(|item| item.as_object())
            .filter_map(line_item)
            .collect();
    }

    if fields.line_items.is_empty() {
        if let Some(description) = lookup(map, CONTENT).and_then(text_value) {
            fields.line_items.push(LineItem {
                description,
                ..Default::default()
            });
        }
    }

    fields
}

fn line_item(map: &Map<String, Value>) -> Option<LineItem> {
    let item = LineItem {
        description: lookup(map, ITEM_DESCRIPTION)
            .and_then(text_value)
            .unwrap_or_default(),
        quantity: lookup(map, ITEM_QUANTITY).and_then(amount_value),
        unit_price: lookup(map, ITEM_UNIT_PRICE).and_then(amount_value),
        amount: lookup(map, ITEM_AMOUNT).and_then(amount_value),
        tax_rate: lookup(map, ITEM_TAX_RATE).and_then(text_value),
        tax_amount: lookup(map, ITEM_TAX_AMOUNT).and_then(amount_value),
    };
    if item.description.is_empty() && item.amount.is_none() {
        None
    } else {
        Some(item)
    }
}

/// First non-absent value under any of `keys`.
fn lookup<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !is_absent(v))
}

fn is_absent(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => is_absent_str(s),
        _ => false,
    }
}

fn is_absent_str(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "" | "null" | "none" | "n/a"
    )
}

fn text_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !is_absent_str(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn amount_value(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) if !is_absent_str(s) => parse_amount(s),
        _ => None,
    }
}

fn date_value(v: &Value) -> Option<NaiveDate> {
    let s = v.as_str()?.trim();
    if is_absent_str(s) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateExtractor.extract(s).map(|m| m.value))
}

/// Recover `key: value` pairs from text that is not valid JSON.
fn scan_keys(text: &str) -> InvoiceFields {
    let scan = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|key| {
            let pattern = format!(
                r#"(?:^|[^A-Za-z_])"?{}"?\s*[:：]\s*"?([^"\n,}}]*)"?"#,
                regex::escape(key)
            );
            let re = Regex::new(&pattern).ok()?;
            let value = re.captures(text)?[1].trim().to_string();
            if is_absent_str(&value) {
                None
            } else {
                Some(value)
            }
        })
    };
    let amount = |keys: &[&str]| scan(keys).and_then(|s| parse_amount(&s));

    InvoiceFields {
        invoice_number: scan(INVOICE_NUMBER),
        invoice_type: scan(INVOICE_TYPE),
        issue_date: scan(ISSUE_DATE).and_then(|s| date_value(&Value::String(s))),
        seller_name: scan(SELLER_NAME),
        seller_tax_id: scan(SELLER_TAX_ID),
        buyer_name: scan(BUYER_NAME),
        buyer_tax_id: scan(BUYER_TAX_ID),
        pre_tax_amount: amount(PRE_TAX_AMOUNT),
        tax_amount: amount(TAX_AMOUNT),
        total_amount: amount(TOTAL_AMOUNT),
        remarks: scan(REMARKS),
        line_items: Vec::new(),
    }
}
