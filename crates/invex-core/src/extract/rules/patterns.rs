//! Common regex patterns for invoice field extraction.
//!
//! Labels are matched in English and Chinese. Amount captures accept
//! `¥`/`￥`/`$` prefixes and comma thousands separators.

use lazy_static::lazy_static;
use regex::Regex;

/// Number with optional thousands separators and up to two decimals.
macro_rules! num {
    () => {
        r"(-?[0-9]{1,3}(?:[,，][0-9]{3})+(?:\.[0-9]{1,2})?|-?[0-9]+(?:\.[0-9]{1,2})?)"
    };
}

lazy_static! {
    // Invoice number
    pub static ref INVOICE_NUMBER_CN: Regex = Regex::new(
        r"发\s*票\s*号\s*码[\s:：]*([0-9A-Za-z]{8,20})"
    ).unwrap();

    pub static ref INVOICE_NUMBER_EN: Regex = Regex::new(
        r"(?i)invoice\s*(?:no\.?|number|num\.?|#)[\s:：#]*([A-Za-z0-9][A-Za-z0-9/\-_]{2,})"
    ).unwrap();

    /// 20-digit fully digital e-invoice number.
    pub static ref INVOICE_NUMBER_DIGITAL: Regex = Regex::new(
        r"\b(2[0-9]{19})\b"
    ).unwrap();

    pub static ref INVOICE_TYPE: Regex = Regex::new(
        r"(?i)(电子发票\s*[（(][^)）\n]+[)）]|增值税(?:电子)?(?:专用|普通)发票|\btax\s+invoice\b|\bcommercial\s+invoice\b|\bproforma\s+invoice\b)"
    ).unwrap();

    // Dates
    pub static ref DATE_CN: Regex = Regex::new(
        r"([0-9]{4})\s*年\s*([0-9]{1,2})\s*月\s*([0-9]{1,2})\s*日"
    ).unwrap();

    pub static ref DATE_YMD: Regex = Regex::new(
        r"\b([0-9]{4})[./\-]([0-9]{1,2})[./\-]([0-9]{1,2})\b"
    ).unwrap();

    pub static ref DATE_DMY: Regex = Regex::new(
        r"\b([0-9]{1,2})[./\-]([0-9]{1,2})[./\-]([0-9]{4})\b"
    ).unwrap();

    pub static ref ISSUE_DATE: Regex = Regex::new(
        r"(?i)(?:开\s*票\s*日\s*期|invoice\s+date|date\s+of\s+issue|issue\s+date|issued\s+on)[\s:：]*([^\n]+)"
    ).unwrap();

    // Parties
    pub static ref BUYER_NAME_CN: Regex = Regex::new(
        r"(?:购买方|购方|买方)\s*(?:信息)?\s*名\s*称[\s:：]*([^\n]+)"
    ).unwrap();

    pub static ref SELLER_NAME_CN: Regex = Regex::new(
        r"(?:销售方|销方|卖方)\s*(?:信息)?\s*名\s*称[\s:：]*([^\n]+)"
    ).unwrap();

    /// Unqualified name label; on standard layouts the buyer block comes first.
    pub static ref PARTY_NAME_CN: Regex = Regex::new(
        r"名\s*称[\s:：]+([^\n]+)"
    ).unwrap();

    pub static ref BUYER_NAME_EN: Regex = Regex::new(
        r"(?im)^\s*(?:buyer|bill\s+to|customer|purchaser)(?:\s+name)?\s*[:：][ \t]*([^\n]+)"
    ).unwrap();

    pub static ref SELLER_NAME_EN: Regex = Regex::new(
        r"(?im)^\s*(?:seller|supplier|vendor|sold\s+by)(?:\s+name)?\s*[:：][ \t]*([^\n]+)"
    ).unwrap();

    /// Taxpayer id label; buyer first, seller second.
    pub static ref TAX_ID_CN: Regex = Regex::new(
        r"(?:纳税人识别号|统一社会信用代码(?:\s*/\s*纳税人识别号)?)[\s:：]*([0-9A-Z]{15,20})"
    ).unwrap();

    pub static ref BUYER_TAX_ID_EN: Regex = Regex::new(
        r"(?i)(?:buyer|customer)\s+(?:tax\s+id|vat\s+(?:no|number)\.?)[\s:：]*([0-9A-Z][0-9A-Z\-]{5,19})"
    ).unwrap();

    pub static ref SELLER_TAX_ID_EN: Regex = Regex::new(
        r"(?i)(?:seller|supplier|vendor)\s+(?:tax\s+id|vat\s+(?:no|number)\.?)[\s:：]*([0-9A-Z][0-9A-Z\-]{5,19})"
    ).unwrap();

    // Amounts
    pub static ref TOTAL_CN: Regex = Regex::new(concat!(
        r"价\s*税\s*合\s*计[^\n0-9]*?[ \t:：]*[¥￥]?[ \t]*", num!()
    )).unwrap();

    /// `合计 ¥100.00 ¥13.00` row: pre-tax then tax.
    pub static ref SUBTOTAL_ROW_CN: Regex = Regex::new(concat!(
        r"合\s*计[ \t:：]*[¥￥]?[ \t]*", num!(), r"[ \t]+[¥￥]?[ \t]*", num!()
    )).unwrap();

    pub static ref PRE_TAX_CN: Regex = Regex::new(concat!(
        r"(?:不含税金额|合计金额|金\s*额)[ \t:：]*[¥￥]?[ \t]*", num!()
    )).unwrap();

    pub static ref TAX_CN: Regex = Regex::new(concat!(
        r"(?:合计税额|税\s*额)[ \t:：]*[¥￥]?[ \t]*", num!()
    )).unwrap();

    pub static ref TOTAL_EN: Regex = Regex::new(concat!(
        r"(?i)\b(?:grand\s+total|total\s+amount|amount\s+due|total\s+due|total)\b[ \t:：]*(?-i:[A-Z]{3}[ \t]*)?[¥￥$]?[ \t]*", num!()
    )).unwrap();

    pub static ref PRE_TAX_EN: Regex = Regex::new(concat!(
        r"(?i)\b(?:subtotal|sub-total|net\s+amount|amount\s+before\s+tax)\b[ \t:：]*(?-i:[A-Z]{3}[ \t]*)?[¥￥$]?[ \t]*", num!()
    )).unwrap();

    pub static ref TAX_EN: Regex = Regex::new(concat!(
        r"(?i)\b(?:tax\s+amount|vat\s+amount|total\s+tax|tax|vat)\b[ \t:：]*(?:\([^)\n]*\)[ \t:：]*)?(?-i:[A-Z]{3}[ \t]*)?[¥￥$]?[ \t]*", num!()
    )).unwrap();

    /// Any currency-marked amount.
    pub static ref CURRENCY_AMOUNT: Regex = Regex::new(concat!(
        r"[¥￥$][ \t]*", num!()
    )).unwrap();

    // Remarks
    pub static ref REMARKS: Regex = Regex::new(
        r"(?i)(?:备\s*注|remarks?|notes?)\s*[:：][ \t]*([^\n]+)"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_total_cn_skips_uppercase_numerals() {
        let caps = TOTAL_CN
            .captures("价税合计（大写） 壹佰壹拾叁圆整 （小写）¥113.00")
            .unwrap();
        assert_eq!(&caps[1], "113.00");
    }

    #[test]
    fn test_invoice_number_patterns() {
        assert_eq!(
            &INVOICE_NUMBER_CN.captures("发票号码：24442000000123456789").unwrap()[1],
            "24442000000123456789"
        );
        assert_eq!(
            &INVOICE_NUMBER_EN.captures("Invoice No: INV-2024/001").unwrap()[1],
            "INV-2024/001"
        );
    }

    #[test]
    fn test_tax_does_not_match_tax_id() {
        assert!(TAX_EN.captures("Tax ID: 91310000MA1FL4XQ3N").is_none());
        assert_eq!(&TAX_EN.captures("VAT (13%): 13.00").unwrap()[1], "13.00");
    }
}
