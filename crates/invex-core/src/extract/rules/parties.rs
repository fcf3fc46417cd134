//! Seller and buyer names and tax ids.

use regex::Regex;

use super::patterns::{
    BUYER_NAME_CN, BUYER_NAME_EN, BUYER_TAX_ID_EN, PARTY_NAME_CN, SELLER_NAME_CN, SELLER_NAME_EN,
    SELLER_TAX_ID_EN, TAX_ID_CN,
};

/// Party details found on an invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parties {
    pub seller_name: Option<String>,
    pub seller_tax_id: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_tax_id: Option<String>,
}

/// Extract seller and buyer details.
///
/// Explicitly labelled blocks win. Unlabelled `名称` / `纳税人识别号` pairs
/// follow the standard layout: buyer first, seller second.
pub fn extract_parties(text: &str) -> Parties {
    let mut parties = Parties {
        seller_name: first_name(&SELLER_NAME_CN, text).or_else(|| first_name(&SELLER_NAME_EN, text)),
        buyer_name: first_name(&BUYER_NAME_CN, text).or_else(|| first_name(&BUYER_NAME_EN, text)),
        seller_tax_id: first_id(&SELLER_TAX_ID_EN, text),
        buyer_tax_id: first_id(&BUYER_TAX_ID_EN, text),
    };

    if parties.buyer_name.is_none() || parties.seller_name.is_none() {
        let mut names = PARTY_NAME_CN
            .captures_iter(text)
            .filter_map(|caps| clean_name(&caps[1]))
            .filter(|n| {
                parties.seller_name.as_deref() != Some(n.as_str())
                    && parties.buyer_name.as_deref() != Some(n.as_str())
            })
            .collect::<Vec<_>>()
            .into_iter();
        if parties.buyer_name.is_none() {
            parties.buyer_name = names.next();
        }
        if parties.seller_name.is_none() {
            parties.seller_name = names.next();
        }
    }

    if parties.buyer_tax_id.is_none() || parties.seller_tax_id.is_none() {
        let mut ids: Vec<String> = Vec::new();
        for caps in TAX_ID_CN.captures_iter(text) {
            let id = caps[1].to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if parties.buyer_tax_id.is_none() {
            parties.buyer_tax_id = ids.first().cloned();
        }
        if parties.seller_tax_id.is_none() {
            parties.seller_tax_id = ids.get(1).cloned();
        }
    }

    parties
}

fn first_name(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures_iter(text)
        .find_map(|caps| clean_name(&caps[1]))
}

fn first_id(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures(text).map(|caps| caps[1].to_uppercase())
}

/// Trim a captured name at the next column gap and drop trailing separators.
fn clean_name(raw: &str) -> Option<String> {
    let first_column = raw
        .split("  ")
        .next()
        .unwrap_or(raw)
        .split('\t')
        .next()
        .unwrap_or(raw);
    let name = first_column
        .trim()
        .trim_end_matches([',', ';', '，', '；', '。'])
        .trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_labelled_chinese_parties() {
        let text = "购买方名称：上海某某科技有限公司\n纳税人识别号：91310000MA1FL4XQ3N\n\
                    销售方名称：北京某某贸易有限公司   密码区\n纳税人识别号：911100007109353123\n";
        let parties = extract_parties(text);
        assert_eq!(
            parties,
            Parties {
                seller_name: Some("北京某某贸易有限公司".into()),
                seller_tax_id: Some("911100007109353123".into()),
                buyer_name: Some("上海某某科技有限公司".into()),
                buyer_tax_id: Some("91310000MA1FL4XQ3N".into()),
            }
        );
    }

    #[test]
    fn test_unlabelled_names_follow_layout() {
        let text = "名 称：Buyer Co\n名 称：Seller Co\n";
        let parties = extract_parties(text);
        assert_eq!(parties.buyer_name.as_deref(), Some("Buyer Co"));
        assert_eq!(parties.seller_name.as_deref(), Some("Seller Co"));
    }

    #[test]
    fn test_english_parties() {
        let text = "Seller: Acme Ltd.\nSeller Tax ID: gb123456789\nBill To: Globex Corp,\n";
        let parties = extract_parties(text);
        assert_eq!(parties.seller_name.as_deref(), Some("Acme Ltd."));
        assert_eq!(parties.seller_tax_id.as_deref(), Some("GB123456789"));
        assert_eq!(parties.buyer_name.as_deref(), Some("Globex Corp"));
        assert_eq!(parties.buyer_tax_id, None);
    }
}
