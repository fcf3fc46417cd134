//! Date extraction.

use chrono::NaiveDate;

use super::patterns::{DATE_CN, DATE_DMY, DATE_YMD, ISSUE_DATE};
use super::{FieldExtractor, RuleMatch};

/// Date field extractor.
///
/// Recognizes `2024年3月15日`, `2024-03-15` / `2024/03/15` / `2024.03.15`
/// and day-first `15.03.2024` forms.
#[derive(Debug, Default)]
pub struct DateExtractor;

impl FieldExtractor for DateExtractor {
    type Output = RuleMatch<NaiveDate>;

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results: Vec<RuleMatch<NaiveDate>> = Vec::new();

        for (pattern, year_first) in [(&*DATE_CN, true), (&*DATE_YMD, true), (&*DATE_DMY, false)] {
            for caps in pattern.captures_iter(text) {
                let Some(full) = caps.get(0) else { continue };
                let (y, m, d) = if year_first {
                    (&caps[1], &caps[2], &caps[3])
                } else {
                    (&caps[3], &caps[2], &caps[1])
                };
                let date = match (y.parse::<i32>(), m.parse::<u32>(), d.parse::<u32>()) {
                    (Ok(y), Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(y, m, d),
                    _ => None,
                };
                if let Some(date) = date {
                    if !results.iter().any(|r| r.start == full.start()) {
                        results.push(RuleMatch::new(date, full.start(), full.as_str()));
                    }
                }
            }
        }

        results.sort_by_key(|r| r.start);
        results
    }
}

/// Issue date: the labelled date if present, otherwise the first date in the text.
pub fn extract_issue_date(text: &str) -> Option<NaiveDate> {
    let extractor = DateExtractor;

    if let Some(caps) = ISSUE_DATE.captures(text) {
        if let Some(date) = extractor.extract(&caps[1]) {
            return Some(date.value);
        }
    }

    extractor.extract(text).map(|m| m.value)
}
