//! Date extraction for French and English invoices.

use chrono::NaiveDate;

use super::patterns::{
    DATE_DMY, DATE_LONG, DATE_LONG_EN, DATE_YMD, DUE_DATE_LABEL, GENERIC_DATE_LABEL, ISSUE_DATE_LABEL,
};
use super::{lines_with_offsets, ExtractionMatch, FieldExtractor};

/// Date field extractor.
pub struct DateExtractor;

impl DateExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DateExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for DateExtractor {
    type Output = ExtractionMatch<NaiveDate>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    /// All dates in `text`, in text order.
    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results: Vec<Self::Output> = Vec::new();
        let mut push = |date: NaiveDate, confidence: f32, start: usize, end: usize| {
            let overlaps = results.iter().any(|r| {
                r.position
                    .is_some_and(|(s, e)| start < e && s < end)
            });
            if !overlaps {
                results.push(
                    ExtractionMatch::new(date, confidence, &text[start..end]).with_position(start, end),
                );
            }
        };

        // 15 mars 2024, 1er janvier 2024
        for caps in DATE_LONG.captures_iter(text) {
            let day: u32 = caps[1].parse().unwrap_or(0);
            let month = month_number(&caps[2]);
            let year: i32 = caps[3].parse().unwrap_or(0);
            if let (Some(date), Some(m)) = (NaiveDate::from_ymd_opt(year, month, day), caps.get(0)) {
                push(date, 0.95, m.start(), m.end());
            }
        }

        // March 15, 2024
        for caps in DATE_LONG_EN.captures_iter(text) {
            let month = month_number(&caps[1]);
            let day: u32 = caps[2].parse().unwrap_or(0);
            let year: i32 = caps[3].parse().unwrap_or(0);
            if let (Some(date), Some(m)) = (NaiveDate::from_ymd_opt(year, month, day), caps.get(0)) {
                push(date, 0.95, m.start(), m.end());
            }
        }

        // YYYY-MM-DD before DMY so ISO dates are not misread
        for caps in DATE_YMD.captures_iter(text) {
            let year: i32 = caps[1].parse().unwrap_or(0);
            let month: u32 = caps[2].parse().unwrap_or(0);
            let day: u32 = caps[3].parse().unwrap_or(0);
            if let (Some(date), Some(m)) = (NaiveDate::from_ymd_opt(year, month, day), caps.get(0)) {
                push(date, 0.9, m.start(), m.end());
            }
        }

        // DD/MM/YYYY, falling back to MM/DD/YYYY when the month is out of range
        for caps in DATE_DMY.captures_iter(text) {
            let first: u32 = caps[1].parse().unwrap_or(0);
            let second: u32 = caps[2].parse().unwrap_or(0);
            let year = parse_year(&caps[3]);
            let date = NaiveDate::from_ymd_opt(year, second, first)
                .or_else(|| NaiveDate::from_ymd_opt(year, first, second));
            if let (Some(date), Some(m)) = (date, caps.get(0)) {
                push(date, 0.9, m.start(), m.end());
            }
        }

        results.sort_by_key(|r| r.position.map(|(s, _)| s));
        results
    }
}

/// Parse a free-standing date string such as `15/03/2024` or `2024-03-15`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    DateExtractor::new().extract(text).map(|m| m.value)
}

/// Labeled invoice dates.
#[derive(Debug, Clone, Default)]
pub struct InvoiceDates {
    /// Issue date (date de facture).
    pub issue_date: Option<ExtractionMatch<NaiveDate>>,
    /// Due date (date d'échéance).
    pub due_date: Option<ExtractionMatch<NaiveDate>>,
}

/// Extract labeled dates. A label applies to the first date after it on the
/// same line; due-date labels are checked before issue-date labels so that
/// "Date d'échéance" is never read as an issue date.
pub fn extract_dates(text: &str) -> InvoiceDates {
    let mut result = InvoiceDates::default();
    let extractor = DateExtractor::new();

    for (line_start, line) in lines_with_offsets(text) {
        if let Some(label) = DUE_DATE_LABEL.find(line) {
            if result.due_date.is_none() {
                result.due_date = extractor
                    .extract(&line[label.end()..])
                    .map(|m| m.offset_by(line_start + label.end()));
            }
            continue;
        }

        if result.issue_date.is_some() {
            continue;
        }
        let (label, confidence) = match ISSUE_DATE_LABEL.find(line) {
            Some(label) => (label, 0.95),
            None => match GENERIC_DATE_LABEL.find(line) {
                Some(label) => (label, 0.85),
                None => continue,
            },
        };
        if let Some(found) = extractor.extract(&line[label.end()..]) {
            let mut found = found.offset_by(line_start + label.end());
            found.confidence = confidence;
            result.issue_date = Some(found);
        }
    }

    result
}

fn parse_year(s: &str) -> i32 {
    let year: i32 = s.parse().unwrap_or(0);
    if year < 100 {
        // Two-digit year: assume 2000s for 00-50, 1900s for 51-99
        if year <= 50 { 2000 + year } else { 1900 + year }
    } else {
        year
    }
}

fn month_number(month: &str) -> u32 {
    match month.to_lowercase().trim_end_matches('.') {
        "janvier" | "january" | "jan" => 1,
        "février" | "fevrier" | "february" | "feb" => 2,
        "mars" | "march" | "mar" => 3,
        "avril" | "april" | "apr" => 4,
        "mai" | "may" => 5,
        "juin" | "june" | "jun" => 6,
        "juillet" | "july" | "jul" => 7,
        "août" | "aout" | "august" | "aug" => 8,
        "septembre" | "september" | "sept" | "sep" => 9,
        "octobre" | "october" | "oct" => 10,
        "novembre" | "november" | "nov" => 11,
        "décembre" | "decembre" | "december" | "dec" => 12,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_extract_date_dmy() {
        let result = DateExtractor::new().extract("15/03/2024").unwrap();
        assert_eq!(result.value, ymd(2024, 3, 15));
        assert_eq!(parse_date("15.03.24"), Some(ymd(2024, 3, 15)));
    }

    #[test]
    fn test_us_order_when_day_first_is_impossible() {
        assert_eq!(parse_date("03/15/2024"), Some(ymd(2024, 3, 15)));
    }

    #[test]
    fn test_extract_date_ymd() {
        assert_eq!(parse_date("2024-03-15"), Some(ymd(2024, 3, 15)));
    }

    #[test]
    fn test_extract_long_dates() {
        assert_eq!(parse_date("Paris, le 1er avril 2024"), Some(ymd(2024, 4, 1)));
        assert_eq!(parse_date("15 août 2024"), Some(ymd(2024, 8, 15)));
        assert_eq!(parse_date("March 5th, 2024"), Some(ymd(2024, 3, 5)));
    }

    #[test]
    fn test_invalid_date_skipped() {
        assert!(parse_date("45/45/2024").is_none());
    }

    #[test]
    fn test_extract_labeled_dates() {
        let text = "Facture N° FAC-001\nDate d'échéance : 14/04/2024\nDate de facture : 15/03/2024";
        let dates = extract_dates(text);

        assert_eq!(dates.issue_date.as_ref().unwrap().value, ymd(2024, 3, 15));
        assert_eq!(dates.due_date.as_ref().unwrap().value, ymd(2024, 4, 14));

        let (start, end) = dates.issue_date.unwrap().position.unwrap();
        assert_eq!(&text[start..end], "15/03/2024");
    }

    #[test]
    fn test_generic_date_label_has_lower_confidence() {
        let dates = extract_dates("Date\t02/01/2024");
        let issue = dates.issue_date.unwrap();
        assert_eq!(issue.value, ymd(2024, 1, 2));
        assert!(issue.confidence < 0.9);
    }
}
