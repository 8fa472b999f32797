//! VAT rate extraction.

use std::collections::HashSet;
use std::str::FromStr;

use rust_decimal::Decimal;

use super::patterns::PERCENT;
use super::{ExtractionMatch, FieldExtractor};

/// VAT rate extractor. Rates are returned as fractions (0.20 for 20 %).
pub struct VatRateExtractor;

impl VatRateExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VatRateExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for VatRateExtractor {
    type Output = ExtractionMatch<Decimal>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results = Vec::new();
        let mut seen = HashSet::new();

        for caps in PERCENT.captures_iter(text) {
            let Some(rate) = parse_rate(&caps[1]) else {
                continue;
            };
            if !seen.insert(rate) {
                continue;
            }
            if let Some(m) = caps.get(0) {
                results.push(ExtractionMatch::new(rate, 0.9, m.as_str()).with_position(m.start(), m.end()));
            }
        }

        results
    }
}

/// Parse "20", "5,5" or "20 %" into a fraction.
pub fn parse_rate(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .trim()
        .trim_end_matches('%')
        .trim()
        .replace(',', ".");
    let percent = Decimal::from_str(&cleaned).ok()?;
    if percent < Decimal::ZERO || percent >= Decimal::ONE_HUNDRED {
        return None;
    }
    Some((percent / Decimal::ONE_HUNDRED).normalize())
}
