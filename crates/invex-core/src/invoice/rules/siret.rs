//! SIRET/SIREN (French company registration number) extraction and validation.

use super::patterns::{RCS_NUMBER, SIRET_LABELED, SIRET_STANDALONE};
use super::{ExtractionMatch, FieldExtractor};

/// SIRET field extractor.
///
/// Accepts a 14-digit SIRET or a 9-digit SIREN. Numbers failing the Luhn
/// check are reported through [`SiretExtractor::rejected`] instead of being
/// returned when validation is on.
pub struct SiretExtractor {
    validate: bool,
}

impl SiretExtractor {
    /// Create a new SIRET extractor.
    pub fn new() -> Self {
        Self { validate: true }
    }

    /// Set whether to validate Luhn checksums.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Labeled numbers that failed the checksum.
    pub fn rejected(&self, text: &str) -> Vec<String> {
        if !self.validate {
            return Vec::new();
        }
        SIRET_LABELED
            .captures_iter(text)
            .map(|caps| digits(&caps[2]))
            .filter(|n| !validate_luhn(n))
            .collect()
    }

    fn accept(&self, number: &str) -> bool {
        matches!(number.len(), 9 | 14) && (!self.validate || validate_luhn(number))
    }
}

impl Default for SiretExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for SiretExtractor {
    type Output = ExtractionMatch<String>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results: Vec<Self::Output> = Vec::new();

        // Labeled "SIRET : 732 829 320 00074" first
        for caps in SIRET_LABELED.captures_iter(text) {
            let number = digits(&caps[2]);
            let is_siret = caps[1].eq_ignore_ascii_case("t") && number.len() == 14;
            if !self.accept(&number) {
                continue;
            }
            if let Some(m) = caps.get(2) {
                let confidence = if is_siret || number.len() == 9 { 0.95 } else { 0.85 };
                results.push(
                    ExtractionMatch::new(number, confidence, m.as_str()).with_position(m.start(), m.end()),
                );
            }
        }

        // "RCS Paris 732 829 320" carries the SIREN
        for caps in RCS_NUMBER.captures_iter(text) {
            let number = digits(&caps[1]);
            if results.iter().any(|r| r.value.starts_with(&number)) || !self.accept(&number) {
                continue;
            }
            if let Some(m) = caps.get(1) {
                results.push(
                    ExtractionMatch::new(number, 0.8, m.as_str()).with_position(m.start(), m.end()),
                );
            }
        }

        // Unlabeled 14-digit runs are only trusted when the checksum holds
        for caps in SIRET_STANDALONE.captures_iter(text) {
            let number = format!("{}{}{}{}", &caps[1], &caps[2], &caps[3], &caps[4]);
            if results.iter().any(|r| r.value == number) || !validate_luhn(&number) {
                continue;
            }
            if let Some(m) = caps.get(0) {
                results.push(
                    ExtractionMatch::new(number, 0.6, m.as_str()).with_position(m.start(), m.end()),
                );
            }
        }

        results
    }
}

/// Validate a SIREN/SIRET with the Luhn algorithm.
pub fn validate_luhn(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() || digits.len() != number.chars().filter(|c| !c.is_whitespace()).count() {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}
