//! Currency detection from symbols and ISO codes.

use lazy_static::lazy_static;
use regex::Regex;

use super::{ExtractionMatch, FieldExtractor};

lazy_static! {
    static ref CURRENCY_MARKS: Vec<(&'static str, Regex)> = vec![
        ("EUR", Regex::new(r"€|\bEUR\b").unwrap()),
        ("CHF", Regex::new(r"\bCHF\b|\bFr\.\s?\d").unwrap()),
        ("USD", Regex::new(r"\$|\bUSD\b").unwrap()),
        ("GBP", Regex::new(r"£|\bGBP\b").unwrap()),
    ];

    static ref CURRENCY_WORDS: Vec<(&'static str, Regex)> = vec![
        ("EUR", Regex::new(r"(?i)\beuros?\b").unwrap()),
        ("CHF", Regex::new(r"(?i)\bfrancs?\s+suisses?\b|\bswiss\s+francs?\b").unwrap()),
        ("USD", Regex::new(r"(?i)\b(?:us\s+)?dollars?\b").unwrap()),
        ("GBP", Regex::new(r"(?i)\blivres?\s+sterling\b|\bpounds?\s+sterling\b").unwrap()),
    ];
}

/// Currency extractor. Each match is an ISO 4217 code.
pub struct CurrencyExtractor {
    include_words: bool,
}

impl CurrencyExtractor {
    /// Symbols and ISO codes only.
    pub fn new() -> Self {
        Self {
            include_words: false,
        }
    }

    /// Also accept spelled-out currency names ("euros", "francs suisses").
    pub fn with_words(mut self, include_words: bool) -> Self {
        self.include_words = include_words;
        self
    }
}

impl Default for CurrencyExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for CurrencyExtractor {
    type Output = ExtractionMatch<String>;

    /// The most frequent currency in the text.
    fn extract(&self, text: &str) -> Option<Self::Output> {
        let all = self.extract_all(text);
        let mut best: Option<(&ExtractionMatch<String>, usize)> = None;
        for candidate in &all {
            let count = all.iter().filter(|m| m.value == candidate.value).count();
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((candidate, count));
            }
        }
        best.map(|(m, _)| m.clone())
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results = Vec::new();
        let mut scan = |table: &[(&'static str, Regex)], confidence: f32| {
            for (code, regex) in table {
                for m in regex.find_iter(text) {
                    results.push(
                        ExtractionMatch::new(code.to_string(), confidence, m.as_str())
                            .with_position(m.start(), m.end()),
                    );
                }
            }
        };
        scan(&CURRENCY_MARKS, 0.9);
        if self.include_words {
            scan(&CURRENCY_WORDS, 0.7);
        }
        results.sort_by_key(|r| r.position.map(|(s, _)| s));
        results
    }
}

/// ISO code of the dominant currency, if any mark is present.
pub fn detect_currency(text: &str) -> Option<String> {
    CurrencyExtractor::new().extract(text).map(|m| m.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_currency() {
        assert_eq!(detect_currency("Total TTC 1 200,00 €").as_deref(), Some("EUR"));
        assert_eq!(detect_currency("Montant : CHF 1'200.00").as_deref(), Some("CHF"));
        assert_eq!(detect_currency("Total Fr. 45.00").as_deref(), Some("CHF"));
        assert_eq!(detect_currency("Total $99.00").as_deref(), Some("USD"));
        assert_eq!(detect_currency("Total 12,00"), None);
    }

    #[test]
    fn test_most_frequent_currency_wins() {
        let text = "Frais de port 10 USD\n100,00 €\n200,00 €";
        assert_eq!(detect_currency(text).as_deref(), Some("EUR"));
    }

    #[test]
    fn test_words_only_when_enabled() {
        let text = "Arrêté la présente facture à la somme de mille euros";
        assert!(CurrencyExtractor::new().extract(text).is_none());
        let found = CurrencyExtractor::new().with_words(true).extract(text).unwrap();
        assert_eq!(found.value, "EUR");
        assert_eq!(found.confidence, 0.7);
    }
}
