//! Intra-community VAT number extraction.

use super::patterns::{VAT_CH, VAT_EU, VAT_FR, VAT_LABEL};
use super::{lines_with_offsets, ExtractionMatch, FieldExtractor};

/// VAT number extractor.
///
/// French numbers carry a two-character key derived from the SIREN; when
/// validation is on, a numeric key that does not match is rejected.
pub struct VatNumberExtractor {
    validate: bool,
}

impl VatNumberExtractor {
    pub fn new() -> Self {
        Self { validate: true }
    }

    /// Set whether to check the French key.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// French numbers whose key does not match.
    pub fn rejected(&self, text: &str) -> Vec<String> {
        if !self.validate {
            return Vec::new();
        }
        VAT_FR
            .captures_iter(text)
            .map(|caps| format!("FR{}{}{}{}", &caps[1], &caps[2], &caps[3], &caps[4]))
            .filter(|n| !validate_fr_vat_key(n))
            .collect()
    }
}

impl Default for VatNumberExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for VatNumberExtractor {
    type Output = ExtractionMatch<String>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results = Vec::new();

        for (line_start, line) in lines_with_offsets(text) {
            let labeled = VAT_LABEL.is_match(line);

            for caps in VAT_FR.captures_iter(line) {
                let number = format!("FR{}{}{}{}", &caps[1], &caps[2], &caps[3], &caps[4]);
                if self.validate && !validate_fr_vat_key(&number) {
                    continue;
                }
                if let Some(m) = caps.get(0) {
                    results.push(
                        ExtractionMatch::new(number, if labeled { 0.95 } else { 0.85 }, m.as_str())
                            .with_position(line_start + m.start(), line_start + m.end()),
                    );
                }
            }

            for caps in VAT_CH.captures_iter(line) {
                let number = format!("CHE-{}.{}.{}", &caps[1], &caps[2], &caps[3]);
                if let Some(m) = caps.get(0) {
                    results.push(
                        ExtractionMatch::new(number, if labeled { 0.95 } else { 0.85 }, m.as_str())
                            .with_position(line_start + m.start(), line_start + m.end()),
                    );
                }
            }

            for m in VAT_EU.find_iter(line) {
                let number: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
                results.push(
                    ExtractionMatch::new(number, if labeled { 0.9 } else { 0.75 }, m.as_str())
                        .with_position(line_start + m.start(), line_start + m.end()),
                );
            }
        }

        results.sort_by_key(|r| r.position.map(|(s, _)| s));
        results
    }
}

/// Check the key of a French VAT number: `FR` + key + SIREN where
/// key = (12 + 3 × (SIREN mod 97)) mod 97. Alphabetic keys (used by some
/// non-resident companies) cannot be checked and are accepted.
pub fn validate_fr_vat_key(number: &str) -> bool {
    let compact: String = number.chars().filter(|c| !c.is_whitespace()).collect();
    let Some(rest) = compact.strip_prefix("FR") else {
        return false;
    };
    if rest.len() != 11 || !rest.is_char_boundary(2) {
        return false;
    }
    let (key, siren) = rest.split_at(2);
    let Ok(siren) = siren.parse::<u64>() else {
        return false;
    };
    match key.parse::<u64>() {
        Ok(key) => key == (12 + 3 * (siren % 97)) % 97,
        Err(_) => key.chars().all(|c| c.is_ascii_alphanumeric()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_fr_vat_key() {
        assert!(validate_fr_vat_key("FR44732829320"));
        assert!(validate_fr_vat_key("FR 40 303 265 045"));
        assert!(!validate_fr_vat_key("FR45732829320"));
        assert!(!validate_fr_vat_key("DE123456789"));
    }

    #[test]
    fn test_labeled_number_scores_higher() {
        let extractor = VatNumberExtractor::new();
        let labeled = extractor.extract("N° TVA intracom : FR44 732 829 320").unwrap();
        assert_eq!(labeled.value, "FR44732829320");
        assert_eq!(labeled.confidence, 0.95);

        let bare = extractor.extract("FR44 732 829 320").unwrap();
        assert_eq!(bare.confidence, 0.85);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let extractor = VatNumberExtractor::new();
        assert!(extractor.extract("TVA FR45 732 829 320").is_none());
        assert_eq!(extractor.rejected("TVA FR45 732 829 320"), vec!["FR45732829320"]);
        assert!(extractor.with_validation(false).extract("FR45 732 829 320").is_some());
    }

    #[test]
    fn test_swiss_uid() {
        let result = VatNumberExtractor::new().extract("TVA : CHE-123.456.789 TVA").unwrap();
        assert_eq!(result.value, "CHE-123.456.789");
    }
}
