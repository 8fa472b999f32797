//! Rule-based field extractors for French and English invoices.

pub mod address;
pub mod amounts;
pub mod currency;
pub mod dates;
pub mod patterns;
pub mod siret;
pub mod vat;
pub mod vat_number;

pub use address::{AddressExtractor, AddressParts};
pub use amounts::{extract_totals, find_amounts, parse_amount, AmountExtractor, InvoiceTotals};
pub use currency::{detect_currency, CurrencyExtractor};
pub use dates::{extract_dates, parse_date, DateExtractor, InvoiceDates};
pub use siret::{validate_luhn, SiretExtractor};
pub use vat::{parse_rate, VatRateExtractor};
pub use vat_number::{validate_fr_vat_key, VatNumberExtractor};

/// Trait for field extractors.
pub trait FieldExtractor {
    /// The type of value this extractor produces.
    type Output;

    /// Extract the field from text.
    fn extract(&self, text: &str) -> Option<Self::Output>;

    /// Extract all occurrences of the field.
    fn extract_all(&self, text: &str) -> Vec<Self::Output>;
}

/// Extraction context with confidence scores.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionMatch<T> {
    /// Extracted value.
    pub value: T,
    /// Match strength (0.0 - 1.0), before any quality scaling.
    pub confidence: f32,
    /// Byte range in the searched text.
    pub position: Option<(usize, usize)>,
    /// Source text that was matched.
    pub source: String,
}

impl<T> ExtractionMatch<T> {
    pub fn new(value: T, confidence: f32, source: impl Into<String>) -> Self {
        Self {
            value,
            confidence,
            position: None,
            source: source.into(),
        }
    }

    pub fn with_position(mut self, start: usize, end: usize) -> Self {
        self.position = Some((start, end));
        self
    }

    /// Shift the position by `offset`, for matches found in a slice.
    pub fn offset_by(mut self, offset: usize) -> Self {
        self.position = self.position.map(|(s, e)| (s + offset, e + offset));
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExtractionMatch<U> {
        ExtractionMatch {
            value: f(self.value),
            confidence: self.confidence,
            position: self.position,
            source: self.source,
        }
    }
}

/// Lines of `text` with their starting byte offsets. Tab-separated blocks
/// on the same line stay together.
pub fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split('\n').map(move |line| {
        let start = offset;
        offset += line.len() + 1;
        (start, line)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lines_with_offsets() {
        let text = "Facture\tFAC-1\nTotal TTC\t12,00";
        let lines: Vec<(usize, &str)> = lines_with_offsets(text).collect();
        assert_eq!(lines, vec![(0, "Facture\tFAC-1"), (14, "Total TTC\t12,00")]);
        assert_eq!(&text[14..19], "Total");
    }

    #[test]
    fn test_offset_by() {
        let m = ExtractionMatch::new(1, 0.9, "x").with_position(2, 3).offset_by(10);
        assert_eq!(m.position, Some((12, 13)));
    }
}
