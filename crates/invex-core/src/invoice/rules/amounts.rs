//! Amount parsing and labeled totals.

use std::str::FromStr;

use rust_decimal::Decimal;

use super::patterns::{
    AMOUNT, AMOUNT_DUE_LABEL, BARE_TOTAL, SUBTOTAL_LABEL, TOTAL_INCL_LABEL, TOTAL_VAT_LABEL, VAT_LABEL,
};
use super::{lines_with_offsets, ExtractionMatch, FieldExtractor};

/// Amount extractor.
pub struct AmountExtractor;

impl AmountExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AmountExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for AmountExtractor {
    type Output = ExtractionMatch<Decimal>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        find_amounts(text)
    }
}

/// Every amount in `text`, skipping numbers that are part of a date.
pub fn find_amounts(text: &str) -> Vec<ExtractionMatch<Decimal>> {
    let bytes = text.as_bytes();
    let mut results = Vec::new();
    for m in AMOUNT.find_iter(text) {
        // 15.03.2024 reads as 15.03 followed by .2024
        let continues = bytes.get(m.end()).is_some_and(|b| matches!(b, b'.' | b'/' | b'-'))
            && bytes.get(m.end() + 1).is_some_and(u8::is_ascii_digit);
        let preceded = m.start() >= 2
            && matches!(bytes[m.start() - 1], b'.' | b'/' | b'-')
            && bytes[m.start() - 2].is_ascii_digit();
        if continues || preceded {
            continue;
        }
        if let Some(value) = parse_amount(m.as_str()) {
            results.push(ExtractionMatch::new(value, 0.9, m.as_str()).with_position(m.start(), m.end()));
        }
    }
    results
}

/// Labeled invoice totals.
#[derive(Debug, Clone, Default)]
pub struct InvoiceTotals {
    pub subtotal_excl_vat: Option<ExtractionMatch<Decimal>>,
    pub total_vat: Option<ExtractionMatch<Decimal>>,
    pub total_incl_vat: Option<ExtractionMatch<Decimal>>,
    pub amount_due: Option<ExtractionMatch<Decimal>>,
}

/// Extract labeled totals. Each label takes the first amount after it on
/// its line; a line is claimed by the most specific label that matches.
pub fn extract_totals(text: &str) -> InvoiceTotals {
    let mut result = InvoiceTotals::default();

    for (line_start, line) in lines_with_offsets(text) {
        let labelled = if let Some(label) = AMOUNT_DUE_LABEL.find(line) {
            Some((&mut result.amount_due, label.end(), 0.95))
        } else if let Some(label) = TOTAL_INCL_LABEL.find(line) {
            Some((&mut result.total_incl_vat, label.end(), 0.95))
        } else if let Some(label) = SUBTOTAL_LABEL.find(line) {
            Some((&mut result.subtotal_excl_vat, label.end(), 0.95))
        } else if VAT_LABEL.is_match(line) {
            // "N° TVA intracom" lines carry an identifier, not an amount
            None
        } else if let Some(label) = TOTAL_VAT_LABEL.find(line) {
            Some((&mut result.total_vat, label.end(), 0.95))
        } else {
            // A plain "Total" followed by the amount
            BARE_TOTAL
                .find(line)
                .map(|label| (&mut result.total_incl_vat, label.end(), 0.75))
        };

        let Some((slot, label_end, confidence)) = labelled else {
            continue;
        };
        if slot.is_some() {
            continue;
        }
        if let Some(amount) = find_amounts(&line[label_end..]).into_iter().next() {
            let mut amount = amount.offset_by(line_start + label_end);
            amount.confidence = confidence;
            *slot = Some(amount);
        }
    }

    result
}

/// Parse an amount written with any common grouping and decimal separator
/// ("1 234,56", "1.234,56", "1,234.56", "1'234.56", "1234.56").
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let negative = s.trim_start().starts_with('-') || (s.contains('(') && s.contains(')'));

    // Keep digits and separators only
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    // The last separator is the decimal one when followed by one or two digits
    let normalized = match cleaned.rfind([',', '.']) {
        Some(pos) if cleaned.len() - pos - 1 <= 2 => {
            let (int_part, frac) = cleaned.split_at(pos);
            let int_digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
            format!("{}.{}", if int_digits.is_empty() { "0" } else { &int_digits }, &frac[1..])
        }
        _ => cleaned.chars().filter(|c| c.is_ascii_digit()).collect(),
    };

    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1 234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1'234.56 CHF"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1200.00 €"), Some(dec("1200.00")));
        assert_eq!(parse_amount("2"), Some(dec("2")));
        assert_eq!(parse_amount("1,5"), Some(dec("1.5")));
        assert_eq!(parse_amount("1 200"), Some(dec("1200")));
        assert_eq!(parse_amount("-50,00"), Some(dec("-50.00")));
        assert_eq!(parse_amount("€"), None);
    }

    #[test]
    fn test_find_amounts_skips_dates() {
        let found: Vec<Decimal> = find_amounts("Le 15.03.2024 : 1 200,00 €")
            .into_iter()
            .map(|m| m.value)
            .collect();
        assert_eq!(found, vec![dec("1200.00")]);
    }

    #[test]
    fn test_extract_totals() {
        let text = "Total HT\t1 000,00 €\nTVA 20 %\t200,00 €\nTotal TTC\t1 200,00 €\nNet à payer\t1 200,00 €";
        let totals = extract_totals(text);

        assert_eq!(totals.subtotal_excl_vat.unwrap().value, dec("1000.00"));
        assert_eq!(totals.total_vat.unwrap().value, dec("200.00"));
        assert_eq!(totals.total_incl_vat.as_ref().unwrap().value, dec("1200.00"));
        assert_eq!(totals.amount_due.unwrap().value, dec("1200.00"));

        let (start, end) = totals.total_incl_vat.unwrap().position.unwrap();
        assert_eq!(&text[start..end], "1 200,00");
    }

    #[test]
    fn test_vat_identifier_line_is_not_a_total() {
        let totals = extract_totals("N° TVA intracom : FR40 303 265 045\nTVA\t45,00");
        assert_eq!(totals.total_vat.unwrap().value, dec("45.00"));
    }

    #[test]
    fn test_first_label_occurrence_wins() {
        let totals = extract_totals("Total TTC 120,00\nTotal TTC 999,00");
        assert_eq!(totals.total_incl_vat.unwrap().value, dec("120.00"));
    }

    #[test]
    fn test_bare_total_cell() {
        let totals = extract_totals("Total\t1 200,00 €");
        let total = totals.total_incl_vat.unwrap();
        assert_eq!(total.value, dec("1200.00"));
        assert_eq!(total.confidence, 0.75);
    }
}
