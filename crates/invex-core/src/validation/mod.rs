//! Consistency validation of an extracted invoice record.
//!
//! Every check is independent and only records anomalies. The validator
//! never changes an extracted value.

use rust_decimal::Decimal;
use tracing::debug;

use crate::invoice::{ExtractedField, FieldKey};
use crate::models::config::ValidationConfig;
use crate::models::invoice::{Anomaly, InvoiceRecord, ValidationReport};

/// Cross-checks line items, totals and required fields.
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate `record`. `fields` carries the confidences of the resolved
    /// fields; `stage_anomalies` are carried into the report and the score.
    pub fn validate(
        &self,
        record: &InvoiceRecord,
        fields: &[ExtractedField],
        stage_anomalies: &[Anomaly],
    ) -> ValidationReport {
        let mut anomalies: Vec<Anomaly> = stage_anomalies.to_vec();

        self.check_line_items(record, &mut anomalies);
        let calculation_check = self.check_aggregate(record, &mut anomalies);
        self.check_breakdown(record, &mut anomalies);

        let missing: Vec<FieldKey> = self
            .config
            .required_fields
            .iter()
            .copied()
            .filter(|key| !fields.iter().any(|f| f.name == *key))
            .collect();
        for key in &missing {
            anomalies.push(Anomaly::new(key.path(), "required field is missing"));
        }

        let data_quality_score = self.score(record, fields, &missing, anomalies.len());
        debug!(
            "Validation: calculation_check={}, {} missing required, {} anomalies, score {:.3}",
            calculation_check,
            missing.len(),
            anomalies.len(),
            data_quality_score
        );

        ValidationReport {
            calculation_check,
            required_fields_present: missing.is_empty(),
            data_quality_score,
            anomalies,
        }
    }

    /// Within epsilon. Values too far apart to subtract are not close.
    fn close(&self, a: Decimal, b: Decimal) -> bool {
        a.checked_sub(b).is_some_and(|d| d.abs() <= self.config.epsilon)
    }

    fn check_line_items(&self, record: &InvoiceRecord, anomalies: &mut Vec<Anomaly>) {
        for (i, item) in record.line_items.iter().enumerate() {
            let expected = Decimal::ONE
                .checked_add(item.vat_rate)
                .and_then(|factor| item.amount_excl_vat.checked_mul(factor))
                .map(|v| v.round_dp(2));
            match expected {
                Some(expected) if self.close(expected, item.amount_incl_vat) => {}
                Some(expected) => anomalies.push(Anomaly::new(
                    format!("line_items[{}].amount_incl_vat", i),
                    format!(
                        "{} × (1 + {}) = {}, found {}",
                        item.amount_excl_vat, item.vat_rate, expected, item.amount_incl_vat
                    ),
                )),
                None => anomalies.push(Anomaly::new(
                    format!("line_items[{}].amount_incl_vat", i),
                    format!("{} × (1 + {}) is out of range", item.amount_excl_vat, item.vat_rate),
                )),
            }

            match item.amount_excl_vat.checked_add(item.vat_amount) {
                Some(sum) if self.close(sum, item.amount_incl_vat) => {}
                Some(sum) => anomalies.push(Anomaly::new(
                    format!("line_items[{}].vat_amount", i),
                    format!(
                        "{} + {} = {}, found {}",
                        item.amount_excl_vat, item.vat_amount, sum, item.amount_incl_vat
                    ),
                )),
                None => anomalies.push(Anomaly::new(
                    format!("line_items[{}].vat_amount", i),
                    format!("{} + {} is out of range", item.amount_excl_vat, item.vat_amount),
                )),
            }
        }
    }

    /// Sum of the items' inclusive amounts against the inclusive total.
    fn check_aggregate(&self, record: &InvoiceRecord, anomalies: &mut Vec<Anomaly>) -> bool {
        let path = FieldKey::TotalInclVat.path();
        let Some(total) = record.totals.total_incl_vat else {
            anomalies.push(Anomaly::new(path, "total is missing, cannot reconcile line items"));
            return false;
        };
        if record.line_items.is_empty() {
            anomalies.push(Anomaly::new(path, "no line items to reconcile with the total"));
            return false;
        }

        match checked_sum(record.line_items.iter().map(|i| i.amount_incl_vat)) {
            Some(sum) if self.close(sum, total) => true,
            Some(sum) => {
                anomalies.push(Anomaly::new(
                    path,
                    format!("line items sum to {}, total is {}", sum, total),
                ));
                false
            }
            None => {
                anomalies.push(Anomaly::new(path, "line item sum is out of range"));
                false
            }
        }
    }

    /// Subtotal and VAT breakdown. These never gate `calculation_check`.
    fn check_breakdown(&self, record: &InvoiceRecord, anomalies: &mut Vec<Anomaly>) {
        let totals = &record.totals;
        let items = &record.line_items;

        if !items.is_empty() {
            if let Some(subtotal) = totals.subtotal_excl_vat {
                let path = FieldKey::SubtotalExclVat.path();
                match checked_sum(items.iter().map(|i| i.amount_excl_vat)) {
                    Some(sum) if self.close(sum, subtotal) => {}
                    Some(sum) => anomalies.push(Anomaly::new(
                        path,
                        format!("line items sum to {}, subtotal is {}", sum, subtotal),
                    )),
                    None => anomalies.push(Anomaly::new(path, "line item sum is out of range")),
                }
            }
            if let Some(vat) = totals.total_vat {
                let path = FieldKey::TotalVat.path();
                match checked_sum(items.iter().map(|i| i.vat_amount)) {
                    Some(sum) if self.close(sum, vat) => {}
                    Some(sum) => anomalies.push(Anomaly::new(
                        path,
                        format!("line item VAT sums to {}, total VAT is {}", sum, vat),
                    )),
                    None => anomalies.push(Anomaly::new(path, "line item VAT sum is out of range")),
                }
            }
        }

        if let (Some(subtotal), Some(vat), Some(total)) =
            (totals.subtotal_excl_vat, totals.total_vat, totals.total_incl_vat)
        {
            let path = FieldKey::TotalInclVat.path();
            match subtotal.checked_add(vat) {
                Some(sum) if self.close(sum, total) => {}
                Some(sum) => anomalies.push(Anomaly::new(
                    path,
                    format!("{} + {} = {}, total is {}", subtotal, vat, sum, total),
                )),
                None => anomalies.push(Anomaly::new(
                    path,
                    format!("{} + {} is out of range", subtotal, vat),
                )),
            }
        }
    }

    /// Weighted mean confidence divided by `1 + penalty × anomalies`.
    fn score(
        &self,
        record: &InvoiceRecord,
        fields: &[ExtractedField],
        missing: &[FieldKey],
        anomaly_count: usize,
    ) -> f32 {
        let weight_of = |key: FieldKey| {
            if self.config.required_fields.contains(&key) {
                self.config.required_weight
            } else {
                1.0
            }
        };

        let mut weighted = 0.0f32;
        let mut total_weight = 0.0f32;
        for field in fields {
            let w = weight_of(field.name);
            weighted += w * field.confidence;
            total_weight += w;
        }
        for key in missing {
            total_weight += weight_of(*key);
        }
        for item in &record.line_items {
            weighted += item.confidence;
            total_weight += 1.0;
        }

        let base = if total_weight > 0.0 { weighted / total_weight } else { 0.0 };
        let score = base / (1.0 + self.config.anomaly_penalty * anomaly_count as f32);
        score.clamp(0.0, 1.0)
    }
}

/// `None` when the sum leaves the `Decimal` range.
fn checked_sum(mut values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    values.try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{FieldValue, StrategyKind};
    use crate::models::invoice::{LineItem, Totals};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn item(excl: &str, vat: &str, incl: &str) -> LineItem {
        LineItem {
            description: "Item".to_string(),
            quantity: Decimal::ONE,
            unit_price: dec(excl),
            vat_rate: dec("0.20"),
            amount_excl_vat: dec(excl),
            vat_amount: dec(vat),
            amount_incl_vat: dec(incl),
            derived: Vec::new(),
            confidence: 0.9,
            source_tokens: Vec::new(),
        }
    }

    fn field(key: FieldKey, confidence: f32) -> ExtractedField {
        ExtractedField {
            name: key,
            value: FieldValue::Text("x".to_string()),
            source_tokens: Vec::new(),
            confidence,
            strategy: StrategyKind::Rule,
        }
    }

    fn required_fields(confidence: f32) -> Vec<ExtractedField> {
        ValidationConfig::default()
            .required_fields
            .into_iter()
            .map(|k| field(k, confidence))
            .collect()
    }

    fn record(items: Vec<LineItem>, total: Option<&str>) -> InvoiceRecord {
        InvoiceRecord {
            line_items: items,
            totals: Totals {
                total_incl_vat: total.map(dec),
                ..Totals::default()
            },
            ..InvoiceRecord::default()
        }
    }

    fn validator() -> Validator {
        Validator::new(ValidationConfig::default())
    }

    #[test]
    fn test_consistent_invoice() {
        let record = record(
            vec![item("500.00", "100.00", "600.00"), item("500.00", "100.00", "600.00")],
            Some("1200.00"),
        );
        let report = validator().validate(&record, &required_fields(0.9), &[]);

        assert!(report.calculation_check);
        assert!(report.required_fields_present);
        assert!(report.anomalies.is_empty());
        assert!((report.data_quality_score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_line_item_off_by_more_than_epsilon() {
        let record = record(vec![item("100.00", "20.00", "120.02")], Some("120.02"));
        let report = validator().validate(&record, &required_fields(0.9), &[]);

        assert!(report.calculation_check);
        let fields: Vec<&str> = report.anomalies.iter().map(|a| a.field.as_str()).collect();
        assert_eq!(fields, vec!["line_items[0].amount_incl_vat", "line_items[0].vat_amount"]);
    }

    #[test]
    fn test_within_epsilon_passes() {
        let record = record(vec![item("100.00", "20.00", "120.01")], Some("120.00"));
        let report = validator().validate(&record, &required_fields(0.9), &[]);
        assert!(report.calculation_check);
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_aggregate_mismatch() {
        let record = record(vec![item("100.00", "20.00", "120.00")], Some("130.00"));
        let report = validator().validate(&record, &required_fields(0.9), &[]);

        assert!(!report.calculation_check);
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].field, "totals.total_incl_vat");
    }

    #[test]
    fn test_no_items_or_no_total_fails_calculation() {
        let report = validator().validate(&record(Vec::new(), Some("10.00")), &required_fields(0.9), &[]);
        assert!(!report.calculation_check);
        assert!(report.anomalies.iter().any(|a| a.field == "totals.total_incl_vat"));

        let report = validator().validate(&record(vec![item("1.00", "0.20", "1.20")], None), &[], &[]);
        assert!(!report.calculation_check);
        assert!(!report.required_fields_present);
        assert!(report.anomalies.iter().any(|a| a.field == "totals.total_incl_vat"));
    }

    #[test]
    fn test_missing_required_fields() {
        let fields = vec![field(FieldKey::SupplierName, 0.9)];
        let report = validator().validate(&record(Vec::new(), None), &fields, &[]);

        assert!(!report.required_fields_present);
        let missing: Vec<&str> = report
            .anomalies
            .iter()
            .filter(|a| a.issue == "required field is missing")
            .map(|a| a.field.as_str())
            .collect();
        assert_eq!(missing, vec!["invoice.number", "invoice.date", "totals.total_incl_vat"]);
    }

    #[test]
    fn test_score_monotonic_in_anomalies() {
        let record = record(vec![item("100.00", "20.00", "120.00")], Some("120.00"));
        let fields = required_fields(0.8);

        let mut previous = validator().validate(&record, &fields, &[]).data_quality_score;
        let mut stage = Vec::new();
        for n in 0..5 {
            stage.push(Anomaly::new(format!("line_items[row {}]", n), "dropped"));
            let score = validator().validate(&record, &fields, &stage).data_quality_score;
            assert!(score < previous);
            previous = score;
        }
    }

    #[test]
    fn test_out_of_range_amounts_become_anomalies() {
        let huge = "70000000000000000000000000000";
        let mut record = record(vec![item(huge, "0", huge), item(huge, "0", huge)], Some("10.00"));
        record.totals.subtotal_excl_vat = Some(dec(huge));
        record.totals.total_vat = Some(dec(huge));

        let report = validator().validate(&record, &required_fields(0.9), &[]);

        assert!(!report.calculation_check);
        let fields: Vec<&str> = report.anomalies.iter().map(|a| a.field.as_str()).collect();
        assert!(fields.contains(&"line_items[0].amount_incl_vat"));
        assert!(fields.contains(&"totals.subtotal_excl_vat"));
        assert!(
            report
                .anomalies
                .iter()
                .any(|a| a.field == "totals.total_incl_vat" && a.issue.contains("out of range"))
        );
        assert!(report.data_quality_score < 0.9);
    }

    #[test]
    fn test_values_untouched() {
        let record = record(vec![item("100.00", "20.00", "999.00")], Some("5.00"));
        let before = record.clone();
        let _ = validator().validate(&record, &[], &[]);
        assert_eq!(record, before);
    }
}
