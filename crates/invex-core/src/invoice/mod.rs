//! Invoice field extraction.
//!
//! Field values come from an ordered list of [`FieldMatcher`] strategies.
//! Each strategy is asked only for the fields that are still missing or
//! below the confidence floor; the best candidate per field wins.

pub mod fields;
mod line_items;
mod model_matcher;
#[cfg(feature = "remote-model")]
mod remote;
mod rule_matcher;
pub mod rules;
mod strategy;

use std::sync::Arc;

use tracing::{debug, info};
#[cfg(feature = "remote-model")]
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::layout::DocumentLayout;
use crate::models::config::{ExtractionConfig, InvexConfig, Strategy};
use crate::models::invoice::{
    Address, Anomaly, Contact, Customer, InvoiceInfo, InvoiceRecord, Supplier, Totals,
};

pub use fields::{ExtractedField, FieldKey, FieldValue, StrategyKind, ValueKind};
pub use line_items::{LineItemParser, ParsedItems};
pub use model_matcher::{FieldModelWeights, ModelMatcher};
#[cfg(feature = "remote-model")]
pub use remote::RemoteModelMatcher;
pub use rule_matcher::RuleMatcher;
pub use strategy::{
    Candidate, ExtractionContext, FieldMatcher, Proposals, Regions, ResolvedFields, TextView,
};

/// Confidence given to configured defaults (currency, country).
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Result of field extraction, before validation.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Record with `validation` left empty.
    pub record: InvoiceRecord,
    /// Every resolved field with its provenance, in schema order.
    pub fields: Vec<ExtractedField>,
    /// Checksum failures and dropped table rows.
    pub anomalies: Vec<Anomaly>,
}

/// Runs the strategies over a document layout and assembles the record.
pub struct InvoiceExtractor {
    config: ExtractionConfig,
    column_tolerance: f32,
    rule: Arc<dyn FieldMatcher>,
    model: Arc<dyn FieldMatcher>,
    remote: Option<Arc<dyn FieldMatcher>>,
}

impl InvoiceExtractor {
    /// Build the extractor and its strategies from configuration. The field
    /// model is loaded here, once.
    pub fn new(config: &InvexConfig) -> Self {
        let rule: Arc<dyn FieldMatcher> = Arc::new(RuleMatcher::from_config(&config.extraction));
        let model: Arc<dyn FieldMatcher> = Arc::new(ModelMatcher::load(&config.models, &config.extraction));
        let extractor = Self::with_matchers(
            config.extraction.clone(),
            config.layout.column_tolerance_ratio,
            rule,
            model,
        );

        #[cfg(feature = "remote-model")]
        if let Some(remote) = &config.models.remote {
            match RemoteModelMatcher::new(remote.clone()) {
                Ok(matcher) => return extractor.with_remote(Arc::new(matcher)),
                Err(e) => warn!("Remote field model disabled: {}", e),
            }
        }

        extractor
    }

    pub fn with_matchers(
        config: ExtractionConfig,
        column_tolerance: f32,
        rule: Arc<dyn FieldMatcher>,
        model: Arc<dyn FieldMatcher>,
    ) -> Self {
        Self {
            config,
            column_tolerance,
            rule,
            model,
            remote: None,
        }
    }

    /// Append a strategy consulted after the local ones.
    pub fn with_remote(mut self, remote: Arc<dyn FieldMatcher>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract the fields of `schema` and the line items.
    pub fn extract(&self, layout: &DocumentLayout, strategy: Strategy, schema: &[FieldKey]) -> Result<Extraction> {
        if layout.token_count() == 0 {
            return Err(PipelineError::NoExtractableContent);
        }

        let ctx = ExtractionContext::new(layout, &self.config, self.column_tolerance);
        let mut anomalies = Vec::new();

        let mut resolved = ResolvedFields::new();
        for matcher in self.order(strategy) {
            let wanted: Vec<FieldKey> = schema
                .iter()
                .copied()
                .filter(|k| {
                    resolved
                        .get(k)
                        .is_none_or(|f| f.confidence < self.config.confidence_floor)
                })
                .collect();
            if wanted.is_empty() {
                break;
            }

            let proposals = matcher.resolve(&wanted, &ctx, &resolved);
            for anomaly in proposals.anomalies {
                if !anomalies.contains(&anomaly) {
                    anomalies.push(anomaly);
                }
            }
            for (key, candidate) in proposals.candidates {
                if !wanted.contains(&key) || !candidate.value.fits(key.kind()) {
                    continue;
                }
                let confidence = self.scaled(&ctx, &candidate);
                if resolved.get(&key).is_none_or(|f| confidence > f.confidence) {
                    debug!("{} = {} ({:.2}, {:?})", key, candidate.value, confidence, matcher.kind());
                    resolved.insert(
                        key,
                        ExtractedField {
                            name: key,
                            value: candidate.value,
                            source_tokens: candidate.source_tokens,
                            confidence,
                            strategy: matcher.kind(),
                        },
                    );
                }
            }
        }

        self.apply_defaults(schema, &mut resolved);

        let parsed = LineItemParser::new(self.config.default_vat_rate).parse(&ctx);
        anomalies.extend(parsed.anomalies);

        let mut record = build_record(&resolved);
        record.line_items = parsed.items;

        info!(
            "Extracted {} of {} fields and {} line items",
            resolved.len(),
            schema.len(),
            record.line_items.len()
        );

        Ok(Extraction {
            record,
            fields: resolved.into_values().collect(),
            anomalies,
        })
    }

    fn order(&self, strategy: Strategy) -> Vec<&Arc<dyn FieldMatcher>> {
        let mut order = match strategy {
            Strategy::RuleFirst => vec![&self.rule, &self.model],
            Strategy::ModelFirst => vec![&self.model, &self.rule],
        };
        if let Some(remote) = &self.remote {
            order.push(remote);
        }
        order
    }

    /// `confidence × (1 − quality_weight × (1 − quality))`.
    fn scaled(&self, ctx: &ExtractionContext<'_>, candidate: &Candidate) -> f32 {
        let quality = ctx.quality_for(&candidate.source_tokens).clamp(0.0, 1.0);
        let factor = 1.0 - self.config.quality_weight * (1.0 - quality);
        (candidate.confidence * factor).clamp(0.0, 1.0)
    }

    fn apply_defaults(&self, schema: &[FieldKey], resolved: &mut ResolvedFields) {
        let default = |key: FieldKey, value: &str| ExtractedField {
            name: key,
            value: FieldValue::Text(value.to_string()),
            source_tokens: Vec::new(),
            confidence: DEFAULT_CONFIDENCE,
            strategy: StrategyKind::Rule,
        };

        if schema.contains(&FieldKey::Currency) && !resolved.contains_key(&FieldKey::Currency) {
            resolved.insert(FieldKey::Currency, default(FieldKey::Currency, &self.config.default_currency));
        }
        if schema.contains(&FieldKey::SupplierCountry) && !resolved.contains_key(&FieldKey::SupplierCountry) {
            resolved.insert(
                FieldKey::SupplierCountry,
                default(FieldKey::SupplierCountry, &self.config.default_country),
            );
        }

        let has_customer = [
            FieldKey::CustomerName,
            FieldKey::CustomerStreet,
            FieldKey::CustomerCity,
            FieldKey::CustomerPostalCode,
        ]
        .iter()
        .any(|k| resolved.contains_key(k));
        if has_customer
            && schema.contains(&FieldKey::CustomerCountry)
            && !resolved.contains_key(&FieldKey::CustomerCountry)
        {
            resolved.insert(
                FieldKey::CustomerCountry,
                default(FieldKey::CustomerCountry, &self.config.default_country),
            );
        }

        if schema.contains(&FieldKey::AmountDue) && !resolved.contains_key(&FieldKey::AmountDue) {
            if let Some(total) = resolved.get(&FieldKey::TotalInclVat).cloned() {
                resolved.insert(
                    FieldKey::AmountDue,
                    ExtractedField {
                        name: FieldKey::AmountDue,
                        ..total
                    },
                );
            }
        }
    }
}

/// Copy resolved field values into the output record.
fn build_record(resolved: &ResolvedFields) -> InvoiceRecord {
    let text = |key: FieldKey| {
        resolved
            .get(&key)
            .and_then(|f| f.value.as_text())
            .map(str::to_string)
    };
    let date = |key: FieldKey| resolved.get(&key).and_then(|f| f.value.as_date());
    let amount = |key: FieldKey| resolved.get(&key).and_then(|f| f.value.as_amount());

    InvoiceRecord {
        supplier: Supplier {
            name: text(FieldKey::SupplierName),
            address: Address {
                street: text(FieldKey::SupplierStreet),
                city: text(FieldKey::SupplierCity),
                postal_code: text(FieldKey::SupplierPostalCode),
                country: text(FieldKey::SupplierCountry),
            },
            siret: text(FieldKey::SupplierSiret),
            vat_number: text(FieldKey::SupplierVatNumber),
            contact: Contact {
                phone: text(FieldKey::SupplierPhone),
                email: text(FieldKey::SupplierEmail),
            },
        },
        customer: Customer {
            name: text(FieldKey::CustomerName),
            address: Address {
                street: text(FieldKey::CustomerStreet),
                city: text(FieldKey::CustomerCity),
                postal_code: text(FieldKey::CustomerPostalCode),
                country: text(FieldKey::CustomerCountry),
            },
            customer_id: text(FieldKey::CustomerId),
        },
        invoice: InvoiceInfo {
            number: text(FieldKey::InvoiceNumber),
            date: date(FieldKey::InvoiceDate),
            due_date: date(FieldKey::DueDate),
            currency: text(FieldKey::Currency),
            payment_terms: text(FieldKey::PaymentTerms),
        },
        line_items: Vec::new(),
        totals: Totals {
            subtotal_excl_vat: amount(FieldKey::SubtotalExclVat),
            total_vat: amount(FieldKey::TotalVat),
            total_incl_vat: amount(FieldKey::TotalInclVat),
            amount_due: amount(FieldKey::AmountDue),
        },
        validation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::strategy::tests::layout_of;
    use crate::layout::LayoutAssembler;
    use crate::models::config::LayoutConfig;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn extractor() -> InvoiceExtractor {
        InvoiceExtractor::new(&InvexConfig::default())
    }

    /// A strategy that proposes one fixed value and counts its calls.
    struct Fixed {
        key: FieldKey,
        value: FieldValue,
        confidence: f32,
        calls: AtomicUsize,
    }

    impl FieldMatcher for Fixed {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Model
        }

        fn resolve(&self, wanted: &[FieldKey], _ctx: &ExtractionContext<'_>, _resolved: &ResolvedFields) -> Proposals {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = Proposals::default();
            if wanted.contains(&self.key) {
                out.push(
                    self.key,
                    Candidate {
                        value: self.value.clone(),
                        source_tokens: Vec::new(),
                        confidence: self.confidence,
                    },
                );
            }
            out
        }
    }

    fn sample() -> DocumentLayout {
        layout_of(&[
            ("ACME", 50.0, 50.0),
            ("SARL", 95.0, 50.0),
            ("Facture", 50.0, 200.0),
            ("N°", 130.0, 200.0),
            ("F-2024-17", 160.0, 200.0),
            ("Date", 50.0, 240.0),
            ("15/03/2024", 600.0, 240.0),
            ("Désignation", 50.0, 400.0),
            ("Qté", 400.0, 400.0),
            ("Prix", 500.0, 400.0),
            ("HT", 650.0, 400.0),
            ("Conseil", 50.0, 440.0),
            ("2", 400.0, 440.0),
            ("400,00", 500.0, 440.0),
            ("800,00", 650.0, 440.0),
            ("Formation", 50.0, 480.0),
            ("1", 400.0, 480.0),
            ("200,00", 500.0, 480.0),
            ("200,00", 650.0, 480.0),
            ("Total", 50.0, 900.0),
            ("HT", 110.0, 900.0),
            ("1000,00", 600.0, 900.0),
            ("TVA", 50.0, 940.0),
            ("200,00", 600.0, 940.0),
            ("Total", 50.0, 980.0),
            ("TTC", 110.0, 980.0),
            ("1200,00", 600.0, 980.0),
        ])
    }

    #[test]
    fn test_full_extraction() {
        let extraction = extractor().extract(&sample(), Strategy::RuleFirst, &FieldKey::ALL).unwrap();
        let record = &extraction.record;

        assert_eq!(record.supplier.name.as_deref(), Some("ACME SARL"));
        assert_eq!(record.invoice.number.as_deref(), Some("F-2024-17"));
        assert_eq!(record.invoice.date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(record.invoice.currency.as_deref(), Some("EUR"));
        assert_eq!(record.supplier.address.country.as_deref(), Some("France"));
        assert_eq!(record.customer.address.country, None);
        assert_eq!(record.totals.total_incl_vat, Some(Decimal::new(120000, 2)));
        assert_eq!(record.totals.amount_due, Some(Decimal::new(120000, 2)));
        assert_eq!(record.line_items.len(), 2);
        assert!(record.validation.is_none());

        let total = extraction
            .fields
            .iter()
            .find(|f| f.name == FieldKey::TotalInclVat)
            .unwrap();
        assert_eq!(total.strategy, StrategyKind::Rule);
        assert_eq!(total.source_tokens.len(), 1);
        // 0.95 match on a page of quality 0.9
        assert!((total.confidence - 0.95 * 0.95).abs() < 1e-6);

        let currency = extraction.fields.iter().find(|f| f.name == FieldKey::Currency).unwrap();
        assert_eq!(currency.confidence, 0.5);
        assert!(currency.source_tokens.is_empty());
    }

    #[test]
    fn test_no_tokens_fails() {
        let layout = LayoutAssembler::new(LayoutConfig::default()).assemble(Vec::new());
        let err = extractor().extract(&layout, Strategy::RuleFirst, &FieldKey::ALL).unwrap_err();
        assert!(matches!(err, PipelineError::NoExtractableContent));
    }

    #[test]
    fn test_schema_limits_fields() {
        let extraction = extractor()
            .extract(&sample(), Strategy::RuleFirst, &[FieldKey::InvoiceNumber])
            .unwrap();
        assert_eq!(extraction.fields.len(), 1);
        assert_eq!(extraction.record.invoice.currency, None);
        assert_eq!(extraction.record.totals.total_incl_vat, None);
    }

    #[test]
    fn test_fallback_only_for_unresolved_fields() {
        let config = InvexConfig::default();
        let model = Arc::new(Fixed {
            key: FieldKey::PaymentTerms,
            value: FieldValue::Text("30 jours".to_string()),
            confidence: 0.8,
            calls: AtomicUsize::new(0),
        });
        let extractor = InvoiceExtractor::with_matchers(
            config.extraction.clone(),
            config.layout.column_tolerance_ratio,
            Arc::new(RuleMatcher::new()),
            model.clone(),
        );

        let extraction = extractor
            .extract(&sample(), Strategy::RuleFirst, &[FieldKey::InvoiceNumber, FieldKey::PaymentTerms])
            .unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let terms = extraction.fields.iter().find(|f| f.name == FieldKey::PaymentTerms).unwrap();
        assert_eq!(terms.strategy, StrategyKind::Model);
        assert_eq!(extraction.record.invoice.payment_terms.as_deref(), Some("30 jours"));

        // Nothing left to resolve after the rules, so the model is never asked
        let extraction = extractor
            .extract(&sample(), Strategy::RuleFirst, &[FieldKey::InvoiceNumber])
            .unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(extraction.fields[0].strategy, StrategyKind::Rule);
    }

    #[test]
    fn test_model_first_keeps_stronger_rule_value() {
        let config = InvexConfig::default();
        let model = Arc::new(Fixed {
            key: FieldKey::InvoiceNumber,
            value: FieldValue::Text("WRONG-1".to_string()),
            confidence: 0.4,
            calls: AtomicUsize::new(0),
        });
        let extractor = InvoiceExtractor::with_matchers(
            config.extraction.clone(),
            config.layout.column_tolerance_ratio,
            Arc::new(RuleMatcher::new()),
            model,
        );

        let extraction = extractor
            .extract(&sample(), Strategy::ModelFirst, &[FieldKey::InvoiceNumber])
            .unwrap();
        assert_eq!(extraction.record.invoice.number.as_deref(), Some("F-2024-17"));
    }

    #[test]
    fn test_mistyped_candidate_ignored() {
        let config = InvexConfig::default();
        let model = Arc::new(Fixed {
            key: FieldKey::InvoiceDate,
            value: FieldValue::Text("yesterday".to_string()),
            confidence: 0.9,
            calls: AtomicUsize::new(0),
        });
        let extractor = InvoiceExtractor::with_matchers(
            config.extraction.clone(),
            config.layout.column_tolerance_ratio,
            model.clone(),
            model,
        );
        let extraction = extractor
            .extract(&sample(), Strategy::RuleFirst, &[FieldKey::InvoiceDate])
            .unwrap();
        assert!(extraction.fields.is_empty());
    }
}
