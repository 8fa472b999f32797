//! Model strategy: a weighted keyword and position scorer.
//!
//! The scorer ignores the exact wording of labels and instead weighs the
//! words around every candidate value, so garbled OCR labels still count.

use std::collections::BTreeMap;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::config::{ExtractionConfig, ModelConfig};

use super::fields::{FieldKey, FieldValue, StrategyKind};
use super::rule_matcher::is_name_like;
use super::rules::patterns::{EMAIL, PAYMENT_TERMS_PHRASE, PHONE};
use super::rules::{
    find_amounts, lines_with_offsets, parse_date, AddressExtractor, CurrencyExtractor, DateExtractor,
    ExtractionMatch, FieldExtractor, SiretExtractor, VatNumberExtractor,
};
use super::strategy::{Candidate, ExtractionContext, FieldMatcher, Proposals, ResolvedFields, TextView};

lazy_static! {
    static ref NUMBER_LIKE: Regex =
        Regex::new(r"^(?:[A-Z]{1,5}[\-/_]?)?\d[\dA-Z\-/_]{2,18}$").unwrap();
}

/// Tunable weights of the field model. Loaded from a JSON file when
/// `models.field_model` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldModelWeights {
    /// Keyword weights per amount field, matched in the text preceding an amount.
    pub amount_keywords: BTreeMap<FieldKey, BTreeMap<String, f32>>,

    /// Base score of any amount.
    pub amount_prior: f32,

    /// Bonus for the largest amount when scoring `totals.total_incl_vat`.
    pub largest_amount_bonus: f32,

    /// Minimum score for an amount to be proposed.
    pub amount_threshold: f32,

    /// Company-form words that mark a party name.
    pub company_suffixes: Vec<String>,

    /// Upper bound on any confidence the model reports.
    pub max_confidence: f32,
}

impl Default for FieldModelWeights {
    fn default() -> Self {
        let keywords = |pairs: &[(&str, f32)]| -> BTreeMap<String, f32> {
            pairs.iter().map(|(k, w)| (k.to_string(), *w)).collect()
        };

        let mut amount_keywords = BTreeMap::new();
        amount_keywords.insert(
            FieldKey::SubtotalExclVat,
            keywords(&[("ht", 0.5), ("hors taxe", 0.6), ("sous-total", 0.6), ("subtotal", 0.6), ("net", 0.2)]),
        );
        amount_keywords.insert(
            FieldKey::TotalVat,
            keywords(&[("tva", 0.5), ("vat", 0.5), ("taxe", 0.3), ("mwst", 0.5)]),
        );
        amount_keywords.insert(
            FieldKey::TotalInclVat,
            keywords(&[("ttc", 0.6), ("total", 0.3), ("toutes taxes", 0.6), ("grand", 0.2)]),
        );
        amount_keywords.insert(
            FieldKey::AmountDue,
            keywords(&[("payer", 0.6), ("due", 0.5), ("solde", 0.4)]),
        );

        Self {
            amount_keywords,
            amount_prior: 0.1,
            largest_amount_bonus: 0.2,
            amount_threshold: 0.5,
            company_suffixes: ["sarl", "sas", "sasu", "sa", "eurl", "sàrl", "gmbh", "ag", "ltd", "inc", "llc"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_confidence: 0.85,
        }
    }
}

impl FieldModelWeights {
    /// Load weights from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }
}

/// Model-based field strategy.
pub struct ModelMatcher {
    weights: FieldModelWeights,
    validate_siret: bool,
    validate_vat_number: bool,
}

impl ModelMatcher {
    pub fn new(weights: FieldModelWeights) -> Self {
        Self {
            weights,
            validate_siret: true,
            validate_vat_number: true,
        }
    }

    /// Build the model from configuration. A weight file that cannot be read
    /// falls back to the built-in weights.
    pub fn load(models: &ModelConfig, extraction: &ExtractionConfig) -> Self {
        let weights = match &models.field_model {
            Some(path) => match FieldModelWeights::from_file(path) {
                Ok(weights) => {
                    debug!("Loaded field model weights from {:?}", path);
                    weights
                }
                Err(e) => {
                    warn!("Failed to load field model {:?}: {}, using built-in weights", path, e);
                    FieldModelWeights::default()
                }
            },
            None => FieldModelWeights::default(),
        };

        let mut matcher = Self::new(weights);
        matcher.validate_siret = extraction.validate_siret;
        matcher.validate_vat_number = extraction.validate_vat_number;
        matcher
    }

    pub fn weights(&self) -> &FieldModelWeights {
        &self.weights
    }

    fn cap(&self, confidence: f32) -> f32 {
        confidence.min(self.weights.max_confidence)
    }

    fn offer<T: Into<FieldValue>>(
        &self,
        out: &mut Proposals,
        ctx: &ExtractionContext<'_>,
        view: &TextView,
        key: FieldKey,
        found: Option<ExtractionMatch<T>>,
    ) {
        if let Some(mut found) = found {
            found.confidence = self.cap(found.confidence);
            out.push(key, ctx.candidate(view, found));
        }
    }

    /// Score every amount outside the item table against each totals field
    /// and keep the best amount per field.
    fn amounts(&self, ctx: &ExtractionContext<'_>, resolved: &ResolvedFields, out: &mut Proposals) {
        let view = TextView::new(
            ctx.layout,
            (0..ctx.layout.blocks.len()).filter(|&i| ctx.layout.blocks[i].table.is_none()),
        );

        let mut scored: Vec<(ExtractionMatch<Decimal>, FieldKey, f32)> = Vec::new();
        let mut largest: Option<Decimal> = None;

        for (line_start, line) in lines_with_offsets(view.text()) {
            for found in find_amounts(line) {
                let Some((start, _)) = found.position else {
                    continue;
                };
                let context = line[..start].to_lowercase();
                largest = Some(largest.map_or(found.value, |l| l.max(found.value)));

                let best = self
                    .weights
                    .amount_keywords
                    .iter()
                    .map(|(key, words)| {
                        let score = self.weights.amount_prior
                            + words
                                .iter()
                                .filter(|(word, _)| contains_word(&context, word))
                                .map(|(_, w)| *w)
                                .sum::<f32>();
                        (*key, score)
                    })
                    .max_by(|a, b| a.1.total_cmp(&b.1));

                if let Some((key, score)) = best {
                    scored.push((found.offset_by(line_start), key, score));
                }
            }
        }

        let mut picks: BTreeMap<FieldKey, (ExtractionMatch<Decimal>, f32)> = BTreeMap::new();
        for (found, key, mut score) in scored {
            if key == FieldKey::TotalInclVat && Some(found.value) == largest {
                score += self.weights.largest_amount_bonus;
            }
            if score < self.weights.amount_threshold {
                continue;
            }
            if picks.get(&key).is_none_or(|(_, s)| score > *s) {
                picks.insert(key, (found, score));
            }
        }

        let mut known: BTreeMap<FieldKey, Decimal> = resolved
            .iter()
            .filter_map(|(k, f)| f.value.as_amount().map(|a| (*k, a)))
            .collect();
        for (key, (mut found, score)) in picks {
            found.confidence = score;
            known.entry(key).or_insert(found.value);
            self.offer(out, ctx, &view, key, Some(found));
        }

        self.infer_totals(&known, out);
    }

    /// Complete the HT / TVA / TTC triple from the other two.
    fn infer_totals(&self, known: &BTreeMap<FieldKey, Decimal>, out: &mut Proposals) {
        let ht = known.get(&FieldKey::SubtotalExclVat).copied();
        let vat = known.get(&FieldKey::TotalVat).copied();
        let ttc = known.get(&FieldKey::TotalInclVat).copied();

        // Out-of-range results are left for the validator to flag
        let inferred = match (ht, vat, ttc) {
            (Some(ht), Some(vat), None) => ht.checked_add(vat).map(|v| (FieldKey::TotalInclVat, v)),
            (None, Some(vat), Some(ttc)) => ttc.checked_sub(vat).map(|v| (FieldKey::SubtotalExclVat, v)),
            (Some(ht), None, Some(ttc)) if ttc >= ht => ttc.checked_sub(ht).map(|v| (FieldKey::TotalVat, v)),
            _ => None,
        };

        if let Some((key, value)) = inferred {
            debug!("Inferred {} = {}", key, value);
            out.push(
                key,
                Candidate {
                    value: FieldValue::Amount(value),
                    source_tokens: Vec::new(),
                    confidence: self.cap(0.7),
                },
            );
        }
    }

    /// Earliest date is the issue date, the latest later one the due date.
    fn dates(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        let view = &ctx.document;
        let mut dates = DateExtractor::new().extract_all(view.text());
        dates.sort_by_key(|d| d.value);

        let earliest = dates.first().cloned();
        let latest = dates
            .last()
            .filter(|last| earliest.as_ref().is_some_and(|e| last.value > e.value))
            .cloned();

        self.offer(out, ctx, view, FieldKey::InvoiceDate, earliest.map(|mut d| {
            d.confidence = 0.65;
            d
        }));
        self.offer(out, ctx, view, FieldKey::DueDate, latest.map(|mut d| {
            d.confidence = 0.6;
            d
        }));
    }

    /// The most company-like block of a region.
    fn party_name(&self, ctx: &ExtractionContext<'_>, region: &[usize]) -> Option<(usize, f32)> {
        region
            .iter()
            .enumerate()
            .filter_map(|(rank, &idx)| {
                let text = ctx.layout.blocks[idx].text.trim();
                if !is_name_like(text) {
                    return None;
                }
                let lower = text.to_lowercase();
                let mut score = 0.45 + 0.1 / (1.0 + rank as f32);
                if self.weights.company_suffixes.iter().any(|s| contains_word(&lower, s)) {
                    score += 0.3;
                }
                if text.chars().any(|c| c.is_alphabetic()) && !text.chars().any(|c| c.is_lowercase()) {
                    score += 0.1;
                }
                Some((idx, score))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    fn names(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        let regions = [
            (FieldKey::SupplierName, &ctx.regions.supplier),
            (FieldKey::CustomerName, &ctx.regions.customer),
        ];
        for (key, region) in regions {
            if let Some((idx, score)) = self.party_name(ctx, region) {
                let block = &ctx.layout.blocks[idx];
                out.push(
                    key,
                    Candidate {
                        value: FieldValue::Text(block.text.trim().to_string()),
                        source_tokens: block.tokens.clone(),
                        confidence: self.cap(score),
                    },
                );
            }
        }
    }

    fn invoice_number(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        let found = ctx
            .layout
            .blocks
            .iter()
            .filter(|b| b.table.is_none())
            .flat_map(|b| b.tokens.iter())
            .filter_map(|id| ctx.layout.token(*id).map(|t| (*id, t)))
            .find(|(_, t)| {
                let text = t.text.trim_end_matches(['.', ',', ':']);
                NUMBER_LIKE.is_match(text)
                    && text.chars().any(|c| c.is_ascii_alphabetic() || c == '-' || c == '/')
                    && parse_date(text).is_none()
            });

        if let Some((id, token)) = found {
            out.push(
                FieldKey::InvoiceNumber,
                Candidate {
                    value: FieldValue::Text(token.text.trim_end_matches(['.', ',', ':']).to_string()),
                    source_tokens: vec![id],
                    confidence: self.cap(0.65),
                },
            );
        }
    }

    fn identifiers(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        let view = &ctx.document;
        let text = view.text();

        let siret = SiretExtractor::new().with_validation(self.validate_siret).extract(text);
        self.offer(out, ctx, view, FieldKey::SupplierSiret, siret.map(|m| with_confidence(m, 0.65)));

        let vat = VatNumberExtractor::new().with_validation(self.validate_vat_number).extract(text);
        self.offer(out, ctx, view, FieldKey::SupplierVatNumber, vat.map(|m| with_confidence(m, 0.65)));

        let email = EMAIL
            .find(text)
            .map(|m| ExtractionMatch::new(m.as_str().to_string(), 0.6, m.as_str()).with_position(m.start(), m.end()));
        self.offer(out, ctx, view, FieldKey::SupplierEmail, email);

        let phone = PHONE
            .find(text)
            .map(|m| ExtractionMatch::new(m.as_str().to_string(), 0.6, m.as_str()).with_position(m.start(), m.end()));
        self.offer(out, ctx, view, FieldKey::SupplierPhone, phone);

        let currency = CurrencyExtractor::new().with_words(true).extract(text);
        self.offer(out, ctx, view, FieldKey::Currency, currency.map(|m| with_confidence(m, 0.7)));

        let terms = PAYMENT_TERMS_PHRASE.find(text).and_then(|m| {
            let value = m.as_str().trim();
            let start = m.start() + (m.as_str().len() - m.as_str().trim_start().len());
            (!value.is_empty())
                .then(|| ExtractionMatch::new(value.to_string(), 0.6, value).with_position(start, start + value.len()))
        });
        self.offer(out, ctx, view, FieldKey::PaymentTerms, terms);
    }

    fn addresses(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        let extractor = AddressExtractor::new();
        let regions = [
            (
                &ctx.supplier,
                [FieldKey::SupplierStreet, FieldKey::SupplierPostalCode, FieldKey::SupplierCity, FieldKey::SupplierCountry],
            ),
            (
                &ctx.customer,
                [FieldKey::CustomerStreet, FieldKey::CustomerPostalCode, FieldKey::CustomerCity, FieldKey::CustomerCountry],
            ),
        ];
        for (view, keys) in regions {
            let parts = extractor.extract(view.text());
            let found = [parts.street, parts.postal_code, parts.city, parts.country];
            for (key, part) in keys.into_iter().zip(found) {
                self.offer(out, ctx, view, key, part.map(|m| with_confidence(m, 0.55)));
            }
        }
    }
}

impl Default for ModelMatcher {
    fn default() -> Self {
        Self::new(FieldModelWeights::default())
    }
}

impl FieldMatcher for ModelMatcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Model
    }

    fn resolve(&self, wanted: &[FieldKey], ctx: &ExtractionContext<'_>, resolved: &ResolvedFields) -> Proposals {
        let mut out = Proposals::default();

        self.amounts(ctx, resolved, &mut out);
        self.dates(ctx, &mut out);
        self.names(ctx, &mut out);
        self.invoice_number(ctx, &mut out);
        self.identifiers(ctx, &mut out);
        self.addresses(ctx, &mut out);

        out.candidates.retain(|(key, _)| wanted.contains(key));
        debug!("Model proposed {} candidates", out.candidates.len());
        out
    }
}

fn with_confidence<T>(mut found: ExtractionMatch<T>, confidence: f32) -> ExtractionMatch<T> {
    found.confidence = confidence;
    found
}

/// Whether `word` occurs in `text` on word boundaries.
fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
