//! Rule strategy: labeled patterns and checksums over the document regions.

use regex::Regex;
use tracing::debug;

use crate::models::config::ExtractionConfig;
use crate::models::invoice::Anomaly;

use super::fields::{FieldKey, FieldValue, StrategyKind};
use super::rules::patterns::{
    COUNTRY, CUSTOMER_ID, CUSTOMER_MARKER, EMAIL, IDENTIFIER_LINE, INVOICE_NUMBER_LABELED,
    INVOICE_NUMBER_REFERENCE, INVOICE_NUMBER_STANDALONE, INVOICE_NUMBER_TITLE, LEGAL_SUFFIX,
    NON_NAME_LINE, PAYMENT_TERMS_LABELED, PAYMENT_TERMS_PHRASE, PHONE, PHONE_LABELED, POSTAL_CITY,
    STREET, STREET_NO_NUMBER, SUPPLIER_MARKER,
};
use super::rules::{
    extract_dates, extract_totals, lines_with_offsets, parse_date, AddressExtractor, CurrencyExtractor,
    ExtractionMatch, FieldExtractor, SiretExtractor, VatNumberExtractor,
};
use super::strategy::{ExtractionContext, FieldMatcher, Proposals, ResolvedFields, TextView};

const SUPPLIER_ADDRESS: [FieldKey; 4] = [
    FieldKey::SupplierStreet,
    FieldKey::SupplierPostalCode,
    FieldKey::SupplierCity,
    FieldKey::SupplierCountry,
];

const CUSTOMER_ADDRESS: [FieldKey; 4] = [
    FieldKey::CustomerStreet,
    FieldKey::CustomerPostalCode,
    FieldKey::CustomerCity,
    FieldKey::CustomerCountry,
];

/// Rule-based field strategy.
pub struct RuleMatcher {
    /// Whether to validate SIRET checksums.
    validate_siret: bool,
    /// Whether to validate French VAT keys.
    validate_vat_number: bool,
}

impl RuleMatcher {
    /// Create a rule matcher with validation on.
    pub fn new() -> Self {
        Self {
            validate_siret: true,
            validate_vat_number: true,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new()
            .with_siret_validation(config.validate_siret)
            .with_vat_validation(config.validate_vat_number)
    }

    /// Set whether to validate SIRET checksums.
    pub fn with_siret_validation(mut self, validate: bool) -> Self {
        self.validate_siret = validate;
        self
    }

    /// Set whether to validate French VAT keys.
    pub fn with_vat_validation(mut self, validate: bool) -> Self {
        self.validate_vat_number = validate;
        self
    }

    fn party_names(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        offer(out, ctx, &ctx.supplier, FieldKey::SupplierName, first_name(&ctx.supplier, &SUPPLIER_MARKER));
        if !ctx.customer.is_empty() {
            offer(out, ctx, &ctx.customer, FieldKey::CustomerName, first_name(&ctx.customer, &CUSTOMER_MARKER));
        }
    }

    fn addresses(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        let extractor = AddressExtractor::new();
        for (view, keys) in [(&ctx.supplier, SUPPLIER_ADDRESS), (&ctx.customer, CUSTOMER_ADDRESS)] {
            if view.is_empty() {
                continue;
            }
            let parts = extractor.extract(view.text());
            offer(out, ctx, view, keys[0], parts.street);
            offer(out, ctx, view, keys[1], parts.postal_code);
            offer(out, ctx, view, keys[2], parts.city);
            offer(out, ctx, view, keys[3], parts.country);
        }
    }

    fn registration(&self, ctx: &ExtractionContext<'_>, wanted: &[FieldKey], out: &mut Proposals) {
        if wanted.contains(&FieldKey::SupplierSiret) {
            let extractor = SiretExtractor::new().with_validation(self.validate_siret);
            let (view, found) = in_supplier_first(ctx, |text| extractor.extract(text));
            offer(out, ctx, view, FieldKey::SupplierSiret, found);

            for number in distinct(extractor.rejected(ctx.document.text())) {
                out.anomalies.push(Anomaly::new(
                    FieldKey::SupplierSiret.path(),
                    format!("SIRET {} fails the Luhn check", number),
                ));
            }
        }

        if wanted.contains(&FieldKey::SupplierVatNumber) {
            let extractor = VatNumberExtractor::new().with_validation(self.validate_vat_number);
            let (view, found) = in_supplier_first(ctx, |text| extractor.extract(text));
            offer(out, ctx, view, FieldKey::SupplierVatNumber, found);

            for number in distinct(extractor.rejected(ctx.document.text())) {
                out.anomalies.push(Anomaly::new(
                    FieldKey::SupplierVatNumber.path(),
                    format!("VAT number {} has an invalid key", number),
                ));
            }
        }
    }

    fn contact(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        // Contact details outside the customer block belong to the supplier
        let outside_customer = TextView::new(
            ctx.layout,
            (0..ctx.layout.blocks.len()).filter(|i| !ctx.regions.customer.contains(i)),
        );

        let phone = capture(&ctx.supplier, &PHONE_LABELED, 1, 0.9)
            .map(|m| (&ctx.supplier, m))
            .or_else(|| capture(&ctx.supplier, &PHONE, 0, 0.75).map(|m| (&ctx.supplier, m)))
            .or_else(|| capture(&outside_customer, &PHONE_LABELED, 1, 0.7).map(|m| (&outside_customer, m)));
        if let Some((view, found)) = phone {
            offer(out, ctx, view, FieldKey::SupplierPhone, Some(found));
        }

        let email = capture(&ctx.supplier, &EMAIL, 0, 0.9)
            .map(|m| (&ctx.supplier, m))
            .or_else(|| capture(&outside_customer, &EMAIL, 0, 0.75).map(|m| (&outside_customer, m)));
        if let Some((view, found)) = email {
            offer(out, ctx, view, FieldKey::SupplierEmail, Some(found));
        }
    }

    fn invoice_info(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        let document = &ctx.document;

        let customer_id = capture(document, &CUSTOMER_ID, 1, 0.9).filter(|m| m.value.chars().any(|c| c.is_ascii_digit()));
        offer(out, ctx, document, FieldKey::CustomerId, customer_id);

        offer(out, ctx, document, FieldKey::InvoiceNumber, invoice_number(document.text()));

        let dates = extract_dates(document.text());
        offer(out, ctx, document, FieldKey::InvoiceDate, dates.issue_date);
        offer(out, ctx, document, FieldKey::DueDate, dates.due_date);

        offer(out, ctx, document, FieldKey::Currency, CurrencyExtractor::new().extract(document.text()));

        let terms = capture(document, &PAYMENT_TERMS_LABELED, 1, 0.85)
            .or_else(|| capture(document, &PAYMENT_TERMS_PHRASE, 0, 0.7));
        offer(out, ctx, document, FieldKey::PaymentTerms, terms);
    }

    fn totals(&self, ctx: &ExtractionContext<'_>, out: &mut Proposals) {
        let view = if ctx.totals.is_empty() { &ctx.document } else { &ctx.totals };
        let totals = extract_totals(view.text());
        offer(out, ctx, view, FieldKey::SubtotalExclVat, totals.subtotal_excl_vat);
        offer(out, ctx, view, FieldKey::TotalVat, totals.total_vat);
        offer(out, ctx, view, FieldKey::TotalInclVat, totals.total_incl_vat);
        offer(out, ctx, view, FieldKey::AmountDue, totals.amount_due);
    }
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMatcher for RuleMatcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rule
    }

    fn resolve(&self, wanted: &[FieldKey], ctx: &ExtractionContext<'_>, _resolved: &ResolvedFields) -> Proposals {
        let mut out = Proposals::default();
        let wants = |keys: &[FieldKey]| keys.iter().any(|k| wanted.contains(k));

        if wants(&[FieldKey::SupplierName, FieldKey::CustomerName]) {
            self.party_names(ctx, &mut out);
        }
        if wants(&SUPPLIER_ADDRESS) || wants(&CUSTOMER_ADDRESS) {
            self.addresses(ctx, &mut out);
        }
        self.registration(ctx, wanted, &mut out);
        if wants(&[FieldKey::SupplierPhone, FieldKey::SupplierEmail]) {
            self.contact(ctx, &mut out);
        }
        if wants(&[
            FieldKey::CustomerId,
            FieldKey::InvoiceNumber,
            FieldKey::InvoiceDate,
            FieldKey::DueDate,
            FieldKey::Currency,
            FieldKey::PaymentTerms,
        ]) {
            self.invoice_info(ctx, &mut out);
        }
        if wants(&[
            FieldKey::SubtotalExclVat,
            FieldKey::TotalVat,
            FieldKey::TotalInclVat,
            FieldKey::AmountDue,
        ]) {
            self.totals(ctx, &mut out);
        }

        out.candidates.retain(|(key, _)| wanted.contains(key));
        debug!(
            "Rules proposed {} candidates, {} anomalies",
            out.candidates.len(),
            out.anomalies.len()
        );
        out
    }
}

fn offer<T: Into<FieldValue>>(
    out: &mut Proposals,
    ctx: &ExtractionContext<'_>,
    view: &TextView,
    key: FieldKey,
    found: Option<ExtractionMatch<T>>,
) {
    if let Some(found) = found {
        out.push(key, ctx.candidate(view, found));
    }
}

/// Search the supplier region, then the whole document.
fn in_supplier_first<'v, T>(
    ctx: &'v ExtractionContext<'_>,
    search: impl Fn(&str) -> Option<ExtractionMatch<T>>,
) -> (&'v TextView, Option<ExtractionMatch<T>>) {
    match search(ctx.supplier.text()) {
        Some(found) => (&ctx.supplier, Some(found)),
        None => (&ctx.document, search(ctx.document.text())),
    }
}

/// First match of `regex` in the view, reporting capture `group`.
fn capture(view: &TextView, regex: &Regex, group: usize, confidence: f32) -> Option<ExtractionMatch<String>> {
    for caps in regex.captures_iter(view.text()) {
        let Some(m) = caps.get(group) else {
            continue;
        };
        let value = m.as_str().trim();
        if value.is_empty() {
            continue;
        }
        let lead = m.as_str().len() - m.as_str().trim_start().len();
        let start = m.start() + lead;
        return Some(
            ExtractionMatch::new(value.to_string(), confidence, value).with_position(start, start + value.len()),
        );
    }
    None
}

fn invoice_number(text: &str) -> Option<ExtractionMatch<String>> {
    let patterns: [(&Regex, f32); 4] = [
        (&*INVOICE_NUMBER_LABELED, 0.95),
        (&*INVOICE_NUMBER_TITLE, 0.85),
        (&*INVOICE_NUMBER_REFERENCE, 0.75),
        (&*INVOICE_NUMBER_STANDALONE, 0.7),
    ];
    for (regex, confidence) in patterns {
        for caps in regex.captures_iter(text) {
            let Some(m) = caps.get(1) else {
                continue;
            };
            let value = m.as_str().trim_end_matches(['.', '-', '/', '_']);
            if !value.chars().any(|c| c.is_ascii_digit()) || parse_date(value).is_some() {
                continue;
            }
            return Some(
                ExtractionMatch::new(value.to_string(), confidence, value)
                    .with_position(m.start(), m.start() + value.len()),
            );
        }
    }
    None
}

/// First segment of the view that reads like a party name. A leading role
/// marker ("Facturé à :") is stripped first.
fn first_name(view: &TextView, marker: &Regex) -> Option<ExtractionMatch<String>> {
    for (line_start, line) in lines_with_offsets(view.text()) {
        let mut segment_start = line_start;
        for segment in line.split('\t') {
            let start = segment_start;
            segment_start += segment.len() + 1;

            let (offset, rest, labeled) = match marker.find(segment) {
                Some(m) => (m.end(), &segment[m.end()..], true),
                None => (0, segment, false),
            };
            let name = rest.trim();
            if !is_name_like(name) {
                continue;
            }
            let lead = rest.len() - rest.trim_start().len();
            let name_start = start + offset + lead;
            let confidence = if labeled || LEGAL_SUFFIX.is_match(name) { 0.9 } else { 0.75 };
            return Some(
                ExtractionMatch::new(name.to_string(), confidence, name)
                    .with_position(name_start, name_start + name.len()),
            );
        }
    }
    None
}

pub(crate) fn is_name_like(text: &str) -> bool {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    let only_country = COUNTRY
        .find(text)
        .is_some_and(|m| m.start() == 0 && m.end() == text.len());

    letters >= 2
        && digits * 3 < letters
        && !only_country
        && !text.contains("www.")
        && !NON_NAME_LINE.is_match(text)
        && !IDENTIFIER_LINE.is_match(text)
        && !CUSTOMER_ID.is_match(text)
        && !CUSTOMER_MARKER.is_match(text)
        && !EMAIL.is_match(text)
        && !POSTAL_CITY.is_match(text)
        && !STREET.is_match(text)
        && !STREET_NO_NUMBER.is_match(text)
}

fn distinct(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}
