//! Invoice record and output schema.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::invoice::fields::ExtractedField;
use crate::models::config::Strategy;
use crate::models::document::TokenId;

/// Postal address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Address {
    /// Check if address has no data.
    pub fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.city.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }

    /// Format address as a single line.
    pub fn format(&self) -> String {
        let mut parts = Vec::new();
        if let Some(street) = &self.street {
            parts.push(street.clone());
        }
        match (&self.postal_code, &self.city) {
            (Some(code), Some(city)) => parts.push(format!("{} {}", code, city)),
            (Some(code), None) => parts.push(code.clone()),
            (None, Some(city)) => parts.push(city.clone()),
            (None, None) => {}
        }
        if let Some(country) = &self.country {
            parts.push(country.clone());
        }
        parts.join(", ")
    }
}

/// Supplier contact details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The party issuing the invoice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub address: Address,

    /// French company registration number (SIREN or SIRET).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub siret: Option<String>,

    /// Intra-community VAT number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_number: Option<String>,

    pub contact: Contact,
}

/// The party being invoiced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub address: Address,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

/// Invoice identification and payment metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,

    /// Issue date (YYYY-MM-DD).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,

    /// ISO 4217 currency code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_terms: Option<String>,
}

/// A single line item on the invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,

    pub quantity: Decimal,

    pub unit_price: Decimal,

    /// Rate as a fraction (0.20 for 20%).
    pub vat_rate: Decimal,

    pub amount_excl_vat: Decimal,

    pub vat_amount: Decimal,

    pub amount_incl_vat: Decimal,

    /// Columns computed from the others rather than read from the row.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived: Vec<String>,

    /// Row confidence in [0, 1].
    #[serde(skip)]
    pub confidence: f32,

    /// Tokens the row was read from.
    #[serde(skip)]
    pub source_tokens: Vec<TokenId>,
}

/// Invoice totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal_excl_vat: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_vat: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_incl_vat: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_due: Option<Decimal>,
}

/// A recorded discrepancy that did not abort processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Dotted path of the field concerned, e.g. `totals.total_incl_vat`.
    pub field: String,
    pub issue: String,
}

impl Anomaly {
    pub fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

/// Outcome of the consistency checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Line items reconcile with `totals.total_incl_vat`.
    pub calculation_check: bool,
    pub required_fields_present: bool,
    /// Weighted field confidence, penalized by anomalies. In [0, 1].
    pub data_quality_score: f32,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
}

/// Structured invoice data extracted from a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub supplier: Supplier,
    pub customer: Customer,
    pub invoice: InvoiceInfo,
    /// Document order.
    pub line_items: Vec<LineItem>,
    pub totals: Totals,
    pub validation: Option<ValidationReport>,
}

/// Processing metadata attached to the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Time processing started (ISO-8601).
    pub processing_date: DateTime<Utc>,

    /// Overall confidence in [0, 1].
    pub confidence_score: f32,

    /// Wall-clock processing time in seconds.
    pub processing_time: f64,

    pub page_count: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub low_confidence_pages: Vec<usize>,

    pub ocr_backend: String,

    pub strategy: Strategy,

    /// Stage anomalies when validation was disabled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Final, schema-conformant pipeline output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedInvoice {
    pub metadata: ProcessingMetadata,

    #[serde(flatten)]
    pub record: InvoiceRecord,

    /// Extraction trace, present when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<ExtractedField>>,
}
