//! Field keys, values and the extraction trace.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::document::TokenId;

/// An extractable invoice field, named by its dotted path in the output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKey {
    #[serde(rename = "supplier.name")]
    SupplierName,
    #[serde(rename = "supplier.address.street")]
    SupplierStreet,
    #[serde(rename = "supplier.address.city")]
    SupplierCity,
    #[serde(rename = "supplier.address.postal_code")]
    SupplierPostalCode,
    #[serde(rename = "supplier.address.country")]
    SupplierCountry,
    #[serde(rename = "supplier.siret")]
    SupplierSiret,
    #[serde(rename = "supplier.vat_number")]
    SupplierVatNumber,
    #[serde(rename = "supplier.contact.phone")]
    SupplierPhone,
    #[serde(rename = "supplier.contact.email")]
    SupplierEmail,
    #[serde(rename = "customer.name")]
    CustomerName,
    #[serde(rename = "customer.address.street")]
    CustomerStreet,
    #[serde(rename = "customer.address.city")]
    CustomerCity,
    #[serde(rename = "customer.address.postal_code")]
    CustomerPostalCode,
    #[serde(rename = "customer.address.country")]
    CustomerCountry,
    #[serde(rename = "customer.customer_id")]
    CustomerId,
    #[serde(rename = "invoice.number")]
    InvoiceNumber,
    #[serde(rename = "invoice.date")]
    InvoiceDate,
    #[serde(rename = "invoice.due_date")]
    DueDate,
    #[serde(rename = "invoice.currency")]
    Currency,
    #[serde(rename = "invoice.payment_terms")]
    PaymentTerms,
    #[serde(rename = "totals.subtotal_excl_vat")]
    SubtotalExclVat,
    #[serde(rename = "totals.total_vat")]
    TotalVat,
    #[serde(rename = "totals.total_incl_vat")]
    TotalInclVat,
    #[serde(rename = "totals.amount_due")]
    AmountDue,
}

/// The shape of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Date,
    Amount,
}

impl FieldKey {
    /// Every field, in output order.
    pub const ALL: [FieldKey; 24] = [
        FieldKey::SupplierName,
        FieldKey::SupplierStreet,
        FieldKey::SupplierCity,
        FieldKey::SupplierPostalCode,
        FieldKey::SupplierCountry,
        FieldKey::SupplierSiret,
        FieldKey::SupplierVatNumber,
        FieldKey::SupplierPhone,
        FieldKey::SupplierEmail,
        FieldKey::CustomerName,
        FieldKey::CustomerStreet,
        FieldKey::CustomerCity,
        FieldKey::CustomerPostalCode,
        FieldKey::CustomerCountry,
        FieldKey::CustomerId,
        FieldKey::InvoiceNumber,
        FieldKey::InvoiceDate,
        FieldKey::DueDate,
        FieldKey::Currency,
        FieldKey::PaymentTerms,
        FieldKey::SubtotalExclVat,
        FieldKey::TotalVat,
        FieldKey::TotalInclVat,
        FieldKey::AmountDue,
    ];

    /// Dotted output path, e.g. `totals.total_incl_vat`.
    pub fn path(&self) -> &'static str {
        match self {
            FieldKey::SupplierName => "supplier.name",
            FieldKey::SupplierStreet => "supplier.address.street",
            FieldKey::SupplierCity => "supplier.address.city",
            FieldKey::SupplierPostalCode => "supplier.address.postal_code",
            FieldKey::SupplierCountry => "supplier.address.country",
            FieldKey::SupplierSiret => "supplier.siret",
            FieldKey::SupplierVatNumber => "supplier.vat_number",
            FieldKey::SupplierPhone => "supplier.contact.phone",
            FieldKey::SupplierEmail => "supplier.contact.email",
            FieldKey::CustomerName => "customer.name",
            FieldKey::CustomerStreet => "customer.address.street",
            FieldKey::CustomerCity => "customer.address.city",
            FieldKey::CustomerPostalCode => "customer.address.postal_code",
            FieldKey::CustomerCountry => "customer.address.country",
            FieldKey::CustomerId => "customer.customer_id",
            FieldKey::InvoiceNumber => "invoice.number",
            FieldKey::InvoiceDate => "invoice.date",
            FieldKey::DueDate => "invoice.due_date",
            FieldKey::Currency => "invoice.currency",
            FieldKey::PaymentTerms => "invoice.payment_terms",
            FieldKey::SubtotalExclVat => "totals.subtotal_excl_vat",
            FieldKey::TotalVat => "totals.total_vat",
            FieldKey::TotalInclVat => "totals.total_incl_vat",
            FieldKey::AmountDue => "totals.amount_due",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            FieldKey::InvoiceDate | FieldKey::DueDate => ValueKind::Date,
            FieldKey::SubtotalExclVat
            | FieldKey::TotalVat
            | FieldKey::TotalInclVat
            | FieldKey::AmountDue => ValueKind::Amount,
            _ => ValueKind::Text,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for FieldKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKey::ALL
            .iter()
            .find(|k| k.path() == s)
            .copied()
            .ok_or_else(|| format!("unknown field: {}", s))
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Date(NaiveDate),
    Amount(Decimal),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_amount(&self) -> Option<Decimal> {
        match self {
            FieldValue::Amount(a) => Some(*a),
            _ => None,
        }
    }

    /// Whether the value has the shape a field expects.
    pub fn fits(&self, kind: ValueKind) -> bool {
        matches!(
            (self, kind),
            (FieldValue::Text(_), ValueKind::Text)
                | (FieldValue::Date(_), ValueKind::Date)
                | (FieldValue::Amount(_), ValueKind::Amount)
        )
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Amount(a) => write!(f, "{}", a),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(date: NaiveDate) -> Self {
        FieldValue::Date(date)
    }
}

impl From<Decimal> for FieldValue {
    fn from(amount: Decimal) -> Self {
        FieldValue::Amount(amount)
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

/// Which strategy produced a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Rule,
    Model,
    Remote,
}

/// A resolved field with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: FieldKey,
    pub value: FieldValue,
    /// Tokens the value was read from. Empty for defaults and derived values.
    pub source_tokens: Vec<TokenId>,
    pub confidence: f32,
    pub strategy: StrategyKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_paths_round_trip_through_from_str() {
        for key in FieldKey::ALL {
            assert_eq!(key.path().parse::<FieldKey>().unwrap(), key);
        }
        assert!("supplier.bank".parse::<FieldKey>().is_err());
    }

    #[test]
    fn test_serde_uses_dotted_paths() {
        let json = serde_json::to_string(&FieldKey::TotalInclVat).unwrap();
        assert_eq!(json, "\"totals.total_incl_vat\"");
        let key: FieldKey = serde_json::from_str("\"customer.customer_id\"").unwrap();
        assert_eq!(key, FieldKey::CustomerId);
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(FieldKey::DueDate.kind(), ValueKind::Date);
        assert_eq!(FieldKey::AmountDue.kind(), ValueKind::Amount);
        assert_eq!(FieldKey::SupplierSiret.kind(), ValueKind::Text);

        let amount = FieldValue::Amount(Decimal::new(120000, 2));
        assert!(amount.fits(ValueKind::Amount));
        assert!(!amount.fits(ValueKind::Text));
        assert_eq!(amount.to_string(), "1200.00");
    }

    #[test]
    fn test_extracted_field_json() {
        let field = ExtractedField {
            name: FieldKey::InvoiceDate,
            value: FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()),
            source_tokens: vec![TokenId::new(0, 4)],
            confidence: 0.9,
            strategy: StrategyKind::Rule,
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["name"], "invoice.date");
        assert_eq!(json["value"], "2024-03-15");
        assert_eq!(json["strategy"], "rule");
    }
}
