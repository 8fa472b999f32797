//! Remote strategy: an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::config::RemoteModelConfig;

use super::fields::{FieldKey, FieldValue, StrategyKind, ValueKind};
use super::rules::{parse_amount, parse_date};
use super::strategy::{Candidate, ExtractionContext, FieldMatcher, Proposals, ResolvedFields};

#[derive(Error, Debug)]
enum RemoteError {
    #[error("API key variable {0} is not set")]
    MissingKey(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {0}: {1}")]
    Status(u16, String),

    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Asks a hosted language model for the fields the local strategies could
/// not settle. Failures degrade to an empty proposal.
pub struct RemoteModelMatcher {
    config: RemoteModelConfig,
    client: Client,
}

impl RemoteModelMatcher {
    pub fn new(config: RemoteModelConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn request(&self, wanted: &[FieldKey], text: &str) -> Result<String, RemoteError> {
        let key = std::env::var(&self.config.api_key_env)
            .map_err(|_| RemoteError::MissingKey(self.config.api_key_env.clone()))?;

        let fields: Vec<String> = wanted
            .iter()
            .map(|k| format!("{} ({})", k.path(), kind_hint(k.kind())))
            .collect();
        let body = json!({
            "model": self.config.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": "You read OCR text of an invoice and return a JSON object. \
                                Use the field paths as keys. Omit fields you cannot find."
                },
                {
                    "role": "user",
                    "content": format!("Fields: {}\n\nInvoice text:\n{}", fields.join(", "), text)
                }
            ]
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RemoteError::Status(status.as_u16(), body));
        }

        let reply: Value = response.json()?;
        reply
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Malformed("no message content".to_string()))
    }
}

impl FieldMatcher for RemoteModelMatcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Remote
    }

    fn resolve(&self, wanted: &[FieldKey], ctx: &ExtractionContext<'_>, _resolved: &ResolvedFields) -> Proposals {
        let mut out = Proposals::default();
        if wanted.is_empty() || ctx.document.is_empty() {
            return out;
        }

        let content = match self.request(wanted, ctx.document.text()) {
            Ok(content) => content,
            Err(e) => {
                warn!("Remote field model unavailable: {}", e);
                return out;
            }
        };

        let values = match parse_reply(&content, wanted) {
            Ok(values) => values,
            Err(e) => {
                warn!("Remote field model: {}", e);
                return out;
            }
        };

        for (key, value, raw) in values {
            // Point back at the tokens when the model quoted the text verbatim
            let source_tokens = ctx
                .document
                .text()
                .find(raw.as_str())
                .map(|start| ctx.document.tokens_for(ctx.layout, start, start + raw.len()))
                .unwrap_or_default();
            out.push(
                key,
                Candidate {
                    value,
                    source_tokens,
                    confidence: self.config.confidence,
                },
            );
        }
        debug!("Remote model proposed {} candidates", out.candidates.len());
        out
    }
}

fn kind_hint(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Text => "text",
        ValueKind::Date => "date YYYY-MM-DD",
        ValueKind::Amount => "decimal number",
    }
}

/// Typed values from the reply object, with the raw string each came from.
fn parse_reply(content: &str, wanted: &[FieldKey]) -> Result<Vec<(FieldKey, FieldValue, String)>, RemoteError> {
    let object: Value = serde_json::from_str(content).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    let Some(map) = object.as_object() else {
        return Err(RemoteError::Malformed("reply is not an object".to_string()));
    };

    let mut values = Vec::new();
    for (name, raw) in map {
        let Ok(key) = name.parse::<FieldKey>() else {
            continue;
        };
        if !wanted.contains(&key) {
            continue;
        }
        let raw = match raw {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if raw.is_empty() {
            continue;
        }
        let value = match key.kind() {
            ValueKind::Text => Some(FieldValue::Text(raw.clone())),
            ValueKind::Date => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_date(&raw))
                .map(FieldValue::Date),
            ValueKind::Amount => parse_amount(&raw).map(FieldValue::Amount),
        };
        if let Some(value) = value {
            values.push((key, value, raw));
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn test_parse_reply_types_values() {
        let content = r#"{
            "invoice.date": "2024-03-15",
            "totals.total_incl_vat": "1 200,00",
            "supplier.name": "ACME SARL",
            "supplier.bank": "ignored",
            "invoice.number": ""
        }"#;
        let wanted = [
            FieldKey::InvoiceDate,
            FieldKey::TotalInclVat,
            FieldKey::SupplierName,
            FieldKey::InvoiceNumber,
        ];
        let mut values = parse_reply(content, &wanted).unwrap();
        values.sort_by_key(|(k, _, _)| *k);

        assert_eq!(values.len(), 3);
        assert_eq!(values[0].1, FieldValue::Text("ACME SARL".to_string()));
        assert_eq!(values[1].1, FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()));
        assert_eq!(values[2].1, FieldValue::Amount(Decimal::new(120000, 2)));
    }

    #[test]
    fn test_parse_reply_skips_unwanted_and_numbers() {
        let values = parse_reply(r#"{"totals.total_vat": 200.5, "supplier.name": "X"}"#, &[FieldKey::TotalVat]).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].1, FieldValue::Amount(Decimal::new(2005, 1)));
    }

    #[test]
    fn test_malformed_reply() {
        assert!(parse_reply("not json", &FieldKey::ALL).is_err());
        assert!(parse_reply("[1, 2]", &FieldKey::ALL).is_err());
    }
}
