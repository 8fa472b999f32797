//! Output formats for processed invoices.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde_json::Value;

use invex_core::ProcessedInvoice;

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output, one row per line item
    Csv,
    /// Plain text summary
    Text,
    /// XML output
    Xml,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
            OutputFormat::Xml => "xml",
        }
    }
}

pub fn format_invoice(invoice: &ProcessedInvoice, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(invoice)?),
        OutputFormat::Csv => format_csv(invoice),
        OutputFormat::Text => Ok(format_text(invoice)),
        OutputFormat::Xml => format_xml(invoice),
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn format_csv(invoice: &ProcessedInvoice) -> anyhow::Result<String> {
    let record = &invoice.record;
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "invoice_number",
        "invoice_date",
        "supplier_name",
        "supplier_siret",
        "customer_name",
        "description",
        "quantity",
        "unit_price",
        "vat_rate",
        "amount_excl_vat",
        "vat_amount",
        "amount_incl_vat",
        "total_incl_vat",
        "currency",
    ])?;

    let head = [
        opt(&record.invoice.number),
        opt(&record.invoice.date),
        opt(&record.supplier.name),
        opt(&record.supplier.siret),
        opt(&record.customer.name),
    ];
    let tail = [opt(&record.totals.total_incl_vat), opt(&record.invoice.currency)];

    if record.line_items.is_empty() {
        let row: Vec<String> = head
            .iter()
            .cloned()
            .chain(std::iter::repeat_n(String::new(), 7))
            .chain(tail.iter().cloned())
            .collect();
        wtr.write_record(&row)?;
    }
    for item in &record.line_items {
        let cells = [
            item.description.clone(),
            item.quantity.to_string(),
            item.unit_price.to_string(),
            item.vat_rate.to_string(),
            item.amount_excl_vat.to_string(),
            item.vat_amount.to_string(),
            item.amount_incl_vat.to_string(),
        ];
        let row: Vec<String> = head
            .iter()
            .chain(cells.iter())
            .chain(tail.iter())
            .cloned()
            .collect();
        wtr.write_record(&row)?;
    }

    Ok(String::from_utf8(wtr.into_inner()?)?)
}

fn format_text(invoice: &ProcessedInvoice) -> String {
    let record = &invoice.record;
    let currency = record.invoice.currency.as_deref().unwrap_or("");
    let mut output = String::new();

    output.push_str(&format!("Invoice: {}\n", opt(&record.invoice.number)));
    output.push_str(&format!("Date: {}\n", opt(&record.invoice.date)));
    if let Some(due) = record.invoice.due_date {
        output.push_str(&format!("Due: {}\n", due));
    }
    output.push('\n');

    output.push_str("Supplier:\n");
    output.push_str(&format!("  {}\n", opt(&record.supplier.name)));
    if let Some(siret) = &record.supplier.siret {
        output.push_str(&format!("  SIRET: {}\n", siret));
    }
    if let Some(vat) = &record.supplier.vat_number {
        output.push_str(&format!("  VAT: {}\n", vat));
    }
    if !record.supplier.address.is_empty() {
        output.push_str(&format!("  {}\n", record.supplier.address.format()));
    }
    output.push('\n');

    output.push_str("Customer:\n");
    output.push_str(&format!("  {}\n", opt(&record.customer.name)));
    if !record.customer.address.is_empty() {
        output.push_str(&format!("  {}\n", record.customer.address.format()));
    }
    output.push('\n');

    if !record.line_items.is_empty() {
        output.push_str("Line items:\n");
        for item in &record.line_items {
            output.push_str(&format!(
                "  {:<30} {:>6} x {:>10} = {:>10} {}\n",
                item.description, item.quantity, item.unit_price, item.amount_incl_vat, currency
            ));
        }
        output.push('\n');
    }

    output.push_str("Totals:\n");
    output.push_str(&format!("  Excl. VAT: {} {}\n", opt(&record.totals.subtotal_excl_vat), currency));
    output.push_str(&format!("  VAT:       {} {}\n", opt(&record.totals.total_vat), currency));
    output.push_str(&format!("  Incl. VAT: {} {}\n", opt(&record.totals.total_incl_vat), currency));

    if let Some(report) = &record.validation {
        output.push('\n');
        output.push_str(&format!(
            "Validation: calculation {}, required fields {}, quality {:.2}\n",
            if report.calculation_check { "ok" } else { "FAILED" },
            if report.required_fields_present { "present" } else { "MISSING" },
            report.data_quality_score
        ));
        for anomaly in &report.anomalies {
            output.push_str(&format!("  - {}: {}\n", anomaly.field, anomaly.issue));
        }
    }

    output
}

fn format_xml(invoice: &ProcessedInvoice) -> anyhow::Result<String> {
    let value = serde_json::to_value(invoice)?;
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_element(&mut writer, "invoice", &value)?;
    Ok(String::from_utf8(writer.into_inner())?)
}

fn write_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> anyhow::Result<()> {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            for (key, child) in map {
                write_element(writer, key, child)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        Value::Array(items) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            for child in items {
                write_element(writer, "item", child)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        Value::String(s) => write_text(writer, name, s)?,
        other => write_text(writer, name, &other.to_string())?,
    }
    Ok(())
}

fn write_text(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> anyhow::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use invex_core::{LineItem, ProcessingMetadata, Strategy};

    fn sample() -> ProcessedInvoice {
        let json = r#"{
            "metadata": {
                "filename": "facture.pdf",
                "processing_date": "2024-03-15T10:00:00Z",
                "confidence_score": 0.9,
                "processing_time": 1.25,
                "page_count": 1,
                "ocr_backend": "pure-onnx",
                "strategy": "rule_first"
            },
            "supplier": {
                "name": "ACME & Fils SARL",
                "address": {"city": "Lyon", "postal_code": "69002"},
                "siret": "73282932000074",
                "contact": {}
            },
            "customer": {"name": "Dupont SA", "address": {}},
            "invoice": {"number": "FAC-2024-001", "date": "2024-03-15", "currency": "EUR"},
            "line_items": [],
            "totals": {"total_incl_vat": "1200.00"},
            "validation": null
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_csv_without_items_has_one_row() {
        let csv = format_invoice(&sample(), OutputFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("invoice_number,invoice_date"));
        assert!(lines[1].starts_with("FAC-2024-001,2024-03-15,ACME & Fils SARL,73282932000074"));
        assert!(lines[1].ends_with("1200.00,EUR"));
    }

    #[test]
    fn test_csv_row_per_item() {
        let mut invoice = sample();
        let item: LineItem = serde_json::from_str(
            r#"{"description": "Conseil", "quantity": "2", "unit_price": "500.00",
                "vat_rate": "0.20", "amount_excl_vat": "1000.00", "vat_amount": "200.00",
                "amount_incl_vat": "1200.00"}"#,
        )
        .unwrap();
        invoice.record.line_items = vec![item.clone(), item];

        let csv = format_invoice(&invoice, OutputFormat::Csv).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.contains("Conseil,2,500.00,0.20,1000.00,200.00,1200.00"));
    }

    #[test]
    fn test_xml_escapes_and_skips_nulls() {
        let xml = format_invoice(&sample(), OutputFormat::Xml).unwrap();
        assert!(xml.starts_with("<invoice>"));
        assert!(xml.contains("<name>ACME &amp; Fils SARL</name>"));
        assert!(xml.contains("<total_incl_vat>1200.00</total_incl_vat>"));
        assert!(xml.contains("<postal_code>69002</postal_code>"));
        assert!(!xml.contains("<validation>"));
    }

    #[test]
    fn test_text_summary() {
        let text = format_invoice(&sample(), OutputFormat::Text).unwrap();
        assert!(text.contains("Invoice: FAC-2024-001"));
        assert!(text.contains("SIRET: 73282932000074"));
        assert!(text.contains("  69002 Lyon\n"));
        assert!(text.contains("Incl. VAT: 1200.00 EUR"));
        assert!(!text.contains("Validation:"));
    }

    #[test]
    fn test_metadata_round_trips_through_json() {
        let invoice = sample();
        let json = format_invoice(&invoice, OutputFormat::Json).unwrap();
        let back: ProcessedInvoice = serde_json::from_str(&json).unwrap();
        let ProcessingMetadata { strategy, .. } = back.metadata;
        assert_eq!(strategy, Strategy::RuleFirst);
    }
}
