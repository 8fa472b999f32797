//! Line items from table-row blocks.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::debug;

use crate::layout::{Block, Cell};
use crate::models::invoice::{Anomaly, LineItem};

use super::rules::{parse_amount, parse_rate};
use super::strategy::ExtractionContext;

/// What a table column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Description,
    Quantity,
    UnitPrice,
    VatRate,
    VatAmount,
    Excl,
    Incl,
}

impl Column {
    /// Classify a header cell. More specific titles are tried first so that
    /// "Prix unitaire HT" is a price and "Montant TTC" an inclusive amount.
    fn classify(title: &str) -> Option<Column> {
        let lower = title.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '.' && c != '%')
            .map(|w| w.trim_end_matches('.'))
            .filter(|w| !w.is_empty())
            .collect();
        let has = |options: &[&str]| words.iter().any(|w| options.contains(w));

        if has(&["description", "désignation", "designation", "libellé", "libelle", "article", "produit", "prestation"]) {
            Some(Column::Description)
        } else if has(&["qty", "qté", "qte", "quantité", "quantite", "quantity"]) {
            Some(Column::Quantity)
        } else if has(&["ttc", "incl"]) {
            Some(Column::Incl)
        } else if lower.contains('%') || has(&["taux", "rate"]) {
            Some(Column::VatRate)
        } else if has(&["prix", "price", "unit", "unitaire", "p.u", "pu"]) {
            Some(Column::UnitPrice)
        } else if has(&["tva", "vat"]) {
            Some(Column::VatAmount)
        } else if has(&["ht", "montant", "amount", "total"]) {
            Some(Column::Excl)
        } else {
            None
        }
    }

    fn name(self) -> &'static str {
        match self {
            Column::Description => "description",
            Column::Quantity => "quantity",
            Column::UnitPrice => "unit_price",
            Column::VatRate => "vat_rate",
            Column::VatAmount => "vat_amount",
            Column::Excl => "amount_excl_vat",
            Column::Incl => "amount_incl_vat",
        }
    }
}

/// Parsed items plus the rows that could not be read.
#[derive(Debug, Clone, Default)]
pub struct ParsedItems {
    pub items: Vec<LineItem>,
    pub anomalies: Vec<Anomaly>,
}

/// Values read from one row, before derivation.
#[derive(Debug, Default)]
struct RowValues {
    description: Vec<String>,
    values: BTreeMap<&'static str, Decimal>,
}

impl RowValues {
    fn set(&mut self, column: Column, value: Decimal) {
        self.values.entry(column.name()).or_insert(value);
    }

    fn get(&self, column: Column) -> Option<Decimal> {
        self.values.get(column.name()).copied()
    }
}

/// Why a table row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowError {
    NoAmount,
    Overflow,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowError::NoAmount => write!(f, "no parsable amount"),
            RowError::Overflow => write!(f, "amounts out of range"),
        }
    }
}

/// Turns table-row candidate blocks into line items.
pub struct LineItemParser {
    default_vat_rate: Decimal,
}

impl LineItemParser {
    pub fn new(default_vat_rate: Decimal) -> Self {
        Self { default_vat_rate }
    }

    /// Parse every table in the layout. Rows are numbered from 1 across the
    /// document in reading order.
    pub fn parse(&self, ctx: &ExtractionContext<'_>) -> ParsedItems {
        let mut tables: BTreeMap<usize, Vec<&Block>> = BTreeMap::new();
        for block in ctx.layout.table_blocks() {
            if let Some(id) = block.table {
                tables.entry(id).or_default().push(block);
            }
        }

        let mut parsed = ParsedItems::default();
        let mut row_number = 0;
        for blocks in tables.values() {
            let columns: Vec<(Option<Column>, f32)> = blocks
                .iter()
                .find(|b| b.table_header)
                .map(|header| {
                    header
                        .cells
                        .iter()
                        .map(|c| (Column::classify(&c.text), c.bbox.center_x()))
                        .collect()
                })
                .unwrap_or_default();

            for block in blocks.iter().filter(|b| !b.table_header) {
                row_number += 1;
                let row = if columns.is_empty() {
                    read_positional(&block.cells)
                } else {
                    read_by_header(&block.cells, &columns)
                };

                match self.complete(row) {
                    Ok(mut item) => {
                        let quality = ctx.quality_for(&block.tokens);
                        let weight = ctx.config.quality_weight;
                        item.confidence = ctx.token_confidence(&block.tokens) * (1.0 - weight * (1.0 - quality));
                        item.source_tokens = block.tokens.clone();
                        parsed.items.push(item);
                    }
                    Err(reason) => {
                        debug!("Dropping table row {}: {}", row_number, reason);
                        parsed.anomalies.push(Anomaly::new(
                            format!("line_items[row {}]", row_number),
                            format!("{} in \"{}\"", reason, block.text),
                        ));
                    }
                }
            }
        }

        debug!("Parsed {} line items", parsed.items.len());
        parsed
    }

    /// Fill the missing columns from the ones read. Read values are never
    /// overwritten.
    fn complete(&self, row: RowValues) -> Result<LineItem, RowError> {
        let mut derived = Vec::new();

        let rate = match row.get(Column::VatRate) {
            Some(rate) => rate,
            None => {
                derived.push(Column::VatRate.name().to_string());
                self.default_vat_rate
            }
        };
        let rate_factor = Decimal::ONE.checked_add(rate).ok_or(RowError::Overflow)?;

        let quantity_read = row.get(Column::Quantity);
        let price_read = row.get(Column::UnitPrice);
        let incl_read = row.get(Column::Incl);

        let excl = match row.get(Column::Excl) {
            Some(excl) => excl,
            None => {
                let from_parts = match quantity_read.zip(price_read) {
                    Some((q, p)) => Some(q.checked_mul(p).ok_or(RowError::Overflow)?.round_dp(2)),
                    None => None,
                };
                let from_incl = match incl_read {
                    Some(incl) => incl.checked_div(rate_factor).map(|v| v.round_dp(2)),
                    None => None,
                };
                let excl = from_parts.or(from_incl).ok_or(RowError::NoAmount)?;
                derived.push(Column::Excl.name().to_string());
                excl
            }
        };

        let quantity = match quantity_read {
            Some(q) => q,
            None => {
                derived.push(Column::Quantity.name().to_string());
                match price_read {
                    Some(price) if !price.is_zero() => excl
                        .checked_div(price)
                        .ok_or(RowError::Overflow)?
                        .round_dp(3)
                        .normalize(),
                    _ => Decimal::ONE,
                }
            }
        };

        let unit_price = match price_read {
            Some(p) => p,
            None => {
                derived.push(Column::UnitPrice.name().to_string());
                if quantity.is_zero() {
                    excl
                } else {
                    excl.checked_div(quantity).ok_or(RowError::Overflow)?.round_dp(2)
                }
            }
        };

        let vat_amount = match row.get(Column::VatAmount) {
            Some(v) => v,
            None => {
                derived.push(Column::VatAmount.name().to_string());
                match incl_read {
                    Some(incl) => incl.checked_sub(excl),
                    None => excl.checked_mul(rate).map(|v| v.round_dp(2)),
                }
                .ok_or(RowError::Overflow)?
            }
        };

        let amount_incl_vat = match incl_read {
            Some(incl) => incl,
            None => {
                derived.push(Column::Incl.name().to_string());
                excl.checked_add(vat_amount).ok_or(RowError::Overflow)?
            }
        };

        Ok(LineItem {
            description: row.description.join(" "),
            quantity,
            unit_price,
            vat_rate: rate,
            amount_excl_vat: excl,
            vat_amount,
            amount_incl_vat,
            derived,
            confidence: 0.0,
            source_tokens: Vec::new(),
        })
    }
}

/// Map cells onto the header column with the nearest center.
fn read_by_header(cells: &[Cell], columns: &[(Option<Column>, f32)]) -> RowValues {
    let mut row = RowValues::default();
    for cell in cells {
        let center = cell.bbox.center_x();
        let column = columns
            .iter()
            .min_by(|a, b| (a.1 - center).abs().total_cmp(&(b.1 - center).abs()))
            .and_then(|(c, _)| *c);

        if let Some(rate) = percent_value(&cell.text) {
            row.set(Column::VatRate, rate);
            continue;
        }
        match (column, numeric_value(&cell.text)) {
            (Some(Column::Description) | None, _) | (_, None) => row.description.push(cell.text.clone()),
            (Some(column), Some(value)) => row.set(column, value),
        }
    }
    row
}

/// Map the numbers of a header-less row by how many there are.
fn read_positional(cells: &[Cell]) -> RowValues {
    let mut row = RowValues::default();
    let mut numbers = Vec::new();
    for cell in cells {
        if let Some(rate) = percent_value(&cell.text) {
            row.set(Column::VatRate, rate);
        } else if let Some(value) = numeric_value(&cell.text) {
            numbers.push(value);
        } else {
            row.description.push(cell.text.clone());
        }
    }

    use Column::*;
    let layout: &[Column] = match numbers.len() {
        0 => &[],
        1 => &[Excl],
        2 => &[Quantity, Excl],
        3 => &[Quantity, UnitPrice, Excl],
        4 => &[Quantity, UnitPrice, Excl, Incl],
        _ => &[Quantity, UnitPrice],
    };
    for (column, value) in layout.iter().zip(&numbers) {
        row.set(*column, *value);
    }
    if numbers.len() >= 5 {
        let n = numbers.len();
        row.set(Excl, numbers[n - 3]);
        row.set(VatAmount, numbers[n - 2]);
        row.set(Incl, numbers[n - 1]);
    }
    row
}

fn percent_value(text: &str) -> Option<Decimal> {
    if text.contains('%') { parse_rate(text) } else { None }
}

/// A cell that holds only a number, possibly with a currency mark.
fn numeric_value(text: &str) -> Option<Decimal> {
    let stripped = ["€", "EUR", "CHF", "$", "£"]
        .iter()
        .fold(text.to_string(), |acc, mark| acc.replace(mark, ""));
    let stripped = stripped.trim();
    if stripped.is_empty() || stripped.chars().any(|c| c.is_alphabetic()) {
        return None;
    }
    parse_amount(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::strategy::tests::layout_of;
    use crate::models::config::ExtractionConfig;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn parse(words: &[(&str, f32, f32)]) -> ParsedItems {
        let layout = layout_of(words);
        let config = ExtractionConfig::default();
        let ctx = ExtractionContext::new(&layout, &config, 0.05);
        LineItemParser::new(config.default_vat_rate).parse(&ctx)
    }

    #[test]
    fn test_header_columns_and_derivation() {
        let parsed = parse(&[
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
            ("300,00", 500.0, 480.0),
            ("300,00", 650.0, 480.0),
        ]);

        assert!(parsed.anomalies.is_empty());
        assert_eq!(parsed.items.len(), 2);

        let item = &parsed.items[0];
        assert_eq!(item.description, "Conseil");
        assert_eq!(item.quantity, dec("2"));
        assert_eq!(item.unit_price, dec("400.00"));
        assert_eq!(item.amount_excl_vat, dec("800.00"));
        assert_eq!(item.vat_rate, dec("0.20"));
        assert_eq!(item.vat_amount, dec("160.00"));
        assert_eq!(item.amount_incl_vat, dec("960.00"));
        assert_eq!(item.derived, vec!["vat_rate", "vat_amount", "amount_incl_vat"]);
        assert_eq!(item.source_tokens.len(), 4);
        assert!(item.confidence > 0.0 && item.confidence <= 0.95);
    }

    #[test]
    fn test_headerless_five_numbers() {
        let parsed = parse(&[
            ("Article", 50.0, 400.0),
            ("2", 300.0, 400.0),
            ("10,00", 400.0, 400.0),
            ("20,00", 500.0, 400.0),
            ("4,00", 600.0, 400.0),
            ("24,00", 700.0, 400.0),
            ("Service", 50.0, 440.0),
            ("1", 300.0, 440.0),
            ("5,00", 400.0, 440.0),
            ("5,00", 500.0, 440.0),
            ("1,00", 600.0, 440.0),
            ("6,00", 700.0, 440.0),
        ]);

        assert_eq!(parsed.items.len(), 2);
        let item = &parsed.items[0];
        assert_eq!(item.quantity, dec("2"));
        assert_eq!(item.unit_price, dec("10.00"));
        assert_eq!(item.amount_excl_vat, dec("20.00"));
        assert_eq!(item.vat_amount, dec("4.00"));
        assert_eq!(item.amount_incl_vat, dec("24.00"));
        assert_eq!(item.derived, vec!["vat_rate"]);
    }

    #[test]
    fn test_row_without_amount_is_dropped() {
        let parsed = parse(&[
            ("Désignation", 50.0, 400.0),
            ("Qté", 400.0, 400.0),
            ("HT", 650.0, 400.0),
            ("Conseil", 50.0, 440.0),
            ("1", 400.0, 440.0),
            ("500,00", 650.0, 440.0),
            ("Frais", 50.0, 480.0),
            ("5,5%", 400.0, 480.0),
        ]);

        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.anomalies.len(), 1);
        assert_eq!(parsed.anomalies[0].field, "line_items[row 2]");
    }

    #[test]
    fn test_out_of_range_amount_drops_row() {
        let parsed = parse(&[
            ("Désignation", 50.0, 400.0),
            ("Qté", 400.0, 400.0),
            ("HT", 650.0, 400.0),
            ("Conseil", 50.0, 440.0),
            ("1", 400.0, 440.0),
            ("500,00", 650.0, 440.0),
            ("Frais", 50.0, 480.0),
            ("1", 400.0, 480.0),
            ("70000000000000000000000000000", 650.0, 480.0),
        ]);

        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].amount_excl_vat, dec("500.00"));
        assert_eq!(parsed.anomalies.len(), 1);
        assert_eq!(parsed.anomalies[0].field, "line_items[row 2]");
        assert!(parsed.anomalies[0].issue.starts_with("amounts out of range"));
    }

    #[test]
    fn test_incl_only_row_derives_excl() {
        let row = RowValues {
            description: vec!["Licence".to_string()],
            values: BTreeMap::from([(Column::Incl.name(), dec("120.00"))]),
        };
        let item = LineItemParser::new(dec("0.20")).complete(row).unwrap();
        assert_eq!(item.amount_excl_vat, dec("100.00"));
        assert_eq!(item.vat_amount, dec("20.00"));
    }

    #[test]
    fn test_column_titles() {
        assert_eq!(Column::classify("Prix unitaire HT"), Some(Column::UnitPrice));
        assert_eq!(Column::classify("Montant TTC"), Some(Column::Incl));
        assert_eq!(Column::classify("Taux TVA"), Some(Column::VatRate));
        assert_eq!(Column::classify("TVA"), Some(Column::VatAmount));
        assert_eq!(Column::classify("Total HT"), Some(Column::Excl));
        assert_eq!(Column::classify("Réf."), None);
    }

    #[test]
    fn test_numeric_cells() {
        assert_eq!(numeric_value("1 200,00 €"), Some(dec("1200.00")));
        assert_eq!(numeric_value("Conseil"), None);
        assert_eq!(percent_value("20 %"), Some(dec("0.2")));
    }
}
