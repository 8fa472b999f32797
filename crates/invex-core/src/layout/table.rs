//! Cell splitting and table-row detection on assembled lines.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::document::{BoundingBox, Token};

lazy_static! {
    static ref NUMERIC_CELL: Regex =
        Regex::new(r"^[-+(]?[\d\s.,'’\u{a0}]*\d[\d\s.,'’\u{a0}]*\)?$").unwrap();

    static ref CURRENCY_NOISE: Regex =
        Regex::new(r"(?i)€|\$|£|\beur\b|\bchf\b|\bfr\.?|%").unwrap();
}

/// Column titles seen in invoice table headers.
const COLUMN_KEYWORDS: &[&str] = &[
    "description", "désignation", "designation", "libellé", "libelle", "article", "produit",
    "prestation", "qté", "qte", "quantité", "quantite", "qty", "quantity", "prix", "price",
    "p.u", "pu", "unitaire", "unit", "montant", "amount", "total", "tva", "vat", "ht", "ttc",
    "taux", "rate",
];

/// Labels that open a totals line rather than an item row.
const TOTALS_LABELS: &[&str] = &[
    "total", "sous-total", "sous total", "subtotal", "net à payer", "net a payer", "montant",
    "tva", "vat", "amount due", "reste à payer", "acompte", "remise",
];

/// A run of tokens within a line, separated from its neighbours by a wide gap.
#[derive(Debug, Clone)]
pub(crate) struct LineCell {
    /// Indices into the page token list.
    pub tokens: Vec<usize>,
    pub bbox: BoundingBox,
    pub text: String,
}

/// Per-line features used to find tables.
#[derive(Debug, Clone)]
pub(crate) struct LineShape {
    pub cells: Vec<LineCell>,
    pub row_shaped: bool,
    pub header: bool,
}

/// A detected table: an optional header line and its row lines.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableRun {
    pub header: Option<usize>,
    pub rows: Vec<usize>,
}

/// Split a line (token indices sorted left to right) at gaps wider than `max_gap`.
pub(crate) fn split_cells(tokens: &[Token], members: &[usize], max_gap: f32) -> Vec<LineCell> {
    let mut cells: Vec<LineCell> = Vec::new();
    for &idx in members {
        let token = &tokens[idx];
        match cells.last_mut() {
            Some(cell) if token.bbox.left - cell.bbox.right <= max_gap => {
                cell.tokens.push(idx);
                cell.bbox = cell.bbox.union(&token.bbox);
                cell.text.push(' ');
                cell.text.push_str(&token.text);
            }
            _ => cells.push(LineCell {
                tokens: vec![idx],
                bbox: token.bbox,
                text: token.text.clone(),
            }),
        }
    }
    cells
}

/// Whether a cell holds a number (amount, quantity or rate).
pub(crate) fn is_numeric_text(text: &str) -> bool {
    let stripped = CURRENCY_NOISE.replace_all(text, "");
    let stripped = stripped.trim();
    !stripped.is_empty() && NUMERIC_CELL.is_match(stripped)
}

pub(crate) fn starts_with_totals_label(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    TOTALS_LABELS.iter().any(|label| lower.starts_with(label))
}

/// Number of distinct column keywords in a text.
pub(crate) fn column_keyword_count(text: &str) -> usize {
    let lower = text.to_lowercase();
    let mut found: Vec<&str> = Vec::new();
    for word in lower.split(|c: char| c.is_whitespace() || c == '/' || c == '(' || c == ')') {
        let word = word
            .trim_matches(|c: char| matches!(c, ':' | ',' | ';'))
            .trim_end_matches('.');
        if let Some(keyword) = COLUMN_KEYWORDS.iter().find(|k| **k == word) {
            if !found.contains(keyword) {
                found.push(keyword);
            }
        }
    }
    found.len()
}

/// Classify a line from its cells.
pub(crate) fn shape_line(cells: Vec<LineCell>) -> LineShape {
    let numeric = cells.iter().filter(|c| is_numeric_text(&c.text)).count();
    let opens_with_total = cells.first().is_some_and(|c| starts_with_totals_label(&c.text));
    let row_shaped = cells.len() >= 2 && numeric >= 1 && !opens_with_total;

    let keyword_cells = cells
        .iter()
        .filter(|c| column_keyword_count(&c.text) > 0)
        .count();
    let header = cells.len() >= 2 && keyword_cells >= 2 && numeric == 0;

    LineShape {
        cells,
        row_shaped,
        header,
    }
}

/// Two lines align when at least two cells of `a` share a left, right or
/// center edge with some cell of `b`.
pub(crate) fn aligned(a: &[LineCell], b: &[LineCell], tolerance: f32) -> bool {
    let close = |x: f32, y: f32| (x - y).abs() <= tolerance;
    let matching = a
        .iter()
        .filter(|ca| {
            b.iter().any(|cb| {
                close(ca.bbox.left, cb.bbox.left)
                    || close(ca.bbox.right, cb.bbox.right)
                    || close(ca.bbox.center_x(), cb.bbox.center_x())
            })
        })
        .count();
    matching >= 2
}

/// Find table runs among a page's lines (in reading order).
pub(crate) fn find_tables(lines: &[LineShape], tolerance: f32, min_rows: usize) -> Vec<TableRun> {
    let mut tables = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].header {
            let rows = collect_rows(lines, i + 1, tolerance, Some(i));
            if let Some(&last) = rows.last() {
                tables.push(TableRun {
                    header: Some(i),
                    rows,
                });
                i = last + 1;
                continue;
            }
        } else if lines[i].row_shaped {
            let rows = collect_rows(lines, i, tolerance, None);
            if rows.len() >= min_rows.max(1) {
                i = rows[rows.len() - 1] + 1;
                tables.push(TableRun { header: None, rows });
                continue;
            }
        }
        i += 1;
    }
    tables
}

/// Consecutive row-shaped lines from `start`, each aligned with the header
/// or with the row above it.
fn collect_rows(lines: &[LineShape], start: usize, tolerance: f32, header: Option<usize>) -> Vec<usize> {
    let mut rows = Vec::new();
    let mut previous = header;
    for (j, line) in lines.iter().enumerate().skip(start) {
        if !line.row_shaped {
            break;
        }
        let fits = match previous {
            None => true,
            Some(p) => {
                aligned(&line.cells, &lines[p].cells, tolerance)
                    || header.is_some_and(|h| aligned(&line.cells, &lines[h].cells, tolerance))
            }
        };
        if !fits {
            break;
        }
        rows.push(j);
        previous = Some(j);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cell(text: &str, left: f32, right: f32) -> LineCell {
        LineCell {
            tokens: Vec::new(),
            bbox: BoundingBox::new(left, 0.0, right, 10.0),
            text: text.to_string(),
        }
    }

    fn row(cells: &[(&str, f32, f32)]) -> LineShape {
        shape_line(cells.iter().map(|(t, l, r)| cell(t, *l, *r)).collect())
    }

    #[test]
    fn test_numeric_cells() {
        assert!(is_numeric_text("1 200,00 €"));
        assert!(is_numeric_text("20%"));
        assert!(is_numeric_text("2"));
        assert!(is_numeric_text("1'234.50 CHF"));
        assert!(!is_numeric_text("Consulting"));
        assert!(!is_numeric_text("€"));
        assert!(!is_numeric_text("FAC-2024-001"));
    }

    #[test]
    fn test_column_keywords() {
        assert_eq!(column_keyword_count("Description"), 1);
        assert_eq!(column_keyword_count("Prix unitaire HT"), 3);
        assert_eq!(column_keyword_count("Qté."), 1);
        assert_eq!(column_keyword_count("Facture"), 0);
    }

    #[test]
    fn test_split_cells_on_wide_gaps() {
        let tokens = vec![
            Token::new("Audit", BoundingBox::new(0.0, 0.0, 50.0, 10.0), 1.0),
            Token::new("sécurité", BoundingBox::new(55.0, 0.0, 120.0, 10.0), 1.0),
            Token::new("2", BoundingBox::new(300.0, 0.0, 310.0, 10.0), 1.0),
        ];
        let cells = split_cells(&tokens, &[0, 1, 2], 12.0);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].text, "Audit sécurité");
        assert_eq!(cells[1].tokens, vec![2]);
    }

    #[test]
    fn test_line_shapes() {
        let header = row(&[("Description", 0.0, 100.0), ("Qté", 300.0, 330.0), ("Total HT", 500.0, 580.0)]);
        assert!(header.header);
        assert!(!header.row_shaped);

        let item = row(&[("Audit", 0.0, 60.0), ("2", 310.0, 320.0), ("1 000,00", 510.0, 580.0)]);
        assert!(item.row_shaped);

        let total = row(&[("Total TTC", 0.0, 90.0), ("1 200,00", 510.0, 580.0)]);
        assert!(!total.row_shaped);
    }

    #[test]
    fn test_table_after_header() {
        let lines = vec![
            row(&[("ACME", 0.0, 60.0)]),
            row(&[("Description", 0.0, 100.0), ("Qté", 300.0, 330.0), ("Total HT", 500.0, 580.0)]),
            row(&[("Audit", 0.0, 60.0), ("2", 310.0, 320.0), ("1 000,00", 510.0, 580.0)]),
            row(&[("Formation", 0.0, 80.0), ("1", 310.0, 320.0), ("500,00", 530.0, 580.0)]),
            row(&[("Total TTC", 0.0, 90.0), ("1 800,00", 510.0, 580.0)]),
        ];
        let tables = find_tables(&lines, 5.0, 2);
        assert_eq!(
            tables,
            vec![TableRun {
                header: Some(1),
                rows: vec![2, 3]
            }]
        );
    }

    #[test]
    fn test_headerless_table_needs_min_rows() {
        let lines = vec![
            row(&[("Audit", 0.0, 60.0), ("1 000,00", 510.0, 580.0)]),
            row(&[("Note", 0.0, 40.0)]),
            row(&[("Audit", 0.0, 60.0), ("2", 310.0, 320.0), ("1 000,00", 510.0, 580.0)]),
            row(&[("Support", 0.0, 70.0), ("3", 310.0, 320.0), ("300,00", 530.0, 580.0)]),
        ];
        let tables = find_tables(&lines, 5.0, 2);
        assert_eq!(
            tables,
            vec![TableRun {
                header: None,
                rows: vec![2, 3]
            }]
        );
    }
}
