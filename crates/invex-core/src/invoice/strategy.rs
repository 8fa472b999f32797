//! Shared plumbing for extraction strategies: text views over the layout,
//! document regions and the [`FieldMatcher`] trait.

use std::collections::{BTreeMap, HashSet};

use crate::layout::{Block, DocumentLayout};
use crate::models::config::ExtractionConfig;
use crate::models::document::TokenId;
use crate::models::invoice::Anomaly;

use super::fields::{ExtractedField, FieldKey, FieldValue, StrategyKind};
use super::rules::patterns::{
    AMOUNT_DUE_LABEL, CUSTOMER_ID, CUSTOMER_MARKER, SUBTOTAL_LABEL, SUPPLIER_MARKER, TOTAL_INCL_LABEL,
};
use super::rules::ExtractionMatch;

/// Fields resolved so far, keyed by field.
pub type ResolvedFields = BTreeMap<FieldKey, ExtractedField>;

/// A proposed value for a field before quality scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub value: FieldValue,
    pub source_tokens: Vec<TokenId>,
    /// Raw match strength in [0, 1].
    pub confidence: f32,
}

/// What a strategy returns for one pass.
#[derive(Debug, Clone, Default)]
pub struct Proposals {
    pub candidates: Vec<(FieldKey, Candidate)>,
    pub anomalies: Vec<Anomaly>,
}

impl Proposals {
    pub fn push(&mut self, key: FieldKey, candidate: Candidate) {
        self.candidates.push((key, candidate));
    }

    /// Strongest candidate proposed for `key`.
    pub fn best(&self, key: FieldKey) -> Option<&Candidate> {
        self.candidates
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, c)| c)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// A field-resolution strategy.
///
/// Strategies are consulted in turn; each receives the fields still below the
/// confidence floor and the fields resolved by earlier strategies.
pub trait FieldMatcher: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn resolve(&self, wanted: &[FieldKey], ctx: &ExtractionContext<'_>, resolved: &ResolvedFields) -> Proposals;
}

/// Text of a block sequence. Blocks sharing a line are joined by a tab,
/// lines by a newline, so offsets map back to tokens.
#[derive(Debug, Clone, Default)]
pub struct TextView {
    text: String,
    /// Start offset in `text` and index into `layout.blocks`.
    spans: Vec<(usize, usize)>,
}

impl TextView {
    pub fn new(layout: &DocumentLayout, blocks: impl IntoIterator<Item = usize>) -> Self {
        let mut text = String::new();
        let mut spans = Vec::new();
        let mut previous: Option<&Block> = None;

        for idx in blocks {
            let Some(block) = layout.blocks.get(idx) else {
                continue;
            };
            if let Some(prev) = previous {
                let same_line = prev.page == block.page && prev.line == block.line;
                text.push(if same_line { '\t' } else { '\n' });
            }
            spans.push((text.len(), idx));
            text.push_str(&block.text);
            previous = Some(block);
        }

        Self { text, spans }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Indices of the blocks in this view.
    pub fn blocks(&self) -> impl Iterator<Item = usize> + '_ {
        self.spans.iter().map(|&(_, idx)| idx)
    }

    /// Tokens under the byte range `start..end` of the view text.
    pub fn tokens_for(&self, layout: &DocumentLayout, start: usize, end: usize) -> Vec<TokenId> {
        let mut ids = Vec::new();
        for &(block_start, idx) in &self.spans {
            let block = &layout.blocks[idx];
            let block_end = block_start + block.text.len();
            if block_start >= end || block_end <= start {
                continue;
            }
            let local_start = start.saturating_sub(block_start);
            let local_end = end.min(block_end) - block_start;
            ids.extend(block.tokens_in_span(local_start, local_end));
        }
        ids
    }
}

/// Block indices of the document regions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Regions {
    pub supplier: Vec<usize>,
    pub customer: Vec<usize>,
    /// Non-table blocks from the first table (or totals label) on.
    pub totals: Vec<usize>,
    /// Block that opened the customer region.
    pub customer_marker: Option<usize>,
}

impl Regions {
    /// Split the blocks before the item table into supplier and customer
    /// regions. The customer region starts at a "Facturé à"/"Client" marker
    /// and keeps the blocks at or right of the marker's left edge.
    pub fn detect(layout: &DocumentLayout, column_tolerance: f32) -> Self {
        let blocks = &layout.blocks;
        let Some(first_page) = blocks.first().map(|b| b.page) else {
            return Self::default();
        };

        let table_start = blocks.iter().position(|b| b.table.is_some());
        let totals_label = blocks.iter().position(|b| {
            TOTAL_INCL_LABEL.is_match(&b.text)
                || SUBTOTAL_LABEL.is_match(&b.text)
                || AMOUNT_DUE_LABEL.is_match(&b.text)
        });
        let body_start = table_start.or(totals_label);
        let head_end = body_start.unwrap_or(blocks.len());

        let totals = match body_start {
            Some(start) => (start..blocks.len()).filter(|&i| blocks[i].table.is_none()).collect(),
            None => (0..blocks.len()).collect(),
        };

        let marker = (0..head_end).find(|&i| {
            CUSTOMER_MARKER.is_match(&blocks[i].text) && !CUSTOMER_ID.is_match(&blocks[i].text)
        });

        let mut customer = Vec::new();
        if let Some(m) = marker {
            let anchor = &blocks[m];
            let tolerance = layout
                .page(anchor.page)
                .map(|p| p.width as f32 * column_tolerance)
                .unwrap_or(0.0);
            for i in m..head_end {
                let block = &blocks[i];
                if block.page != anchor.page {
                    break;
                }
                if i > m && SUPPLIER_MARKER.is_match(&block.text) {
                    break;
                }
                if block.bbox.left >= anchor.bbox.left - tolerance {
                    customer.push(i);
                }
            }
        }

        let in_customer: HashSet<usize> = customer.iter().copied().collect();
        let supplier = (0..head_end)
            .filter(|i| blocks[*i].page == first_page && !in_customer.contains(i))
            .collect();

        Self {
            supplier,
            customer,
            totals,
            customer_marker: marker,
        }
    }
}

/// Everything a strategy sees for one document.
pub struct ExtractionContext<'a> {
    pub layout: &'a DocumentLayout,
    pub config: &'a ExtractionConfig,
    pub regions: Regions,
    pub document: TextView,
    pub supplier: TextView,
    pub customer: TextView,
    pub totals: TextView,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(layout: &'a DocumentLayout, config: &'a ExtractionConfig, column_tolerance: f32) -> Self {
        let regions = Regions::detect(layout, column_tolerance);
        let document = TextView::new(layout, 0..layout.blocks.len());
        let supplier = TextView::new(layout, regions.supplier.iter().copied());
        let customer = TextView::new(layout, regions.customer.iter().copied());
        let totals = TextView::new(layout, regions.totals.iter().copied());
        Self {
            layout,
            config,
            regions,
            document,
            supplier,
            customer,
            totals,
        }
    }

    /// Turn a rule match found in `view` into a candidate.
    pub fn candidate<T: Into<FieldValue>>(&self, view: &TextView, found: ExtractionMatch<T>) -> Candidate {
        let source_tokens = match found.position {
            Some((start, end)) => view.tokens_for(self.layout, start, end),
            None => Vec::new(),
        };
        Candidate {
            value: found.value.into(),
            source_tokens,
            confidence: found.confidence,
        }
    }

    /// Quality of the page the tokens come from; the mean page quality when
    /// there are none.
    pub fn quality_for(&self, tokens: &[TokenId]) -> f32 {
        if let Some(page) = tokens.first().and_then(|t| self.layout.page(t.page)) {
            return page.quality_score;
        }
        let pages = &self.layout.pages;
        if pages.is_empty() {
            1.0
        } else {
            pages.iter().map(|p| p.quality_score).sum::<f32>() / pages.len() as f32
        }
    }

    /// Mean OCR confidence of the tokens, 1.0 when there are none.
    pub fn token_confidence(&self, tokens: &[TokenId]) -> f32 {
        let confidences: Vec<f32> = tokens
            .iter()
            .filter_map(|id| self.layout.token(*id))
            .map(|t| t.confidence)
            .collect();
        if confidences.is_empty() {
            1.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::layout::tests::{page_of, token};
    use crate::layout::LayoutAssembler;
    use crate::models::config::LayoutConfig;
    use crate::models::document::Token;
    use pretty_assertions::assert_eq;

    /// Lay out words given as (text, left, top).
    pub(crate) fn layout_of(words: &[(&str, f32, f32)]) -> DocumentLayout {
        let tokens: Vec<Token> = words.iter().map(|(t, l, top)| token(t, *l, *top)).collect();
        LayoutAssembler::new(LayoutConfig::default()).assemble(vec![page_of(tokens)])
    }

    #[test]
    fn test_view_joins_blocks_by_line() {
        let layout = layout_of(&[
            ("ACME", 0.0, 50.0),
            ("Facture", 600.0, 50.0),
            ("Paris", 0.0, 90.0),
        ]);
        let view = TextView::new(&layout, 0..layout.blocks.len());
        assert_eq!(view.text(), "ACME\tFacture\nParis");
    }

    #[test]
    fn test_view_offsets_map_to_tokens() {
        let layout = layout_of(&[
            ("Total", 0.0, 700.0),
            ("TTC", 60.0, 700.0),
            ("1200,00", 600.0, 700.0),
        ]);
        let view = TextView::new(&layout, 0..layout.blocks.len());
        let start = view.text().find("1200").unwrap();
        let ids = view.tokens_for(&layout, start, start + 7);
        assert_eq!(ids, vec![TokenId::new(0, 2)]);
        assert_eq!(layout.token(ids[0]).unwrap().text, "1200,00");
    }

    #[test]
    fn test_two_column_regions() {
        let layout = layout_of(&[
            ("ACME", 0.0, 50.0),
            ("SARL", 45.0, 50.0),
            ("Facturé", 600.0, 50.0),
            ("à", 675.0, 50.0),
            ("12", 0.0, 90.0),
            ("rue", 25.0, 90.0),
            ("Dupont", 600.0, 90.0),
            ("SA", 665.0, 90.0),
            ("Total", 0.0, 900.0),
            ("TTC", 60.0, 900.0),
            ("120,00", 600.0, 900.0),
        ]);
        let regions = Regions::detect(&layout, 0.05);
        let text = |ids: &Vec<usize>| -> Vec<String> { ids.iter().map(|&i| layout.blocks[i].text.clone()).collect() };

        assert_eq!(text(&regions.supplier), vec!["ACME SARL", "12 rue"]);
        assert_eq!(text(&regions.customer), vec!["Facturé à", "Dupont SA"]);
        assert_eq!(text(&regions.totals), vec!["Total TTC", "120,00"]);
        assert!(regions.customer_marker.is_some());
    }

    #[test]
    fn test_no_marker_means_all_supplier() {
        let layout = layout_of(&[("ACME", 0.0, 50.0), ("Lyon", 0.0, 90.0)]);
        let regions = Regions::detect(&layout, 0.05);
        assert_eq!(regions.supplier, vec![0, 1]);
        assert!(regions.customer.is_empty());
        assert_eq!(regions.totals, vec![0, 1]);
    }

    #[test]
    fn test_quality_defaults_to_page_mean() {
        let layout = layout_of(&[("ACME", 0.0, 50.0)]);
        let config = ExtractionConfig::default();
        let ctx = ExtractionContext::new(&layout, &config, 0.05);
        assert_eq!(ctx.quality_for(&[]), 0.9);
        assert_eq!(ctx.token_confidence(&[TokenId::new(0, 0)]), 0.95);
    }
}
