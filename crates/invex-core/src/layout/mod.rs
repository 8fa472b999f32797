//! Layout assembly: group tokens into lines, cells and role-tagged blocks.

mod table;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::config::LayoutConfig;
use crate::models::document::{BoundingBox, RecoveredPage, Token, TokenId};

use table::{LineShape, TableRun};

/// Advisory role of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockRole {
    Header,
    Body,
    TableRowCandidate,
    Footer,
}

/// A run of tokens inside a block, separated from its neighbours by a wide gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub tokens: Vec<TokenId>,
    pub bbox: BoundingBox,
    pub text: String,
}

/// Ordered tokens sharing a line and a column region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub page: usize,
    /// Line index within the page.
    pub line: usize,
    pub role: BlockRole,
    pub tokens: Vec<TokenId>,
    pub cells: Vec<Cell>,
    pub bbox: BoundingBox,
    /// Token texts joined by single spaces.
    pub text: String,
    /// Byte offset of each token in `text`.
    pub offsets: Vec<usize>,
    /// Table the block belongs to, unique across the document.
    pub table: Option<usize>,
    /// The block is the column header of its table.
    pub table_header: bool,
}

impl Block {
    /// Tokens overlapping the byte range `start..end` of `text`.
    pub fn tokens_in_span(&self, start: usize, end: usize) -> Vec<TokenId> {
        self.tokens
            .iter()
            .zip(&self.offsets)
            .filter(|&(_, &offset)| offset < end && self.token_end(offset) > start)
            .map(|(id, _)| *id)
            .collect()
    }

    fn token_end(&self, offset: usize) -> usize {
        self.text[offset..]
            .find(' ')
            .map(|i| offset + i)
            .unwrap_or(self.text.len())
    }
}

/// Recovered pages plus the block sequence built over them.
#[derive(Debug, Clone, Default)]
pub struct DocumentLayout {
    pub pages: Vec<RecoveredPage>,
    /// Blocks in reading order, pages concatenated in page order.
    pub blocks: Vec<Block>,
}

impl DocumentLayout {
    pub fn page(&self, index: usize) -> Option<&RecoveredPage> {
        self.pages.iter().find(|p| p.index == index)
    }

    pub fn token(&self, id: TokenId) -> Option<&Token> {
        self.page(id.page).and_then(|p| p.token(id.index))
    }

    pub fn token_count(&self) -> usize {
        self.pages.iter().map(|p| p.tokens.len()).sum()
    }

    /// Blocks that belong to a detected table.
    pub fn table_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.role == BlockRole::TableRowCandidate)
    }
}

/// Groups tokens into lines and blocks.
pub struct LayoutAssembler {
    config: LayoutConfig,
}

struct LineBuild {
    members: Vec<usize>,
    top_sum: f32,
    bottom_sum: f32,
}

impl LineBuild {
    fn band(&self) -> BoundingBox {
        let n = self.members.len() as f32;
        BoundingBox::new(0.0, self.top_sum / n, 0.0, self.bottom_sum / n)
    }
}

impl LayoutAssembler {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Build the block sequence for all pages.
    pub fn assemble(&self, mut pages: Vec<RecoveredPage>) -> DocumentLayout {
        pages.sort_by_key(|p| p.index);

        let mut blocks = Vec::new();
        let mut next_table = 0;
        for page in &pages {
            let page_blocks = self.assemble_page(page, &mut next_table);
            debug!("Page {}: {} blocks", page.index, page_blocks.len());
            blocks.extend(page_blocks);
        }

        DocumentLayout { pages, blocks }
    }

    fn assemble_page(&self, page: &RecoveredPage, next_table: &mut usize) -> Vec<Block> {
        if page.tokens.is_empty() {
            return Vec::new();
        }

        let lines = self.group_lines(&page.tokens);
        let median_height = median(page.tokens.iter().map(|t| t.bbox.height()).collect());
        let cell_gap = self.config.cell_gap_factor * median_height;

        let shapes: Vec<LineShape> = lines
            .iter()
            .map(|members| table::shape_line(table::split_cells(&page.tokens, members, cell_gap)))
            .collect();

        let tolerance = self.config.column_tolerance_ratio * page.width as f32;
        let tables = table::find_tables(&shapes, tolerance, self.config.min_table_rows);

        let mut table_of_line: Vec<Option<(usize, bool)>> = vec![None; lines.len()];
        for TableRun { header, rows } in &tables {
            let id = *next_table;
            *next_table += 1;
            if let Some(h) = header {
                table_of_line[*h] = Some((id, true));
            }
            for &r in rows {
                table_of_line[r] = Some((id, false));
            }
        }

        let split_gap = self.config.column_split_ratio * page.width as f32;
        let mut blocks = Vec::new();
        for (line_idx, shape) in shapes.iter().enumerate() {
            match table_of_line[line_idx] {
                Some((table_id, is_header)) => {
                    let mut block = build_block(page, line_idx, BlockRole::TableRowCandidate, &shape.cells);
                    block.table = Some(table_id);
                    block.table_header = is_header;
                    blocks.push(block);
                }
                None => {
                    for group in split_columns(&shape.cells, split_gap) {
                        let bbox = BoundingBox::enclosing(group.iter().map(|c| &c.bbox))
                            .unwrap_or_default();
                        let role = self.role_for(bbox, page.height);
                        blocks.push(build_block(page, line_idx, role, group));
                    }
                }
            }
        }
        blocks
    }

    /// Assign each token to a line. Returns token indices per line, lines top
    /// to bottom, tokens left to right.
    fn group_lines(&self, tokens: &[Token]) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..tokens.len()).collect();
        order.sort_by(|&a, &b| {
            let (ta, tb) = (&tokens[a].bbox, &tokens[b].bbox);
            ta.top
                .total_cmp(&tb.top)
                .then(ta.left.total_cmp(&tb.left))
        });

        let mut lines: Vec<LineBuild> = Vec::new();
        for idx in order {
            let bbox = tokens[idx].bbox;
            let mut best: Option<(usize, f32, f32)> = None;

            for (line_idx, line) in lines.iter().enumerate() {
                let band = line.band();
                let overlap = bbox.vertical_overlap(&band);
                let min_height = bbox.height().min(band.height());
                if overlap <= 0.0 || min_height <= 0.0 {
                    continue;
                }
                if overlap / min_height < self.config.line_overlap_threshold {
                    continue;
                }
                if collides(tokens, &line.members, &bbox) {
                    continue;
                }

                let distance = (bbox.center_y() - band.center_y()).abs();
                let better = match best {
                    None => true,
                    Some((_, best_overlap, best_distance)) => {
                        overlap > best_overlap || (overlap == best_overlap && distance < best_distance)
                    }
                };
                if better {
                    best = Some((line_idx, overlap, distance));
                }
            }

            match best {
                Some((line_idx, _, _)) => {
                    let line = &mut lines[line_idx];
                    line.members.push(idx);
                    line.top_sum += bbox.top;
                    line.bottom_sum += bbox.bottom;
                }
                None => lines.push(LineBuild {
                    members: vec![idx],
                    top_sum: bbox.top,
                    bottom_sum: bbox.bottom,
                }),
            }
        }

        lines.sort_by(|a, b| a.band().top.total_cmp(&b.band().top));
        lines
            .into_iter()
            .map(|mut line| {
                line.members
                    .sort_by(|&a, &b| tokens[a].bbox.left.total_cmp(&tokens[b].bbox.left));
                line.members
            })
            .collect()
    }

    fn role_for(&self, bbox: BoundingBox, page_height: u32) -> BlockRole {
        let height = page_height.max(1) as f32;
        let center = bbox.center_y() / height;
        if center < self.config.header_ratio {
            BlockRole::Header
        } else if center > 1.0 - self.config.footer_ratio {
            BlockRole::Footer
        } else {
            BlockRole::Body
        }
    }
}

/// A token already on the line at the same horizontal position means the
/// two belong to stacked lines.
fn collides(tokens: &[Token], members: &[usize], bbox: &BoundingBox) -> bool {
    members.iter().any(|&m| {
        let other = &tokens[m].bbox;
        let overlap = (bbox.right.min(other.right) - bbox.left.max(other.left)).max(0.0);
        let narrower = bbox.width().min(other.width());
        narrower > 0.0 && overlap / narrower > 0.5
    })
}

/// Group consecutive cells, breaking at gaps wider than `max_gap`.
fn split_columns(cells: &[table::LineCell], max_gap: f32) -> Vec<&[table::LineCell]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..cells.len() {
        if cells[i].bbox.left - cells[i - 1].bbox.right > max_gap {
            groups.push(&cells[start..i]);
            start = i;
        }
    }
    if start < cells.len() {
        groups.push(&cells[start..]);
    }
    groups
}

fn build_block(page: &RecoveredPage, line: usize, role: BlockRole, cells: &[table::LineCell]) -> Block {
    let mut tokens = Vec::new();
    let mut offsets = Vec::new();
    let mut text = String::new();
    let mut out_cells = Vec::with_capacity(cells.len());

    for cell in cells {
        let mut cell_ids = Vec::with_capacity(cell.tokens.len());
        for &idx in &cell.tokens {
            if !text.is_empty() {
                text.push(' ');
            }
            offsets.push(text.len());
            text.push_str(&page.tokens[idx].text);
            let id = TokenId::new(page.index, idx);
            tokens.push(id);
            cell_ids.push(id);
        }
        out_cells.push(Cell {
            tokens: cell_ids,
            bbox: cell.bbox,
            text: cell.text.clone(),
        });
    }

    let bbox = BoundingBox::enclosing(cells.iter().map(|c| &c.bbox)).unwrap_or_default();
    Block {
        page: page.index,
        line,
        role,
        tokens,
        cells: out_cells,
        bbox,
        text,
        offsets,
        table: None,
        table_header: false,
    }
}

fn median(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}
