//! Table reconstruction from resolved cells.
//!
//! Row 0 becomes the header list. Every later row is rebuilt over the logical
//! column slots `0..headers.len()`. Explicit cells are kept and may widen to
//! swallow an empty neighbor. Slots covered by a preceding cell's column span,
//! or by a cell spanning down from an earlier row, are marked `MergedAway`.
//! Any remaining hole gets a synthesized implicit cell. `MergedAway` slots are
//! dropped and the surviving cells renumbered.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::confidence::table_confidence;
use super::types::{
    Alignment, BoundingBox, ExtractionMethod, ReconstructedTable, RowSlot, TableCell,
    TableMetadata, TableRegion,
};
use super::ExtractionError;

/// Width (relative to the row average) past which a cell spans several columns.
const WIDE_CELL_FACTOR: f32 = 1.8;

/// Width factor past which long text forces a span of at least 2.
const LONG_TEXT_WIDTH_FACTOR: f32 = 1.5;

/// Text longer than this (in chars) is "long".
const LONG_TEXT_CHARS: usize = 50;

/// Column distances up to this are treated as an implicit merge.
const MAX_MERGE_GAP: usize = 3;

/// Share of numeric cells that makes a row right aligned.
const NUMERIC_ROW_RATIO: f32 = 0.6;

const IMPLICIT_MERGED_CONFIDENCE: f32 = 0.7;
const IMPLICIT_CONFIDENCE: f32 = 0.5;

static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?\d[\d\s.,]*%?$").expect("valid regex"));

/// A hole between two consecutive explicit cells of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGap {
    pub after_col: usize,
    pub distance: usize,
    pub suggested_merge: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowStructure {
    pub gaps: Vec<ColumnGap>,
    pub has_implicit_merging: bool,
}

/// Build a table from the cells resolved for `region`.
pub fn reconstruct_table(
    region: &TableRegion,
    cells: Vec<TableCell>,
    page: usize,
    processing_ms: u64,
) -> Result<ReconstructedTable, ExtractionError> {
    let (row_count, column_count) = (region.row_count(), region.column_count());
    if row_count == 0 || column_count == 0 {
        return Err(ExtractionError::DegenerateGrid(format!(
            "{row_count} rows x {column_count} columns at {:?}",
            region.bounding_box
        )));
    }

    let mut by_row: Vec<Vec<TableCell>> = vec![Vec::new(); row_count];
    for cell in cells {
        if let Some(row) = by_row.get_mut(cell.row) {
            row.push(cell);
        }
    }
    for row in &mut by_row {
        row.sort_by_key(|c| c.col);
    }

    let mut rows_iter = by_row.into_iter();
    let header_cells = rows_iter.next().unwrap_or_default();
    let headers = extract_headers(&header_cells, column_count);

    let mut coverage = RowCoverage::new(column_count);
    for cell in &header_cells {
        coverage.record(0, cell.col, cell.col_span, cell.row_span);
    }

    let mut rows: Vec<Vec<TableCell>> = Vec::with_capacity(row_count.saturating_sub(1));
    let mut spanned_from_above = Vec::with_capacity(row_count.saturating_sub(1));
    for (i, row_cells) in rows_iter.enumerate() {
        let row = i + 1;
        spanned_from_above.push(coverage.covered_count(row));
        rows.push(fill_implicit_cells(row, row_cells, column_count, region, &mut coverage));
    }

    let confidence = table_confidence(
        header_cells.iter().chain(rows.iter().flatten()),
        Some(region.confidence),
    );

    Ok(ReconstructedTable {
        id: Uuid::new_v4(),
        page,
        bounding_box: region.bounding_box,
        headers,
        rows,
        spanned_from_above,
        confidence,
        metadata: TableMetadata {
            border_style: region.border_style,
            has_headers: header_cells.iter().any(|c| !c.is_empty),
            extraction_method: ExtractionMethod::RasterGrid,
            processing_ms,
            extracted_at: Utc::now(),
            merged_from: Vec::new(),
        },
    })
}

/// One header per logical column. Empty headers, and columns covered by a
/// spanning header cell, get a `Col N` placeholder.
pub fn extract_headers(header_cells: &[TableCell], column_count: usize) -> Vec<String> {
    (0..column_count)
        .map(|c| match header_cells.iter().find(|h| h.col == c) {
            Some(h) if !h.text.trim().is_empty() => h.text.trim().to_string(),
            _ => placeholder_header(c),
        })
        .collect()
}

pub fn placeholder_header(col: usize) -> String {
    format!("Col {}", col + 1)
}

/// Flag column gaps between consecutive explicit cells of a row.
pub fn detect_implicit_structure(row_cells: &[TableCell]) -> RowStructure {
    let gaps: Vec<ColumnGap> = row_cells
        .windows(2)
        .filter_map(|pair| {
            let distance = pair[1].col.saturating_sub(pair[0].col);
            (distance > 1).then_some(ColumnGap {
                after_col: pair[0].col,
                distance,
                suggested_merge: distance <= MAX_MERGE_GAP,
            })
        })
        .collect();
    let has_implicit_merging = gaps.iter().any(|g| g.suggested_merge);
    RowStructure {
        gaps,
        has_implicit_merging,
    }
}

/// Logical columns held by cells spanning down over later rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCoverage {
    /// Per column: origin (row, col) of the covering cell and the first row past its span.
    owners: Vec<Option<(usize, usize, usize)>>,
}

impl RowCoverage {
    pub fn new(column_count: usize) -> Self {
        Self {
            owners: vec![None; column_count],
        }
    }

    /// Register a cell placed at logical `(row, col)`.
    pub fn record(&mut self, row: usize, col: usize, col_span: usize, row_span: usize) {
        if row_span <= 1 {
            return;
        }
        let end = (col + col_span.max(1)).min(self.owners.len());
        for owner in self.owners.iter_mut().take(end).skip(col) {
            *owner = Some((row, col, row + row_span));
        }
    }

    /// Origin of the cell covering `(row, col)` from an earlier row.
    pub fn owner(&self, row: usize, col: usize) -> Option<(usize, usize)> {
        match self.owners.get(col).copied().flatten() {
            Some((origin_row, origin_col, until)) if origin_row < row && row < until => {
                Some((origin_row, origin_col))
            }
            _ => None,
        }
    }

    pub fn covered_count(&self, row: usize) -> usize {
        (0..self.owners.len())
            .filter(|&col| self.owner(row, col).is_some())
            .count()
    }
}

/// Rebuild a body row over `column_count` logical slots.
///
/// Slots held by a cell from an earlier row (per `coverage`) are skipped;
/// the row's own multi-row cells are recorded into `coverage` for the rows
/// below.
pub fn fill_implicit_cells(
    row: usize,
    row_cells: Vec<TableCell>,
    column_count: usize,
    region: &TableRegion,
    coverage: &mut RowCoverage,
) -> Vec<TableCell> {
    let structure = detect_implicit_structure(&row_cells);
    let avg_width = average_width(&row_cells, region, column_count);
    let alignment = row_alignment(&row_cells);
    let row_box = estimate_row_box(&row_cells, region, row);

    let mut explicit: Vec<Option<TableCell>> = vec![None; column_count];
    for cell in row_cells {
        let col = cell.col;
        if let Some(slot) = explicit.get_mut(col) {
            *slot = Some(cell);
        }
    }

    let mut slots: Vec<RowSlot> = Vec::with_capacity(column_count);
    // (slot index of the covering cell, first column past its span)
    let mut cover: Option<(usize, usize)> = None;

    for (c, cell) in explicit.into_iter().enumerate() {
        if let Some((origin_row, origin_col)) = coverage.owner(row, c) {
            // A span from the left stops where a span from above begins.
            if let Some((owner, until)) = cover.take() {
                if c < until {
                    if let Some(RowSlot::Cell(prev)) = slots.get_mut(owner) {
                        prev.col_span = c - prev.col;
                    }
                }
            }
            slots.push(RowSlot::MergedAway {
                row: origin_row,
                col: origin_col,
            });
            continue;
        }

        if let Some((owner, until)) = cover {
            if c < until {
                match cell {
                    Some(ref cell) if !cell.is_empty => {
                        // Content wins over a guessed span.
                        if let Some(RowSlot::Cell(prev)) = slots.get_mut(owner) {
                            prev.col_span = c - prev.col;
                        }
                        cover = None;
                    }
                    _ => {
                        slots.push(RowSlot::MergedAway { row, col: owner });
                        continue;
                    }
                }
            }
        }

        let cell = match cell {
            Some(mut cell) => {
                let span = cell
                    .col_span
                    .max(suggested_span(&cell, avg_width))
                    .min(column_count - c)
                    .max(1);
                cell.col_span = span;
                cell
            }
            None => implicit_cell(row, c, &row_box, region, avg_width, &structure, alignment),
        };
        if cell.col_span > 1 {
            cover = Some((slots.len(), c + cell.col_span));
        }
        slots.push(RowSlot::Cell(cell));
    }

    for (c, slot) in slots.iter().enumerate() {
        if let RowSlot::Cell(cell) = slot {
            coverage.record(row, c, cell.col_span, cell.row_span);
        }
    }

    // Cells keep their logical column until this point; spans are computed
    // against it above. Renumber only after pruning.
    slots
        .into_iter()
        .filter_map(RowSlot::into_cell)
        .enumerate()
        .map(|(i, mut cell)| {
            cell.col = i;
            cell
        })
        .collect()
}

/// Span suggested by a cell's size and content, relative to its row.
fn suggested_span(cell: &TableCell, avg_width: f32) -> usize {
    if avg_width <= 0.0 {
        return 1;
    }
    let width = cell.bounding_box.width as f32;
    let mut span = 1;
    if width > WIDE_CELL_FACTOR * avg_width {
        span = (width / avg_width).round() as usize;
    }
    if cell.text.chars().count() > LONG_TEXT_CHARS && width > LONG_TEXT_WIDTH_FACTOR * avg_width {
        span = span.max(2);
    }
    span
}

fn average_width(row_cells: &[TableCell], region: &TableRegion, column_count: usize) -> f32 {
    let widths: Vec<f32> = row_cells
        .iter()
        .map(|c| c.bounding_box.width as f32)
        .filter(|w| *w > 0.0)
        .collect();
    if widths.is_empty() {
        return region.bounding_box.width as f32 / column_count.max(1) as f32;
    }
    widths.iter().sum::<f32>() / widths.len() as f32
}

pub fn is_numeric(text: &str) -> bool {
    NUMERIC_RE.is_match(text.trim())
}

fn row_alignment(row_cells: &[TableCell]) -> Alignment {
    if row_cells.is_empty() {
        return Alignment::Left;
    }
    let numeric = row_cells.iter().filter(|c| is_numeric(&c.text)).count();
    if numeric as f32 / row_cells.len() as f32 >= NUMERIC_ROW_RATIO {
        Alignment::Right
    } else {
        Alignment::Left
    }
}

/// Vertical extent of a row: average of its explicit cells, else the grid row.
fn estimate_row_box(row_cells: &[TableCell], region: &TableRegion, row: usize) -> BoundingBox {
    let fallback = region.row_box(row).unwrap_or(region.bounding_box);
    if row_cells.is_empty() {
        return fallback;
    }
    let n = row_cells.len() as u64;
    let y = row_cells.iter().map(|c| c.bounding_box.y as u64).sum::<u64>() / n;
    let height = row_cells.iter().map(|c| c.bounding_box.height as u64).sum::<u64>() / n;
    BoundingBox::new(fallback.x, y as u32, fallback.width, height as u32)
}

fn implicit_cell(
    row: usize,
    col: usize,
    row_box: &BoundingBox,
    region: &TableRegion,
    avg_width: f32,
    structure: &RowStructure,
    alignment: Alignment,
) -> TableCell {
    let (x, width) = match (region.column_lines.get(col), region.column_lines.get(col + 1)) {
        (Some(&left), Some(&right)) => (left, right.saturating_sub(left)),
        _ => (
            row_box.x + (col as f32 * avg_width) as u32,
            avg_width as u32,
        ),
    };
    let confidence = if structure.has_implicit_merging {
        IMPLICIT_MERGED_CONFIDENCE
    } else {
        IMPLICIT_CONFIDENCE
    };
    let mut cell = TableCell::empty(row, col, BoundingBox::new(x, row_box.y, width, row_box.height));
    cell.confidence = confidence;
    cell.is_implicit = true;
    cell.is_header = false;
    cell.alignment = alignment;
    cell
}
