use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::raster::RasterImage;
use super::ExtractionError;

// ═══════════════════════════════════════════════════════════
// Geometry
// ═══════════════════════════════════════════════════════════

/// Pixel-space bounding box (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &Self) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Self::new(x, y, right - x, bottom - y)
    }

    /// True when `other` lies inside `self`, allowing `tolerance` pixels of slack per edge.
    pub fn contains(&self, other: &Self, tolerance: u32) -> bool {
        other.x + tolerance >= self.x
            && other.y + tolerance >= self.y
            && other.right() <= self.right() + tolerance
            && other.bottom() <= self.bottom() + tolerance
    }

    /// Shrink by `margin` on every side. Boxes too small to shrink are returned unchanged.
    pub fn inset(&self, margin: u32) -> Self {
        if self.width <= margin * 2 || self.height <= margin * 2 {
            return *self;
        }
        Self::new(
            self.x + margin,
            self.y + margin,
            self.width - margin * 2,
            self.height - margin * 2,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Whether a line was seen as ink or inferred from text alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Explicit,
    Implicit,
}

/// A ruling line found on the page, or synthesized from aligned text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedLine {
    pub orientation: Orientation,
    pub kind: LineKind,
    /// y for horizontal lines, x for vertical lines.
    pub position: u32,
    /// First pixel of the run along the line's own axis.
    pub start: u32,
    /// One past the last pixel of the run.
    pub end: u32,
    pub confidence: f32,
}

impl DetectedLine {
    pub fn horizontal(kind: LineKind, y: u32, x_start: u32, x_end: u32, confidence: f32) -> Self {
        Self {
            orientation: Orientation::Horizontal,
            kind,
            position: y,
            start: x_start,
            end: x_end,
            confidence,
        }
    }

    pub fn vertical(kind: LineKind, x: u32, y_start: u32, y_end: u32, confidence: f32) -> Self {
        Self {
            orientation: Orientation::Vertical,
            kind,
            position: x,
            start: y_start,
            end: y_end,
            confidence,
        }
    }

    pub fn length(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Length of the shared span with `[start, end)`.
    pub fn overlap(&self, start: u32, end: u32) -> u32 {
        self.end.min(end).saturating_sub(self.start.max(start))
    }
}

/// A tile whose ink density looks like text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub bounding_box: BoundingBox,
    pub density: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderStyle {
    #[default]
    Explicit,
    Mixed,
    Implicit,
}

impl BorderStyle {
    /// Style for a set of lines: all explicit, all implicit, or a mix.
    pub fn from_kinds<I: IntoIterator<Item = LineKind>>(kinds: I) -> Self {
        let (mut explicit, mut implicit) = (false, false);
        for kind in kinds {
            match kind {
                LineKind::Explicit => explicit = true,
                LineKind::Implicit => implicit = true,
            }
        }
        match (explicit, implicit) {
            (true, true) => BorderStyle::Mixed,
            (false, true) => BorderStyle::Implicit,
            _ => BorderStyle::Explicit,
        }
    }
}

/// Candidate table: four bounding lines plus every grid line inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRegion {
    pub bounding_box: BoundingBox,
    pub top: DetectedLine,
    pub bottom: DetectedLine,
    pub left: DetectedLine,
    pub right: DetectedLine,
    /// Sorted y coordinates of row boundaries, top and bottom included.
    pub row_lines: Vec<u32>,
    /// Sorted x coordinates of column boundaries, left and right included.
    pub column_lines: Vec<u32>,
    pub confidence: f32,
    pub border_style: BorderStyle,
}

impl TableRegion {
    pub fn row_count(&self) -> usize {
        self.row_lines.len().saturating_sub(1)
    }

    pub fn column_count(&self) -> usize {
        self.column_lines.len().saturating_sub(1)
    }

    /// Full-width box of a single grid row.
    pub fn row_box(&self, row: usize) -> Option<BoundingBox> {
        let top = *self.row_lines.get(row)?;
        let bottom = *self.row_lines.get(row + 1)?;
        Some(BoundingBox::new(
            self.bounding_box.x,
            top,
            self.bounding_box.width,
            bottom.saturating_sub(top),
        ))
    }
}

/// One cell of the base grid, before merge detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
    pub bounding_box: BoundingBox,
}

/// A non-empty cell absorbing adjacent empty cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub origin: GridCell,
    /// (row, col) of every absorbed cell.
    pub absorbed: Vec<(usize, usize)>,
    pub merged_box: BoundingBox,
    pub col_span: usize,
    pub row_span: usize,
}

/// A grid cell ready for content resolution: its final bounds and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPlan {
    pub cell: GridCell,
    pub bounds: BoundingBox,
    pub col_span: usize,
    pub row_span: usize,
}

// ═══════════════════════════════════════════════════════════
// Resolved cells and tables
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellBorders {
    pub top: bool,
    pub bottom: bool,
    pub left: bool,
    pub right: bool,
}

/// A logical table cell with recognized content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub row: usize,
    pub col: usize,
    pub bounding_box: BoundingBox,
    pub text: String,
    /// Reconciled confidence, see `confidence::reconcile_cell_confidence`.
    pub confidence: f32,
    pub reader_confidence: f32,
    pub heuristic_confidence: f32,
    pub col_span: usize,
    pub row_span: usize,
    pub is_header: bool,
    pub is_empty: bool,
    /// Synthesized during row reconstruction rather than read from the grid.
    pub is_implicit: bool,
    pub borders: CellBorders,
    pub alignment: Alignment,
}

impl TableCell {
    /// Empty cell at `(row, col)` with no recognized content.
    pub fn empty(row: usize, col: usize, bounding_box: BoundingBox) -> Self {
        Self {
            row,
            col,
            bounding_box,
            text: String::new(),
            confidence: 0.0,
            reader_confidence: 0.0,
            heuristic_confidence: 0.0,
            col_span: 1,
            row_span: 1,
            is_header: row == 0,
            is_empty: true,
            is_implicit: false,
            borders: CellBorders::default(),
            alignment: Alignment::Left,
        }
    }
}

/// One logical column slot while a row is being assembled.
///
/// Slots swallowed by another cell's span, from the left or from a row
/// above, never become cells.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSlot {
    Cell(TableCell),
    /// Logical (row, column) of the cell covering this slot.
    MergedAway { row: usize, col: usize },
}

impl RowSlot {
    pub fn into_cell(self) -> Option<TableCell> {
        match self {
            RowSlot::Cell(cell) => Some(cell),
            RowSlot::MergedAway { .. } => None,
        }
    }
}

/// How a table entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Built from ruling lines detected on a raster page.
    RasterGrid,
    /// Supplied by the caller (e.g. a digital PDF parser), merge engine only.
    Imported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub border_style: BorderStyle,
    pub has_headers: bool,
    pub extraction_method: ExtractionMethod,
    pub processing_ms: u64,
    pub extracted_at: DateTime<Utc>,
    /// Ids of the tables combined into this one by the merge engine.
    #[serde(default)]
    pub merged_from: Vec<Uuid>,
}

/// A fully reconstructed table.
///
/// Every body row accounts for exactly `headers.len()` column slots: the
/// `col_span`s of its own cells plus the slots held by cells spanning down
/// from an earlier row (`slot_count`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedTable {
    pub id: Uuid,
    /// Zero-based page index the table was found on.
    pub page: usize,
    pub bounding_box: BoundingBox,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<TableCell>>,
    /// Per body row, slots occupied by a cell from a row above (header included).
    #[serde(default)]
    pub spanned_from_above: Vec<usize>,
    pub confidence: f32,
    pub metadata: TableMetadata,
}

impl ReconstructedTable {
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn body_row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column slots covered by a row's own cells.
    pub fn row_width(row: &[TableCell]) -> usize {
        row.iter().map(|c| c.col_span).sum()
    }

    pub fn spanned_slots(&self, body_row: usize) -> usize {
        self.spanned_from_above.get(body_row).copied().unwrap_or(0)
    }

    /// Slots a body row accounts for, own cells and row spans from above.
    pub fn slot_count(&self, body_row: usize) -> usize {
        self.rows.get(body_row).map_or(0, |row| Self::row_width(row)) + self.spanned_slots(body_row)
    }
}

// ═══════════════════════════════════════════════════════════
// Page-level results
// ═══════════════════════════════════════════════════════════

/// Warnings about extraction quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtractionWarning {
    EmptyImage,
    TableSkipped { region: BoundingBox, reason: String },
    LowConfidenceTable { table_id: Uuid, confidence: f32 },
    DegradedCells { table_id: Uuid, count: usize },
}

/// Summary signal for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionQuality {
    NoTablesDetected,
    ExtractionFailed,
    LowConfidence,
    Complete,
}

/// Everything extracted from a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageExtraction {
    pub page: usize,
    pub tables: Vec<ReconstructedTable>,
    pub regions_detected: usize,
    pub failed_tables: usize,
    pub warnings: Vec<ExtractionWarning>,
    pub duration_ms: u64,
}

impl PageExtraction {
    pub fn quality(&self) -> ExtractionQuality {
        if self.tables.is_empty() {
            if self.failed_tables > 0 {
                return ExtractionQuality::ExtractionFailed;
            }
            return ExtractionQuality::NoTablesDetected;
        }
        let low = self.failed_tables > 0
            || self
                .warnings
                .iter()
                .any(|w| matches!(w, ExtractionWarning::LowConfidenceTable { .. }));
        if low {
            ExtractionQuality::LowConfidence
        } else {
            ExtractionQuality::Complete
        }
    }
}

// ═══════════════════════════════════════════════════════════
// External collaborator
// ═══════════════════════════════════════════════════════════

/// Text recognized in one cell image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellText {
    pub text: String,
    pub confidence: f32,
}

/// Recognizes the text inside a cropped cell image (OCR engine, remote service, mock).
///
/// Calls may be slow or fail; the resolver bounds every call with a timeout
/// and degrades failures to empty cells.
pub trait CellTextReader: Send + Sync {
    fn read_cell_text<'a>(
        &'a self,
        region: &'a RasterImage,
    ) -> BoxFuture<'a, Result<CellText, ExtractionError>>;
}

/// Reader returning the same text for every cell. Useful for structure-only runs.
pub struct StaticCellReader {
    text: String,
    confidence: f32,
}

impl StaticCellReader {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// Reads nothing: every cell comes back empty.
    pub fn blank() -> Self {
        Self::new("", 0.0)
    }
}

impl CellTextReader for StaticCellReader {
    fn read_cell_text<'a>(
        &'a self,
        _region: &'a RasterImage,
    ) -> BoxFuture<'a, Result<CellText, ExtractionError>> {
        let text = CellText {
            text: self.text.clone(),
            confidence: self.confidence,
        };
        Box::pin(async move { Ok(text) })
    }
}
