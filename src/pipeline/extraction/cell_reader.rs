//! Cell content resolution: crop each planned cell, ask the external reader
//! for its text, and turn the answer into a populated `TableCell`.
//!
//! Reader calls are bounded by a timeout. A failing or slow reader degrades
//! the cell to empty text with zero confidence; it never aborts the table.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use super::cell_grid::BORDER_INSET;
use super::confidence::{heuristic_text_confidence, reconcile_cell_confidence};
use super::raster::RasterImage;
use super::types::{Alignment, BoundingBox, CellBorders, CellPlan, CellText, CellTextReader, TableCell};
use super::ExtractionError;

/// Thickness of the edge strip checked for a ruling line.
const BORDER_STRIP: u32 = 2;

/// Dark fraction of an edge strip that counts as a drawn border.
const BORDER_INK_RATIO: f32 = 0.5;

/// Ink centroid (fraction of cell width) below which text is left aligned.
const LEFT_ALIGN_MAX: f32 = 0.4;

/// Ink centroid above which text is right aligned.
const RIGHT_ALIGN_MIN: f32 = 0.6;

/// Outcome of resolving every cell of one table.
#[derive(Debug, Clone)]
pub struct ResolvedCells {
    pub cells: Vec<TableCell>,
    /// Cells whose reader call failed or timed out.
    pub degraded: usize,
}

pub struct CellContentResolver {
    reader: Arc<dyn CellTextReader>,
    timeout: Duration,
}

impl CellContentResolver {
    pub fn new(reader: Arc<dyn CellTextReader>, timeout: Duration) -> Self {
        Self { reader, timeout }
    }

    /// Resolve one cell. The second value is true when the reader failed.
    pub async fn resolve_cell(&self, image: &RasterImage, plan: &CellPlan) -> (TableCell, bool) {
        let (row, col) = (plan.cell.row, plan.cell.col);

        let (text, reader_confidence, degraded) = match self.read(image, &plan.bounds).await {
            Ok(read) => (read.text.trim().to_string(), read.confidence, false),
            Err(e) => {
                tracing::warn!(row, col, error = %e, "Cell read failed, degrading to empty cell");
                (String::new(), 0.0, true)
            }
        };

        let is_empty = text.is_empty();
        let heuristic_confidence = heuristic_text_confidence(&text);
        let confidence = if degraded {
            0.0
        } else {
            reconcile_cell_confidence(reader_confidence, heuristic_confidence)
        };
        let alignment = if is_empty {
            Alignment::Left
        } else {
            detect_alignment(image, &plan.bounds)
        };

        let cell = TableCell {
            row,
            col,
            bounding_box: plan.bounds,
            text,
            confidence,
            reader_confidence: if degraded { 0.0 } else { reader_confidence },
            heuristic_confidence,
            col_span: plan.col_span,
            row_span: plan.row_span,
            is_header: row == 0,
            is_empty,
            is_implicit: false,
            borders: detect_borders(image, &plan.bounds),
            alignment,
        };
        (cell, degraded)
    }

    /// Resolve all planned cells of a table concurrently.
    pub async fn resolve_all(&self, image: &RasterImage, plans: &[CellPlan]) -> ResolvedCells {
        let results = join_all(plans.iter().map(|plan| self.resolve_cell(image, plan))).await;
        let degraded = results.iter().filter(|(_, d)| *d).count();
        ResolvedCells {
            cells: results.into_iter().map(|(cell, _)| cell).collect(),
            degraded,
        }
    }

    async fn read(&self, image: &RasterImage, bounds: &BoundingBox) -> Result<CellText, ExtractionError> {
        let crop = image.crop(bounds);
        match tokio::time::timeout(self.timeout, self.reader.read_cell_text(&crop)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::CellReadTimeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// Ruling lines start at the boundary coordinate, so a cell's own top and left
/// rules lie inside its box and the bottom and right rules just past it.
pub fn detect_borders(image: &RasterImage, b: &BoundingBox) -> CellBorders {
    let drawn = |strip: BoundingBox| image.dark_ratio(&strip) >= BORDER_INK_RATIO;
    CellBorders {
        top: drawn(BoundingBox::new(b.x, b.y, b.width, BORDER_STRIP)),
        bottom: drawn(BoundingBox::new(b.x, b.bottom(), b.width, BORDER_STRIP)),
        left: drawn(BoundingBox::new(b.x, b.y, BORDER_STRIP, b.height)),
        right: drawn(BoundingBox::new(b.right(), b.y, BORDER_STRIP, b.height)),
    }
}

pub fn detect_alignment(image: &RasterImage, bounds: &BoundingBox) -> Alignment {
    match image.ink_centroid_x(&bounds.inset(BORDER_INSET)) {
        Some(cx) if cx < LEFT_ALIGN_MAX => Alignment::Left,
        Some(cx) if cx > RIGHT_ALIGN_MIN => Alignment::Right,
        Some(_) => Alignment::Center,
        None => Alignment::Left,
    }
}

/// In-test cell readers.
#[cfg(test)]
pub(crate) mod mocks {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use super::*;

    /// Returns a unique `cell-N` marker per call.
    #[derive(Default)]
    pub struct EchoReader {
        calls: AtomicUsize,
    }

    impl CellTextReader for EchoReader {
        fn read_cell_text<'a>(
            &'a self,
            _region: &'a RasterImage,
        ) -> BoxFuture<'a, Result<CellText, ExtractionError>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(CellText {
                    text: format!("cell-{n}"),
                    confidence: 0.9,
                })
            })
        }
    }

    /// Reads text only when the crop holds ink, like a real engine would.
    pub struct InkAwareReader {
        pub text: String,
    }

    impl CellTextReader for InkAwareReader {
        fn read_cell_text<'a>(
            &'a self,
            region: &'a RasterImage,
        ) -> BoxFuture<'a, Result<CellText, ExtractionError>> {
            let inked = region.dark_ratio(&region.bounds().inset(BORDER_INSET)) > 0.05;
            let text = if inked { self.text.clone() } else { String::new() };
            Box::pin(async move {
                Ok(CellText {
                    text,
                    confidence: if inked { 0.9 } else { 0.0 },
                })
            })
        }
    }

    pub struct FailingReader;

    impl CellTextReader for FailingReader {
        fn read_cell_text<'a>(
            &'a self,
            _region: &'a RasterImage,
        ) -> BoxFuture<'a, Result<CellText, ExtractionError>> {
            Box::pin(async { Err(ExtractionError::CellRead("engine unavailable".into())) })
        }
    }

    pub struct SlowReader {
        pub delay: Duration,
    }

    impl CellTextReader for SlowReader {
        fn read_cell_text<'a>(
            &'a self,
            _region: &'a RasterImage,
        ) -> BoxFuture<'a, Result<CellText, ExtractionError>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                Ok(CellText {
                    text: "late".into(),
                    confidence: 1.0,
                })
            })
        }
    }
}
