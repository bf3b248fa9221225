//! Cell grid construction and merged-cell detection.
//!
//! A region with `h` row boundaries and `v` column boundaries yields
//! `(h-1) x (v-1)` grid cells. With merge handling on, a cell holding ink
//! absorbs an empty neighbor to its right and/or below: the union of the
//! cells becomes one logical cell spanning several columns or rows.

use std::collections::HashSet;

use tracing::debug;

use super::raster::RasterImage;
use super::types::{BoundingBox, CellPlan, GridCell, MergeCandidate, TableRegion};
use crate::pipeline_config::ExtractionConfig;

/// Dark-pixel fraction below which a cell is empty.
pub const EMPTY_INK_RATIO: f32 = 0.05;

/// Pixels trimmed from each cell edge before measuring ink, so the cell's own
/// ruling is not counted as content.
pub const BORDER_INSET: u32 = 3;

/// Row-major grid cells bounded by consecutive row and column lines.
pub fn build_grid(region: &TableRegion) -> Vec<GridCell> {
    let mut cells = Vec::with_capacity(region.row_count() * region.column_count());
    for (row, ys) in region.row_lines.windows(2).enumerate() {
        for (col, xs) in region.column_lines.windows(2).enumerate() {
            cells.push(GridCell {
                row,
                col,
                bounding_box: BoundingBox::new(
                    xs[0],
                    ys[0],
                    xs[1].saturating_sub(xs[0]),
                    ys[1].saturating_sub(ys[0]),
                ),
            });
        }
    }
    cells
}

pub fn is_cell_empty(image: &RasterImage, bounds: &BoundingBox) -> bool {
    image.dark_ratio(&bounds.inset(BORDER_INSET)) < EMPTY_INK_RATIO
}

/// Find cells that absorb empty neighbors.
///
/// Cells are visited in row-major order. Only cells holding ink originate a
/// merge, and a cell absorbed once is never reused. When both the right and
/// the lower neighbor are empty the diagonal must be empty too for a 2x2
/// block; otherwise only the right neighbor is taken, keeping the merged box
/// free of foreign content.
pub fn detect_merges(
    cells: &[GridCell],
    rows: usize,
    cols: usize,
    image: &RasterImage,
) -> Vec<MergeCandidate> {
    if cells.len() != rows * cols {
        return Vec::new();
    }
    let empty: Vec<bool> = cells
        .iter()
        .map(|c| is_cell_empty(image, &c.bounding_box))
        .collect();
    let at = |r: usize, c: usize| r * cols + c;

    let mut taken: HashSet<(usize, usize)> = HashSet::new();
    let mut merges = Vec::new();

    for cell in cells {
        let (r, c) = (cell.row, cell.col);
        if empty[at(r, c)] || taken.contains(&(r, c)) {
            continue;
        }
        let free = |rr: usize, cc: usize| {
            rr < rows && cc < cols && empty[at(rr, cc)] && !taken.contains(&(rr, cc))
        };

        let right = free(r, c + 1);
        let below = free(r + 1, c);
        let absorbed: Vec<(usize, usize)> = match (right, below) {
            (true, true) if free(r + 1, c + 1) => vec![(r, c + 1), (r + 1, c), (r + 1, c + 1)],
            (true, _) => vec![(r, c + 1)],
            (false, true) => vec![(r + 1, c)],
            (false, false) => continue,
        };

        let merged_box = absorbed
            .iter()
            .fold(cell.bounding_box, |acc, &(rr, cc)| {
                acc.union(&cells[at(rr, cc)].bounding_box)
            });
        let col_span = 1 + usize::from(absorbed.iter().any(|&(_, cc)| cc > c));
        let row_span = 1 + usize::from(absorbed.iter().any(|&(rr, _)| rr > r));

        taken.insert((r, c));
        taken.extend(absorbed.iter().copied());
        merges.push(MergeCandidate {
            origin: *cell,
            absorbed,
            merged_box,
            col_span,
            row_span,
        });
    }
    merges
}

/// Cells to resolve for a region: grid cells minus absorbed ones, with merged
/// bounds and spans applied.
pub fn plan_cells(
    region: &TableRegion,
    image: &RasterImage,
    config: &ExtractionConfig,
) -> Vec<CellPlan> {
    let grid = build_grid(region);
    let merges = if config.handle_merged_cells {
        detect_merges(&grid, region.row_count(), region.column_count(), image)
    } else {
        Vec::new()
    };

    let absorbed: HashSet<(usize, usize)> = merges
        .iter()
        .flat_map(|m| m.absorbed.iter().copied())
        .collect();

    let plans: Vec<CellPlan> = grid
        .iter()
        .filter(|cell| !absorbed.contains(&(cell.row, cell.col)))
        .map(|cell| {
            match merges
                .iter()
                .find(|m| (m.origin.row, m.origin.col) == (cell.row, cell.col))
            {
                Some(m) => CellPlan {
                    cell: *cell,
                    bounds: m.merged_box,
                    col_span: m.col_span,
                    row_span: m.row_span,
                },
                None => CellPlan {
                    cell: *cell,
                    bounds: cell.bounding_box,
                    col_span: 1,
                    row_span: 1,
                },
            }
        })
        .collect();

    debug!(
        grid_cells = grid.len(),
        merges = merges.len(),
        planned = plans.len(),
        "Cell grid built"
    );
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::raster::testing::*;
    use crate::pipeline::extraction::types::{BorderStyle, DetectedLine, LineKind};

    fn region(xs: &[u32], ys: &[u32]) -> TableRegion {
        let (x0, x1) = (xs[0], xs[xs.len() - 1]);
        let (y0, y1) = (ys[0], ys[ys.len() - 1]);
        TableRegion {
            bounding_box: BoundingBox::new(x0, y0, x1 - x0, y1 - y0),
            top: DetectedLine::horizontal(LineKind::Explicit, y0, x0, x1, 1.0),
            bottom: DetectedLine::horizontal(LineKind::Explicit, y1, x0, x1, 1.0),
            left: DetectedLine::vertical(LineKind::Explicit, x0, y0, y1, 1.0),
            right: DetectedLine::vertical(LineKind::Explicit, x1, y0, y1, 1.0),
            row_lines: ys.to_vec(),
            column_lines: xs.to_vec(),
            confidence: 1.0,
            border_style: BorderStyle::Explicit,
        }
    }

    const XS: [u32; 4] = [20, 100, 180, 260];
    const YS: [u32; 4] = [20, 60, 100, 140];

    #[test]
    fn grid_has_one_cell_per_line_pair() {
        let cells = build_grid(&region(&XS, &YS));
        assert_eq!(cells.len(), 9);
        assert_eq!(cells[0].bounding_box, BoundingBox::new(20, 20, 80, 40));
        assert_eq!((cells[5].row, cells[5].col), (1, 2));
        assert_eq!(cells[8].bounding_box, BoundingBox::new(180, 100, 80, 40));
    }

    #[test]
    fn ruling_alone_does_not_make_a_cell_full() {
        let img = Canvas::new(300, 200).grid(&XS, &YS).build();
        let cells = build_grid(&region(&XS, &YS));
        assert!(cells.iter().all(|c| is_cell_empty(&img, &c.bounding_box)));
    }

    #[test]
    fn ink_makes_cell_full() {
        let img = Canvas::new(300, 200).grid(&XS, &YS).ink(30, 30, 40, 20).build();
        let cells = build_grid(&region(&XS, &YS));
        assert!(!is_cell_empty(&img, &cells[0].bounding_box));
        assert!(is_cell_empty(&img, &cells[1].bounding_box));
    }

    #[test]
    fn full_grid_has_no_merges() {
        let mut canvas = Canvas::new(300, 200);
        canvas.grid(&XS, &YS);
        for &y in &YS[..3] {
            for &x in &XS[..3] {
                canvas.ink(x + 10, y + 10, 30, 15);
            }
        }
        let img = canvas.build();
        let cells = build_grid(&region(&XS, &YS));
        assert!(detect_merges(&cells, 3, 3, &img).is_empty());
    }

    #[test]
    fn empty_right_neighbor_is_absorbed() {
        // Row 0: [ink][empty][ink]; rows 1-2 full.
        let mut canvas = Canvas::new(300, 200);
        canvas.grid(&XS, &YS);
        for (r, &y) in YS[..3].iter().enumerate() {
            for (c, &x) in XS[..3].iter().enumerate() {
                if !(r == 0 && c == 1) {
                    canvas.ink(x + 10, y + 10, 30, 15);
                }
            }
        }
        let img = canvas.build();
        let cells = build_grid(&region(&XS, &YS));
        let merges = detect_merges(&cells, 3, 3, &img);
        assert_eq!(merges.len(), 1);
        let m = &merges[0];
        assert_eq!((m.origin.row, m.origin.col), (0, 0));
        assert_eq!(m.absorbed, vec![(0, 1)]);
        assert_eq!((m.col_span, m.row_span), (2, 1));
        assert_eq!(m.merged_box, BoundingBox::new(20, 20, 160, 40));
    }

    #[test]
    fn empty_block_merges_two_by_two() {
        // Only the top-left cell holds ink.
        let img = Canvas::new(300, 200)
            .grid(&XS[..3], &YS[..3])
            .ink(30, 30, 40, 20)
            .build();
        let r = region(&XS[..3], &YS[..3]);
        let cells = build_grid(&r);
        let merges = detect_merges(&cells, 2, 2, &img);
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].absorbed.len(), 3);
        assert_eq!((merges[0].col_span, merges[0].row_span), (2, 2));

        let plans = plan_cells(&r, &img, &ExtractionConfig::default());
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].bounds, BoundingBox::new(20, 20, 160, 80));
    }

    #[test]
    fn filled_diagonal_limits_merge_to_right() {
        let img = Canvas::new(300, 200)
            .grid(&XS[..3], &YS[..3])
            .ink(30, 30, 40, 20)
            .ink(110, 70, 40, 20)
            .build();
        let cells = build_grid(&region(&XS[..3], &YS[..3]));
        let merges = detect_merges(&cells, 2, 2, &img);
        assert_eq!(merges[0].absorbed, vec![(0, 1)]);
        // Lower-left is empty and never originates a merge.
        assert_eq!(merges.len(), 1);
    }

    #[test]
    fn merge_handling_can_be_disabled() {
        let img = Canvas::new(300, 200)
            .grid(&XS[..3], &YS[..3])
            .ink(30, 30, 40, 20)
            .build();
        let r = region(&XS[..3], &YS[..3]);
        let config = ExtractionConfig::default().with_merged_cells(false);
        let plans = plan_cells(&r, &img, &config);
        assert_eq!(plans.len(), 4);
        assert!(plans.iter().all(|p| p.col_span == 1 && p.row_span == 1));
    }

    #[test]
    fn mismatched_dimensions_yield_no_merges() {
        let cells = build_grid(&region(&XS, &YS));
        assert!(detect_merges(&cells, 2, 2, &RasterImage::empty()).is_empty());
    }
}
