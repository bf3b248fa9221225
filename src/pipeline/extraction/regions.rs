use tracing::debug;

use super::types::{BorderStyle, BoundingBox, DetectedLine, LineKind, TableRegion};
use crate::pipeline_config::ExtractionConfig;

/// Slack, in pixels, when matching line ends and positions.
pub const LINE_TOLERANCE: u32 = 3;

/// Assemble table regions from horizontal and vertical lines.
///
/// Every top/bottom pair of horizontal lines is tried, bottoms farthest
/// first, and closed by the leftmost and rightmost vertical lines spanning
/// both. Regions smaller than the minimum cell size, or contained in a region
/// already accepted, are dropped. The first `max_tables_per_page` survivors
/// are kept in scan order.
pub fn assemble_regions(
    horizontal: &[DetectedLine],
    vertical: &[DetectedLine],
    config: &ExtractionConfig,
) -> Vec<TableRegion> {
    let mut rows: Vec<DetectedLine> = horizontal.to_vec();
    rows.sort_by_key(|l| (l.position, l.start));

    let mut regions: Vec<TableRegion> = Vec::new();
    let mut undersized = 0usize;

    for (i, top) in rows.iter().enumerate() {
        for bottom in rows[i + 1..].iter().rev() {
            if bottom.position <= top.position + LINE_TOLERANCE {
                continue;
            }
            let span_start = top.start.max(bottom.start);
            let span_end = top.end.min(bottom.end);
            if span_end <= span_start {
                continue;
            }

            let sides: Vec<&DetectedLine> = vertical
                .iter()
                .filter(|v| {
                    v.start <= top.position + LINE_TOLERANCE
                        && v.end + LINE_TOLERANCE >= bottom.position
                        && v.position + LINE_TOLERANCE >= span_start
                        && v.position <= span_end + LINE_TOLERANCE
                })
                .collect();
            if sides.len() < 2 {
                continue;
            }
            let (Some(left), Some(right)) = (
                sides.iter().min_by_key(|v| v.position),
                sides.iter().max_by_key(|v| v.position),
            ) else {
                continue;
            };
            if right.position <= left.position {
                continue;
            }

            let bounding_box = BoundingBox::new(
                left.position,
                top.position,
                right.position - left.position,
                bottom.position - top.position,
            );
            if bounding_box.width < config.minimum_cell_size.width
                || bounding_box.height < config.minimum_cell_size.height
            {
                undersized += 1;
                continue;
            }
            if regions
                .iter()
                .any(|r| r.bounding_box.contains(&bounding_box, LINE_TOLERANCE))
            {
                continue;
            }

            regions.push(build_region(bounding_box, *top, *bottom, **left, **right, &rows, vertical));
        }
    }

    let found = regions.len();
    regions.truncate(config.max_tables_per_page);
    debug!(
        found,
        kept = regions.len(),
        undersized,
        "Table regions assembled"
    );
    regions
}

fn build_region(
    bounding_box: BoundingBox,
    top: DetectedLine,
    bottom: DetectedLine,
    left: DetectedLine,
    right: DetectedLine,
    horizontal: &[DetectedLine],
    vertical: &[DetectedLine],
) -> TableRegion {
    let inner_rows = interior_lines(
        horizontal,
        top.position,
        bottom.position,
        left.position,
        right.position,
    );
    let inner_cols = interior_lines(
        vertical,
        left.position,
        right.position,
        top.position,
        bottom.position,
    );

    let kinds = [top.kind, bottom.kind, left.kind, right.kind]
        .into_iter()
        .chain(inner_rows.iter().map(|l| l.kind))
        .chain(inner_cols.iter().map(|l| l.kind));
    let border_style = BorderStyle::from_kinds(kinds);

    let confidence = (top.confidence + bottom.confidence + left.confidence + right.confidence) / 4.0;

    TableRegion {
        bounding_box,
        top,
        bottom,
        left,
        right,
        row_lines: boundaries(top.position, &inner_rows, bottom.position),
        column_lines: boundaries(left.position, &inner_cols, right.position),
        confidence,
        border_style,
    }
}

/// Lines strictly between `lo` and `hi` that cross the region's other axis.
///
/// Ruled lines win: implicit lines are only used when no explicit line of
/// that orientation falls inside the region.
fn interior_lines(
    lines: &[DetectedLine],
    lo: u32,
    hi: u32,
    cross_start: u32,
    cross_end: u32,
) -> Vec<DetectedLine> {
    let inside: Vec<DetectedLine> = lines
        .iter()
        .filter(|l| {
            l.position > lo + LINE_TOLERANCE
                && l.position + LINE_TOLERANCE < hi
                && l.overlap(cross_start, cross_end) > 0
        })
        .copied()
        .collect();
    let explicit: Vec<DetectedLine> = inside
        .iter()
        .filter(|l| l.kind == LineKind::Explicit)
        .copied()
        .collect();
    if explicit.is_empty() {
        inside
    } else {
        explicit
    }
}

/// Sorted boundary coordinates with near-duplicates removed.
fn boundaries(first: u32, interior: &[DetectedLine], last: u32) -> Vec<u32> {
    let mut positions: Vec<u32> = interior.iter().map(|l| l.position).collect();
    positions.sort_unstable();

    let mut out = vec![first];
    for pos in positions {
        if out.last().is_some_and(|prev| pos <= prev + LINE_TOLERANCE) {
            continue;
        }
        out.push(pos);
    }
    if out.last().is_some_and(|prev| last <= prev + LINE_TOLERANCE) {
        out.pop();
    }
    out.push(last);
    out
}
