//! Implicit ruling lines inferred from aligned text.
//!
//! Borderless tables still line their text up in rows and columns. Text tiles
//! sharing (within 10px) a row coordinate become an implicit horizontal line,
//! tiles sharing a column coordinate become an implicit vertical line.

use tracing::debug;

use super::types::{DetectedLine, LineKind, Orientation, TextRegion};

/// Max coordinate drift within one row/column group.
pub const ALIGNMENT_TOLERANCE: u32 = 10;

/// Group size at which an implicit line reaches full confidence.
const FULL_CONFIDENCE_GROUP: f32 = 5.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImplicitLines {
    pub horizontal: Vec<DetectedLine>,
    pub vertical: Vec<DetectedLine>,
}

/// Synthesize implicit lines from text regions.
pub fn infer_implicit_lines(regions: &[TextRegion]) -> ImplicitLines {
    let horizontal = group_aligned(regions, Orientation::Horizontal);
    let vertical = group_aligned(regions, Orientation::Vertical);
    debug!(
        horizontal = horizontal.len(),
        vertical = vertical.len(),
        "Implicit lines inferred"
    );
    ImplicitLines {
        horizontal,
        vertical,
    }
}

/// Drop implicit lines that duplicate an explicit line already on the page.
pub fn without_explicit_duplicates(
    implicit: Vec<DetectedLine>,
    explicit: &[DetectedLine],
) -> Vec<DetectedLine> {
    implicit
        .into_iter()
        .filter(|line| {
            !explicit.iter().any(|e| {
                e.orientation == line.orientation
                    && e.position.abs_diff(line.position) <= ALIGNMENT_TOLERANCE
                    && e.overlap(line.start, line.end) > 0
            })
        })
        .collect()
}

fn group_aligned(regions: &[TextRegion], orientation: Orientation) -> Vec<DetectedLine> {
    // (fixed coordinate, span start, span end) per region
    let mut keyed: Vec<(u32, u32, u32)> = regions
        .iter()
        .map(|r| {
            let b = r.bounding_box;
            match orientation {
                Orientation::Horizontal => (b.y, b.x, b.right()),
                Orientation::Vertical => (b.x, b.y, b.bottom()),
            }
        })
        .collect();
    keyed.sort_unstable();

    let mut lines = Vec::new();
    let mut i = 0;
    while i < keyed.len() {
        let anchor = keyed[i].0;
        let group_end = keyed[i..]
            .iter()
            .position(|(pos, _, _)| pos - anchor > ALIGNMENT_TOLERANCE)
            .map_or(keyed.len(), |offset| i + offset);
        let group = &keyed[i..group_end];

        if group.len() >= 2 {
            let start = group.iter().map(|g| g.1).min().unwrap_or(0);
            let end = group.iter().map(|g| g.2).max().unwrap_or(0);
            let confidence = (group.len() as f32 / FULL_CONFIDENCE_GROUP).min(1.0);
            lines.push(match orientation {
                Orientation::Horizontal => {
                    DetectedLine::horizontal(LineKind::Implicit, anchor, start, end, confidence)
                }
                Orientation::Vertical => {
                    DetectedLine::vertical(LineKind::Implicit, anchor, start, end, confidence)
                }
            });
        }
        i = group_end;
    }
    lines
}
