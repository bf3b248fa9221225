//! Raster scanning for ruling lines and text-dense tiles.
//!
//! Lines are found by sampling every other pixel row (or column) and keeping
//! dark runs longer than 30% of the page dimension. Rules thicker than the
//! sampling stride show up on several sampled rows; those runs are collapsed
//! back into a single line.

use tracing::debug;

use super::raster::RasterImage;
use super::types::{BoundingBox, DetectedLine, LineKind, TextRegion};

/// Sample every Nth row/column.
const SCAN_STRIDE: u32 = 2;

/// Minimum run length as a fraction of the page dimension.
const MIN_LINE_FRACTION: f32 = 0.30;

/// Side of the square tiles used for text density.
pub const TILE_SIZE: u32 = 20;

/// Tiles sparser than this are background.
const TEXT_DENSITY_MIN: f32 = 0.10;

/// Tiles denser than this are solid fills or rules.
const TEXT_DENSITY_MAX: f32 = 0.70;

/// Find horizontal ruling lines.
pub fn detect_horizontal_lines(image: &RasterImage) -> Vec<DetectedLine> {
    if image.is_empty() {
        return Vec::new();
    }
    let (width, height) = (image.width(), image.height());
    let mut lines = Vec::new();
    for y in (0..height).step_by(SCAN_STRIDE as usize) {
        scan_runs(width, |x| image.is_dark(x, y), |start, end| {
            if let Some(confidence) = qualify_run(end - start, width) {
                lines.push(DetectedLine::horizontal(LineKind::Explicit, y, start, end, confidence));
            }
        });
    }
    let lines = collapse_parallel(lines);
    debug!(count = lines.len(), "Horizontal lines detected");
    lines
}

/// Find vertical ruling lines.
pub fn detect_vertical_lines(image: &RasterImage) -> Vec<DetectedLine> {
    if image.is_empty() {
        return Vec::new();
    }
    let (width, height) = (image.width(), image.height());
    let mut lines = Vec::new();
    for x in (0..width).step_by(SCAN_STRIDE as usize) {
        scan_runs(height, |y| image.is_dark(x, y), |start, end| {
            if let Some(confidence) = qualify_run(end - start, height) {
                lines.push(DetectedLine::vertical(LineKind::Explicit, x, start, end, confidence));
            }
        });
    }
    let lines = collapse_parallel(lines);
    debug!(count = lines.len(), "Vertical lines detected");
    lines
}

/// Find 20x20 tiles whose ink density looks like text.
///
/// Partial tiles at the right and bottom edges are ignored, so a page smaller
/// than one tile yields nothing.
pub fn detect_text_regions(image: &RasterImage) -> Vec<TextRegion> {
    if image.is_empty() {
        return Vec::new();
    }
    let mut regions = Vec::new();
    let mut y = 0;
    while y + TILE_SIZE <= image.height() {
        let mut x = 0;
        while x + TILE_SIZE <= image.width() {
            let tile = BoundingBox::new(x, y, TILE_SIZE, TILE_SIZE);
            let density = image.dark_ratio(&tile);
            if density > TEXT_DENSITY_MIN && density < TEXT_DENSITY_MAX {
                regions.push(TextRegion {
                    bounding_box: tile,
                    density,
                });
            }
            x += TILE_SIZE;
        }
        y += TILE_SIZE;
    }
    debug!(count = regions.len(), "Text regions detected");
    regions
}

/// Walk `0..len`, reporting every maximal run where `is_dark` holds.
fn scan_runs(len: u32, is_dark: impl Fn(u32) -> bool, mut on_run: impl FnMut(u32, u32)) {
    let mut run_start: Option<u32> = None;
    for i in 0..=len {
        let dark = i < len && is_dark(i);
        match (dark, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                on_run(start, i);
                run_start = None;
            }
            _ => {}
        }
    }
}

/// Confidence for a run, or `None` when it is too short to be a rule.
fn qualify_run(run: u32, extent: u32) -> Option<f32> {
    if (run as f32) > extent as f32 * MIN_LINE_FRACTION {
        Some((run as f32 / extent as f32).min(1.0))
    } else {
        None
    }
}

/// Merge runs of the same rule seen on consecutive sampled rows/columns.
///
/// Input must be ordered by position. The first position is kept, spans are
/// unioned and the best confidence wins.
fn collapse_parallel(lines: Vec<DetectedLine>) -> Vec<DetectedLine> {
    let mut merged: Vec<(DetectedLine, u32)> = Vec::new();
    for line in lines {
        let existing = merged.iter_mut().find(|(m, last)| {
            m.orientation == line.orientation
                && line.position.saturating_sub(*last) <= SCAN_STRIDE
                && line.overlap(m.start, m.end) > 0
        });
        match existing {
            Some((m, last)) => {
                m.start = m.start.min(line.start);
                m.end = m.end.max(line.end);
                m.confidence = m.confidence.max(line.confidence);
                *last = line.position;
            }
            None => merged.push((line, line.position)),
        }
    }
    merged.into_iter().map(|(line, _)| line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::raster::testing::*;
    use crate::pipeline::extraction::types::Orientation;

    #[test]
    fn uniform_gray_has_no_lines() {
        let img = Canvas::filled(200, 120, LIGHT_GRAY).build();
        assert!(detect_horizontal_lines(&img).is_empty());
        assert!(detect_vertical_lines(&img).is_empty());
    }

    #[test]
    fn empty_image_yields_nothing() {
        let img = RasterImage::empty();
        assert!(detect_horizontal_lines(&img).is_empty());
        assert!(detect_vertical_lines(&img).is_empty());
        assert!(detect_text_regions(&img).is_empty());
    }

    #[test]
    fn full_width_stripe_is_one_line() {
        let img = Canvas::new(200, 100).hline(40, 0, 200).build();
        let lines = detect_horizontal_lines(&img);
        assert_eq!(lines.len(), 1);
        let line = lines[0];
        assert_eq!(line.position, 40);
        assert_eq!((line.start, line.end), (0, 200));
        assert!((line.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(line.kind, LineKind::Explicit);
    }

    #[test]
    fn thick_rule_collapses_to_one_line() {
        let img = Canvas::new(200, 100).fill_rect(0, 30, 200, 7, BLACK).build();
        let lines = detect_horizontal_lines(&img);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].position, 30);
    }

    #[test]
    fn short_runs_are_ignored() {
        // 50px of a 200px wide page is below the 30% cut.
        let img = Canvas::new(200, 100).hline(40, 10, 60).build();
        assert!(detect_horizontal_lines(&img).is_empty());
    }

    #[test]
    fn partial_rule_confidence_is_fractional() {
        let img = Canvas::new(200, 100).hline(20, 0, 100).build();
        let lines = detect_horizontal_lines(&img);
        assert_eq!(lines.len(), 1);
        assert!((lines[0].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn separate_rules_stay_separate() {
        let img = Canvas::new(200, 100)
            .hline(20, 0, 200)
            .hline(60, 0, 200)
            .build();
        let positions: Vec<u32> = detect_horizontal_lines(&img).iter().map(|l| l.position).collect();
        assert_eq!(positions, vec![20, 60]);
    }

    #[test]
    fn vertical_rule_detected() {
        let img = Canvas::new(100, 200).vline(50, 10, 190).build();
        let lines = detect_vertical_lines(&img);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].orientation, Orientation::Vertical);
        assert_eq!(lines[0].position, 50);
        assert_eq!((lines[0].start, lines[0].end), (10, 190));
        assert!((lines[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn text_tiles_within_density_band() {
        let img = Canvas::new(60, 20)
            .ink(0, 0, 20, 6) // 30% of tile 0
            .ink(20, 0, 20, 20) // solid tile 1
            .build();
        let regions = detect_text_regions(&img);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounding_box, BoundingBox::new(0, 0, 20, 20));
    }

    #[test]
    fn image_smaller_than_tile_has_no_regions() {
        let img = Canvas::new(15, 15).ink(0, 0, 5, 15).build();
        assert!(detect_text_regions(&img).is_empty());
    }
}
