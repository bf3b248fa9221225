//! Pair scoring for the merge engine.
//!
//! A pair must pass the spatial gate (center distance) and the structural
//! gate (column count, headers, metadata) before it is scored:
//! `0.3 * distance + 0.5 * structure + 0.2 * alignment`.

use super::types::{AlignmentAnalysis, MergeScore, MergeType, StructuralSimilarity};
use super::MergeError;
use crate::pipeline::extraction::types::{BoundingBox, ReconstructedTable};
use crate::pipeline_config::MergeConfig;

/// Max edge offset, in pixels, for two edges to count as aligned.
const EDGE_TOLERANCE: u32 = 10;

/// Overlap ratio past which two tables share an axis.
const SHARED_AXIS_OVERLAP: f64 = 0.7;

const DISTANCE_WEIGHT: f32 = 0.3;
const STRUCTURE_WEIGHT: f32 = 0.5;
const ALIGNMENT_WEIGHT: f32 = 0.2;

/// Score a pair of tables, or `None` when a gate rejects it.
///
/// Tables on the same page follow the full spatial gate. Tables on
/// consecutive pages (when cross-page merging is on) only need their
/// horizontal centers within range and always continue each other.
pub fn score_pair(
    a_index: usize,
    a: &ReconstructedTable,
    b_index: usize,
    b: &ReconstructedTable,
    config: &MergeConfig,
) -> Result<Option<MergeScore>, MergeError> {
    for t in [a, b] {
        if t.bounding_box.is_degenerate() {
            return Err(MergeError::DegenerateBoundingBox(t.id));
        }
    }

    let page_gap = a.page.abs_diff(b.page);
    let cross_page = page_gap != 0;
    if cross_page && (!config.enable_cross_page_merging || page_gap != 1) {
        return Ok(None);
    }

    let alignment = analyze_alignment(&a.bounding_box, &b.bounding_box);
    let ((first_index, first), (second_index, second)) =
        reading_order((a_index, a), (b_index, b), &alignment);

    let (fx, fy) = first.bounding_box.center();
    let (sx, sy) = second.bounding_box.center();
    let distance = if cross_page {
        (sx - fx).abs()
    } else {
        ((sx - fx).powi(2) + (sy - fy).powi(2)).sqrt()
    };
    if distance > config.max_merge_distance {
        return Ok(None);
    }

    let structure = structural_similarity(first, second, config);
    if structure.score < config.structure_similarity_threshold {
        return Ok(None);
    }

    let merge_type = if cross_page {
        MergeType::Continuation
    } else {
        decide_merge_type(&first.bounding_box, &second.bounding_box, &alignment)
    };

    let distance_score = (1.0 - distance / config.max_merge_distance).max(0.0) as f32;
    let merge_score = DISTANCE_WEIGHT * distance_score
        + STRUCTURE_WEIGHT * structure.score
        + ALIGNMENT_WEIGHT * alignment.quality;

    Ok(Some(MergeScore {
        first: first_index,
        second: second_index,
        first_id: first.id,
        second_id: second.id,
        merge_score,
        merge_type,
        confidence: structure.confidence,
        alignment_quality: alignment.quality,
        distance,
    }))
}

/// Put the earlier table first: lower page, then left-to-right for tables
/// sitting side by side, top-to-bottom otherwise.
fn reading_order<'a>(
    a: (usize, &'a ReconstructedTable),
    b: (usize, &'a ReconstructedTable),
    alignment: &AlignmentAnalysis,
) -> ((usize, &'a ReconstructedTable), (usize, &'a ReconstructedTable)) {
    if a.1.page != b.1.page {
        return if a.1.page < b.1.page { (a, b) } else { (b, a) };
    }
    let (ax, ay) = a.1.bounding_box.center();
    let (bx, by) = b.1.bounding_box.center();
    let side_by_side = alignment.vertical_overlap > SHARED_AXIS_OVERLAP
        && alignment.horizontal_overlap <= SHARED_AXIS_OVERLAP;
    let a_first = if side_by_side {
        ax <= bx
    } else {
        (ay, ax) <= (by, bx)
    };
    if a_first {
        (a, b)
    } else {
        (b, a)
    }
}

pub fn structural_similarity(
    a: &ReconstructedTable,
    b: &ReconstructedTable,
    config: &MergeConfig,
) -> StructuralSimilarity {
    let (column_score, column_confidence) = match a.column_count().abs_diff(b.column_count()) {
        0 => (0.4, 0.3),
        1 => (0.2, 0.1),
        _ => (0.0, 0.0),
    };
    let header_similarity = header_similarity(
        a.headers.as_slice(),
        b.headers.as_slice(),
        config.intelligent_header_matching,
    );
    let metadata_similarity = metadata_similarity(a, b);

    StructuralSimilarity {
        score: (column_score + 0.4 * header_similarity + 0.2 * metadata_similarity).min(1.0),
        confidence: (column_confidence + 0.3 * header_similarity + 0.2 * metadata_similarity).min(1.0),
        column_match: column_score / 0.4,
        header_similarity,
        metadata_similarity,
    }
}

/// Mean per-position similarity of two header lists. Positions present on
/// only one side score 0.
///
/// With `intelligent` matching, each pair scores its case-insensitive
/// character-match ratio; otherwise only exact (case-insensitive) equality
/// counts.
pub fn header_similarity<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B], intelligent: bool) -> f32 {
    let positions = a.len().max(b.len());
    if positions == 0 {
        return 1.0;
    }
    let total: f32 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let (x, y) = (x.as_ref(), y.as_ref());
            if intelligent {
                char_match_ratio(x, y)
            } else if x.trim().to_lowercase() == y.trim().to_lowercase() {
                1.0
            } else {
                0.0
            }
        })
        .sum();
    total / positions as f32
}

/// Share of positions holding the same (lowercased) character, over the
/// longer string. Not an edit distance: an inserted char shifts everything.
pub fn char_match_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let same = a.iter().zip(&b).filter(|(x, y)| x == y).count();
    same as f32 / longest as f32
}

fn metadata_similarity(a: &ReconstructedTable, b: &ReconstructedTable) -> f32 {
    let (ma, mb) = (&a.metadata, &b.metadata);
    let matches = [
        ma.border_style == mb.border_style,
        ma.has_headers == mb.has_headers,
        ma.extraction_method == mb.extraction_method,
    ];
    matches.iter().filter(|m| **m).count() as f32 / matches.len() as f32
}

pub fn analyze_alignment(a: &BoundingBox, b: &BoundingBox) -> AlignmentAnalysis {
    let horizontal_overlap = overlap_ratio(a.x, a.right(), b.x, b.right());
    let vertical_overlap = overlap_ratio(a.y, a.bottom(), b.y, b.bottom());
    let left_aligned = a.x.abs_diff(b.x) <= EDGE_TOLERANCE;
    let right_aligned = a.right().abs_diff(b.right()) <= EDGE_TOLERANCE;
    let top_aligned = a.y.abs_diff(b.y) <= EDGE_TOLERANCE;
    let bottom_aligned = a.bottom().abs_diff(b.bottom()) <= EDGE_TOLERANCE;

    let axis = |overlap: f64| {
        if overlap > 0.8 {
            0.4
        } else if overlap > 0.5 {
            0.2
        } else {
            0.0
        }
    };
    let edges = [left_aligned, right_aligned, top_aligned, bottom_aligned]
        .iter()
        .filter(|e| **e)
        .count() as f32;
    let quality = (axis(horizontal_overlap) + axis(vertical_overlap) + 0.1 * edges).min(1.0);

    AlignmentAnalysis {
        horizontal_overlap,
        vertical_overlap,
        left_aligned,
        right_aligned,
        top_aligned,
        bottom_aligned,
        quality,
    }
}

/// Shared extent of `[a0, a1)` and `[b0, b1)` over the shorter of the two.
fn overlap_ratio(a0: u32, a1: u32, b0: u32, b1: u32) -> f64 {
    let shorter = (a1 - a0).min(b1 - b0);
    if shorter == 0 {
        return 0.0;
    }
    let shared = a1.min(b1).saturating_sub(a0.max(b0));
    shared as f64 / shorter as f64
}

pub fn decide_merge_type(
    first: &BoundingBox,
    second: &BoundingBox,
    alignment: &AlignmentAnalysis,
) -> MergeType {
    let (fx, fy) = first.center();
    let (sx, sy) = second.center();
    if alignment.horizontal_overlap > SHARED_AXIS_OVERLAP && sy > fy {
        MergeType::Vertical
    } else if alignment.vertical_overlap > SHARED_AXIS_OVERLAP && sx > fx {
        MergeType::Horizontal
    } else {
        MergeType::Continuation
    }
}
