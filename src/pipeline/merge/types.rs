use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::extraction::types::ReconstructedTable;

/// How two tables combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeType {
    /// Side by side: headers concatenated, rows zipped.
    Horizontal,
    /// Stacked: rows concatenated.
    Vertical,
    /// Same table continued elsewhere (next page, offset block). Merged like `Vertical`.
    Continuation,
}

/// Structural compatibility of two tables. Each component is in [0, 1];
/// `score` and `confidence` are their weighted sums.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructuralSimilarity {
    pub score: f32,
    pub confidence: f32,
    pub column_match: f32,
    pub header_similarity: f32,
    pub metadata_similarity: f32,
}

/// Geometric relation of two bounding boxes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentAnalysis {
    /// Shared x-range over the narrower width.
    pub horizontal_overlap: f64,
    /// Shared y-range over the shorter height.
    pub vertical_overlap: f64,
    pub left_aligned: bool,
    pub right_aligned: bool,
    pub top_aligned: bool,
    pub bottom_aligned: bool,
    pub quality: f32,
}

/// A scored candidate pair. Indices refer to the slice the candidates were
/// computed from; `first` precedes `second` in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeScore {
    pub first: usize,
    pub second: usize,
    pub first_id: Uuid,
    pub second_id: Uuid,
    pub merge_score: f32,
    pub merge_type: MergeType,
    pub confidence: f32,
    pub alignment_quality: f32,
    pub distance: f64,
}

/// Record of a merge that was carried out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMerge {
    pub merged_id: Uuid,
    pub source_ids: [Uuid; 2],
    pub merge_type: MergeType,
    pub merge_score: f32,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub tables: Vec<ReconstructedTable>,
    pub merges: Vec<AppliedMerge>,
}
