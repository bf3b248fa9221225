use std::sync::LazyLock;

use regex::Regex;

use super::types::TableCell;

/// Tables below this are flagged as low confidence unless the caller
/// configures another threshold.
pub const MODERATE_CONFIDENCE: f32 = 0.70;

/// Weight of the reader's own estimate in the reconciled cell confidence.
pub const READER_WEIGHT: f32 = 0.6;

/// Weight of the text heuristic in the reconciled cell confidence.
pub const HEURISTIC_WEIGHT: f32 = 0.4;

/// Structural confidence assumed when a table has no region estimate.
pub const DEFAULT_STRUCTURAL_CONFIDENCE: f32 = 0.8;

static PLAIN_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w\s\-.,;:()/]*$").expect("valid regex"));

/// Confidence derived from the recognized text alone.
///
/// Starts at 0.5: +0.2 above 3 chars, +0.1 above 10 chars, +0.2 when any
/// alphanumeric is present, +0.1 when only word characters, whitespace and
/// common punctuation appear. Capped at 1.0. Blank text scores 0.
pub fn heuristic_text_confidence(text: &str) -> f32 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }
    let len = text.chars().count();
    let mut score: f32 = 0.5;
    if len > 3 {
        score += 0.2;
    }
    if len > 10 {
        score += 0.1;
    }
    if text.chars().any(char::is_alphanumeric) {
        score += 0.2;
    }
    if PLAIN_TEXT_RE.is_match(text) {
        score += 0.1;
    }
    score.min(1.0)
}

/// Final cell confidence: weighted average of the reader's estimate and the
/// text heuristic, clamped to [0, 1].
pub fn reconcile_cell_confidence(reader: f32, heuristic: f32) -> f32 {
    let reader = if reader.is_finite() { reader.clamp(0.0, 1.0) } else { 0.0 };
    (READER_WEIGHT * reader + HEURISTIC_WEIGHT * heuristic).clamp(0.0, 1.0)
}

/// Table confidence: mean of the positive cell confidences, averaged with the
/// structural confidence of the region (0.8 when unknown).
pub fn table_confidence<'a, I>(cells: I, structural: Option<f32>) -> f32
where
    I: IntoIterator<Item = &'a TableCell>,
{
    let (sum, count) = cells
        .into_iter()
        .filter(|c| c.confidence > 0.0)
        .fold((0.0f32, 0usize), |(s, n), c| (s + c.confidence, n + 1));
    let cell_mean = if count == 0 { 0.0 } else { sum / count as f32 };
    (cell_mean + structural.unwrap_or(DEFAULT_STRUCTURAL_CONFIDENCE)) / 2.0
}
