use chrono::Utc;
use uuid::Uuid;

use super::scoring::{header_similarity, score_pair};
use super::types::{AppliedMerge, MergeOutcome, MergeScore, MergeType};
use super::MergeError;
use crate::pipeline::extraction::reconstruct::placeholder_header;
use crate::pipeline::extraction::types::{
    BorderStyle, ReconstructedTable, TableCell, TableMetadata,
};
use crate::pipeline_config::MergeConfig;

/// Candidates must score above this to be merged.
pub const MIN_MERGE_SCORE: f32 = 0.5;

/// Score every pair and keep those worth merging, best first.
///
/// A pair whose scoring fails is logged and left out; the rest of the batch
/// is unaffected.
pub fn find_merge_candidates(tables: &[ReconstructedTable], config: &MergeConfig) -> Vec<MergeScore> {
    let mut candidates = Vec::new();
    for (i, a) in tables.iter().enumerate() {
        for (j, b) in tables.iter().enumerate().skip(i + 1) {
            match score_pair(i, a, j, b, config) {
                Ok(Some(score)) if score.merge_score > MIN_MERGE_SCORE => candidates.push(score),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(first = %a.id, second = %b.id, error = %e, "Skipping table pair");
                }
            }
        }
    }
    candidates.sort_by(|x, y| {
        y.merge_score
            .total_cmp(&x.merge_score)
            .then_with(|| (x.first, x.second).cmp(&(y.first, y.second)))
    });
    candidates
}

/// Run one greedy merge pass.
///
/// Candidates are applied best first; a table takes part in at most one merge
/// per pass. The merged table replaces the earlier of its two sources in the
/// output order, the later source is removed. Unmerged tables pass through
/// untouched.
pub fn merge_tables(tables: Vec<ReconstructedTable>, config: &MergeConfig) -> MergeOutcome {
    let _span = tracing::info_span!("merge_tables", tables = tables.len()).entered();

    let candidates = find_merge_candidates(&tables, config);
    let mut slots: Vec<Option<ReconstructedTable>> = tables.into_iter().map(Some).collect();
    let mut used = vec![false; slots.len()];
    let mut merges = Vec::new();

    for candidate in &candidates {
        let (i, j) = (candidate.first, candidate.second);
        if used[i] || used[j] {
            continue;
        }
        let (Some(first), Some(second)) = (&slots[i], &slots[j]) else {
            continue;
        };
        match apply_merge(first, second, candidate.merge_type, config) {
            Ok(merged) => {
                tracing::debug!(
                    first = %candidate.first_id,
                    second = %candidate.second_id,
                    merge_type = ?candidate.merge_type,
                    score = candidate.merge_score,
                    "Tables merged"
                );
                merges.push(AppliedMerge {
                    merged_id: merged.id,
                    source_ids: [candidate.first_id, candidate.second_id],
                    merge_type: candidate.merge_type,
                    merge_score: candidate.merge_score,
                });
                let (keep, drop) = (i.min(j), i.max(j));
                slots[keep] = Some(merged);
                slots[drop] = None;
                used[i] = true;
                used[j] = true;
            }
            Err(e) => {
                tracing::warn!(
                    first = %candidate.first_id,
                    second = %candidate.second_id,
                    error = %e,
                    "Merge failed, tables left separate"
                );
            }
        }
    }

    let tables: Vec<ReconstructedTable> = slots.into_iter().flatten().collect();
    tracing::info!(
        candidates = candidates.len(),
        merged = merges.len(),
        tables_out = tables.len(),
        "Merge pass complete"
    );
    MergeOutcome { tables, merges }
}

/// Combine two tables. `first` precedes `second` in reading order.
///
/// Continuation merges are stacked like vertical merges. Only a continuation
/// drops a leading body row of `second` that repeats `first`'s headers; a
/// vertical merge keeps every body row of both tables.
pub fn apply_merge(
    first: &ReconstructedTable,
    second: &ReconstructedTable,
    merge_type: MergeType,
    config: &MergeConfig,
) -> Result<ReconstructedTable, MergeError> {
    match merge_type {
        MergeType::Vertical => merge_vertical(first, second, config, false),
        MergeType::Continuation => merge_vertical(first, second, config, true),
        MergeType::Horizontal => Ok(merge_horizontal(first, second)),
    }
}

fn merge_vertical(
    first: &ReconstructedTable,
    second: &ReconstructedTable,
    config: &MergeConfig,
    strip_repeated_header: bool,
) -> Result<ReconstructedTable, MergeError> {
    let (ca, cb) = (first.column_count(), second.column_count());
    if ca.abs_diff(cb) > 1 {
        return Err(MergeError::IncompatibleTables(format!(
            "{ca} and {cb} columns cannot be stacked"
        )));
    }
    let width = ca.max(cb);
    let headers: Vec<String> = (0..width)
        .map(|c| {
            first
                .headers
                .get(c)
                .or_else(|| second.headers.get(c))
                .cloned()
                .unwrap_or_else(|| placeholder_header(c))
        })
        .collect();

    let skip = usize::from(
        strip_repeated_header
            && second
                .rows
                .first()
                .is_some_and(|row| repeats_headers(row, &first.headers, config)),
    );
    let stacked = body_rows(first).chain(body_rows(second).skip(skip));
    let mut rows = Vec::new();
    let mut spanned_from_above = Vec::new();
    for (i, (row, spanned)) in stacked.enumerate() {
        let mut row = row.clone();
        pad_row(&mut row, width.saturating_sub(spanned));
        set_row(&mut row, i + 1);
        rows.push(row);
        spanned_from_above.push(spanned);
    }

    Ok(combine(first, second, headers, rows, spanned_from_above))
}

/// Body rows with the slots each one inherits from a row above.
fn body_rows(table: &ReconstructedTable) -> impl Iterator<Item = (&Vec<TableCell>, usize)> + '_ {
    table
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row, table.spanned_slots(i)))
}

fn merge_horizontal(first: &ReconstructedTable, second: &ReconstructedTable) -> ReconstructedTable {
    let headers: Vec<String> = first.headers.iter().chain(&second.headers).cloned().collect();
    let (ca, cb) = (first.column_count(), second.column_count());
    let count = first.rows.len().max(second.rows.len());

    let mut rows = Vec::with_capacity(count);
    let mut spanned_from_above = Vec::with_capacity(count);
    for i in 0..count {
        let (left_spanned, right_spanned) = (first.spanned_slots(i), second.spanned_slots(i));
        let mut left = first.rows.get(i).cloned().unwrap_or_default();
        pad_row(&mut left, ca.saturating_sub(left_spanned));
        let mut right = second.rows.get(i).cloned().unwrap_or_default();
        pad_row(&mut right, cb.saturating_sub(right_spanned));

        let offset = left.len();
        for cell in &mut right {
            cell.col += offset;
        }
        left.extend(right);
        set_row(&mut left, i + 1);
        rows.push(left);
        spanned_from_above.push(left_spanned + right_spanned);
    }

    combine(first, second, headers, rows, spanned_from_above)
}

/// True when a body row just repeats the header row (page-break repeat).
///
/// A row holding cells that span further down is real content, never a repeat.
fn repeats_headers(row: &[TableCell], headers: &[String], config: &MergeConfig) -> bool {
    if row.iter().any(|c| c.row_span > 1) {
        return false;
    }
    let texts: Vec<&str> = row.iter().map(|c| c.text.as_str()).collect();
    if texts.iter().all(|t| t.trim().is_empty()) {
        return false;
    }
    header_similarity(texts.as_slice(), headers, config.intelligent_header_matching)
        >= config.content_similarity_threshold
}

/// Append empty cells until the row's own cells cover `width` column slots.
fn pad_row(row: &mut Vec<TableCell>, width: usize) {
    let covered = ReconstructedTable::row_width(row);
    let bbox = row.last().map(|c| c.bounding_box).unwrap_or_default();
    let row_index = row.first().map_or(0, |c| c.row);
    for _ in covered..width {
        let mut cell = TableCell::empty(row_index, row.len(), bbox);
        cell.is_header = false;
        cell.is_implicit = true;
        row.push(cell);
    }
}

fn set_row(row: &mut [TableCell], index: usize) {
    for cell in row {
        cell.row = index;
        cell.is_header = false;
    }
}

fn combine(
    first: &ReconstructedTable,
    second: &ReconstructedTable,
    headers: Vec<String>,
    rows: Vec<Vec<TableCell>>,
    spanned_from_above: Vec<usize>,
) -> ReconstructedTable {
    let (ma, mb) = (&first.metadata, &second.metadata);
    ReconstructedTable {
        id: Uuid::new_v4(),
        page: first.page.min(second.page),
        bounding_box: first.bounding_box.union(&second.bounding_box),
        headers,
        rows,
        spanned_from_above,
        confidence: (first.confidence + second.confidence) / 2.0,
        metadata: TableMetadata {
            border_style: if ma.border_style == mb.border_style {
                ma.border_style
            } else {
                BorderStyle::Mixed
            },
            has_headers: ma.has_headers || mb.has_headers,
            extraction_method: ma.extraction_method,
            processing_ms: ma.processing_ms + mb.processing_ms,
            extracted_at: Utc::now(),
            merged_from: vec![first.id, second.id],
        },
    }
}
