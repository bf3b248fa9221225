//! CSV and JSON renderings of reconstructed tables.

use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::extraction::types::{BoundingBox, ReconstructedTable, TableCell};

/// Header line followed by one line per body row.
///
/// Slots covered by a merged cell are never emitted, so a row with a
/// spanning cell has fewer fields than the header line.
pub fn to_csv(table: &ReconstructedTable) -> String {
    let mut output = String::new();

    let header_line: Vec<String> = table.headers.iter().map(|h| escape_csv_field(h)).collect();
    output.push_str(&header_line.join(","));
    output.push('\n');

    for row in &table.rows {
        let fields: Vec<String> = exported_cells(row)
            .map(|cell| escape_csv_field(&cell.text))
            .collect();
        output.push_str(&fields.join(","));
        output.push('\n');
    }

    output
}

fn escape_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn exported_cells(row: &[TableCell]) -> impl Iterator<Item = &TableCell> {
    row.iter().filter(|cell| cell.col_span > 0 && cell.row_span > 0)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableExport<'a> {
    id: Uuid,
    page: usize,
    bounding_box: BoundingBox,
    confidence: f32,
    headers: &'a [String],
    cells: Vec<CellExport<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CellExport<'a> {
    row: usize,
    col: usize,
    col_span: usize,
    row_span: usize,
    content: &'a str,
    confidence: f32,
    is_header: bool,
}

/// Pretty-printed JSON with position, span, content and confidence per cell.
///
/// Body rows are numbered from 1; row 0 is the header row.
pub fn to_json(table: &ReconstructedTable) -> Result<String, serde_json::Error> {
    let cells = table
        .rows
        .iter()
        .flat_map(|row| exported_cells(row))
        .map(|cell| CellExport {
            row: cell.row,
            col: cell.col,
            col_span: cell.col_span,
            row_span: cell.row_span,
            content: &cell.text,
            confidence: cell.confidence,
            is_header: cell.is_header,
        })
        .collect();

    let export = TableExport {
        id: table.id,
        page: table.page,
        bounding_box: table.bounding_box,
        confidence: table.confidence,
        headers: &table.headers,
        cells,
    };

    serde_json::to_string_pretty(&export)
}
