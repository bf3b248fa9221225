use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tracing::Instrument;

use super::cell_grid::plan_cells;
use super::cell_reader::CellContentResolver;
use super::implicit_lines::{infer_implicit_lines, without_explicit_duplicates};
use super::line_detect::{detect_horizontal_lines, detect_text_regions, detect_vertical_lines};
use super::raster::RasterImage;
use super::reconstruct::reconstruct_table;
use super::regions::assemble_regions;
use super::types::{
    CellTextReader, ExtractionWarning, PageExtraction, ReconstructedTable, TableRegion,
};
use super::ExtractionError;
use crate::pipeline::merge::{merge_tables, AppliedMerge};
use crate::pipeline_config::{ExtractionConfig, MergeConfig};

/// Lines, implicit lines and region assembly for one page.
pub fn detect_table_regions(image: &RasterImage, config: &ExtractionConfig) -> Vec<TableRegion> {
    if image.is_empty() {
        return Vec::new();
    }
    let mut horizontal = detect_horizontal_lines(image);
    let mut vertical = detect_vertical_lines(image);

    if config.detect_implicit_lines {
        let implicit = infer_implicit_lines(&detect_text_regions(image));
        let implicit_h = without_explicit_duplicates(implicit.horizontal, &horizontal);
        let implicit_v = without_explicit_duplicates(implicit.vertical, &vertical);
        horizontal.extend(implicit_h);
        vertical.extend(implicit_v);
    }

    assemble_regions(&horizontal, &vertical, config)
}

/// Tables of a multi-page document, after merging.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentExtraction {
    /// Per-page reports, tables as extracted before merging.
    pub pages: Vec<PageExtraction>,
    /// Every table of the document after one merge pass.
    pub tables: Vec<ReconstructedTable>,
    pub merges: Vec<AppliedMerge>,
}

/// Table extraction pipeline.
/// Holds the cell-text reader as a trait object, enabling dependency injection.
pub struct TableExtractor {
    reader: Arc<dyn CellTextReader>,
}

impl TableExtractor {
    pub fn new(reader: Arc<dyn CellTextReader>) -> Self {
        Self { reader }
    }

    /// Extract every table on one page.
    ///
    /// Only an invalid configuration fails the call. A table whose
    /// reconstruction fails is logged and skipped; the others still come back.
    pub async fn extract_page(
        &self,
        image: &RasterImage,
        page: usize,
        config: &ExtractionConfig,
    ) -> Result<PageExtraction, ExtractionError> {
        config.validate()?;
        let span = tracing::info_span!("extract_page", page);
        self.extract_page_inner(image, page, config).instrument(span).await
    }

    /// Tables of a single-page image.
    pub async fn extract_tables(
        &self,
        image: &RasterImage,
        config: &ExtractionConfig,
    ) -> Result<Vec<ReconstructedTable>, ExtractionError> {
        Ok(self.extract_page(image, 0, config).await?.tables)
    }

    /// Extract every page, then merge tables across the whole document.
    pub async fn extract_document(
        &self,
        pages: &[RasterImage],
        extraction: &ExtractionConfig,
        merge: &MergeConfig,
    ) -> Result<DocumentExtraction, ExtractionError> {
        extraction.validate()?;
        merge.validate()?;

        let reports = join_all(
            pages
                .iter()
                .enumerate()
                .map(|(page, image)| self.extract_page(image, page, extraction)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        let tables: Vec<ReconstructedTable> = reports
            .iter()
            .flat_map(|p| p.tables.iter().cloned())
            .collect();
        let outcome = merge_tables(tables, merge);

        tracing::info!(
            pages = reports.len(),
            tables = outcome.tables.len(),
            merges = outcome.merges.len(),
            "Document extraction complete"
        );

        Ok(DocumentExtraction {
            pages: reports,
            tables: outcome.tables,
            merges: outcome.merges,
        })
    }

    async fn extract_page_inner(
        &self,
        image: &RasterImage,
        page: usize,
        config: &ExtractionConfig,
    ) -> Result<PageExtraction, ExtractionError> {
        let started = Instant::now();

        if image.is_empty() {
            tracing::warn!(page, "Empty page image, nothing to extract");
            return Ok(PageExtraction {
                page,
                tables: Vec::new(),
                regions_detected: 0,
                failed_tables: 0,
                warnings: vec![ExtractionWarning::EmptyImage],
                duration_ms: 0,
            });
        }

        tracing::info!(
            page,
            width = image.width(),
            height = image.height(),
            "Starting table extraction"
        );

        let regions = detect_table_regions(image, config);
        let resolver =
            CellContentResolver::new(self.reader.clone(), Duration::from_millis(config.cell_read_timeout_ms));

        let outcomes = join_all(
            regions
                .iter()
                .map(|region| extract_region(&resolver, image, region, page, config)),
        )
        .await;

        let report = page_report(page, &regions, outcomes, config, started);

        tracing::info!(
            page,
            regions = report.regions_detected,
            tables = report.tables.len(),
            failed = report.failed_tables,
            quality = ?report.quality(),
            duration_ms = report.duration_ms,
            "Table extraction complete"
        );

        Ok(report)
    }
}

/// Fold per-region outcomes into a page report. A failed region is logged and
/// counted; it never takes the page's other tables down with it.
fn page_report(
    page: usize,
    regions: &[TableRegion],
    outcomes: Vec<Result<(ReconstructedTable, usize), ExtractionError>>,
    config: &ExtractionConfig,
    started: Instant,
) -> PageExtraction {
    let mut tables = Vec::new();
    let mut warnings = Vec::new();
    let mut failed_tables = 0;

    for (region, outcome) in regions.iter().zip(outcomes) {
        match outcome {
            Ok((table, degraded)) => {
                if degraded > 0 {
                    warnings.push(ExtractionWarning::DegradedCells {
                        table_id: table.id,
                        count: degraded,
                    });
                }
                if table.confidence < config.confidence_threshold {
                    warnings.push(ExtractionWarning::LowConfidenceTable {
                        table_id: table.id,
                        confidence: table.confidence,
                    });
                }
                tables.push(table);
            }
            Err(e) => {
                tracing::warn!(
                    page,
                    region = ?region.bounding_box,
                    error = %e,
                    "Table reconstruction failed, skipping table"
                );
                failed_tables += 1;
                warnings.push(ExtractionWarning::TableSkipped {
                    region: region.bounding_box,
                    reason: e.to_string(),
                });
            }
        }
    }

    PageExtraction {
        page,
        tables,
        regions_detected: regions.len(),
        failed_tables,
        warnings,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Grid, cell contents and reconstruction for one region.
/// Returns the table and the number of degraded cells.
async fn extract_region(
    resolver: &CellContentResolver,
    image: &RasterImage,
    region: &TableRegion,
    page: usize,
    config: &ExtractionConfig,
) -> Result<(ReconstructedTable, usize), ExtractionError> {
    let started = Instant::now();
    let plans = plan_cells(region, image, config);
    let resolved = resolver.resolve_all(image, &plans).await;
    let table = reconstruct_table(
        region,
        resolved.cells,
        page,
        started.elapsed().as_millis() as u64,
    )?;
    Ok((table, resolved.degraded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::cell_reader::mocks::*;
    use crate::pipeline::extraction::raster::testing::*;
    use crate::pipeline::export::to_json;
    use crate::pipeline::extraction::types::{
        BoundingBox, ExtractionQuality, StaticCellReader, TableCell,
    };
    use crate::pipeline_config::ConfigError;

    const XS: [u32; 3] = [20, 100, 180];
    const YS: [u32; 3] = [20, 60, 100];

    fn ruled_config() -> ExtractionConfig {
        ExtractionConfig::default().with_implicit_lines(false)
    }

    /// 2x2 ruled grid with ink in every cell.
    fn full_grid_page() -> RasterImage {
        let mut canvas = Canvas::new(240, 160);
        canvas.grid(&XS, &YS);
        for &y in &YS[..2] {
            for &x in &XS[..2] {
                canvas.ink(x + 10, y + 10, 30, 15);
            }
        }
        canvas.build()
    }

    fn extractor(reader: impl CellTextReader + 'static) -> TableExtractor {
        TableExtractor::new(Arc::new(reader))
    }

    #[tokio::test]
    async fn explicit_grid_end_to_end() {
        let report = extractor(EchoReader::default())
            .extract_page(&full_grid_page(), 0, &ruled_config())
            .await
            .unwrap();
        assert_eq!(report.regions_detected, 1);
        assert_eq!(report.tables.len(), 1);
        let table = &report.tables[0];
        assert_eq!(table.headers.len(), 2);
        assert_ne!(table.headers[0], table.headers[1]);
        assert!(table.headers.iter().all(|h| h.starts_with("cell-")));
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].len(), 2);
        assert!(table.rows[0].iter().all(|c| c.col_span == 1 && c.row_span == 1));
        assert_eq!(table.bounding_box, BoundingBox::new(20, 20, 160, 80));
        assert_eq!(report.quality(), ExtractionQuality::Complete);
    }

    #[tokio::test]
    async fn every_cell_resolved_once_before_merging() {
        let mut canvas = Canvas::new(360, 200);
        let xs = [20, 100, 180, 260];
        let ys = [20, 60, 100, 140];
        canvas.grid(&xs, &ys);
        for &y in &ys[..3] {
            for &x in &xs[..3] {
                canvas.ink(x + 10, y + 10, 30, 15);
            }
        }
        let table = extractor(EchoReader::default())
            .extract_tables(&canvas.build(), &ruled_config())
            .await
            .unwrap()
            .remove(0);
        let mut texts: Vec<&str> = table
            .rows
            .iter()
            .flatten()
            .map(|c| c.text.as_str())
            .chain(table.headers.iter().map(String::as_str))
            .collect();
        texts.sort_unstable();
        texts.dedup();
        assert_eq!(texts.len(), 9);
        for row in &table.rows {
            assert_eq!(ReconstructedTable::row_width(row), table.headers.len());
        }
    }

    #[tokio::test]
    async fn merged_header_spans_two_columns() {
        // Header row: [ink][empty]; body row full.
        let img = Canvas::new(240, 160)
            .grid(&XS, &YS)
            .ink(30, 30, 30, 15)
            .ink(30, 70, 30, 15)
            .ink(110, 70, 30, 15)
            .build();
        let reader = InkAwareReader { text: "Daïra".into() };
        let table = extractor(reader)
            .extract_tables(&img, &ruled_config())
            .await
            .unwrap()
            .remove(0);
        assert_eq!(table.headers, vec!["Daïra", "Col 2"]);
        assert_eq!(table.rows[0].len(), 2);
        assert_eq!(ReconstructedTable::row_width(&table.rows[0]), 2);
    }

    #[tokio::test]
    async fn cell_absorbing_the_one_below_is_not_repeated() {
        // 3x2 grid, every cell inked except the bottom-left one.
        let xs = [20, 100, 180];
        let ys = [20, 60, 100, 140];
        let mut canvas = Canvas::new(240, 200);
        canvas.grid(&xs, &ys);
        for (r, &y) in ys[..3].iter().enumerate() {
            for (c, &x) in xs[..2].iter().enumerate() {
                if (r, c) != (2, 0) {
                    canvas.ink(x + 10, y + 10, 30, 15);
                }
            }
        }
        let reader = InkAwareReader { text: "v".into() };
        let table = extractor(reader)
            .extract_tables(&canvas.build(), &ruled_config())
            .await
            .unwrap()
            .remove(0);

        assert_eq!(table.rows[0][0].row_span, 2);
        assert_eq!(table.rows[1].len(), 1);
        assert!(table.rows.iter().flatten().all(|c| !c.is_implicit && !c.is_empty));
        for i in 0..table.body_row_count() {
            assert_eq!(table.slot_count(i), table.column_count());
        }

        let json: serde_json::Value = serde_json::from_str(&to_json(&table).unwrap()).unwrap();
        let cells = json["cells"].as_array().unwrap();
        assert_eq!(cells.len(), 3);
        assert!(cells.iter().all(|c| c["content"] == "v"));
    }

    #[test]
    fn failed_region_is_skipped_and_siblings_kept() {
        let regions = detect_table_regions(&full_grid_page(), &ruled_config());
        let good = regions[0].clone();
        let mut broken = good.clone();
        broken.column_lines.truncate(1);

        let cells = vec![TableCell::empty(0, 0, good.bounding_box)];
        let table = reconstruct_table(&good, cells, 0, 1).unwrap();
        let table_id = table.id;
        let failure = reconstruct_table(&broken, Vec::new(), 0, 1).map(|t| (t, 0));
        assert!(failure.is_err());

        let report = page_report(
            0,
            &[good, broken.clone()],
            vec![Ok((table, 0)), failure],
            &ruled_config().with_confidence_threshold(0.0),
            Instant::now(),
        );

        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].id, table_id);
        assert_eq!(report.regions_detected, 2);
        assert_eq!(report.failed_tables, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            &report.warnings[0],
            ExtractionWarning::TableSkipped { region, reason }
                if *region == broken.bounding_box && reason.starts_with("Degenerate table grid")
        ));
        assert_eq!(report.quality(), ExtractionQuality::LowConfidence);
    }

    #[tokio::test]
    async fn blank_page_has_no_tables() {
        let img = Canvas::filled(200, 120, LIGHT_GRAY).build();
        let report = extractor(StaticCellReader::blank())
            .extract_page(&img, 3, &ExtractionConfig::default())
            .await
            .unwrap();
        assert!(report.tables.is_empty());
        assert_eq!(report.page, 3);
        assert_eq!(report.quality(), ExtractionQuality::NoTablesDetected);
    }

    #[tokio::test]
    async fn empty_image_is_reported_not_failed() {
        let report = extractor(StaticCellReader::blank())
            .extract_page(&RasterImage::empty(), 0, &ExtractionConfig::default())
            .await
            .unwrap();
        assert!(report.tables.is_empty());
        assert_eq!(report.warnings, vec![ExtractionWarning::EmptyImage]);
    }

    #[tokio::test]
    async fn failing_reader_degrades_but_keeps_table() {
        let report = extractor(FailingReader)
            .extract_page(&full_grid_page(), 0, &ruled_config())
            .await
            .unwrap();
        assert_eq!(report.tables.len(), 1);
        let table = &report.tables[0];
        assert!(table.rows[0].iter().all(|c| c.is_empty && c.confidence == 0.0));
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ExtractionWarning::DegradedCells { count: 4, .. })));
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ExtractionWarning::LowConfidenceTable { .. })));
        assert_eq!(report.quality(), ExtractionQuality::LowConfidence);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = ExtractionConfig::default().with_confidence_threshold(2.0);
        let err = extractor(StaticCellReader::blank())
            .extract_page(&full_grid_page(), 0, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Config(ConfigError::Invalid { .. })));
    }

    #[test]
    fn undersized_boxes_never_become_regions() {
        let img = Canvas::new(200, 100).grid(&[20, 30], &[20, 30]).build();
        assert!(detect_table_regions(&img, &ExtractionConfig::default()).is_empty());
    }

    #[test]
    fn implicit_lines_do_not_disturb_ruled_grid() {
        let regions = detect_table_regions(&full_grid_page(), &ExtractionConfig::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].row_lines, YS.to_vec());
        assert_eq!(regions[0].column_lines, XS.to_vec());
    }

    #[tokio::test]
    async fn document_tables_continue_across_pages() {
        let pages = vec![full_grid_page(), full_grid_page()];
        let reader = StaticCellReader::new("Wilaya", 0.9);
        let doc = extractor(reader)
            .extract_document(&pages, &ruled_config(), &MergeConfig::default())
            .await
            .unwrap();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.tables.len(), 1);
        assert_eq!(doc.merges.len(), 1);
        assert_eq!(doc.tables[0].metadata.merged_from.len(), 2);
        // page 2 repeats page 1's header row; it is stripped
        assert_eq!(doc.tables[0].body_row_count(), 1);
    }

    #[tokio::test]
    async fn document_without_cross_page_merging_keeps_tables_apart() {
        let pages = vec![full_grid_page(), full_grid_page()];
        let doc = extractor(StaticCellReader::new("Wilaya", 0.9))
            .extract_document(
                &pages,
                &ruled_config(),
                &MergeConfig::default().with_cross_page_merging(false),
            )
            .await
            .unwrap();
        assert_eq!(doc.tables.len(), 2);
        assert!(doc.merges.is_empty());
    }
}
