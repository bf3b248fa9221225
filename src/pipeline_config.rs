//! Pipeline configuration for table extraction and table merging.
//!
//! Both configs are plain immutable values handed to each pipeline call. A
//! setter never mutates: `with_*` consumes the value and returns an updated
//! copy for subsequent calls. Field names serialize in camelCase so a config
//! saved by the presentation layer can be loaded as-is; missing keys take
//! their defaults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::extraction::confidence::MODERATE_CONFIDENCE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Smallest region (in pixels) still considered a table rather than noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSize {
    pub width: u32,
    pub height: u32,
}

impl Default for CellSize {
    fn default() -> Self {
        Self {
            width: 20,
            height: 15,
        }
    }
}

/// Settings for one page/document extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractionConfig {
    /// Regions kept per page, in scan order.
    pub max_tables_per_page: usize,
    /// Tables below this confidence are kept but flagged.
    pub confidence_threshold: f32,
    pub detect_implicit_lines: bool,
    pub handle_merged_cells: bool,
    pub minimum_cell_size: CellSize,
    /// Upper bound on a single cell-text reader call.
    pub cell_read_timeout_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_tables_per_page: 10,
            confidence_threshold: MODERATE_CONFIDENCE,
            detect_implicit_lines: true,
            handle_merged_cells: true,
            minimum_cell_size: CellSize::default(),
            cell_read_timeout_ms: 5_000,
        }
    }
}

/// Settings for one merge pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeConfig {
    /// Max distance between table centers, in pixels.
    pub max_merge_distance: f64,
    pub structure_similarity_threshold: f32,
    /// Header similarity above which a repeated header row is stripped.
    pub content_similarity_threshold: f32,
    pub enable_cross_page_merging: bool,
    pub intelligent_header_matching: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_merge_distance: 50.0,
            structure_similarity_threshold: 0.8,
            content_similarity_threshold: 0.8,
            enable_cross_page_merging: true,
            intelligent_header_matching: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Builders & validation
// ═══════════════════════════════════════════════════════════

impl ExtractionConfig {
    /// Parse a (possibly partial) JSON config and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tables_per_page == 0 {
            return Err(invalid("maxTablesPerPage", "must be at least 1"));
        }
        check_unit("confidenceThreshold", self.confidence_threshold)?;
        if self.cell_read_timeout_ms == 0 {
            return Err(invalid("cellReadTimeoutMs", "must be positive"));
        }
        Ok(())
    }

    pub fn with_max_tables_per_page(self, max_tables_per_page: usize) -> Self {
        Self {
            max_tables_per_page,
            ..self
        }
    }

    pub fn with_confidence_threshold(self, confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            ..self
        }
    }

    pub fn with_implicit_lines(self, detect_implicit_lines: bool) -> Self {
        Self {
            detect_implicit_lines,
            ..self
        }
    }

    pub fn with_merged_cells(self, handle_merged_cells: bool) -> Self {
        Self {
            handle_merged_cells,
            ..self
        }
    }

    pub fn with_minimum_cell_size(self, width: u32, height: u32) -> Self {
        Self {
            minimum_cell_size: CellSize { width, height },
            ..self
        }
    }

    pub fn with_cell_read_timeout_ms(self, cell_read_timeout_ms: u64) -> Self {
        Self {
            cell_read_timeout_ms,
            ..self
        }
    }
}

impl MergeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_merge_distance.is_nan() || self.max_merge_distance <= 0.0 {
            return Err(invalid("maxMergeDistance", "must be positive"));
        }
        check_unit("structureSimilarityThreshold", self.structure_similarity_threshold)?;
        check_unit("contentSimilarityThreshold", self.content_similarity_threshold)?;
        Ok(())
    }

    pub fn with_max_merge_distance(self, max_merge_distance: f64) -> Self {
        Self {
            max_merge_distance,
            ..self
        }
    }

    pub fn with_structure_similarity_threshold(self, structure_similarity_threshold: f32) -> Self {
        Self {
            structure_similarity_threshold,
            ..self
        }
    }

    pub fn with_content_similarity_threshold(self, content_similarity_threshold: f32) -> Self {
        Self {
            content_similarity_threshold,
            ..self
        }
    }

    pub fn with_cross_page_merging(self, enable_cross_page_merging: bool) -> Self {
        Self {
            enable_cross_page_merging,
            ..self
        }
    }

    pub fn with_header_matching(self, intelligent_header_matching: bool) -> Self {
        Self {
            intelligent_header_matching,
            ..self
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn check_unit(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is outside [0, 1]"),
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
