pub mod types;
pub mod raster;
pub mod line_detect;
pub mod implicit_lines;
pub mod regions;
pub mod cell_grid;
pub mod confidence;
pub mod cell_reader;
pub mod reconstruct;
pub mod orchestrator;

pub use types::*;
pub use raster::RasterImage;
pub use confidence::*;
pub use orchestrator::*;

use thiserror::Error;

use crate::pipeline_config::ConfigError;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Degenerate table grid: {0}")]
    DegenerateGrid(String),

    #[error("Cell text reader failed: {0}")]
    CellRead(String),

    #[error("Cell text reader timed out after {0} ms")]
    CellReadTimeout(u64),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
