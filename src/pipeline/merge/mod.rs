pub mod types;
pub mod scoring;
pub mod engine;

pub use types::*;
pub use engine::{find_merge_candidates, merge_tables};

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Table {0} has a zero-area bounding box")]
    DegenerateBoundingBox(Uuid),

    #[error("Tables cannot be merged: {0}")]
    IncompatibleTables(String),
}
