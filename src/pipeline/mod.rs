pub mod extraction;
pub mod merge;
pub mod export;
