pub mod config;
pub mod pipeline;
pub mod pipeline_config;

pub use pipeline::export::{to_csv, to_json};
pub use pipeline::extraction::{ExtractionError, TableExtractor};
pub use pipeline::merge::{merge_tables, MergeError};
pub use pipeline_config::{ConfigError, ExtractionConfig, MergeConfig};

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, or the crate default.
///
/// Does nothing if the host application already installed a subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok() {
        tracing::info!("{} v{} tracing initialized", config::APP_NAME, config::APP_VERSION);
    }
}
