pub mod config;
pub mod fallbacks;
pub mod resolve;

use std::path::Path;

use anyhow::Context;
use iconpipe_core::PipelineConfig;

/// Load and validate the configuration, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}
