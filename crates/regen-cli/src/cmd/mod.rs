pub mod approval;
pub mod audit;
pub mod backup;
pub mod cleanup;
pub mod config;
pub mod init;
pub mod process;
pub mod rollback;

use anyhow::Context;
use regen_core::config::PipelineConfig;
use regen_core::Pipeline;
use std::path::Path;

/// Load the validated config and wire the pipeline for `root`.
pub(crate) fn open_pipeline(root: &Path) -> anyhow::Result<Pipeline> {
    let config = PipelineConfig::load_validated(root).context("failed to load config")?;
    Pipeline::open(root, config).context("failed to open pipeline")
}

pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}
