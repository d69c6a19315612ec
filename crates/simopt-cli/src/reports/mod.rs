mod tables;

pub use self::tables::{
    config as print_config_table, run_summary as print_run_summary,
    variables as print_variable_table,
};

use simopt_core::error::EngineResult;
use simopt_core::runner::RunSummary;
use std::path::Path;
use tracing::info;

pub fn write_summary(path: &Path, summary: &RunSummary) -> EngineResult<()> {
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    info!("💾 Summary written to {:?}", path);
    Ok(())
}
