use super::SimulatorArgs;
use crate::reports;
use clap::Args;
use simopt_core::config::Config;
use simopt_core::error::EngineResult;
use simopt_core::model::{ModelDefinition, VariableContainer};
use simopt_core::optimizer::compass::CompassSearch;
use simopt_core::runner::run_local;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    #[command(flatten)]
    pub config: Config,

    #[command(flatten)]
    pub simulator: SimulatorArgs,

    /// In-process worker count
    #[arg(long, short, default_value_t = 2)]
    pub workers: usize,

    /// Write the run summary here as JSON
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

/// Coordinator and workers in one process, talking over channels.
pub fn run(args: LocalArgs, config: Config, definition: &ModelDefinition) -> EngineResult<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let evaluator = Arc::new(args.simulator.evaluator());
    info!("🧵 Starting coordinator with {} local workers", args.workers);

    let search = config.search.clone();
    let summary = runtime.block_on(run_local(
        definition,
        &config,
        args.workers,
        evaluator,
        |model: &VariableContainer| CompassSearch::new(model.base_case(), &search),
    ))?;

    reports::print_run_summary("Local distributed run", &summary);
    if let Some(path) = &args.summary {
        reports::write_summary(path, &summary)?;
    }
    Ok(())
}
