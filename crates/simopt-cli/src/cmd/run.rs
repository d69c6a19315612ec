use super::SimulatorArgs;
use crate::reports;
use clap::Args;
use simopt_core::config::Config;
use simopt_core::error::EngineResult;
use simopt_core::model::VariableContainer;
use simopt_core::optimizer::compass::CompassSearch;
use simopt_core::runner::{CaseLog, EnsembleHelper, SerialRunner};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: Config,

    #[command(flatten)]
    pub simulator: SimulatorArgs,

    /// Write the run summary here as JSON
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

pub fn run(args: RunArgs, config: Config, model: VariableContainer) -> EngineResult<()> {
    let optimizer = CompassSearch::new(model.base_case(), &config.search);
    let mut runner = SerialRunner::new(
        optimizer,
        model,
        args.simulator.evaluator(),
        &config.runtime,
        config.search.direction,
    );
    if let Some(path) = &config.runtime.case_log {
        info!("📝 Logging cases to {:?}", path);
        runner = runner.with_case_log(CaseLog::create(path)?);
    }
    if let Some(ensemble) = EnsembleHelper::from_settings(&config.runtime)? {
        info!("🎲 Evaluating over {} realizations", ensemble.realizations().len());
        runner = runner.with_ensemble(ensemble);
    }

    let summary = runner.run()?;
    reports::print_run_summary("Serial run", &summary);
    if let Some(path) = &args.summary {
        reports::write_summary(path, &summary)?;
    }
    Ok(())
}
