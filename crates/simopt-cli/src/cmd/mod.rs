pub mod local;
pub mod run;
pub mod validate;

use clap::Args;
use simopt_core::evaluator::CommandEvaluator;
use std::path::PathBuf;

/// How to launch the external simulator.
#[derive(Args, Debug, Clone)]
pub struct SimulatorArgs {
    /// Simulator executable; receives the case as JSON on stdin
    #[arg(long)]
    pub simulator: PathBuf,

    /// Argument passed to the simulator (repeatable)
    #[arg(long = "simulator-arg", allow_hyphen_values = true)]
    pub simulator_args: Vec<String>,

    /// Working directory of the simulator
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

impl SimulatorArgs {
    pub fn evaluator(&self) -> CommandEvaluator {
        let evaluator = CommandEvaluator::builder()
            .program(self.simulator.clone())
            .args(self.simulator_args.clone())
            .build();
        CommandEvaluator {
            workdir: self.workdir.clone(),
            ..evaluator
        }
    }
}
