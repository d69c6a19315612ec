use clap::Parser;
use simopt_core::config::check_timeout_factor;
use simopt_core::evaluator::CommandEvaluator;
use simopt_core::model::VariableContainer;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

mod worker;

#[derive(Parser, Debug)]
#[command(name = "simopt-node", about = "Evaluates cases for a simopt-hive coordinator")]
struct Cli {
    /// Coordinator address
    #[arg(long, default_value = "127.0.0.1:7400")]
    coordinator: String,

    /// Model definition; must declare the same variable names as the hive's
    #[arg(long, short)]
    model: PathBuf,

    /// Simulator executable. Gets the case as JSON on stdin and prints the
    /// objective as its last line.
    #[arg(long)]
    simulator: PathBuf,

    /// Argument passed to the simulator (repeatable)
    #[arg(long = "simulator-arg", allow_hyphen_values = true)]
    simulator_args: Vec<String>,

    /// Working directory of the simulator
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Kill a simulation after this multiple of the median runtime (0 = off)
    #[arg(long, default_value_t = 0.0)]
    simulation_timeout: f64,

    #[arg(long, default_value_t = 30)]
    connect_attempts: u32,

    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let node_id = format!(
        "node-{}",
        Uuid::new_v4().to_string().split('-').next().unwrap_or("0")
    );

    if let Err(e) = run(cli, &node_id).await {
        error!("{} failed: {}", node_id, e);
        process::exit(1);
    }
}

async fn run(cli: Cli, node_id: &str) -> simopt_core::error::EngineResult<()> {
    check_timeout_factor(cli.simulation_timeout)?;
    let model = VariableContainer::load_from_file(&cli.model)?;
    info!("📂 {} loaded {} variables", node_id, model.len());

    let evaluator = CommandEvaluator::builder()
        .program(cli.simulator)
        .args(cli.simulator_args)
        .build();
    let evaluator = match cli.workdir {
        Some(dir) => CommandEvaluator {
            workdir: Some(dir),
            ..evaluator
        },
        None => evaluator,
    };

    info!("🔌 {} connecting to {}", node_id, cli.coordinator);
    let transport = worker::connect_with_retry(
        &cli.coordinator,
        cli.connect_attempts,
        Duration::from_millis(cli.retry_delay_ms),
    )
    .await?;

    worker::run_worker(node_id, transport, model, evaluator, cli.simulation_timeout).await?;
    Ok(())
}
