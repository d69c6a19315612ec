use anyhow::{bail, Context};
use clap::{CommandFactory, FromArgMatches, Parser};
use simopt_core::config::Config;
use simopt_core::model::{ModelDefinition, VariableContainer};
use simopt_core::optimizer::compass::CompassSearch;
use simopt_core::overseer::{Overseer, OverseerStatus};
use simopt_core::runner::distributed::CoordinatorParams;
use simopt_core::runner::{CaseLog, Coordinator, EnsembleHelper};
use simopt_core::transport::TcpTransport;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod error;
mod routes;
mod state;

use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "simopt-hive", about = "Coordinator of a distributed optimization run")]
struct Args {
    /// Address simopt-node workers connect to
    #[arg(long, default_value = "0.0.0.0:7400")]
    listen: String,

    #[arg(long, short, default_value_t = 2)]
    workers: usize,

    /// Port of the HTTP status API
    #[arg(long, default_value_t = 3000)]
    port: u16,

    #[arg(long, short)]
    model: PathBuf,

    /// JSON config file; flags given on the command line win
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Write the run summary here as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Keep serving the status API after the run until Ctrl-C
    #[arg(long)]
    linger: bool,

    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches)?;

    info!("🐝 SimOpt Hive is initializing...");

    if args.workers == 0 {
        bail!("--workers must be at least 1");
    }

    let config = match &args.config_file {
        Some(path) => {
            let mut cfg = Config::load_from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            cfg.merge_from_cli(&args.config, &matches);
            cfg
        }
        None => args.config.clone(),
    };
    config.validate()?;

    let definition = ModelDefinition::load_from_file(&args.model)
        .with_context(|| format!("loading model {}", args.model.display()))?;
    let model = VariableContainer::from_definition(&definition)?;
    info!(
        "📂 Model '{}' loaded with {} variables",
        definition.name,
        model.len()
    );

    let (status_tx, status_rx) = watch::channel(OverseerStatus::default());
    let state = Arc::new(AppState::new(definition.name.clone(), status_rx));

    let app = routes::system_routes()
        .merge(routes::run_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let http_addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let http_listener = TcpListener::bind(http_addr).await?;
    info!("📊 Status API listening on {}", http_addr);
    let server = tokio::spawn(async move { axum::serve(http_listener, app).await });

    let listener = TcpListener::bind(&args.listen).await?;
    info!(
        "⏳ Waiting for {} workers on {}",
        args.workers,
        listener.local_addr()?
    );
    let transport = TcpTransport::accept_workers(&listener, args.workers).await?;

    let overseer = Overseer::new(
        transport,
        Duration::from_millis(config.runtime.simulator_delay_ms),
    )
    .with_status_channel(status_tx);
    let optimizer = CompassSearch::new(model.base_case(), &config.search);

    let coordinator: Coordinator<CompassSearch, TcpTransport> = CoordinatorParams::builder()
        .optimizer(optimizer)
        .overseer(overseer)
        .model(model)
        .config(config.clone())
        .build();
    let coordinator = match &config.runtime.case_log {
        Some(path) => coordinator.with_case_log(CaseLog::create(path)?),
        None => coordinator,
    };
    let coordinator = match EnsembleHelper::from_settings(&config.runtime)? {
        Some(ensemble) => coordinator.with_ensemble(ensemble),
        None => coordinator,
    };

    let summary = coordinator.run().await?;
    match summary.best_objective() {
        Some(best) => info!("🏆 Best objective: {}", best),
        None => warn!("No case produced an objective value"),
    }

    if let Some(path) = &args.summary {
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        info!("💾 Summary written to {:?}", path);
    }
    state.finish(summary).await;

    if args.linger {
        info!("Run finished; status API stays up until Ctrl-C");
        tokio::signal::ctrl_c().await?;
    }
    server.abort();
    Ok(())
}
