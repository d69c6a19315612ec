use simopt_core::error::EngineResult;
use simopt_core::evaluator::CommandEvaluator;
use simopt_core::model::VariableContainer;
use simopt_core::transport::{TcpTransport, Transport};
use simopt_core::worker::{Worker, WorkerReport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Dials the coordinator until it accepts or `attempts` run out. Nodes are
/// often started before the hive is listening.
pub async fn connect_with_retry(
    addr: &str,
    attempts: u32,
    delay: Duration,
) -> EngineResult<TcpTransport> {
    let mut attempt = 1;
    loop {
        match TcpTransport::connect(addr).await {
            Ok(transport) => return Ok(transport),
            Err(e) if attempt < attempts => {
                warn!(
                    "Coordinator unreachable ({}). Retrying in {:?} [{}/{}]",
                    e, delay, attempt, attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn run_worker(
    node_id: &str,
    transport: TcpTransport,
    model: VariableContainer,
    evaluator: CommandEvaluator,
    simulation_timeout: f64,
) -> EngineResult<WorkerReport> {
    info!(
        "🤖 {} serving as rank {} with simulator {:?}",
        node_id,
        transport.rank(),
        evaluator.program
    );
    let worker = Worker::new(transport, model, Arc::new(evaluator), simulation_timeout);
    let report = worker.run().await?;
    info!(
        "📊 {}: {} succeeded, {} invalid, {} timed out",
        node_id, report.succeeded, report.invalid, report.timed_out
    );
    Ok(report)
}
