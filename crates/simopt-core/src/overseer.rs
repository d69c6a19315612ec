use crate::case::Case;
use crate::error::{EngineError, EngineResult};
use crate::message::{Envelope, Message, Phase, Rank, Tag, COORDINATOR};
use crate::sync::ModelSyncObject;
use crate::token::Token;
use crate::transport::{Mailbox, RecvFilter, Transport};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Coordinator-side record of one worker.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub rank: Rank,
    pub busy: bool,
    pub last_assigned: Option<Instant>,
    /// Case currently being evaluated by this worker.
    pub case_id: Option<Token>,
    pub assignments: usize,
}

impl WorkerStatus {
    fn new(rank: Rank) -> Self {
        Self {
            rank,
            busy: false,
            last_assigned: None,
            case_id: None,
            assignments: 0,
        }
    }

    pub fn busy_for(&self) -> Option<Duration> {
        match (self.busy, self.last_assigned) {
            (true, Some(t)) => Some(t.elapsed()),
            _ => None,
        }
    }
}

/// How a dispatched case came back.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Success(Case),
    Invalid(Case),
    /// Timeouts carry no case; the id comes from the worker's assignment.
    Timeout { case_id: Token },
}

impl Completion {
    pub fn case_id(&self) -> Token {
        match self {
            Self::Success(c) | Self::Invalid(c) => c.id(),
            Self::Timeout { case_id } => *case_id,
        }
    }

    pub fn tag(&self) -> Tag {
        match self {
            Self::Success(_) => Tag::CaseEvalSuccess,
            Self::Invalid(_) => Tag::CaseEvalInvalid,
            Self::Timeout { .. } => Tag::CaseEvalTimeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedCase {
    pub worker: Rank,
    pub completion: Completion,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub rank: Rank,
    pub busy: bool,
    pub case_id: Option<String>,
    pub busy_secs: Option<f64>,
    pub assignments: usize,
}

/// Read-only view of the scheduler, published after every state change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OverseerStatus {
    pub workers: Vec<WorkerSnapshot>,
    pub dispatched: usize,
    pub received: usize,
    pub terminating: bool,
}

pub struct Overseer<T: Transport> {
    mailbox: Mailbox<T>,
    workers: Vec<WorkerStatus>,
    simulator_delay: Duration,
    last_dispatch: Option<Instant>,
    dispatched: usize,
    received: usize,
    terminating: bool,
    status_tx: Option<watch::Sender<OverseerStatus>>,
}

impl<T: Transport> Overseer<T> {
    pub fn new(transport: T, simulator_delay: Duration) -> Self {
        let workers = (1..transport.size()).map(WorkerStatus::new).collect();
        Self {
            mailbox: Mailbox::new(transport),
            workers,
            simulator_delay,
            last_dispatch: None,
            dispatched: 0,
            received: 0,
            terminating: false,
            status_tx: None,
        }
    }

    pub fn with_status_channel(mut self, tx: watch::Sender<OverseerStatus>) -> Self {
        self.status_tx = Some(tx);
        self.publish();
        self
    }

    pub fn status(&self) -> OverseerStatus {
        OverseerStatus {
            workers: self
                .workers
                .iter()
                .map(|w| WorkerSnapshot {
                    rank: w.rank,
                    busy: w.busy,
                    case_id: w.case_id.map(|id| id.to_string()),
                    busy_secs: w.busy_for().map(|d| d.as_secs_f64()),
                    assignments: w.assignments,
                })
                .collect(),
            dispatched: self.dispatched,
            received: self.received,
            terminating: self.terminating,
        }
    }

    fn publish(&self) {
        if let Some(tx) = &self.status_tx {
            tx.send_replace(self.status());
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn workers(&self) -> &[WorkerStatus] {
        &self.workers
    }

    pub fn worker(&self, rank: Rank) -> Option<&WorkerStatus> {
        rank.checked_sub(1).and_then(|i| self.workers.get(i))
    }

    fn worker_mut(&mut self, rank: Rank) -> Option<&mut WorkerStatus> {
        rank.checked_sub(1).and_then(|i| self.workers.get_mut(i))
    }

    pub fn free_worker_count(&self) -> usize {
        self.workers.iter().filter(|w| !w.busy).count()
    }

    pub fn busy_worker_count(&self) -> usize {
        self.workers.iter().filter(|w| w.busy).count()
    }

    pub fn free_worker_ranks(&self) -> Vec<Rank> {
        self.workers
            .iter()
            .filter(|w| !w.busy)
            .map(|w| w.rank)
            .collect()
    }

    /// The busy worker that was dispatched to longest ago.
    pub fn longest_running_worker(&self) -> Option<(Rank, Duration)> {
        self.workers
            .iter()
            .filter_map(|w| w.busy_for().map(|d| (w.rank, d)))
            .max_by_key(|(_, d)| *d)
    }

    pub async fn broadcast_model(&mut self, mso: &ModelSyncObject) -> EngineResult<()> {
        info!(
            "📡 Broadcasting model ({} variables, fingerprint {}) to {} workers",
            mso.len(),
            &mso.fingerprint()[..12],
            self.workers.len()
        );
        for rank in 1..=self.workers.len() {
            let env = Envelope::model_sync(mso, COORDINATOR, rank)?;
            self.mailbox.send(env).await?;
        }
        Ok(())
    }

    /// Sends `case` to `preferred` when it is idle, else to the idle worker
    /// with the lowest rank. Waits out the simulator delay first.
    pub async fn assign(&mut self, case: Case, preferred: Option<Rank>) -> EngineResult<Rank> {
        if self.terminating {
            return Err(EngineError::Terminated);
        }
        let rank = preferred
            .and_then(|r| self.worker(r).filter(|w| !w.busy).map(|w| w.rank))
            .or_else(|| self.workers.iter().find(|w| !w.busy).map(|w| w.rank))
            .ok_or(EngineError::NoFreeWorker)?;

        if let Some(last) = self.last_dispatch {
            let since = last.elapsed();
            if since < self.simulator_delay {
                let wait = self.simulator_delay - since;
                debug!("Throttling launch for {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }

        let case_id = case.id();
        self.mailbox
            .send_message(Message::new(
                Tag::CaseUnevaluated,
                Some(case),
                COORDINATOR,
                rank,
            ))
            .await?;

        let now = Instant::now();
        self.last_dispatch = Some(now);
        self.dispatched += 1;
        if let Some(w) = self.worker_mut(rank) {
            w.busy = true;
            w.last_assigned = Some(now);
            w.case_id = Some(case_id);
            w.assignments += 1;
        }
        debug!("Case {} -> rank {}", case_id.short(), rank);
        self.publish();
        Ok(rank)
    }

    /// Turns a result message into a completion and frees its worker.
    fn settle(&mut self, message: Message) -> EngineResult<EvaluatedCase> {
        let worker = message.source;
        let assigned = match self.worker(worker) {
            Some(w) if w.busy => w.case_id,
            _ => None,
        };
        let Some(case_id) = assigned else {
            return Err(EngineError::UnexpectedResult {
                worker,
                case: message.case.as_ref().map(|c| c.id()),
            });
        };

        let completion = match (message.tag, message.case) {
            (Tag::CaseEvalSuccess, Some(c)) if c.id() == case_id => Completion::Success(c),
            (Tag::CaseEvalInvalid, Some(c)) if c.id() == case_id => Completion::Invalid(c),
            (Tag::CaseEvalTimeout, _) => Completion::Timeout { case_id },
            (_, case) => {
                return Err(EngineError::UnexpectedResult {
                    worker,
                    case: case.map(|c| c.id()),
                })
            }
        };

        if let Some(w) = self.worker_mut(worker) {
            w.busy = false;
            w.case_id = None;
        }
        self.received += 1;
        self.publish();
        Ok(EvaluatedCase { worker, completion })
    }

    /// Blocks for the next result from any worker.
    pub async fn receive_evaluated(&mut self) -> EngineResult<EvaluatedCase> {
        let message = self
            .mailbox
            .recv_message(RecvFilter::any(), Phase::Collecting)
            .await?;
        self.settle(message)
    }

    pub async fn terminate_all(&mut self) -> EngineResult<()> {
        info!("🛑 Sending TERMINATE to {} workers", self.workers.len());
        self.terminating = true;
        for rank in 1..=self.workers.len() {
            self.mailbox
                .send_message(Message::terminate(COORDINATOR, rank))
                .await?;
        }
        self.publish();
        Ok(())
    }

    /// Waits for every worker to echo TERMINATE. Results that were still in
    /// flight when TERMINATE went out are returned in arrival order.
    pub async fn confirm_all_terminated(&mut self) -> EngineResult<Vec<EvaluatedCase>> {
        let mut pending: BTreeSet<Rank> = (1..=self.workers.len()).collect();
        let mut late = Vec::new();
        while !pending.is_empty() {
            let message = self
                .mailbox
                .recv_message(RecvFilter::any(), Phase::ShuttingDown)
                .await?;
            if message.tag == Tag::Terminate {
                if !pending.remove(&message.source) {
                    warn!("Duplicate TERMINATE from rank {}", message.source);
                }
                continue;
            }
            let evaluated = self.settle(message)?;
            info!(
                "📥 Late result for case {} from rank {}",
                evaluated.completion.case_id().short(),
                evaluated.worker
            );
            late.push(evaluated);
        }

        // An acknowledgement means the worker finished its last case.
        for w in &mut self.workers {
            w.busy = false;
            w.case_id = None;
        }
        self.publish();
        info!("✅ All workers acknowledged termination");
        Ok(late)
    }
}
