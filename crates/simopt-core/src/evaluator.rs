use crate::case::{Case, ErrorMessage, Timing, VariableValue};
use crate::model::VariableContainer;
use serde_json::{json, Map, Value};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

/// Seconds allowed for a simulation when no adaptive bound is available.
pub const FALLBACK_TIMEOUT_SECS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub objective: f64,
    pub timing: Timing,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalFailure {
    #[error("evaluation failed ({cause}): {detail}")]
    Invalid { cause: ErrorMessage, detail: String },

    #[error("evaluation exceeded its deadline")]
    TimedOut,
}

impl EvalFailure {
    pub fn invalid(cause: ErrorMessage, detail: impl Into<String>) -> Self {
        Self::Invalid {
            cause,
            detail: detail.into(),
        }
    }
}

/// The external "simulate this case" call.
///
/// `model` already holds the case's values. Implementations block; async
/// callers run them on the blocking pool.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        case: &Case,
        model: &VariableContainer,
        timeout: Duration,
    ) -> Result<Evaluation, EvalFailure>;
}

impl<F> Evaluator for F
where
    F: Fn(&Case, &VariableContainer, Duration) -> Result<Evaluation, EvalFailure> + Send + Sync,
{
    fn evaluate(
        &self,
        case: &Case,
        model: &VariableContainer,
        timeout: Duration,
    ) -> Result<Evaluation, EvalFailure> {
        self(case, model, timeout)
    }
}

/// Adaptive wall-clock bound: median of the recorded simulation times
/// scaled by `factor`.
#[derive(Debug, Clone, Default)]
pub struct TimeoutPolicy {
    factor: f64,
    sim_times: Vec<u64>,
}

impl TimeoutPolicy {
    pub fn new(factor: f64) -> Self {
        Self {
            factor,
            sim_times: Vec::new(),
        }
    }

    pub fn record(&mut self, timing: &Timing) {
        if timing.sim_time > 0 {
            self.sim_times.push(timing.sim_time);
        }
    }

    pub fn samples(&self) -> usize {
        self.sim_times.len()
    }

    pub fn median(&self) -> Option<f64> {
        if self.sim_times.is_empty() {
            return None;
        }
        let mut sorted = self.sim_times.clone();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        Some(if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
        } else {
            sorted[mid] as f64
        })
    }

    /// Bounds that do not fit a `Duration` fall back like an empty history.
    pub fn timeout(&self) -> Duration {
        let fallback = Duration::from_secs(FALLBACK_TIMEOUT_SECS);
        match self.median() {
            Some(m) if self.factor > 0.0 => {
                Duration::try_from_secs_f64((m * self.factor).max(1.0)).unwrap_or(fallback)
            }
            _ => fallback,
        }
    }
}

/// Runs an external simulator once per case.
///
/// The child receives the case as JSON on stdin and must print the
/// objective value as the last non-empty line of stdout.
#[derive(TypedBuilder, Debug, Clone)]
pub struct CommandEvaluator {
    #[builder(setter(into))]
    pub program: PathBuf,
    #[builder(default)]
    pub args: Vec<String>,
    #[builder(default, setter(strip_option, into))]
    pub workdir: Option<PathBuf>,
    #[builder(default = Duration::from_millis(20))]
    pub poll_interval: Duration,
}

fn json_value(v: &VariableValue) -> Value {
    match *v {
        VariableValue::Binary(b) => json!(b),
        VariableValue::Integer(i) => json!(i),
        VariableValue::Real(r) => json!(r),
    }
}

/// Reads a child pipe to the end on its own thread so the child never
/// blocks on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_string(&mut buf);
        }
        buf
    })
}

impl CommandEvaluator {
    fn request(&self, case: &Case, model: &VariableContainer) -> Result<String, EvalFailure> {
        let named = model
            .named_values(case)
            .map_err(|e| EvalFailure::invalid(ErrorMessage::Unknown, e.to_string()))?;
        let variables: Map<String, Value> = named
            .iter()
            .map(|(name, v)| (name.clone(), json_value(v)))
            .collect();
        let body = json!({
            "case_id": case.id().to_string(),
            "ensemble_realization": case.ensemble_realization(),
            "variables": variables,
        });
        Ok(body.to_string())
    }

    fn parse_objective(stdout: &str) -> Result<f64, EvalFailure> {
        let line = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| {
                EvalFailure::invalid(ErrorMessage::Unknown, "simulator printed nothing")
            })?;
        line.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                EvalFailure::invalid(
                    ErrorMessage::Unknown,
                    format!("could not read an objective from '{}'", line),
                )
            })
    }
}

impl Evaluator for CommandEvaluator {
    fn evaluate(
        &self,
        case: &Case,
        model: &VariableContainer,
        timeout: Duration,
    ) -> Result<Evaluation, EvalFailure> {
        let input = self.request(case, model)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            EvalFailure::invalid(
                ErrorMessage::SimulationError,
                format!("failed to launch {:?}: {}", self.program, e),
            )
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        if let Some(mut stdin) = child.stdin.take() {
            // Simulators may ignore stdin and close the pipe early.
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                debug!("stdin write to simulator failed: {}", e);
            }
        }

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= timeout => {
                    warn!(
                        "⏱️ Case {} exceeded {:.0}s, killing simulator",
                        case.id().short(),
                        timeout.as_secs_f64()
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(EvalFailure::TimedOut);
                }
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => {
                    return Err(EvalFailure::invalid(
                        ErrorMessage::SimulationError,
                        format!("lost track of simulator: {}", e),
                    ))
                }
            }
        };

        let output = stdout.join().unwrap_or_default();
        if !status.success() {
            let stderr = stderr.join().unwrap_or_default();
            return Err(EvalFailure::invalid(
                ErrorMessage::SimulationError,
                format!("simulator exited with {}: {}", status, stderr.trim()),
            ));
        }

        let objective = Self::parse_objective(&output)?;
        Ok(Evaluation {
            objective,
            timing: Timing {
                wic_time: 0,
                sim_time: started.elapsed().as_secs(),
            },
        })
    }
}
