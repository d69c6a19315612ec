mod common;

use common::{bowl, definition, model, reject_negative, stall_positive_injector};
use simopt_core::case::{Case, ErrorMessage, EvalStatus, VariableValue};
use simopt_core::config::{Config, Direction};
use simopt_core::error::{EngineError, EngineResult};
use simopt_core::evaluator::{EvalFailure, Evaluation};
use simopt_core::model::VariableContainer;
use simopt_core::optimizer::compass::CompassSearch;
use simopt_core::optimizer::{Optimizer, TerminationCondition};
use simopt_core::registry::CaseHandler;
use simopt_core::runner::{run_local, CaseLog, SerialRunner};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

fn config() -> Config {
    let mut config = Config::default();
    config.search.max_evaluations = 400;
    config.search.direction = Direction::Maximize;
    config.runtime.sentinel_value = -1000.0;
    config
}

fn compass(config: &Config) -> impl FnOnce(&VariableContainer) -> CompassSearch + '_ {
    move |model: &VariableContainer| CompassSearch::new(model.base_case(), &config.search)
}

/// Proposes nothing and never finishes.
struct Idle;

impl Optimizer for Idle {
    fn iterate(&mut self, _handler: &mut CaseHandler) -> EngineResult<()> {
        Ok(())
    }

    fn handle_evaluated_case(&mut self, _case: &Case) {}

    fn is_finished(&self) -> TerminationCondition {
        TerminationCondition::NotFinished
    }

    fn tentative_best_case(&self) -> Option<&Case> {
        None
    }
}

/// Bowl evaluator that counts its calls and remembers every variable
/// assignment it was asked to simulate.
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl Counting {
    fn evaluate(
        &self,
        case: &Case,
        model: &VariableContainer,
        timeout: Duration,
    ) -> Result<Evaluation, EvalFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let values = format!("{:?}", model.named_values(case).unwrap());
        self.seen.lock().unwrap().push(values);
        bowl(case, model, timeout)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn distinct(&self) -> usize {
        self.seen.lock().unwrap().iter().collect::<HashSet<_>>().len()
    }
}

#[test]
fn test_serial_run_climbs_to_peak() {
    let config = config();
    let model = model();
    let search = CompassSearch::new(model.base_case(), &config.search);
    let runner = SerialRunner::new(search, model, bowl, &config.runtime, config.search.direction);

    let summary = runner.run().unwrap();
    assert_eq!(
        summary.termination,
        TerminationCondition::MinimumStepLengthReached
    );
    assert!(summary.best_objective().unwrap() > -1e-9);
    // compass search revisits its previous centre every time it moves
    assert!(summary.stats.bookkept > 0);
    assert_eq!(summary.stats.invalid, 0);
    assert_eq!(summary.best_variables["BHP#PROD"], VariableValue::Real(3.0));
    assert_eq!(summary.best_variables["BHP#INJ"], VariableValue::Real(-1.0));
    assert_eq!(summary.best_variables["SEG#PROD"], VariableValue::Integer(2));
}

#[test]
fn test_serial_invalid_cases_get_sentinel() {
    let config = config();
    let model = model();
    let search = CompassSearch::new(model.base_case(), &config.search);
    let runner = SerialRunner::new(
        search,
        model,
        reject_negative,
        &config.runtime,
        config.search.direction,
    );

    let summary = runner.run().unwrap();
    assert!(summary.stats.invalid > 0);
    let best = summary.best_case.unwrap();
    assert_eq!(best.state.eval, EvalStatus::Done);
    assert!(best.objective_value().unwrap() > -1000.0);
}

#[test]
fn test_sentinel_flips_when_minimizing() {
    let mut config = config();
    config.search.direction = Direction::Minimize;
    config.runtime.sentinel_value = -1000.0;
    config.search.max_evaluations = 5;

    let always_fails =
        |_: &Case, _: &VariableContainer, _: Duration| -> Result<Evaluation, EvalFailure> {
            Err(EvalFailure::invalid(ErrorMessage::WellIndexError, "bad completion"))
        };
    let model = model();
    let search = CompassSearch::new(model.base_case(), &config.search);
    let runner = SerialRunner::new(
        search,
        model,
        always_fails,
        &config.runtime,
        config.search.direction,
    );

    let summary = runner.run().unwrap();
    let best = summary.best_case.unwrap();
    assert_eq!(best.objective_value().unwrap(), 1000.0);
    assert_eq!(best.state.eval, EvalStatus::Failed);
    assert_eq!(best.state.err_msg, ErrorMessage::WellIndexError);
}

#[test]
fn test_case_log_has_one_row_per_case() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cases.csv");
    let config = config();
    let model = model();
    let search = CompassSearch::new(model.base_case(), &config.search);
    let runner = SerialRunner::new(search, model, bowl, &config.runtime, config.search.direction)
        .with_case_log(CaseLog::create(&path).unwrap());

    let summary = runner.run().unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "case_id");
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), summary.stats.total());
    assert!(rows.iter().any(|r| &r[1] == "bookkept"));
}

#[tokio::test]
async fn test_local_run_matches_serial_optimum() {
    let config = config();
    let summary = run_local(&definition(), &config, 3, Arc::new(bowl), compass(&config))
        .await
        .unwrap();

    assert_eq!(
        summary.termination,
        TerminationCondition::MinimumStepLengthReached
    );
    assert!(summary.best_objective().unwrap() > -1e-9);
    assert!(summary.stats.simulated > 0);
}

#[tokio::test]
async fn test_local_run_reports_timeouts() {
    let config = config();
    let summary = run_local(
        &definition(),
        &config,
        2,
        Arc::new(stall_positive_injector),
        compass(&config),
    )
    .await
    .unwrap();

    assert!(summary.stats.timed_out > 0);
    let best = summary.best_case.unwrap();
    assert!(best.objective_value().unwrap() > -1000.0);
}

#[tokio::test]
async fn test_local_run_survives_panicking_evaluator() {
    let mut config = config();
    config.search.max_evaluations = 6;
    let panics = |_: &Case, _: &VariableContainer, _: Duration| -> Result<Evaluation, EvalFailure> {
        panic!("simulator crashed")
    };

    let summary = run_local(&definition(), &config, 2, Arc::new(panics), compass(&config))
        .await
        .unwrap();
    assert_eq!(summary.termination, TerminationCondition::MaxEvalsReached);
    assert_eq!(summary.stats.simulated, 0);
    assert!(summary.stats.invalid > 0);
}

#[tokio::test]
async fn test_local_run_needs_workers() {
    let config = config();
    let result = run_local(&definition(), &config, 0, Arc::new(bowl), compass(&config)).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn test_local_run_writes_case_log() {
    let dir = tempdir().unwrap();
    let mut config = config();
    config.search.max_evaluations = 20;
    config.runtime.case_log = Some(dir.path().join("local.csv"));

    let summary = run_local(&definition(), &config, 2, Arc::new(bowl), compass(&config))
        .await
        .unwrap();

    let mut reader = csv::Reader::from_path(dir.path().join("local.csv")).unwrap();
    assert_eq!(reader.records().count(), summary.stats.total());
}

#[test]
fn test_serial_run_stops_when_optimizer_stalls() {
    let config = config();
    let runner = SerialRunner::new(Idle, model(), bowl, &config.runtime, config.search.direction);
    let err = runner.run().unwrap_err();
    assert!(matches!(err, EngineError::Stalled { iteration: 1 }));
}

#[tokio::test]
async fn test_local_run_stops_when_optimizer_stalls() {
    let config = config();
    let idle = |_: &VariableContainer| Idle;
    let result = run_local(&definition(), &config, 2, Arc::new(bowl), idle).await;
    assert!(matches!(result, Err(EngineError::Stalled { iteration: 1 })));
}

#[test]
fn test_bookkept_cases_never_reach_the_evaluator() {
    let config = config();
    let model = model();
    let counter = Arc::new(Counting::default());
    let evaluator = {
        let counter = Arc::clone(&counter);
        move |case: &Case, model: &VariableContainer, timeout: Duration| {
            counter.evaluate(case, model, timeout)
        }
    };
    let search = CompassSearch::new(model.base_case(), &config.search);
    let runner = SerialRunner::new(
        search,
        model,
        evaluator,
        &config.runtime,
        config.search.direction,
    );

    let summary = runner.run().unwrap();
    assert!(summary.stats.bookkept > 0);
    assert_eq!(counter.calls(), summary.stats.simulated);
    // every simulated assignment is new
    assert_eq!(counter.distinct(), counter.calls());
}

#[tokio::test]
async fn test_local_run_only_simulates_unbookkept_cases() {
    let config = config();
    let counter = Arc::new(Counting::default());
    let evaluator = {
        let counter = Arc::clone(&counter);
        move |case: &Case, model: &VariableContainer, timeout: Duration| {
            counter.evaluate(case, model, timeout)
        }
    };

    let summary = run_local(&definition(), &config, 3, Arc::new(evaluator), compass(&config))
        .await
        .unwrap();
    assert!(summary.stats.bookkept > 0);
    assert_eq!(counter.calls(), summary.stats.simulated);
}
