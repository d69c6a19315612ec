use crate::case::Case;
use crate::error::EngineResult;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

#[derive(Serialize)]
struct CaseRow<'a> {
    case_id: String,
    eval_status: String,
    error: String,
    objective: Option<f64>,
    wic_time: u64,
    sim_time: u64,
    realization: &'a str,
}

/// CSV record of every completed case, one row each, in completion order.
pub struct CaseLog {
    writer: csv::Writer<File>,
    rows: usize,
}

impl CaseLog {
    pub fn create<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        Ok(Self {
            writer: csv::Writer::from_path(path)?,
            rows: 0,
        })
    }

    pub fn record(&mut self, case: &Case) -> EngineResult<()> {
        self.writer.serialize(CaseRow {
            case_id: case.id().to_string(),
            eval_status: case.state.eval.to_string(),
            error: case.state.err_msg.to_string(),
            objective: case.objective_value().ok(),
            wic_time: case.timing.wic_time,
            sim_time: case.timing.sim_time,
            realization: case.ensemble_realization(),
        })?;
        self.rows += 1;
        self.writer.flush()?;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}
