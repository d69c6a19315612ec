use clap::{parser::ValueSource, ArgMatches, Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// The adaptive timeout factor must be finite and not negative; 0 turns the
/// adaptive bound off.
pub fn check_timeout_factor(factor: f64) -> Result<(), ConfigError> {
    if !factor.is_finite() || factor < 0.0 {
        return Err(invalid(
            "simulation_timeout",
            "must be a finite number, zero or positive",
        ));
    }
    Ok(())
}

#[derive(Args, Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[command(flatten)]
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[command(flatten)]
    #[serde(default)]
    pub search: SearchParams,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Rejects settings no run can make sense of.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rt = &self.runtime;
        if rt.bookkeeper_tolerance.is_nan() || rt.bookkeeper_tolerance < 0.0 {
            return Err(invalid("bookkeeper_tolerance", "must be zero or positive"));
        }
        check_timeout_factor(rt.simulation_timeout)?;
        if !rt.sentinel_value.is_finite() {
            return Err(invalid("sentinel_value", "must be finite"));
        }
        if rt.realizations.iter().any(|r| r.is_empty()) {
            return Err(invalid("realizations", "aliases must not be empty"));
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = rt.realizations.iter().find(|r| !seen.insert(r.as_str())) {
            return Err(invalid("realizations", format!("alias {dup} is listed twice")));
        }

        let s = &self.search;
        if s.max_evaluations == 0 {
            return Err(invalid("max_evaluations", "must be at least 1"));
        }
        if s.minimum_step_length.is_nan() || s.minimum_step_length <= 0.0 {
            return Err(invalid("minimum_step_length", "must be positive"));
        }
        if !s.initial_step_length.is_finite() || s.initial_step_length < s.minimum_step_length {
            return Err(invalid(
                "initial_step_length",
                format!("must be at least minimum_step_length ({})", s.minimum_step_length),
            ));
        }
        let c = s.contraction_factor;
        if c.is_nan() || c <= 0.0 || c >= 1.0 {
            return Err(invalid("contraction_factor", "must lie strictly between 0 and 1"));
        }
        Ok(())
    }

    /// File values, overridden by every flag the user actually typed.
    pub fn merge_from_cli(&mut self, cli: &Config, matches: &ArgMatches) {
        self.runtime.merge_from_cli(&cli.runtime, matches);
        self.search.merge_from_cli(&cli.search, matches);
    }
}

macro_rules! update_if_present {
    ($self:ident, $cli:ident, $matches:ident, $($field:ident),+ $(,)?) => {
        $(
            if $matches.value_source(stringify!($field)) == Some(ValueSource::CommandLine) {
                $self.$field = $cli.$field.clone();
            }
        )+
    };
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Maximum per-variable difference for two cases to count as the same.
    #[arg(long, default_value_t = 0.0)]
    pub bookkeeper_tolerance: f64,

    /// Minimum gap between two simulator launches, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub simulator_delay_ms: u64,

    /// Timeout factor applied to the median simulation time. 0 disables the
    /// adaptive bound.
    #[arg(long, default_value_t = 0.0)]
    pub simulation_timeout: f64,

    /// Objective assigned to failed and timed-out cases.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub sentinel_value: f64,

    #[arg(long)]
    pub case_log: Option<PathBuf>,

    /// Ensemble realization alias. Repeat the flag to evaluate every case
    /// once per realization; the case is then scored by the mean.
    #[arg(long = "realization")]
    pub realizations: Vec<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            bookkeeper_tolerance: 0.0,
            simulator_delay_ms: 0,
            simulation_timeout: 0.0,
            sentinel_value: 0.0,
            case_log: None,
            realizations: Vec::new(),
        }
    }
}

impl RuntimeSettings {
    pub fn merge_from_cli(&mut self, cli: &RuntimeSettings, matches: &ArgMatches) {
        update_if_present!(
            self,
            cli,
            matches,
            bookkeeper_tolerance,
            simulator_delay_ms,
            simulation_timeout,
            sentinel_value,
            case_log,
            realizations,
        );
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ValueEnum,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    /// True when `candidate` is strictly better than `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }

    /// The configured sentinel expressed so that it always ranks as "bad".
    pub fn sentinel(self, value: f64) -> f64 {
        match self {
            Self::Maximize => value,
            Self::Minimize => -value,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    #[arg(long, default_value_t = 100)]
    pub max_evaluations: usize,
    #[arg(long, default_value_t = 1.0)]
    pub initial_step_length: f64,
    #[arg(long, default_value_t = 0.01)]
    pub minimum_step_length: f64,
    #[arg(long, default_value_t = 0.5)]
    pub contraction_factor: f64,
    #[arg(long, value_enum, default_value_t = Direction::Maximize)]
    pub direction: Direction,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_evaluations: 100,
            initial_step_length: 1.0,
            minimum_step_length: 0.01,
            contraction_factor: 0.5,
            direction: Direction::Maximize,
        }
    }
}

impl SearchParams {
    pub fn merge_from_cli(&mut self, cli: &SearchParams, matches: &ArgMatches) {
        update_if_present!(
            self,
            cli,
            matches,
            max_evaluations,
            initial_step_length,
            minimum_step_length,
            contraction_factor,
            direction,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches, Parser};
    use rstest::rstest;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"runtime": {"bookkeeper_tolerance": 0.5}}"#).unwrap();
        assert_eq!(cfg.runtime.bookkeeper_tolerance, 0.5);
        assert_eq!(cfg.runtime.simulator_delay_ms, 0);
        assert_eq!(cfg.search.max_evaluations, 100);
        assert_eq!(cfg.search.direction, Direction::Maximize);
    }

    #[test]
    fn test_cli_overrides_only_typed_flags() {
        let matches = TestCli::command().get_matches_from([
            "test",
            "--sentinel-value",
            "-1",
            "--direction",
            "minimize",
        ]);
        let cli = TestCli::from_arg_matches(&matches).unwrap();

        let mut file_cfg = Config::default();
        file_cfg.runtime.bookkeeper_tolerance = 0.25;
        file_cfg.merge_from_cli(&cli.config, &matches);

        assert_eq!(file_cfg.runtime.sentinel_value, -1.0);
        assert_eq!(file_cfg.runtime.bookkeeper_tolerance, 0.25);
        assert_eq!(file_cfg.search.direction, Direction::Minimize);
    }

    #[test]
    fn test_validate_rejects_bad_search() {
        assert!(Config::default().validate().is_ok());

        let mut cfg = Config::default();
        cfg.search.contraction_factor = 1.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "contraction_factor", .. })
        ));

        let mut cfg = Config::default();
        cfg.search.initial_step_length = 0.001;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "initial_step_length", .. })
        ));

        let mut cfg = Config::default();
        cfg.runtime.bookkeeper_tolerance = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[rstest]
    #[case(f64::INFINITY)]
    #[case(f64::NAN)]
    #[case(-1.0)]
    fn test_validate_rejects_unusable_timeout_factor(#[case] factor: f64) {
        let mut cfg = Config::default();
        cfg.runtime.simulation_timeout = factor;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "simulation_timeout", .. })
        ));
        assert!(check_timeout_factor(factor).is_err());
    }

    #[test]
    fn test_timeout_factor_zero_is_off_not_invalid() {
        assert!(check_timeout_factor(0.0).is_ok());
        assert!(check_timeout_factor(2.5).is_ok());
    }

    #[test]
    fn test_realization_flag_repeats_and_validates() {
        let matches = TestCli::command().get_matches_from([
            "test",
            "--realization",
            "R1",
            "--realization",
            "R2",
        ]);
        let cli = TestCli::from_arg_matches(&matches).unwrap();
        let mut cfg = Config::default();
        cfg.merge_from_cli(&cli.config, &matches);
        assert_eq!(cfg.runtime.realizations, vec!["R1", "R2"]);
        assert!(cfg.validate().is_ok());

        cfg.runtime.realizations.push("R1".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "realizations", .. })
        ));
    }

    #[test]
    fn test_sentinel_flips_for_minimize() {
        assert_eq!(Direction::Maximize.sentinel(5.0), 5.0);
        assert_eq!(Direction::Minimize.sentinel(5.0), -5.0);
        assert!(Direction::Minimize.improves(1.0, 2.0));
        assert!(!Direction::Maximize.improves(1.0, 1.0));
    }
}
