use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

pub mod exam;
pub mod invigilation;

pub use exam::*;
pub use invigilation::*;

/// Minutes since midnight.
pub type Minute = u32;

/// A half-open time window `[start, end)` on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub start_min: Minute,
    pub end_min: Minute,
}

impl Interval {
    pub fn new(start_min: Minute, end_min: Minute) -> Self {
        Self { start_min, end_min }
    }

    /// Length in minutes, or `None` when the window is empty or inverted.
    pub fn duration(&self) -> Option<Minute> {
        (self.end_min > self.start_min).then(|| self.end_min - self.start_min)
    }

    /// `[s1, e1)` and `[s2, e2)` overlap iff `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start_min < other.end_min && other.start_min < self.end_min
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", fmt_hhmm(self.start_min), fmt_hhmm(self.end_min))
    }
}

pub fn fmt_hhmm(minutes: Minute) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Terminal status of a solve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    /// An incumbent was found but optimality was not proven (time or gap limit).
    Feasible,
    Infeasible,
    /// The time limit expired without a usable incumbent.
    Timeout,
    Unknown,
}

impl SolveStatus {
    /// A usable schedule exists.
    pub fn is_success(self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Timeout => "TIMEOUT",
            SolveStatus::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Time limit used when neither the request nor the instance names one.
pub const DEFAULT_TIME_LIMIT_SECS: f64 = 40.0;

/// Tuning knobs handed to the MILP backend.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolverSettings {
    /// `None` defers to the instance's own default.
    pub time_limit_secs: Option<f64>,
    /// Requested HiGHS threads. The first solve in a process fixes the count.
    pub workers: u32,
    pub random_seed: i32,
    pub log_to_console: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            time_limit_secs: None,
            workers: 8,
            random_seed: 1234,
            log_to_console: false,
        }
    }
}

impl SolverSettings {
    /// Copy with the time limit filled in when the request left it out.
    pub fn with_default_time_limit(&self, secs: f64) -> Self {
        Self {
            time_limit_secs: Some(self.time_limit_secs.unwrap_or(secs)),
            ..self.clone()
        }
    }

    pub fn time_limit(&self) -> f64 {
        self.time_limit_secs.unwrap_or(DEFAULT_TIME_LIMIT_SECS)
    }

    /// Rejects values HiGHS would refuse as option values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, message: String| ConfigError::InvalidValue {
            kind: "solver settings",
            id: "solver".into(),
            field,
            message,
        };
        if let Some(secs) = self.time_limit_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(invalid(
                    "timeLimitSecs",
                    format!("{secs} is not a positive number of seconds"),
                ));
            }
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1".into()));
        }
        if self.random_seed < 0 {
            return Err(invalid(
                "randomSeed",
                format!("{} is negative", self.random_seed),
            ));
        }
        Ok(())
    }
}
