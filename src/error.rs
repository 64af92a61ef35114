use thiserror::Error;

use crate::data::{Minute, SolveStatus};

/// Input problems detected before any model is compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} '{id}' is defined more than once")]
    DuplicateId { kind: &'static str, id: String },

    #[error("{kind} '{id}' references unknown {target} '{target_id}'")]
    UnknownReference {
        kind: &'static str,
        id: String,
        target: &'static str,
        target_id: String,
    },

    #[error("the exam calendar has no slots")]
    EmptyCalendar,

    #[error("{kind} '{id}' has non-positive duration ({start_min}-{end_min}); end must be after start")]
    NonPositiveDuration {
        kind: &'static str,
        id: String,
        start_min: Minute,
        end_min: Minute,
    },

    #[error("exam group '{group}' duration {duration_min} min cannot fit in any slot; add longer slots or reduce the duration")]
    NoFeasibleSlot { group: String, duration_min: Minute },

    #[error("pin for exam group '{group}' references slot {slot} which is not in the calendar")]
    UnknownPinSlot { group: String, slot: String },

    #[error("pin for exam group '{group}' at {slot}: slot lasts {slot_min} min but the exam needs {duration_min} min")]
    PinSlotTooShort {
        group: String,
        slot: String,
        slot_min: Minute,
        duration_min: Minute,
    },

    #[error("'{task}' is pinned to both {first} and {second}")]
    ConflictingPins {
        task: String,
        first: String,
        second: String,
    },

    #[error("'{task}' has {pinned} pinned assignments but only needs {required}")]
    TooManyPins {
        task: String,
        pinned: usize,
        required: u32,
    },

    #[error("'{task}' is pinned to {option}, which it cannot use")]
    PinOutsideDomain { task: String, option: String },

    #[error("'{first}' and '{second}' cannot share {option} but both are pinned to it")]
    PinnedConflict {
        first: String,
        second: String,
        option: String,
    },

    #[error("'{task}' needs {required} assignment(s) but only {eligible} candidate(s) are eligible")]
    InsufficientCandidates {
        task: String,
        required: u32,
        eligible: usize,
    },

    #[error("{kind} '{id}' has invalid {field}: {message}")]
    InvalidValue {
        kind: &'static str,
        id: String,
        field: &'static str,
        message: String,
    },
}

/// Records `err` when `issues` is collecting, otherwise fails with it.
pub(crate) fn collect_or_fail(
    issues: &mut Option<&mut Vec<ConfigError>>,
    err: ConfigError,
) -> Result<(), ConfigError> {
    match issues.as_deref_mut() {
        Some(list) => {
            list.push(err);
            Ok(())
        }
        None => Err(err),
    }
}

/// Every way a scheduling run can fail.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("no feasible schedule (solver status {status}).\nTry:\n{remediation}")]
    Infeasible {
        status: SolveStatus,
        remediation: String,
    },

    /// A recomputed metric disagrees with the solver's value. Always a bug.
    #[error("decoded solution is inconsistent with the model: {0}")]
    DecodeInconsistency(String),
}

impl SchedulingError {
    pub fn infeasible(status: SolveStatus, hints: &[&str]) -> Self {
        let remediation = hints
            .iter()
            .map(|h| format!("- {h}"))
            .collect::<Vec<_>>()
            .join("\n");
        SchedulingError::Infeasible {
            status,
            remediation,
        }
    }

    /// Short machine-readable tag used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulingError::Configuration(_) => "configuration",
            SchedulingError::Infeasible { .. } => "infeasible",
            SchedulingError::DecodeInconsistency(_) => "decode_inconsistency",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infeasible_lists_every_hint() {
        let err = SchedulingError::infeasible(
            SolveStatus::Infeasible,
            &["Add more days/slots", "Increase capacities"],
        );
        let text = err.to_string();
        assert!(text.contains("INFEASIBLE"));
        assert!(text.contains("- Add more days/slots\n- Increase capacities"));
        assert_eq!(err.kind(), "infeasible");
    }

    #[test]
    fn config_errors_name_the_entity() {
        let err: SchedulingError = ConfigError::NoFeasibleSlot {
            group: "G7".into(),
            duration_min: 150,
        }
        .into();
        assert!(err.to_string().contains("'G7' duration 150 min"));
        assert_eq!(err.kind(), "configuration");
    }
}
