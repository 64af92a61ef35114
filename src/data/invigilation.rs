use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Interval, Minute, SolveStatus, SolverSettings};

pub type StaffId = String;
pub type SessionId = String;

/// Unavailability windows without an end time block this many minutes.
pub const DEFAULT_UNAVAILABILITY_MIN: Minute = 60;

/// Time limit for invigilation solves that do not set one.
pub const INVIGILATION_TIME_LIMIT_SECS: f64 = 25.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    #[default]
    Full,
    Half,
}

impl LoadType {
    /// Multiplier applied to load minutes before balancing.
    pub fn fairness_weight(self) -> u32 {
        match self {
            LoadType::Full => 1,
            LoadType::Half => 2,
        }
    }
}

/// A staff member who can invigilate.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    pub id: StaffId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub load_type: LoadType,
    #[serde(default)]
    pub max_hours: Option<f64>,
    /// Overrides the weight implied by `load_type`.
    #[serde(default)]
    pub fairness_weight: Option<u32>,
}

impl StaffMember {
    pub fn weight(&self) -> u32 {
        self.fairness_weight
            .unwrap_or_else(|| self.load_type.fairness_weight())
    }

    /// Workload cap in minutes, `None` when uncapped.
    pub fn max_minutes(&self) -> Option<u32> {
        self.max_hours.map(|h| (h * 60.0).floor() as u32)
    }
}

/// An exam sitting in a room that needs a fixed number of invigilators.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvigilationSession {
    pub id: SessionId,
    #[serde(default)]
    pub room: String,
    pub date: NaiveDate,
    pub start_min: Minute,
    pub end_min: Minute,
    pub invigilators_needed: u32,
}

impl InvigilationSession {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start_min, self.end_min)
    }
}

/// A window in which a staff member is engaged elsewhere.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unavailability {
    pub staff_id: StaffId,
    pub date: NaiveDate,
    pub start_min: Minute,
    #[serde(default)]
    pub end_min: Option<Minute>,
}

impl Unavailability {
    pub fn interval(&self) -> Interval {
        let end = self
            .end_min
            .unwrap_or(self.start_min.saturating_add(DEFAULT_UNAVAILABILITY_MIN));
        Interval::new(self.start_min, end)
    }
}

/// The complete, normalized input for an invigilation run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvigilationInput {
    pub sessions: Vec<InvigilationSession>,
    pub staff: Vec<StaffMember>,
    #[serde(default)]
    pub unavailability: Vec<Unavailability>,
    #[serde(default)]
    pub solver: SolverSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAssignment {
    pub session_id: SessionId,
    pub room: String,
    pub date: NaiveDate,
    pub start_min: Minute,
    pub end_min: Minute,
    pub duration_min: Minute,
    pub invigilators_needed: u32,
    pub staff_ids: Vec<StaffId>,
    pub staff_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffLoad {
    pub staff_id: StaffId,
    pub name: String,
    pub load_type: LoadType,
    pub max_hours: Option<f64>,
    pub load_minutes: u32,
    pub total_hours: f64,
    pub normalized_load: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FairnessSummary {
    pub max_normalized_load: u64,
    pub min_normalized_load: u64,
    pub spread: u64,
}

/// The final output of an invigilation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvigilationSchedule {
    pub status: SolveStatus,
    pub objective_value: f64,
    pub sessions: Vec<SessionAssignment>,
    pub staff_loads: Vec<StaffLoad>,
    pub fairness: FairnessSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEligibility {
    pub session_id: SessionId,
    pub invigilators_needed: u32,
    pub eligible_staff: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffIssue {
    pub staff_id: StaffId,
    pub field: String,
    pub message: String,
}

/// Dry-run view of an invigilation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvigilationDiagnostics {
    pub sessions: usize,
    pub staff: usize,
    pub total_invigilator_demand: u64,
    pub demanded_minutes: u64,
    pub overlapping_session_pairs: usize,
    pub eligibility: Vec<SessionEligibility>,
    pub understaffed_sessions: Vec<SessionId>,
    /// Staff values and unavailability windows that a solve would reject.
    pub staff_issues: Vec<StaffIssue>,
    /// Sum of caps over capped staff; uncapped staff are not counted.
    pub capped_minutes: u64,
    pub uncapped_staff: usize,
}
