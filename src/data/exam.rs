use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{Interval, Minute, SolveStatus, SolverSettings};

// Type aliases for clarity
pub type ExamGroupId = String;
pub type StudentId = String;
pub type SlotId = String;

pub const DEFAULT_EXAM_DURATION_MIN: Minute = 120;

/// Time limit for exam solves that do not set one.
pub const EXAM_TIME_LIMIT_SECS: f64 = 40.0;

fn default_exam_duration() -> Minute {
    DEFAULT_EXAM_DURATION_MIN
}

fn default_rest_days() -> u32 {
    1
}

/// A set of courses examined together in one sitting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamGroup {
    pub id: ExamGroupId,
    #[serde(default = "default_exam_duration")]
    pub duration_min: Minute,
    #[serde(default)]
    pub course_codes: Vec<String>,
    #[serde(default)]
    pub course_names: Vec<String>,
}

/// A student and the exam groups they sit.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: StudentId,
    #[serde(default)]
    pub program: String,
    pub exam_groups: Vec<ExamGroupId>,
}

/// Identity of a calendar slot: the date plus the slot label used on that date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotKey {
    pub date: NaiveDate,
    pub slot_id: SlotId,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.date, self.slot_id)
    }
}

/// One sitting in the exam calendar. `capacity: None` means unbounded.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSlot {
    pub date: NaiveDate,
    pub slot_id: SlotId,
    pub start_min: Minute,
    pub end_min: Minute,
    #[serde(default)]
    pub capacity: Option<u32>,
}

impl ExamSlot {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            slot_id: self.slot_id.clone(),
        }
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.start_min, self.end_min)
    }
}

/// Hard pre-assignment of an exam group to a slot.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub exam_group: ExamGroupId,
    pub date: NaiveDate,
    pub slot_id: SlotId,
}

impl Pin {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            slot_id: self.slot_id.clone(),
        }
    }
}

/// Objective weights for the exam soft terms. A zero weight disables a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExamWeights {
    pub capacity: u32,
    pub rest: u32,
    pub spread: u32,
}

impl Default for ExamWeights {
    fn default() -> Self {
        Self {
            capacity: 50,
            rest: 30,
            spread: 5,
        }
    }
}

/// The complete, normalized input for an exam-group scheduling run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInput {
    pub exam_groups: Vec<ExamGroup>,
    pub students: Vec<Student>,
    pub slots: Vec<ExamSlot>,
    #[serde(default)]
    pub pins: Vec<Pin>,
    #[serde(default = "default_rest_days")]
    pub rest_days: u32,
    #[serde(default)]
    pub weights: ExamWeights,
    #[serde(default)]
    pub solver: SolverSettings,
}

/// An exam group placed in its slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAssignment {
    pub exam_group: ExamGroupId,
    pub course_codes: Vec<String>,
    pub course_names: Vec<String>,
    pub students: u32,
    pub date: NaiveDate,
    pub day_index: usize,
    pub slot_id: SlotId,
    pub start_min: Minute,
    pub end_min: Minute,
    pub slot_duration_min: Minute,
}

/// Seats used in a slot against its capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotUsage {
    pub date: NaiveDate,
    pub slot_id: SlotId,
    pub start_min: Minute,
    pub end_min: Minute,
    pub slot_duration_min: Minute,
    pub capacity: Option<u32>,
    pub used: u32,
    pub over: u32,
}

/// A student sitting two exams closer than the configured rest gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestViolation {
    pub student_id: StudentId,
    pub program: String,
    pub exam_a: ExamGroupId,
    pub date_a: NaiveDate,
    pub slot_a: SlotId,
    pub exam_b: ExamGroupId,
    pub date_b: NaiveDate,
    pub slot_b: SlotId,
    pub gap_days: u32,
}

impl fmt::Display for RestViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Student {} sits {} ({} {}) and {} ({} {}) {} day(s) apart",
            self.student_id,
            self.exam_a,
            self.date_a,
            self.slot_a,
            self.exam_b,
            self.date_b,
            self.slot_b,
            self.gap_days
        )
    }
}

/// Students examined on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayLoad {
    pub date: NaiveDate,
    pub day_index: usize,
    pub students: u32,
}

/// An assignment as seen from one program, with that program's head count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramExam {
    #[serde(flatten)]
    pub assignment: ExamAssignment,
    pub program_students: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub solver_status: SolveStatus,
    pub objective_value: f64,
    pub total_students: usize,
    pub total_programs: usize,
    pub total_exam_groups: usize,
    pub total_slots: usize,
    pub unique_days: usize,
    pub rest_days: u32,
    pub weights: ExamWeights,
    pub slots_over_capacity: usize,
    pub total_overage: u64,
    pub rest_violation_pairs: usize,
    pub day_load_spread: u32,
}

/// The final output of an exam-group scheduling run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSchedule {
    pub status: SolveStatus,
    pub objective_value: f64,
    pub assignments: Vec<ExamAssignment>,
    pub capacity_report: Vec<SlotUsage>,
    pub rest_violations: Vec<RestViolation>,
    pub day_loads: Vec<DayLoad>,
    pub programs: BTreeMap<String, Vec<ProgramExam>>,
    pub summary: ExamSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamGroupStats {
    pub exam_group: ExamGroupId,
    pub students: u32,
    pub duration_min: Minute,
    pub feasible_slots: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PinIssueKind {
    UnknownExamGroup,
    UnknownSlot,
    SlotTooShort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinIssue {
    pub exam_group: ExamGroupId,
    pub slot: String,
    pub issue: PinIssueKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStats {
    pub date: NaiveDate,
    pub slot_id: SlotId,
    pub start_min: Minute,
    pub end_min: Minute,
    pub duration_min: Minute,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownEnrollment {
    pub student_id: StudentId,
    pub exam_group: ExamGroupId,
}

/// Dry-run view of an exam input: counts only, no model is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDiagnostics {
    pub students: usize,
    pub programs: usize,
    pub enrollments: usize,
    pub exam_groups: usize,
    pub slots: usize,
    pub unique_days: usize,
    pub max_exams_per_student: usize,
    pub total_pairwise_exam_pairs: u64,
    pub conflicting_group_pairs: usize,
    pub group_stats: Vec<ExamGroupStats>,
    pub groups_without_slot: Vec<ExamGroupId>,
    pub pin_issues: Vec<PinIssue>,
    /// Enrollments naming an exam group that does not exist.
    pub unknown_enrollments: Vec<UnknownEnrollment>,
    pub slot_stats: Vec<SlotStats>,
    /// `None` when at least one slot is uncapacitated.
    pub total_capacity: Option<u64>,
    pub total_seats_demanded: u64,
}
