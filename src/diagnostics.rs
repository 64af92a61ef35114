//! Dry-run diagnostics: the numbers a planner wants before committing to a
//! solve. No model is built here. Only structural errors (duplicate ids,
//! broken calendar or sessions) fail; value and reference problems are
//! listed in the report.

use log::info;
use std::collections::BTreeSet;

use crate::data::{
    ExamDiagnostics, ExamGroupStats, ExamInput, InvigilationDiagnostics, InvigilationInput,
    PinIssue, PinIssueKind, SessionEligibility, SlotStats, StaffIssue, UnknownEnrollment,
};
use crate::error::ConfigError;
use crate::feasibility;
use crate::solver::exam::ExamIndex;
use crate::solver::invigilation::InvigilationIndex;

pub fn exam_diagnostics(input: &ExamInput) -> Result<ExamDiagnostics, ConfigError> {
    let (index, skipped) = ExamIndex::build_lenient(input)?;
    let unknown_enrollments = skipped
        .into_iter()
        .filter_map(|err| match err {
            ConfigError::UnknownReference { id, target_id, .. } => Some(UnknownEnrollment {
                student_id: id,
                exam_group: target_id,
            }),
            _ => None,
        })
        .collect();
    let slot_durations = index.slot_durations();

    let mut group_stats: Vec<ExamGroupStats> = index
        .groups
        .iter()
        .enumerate()
        .map(|(g, group)| ExamGroupStats {
            exam_group: group.id.clone(),
            students: index.sizes[g],
            duration_min: group.duration_min,
            feasible_slots: feasibility::feasible_slots(group.duration_min, &slot_durations).len(),
        })
        .collect();
    group_stats.sort_by(|a, b| {
        a.feasible_slots
            .cmp(&b.feasible_slots)
            .then(b.students.cmp(&a.students))
            .then_with(|| a.exam_group.cmp(&b.exam_group))
    });
    let groups_without_slot = group_stats
        .iter()
        .filter(|s| s.feasible_slots == 0)
        .map(|s| s.exam_group.clone())
        .collect();

    let pin_issues = input
        .pins
        .iter()
        .filter_map(|pin| {
            let issue = match index.resolve_pin(pin) {
                Ok(_) => return None,
                Err(ConfigError::UnknownPinSlot { .. }) => PinIssueKind::UnknownSlot,
                Err(ConfigError::PinSlotTooShort { .. }) => PinIssueKind::SlotTooShort,
                Err(_) => PinIssueKind::UnknownExamGroup,
            };
            Some(PinIssue {
                exam_group: pin.exam_group.clone(),
                slot: pin.slot_key().to_string(),
                issue,
            })
        })
        .collect();

    let slot_stats: Vec<SlotStats> = index
        .slots
        .iter()
        .zip(&slot_durations)
        .map(|(slot, duration)| SlotStats {
            date: slot.date,
            slot_id: slot.slot_id.clone(),
            start_min: slot.start_min,
            end_min: slot.end_min,
            duration_min: *duration,
            capacity: slot.capacity,
        })
        .collect();
    let total_capacity = index
        .slots
        .iter()
        .map(|s| s.capacity.map(u64::from))
        .sum::<Option<u64>>();

    let programs: BTreeSet<&str> = input.students.iter().map(|s| s.program.as_str()).collect();
    let enrollments = index.student_groups.iter().map(Vec::len).sum();
    let total_pairwise_exam_pairs = index
        .student_groups
        .iter()
        .map(|groups| {
            let k = groups.len() as u64;
            k * k.saturating_sub(1) / 2
        })
        .sum();
    let conflicting_group_pairs = index.shared_pairs().len();

    info!(
        "Exam diagnostics: {} students, {} groups, {} slots, {} conflicting pairs",
        input.students.len(),
        index.groups.len(),
        index.slots.len(),
        conflicting_group_pairs
    );

    Ok(ExamDiagnostics {
        students: input.students.len(),
        programs: programs.len(),
        enrollments,
        exam_groups: index.groups.len(),
        slots: index.slots.len(),
        unique_days: index.days.len(),
        max_exams_per_student: index.student_groups.iter().map(Vec::len).max().unwrap_or(0),
        total_pairwise_exam_pairs,
        conflicting_group_pairs,
        group_stats,
        groups_without_slot,
        pin_issues,
        unknown_enrollments,
        slot_stats,
        total_capacity,
        total_seats_demanded: index.sizes.iter().map(|s| u64::from(*s)).sum(),
    })
}

pub fn invigilation_diagnostics(
    input: &InvigilationInput,
) -> Result<InvigilationDiagnostics, ConfigError> {
    let (index, issues) = InvigilationIndex::build_lenient(input)?;
    let staff_issues = issues.into_iter().filter_map(staff_issue).collect();

    let eligibility: Vec<SessionEligibility> = input
        .sessions
        .iter()
        .zip(index.eligible_counts())
        .map(|(session, eligible_staff)| SessionEligibility {
            session_id: session.id.clone(),
            invigilators_needed: session.invigilators_needed,
            eligible_staff,
        })
        .collect();
    let understaffed_sessions = eligibility
        .iter()
        .filter(|e| e.eligible_staff < e.invigilators_needed as usize)
        .map(|e| e.session_id.clone())
        .collect();

    let demanded_minutes = input
        .sessions
        .iter()
        .zip(&index.durations)
        .map(|(s, d)| u64::from(s.invigilators_needed) * u64::from(*d))
        .sum();
    let capped_minutes = input
        .staff
        .iter()
        .filter_map(|d| d.max_minutes())
        .map(u64::from)
        .sum();

    info!(
        "Invigilation diagnostics: {} sessions, {} staff, {} overlapping pairs",
        input.sessions.len(),
        input.staff.len(),
        index.overlapping.len()
    );

    Ok(InvigilationDiagnostics {
        sessions: input.sessions.len(),
        staff: input.staff.len(),
        total_invigilator_demand: input
            .sessions
            .iter()
            .map(|s| u64::from(s.invigilators_needed))
            .sum(),
        demanded_minutes,
        overlapping_session_pairs: index.overlapping.len(),
        eligibility,
        understaffed_sessions,
        staff_issues,
        capped_minutes,
        uncapped_staff: input.staff.iter().filter(|d| d.max_hours.is_none()).count(),
    })
}

fn staff_issue(err: ConfigError) -> Option<StaffIssue> {
    let message = err.to_string();
    let (staff_id, field) = match err {
        ConfigError::InvalidValue { id, field, .. } => (id, field),
        ConfigError::NonPositiveDuration { id, .. } => (id, "endMin"),
        ConfigError::UnknownReference { id, .. } => (id, "staffId"),
        _ => return None,
    };
    Some(StaffIssue {
        staff_id,
        field: field.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        ExamGroup, ExamSlot, InvigilationSession, LoadType, Pin, SolverSettings, StaffMember,
        Student, Unavailability,
    };
    use chrono::NaiveDate;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn exam_input() -> ExamInput {
        let slot = |day, id: &str, start, end, capacity| ExamSlot {
            date: date(day),
            slot_id: id.into(),
            start_min: start,
            end_min: end,
            capacity,
        };
        let group = |id: &str, duration| ExamGroup {
            id: id.into(),
            duration_min: duration,
            course_codes: Vec::new(),
            course_names: Vec::new(),
        };
        let student = |id: &str, program: &str, groups: &[&str]| Student {
            id: id.into(),
            program: program.into(),
            exam_groups: groups.iter().map(|g| g.to_string()).collect(),
        };
        ExamInput {
            exam_groups: vec![group("G1", 120), group("G2", 120), group("LONG", 180)],
            students: vec![
                student("S1", "CS", &["G1", "G2"]),
                student("S2", "CS", &["G1", "G2", "LONG"]),
                student("S3", "EE", &["G2"]),
            ],
            slots: vec![
                slot(6, "AM", 540, 660, Some(40)),
                slot(7, "AM", 540, 660, Some(60)),
            ],
            pins: vec![
                Pin {
                    exam_group: "G1".into(),
                    date: date(6),
                    slot_id: "AM".into(),
                },
                Pin {
                    exam_group: "G2".into(),
                    date: date(9),
                    slot_id: "AM".into(),
                },
                Pin {
                    exam_group: "NOPE".into(),
                    date: date(6),
                    slot_id: "AM".into(),
                },
            ],
            rest_days: 1,
            weights: Default::default(),
            solver: SolverSettings::default(),
        }
    }

    #[test]
    fn exam_counts_and_pin_issues() {
        let diag = exam_diagnostics(&exam_input()).unwrap();
        assert_eq!(diag.students, 3);
        assert_eq!(diag.programs, 2);
        assert_eq!(diag.enrollments, 6);
        assert_eq!(diag.unique_days, 2);
        assert_eq!(diag.max_exams_per_student, 3);
        // S1: 1 pair, S2: 3 pairs, S3: none
        assert_eq!(diag.total_pairwise_exam_pairs, 4);
        assert_eq!(diag.conflicting_group_pairs, 3);
        assert_eq!(diag.total_capacity, Some(100));
        assert_eq!(diag.total_seats_demanded, 6);
        assert_eq!(
            diag.pin_issues
                .iter()
                .map(|p| (p.exam_group.as_str(), p.issue))
                .collect::<Vec<_>>(),
            vec![
                ("G2", PinIssueKind::UnknownSlot),
                ("NOPE", PinIssueKind::UnknownExamGroup)
            ]
        );
    }

    #[test]
    fn unplaceable_groups_sort_first() {
        let diag = exam_diagnostics(&exam_input()).unwrap();
        assert_eq!(diag.groups_without_slot, vec!["LONG".to_string()]);
        let order: Vec<&str> = diag
            .group_stats
            .iter()
            .map(|s| s.exam_group.as_str())
            .collect();
        assert_eq!(order, vec!["LONG", "G2", "G1"]);
    }

    #[test]
    fn uncapacitated_slot_leaves_total_open() {
        let mut input = exam_input();
        input.slots[1].capacity = None;
        assert_eq!(exam_diagnostics(&input).unwrap().total_capacity, None);
    }

    #[test]
    fn unknown_enrollments_are_listed_not_raised() {
        let mut input = exam_input();
        input.students[2].exam_groups.push("G404".into());
        let diag = exam_diagnostics(&input).unwrap();
        assert_eq!(
            diag.unknown_enrollments,
            vec![UnknownEnrollment {
                student_id: "S3".into(),
                exam_group: "G404".into(),
            }]
        );
        // the known enrollments still count
        assert_eq!(diag.enrollments, 6);
        assert!(crate::solver::exam::solve(&input).is_err());
    }

    #[test]
    fn exam_diagnostics_still_rejects_broken_calendar() {
        let mut input = exam_input();
        input.slots.clear();
        assert_eq!(exam_diagnostics(&input), Err(ConfigError::EmptyCalendar));
    }

    #[test]
    fn invigilation_eligibility_and_minutes() {
        let day = date(6);
        let session = |id: &str, start, end, needed| InvigilationSession {
            id: id.into(),
            room: "Hall".into(),
            date: day,
            start_min: start,
            end_min: end,
            invigilators_needed: needed,
        };
        let member = |id: &str, max_hours| StaffMember {
            id: id.into(),
            name: id.into(),
            load_type: LoadType::Full,
            max_hours,
            fairness_weight: None,
        };
        let input = InvigilationInput {
            sessions: vec![session("A", 540, 660, 2), session("B", 600, 660, 1)],
            staff: vec![member("D1", Some(1.5)), member("D2", None)],
            unavailability: vec![Unavailability {
                staff_id: "D1".into(),
                date: day,
                start_min: 500,
                end_min: Some(560),
            }],
            solver: SolverSettings::default(),
        };
        let diag = invigilation_diagnostics(&input).unwrap();
        assert_eq!(diag.total_invigilator_demand, 3);
        assert_eq!(diag.demanded_minutes, 2 * 120 + 60);
        assert_eq!(diag.overlapping_session_pairs, 1);
        assert_eq!(diag.eligibility[0].eligible_staff, 1);
        assert_eq!(diag.eligibility[1].eligible_staff, 2);
        assert_eq!(diag.understaffed_sessions, vec!["A".to_string()]);
        assert_eq!(diag.capped_minutes, 90);
        assert_eq!(diag.uncapped_staff, 1);
        assert!(diag.staff_issues.is_empty());
    }

    #[test]
    fn bad_staff_values_are_listed_not_raised() {
        let day = date(6);
        let member = |id: &str, max_hours, fairness_weight| StaffMember {
            id: id.into(),
            name: id.into(),
            load_type: LoadType::Full,
            max_hours,
            fairness_weight,
        };
        let input = InvigilationInput {
            sessions: vec![InvigilationSession {
                id: "A".into(),
                room: "Hall".into(),
                date: day,
                start_min: 540,
                end_min: 660,
                invigilators_needed: 1,
            }],
            staff: vec![
                member("D1", Some(-1.0), None),
                member("D2", None, Some(0)),
                member("D3", None, None),
            ],
            unavailability: vec![
                Unavailability {
                    staff_id: "D3".into(),
                    date: day,
                    start_min: 700,
                    end_min: Some(640),
                },
                Unavailability {
                    staff_id: "GHOST".into(),
                    date: day,
                    start_min: 540,
                    end_min: None,
                },
            ],
            solver: SolverSettings::default(),
        };
        let diag = invigilation_diagnostics(&input).unwrap();
        let issues: Vec<(&str, &str)> = diag
            .staff_issues
            .iter()
            .map(|i| (i.staff_id.as_str(), i.field.as_str()))
            .collect();
        assert_eq!(
            issues,
            vec![
                ("D1", "maxHours"),
                ("D2", "fairnessWeight"),
                ("D3", "endMin"),
                ("GHOST", "staffId"),
            ]
        );
        assert!(diag.staff_issues[0].message.contains("D1"));
        // the broken window blocks nobody
        assert_eq!(diag.eligibility[0].eligible_staff, 3);
        assert!(crate::solver::invigilation::solve(&input).is_err());
    }
}
