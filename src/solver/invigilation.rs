use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::data::{
    FairnessSummary, INVIGILATION_TIME_LIMIT_SECS, Interval, InvigilationInput,
    InvigilationSchedule, SessionAssignment, StaffLoad,
};
use crate::engine::{AssignmentSpec, AssignmentVars};
use crate::error::{ConfigError, SchedulingError, collect_or_fail};
use crate::feasibility;
use crate::model::{Linear, ModelBuilder, RawSolution, Var};

const REMEDIATION: &[&str] = &[
    "InvigilatorsNeeded too high for overlapping sessions",
    "Too many unavailability windows",
    "MaxHours too small for all staff combined",
];

/// Index-based, validated view of an [`InvigilationInput`].
pub(crate) struct InvigilationIndex<'a> {
    input: &'a InvigilationInput,
    /// `(date, interval)` per session, in input order.
    pub windows: Vec<(NaiveDate, Interval)>,
    pub durations: Vec<u32>,
    /// `(task, staff)` pairs blocked by unavailability.
    pub excluded: BTreeSet<(usize, usize)>,
    pub overlapping: Vec<(usize, usize)>,
}

impl<'a> InvigilationIndex<'a> {
    pub fn build(input: &'a InvigilationInput) -> Result<Self, ConfigError> {
        Self::build_with(input, None)
    }

    /// Like [`InvigilationIndex::build`], but invalid staff values and
    /// broken or orphaned unavailability windows are returned instead of
    /// failing the build. Skipped windows block nobody.
    pub fn build_lenient(
        input: &'a InvigilationInput,
    ) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        let mut issues = Vec::new();
        let index = Self::build_with(input, Some(&mut issues))?;
        Ok((index, issues))
    }

    fn build_with(
        input: &'a InvigilationInput,
        mut issues: Option<&mut Vec<ConfigError>>,
    ) -> Result<Self, ConfigError> {
        let mut session_ids = BTreeSet::new();
        let mut windows = Vec::with_capacity(input.sessions.len());
        let mut durations = Vec::with_capacity(input.sessions.len());
        for session in &input.sessions {
            if !session_ids.insert(session.id.as_str()) {
                return Err(ConfigError::DuplicateId {
                    kind: "session",
                    id: session.id.clone(),
                });
            }
            let interval = session.interval();
            let duration = interval
                .duration()
                .ok_or_else(|| ConfigError::NonPositiveDuration {
                    kind: "session",
                    id: session.id.clone(),
                    start_min: session.start_min,
                    end_min: session.end_min,
                })?;
            windows.push((session.date, interval));
            durations.push(duration);
        }

        let mut staff_pos = HashMap::with_capacity(input.staff.len());
        for (d, member) in input.staff.iter().enumerate() {
            if staff_pos.insert(member.id.as_str(), d).is_some() {
                return Err(ConfigError::DuplicateId {
                    kind: "staff member",
                    id: member.id.clone(),
                });
            }
            if let Some(hours) = member.max_hours {
                if !hours.is_finite() || hours < 0.0 {
                    collect_or_fail(
                        &mut issues,
                        ConfigError::InvalidValue {
                            kind: "staff member",
                            id: member.id.clone(),
                            field: "maxHours",
                            message: format!("{hours} is not a non-negative number of hours"),
                        },
                    )?;
                }
            }
            if member.weight() == 0 {
                collect_or_fail(
                    &mut issues,
                    ConfigError::InvalidValue {
                        kind: "staff member",
                        id: member.id.clone(),
                        field: "fairnessWeight",
                        message: "must be positive".into(),
                    },
                )?;
            }
        }

        let mut busy = Vec::with_capacity(input.unavailability.len());
        for window in &input.unavailability {
            let interval = window.interval();
            let Some(&d) = staff_pos.get(window.staff_id.as_str()) else {
                warn!(
                    "Skipping unavailability {} on {} for unknown staff member '{}'",
                    interval, window.date, window.staff_id
                );
                if let Some(list) = issues.as_deref_mut() {
                    list.push(ConfigError::UnknownReference {
                        kind: "unavailability",
                        id: window.staff_id.clone(),
                        target: "staff member",
                        target_id: window.staff_id.clone(),
                    });
                }
                continue;
            };
            if interval.duration().is_none() {
                collect_or_fail(
                    &mut issues,
                    ConfigError::NonPositiveDuration {
                        kind: "unavailability of staff member",
                        id: window.staff_id.clone(),
                        start_min: interval.start_min,
                        end_min: interval.end_min,
                    },
                )?;
                continue;
            }
            busy.push((d, window.date, interval));
        }

        let excluded = feasibility::unavailability_exclusions(&windows, &busy);
        let overlapping = feasibility::overlapping_pairs(&windows);

        Ok(Self {
            input,
            windows,
            durations,
            excluded,
            overlapping,
        })
    }

    /// Staff members eligible for each session once unavailability is applied.
    pub fn eligible_counts(&self) -> Vec<usize> {
        (0..self.input.sessions.len())
            .map(|s| {
                (0..self.input.staff.len())
                    .filter(|d| !self.excluded.contains(&(s, *d)))
                    .count()
            })
            .collect()
    }

    pub fn total_minutes(&self) -> i64 {
        self.durations.iter().map(|m| i64::from(*m)).sum()
    }
}

/// Variables of a compiled invigilation model.
pub(crate) struct InvigilationModel {
    spec: AssignmentSpec,
    x: AssignmentVars,
    loads: Vec<Var>,
    normalized: Vec<Var>,
    spread: Var,
}

/// Declares the invigilation model: engine constraints, caps and fairness.
pub(crate) fn compile(
    index: &InvigilationIndex<'_>,
    model: &mut ModelBuilder,
) -> Result<InvigilationModel, ConfigError> {
    let input = index.input;
    let all_staff: Vec<usize> = (0..input.staff.len()).collect();
    let spec = AssignmentSpec {
        task_labels: input.sessions.iter().map(|s| s.id.clone()).collect(),
        option_labels: input
            .staff
            .iter()
            .map(|d| format!("staff member {}", d.id))
            .collect(),
        demands: input
            .sessions
            .iter()
            .map(|s| s.invigilators_needed)
            .collect(),
        domains: vec![all_staff; input.sessions.len()],
        exclusive_pairs: index.overlapping.clone(),
        pinned: Vec::new(),
        excluded: index.excluded.clone(),
    };
    let x = spec.compile(model)?;

    info!("Adding workload caps and fairness for {} staff...", input.staff.len());
    let total = index.total_minutes();
    let mut loads = Vec::with_capacity(input.staff.len());
    let mut normalized = Vec::with_capacity(input.staff.len());
    for (d, member) in input.staff.iter().enumerate() {
        let minutes: Linear = x
            .users_of(d)
            .into_iter()
            .map(|(s, v)| (i64::from(index.durations[s]), v))
            .collect();
        let load = model.int_var(format!("load_{d}"), 0, total);
        model.add_eq(Linear::var(load).minus(minutes), 0);
        if let Some(cap) = member.max_minutes() {
            model.add_le(Linear::var(load), i64::from(cap));
        }

        let weight = i64::from(member.weight());
        let norm = model.int_var(format!("norm_{d}"), 0, total * weight);
        model.add_eq(Linear::var(norm).minus(Linear::term(weight, load)), 0);
        loads.push(load);
        normalized.push(norm);
    }

    let upper = normalized
        .iter()
        .map(|v| model.domain(*v).1)
        .max()
        .unwrap_or(0);
    let max_norm = model.int_var("max_norm", 0, upper);
    let min_norm = model.int_var("min_norm", 0, upper);
    model.max_equality(max_norm, &normalized);
    model.min_equality(min_norm, &normalized);
    let spread = model.int_var("spread", 0, upper);
    model.add_eq(
        Linear::var(spread)
            .minus(Linear::var(max_norm))
            .plus(Linear::var(min_norm)),
        0,
    );
    model.minimize_term(1, spread);

    Ok(InvigilationModel {
        spec,
        x,
        loads,
        normalized,
        spread,
    })
}

/// Assigns invigilators to sessions, minimising the spread of normalized load.
pub fn solve(input: &InvigilationInput) -> Result<InvigilationSchedule, SchedulingError> {
    let start_time = Instant::now();
    let index = InvigilationIndex::build(input)?;
    info!(
        "Setting up invigilation model with {} sessions, {} staff, demand {} ({} overlapping pairs)...",
        input.sessions.len(),
        input.staff.len(),
        input
            .sessions
            .iter()
            .map(|s| u64::from(s.invigilators_needed))
            .sum::<u64>(),
        index.overlapping.len()
    );

    let settings = input
        .solver
        .with_default_time_limit(INVIGILATION_TIME_LIMIT_SECS);
    settings.validate()?;

    let mut model = ModelBuilder::new();
    let compiled = compile(&index, &mut model)?;
    let raw = model.solve(&settings);
    info!("Solver status {} after {:.2?}", raw.status, start_time.elapsed());

    interpret(&index, &compiled, &raw)
}

pub(crate) fn interpret(
    index: &InvigilationIndex<'_>,
    compiled: &InvigilationModel,
    raw: &RawSolution,
) -> Result<InvigilationSchedule, SchedulingError> {
    let input = index.input;
    let chosen = compiled.spec.decode(&compiled.x, raw, REMEDIATION)?;

    let mut minutes = vec![0u32; input.staff.len()];
    for (s, staff) in chosen.iter().enumerate() {
        for d in staff {
            minutes[*d] += index.durations[s];
        }
    }

    // per-staff overlap, independent of the pair list the model was built from
    for (d, member) in input.staff.iter().enumerate() {
        let mine: Vec<usize> = (0..chosen.len()).filter(|s| chosen[*s].contains(&d)).collect();
        for (i, a) in mine.iter().enumerate() {
            for b in &mine[i + 1..] {
                let (day_a, int_a) = index.windows[*a];
                let (day_b, int_b) = index.windows[*b];
                if day_a == day_b && int_a.overlaps(&int_b) {
                    return Err(SchedulingError::DecodeInconsistency(format!(
                        "staff member '{}' is in overlapping sessions '{}' ({}) and '{}' ({}) on {}",
                        member.id, input.sessions[*a].id, int_a, input.sessions[*b].id, int_b, day_a
                    )));
                }
            }
        }
    }

    let mut staff_loads = Vec::with_capacity(input.staff.len());
    for (d, member) in input.staff.iter().enumerate() {
        let reported = raw.int(compiled.loads[d]);
        if reported != i64::from(minutes[d]) {
            return Err(SchedulingError::DecodeInconsistency(format!(
                "load of '{}': recomputed {} min, solver reported {}",
                member.id, minutes[d], reported
            )));
        }
        if let Some(cap) = member.max_minutes() {
            if minutes[d] > cap {
                return Err(SchedulingError::DecodeInconsistency(format!(
                    "'{}' works {} min over a cap of {}",
                    member.id, minutes[d], cap
                )));
            }
        }
        let normalized_load = u64::from(minutes[d]) * u64::from(member.weight());
        let reported = raw.int(compiled.normalized[d]);
        if reported != normalized_load as i64 {
            return Err(SchedulingError::DecodeInconsistency(format!(
                "normalized load of '{}': recomputed {}, solver reported {}",
                member.id, normalized_load, reported
            )));
        }
        staff_loads.push(StaffLoad {
            staff_id: member.id.clone(),
            name: member.name.clone(),
            load_type: member.load_type,
            max_hours: member.max_hours,
            load_minutes: minutes[d],
            total_hours: (f64::from(minutes[d]) / 60.0 * 100.0).round() / 100.0,
            normalized_load,
        });
    }

    let max_normalized_load = staff_loads.iter().map(|l| l.normalized_load).max().unwrap_or(0);
    let min_normalized_load = staff_loads.iter().map(|l| l.normalized_load).min().unwrap_or(0);
    let spread = max_normalized_load - min_normalized_load;
    let reported = raw.int(compiled.spread);
    if reported != spread as i64 {
        return Err(SchedulingError::DecodeInconsistency(format!(
            "fairness spread: recomputed {spread}, solver reported {reported}"
        )));
    }

    let sessions = input
        .sessions
        .iter()
        .zip(&chosen)
        .enumerate()
        .map(|(s, (session, staff))| SessionAssignment {
            session_id: session.id.clone(),
            room: session.room.clone(),
            date: session.date,
            start_min: session.start_min,
            end_min: session.end_min,
            duration_min: index.durations[s],
            invigilators_needed: session.invigilators_needed,
            staff_ids: staff.iter().map(|d| input.staff[*d].id.clone()).collect(),
            staff_names: staff.iter().map(|d| input.staff[*d].name.clone()).collect(),
        })
        .collect();
    debug!("Decoded invigilation schedule with fairness spread {}", spread);

    Ok(InvigilationSchedule {
        status: raw.status,
        objective_value: spread as f64,
        sessions,
        staff_loads,
        fairness: FairnessSummary {
            max_normalized_load,
            min_normalized_load,
            spread,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        InvigilationSession, LoadType, SolverSettings, StaffMember, Unavailability,
    };

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn session(id: &str, start: u32, end: u32, needed: u32) -> InvigilationSession {
        InvigilationSession {
            id: id.into(),
            room: format!("R-{id}"),
            date: date(),
            start_min: start,
            end_min: end,
            invigilators_needed: needed,
        }
    }

    fn staff(id: &str, load_type: LoadType, max_hours: Option<f64>) -> StaffMember {
        StaffMember {
            id: id.into(),
            name: format!("Dr {id}"),
            load_type,
            max_hours,
            fairness_weight: None,
        }
    }

    fn input() -> InvigilationInput {
        InvigilationInput {
            sessions: vec![
                session("S1", 540, 660, 1),
                session("S2", 600, 720, 1),
                session("S3", 780, 900, 2),
            ],
            staff: vec![
                staff("D1", LoadType::Full, None),
                staff("D2", LoadType::Full, None),
                staff("D3", LoadType::Half, Some(2.0)),
            ],
            unavailability: Vec::new(),
            solver: SolverSettings {
                time_limit_secs: Some(20.0),
                workers: 1,
                ..SolverSettings::default()
            },
        }
    }

    #[test]
    fn index_finds_overlaps_and_blocked_staff() {
        let mut inp = input();
        inp.unavailability.push(Unavailability {
            staff_id: "D2".into(),
            date: date(),
            start_min: 800,
            end_min: None,
        });
        inp.unavailability.push(Unavailability {
            staff_id: "ghost".into(),
            date: date(),
            start_min: 540,
            end_min: Some(900),
        });
        let index = InvigilationIndex::build(&inp).unwrap();
        assert_eq!(index.overlapping, vec![(0, 1)]);
        assert_eq!(index.excluded.iter().copied().collect::<Vec<_>>(), vec![(2, 1)]);
        assert_eq!(index.eligible_counts(), vec![3, 3, 2]);
        assert_eq!(index.total_minutes(), 360);
    }

    #[test]
    fn zero_length_session_is_rejected() {
        let mut inp = input();
        inp.sessions.push(session("S4", 600, 600, 1));
        assert!(matches!(
            InvigilationIndex::build(&inp),
            Err(ConfigError::NonPositiveDuration { kind: "session", .. })
        ));
    }

    #[test]
    fn inverted_unavailability_window_is_rejected() {
        let mut inp = input();
        inp.unavailability.push(Unavailability {
            staff_id: "D1".into(),
            date: date(),
            start_min: 700,
            end_min: Some(640),
        });
        assert!(matches!(
            InvigilationIndex::build(&inp),
            Err(ConfigError::NonPositiveDuration { start_min: 700, end_min: 640, .. })
        ));
    }

    #[test]
    fn window_near_end_of_range_does_not_overflow() {
        let window = Unavailability {
            staff_id: "D1".into(),
            date: date(),
            start_min: u32::MAX - 10,
            end_min: None,
        };
        assert_eq!(window.interval().end_min, u32::MAX);
    }

    #[test]
    fn lenient_build_collects_staff_problems() {
        let mut inp = input();
        inp.staff[0].max_hours = Some(-2.0);
        inp.staff[1].fairness_weight = Some(0);
        inp.unavailability.push(Unavailability {
            staff_id: "D3".into(),
            date: date(),
            start_min: 800,
            end_min: Some(800),
        });
        assert!(InvigilationIndex::build(&inp).is_err());

        let (index, issues) = InvigilationIndex::build_lenient(&inp).unwrap();
        assert_eq!(issues.len(), 3);
        assert!(index.excluded.is_empty());
    }

    #[test]
    fn too_few_eligible_staff_fails_compilation() {
        let mut inp = input();
        inp.sessions[2].invigilators_needed = 3;
        for id in ["D1", "D3"] {
            inp.unavailability.push(Unavailability {
                staff_id: id.into(),
                date: date(),
                start_min: 780,
                end_min: Some(800),
            });
        }
        let index = InvigilationIndex::build(&inp).unwrap();
        let err = compile(&index, &mut ModelBuilder::new()).err().unwrap();
        assert_eq!(
            err,
            ConfigError::InsufficientCandidates {
                task: "S3".into(),
                required: 3,
                eligible: 1
            }
        );
    }

    #[test]
    fn overlapping_sessions_get_different_staff() {
        let schedule = solve(&input()).unwrap();
        let s1 = &schedule.sessions[0].staff_ids;
        let s2 = &schedule.sessions[1].staff_ids;
        assert_eq!(s1.len(), 1);
        assert_eq!(s2.len(), 1);
        assert_ne!(s1, s2);
        assert_eq!(schedule.sessions[2].staff_ids.len(), 2);
        for load in &schedule.staff_loads {
            if load.staff_id == "D3" {
                assert!(load.load_minutes <= 120);
            }
        }
        assert_eq!(
            schedule.fairness.spread,
            schedule.fairness.max_normalized_load - schedule.fairness.min_normalized_load
        );
    }

    #[test]
    fn tampered_load_is_reported_as_inconsistent() {
        let inp = input();
        let index = InvigilationIndex::build(&inp).unwrap();
        let mut model = ModelBuilder::new();
        let compiled = compile(&index, &mut model).unwrap();
        let mut raw = model.solve(&inp.solver);
        assert!(interpret(&index, &compiled, &raw).is_ok());

        let bumped = raw.int(compiled.spread) as f64 + 1.0;
        raw.set(compiled.spread, bumped);
        assert!(matches!(
            interpret(&index, &compiled, &raw),
            Err(SchedulingError::DecodeInconsistency(_))
        ));
    }
}
