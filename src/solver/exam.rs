use chrono::NaiveDate;
use itertools::Itertools;
use log::{debug, info, trace};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use crate::data::{
    DayLoad, EXAM_TIME_LIMIT_SECS, ExamAssignment, ExamGroup, ExamInput, ExamSchedule, ExamSlot,
    ExamSummary, Minute, Pin, ProgramExam, RestViolation, SlotKey, SlotUsage,
};
use crate::engine::{AssignmentSpec, AssignmentVars};
use crate::error::{ConfigError, SchedulingError, collect_or_fail};
use crate::feasibility;
use crate::model::{Linear, ModelBuilder, RawSolution, Var};

const REMEDIATION: &[&str] = &[
    "Add more days/slots",
    "Increase capacities",
    "Reduce fixed constraints",
    "Add longer slots for long exams",
];

/// Index-based, validated view of an [`ExamInput`].
///
/// Groups are ordered by id, slots by `(date, start, slot id)`, and days are
/// the distinct calendar dates in ascending order.
pub(crate) struct ExamIndex<'a> {
    pub groups: Vec<&'a ExamGroup>,
    group_pos: HashMap<&'a str, usize>,
    pub slots: Vec<&'a ExamSlot>,
    slot_pos: HashMap<SlotKey, usize>,
    pub slot_day: Vec<usize>,
    pub days: Vec<NaiveDate>,
    /// Group indices per student, ascending and without repeats.
    pub student_groups: Vec<Vec<usize>>,
    /// Distinct students per group.
    pub sizes: Vec<u32>,
}

impl<'a> ExamIndex<'a> {
    pub fn build(input: &'a ExamInput) -> Result<Self, ConfigError> {
        Self::build_with(input, None)
    }

    /// Like [`ExamIndex::build`], but enrollments in unknown groups are
    /// dropped and returned instead of failing the build.
    pub fn build_lenient(input: &'a ExamInput) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        let mut skipped = Vec::new();
        let index = Self::build_with(input, Some(&mut skipped))?;
        Ok((index, skipped))
    }

    fn build_with(
        input: &'a ExamInput,
        mut skipped: Option<&mut Vec<ConfigError>>,
    ) -> Result<Self, ConfigError> {
        if input.slots.is_empty() {
            return Err(ConfigError::EmptyCalendar);
        }
        let mut slots: Vec<&ExamSlot> = input.slots.iter().collect();
        slots.sort_by(|a, b| {
            (a.date, a.start_min, &a.slot_id).cmp(&(b.date, b.start_min, &b.slot_id))
        });

        let mut slot_pos = HashMap::with_capacity(slots.len());
        for (t, slot) in slots.iter().enumerate() {
            if slot.interval().duration().is_none() {
                return Err(ConfigError::NonPositiveDuration {
                    kind: "slot",
                    id: slot.key().to_string(),
                    start_min: slot.start_min,
                    end_min: slot.end_min,
                });
            }
            if slot_pos.insert(slot.key(), t).is_some() {
                return Err(ConfigError::DuplicateId {
                    kind: "slot",
                    id: slot.key().to_string(),
                });
            }
        }

        let days: Vec<NaiveDate> = slots.iter().map(|s| s.date).dedup().collect();
        let day_pos: HashMap<NaiveDate, usize> =
            days.iter().enumerate().map(|(d, date)| (*date, d)).collect();
        let slot_day = slots.iter().map(|s| day_pos[&s.date]).collect();

        let mut groups: Vec<&ExamGroup> = input.exam_groups.iter().collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        let mut group_pos = HashMap::with_capacity(groups.len());
        for (g, group) in groups.iter().enumerate() {
            if group.duration_min == 0 {
                return Err(ConfigError::InvalidValue {
                    kind: "exam group",
                    id: group.id.clone(),
                    field: "durationMin",
                    message: "must be positive".into(),
                });
            }
            if group_pos.insert(group.id.as_str(), g).is_some() {
                return Err(ConfigError::DuplicateId {
                    kind: "exam group",
                    id: group.id.clone(),
                });
            }
        }

        let mut seen_students = BTreeSet::new();
        let mut student_groups = Vec::with_capacity(input.students.len());
        let mut sizes = vec![0u32; groups.len()];
        for student in &input.students {
            if !seen_students.insert(student.id.as_str()) {
                return Err(ConfigError::DuplicateId {
                    kind: "student",
                    id: student.id.clone(),
                });
            }
            let mut taken = Vec::with_capacity(student.exam_groups.len());
            for group_id in &student.exam_groups {
                match group_pos.get(group_id.as_str()) {
                    Some(&g) => taken.push(g),
                    None => collect_or_fail(
                        &mut skipped,
                        ConfigError::UnknownReference {
                            kind: "student",
                            id: student.id.clone(),
                            target: "exam group",
                            target_id: group_id.clone(),
                        },
                    )?,
                }
            }
            taken.sort_unstable();
            taken.dedup();
            for g in &taken {
                sizes[*g] += 1;
            }
            student_groups.push(taken);
        }

        Ok(Self {
            groups,
            group_pos,
            slots,
            slot_pos,
            slot_day,
            days,
            student_groups,
            sizes,
        })
    }

    pub fn slot_durations(&self) -> Vec<Minute> {
        self.slots
            .iter()
            .map(|s| s.interval().duration().unwrap_or(0))
            .collect()
    }

    pub fn slot_label(&self, t: usize) -> String {
        self.slots[t].key().to_string()
    }

    /// Maps a pin to `(group, slot)` indices, checking the slot is long enough.
    pub fn resolve_pin(&self, pin: &Pin) -> Result<(usize, usize), ConfigError> {
        let g = *self
            .group_pos
            .get(pin.exam_group.as_str())
            .ok_or_else(|| ConfigError::UnknownReference {
                kind: "pin",
                id: pin.exam_group.clone(),
                target: "exam group",
                target_id: pin.exam_group.clone(),
            })?;
        let key = pin.slot_key();
        let t = *self
            .slot_pos
            .get(&key)
            .ok_or_else(|| ConfigError::UnknownPinSlot {
                group: pin.exam_group.clone(),
                slot: key.to_string(),
            })?;
        let slot_min = self.slots[t].interval().duration().unwrap_or(0);
        let duration_min = self.groups[g].duration_min;
        if slot_min < duration_min {
            return Err(ConfigError::PinSlotTooShort {
                group: pin.exam_group.clone(),
                slot: key.to_string(),
                slot_min,
                duration_min,
            });
        }
        Ok((g, t))
    }

    /// Actor-sharing group pairs with the number of students they share.
    pub fn shared_pairs(&self) -> BTreeMap<(usize, usize), u32> {
        feasibility::shared_actor_pairs(self.student_groups.iter().map(Vec::as_slice))
    }
}

/// Variables of a compiled exam model, kept for decoding.
pub(crate) struct ExamModel {
    spec: AssignmentSpec,
    x: AssignmentVars,
    day_vars: Vec<Var>,
    /// `(a, b)`, shared students, gap var, violation var.
    rest_pairs: Vec<((usize, usize), u32, Var, Var)>,
    used: Vec<Var>,
    over: Vec<Option<Var>>,
    day_loads: Vec<Var>,
    spread: Var,
}

/// Declares the exam model: engine constraints plus the three soft terms.
pub(crate) fn compile(
    index: &ExamIndex<'_>,
    input: &ExamInput,
    model: &mut ModelBuilder,
) -> Result<ExamModel, ConfigError> {
    let slot_durations = index.slot_durations();
    let domains = feasibility::duration_feasibility(
        index
            .groups
            .iter()
            .map(|g| (g.id.as_str(), g.duration_min)),
        &slot_durations,
    )?;
    trace!(
        "Generated {} (group, slot) candidates out of a theoretical maximum of {}.",
        domains.iter().map(Vec::len).sum::<usize>(),
        index.groups.len() * index.slots.len()
    );

    let pinned = input
        .pins
        .iter()
        .map(|pin| index.resolve_pin(pin))
        .collect::<Result<Vec<_>, _>>()?;

    let pairs = index.shared_pairs();
    let spec = AssignmentSpec {
        task_labels: index.groups.iter().map(|g| g.id.clone()).collect(),
        option_labels: (0..index.slots.len()).map(|t| index.slot_label(t)).collect(),
        demands: vec![1; index.groups.len()],
        domains,
        exclusive_pairs: pairs.keys().copied().collect(),
        pinned,
        excluded: BTreeSet::new(),
    };
    let x = spec.compile(model)?;

    // day index of each group
    let day_vars: Vec<Var> = (0..index.groups.len())
        .map(|g| {
            let days = x.task(g).iter().map(|(t, _)| index.slot_day[*t] as i64);
            let lo = days.clone().min().unwrap_or(0);
            let hi = days.max().unwrap_or(0);
            let day = model.int_var(format!("day_{g}"), lo, hi);
            let placed: Linear = x
                .task(g)
                .iter()
                .map(|(t, v)| (index.slot_day[*t] as i64, *v))
                .collect();
            model.add_eq(Linear::var(day).minus(placed), 0);
            day
        })
        .collect();

    info!("Adding rest-day penalties for {} group pairs...", pairs.len());
    let rest_days = i64::from(input.rest_days);
    let max_gap = index.days.len().saturating_sub(1) as i64;
    let rest_pairs: Vec<_> = pairs
        .iter()
        .map(|(&(a, b), &shared)| {
            let gap = model.int_var(format!("gap_{a}_{b}"), 0, max_gap);
            model.abs_equality(gap, Linear::var(day_vars[a]).minus(Linear::var(day_vars[b])));
            let violated = model.bool_var(format!("rest_viol_{a}_{b}"));
            model.reify_at_most(violated, Linear::var(gap), rest_days);
            ((a, b), shared, gap, violated)
        })
        .collect();

    info!("Adding capacity overage terms...");
    let mut used = Vec::with_capacity(index.slots.len());
    let mut over = Vec::with_capacity(index.slots.len());
    for (t, slot) in index.slots.iter().enumerate() {
        let seats: Linear = x
            .users_of(t)
            .into_iter()
            .map(|(g, v)| (i64::from(index.sizes[g]), v))
            .collect();
        let used_t = model.bind(format!("used_{t}"), seats);
        let over_t = slot.capacity.map(|cap| {
            let excess = Linear::var(used_t).offset(-i64::from(cap));
            let (_, hi) = model.bounds(&excess);
            let over_t = model.int_var(format!("over_{t}"), 0, hi.max(0));
            model.positive_part(over_t, excess);
            over_t
        });
        used.push(used_t);
        over.push(over_t);
    }

    info!("Adding day-load balance over {} days...", index.days.len());
    let total_seats: i64 = index.sizes.iter().map(|s| i64::from(*s)).sum();
    let day_loads: Vec<Var> = (0..index.days.len())
        .map(|d| {
            let load: Linear = (0..index.slots.len())
                .filter(|t| index.slot_day[*t] == d)
                .map(|t| Linear::var(used[t]))
                .fold(Linear::default(), Linear::plus);
            model.bind(format!("day_load_{d}"), load)
        })
        .collect();
    let max_load = model.int_var("max_day_load", 0, total_seats);
    let min_load = model.int_var("min_day_load", 0, total_seats);
    model.max_equality(max_load, &day_loads);
    model.min_equality(min_load, &day_loads);
    let spread = model.int_var("day_load_spread", 0, total_seats);
    model.add_eq(
        Linear::var(spread)
            .minus(Linear::var(max_load))
            .plus(Linear::var(min_load)),
        0,
    );

    let weights = input.weights;
    for (_, shared, _, violated) in &rest_pairs {
        model.minimize_term(i64::from(weights.rest) * i64::from(*shared), *violated);
    }
    for over_t in over.iter().flatten() {
        model.minimize_term(i64::from(weights.capacity), *over_t);
    }
    model.minimize_term(i64::from(weights.spread), spread);
    info!(
        "Objective defined: capacity x{}, rest x{}, spread x{}.",
        weights.capacity, weights.rest, weights.spread
    );

    Ok(ExamModel {
        spec,
        x,
        day_vars,
        rest_pairs,
        used,
        over,
        day_loads,
        spread,
    })
}

/// Solves the exam-group problem using the HiGHS MILP solver.
pub fn solve(input: &ExamInput) -> Result<ExamSchedule, SchedulingError> {
    let start_time = Instant::now();
    let index = ExamIndex::build(input)?;
    info!(
        "Setting up exam model with {} groups, {} students, {} slots over {} days...",
        index.groups.len(),
        index.student_groups.len(),
        index.slots.len(),
        index.days.len()
    );

    let settings = input.solver.with_default_time_limit(EXAM_TIME_LIMIT_SECS);
    settings.validate()?;

    let mut model = ModelBuilder::new();
    let compiled = compile(&index, input, &mut model)?;
    let raw = model.solve(&settings);
    info!("Solver status {} after {:.2?}", raw.status, start_time.elapsed());

    interpret(&index, input, &compiled, &raw)
}

fn mismatch(what: &str, recomputed: i64, reported: i64) -> SchedulingError {
    SchedulingError::DecodeInconsistency(format!(
        "{what}: recomputed {recomputed}, solver reported {reported}"
    ))
}

/// Decodes the raw assignment and recomputes every reported metric from it.
pub(crate) fn interpret(
    index: &ExamIndex<'_>,
    input: &ExamInput,
    compiled: &ExamModel,
    raw: &RawSolution,
) -> Result<ExamSchedule, SchedulingError> {
    let chosen = compiled.spec.decode(&compiled.x, raw, REMEDIATION)?;
    let slot_of: Vec<usize> = chosen.iter().map(|slots| slots[0]).collect();
    let day_of: Vec<usize> = slot_of.iter().map(|t| index.slot_day[*t]).collect();

    for (g, day) in day_of.iter().enumerate() {
        let reported = raw.int(compiled.day_vars[g]);
        if reported != *day as i64 {
            return Err(mismatch(
                &format!("day of exam group '{}'", index.groups[g].id),
                *day as i64,
                reported,
            ));
        }
    }

    // capacity
    let mut used = vec![0u32; index.slots.len()];
    for (g, t) in slot_of.iter().enumerate() {
        used[*t] += index.sizes[g];
    }
    let mut capacity_report = Vec::with_capacity(index.slots.len());
    let mut total_overage = 0u64;
    for (t, slot) in index.slots.iter().enumerate() {
        let reported = raw.int(compiled.used[t]);
        if reported != i64::from(used[t]) {
            return Err(mismatch(
                &format!("seats used in {}", index.slot_label(t)),
                i64::from(used[t]),
                reported,
            ));
        }
        let over = slot.capacity.map_or(0, |cap| used[t].saturating_sub(cap));
        if let Some(over_var) = compiled.over[t] {
            let reported = raw.int(over_var);
            if reported != i64::from(over) {
                return Err(mismatch(
                    &format!("overage in {}", index.slot_label(t)),
                    i64::from(over),
                    reported,
                ));
            }
        }
        total_overage += u64::from(over);
        capacity_report.push(SlotUsage {
            date: slot.date,
            slot_id: slot.slot_id.clone(),
            start_min: slot.start_min,
            end_min: slot.end_min,
            slot_duration_min: slot.interval().duration().unwrap_or(0),
            capacity: slot.capacity,
            used: used[t],
            over,
        });
    }

    // rest days, per pair against the solver and per student for the report
    let rest_days = input.rest_days;
    let gap = |a: usize, b: usize| day_of[a].abs_diff(day_of[b]) as u32;
    let mut reported_violations = 0i64;
    for ((a, b), shared, gap_var, violated) in &compiled.rest_pairs {
        let reported_gap = raw.int(*gap_var);
        if reported_gap != i64::from(gap(*a, *b)) {
            return Err(mismatch(
                &format!(
                    "day gap between '{}' and '{}'",
                    index.groups[*a].id, index.groups[*b].id
                ),
                i64::from(gap(*a, *b)),
                reported_gap,
            ));
        }
        if raw.is_true(*violated) != (gap(*a, *b) <= rest_days) {
            return Err(SchedulingError::DecodeInconsistency(format!(
                "rest-day flag for '{}' and '{}' disagrees with a gap of {} day(s)",
                index.groups[*a].id,
                index.groups[*b].id,
                gap(*a, *b)
            )));
        }
        if raw.is_true(*violated) {
            reported_violations += i64::from(*shared);
        }
    }

    let mut rest_violations = Vec::new();
    for (s, groups) in index.student_groups.iter().enumerate() {
        let student = &input.students[s];
        for (a, b) in groups.iter().copied().tuple_combinations() {
            let gap_days = gap(a, b);
            if gap_days > rest_days {
                continue;
            }
            let (ta, tb) = (slot_of[a], slot_of[b]);
            rest_violations.push(RestViolation {
                student_id: student.id.clone(),
                program: student.program.clone(),
                exam_a: index.groups[a].id.clone(),
                date_a: index.slots[ta].date,
                slot_a: index.slots[ta].slot_id.clone(),
                exam_b: index.groups[b].id.clone(),
                date_b: index.slots[tb].date,
                slot_b: index.slots[tb].slot_id.clone(),
                gap_days,
            });
        }
    }
    if rest_violations.len() as i64 != reported_violations {
        return Err(mismatch(
            "rest-day violations",
            rest_violations.len() as i64,
            reported_violations,
        ));
    }
    rest_violations.sort_by(|a, b| {
        (&a.program, &a.student_id, a.gap_days).cmp(&(&b.program, &b.student_id, b.gap_days))
    });
    for violation in &rest_violations {
        trace!("Rest violation: {}", violation);
    }

    // day balance
    let mut day_students = vec![0u32; index.days.len()];
    for (t, seats) in used.iter().enumerate() {
        day_students[index.slot_day[t]] += seats;
    }
    for (d, load) in day_students.iter().enumerate() {
        let reported = raw.int(compiled.day_loads[d]);
        if reported != i64::from(*load) {
            return Err(mismatch(
                &format!("load on {}", index.days[d]),
                i64::from(*load),
                reported,
            ));
        }
    }
    let spread = match day_students.iter().minmax().into_option() {
        Some((lo, hi)) => hi - lo,
        None => 0,
    };
    let reported_spread = raw.int(compiled.spread);
    if reported_spread != i64::from(spread) {
        return Err(mismatch("day-load spread", i64::from(spread), reported_spread));
    }
    let day_loads = day_students
        .iter()
        .enumerate()
        .map(|(d, students)| DayLoad {
            date: index.days[d],
            day_index: d,
            students: *students,
        })
        .collect();

    let weights = input.weights;
    let objective_value = f64::from(weights.capacity) * total_overage as f64
        + f64::from(weights.rest) * rest_violations.len() as f64
        + f64::from(weights.spread) * f64::from(spread);

    let mut assignments: Vec<ExamAssignment> = slot_of
        .iter()
        .enumerate()
        .map(|(g, t)| {
            let group = index.groups[g];
            let slot = index.slots[*t];
            ExamAssignment {
                exam_group: group.id.clone(),
                course_codes: group.course_codes.clone(),
                course_names: group.course_names.clone(),
                students: index.sizes[g],
                date: slot.date,
                day_index: index.slot_day[*t],
                slot_id: slot.slot_id.clone(),
                start_min: slot.start_min,
                end_min: slot.end_min,
                slot_duration_min: slot.interval().duration().unwrap_or(0),
            }
        })
        .collect();
    assignments.sort_by(|a, b| {
        (a.day_index, a.start_min, &a.slot_id, &a.exam_group)
            .cmp(&(b.day_index, b.start_min, &b.slot_id, &b.exam_group))
    });

    let programs = program_views(index, input, &assignments);
    debug!(
        "Decoded {} assignments, {} rest violations, overage {}, spread {}",
        assignments.len(),
        rest_violations.len(),
        total_overage,
        spread
    );

    let summary = ExamSummary {
        solver_status: raw.status,
        objective_value,
        total_students: input.students.len(),
        total_programs: programs.len(),
        total_exam_groups: index.groups.len(),
        total_slots: index.slots.len(),
        unique_days: index.days.len(),
        rest_days,
        weights,
        slots_over_capacity: capacity_report.iter().filter(|u| u.over > 0).count(),
        total_overage,
        rest_violation_pairs: rest_violations.len(),
        day_load_spread: spread,
    };

    Ok(ExamSchedule {
        status: raw.status,
        objective_value,
        assignments,
        capacity_report,
        rest_violations,
        day_loads,
        programs,
        summary,
    })
}

/// Each program's exams, with the number of that program's students per group.
fn program_views(
    index: &ExamIndex<'_>,
    input: &ExamInput,
    assignments: &[ExamAssignment],
) -> BTreeMap<String, Vec<ProgramExam>> {
    let mut counts: BTreeMap<&str, HashMap<&str, u32>> = BTreeMap::new();
    for (s, groups) in index.student_groups.iter().enumerate() {
        let program = counts.entry(input.students[s].program.as_str()).or_default();
        for g in groups {
            *program.entry(index.groups[*g].id.as_str()).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .map(|(program, per_group)| {
            let exams = assignments
                .iter()
                .filter_map(|a| {
                    per_group.get(a.exam_group.as_str()).map(|n| ProgramExam {
                        assignment: a.clone(),
                        program_students: *n,
                    })
                })
                .collect();
            (program.to_string(), exams)
        })
        .collect()
}
