//! Generic "assignment with exclusivity" engine shared by both schedulers.
//!
//! Every task picks exactly `demand` options out of its domain (one slot for
//! an exam group, K staff for an invigilation session). Two tasks listed as
//! an exclusive pair may never pick the same option. Pins force an option
//! in, exclusions force it out. Instance-specific soft terms are layered on
//! top by the callers using the returned [`AssignmentVars`].

use log::{debug, info};
use std::collections::BTreeSet;

use crate::data::SolveStatus;
use crate::error::{ConfigError, SchedulingError};
use crate::model::{Linear, ModelBuilder, RawSolution, Var};

/// Structure of one assignment problem, built from validated entities.
#[derive(Debug, Clone, Default)]
pub struct AssignmentSpec {
    pub task_labels: Vec<String>,
    pub option_labels: Vec<String>,
    pub demands: Vec<u32>,
    /// Candidate options per task, ascending.
    pub domains: Vec<Vec<usize>>,
    /// Task pairs `(a, b)`, `a < b`, that may not share an option.
    pub exclusive_pairs: Vec<(usize, usize)>,
    /// `(task, option)` pairs forced to 1.
    pub pinned: Vec<(usize, usize)>,
    /// `(task, option)` pairs forced to 0.
    pub excluded: BTreeSet<(usize, usize)>,
}

/// Decision variables `x[task, option]`, grouped by task.
#[derive(Debug, Clone)]
pub struct AssignmentVars {
    cells: Vec<Vec<(usize, Var)>>,
}

impl AssignmentVars {
    pub fn task(&self, task: usize) -> &[(usize, Var)] {
        &self.cells[task]
    }

    pub fn get(&self, task: usize, option: usize) -> Option<Var> {
        self.cells[task]
            .iter()
            .find(|(o, _)| *o == option)
            .map(|(_, v)| *v)
    }

    /// `(task, var)` for every task that may pick `option`.
    pub fn users_of(&self, option: usize) -> Vec<(usize, Var)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(task, cells)| {
                cells
                    .iter()
                    .find(|(o, _)| *o == option)
                    .map(|(_, v)| (task, *v))
            })
            .collect()
    }
}

impl AssignmentSpec {
    fn pins_of(&self, task: usize) -> Vec<usize> {
        let mut pins: Vec<usize> = self
            .pinned
            .iter()
            .filter(|(t, _)| *t == task)
            .map(|(_, o)| *o)
            .collect();
        pins.sort_unstable();
        pins.dedup();
        pins
    }

    /// Rejects structures the solver could only answer with "infeasible".
    pub fn validate(&self) -> Result<(), ConfigError> {
        for &(task, option) in &self.pinned {
            if !self.domains[task].contains(&option) || self.excluded.contains(&(task, option)) {
                return Err(ConfigError::PinOutsideDomain {
                    task: self.task_labels[task].clone(),
                    option: self.option_labels[option].clone(),
                });
            }
        }

        for (task, demand) in self.demands.iter().enumerate() {
            let pins = self.pins_of(task);
            if pins.len() > *demand as usize {
                return Err(if *demand == 1 {
                    ConfigError::ConflictingPins {
                        task: self.task_labels[task].clone(),
                        first: self.option_labels[pins[0]].clone(),
                        second: self.option_labels[pins[1]].clone(),
                    }
                } else {
                    ConfigError::TooManyPins {
                        task: self.task_labels[task].clone(),
                        pinned: pins.len(),
                        required: *demand,
                    }
                });
            }

            let eligible = self.domains[task]
                .iter()
                .filter(|o| !self.excluded.contains(&(task, **o)))
                .count();
            if eligible < *demand as usize {
                return Err(ConfigError::InsufficientCandidates {
                    task: self.task_labels[task].clone(),
                    required: *demand,
                    eligible,
                });
            }
        }

        for &(a, b) in &self.exclusive_pairs {
            let pins_b = self.pins_of(b);
            if let Some(option) = self.pins_of(a).into_iter().find(|o| pins_b.contains(o)) {
                return Err(ConfigError::PinnedConflict {
                    first: self.task_labels[a].clone(),
                    second: self.task_labels[b].clone(),
                    option: self.option_labels[option].clone(),
                });
            }
        }
        Ok(())
    }

    /// Declares `x[task, option]` and every hard constraint of the engine.
    pub fn compile(&self, model: &mut ModelBuilder) -> Result<AssignmentVars, ConfigError> {
        self.validate()?;

        let cells: Vec<Vec<(usize, Var)>> = self
            .domains
            .iter()
            .enumerate()
            .map(|(task, domain)| {
                domain
                    .iter()
                    .map(|&option| (option, model.bool_var(format!("x_{task}_{option}"))))
                    .collect()
            })
            .collect();
        let vars = AssignmentVars { cells };
        debug!("Declared {} assignment variables", model.num_vars());

        info!("Adding exact-count constraints...");
        for (task, demand) in self.demands.iter().enumerate() {
            let chosen: Linear = vars.task(task).iter().map(|(_, v)| *v).collect();
            model.add_eq(chosen, i64::from(*demand));
        }

        info!("Adding {} pins and {} exclusions...", self.pinned.len(), self.excluded.len());
        for &(task, option) in &self.pinned {
            if let Some(x) = vars.get(task, option) {
                model.fix(x, 1);
            }
        }
        for &(task, option) in &self.excluded {
            if let Some(x) = vars.get(task, option) {
                model.fix(x, 0);
            }
        }

        info!("Adding mutual exclusion for {} task pairs...", self.exclusive_pairs.len());
        let before = model.num_constraints();
        for &(a, b) in &self.exclusive_pairs {
            for &(option, xa) in vars.task(a) {
                if self.excluded.contains(&(a, option)) || self.excluded.contains(&(b, option)) {
                    continue;
                }
                if let Some(xb) = vars.get(b, option) {
                    model.add_le(Linear::var(xa).with_term(1, xb), 1);
                }
            }
        }
        debug!(
            "Mutual exclusion produced {} constraints",
            model.num_constraints() - before
        );

        Ok(vars)
    }

    /// Chosen options per task, read straight from the raw values.
    pub fn read(&self, vars: &AssignmentVars, raw: &RawSolution) -> Vec<Vec<usize>> {
        (0..self.demands.len())
            .map(|task| {
                vars.task(task)
                    .iter()
                    .filter(|(_, v)| raw.is_true(*v))
                    .map(|(o, _)| *o)
                    .collect()
            })
            .collect()
    }

    /// Re-checks every hard rule against a decoded choice.
    pub fn verify(&self, chosen: &[Vec<usize>]) -> Result<(), String> {
        for (task, options) in chosen.iter().enumerate() {
            let label = &self.task_labels[task];
            if options.len() != self.demands[task] as usize {
                return Err(format!(
                    "'{}' received {} assignment(s) but requires {}",
                    label,
                    options.len(),
                    self.demands[task]
                ));
            }
            if let Some(o) = options.iter().find(|o| !self.domains[task].contains(o)) {
                return Err(format!(
                    "'{}' was given {} outside its domain",
                    label, self.option_labels[*o]
                ));
            }
            if let Some(o) = options.iter().find(|o| self.excluded.contains(&(task, **o))) {
                return Err(format!(
                    "'{}' was given excluded {}",
                    label, self.option_labels[*o]
                ));
            }
            if let Some(o) = self.pins_of(task).into_iter().find(|o| !options.contains(o)) {
                return Err(format!(
                    "'{}' is pinned to {} but was not given it",
                    label, self.option_labels[o]
                ));
            }
        }
        for &(a, b) in &self.exclusive_pairs {
            if let Some(o) = chosen[a].iter().find(|o| chosen[b].contains(o)) {
                return Err(format!(
                    "'{}' and '{}' both use {}",
                    self.task_labels[a], self.task_labels[b], self.option_labels[*o]
                ));
            }
        }
        Ok(())
    }

    /// Turns a terminal solver result into chosen options or the matching error.
    ///
    /// A failing status is infeasibility. A feasible (time-limited) status
    /// whose values break hard rules means no incumbent was found. An optimal
    /// status whose values break hard rules is an internal inconsistency.
    pub fn decode(
        &self,
        vars: &AssignmentVars,
        raw: &RawSolution,
        remediation: &[&str],
    ) -> Result<Vec<Vec<usize>>, SchedulingError> {
        if !raw.status.is_success() {
            return Err(SchedulingError::infeasible(raw.status, remediation));
        }
        let chosen = self.read(vars, raw);
        match self.verify(&chosen) {
            Ok(()) => Ok(chosen),
            Err(_) if raw.status == SolveStatus::Feasible => {
                Err(SchedulingError::infeasible(SolveStatus::Timeout, remediation))
            }
            Err(message) => Err(SchedulingError::DecodeInconsistency(message)),
        }
    }
}
