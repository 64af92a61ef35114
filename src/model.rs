//! Thin modelling layer over `good_lp`/HiGHS.
//!
//! Decision variables are addressed through [`Var`] handles and linear
//! expressions through [`Linear`], whose integer domain can be bounded from
//! the variable domains. The bounds drive the big-M constants used to
//! linearise `|e|`, `max`, `min`, `max(0, e)` and reified `e <= k`, all of
//! which are exact: every feasible solver assignment pins the auxiliary
//! variable to the true value.
//!
//! Solving hands back a [`RawSolution`], a plain vector of values indexed by
//! [`Var`], so decoding never needs a live solver.

use good_lp::solvers::SolutionStatus;
use good_lp::{
    Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    constraint, default_solver, variable,
};
use log::{debug, info, warn};
use std::sync::OnceLock;
use std::time::Instant;

use crate::data::{SolveStatus, SolverSettings};

static SOLVER_THREADS: OnceLock<u32> = OnceLock::new();

/// Fixes the HiGHS thread count for this process and returns the count in
/// force. HiGHS sizes its task scheduler on the first run and refuses a
/// different count afterwards, so only the first call takes effect.
pub fn pin_solver_threads(threads: u32) -> u32 {
    *SOLVER_THREADS.get_or_init(|| threads.max(1))
}

/// Handle to a variable registered in a [`ModelBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(usize);

/// An integer linear expression `constant + sum(coef * var)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Linear {
    terms: Vec<(i64, Var)>,
    constant: i64,
}

impl Linear {
    pub fn var(var: Var) -> Self {
        Self::term(1, var)
    }

    pub fn term(coef: i64, var: Var) -> Self {
        Self {
            terms: vec![(coef, var)],
            constant: 0,
        }
    }

    pub fn with_term(mut self, coef: i64, var: Var) -> Self {
        self.terms.push((coef, var));
        self
    }

    pub fn plus(mut self, other: Linear) -> Self {
        self.terms.extend(other.terms);
        self.constant += other.constant;
        self
    }

    pub fn minus(self, other: Linear) -> Self {
        self.plus(other.scaled(-1))
    }

    pub fn offset(mut self, value: i64) -> Self {
        self.constant += value;
        self
    }

    pub fn scaled(mut self, factor: i64) -> Self {
        for (coef, _) in &mut self.terms {
            *coef *= factor;
        }
        self.constant *= factor;
        self
    }
}

impl FromIterator<(i64, Var)> for Linear {
    fn from_iter<I: IntoIterator<Item = (i64, Var)>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
            constant: 0,
        }
    }
}

impl FromIterator<Var> for Linear {
    fn from_iter<I: IntoIterator<Item = Var>>(iter: I) -> Self {
        iter.into_iter().map(|v| (1, v)).collect()
    }
}

/// Builds one MILP and owns every variable and constraint until it is solved.
pub struct ModelBuilder {
    problem: ProblemVariables,
    vars: Vec<Variable>,
    domains: Vec<(i64, i64)>,
    constraints: Vec<Constraint>,
    objective: Linear,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            problem: ProblemVariables::new(),
            vars: Vec::new(),
            domains: Vec::new(),
            constraints: Vec::new(),
            objective: Linear::default(),
        }
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn bool_var(&mut self, name: impl Into<String>) -> Var {
        let var = self.problem.add(variable().binary().name(name));
        self.register(var, (0, 1))
    }

    pub fn int_var(&mut self, name: impl Into<String>, lo: i64, hi: i64) -> Var {
        let var = self
            .problem
            .add(variable().integer().min(lo as f64).max(hi as f64).name(name));
        self.register(var, (lo, hi))
    }

    fn register(&mut self, var: Variable, domain: (i64, i64)) -> Var {
        self.vars.push(var);
        self.domains.push(domain);
        Var(self.vars.len() - 1)
    }

    pub fn domain(&self, var: Var) -> (i64, i64) {
        self.domains[var.0]
    }

    /// Smallest and largest value `e` can take over the variable domains.
    pub fn bounds(&self, e: &Linear) -> (i64, i64) {
        e.terms
            .iter()
            .fold((e.constant, e.constant), |(lo, hi), &(coef, var)| {
                let (vlo, vhi) = self.domains[var.0];
                let (a, b) = (coef * vlo, coef * vhi);
                (lo + a.min(b), hi + a.max(b))
            })
    }

    fn expression(&self, e: &Linear) -> Expression {
        e.terms
            .iter()
            .fold(Expression::from(e.constant as f64), |acc, &(coef, var)| {
                acc + (coef as f64) * self.vars[var.0]
            })
    }

    pub fn add_eq(&mut self, e: Linear, rhs: i64) {
        let lhs = self.expression(&e);
        let rhs = rhs as f64;
        self.constraints.push(constraint!(lhs == rhs));
    }

    pub fn add_le(&mut self, e: Linear, rhs: i64) {
        let lhs = self.expression(&e);
        let rhs = rhs as f64;
        self.constraints.push(constraint!(lhs <= rhs));
    }

    pub fn add_ge(&mut self, e: Linear, rhs: i64) {
        let lhs = self.expression(&e);
        let rhs = rhs as f64;
        self.constraints.push(constraint!(lhs >= rhs));
    }

    pub fn fix(&mut self, var: Var, value: i64) {
        self.add_eq(Linear::var(var), value);
    }

    /// New integer variable constrained to equal `e`, with `e`'s domain.
    pub fn bind(&mut self, name: impl Into<String>, e: Linear) -> Var {
        let (lo, hi) = self.bounds(&e);
        let var = self.int_var(name, lo, hi);
        self.add_eq(Linear::var(var).minus(e), 0);
        var
    }

    /// `target == |e|`.
    pub fn abs_equality(&mut self, target: Var, e: Linear) {
        let (lo, hi) = self.bounds(&e);
        let t = Linear::var(target);
        if lo >= 0 {
            self.add_eq(t.minus(e), 0);
            return;
        }
        if hi <= 0 {
            self.add_eq(t.plus(e), 0);
            return;
        }
        let big_m = 2 * (-lo).max(hi);
        let positive = self.bool_var(format!("abs_dir_{}", target.0));
        self.add_ge(t.clone().minus(e.clone()), 0);
        self.add_ge(t.clone().plus(e.clone()), 0);
        // positive = 1 -> target <= e, positive = 0 -> target <= -e
        self.add_le(t.clone().minus(e.clone()).with_term(big_m, positive), big_m);
        self.add_le(t.plus(e).with_term(-big_m, positive), 0);
    }

    /// `target == max(vars)`; the max of nothing is 0.
    pub fn max_equality(&mut self, target: Var, vars: &[Var]) {
        if vars.is_empty() {
            self.fix(target, 0);
            return;
        }
        let upper = vars.iter().map(|v| self.domain(*v).1).max().unwrap_or(0);
        let mut selectors = Vec::with_capacity(vars.len());
        for (i, &v) in vars.iter().enumerate() {
            let s = self.bool_var(format!("max_sel_{}_{}", target.0, i));
            let slack = upper - self.domain(v).0;
            self.add_ge(Linear::var(target).minus(Linear::var(v)), 0);
            // selected -> target <= v
            self.add_le(
                Linear::var(target)
                    .minus(Linear::var(v))
                    .with_term(slack, s),
                slack,
            );
            selectors.push(s);
        }
        self.add_eq(selectors.into_iter().collect(), 1);
    }

    /// `target == min(vars)`; the min of nothing is 0.
    pub fn min_equality(&mut self, target: Var, vars: &[Var]) {
        if vars.is_empty() {
            self.fix(target, 0);
            return;
        }
        let lower = vars.iter().map(|v| self.domain(*v).0).min().unwrap_or(0);
        let mut selectors = Vec::with_capacity(vars.len());
        for (i, &v) in vars.iter().enumerate() {
            let s = self.bool_var(format!("min_sel_{}_{}", target.0, i));
            let slack = self.domain(v).1 - lower;
            self.add_le(Linear::var(target).minus(Linear::var(v)), 0);
            // selected -> target >= v
            self.add_ge(
                Linear::var(target)
                    .minus(Linear::var(v))
                    .with_term(-slack, s),
                -slack,
            );
            selectors.push(s);
        }
        self.add_eq(selectors.into_iter().collect(), 1);
    }

    /// `target == max(0, e)`.
    pub fn positive_part(&mut self, target: Var, e: Linear) {
        let (lo, hi) = self.bounds(&e);
        if hi <= 0 {
            self.fix(target, 0);
            return;
        }
        if lo >= 0 {
            self.add_eq(Linear::var(target).minus(e), 0);
            return;
        }
        let active = self.bool_var(format!("pos_{}", target.0));
        self.add_ge(Linear::var(target).minus(e.clone()), 0);
        self.add_ge(Linear::var(target), 0);
        // active = 1 -> target <= e, active = 0 -> target <= 0
        self.add_le(
            Linear::var(target).minus(e).with_term(-lo, active),
            -lo,
        );
        self.add_le(Linear::var(target).with_term(-hi, active), 0);
    }

    /// Implication pair: `control = 1 -> e <= k` and `control = 0 -> e >= k + 1`.
    ///
    /// For integer `e` exactly one branch holds, so `control` is the truth
    /// value of `e <= k`. When the domain of `e` decides the predicate the
    /// control is fixed instead.
    pub fn reify_at_most(&mut self, control: Var, e: Linear, k: i64) {
        let (lo, hi) = self.bounds(&e);
        if hi <= k {
            self.fix(control, 1);
            return;
        }
        if lo > k {
            self.fix(control, 0);
            return;
        }
        self.add_le(e.clone().with_term(hi - k, control), hi);
        self.add_ge(e.with_term(k + 1 - lo, control), k + 1);
    }

    /// Adds `coef * var` to the minimised objective.
    pub fn minimize_term(&mut self, coef: i64, var: Var) {
        self.objective.terms.push((coef, var));
    }

    /// Runs HiGHS once with the given limits and returns the raw assignment.
    pub fn solve(self, settings: &SolverSettings) -> RawSolution {
        let start_time = Instant::now();
        let objective = self.expression(&self.objective);
        let ModelBuilder {
            problem,
            vars,
            constraints,
            ..
        } = self;

        let threads = pin_solver_threads(settings.workers);
        if threads != settings.workers {
            debug!(
                "Using the process-wide {} solver threads instead of the {} requested",
                threads, settings.workers
            );
        }
        let time_limit = settings.time_limit();
        info!(
            "Solving MILP with {} variables and {} constraints (time limit {}s, {} threads)...",
            vars.len(),
            constraints.len(),
            time_limit,
            threads
        );
        let mut model = problem
            .minimise(objective)
            .using(default_solver)
            .set_option("threads", threads as i32)
            .set_option("random_seed", settings.random_seed)
            .set_option("time_limit", time_limit)
            .set_option(
                "log_to_console",
                if settings.log_to_console { "true" } else { "false" },
            );
        for c in constraints {
            model.add_constraint(c);
        }

        let raw = match model.solve() {
            Ok(solution) => {
                let status = match solution.status() {
                    SolutionStatus::Optimal => SolveStatus::Optimal,
                    _ => SolveStatus::Feasible,
                };
                let values = vars.iter().map(|v| solution.value(*v)).collect();
                RawSolution::new(status, values)
            }
            Err(ResolutionError::Infeasible) => RawSolution::failed(SolveStatus::Infeasible),
            Err(e) => {
                warn!("Solver returned without a solution: {}", e);
                RawSolution::failed(SolveStatus::Unknown)
            }
        };
        debug!(
            "Solver finished with status {} in {:.2?}",
            raw.status,
            start_time.elapsed()
        );
        raw
    }
}

/// Solver status plus one value per [`Var`], in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSolution {
    pub status: SolveStatus,
    values: Vec<f64>,
}

impl RawSolution {
    pub fn new(status: SolveStatus, values: Vec<f64>) -> Self {
        Self { status, values }
    }

    pub fn failed(status: SolveStatus) -> Self {
        Self::new(status, Vec::new())
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    /// Integer value of `var`, rounded to absorb solver tolerances.
    pub fn int(&self, var: Var) -> i64 {
        self.values.get(var.0).map_or(0, |v| v.round() as i64)
    }

    pub fn is_true(&self, var: Var) -> bool {
        self.values.get(var.0).is_some_and(|v| *v > 0.5)
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, var: Var, value: f64) {
        self.values[var.0] = value;
    }

    pub fn eval(&self, e: &Linear) -> i64 {
        e.terms
            .iter()
            .fold(e.constant, |acc, &(coef, var)| acc + coef * self.int(var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn quick() -> SolverSettings {
        SolverSettings {
            time_limit_secs: Some(10.0),
            workers: 1,
            ..SolverSettings::default()
        }
    }

    #[test]
    fn bounds_follow_coefficient_signs() {
        let mut m = ModelBuilder::new();
        let a = m.int_var("a", 0, 4);
        let b = m.int_var("b", 1, 3);
        let e = Linear::var(a).minus(Linear::term(2, b)).offset(1);
        assert_eq!(m.bounds(&e), (1 - 6, 1 + 4 - 2));
    }

    #[test]
    fn eval_rounds_solver_noise() {
        let mut m = ModelBuilder::new();
        let a = m.int_var("a", 0, 10);
        let b = m.bool_var("b");
        let raw = RawSolution::new(SolveStatus::Optimal, vec![2.9999999, 0.0000001]);
        assert_eq!(raw.int(a), 3);
        assert!(!raw.is_true(b));
        assert_eq!(raw.eval(&Linear::term(5, a).with_term(7, b).offset(1)), 16);
    }

    #[rstest]
    #[case(3, 7, 4)]
    #[case(7, 3, 4)]
    #[case(5, 5, 0)]
    fn abs_equality_is_exact(#[case] a_val: i64, #[case] b_val: i64, #[case] expected: i64) {
        let mut m = ModelBuilder::new();
        let a = m.int_var("a", 0, 9);
        let b = m.int_var("b", 0, 9);
        let gap = m.int_var("gap", 0, 9);
        m.fix(a, a_val);
        m.fix(b, b_val);
        m.abs_equality(gap, Linear::var(a).minus(Linear::var(b)));
        // pull gap up; exactness must still hold
        m.minimize_term(-1, gap);
        let raw = m.solve(&quick());
        assert!(raw.status.is_success());
        assert_eq!(raw.int(gap), expected);
    }

    #[rstest]
    #[case(1, 1, true)]
    #[case(2, 1, false)]
    #[case(0, 0, true)]
    fn reified_bound_matches_predicate(#[case] value: i64, #[case] k: i64, #[case] holds: bool) {
        let mut m = ModelBuilder::new();
        let e = m.int_var("e", 0, 5);
        let b = m.bool_var("b");
        m.fix(e, value);
        m.reify_at_most(b, Linear::var(e), k);
        let raw = m.solve(&quick());
        assert_eq!(raw.is_true(b), holds);
    }

    #[test]
    fn reification_collapses_when_domain_decides() {
        let mut m = ModelBuilder::new();
        let e = m.int_var("e", 0, 2);
        let b = m.bool_var("b");
        let before = m.num_constraints();
        m.reify_at_most(b, Linear::var(e), 5);
        assert_eq!(m.num_constraints(), before + 1);
        assert_eq!(m.num_vars(), 2);
    }

    #[test]
    fn max_and_min_are_pinned_even_when_objective_pushes_away() {
        let mut m = ModelBuilder::new();
        let loads: Vec<Var> = [4, 9, 2]
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let x = m.int_var(format!("load_{i}"), 0, 20);
                m.fix(x, *v);
                x
            })
            .collect();
        let hi = m.int_var("hi", 0, 20);
        let lo = m.int_var("lo", 0, 20);
        m.max_equality(hi, &loads);
        m.min_equality(lo, &loads);
        m.minimize_term(-1, hi);
        m.minimize_term(1, lo);
        let raw = m.solve(&quick());
        assert_eq!(raw.int(hi), 9);
        assert_eq!(raw.int(lo), 2);
    }

    #[rstest]
    #[case(120, 80, 40)]
    #[case(60, 80, 0)]
    fn positive_part_is_exact(#[case] used: i64, #[case] cap: i64, #[case] over: i64) {
        let mut m = ModelBuilder::new();
        let u = m.int_var("used", 0, 200);
        let o = m.int_var("over", 0, 200);
        m.fix(u, used);
        m.positive_part(o, Linear::var(u).offset(-cap));
        m.minimize_term(-1, o);
        let raw = m.solve(&quick());
        assert_eq!(raw.int(o), over);
    }

    #[test]
    fn thread_count_is_fixed_by_the_first_caller() {
        let first = pin_solver_threads(3);
        assert!(first >= 1);
        assert_eq!(pin_solver_threads(first + 4), first);
    }

    #[test]
    fn solves_with_different_requested_workers_all_succeed() {
        for workers in [1, 4, 2] {
            let mut m = ModelBuilder::new();
            let x = m.int_var("x", 0, 5);
            m.add_ge(Linear::var(x), 2);
            m.minimize_term(1, x);
            let raw = m.solve(&SolverSettings {
                workers,
                ..quick()
            });
            assert_eq!(raw.status, SolveStatus::Optimal);
            assert_eq!(raw.int(x), 2);
        }
    }

    #[test]
    fn infeasible_model_reports_status() {
        let mut m = ModelBuilder::new();
        let x = m.bool_var("x");
        m.add_ge(Linear::var(x), 2);
        let raw = m.solve(&quick());
        assert_eq!(raw.status, SolveStatus::Infeasible);
        assert!(!raw.has_values());
    }
}
