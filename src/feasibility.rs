//! Conflict and feasibility analysis.
//!
//! Pure functions over validated entities: which slots each task may use,
//! which task pairs share an actor, which same-day windows overlap, and
//! which (task, actor) pairs are ruled out by unavailability. Nothing here
//! touches the solver, so the dry-run diagnostics reuse it unchanged.

use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;

use crate::data::{Interval, Minute};
use crate::error::ConfigError;

/// Indices of the slots long enough for a task of `duration` minutes.
pub fn feasible_slots(duration: Minute, slot_durations: &[Minute]) -> Vec<usize> {
    slot_durations
        .iter()
        .enumerate()
        .filter(|(_, slot)| **slot >= duration)
        .map(|(t, _)| t)
        .collect()
}

/// Feasible slot sets for every task, failing on the first task that fits nowhere.
pub fn duration_feasibility<'a, I>(
    tasks: I,
    slot_durations: &[Minute],
) -> Result<Vec<Vec<usize>>, ConfigError>
where
    I: IntoIterator<Item = (&'a str, Minute)>,
{
    tasks
        .into_iter()
        .map(|(id, duration)| {
            let feasible = feasible_slots(duration, slot_durations);
            if feasible.is_empty() {
                Err(ConfigError::NoFeasibleSlot {
                    group: id.to_string(),
                    duration_min: duration,
                })
            } else {
                Ok(feasible)
            }
        })
        .collect()
}

/// Unordered task pairs `(i, j)` with `i < j` that share at least one actor,
/// mapped to the number of actors they share.
pub fn shared_actor_pairs<'a, I>(memberships: I) -> BTreeMap<(usize, usize), u32>
where
    I: IntoIterator<Item = &'a [usize]>,
{
    let mut pairs = BTreeMap::new();
    for tasks in memberships {
        let tasks: Vec<usize> = tasks.iter().copied().sorted().dedup().collect();
        for (a, b) in tasks.into_iter().tuple_combinations() {
            *pairs.entry((a, b)).or_insert(0) += 1;
        }
    }
    pairs
}

/// Pairs `(i, j)` with `i < j` of windows on the same day whose intervals overlap.
pub fn overlapping_pairs<D>(windows: &[(D, Interval)]) -> Vec<(usize, usize)>
where
    D: Copy + Eq + Hash,
{
    let by_day = windows
        .iter()
        .enumerate()
        .map(|(i, (day, _))| (*day, i))
        .into_group_map();

    let mut pairs: Vec<(usize, usize)> = by_day
        .values()
        .flat_map(|same_day| {
            same_day
                .iter()
                .copied()
                .tuple_combinations()
                .filter(|&(a, b)| windows[a].1.overlaps(&windows[b].1))
        })
        .map(|(a, b)| (a.min(b), a.max(b)))
        .collect();
    pairs.sort_unstable();
    pairs
}

/// `(task, actor)` pairs where one of the actor's windows overlaps the task on its day.
pub fn unavailability_exclusions<D>(
    tasks: &[(D, Interval)],
    windows: &[(usize, D, Interval)],
) -> BTreeSet<(usize, usize)>
where
    D: Copy + Eq,
{
    let mut excluded = BTreeSet::new();
    for (task, (day, interval)) in tasks.iter().enumerate() {
        for (actor, window_day, window) in windows {
            if window_day == day && interval.overlaps(window) {
                excluded.insert((task, *actor));
            }
        }
    }
    excluded
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(120, vec![0, 2])]
    #[case(90, vec![0, 1, 2])]
    #[case(150, vec![2])]
    #[case(200, vec![])]
    fn filters_slots_by_duration(#[case] duration: Minute, #[case] expected: Vec<usize>) {
        assert_eq!(feasible_slots(duration, &[120, 90, 180]), expected);
    }

    #[test]
    fn exam_longer_than_every_slot_is_named() {
        let err = duration_feasibility([("G1", 120), ("G2", 150)], &[120, 120]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NoFeasibleSlot {
                group: "G2".into(),
                duration_min: 150
            }
        );
    }

    #[test]
    fn counts_shared_actors_per_pair() {
        let a: &[usize] = &[0, 1, 2];
        let b: &[usize] = &[1, 0];
        let c: &[usize] = &[2];
        let pairs = shared_actor_pairs([a, b, c]);
        assert_eq!(pairs.get(&(0, 1)), Some(&2));
        assert_eq!(pairs.get(&(0, 2)), Some(&1));
        assert_eq!(pairs.get(&(1, 2)), Some(&1));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn repeated_membership_is_not_a_pair() {
        let a: &[usize] = &[3, 3];
        assert!(shared_actor_pairs([a]).is_empty());
    }

    #[test]
    fn overlap_requires_same_day() {
        let windows = vec![
            (1, Interval::new(540, 660)),
            (1, Interval::new(600, 720)),
            (2, Interval::new(540, 660)),
            (1, Interval::new(660, 780)),
        ];
        assert_eq!(overlapping_pairs(&windows), vec![(0, 1), (1, 3)]);
    }

    #[test]
    fn unavailability_blocks_overlapping_sessions_only() {
        let tasks = vec![(1, Interval::new(540, 660)), (1, Interval::new(780, 900))];
        let windows = vec![(0, 1, Interval::new(600, 660)), (1, 2, Interval::new(540, 660))];
        let excluded = unavailability_exclusions(&tasks, &windows);
        assert_eq!(excluded.into_iter().collect::<Vec<_>>(), vec![(0, 0)]);
    }
}
