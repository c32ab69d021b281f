//! Incremental SAT solving with clause groups.
//!
//! The solver engine itself is external; this layer implements the group
//! contract on top of any engine exposing fresh variables, clause addition,
//! and solving under assumptions. A group is an engine variable: every
//! clause added to a non-permanent group `g` is augmented with the literal
//! `+g`, so assuming `¬g` activates the group and adding the unit clause
//! `{+g}` retires it wholesale. Moving a group into the permanent group is
//! the unit clause `{¬g}`. The permanent group has the fixed id `-1` and
//! its clauses are added untouched.
//!
//! CNF variables and engine variables live in different spaces: the
//! dictionary between them grows on demand, exactly one engine variable per
//! CNF variable, with group ids allocated from the same engine space.

use ahash::{AHashMap, AHashSet};
use indexmap::IndexSet;

use crate::rbc::cnf::Cnf;

/// Opaque group identifier.
pub type GroupId = i32;

/// The group whose clauses can never be removed or deactivated.
pub const PERMANENT_GROUP: GroupId = -1;

/// Outcome of a solver invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveResult {
    Satisfiable,
    Unsatisfiable,
}

/// The engine seam: the minimal surface an incremental SAT solver must
/// provide for the group layer to drive it.
pub trait SatEngine {
    /// Allocates a fresh engine variable and returns its positive index.
    fn new_variable(&mut self) -> i32;
    /// Adds a clause over engine literals.
    fn add_clause(&mut self, literals: &[i32]);
    /// Solves under the given assumption literals.
    fn solve(&mut self, assumptions: &[i32]) -> bool;
    /// Engine literals assigned true in the last satisfiable solve.
    fn model(&self) -> Vec<i32>;
}

/// Group bookkeeping over an abstract engine.
#[derive(Debug)]
pub struct GroupedSolver<E> {
    engine: E,
    cnf_to_engine: AHashMap<i32, i32>,
    engine_to_cnf: AHashMap<i32, i32>,
    existing_groups: IndexSet<GroupId>,
    unsatisfiable_groups: AHashSet<GroupId>,
}

impl<E: SatEngine> GroupedSolver<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            cnf_to_engine: AHashMap::new(),
            engine_to_cnf: AHashMap::new(),
            existing_groups: IndexSet::new(),
            unsatisfiable_groups: AHashSet::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn permanent_group(&self) -> GroupId {
        PERMANENT_GROUP
    }

    pub fn existing_groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.existing_groups.iter().copied()
    }

    /// Maps a CNF literal into the engine space, allocating the variable
    /// pairing on first sight.
    fn literal_to_engine(&mut self, cnf_literal: i32) -> i32 {
        let cnf_var = cnf_literal.abs();
        debug_assert!(cnf_var > 0, "CNF variable 0 is never emitted");
        let engine_var = match self.cnf_to_engine.get(&cnf_var) {
            Some(&v) => v,
            None => {
                let v = self.engine.new_variable();
                self.cnf_to_engine.insert(cnf_var, v);
                self.engine_to_cnf.insert(v, cnf_var);
                v
            }
        };
        if cnf_literal > 0 { engine_var } else { -engine_var }
    }

    /// Maps an engine literal back to CNF; `None` for group variables and
    /// other internals.
    fn literal_from_engine(&self, engine_literal: i32) -> Option<i32> {
        let cnf_var = self.engine_to_cnf.get(&engine_literal.abs()).copied()?;
        Some(if engine_literal > 0 { cnf_var } else { -cnf_var })
    }

    /// Creates a new clause group.
    pub fn create_group(&mut self) -> GroupId {
        let group = self.engine.new_variable();
        self.existing_groups.insert(group);
        group
    }

    /// Destroys a group and every clause in it.
    pub fn destroy_group(&mut self, group: GroupId) {
        assert_ne!(group, PERMANENT_GROUP, "the permanent group cannot be destroyed");
        assert!(self.existing_groups.shift_remove(&group), "unknown group");
        self.unsatisfiable_groups.remove(&group);
        // the positive unit makes every clause of the group trivially true
        self.engine.add_clause(&[group]);
    }

    /// Moves every clause of `group` into the permanent group, then destroys
    /// the group id.
    pub fn move_to_permanent_and_destroy_group(&mut self, group: GroupId) {
        assert_ne!(group, PERMANENT_GROUP, "the permanent group cannot be moved");
        assert!(self.existing_groups.shift_remove(&group), "unknown group");
        if self.unsatisfiable_groups.remove(&group) {
            self.unsatisfiable_groups.insert(PERMANENT_GROUP);
        }
        // the negative unit strips the group literal from its clauses
        self.engine.add_clause(&[-group]);
    }

    /// Adds the clauses of a CNF conversion to a group.
    pub fn add_cnf(&mut self, cnf: &Cnf, group: GroupId) {
        let permanent = group == PERMANENT_GROUP;
        let mut buffer = Vec::new();
        for clause in &cnf.clauses {
            buffer.clear();
            for &literal in clause {
                buffer.push(self.literal_to_engine(literal));
            }
            if clause.is_empty() {
                self.unsatisfiable_groups.insert(group);
            }
            if !permanent {
                buffer.push(group);
            }
            self.engine.add_clause(&buffer);
        }
    }

    /// Constrains the root literal of a conversion to the given polarity
    /// (`1` asserts the formula, `-1` its negation) within a group.
    pub fn set_polarity(&mut self, cnf: &Cnf, polarity: i32, group: GroupId) {
        if cnf.root == i32::MAX {
            // a constant formula: false under positive polarity (or true
            // under negative) poisons the group
            let false_formula = !cnf.clauses.is_empty();
            let asserted_false = (false_formula && polarity > 0) || (!false_formula && polarity < 0);
            if asserted_false {
                self.unsatisfiable_groups.insert(group);
                if group == PERMANENT_GROUP {
                    self.engine.add_clause(&[]);
                } else {
                    self.engine.add_clause(&[group]);
                }
            }
            return;
        }
        let literal = self.literal_to_engine(polarity * cnf.root);
        if group == PERMANENT_GROUP {
            self.engine.add_clause(&[literal]);
        } else {
            self.engine.add_clause(&[literal, group]);
        }
    }

    /// Solves the conjunction of the permanent group and the given groups.
    pub fn solve_groups(&mut self, groups: &[GroupId]) -> SolveResult {
        if self.unsatisfiable_groups.contains(&PERMANENT_GROUP) {
            return SolveResult::Unsatisfiable;
        }
        let mut assumptions = Vec::with_capacity(groups.len());
        for &group in groups {
            if group == PERMANENT_GROUP {
                continue;
            }
            assert!(self.existing_groups.contains(&group), "unknown group");
            if self.unsatisfiable_groups.contains(&group) {
                return SolveResult::Unsatisfiable;
            }
            assumptions.push(-group);
        }
        if self.engine.solve(&assumptions) {
            SolveResult::Satisfiable
        } else {
            SolveResult::Unsatisfiable
        }
    }

    /// Solves every existing group together with the permanent one.
    pub fn solve_all_groups(&mut self) -> SolveResult {
        let groups: Vec<GroupId> = self.existing_groups.iter().copied().collect();
        self.solve_groups(&groups)
    }

    /// Solves every existing group except those listed.
    pub fn solve_without_groups(&mut self, excluded: &[GroupId]) -> SolveResult {
        assert!(!excluded.contains(&PERMANENT_GROUP), "the permanent group cannot be excluded");
        let groups: Vec<GroupId> = self
            .existing_groups
            .iter()
            .copied()
            .filter(|g| !excluded.contains(g))
            .collect();
        self.solve_groups(&groups)
    }

    /// The model of the last satisfiable solve, in CNF literals. Group
    /// variables and other engine internals are filtered out.
    pub fn model(&self) -> Vec<i32> {
        self.engine
            .model()
            .into_iter()
            .filter_map(|literal| self.literal_from_engine(literal))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records clauses; reports satisfiable unless an empty clause or a
    /// directly contradicted assumption is present.
    #[derive(Debug, Default)]
    struct MockEngine {
        next_var: i32,
        clauses: Vec<Vec<i32>>,
        last_assumptions: Vec<i32>,
    }

    impl SatEngine for MockEngine {
        fn new_variable(&mut self) -> i32 {
            self.next_var += 1;
            self.next_var
        }

        fn add_clause(&mut self, literals: &[i32]) {
            self.clauses.push(literals.to_vec());
        }

        fn solve(&mut self, assumptions: &[i32]) -> bool {
            self.last_assumptions = assumptions.to_vec();
            !self.clauses.iter().any(Vec::is_empty)
        }

        fn model(&self) -> Vec<i32> {
            self.last_assumptions.clone()
        }
    }

    fn cnf(clauses: Vec<Vec<i32>>, root: i32) -> Cnf {
        let max_var = clauses.iter().flatten().map(|l| l.abs()).max().unwrap_or(0);
        Cnf { clauses, vars: Vec::new(), root, max_var }
    }

    #[test]
    fn group_clauses_carry_the_group_literal() {
        let mut solver = GroupedSolver::new(MockEngine::default());
        let problem = cnf(vec![vec![1, 2], vec![-1]], 2);
        let group = solver.create_group();
        solver.add_cnf(&problem, group);

        // engine vars: group=1, then 2,3 for cnf vars 1,2
        let clauses = &solver.engine().clauses;
        assert_eq!(clauses.len(), 2);
        assert!(clauses.iter().all(|c| c.last() == Some(&group)));
    }

    #[test]
    fn permanent_clauses_are_untouched() {
        let mut solver = GroupedSolver::new(MockEngine::default());
        let problem = cnf(vec![vec![1, 2]], 2);
        solver.add_cnf(&problem, PERMANENT_GROUP);
        assert_eq!(solver.engine().clauses[0].len(), 2);
    }

    #[test]
    fn solving_assumes_negated_group_ids() {
        let mut solver = GroupedSolver::new(MockEngine::default());
        let g1 = solver.create_group();
        let g2 = solver.create_group();
        let problem = cnf(vec![vec![1]], 1);
        solver.add_cnf(&problem, g1);
        solver.add_cnf(&problem, g2);

        assert_eq!(solver.solve_groups(&[g1, g2]), SolveResult::Satisfiable);
        assert_eq!(solver.engine().last_assumptions, [-g1, -g2]);

        assert_eq!(solver.solve_without_groups(&[g1]), SolveResult::Satisfiable);
        assert_eq!(solver.engine().last_assumptions, [-g2]);
    }

    #[test]
    fn destroy_adds_the_positive_unit() {
        let mut solver = GroupedSolver::new(MockEngine::default());
        let group = solver.create_group();
        solver.destroy_group(group);
        assert_eq!(solver.engine().clauses.last().unwrap(), &[group]);
        assert_eq!(solver.existing_groups().count(), 0);
    }

    #[test]
    fn move_to_permanent_adds_the_negative_unit() {
        let mut solver = GroupedSolver::new(MockEngine::default());
        let group = solver.create_group();
        solver.move_to_permanent_and_destroy_group(group);
        assert_eq!(solver.engine().clauses.last().unwrap(), &[-group]);
    }

    #[test]
    fn unsatisfiable_group_short_circuits() {
        let mut solver = GroupedSolver::new(MockEngine::default());
        let group = solver.create_group();
        let problem = cnf(vec![vec![]], i32::MAX);
        solver.add_cnf(&problem, group);
        assert_eq!(solver.solve_groups(&[group]), SolveResult::Unsatisfiable);

        // moving the poisoned group poisons the permanent group
        solver.move_to_permanent_and_destroy_group(group);
        assert_eq!(solver.solve_all_groups(), SolveResult::Unsatisfiable);
    }

    #[test]
    fn literal_dictionary_is_stable() {
        let mut solver = GroupedSolver::new(MockEngine::default());
        let problem = cnf(vec![vec![5, -7], vec![7]], 5);
        solver.add_cnf(&problem, PERMANENT_GROUP);
        let clauses = solver.engine().clauses.clone();
        // cnf var 5 -> engine 1, cnf var 7 -> engine 2, both reused
        assert_eq!(clauses, vec![vec![1, -2], vec![2]]);
        assert_eq!(solver.model(), Vec::<i32>::new());
    }
}
