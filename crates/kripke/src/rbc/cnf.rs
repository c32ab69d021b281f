//! Tseitin translation of reduced boolean circuits into CNF.
//!
//! Each internal vertex of the circuit receives one CNF variable and a
//! constant-sized clause set capturing its operator, so the clause set is
//! equisatisfiable with the circuit and linear in its size. Variables at or
//! below the manager's `max_unchanged` watermark keep their external index as
//! CNF variable (the watermark is fixed on the first conversion, while no
//! fresh CNF variables exist yet); every other vertex gets a monotonically
//! increasing fresh id that is never reused.
//!
//! The two degenerate circuits bypass clausification: constant true yields no
//! clauses, constant false yields a single empty clause, and both report
//! `i32::MAX` as root literal.

use ahash::AHashSet;

use super::{RbcId, RbcManager, Ref, Sym};

/// The result of one circuit-to-CNF conversion.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cnf {
    /// Clauses as lists of non-zero signed literals.
    pub clauses: Vec<Vec<i32>>,
    /// CNF variables standing for the original model variables reachable
    /// from the root, for model extraction.
    pub vars: Vec<i32>,
    /// Literal equivalent to the whole formula; `i32::MAX` for constants.
    pub root: i32,
    /// Highest CNF variable in use after the conversion.
    pub max_var: i32,
}

impl RbcManager {
    /// Converts the circuit rooted at `f` into Tseitin CNF.
    pub fn to_cnf(&mut self, f: Ref) -> Cnf {
        if f == self.one() {
            return Cnf { clauses: Vec::new(), vars: Vec::new(), root: i32::MAX, max_var: self.max_cnf };
        }
        if f == self.zero() {
            return Cnf {
                clauses: vec![Vec::new()],
                vars: Vec::new(),
                root: i32::MAX,
                max_var: self.max_cnf,
            };
        }

        // While no fresh CNF variable has been handed out, newly registered
        // circuit variables can still join the identity-mapped range.
        let max_var = i32::try_from(self.max_var_index()).expect("variable index overflow");
        if self.max_unchanged == self.max_cnf && self.max_unchanged < max_var {
            self.max_unchanged = max_var;
            self.max_cnf = max_var;
        }

        let mut out = Cnf { clauses: Vec::new(), vars: Vec::new(), root: 0, max_var: 0 };
        let mut visited = AHashSet::new();
        let root_var = self.cnf_visit(f.node, &mut out, &mut visited);
        out.root = if f.negated { -root_var } else { root_var };
        out.max_var = self.max_cnf;
        out
    }

    /// Assigns (or reuses) the CNF variable of a vertex and emits its
    /// clauses, visiting each vertex at most once per conversion.
    fn cnf_visit(&mut self, node: RbcId, out: &mut Cnf, visited: &mut AHashSet<RbcId>) -> i32 {
        let already_visited = !visited.insert(node);
        let known = self.node_to_cnf.get(&node).copied();
        if already_visited {
            return known.expect("visited vertex without CNF variable");
        }

        let cnf_var = match known {
            Some(var) => var,
            None => {
                let var = match self.var_index(node) {
                    // identity mapping for low variable indices; index 0 is
                    // never a CNF variable
                    Some(index)
                        if index != 0
                            && i32::try_from(index).expect("variable index overflow")
                                <= self.max_unchanged =>
                    {
                        i32::try_from(index).expect("variable index overflow")
                    }
                    _ => {
                        self.max_cnf += 1;
                        self.max_cnf
                    }
                };
                self.node_to_cnf.insert(node, var);
                self.cnf_to_node.insert(var, node);
                var
            }
        };

        match self.sym(node) {
            Sym::Var => out.vars.push(cnf_var),
            Sym::And => {
                let sons = self.sons(node).to_vec();
                let mut last = vec![cnf_var];
                for son in sons {
                    let lit = self.cnf_literal(son, out, visited);
                    out.clauses.push(vec![-cnf_var, lit]);
                    last.push(-lit);
                }
                out.clauses.push(last);
            }
            Sym::Iff => {
                let (left, right) = (self.left_opnd(node), self.right_opnd(node));
                let l = self.cnf_literal(left, out, visited);
                let r = self.cnf_literal(right, out, visited);
                out.clauses.push(vec![-cnf_var, l, -r]);
                out.clauses.push(vec![-cnf_var, -l, r]);
                out.clauses.push(vec![cnf_var, l, r]);
                out.clauses.push(vec![cnf_var, -l, -r]);
            }
            Sym::Ite => {
                let sons = self.sons(node).to_vec();
                let i = self.cnf_literal(sons[0], out, visited);
                let t = self.cnf_literal(sons[1], out, visited);
                let e = self.cnf_literal(sons[2], out, visited);
                out.clauses.push(vec![-cnf_var, -i, t]);
                out.clauses.push(vec![-cnf_var, i, e]);
                out.clauses.push(vec![cnf_var, -i, -t]);
                out.clauses.push(vec![cnf_var, i, -e]);
            }
            Sym::Top => unreachable!("constant circuits are handled before clausification"),
        }
        cnf_var
    }

    fn cnf_literal(&mut self, son: Ref, out: &mut Cnf, visited: &mut AHashSet<RbcId>) -> i32 {
        let var = self.cnf_visit(son.node, out, visited);
        if son.negated { -var } else { var }
    }

    /// The external variable index behind a CNF variable, or `-1` for an
    /// internal Tseitin variable.
    pub fn cnf_var_to_rbc_index(&self, cnf_var: i32) -> i32 {
        match self.cnf_to_node.get(&cnf_var) {
            Some(&node) => match self.var_index(node) {
                Some(index) => i32::try_from(index).expect("variable index overflow"),
                None => -1,
            },
            None => -1,
        }
    }

    /// The CNF variable associated with an external variable index, or `0`
    /// if that variable was never converted.
    pub fn rbc_index_to_cnf_var(&mut self, index: u32) -> i32 {
        assert!(index > 0, "external variable indices are positive");
        let node = self.var(index).node();
        self.node_to_cnf.get(&node).copied().unwrap_or(0)
    }
}
