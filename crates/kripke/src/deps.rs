//! Dependency analysis and cone of influence.
//!
//! [`Compiler::dependencies`] returns, for an expression under a context, the
//! set of state/input variables it transitively references through defines.
//! Results are memoised per (expression, context); define bodies carry their
//! own memo with an in-progress sentinel, so a define that reaches itself is
//! reported as circular at the first recursive reentry.
//!
//! `next` does not contribute variables of its own: the dependencies of
//! `next(e)` are those of `e` on the current state.
//!
//! The cone of influence is a fix-point over per-variable seed sets drawn
//! from the assignment database. Non-assignment constraints propagate both
//! ways: a constraint of `v` mentioning `w` forces `v` into the cone of `w`.

use std::{collections::BTreeSet, rc::Rc};

use crate::{
    compiler::Compiler,
    error::{CompileError, CompileResult},
    flatten::AssignKind,
    intern::{NodeId, NodeTag},
};

/// An ordered set of variable names.
pub type VarSet = BTreeSet<NodeId>;

/// Memo entry for define-body dependency sets.
#[derive(Debug, Clone)]
pub(crate) enum DepEntry {
    InProgress,
    Done(Rc<VarSet>),
}

/// Model symbols partitioned by what their bodies depend on.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ModelSymbolLists {
    /// State variables and defines over state variables only.
    pub state: Vec<NodeId>,
    /// Input variables and defines over input variables only.
    pub input: Vec<NodeId>,
    /// Defines mixing state and input variables.
    pub state_input: Vec<NodeId>,
}

impl Compiler {
    /// The set of variables `formula` transitively references under
    /// `context`.
    pub fn dependencies(
        &mut self,
        formula: NodeId,
        context: Option<NodeId>,
    ) -> CompileResult<Rc<VarSet>> {
        if let Some(cached) = self.dep_cache.get(&(formula, context)) {
            return Ok(Rc::clone(cached));
        }
        let result = self.dependencies_recur(formula, context)?;
        self.dep_cache.insert((formula, context), Rc::clone(&result));
        Ok(result)
    }

    fn union(
        &mut self,
        left: NodeId,
        right: NodeId,
        context: Option<NodeId>,
    ) -> CompileResult<Rc<VarSet>> {
        let left = self.dependencies(left, context)?;
        let right = self.dependencies(right, context)?;
        if right.is_empty() {
            return Ok(left);
        }
        if left.is_empty() {
            return Ok(right);
        }
        let mut set = (*left).clone();
        set.extend(right.iter().copied());
        Ok(Rc::new(set))
    }

    fn dependencies_recur(
        &mut self,
        formula: NodeId,
        context: Option<NodeId>,
    ) -> CompileResult<Rc<VarSet>> {
        let empty = || Rc::new(VarSet::new());
        let tag = self.pool.tag(formula);
        match tag {
            NodeTag::Context => {
                let inner = self.pool.cdr(formula).expect("context body");
                let ctx = self.pool.car(formula);
                self.dependencies(inner, ctx)
            }
            NodeTag::True | NodeTag::False | NodeTag::Number | NodeTag::Twodots => Ok(empty()),
            NodeTag::Atom => {
                let name = self.pool.dot(context, formula);
                let param = self.params.get(&name).copied();
                let declared = self.symbols.is_declared(name);
                let constant = self.flatten_constants.contains(&formula)
                    || self.flatten_constants.contains(&name);

                let ambiguous = (param.is_some() && declared)
                    || (declared && constant)
                    || (param.is_some() && constant);
                if ambiguous {
                    return Err(CompileError::AmbiguousName {
                        name: self.printed(formula),
                        line: self.pool.line(formula),
                    });
                }
                if let Some(actual) = param {
                    return self.dependencies(actual, context);
                }
                if constant {
                    return Ok(empty());
                }
                let resolved = self.resolve_name_in(formula, context)?;
                self.definition_dependencies(resolved)
            }
            NodeTag::Dot | NodeTag::Array | NodeTag::Bit => {
                let name = self.resolve_name_in(formula, context)?;
                if self.flatten_constants.contains(&name) {
                    return Ok(empty());
                }
                self.definition_dependencies(name)
            }
            // the nextness is stripped: next introduces no variables
            NodeTag::Next | NodeTag::Smallinit | NodeTag::Not => {
                let body = self.pool.car(formula).expect("unary body");
                self.dependencies(body, context)
            }
            NodeTag::Ex
            | NodeTag::Ax
            | NodeTag::Ef
            | NodeTag::Af
            | NodeTag::Eg
            | NodeTag::Ag
            | NodeTag::OpNext
            | NodeTag::OpPrec
            | NodeTag::OpNotPrecNot
            | NodeTag::OpFuture
            | NodeTag::OpOnce
            | NodeTag::OpGlobal
            | NodeTag::OpHistorical
            | NodeTag::Ebf
            | NodeTag::Abf
            | NodeTag::Ebg
            | NodeTag::Abg
            | NodeTag::Ebu
            | NodeTag::Abu => {
                let body = self.pool.car(formula).expect("temporal body");
                self.dependencies(body, context)
            }
            NodeTag::Cons
            | NodeTag::And
            | NodeTag::Or
            | NodeTag::Xor
            | NodeTag::Xnor
            | NodeTag::Implies
            | NodeTag::Iff
            | NodeTag::Plus
            | NodeTag::Minus
            | NodeTag::Times
            | NodeTag::Divide
            | NodeTag::Mod
            | NodeTag::Equal
            | NodeTag::NotEqual
            | NodeTag::Lt
            | NodeTag::Gt
            | NodeTag::Le
            | NodeTag::Ge
            | NodeTag::Union
            | NodeTag::Setin
            | NodeTag::Eu
            | NodeTag::Au
            | NodeTag::Until
            | NodeTag::Releases
            | NodeTag::Since
            | NodeTag::Triggered
            | NodeTag::Minu
            | NodeTag::Maxu
            | NodeTag::Eqdef => {
                let left = self.pool.car(formula).expect("binary lhs");
                let right = self.pool.cdr(formula).expect("binary rhs");
                self.union(left, right, context)
            }
            NodeTag::Case | NodeTag::IfThenElse => {
                let branch = self.pool.car(formula).expect("case branch");
                let else_ = self.pool.cdr(formula).expect("case else");
                self.union(branch, else_, context)
            }
            NodeTag::Colon => {
                let left = self.pool.car(formula).expect("colon lhs");
                let right = self.pool.cdr(formula).expect("colon rhs");
                self.union(left, right, context)
            }
            other => Err(CompileError::TypeError {
                detail: format!("cannot analyse dependencies of {other:?} node"),
                line: self.pool.line(formula),
            }),
        }
    }

    /// Dependencies of a resolved symbol: variables are themselves, defines
    /// contribute the dependencies of their bodies (memoised, with a
    /// circularity sentinel), everything else is undeclared.
    fn definition_dependencies(&mut self, name: NodeId) -> CompileResult<Rc<VarSet>> {
        if self.symbols.is_var(name) {
            let mut set = VarSet::new();
            set.insert(name);
            return Ok(Rc::new(set));
        }
        if let Some((context, body)) = self.symbols.define_body(name) {
            match self.define_deps.get(&name) {
                Some(DepEntry::InProgress) => {
                    return Err(CompileError::CircularDefine { name: self.printed(name) });
                }
                Some(DepEntry::Done(set)) => return Ok(Rc::clone(set)),
                None => {}
            }
            self.define_deps.insert(name, DepEntry::InProgress);
            let result = self.dependencies(body, context)?;
            self.define_deps.insert(name, DepEntry::Done(Rc::clone(&result)));
            return Ok(result);
        }
        Err(CompileError::UndefinedSymbol {
            name: self.printed(name),
            line: self.pool.line(name),
        })
    }

    // ------------------------------------------------------------------
    // Cone of influence
    // ------------------------------------------------------------------

    /// Closes `seed` under the cone-of-influence relation.
    pub fn compute_coi(&mut self, seed: &VarSet) -> CompileResult<VarSet> {
        self.coi_init()?;
        let coi = self.coi.as_ref().expect("coi initialised");
        let mut result = seed.clone();
        for var in seed {
            if let Some(set) = coi.get(var) {
                result.extend(set.iter().copied());
            }
        }
        Ok(result)
    }

    /// Builds the per-variable cone map once: seeds from the assignment
    /// database, then iterates to the unique fix-point.
    fn coi_init(&mut self) -> CompileResult<()> {
        if self.coi.is_some() {
            return Ok(());
        }
        let vars: Vec<NodeId> = self.symbols.model_vars().collect();
        let mut coi: ahash::AHashMap<NodeId, VarSet> = ahash::AHashMap::new();
        let mut nonassign_vars = VarSet::new();

        for &var in &vars {
            let mut base = VarSet::new();
            base.insert(var);
            let mut nonassign = false;
            for kind in [AssignKind::Init, AssignKind::Invar, AssignKind::Next] {
                let (assign, constraints) = match self.assigns.entry(var, kind) {
                    Some(entry) => (entry.assign, entry.constraints.clone()),
                    None => continue,
                };
                if let Some(rhs) = assign {
                    base.extend(self.dependencies(rhs, None)?.iter().copied());
                }
                for fragment in constraints {
                    nonassign = true;
                    base.extend(self.dependencies(fragment, None)?.iter().copied());
                }
            }
            coi.insert(var, base);
            if nonassign {
                nonassign_vars.insert(var);
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &var in &vars {
                let old = coi.get(&var).cloned().unwrap_or_default();
                let mut new = old.clone();
                for member in &old {
                    if let Some(other) = coi.get(member) {
                        new.extend(other.iter().copied());
                    }
                }
                if new != old {
                    changed = true;
                    coi.insert(var, new.clone());
                }
                if nonassign_vars.contains(&var) {
                    for member in new {
                        if member == var || nonassign_vars.contains(&member) {
                            continue;
                        }
                        nonassign_vars.insert(member);
                        let other = coi.entry(member).or_default();
                        if other.insert(var) {
                            changed = true;
                        }
                    }
                }
            }
        }

        self.coi = Some(coi);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Model symbol partition
    // ------------------------------------------------------------------

    /// Partitions variables and defines into state-only / input-only /
    /// state-and-input lists by the variables their bodies reach. The
    /// `running` defines of processes are not model symbols.
    pub fn model_symbol_lists(&mut self) -> CompileResult<ModelSymbolLists> {
        let mut lists = ModelSymbolLists::default();
        for var in self.symbols.state_vars().to_vec() {
            lists.state.push(var);
        }
        for var in self.symbols.input_vars().to_vec() {
            lists.input.push(var);
        }
        for define in self.symbols.defines().to_vec() {
            if self.process_running.contains(&define) {
                continue;
            }
            let deps = self.definition_dependencies(define)?;
            let state = deps.iter().any(|&v| self.symbols.is_state_var(v));
            let input = deps.iter().any(|&v| self.symbols.is_input_var(v));
            match (state, input) {
                (true, true) => lists.state_input.push(define),
                (false, true) => lists.input.push(define),
                // defines over constants count as state symbols
                _ => lists.state.push(define),
            }
        }
        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{ModuleBuilder, types},
        intern::NodeTag,
    };

    /// main with x:0..3, b:boolean, an input i, and DEFINE d := x + 1.
    fn model() -> (Compiler, NodeId, NodeId, NodeId, NodeId) {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let x = c.pool.atom("x");
        let b = c.pool.atom("b");
        let i = c.pool.atom("i");
        let d = c.pool.atom("d");
        let range = types::range(&mut c.pool, 0, 3);
        let boolean = types::boolean(&mut c.pool);
        m.var(&mut c.pool, x, range);
        m.var(&mut c.pool, b, boolean);
        let boolean = types::boolean(&mut c.pool);
        m.ivar(&mut c.pool, i, boolean);
        let one = c.pool.number(1);
        let sum = c.pool.binary(NodeTag::Plus, x, one);
        m.define(&mut c.pool, d, sum);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let root = c.pool.atom("main");
        c.flatten_hierarchy(root, None, None).unwrap();

        let x = c.pool.dot(None, x);
        let b = c.pool.dot(None, b);
        let i = c.pool.dot(None, i);
        let d = c.pool.dot(None, d);
        (c, x, b, i, d)
    }

    #[test]
    fn define_reference_contributes_its_body() {
        let (mut c, x, b, _i, _d) = model();
        let d_atom = c.pool.atom("d");
        let b_atom = c.pool.atom("b");
        let expr = c.pool.and(d_atom, b_atom);
        let deps = c.dependencies(expr, None).unwrap();
        assert_eq!(*deps, VarSet::from([x, b]));
    }

    #[test]
    fn next_strips_nextness() {
        let (mut c, x, _b, _i, _d) = model();
        let x_atom = c.pool.atom("x");
        let next = c.pool.next_of(x_atom);
        let deps = c.dependencies(next, None).unwrap();
        assert_eq!(*deps, VarSet::from([x]));
    }

    #[test]
    fn memoisation_returns_shared_sets() {
        let (mut c, _x, _b, _i, _d) = model();
        let x_atom = c.pool.atom("x");
        let first = c.dependencies(x_atom, None).unwrap();
        let second = c.dependencies(x_atom, None).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn undefined_symbol_is_fatal() {
        let (mut c, _x, _b, _i, _d) = model();
        let ghost = c.pool.atom("ghost");
        let err = c.dependencies(ghost, None).unwrap_err();
        assert_eq!(err.kind(), "UndefinedSymbol");
    }

    #[test]
    fn model_symbols_partitioned_by_deps() {
        let (mut c, x, b, i, d) = model();
        // a define mixing state and input
        let mix = c.pool.atom("mix");
        let mix_name = c.pool.dot(None, mix);
        let b_atom = c.pool.atom("b");
        let i_atom = c.pool.atom("i");
        let body = c.pool.and(b_atom, i_atom);
        c.symbols.declare_define(&c.pool, mix_name, None, body).unwrap();

        let lists = c.model_symbol_lists().unwrap();
        assert!(lists.state.contains(&x) && lists.state.contains(&b));
        assert!(lists.state.contains(&d), "d depends on state only");
        assert!(lists.input.contains(&i));
        assert_eq!(lists.state_input, [mix_name]);
    }

    #[test]
    fn coi_is_monotone_and_a_fixpoint() {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let a = c.pool.atom("a");
        let b = c.pool.atom("b");
        let z = c.pool.atom("z");
        let boolean = types::boolean(&mut c.pool);
        m.var(&mut c.pool, a, boolean);
        m.var(&mut c.pool, b, boolean);
        m.var(&mut c.pool, z, boolean);
        // next(a) := b;  next(b) := b;  z unconstrained
        let next_a = c.pool.next_of(a);
        m.assign(&mut c.pool, next_a, b);
        let next_b = c.pool.next_of(b);
        m.assign(&mut c.pool, next_b, b);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let root = c.pool.atom("main");
        c.flatten_hierarchy(root, None, None).unwrap();

        let a = c.pool.dot(None, a);
        let b = c.pool.dot(None, b);
        let z = c.pool.dot(None, z);

        let coi_a = c.compute_coi(&VarSet::from([a])).unwrap();
        assert_eq!(coi_a, VarSet::from([a, b]));

        let coi_ab = c.compute_coi(&VarSet::from([a, z])).unwrap();
        assert!(coi_a.is_subset(&coi_ab), "coi is monotone in the seed");

        let again = c.compute_coi(&coi_a).unwrap();
        assert_eq!(again, coi_a, "coi is a fixpoint");
    }
}
