//! Variable-partitioned transition systems.
//!
//! After flattening, the INIT/INVAR/TRANS conjunctions are split into their
//! fragments and each fragment is attached to every variable its dependency
//! set contains. Together with the explicit assignments this yields one
//! [`VarFsm`] per variable; the [`SexpFsm`] conjoins them back, dropping
//! duplicate fragments so that each clause appears exactly once per machine
//! (the clustering back-end walks these lists and relies on that).
//!
//! A constraint fragment with an empty dependency set is a constant: the
//! trivially true ones are skipped, everything else lands in a dedicated
//! global-constraints slot that the back-end picks up alongside the
//! per-variable machines, with a diagnostic.

use ahash::{AHashMap, AHashSet};

use crate::{
    compiler::Compiler,
    error::{CompileResult, Warning},
    flatten::{AssignKind, FlatHierarchy},
    intern::{NodeId, NodeTag},
};

/// Constant constraint fragments that belong to no variable in particular.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GlobalConstraints {
    pub init: Vec<NodeId>,
    pub invar: Vec<NodeId>,
    pub trans: Vec<NodeId>,
}

impl GlobalConstraints {
    pub fn is_empty(&self) -> bool {
        self.init.is_empty() && self.invar.is_empty() && self.trans.is_empty()
    }
}

/// The init/invar/trans behaviour of a single variable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VarFsm {
    pub init: Option<NodeId>,
    pub invar: Option<NodeId>,
    pub trans: Option<NodeId>,
}

/// A var-partitioned FSM over scalar or booleanised expressions.
#[derive(Debug)]
pub struct SexpFsm {
    vars: Vec<NodeId>,
    var_fsms: AHashMap<NodeId, VarFsm>,
    init: Option<NodeId>,
    invar: Option<NodeId>,
    trans: Option<NodeId>,
    justice: Vec<NodeId>,
    compassion: Vec<(NodeId, NodeId)>,
    global: GlobalConstraints,
    booleanized: bool,
}

impl SexpFsm {
    pub fn vars(&self) -> &[NodeId] {
        &self.vars
    }

    pub fn is_boolean(&self) -> bool {
        self.booleanized
    }

    pub fn init(&self) -> Option<NodeId> {
        self.init
    }

    pub fn invar(&self) -> Option<NodeId> {
        self.invar
    }

    pub fn trans(&self) -> Option<NodeId> {
        self.trans
    }

    pub fn justice(&self) -> &[NodeId] {
        &self.justice
    }

    pub fn compassion(&self) -> &[(NodeId, NodeId)] {
        &self.compassion
    }

    /// Constant constraints surfaced to the back-end separately.
    pub fn global_constraints(&self) -> &GlobalConstraints {
        &self.global
    }

    pub fn var_fsm(&self, var: NodeId) -> Option<&VarFsm> {
        self.var_fsms.get(&var)
    }

    pub fn var_init(&self, var: NodeId) -> Option<NodeId> {
        self.var_fsms.get(&var).and_then(|f| f.init)
    }

    pub fn var_invar(&self, var: NodeId) -> Option<NodeId> {
        self.var_fsms.get(&var).and_then(|f| f.invar)
    }

    pub fn var_trans(&self, var: NodeId) -> Option<NodeId> {
        self.var_fsms.get(&var).and_then(|f| f.trans)
    }
}

impl Compiler {
    /// Splits the flat INIT/INVAR/TRANS conjunctions into fragments and
    /// attaches each to the variables it depends on. Constant fragments go
    /// to the global-constraints slot with a diagnostic.
    pub fn partition_constraints(&mut self, hierarchy: &FlatHierarchy) -> CompileResult<()> {
        self.partition_one(hierarchy.init, AssignKind::Init)?;
        self.partition_one(hierarchy.invar, AssignKind::Invar)?;
        self.partition_one(hierarchy.trans, AssignKind::Next)
    }

    fn partition_one(&mut self, expr: Option<NodeId>, kind: AssignKind) -> CompileResult<()> {
        let Some(expr) = expr else { return Ok(()) };
        if self.pool.tag(expr) == NodeTag::And {
            let left = self.pool.car(expr).expect("conjunction lhs");
            let right = self.pool.cdr(expr).expect("conjunction rhs");
            self.partition_one(Some(left), kind)?;
            return self.partition_one(Some(right), kind);
        }

        let deps = self.dependencies(expr, None)?;
        if deps.is_empty() {
            self.attach_constant_fragment(expr, kind);
            return Ok(());
        }
        for var in deps.iter().copied().collect::<Vec<_>>() {
            self.assigns.attach_constraint(var, kind, expr);
        }
        Ok(())
    }

    fn attach_constant_fragment(&mut self, expr: NodeId, kind: AssignKind) {
        let section = match kind {
            AssignKind::Init => "INIT",
            AssignKind::Invar => "INVAR",
            AssignKind::Next => "TRANS",
        };
        let trivial = match self.pool.tag(expr) {
            NodeTag::True => true,
            NodeTag::Number => self.pool.num(expr) == 1,
            _ => false,
        };
        let printed = self.printed(expr);
        self.diagnostics.warn(Warning::ConstantInConstraint {
            section,
            expr: printed,
            skipped: trivial,
        });
        if trivial {
            return;
        }
        let slot = match kind {
            AssignKind::Init => &mut self.global_constraints.init,
            AssignKind::Invar => &mut self.global_constraints.invar,
            AssignKind::Next => &mut self.global_constraints.trans,
        };
        if !slot.contains(&expr) {
            slot.push(expr);
        }
    }

    /// Builds the var-partitioned FSM over the given variables. With
    /// `booleanize` set, every expression is converted to its boolean form
    /// (introducing determinisation variables where needed).
    pub fn build_fsm(
        &mut self,
        vars: &[NodeId],
        justice: &[NodeId],
        compassion: &[(NodeId, NodeId)],
        booleanize: bool,
    ) -> CompileResult<SexpFsm> {
        let mut var_fsms = AHashMap::new();
        for &var in vars {
            let fsm = self.build_var_fsm(var)?;
            var_fsms.insert(var, fsm);
        }

        // conjoin per-variable machines, each distinct fragment once
        let mut init = None;
        let mut invar = None;
        let mut trans = None;
        let mut seen: AHashSet<(NodeId, AssignKind)> = AHashSet::new();
        for &var in vars {
            let fsm = var_fsms[&var];
            init = self.conjoin_unique(init, fsm.init, AssignKind::Init, &mut seen);
            invar = self.conjoin_unique(invar, fsm.invar, AssignKind::Invar, &mut seen);
            trans = self.conjoin_unique(trans, fsm.trans, AssignKind::Next, &mut seen);
        }

        let mut justice = justice.to_vec();
        let mut compassion = compassion.to_vec();
        for item in &mut justice {
            *item = self.flatten_sexp(*item, None)?;
        }
        for (left, right) in &mut compassion {
            *left = self.flatten_sexp(*left, None)?;
            *right = self.flatten_sexp(*right, None)?;
        }
        if booleanize {
            for fsm in var_fsms.values_mut() {
                fsm.init = fsm.init.map(|e| self.expr_to_bexpr(e)).transpose()?;
                fsm.invar = fsm.invar.map(|e| self.expr_to_bexpr(e)).transpose()?;
                fsm.trans = fsm.trans.map(|e| self.expr_to_bexpr(e)).transpose()?;
            }
            init = init.map(|e| self.expr_to_bexpr(e)).transpose()?;
            invar = invar.map(|e| self.expr_to_bexpr(e)).transpose()?;
            trans = trans.map(|e| self.expr_to_bexpr(e)).transpose()?;
            for item in &mut justice {
                *item = self.expr_to_bexpr(*item)?;
            }
            for (left, right) in &mut compassion {
                *left = self.expr_to_bexpr(*left)?;
                *right = self.expr_to_bexpr(*right)?;
            }
        }

        Ok(SexpFsm {
            vars: vars.to_vec(),
            var_fsms,
            init,
            invar,
            trans,
            justice,
            compassion,
            global: self.global_constraints.clone(),
            booleanized: booleanize,
        })
    }

    /// Assembles one variable's machine from the assignment database.
    fn build_var_fsm(&mut self, var: NodeId) -> CompileResult<VarFsm> {
        let mut fsm = VarFsm::default();
        for kind in [AssignKind::Init, AssignKind::Invar, AssignKind::Next] {
            let (assign, constraints) = match self.assigns.entry(var, kind) {
                Some(entry) => (entry.assign, entry.constraints.clone()),
                None => continue,
            };
            let mut acc = None;
            if let Some(rhs) = assign {
                let lhs = match kind {
                    AssignKind::Init => self.pool.init_of(var),
                    AssignKind::Invar => var,
                    AssignKind::Next => self.pool.next_of(var),
                };
                let eqdef = self.pool.binary(NodeTag::Eqdef, lhs, rhs);
                acc = Some(eqdef);
            }
            for fragment in constraints {
                acc = Some(self.pool.and_opt(acc, fragment));
            }
            match kind {
                AssignKind::Init => fsm.init = acc,
                AssignKind::Invar => fsm.invar = acc,
                AssignKind::Next => fsm.trans = acc,
            }
        }
        Ok(fsm)
    }

    /// Conjoins the fragments of `piece` into `acc`, skipping fragments
    /// already contributed by another variable under the same kind.
    fn conjoin_unique(
        &mut self,
        mut acc: Option<NodeId>,
        piece: Option<NodeId>,
        kind: AssignKind,
        seen: &mut AHashSet<(NodeId, AssignKind)>,
    ) -> Option<NodeId> {
        let Some(piece) = piece else { return acc };
        let mut stack = vec![piece];
        while let Some(expr) = stack.pop() {
            if self.pool.tag(expr) == NodeTag::And {
                let left = self.pool.car(expr).expect("conjunction lhs");
                let right = self.pool.cdr(expr).expect("conjunction rhs");
                stack.push(right);
                stack.push(left);
                continue;
            }
            if seen.insert((expr, kind)) {
                acc = Some(self.pool.and_opt(acc, expr));
            }
        }
        acc
    }
}
