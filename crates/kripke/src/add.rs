//! The decision-diagram layer: algebraic decision diagrams over boolean bits.
//!
//! Scalar subexpressions are booleanised by evaluating them into an ADD — an
//! ordered decision DAG whose internal nodes test the boolean bits produced
//! by the scalar encoder, and whose leaves carry *sets* of interned constants
//! (a singleton for deterministic values, `{0, 1}` where an expression is
//! genuinely nondeterministic). The converter then reads the ADD back into a
//! boolean expression, turning `{0, 1}` leaves into fresh determinisation
//! variables.
//!
//! Nodes are hash-consed in the manager; operators apply leaf-wise with set
//! semantics (cartesian application, deduplicated ordered results).
//! Next-state occurrences of a bit sit one level below the current-state
//! occurrence, so current and next versions of the same encoding interleave.
//!
//! The manager carries a dynamic-reordering flag mirroring the protocol of
//! BDD packages: translation back to expressions disables reordering for the
//! duration of the walk and restores the previous setting on exit. No
//! reordering is ever performed here, but the contract is observable.

use ahash::AHashMap;

use crate::{
    compiler::Compiler,
    error::{CompileError, CompileResult},
    intern::{NodeId, NodePool, NodeTag},
    symbols::Range,
};

/// Index of an interned ADD node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AddId(u32);

impl AddId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Leaf-level operator applied pointwise over value sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum LeafOp {
    Plus,
    Minus,
    Times,
    Divide,
    Mod,
    Equal,
    NotEqual,
    Lt,
    Gt,
    Le,
    Ge,
    Union,
    Setin,
    Eqdef,
    And,
    Or,
    Xor,
    Xnor,
    Iff,
    Implies,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AddData {
    /// Ordered set of constant nodes.
    Leaf(Vec<NodeId>),
    /// Decision on the bit at `level`.
    Node { level: u32, then: AddId, els: AddId },
}

const LEAF_LEVEL: u32 = u32::MAX;

/// The ADD manager.
#[derive(Debug, Default)]
pub struct AddManager {
    nodes: Vec<AddData>,
    table: AHashMap<AddData, AddId>,
    /// Bit variables in registration order; variable `i` owns levels `2i`
    /// (current state) and `2i + 1` (next state).
    vars: Vec<NodeId>,
    var_index: AHashMap<NodeId, u32>,
    apply_cache: AHashMap<(LeafOp, AddId, AddId), AddId>,
    not_cache: AHashMap<AddId, AddId>,
    ite_cache: AHashMap<(AddId, AddId, AddId), AddId>,
    reorder_enabled: bool,
}

impl AddManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a boolean bit variable, fixing its decision levels. Calling
    /// again for the same variable is a no-op.
    pub fn register_var(&mut self, var: NodeId) -> u32 {
        if let Some(&index) = self.var_index.get(&var) {
            return index;
        }
        let index = u32::try_from(self.vars.len()).expect("ADD variable overflow");
        self.vars.push(var);
        self.var_index.insert(var, index);
        index
    }

    pub fn is_registered(&self, var: NodeId) -> bool {
        self.var_index.contains_key(&var)
    }

    /// The decision level of a registered bit, on the current or next state.
    pub fn level_of(&self, var: NodeId, next: bool) -> Option<u32> {
        self.var_index.get(&var).map(|&i| 2 * i + u32::from(next))
    }

    /// The bit variable owning `level` and whether the level is next-state.
    pub fn var_of_level(&self, level: u32) -> (NodeId, bool) {
        (self.vars[(level / 2) as usize], level % 2 == 1)
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    fn intern(&mut self, data: AddData) -> AddId {
        if let Some(&id) = self.table.get(&data) {
            return id;
        }
        let id = AddId(u32::try_from(self.nodes.len()).expect("ADD pool overflow"));
        self.nodes.push(data.clone());
        self.table.insert(data, id);
        id
    }

    /// Interns a leaf holding the given constants, deduplicated and ordered.
    pub fn leaf(&mut self, mut values: Vec<NodeId>) -> AddId {
        values.sort_unstable();
        values.dedup();
        self.intern(AddData::Leaf(values))
    }

    pub fn leaf_true(&mut self, pool: &mut NodePool) -> AddId {
        let one = pool.number(1);
        self.leaf(vec![one])
    }

    pub fn leaf_false(&mut self, pool: &mut NodePool) -> AddId {
        let zero = pool.number(0);
        self.leaf(vec![zero])
    }

    /// Interns a decision node, collapsing redundant tests.
    pub fn node(&mut self, level: u32, then: AddId, els: AddId) -> AddId {
        if then == els {
            return then;
        }
        self.intern(AddData::Node { level, then, els })
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    pub fn is_leaf(&self, id: AddId) -> bool {
        matches!(self.nodes[id.index()], AddData::Leaf(_))
    }

    /// The value set of a leaf.
    pub fn leaf_values(&self, id: AddId) -> &[NodeId] {
        match &self.nodes[id.index()] {
            AddData::Leaf(values) => values,
            AddData::Node { .. } => unreachable!("leaf_values() on an internal ADD node"),
        }
    }

    fn level(&self, id: AddId) -> u32 {
        match self.nodes[id.index()] {
            AddData::Leaf(_) => LEAF_LEVEL,
            AddData::Node { level, .. } => level,
        }
    }

    /// The decision level of an internal node.
    pub fn node_level(&self, id: AddId) -> u32 {
        debug_assert!(!self.is_leaf(id));
        self.level(id)
    }

    /// Then/else cofactors with respect to `level`.
    pub fn cofactors(&self, id: AddId, level: u32) -> (AddId, AddId) {
        match self.nodes[id.index()] {
            AddData::Node { level: l, then, els } if l == level => (then, els),
            _ => (id, id),
        }
    }

    /// The union of every leaf value set reachable from `id`.
    pub fn leaves_of(&self, id: AddId) -> Vec<NodeId> {
        let mut stack = vec![id];
        let mut seen = Vec::new();
        let mut out = Vec::new();
        while let Some(n) = stack.pop() {
            if seen.contains(&n) {
                continue;
            }
            seen.push(n);
            match &self.nodes[n.index()] {
                AddData::Leaf(values) => out.extend(values.iter().copied()),
                AddData::Node { then, els, .. } => {
                    stack.push(*then);
                    stack.push(*els);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    // ------------------------------------------------------------------
    // Reordering protocol
    // ------------------------------------------------------------------

    pub fn reordering_enabled(&self) -> bool {
        self.reorder_enabled
    }

    /// Sets the dynamic-reordering flag, returning the previous setting.
    pub fn set_reordering(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.reorder_enabled, enabled)
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    /// Applies a binary operator, recursing over the shared bit order and
    /// combining leaves with set semantics.
    pub(crate) fn apply2(
        &mut self,
        pool: &mut NodePool,
        op: LeafOp,
        a: AddId,
        b: AddId,
    ) -> CompileResult<AddId> {
        if let (AddData::Leaf(_), AddData::Leaf(_)) = (&self.nodes[a.index()], &self.nodes[b.index()])
        {
            let left = self.leaf_values(a).to_vec();
            let right = self.leaf_values(b).to_vec();
            let values = apply_leaf_op(pool, op, &left, &right)?;
            return Ok(self.leaf(values));
        }
        if let Some(&cached) = self.apply_cache.get(&(op, a, b)) {
            return Ok(cached);
        }
        let level = self.level(a).min(self.level(b));
        let (at, ae) = self.cofactors(a, level);
        let (bt, be) = self.cofactors(b, level);
        let then = self.apply2(pool, op, at, bt)?;
        let els = self.apply2(pool, op, ae, be)?;
        let result = self.node(level, then, els);
        self.apply_cache.insert((op, a, b), result);
        Ok(result)
    }

    /// Boolean negation, leaf-wise.
    pub(crate) fn apply_not(&mut self, pool: &mut NodePool, a: AddId) -> CompileResult<AddId> {
        if self.is_leaf(a) {
            let mut values = Vec::new();
            for value in self.leaf_values(a).to_vec() {
                let flipped = !leaf_bool(pool, value)?;
                values.push(bool_value(pool, flipped));
            }
            return Ok(self.leaf(values));
        }
        if let Some(&cached) = self.not_cache.get(&a) {
            return Ok(cached);
        }
        let level = self.level(a);
        let (at, ae) = self.cofactors(a, level);
        let then = self.apply_not(pool, at)?;
        let els = self.apply_not(pool, ae)?;
        let result = self.node(level, then, els);
        self.not_cache.insert(a, result);
        Ok(result)
    }

    /// If-then-else composition. The condition must be deterministic.
    pub(crate) fn ite(
        &mut self,
        pool: &mut NodePool,
        cond: AddId,
        then: AddId,
        els: AddId,
    ) -> CompileResult<AddId> {
        if self.is_leaf(cond) {
            let values = self.leaf_values(cond);
            if let [single] = values {
                let single = *single;
                return if leaf_bool(pool, single)? { Ok(then) } else { Ok(els) };
            }
            return Err(CompileError::TypeError {
                detail: "nondeterministic condition in case expression".to_owned(),
                line: 0,
            });
        }
        if then == els {
            return Ok(then);
        }
        if let Some(&cached) = self.ite_cache.get(&(cond, then, els)) {
            return Ok(cached);
        }
        let level = self.level(cond).min(self.level(then)).min(self.level(els));
        let (ct, ce) = self.cofactors(cond, level);
        let (tt, te) = self.cofactors(then, level);
        let (et, ee) = self.cofactors(els, level);
        let high = self.ite(pool, ct, tt, et)?;
        let low = self.ite(pool, ce, te, ee)?;
        let result = self.node(level, high, low);
        self.ite_cache.insert((cond, then, els), result);
        Ok(result)
    }
}

fn bool_value(pool: &mut NodePool, b: bool) -> NodeId {
    pool.number(i64::from(b))
}

/// Reads a leaf constant as a boolean, failing on anything but 0/1.
fn leaf_bool(pool: &NodePool, value: NodeId) -> CompileResult<bool> {
    if pool.tag(value) == NodeTag::Number {
        match pool.num(value) {
            0 => return Ok(false),
            1 => return Ok(true),
            _ => {}
        }
    }
    Err(CompileError::TypeError {
        detail: format!("boolean constant required, got {}", pool.display(value)),
        line: pool.line(value),
    })
}

fn leaf_num(pool: &NodePool, value: NodeId) -> CompileResult<i64> {
    if pool.tag(value) == NodeTag::Number {
        return Ok(pool.num(value));
    }
    Err(CompileError::TypeError {
        detail: format!("numeric constant required, got {}", pool.display(value)),
        line: pool.line(value),
    })
}

/// Applies an operator over two leaf value sets.
fn apply_leaf_op(
    pool: &mut NodePool,
    op: LeafOp,
    left: &[NodeId],
    right: &[NodeId],
) -> CompileResult<Vec<NodeId>> {
    // union combines whole sets; membership tests the left elements against
    // the full right set; everything else applies pointwise over the product
    match op {
        LeafOp::Union => {
            let mut values = left.to_vec();
            values.extend_from_slice(right);
            return Ok(values);
        }
        LeafOp::Setin => {
            return Ok(left.iter().map(|l| bool_value(pool, right.contains(l))).collect());
        }
        LeafOp::Eqdef if right.len() > 1 => {
            return Ok(left.iter().map(|l| bool_value(pool, right.contains(l))).collect());
        }
        _ => {}
    }

    let mut values = Vec::with_capacity(left.len() * right.len());
    for &l in left {
        for &r in right {
            let value = match op {
                LeafOp::Plus => {
                    let result = leaf_num(pool, l)? + leaf_num(pool, r)?;
                    pool.number(result)
                }
                LeafOp::Minus => {
                    let result = leaf_num(pool, l)? - leaf_num(pool, r)?;
                    pool.number(result)
                }
                LeafOp::Times => {
                    let result = leaf_num(pool, l)? * leaf_num(pool, r)?;
                    pool.number(result)
                }
                LeafOp::Divide | LeafOp::Mod => {
                    let num = leaf_num(pool, l)?;
                    let den = leaf_num(pool, r)?;
                    if den == 0 {
                        return Err(CompileError::TypeError {
                            detail: "division by zero".to_owned(),
                            line: pool.line(r),
                        });
                    }
                    let result = if op == LeafOp::Divide { num / den } else { num % den };
                    pool.number(result)
                }
                LeafOp::Lt => bool_value(pool, leaf_num(pool, l)? < leaf_num(pool, r)?),
                LeafOp::Gt => bool_value(pool, leaf_num(pool, l)? > leaf_num(pool, r)?),
                LeafOp::Le => bool_value(pool, leaf_num(pool, l)? <= leaf_num(pool, r)?),
                LeafOp::Ge => bool_value(pool, leaf_num(pool, l)? >= leaf_num(pool, r)?),
                LeafOp::Equal | LeafOp::Eqdef => bool_value(pool, l == r),
                LeafOp::NotEqual => bool_value(pool, l != r),
                LeafOp::And => bool_value(pool, leaf_bool(pool, l)? && leaf_bool(pool, r)?),
                LeafOp::Or => bool_value(pool, leaf_bool(pool, l)? || leaf_bool(pool, r)?),
                LeafOp::Xor => bool_value(pool, leaf_bool(pool, l)? != leaf_bool(pool, r)?),
                LeafOp::Xnor | LeafOp::Iff => {
                    bool_value(pool, leaf_bool(pool, l)? == leaf_bool(pool, r)?)
                }
                LeafOp::Implies => bool_value(pool, !leaf_bool(pool, l)? || leaf_bool(pool, r)?),
                LeafOp::Union | LeafOp::Setin => unreachable!("set operators handled above"),
            };
            values.push(value);
        }
    }
    Ok(values)
}

impl Compiler {
    /// Evaluates a flattened scalar expression into an ADD. `next` marks that
    /// every variable leaf refers to the next state.
    pub fn expr_to_add(&mut self, expr: NodeId, next: bool) -> CompileResult<AddId> {
        if let Some(&cached) = self.add_cache.get(&(expr, next)) {
            return Ok(cached);
        }
        let result = self.expr_to_add_uncached(expr, next)?;
        self.add_cache.insert((expr, next), result);
        Ok(result)
    }

    fn expr_to_add_uncached(&mut self, expr: NodeId, next: bool) -> CompileResult<AddId> {
        let tag = self.pool.tag(expr);
        match tag {
            NodeTag::True => Ok(self.adds.leaf_true(&mut self.pool)),
            NodeTag::False => Ok(self.adds.leaf_false(&mut self.pool)),
            NodeTag::Number => Ok(self.adds.leaf(vec![expr])),
            NodeTag::Twodots => {
                let low = self.pool.num(self.pool.car(expr).expect("range low"));
                let high = self.pool.num(self.pool.cdr(expr).expect("range high"));
                let values: Vec<NodeId> = (low..=high).map(|i| self.pool.number(i)).collect();
                Ok(self.adds.leaf(values))
            }
            NodeTag::Atom => {
                if self.flatten_constants.contains(&expr) || self.symbols.is_constant(expr) {
                    return Ok(self.adds.leaf(vec![expr]));
                }
                Err(CompileError::UndefinedSymbol {
                    name: self.printed(expr),
                    line: self.pool.line(expr),
                })
            }
            NodeTag::Dot | NodeTag::Array | NodeTag::Bit => {
                if self.symbols.is_constant(expr) || self.flatten_constants.contains(&expr) {
                    return Ok(self.adds.leaf(vec![expr]));
                }
                if self.symbols.is_var(expr) {
                    return self.var_to_add(expr, next);
                }
                if self.symbols.is_define(expr) {
                    let body = self.get_definition(expr, true)?;
                    return self.expr_to_add(body, next);
                }
                Err(CompileError::UndefinedSymbol {
                    name: self.printed(expr),
                    line: self.pool.line(expr),
                })
            }
            NodeTag::Next => {
                if next {
                    return Err(CompileError::TypeError {
                        detail: "nested next operators".to_owned(),
                        line: self.pool.line(expr),
                    });
                }
                let body = self.pool.car(expr).expect("next body");
                self.expr_to_add(body, true)
            }
            NodeTag::Smallinit => {
                let body = self.pool.car(expr).expect("init body");
                self.expr_to_add(body, next)
            }
            NodeTag::Not => {
                let body = self.pool.car(expr).expect("not body");
                let a = self.expr_to_add(body, next)?;
                self.adds.apply_not(&mut self.pool, a)
            }
            NodeTag::Case | NodeTag::IfThenElse => {
                let branch = self.pool.car(expr).expect("case branch");
                let cond = self.pool.car(branch).expect("case condition");
                let then = self.pool.cdr(branch).expect("case value");
                let els = self.pool.cdr(expr).expect("case else");
                let cond = self.expr_to_add(cond, next)?;
                let then = self.expr_to_add(then, next)?;
                let els = self.expr_to_add(els, next)?;
                self.adds.ite(&mut self.pool, cond, then, els)
            }
            NodeTag::Eqdef => {
                let lhs = self.pool.car(expr).expect("eqdef lhs");
                let rhs = self.pool.cdr(expr).expect("eqdef rhs");
                let l = self.expr_to_add(lhs, next)?;
                let r = self.expr_to_add(rhs, next)?;
                self.check_assign_range(lhs, r)?;
                self.adds.apply2(&mut self.pool, LeafOp::Eqdef, l, r)
            }
            _ => {
                let op = match tag {
                    NodeTag::And => LeafOp::And,
                    NodeTag::Or => LeafOp::Or,
                    NodeTag::Xor => LeafOp::Xor,
                    NodeTag::Xnor => LeafOp::Xnor,
                    NodeTag::Iff => LeafOp::Iff,
                    NodeTag::Implies => LeafOp::Implies,
                    NodeTag::Plus => LeafOp::Plus,
                    NodeTag::Minus => LeafOp::Minus,
                    NodeTag::Times => LeafOp::Times,
                    NodeTag::Divide => LeafOp::Divide,
                    NodeTag::Mod => LeafOp::Mod,
                    NodeTag::Equal => LeafOp::Equal,
                    NodeTag::NotEqual => LeafOp::NotEqual,
                    NodeTag::Lt => LeafOp::Lt,
                    NodeTag::Gt => LeafOp::Gt,
                    NodeTag::Le => LeafOp::Le,
                    NodeTag::Ge => LeafOp::Ge,
                    NodeTag::Union => LeafOp::Union,
                    NodeTag::Setin => LeafOp::Setin,
                    other => {
                        return Err(CompileError::TypeError {
                            detail: format!("cannot evaluate {other:?} node"),
                            line: self.pool.line(expr),
                        });
                    }
                };
                let left = self.pool.car(expr).expect("binary lhs");
                let right = self.pool.cdr(expr).expect("binary rhs");
                let l = self.expr_to_add(left, next)?;
                let r = self.expr_to_add(right, next)?;
                self.adds.apply2(&mut self.pool, op, l, r)
            }
        }
    }

    /// Range check for assignments: every value the right-hand side can take
    /// must lie in the assigned variable's range.
    fn check_assign_range(&mut self, lhs: NodeId, rhs_add: AddId) -> CompileResult<()> {
        let target = match self.pool.tag(lhs) {
            NodeTag::Next | NodeTag::Smallinit => self.pool.car(lhs).expect("assign target"),
            _ => lhs,
        };
        let Some(range) = self.symbols.var_range(target).cloned() else {
            return Ok(());
        };
        for value in self.adds.leaves_of(rhs_add) {
            if !range.contains(&self.pool, value) {
                return Err(CompileError::RangeOutOfDomain {
                    value: self.printed(value),
                    name: self.printed(target),
                });
            }
        }
        Ok(())
    }

    /// The ADD of a variable: its encoding tree with bits mapped to decision
    /// levels (next-state levels when `next` holds).
    fn var_to_add(&mut self, var: NodeId, next: bool) -> CompileResult<AddId> {
        let Some(encoding) = self.symbols.encoding(var) else {
            return Err(CompileError::TypeError {
                detail: format!("variable {} has no boolean encoding", self.printed(var)),
                line: self.pool.line(var),
            });
        };
        if self.pool.tag(encoding) == NodeTag::Boolean {
            let level = self.bit_level(var, next)?;
            let one = self.adds.leaf_true(&mut self.pool);
            let zero = self.adds.leaf_false(&mut self.pool);
            return Ok(self.adds.node(level, one, zero));
        }
        self.encoding_to_add(encoding, next)
    }

    fn bit_level(&mut self, bit: NodeId, next: bool) -> CompileResult<u32> {
        self.adds.level_of(bit, next).ok_or_else(|| CompileError::TypeError {
            detail: format!("variable {} has no decision level", self.printed(bit)),
            line: self.pool.line(bit),
        })
    }

    fn encoding_to_add(&mut self, encoding: NodeId, next: bool) -> CompileResult<AddId> {
        match self.pool.tag(encoding) {
            NodeTag::IfThenElse => {
                let branch = self.pool.car(encoding).expect("encoding branch");
                let bit = self.pool.car(branch).expect("encoding bit");
                let then = self.pool.cdr(branch).expect("encoding then");
                let els = self.pool.cdr(encoding).expect("encoding else");
                let level = self.bit_level(bit, next)?;
                let then = self.encoding_to_add(then, next)?;
                let els = self.encoding_to_add(els, next)?;
                Ok(self.adds.node(level, then, els))
            }
            _ => Ok(self.adds.leaf(vec![encoding])),
        }
    }
}
