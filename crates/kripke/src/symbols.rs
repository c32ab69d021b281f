//! Symbol table: qualified names to variable, define, and constant bindings.
//!
//! Every symbol is keyed by an interned qualified-name node (a `DOT`-chained
//! identifier, possibly with array subscripts or a bit suffix). A name is
//! bound to exactly one [`Binding`] variant; redeclaration is a fatal error.
//!
//! Beyond the map itself the table maintains the *ordered* lists the
//! encoding and dump layers need: state variables, input variables,
//! determinisation witnesses, defines, constants, the boolean variable lists
//! filled in while scalar variables are bit-blasted, and the variable groups
//! that keep a scalar's bits contiguous under dynamic reordering.
//!
//! The whole status can be pushed once and later popped, so that a derived
//! alphabet (an LTL tableau) can be declared on top of a model and then
//! discarded without disturbing the original lists.

use ahash::AHashMap;
use indexmap::IndexSet;

use crate::{
    error::{CompileError, CompileResult},
    intern::{NodeId, NodePool, NodeTag},
};

/// The range of a scalar variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Range {
    /// The shared `{0, 1}` boolean range.
    Boolean,
    /// An ordered list of distinct constant nodes.
    Scalar(Vec<NodeId>),
}

impl Range {
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean)
    }

    /// Number of values in the range.
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean => 2,
            Self::Scalar(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `value` belongs to the range.
    pub fn contains(&self, pool: &NodePool, value: NodeId) -> bool {
        match self {
            Self::Boolean => {
                pool.tag(value) == NodeTag::Number && (pool.num(value) == 0 || pool.num(value) == 1)
            }
            Self::Scalar(values) => values.contains(&value),
        }
    }
}

/// What a qualified name is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    StateVar(Range),
    InputVar(Range),
    /// A fresh boolean input introduced to determinise an expression.
    DetermVar,
    /// A define; the body is kept unflattened, flattening is memoised on
    /// first use by the flattener.
    Define { context: Option<NodeId>, body: NodeId },
    Constant,
}

/// A set of variable groups; each group is a list of boolean variables to be
/// kept contiguous under dynamic reordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSet {
    groups: Vec<Vec<NodeId>>,
}

impl GroupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, group: Vec<NodeId>) {
        self.groups.push(group);
    }

    pub fn iter(&self) -> impl Iterator<Item = &[NodeId]> {
        self.groups.iter().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Lists and maps snapshotted by `push_status_and_reset`.
#[derive(Debug)]
struct SavedStatus {
    map: AHashMap<NodeId, Binding>,
    constants: IndexSet<NodeId>,
    encodings: AHashMap<NodeId, NodeId>,
    state_vars: Vec<NodeId>,
    input_vars: Vec<NodeId>,
    determ_vars: Vec<NodeId>,
    all_vars: Vec<NodeId>,
    defines: Vec<NodeId>,
    state_bool_vars: Vec<NodeId>,
    input_bool_vars: Vec<NodeId>,
    state_groups: GroupSet,
    input_groups: GroupSet,
}

/// The symbol table.
#[derive(Debug, Default)]
pub struct SymbolTable {
    map: AHashMap<NodeId, Binding>,
    constants: IndexSet<NodeId>,
    /// Variable name to its encoding: the `boolean` marker node for boolean
    /// variables, an if-then-else decision tree for scalars.
    encodings: AHashMap<NodeId, NodeId>,
    state_vars: Vec<NodeId>,
    /// Model input variables; determinisation witnesses are kept apart.
    input_vars: Vec<NodeId>,
    determ_vars: Vec<NodeId>,
    /// All variables in declaration order (state, input, and determ).
    all_vars: Vec<NodeId>,
    defines: Vec<NodeId>,
    pub(crate) state_bool_vars: Vec<NodeId>,
    pub(crate) input_bool_vars: Vec<NodeId>,
    pub(crate) state_groups: GroupSet,
    pub(crate) input_groups: GroupSet,
    saved: Option<Box<SavedStatus>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_fresh(&self, pool: &NodePool, name: NodeId) -> CompileResult<()> {
        if self.map.contains_key(&name) {
            return Err(CompileError::Redefined {
                name: pool.display(name).to_string(),
                line: pool.line(name),
            });
        }
        Ok(())
    }

    pub fn declare_state_var(
        &mut self,
        pool: &NodePool,
        name: NodeId,
        range: Range,
    ) -> CompileResult<()> {
        self.check_fresh(pool, name)?;
        if range.is_boolean() {
            self.state_bool_vars.push(name);
        }
        self.map.insert(name, Binding::StateVar(range));
        self.state_vars.push(name);
        self.all_vars.push(name);
        Ok(())
    }

    pub fn declare_input_var(
        &mut self,
        pool: &NodePool,
        name: NodeId,
        range: Range,
    ) -> CompileResult<()> {
        self.check_fresh(pool, name)?;
        if range.is_boolean() {
            self.input_bool_vars.push(name);
        }
        self.map.insert(name, Binding::InputVar(range));
        self.input_vars.push(name);
        self.all_vars.push(name);
        Ok(())
    }

    pub fn declare_determ_var(&mut self, pool: &NodePool, name: NodeId) -> CompileResult<()> {
        self.check_fresh(pool, name)?;
        self.map.insert(name, Binding::DetermVar);
        self.determ_vars.push(name);
        self.input_bool_vars.push(name);
        self.all_vars.push(name);
        Ok(())
    }

    pub fn declare_define(
        &mut self,
        pool: &NodePool,
        name: NodeId,
        context: Option<NodeId>,
        body: NodeId,
    ) -> CompileResult<()> {
        self.check_fresh(pool, name)?;
        self.map.insert(name, Binding::Define { context, body });
        self.defines.push(name);
        Ok(())
    }

    /// Declares a constant. Unlike the other declarations this is idempotent:
    /// range constants are shared between variables.
    pub fn declare_constant(&mut self, name: NodeId) {
        if self.constants.insert(name) {
            self.map.entry(name).or_insert(Binding::Constant);
        }
    }

    pub fn lookup(&self, name: NodeId) -> Option<&Binding> {
        self.map.get(&name)
    }

    pub fn is_declared(&self, name: NodeId) -> bool {
        self.map.contains_key(&name)
    }

    pub fn is_var(&self, name: NodeId) -> bool {
        matches!(
            self.map.get(&name),
            Some(Binding::StateVar(_) | Binding::InputVar(_) | Binding::DetermVar)
        )
    }

    pub fn is_state_var(&self, name: NodeId) -> bool {
        matches!(self.map.get(&name), Some(Binding::StateVar(_)))
    }

    /// Input variables including determinisation witnesses.
    pub fn is_input_var(&self, name: NodeId) -> bool {
        matches!(self.map.get(&name), Some(Binding::InputVar(_) | Binding::DetermVar))
    }

    /// Input variables of the model proper, excluding determinisation
    /// witnesses.
    pub fn is_model_input_var(&self, name: NodeId) -> bool {
        matches!(self.map.get(&name), Some(Binding::InputVar(_)))
    }

    pub fn is_determ_var(&self, name: NodeId) -> bool {
        matches!(self.map.get(&name), Some(Binding::DetermVar))
    }

    pub fn is_define(&self, name: NodeId) -> bool {
        matches!(self.map.get(&name), Some(Binding::Define { .. }))
    }

    pub fn is_constant(&self, name: NodeId) -> bool {
        matches!(self.map.get(&name), Some(Binding::Constant))
    }

    /// Whether the variable carries the trivial boolean encoding.
    pub fn is_boolean_var(&self, name: NodeId) -> bool {
        matches!(
            self.map.get(&name),
            Some(
                Binding::StateVar(Range::Boolean)
                    | Binding::InputVar(Range::Boolean)
                    | Binding::DetermVar
            )
        )
    }

    /// The declared range of a variable.
    pub fn var_range(&self, name: NodeId) -> Option<&Range> {
        static BOOLEAN: Range = Range::Boolean;
        match self.map.get(&name) {
            Some(Binding::StateVar(range) | Binding::InputVar(range)) => Some(range),
            Some(Binding::DetermVar) => Some(&BOOLEAN),
            _ => None,
        }
    }

    pub fn define_body(&self, name: NodeId) -> Option<(Option<NodeId>, NodeId)> {
        match self.map.get(&name) {
            Some(Binding::Define { context, body }) => Some((*context, *body)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Enumerations (declaration order)
    // ------------------------------------------------------------------

    pub fn state_vars(&self) -> &[NodeId] {
        &self.state_vars
    }

    pub fn input_vars(&self) -> &[NodeId] {
        &self.input_vars
    }

    pub fn determ_vars(&self) -> &[NodeId] {
        &self.determ_vars
    }

    /// All variables, state and input alike, in declaration order.
    pub fn all_vars(&self) -> &[NodeId] {
        &self.all_vars
    }

    /// State and model input variables, without determinisation witnesses.
    pub fn model_vars(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.all_vars.iter().copied().filter(|v| !self.is_determ_var(*v))
    }

    pub fn defines(&self) -> &[NodeId] {
        &self.defines
    }

    pub fn constants(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.constants.iter().copied()
    }

    pub fn state_bool_vars(&self) -> &[NodeId] {
        &self.state_bool_vars
    }

    pub fn input_bool_vars(&self) -> &[NodeId] {
        &self.input_bool_vars
    }

    pub fn state_groups(&self) -> &GroupSet {
        &self.state_groups
    }

    pub fn input_groups(&self) -> &GroupSet {
        &self.input_groups
    }

    // ------------------------------------------------------------------
    // Encodings
    // ------------------------------------------------------------------

    pub fn set_encoding(&mut self, var: NodeId, encoding: NodeId) {
        debug_assert!(!self.encodings.contains_key(&var), "variable encoded twice");
        self.encodings.insert(var, encoding);
    }

    pub fn encoding(&self, var: NodeId) -> Option<NodeId> {
        self.encodings.get(&var).copied()
    }

    // ------------------------------------------------------------------
    // Status stack
    // ------------------------------------------------------------------

    /// Snapshots the whole table and resets the enumeration lists, keeping
    /// lookups for already-declared symbols working. Exactly one push may be
    /// outstanding.
    pub fn push_status_and_reset(&mut self) {
        assert!(self.saved.is_none(), "symbol table status pushed twice");
        self.saved = Some(Box::new(SavedStatus {
            map: self.map.clone(),
            constants: self.constants.clone(),
            encodings: self.encodings.clone(),
            state_vars: std::mem::take(&mut self.state_vars),
            input_vars: std::mem::take(&mut self.input_vars),
            determ_vars: std::mem::take(&mut self.determ_vars),
            all_vars: std::mem::take(&mut self.all_vars),
            defines: std::mem::take(&mut self.defines),
            state_bool_vars: std::mem::take(&mut self.state_bool_vars),
            input_bool_vars: std::mem::take(&mut self.input_bool_vars),
            state_groups: std::mem::take(&mut self.state_groups),
            input_groups: std::mem::take(&mut self.input_groups),
        }));
    }

    /// Restores the table to the state saved by the matching push.
    pub fn pop_status(&mut self) {
        let saved = *self.saved.take().expect("symbol table status popped without a push");
        self.map = saved.map;
        self.constants = saved.constants;
        self.encodings = saved.encodings;
        self.state_vars = saved.state_vars;
        self.input_vars = saved.input_vars;
        self.determ_vars = saved.determ_vars;
        self.all_vars = saved.all_vars;
        self.defines = saved.defines;
        self.state_bool_vars = saved.state_bool_vars;
        self.input_bool_vars = saved.input_bool_vars;
        self.state_groups = saved.state_groups;
        self.input_groups = saved.input_groups;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(pool: &mut NodePool, text: &str) -> NodeId {
        let atom = pool.atom(text);
        pool.dot(None, atom)
    }

    #[test]
    fn redeclaration_fails() {
        let mut pool = NodePool::new();
        let mut table = SymbolTable::new();
        let x = name(&mut pool, "x");
        table.declare_state_var(&pool, x, Range::Boolean).unwrap();
        let err = table.declare_input_var(&pool, x, Range::Boolean).unwrap_err();
        assert_eq!(err.kind(), "Redefined");
    }

    #[test]
    fn binding_predicates() {
        let mut pool = NodePool::new();
        let mut table = SymbolTable::new();
        let x = name(&mut pool, "x");
        let d = name(&mut pool, "d");
        let w = name(&mut pool, "w");
        let two = pool.number(2);
        let three = pool.number(3);
        table
            .declare_state_var(&pool, x, Range::Scalar(vec![two, three]))
            .unwrap();
        let body = pool.truth();
        table.declare_define(&pool, d, None, body).unwrap();
        table.declare_determ_var(&pool, w).unwrap();

        assert!(table.is_var(x) && table.is_state_var(x) && !table.is_boolean_var(x));
        assert!(table.is_define(d) && !table.is_var(d));
        assert!(table.is_input_var(w) && !table.is_model_input_var(w));
        assert!(table.is_boolean_var(w));
        assert_eq!(table.var_range(x), Some(&Range::Scalar(vec![two, three])));
    }

    #[test]
    fn constants_are_idempotent() {
        let mut pool = NodePool::new();
        let mut table = SymbolTable::new();
        let c = pool.number(7);
        table.declare_constant(c);
        table.declare_constant(c);
        assert_eq!(table.constants().count(), 1);
        assert!(table.is_constant(c));
    }

    #[test]
    fn push_pop_restores_everything() {
        let mut pool = NodePool::new();
        let mut table = SymbolTable::new();
        let x = name(&mut pool, "x");
        let y = name(&mut pool, "y");
        table.declare_state_var(&pool, x, Range::Boolean).unwrap();
        table.declare_input_var(&pool, y, Range::Boolean).unwrap();
        let c = pool.number(1);
        table.declare_constant(c);
        table.state_groups.add_group(vec![x]);

        let before_state = table.state_vars().to_vec();
        let before_groups = table.state_groups().clone();

        table.push_status_and_reset();
        assert!(table.state_vars().is_empty());
        assert!(table.is_declared(x), "lookups must survive the push");

        // declare a tableau-only symbol on top
        let t = name(&mut pool, "tableau_bit");
        table.declare_state_var(&pool, t, Range::Boolean).unwrap();
        assert_eq!(table.state_vars(), [t]);

        table.pop_status();
        assert_eq!(table.state_vars(), before_state);
        assert_eq!(table.state_groups(), &before_groups);
        assert!(!table.is_declared(t));
    }

    #[test]
    #[should_panic(expected = "pushed twice")]
    fn double_push_panics() {
        let mut table = SymbolTable::new();
        table.push_status_and_reset();
        table.push_status_and_reset();
    }
}
