//! Module instantiation and hierarchy flattening.
//!
//! The flattener walks a parsed module hierarchy and produces a
//! [`FlatHierarchy`]: the INIT/INVAR/TRANS conjunctions, the property lists,
//! and the per-process assignments, all over fully qualified names. Work
//! proceeds in two passes per module body: defines are bound first (so array
//! bounds may mention them), then variables are instantiated and constraints
//! collected. Module recursion is caught with an instantiation stack,
//! circular defines with an in-progress sentinel in the flattening memo.
//!
//! Name resolution contextualises identifiers against the instance path and
//! the formal-parameter table; `self` resolves to the enclosing instance.
//!
//! When a model declares more than one process, a fresh input variable
//! `_process_selector_` ranging over the process names is introduced together
//! with one `running` define per process, and every `next` assignment of a
//! process is guarded so that non-running processes keep their state.

use ahash::AHashMap;

use crate::{
    compiler::Compiler,
    error::{CompileError, CompileResult, Warning},
    intern::{NodeId, NodeTag, Payload, StrId},
    symbols::Range,
};

/// Name of the implicit process scheduling variable.
pub const PROCESS_SELECTOR_NAME: &str = "_process_selector_";
/// Name of the per-process `running` define.
pub const RUNNING_NAME: &str = "running";

/// A registered module definition.
#[derive(Debug, Clone)]
pub(crate) struct ModuleDef {
    /// The module name atom.
    pub name: NodeId,
    /// Formal parameter atoms in declaration order.
    pub formals: Vec<NodeId>,
    /// Declaration nodes of the module body in source order.
    pub body: Vec<NodeId>,
}

/// Memo entry for flattened define bodies. The in-progress sentinel catches
/// circular defines at first recursive reentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DefEntry {
    InProgress,
    Done(NodeId),
}

/// Which slot of a variable's behaviour an assignment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignKind {
    Init,
    Invar,
    Next,
}

/// Per-variable record of explicit assignments and the non-assignment
/// constraint fragments whose dependency set contains the variable.
#[derive(Debug, Default)]
pub struct AssignEntry {
    /// Right-hand side of the explicit assignment (already composed over
    /// processes for `next`).
    pub assign: Option<NodeId>,
    /// Constraint fragments, deduplicated, in attachment order.
    pub constraints: Vec<NodeId>,
}

/// The assignment database filled by process flattening and constraint
/// partitioning.
#[derive(Debug, Default)]
pub struct AssignDb {
    entries: AHashMap<(NodeId, AssignKind), AssignEntry>,
}

impl AssignDb {
    pub fn entry(&self, var: NodeId, kind: AssignKind) -> Option<&AssignEntry> {
        self.entries.get(&(var, kind))
    }

    pub fn assign(&self, var: NodeId, kind: AssignKind) -> Option<NodeId> {
        self.entries.get(&(var, kind)).and_then(|e| e.assign)
    }

    pub(crate) fn entry_mut(&mut self, var: NodeId, kind: AssignKind) -> &mut AssignEntry {
        self.entries.entry((var, kind)).or_default()
    }

    /// Attaches a constraint fragment, skipping exact duplicates per
    /// variable and kind.
    pub(crate) fn attach_constraint(&mut self, var: NodeId, kind: AssignKind, fragment: NodeId) {
        let entry = self.entry_mut(var, kind);
        if !entry.constraints.contains(&fragment) {
            entry.constraints.push(fragment);
        }
    }
}

/// The result of flattening a module hierarchy.
#[derive(Debug, Default)]
pub struct FlatHierarchy {
    pub init: Option<NodeId>,
    pub invar: Option<NodeId>,
    pub trans: Option<NodeId>,
    pub specs: Vec<NodeId>,
    pub compute: Vec<NodeId>,
    pub ltl_specs: Vec<NodeId>,
    pub psl_specs: Vec<NodeId>,
    pub invar_specs: Vec<NodeId>,
    pub justice: Vec<NodeId>,
    pub compassion: Vec<(NodeId, NodeId)>,
    /// `(instance name, flattened assignments)` per process; the root
    /// instance comes last.
    pub procs: Vec<(Option<NodeId>, Option<NodeId>)>,
    /// Conjunction of all flattened process assignments.
    pub assign: Option<NodeId>,
}

/// Accumulator threaded through module instantiation.
#[derive(Debug, Default)]
struct Acc {
    init: Option<NodeId>,
    invar: Option<NodeId>,
    trans: Option<NodeId>,
    assign: Option<NodeId>,
    specs: Vec<NodeId>,
    compute: Vec<NodeId>,
    ltl_specs: Vec<NodeId>,
    psl_specs: Vec<NodeId>,
    invar_specs: Vec<NodeId>,
    justice: Vec<NodeId>,
    compassion: Vec<(NodeId, NodeId)>,
    procs: Vec<(Option<NodeId>, Option<NodeId>)>,
}

fn merge_opt(
    pool: &mut crate::intern::NodePool,
    left: Option<NodeId>,
    right: Option<NodeId>,
) -> Option<NodeId> {
    match (left, right) {
        (Some(a), Some(b)) => Some(pool.and(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

impl Compiler {
    /// Merges a module's contributions into the enclosing accumulator.
    fn merge_acc(&mut self, acc: &mut Acc, other: Acc) {
        acc.init = merge_opt(&mut self.pool, acc.init, other.init);
        acc.invar = merge_opt(&mut self.pool, acc.invar, other.invar);
        acc.trans = merge_opt(&mut self.pool, acc.trans, other.trans);
        acc.assign = merge_opt(&mut self.pool, acc.assign, other.assign);
        acc.specs.extend(other.specs);
        acc.compute.extend(other.compute);
        acc.ltl_specs.extend(other.ltl_specs);
        acc.psl_specs.extend(other.psl_specs);
        acc.invar_specs.extend(other.invar_specs);
        acc.justice.extend(other.justice);
        acc.compassion.extend(other.compassion);
        acc.procs.extend(other.procs);
    }
    /// Registers a parsed `MODULE` node so instances of it can be flattened.
    ///
    /// The node shape is `Module(Modtype(name, formals), body)` where `body`
    /// is a cons list of declaration nodes.
    pub fn add_module(&mut self, module: NodeId) -> CompileResult<()> {
        debug_assert_eq!(self.pool.tag(module), NodeTag::Module);
        let header = self.pool.car(module).expect("module header");
        debug_assert_eq!(self.pool.tag(header), NodeTag::Modtype);
        let name = self.pool.car(header).expect("module name");
        let formals = self.pool.list_to_vec(self.pool.cdr(header));
        let body = self.pool.list_to_vec(self.pool.cdr(module));
        let key = self.atom_key(name);
        if self.modules.contains_key(&key) {
            return Err(CompileError::Redefined {
                name: self.pool.atom_text(name).to_owned(),
                line: self.pool.line(module),
            });
        }
        self.modules.insert(key, ModuleDef { name, formals, body });
        Ok(())
    }

    fn atom_key(&self, atom: NodeId) -> StrId {
        debug_assert_eq!(self.pool.tag(atom), NodeTag::Atom);
        self.pool.atom_str_id(atom)
    }

    /// Flattens the hierarchy rooted at `root_module`, instantiated under
    /// `instance` (`None` for `main`) with the given actual parameters.
    pub fn flatten_hierarchy(
        &mut self,
        root_module: NodeId,
        instance: Option<NodeId>,
        actuals: Option<NodeId>,
    ) -> CompileResult<FlatHierarchy> {
        let mut acc = Acc::default();
        let mut stack = Vec::new();
        self.instantiate_hierarchy(root_module, instance, actuals, &mut acc, &mut stack)?;

        // The process variable must exist before the assignments referring
        // to `running` are flattened.
        self.create_process_vars(&acc.procs)?;

        let init = self.flatten_opt(acc.init, instance)?;
        let invar = self.flatten_opt(acc.invar, instance)?;
        let trans = self.flatten_opt(acc.trans, instance)?;

        let mut procs = Vec::with_capacity(acc.procs.len());
        let mut assign_all = None;
        for (proc_name, raw_assign) in acc.procs {
            let flattened = self.flatten_opt(raw_assign, None)?;
            let running = if self.process_running.is_empty() {
                None
            } else {
                let atom = self.pool.atom(RUNNING_NAME);
                Some(self.resolve_name_in(atom, proc_name)?)
            };
            if let Some(assign) = flattened {
                self.record_process_assigns(assign, None, running)?;
                assign_all = Some(self.pool.and_opt(assign_all, assign));
            }
            procs.push((proc_name, flattened));
        }

        if !acc.compassion.is_empty() {
            self.diagnostics.warn(Warning::CompassionPartiallySupported);
        }

        Ok(FlatHierarchy {
            init,
            invar,
            trans,
            specs: acc.specs,
            compute: acc.compute,
            ltl_specs: acc.ltl_specs,
            psl_specs: acc.psl_specs,
            invar_specs: acc.invar_specs,
            justice: acc.justice,
            compassion: acc.compassion,
            procs,
            assign: assign_all,
        })
    }

    fn flatten_opt(
        &mut self,
        expr: Option<NodeId>,
        ctx: Option<NodeId>,
    ) -> CompileResult<Option<NodeId>> {
        expr.map(|e| self.flatten_sexp(e, ctx)).transpose()
    }

    /// Instantiates a module as a process root: the assignments collected in
    /// its subtree become a `(instance, assign)` entry of the process list.
    fn instantiate_hierarchy(
        &mut self,
        root_module: NodeId,
        instance: Option<NodeId>,
        actuals: Option<NodeId>,
        acc: &mut Acc,
        stack: &mut Vec<StrId>,
    ) -> CompileResult<()> {
        let mut local = Acc::default();
        self.instantiate_by_name(root_module, instance, actuals, &mut local, stack)?;
        let assign = local.assign.take();
        self.merge_acc(acc, local);
        acc.procs.push((instance, assign));
        Ok(())
    }

    /// Looks a module up by name, checks for instantiation recursion, and
    /// instantiates its body under `instance`.
    fn instantiate_by_name(
        &mut self,
        root_module: NodeId,
        instance: Option<NodeId>,
        actuals: Option<NodeId>,
        acc: &mut Acc,
        stack: &mut Vec<StrId>,
    ) -> CompileResult<()> {
        let key = self.atom_key(root_module);
        let Some(def) = self.modules.get(&key) else {
            return Err(CompileError::UndefinedModule {
                name: self.pool.atom_text(root_module).to_owned(),
            });
        };
        if stack.contains(&key) {
            return Err(CompileError::RecursiveModule {
                name: self.pool.atom_text(root_module).to_owned(),
            });
        }
        let def = def.clone();
        stack.push(key);
        let result = self.instantiate(&def, instance, actuals, acc, stack);
        stack.pop();
        result
    }

    /// Instantiates a module body: binds parameters, declares defines, then
    /// processes every declaration and merges the contributions.
    fn instantiate(
        &mut self,
        def: &ModuleDef,
        instance: Option<NodeId>,
        actuals: Option<NodeId>,
        acc: &mut Acc,
        stack: &mut Vec<StrId>,
    ) -> CompileResult<()> {
        self.make_params(instance, actuals, def)?;

        // Defines first: array bounds may mention them.
        for &decl in &def.body {
            if self.pool.tag(decl) != NodeTag::Define {
                continue;
            }
            for eqdef in self.pool.list_to_vec(self.pool.car(decl)) {
                let raw_name = self.pool.car(eqdef).expect("define name");
                let body = self.pool.cdr(eqdef).expect("define body");
                let name = self.require_name(raw_name, instance)?;
                self.symbols.declare_define(&self.pool, name, instance, body)?;
            }
        }

        let mut local = Acc::default();
        for &decl in &def.body {
            match self.pool.tag(decl) {
                NodeTag::Isa => {
                    let target = self.pool.car(decl).expect("isa target");
                    self.instantiate_by_name(target, instance, None, &mut local, stack)?;
                }
                NodeTag::Var => self.instantiate_vars(decl, instance, false, &mut local, stack)?,
                NodeTag::Ivar => self.instantiate_vars(decl, instance, true, &mut local, stack)?,
                NodeTag::Trans => {
                    let e = self.contextualise(decl, instance);
                    local.trans = Some(self.pool.and_opt(local.trans, e));
                }
                NodeTag::Init => {
                    let e = self.contextualise(decl, instance);
                    local.init = Some(self.pool.and_opt(local.init, e));
                }
                NodeTag::Invar => {
                    let e = self.contextualise(decl, instance);
                    local.invar = Some(self.pool.and_opt(local.invar, e));
                }
                NodeTag::Spec => local.specs.push(self.contextualise(decl, instance)),
                NodeTag::LtlSpec => local.ltl_specs.push(self.contextualise(decl, instance)),
                NodeTag::PslSpec => local.psl_specs.push(self.contextualise(decl, instance)),
                NodeTag::InvarSpec => local.invar_specs.push(self.contextualise(decl, instance)),
                NodeTag::Compute => local.compute.push(self.contextualise(decl, instance)),
                NodeTag::Justice => local.justice.push(self.contextualise(decl, instance)),
                NodeTag::Compassion => {
                    let pair = self.pool.car(decl).expect("compassion pair");
                    let left = self.pool.car(pair).expect("compassion lhs");
                    let right = self.pool.cdr(pair).expect("compassion rhs");
                    let left = self.pool.context(instance, left);
                    let right = self.pool.context(instance, right);
                    local.compassion.push((left, right));
                }
                NodeTag::Assign => {
                    if self.pool.car(decl).is_some() {
                        let e = self.contextualise(decl, instance);
                        local.assign = Some(self.pool.and_opt(local.assign, e));
                    }
                }
                NodeTag::Define => {}
                other => {
                    return Err(CompileError::TypeError {
                        detail: format!("unexpected {other:?} declaration in module body"),
                        line: self.pool.line(decl),
                    });
                }
            }
        }
        self.merge_acc(acc, local);
        Ok(())
    }

    fn contextualise(&mut self, decl: NodeId, instance: Option<NodeId>) -> NodeId {
        let body = self.pool.car(decl).expect("declaration body");
        self.pool.context(instance, body)
    }

    /// Binds the formal parameters of `def` for instance `instance` to the
    /// actual expressions, which the caller has already contextualised.
    fn make_params(
        &mut self,
        instance: Option<NodeId>,
        actuals: Option<NodeId>,
        def: &ModuleDef,
    ) -> CompileResult<()> {
        let mut actuals = self.pool.list_to_vec(actuals).into_iter();
        for &formal in &def.formals {
            let Some(actual) = actuals.next() else {
                return Err(CompileError::TooFewActuals {
                    module: self.pool.atom_text(def.name).to_owned(),
                });
            };
            let name = self.pool.dot(instance, formal);
            if self.params.contains_key(&name) {
                return Err(CompileError::MultipleSubstitution {
                    name: self.printed(name),
                });
            }
            self.params.insert(name, actual);
        }
        if actuals.next().is_some() {
            return Err(CompileError::TooManyActuals {
                module: self.pool.atom_text(def.name).to_owned(),
            });
        }
        Ok(())
    }

    fn instantiate_vars(
        &mut self,
        decl: NodeId,
        instance: Option<NodeId>,
        input: bool,
        acc: &mut Acc,
        stack: &mut Vec<StrId>,
    ) -> CompileResult<()> {
        for var_decl in self.pool.list_to_vec(self.pool.car(decl)) {
            let raw_name = self.pool.car(var_decl).expect("variable name");
            let var_type = self.pool.cdr(var_decl).expect("variable type");
            let name = self.require_name(raw_name, instance)?;
            self.instantiate_var(name, var_type, instance, input, acc, stack)?;
        }
        Ok(())
    }

    /// Declares one variable of the given type, recursing through module
    /// types, processes, and arrays.
    fn instantiate_var(
        &mut self,
        name: NodeId,
        var_type: NodeId,
        context: Option<NodeId>,
        input: bool,
        acc: &mut Acc,
        stack: &mut Vec<StrId>,
    ) -> CompileResult<()> {
        if self.symbols.is_declared(name) {
            return Err(CompileError::Redefined {
                name: self.printed(name),
                line: self.pool.line(var_type),
            });
        }
        match self.pool.tag(var_type) {
            NodeTag::Boolean => {
                let zero = self.pool.number(0);
                let one = self.pool.number(1);
                self.flatten_constants.insert(zero);
                self.flatten_constants.insert(one);
                self.declare_var(name, Range::Boolean, input)?;
            }
            NodeTag::Twodots => {
                let low_node = self.pool.car(var_type).expect("range low");
                let high_node = self.pool.cdr(var_type).expect("range high");
                let low = self.pool.num(low_node);
                let high = self.pool.num(high_node);
                if high < low {
                    return Err(CompileError::EmptyRange {
                        name: self.printed(name),
                        low,
                        high,
                    });
                }
                if low == 0 && high == 1 {
                    // the canonical boolean range
                    self.flatten_constants.insert(low_node);
                    self.flatten_constants.insert(high_node);
                    self.declare_var(name, Range::Boolean, input)?;
                    return Ok(());
                }
                let values: Vec<NodeId> = (low..=high).map(|i| self.pool.number(i)).collect();
                for &value in &values {
                    self.flatten_constants.insert(value);
                }
                self.declare_scalar(name, values, context, input)?;
            }
            NodeTag::Scalar => {
                let values = self.pool.list_to_vec(self.pool.car(var_type));
                for &value in &values {
                    self.flatten_constants.insert(value);
                }
                self.declare_scalar(name, values, context, input)?;
            }
            NodeTag::Modtype => {
                let target = self.pool.car(var_type).expect("module type name");
                let actuals = self.put_in_context(self.pool.cdr(var_type), context);
                self.instantiate_by_name(target, Some(name), actuals, acc, stack)?;
            }
            NodeTag::Process => {
                let modtype = self.pool.car(var_type).expect("process module type");
                let target = self.pool.car(modtype).expect("process module name");
                let actuals = self.put_in_context(self.pool.cdr(modtype), context);
                self.instantiate_hierarchy(target, Some(name), actuals, acc, stack)?;
            }
            NodeTag::Array => {
                let bounds = self.pool.car(var_type).expect("array bounds");
                let elem = self.pool.cdr(var_type).expect("array element type");
                let low = self.pool.num(self.pool.car(bounds).expect("array low"));
                let high = self.pool.num(self.pool.cdr(bounds).expect("array high"));
                for i in low..=high {
                    let index = self.pool.number(i);
                    self.flatten_constants.insert(index);
                    let element = self.pool.array(name, index);
                    self.instantiate_var(element, elem, context, input, acc, stack)?;
                }
            }
            other => {
                return Err(CompileError::TypeError {
                    detail: format!("unexpected {other:?} type for variable {}", self.printed(name)),
                    line: self.pool.line(var_type),
                });
            }
        }
        Ok(())
    }

    fn declare_var(&mut self, name: NodeId, range: Range, input: bool) -> CompileResult<()> {
        if input {
            self.symbols.declare_input_var(&self.pool, name, range)
        } else {
            self.symbols.declare_state_var(&self.pool, name, range)
        }
    }

    /// Declares a scalar variable, degrading single-valued ranges to a
    /// constant define with a warning.
    fn declare_scalar(
        &mut self,
        name: NodeId,
        values: Vec<NodeId>,
        context: Option<NodeId>,
        input: bool,
    ) -> CompileResult<()> {
        if values.is_empty() {
            return Err(CompileError::EmptyRange {
                name: self.printed(name),
                low: 0,
                high: -1,
            });
        }
        if let [value] = values[..] {
            if !self.symbols.is_constant(value) {
                self.symbols.declare_constant(value);
            }
            self.symbols.declare_define(&self.pool, name, context, value)?;
            let name = self.printed(name);
            self.diagnostics.warn(Warning::EncodedAsConstant { name });
            return Ok(());
        }
        self.declare_var(name, Range::Scalar(values), input)
    }

    /// Wraps each actual parameter into the context of the instantiating
    /// module, so it is later resolved in the scope it was written in.
    fn put_in_context(&mut self, actuals: Option<NodeId>, context: Option<NodeId>) -> Option<NodeId> {
        let items = self.pool.list_to_vec(actuals);
        let wrapped: Vec<NodeId> =
            items.into_iter().map(|a| self.pool.context(context, a)).collect();
        self.pool.list(wrapped)
    }

    // ------------------------------------------------------------------
    // Name resolution
    // ------------------------------------------------------------------

    /// Resolves an identifier expression to a qualified name under `context`,
    /// failing on expressions that cannot denote a name.
    pub fn resolve_name_in(
        &mut self,
        expr: NodeId,
        context: Option<NodeId>,
    ) -> CompileResult<NodeId> {
        self.require_name(expr, context)
    }

    fn require_name(&mut self, expr: NodeId, context: Option<NodeId>) -> CompileResult<NodeId> {
        self.resolve_name_recur(expr, context)?.ok_or_else(|| CompileError::TypeError {
            detail: "expression does not denote a name".to_owned(),
            line: self.pool.line(expr),
        })
    }

    fn resolve_name_recur(
        &mut self,
        expr: NodeId,
        context: Option<NodeId>,
    ) -> CompileResult<Option<NodeId>> {
        match self.pool.tag(expr) {
            NodeTag::Context => {
                let inner = self.pool.cdr(expr).expect("context body");
                let ctx = self.pool.car(expr);
                self.resolve_name_recur(inner, ctx)
            }
            NodeTag::Atom => {
                let name = self.pool.dot(context, expr);
                if let Some(&actual) = self.params.get(&name) {
                    return self.resolve_name_recur(actual, context);
                }
                Ok(Some(name))
            }
            NodeTag::Number => Ok(Some(expr)),
            NodeTag::Bit => {
                let base = self.pool.car(expr).expect("bit base");
                let k = self.pool.bit_index(expr);
                let base = self.require_name_err(base, context, "operator bit")?;
                Ok(Some(self.pool.bit(base, k)))
            }
            NodeTag::Dot => {
                let field = self.pool.cdr(expr).expect("dot field");
                // an absent base means the name is already fully qualified
                let base = match self.pool.car(expr) {
                    Some(base) => Some(self.require_name_err(base, context, "operator .")?),
                    None => None,
                };
                Ok(Some(self.pool.dot(base, field)))
            }
            NodeTag::Array => {
                let base = self.pool.car(expr).expect("array base");
                let index = self.pool.cdr(expr).expect("array index");
                let base = self.require_name_err(base, context, "operator []")?;
                Ok(Some(self.pool.array(base, index)))
            }
            NodeTag::SelfRef => Ok(context),
            _ => Err(CompileError::TypeError {
                detail: format!("{} cannot be resolved to a name", self.printed(expr)),
                line: self.pool.line(expr),
            }),
        }
    }

    fn require_name_err(
        &mut self,
        expr: NodeId,
        context: Option<NodeId>,
        what: &str,
    ) -> CompileResult<NodeId> {
        self.resolve_name_recur(expr, context)?.ok_or_else(|| CompileError::TypeError {
            detail: format!("{what} applied to the top-level scope"),
            line: self.pool.line(expr),
        })
    }

    // ------------------------------------------------------------------
    // Expression flattening
    // ------------------------------------------------------------------

    /// Flattens an expression to qualified names, leaving defines unexpanded.
    pub fn flatten_sexp(&mut self, expr: NodeId, context: Option<NodeId>) -> CompileResult<NodeId> {
        self.flatten_sexp_recur(expr, context, false)
    }

    /// Flattens an expression and expands every define to its flattened body.
    pub fn flatten_sexp_expand(
        &mut self,
        expr: NodeId,
        context: Option<NodeId>,
    ) -> CompileResult<NodeId> {
        self.flatten_sexp_recur(expr, context, true)
    }

    fn flatten_sexp_recur(
        &mut self,
        expr: NodeId,
        context: Option<NodeId>,
        expand: bool,
    ) -> CompileResult<NodeId> {
        let tag = self.pool.tag(expr);
        match tag {
            NodeTag::True | NodeTag::False | NodeTag::Number | NodeTag::Twodots => Ok(expr),
            NodeTag::Atom => {
                if self.flatten_constants.contains(&expr) {
                    return Ok(expr);
                }
                let name = self.pool.dot(context, expr);
                if self.flatten_constants.contains(&name) {
                    return Ok(name);
                }
                if let Some(&actual) = self.params.get(&name) {
                    return self.flatten_sexp_recur(actual, context, expand);
                }
                let resolved = self.require_name(expr, context)?;
                self.get_definition(resolved, expand)
            }
            NodeTag::SelfRef => Err(CompileError::TypeError {
                detail: "invalid usage of identifier \"self\"".to_owned(),
                line: self.pool.line(expr),
            }),
            NodeTag::Dot | NodeTag::Array => {
                let name = self.require_name(expr, context)?;
                if self.flatten_constants.contains(&name) {
                    return Ok(name);
                }
                self.get_definition(name, expand)
            }
            NodeTag::Context => {
                let inner = self.pool.cdr(expr).expect("context body");
                let ctx = self.pool.car(expr);
                self.flatten_sexp_recur(inner, ctx, expand)
            }
            NodeTag::Not
            | NodeTag::Next
            | NodeTag::Ex
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
            | NodeTag::OpHistorical => {
                if tag == NodeTag::Next {
                    let body = self.pool.car(expr).expect("unary body");
                    if self.pool.tag(body) == NodeTag::Next {
                        return Err(CompileError::TypeError {
                            detail: "nested next operators".to_owned(),
                            line: self.pool.line(expr),
                        });
                    }
                }
                let body = self.pool.car(expr).expect("unary body");
                let body = self.flatten_sexp_recur(body, context, expand)?;
                Ok(self.pool.unary(tag, body))
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
            | NodeTag::Lt
            | NodeTag::Gt
            | NodeTag::Le
            | NodeTag::Ge
            | NodeTag::Union
            | NodeTag::Setin
            | NodeTag::Equal
            | NodeTag::NotEqual
            | NodeTag::Eu
            | NodeTag::Au
            | NodeTag::Until
            | NodeTag::Releases
            | NodeTag::Since
            | NodeTag::Triggered
            | NodeTag::Minu
            | NodeTag::Maxu => {
                let left = self.pool.car(expr).expect("binary lhs");
                let right = self.pool.cdr(expr).expect("binary rhs");
                let left = self.flatten_sexp_recur(left, context, expand)?;
                let right = self.flatten_sexp_recur(right, context, expand)?;
                Ok(self.pool.binary(tag, left, right))
            }
            NodeTag::Case | NodeTag::IfThenElse => {
                let branch = self.pool.car(expr).expect("case branch");
                let cond = self.pool.car(branch).expect("case condition");
                let then = self.pool.cdr(branch).expect("case value");
                let else_ = self.pool.cdr(expr).expect("case else");
                let cond = self.flatten_sexp_recur(cond, context, expand)?;
                let then = self.flatten_sexp_recur(then, context, expand)?;
                let else_ = self.flatten_sexp_recur(else_, context, expand)?;
                Ok(self.pool.case(cond, then, else_))
            }
            NodeTag::Ebf | NodeTag::Abf | NodeTag::Ebg | NodeTag::Abg | NodeTag::Ebu
            | NodeTag::Abu => {
                let body = self.pool.car(expr).expect("bounded body");
                let range = self.pool.cdr(expr).expect("bounded range");
                self.check_subrange(range)?;
                let body = self.flatten_sexp_recur(body, context, expand)?;
                Ok(self.pool.intern(tag, Some(body), Some(range), Payload::None))
            }
            NodeTag::Eqdef => {
                let left = self.pool.car(expr).expect("eqdef lhs");
                let right = self.pool.cdr(expr).expect("eqdef rhs");
                let res_left = match self.pool.tag(left) {
                    lhs_tag @ (NodeTag::Smallinit | NodeTag::Next) => {
                        let target = self.pool.car(left).expect("assign target");
                        let name = self.flatten_sexp_recur(target, context, expand)?;
                        if !self.symbols.is_declared(name) {
                            return Err(CompileError::UndefinedSymbol {
                                name: self.printed(name),
                                line: self.pool.line(left),
                            });
                        }
                        self.pool.unary(lhs_tag, name)
                    }
                    _ => self.flatten_sexp_recur(left, context, expand)?,
                };
                let res_right = self.flatten_sexp_recur(right, context, expand)?;
                Ok(self.pool.binary(NodeTag::Eqdef, res_left, res_right))
            }
            other => Err(CompileError::TypeError {
                detail: format!("cannot flatten {other:?} node"),
                line: self.pool.line(expr),
            }),
        }
    }

    fn check_subrange(&self, range: NodeId) -> CompileResult<()> {
        if self.pool.tag(range) == NodeTag::Twodots {
            let low = self.pool.num(self.pool.car(range).expect("subrange low"));
            let high = self.pool.num(self.pool.cdr(range).expect("subrange high"));
            if 0 <= low && low <= high {
                return Ok(());
            }
            return Err(CompileError::InvalidSubrange { low, high });
        }
        Err(CompileError::InvalidSubrange { low: 0, high: -1 })
    }

    /// Resolves a qualified name to itself (variables, constants) or to its
    /// define expansion, memoising flattened define bodies. The in-progress
    /// sentinel reports circular defines.
    pub(crate) fn get_definition(&mut self, name: NodeId, expand: bool) -> CompileResult<NodeId> {
        if self.symbols.is_var(name) || self.symbols.is_constant(name) {
            return Ok(name);
        }
        let Some((context, body)) = self.symbols.define_body(name) else {
            return Err(CompileError::UndefinedSymbol {
                name: self.printed(name),
                line: self.pool.line(name),
            });
        };
        let flattened = match self.flatten_defs.get(&name) {
            Some(DefEntry::InProgress) => {
                return Err(CompileError::CircularDefine { name: self.printed(name) });
            }
            Some(DefEntry::Done(flat)) => *flat,
            None => {
                self.flatten_defs.insert(name, DefEntry::InProgress);
                // the body of a define is always expanded recursively
                let flat = self.flatten_sexp_recur(body, context, true)?;
                self.flatten_defs.insert(name, DefEntry::Done(flat));
                flat
            }
        };
        Ok(if expand { flattened } else { name })
    }

    /// The memoised flattened body of a define, if it was computed already.
    pub(crate) fn flattened_define_body(&self, name: NodeId) -> Option<NodeId> {
        match self.flatten_defs.get(&name) {
            Some(DefEntry::Done(flat)) => Some(*flat),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Processes
    // ------------------------------------------------------------------

    /// Declares the process selector input variable and the per-process
    /// `running` defines when the model has more than one process.
    fn create_process_vars(
        &mut self,
        procs: &[(Option<NodeId>, Option<NodeId>)],
    ) -> CompileResult<()> {
        if procs.len() <= 1 {
            return Ok(());
        }
        let main_atom = self.pool.atom("main");
        let proc_names: Vec<NodeId> =
            procs.iter().map(|(name, _)| name.unwrap_or(main_atom)).collect();

        let selector_atom = self.pool.atom(PROCESS_SELECTOR_NAME);
        let selector = self.pool.dot(None, selector_atom);
        if !self.symbols.is_declared(selector) {
            for &p in &proc_names {
                self.flatten_constants.insert(p);
            }
            self.symbols.declare_input_var(&self.pool, selector, Range::Scalar(proc_names.clone()))?;
        } else {
            let declared = match self.symbols.var_range(selector) {
                Some(Range::Scalar(values)) => values.clone(),
                _ => Vec::new(),
            };
            for &p in &proc_names {
                if !declared.contains(&p) {
                    return Err(CompileError::RangeOutOfDomain {
                        value: self.printed(p),
                        name: self.printed(selector),
                    });
                }
            }
        }
        self.process_selector = Some(selector);

        let running_atom = self.pool.atom(RUNNING_NAME);
        for (proc_name, _) in procs {
            let running = self.pool.dot(*proc_name, running_atom);
            self.process_running.push(running);
            if self.symbols.is_declared(running) {
                let name = self.printed(running);
                self.diagnostics.warn(Warning::AlreadyDefined { name });
                continue;
            }
            let proc_value = proc_name.unwrap_or(main_atom);
            let body = self.pool.binary(NodeTag::Equal, selector, proc_value);
            self.symbols.declare_define(&self.pool, running, None, body)?;
        }
        Ok(())
    }

    /// Records the flattened assignments of one process into the assignment
    /// database, guarding `next` assignments with the process's `running`
    /// condition so non-running processes keep their state.
    fn record_process_assigns(
        &mut self,
        assign: NodeId,
        context: Option<NodeId>,
        running: Option<NodeId>,
    ) -> CompileResult<()> {
        match self.pool.tag(assign) {
            NodeTag::Cons | NodeTag::And => {
                let left = self.pool.car(assign).expect("assign lhs");
                let right = self.pool.cdr(assign).expect("assign rhs");
                self.record_process_assigns(left, context, running)?;
                self.record_process_assigns(right, context, running)
            }
            NodeTag::Context => {
                let inner = self.pool.cdr(assign).expect("context body");
                let ctx = self.pool.car(assign);
                self.record_process_assigns(inner, ctx, running)
            }
            NodeTag::Eqdef => {
                let left = self.pool.car(assign).expect("eqdef lhs");
                let right = self.pool.cdr(assign).expect("eqdef rhs");
                match self.pool.tag(left) {
                    NodeTag::Smallinit => {
                        let var = self.pool.car(left).expect("init target");
                        let var = self.require_name(var, context)?;
                        self.record_plain_assign(var, AssignKind::Init, right)
                    }
                    NodeTag::Next => {
                        let var = self.pool.car(left).expect("next target");
                        let var = self.require_name(var, context)?;
                        self.record_next_assign(var, right, running)
                    }
                    _ => {
                        let var = self.require_name(left, context)?;
                        self.record_plain_assign(var, AssignKind::Invar, right)
                    }
                }
            }
            other => Err(CompileError::TypeError {
                detail: format!("unexpected {other:?} node in assignments"),
                line: self.pool.line(assign),
            }),
        }
    }

    fn record_plain_assign(
        &mut self,
        var: NodeId,
        kind: AssignKind,
        rhs: NodeId,
    ) -> CompileResult<()> {
        let entry = self.assigns.entry_mut(var, kind);
        if entry.assign.is_some() {
            return Err(CompileError::Redefined {
                name: self.printed(var),
                line: self.pool.line(var),
            });
        }
        entry.assign = Some(rhs);
        Ok(())
    }

    fn record_next_assign(
        &mut self,
        var: NodeId,
        rhs: NodeId,
        running: Option<NodeId>,
    ) -> CompileResult<()> {
        let Some(running) = running else {
            // single-process model: the assignment applies unconditionally
            return self.record_plain_assign(var, AssignKind::Next, rhs);
        };
        let prior = self.assigns.entry(var, AssignKind::Next).and_then(|e| e.assign);
        let truth = self.pool.truth();
        let base = match prior {
            Some(existing) => existing,
            // inertia: when no process runs, the variable keeps its value
            None => self.pool.case(truth, var, truth),
        };
        let composed = self.pool.case(running, rhs, base);
        self.assigns.entry_mut(var, AssignKind::Next).assign = Some(composed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{ModuleBuilder, types},
        compiler::Compiler,
    };

    fn flatten_main(c: &mut Compiler) -> CompileResult<FlatHierarchy> {
        let root = c.pool.atom("main");
        c.flatten_hierarchy(root, None, None)
    }

    /// `MODULE main VAR x : 2..2;`
    #[test]
    fn single_value_range_becomes_constant_define() {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let x = c.pool.atom("x");
        let range = types::range(&mut c.pool, 2, 2);
        m.var(&mut c.pool, x, range);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        flatten_main(&mut c).unwrap();

        let x = c.pool.dot(None, x);
        assert!(!c.symbols.is_var(x), "x must not be a variable");
        assert!(c.symbols.is_define(x));
        let two = c.pool.number(2);
        assert!(c.symbols.is_constant(two));
        assert_eq!(c.symbols.define_body(x).map(|(_, b)| b), Some(two));
        assert!(
            c.diagnostics
                .warnings()
                .iter()
                .any(|w| matches!(w, Warning::EncodedAsConstant { name } if name == "x")),
        );
    }

    #[test]
    fn empty_range_is_fatal() {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let x = c.pool.atom("x");
        let range = types::range(&mut c.pool, 3, 1);
        m.var(&mut c.pool, x, range);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let err = flatten_main(&mut c).unwrap_err();
        assert_eq!(err.kind(), "EmptyRange");
    }

    #[test]
    fn circular_define_detected() {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let a = c.pool.atom("a");
        let b = c.pool.atom("b");
        m.define(&mut c.pool, a, b);
        m.define(&mut c.pool, b, a);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        flatten_main(&mut c).unwrap();

        let a = c.pool.dot(None, a);
        let err = c.get_definition(a, true).unwrap_err();
        assert_eq!(err.kind(), "CircularDefine");
    }

    #[test]
    fn recursive_module_detected() {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "m");
        let x = c.pool.atom("x");
        let modtype = types::module(&mut c.pool, "m", &[]);
        m.var(&mut c.pool, x, modtype);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let root = c.pool.atom("m");
        let err = c.flatten_hierarchy(root, None, None).unwrap_err();
        assert_eq!(err.kind(), "RecursiveModule");
    }

    #[test]
    fn submodule_names_are_qualified() {
        let mut c = Compiler::new();
        let mut counter = ModuleBuilder::new(&mut c.pool, "counter");
        let v = c.pool.atom("v");
        let boolean = types::boolean(&mut c.pool);
        counter.var(&mut c.pool, v, boolean);
        let counter = counter.build(&mut c.pool);

        let mut main = ModuleBuilder::new(&mut c.pool, "main");
        let inst = c.pool.atom("c0");
        let modtype = types::module(&mut c.pool, "counter", &[]);
        main.var(&mut c.pool, inst, modtype);
        let main = main.build(&mut c.pool);

        c.add_module(counter).unwrap();
        c.add_module(main).unwrap();
        flatten_main(&mut c).unwrap();

        let inst = c.pool.dot(None, inst);
        let qualified = c.pool.dot(Some(inst), v);
        assert!(c.symbols.is_state_var(qualified));
        assert_eq!(c.printed(qualified), "c0.v");
    }

    #[test]
    fn parameters_resolve_to_actuals() {
        let mut c = Compiler::new();
        // MODULE cell(input) DEFINE out := !input;
        let mut cell = ModuleBuilder::new(&mut c.pool, "cell");
        cell.formal(&mut c.pool, "input");
        let out = c.pool.atom("out");
        let input = c.pool.atom("input");
        let negated = c.pool.not(input);
        cell.define(&mut c.pool, out, negated);
        let cell = cell.build(&mut c.pool);

        // MODULE main VAR b : boolean; VAR c0 : cell(b);
        let mut main = ModuleBuilder::new(&mut c.pool, "main");
        let b = c.pool.atom("b");
        let boolean = types::boolean(&mut c.pool);
        main.var(&mut c.pool, b, boolean);
        let inst = c.pool.atom("c0");
        let modtype = types::module(&mut c.pool, "cell", &[b]);
        main.var(&mut c.pool, inst, modtype);
        let main = main.build(&mut c.pool);

        c.add_module(cell).unwrap();
        c.add_module(main).unwrap();
        flatten_main(&mut c).unwrap();

        let inst = c.pool.dot(None, inst);
        let out = c.pool.dot(Some(inst), out);
        let expanded = c.get_definition(out, true).unwrap();
        assert_eq!(c.printed(expanded), "!b");
    }

    #[test]
    fn flatten_sexp_is_idempotent() {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let x = c.pool.atom("x");
        let y = c.pool.atom("y");
        let boolean = types::boolean(&mut c.pool);
        m.var(&mut c.pool, x, boolean);
        m.var(&mut c.pool, y, boolean);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        flatten_main(&mut c).unwrap();

        let expr = c.pool.and(x, y);
        let once = c.flatten_sexp(expr, None).unwrap();
        let twice = c.flatten_sexp(once, None).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn bounded_operator_subranges() {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let x = c.pool.atom("x");
        let boolean = types::boolean(&mut c.pool);
        m.var(&mut c.pool, x, boolean);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        flatten_main(&mut c).unwrap();

        // EBF 0..0 x is accepted
        let ok_range = types::range(&mut c.pool, 0, 0);
        let bounded = c.pool.intern(NodeTag::Ebf, Some(x), Some(ok_range), Payload::None);
        assert!(c.flatten_sexp(bounded, None).is_ok());

        // EBF -1..1 x is rejected
        let bad_range = types::range(&mut c.pool, -1, 1);
        let bounded = c.pool.intern(NodeTag::Ebf, Some(x), Some(bad_range), Payload::None);
        let err = c.flatten_sexp(bounded, None).unwrap_err();
        assert_eq!(err.kind(), "InvalidSubrange");
    }

    /// Two processes assigning `next(x)` compose through `running` guards
    /// with inertia for the case where neither runs.
    #[test]
    fn process_inertia_composition() {
        let mut c = Compiler::new();
        let mut p = ModuleBuilder::new(&mut c.pool, "p");
        p.formal(&mut c.pool, "x");
        let x = c.pool.atom("x");
        let next_x = c.pool.next_of(x);
        let one = c.pool.number(1);
        let sum = c.pool.binary(NodeTag::Plus, x, one);
        p.assign(&mut c.pool, next_x, sum);
        let p = p.build(&mut c.pool);

        let mut main = ModuleBuilder::new(&mut c.pool, "main");
        let range = types::range(&mut c.pool, 0, 3);
        main.var(&mut c.pool, x, range);
        for inst in ["p1", "p2"] {
            let inst = c.pool.atom(inst);
            let process = types::process(&mut c.pool, "p", &[x]);
            main.var(&mut c.pool, inst, process);
        }
        let main = main.build(&mut c.pool);

        c.add_module(p).unwrap();
        c.add_module(main).unwrap();
        let flat = flatten_main(&mut c).unwrap();
        assert_eq!(flat.procs.len(), 3, "p1, p2, and the root instance");

        let selector = c.pool.atom(PROCESS_SELECTOR_NAME);
        let selector = c.pool.dot(None, selector);
        assert!(c.symbols.is_model_input_var(selector));

        let x = c.pool.dot(None, x);
        let composed = c.assigns.assign(x, AssignKind::Next).expect("composed next");
        let text = c.printed(composed);
        assert_eq!(text, "case p2.running : x + 1; p1.running : x + 1; TRUE : x; esac");
    }
}
