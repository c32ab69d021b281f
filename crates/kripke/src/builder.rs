//! Programmatic construction of module ASTs.
//!
//! The compiler consumes parsed module hierarchies as interned node DAGs; the
//! parser itself is an external collaborator. This module is the convenience
//! surface for building those DAGs directly — used by tests, by the demo
//! binary, and by embedders that already have a front end of their own.

use crate::intern::{NodeId, NodePool, NodeTag, Payload};

/// Builds one `MODULE` declaration node.
///
/// ```
/// use kripke::{Compiler, ModuleBuilder, types};
///
/// let mut c = Compiler::new();
/// let mut m = ModuleBuilder::new(&mut c.pool, "main");
/// let x = c.pool.atom("x");
/// let boolean = types::boolean(&mut c.pool);
/// m.var(&mut c.pool, x, boolean);
/// let module = m.build(&mut c.pool);
/// c.add_module(module).unwrap();
/// ```
#[derive(Debug)]
pub struct ModuleBuilder {
    name: NodeId,
    formals: Vec<NodeId>,
    decls: Vec<NodeId>,
}

impl ModuleBuilder {
    pub fn new(pool: &mut NodePool, name: &str) -> Self {
        let name = pool.atom(name);
        Self { name, formals: Vec::new(), decls: Vec::new() }
    }

    /// Adds a formal parameter.
    pub fn formal(&mut self, pool: &mut NodePool, name: &str) -> &mut Self {
        let atom = pool.atom(name);
        self.formals.push(atom);
        self
    }

    fn push_decl_list(&mut self, pool: &mut NodePool, tag: NodeTag, items: &[NodeId]) {
        let list = pool.list(items.iter().copied());
        self.decls.push(pool.intern(tag, list, None, Payload::None));
    }

    fn push_decl(&mut self, pool: &mut NodePool, tag: NodeTag, body: NodeId) {
        self.decls.push(pool.intern(tag, Some(body), None, Payload::None));
    }

    /// `VAR name : type;`
    pub fn var(&mut self, pool: &mut NodePool, name: NodeId, var_type: NodeId) -> &mut Self {
        let pair = pool.binary(NodeTag::Colon, name, var_type);
        self.push_decl_list(pool, NodeTag::Var, &[pair]);
        self
    }

    /// `IVAR name : type;`
    pub fn ivar(&mut self, pool: &mut NodePool, name: NodeId, var_type: NodeId) -> &mut Self {
        let pair = pool.binary(NodeTag::Colon, name, var_type);
        self.push_decl_list(pool, NodeTag::Ivar, &[pair]);
        self
    }

    /// `DEFINE name := body;`
    pub fn define(&mut self, pool: &mut NodePool, name: NodeId, body: NodeId) -> &mut Self {
        let eqdef = pool.binary(NodeTag::Eqdef, name, body);
        self.push_decl_list(pool, NodeTag::Define, &[eqdef]);
        self
    }

    /// `ASSIGN lhs := rhs;` — chain multiple assignments by calling again.
    pub fn assign(&mut self, pool: &mut NodePool, lhs: NodeId, rhs: NodeId) -> &mut Self {
        let eqdef = pool.binary(NodeTag::Eqdef, lhs, rhs);
        self.push_decl(pool, NodeTag::Assign, eqdef);
        self
    }

    pub fn init(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::Init, expr);
        self
    }

    pub fn invar(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::Invar, expr);
        self
    }

    pub fn trans(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::Trans, expr);
        self
    }

    pub fn spec(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::Spec, expr);
        self
    }

    pub fn ltl_spec(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::LtlSpec, expr);
        self
    }

    pub fn psl_spec(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::PslSpec, expr);
        self
    }

    pub fn invar_spec(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::InvarSpec, expr);
        self
    }

    pub fn compute(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::Compute, expr);
        self
    }

    pub fn justice(&mut self, pool: &mut NodePool, expr: NodeId) -> &mut Self {
        self.push_decl(pool, NodeTag::Justice, expr);
        self
    }

    /// `COMPASSION (left, right);` — the pair is stored as `(left . right)`.
    pub fn compassion(&mut self, pool: &mut NodePool, left: NodeId, right: NodeId) -> &mut Self {
        let pair = pool.binary(NodeTag::Cons, left, right);
        self.push_decl(pool, NodeTag::Compassion, pair);
        self
    }

    /// `ISA module;` textual inclusion.
    pub fn isa(&mut self, pool: &mut NodePool, module: &str) -> &mut Self {
        let atom = pool.atom(module);
        self.push_decl(pool, NodeTag::Isa, atom);
        self
    }

    /// Finishes the module and interns its declaration node.
    pub fn build(self, pool: &mut NodePool) -> NodeId {
        let formals = pool.list(self.formals.iter().copied());
        let header = pool.intern(NodeTag::Modtype, Some(self.name), formals, Payload::None);
        let body = pool.list(self.decls.iter().copied());
        pool.intern(NodeTag::Module, Some(header), body, Payload::None)
    }
}

/// Constructors for the type expressions accepted by `VAR`/`IVAR`.
pub mod types {
    use super::{NodeId, NodePool, NodeTag, Payload};

    /// `boolean`
    pub fn boolean(pool: &mut NodePool) -> NodeId {
        pool.boolean_type()
    }

    /// `low..high`
    pub fn range(pool: &mut NodePool, low: i64, high: i64) -> NodeId {
        let low = pool.number(low);
        let high = pool.number(high);
        pool.binary(NodeTag::Twodots, low, high)
    }

    /// `{v₁, v₂, …}` enumerated set; atoms and numbers mix freely.
    pub fn enumeration(pool: &mut NodePool, values: &[NodeId]) -> NodeId {
        let list = pool.list(values.iter().copied());
        pool.intern(NodeTag::Scalar, list, None, Payload::None)
    }

    /// `module(actual₁, …)` submodule instantiation.
    pub fn module(pool: &mut NodePool, name: &str, actuals: &[NodeId]) -> NodeId {
        let atom = pool.atom(name);
        let actuals = pool.list(actuals.iter().copied());
        pool.intern(NodeTag::Modtype, Some(atom), actuals, Payload::None)
    }

    /// `process module(actual₁, …)`
    pub fn process(pool: &mut NodePool, name: &str, actuals: &[NodeId]) -> NodeId {
        let modtype = module(pool, name, actuals);
        pool.intern(NodeTag::Process, Some(modtype), None, Payload::None)
    }

    /// `array low..high of element`
    pub fn array(pool: &mut NodePool, low: i64, high: i64, element: NodeId) -> NodeId {
        let bounds = range(pool, low, high);
        pool.intern(NodeTag::Array, Some(bounds), Some(element), Payload::None)
    }
}
