//! The compiler context.
//!
//! Everything the C original kept in module-level globals — the node pool,
//! the symbol table, the flattening and dependency memo caches, the
//! assignment database, the determinisation counter, and the decision-diagram
//! manager — lives in one [`Compiler`] value passed around by `&mut`. Each
//! phase contributes methods from its own module: flattening in `flatten`,
//! dependency analysis in `deps`, encoding in `encode`, booleanisation in
//! `booleanize`, and so on.
//!
//! The compiler is single-threaded; phases are strictly ordered and mutate
//! the context in place.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::{
    add::{AddId, AddManager},
    deps::{DepEntry, VarSet},
    error::Diagnostics,
    flatten::{AssignDb, DefEntry, ModuleDef},
    fsm::GlobalConstraints,
    intern::{NodeId, NodePool, StrId},
    symbols::SymbolTable,
};

/// The compilation context.
#[derive(Debug, Default)]
pub struct Compiler {
    pub pool: NodePool,
    pub symbols: SymbolTable,
    pub diagnostics: Diagnostics,
    /// Decision-diagram layer used to booleanise scalar expressions.
    pub adds: AddManager,

    // --- flattening state ---
    pub(crate) modules: AHashMap<StrId, ModuleDef>,
    /// Formal parameter name -> contextualised actual expression.
    pub(crate) params: AHashMap<NodeId, NodeId>,
    /// Atoms and numbers known to denote constants.
    pub(crate) flatten_constants: AHashSet<NodeId>,
    /// Memoised flattened define bodies, with in-progress sentinels.
    pub(crate) flatten_defs: AHashMap<NodeId, DefEntry>,
    /// Explicit assignments and attached constraint fragments per variable.
    pub(crate) assigns: AssignDb,
    /// The `running` define names, one per process, in process order.
    pub(crate) process_running: Vec<NodeId>,
    /// The `_process_selector_` input variable, when processes exist.
    pub(crate) process_selector: Option<NodeId>,
    /// Constant constraint fragments routed past the per-variable machines.
    pub(crate) global_constraints: GlobalConstraints,

    // --- dependency analysis ---
    pub(crate) dep_cache: AHashMap<(NodeId, Option<NodeId>), Rc<VarSet>>,
    pub(crate) define_deps: AHashMap<NodeId, DepEntry>,
    /// Per-variable cone of influence, built on first use.
    pub(crate) coi: Option<AHashMap<NodeId, VarSet>>,

    // --- booleanisation ---
    pub(crate) bexpr_cache: AHashMap<(NodeId, bool, bool), NodeId>,
    pub(crate) add_cache: AHashMap<(NodeId, bool), AddId>,
    pub(crate) det_counter: u32,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders a node for diagnostics.
    pub fn printed(&self, id: NodeId) -> String {
        self.pool.display(id).to_string()
    }

    /// The assignment database filled during flattening and constraint
    /// partitioning.
    pub fn assigns(&self) -> &AssignDb {
        &self.assigns
    }

    /// The `_process_selector_` variable, if the model has processes.
    pub fn process_selector(&self) -> Option<NodeId> {
        self.process_selector
    }

    /// The per-process `running` define names.
    pub fn process_running(&self) -> &[NodeId] {
        &self.process_running
    }

    /// Constant constraints collected during partitioning, surfaced to the
    /// back-end separately from the per-variable machines.
    pub fn global_constraints(&self) -> &GlobalConstraints {
        &self.global_constraints
    }
}
