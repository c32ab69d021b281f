#![doc = include_str!("../../../README.md")]
#![expect(clippy::must_use_candidate, reason = "accessor-heavy API, annotating all is noise")]
#![expect(clippy::missing_panics_doc, reason = "panics only on broken internal invariants")]

mod add;
mod booleanize;
pub mod builder;
mod compiler;
mod deps;
mod encode;
mod error;
mod flatten;
mod fsm;
mod intern;
mod order;
pub mod rbc;
pub mod sat;
mod symbols;
mod write;

pub use crate::{
    add::{AddId, AddManager},
    builder::{ModuleBuilder, types},
    compiler::Compiler,
    deps::{ModelSymbolLists, VarSet},
    error::{CompileError, CompileResult, Diagnostics, Warning},
    flatten::{AssignDb, AssignEntry, AssignKind, FlatHierarchy, PROCESS_SELECTOR_NAME, RUNNING_NAME},
    fsm::{GlobalConstraints, SexpFsm, VarFsm},
    intern::{NodeDisplay, NodeId, NodePool, NodeTag, Payload, StrId},
    order::parse_order_file,
    rbc::{RbcId, RbcManager, Ref, Sym, cnf::Cnf, conv::RbcVarMap},
    sat::{GroupId, GroupedSolver, PERMANENT_GROUP, SatEngine, SolveResult},
    symbols::{Binding, GroupSet, Range, SymbolTable},
};
