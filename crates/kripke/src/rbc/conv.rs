//! Conversion of booleanised expressions into reduced boolean circuits.
//!
//! A [`RbcVarMap`] fixes the external variable indexing: every boolean
//! variable of the model receives a positive current-state index in list
//! order (state bits first, then input bits and determinisation witnesses),
//! and its next-state counterpart sits one block above, shifted by the
//! variable count. The conversion itself is a cached structural walk: `=`
//! and `:=` over booleans become `IFF`, `case` becomes `ITE`, everything
//! else maps to its RBC constructor.

use ahash::AHashMap;

use crate::{
    compiler::Compiler,
    error::{CompileError, CompileResult},
    intern::{NodeId, NodeTag},
    symbols::SymbolTable,
};

use super::{RbcManager, Ref};

/// Bijection between boolean model variables and RBC variable indices.
#[derive(Debug, Default)]
pub struct RbcVarMap {
    names: Vec<NodeId>,
    index_of: AHashMap<NodeId, u32>,
}

impl RbcVarMap {
    /// Indexes the boolean variables of the table: state bits first, then
    /// input bits, starting at index 1.
    pub fn from_symbols(symbols: &SymbolTable) -> Self {
        let mut map = Self::default();
        for &var in symbols.state_bool_vars().iter().chain(symbols.input_bool_vars()) {
            map.add(var);
        }
        map
    }

    fn add(&mut self, name: NodeId) {
        if self.index_of.contains_key(&name) {
            return;
        }
        self.names.push(name);
        let index = u32::try_from(self.names.len()).expect("RBC variable overflow");
        self.index_of.insert(name, index);
    }

    /// Number of boolean variables; the next-state block starts above it.
    pub fn shift(&self) -> u32 {
        u32::try_from(self.names.len()).expect("RBC variable overflow")
    }

    /// Current-state index of a variable.
    pub fn curr_index(&self, name: NodeId) -> Option<u32> {
        self.index_of.get(&name).copied()
    }

    /// Next-state index of a variable.
    pub fn next_index(&self, name: NodeId) -> Option<u32> {
        Some(self.curr_index(name)? + self.shift())
    }

    /// The variable behind an index, with its next-state flag.
    pub fn name_of(&self, index: u32) -> Option<(NodeId, bool)> {
        let shift = self.shift();
        let (slot, next) = if index > shift { (index - shift, true) } else { (index, false) };
        let name = self.names.get(slot.checked_sub(1)? as usize)?;
        Some((*name, next))
    }
}

impl Compiler {
    /// Converts a booleanised expression into a circuit under the given
    /// variable indexing.
    pub fn bexpr_to_rbc(
        &mut self,
        rbc: &mut RbcManager,
        map: &RbcVarMap,
        expr: NodeId,
    ) -> CompileResult<Ref> {
        let mut cache = AHashMap::new();
        self.bexpr_to_rbc_recur(rbc, map, expr, &mut cache)
    }

    fn rbc_var(
        &self,
        rbc: &mut RbcManager,
        map: &RbcVarMap,
        name: NodeId,
        next: bool,
    ) -> CompileResult<Ref> {
        let index = if next { map.next_index(name) } else { map.curr_index(name) };
        match index {
            Some(index) => Ok(rbc.var(index)),
            None => Err(CompileError::UndefinedSymbol {
                name: self.printed(name),
                line: self.pool.line(name),
            }),
        }
    }

    fn bexpr_to_rbc_recur(
        &mut self,
        rbc: &mut RbcManager,
        map: &RbcVarMap,
        expr: NodeId,
        cache: &mut AHashMap<NodeId, Ref>,
    ) -> CompileResult<Ref> {
        if let Some(&cached) = cache.get(&expr) {
            return Ok(cached);
        }
        let tag = self.pool.tag(expr);
        let result = match tag {
            NodeTag::True => rbc.one(),
            NodeTag::False => rbc.zero(),
            NodeTag::Next => {
                let name = self.pool.car(expr).expect("next body");
                self.rbc_var(rbc, map, name, true)?
            }
            NodeTag::Bit | NodeTag::Dot | NodeTag::Array => {
                self.rbc_var(rbc, map, expr, false)?
            }
            NodeTag::Not => {
                let body = self.pool.car(expr).expect("not body");
                let body = self.bexpr_to_rbc_recur(rbc, map, body, cache)?;
                rbc.not(body)
            }
            NodeTag::Cons | NodeTag::And => {
                let (l, r) = self.rbc_operands(rbc, map, expr, cache)?;
                rbc.and(l, r, false)
            }
            NodeTag::Or => {
                let (l, r) = self.rbc_operands(rbc, map, expr, cache)?;
                rbc.or(l, r, false)
            }
            NodeTag::Xor => {
                let (l, r) = self.rbc_operands(rbc, map, expr, cache)?;
                rbc.xor(l, r, false)
            }
            NodeTag::Xnor | NodeTag::Iff | NodeTag::Equal | NodeTag::Eqdef => {
                let (l, r) = self.rbc_operands(rbc, map, expr, cache)?;
                rbc.iff(l, r, false)
            }
            NodeTag::Implies => {
                let (l, r) = self.rbc_operands(rbc, map, expr, cache)?;
                rbc.or(l.negate(), r, false)
            }
            NodeTag::Case | NodeTag::IfThenElse => {
                let branch = self.pool.car(expr).expect("case branch");
                let cond = self.pool.car(branch).expect("case condition");
                let then = self.pool.cdr(branch).expect("case value");
                let els = self.pool.cdr(expr).expect("case else");
                let cond = self.bexpr_to_rbc_recur(rbc, map, cond, cache)?;
                let then = self.bexpr_to_rbc_recur(rbc, map, then, cache)?;
                let els = self.bexpr_to_rbc_recur(rbc, map, els, cache)?;
                rbc.ite(cond, then, els, false)
            }
            other => {
                return Err(CompileError::TypeError {
                    detail: format!("cannot convert {other:?} node to a circuit"),
                    line: self.pool.line(expr),
                });
            }
        };
        cache.insert(expr, result);
        Ok(result)
    }

    fn rbc_operands(
        &mut self,
        rbc: &mut RbcManager,
        map: &RbcVarMap,
        expr: NodeId,
        cache: &mut AHashMap<NodeId, Ref>,
    ) -> CompileResult<(Ref, Ref)> {
        let left = self.pool.car(expr).expect("binary lhs");
        let right = self.pool.cdr(expr).expect("binary rhs");
        let left = self.bexpr_to_rbc_recur(rbc, map, left, cache)?;
        let right = self.bexpr_to_rbc_recur(rbc, map, right, cache)?;
        Ok((left, right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ModuleBuilder, types};

    fn model() -> (Compiler, RbcVarMap, RbcManager, NodeId, NodeId) {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let a = c.pool.atom("a");
        let b = c.pool.atom("b");
        let boolean = types::boolean(&mut c.pool);
        m.var(&mut c.pool, a, boolean);
        m.var(&mut c.pool, b, boolean);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let root = c.pool.atom("main");
        c.flatten_hierarchy(root, None, None).unwrap();
        c.encode_vars().unwrap();
        let map = RbcVarMap::from_symbols(&c.symbols);
        let a = c.pool.dot(None, a);
        let b = c.pool.dot(None, b);
        (c, map, RbcManager::new(), a, b)
    }

    #[test]
    fn variables_index_in_list_order() {
        let (_c, map, _rbc, a, b) = model();
        assert_eq!(map.curr_index(a), Some(1));
        assert_eq!(map.curr_index(b), Some(2));
        assert_eq!(map.next_index(a), Some(3));
        assert_eq!(map.name_of(3), Some((a, true)));
        assert_eq!(map.name_of(2), Some((b, false)));
    }

    #[test]
    fn connectives_map_to_constructors() {
        let (mut c, map, mut rbc, a, b) = model();
        let and = c.pool.and(a, b);
        let expected = {
            let v1 = rbc.var(1);
            let v2 = rbc.var(2);
            rbc.and(v1, v2, false)
        };
        assert_eq!(c.bexpr_to_rbc(&mut rbc, &map, and).unwrap(), expected);

        // a = a collapses to the constant through simplification
        let eq = c.pool.binary(NodeTag::Equal, a, a);
        assert_eq!(c.bexpr_to_rbc(&mut rbc, &map, eq).unwrap(), rbc.one());
    }

    #[test]
    fn next_maps_into_the_shifted_block() {
        let (mut c, map, mut rbc, a, b) = model();
        let next_a = c.pool.next_of(a);
        let trans = c.pool.binary(NodeTag::Iff, next_a, b);
        let converted = c.bexpr_to_rbc(&mut rbc, &map, trans).unwrap();
        let expected = {
            let v3 = rbc.var(3);
            let v2 = rbc.var(2);
            rbc.iff(v3, v2, false)
        };
        assert_eq!(converted, expected);
    }

    #[test]
    fn unconverted_scalar_is_rejected() {
        let (mut c, map, mut rbc, a, _b) = model();
        let one = c.pool.number(1);
        let plus = c.pool.binary(NodeTag::Plus, a, one);
        let err = c.bexpr_to_rbc(&mut rbc, &map, plus).unwrap_err();
        assert_eq!(err.kind(), "TypeError");
    }
}
