//! Scalar-to-boolean expression conversion.
//!
//! Takes a flattened expression intended to evaluate to boolean and rewrites
//! it over the boolean bits of the encoding. Boolean connectives recur
//! structurally; atomic scalar propositions are evaluated into an ADD and the
//! ADD is printed back as an if-then-else expression over bits. A `{0, 1}`
//! leaf means the proposition is nondeterministic: a fresh boolean input
//! variable (`__det_N`) is introduced to witness the choice, unless the
//! caller forbade determinisation.
//!
//! Results are memoised per `(expression, in_next, allow_nondet)`. Dynamic
//! reordering is disabled across the ADD walk and restored on every exit
//! path, including errors.

use ahash::AHashMap;

use crate::{
    add::AddId,
    compiler::Compiler,
    error::{CompileError, CompileResult},
    intern::{NodeId, NodeTag, Payload},
};

/// Prefix of generated determinisation variables.
const DET_VAR_PREFIX: &str = "__det_";

impl Compiler {
    /// Booleanises an expression, introducing determinisation variables for
    /// nondeterministic leaves.
    pub fn expr_to_bexpr(&mut self, expr: NodeId) -> CompileResult<NodeId> {
        self.bexpr_recur(expr, false, true)
    }

    /// Booleanises an expression, failing with `NondetNotAllowed` if a
    /// determinisation variable would be required.
    pub fn det_expr_to_bexpr(&mut self, expr: NodeId) -> CompileResult<NodeId> {
        self.bexpr_recur(expr, false, false)
    }

    fn bexpr_recur(
        &mut self,
        expr: NodeId,
        in_next: bool,
        allow_nondet: bool,
    ) -> CompileResult<NodeId> {
        if let Some(&cached) = self.bexpr_cache.get(&(expr, in_next, allow_nondet)) {
            return Ok(cached);
        }
        let result = self.bexpr_recur_uncached(expr, in_next, allow_nondet)?;
        self.bexpr_cache.insert((expr, in_next, allow_nondet), result);
        Ok(result)
    }

    fn bexpr_recur_uncached(
        &mut self,
        expr: NodeId,
        in_next: bool,
        allow_nondet: bool,
    ) -> CompileResult<NodeId> {
        let tag = self.pool.tag(expr);
        match tag {
            NodeTag::True | NodeTag::False => Ok(expr),
            NodeTag::Number => match self.pool.num(expr) {
                1 => Ok(self.pool.truth()),
                0 => Ok(self.pool.falsity()),
                n => Err(CompileError::TypeError {
                    detail: format!("number {n} cannot be cast to boolean"),
                    line: self.pool.line(expr),
                }),
            },
            NodeTag::Bit => {
                if !self.symbols.is_var(expr) {
                    return Err(CompileError::UndefinedSymbol {
                        name: self.printed(expr),
                        line: self.pool.line(expr),
                    });
                }
                Ok(if in_next { self.pool.next_of(expr) } else { expr })
            }
            NodeTag::Atom | NodeTag::Dot | NodeTag::Array => {
                let name = self.resolve_name_in(expr, None)?;
                if self.symbols.is_define(name) {
                    let body = self.get_definition(name, true)?;
                    return self.bexpr_recur(body, in_next, allow_nondet);
                }
                if self.symbols.is_var(name) {
                    if !self.symbols.is_boolean_var(name) {
                        return Err(CompileError::TypeError {
                            detail: format!("unexpected non boolean variable {}", self.printed(name)),
                            line: self.pool.line(expr),
                        });
                    }
                    return Ok(if in_next { self.pool.next_of(name) } else { name });
                }
                Err(CompileError::UndefinedSymbol {
                    name: self.printed(name),
                    line: self.pool.line(expr),
                })
            }
            NodeTag::Not => {
                let body = self.pool.car(expr).expect("not body");
                let body = self.bexpr_recur(body, in_next, allow_nondet)?;
                Ok(self.pool.not(body))
            }
            NodeTag::Cons
            | NodeTag::And
            | NodeTag::Or
            | NodeTag::Xor
            | NodeTag::Xnor
            | NodeTag::Implies
            | NodeTag::Iff => {
                let left = self.pool.car(expr).expect("binary lhs");
                let right = self.pool.cdr(expr).expect("binary rhs");
                let left = self.bexpr_recur(left, in_next, allow_nondet)?;
                let right = self.bexpr_recur(right, in_next, allow_nondet)?;
                Ok(self.pool.binary(tag, left, right))
            }
            NodeTag::Case | NodeTag::IfThenElse => {
                let branch = self.pool.car(expr).expect("case branch");
                let cond = self.pool.car(branch).expect("case condition");
                let then = self.pool.cdr(branch).expect("case value");
                let els = self.pool.cdr(expr).expect("case else");
                let cond = self.bexpr_recur(cond, in_next, allow_nondet)?;
                let then = self.bexpr_recur(then, in_next, allow_nondet)?;
                let els = self.bexpr_recur(els, in_next, allow_nondet)?;
                Ok(self.pool.case(cond, then, els))
            }
            NodeTag::Next => {
                if in_next {
                    return Err(CompileError::TypeError {
                        detail: "nested next operators".to_owned(),
                        line: self.pool.line(expr),
                    });
                }
                let body = self.pool.car(expr).expect("next body");
                self.bexpr_recur(body, true, allow_nondet)
            }
            NodeTag::Eqdef => self.bexpr_eqdef(expr, in_next, allow_nondet),
            // predicates over scalar terms take the decision-diagram route
            NodeTag::Lt
            | NodeTag::Gt
            | NodeTag::Le
            | NodeTag::Ge
            | NodeTag::Equal
            | NodeTag::NotEqual
            | NodeTag::Plus
            | NodeTag::Minus
            | NodeTag::Times
            | NodeTag::Divide
            | NodeTag::Mod
            | NodeTag::Union
            | NodeTag::Setin => self.scalar_atom_to_bexpr(expr, in_next, allow_nondet),
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
            | NodeTag::OpHistorical => {
                let body = self.pool.car(expr).expect("temporal body");
                let body = self.bexpr_recur(body, in_next, allow_nondet)?;
                Ok(self.pool.unary(tag, body))
            }
            NodeTag::Eu
            | NodeTag::Au
            | NodeTag::Minu
            | NodeTag::Maxu
            | NodeTag::Until
            | NodeTag::Releases
            | NodeTag::Since
            | NodeTag::Triggered => {
                let left = self.pool.car(expr).expect("temporal lhs");
                let right = self.pool.cdr(expr).expect("temporal rhs");
                let left = self.bexpr_recur(left, in_next, allow_nondet)?;
                let right = self.bexpr_recur(right, in_next, allow_nondet)?;
                Ok(self.pool.binary(tag, left, right))
            }
            NodeTag::Ebf | NodeTag::Abf | NodeTag::Ebg | NodeTag::Abg | NodeTag::Ebu
            | NodeTag::Abu => {
                let body = self.pool.car(expr).expect("bounded body");
                let range = self.pool.cdr(expr).expect("bounded range");
                let body = self.bexpr_recur(body, in_next, allow_nondet)?;
                Ok(self.pool.intern(tag, Some(body), Some(range), Payload::None))
            }
            NodeTag::Context => {
                let inner = self.pool.cdr(expr).expect("context body");
                self.bexpr_recur(inner, in_next, allow_nondet)
            }
            other => Err(CompileError::TypeError {
                detail: format!("cannot booleanise {other:?} node"),
                line: self.pool.line(expr),
            }),
        }
    }

    /// `lhs := rhs` becomes an `<->` over booleans, or goes through the
    /// scalar route when the assigned variable is scalar.
    fn bexpr_eqdef(
        &mut self,
        expr: NodeId,
        in_next: bool,
        allow_nondet: bool,
    ) -> CompileResult<NodeId> {
        let lhs = self.pool.car(expr).expect("eqdef lhs");
        let rhs = self.pool.cdr(expr).expect("eqdef rhs");
        let lhs_tag = self.pool.tag(lhs);
        let var_name = match lhs_tag {
            NodeTag::Smallinit | NodeTag::Next => self.pool.car(lhs).expect("assign target"),
            _ => lhs,
        };
        let name = self.resolve_name_in(var_name, None)?;
        if !self.symbols.is_var(name) {
            return Err(CompileError::TypeError {
                detail: format!("variable expected, got {}", self.printed(name)),
                line: self.pool.line(lhs),
            });
        }
        if self.symbols.is_boolean_var(name) {
            let var = if lhs_tag == NodeTag::Next { self.pool.next_of(name) } else { name };
            let rhs = self.bexpr_recur(rhs, in_next, allow_nondet)?;
            return Ok(self.pool.binary(NodeTag::Iff, var, rhs));
        }
        if in_next {
            return Err(CompileError::TypeError {
                detail: "scalar assignment under next".to_owned(),
                line: self.pool.line(expr),
            });
        }
        self.scalar_atom_to_bexpr(expr, in_next, allow_nondet)
    }

    /// Evaluates an atomic scalar proposition through the decision-diagram
    /// layer and prints the result back as a boolean expression.
    fn scalar_atom_to_bexpr(
        &mut self,
        expr: NodeId,
        in_next: bool,
        allow_nondet: bool,
    ) -> CompileResult<NodeId> {
        let add = self.expr_to_add(expr, false)?;
        self.add_to_bexpr(add, in_next, allow_nondet)
    }

    fn add_to_bexpr(
        &mut self,
        add: AddId,
        in_next: bool,
        allow_nondet: bool,
    ) -> CompileResult<NodeId> {
        // reordering would move levels under our feet during the walk
        let previous = self.adds.set_reordering(false);
        let mut cache = AHashMap::new();
        let result = self.add_to_bexpr_recur(add, in_next, allow_nondet, &mut cache);
        self.adds.set_reordering(previous);
        result
    }

    fn add_to_bexpr_recur(
        &mut self,
        add: AddId,
        in_next: bool,
        allow_nondet: bool,
        cache: &mut AHashMap<AddId, NodeId>,
    ) -> CompileResult<NodeId> {
        if self.adds.is_leaf(add) {
            return self.leaf_to_bexpr(add, allow_nondet);
        }
        if let Some(&cached) = cache.get(&add) {
            return Ok(cached);
        }
        let level = self.adds.node_level(add);
        let (then, els) = self.adds.cofactors(add, level);
        let then = self.add_to_bexpr_recur(then, in_next, allow_nondet, cache)?;
        let els = self.add_to_bexpr_recur(els, in_next, allow_nondet, cache)?;

        let (var, level_is_next) = self.adds.var_of_level(level);
        let var = if in_next || level_is_next { self.pool.next_of(var) } else { var };
        let result = self.pool.case(var, then, els);
        cache.insert(add, result);
        Ok(result)
    }

    fn leaf_to_bexpr(&mut self, add: AddId, allow_nondet: bool) -> CompileResult<NodeId> {
        let values: Vec<NodeId> = self.adds.leaf_values(add).to_vec();
        let as_bool = |c: &Self, v: NodeId| {
            (c.pool.tag(v) == NodeTag::Number).then(|| c.pool.num(v)).filter(|n| *n == 0 || *n == 1)
        };
        match values[..] {
            [single] => match as_bool(self, single) {
                Some(1) => Ok(self.pool.truth()),
                Some(_) => Ok(self.pool.falsity()),
                None => Err(CompileError::TypeError {
                    detail: format!("attempt to convert the non boolean value {}", self.printed(single)),
                    line: self.pool.line(single),
                }),
            },
            [a, b] if as_bool(self, a).is_some() && as_bool(self, b).is_some() => {
                if !allow_nondet {
                    return Err(CompileError::NondetNotAllowed { expr: "{0, 1}".to_owned() });
                }
                self.fresh_determ_var()
            }
            _ => Err(CompileError::TypeError {
                detail: "attempt to convert a non boolean set".to_owned(),
                line: 0,
            }),
        }
    }

    /// Declares a fresh `__det_N` boolean input variable witnessing a
    /// nondeterministic choice.
    fn fresh_determ_var(&mut self) -> CompileResult<NodeId> {
        loop {
            let text = format!("{DET_VAR_PREFIX}{}", self.det_counter);
            self.det_counter += 1;
            let atom = self.pool.atom(&text);
            let name = self.pool.dot(None, atom);
            if self.symbols.is_declared(name) {
                continue;
            }
            self.symbols.declare_determ_var(&self.pool, name)?;
            let boolean = self.pool.boolean_type();
            self.symbols.set_encoding(name, boolean);
            self.symbols.input_groups.add_group(vec![name]);
            self.adds.register_var(name);
            return Ok(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ModuleBuilder, types};

    /// main with y : 0..3 and b : boolean, encoded.
    fn model() -> (Compiler, NodeId, NodeId) {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let y = c.pool.atom("y");
        let b = c.pool.atom("b");
        let range = types::range(&mut c.pool, 0, 3);
        m.var(&mut c.pool, y, range);
        let boolean = types::boolean(&mut c.pool);
        m.var(&mut c.pool, b, boolean);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let root = c.pool.atom("main");
        c.flatten_hierarchy(root, None, None).unwrap();
        c.encode_vars().unwrap();
        let y = c.pool.dot(None, y);
        let b = c.pool.dot(None, b);
        (c, y, b)
    }

    #[test]
    fn boolean_vars_pass_through() {
        let (mut c, _y, b) = model();
        let not_b = c.pool.not(b);
        assert_eq!(c.expr_to_bexpr(not_b).unwrap(), not_b);

        let next_b = c.pool.next_of(b);
        assert_eq!(c.expr_to_bexpr(next_b).unwrap(), next_b);
    }

    #[test]
    fn scalar_equality_becomes_bit_tests() {
        let (mut c, y, _b) = model();
        let zero = c.pool.number(0);
        let eq = c.pool.binary(NodeTag::Equal, y, zero);
        let bexpr = c.expr_to_bexpr(eq).unwrap();
        // the result tests both bits of y and nothing else
        let text = c.printed(bexpr);
        assert!(text.contains("y.0") && text.contains("y.1"), "got {text}");
        let deps = c.dependencies(bexpr, None).unwrap();
        let bit0 = c.pool.bit(y, 0);
        let bit1 = c.pool.bit(y, 1);
        assert_eq!(*deps, std::collections::BTreeSet::from([bit0, bit1]));
    }

    #[test]
    fn tautological_predicate_collapses() {
        let (mut c, y, _b) = model();
        let three = c.pool.number(3);
        let le = c.pool.binary(NodeTag::Le, y, three);
        let bexpr = c.expr_to_bexpr(le).unwrap();
        assert_eq!(bexpr, c.pool.truth());
    }

    #[test]
    fn nondeterministic_set_introduces_determ_var() {
        let (mut c, _y, b) = model();
        let zero = c.pool.number(0);
        let one = c.pool.number(1);
        let both = c.pool.binary(NodeTag::Union, zero, one);
        let assign = c.pool.binary(NodeTag::Eqdef, b, both);
        let bexpr = c.expr_to_bexpr(assign).unwrap();
        let det_atom = c.pool.atom("__det_0");
        let det = c.pool.dot(None, det_atom);
        assert!(c.symbols.is_determ_var(det));
        assert!(!c.symbols.is_model_input_var(det));
        let text = c.printed(bexpr);
        assert!(text.contains("__det_0"), "got {text}");
    }

    #[test]
    fn nondet_forbidden_is_fatal() {
        let (mut c, _y, b) = model();
        let zero = c.pool.number(0);
        let one = c.pool.number(1);
        let both = c.pool.binary(NodeTag::Union, zero, one);
        let assign = c.pool.binary(NodeTag::Eqdef, b, both);
        let err = c.det_expr_to_bexpr(assign).unwrap_err();
        assert_eq!(err.kind(), "NondetNotAllowed");
    }

    #[test]
    fn next_assignment_over_scalar() {
        let (mut c, y, _b) = model();
        let next_y = c.pool.next_of(y);
        let one = c.pool.number(1);
        let sum = c.pool.binary(NodeTag::Plus, y, one);
        // next(y) = y + 1 relates next bits to current bits
        let eq = c.pool.binary(NodeTag::Equal, next_y, sum);
        let bexpr = c.expr_to_bexpr(eq).unwrap();
        let text = c.printed(bexpr);
        assert!(text.contains("next(y.0)") || text.contains("next(y.1)"), "got {text}");
    }

    #[test]
    fn memoisation_covers_flag_combinations() {
        let (mut c, y, _b) = model();
        let zero = c.pool.number(0);
        let eq = c.pool.binary(NodeTag::Equal, y, zero);
        let with_nondet = c.expr_to_bexpr(eq).unwrap();
        let without = c.det_expr_to_bexpr(eq).unwrap();
        assert_eq!(with_nondet, without, "deterministic expression converts identically");
    }
}
