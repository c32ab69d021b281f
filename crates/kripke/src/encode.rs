//! Scalar-to-boolean variable encoding.
//!
//! Every non-boolean scalar variable receives ⌈log₂ n⌉ fresh boolean bits
//! and a balanced decision tree mapping bit assignments onto its range
//! constants: the range is split by index parity at each level, so the tree
//! is as shallow as possible. Boolean variables get the trivial `boolean`
//! marker as their encoding.
//!
//! All bits of one scalar variable are registered in a single group, so that
//! dynamic reordering in the decision-diagram layer keeps them contiguous.

use crate::{
    compiler::Compiler,
    error::{CompileError, CompileResult},
    intern::{NodeId, NodeTag, Payload},
    symbols::Range,
};

impl Compiler {
    /// Encodes every declared variable that has no encoding yet, in
    /// declaration order.
    pub fn encode_vars(&mut self) -> CompileResult<()> {
        for var in self.symbols.all_vars().to_vec() {
            if self.symbols.encoding(var).is_none() {
                self.encode_var(var)?;
            }
        }
        Ok(())
    }

    /// Builds the boolean encoding of one variable and registers its group.
    pub fn encode_var(&mut self, name: NodeId) -> CompileResult<()> {
        let Some(range) = self.symbols.var_range(name).cloned() else {
            return Err(CompileError::UndefinedSymbol {
                name: self.printed(name),
                line: self.pool.line(name),
            });
        };
        if range.is_empty() {
            return Err(CompileError::EmptyRange {
                name: self.printed(name),
                low: 0,
                high: -1,
            });
        }
        let input = self.symbols.is_input_var(name);
        let mut group = Vec::new();

        let encoding = match range {
            Range::Boolean => {
                // a group of a single, boolean variable
                group.push(name);
                self.adds.register_var(name);
                self.pool.boolean_type()
            }
            Range::Scalar(values) => self.encode_scalar(name, 0, &values, input, &mut group)?,
        };
        self.symbols.set_encoding(name, encoding);
        if input {
            self.symbols.input_groups.add_group(group);
        } else {
            self.symbols.state_groups.add_group(group);
        }
        Ok(())
    }

    /// Recursive balanced split: bit `suffix` selects between the encodings
    /// of the even-index and odd-index halves of the range.
    fn encode_scalar(
        &mut self,
        name: NodeId,
        suffix: u32,
        range: &[NodeId],
        input: bool,
        group: &mut Vec<NodeId>,
    ) -> CompileResult<NodeId> {
        if let [value] = range {
            let value = *value;
            if !self.symbols.is_constant(value) {
                self.symbols.declare_constant(value);
            }
            return Ok(value);
        }

        let bit = self.pool.bit(name, suffix);
        if !self.symbols.is_var(bit) {
            if input {
                self.symbols.declare_input_var(&self.pool, bit, Range::Boolean)?;
            } else {
                self.symbols.declare_state_var(&self.pool, bit, Range::Boolean)?;
            }
            let boolean = self.pool.boolean_type();
            self.symbols.set_encoding(bit, boolean);
            self.adds.register_var(bit);
        }
        if !group.contains(&bit) {
            group.push(bit);
        }

        let even: Vec<NodeId> = range.iter().copied().step_by(2).collect();
        let odd: Vec<NodeId> = range.iter().copied().skip(1).step_by(2).collect();
        let left = self.encode_scalar(name, suffix + 1, &even, input, group)?;
        let right = self.encode_scalar(name, suffix + 1, &odd, input, group)?;
        let branch = self.pool.binary(NodeTag::Colon, bit, left);
        Ok(self.pool.intern(NodeTag::IfThenElse, Some(branch), Some(right), Payload::None))
    }

    /// The boolean bits used by a variable's encoding, in tree preorder.
    pub fn encoding_bits(&self, name: NodeId) -> Vec<NodeId> {
        let mut bits = Vec::new();
        if let Some(encoding) = self.symbols.encoding(name) {
            if self.pool.tag(encoding) == NodeTag::Boolean {
                bits.push(name);
            } else {
                self.collect_encoding_bits(encoding, &mut bits);
            }
        }
        bits
    }

    fn collect_encoding_bits(&self, encoding: NodeId, bits: &mut Vec<NodeId>) {
        if self.pool.tag(encoding) != NodeTag::IfThenElse {
            return;
        }
        let branch = self.pool.car(encoding).expect("encoding branch");
        let bit = self.pool.car(branch).expect("encoding bit");
        if !bits.contains(&bit) {
            bits.push(bit);
        }
        self.collect_encoding_bits(self.pool.cdr(branch).expect("encoding then"), bits);
        self.collect_encoding_bits(self.pool.cdr(encoding).expect("encoding else"), bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ModuleBuilder, types};

    fn compile_scalar(n_values: i64) -> (Compiler, NodeId) {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let y = c.pool.atom("y");
        let range = types::range(&mut c.pool, 0, n_values - 1);
        m.var(&mut c.pool, y, range);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let root = c.pool.atom("main");
        c.flatten_hierarchy(root, None, None).unwrap();
        c.encode_vars().unwrap();
        let y = c.pool.dot(None, y);
        (c, y)
    }

    /// Walks the encoding tree under a bit assignment down to its leaf.
    fn decode(c: &Compiler, encoding: NodeId, assignment: &dyn Fn(NodeId) -> bool) -> NodeId {
        let mut cursor = encoding;
        while c.pool.tag(cursor) == NodeTag::IfThenElse {
            let branch = c.pool.car(cursor).unwrap();
            let bit = c.pool.car(branch).unwrap();
            cursor = if assignment(bit) {
                c.pool.cdr(branch).unwrap()
            } else {
                c.pool.cdr(cursor).unwrap()
            };
        }
        cursor
    }

    /// `VAR y : 0..3;` yields two bits in one group and a perfect map.
    #[test]
    fn four_values_two_bits() {
        let (mut c, y) = compile_scalar(4);
        let bits = c.encoding_bits(y);
        assert_eq!(bits.len(), 2);
        let bit0 = c.pool.bit(y, 0);
        let bit1 = c.pool.bit(y, 1);
        assert_eq!(bits, [bit0, bit1]);
        assert!(c.symbols.is_state_var(bit0) && c.symbols.is_boolean_var(bit0));

        // one group containing exactly both bits
        let groups: Vec<_> = c.symbols.state_groups().iter().collect();
        assert_eq!(groups, [&[bit0, bit1][..]]);

        // the encoding maps the four bit patterns onto the four values 1:1
        let encoding = c.symbols.encoding(y).unwrap();
        let mut seen = Vec::new();
        for pattern in 0..4u32 {
            let leaf = decode(&c, encoding, &|bit| {
                let k = c.pool.bit_index(bit);
                pattern & (1 << k) != 0
            });
            assert_eq!(c.pool.tag(leaf), NodeTag::Number);
            assert!(!seen.contains(&leaf), "two patterns map to one value");
            seen.push(leaf);
        }
        assert_eq!(seen.len(), 4);
    }

    /// A non-power-of-two range still covers every value at least once.
    #[test]
    fn three_values_cover_range() {
        let (c, y) = compile_scalar(3);
        assert_eq!(c.encoding_bits(y).len(), 2);
        let encoding = c.symbols.encoding(y).unwrap();
        let mut seen = std::collections::BTreeSet::new();
        for pattern in 0..4u32 {
            let leaf = decode(&c, encoding, &|bit| {
                let k = c.pool.bit_index(bit);
                pattern & (1 << k) != 0
            });
            seen.insert(c.pool.num(leaf));
        }
        assert_eq!(seen, std::collections::BTreeSet::from([0, 1, 2]));
    }

    /// Range constants become declared constants during encoding.
    #[test]
    fn leaves_declared_as_constants() {
        let (mut c, _y) = compile_scalar(4);
        let two = c.pool.number(2);
        assert!(c.symbols.is_constant(two));
    }

    #[test]
    fn boolean_vars_get_trivial_encoding() {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let b = c.pool.atom("b");
        let boolean = types::boolean(&mut c.pool);
        m.var(&mut c.pool, b, boolean);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let root = c.pool.atom("main");
        c.flatten_hierarchy(root, None, None).unwrap();
        c.encode_vars().unwrap();

        let b = c.pool.dot(None, b);
        let encoding = c.symbols.encoding(b).unwrap();
        assert_eq!(c.pool.tag(encoding), NodeTag::Boolean);
        assert_eq!(c.encoding_bits(b), [b]);
        assert!(c.adds.is_registered(b));
    }
}
