//! Variable ordering files.
//!
//! An ordering file is line-oriented UTF-8: each non-comment line names one
//! variable or bit, `#` and `--` start comments. A name is an identifier
//! chain with `.field` qualifiers and `[n]` array subscripts; a trailing
//! numeric component (`x.0`) denotes a single bit of a scalar variable.
//!
//! [`Compiler::sort_bool_vars`] reorders the boolean variable lists and
//! groups to match the file:
//!
//! 1. entries that are not declared variables are warned about and skipped;
//! 2. a scalar entry contributes all its bits that appear neither in the
//!    file nor in the list built so far, grouped together iff no bit of that
//!    scalar was listed explicitly;
//! 3. declared bits missing from the file are appended in their original
//!    group order, with one warning listing them;
//! 4. determinisation witnesses are appended last to the input list without
//!    any warning.

use crate::{
    compiler::Compiler,
    error::{CompileError, CompileResult, Warning},
    intern::{NodeId, NodePool},
    symbols::GroupSet,
};

/// Parses the contents of an ordering file into qualified names.
pub fn parse_order_file(pool: &mut NodePool, text: &str) -> CompileResult<Vec<NodeId>> {
    let mut names = Vec::new();
    for (line_index, raw) in text.lines().enumerate() {
        let line = match raw.find(['#']) {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = u32::try_from(line_index + 1).unwrap_or(0);
        names.push(parse_name(pool, line, line_no)?);
    }
    Ok(names)
}

fn parse_name(pool: &mut NodePool, text: &str, line: u32) -> CompileResult<NodeId> {
    let malformed = || CompileError::TypeError {
        detail: format!("malformed ordering file entry \"{text}\""),
        line,
    };

    let mut chars = text.char_indices().peekable();
    let mut cursor: Option<NodeId> = None;
    loop {
        // one segment: identifier, number, or [number]
        let Some(&(start, first)) = chars.peek() else { return Err(malformed()) };
        if first == '[' {
            chars.next();
            let mut digits = String::new();
            for (_, ch) in chars.by_ref() {
                if ch == ']' {
                    break;
                }
                digits.push(ch);
            }
            let index: i64 = digits.trim().parse().map_err(|_| malformed())?;
            let base = cursor.ok_or_else(malformed)?;
            let index = pool.number(index);
            cursor = Some(pool.array(base, index));
        } else if first.is_ascii_digit() {
            let mut end = start;
            while chars.peek().is_some_and(|(_, c)| c.is_ascii_digit()) {
                end = chars.next().expect("peeked digit").0;
            }
            let value: u32 = text[start..=end].parse().map_err(|_| malformed())?;
            // a numeric component is a bit selector
            let base = cursor.ok_or_else(malformed)?;
            cursor = Some(pool.bit(base, value));
        } else if first.is_ascii_alphabetic() || first == '_' {
            let mut end = start;
            while chars
                .peek()
                .is_some_and(|(_, c)| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == '$')
            {
                end = chars.next().expect("peeked identifier char").0;
            }
            let atom = pool.atom(&text[start..=end]);
            cursor = Some(pool.dot(cursor, atom));
        } else {
            return Err(malformed());
        }

        match chars.peek() {
            None => break,
            Some((_, '.')) => {
                chars.next();
            }
            Some((_, '[')) => {}
            Some(_) => return Err(malformed()),
        }
    }
    cursor.ok_or_else(malformed)
}

impl Compiler {
    /// Reorders the boolean variable lists and groups to follow an ordering
    /// file.
    pub fn sort_bool_vars(&mut self, order_text: &str) -> CompileResult<()> {
        let ordered = parse_order_file(&mut self.pool, order_text)?;

        let mut new_state: Vec<NodeId> = Vec::new();
        let mut new_input: Vec<NodeId> = Vec::new();
        let mut state_groups = GroupSet::new();
        let mut input_groups = GroupSet::new();

        for &name in &ordered {
            if !self.symbols.is_var(name) {
                let printed = self.printed(name);
                self.diagnostics.warn(Warning::NotDeclared { name: printed });
                continue;
            }
            let input = self.symbols.is_input_var(name);
            let (list, groups) = if input {
                (&mut new_input, &mut input_groups)
            } else {
                (&mut new_state, &mut state_groups)
            };

            if self.symbols.is_boolean_var(name) {
                if list.contains(&name) {
                    let printed = self.pool.display(name).to_string();
                    self.diagnostics.warn(Warning::AppearsTwiceInOrderFile { name: printed });
                } else {
                    list.push(name);
                    groups.add_group(vec![name]);
                }
                continue;
            }

            // scalar entry: pull in the bits not mentioned elsewhere
            let bits = self.encoding_bits(name);
            let grouped = bits.iter().all(|bit| !list.contains(bit));
            let fresh: Vec<NodeId> = bits
                .into_iter()
                .filter(|bit| !ordered.contains(bit) && !list.contains(bit))
                .collect();
            if grouped {
                if !fresh.is_empty() {
                    groups.add_group(fresh.clone());
                }
                list.extend(fresh);
            } else {
                for bit in fresh {
                    groups.add_group(vec![bit]);
                    list.push(bit);
                }
            }
        }

        // append whatever the file forgot, keeping old groups together
        let mut missing = Vec::new();
        let sides = [
            (self.symbols.state_groups.clone(), &mut new_state, &mut state_groups),
            (self.symbols.input_groups.clone(), &mut new_input, &mut input_groups),
        ];
        for (old_groups, list, groups) in sides {
            for group in old_groups.iter() {
                let mut new_group = Vec::new();
                for &name in group {
                    if list.contains(&name) {
                        continue;
                    }
                    list.push(name);
                    new_group.push(name);
                    if !self.symbols.is_determ_var(name) {
                        missing.push(self.pool.display(name).to_string());
                    }
                }
                if !new_group.is_empty() {
                    groups.add_group(new_group);
                }
            }
        }
        if !missing.is_empty() {
            self.diagnostics.warn(Warning::MissingVars { names: missing });
        }

        // determinisation witnesses close the input list, silently
        for det in self.symbols.determ_vars().to_vec() {
            if !new_input.contains(&det) {
                new_input.push(det);
            }
        }

        self.symbols.state_bool_vars = new_state;
        self.symbols.input_bool_vars = new_input;
        self.symbols.state_groups = state_groups;
        self.symbols.input_groups = input_groups;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ModuleBuilder, types};

    #[test]
    fn parse_entries() {
        let mut pool = NodePool::new();
        let names = parse_order_file(
            &mut pool,
            "# header\n\
             m.x\n\
             y.1  -- a bit\n\
             arr[2].v\n",
        )
        .unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(pool.display(names[0]).to_string(), "m.x");
        assert_eq!(pool.display(names[1]).to_string(), "y.1");
        assert_eq!(pool.display(names[2]).to_string(), "arr[2].v");
    }

    #[test]
    fn parse_rejects_garbage() {
        let mut pool = NodePool::new();
        assert!(parse_order_file(&mut pool, "?!\n").is_err());
    }

    /// main { y : 0..3; b : boolean; i : boolean input }
    fn model() -> (Compiler, NodeId, NodeId, NodeId) {
        let mut c = Compiler::new();
        let mut m = ModuleBuilder::new(&mut c.pool, "main");
        let y = c.pool.atom("y");
        let b = c.pool.atom("b");
        let i = c.pool.atom("i");
        let range = types::range(&mut c.pool, 0, 3);
        m.var(&mut c.pool, y, range);
        let boolean = types::boolean(&mut c.pool);
        m.var(&mut c.pool, b, boolean);
        let boolean = types::boolean(&mut c.pool);
        m.ivar(&mut c.pool, i, boolean);
        let module = m.build(&mut c.pool);
        c.add_module(module).unwrap();
        let root = c.pool.atom("main");
        c.flatten_hierarchy(root, None, None).unwrap();
        c.encode_vars().unwrap();
        let y = c.pool.dot(None, y);
        let b = c.pool.dot(None, b);
        let i = c.pool.dot(None, i);
        (c, y, b, i)
    }

    #[test]
    fn scalar_entry_contributes_grouped_bits() {
        let (mut c, y, b, _i) = model();
        c.sort_bool_vars("b\ny\n").unwrap();

        let bit0 = c.pool.bit(y, 0);
        let bit1 = c.pool.bit(y, 1);
        assert_eq!(c.symbols.state_bool_vars(), [b, bit0, bit1]);
        // y's bits stay in one group since no bit was listed explicitly
        let groups: Vec<_> = c.symbols.state_groups().iter().collect();
        assert_eq!(groups, [&[b][..], &[bit0, bit1][..]]);
    }

    #[test]
    fn explicit_bit_breaks_the_group() {
        let (mut c, y, b, _i) = model();
        c.sort_bool_vars("y.1\nb\ny\n").unwrap();

        let bit0 = c.pool.bit(y, 0);
        let bit1 = c.pool.bit(y, 1);
        assert_eq!(c.symbols.state_bool_vars(), [bit1, b, bit0]);
        let groups: Vec<_> = c.symbols.state_groups().iter().collect();
        assert_eq!(groups, [&[bit1][..], &[b][..], &[bit0][..]]);
    }

    #[test]
    fn unknown_entries_warn_and_skip() {
        let (mut c, _y, _b, _i) = model();
        c.sort_bool_vars("ghost\nb\ny\ni\n").unwrap();
        assert!(
            c.diagnostics
                .warnings()
                .iter()
                .any(|w| matches!(w, Warning::NotDeclared { name } if name == "ghost")),
        );
    }

    #[test]
    fn forgotten_bits_are_appended_with_warning() {
        let (mut c, y, b, i) = model();
        c.sort_bool_vars("b\n").unwrap();

        let bit0 = c.pool.bit(y, 0);
        let bit1 = c.pool.bit(y, 1);
        assert_eq!(c.symbols.state_bool_vars(), [b, bit0, bit1]);
        assert_eq!(c.symbols.input_bool_vars(), [i]);
        assert!(
            c.diagnostics.warnings().iter().any(
                |w| matches!(w, Warning::MissingVars { names } if names.contains(&"y.0".to_owned())),
            ),
        );
    }

    #[test]
    fn determ_vars_append_silently() {
        let (mut c, y, b, i) = model();
        // force a determinisation variable into existence
        let zero = c.pool.number(0);
        let one = c.pool.number(1);
        let both = c.pool.binary(crate::intern::NodeTag::Union, zero, one);
        let b_node = b;
        let assign = c.pool.binary(crate::intern::NodeTag::Eqdef, b_node, both);
        c.expr_to_bexpr(assign).unwrap();

        c.sort_bool_vars("i\nb\ny\n").unwrap();
        let det_atom = c.pool.atom("__det_0");
        let det = c.pool.dot(None, det_atom);
        let inputs = c.symbols.input_bool_vars();
        assert_eq!(inputs.last(), Some(&det));
        assert!(
            !c.diagnostics
                .warnings()
                .iter()
                .any(|w| matches!(w, Warning::MissingVars { names } if names.iter().any(|n| n.contains("__det")))),
            "determ witnesses are appended without warning"
        );
        let _ = y;
    }
}
