//! Hash-consed expression nodes and string interning.
//!
//! Every expression, name, and declaration in the compiler is a [`NodeId`]
//! pointing into a [`NodePool`]. The pool guarantees structural identity: two
//! nodes built from the same (tag, car, cdr, payload) quadruple receive the
//! same id, so equality tests anywhere in the pipeline are integer compares.
//! Atoms intern their text separately through [`StrId`] so payload equality
//! stays value-based for identifiers and numeric literals.
//!
//! Nodes are never freed individually; the pool is dropped wholesale when the
//! compiler goes away. The source line of the *first* interning of a node is
//! recorded for diagnostics, so later re-interning of the same structure does
//! not move error positions around.

use std::fmt;

use ahash::AHashMap;

/// Index into the string interner's storage.
///
/// Uses `u32` to save space; the number of distinct identifiers in a model is
/// nowhere near the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StrId(u32);

impl StrId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an interned node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Node tags of the expression language.
///
/// The set mirrors the input language: leaves, name constructors, boolean and
/// arithmetic connectives, CTL/LTL operators, and the structural tags used by
/// module declarations. Structural tags never survive flattening; the
/// flattener consumes them and produces pure expression trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeTag {
    // leaves
    True,
    False,
    Number,
    Atom,
    // name constructors
    Dot,
    Array,
    Bit,
    SelfRef,
    Context,
    // unary / assignment markers
    Next,
    Smallinit,
    // boolean connectives
    Not,
    And,
    Or,
    Xor,
    Xnor,
    Iff,
    Implies,
    Case,
    Colon,
    IfThenElse,
    Cons,
    Eqdef,
    // arithmetic
    Plus,
    Minus,
    Times,
    Divide,
    Mod,
    // comparison
    Equal,
    NotEqual,
    Lt,
    Gt,
    Le,
    Ge,
    // sets
    Union,
    Setin,
    Twodots,
    // CTL
    Ex,
    Ax,
    Ef,
    Af,
    Eg,
    Ag,
    Eu,
    Au,
    Ebf,
    Abf,
    Ebg,
    Abg,
    Ebu,
    Abu,
    // LTL / past LTL
    OpNext,
    OpPrec,
    OpNotPrecNot,
    OpFuture,
    OpOnce,
    OpGlobal,
    OpHistorical,
    Until,
    Releases,
    Since,
    Triggered,
    // min/max computation
    Minu,
    Maxu,
    // structural (module bodies)
    Module,
    Modtype,
    Process,
    Var,
    Ivar,
    Define,
    Assign,
    Init,
    Invar,
    Trans,
    Spec,
    LtlSpec,
    PslSpec,
    InvarSpec,
    Compute,
    Justice,
    Compassion,
    Isa,
    Boolean,
    Scalar,
}

/// Extra value attached to a node, keyed into the structural hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Payload {
    None,
    /// Numeric literal value (`Number` nodes).
    Num(i64),
    /// Interned identifier (`Atom` nodes).
    Str(StrId),
    /// Bit position (`Bit` nodes).
    Index(u32),
}

/// The structural key of a node. Two nodes with equal data share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeData {
    tag: NodeTag,
    car: Option<NodeId>,
    cdr: Option<NodeId>,
    payload: Payload,
}

/// The node pool: all expression structure lives here.
///
/// Thread-unsafe by design; the compiler is single-threaded and phases are
/// strictly ordered, so no interior synchronisation is needed.
#[derive(Debug, Default)]
pub struct NodePool {
    strings: Vec<Box<str>>,
    string_ids: AHashMap<Box<str>, StrId>,
    nodes: Vec<NodeData>,
    node_ids: AHashMap<NodeData, NodeId>,
    /// Source line recorded at first intern; 0 when unknown.
    lines: Vec<u32>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning its id. Subsequent calls with equal text
    /// return the same id.
    pub fn intern_str(&mut self, text: &str) -> StrId {
        if let Some(&id) = self.string_ids.get(text) {
            return id;
        }
        let id = StrId(u32::try_from(self.strings.len()).expect("string pool overflow"));
        let owned: Box<str> = text.into();
        self.strings.push(owned.clone());
        self.string_ids.insert(owned, id);
        id
    }

    pub fn str(&self, id: StrId) -> &str {
        &self.strings[id.index()]
    }

    /// Interns a node with an explicit source line. The line sticks only on
    /// the first interning of the structure.
    pub fn intern_at(
        &mut self,
        tag: NodeTag,
        car: Option<NodeId>,
        cdr: Option<NodeId>,
        payload: Payload,
        line: u32,
    ) -> NodeId {
        let data = NodeData { tag, car, cdr, payload };
        if let Some(&id) = self.node_ids.get(&data) {
            return id;
        }
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node pool overflow"));
        self.nodes.push(data);
        self.lines.push(line);
        self.node_ids.insert(data, id);
        id
    }

    pub fn intern(
        &mut self,
        tag: NodeTag,
        car: Option<NodeId>,
        cdr: Option<NodeId>,
        payload: Payload,
    ) -> NodeId {
        self.intern_at(tag, car, cdr, payload, 0)
    }

    #[inline]
    pub fn tag(&self, id: NodeId) -> NodeTag {
        self.nodes[id.index()].tag
    }

    #[inline]
    pub fn car(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].car
    }

    #[inline]
    pub fn cdr(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].cdr
    }

    /// Source line of the node's first interning, or 0 if unknown.
    #[inline]
    pub fn line(&self, id: NodeId) -> u32 {
        self.lines[id.index()]
    }

    /// Numeric value of a `Number` node.
    pub fn num(&self, id: NodeId) -> i64 {
        match self.nodes[id.index()].payload {
            Payload::Num(n) => n,
            _ => unreachable!("num() on a non-number node"),
        }
    }

    /// Identifier text of an `Atom` node.
    pub fn atom_text(&self, id: NodeId) -> &str {
        match self.nodes[id.index()].payload {
            Payload::Str(s) => self.str(s),
            _ => unreachable!("atom_text() on a non-atom node"),
        }
    }

    /// The interned string id behind an `Atom` node.
    pub fn atom_str_id(&self, id: NodeId) -> StrId {
        match self.nodes[id.index()].payload {
            Payload::Str(s) => s,
            _ => unreachable!("atom_str_id() on a non-atom node"),
        }
    }

    /// Bit position of a `Bit` node.
    pub fn bit_index(&self, id: NodeId) -> u32 {
        match self.nodes[id.index()].payload {
            Payload::Index(k) => k,
            _ => unreachable!("bit_index() on a non-bit node"),
        }
    }

    // ------------------------------------------------------------------
    // Convenience constructors. These are the `find_node` vocabulary the
    // rest of the compiler speaks.
    // ------------------------------------------------------------------

    pub fn truth(&mut self) -> NodeId {
        self.intern(NodeTag::True, None, None, Payload::None)
    }

    pub fn falsity(&mut self) -> NodeId {
        self.intern(NodeTag::False, None, None, Payload::None)
    }

    pub fn number(&mut self, value: i64) -> NodeId {
        self.intern(NodeTag::Number, None, None, Payload::Num(value))
    }

    pub fn atom(&mut self, text: &str) -> NodeId {
        let s = self.intern_str(text);
        self.intern(NodeTag::Atom, None, None, Payload::Str(s))
    }

    /// `ctx.name` qualified name; `ctx == None` is the top-level scope.
    pub fn dot(&mut self, ctx: Option<NodeId>, name: NodeId) -> NodeId {
        self.intern(NodeTag::Dot, ctx, Some(name), Payload::None)
    }

    /// `base[index]` array element name.
    pub fn array(&mut self, base: NodeId, index: NodeId) -> NodeId {
        self.intern(NodeTag::Array, Some(base), Some(index), Payload::None)
    }

    /// The `k`-th boolean bit of scalar variable `var`.
    pub fn bit(&mut self, var: NodeId, k: u32) -> NodeId {
        self.intern(NodeTag::Bit, Some(var), None, Payload::Index(k))
    }

    pub fn cons(&mut self, head: NodeId, tail: Option<NodeId>) -> NodeId {
        self.intern(NodeTag::Cons, Some(head), tail, Payload::None)
    }

    /// Builds a cons list preserving the iterator's order.
    pub fn list<I>(&mut self, items: I) -> Option<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut acc = None;
        for item in items.into_iter().rev() {
            acc = Some(self.cons(item, acc));
        }
        acc
    }

    pub fn unary(&mut self, tag: NodeTag, body: NodeId) -> NodeId {
        self.intern(tag, Some(body), None, Payload::None)
    }

    pub fn binary(&mut self, tag: NodeTag, left: NodeId, right: NodeId) -> NodeId {
        self.intern(tag, Some(left), Some(right), Payload::None)
    }

    pub fn next_of(&mut self, body: NodeId) -> NodeId {
        self.unary(NodeTag::Next, body)
    }

    pub fn init_of(&mut self, body: NodeId) -> NodeId {
        self.unary(NodeTag::Smallinit, body)
    }

    pub fn not(&mut self, body: NodeId) -> NodeId {
        self.unary(NodeTag::Not, body)
    }

    pub fn and(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(NodeTag::And, left, right)
    }

    /// Conjunction with an optional accumulator; `None` is the identity.
    pub fn and_opt(&mut self, acc: Option<NodeId>, expr: NodeId) -> NodeId {
        match acc {
            Some(left) => self.and(left, expr),
            None => expr,
        }
    }

    pub fn context(&mut self, ctx: Option<NodeId>, expr: NodeId) -> NodeId {
        self.intern(NodeTag::Context, ctx, Some(expr), Payload::None)
    }

    /// `case cond : then ; else esac` single-branch node.
    pub fn case(&mut self, cond: NodeId, then: NodeId, else_: NodeId) -> NodeId {
        let colon = self.binary(NodeTag::Colon, cond, then);
        self.binary(NodeTag::Case, colon, else_)
    }

    /// The shared `boolean` type marker used as the trivial encoding.
    pub fn boolean_type(&mut self) -> NodeId {
        self.intern(NodeTag::Boolean, None, None, Payload::None)
    }

    /// Iterates the cars of a cons list.
    pub fn iter_list(&self, head: Option<NodeId>) -> ListIter<'_> {
        ListIter { pool: self, cursor: head }
    }

    /// Collects a cons list into a vector of its cars.
    pub fn list_to_vec(&self, head: Option<NodeId>) -> Vec<NodeId> {
        self.iter_list(head).collect()
    }

    /// Renders an expression with minimal parentheses.
    pub fn display(&self, id: NodeId) -> NodeDisplay<'_> {
        NodeDisplay { pool: self, id }
    }
}

/// Iterator over the elements of a cons list.
pub struct ListIter<'a> {
    pool: &'a NodePool,
    cursor: Option<NodeId>,
}

impl Iterator for ListIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cursor?;
        if self.pool.tag(id) == NodeTag::Cons {
            self.cursor = self.pool.cdr(id);
            self.pool.car(id)
        } else {
            // improper list tail: yield it and stop
            self.cursor = None;
            Some(id)
        }
    }
}

/// Binding strength used by the printer; higher binds tighter.
fn precedence(tag: NodeTag) -> u8 {
    match tag {
        NodeTag::Implies => 1,
        NodeTag::Iff | NodeTag::Xor | NodeTag::Xnor => 2,
        NodeTag::Or => 3,
        NodeTag::And => 4,
        NodeTag::Not => 5,
        NodeTag::Equal
        | NodeTag::NotEqual
        | NodeTag::Lt
        | NodeTag::Gt
        | NodeTag::Le
        | NodeTag::Ge
        | NodeTag::Setin => 6,
        NodeTag::Union => 7,
        NodeTag::Plus | NodeTag::Minus => 8,
        NodeTag::Times | NodeTag::Divide | NodeTag::Mod => 9,
        _ => 10,
    }
}

fn infix_symbol(tag: NodeTag) -> Option<&'static str> {
    Some(match tag {
        NodeTag::And => "&",
        NodeTag::Or => "|",
        NodeTag::Xor => "xor",
        NodeTag::Xnor => "xnor",
        NodeTag::Iff => "<->",
        NodeTag::Implies => "->",
        NodeTag::Equal => "=",
        NodeTag::NotEqual => "!=",
        NodeTag::Lt => "<",
        NodeTag::Gt => ">",
        NodeTag::Le => "<=",
        NodeTag::Ge => ">=",
        NodeTag::Plus => "+",
        NodeTag::Minus => "-",
        NodeTag::Times => "*",
        NodeTag::Divide => "/",
        NodeTag::Mod => "mod",
        NodeTag::Union => "union",
        NodeTag::Setin => "in",
        NodeTag::Until => "U",
        NodeTag::Releases => "V",
        NodeTag::Since => "S",
        NodeTag::Triggered => "T",
        _ => return None,
    })
}

fn prefix_keyword(tag: NodeTag) -> Option<&'static str> {
    Some(match tag {
        NodeTag::Ex => "EX",
        NodeTag::Ax => "AX",
        NodeTag::Ef => "EF",
        NodeTag::Af => "AF",
        NodeTag::Eg => "EG",
        NodeTag::Ag => "AG",
        NodeTag::OpNext => "X",
        NodeTag::OpPrec => "Y",
        NodeTag::OpNotPrecNot => "Z",
        NodeTag::OpFuture => "F",
        NodeTag::OpOnce => "O",
        NodeTag::OpGlobal => "G",
        NodeTag::OpHistorical => "H",
        _ => return None,
    })
}

/// Display adapter produced by [`NodePool::display`].
pub struct NodeDisplay<'a> {
    pool: &'a NodePool,
    id: NodeId,
}

impl NodeDisplay<'_> {
    fn write(&self, f: &mut fmt::Formatter<'_>, id: NodeId, parent_prec: u8) -> fmt::Result {
        let pool = self.pool;
        let tag = pool.tag(id);
        match tag {
            NodeTag::True => write!(f, "TRUE"),
            NodeTag::False => write!(f, "FALSE"),
            NodeTag::Number => write!(f, "{}", pool.num(id)),
            NodeTag::Atom => write!(f, "{}", pool.atom_text(id)),
            NodeTag::SelfRef => write!(f, "self"),
            NodeTag::Dot => {
                if let Some(ctx) = pool.car(id) {
                    self.write(f, ctx, 10)?;
                    write!(f, ".")?;
                }
                self.write(f, pool.cdr(id).expect("dot without name"), 10)
            }
            NodeTag::Array => {
                self.write(f, pool.car(id).expect("array without base"), 10)?;
                write!(f, "[")?;
                self.write(f, pool.cdr(id).expect("array without index"), 0)?;
                write!(f, "]")
            }
            NodeTag::Bit => {
                self.write(f, pool.car(id).expect("bit without base"), 10)?;
                write!(f, ".{}", pool.bit_index(id))
            }
            NodeTag::Next => {
                write!(f, "next(")?;
                self.write(f, pool.car(id).expect("next without body"), 0)?;
                write!(f, ")")
            }
            NodeTag::Smallinit => {
                write!(f, "init(")?;
                self.write(f, pool.car(id).expect("init without body"), 0)?;
                write!(f, ")")
            }
            NodeTag::Not => {
                write!(f, "!")?;
                self.write(f, pool.car(id).expect("not without body"), precedence(tag))
            }
            NodeTag::Eqdef => {
                self.write(f, pool.car(id).expect("eqdef lhs"), 0)?;
                write!(f, " := ")?;
                self.write(f, pool.cdr(id).expect("eqdef rhs"), 0)
            }
            NodeTag::Twodots => {
                self.write(f, pool.car(id).expect("range low"), 10)?;
                write!(f, "..")?;
                self.write(f, pool.cdr(id).expect("range high"), 10)
            }
            NodeTag::Context => {
                // flattened output never carries contexts, but diagnostics may
                if let Some(ctx) = pool.car(id) {
                    self.write(f, ctx, 10)?;
                    write!(f, "#")?;
                }
                self.write(f, pool.cdr(id).expect("context body"), parent_prec)
            }
            NodeTag::Case | NodeTag::IfThenElse => self.write_case(f, id),
            NodeTag::Cons => {
                write!(f, "{{")?;
                let mut first = true;
                for item in pool.iter_list(Some(id)) {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    self.write(f, item, 0)?;
                }
                write!(f, "}}")
            }
            _ => {
                if let Some(op) = infix_symbol(tag) {
                    let prec = precedence(tag);
                    let parens = prec < parent_prec;
                    if parens {
                        write!(f, "(")?;
                    }
                    self.write(f, pool.car(id).expect("infix lhs"), prec)?;
                    write!(f, " {op} ")?;
                    self.write(f, pool.cdr(id).expect("infix rhs"), prec + 1)?;
                    if parens {
                        write!(f, ")")?;
                    }
                    Ok(())
                } else if let Some(kw) = prefix_keyword(tag) {
                    write!(f, "{kw} ")?;
                    self.write(f, pool.car(id).expect("prefix body"), 10)
                } else {
                    match tag {
                        NodeTag::Eu | NodeTag::Au => {
                            let (q, u) = if tag == NodeTag::Eu { ("E", "U") } else { ("A", "U") };
                            write!(f, "{q} [ ")?;
                            self.write(f, pool.car(id).expect("until lhs"), 0)?;
                            write!(f, " {u} ")?;
                            self.write(f, pool.cdr(id).expect("until rhs"), 0)?;
                            write!(f, " ]")
                        }
                        NodeTag::Ebf | NodeTag::Abf | NodeTag::Ebg | NodeTag::Abg => {
                            let kw = match tag {
                                NodeTag::Ebf => "EBF",
                                NodeTag::Abf => "ABF",
                                NodeTag::Ebg => "EBG",
                                _ => "ABG",
                            };
                            write!(f, "{kw} ")?;
                            self.write(f, pool.cdr(id).expect("bounded range"), 10)?;
                            write!(f, " ")?;
                            self.write(f, pool.car(id).expect("bounded body"), 10)
                        }
                        NodeTag::Minu | NodeTag::Maxu => {
                            let kw = if tag == NodeTag::Minu { "MIN" } else { "MAX" };
                            write!(f, "{kw} [ ")?;
                            self.write(f, pool.car(id).expect("minmax lhs"), 0)?;
                            write!(f, ", ")?;
                            self.write(f, pool.cdr(id).expect("minmax rhs"), 0)?;
                            write!(f, " ]")
                        }
                        NodeTag::Colon => {
                            self.write(f, pool.car(id).expect("colon lhs"), 0)?;
                            write!(f, " : ")?;
                            self.write(f, pool.cdr(id).expect("colon rhs"), 0)
                        }
                        NodeTag::Boolean => write!(f, "boolean"),
                        _ => write!(f, "<{tag:?}>"),
                    }
                }
            }
        }
    }

    fn write_case(&self, f: &mut fmt::Formatter<'_>, id: NodeId) -> fmt::Result {
        let pool = self.pool;
        write!(f, "case ")?;
        let mut cursor = id;
        loop {
            let branch = pool.car(cursor).expect("case branch");
            self.write(f, pool.car(branch).expect("case condition"), 0)?;
            write!(f, " : ")?;
            self.write(f, pool.cdr(branch).expect("case value"), 0)?;
            write!(f, "; ")?;
            let else_ = pool.cdr(cursor).expect("case else");
            match pool.tag(else_) {
                NodeTag::Case | NodeTag::IfThenElse => cursor = else_,
                NodeTag::True => break,
                _ => {
                    write!(f, "TRUE : ")?;
                    self.write(f, else_, 0)?;
                    write!(f, "; ")?;
                    break;
                }
            }
        }
        write!(f, "esac")
    }
}

impl fmt::Display for NodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, self.id, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_identity() {
        let mut pool = NodePool::new();
        let x = pool.atom("x");
        let y = pool.atom("x");
        assert_eq!(x, y);

        let a = pool.and(x, y);
        let b = pool.and(x, y);
        assert_eq!(a, b);

        let n1 = pool.number(3);
        let n2 = pool.number(3);
        let n3 = pool.number(4);
        assert_eq!(n1, n2);
        assert_ne!(n1, n3);
    }

    #[test]
    fn first_intern_line_sticks() {
        let mut pool = NodePool::new();
        let s = pool.intern_str("v");
        let x = pool.intern_at(NodeTag::Atom, None, None, Payload::Str(s), 7);
        let again = pool.intern_at(NodeTag::Atom, None, None, Payload::Str(s), 99);
        assert_eq!(x, again);
        assert_eq!(pool.line(x), 7);
    }

    #[test]
    fn list_roundtrip() {
        let mut pool = NodePool::new();
        let items: Vec<_> = (0..4).map(|i| pool.number(i)).collect();
        let head = pool.list(items.clone());
        assert_eq!(pool.list_to_vec(head), items);
        assert_eq!(pool.list(std::iter::empty()), None);
    }

    #[test]
    fn printer_precedence() {
        let mut pool = NodePool::new();
        let a = pool.atom("a");
        let b = pool.atom("b");
        let c = pool.atom("c");
        let or = pool.binary(NodeTag::Or, b, c);
        let and = pool.and(a, or);
        assert_eq!(pool.display(and).to_string(), "a & (b | c)");

        let and2 = pool.and(a, b);
        let or2 = pool.binary(NodeTag::Or, and2, c);
        assert_eq!(pool.display(or2).to_string(), "a & b | c");
    }

    #[test]
    fn printer_names() {
        let mut pool = NodePool::new();
        let m = pool.atom("m");
        let x = pool.atom("x");
        let top = pool.dot(None, m);
        let qual = pool.dot(Some(top), x);
        assert_eq!(pool.display(qual).to_string(), "m.x");
        let bit = pool.bit(qual, 1);
        assert_eq!(pool.display(bit).to_string(), "m.x.1");
        let idx = pool.number(2);
        let arr = pool.array(qual, idx);
        assert_eq!(pool.display(arr).to_string(), "m.x[2]");
    }

    #[test]
    fn printer_case_chain() {
        let mut pool = NodePool::new();
        let c = pool.atom("c");
        let t = pool.truth();
        let one = pool.number(1);
        let zero = pool.number(0);
        let inner = pool.case(t, one, zero);
        let outer = pool.case(c, zero, inner);
        assert_eq!(
            pool.display(outer).to_string(),
            "case c : 0; TRUE : 1; TRUE : 0; esac"
        );
    }
}
