//! Reduced boolean circuits.
//!
//! An RBC is a DAG over `AND`/`IFF`/`ITE` vertices with negation carried on
//! the edges: a [`Ref`] is a vertex id plus a polarity bit, and the vertex
//! pool only ever stores the canonical positive form. Constructors perform
//! local boolean simplification before structural hashing, so trivially
//! reducible circuits never allocate. `OR` and `XOR` are derived connectives
//! (De Morgan over `AND`, negation of `IFF`).
//!
//! Vertices carry a reference-count style mark protecting live roots; the
//! explicit [`RbcManager::gc`] sweep removes everything unreachable from a
//! marked root, a registered variable, or the constant vertex. Garbage
//! collection is never implicit.
//!
//! The manager also owns the RBC↔CNF variable bijections used by the
//! [`cnf`] translator: variables at or below the `max_unchanged` watermark
//! keep their index in CNF, everything above is allocated monotonically.

pub mod cnf;
pub mod conv;
pub mod subst;

use ahash::AHashMap;
use smallvec::SmallVec;

/// Index of a vertex in the RBC pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct RbcId(u32);

impl RbcId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// An edge into the DAG: a vertex and the polarity of the reference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Ref {
    node: RbcId,
    negated: bool,
}

impl Ref {
    pub fn node(self) -> RbcId {
        self.node
    }

    pub fn is_negated(self) -> bool {
        self.negated
    }

    /// The complement edge.
    #[must_use]
    pub fn negate(self) -> Self {
        Self { node: self.node, negated: !self.negated }
    }

    /// Applies an extra polarity on top of the edge's own.
    #[must_use]
    fn with_sign(self, sign: bool) -> Self {
        Self { node: self.node, negated: self.negated ^ sign }
    }

    /// The positive edge to the same vertex.
    #[must_use]
    fn abs(self) -> Self {
        Self { node: self.node, negated: false }
    }
}

/// Vertex operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sym {
    /// The constant-true vertex.
    Top,
    Var,
    And,
    Iff,
    Ite,
}

type Sons = SmallVec<[Ref; 3]>;

#[derive(Debug, Clone)]
struct Vertex {
    sym: Sym,
    sons: Sons,
    /// External variable index; meaningful for `Var` vertices only.
    var_index: u32,
    /// Root protection count for garbage collection.
    mark: u32,
}

/// The RBC manager: vertex pool, variable table, and CNF bookkeeping.
#[derive(Debug)]
pub struct RbcManager {
    nodes: Vec<Option<Vertex>>,
    table: AHashMap<(Sym, Sons, u32), RbcId>,
    /// External variable index -> vertex.
    var_table: Vec<Option<RbcId>>,
    top: RbcId,
    pub(crate) node_to_cnf: AHashMap<RbcId, i32>,
    pub(crate) cnf_to_node: AHashMap<i32, RbcId>,
    /// Variables at or below this index keep their index as CNF variable.
    pub(crate) max_unchanged: i32,
    /// Highest CNF variable handed out so far.
    pub(crate) max_cnf: i32,
}

impl Default for RbcManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RbcManager {
    pub fn new() -> Self {
        let mut manager = Self {
            nodes: Vec::new(),
            table: AHashMap::new(),
            var_table: Vec::new(),
            top: RbcId(0),
            node_to_cnf: AHashMap::new(),
            cnf_to_node: AHashMap::new(),
            max_unchanged: 0,
            max_cnf: 0,
        };
        manager.top = manager.lookup(Sym::Top, Sons::new(), 0);
        manager
    }

    fn lookup(&mut self, sym: Sym, sons: Sons, var_index: u32) -> RbcId {
        let key = (sym, sons, var_index);
        if let Some(&id) = self.table.get(&key) {
            return id;
        }
        let id = RbcId(u32::try_from(self.nodes.len()).expect("RBC pool overflow"));
        let (sym, sons, var_index) = (key.0, key.1.clone(), key.2);
        self.table.insert(key, id);
        self.nodes.push(Some(Vertex { sym, sons, var_index, mark: 0 }));
        id
    }

    fn vertex(&self, id: RbcId) -> &Vertex {
        self.nodes[id.index()].as_ref().expect("RBC vertex was collected")
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn sym(&self, id: RbcId) -> Sym {
        self.vertex(id).sym
    }

    pub fn sons(&self, id: RbcId) -> &[Ref] {
        &self.vertex(id).sons
    }

    /// The external index of a variable vertex.
    pub fn var_index(&self, id: RbcId) -> Option<u32> {
        let vertex = self.vertex(id);
        (vertex.sym == Sym::Var).then_some(vertex.var_index)
    }

    /// Left operand of a binary vertex.
    pub fn left_opnd(&self, id: RbcId) -> Ref {
        self.vertex(id).sons[0]
    }

    /// Right operand of a binary vertex.
    pub fn right_opnd(&self, id: RbcId) -> Ref {
        self.vertex(id).sons[1]
    }

    /// Number of registered variables.
    pub fn var_count(&self) -> usize {
        self.var_table.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn max_var_index(&self) -> u32 {
        let mut max = 0;
        for (index, slot) in self.var_table.iter().enumerate() {
            if slot.is_some() {
                max = u32::try_from(index).expect("variable index overflow");
            }
        }
        max
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// The constant true.
    pub fn one(&self) -> Ref {
        Ref { node: self.top, negated: false }
    }

    /// The constant false.
    pub fn zero(&self) -> Ref {
        Ref { node: self.top, negated: true }
    }

    /// The variable with external index `index`.
    pub fn var(&mut self, index: u32) -> Ref {
        let slot = index as usize;
        if slot >= self.var_table.len() {
            self.var_table.resize(slot + 1, None);
        }
        let node = match self.var_table[slot] {
            Some(node) => node,
            None => {
                let node = self.lookup(Sym::Var, Sons::new(), index);
                self.var_table[slot] = Some(node);
                node
            }
        };
        Ref { node, negated: false }
    }

    pub fn not(&self, r: Ref) -> Ref {
        r.negate()
    }

    /// Conjunction; `sign` flips the polarity of the returned edge.
    pub fn and(&mut self, mut left: Ref, mut right: Ref, sign: bool) -> Ref {
        loop {
            // unit reductions
            if left == right {
                return left.with_sign(sign);
            }
            if left == right.negate() || left == self.zero() || right == self.zero() {
                return self.zero().with_sign(sign);
            }
            if left == self.one() {
                return right.with_sign(sign);
            }
            if right == self.one() {
                return left.with_sign(sign);
            }

            // absorption against conjunctive operands
            let mut changed = false;
            if self.sym(left.node) == Sym::And {
                let (l1, l2) = (self.left_opnd(left.node), self.right_opnd(left.node));
                if left.negated {
                    if right == l1 {
                        left = l2.negate();
                        changed = true;
                    } else if right == l1.negate() || right == l2.negate() {
                        return right.with_sign(sign);
                    } else if right == l2 {
                        left = l1.negate();
                        changed = true;
                    }
                } else if right == l1 {
                    left = l2;
                    changed = true;
                } else if right == l1.negate() || right == l2.negate() {
                    return self.zero().with_sign(sign);
                } else if right == l2 {
                    left = l1;
                    changed = true;
                }
            }
            if !changed && self.sym(right.node) == Sym::And {
                let (r1, r2) = (self.left_opnd(right.node), self.right_opnd(right.node));
                if right.negated {
                    if left == r1 {
                        right = r2.negate();
                        changed = true;
                    } else if left == r1.negate() || left == r2.negate() {
                        return left.with_sign(sign);
                    } else if left == r2 {
                        right = r1.negate();
                        changed = true;
                    }
                } else if left == r1 {
                    right = r2;
                    changed = true;
                } else if left == r1.negate() || left == r2.negate() {
                    return self.zero().with_sign(sign);
                } else if left == r2 {
                    right = r1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // canonical operand order
        if right < left {
            std::mem::swap(&mut left, &mut right);
        }
        let sons = Sons::from_slice(&[left, right]);
        let node = self.lookup(Sym::And, sons, 0);
        Ref { node, negated: sign }
    }

    /// Disjunction, by De Morgan over the conjunction.
    pub fn or(&mut self, left: Ref, right: Ref, sign: bool) -> Ref {
        self.and(left.negate(), right.negate(), !sign)
    }

    /// Coimplication; negation is lifted onto the returned edge so both
    /// stored operands are positive.
    pub fn iff(&mut self, left: Ref, right: Ref, sign: bool) -> Ref {
        if left == right {
            return self.one().with_sign(sign);
        }
        if left == right.negate() {
            return self.zero().with_sign(sign);
        }
        if left == self.zero() {
            return right.negate().with_sign(sign);
        }
        if right == self.zero() {
            return left.negate().with_sign(sign);
        }
        if left == self.one() {
            return right.with_sign(sign);
        }
        if right == self.one() {
            return left.with_sign(sign);
        }

        let sign = sign ^ left.negated ^ right.negated;
        let mut left = left.abs();
        let mut right = right.abs();
        if right < left {
            std::mem::swap(&mut left, &mut right);
        }
        let sons = Sons::from_slice(&[left, right]);
        let node = self.lookup(Sym::Iff, sons, 0);
        Ref { node, negated: sign }
    }

    /// Exclusive disjunction: the negation of the coimplication.
    pub fn xor(&mut self, left: Ref, right: Ref, sign: bool) -> Ref {
        self.iff(left, right, !sign)
    }

    /// If-then-else over three circuits.
    pub fn ite(&mut self, i: Ref, t: Ref, e: Ref, sign: bool) -> Ref {
        if i == self.one() {
            return t.with_sign(sign);
        }
        if i == self.zero() {
            return e.with_sign(sign);
        }
        if t == self.one() {
            return self.or(i, e, sign);
        }
        if t == self.zero() {
            let ni = i.negate();
            return self.and(ni, e, sign);
        }
        if e == self.one() {
            let ni = i.negate();
            return self.or(ni, t, sign);
        }
        if e == self.zero() {
            return self.and(i, t, sign);
        }
        if i == t {
            return self.or(i, e, sign);
        }
        if i == e {
            return self.and(i, t, sign);
        }
        if t == e {
            return t.with_sign(sign);
        }
        if i == t.negate() {
            let ni = i.negate();
            return self.and(ni, e, sign);
        }
        if i == e.negate() {
            let ni = i.negate();
            return self.or(ni, t, sign);
        }
        if t == e.negate() {
            return self.iff(i, t, sign);
        }

        let sons = Sons::from_slice(&[i, t, e]);
        let node = self.lookup(Sym::Ite, sons, 0);
        Ref { node, negated: sign }
    }

    // ------------------------------------------------------------------
    // Roots and garbage collection
    // ------------------------------------------------------------------

    /// Protects the vertex under `r` from garbage collection.
    pub fn mark(&mut self, r: Ref) {
        let vertex = self.nodes[r.node.index()].as_mut().expect("RBC vertex was collected");
        vertex.mark += 1;
    }

    /// Releases one protection of the vertex under `r`.
    pub fn unmark(&mut self, r: Ref) {
        let vertex = self.nodes[r.node.index()].as_mut().expect("RBC vertex was collected");
        vertex.mark = vertex.mark.saturating_sub(1);
    }

    /// Sweeps every vertex unreachable from a marked root, a variable, or
    /// the constant. Only called on demand.
    pub fn gc(&mut self) {
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack = vec![self.top];
        for slot in self.var_table.iter().flatten() {
            stack.push(*slot);
        }
        for (index, vertex) in self.nodes.iter().enumerate() {
            if vertex.as_ref().is_some_and(|v| v.mark > 0) {
                stack.push(RbcId(u32::try_from(index).expect("RBC pool overflow")));
            }
        }
        while let Some(id) = stack.pop() {
            if reachable[id.index()] {
                continue;
            }
            reachable[id.index()] = true;
            if let Some(vertex) = &self.nodes[id.index()] {
                for son in &vertex.sons {
                    stack.push(son.node);
                }
            }
        }

        for index in 0..self.nodes.len() {
            if reachable[index] {
                continue;
            }
            let Some(vertex) = self.nodes[index].take() else { continue };
            let id = RbcId(u32::try_from(index).expect("RBC pool overflow"));
            self.table.remove(&(vertex.sym, vertex.sons, vertex.var_index));
            if let Some(cnf_var) = self.node_to_cnf.remove(&id) {
                self.cnf_to_node.remove(&cnf_var);
            }
        }
    }

    /// Whether the vertex is still allocated.
    pub fn is_live(&self, id: RbcId) -> bool {
        self.nodes.get(id.index()).is_some_and(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_and_negation() {
        let rbc = RbcManager::new();
        assert_eq!(rbc.one().negate(), rbc.zero());
        assert_eq!(rbc.not(rbc.zero()), rbc.one());
    }

    #[test]
    fn and_simplifications() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);

        assert_eq!(rbc.and(v1, v1, false), v1);
        let nv1 = rbc.not(v1);
        assert_eq!(rbc.and(v1, nv1, false), rbc.zero());
        let zero = rbc.zero();
        assert_eq!(rbc.and(v1, zero, false), rbc.zero());
        let one = rbc.one();
        assert_eq!(rbc.and(one, v1, false), v1);
        assert_eq!(rbc.and(v1, one, true), nv1);
    }

    #[test]
    fn and_absorption() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let conj = rbc.and(v1, v2, false);

        // AND(AND(x,y), x) = AND(x,y)
        assert_eq!(rbc.and(conj, v1, false), conj);
        // AND(AND(x,y), ~x) = F
        let nv1 = rbc.not(v1);
        assert_eq!(rbc.and(conj, nv1, false), rbc.zero());
        // AND(~AND(x,y), x) = AND(~y, x)
        let nconj = rbc.not(conj);
        let nv2 = rbc.not(v2);
        let expected = rbc.and(nv2, v1, false);
        assert_eq!(rbc.and(nconj, v1, false), expected);
    }

    #[test]
    fn and_is_canonical_under_swap() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let a = rbc.and(v1, v2, false);
        let b = rbc.and(v2, v1, false);
        assert_eq!(a, b);
    }

    #[test]
    fn iff_simplifications() {
        let mut rbc = RbcManager::new();
        let v2 = rbc.var(2);
        assert_eq!(rbc.iff(v2, v2, false), rbc.one());
        let nv2 = rbc.not(v2);
        assert_eq!(rbc.iff(v2, nv2, false), rbc.zero());
        let zero = rbc.zero();
        assert_eq!(rbc.iff(v2, zero, false), nv2);
        let one = rbc.one();
        assert_eq!(rbc.iff(one, v2, false), v2);
    }

    #[test]
    fn iff_lifts_negation() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let nv1 = rbc.not(v1);
        let nv2 = rbc.not(v2);

        // IFF(~x, y) == ~IFF(x, y), operands stored positive
        let plain = rbc.iff(v1, v2, false);
        let negated = rbc.iff(nv1, v2, false);
        assert_eq!(negated, plain.negate());
        let double = rbc.iff(nv1, nv2, false);
        assert_eq!(double, plain);
        assert!(!rbc.left_opnd(plain.node()).is_negated());
        assert!(!rbc.right_opnd(plain.node()).is_negated());
    }

    #[test]
    fn xor_is_negated_iff() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let iff = rbc.iff(v1, v2, false);
        let xor = rbc.xor(v1, v2, false);
        assert_eq!(xor, iff.negate());
    }

    #[test]
    fn ite_simplifications() {
        let mut rbc = RbcManager::new();
        let v3 = rbc.var(3);
        let v4 = rbc.var(4);
        let one = rbc.one();
        let zero = rbc.zero();

        assert_eq!(rbc.ite(one, v3, v4, false), v3);
        assert_eq!(rbc.ite(zero, v3, v4, false), v4);
        assert_eq!(rbc.ite(v3, v4, v4, false), v4);

        // ITE(i,i,e) == OR(i,e)
        let or = rbc.or(v3, v4, false);
        assert_eq!(rbc.ite(v3, v3, v4, false), or);

        // ITE(i,t,~t) == IFF(i,t)
        let nv4 = rbc.not(v4);
        let iff = rbc.iff(v3, v4, false);
        assert_eq!(rbc.ite(v3, v4, nv4, false), iff);
    }

    #[test]
    fn or_uses_de_morgan() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let or = rbc.or(v1, v2, false);
        assert!(or.is_negated(), "an OR is a negated AND");
        assert_eq!(rbc.sym(or.node()), Sym::And);
        let nv1 = rbc.not(v1);
        let nv2 = rbc.not(v2);
        assert_eq!(rbc.left_opnd(or.node()), nv1.min(nv2));
    }

    #[test]
    fn gc_sweeps_unmarked_vertices() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let dead = rbc.and(v1, v2, false);
        let live = rbc.iff(v1, v2, false);
        rbc.mark(live);
        rbc.gc();

        assert!(!rbc.is_live(dead.node()));
        assert!(rbc.is_live(live.node()));
        assert!(rbc.is_live(v1.node()), "variables survive collection");

        // a dead structure can be rebuilt afterwards
        let rebuilt = rbc.and(v1, v2, false);
        assert!(rbc.is_live(rebuilt.node()));
    }

    #[test]
    fn unmark_releases_protection() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let node = rbc.and(v1, v2, false);
        rbc.mark(node);
        rbc.unmark(node);
        rbc.gc();
        assert!(!rbc.is_live(node.node()));
    }
}
