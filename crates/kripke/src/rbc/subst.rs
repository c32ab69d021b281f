//! Substitutions over reduced boolean circuits.
//!
//! Three flavours: variable-to-variable renaming, index shifting, and
//! variable-to-circuit substitution. All walk the DAG once with a cache and
//! rebuild every vertex through the ordinary constructors, so local
//! simplification applies again in the new context. Edge polarities survive
//! by xor across the recursion.

use ahash::AHashMap;

use super::{RbcManager, Ref, Sym};

enum Mode<'a> {
    /// `var i -> var map[i]`; indices outside the map stay put.
    Rename(&'a [u32]),
    /// `var i -> var i + k`.
    Shift(u32),
    /// `var i -> subst[i]`; indices outside the map stay put.
    Replace(&'a [Ref]),
}

impl RbcManager {
    /// Renames every variable through `map` (`var i` becomes
    /// `var map[i]`).
    pub fn subst(&mut self, f: Ref, map: &[u32]) -> Ref {
        let mut cache = AHashMap::new();
        self.map_ref(f, &Mode::Rename(map), &mut cache)
    }

    /// Adds `k` to every variable index.
    pub fn shift(&mut self, f: Ref, k: u32) -> Ref {
        let mut cache = AHashMap::new();
        self.map_ref(f, &Mode::Shift(k), &mut cache)
    }

    /// Replaces every variable by a whole circuit (`var i` becomes
    /// `subst[i]`).
    pub fn subst_rbc(&mut self, f: Ref, subst: &[Ref]) -> Ref {
        let mut cache = AHashMap::new();
        self.map_ref(f, &Mode::Replace(subst), &mut cache)
    }

    fn map_ref(
        &mut self,
        f: Ref,
        mode: &Mode<'_>,
        cache: &mut AHashMap<super::RbcId, Ref>,
    ) -> Ref {
        if let Some(&rebuilt) = cache.get(&f.node) {
            return rebuilt.with_sign(f.negated);
        }
        let rebuilt = match self.sym(f.node) {
            Sym::Top => self.one(),
            Sym::Var => {
                let index = self.var_index(f.node).expect("variable vertex");
                match mode {
                    Mode::Rename(map) => {
                        let target = map.get(index as usize).copied().unwrap_or(index);
                        self.var(target)
                    }
                    Mode::Shift(k) => self.var(index + k),
                    Mode::Replace(subst) => match subst.get(index as usize) {
                        Some(&replacement) => replacement,
                        None => self.var(index),
                    },
                }
            }
            Sym::And => {
                let (left, right) = (self.left_opnd(f.node), self.right_opnd(f.node));
                let left = self.map_ref(left, mode, cache);
                let right = self.map_ref(right, mode, cache);
                self.and(left, right, false)
            }
            Sym::Iff => {
                let (left, right) = (self.left_opnd(f.node), self.right_opnd(f.node));
                let left = self.map_ref(left, mode, cache);
                let right = self.map_ref(right, mode, cache);
                self.iff(left, right, false)
            }
            Sym::Ite => {
                let sons = self.sons(f.node).to_vec();
                let i = self.map_ref(sons[0], mode, cache);
                let t = self.map_ref(sons[1], mode, cache);
                let e = self.map_ref(sons[2], mode, cache);
                self.ite(i, t, e, false)
            }
        };
        cache.insert(f.node, rebuilt);
        rebuilt.with_sign(f.negated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rbc: &mut RbcManager) -> Ref {
        // (v1 & v2) <-> !v3
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let v3 = rbc.var(3);
        let conj = rbc.and(v1, v2, false);
        let nv3 = rbc.not(v3);
        rbc.iff(conj, nv3, false)
    }

    #[test]
    fn identity_substitution_is_identity() {
        let mut rbc = RbcManager::new();
        let f = sample(&mut rbc);
        let identity: Vec<u32> = (0..8).collect();
        assert_eq!(rbc.subst(f, &identity), f);
    }

    #[test]
    fn shift_composes_additively() {
        let mut rbc = RbcManager::new();
        let f = sample(&mut rbc);
        let once = rbc.shift(f, 2);
        let twice = rbc.shift(once, 3);
        let direct = rbc.shift(f, 5);
        assert_eq!(twice, direct);
    }

    #[test]
    fn renaming_composes() {
        let mut rbc = RbcManager::new();
        let f = sample(&mut rbc);
        // sigma maps 1,2,3 -> 4,5,6; tau maps 4,5,6 -> 7,8,9
        let sigma: Vec<u32> = vec![0, 4, 5, 6];
        let tau: Vec<u32> = vec![0, 1, 2, 3, 7, 8, 9];
        let composed: Vec<u32> = vec![0, 7, 8, 9];

        let step = rbc.subst(f, &sigma);
        let chained = rbc.subst(step, &tau);
        let direct = rbc.subst(f, &composed);
        assert_eq!(chained, direct);
    }

    #[test]
    fn replacement_simplifies_in_context() {
        let mut rbc = RbcManager::new();
        let v1 = rbc.var(1);
        let v2 = rbc.var(2);
        let conj = rbc.and(v1, v2, false);

        // v2 -> !v1 turns the conjunction into false
        let one = rbc.one();
        let nv1 = rbc.not(v1);
        let map = [one, v1, nv1];
        assert_eq!(rbc.subst_rbc(conj, &map), rbc.zero());
    }

    #[test]
    fn polarity_survives_substitution() {
        let mut rbc = RbcManager::new();
        let f = sample(&mut rbc);
        let nf = rbc.not(f);
        let identity: Vec<u32> = (0..8).collect();
        let mapped = rbc.subst(nf, &identity);
        assert_eq!(mapped, nf);
        assert_eq!(mapped.negate(), f);
    }
}
