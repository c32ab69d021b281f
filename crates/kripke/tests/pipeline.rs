//! End-to-end tests of the compilation pipeline: hierarchy flattening,
//! encoding, constraint partitioning, booleanisation, circuit construction,
//! and CNF emission.

use kripke::{
    AssignKind, Compiler, ModuleBuilder, NodeTag, RbcManager, RbcVarMap, Ref, Sym, VarSet, types,
};
use pretty_assertions::assert_eq;

/// Evaluates a circuit under an assignment of external variable indices.
fn eval_rbc(rbc: &RbcManager, r: Ref, assignment: &dyn Fn(u32) -> bool) -> bool {
    let value = match rbc.sym(r.node()) {
        Sym::Top => true,
        Sym::Var => assignment(rbc.var_index(r.node()).expect("variable vertex")),
        Sym::And => rbc.sons(r.node()).iter().all(|&s| eval_rbc(rbc, s, assignment)),
        Sym::Iff => {
            let sons = rbc.sons(r.node());
            eval_rbc(rbc, sons[0], assignment) == eval_rbc(rbc, sons[1], assignment)
        }
        Sym::Ite => {
            let sons = rbc.sons(r.node());
            if eval_rbc(rbc, sons[0], assignment) {
                eval_rbc(rbc, sons[1], assignment)
            } else {
                eval_rbc(rbc, sons[2], assignment)
            }
        }
    };
    value != r.is_negated()
}

fn clause_satisfied(clause: &[i32], values: &[bool]) -> bool {
    clause.iter().any(|&lit| {
        let var = lit.unsigned_abs() as usize;
        values[var] == (lit > 0)
    })
}

/// The Tseitin translation is equisatisfiable with the circuit: for every
/// assignment of the original variables, the circuit evaluates to true iff
/// there is an extension to the Tseitin variables satisfying all clauses
/// with the root literal asserted.
#[test]
fn cnf_is_equisatisfiable_with_the_circuit() {
    let mut rbc = RbcManager::new();
    let v1 = rbc.var(1);
    let v2 = rbc.var(2);
    let v3 = rbc.var(3);
    let conj = rbc.and(v1, v2, false);
    let nv3 = rbc.not(v3);
    let iff = rbc.iff(conj, nv3, false);
    let formula = rbc.ite(v3, iff, conj, false);

    let cnf = rbc.to_cnf(formula);
    let original_vars = 3usize;
    let max_var = usize::try_from(cnf.max_var).unwrap();
    let tseitin_vars = max_var - original_vars;

    for model in 0..(1u32 << original_vars) {
        let expected = eval_rbc(&rbc, formula, &|i| model & (1 << (i - 1)) != 0);

        let mut found = false;
        for extension in 0..(1u32 << tseitin_vars) {
            let mut values = vec![false; max_var + 1];
            for var in 1..=original_vars {
                values[var] = model & (1 << (var - 1)) != 0;
            }
            for (offset, var) in (original_vars + 1..=max_var).enumerate() {
                values[var] = extension & (1 << offset) != 0;
            }
            let all_clauses = cnf.clauses.iter().all(|c| clause_satisfied(c, &values));
            let root_var = cnf.root.unsigned_abs() as usize;
            let root_true = values[root_var] == (cnf.root > 0);
            if all_clauses && root_true {
                found = true;
                break;
            }
        }
        assert_eq!(found, expected, "model {model:03b}");
    }
}

/// Builds the two-process counter of the scheduling semantics and checks the
/// composed transition relation end to end.
#[test]
fn two_process_counter_compiles_to_cnf() {
    let mut c = Compiler::new();

    let mut cell = ModuleBuilder::new(&mut c.pool, "cell");
    cell.formal(&mut c.pool, "x");
    let x = c.pool.atom("x");
    let next_x = c.pool.next_of(x);
    let one = c.pool.number(1);
    let four = c.pool.number(4);
    let sum = c.pool.binary(NodeTag::Plus, x, one);
    let wrapped = c.pool.binary(NodeTag::Mod, sum, four);
    cell.assign(&mut c.pool, next_x, wrapped);
    let cell = cell.build(&mut c.pool);

    let mut main = ModuleBuilder::new(&mut c.pool, "main");
    let v = c.pool.atom("v");
    let range = types::range(&mut c.pool, 0, 3);
    main.var(&mut c.pool, v, range);
    for inst in ["p1", "p2"] {
        let inst = c.pool.atom(inst);
        let process = types::process(&mut c.pool, "cell", &[v]);
        main.var(&mut c.pool, inst, process);
    }
    let init_v = c.pool.init_of(v);
    let zero = c.pool.number(0);
    main.assign(&mut c.pool, init_v, zero);
    let main = main.build(&mut c.pool);

    c.add_module(cell).unwrap();
    c.add_module(main).unwrap();
    let root = c.pool.atom("main");
    let flat = c.flatten_hierarchy(root, None, None).unwrap();
    c.encode_vars().unwrap();
    c.partition_constraints(&flat).unwrap();

    // the composed next assignment guards each process by its running
    // condition, with inertia otherwise
    let v = {
        let atom = c.pool.atom("v");
        c.pool.dot(None, atom)
    };
    let composed = c.assigns().assign(v, AssignKind::Next).unwrap();
    assert_eq!(
        c.printed(composed),
        "case p2.running : (v + 1) mod 4; p1.running : (v + 1) mod 4; TRUE : v; esac",
    );

    let vars: Vec<_> = c.symbols.model_vars().collect();
    let fsm = c.build_fsm(&vars, &[], &[], true).unwrap();
    assert!(fsm.is_boolean());

    let map = RbcVarMap::from_symbols(&c.symbols);
    let mut rbc = RbcManager::new();
    let trans = fsm.trans().expect("boolean transition relation");
    let circuit = c.bexpr_to_rbc(&mut rbc, &map, trans).unwrap();
    let cnf = rbc.to_cnf(circuit);

    assert_ne!(cnf.root, i32::MAX, "the transition relation is not constant");
    assert!(!cnf.clauses.is_empty());
    // every clause literal is a registered variable or a Tseitin variable
    for clause in &cnf.clauses {
        assert!(!clause.is_empty());
        for &lit in clause {
            assert!(lit != 0 && lit.abs() <= cnf.max_var);
        }
    }
    // the selector bit of the scheduling variable shows up in the support
    let selector_bits: Vec<_> = vars
        .iter()
        .flat_map(|&var| c.encoding_bits(var))
        .filter_map(|bit| map.curr_index(bit))
        .collect();
    assert!(
        cnf.vars.iter().any(|&v| selector_bits.contains(&v.unsigned_abs())),
        "model variables reach the CNF variable list",
    );
}

/// Single-value ranges vanish from the variable lists and come back as
/// constant defines, visible through the whole pipeline.
#[test]
fn single_value_range_elision_end_to_end() {
    let mut c = Compiler::new();
    let mut m = ModuleBuilder::new(&mut c.pool, "main");
    let x = c.pool.atom("x");
    let range = types::range(&mut c.pool, 2, 2);
    m.var(&mut c.pool, x, range);
    let b = c.pool.atom("b");
    let boolean = types::boolean(&mut c.pool);
    m.var(&mut c.pool, b, boolean);
    // INVAR b -> x = 2 exercises the define through booleanisation
    let two = c.pool.number(2);
    let eq = c.pool.binary(NodeTag::Equal, x, two);
    let coupling = c.pool.binary(NodeTag::Implies, b, eq);
    m.invar(&mut c.pool, coupling);
    let module = m.build(&mut c.pool);
    c.add_module(module).unwrap();

    let root = c.pool.atom("main");
    let flat = c.flatten_hierarchy(root, None, None).unwrap();
    c.encode_vars().unwrap();
    c.partition_constraints(&flat).unwrap();

    let x = c.pool.dot(None, x);
    let b = c.pool.dot(None, b);
    assert!(!c.symbols.state_vars().contains(&x));
    assert!(c.symbols.is_define(x));

    let vars: Vec<_> = c.symbols.model_vars().collect();
    assert_eq!(vars, [b]);
    let fsm = c.build_fsm(&vars, &[], &[], true).unwrap();
    // x = 2 is constantly true once x is the constant 2
    let invar = fsm.var_invar(b).expect("b carries the invar fragment");
    assert_eq!(c.printed(invar), "b -> TRUE");
}

/// Dependency sets and the cone of influence agree across the pipeline.
#[test]
fn cone_of_influence_closes_over_assignments() {
    let mut c = Compiler::new();
    let mut m = ModuleBuilder::new(&mut c.pool, "main");
    let a = c.pool.atom("a");
    let b = c.pool.atom("b");
    let d = c.pool.atom("d");
    let boolean = types::boolean(&mut c.pool);
    m.var(&mut c.pool, a, boolean);
    let boolean = types::boolean(&mut c.pool);
    m.var(&mut c.pool, b, boolean);
    // DEFINE d := !b;  ASSIGN next(a) := d;
    let not_b = c.pool.not(b);
    m.define(&mut c.pool, d, not_b);
    let next_a = c.pool.next_of(a);
    m.assign(&mut c.pool, next_a, d);
    let module = m.build(&mut c.pool);
    c.add_module(module).unwrap();
    let root = c.pool.atom("main");
    c.flatten_hierarchy(root, None, None).unwrap();

    let a = c.pool.dot(None, a);
    let b = c.pool.dot(None, b);
    let coi = c.compute_coi(&VarSet::from([a])).unwrap();
    assert_eq!(coi, VarSet::from([a, b]), "a depends on b through the define");
}

/// Pushing and popping the symbol table around a derived alphabet restores
/// every enumeration.
#[test]
fn push_pop_survives_a_tableau_round() {
    let mut c = Compiler::new();
    let mut m = ModuleBuilder::new(&mut c.pool, "main");
    let y = c.pool.atom("y");
    let range = types::range(&mut c.pool, 0, 3);
    m.var(&mut c.pool, y, range);
    let module = m.build(&mut c.pool);
    c.add_module(module).unwrap();
    let root = c.pool.atom("main");
    c.flatten_hierarchy(root, None, None).unwrap();
    c.encode_vars().unwrap();

    let state_before = c.symbols.state_vars().to_vec();
    let bools_before = c.symbols.state_bool_vars().to_vec();
    let constants_before: Vec<_> = c.symbols.constants().collect();
    let groups_before = c.symbols.state_groups().clone();

    c.symbols.push_status_and_reset();
    let t = {
        let atom = c.pool.atom("_ltl0_");
        c.pool.dot(None, atom)
    };
    c.symbols.declare_state_var(&c.pool, t, kripke::Range::Boolean).unwrap();
    assert_eq!(c.symbols.state_vars(), [t]);
    c.symbols.pop_status();

    assert_eq!(c.symbols.state_vars(), state_before);
    assert_eq!(c.symbols.state_bool_vars(), bools_before);
    assert_eq!(c.symbols.constants().collect::<Vec<_>>(), constants_before);
    assert_eq!(c.symbols.state_groups(), &groups_before);
    assert!(!c.symbols.is_declared(t));
}
