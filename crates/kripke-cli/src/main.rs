//! Demo driver for the kripke compilation pipeline.
//!
//! Assembles a two-process counter model through the public AST builder,
//! compiles it end to end, and prints the flattened model followed by CNF
//! statistics for the SAT path. An optional argument names a variable
//! ordering file applied before encoding statistics are reported.

use std::{env, fs, process::ExitCode};

use kripke::{Compiler, ModuleBuilder, NodeTag, RbcManager, RbcVarMap, types};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let order_file = args.get(1).cloned();

    let mut c = Compiler::new();
    build_demo_model(&mut c);

    let root = c.pool.atom("main");
    let flat = match c.flatten_hierarchy(root, None, None) {
        Ok(flat) => flat,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = c.encode_vars() {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    if let Err(err) = c.partition_constraints(&flat) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    if let Some(path) = order_file {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("error: cannot read {path}: {err}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(err) = c.sort_bool_vars(&text) {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    }

    let dump = match c.write_flattened(&flat) {
        Ok(dump) => dump,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    print!("{dump}");

    match compile_sat_path(&mut c, &flat) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    }

    for warning in c.diagnostics.drain() {
        eprintln!("warning: {warning}");
    }
    ExitCode::SUCCESS
}

/// Two counter processes over a shared variable, with one property.
fn build_demo_model(c: &mut Compiler) {
    // MODULE cell(x)
    //   ASSIGN next(x) := (x + 1) mod 4;
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

    // MODULE main
    //   VAR v : 0..3;  b : boolean;
    //   VAR p1 : process cell(v);  p2 : process cell(v);
    //   ASSIGN init(v) := 0;
    //   INVAR b -> v = 0
    //   SPEC AG v <= 3
    let mut main = ModuleBuilder::new(&mut c.pool, "main");
    let v = c.pool.atom("v");
    let range = types::range(&mut c.pool, 0, 3);
    main.var(&mut c.pool, v, range);
    let b = c.pool.atom("b");
    let boolean = types::boolean(&mut c.pool);
    main.var(&mut c.pool, b, boolean);
    for inst in ["p1", "p2"] {
        let inst = c.pool.atom(inst);
        let process = types::process(&mut c.pool, "cell", &[v]);
        main.var(&mut c.pool, inst, process);
    }
    let init_v = c.pool.init_of(v);
    let zero = c.pool.number(0);
    main.assign(&mut c.pool, init_v, zero);
    let v_is_zero = c.pool.binary(NodeTag::Equal, v, zero);
    let coupling = c.pool.binary(NodeTag::Implies, b, v_is_zero);
    main.invar(&mut c.pool, coupling);
    let three = c.pool.number(3);
    let bounded = c.pool.binary(NodeTag::Le, v, three);
    let spec = c.pool.unary(NodeTag::Ag, bounded);
    main.spec(&mut c.pool, spec);
    let main = main.build(&mut c.pool);

    c.add_module(cell).expect("fresh module table");
    c.add_module(main).expect("fresh module table");
}

/// Booleanises the machine, converts it to circuits, and reports CNF sizes.
fn compile_sat_path(c: &mut Compiler, flat: &kripke::FlatHierarchy) -> kripke::CompileResult<()> {
    let vars: Vec<_> = c.symbols.model_vars().collect();
    let fsm = c.build_fsm(&vars, &flat.justice, &[], true)?;

    let map = RbcVarMap::from_symbols(&c.symbols);
    let mut rbc = RbcManager::new();
    println!("-- SAT path statistics");
    for (section, expr) in [("INIT", fsm.init()), ("INVAR", fsm.invar()), ("TRANS", fsm.trans())] {
        let Some(expr) = expr else {
            println!("-- {section}: true");
            continue;
        };
        let circuit = c.bexpr_to_rbc(&mut rbc, &map, expr)?;
        let cnf = rbc.to_cnf(circuit);
        println!(
            "-- {section}: {} clauses, {} variables, root literal {}",
            cnf.clauses.len(),
            cnf.max_var,
            cnf.root,
        );
    }
    Ok(())
}
