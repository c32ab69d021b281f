//! Flattened model dump.
//!
//! Reproduces the input language with all hierarchy flattened away: one
//! `MODULE main` carrying `IVAR`/`VAR` declarations over qualified names,
//! the defines with their flattened bodies, the assignments, and the
//! constraint and property sections. Boolean variables are printed as
//! `: boolean;`, scalar ranges as `: {v1, v2};`.
//!
//! PSL properties are not flattened; they are dumped as comments for the
//! user's convenience, with a diagnostic.

use std::fmt::Write as _;

use crate::{
    compiler::Compiler,
    error::{CompileResult, Warning},
    flatten::{AssignKind, FlatHierarchy},
    intern::NodeId,
    symbols::Range,
};

impl Compiler {
    /// Renders the flattened model as input-language text.
    pub fn write_flattened(&mut self, hierarchy: &FlatHierarchy) -> CompileResult<String> {
        let mut out = String::new();
        out.push_str("-- Flattened model\n\nMODULE main\n");

        let mut inputs: Vec<NodeId> = self.symbols.input_vars().to_vec();
        inputs.extend_from_slice(self.symbols.determ_vars());
        self.write_vars(&mut out, &inputs, "IVAR");
        let state = self.symbols.state_vars().to_vec();
        self.write_vars(&mut out, &state, "VAR");
        self.write_defines(&mut out)?;
        self.write_assigns(&mut out);

        self.write_constraint(&mut out, hierarchy.init, "INIT");
        self.write_constraint(&mut out, hierarchy.invar, "INVAR");
        self.write_constraint(&mut out, hierarchy.trans, "TRANS");

        if hierarchy.compassion.is_empty() {
            for &justice in &hierarchy.justice {
                self.write_property(&mut out, justice, "FAIRNESS")?;
            }
        } else {
            for &justice in &hierarchy.justice {
                self.write_property(&mut out, justice, "JUSTICE")?;
            }
            for &(left, right) in &hierarchy.compassion {
                let left = self.flatten_sexp(left, None)?;
                let right = self.flatten_sexp(right, None)?;
                let _ = writeln!(
                    out,
                    "COMPASSION\n({}, {})\n",
                    self.pool.display(left),
                    self.pool.display(right)
                );
            }
        }

        for &spec in &hierarchy.specs {
            self.write_property(&mut out, spec, "SPEC")?;
        }
        for &compute in &hierarchy.compute {
            self.write_property(&mut out, compute, "COMPUTE")?;
        }
        for &ltl in &hierarchy.ltl_specs {
            self.write_property(&mut out, ltl, "LTLSPEC")?;
        }
        for &invar_spec in &hierarchy.invar_specs {
            self.write_property(&mut out, invar_spec, "INVARSPEC")?;
        }

        if !hierarchy.psl_specs.is_empty() {
            self.diagnostics.warn(Warning::PslNotFlattened);
            out.push_str(
                "--- Flattening of PSL properties is not supported.\n\
                 --- The properties are dumped below as they occurred in the model.\n",
            );
            for &psl in &hierarchy.psl_specs {
                let _ = writeln!(out, "--- PSLSPEC {}", self.pool.display(psl));
            }
        }
        Ok(out)
    }

    fn write_vars(&self, out: &mut String, vars: &[NodeId], section: &str) {
        if vars.is_empty() {
            return;
        }
        let _ = writeln!(out, "{section}");
        for &var in vars {
            match self.symbols.var_range(var) {
                Some(Range::Boolean) => {
                    let _ = writeln!(out, "{} : boolean;", self.pool.display(var));
                }
                Some(Range::Scalar(values)) => {
                    let values = values.clone();
                    let _ = write!(out, "{} : {{", self.pool.display(var));
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        let _ = write!(out, "{}", self.pool.display(*value));
                    }
                    out.push_str("};\n");
                }
                None => {}
            }
        }
        out.push('\n');
    }

    fn write_defines(&mut self, out: &mut String) -> CompileResult<()> {
        let defines = self.symbols.defines().to_vec();
        if defines.is_empty() {
            return Ok(());
        }
        out.push_str("DEFINE\n");
        for define in defines {
            let body = self.get_definition(define, true)?;
            let _ = writeln!(out, "{} := {};", self.pool.display(define), self.pool.display(body));
        }
        out.push('\n');
        Ok(())
    }

    fn write_assigns(&self, out: &mut String) {
        for var in self.symbols.model_vars().collect::<Vec<_>>() {
            let init = self.assigns.assign(var, AssignKind::Init);
            let invar = self.assigns.assign(var, AssignKind::Invar);
            let next = self.assigns.assign(var, AssignKind::Next);
            if init.is_none() && invar.is_none() && next.is_none() {
                continue;
            }
            out.push_str("ASSIGN\n");
            if let Some(rhs) = init {
                let _ = writeln!(out, "init({}) := {};", self.pool.display(var), self.pool.display(rhs));
            }
            if let Some(rhs) = invar {
                let _ = writeln!(out, "{} := {};", self.pool.display(var), self.pool.display(rhs));
            }
            if let Some(rhs) = next {
                let _ = writeln!(out, "next({}) := {};", self.pool.display(var), self.pool.display(rhs));
            }
            out.push('\n');
        }
    }

    fn write_constraint(&self, out: &mut String, expr: Option<NodeId>, section: &str) {
        let Some(expr) = expr else { return };
        let _ = writeln!(out, "{section}\n{}\n", self.pool.display(expr));
    }

    fn write_property(&mut self, out: &mut String, expr: NodeId, section: &str) -> CompileResult<()> {
        let flat = self.flatten_sexp(expr, None)?;
        let _ = writeln!(out, "{section}\n{}\n", self.pool.display(flat));
        Ok(())
    }
}
