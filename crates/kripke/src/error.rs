//! Error and warning values for the compilation pipeline.
//!
//! All fatal conditions are variants of [`CompileError`]; there is no local
//! recovery, the current command unwinds through `?`. Names and expressions
//! are rendered to strings at construction time so errors stay independent of
//! the node pool they came from.
//!
//! Warnings are values, not prints: phases push [`Warning`]s into the
//! compiler's [`Diagnostics`] sink and the caller decides what to do with
//! them (the CLI prints them to stderr).

use std::fmt;

use strum::IntoStaticStr;

/// Result type alias for operations that can fail compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Fatal compilation errors.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum CompileError {
    /// A name was declared twice.
    Redefined { name: String, line: u32 },
    /// A name was used but never declared.
    UndefinedSymbol { name: String, line: u32 },
    /// A define's body references the define itself, possibly transitively.
    CircularDefine { name: String },
    /// A module instantiates itself, possibly transitively.
    RecursiveModule { name: String },
    /// An undefined module was instantiated.
    UndefinedModule { name: String },
    /// `a..b` with `b < a`.
    EmptyRange { name: String, low: i64, high: i64 },
    /// Bounded temporal operator with a negative or reversed range.
    InvalidSubrange { low: i64, high: i64 },
    /// Scalar where boolean was expected, dot/array applied to a value, or a
    /// non-numeric operand of an arithmetic operator.
    TypeError { detail: String, line: u32 },
    /// A constant does not belong to the range of the variable it is
    /// assigned or compared into.
    RangeOutOfDomain { value: String, name: String },
    /// Determinisation would be needed but the caller forbade it.
    NondetNotAllowed { expr: String },
    /// A module instantiation received fewer actuals than formals.
    TooFewActuals { module: String },
    /// A module instantiation received more actuals than formals.
    TooManyActuals { module: String },
    /// The same formal parameter was bound twice.
    MultipleSubstitution { name: String },
    /// An atom is simultaneously a parameter, constant, or declared symbol.
    AmbiguousName { name: String, line: u32 },
}

impl CompileError {
    /// The error kind name, e.g. `"CircularDefine"`.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

fn at_line(f: &mut fmt::Formatter<'_>, line: u32) -> fmt::Result {
    if line != 0 {
        write!(f, " (line {line})")?;
    }
    Ok(())
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redefined { name, line } => {
                write!(f, "symbol \"{name}\" redefined")?;
                at_line(f, *line)
            }
            Self::UndefinedSymbol { name, line } => {
                write!(f, "undefined symbol \"{name}\"")?;
                at_line(f, *line)
            }
            Self::CircularDefine { name } => {
                write!(f, "recursively defined symbol \"{name}\"")
            }
            Self::RecursiveModule { name } => {
                write!(f, "module \"{name}\" is recursively defined")
            }
            Self::UndefinedModule { name } => write!(f, "undefined module \"{name}\""),
            Self::EmptyRange { name, low, high } => {
                write!(f, "empty range {low}..{high} for variable \"{name}\"")
            }
            Self::InvalidSubrange { low, high } => {
                write!(f, "invalid subrange {low}..{high} in bounded operator")
            }
            Self::TypeError { detail, line } => {
                write!(f, "type error, {detail}")?;
                at_line(f, *line)
            }
            Self::RangeOutOfDomain { value, name } => {
                write!(f, "value {value} is out of the range of \"{name}\"")
            }
            Self::NondetNotAllowed { expr } => {
                write!(f, "nondeterministic expression \"{expr}\" cannot be determinised here")
            }
            Self::TooFewActuals { module } => {
                write!(f, "too few actual parameters for module \"{module}\"")
            }
            Self::TooManyActuals { module } => {
                write!(f, "too many actual parameters for module \"{module}\"")
            }
            Self::MultipleSubstitution { name } => {
                write!(f, "multiple substitution for parameter \"{name}\"")
            }
            Self::AmbiguousName { name, line } => {
                write!(f, "ambiguous name \"{name}\"")?;
                at_line(f, *line)
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Non-fatal diagnostics produced during compilation.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum Warning {
    /// A single-valued range variable was registered as a constant define.
    EncodedAsConstant { name: String },
    /// The ordering file lists a name that is not a declared variable.
    NotDeclared { name: String },
    /// The ordering file lists the same variable twice.
    AppearsTwiceInOrderFile { name: String },
    /// Declared bits missing from the ordering file were appended.
    MissingVars { names: Vec<String> },
    /// A non-trivial constant INIT/INVAR/TRANS fragment was routed to the
    /// global-constraints slot.
    ConstantInConstraint { section: &'static str, expr: String, skipped: bool },
    /// A `running` symbol was already defined in the input; the input
    /// definition wins.
    AlreadyDefined { name: String },
    /// The model carries COMPASSION declarations, which only the BDD-based
    /// LTL back-end honours fully.
    CompassionPartiallySupported,
    /// PSL properties were emitted as comments in the flattened dump.
    PslNotFlattened,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodedAsConstant { name } => {
                write!(f, "variable {name} has been encoded as a constant")
            }
            Self::NotDeclared { name } => {
                write!(f, "ordering file lists \"{name}\", which is not a declared variable")
            }
            Self::AppearsTwiceInOrderFile { name } => {
                write!(f, "variable \"{name}\" appears twice in the ordering file")
            }
            Self::MissingVars { names } => {
                write!(f, "variables not listed in the ordering file were appended: ")?;
                let mut first = true;
                for name in names {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{name}")?;
                }
                Ok(())
            }
            Self::ConstantInConstraint { section, expr, skipped } => {
                write!(f, "constant expression \"{expr}\" found in a {section} statement")?;
                if *skipped {
                    write!(f, " (skipped)")?;
                }
                Ok(())
            }
            Self::AlreadyDefined { name } => {
                write!(f, "symbol \"{name}\" already defined; using the input definition")
            }
            Self::CompassionPartiallySupported => {
                write!(f, "COMPASSION declarations are only fully supported by BDD-based LTL")
            }
            Self::PslNotFlattened => {
                write!(f, "PSL properties are not flattened; dumped as comments")
            }
        }
    }
}

/// Warning sink owned by the compiler.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Removes and returns all collected warnings.
    pub fn drain(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        let err = CompileError::CircularDefine { name: "a".into() };
        assert_eq!(err.kind(), "CircularDefine");
        assert_eq!(err.to_string(), "recursively defined symbol \"a\"");
    }

    #[test]
    fn line_suffix_only_when_known() {
        let with = CompileError::UndefinedSymbol { name: "x".into(), line: 12 };
        let without = CompileError::UndefinedSymbol { name: "x".into(), line: 0 };
        assert_eq!(with.to_string(), "undefined symbol \"x\" (line 12)");
        assert_eq!(without.to_string(), "undefined symbol \"x\"");
    }
}
