// diag.rs — Error kinds, warnings, and call-stack capture
//
// One sum type covers every failure the pipeline can signal. Undefinedness
// (`CompileError::Undefined`) is the only recoverable kind: evaluator and
// flattener catch it as close to the failing operation as a default applies
// (boolean contexts become false, other contexts take the type's dummy value
// with a poisoned definedness witness). Everything else propagates with `?`
// to the driver.

use std::fmt;

use crate::ast::Location;
use crate::val::ArithError;

/// Warning buffer cap; one terminal entry reports suppression beyond it.
pub const MAX_WARNINGS: usize = 20;
/// Call-stack frames kept per warning or error report.
pub const MAX_STACK_FRAMES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Static semantics violated during evaluation. Not expected after
    /// type checking; an internal error if it reaches the driver.
    Eval { loc: Location, msg: String },
    /// Well-defined runtime undefinedness (division by zero, out-of-bounds
    /// access, `deopt(<>)`, failed constraint in a let). Recovered locally.
    Undefined { loc: Location, msg: String },
    /// Structural type mismatch, e.g. a record-merge collision. Fatal.
    Type { loc: Location, msg: String },
    /// Invalid infinity arithmetic, or a value that cannot be materialized
    /// (a bignum where a machine-sized index is required). Fatal.
    Arith { loc: Location, msg: String },
    /// Rewriting failure (missing reified predicate, duplicate solve item).
    Flattening { loc: Location, msg: String },
    /// Lexical or structural error in JSON data input.
    Json { loc: Location, msg: String },
    /// Raised by `fail()`; caught at the top of flattening so the post-fail
    /// skeleton can still be produced.
    ModelInconsistent,
    /// Externally requested stop.
    Cancelled,
}

impl CompileError {
    pub fn undefined(loc: Location, msg: impl Into<String>) -> Self {
        CompileError::Undefined {
            loc,
            msg: msg.into(),
        }
    }

    pub fn eval(loc: Location, msg: impl Into<String>) -> Self {
        CompileError::Eval {
            loc,
            msg: msg.into(),
        }
    }

    pub fn type_error(loc: Location, msg: impl Into<String>) -> Self {
        CompileError::Type {
            loc,
            msg: msg.into(),
        }
    }

    pub fn flattening(loc: Location, msg: impl Into<String>) -> Self {
        CompileError::Flattening {
            loc,
            msg: msg.into(),
        }
    }

    pub fn json(loc: Location, msg: impl Into<String>) -> Self {
        CompileError::Json {
            loc,
            msg: msg.into(),
        }
    }

    /// Attach a location to an arithmetic failure from the value layer.
    pub fn arith(loc: Location, err: ArithError) -> Self {
        CompileError::Arith {
            loc,
            msg: err.0.to_string(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, CompileError::Undefined { .. })
    }

    pub fn loc(&self) -> Option<&Location> {
        match self {
            CompileError::Eval { loc, .. }
            | CompileError::Undefined { loc, .. }
            | CompileError::Type { loc, .. }
            | CompileError::Arith { loc, .. }
            | CompileError::Flattening { loc, .. }
            | CompileError::Json { loc, .. } => Some(loc),
            _ => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Eval { loc, msg } => write!(f, "{loc}: evaluation error: {msg}"),
            CompileError::Undefined { loc, msg } => write!(f, "{loc}: undefined result: {msg}"),
            CompileError::Type { loc, msg } => write!(f, "{loc}: type error: {msg}"),
            CompileError::Arith { loc, msg } => write!(f, "{loc}: arithmetic error: {msg}"),
            CompileError::Flattening { loc, msg } => write!(f, "{loc}: flattening error: {msg}"),
            CompileError::Json { loc, msg } => write!(f, "{loc}: JSON error: {msg}"),
            CompileError::ModelInconsistent => write!(f, "model inconsistency detected"),
            CompileError::Cancelled => write!(f, "compilation cancelled"),
        }
    }
}

impl std::error::Error for CompileError {}

pub type Result<T> = std::result::Result<T, CompileError>;

// ── Warnings ────────────────────────────────────────────────────────────────

/// One frame of the recorded call stack at warning time.
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub desc: String,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub msg: String,
    pub loc: Location,
    /// Innermost first, truncated to `MAX_STACK_FRAMES`.
    pub stack: Vec<StackFrame>,
}

impl Warning {
    pub fn new(loc: Location, msg: impl Into<String>) -> Self {
        Warning {
            msg: msg.into(),
            loc,
            stack: Vec::new(),
        }
    }

    pub fn with_stack(mut self, frames: impl IntoIterator<Item = StackFrame>) -> Self {
        self.stack = frames.into_iter().take(MAX_STACK_FRAMES).collect();
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: warning: {}", self.loc, self.msg)?;
        for frame in &self.stack {
            write!(f, "\n  in {} ({})", frame.desc, frame.loc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_is_the_only_recoverable_kind() {
        let loc = Location::unknown();
        assert!(CompileError::undefined(loc.clone(), "x").is_undefined());
        assert!(!CompileError::eval(loc.clone(), "x").is_undefined());
        assert!(!CompileError::ModelInconsistent.is_undefined());
    }

    #[test]
    fn display_includes_location() {
        let loc = Location::new("m.tn".into(), 3, 7);
        let e = CompileError::undefined(loc, "division by zero");
        assert_eq!(format!("{e}"), "m.tn:3.7: undefined result: division by zero");
    }

    #[test]
    fn warning_stack_is_capped() {
        let loc = Location::unknown();
        let frames = (0..40).map(|i| StackFrame {
            desc: format!("call {i}"),
            loc: Location::unknown(),
        });
        let w = Warning::new(loc, "deep").with_stack(frames);
        assert_eq!(w.stack.len(), MAX_STACK_FRAMES);
    }
}
