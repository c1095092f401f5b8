//! Error kinds raised during compilation and the non-local unwind they drive.
//!
//! The original engine this crate's behavior is modeled on raises errors with
//! a C `setjmp`/`longjmp` pair at the top of each parse, then walks the saved
//! context chain freeing every level's paged stream and literal pool. In safe
//! Rust the idiomatic equivalent is ordinary `Result` propagation: every
//! fallible step in [`crate::parser`] and [`crate::classify`] returns
//! `Result<_, Error>`, and `?` unwinds the call stack one frame at a time,
//! running `Drop` for that frame's owned resources exactly as the original's
//! chain-unwind routine did by hand.

/// The kinds of compile error this crate raises, matching spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("maximum number of literals reached")]
    LiteralLimitReached,
    #[error("maximum stack depth reached")]
    StackLimitReached,
    #[error("maximum number of registers reached")]
    RegisterLimitReached,
    #[error("identifier expected")]
    IdentifierExpected,
    #[error("')' expected")]
    RightParenExpected,
    #[error("'{{' expected")]
    LeftBraceExpected,
    #[error("argument list expected")]
    ArgumentListExpected,
    #[error("no arguments expected")]
    NoArgumentsExpected,
    #[error("exactly one argument expected")]
    OneArgumentExpected,
    #[error("argument definition is not allowed in non-strict mode here")]
    NonStrictArgDefinition,
    #[error("duplicated argument names are not allowed")]
    DuplicatedArgumentNames,
    #[error("formal parameter after rest parameter")]
    FormalParamAfterRestParameter,
    #[error("rest parameter cannot have a default initializer")]
    RestParameterDefaultInitializer,
    #[error("illegal break or continue outside a loop")]
    IllegalBreakOrContinue,
    #[error("invalid left-hand side in assignment")]
    InvalidAssignmentTarget,
    #[error("unexpected token")]
    UnexpectedToken,
}

/// A fatal compile error together with the offending token's source position.
///
/// Every error is fatal to the current compile (spec.md §7 policy); there is
/// no local recovery. The caller receives this in place of a `CompiledCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at line {line}, column {column}")]
pub struct ParseError {
    pub kind: ErrorKind,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    #[must_use]
    pub fn new(kind: ErrorKind, line: u32, column: u32) -> Self {
        Self { kind, line, column }
    }
}

/// Convenience alias used throughout the compiler.
pub type Result<T> = std::result::Result<T, ParseError>;
