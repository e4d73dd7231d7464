// Error taxonomy for the whole compilation pipeline.
//
// Every stage - reader, lowerer, emitter - returns `Result<_, CompileError>`.
// All errors are fatal to the compilation unit: there is no per-expression
// recovery, so a `CompileError` simply propagates with `?` until it reaches
// the CLI driver, which prints it and exits non-zero.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    // --- Syntactic (reader) ---
    #[error("unbalanced parentheses")]
    UnbalancedParens,

    #[error("empty program")]
    EmptyProgram,

    #[error("invalid character literal: {0}")]
    InvalidCharLiteral(String),

    #[error("trailing garbage after program: {0}")]
    TrailingGarbage(String),

    #[error("unterminated string literal")]
    UnterminatedString,

    // --- Type / semantic (lowering) ---
    #[error("invalid type expression: {0}")]
    InvalidType(String),

    #[error("void value used where a value is required: {0}")]
    VoidValue(String),

    #[error("incompatible pointer arithmetic: {0}")]
    BadPointerArith(String),

    #[error("cannot cast {src} to {dst}")]
    InvalidCast { src: String, dst: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("return type mismatch: function `{func}` declares {expected}, returned {found}")]
    ReturnTypeMismatch {
        func: String,
        expected: String,
        found: String,
    },

    #[error("undefined identifier: {0}")]
    UndefinedIdentifier(String),

    #[error("duplicate name in scope: {0}")]
    DuplicateName(String),

    #[error("duplicate function signature: {0}")]
    DuplicateFunction(String),

    #[error("`break` outside loop")]
    BreakOutsideLoop,

    #[error("`continue` outside loop")]
    ContinueOutsideLoop,

    #[error("`var` used outside a statement position: {0}")]
    VarNotAllowedHere(String),

    #[error("unknown form: {0}")]
    UnknownForm(String),

    #[error("malformed form `{form}`: {detail}")]
    MalformedForm { form: String, detail: String },

    // --- Unsupported (documented, not implemented) ---
    #[error("not implemented: {0}")]
    NotImplemented(String),

    // --- Emission (internal) ---
    #[error("internal emitter error: unknown opcode {0}")]
    UnknownOpcode(String),

    #[error("internal emitter error: invalid register combination: {0}")]
    InvalidRegisterCombination(String),

    #[error("internal emitter error: unresolved patch: {0}")]
    UnresolvedPatch(String),

    // --- Runtime / host collaborators ---
    #[error("failed to allocate executable memory: {0}")]
    AllocationFailed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type CompileResult<T> = Result<T, CompileError>;
