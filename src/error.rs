//! Error taxonomy shared by every stage of operator synthesis.
//!
//! Candidate-local failures (syntax, transform, compile, validation, missing
//! dependency) are discarded by the generator and never reach the registry.
//! Evaluation failures stay local to one expression.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("parameter `{0}` is never used by the compute procedure")]
    UnusedParameter(String),

    #[error("procedure is a pass-through to a single operator")]
    TrivialPassThrough,

    #[error("two branches return the same expression: {0}")]
    DuplicateReturn(String),

    #[error("procedure body duplicates operator {0}")]
    DuplicateBody(String),

    #[error("procedure is not executable on input {input}: {reason}")]
    NotExecutable { input: String, reason: String },

    #[error("requested order {expected}, computed order {actual}")]
    OrderMismatch { expected: u32, actual: u32 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("definition syntax error: {0}")]
    DefinitionSyntax(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("validation failure: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("operator {operator} depends on unregistered operator {dependency}")]
    DependencyMissing { operator: String, dependency: String },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("step budget exhausted while running {0}")]
    BudgetExhausted(String),

    #[error("base {base} is outside 2..={max}")]
    UnsupportedBase { base: u32, max: u32 },

    #[error("operator id {0} is already registered")]
    DuplicateId(String),

    #[error("symbol `{symbol}` is already registered as a {shape} operator")]
    SymbolConflict { symbol: String, shape: String },

    #[error("base {0} already has a literal prefix operator")]
    DuplicateBase(u32),

    #[error("unknown operator id {0}")]
    UnknownOperator(String),

    #[error("grammar error: {0}")]
    Grammar(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures that only invalidate the candidate being built.
    pub fn is_candidate_local(&self) -> bool {
        matches!(
            self,
            Error::DefinitionSyntax(_)
                | Error::Transform(_)
                | Error::Compile(_)
                | Error::Validation(_)
                | Error::DependencyMissing { .. }
                | Error::BudgetExhausted(_)
                | Error::Evaluation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
