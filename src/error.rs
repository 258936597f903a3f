//! Error type shared by every layer of the engine.

use thiserror::Error;

use crate::model::{PredId, RuleId};

/// Errors raised while building or running a materialization.
///
/// Shape and configuration errors are fatal: they indicate an unsupported
/// rule or a broken caller contract and are never retried. Empty results,
/// timeouts and value cycles are *not* errors and are reported through
/// [`crate::Materialization`] instead.
#[derive(Debug, Error)]
pub enum ReasonerError {
    /// A literal or fact does not have between 1 and 3 terms.
    #[error("unsupported arity {arity} for predicate {predicate}: expected 1 to 3 terms")]
    UnsupportedArity {
        /// Predicate of the offending literal
        predicate: PredId,
        /// Number of terms found
        arity: usize,
    },

    /// A rule violates a structural requirement.
    #[error("invalid rule {rule}: {message}")]
    InvalidRule {
        /// Id of the rule
        rule: RuleId,
        /// What is wrong with it
        message: String,
    },

    /// A compiled plan breaks one of its own invariants.
    #[error("malformed execution plan: {0}")]
    MalformedPlan(String),

    /// The join engine was asked to run a shape it does not implement.
    #[error("unsupported join shape: {0}")]
    UnsupportedJoinShape(String),

    /// Columns of a segment disagree on their length, or rows on their width.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Expected length or width
        expected: usize,
        /// Actual length or width
        found: usize,
    },

    /// A block was appended with an iteration lower than the last block's.
    #[error("block for iteration {iteration} appended after iteration {last}")]
    NonMonotonicBlock {
        /// Iteration of the rejected block
        iteration: usize,
        /// Iteration of the current last block
        last: usize,
    },

    /// The rule groups cannot be evaluated in the given order.
    #[error("stratification failed: {0}")]
    Stratification(String),

    /// A predicate name was referenced but never declared.
    #[error("unknown predicate `{0}`")]
    UnknownPredicate(String),

    /// The rule text could not be parsed.
    #[cfg(feature = "parsing")]
    #[error("parse error at line {line}: {message}")]
    Parse {
        /// One-based line of the failing statement
        line: usize,
        /// Parser message
        message: String,
    },

    /// The external fact store failed.
    #[error("fact store error: {0}")]
    Store(#[from] anyhow::Error),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A configuration document could not be read.
    #[cfg(feature = "serde")]
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T, E = ReasonerError> = std::result::Result<T, E>;
