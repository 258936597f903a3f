//! # Chainlog
//!
//! A semi-naive forward-chaining materialization engine for Datalog rules
//! over integer-encoded facts.
//!
//! ## Features
//!
//! - Per-rule execution plans with one delta pivot per derived body literal
//! - Stratum-by-stratum fixpoint with iteration-tagged, append-only tables
//! - Verificative, two-to-one, selective hash and sort-merge joins
//! - Columnar intermediate results with zero-copy views into the fact store
//! - Existential rules through a pluggable fresh-value generator
//!
//! ## Example
//!
//! ```rust
//! # #[cfg(feature = "parsing")]
//! # fn main() -> chainlog::Result<()> {
//! use chainlog::{Program, ReasonerConfig, SemiNaiver};
//!
//! let program = Program::parse(
//!     "parent(a, b). parent(b, c).
//!      anc(X, Y) :- parent(X, Y).
//!      anc(X, Z) :- parent(X, Y), anc(Y, Z).",
//! )?;
//! let mut reasoner = SemiNaiver::from_program(&program, ReasonerConfig::default())?;
//! let outcome = reasoner.run()?;
//! assert!(outcome.is_complete());
//!
//! let anc = program.predicate("anc")?.id();
//! assert_eq!(reasoner.facts(anc).len(), 3);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "parsing"))]
//! # fn main() {}
//! ```

/// Fresh values for existential variables.
pub mod chase;
/// Columns of term ids.
pub mod column;
/// Reasoner settings.
pub mod config;
/// Fact store interface and in-memory store.
pub mod edb;
/// Error type.
pub mod error;
/// Duplicate suppression.
pub mod filter;
/// Join strategies.
pub mod join;
/// Terms, literals and rules.
pub mod model;
/// Rule text parser.
#[cfg(feature = "parsing")]
pub mod parser;
/// Rule execution plans.
pub mod plan;
/// Worker pool.
pub mod pool;
/// Predicates, constants and rules by name.
pub mod program;
/// Columnar row sets.
pub mod segment;
/// Semi-naive driver.
pub mod seminaive;
/// Row consumers.
pub mod sink;
/// Rule groups.
pub mod stratify;
/// Iteration-tagged fact tables.
pub mod table;

pub use chase::{SkolemGenerator, ValueGenerator};
pub use column::{Column, ColumnBuilder};
pub use config::{ChaseStrategy, ReasonerConfig};
pub use edb::{EdbBuilder, EdbLayer, InMemoryEdb};
pub use error::{ReasonerError, Result};
pub use join::{FactSource, JoinExecutor, JoinStep, JoinStrategy};
pub use model::{Literal, PredId, Predicate, PredicateKind, Rule, RuleId, Term, TermId, VarId};
pub use plan::{RangeKind, RuleExecutionPlan};
pub use pool::WorkerPool;
pub use program::Program;
pub use segment::{Segment, SegmentBuilder};
pub use seminaive::{Materialization, MaterializationStatus, RuleStats, RuleStatus, SemiNaiver};
pub use sink::{HeadSink, Sink};
pub use stratify::Stratification;
pub use table::{IterationRange, Table};
