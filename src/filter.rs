//! Duplicate suppression.
//!
//! Three filters keep a firing from re-deriving what is already known:
//! [`SelfFilter`] drops a join output whose head fact is the very fact the
//! last body literal just read, [`FilteringSink`] drops frontier rows whose
//! head fact is already stored, and [`SatisfiedHeads`] implements the
//! restricted-chase check for existential rules.

use indexmap::IndexSet;

use crate::model::{Literal, Rule, Term, TermId, Tuple, VarId};
use crate::sink::Sink;
use crate::table::Table;

/// A value taken from a join output row, the right-hand row or a constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Fixed value
    Const(TermId),
    /// Column of the produced row
    Output(usize),
    /// Column of the right-hand literal row
    Right(usize),
}

impl Operand {
    fn value(self, output: &[TermId], right: &[TermId]) -> TermId {
        match self {
            Operand::Const(c) => c,
            Operand::Output(i) => output[i],
            Operand::Right(i) => right[i],
        }
    }
}

/// Recognises outputs that re-derive the fact read by the last literal
///
/// Holds one `(head value, literal value)` pair per term position of a head
/// that shares its predicate with the plan's last literal. When every pair
/// agrees, the derived fact is the one just read and is already stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfFilter {
    checks: Vec<(Operand, Operand)>,
}

impl SelfFilter {
    /// Filter from per-position operand pairs
    #[must_use]
    pub fn new(checks: Vec<(Operand, Operand)>) -> Self {
        Self { checks }
    }

    /// Whether the output row re-derives the right-hand fact
    #[must_use]
    pub fn rejects(&self, output: &[TermId], right: &[TermId]) -> bool {
        self.checks
            .iter()
            .all(|(h, l)| h.value(output, right) == l.value(output, right))
    }
}

/// Head facts of a single-head rule without existential variables, checked
/// against the head predicate's table
#[derive(Debug)]
pub struct ExistingFacts<'a> {
    head: Vec<Operand>,
    table: &'a Table,
}

impl<'a> ExistingFacts<'a> {
    /// Filter for `rule`, if it has a single head without existential variables
    #[must_use]
    pub fn for_rule(rule: &Rule, table: &'a Table) -> Option<Self> {
        let [head] = rule.heads() else {
            return None;
        };
        let frontier = rule.frontier_vars();
        let operands = head
            .terms()
            .iter()
            .map(|t| match t {
                Term::Constant(c) => Some(Operand::Const(*c)),
                Term::Variable(v) => frontier.iter().position(|f| f == v).map(Operand::Output),
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            head: operands,
            table,
        })
    }

    /// Whether the head fact for this frontier row is stored
    #[must_use]
    pub fn contains(&self, frontier_row: &[TermId], buffer: &mut Vec<TermId>) -> bool {
        buffer.clear();
        buffer.extend(self.head.iter().map(|op| op.value(frontier_row, &[])));
        self.table.contains(buffer)
    }
}

/// Forwards rows whose head fact is not stored yet
#[derive(Debug)]
pub struct FilteringSink<'a, S> {
    inner: S,
    existing: ExistingFacts<'a>,
    buffer: Vec<TermId>,
    dropped: usize,
}

impl<'a, S: Sink> FilteringSink<'a, S> {
    /// Wraps `inner`
    pub fn new(inner: S, existing: ExistingFacts<'a>) -> Self {
        Self {
            inner,
            existing,
            buffer: Vec::with_capacity(3),
            dropped: 0,
        }
    }

    /// Number of rows dropped
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// The wrapped sink
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Sink> Sink for FilteringSink<'_, S> {
    fn emit(&mut self, row: &[TermId]) {
        if self.existing.contains(row, &mut self.buffer) {
            self.dropped += 1;
        } else {
            self.inner.emit(row);
        }
    }

    fn flush(&mut self) -> crate::Result<()> {
        if self.dropped > 0 {
            log::trace!("Dropped {} already known head facts", self.dropped);
        }
        self.inner.flush()
    }
}

/// Index answering whether an existential head is already satisfied
///
/// A head is satisfied for a frontier row when some stored fact agrees with
/// it on every position that is not existential, and holds equal values
/// wherever one existential variable occurs twice.
#[derive(Debug)]
pub struct SatisfiedHeads {
    bound: Vec<(usize, Operand)>,
    known: IndexSet<Tuple>,
}

impl SatisfiedHeads {
    /// Index over the facts of `head`'s table
    #[must_use]
    pub fn new(head: &Literal, frontier: &[VarId], table: &Table) -> Self {
        let mut bound = Vec::new();
        let mut existential: Vec<(usize, VarId)> = Vec::new();
        for (pos, term) in head.terms().iter().enumerate() {
            match term {
                Term::Constant(c) => bound.push((pos, Operand::Const(*c))),
                Term::Variable(v) => match frontier.iter().position(|f| f == v) {
                    Some(slot) => bound.push((pos, Operand::Output(slot))),
                    None => existential.push((pos, *v)),
                },
            }
        }
        let consistent = |fact: &[TermId]| {
            existential.iter().all(|(p, v)| {
                existential
                    .iter()
                    .filter(|(_, w)| w == v)
                    .all(|(q, _)| fact[*p] == fact[*q])
            })
        };
        let known = table
            .facts()
            .filter(|fact| consistent(fact))
            .map(|fact| bound.iter().map(|(p, _)| fact[*p]).collect())
            .collect();
        Self { bound, known }
    }

    /// Whether the head instantiated with `frontier_row` is already satisfied
    #[must_use]
    pub fn is_satisfied(&self, frontier_row: &[TermId]) -> bool {
        let key: Tuple = self
            .bound
            .iter()
            .map(|(_, op)| op.value(frontier_row, &[]))
            .collect();
        self.known.contains(&key)
    }
}
