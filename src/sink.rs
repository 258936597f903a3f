//! Row consumers.
//!
//! Joins push every produced row into a [`Sink`]. Intermediate steps write
//! into a [`SegmentBuilder`]; the last step of every plan of a firing writes
//! into one [`HeadSink`], which turns frontier rows into new head facts.

use indexmap::IndexMap;

use crate::chase::ValueGenerator;
use crate::config::ChaseStrategy;
use crate::error::{ReasonerError, Result};
use crate::filter::SatisfiedHeads;
use crate::model::{Literal, PredId, Rule, RuleId, Term, TermId, VarId};
use crate::pool::WorkerPool;
use crate::segment::{Segment, SegmentBuilder};
use crate::table::Table;

/// Consumer of fixed-width rows
pub trait Sink {
    /// Takes one row
    fn emit(&mut self, row: &[TermId]);

    /// Called once the producer is done
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Sink for SegmentBuilder {
    fn emit(&mut self, row: &[TermId]) {
        self.push_row(row);
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn emit(&mut self, row: &[TermId]) {
        (**self).emit(row);
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Where a head term takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadTerm {
    Constant(TermId),
    Frontier(usize),
    Existential(VarId),
}

/// Collects the frontier rows of one rule firing and projects them onto
/// the rule heads.
#[derive(Debug)]
pub struct HeadSink {
    rule: RuleId,
    heads: Vec<(PredId, Vec<HeadTerm>)>,
    head_literals: Vec<Literal>,
    frontier: Vec<VarId>,
    rows: SegmentBuilder,
}

impl HeadSink {
    /// Sink for the heads of `rule`; rows must follow the frontier layout
    #[must_use]
    pub fn new(rule: &Rule) -> Self {
        let frontier = rule.frontier_vars();
        let heads = rule
            .heads()
            .iter()
            .map(|h| {
                let terms = h
                    .terms()
                    .iter()
                    .map(|t| match t {
                        Term::Constant(c) => HeadTerm::Constant(*c),
                        Term::Variable(v) => frontier
                            .iter()
                            .position(|f| f == v)
                            .map_or(HeadTerm::Existential(*v), HeadTerm::Frontier),
                    })
                    .collect();
                (h.pred_id(), terms)
            })
            .collect();
        Self {
            rule: rule.id(),
            heads,
            head_literals: rule.heads().to_vec(),
            rows: SegmentBuilder::new(frontier.len()),
            frontier,
        }
    }

    /// Rows received so far, duplicates included
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing was received
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// New facts per head predicate: each segment sorted, duplicate-free
    /// and disjoint from the predicate's table. Existential positions are
    /// filled by `generator`; under the restricted chase a frontier row whose
    /// single head is already satisfied mints nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::UnknownPredicate`] when a head predicate has
    /// no table.
    pub fn finish(
        self,
        tables: &IndexMap<PredId, Table>,
        generator: &mut dyn ValueGenerator,
        chase: ChaseStrategy,
        pool: &WorkerPool,
    ) -> Result<Vec<(PredId, Segment)>> {
        if self.rows.is_empty() {
            return Ok(Vec::new());
        }
        let frontier_rows = self.rows.finish().sort_unique(pool)?;
        let existential = self
            .heads
            .iter()
            .any(|(_, terms)| terms.iter().any(|t| matches!(t, HeadTerm::Existential(_))));
        let satisfied = match (chase, existential, self.head_literals.as_slice()) {
            (ChaseStrategy::Restricted, true, [head]) => {
                let table = table_of(tables, head.pred_id())?;
                Some(SatisfiedHeads::new(head, &self.frontier, table))
            }
            _ => None,
        };

        let mut outputs: IndexMap<PredId, SegmentBuilder> = IndexMap::new();
        let mut frontier = Vec::with_capacity(frontier_rows.width());
        let mut fact = Vec::with_capacity(3);
        for r in 0..frontier_rows.len() {
            frontier_rows.row_into(r, &mut frontier);
            if satisfied.as_ref().is_some_and(|s| s.is_satisfied(&frontier)) {
                continue;
            }
            let mut minted: Vec<(VarId, TermId)> = Vec::new();
            for (pred, terms) in &self.heads {
                fact.clear();
                for term in terms {
                    let value = match *term {
                        HeadTerm::Constant(c) => c,
                        HeadTerm::Frontier(slot) => frontier[slot],
                        HeadTerm::Existential(var) => {
                            if let Some((_, v)) = minted.iter().find(|(x, _)| *x == var) {
                                *v
                            } else {
                                let v = generator.generate(self.rule, var, &frontier);
                                minted.push((var, v));
                                v
                            }
                        }
                    };
                    fact.push(value);
                }
                outputs
                    .entry(*pred)
                    .or_insert_with(|| SegmentBuilder::new(terms.len()))
                    .push_row(&fact);
            }
        }

        let mut fresh = Vec::with_capacity(outputs.len());
        for (pred, builder) in outputs {
            let table = table_of(tables, pred)?;
            let segment = table.retain(&builder.finish(), pool)?;
            if !segment.is_empty() {
                fresh.push((pred, segment));
            }
        }
        Ok(fresh)
    }
}

impl Sink for HeadSink {
    fn emit(&mut self, row: &[TermId]) {
        self.rows.push_row(row);
    }
}

fn table_of(tables: &IndexMap<PredId, Table>, pred: PredId) -> Result<&Table> {
    tables
        .get(&pred)
        .ok_or_else(|| ReasonerError::UnknownPredicate(format!("p{pred}")))
}
