//! Append-only, iteration-tagged storage of derived facts.
//!
//! Each IDB predicate owns one [`Table`]. A rule firing appends at most one
//! block per head predicate; blocks are never modified or removed, and their
//! iterations never decrease, so a reader restricted to an
//! [`IterationRange`] sees exactly the blocks tagged inside it.

use std::cmp::Ordering;

use crate::error::{ReasonerError, Result};
use crate::model::{Literal, RuleId, TermId, Tuple};
use crate::pool::WorkerPool;
use crate::segment::Segment;

/// Half-open interval `[start, end)` of iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IterationRange {
    /// First iteration included
    pub start: usize,
    /// First iteration excluded
    pub end: usize,
}

impl IterationRange {
    /// Every iteration
    pub const ALL: IterationRange = IterationRange {
        start: 0,
        end: usize::MAX,
    };

    /// `[start, end)`
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// `[start, ∞)`
    #[must_use]
    pub fn since(start: usize) -> Self {
        Self {
            start,
            end: usize::MAX,
        }
    }

    /// `[0, end)`
    #[must_use]
    pub fn before(end: usize) -> Self {
        Self { start: 0, end }
    }

    /// Whether the iteration falls inside
    #[must_use]
    pub fn contains(&self, iteration: usize) -> bool {
        self.start <= iteration && iteration < self.end
    }

    /// Whether no iteration falls inside
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// An immutable, sorted and duplicate-free set of facts produced at one iteration
#[derive(Debug, Clone)]
pub struct Block {
    iteration: usize,
    rule: Option<RuleId>,
    segment: Segment,
}

impl Block {
    /// Iteration the block was derived at
    #[must_use]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Rule that derived the block
    #[must_use]
    pub fn rule(&self) -> Option<RuleId> {
        self.rule
    }

    /// The facts
    #[must_use]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    fn contains(&self, fact: &[TermId]) -> bool {
        let columns = self.segment.columns();
        let (mut lo, mut hi) = (0, self.segment.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let order = columns
                .iter()
                .zip(fact)
                .map(|(c, v)| c.get(mid).cmp(v))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal);
            match order {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return true,
            }
        }
        false
    }
}

/// The facts of one IDB predicate
#[derive(Debug, Clone)]
pub struct Table {
    arity: usize,
    blocks: Vec<Block>,
    rows: usize,
}

impl Table {
    /// Empty table for facts of the given arity
    #[must_use]
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            blocks: Vec::new(),
            rows: 0,
        }
    }

    /// Appends a block; empty segments are ignored.
    ///
    /// The segment must be sorted and duplicate-free, and disjoint from the
    /// blocks already stored.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] on a width other than the
    /// arity, and [`ReasonerError::NonMonotonicBlock`] when `iteration` is
    /// below the last block's.
    pub fn add_block(
        &mut self,
        iteration: usize,
        rule: Option<RuleId>,
        segment: Segment,
    ) -> Result<()> {
        if segment.width() != self.arity {
            return Err(ReasonerError::ShapeMismatch {
                expected: self.arity,
                found: segment.width(),
            });
        }
        if let Some(last) = self.max_iteration() {
            if iteration < last {
                return Err(ReasonerError::NonMonotonicBlock { iteration, last });
            }
        }
        if segment.is_empty() {
            return Ok(());
        }
        debug_assert!(segment.is_sorted(), "blocks must be sorted");
        self.rows += segment.len();
        self.blocks.push(Block {
            iteration,
            rule,
            segment,
        });
        Ok(())
    }

    /// Arity of the facts
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Total number of facts
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether the table holds no facts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// All blocks in append order
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Iteration of the newest block
    #[must_use]
    pub fn max_iteration(&self) -> Option<usize> {
        self.blocks.last().map(Block::iteration)
    }

    /// Whether some block was derived at `iteration` or later
    #[must_use]
    pub fn has_block_since(&self, iteration: usize) -> bool {
        self.max_iteration().is_some_and(|last| last >= iteration)
    }

    /// Blocks whose iteration falls in `range`
    #[must_use]
    pub fn read(&self, range: IterationRange) -> &[Block] {
        let start = self.blocks.partition_point(|b| b.iteration < range.start);
        let end = self.blocks.partition_point(|b| b.iteration < range.end);
        &self.blocks[start..end.max(start)]
    }

    /// Number of facts in `range` matching the literal's constants and
    /// repeated variables; exact when the literal needs filtering, otherwise
    /// the block sizes
    #[must_use]
    pub fn estimate_cardinality(&self, literal: &Literal, range: IterationRange) -> usize {
        let blocks = self.read(range);
        if !literal.needs_filtering() {
            return blocks.iter().map(|b| b.segment.len()).sum();
        }
        let mut fact = Vec::with_capacity(self.arity);
        blocks
            .iter()
            .map(|b| {
                (0..b.segment.len())
                    .filter(|&r| {
                        b.segment.row_into(r, &mut fact);
                        literal.matches(&fact)
                    })
                    .count()
            })
            .sum()
    }

    /// The literal's result over each block in `range`, one segment per
    /// non-empty block, columns laid out per variable position
    #[must_use]
    pub fn query(&self, literal: &Literal, range: IterationRange) -> Vec<Segment> {
        let positions: Vec<usize> = literal.var_positions().map(|(p, _)| p).collect();
        self.read(range)
            .iter()
            .filter_map(|b| {
                let seg = if literal.needs_filtering() {
                    let mut fact = Vec::with_capacity(self.arity);
                    b.segment.filter_rows(|r| {
                        b.segment.row_into(r, &mut fact);
                        literal.matches(&fact)
                    })
                } else {
                    b.segment.clone()
                };
                let seg = if positions.len() == self.arity {
                    seg
                } else if positions.is_empty() {
                    Segment::nullary(usize::from(!seg.is_empty()))
                } else {
                    seg.project(&positions)
                };
                (!seg.is_empty()).then_some(seg)
            })
            .collect()
    }

    /// Whether the fact is stored in some block
    #[must_use]
    pub fn contains(&self, fact: &[TermId]) -> bool {
        fact.len() == self.arity && self.blocks.iter().any(|b| b.contains(fact))
    }

    /// Rows of `segment` not stored in any block, sorted and duplicate-free.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] on a width other than the arity.
    pub fn retain(&self, segment: &Segment, pool: &WorkerPool) -> Result<Segment> {
        let mut fresh = segment.sort_unique(pool)?;
        if fresh.width() != self.arity {
            return Err(ReasonerError::ShapeMismatch {
                expected: self.arity,
                found: fresh.width(),
            });
        }
        for block in &self.blocks {
            if fresh.is_empty() {
                break;
            }
            fresh = fresh.merge_difference(&block.segment);
        }
        Ok(fresh)
    }

    /// Every fact in block order
    pub fn facts(&self) -> impl Iterator<Item = Tuple> + '_ {
        self.blocks.iter().flat_map(|b| b.segment.rows())
    }

    /// Every fact, sorted
    #[must_use]
    pub fn sorted_facts(&self) -> Vec<Vec<TermId>> {
        let mut out: Vec<Vec<TermId>> = self.facts().map(|t| t.to_vec()).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Whether two blocks share a fact; blocks are expected to be disjoint
    #[must_use]
    pub fn has_overlapping_blocks(&self) -> bool {
        self.blocks.iter().enumerate().any(|(i, a)| {
            self.blocks[i + 1..].iter().any(|b| {
                (0..b.segment.len()).any(|r| {
                    let row = b.segment.row(r);
                    a.contains(&row)
                })
            })
        })
    }
}
