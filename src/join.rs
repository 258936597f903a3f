//! Join execution.
//!
//! A join step combines the intermediate result of a plan (the *left* side)
//! with the matches of one body literal (the *right* side). Every row pair
//! that agrees on the step's coordinates produces one output row assembled
//! from the carry-forward maps.
//!
//! Four strategies exist and [`JoinExecutor::choose`] picks one per step:
//!
//! * **verificative**: one coordinate and nothing read from the right, so the
//!   step is a semi-join answered by intersecting key sets, or by probing the
//!   fact store with the key batch;
//! * **two-to-one**: one coordinate, nothing carried from the left and one
//!   right column out, answered by a single merge pass over `(key, value)`;
//! * **selective hash**: a small left side and one or two coordinates; each
//!   distinct key is substituted into the literal and queried on its own;
//! * **sort-merge**: the general case.

use std::cmp::Ordering;
use std::ops::Range;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::column::{Column, ColumnBuilder};
use crate::config::ReasonerConfig;
use crate::edb::EdbLayer;
use crate::error::{ReasonerError, Result};
use crate::filter::SelfFilter;
use crate::model::{Literal, PredId, TermId, VarId};
use crate::plan::PlanStep;
use crate::pool::WorkerPool;
use crate::segment::{Segment, SegmentBuilder};
use crate::sink::Sink;
use crate::table::{IterationRange, Table};

/// Read access to every fact the engine knows about
#[derive(Debug, Clone, Copy)]
pub struct FactSource<'a> {
    tables: &'a IndexMap<PredId, Table>,
    edb: &'a dyn EdbLayer,
}

impl<'a> FactSource<'a> {
    /// Facts from the derived tables and the fact store
    #[must_use]
    pub fn new(tables: &'a IndexMap<PredId, Table>, edb: &'a dyn EdbLayer) -> Self {
        Self { tables, edb }
    }

    /// The fact store
    #[must_use]
    pub fn edb(&self) -> &'a dyn EdbLayer {
        self.edb
    }

    /// The derived tables
    #[must_use]
    pub fn tables(&self) -> &'a IndexMap<PredId, Table> {
        self.tables
    }

    /// Matches of `literal` in `range`, one column per variable position.
    /// Store answers come as one segment sorted on `sort_by`; derived facts
    /// come as one unsorted segment per block.
    ///
    /// # Errors
    ///
    /// Propagates fact-store failures.
    pub fn segments(
        &self,
        literal: &Literal,
        range: IterationRange,
        sort_by: &[usize],
    ) -> Result<Vec<Segment>> {
        if literal.is_edb() {
            let segment = self.edb.query(literal, sort_by)?;
            return Ok(if segment.is_empty() {
                Vec::new()
            } else {
                vec![segment]
            });
        }
        Ok(self
            .tables
            .get(&literal.pred_id())
            .map(|t| t.query(literal, range))
            .unwrap_or_default())
    }

    /// Estimated number of matches of `literal` in `range`
    #[must_use]
    pub fn estimate(&self, literal: &Literal, range: IterationRange) -> usize {
        if literal.is_edb() {
            return self.edb.estimate_cardinality(literal);
        }
        self.tables
            .get(&literal.pred_id())
            .map_or(0, |t| t.estimate_cardinality(literal, range))
    }

    /// Matches of `literal` with some variables bound, laid out like the
    /// unbound literal: bound columns come back as constant columns.
    ///
    /// # Errors
    ///
    /// Propagates fact-store failures.
    pub fn bound_segments(
        &self,
        literal: &Literal,
        bindings: &[(VarId, TermId)],
        range: IterationRange,
    ) -> Result<Vec<Segment>> {
        let bound = literal.substitute(bindings);
        self.segments(&bound, range, &[])?
            .into_iter()
            .map(|seg| {
                let mut free = 0;
                let columns = literal
                    .var_positions()
                    .map(|(_, v)| match bindings.iter().find(|(b, _)| *b == v) {
                        Some((_, value)) => Column::constant(*value, seg.len()),
                        None => {
                            let column = seg.column(free).clone();
                            free += 1;
                            column
                        }
                    })
                    .collect();
                Segment::new(columns)
            })
            .collect()
    }
}

/// How a join step is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JoinStrategy {
    /// Semi-join on a single key
    Verificative,
    /// Single merge pass emitting one right column per matching key
    TwoToOne,
    /// Per-key sub-queries against the right literal
    SelectiveHash,
    /// Sort both sides and merge
    SortMerge,
}

/// One join to execute
#[derive(Debug, Clone, Copy)]
pub struct JoinStep<'a> {
    /// Right-hand literal
    pub literal: &'a Literal,
    /// Facts of the literal to read
    pub range: IterationRange,
    /// `(left column, right column)` pairs that must agree
    pub coordinates: &'a [(usize, usize)],
    /// `(output column, left column)` pairs
    pub from_left: &'a [(usize, usize)],
    /// `(output column, right column)` pairs
    pub from_right: &'a [(usize, usize)],
    /// Number of output columns
    pub output_width: usize,
    /// Drops outputs that re-derive the right-hand fact
    pub self_filter: Option<&'a SelfFilter>,
}

impl<'a> JoinStep<'a> {
    /// The join described by a plan step, reading `range`
    #[must_use]
    pub fn from_plan(
        step: &'a PlanStep,
        range: IterationRange,
        self_filter: Option<&'a SelfFilter>,
    ) -> Self {
        Self {
            literal: &step.literal,
            range,
            coordinates: &step.coordinates,
            from_left: &step.from_left,
            from_right: &step.from_right,
            output_width: step.output_width(),
            self_filter,
        }
    }

    fn left_keys(&self) -> SmallVec<[usize; 3]> {
        self.coordinates.iter().map(|&(l, _)| l).collect()
    }

    fn right_keys(&self) -> SmallVec<[usize; 3]> {
        self.coordinates.iter().map(|&(_, r)| r).collect()
    }

    /// Writes the output row for a left/right row pair into `out`;
    /// returns false when the self filter rejects it
    fn assemble(
        &self,
        left: &Segment,
        left_row: usize,
        right: &Segment,
        right_row: usize,
        out: &mut Vec<TermId>,
        right_values: &mut Vec<TermId>,
    ) -> bool {
        out.clear();
        out.resize(self.output_width, 0);
        for &(slot, col) in self.from_left {
            out[slot] = left.column(col).get(left_row);
        }
        for &(slot, col) in self.from_right {
            out[slot] = right.column(col).get(right_row);
        }
        match self.self_filter {
            Some(filter) => {
                right.row_into(right_row, right_values);
                !filter.rejects(out, right_values)
            }
            None => true,
        }
    }
}

/// Runs join steps with a worker pool and tuning thresholds
#[derive(Debug, Clone, Copy)]
pub struct JoinExecutor<'a> {
    pool: &'a WorkerPool,
    config: &'a ReasonerConfig,
}

impl<'a> JoinExecutor<'a> {
    /// Executor sharing the driver's pool and configuration
    #[must_use]
    pub fn new(pool: &'a WorkerPool, config: &'a ReasonerConfig) -> Self {
        Self { pool, config }
    }

    /// Strategy for joining `left` with the step's literal.
    ///
    /// The selective hash join needs a left side below the hash threshold.
    /// A lone `(0, 0)` coordinate goes to the merge instead: both sides are
    /// already ordered on their first column, so merging needs no sort.
    #[must_use]
    pub fn choose(&self, left: &Segment, step: &JoinStep<'_>) -> JoinStrategy {
        let coordinates = step.coordinates.len();
        let strategy = if coordinates == 1 && step.from_right.is_empty() {
            JoinStrategy::Verificative
        } else if coordinates == 1 && step.from_left.is_empty() && step.from_right.len() == 1 {
            JoinStrategy::TwoToOne
        } else if left.len() < self.config.hash_join_threshold
            && (1..=2).contains(&coordinates)
            && step.coordinates != [(0, 0)]
        {
            JoinStrategy::SelectiveHash
        } else {
            JoinStrategy::SortMerge
        };
        log::trace!(
            "Joining {} left rows with {}: {strategy:?}",
            left.len(),
            step.literal
        );
        strategy
    }

    /// Emits the literal's matches projected through `from_right`, the
    /// first step of a plan
    ///
    /// # Errors
    ///
    /// Propagates fact-store failures.
    pub fn scan(
        &self,
        source: &FactSource<'_>,
        step: &JoinStep<'_>,
        sink: &mut dyn Sink,
    ) -> Result<()> {
        let parts = source.segments(step.literal, step.range, &[])?;
        let empty = Segment::nullary(1);
        let outputs = self.pool.scatter(parts, |right| {
            let mut builder = SegmentBuilder::new(step.output_width);
            let (mut out, mut values) = (Vec::new(), Vec::new());
            for r in 0..right.len() {
                if step.assemble(&empty, 0, &right, r, &mut out, &mut values) {
                    builder.push_row(&out);
                }
            }
            builder.finish()
        });
        replay(&outputs, sink);
        Ok(())
    }

    /// Joins `left` with the step's literal using the chosen strategy and
    /// returns the strategy used
    ///
    /// # Errors
    ///
    /// Propagates fact-store failures.
    pub fn join(
        &self,
        source: &FactSource<'_>,
        left: &Segment,
        step: &JoinStep<'_>,
        sink: &mut dyn Sink,
    ) -> Result<JoinStrategy> {
        let strategy = self.choose(left, step);
        self.join_with(strategy, source, left, step, sink)?;
        Ok(strategy)
    }

    /// Joins with a given strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::UnsupportedJoinShape`] when the strategy
    /// cannot run the step's shape, or a fact-store failure.
    pub fn join_with(
        &self,
        strategy: JoinStrategy,
        source: &FactSource<'_>,
        left: &Segment,
        step: &JoinStep<'_>,
        sink: &mut dyn Sink,
    ) -> Result<()> {
        check_shape(strategy, step)?;
        if left.is_empty() || source.estimate(step.literal, step.range) == 0 {
            return Ok(());
        }
        match strategy {
            JoinStrategy::Verificative => self.verificative(source, left, step, sink),
            JoinStrategy::TwoToOne => self.two_to_one(source, left, step, sink),
            JoinStrategy::SelectiveHash => self.selective_hash(source, left, step, sink),
            JoinStrategy::SortMerge => self.sort_merge(source, left, step, sink),
        }
    }

    fn verificative(
        &self,
        source: &FactSource<'_>,
        left: &Segment,
        step: &JoinStep<'_>,
        sink: &mut dyn Sink,
    ) -> Result<()> {
        let (lc, rc) = step.coordinates[0];
        let keys = left.column(lc).sort_unique();
        let present = if step.literal.is_edb()
            && self.config.key_lookup
            && source.edb().supports_key_lookup()
        {
            log::trace!("Probing the fact store with {} keys", keys.len());
            Column::from_vec(source.edb().contains_keys(step.literal, rc, &keys.to_vec())?)
        } else {
            let parts = source.segments(step.literal, step.range, &[rc])?;
            let mut all = ColumnBuilder::new();
            for part in &parts {
                all.extend(part.column(rc).iter());
            }
            keys.intersect(&all.finish().sort_unique())
        };
        if present.is_empty() {
            return Ok(());
        }
        let present = present.to_vec();
        let mut out = vec![0; step.output_width];
        let key_column = left.column(lc);
        for row in 0..left.len() {
            if present.binary_search(&key_column.get(row)).is_ok() {
                for &(slot, col) in step.from_left {
                    out[slot] = left.column(col).get(row);
                }
                sink.emit(&out);
            }
        }
        Ok(())
    }

    fn two_to_one(
        &self,
        source: &FactSource<'_>,
        left: &Segment,
        step: &JoinStep<'_>,
        sink: &mut dyn Sink,
    ) -> Result<()> {
        let (lc, rc) = step.coordinates[0];
        let (slot, out_col) = step.from_right[0];
        let keys = left.column(lc).sort_unique().to_vec();
        let parts = source.segments(step.literal, step.range, &[rc, out_col])?;
        let outputs = self.pool.scatter(parts, |right| -> Result<Segment> {
            let right = right.sort(&[rc, out_col], self.pool)?;
            let mut builder = SegmentBuilder::new(step.output_width);
            let mut out = vec![0; step.output_width];
            let mut values = Vec::new();
            let (key_col, value_col) = (right.column(rc), right.column(out_col));
            let mut k = 0;
            let mut last: Option<(TermId, TermId)> = None;
            for r in 0..right.len() {
                let key = key_col.get(r);
                while k < keys.len() && keys[k] < key {
                    k += 1;
                }
                if k == keys.len() {
                    break;
                }
                if keys[k] != key {
                    continue;
                }
                let pair = (key, value_col.get(r));
                if last == Some(pair) {
                    continue;
                }
                last = Some(pair);
                out[slot] = pair.1;
                if let Some(filter) = step.self_filter {
                    right.row_into(r, &mut values);
                    if filter.rejects(&out, &values) {
                        continue;
                    }
                }
                builder.push_row(&out);
            }
            Ok(builder.finish())
        });
        replay(&outputs.into_iter().collect::<Result<Vec<_>>>()?, sink);
        Ok(())
    }

    fn selective_hash(
        &self,
        source: &FactSource<'_>,
        left: &Segment,
        step: &JoinStep<'_>,
        sink: &mut dyn Sink,
    ) -> Result<()> {
        let mut groups: IndexMap<SmallVec<[TermId; 2]>, Vec<usize>> = IndexMap::new();
        for row in 0..left.len() {
            let key = step
                .coordinates
                .iter()
                .map(|&(lc, _)| left.column(lc).get(row))
                .collect();
            groups.entry(key).or_default().push(row);
        }
        let vars: SmallVec<[Option<VarId>; 2]> = step
            .coordinates
            .iter()
            .map(|&(_, rc)| step.literal.var_at_column(rc))
            .collect();
        log::trace!(
            "Selective hash join: {} distinct keys against {}",
            groups.len(),
            step.literal
        );
        let (mut out, mut values) = (Vec::new(), Vec::new());
        for (key, rows) in &groups {
            let bindings: SmallVec<[(VarId, TermId); 2]> = vars
                .iter()
                .zip(key)
                .filter_map(|(v, k)| v.map(|v| (v, *k)))
                .collect();
            for right in source.bound_segments(step.literal, &bindings, step.range)? {
                for &l in rows {
                    for r in 0..right.len() {
                        if step.assemble(left, l, &right, r, &mut out, &mut values) {
                            sink.emit(&out);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn sort_merge(
        &self,
        source: &FactSource<'_>,
        left: &Segment,
        step: &JoinStep<'_>,
        sink: &mut dyn Sink,
    ) -> Result<()> {
        let right_keys = step.right_keys();
        let parts = source.segments(step.literal, step.range, &right_keys)?;
        if parts.is_empty() {
            return Ok(());
        }
        if let [(lc, rc)] = step.coordinates {
            let distinct = left.distinct_up_to(*lc, self.config.low_cardinality_threshold);
            if distinct < self.config.low_cardinality_threshold {
                self.bucketed_join(left, (*lc, *rc), &parts, step, sink);
                return Ok(());
            }
        }
        let left_keys = step.left_keys();
        let left = left.sort(&left_keys, self.pool)?;
        let outputs = self.pool.scatter(parts, |right| -> Result<Segment> {
            let right = right.sort(&right_keys, self.pool)?;
            let mut builder = SegmentBuilder::new(step.output_width);
            let (mut out, mut values) = (Vec::new(), Vec::new());
            merge_groups(&left, &left_keys, &right, &right_keys, |l_rows, r_rows| {
                for l in l_rows {
                    for r in r_rows.clone() {
                        if step.assemble(&left, l, &right, r, &mut out, &mut values) {
                            builder.push_row(&out);
                        }
                    }
                }
            });
            Ok(builder.finish())
        });
        replay(&outputs.into_iter().collect::<Result<Vec<_>>>()?, sink);
        Ok(())
    }

    /// Join on a single key with fewer distinct left values than the
    /// low-cardinality threshold. The join key is the grouping column: left
    /// rows are bucketed by it, right rows are dropped unless their key has
    /// a bucket, and nothing is sorted.
    fn bucketed_join(
        &self,
        left: &Segment,
        (lc, rc): (usize, usize),
        parts: &[Segment],
        step: &JoinStep<'_>,
        sink: &mut dyn Sink,
    ) {
        let mut groups: IndexMap<TermId, (Vec<usize>, Vec<(usize, usize)>)> = IndexMap::new();
        for row in 0..left.len() {
            groups.entry(left.column(lc).get(row)).or_default().0.push(row);
        }
        for (p, part) in parts.iter().enumerate() {
            let keys = part.column(rc);
            for r in 0..part.len() {
                if let Some(group) = groups.get_mut(&keys.get(r)) {
                    group.1.push((p, r));
                }
            }
        }
        let fast = step.output_width == 2
            && step.from_left.len() == 1
            && step.from_right.len() == 1
            && step.self_filter.is_none();
        log::trace!(
            "Bucketed join over {} keys{}",
            groups.len(),
            if fast { " (two-column fast path)" } else { "" }
        );
        let (mut out, mut values) = (Vec::new(), Vec::new());
        for (left_rows, right_rows) in groups.values() {
            if right_rows.is_empty() {
                continue;
            }
            if fast {
                let (l_slot, l_col) = step.from_left[0];
                let (r_slot, r_col) = step.from_right[0];
                let right_values: Vec<TermId> = right_rows
                    .iter()
                    .map(|&(p, r)| parts[p].column(r_col).get(r))
                    .collect();
                let mut row = [0; 2];
                for &l in left_rows {
                    row[l_slot] = left.column(l_col).get(l);
                    for &v in &right_values {
                        row[r_slot] = v;
                        sink.emit(&row);
                    }
                }
            } else {
                for &l in left_rows {
                    for &(p, r) in right_rows {
                        if step.assemble(left, l, &parts[p], r, &mut out, &mut values) {
                            sink.emit(&out);
                        }
                    }
                }
            }
        }
    }
}

fn check_shape(strategy: JoinStrategy, step: &JoinStep<'_>) -> Result<()> {
    let coordinates = step.coordinates.len();
    let supported = match strategy {
        JoinStrategy::Verificative => coordinates == 1 && step.from_right.is_empty(),
        JoinStrategy::TwoToOne => {
            coordinates == 1 && step.from_left.is_empty() && step.from_right.len() == 1
        }
        JoinStrategy::SelectiveHash => (1..=2).contains(&coordinates),
        JoinStrategy::SortMerge => true,
    };
    if supported {
        Ok(())
    } else {
        Err(ReasonerError::UnsupportedJoinShape(format!(
            "{strategy:?} with {coordinates} coordinates, {} left and {} right output columns",
            step.from_left.len(),
            step.from_right.len()
        )))
    }
}

/// Two-pointer merge over sorted sides, calling `emit` with the row ranges
/// of every pair of equal-key groups in left order
fn merge_groups(
    left: &Segment,
    left_keys: &[usize],
    right: &Segment,
    right_keys: &[usize],
    mut emit: impl FnMut(Range<usize>, Range<usize>),
) {
    let compare = |l: usize, r: usize| {
        left_keys
            .iter()
            .zip(right_keys)
            .map(|(&lk, &rk)| left.column(lk).get(l).cmp(&right.column(rk).get(r)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    };
    let same_left = |a: usize, b: usize| {
        left_keys
            .iter()
            .all(|&k| left.column(k).get(a) == left.column(k).get(b))
    };
    let same_right = |a: usize, b: usize| {
        right_keys
            .iter()
            .all(|&k| right.column(k).get(a) == right.column(k).get(b))
    };
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match compare(i, j) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                let mut i_end = i + 1;
                while i_end < left.len() && same_left(i, i_end) {
                    i_end += 1;
                }
                let mut j_end = j + 1;
                while j_end < right.len() && same_right(j, j_end) {
                    j_end += 1;
                }
                emit(i..i_end, j..j_end);
                i = i_end;
                j = j_end;
            }
        }
    }
}

/// Replays task-local outputs into the caller's sink in task order
fn replay(outputs: &[Segment], sink: &mut dyn Sink) {
    let mut row = Vec::new();
    for segment in outputs {
        for r in 0..segment.len() {
            segment.row_into(r, &mut row);
            sink.emit(&row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edb::InMemoryEdb;
    use crate::model::{Predicate, PredicateKind, Term};
    use proptest::prelude::*;

    fn idb_literal(pred: PredId, terms: [Term; 2]) -> Literal {
        let p = Predicate::new(pred, PredicateKind::Idb, 2).unwrap();
        Literal::new(p, terms).unwrap()
    }

    fn edb_literal(terms: [Term; 2]) -> Literal {
        let p = Predicate::new(0, PredicateKind::Edb, 2).unwrap();
        Literal::new(p, terms).unwrap()
    }

    fn tables_with(pred: PredId, blocks: &[&[[TermId; 2]]]) -> IndexMap<PredId, Table> {
        let mut table = Table::new(2);
        for (i, rows) in blocks.iter().enumerate() {
            let seg = Segment::from_rows(2, rows.iter()).unwrap();
            let seg = seg.sort_unique(&WorkerPool::sequential()).unwrap();
            table.add_block(i + 1, None, seg).unwrap();
        }
        let mut tables = IndexMap::new();
        tables.insert(pred, table);
        tables
    }

    fn run(
        strategy: Option<JoinStrategy>,
        source: &FactSource<'_>,
        left: &Segment,
        step: &JoinStep<'_>,
        pool: &WorkerPool,
    ) -> Result<Vec<Vec<TermId>>> {
        run_with(&ReasonerConfig::default(), strategy, source, left, step, pool)
    }

    fn run_with(
        config: &ReasonerConfig,
        strategy: Option<JoinStrategy>,
        source: &FactSource<'_>,
        left: &Segment,
        step: &JoinStep<'_>,
        pool: &WorkerPool,
    ) -> Result<Vec<Vec<TermId>>> {
        let executor = JoinExecutor::new(pool, config);
        let mut out = SegmentBuilder::new(step.output_width);
        match strategy {
            Some(s) => executor.join_with(s, source, left, step, &mut out)?,
            None => {
                executor.join(source, left, step, &mut out)?;
            }
        }
        let mut rows = out.finish().to_rows();
        rows.sort();
        Ok(rows)
    }

    #[test]
    fn test_two_to_one_example() {
        let right = idb_literal(5, [Term::Variable(0), Term::Variable(1)]);
        let tables = tables_with(5, &[&[[1, 10], [1, 20], [2, 10]]]);
        let edb = InMemoryEdb::default();
        let source = FactSource::new(&tables, &edb);
        let left = Segment::from_rows(1, [[1], [2], [3]]).unwrap();
        let step = JoinStep {
            literal: &right,
            range: IterationRange::ALL,
            coordinates: &[(0, 0)],
            from_left: &[],
            from_right: &[(0, 1)],
            output_width: 1,
            self_filter: None,
        };
        let config = ReasonerConfig::default();
        let pool = WorkerPool::sequential();
        let executor = JoinExecutor::new(&pool, &config);
        assert_eq!(executor.choose(&left, &step), JoinStrategy::TwoToOne);
        let mut out = SegmentBuilder::new(1);
        executor.join(&source, &left, &step, &mut out).unwrap();
        assert_eq!(
            out.finish().column(0).to_vec(),
            vec![10, 20, 10],
            "Values are kept per key, key 3 has no match"
        );
    }

    #[test]
    fn test_forcing_a_strategy_on_the_wrong_shape_fails() {
        let right = idb_literal(5, [Term::Variable(0), Term::Variable(1)]);
        let tables = tables_with(5, &[&[[1, 10]]]);
        let edb = InMemoryEdb::default();
        let source = FactSource::new(&tables, &edb);
        let left = Segment::from_rows(1, [[1]]).unwrap();
        let step = JoinStep {
            literal: &right,
            range: IterationRange::ALL,
            coordinates: &[],
            from_left: &[(0, 0)],
            from_right: &[(1, 1)],
            output_width: 2,
            self_filter: None,
        };
        let pool = WorkerPool::sequential();
        for strategy in [
            JoinStrategy::Verificative,
            JoinStrategy::TwoToOne,
            JoinStrategy::SelectiveHash,
        ] {
            let err = run(Some(strategy), &source, &left, &step, &pool).unwrap_err();
            assert!(matches!(err, ReasonerError::UnsupportedJoinShape(_)));
        }
        let rows = run(Some(JoinStrategy::SortMerge), &source, &left, &step, &pool).unwrap();
        assert_eq!(rows, vec![vec![1, 10]], "An empty key is a cross product");
    }

    #[test]
    fn test_empty_right_side_yields_nothing() {
        let right = idb_literal(5, [Term::Variable(0), Term::Variable(1)]);
        let tables = tables_with(5, &[]);
        let edb = InMemoryEdb::default();
        let source = FactSource::new(&tables, &edb);
        let left = Segment::from_rows(1, [[1]]).unwrap();
        let step = JoinStep {
            literal: &right,
            range: IterationRange::ALL,
            coordinates: &[(0, 0)],
            from_left: &[(0, 0)],
            from_right: &[(1, 1)],
            output_width: 2,
            self_filter: None,
        };
        let rows = run(None, &source, &left, &step, &WorkerPool::sequential()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_hash_join_only_below_threshold() {
        let right = idb_literal(5, [Term::Variable(0), Term::Variable(1)]);
        let config = ReasonerConfig::default().with_hash_join_threshold(3);
        let pool = WorkerPool::sequential();
        let executor = JoinExecutor::new(&pool, &config);
        let step = JoinStep {
            literal: &right,
            range: IterationRange::ALL,
            coordinates: &[(1, 0)],
            from_left: &[(0, 0)],
            from_right: &[(1, 1)],
            output_width: 2,
            self_filter: None,
        };
        let two = Segment::from_rows(2, [[1, 1], [2, 2]]).unwrap();
        let three = Segment::from_rows(2, [[1, 1], [2, 2], [3, 3]]).unwrap();
        assert_eq!(executor.choose(&two, &step), JoinStrategy::SelectiveHash);
        assert_eq!(
            executor.choose(&three, &step),
            JoinStrategy::SortMerge,
            "A left side at the threshold is merged"
        );
        let leading = JoinStep {
            coordinates: &[(0, 0)],
            from_left: &[(0, 1)],
            ..step
        };
        assert_eq!(
            executor.choose(&two, &leading),
            JoinStrategy::SortMerge,
            "First columns on both sides are merged without a hash pass"
        );
    }

    #[test]
    fn test_verificative_join_probes_the_store() {
        let p = Predicate::new(0, PredicateKind::Edb, 2).unwrap();
        let mut builder = InMemoryEdb::builder();
        builder.add_facts(p, [[1, 2], [3, 4]]).unwrap();
        let edb = builder.build();
        let tables = IndexMap::new();
        let source = FactSource::new(&tables, &edb);
        let right = edb_literal([Term::Variable(0), Term::Variable(1)]);
        let left = Segment::from_rows(2, [[9, 1], [8, 2], [7, 3]]).unwrap();
        let step = JoinStep {
            literal: &right,
            range: IterationRange::ALL,
            coordinates: &[(1, 0)],
            from_left: &[(0, 0)],
            from_right: &[],
            output_width: 1,
            self_filter: None,
        };
        let pool = WorkerPool::sequential();
        let config = ReasonerConfig::default();
        let executor = JoinExecutor::new(&pool, &config);
        assert_eq!(executor.choose(&left, &step), JoinStrategy::Verificative);
        let mut out = SegmentBuilder::new(1);
        executor.join(&source, &left, &step, &mut out).unwrap();
        assert_eq!(out.finish().column(0).to_vec(), vec![9, 7]);
    }

    #[test]
    fn test_self_filter_drops_rederived_fact() {
        let right = idb_literal(5, [Term::Variable(0), Term::Variable(1)]);
        let tables = tables_with(5, &[&[[1, 10], [1, 20]]]);
        let edb = InMemoryEdb::default();
        let source = FactSource::new(&tables, &edb);
        let left = Segment::from_rows(1, [[1]]).unwrap();
        // Output (x, y) equals the fact read when y == 10.
        let filter = SelfFilter::new(vec![
            (crate::filter::Operand::Output(0), crate::filter::Operand::Right(0)),
            (crate::filter::Operand::Const(10), crate::filter::Operand::Right(1)),
        ]);
        let step = JoinStep {
            literal: &right,
            range: IterationRange::ALL,
            coordinates: &[(0, 0)],
            from_left: &[(0, 0)],
            from_right: &[(1, 1)],
            output_width: 2,
            self_filter: Some(&filter),
        };
        let pool = WorkerPool::sequential();
        for strategy in [JoinStrategy::SelectiveHash, JoinStrategy::SortMerge] {
            let rows = run(Some(strategy), &source, &left, &step, &pool).unwrap();
            assert_eq!(rows, vec![vec![1, 20]], "{strategy:?} must apply the self filter");
        }
    }

    fn reference(left: &[(u64, u64)], right: &[(u64, u64)]) -> Vec<Vec<u64>> {
        let mut out: Vec<Vec<u64>> = left
            .iter()
            .flat_map(|&(a, x)| {
                right
                    .iter()
                    .filter(move |&&(x2, _)| x2 == x)
                    .map(move |&(_, y)| vec![a, x, y])
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    proptest! {
        #[test]
        fn prop_every_strategy_matches_nested_loops(
            left in prop::collection::vec((0u64..8, 0u64..8), 1..30),
            blocks in prop::collection::vec(prop::collection::vec((0u64..8, 0u64..8), 0..20), 1..4),
            threads in 1usize..3
        ) {
            let right_lit = idb_literal(5, [Term::Variable(1), Term::Variable(2)]);
            let block_rows: Vec<Vec<[u64; 2]>> = blocks
                .iter()
                .map(|b| b.iter().map(|(x, y)| [*x, *y]).collect())
                .collect();
            let mut table = Table::new(2);
            let mut seen: Vec<[u64; 2]> = Vec::new();
            for (i, rows) in block_rows.iter().enumerate() {
                let fresh: Vec<[u64; 2]> = rows.iter().filter(|r| !seen.contains(r)).copied().collect();
                seen.extend(fresh.iter().copied());
                let seg = Segment::from_rows(2, fresh.iter()).unwrap()
                    .sort_unique(&WorkerPool::sequential()).unwrap();
                table.add_block(i, None, seg).unwrap();
            }
            let mut tables = IndexMap::new();
            tables.insert(5, table);
            let edb = InMemoryEdb::default();
            let source = FactSource::new(&tables, &edb);
            let pool = WorkerPool::new(threads).unwrap().with_sort_threshold(4);
            let left_seg = Segment::from_rows(2, left.iter().map(|(a, x)| [*a, *x])).unwrap();
            let right_pairs: Vec<(u64, u64)> = seen.iter().map(|r| (r[0], r[1])).collect();

            let step = JoinStep {
                literal: &right_lit,
                range: IterationRange::ALL,
                coordinates: &[(1, 0)],
                from_left: &[(0, 0), (1, 1)],
                from_right: &[(2, 1)],
                output_width: 3,
                self_filter: None,
            };
            let expected = reference(&left, &right_pairs);
            for strategy in [None, Some(JoinStrategy::SelectiveHash), Some(JoinStrategy::SortMerge)] {
                let mut rows = run(strategy, &source, &left_seg, &step, &pool).unwrap();
                rows.dedup();
                prop_assert_eq!(&rows, &expected);
            }
            let ungrouped = ReasonerConfig {
                low_cardinality_threshold: 0,
                ..ReasonerConfig::default()
            };
            let mut rows = run_with(
                &ungrouped,
                Some(JoinStrategy::SortMerge),
                &source,
                &left_seg,
                &step,
                &pool,
            )
            .unwrap();
            rows.dedup();
            prop_assert_eq!(&rows, &expected, "Two-pointer merge without pre-grouping");

            let semi = JoinStep { from_right: &[], output_width: 2, ..step };
            let mut expected_semi: Vec<Vec<u64>> = left
                .iter()
                .filter(|(_, x)| right_pairs.iter().any(|(x2, _)| x2 == x))
                .map(|(a, x)| vec![*a, *x])
                .collect();
            expected_semi.sort();
            expected_semi.dedup();
            for strategy in [Some(JoinStrategy::Verificative), Some(JoinStrategy::SortMerge)] {
                let mut rows = run(strategy, &source, &left_seg, &semi, &pool).unwrap();
                rows.dedup();
                prop_assert_eq!(&rows, &expected_semi);
            }

            let keys_only = Segment::from_rows(1, left.iter().map(|(_, x)| [*x])).unwrap();
            let to_one = JoinStep {
                coordinates: &[(0, 0)],
                from_left: &[],
                from_right: &[(0, 1)],
                output_width: 1,
                ..step
            };
            let mut expected_one: Vec<Vec<u64>> = right_pairs
                .iter()
                .filter(|(x, _)| left.iter().any(|(_, k)| k == x))
                .map(|(_, y)| vec![*y])
                .collect();
            expected_one.sort();
            expected_one.dedup();
            for strategy in [Some(JoinStrategy::TwoToOne), Some(JoinStrategy::SortMerge)] {
                let mut rows = run(strategy, &source, &keys_only, &to_one, &pool).unwrap();
                rows.dedup();
                prop_assert_eq!(&rows, &expected_one);
            }
        }

        #[test]
        fn prop_edb_right_side_matches_nested_loops(
            left in prop::collection::vec((0u64..6, 0u64..6), 1..25),
            facts in prop::collection::vec((0u64..6, 0u64..6), 0..25)
        ) {
            let p = Predicate::new(0, PredicateKind::Edb, 2).unwrap();
            let mut builder = InMemoryEdb::builder();
            builder.add_facts(p, facts.iter().map(|(x, y)| [*x, *y])).unwrap();
            let edb = builder.build();
            let tables = IndexMap::new();
            let source = FactSource::new(&tables, &edb);
            let right_lit = edb_literal([Term::Variable(1), Term::Variable(2)]);
            let left_seg = Segment::from_rows(2, left.iter().map(|(a, x)| [*a, *x])).unwrap();
            let step = JoinStep {
                literal: &right_lit,
                range: IterationRange::ALL,
                coordinates: &[(1, 0)],
                from_left: &[(0, 0), (1, 1)],
                from_right: &[(2, 1)],
                output_width: 3,
                self_filter: None,
            };
            let expected = reference(&left, &facts);
            let pool = WorkerPool::sequential();
            for strategy in [Some(JoinStrategy::SelectiveHash), Some(JoinStrategy::SortMerge)] {
                let mut rows = run(strategy, &source, &left_seg, &step, &pool).unwrap();
                rows.dedup();
                prop_assert_eq!(&rows, &expected);
            }
        }
    }
}
