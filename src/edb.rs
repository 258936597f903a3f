//! The fact-store interface and an in-memory implementation.
//!
//! The engine only ever talks to stored facts through [`EdbLayer`]. A literal
//! is answered as a [`Segment`] with one column per variable position of the
//! literal, sorted in the requested order and free of duplicates.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::column::Column;
use crate::error::{ReasonerError, Result};
use crate::model::{Literal, PredId, Predicate, TermId, MAX_ARITY};
use crate::segment::{Segment, SegmentBuilder};

/// Query interface of an extensional fact store
pub trait EdbLayer: Send + Sync + fmt::Debug {
    /// Identifies the store; two segments are compatible for store-level
    /// set operations when they come from the same id
    fn store_id(&self) -> u64;

    /// All matches of `literal`, one column per variable position, sorted
    /// on `sort_by` (result column indices) and then on the other columns.
    ///
    /// # Errors
    ///
    /// Store-specific failures.
    fn query(&self, literal: &Literal, sort_by: &[usize]) -> Result<Segment>;

    /// Upper bound on the number of matches of `literal`
    fn estimate_cardinality(&self, literal: &Literal) -> usize;

    /// Exact number of matches of `literal`.
    ///
    /// # Errors
    ///
    /// Store-specific failures.
    fn cardinality(&self, literal: &Literal) -> Result<usize> {
        Ok(self.query(literal, &[])?.len())
    }

    /// Whether [`EdbLayer::contains_keys`] is cheaper than a full query
    fn supports_key_lookup(&self) -> bool {
        false
    }

    /// The subset of the sorted `keys` for which `literal` has a match with
    /// result column `column` bound to the key.
    ///
    /// # Errors
    ///
    /// Store-specific failures.
    fn contains_keys(
        &self,
        literal: &Literal,
        column: usize,
        keys: &[TermId],
    ) -> Result<Vec<TermId>> {
        let matches = self.query(literal, &[column])?;
        let present = matches.column(column).unique();
        Ok(Column::from_vec(keys.to_vec()).intersect(&present).to_vec())
    }

    /// Rows of `left` that are not rows of `right`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] when the results differ in width.
    fn difference(&self, left: &Literal, right: &Literal) -> Result<Segment> {
        let l = self.query(left, &[])?;
        let r = self.query(right, &[])?;
        if l.width() != r.width() {
            return Err(ReasonerError::ShapeMismatch {
                expected: l.width(),
                found: r.width(),
            });
        }
        Ok(l.merge_difference(&r))
    }
}

/// Marks a segment as the complete answer of a literal on a store
#[derive(Debug, Clone)]
pub struct EdbOrigin {
    /// Store that produced the segment
    pub store: Arc<dyn EdbLayer>,
    /// Literal the segment answers
    pub literal: Literal,
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// One relation kept sorted under every column permutation
#[derive(Debug)]
struct Relation {
    arity: usize,
    len: usize,
    /// `(permutation, columns in permutation order)`
    orders: Vec<(SmallVec<[usize; MAX_ARITY]>, Vec<Arc<[TermId]>>)>,
}

impl Relation {
    fn build(arity: usize, mut facts: Vec<Vec<TermId>>) -> Self {
        facts.sort_unstable();
        facts.dedup();
        let orders = permutations(arity)
            .into_iter()
            .map(|perm| {
                let mut rows: Vec<&Vec<TermId>> = facts.iter().collect();
                rows.sort_unstable_by(|a, b| {
                    perm.iter()
                        .map(|&p| a[p].cmp(&b[p]))
                        .find(|o| o.is_ne())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let columns = perm
                    .iter()
                    .map(|&p| rows.iter().map(|r| r[p]).collect::<Vec<_>>().into())
                    .collect();
                (perm, columns)
            })
            .collect();
        Self {
            arity,
            len: facts.len(),
            orders,
        }
    }

    fn order(&self, perm: &[usize]) -> Option<&[Arc<[TermId]>]> {
        self.orders
            .iter()
            .find(|(p, _)| p.as_slice() == perm)
            .map(|(_, cols)| cols.as_slice())
    }

    /// Row range whose first `prefix.len()` columns equal `prefix`
    fn range(columns: &[Arc<[TermId]>], len: usize, prefix: &[TermId]) -> (usize, usize) {
        let cmp = |row: usize| {
            prefix
                .iter()
                .zip(columns)
                .map(|(k, c)| c[row].cmp(k))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        };
        let lo = partition(len, |r| cmp(r).is_lt());
        let hi = partition(len, |r| cmp(r).is_le());
        (lo, hi.max(lo))
    }
}

fn partition(len: usize, mut pred: impl FnMut(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn permutations(arity: usize) -> Vec<SmallVec<[usize; MAX_ARITY]>> {
    let lists: &[&[usize]] = match arity {
        1 => &[&[0]],
        2 => &[&[0, 1], &[1, 0]],
        _ => &[
            &[0, 1, 2],
            &[0, 2, 1],
            &[1, 0, 2],
            &[1, 2, 0],
            &[2, 0, 1],
            &[2, 1, 0],
        ],
    };
    lists.iter().map(|p| p.iter().copied().collect()).collect()
}

#[derive(Debug)]
struct EdbInner {
    id: u64,
    relations: IndexMap<PredId, Relation>,
    queries: AtomicUsize,
}

/// Fact store held in memory, indexed under every column order
///
/// Cloning is cheap and clones share the data and the store id.
#[derive(Debug, Clone)]
pub struct InMemoryEdb {
    inner: Arc<EdbInner>,
}

impl Default for InMemoryEdb {
    fn default() -> Self {
        EdbBuilder::default().build()
    }
}

impl InMemoryEdb {
    /// Starts collecting facts
    #[must_use]
    pub fn builder() -> EdbBuilder {
        EdbBuilder::default()
    }

    /// Number of distinct facts of a predicate
    #[must_use]
    pub fn len(&self, predicate: PredId) -> usize {
        self.inner.relations.get(&predicate).map_or(0, |r| r.len)
    }

    /// Whether the store holds no facts at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.relations.values().all(|r| r.len == 0)
    }

    /// Facts of a predicate in ascending order
    #[must_use]
    pub fn facts(&self, predicate: PredId) -> Vec<Vec<TermId>> {
        let Some(relation) = self.inner.relations.get(&predicate) else {
            return Vec::new();
        };
        let Some((_, columns)) = relation.orders.first() else {
            return Vec::new();
        };
        (0..relation.len)
            .map(|r| columns.iter().map(|c| c[r]).collect())
            .collect()
    }

    /// Number of queries answered so far
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::Relaxed)
    }

    fn origin(&self, literal: &Literal) -> EdbOrigin {
        EdbOrigin {
            store: Arc::new(self.clone()),
            literal: literal.clone(),
        }
    }

    /// Term-position order answering `literal` sorted on `sort_by`
    fn access_order(literal: &Literal, sort_by: &[usize]) -> SmallVec<[usize; MAX_ARITY]> {
        let mut perm: SmallVec<[usize; MAX_ARITY]> = literal
            .terms()
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_variable())
            .map(|(p, _)| p)
            .collect();
        let requested = sort_by.iter().filter_map(|&c| literal.term_position(c));
        for pos in requested.chain(0..literal.arity()) {
            if !perm.contains(&pos) {
                perm.push(pos);
            }
        }
        perm
    }

    /// Matching row range in the chosen order, with the order's columns
    fn locate<'a>(
        relation: &'a Relation,
        literal: &Literal,
        perm: &[usize],
    ) -> Option<(&'a [Arc<[TermId]>], usize, usize)> {
        let columns = relation.order(perm)?;
        let constants: SmallVec<[TermId; MAX_ARITY]> = perm
            .iter()
            .map_while(|&p| literal.terms()[p].as_constant())
            .collect();
        let (lo, hi) = Relation::range(columns, relation.len, &constants);
        Some((columns, lo, hi))
    }
}

impl EdbLayer for InMemoryEdb {
    fn store_id(&self) -> u64 {
        self.inner.id
    }

    fn query(&self, literal: &Literal, sort_by: &[usize]) -> Result<Segment> {
        self.inner.queries.fetch_add(1, Ordering::Relaxed);
        let width = literal.n_var_positions();
        let Some(relation) = self.inner.relations.get(&literal.pred_id()) else {
            return Ok(Segment::empty(width).with_origin(self.origin(literal)));
        };
        if relation.arity != literal.arity() {
            return Err(ReasonerError::UnsupportedArity {
                predicate: literal.pred_id(),
                arity: literal.arity(),
            });
        }
        let perm = Self::access_order(literal, sort_by);
        let Some((columns, lo, hi)) = Self::locate(relation, literal, &perm) else {
            return Ok(Segment::empty(width));
        };
        let column_of = |term_pos: usize| perm.iter().position(|&p| p == term_pos).unwrap_or(0);
        let segment = if width == 0 {
            Segment::nullary(usize::from(hi > lo))
        } else if literal.repeated_vars().is_empty() {
            let cols = literal
                .var_positions()
                .map(|(pos, _)| Column::view(Arc::clone(&columns[column_of(pos)]), lo, hi - lo))
                .collect::<Result<Vec<_>>>()?;
            Segment::new(cols)?
        } else {
            let mut builder = SegmentBuilder::new(width);
            let mut fact: SmallVec<[TermId; MAX_ARITY]> = SmallVec::new();
            let mut row: Vec<TermId> = Vec::with_capacity(width);
            for r in lo..hi {
                fact.clear();
                fact.extend((0..literal.arity()).map(|pos| columns[column_of(pos)][r]));
                if literal.matches(&fact) {
                    row.clear();
                    row.extend(literal.project(&fact));
                    builder.push_row(&row);
                }
            }
            builder.finish()
        };
        Ok(segment.with_origin(self.origin(literal)))
    }

    fn estimate_cardinality(&self, literal: &Literal) -> usize {
        let Some(relation) = self.inner.relations.get(&literal.pred_id()) else {
            return 0;
        };
        if !literal.has_constants() {
            return relation.len;
        }
        let perm = Self::access_order(literal, &[]);
        Self::locate(relation, literal, &perm).map_or(0, |(_, lo, hi)| hi - lo)
    }

    fn cardinality(&self, literal: &Literal) -> Result<usize> {
        if literal.repeated_vars().is_empty() {
            return Ok(self.estimate_cardinality(literal));
        }
        Ok(self.query(literal, &[])?.len())
    }

    fn supports_key_lookup(&self) -> bool {
        true
    }

    fn contains_keys(
        &self,
        literal: &Literal,
        column: usize,
        keys: &[TermId],
    ) -> Result<Vec<TermId>> {
        let Some(var) = literal.var_at_column(column) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for &key in keys {
            let bound = literal.substitute(&[(var, key)]);
            if self.cardinality(&bound)? > 0 {
                found.push(key);
            }
        }
        Ok(found)
    }
}

/// Collects facts for an [`InMemoryEdb`]
#[derive(Debug, Default)]
pub struct EdbBuilder {
    facts: IndexMap<PredId, (usize, Vec<Vec<TermId>>)>,
}

impl EdbBuilder {
    /// Adds a fact of the given predicate.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::UnsupportedArity`] when the fact width differs
    /// from the predicate arity.
    pub fn add_fact(&mut self, predicate: Predicate, fact: &[TermId]) -> Result<&mut Self> {
        if fact.len() != predicate.arity() {
            return Err(ReasonerError::UnsupportedArity {
                predicate: predicate.id(),
                arity: fact.len(),
            });
        }
        self.facts
            .entry(predicate.id())
            .or_insert_with(|| (predicate.arity(), Vec::new()))
            .1
            .push(fact.to_vec());
        Ok(self)
    }

    /// Adds many facts of one predicate.
    ///
    /// # Errors
    ///
    /// Same as [`EdbBuilder::add_fact`].
    pub fn add_facts<F: AsRef<[TermId]>>(
        &mut self,
        predicate: Predicate,
        facts: impl IntoIterator<Item = F>,
    ) -> Result<&mut Self> {
        for fact in facts {
            self.add_fact(predicate, fact.as_ref())?;
        }
        Ok(self)
    }

    /// Sorts and indexes the collected facts
    #[must_use]
    pub fn build(self) -> InMemoryEdb {
        let relations = self
            .facts
            .into_iter()
            .map(|(pred, (arity, facts))| (pred, Relation::build(arity, facts)))
            .collect::<IndexMap<_, _>>();
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Built in-memory store {id} with {} relations and {} facts",
            relations.len(),
            relations.values().map(|r| r.len).sum::<usize>()
        );
        InMemoryEdb {
            inner: Arc::new(EdbInner {
                id,
                relations,
                queries: AtomicUsize::new(0),
            }),
        }
    }
}
