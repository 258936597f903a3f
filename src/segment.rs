//! Fixed-width row sets stored column by column.
//!
//! A [`Segment`] is the unit every join reads and writes. Its columns always
//! have the same length. A segment answered straight from the fact store keeps
//! an [`EdbOrigin`] so that re-sorting and anti-joins can be pushed back to the
//! store instead of touching the rows.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use smallvec::SmallVec;

use crate::column::{compare_rows, Column, ColumnBuilder};
use crate::edb::EdbOrigin;
use crate::error::{ReasonerError, Result};
use crate::model::{TermId, Tuple};
use crate::pool::WorkerPool;

/// Immutable fixed-width set of rows
#[derive(Debug, Clone, Default)]
pub struct Segment {
    columns: Vec<Column>,
    rows: usize,
    origin: Option<EdbOrigin>,
}

impl Segment {
    /// Builds a segment from equal-length columns.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] when column lengths differ.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map_or(0, Column::len);
        if let Some(bad) = columns.iter().find(|c| c.len() != rows) {
            return Err(ReasonerError::ShapeMismatch {
                expected: rows,
                found: bad.len(),
            });
        }
        Ok(Self {
            columns,
            rows,
            origin: None,
        })
    }

    /// Segment with no rows
    #[must_use]
    pub fn empty(width: usize) -> Self {
        Self {
            columns: vec![Column::constant(0, 0); width],
            rows: 0,
            origin: None,
        }
    }

    /// Zero-width segment with `rows` rows; a ground literal that holds yields one row
    #[must_use]
    pub fn nullary(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows,
            origin: None,
        }
    }

    /// Builds a segment from row tuples.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] when a row has the wrong width.
    pub fn from_rows<R: AsRef<[TermId]>>(
        width: usize,
        rows: impl IntoIterator<Item = R>,
    ) -> Result<Self> {
        let mut builder = SegmentBuilder::new(width);
        for row in rows {
            let row = row.as_ref();
            if row.len() != width {
                return Err(ReasonerError::ShapeMismatch {
                    expected: width,
                    found: row.len(),
                });
            }
            builder.push_row(row);
        }
        Ok(builder.finish())
    }

    pub(crate) fn with_origin(mut self, origin: EdbOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Number of columns
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Columns in order
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// A single column
    #[must_use]
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// The fact-store literal this segment is a complete view of, if any
    #[must_use]
    pub fn origin(&self) -> Option<&EdbOrigin> {
        self.origin.as_ref()
    }

    /// Values of one row
    #[must_use]
    pub fn row(&self, row: usize) -> Tuple {
        self.columns.iter().map(|c| c.get(row)).collect()
    }

    /// Writes the values of one row into `out`, replacing its content
    pub fn row_into(&self, row: usize, out: &mut Vec<TermId>) {
        out.clear();
        out.extend(self.columns.iter().map(|c| c.get(row)));
    }

    /// Iterator over all rows
    pub fn rows(&self) -> impl Iterator<Item = Tuple> + '_ {
        (0..self.rows).map(move |r| self.row(r))
    }

    /// All rows as vectors
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<TermId>> {
        (0..self.rows)
            .map(|r| self.columns.iter().map(|c| c.get(r)).collect())
            .collect()
    }

    /// Whether rows are in ascending lexicographic order
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        (1..self.rows).all(|r| {
            compare_rows(&self.columns, r - 1, &self.columns, r) != Ordering::Greater
        })
    }

    /// Sort key: the requested fields first, then every other column
    fn full_order(&self, fields: &[usize]) -> SmallVec<[usize; 4]> {
        let mut order: SmallVec<[usize; 4]> = SmallVec::new();
        for f in fields.iter().copied().chain(0..self.width()) {
            if f < self.width() && !order.contains(&f) {
                order.push(f);
            }
        }
        order
    }

    /// Rows in ascending order on `fields`, ties broken by the remaining
    /// columns left to right. Constant columns are never touched. A complete
    /// fact-store view with more than one column is re-read from the store in
    /// the requested order instead of being sorted.
    ///
    /// # Errors
    ///
    /// Propagates fact-store failures of the re-read path.
    pub fn sort(&self, fields: &[usize], pool: &WorkerPool) -> Result<Segment> {
        if self.rows <= 1 || self.width() == 0 {
            return Ok(self.clone());
        }
        let order = self.full_order(fields);
        if let Some(origin) = &self.origin {
            if self.width() > 1 {
                log::trace!("Re-sorting {} through the fact store", origin.literal);
                return origin.store.query(&origin.literal, &order);
            }
        }
        let keys: Vec<&Column> = order
            .iter()
            .map(|&f| &self.columns[f])
            .filter(|c| !c.is_constant())
            .collect();
        if keys.is_empty() {
            return Ok(self.clone());
        }
        let sorted = (1..self.rows).all(|r| row_cmp(&keys, r - 1, r) != Ordering::Greater);
        if sorted {
            return Ok(self.clone());
        }
        let permutation = pool.sort_permutation(self.rows, |&a, &b| row_cmp(&keys, a, b));
        Ok(self.permute(&permutation))
    }

    /// Drops consecutive duplicate rows; expects a sorted segment
    #[must_use]
    pub fn unique(&self) -> Segment {
        if self.rows <= 1 {
            return self.clone();
        }
        if self.width() == 0 {
            return Segment::nullary(1);
        }
        let keep: Vec<usize> = (0..self.rows)
            .filter(|&r| {
                r == 0 || compare_rows(&self.columns, r - 1, &self.columns, r) != Ordering::Equal
            })
            .collect();
        if keep.len() == self.rows {
            return self.clone();
        }
        self.permute(&keep)
    }

    /// Sorted on every column and duplicate-free.
    ///
    /// # Errors
    ///
    /// Propagates fact-store failures of [`Segment::sort`].
    pub fn sort_unique(&self, pool: &WorkerPool) -> Result<Segment> {
        Ok(self.sort(&[], pool)?.unique())
    }

    /// Rows of this segment that are absent from `existing`, sorted and
    /// duplicate-free. Two complete views of the same fact store are answered
    /// by the store itself.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] when widths differ, or a
    /// fact-store failure.
    pub fn retain(&self, existing: &Segment, pool: &WorkerPool) -> Result<Segment> {
        if self.width() != existing.width() {
            return Err(ReasonerError::ShapeMismatch {
                expected: self.width(),
                found: existing.width(),
            });
        }
        if let (Some(left), Some(right)) = (&self.origin, &existing.origin) {
            if left.store.store_id() == right.store.store_id() {
                return left.store.difference(&left.literal, &right.literal);
            }
        }
        let left = self.sort_unique(pool)?;
        if existing.is_empty() || left.is_empty() {
            return Ok(left);
        }
        let right = existing.sort_unique(pool)?;
        Ok(left.merge_difference(&right))
    }

    /// Sorted merge-diff of two sorted duplicate-free segments of equal width
    pub(crate) fn merge_difference(&self, other: &Segment) -> Segment {
        if self.width() == 0 {
            return Segment::nullary(usize::from(self.rows > 0 && other.rows == 0));
        }
        let mut keep = Vec::with_capacity(self.rows);
        let mut j = 0;
        for i in 0..self.rows {
            while j < other.rows
                && compare_rows(&other.columns, j, &self.columns, i) == Ordering::Less
            {
                j += 1;
            }
            if j >= other.rows
                || compare_rows(&other.columns, j, &self.columns, i) != Ordering::Equal
            {
                keep.push(i);
            }
        }
        if keep.len() == self.rows {
            let mut out = self.clone();
            out.origin = None;
            return out;
        }
        self.permute(&keep)
    }

    /// N-way merge of sorted segments of equal width into one sorted,
    /// duplicate-free segment. Columns holding one value across every input
    /// come out as constant columns.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] when widths differ.
    pub fn merge(segments: &[Segment]) -> Result<Segment> {
        let Some(first) = segments.first() else {
            return Ok(Segment::empty(0));
        };
        let width = first.width();
        if let Some(bad) = segments.iter().find(|s| s.width() != width) {
            return Err(ReasonerError::ShapeMismatch {
                expected: width,
                found: bad.width(),
            });
        }
        let non_empty: Vec<&Segment> = segments.iter().filter(|s| !s.is_empty()).collect();
        if width == 0 {
            return Ok(Segment::nullary(usize::from(!non_empty.is_empty())));
        }
        if let [only] = non_empty.as_slice() {
            return Ok(only.unique());
        }
        let mut heap = BinaryHeap::with_capacity(non_empty.len());
        for (input, seg) in non_empty.iter().enumerate() {
            heap.push(Reverse((seg.row(0), input, 0usize)));
        }
        let mut builder = SegmentBuilder::new(width);
        let mut last: Option<Tuple> = None;
        while let Some(Reverse((row, input, index))) = heap.pop() {
            let next = index + 1;
            if next < non_empty[input].len() {
                heap.push(Reverse((non_empty[input].row(next), input, next)));
            }
            if last.as_ref() != Some(&row) {
                builder.push_row(&row);
                last = Some(row);
            }
        }
        Ok(builder.finish())
    }

    /// Appends segments of equal width without sorting
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] when widths differ.
    pub fn concat(segments: &[Segment]) -> Result<Segment> {
        let non_empty: Vec<&Segment> = segments.iter().filter(|s| !s.is_empty()).collect();
        match non_empty.as_slice() {
            [] => Ok(Segment::empty(segments.first().map_or(0, Segment::width))),
            [only] => Ok((*only).clone()),
            [first, ..] => {
                let width = first.width();
                let mut builder = SegmentBuilder::new(width);
                for seg in &non_empty {
                    if seg.width() != width {
                        return Err(ReasonerError::ShapeMismatch {
                            expected: width,
                            found: seg.width(),
                        });
                    }
                    builder.extend_from(seg);
                }
                Ok(builder.finish())
            }
        }
    }

    /// Zero-copy selection of columns, in the given order
    #[must_use]
    pub fn project(&self, columns: &[usize]) -> Segment {
        Segment {
            columns: columns.iter().map(|&c| self.columns[c].clone()).collect(),
            rows: self.rows,
            origin: None,
        }
    }

    /// Zero-copy range of rows
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Segment {
        let start = start.min(self.rows);
        let len = len.min(self.rows - start);
        Segment {
            columns: self.columns.iter().map(|c| c.slice(start, len)).collect(),
            rows: len,
            origin: None,
        }
    }

    /// Gathers rows in the given order
    #[must_use]
    pub fn permute(&self, rows: &[usize]) -> Segment {
        Segment {
            columns: self.columns.iter().map(|c| c.permute(rows)).collect(),
            rows: rows.len(),
            origin: None,
        }
    }

    /// Keeps the rows for which `keep` returns true
    #[must_use]
    pub fn filter_rows(&self, mut keep: impl FnMut(usize) -> bool) -> Segment {
        let rows: Vec<usize> = (0..self.rows).filter(|&r| keep(r)).collect();
        if rows.len() == self.rows {
            return self.clone();
        }
        self.permute(&rows)
    }

    /// Number of distinct values in a column, counting past `limit` is skipped
    #[must_use]
    pub fn distinct_up_to(&self, column: usize, limit: usize) -> usize {
        let col = &self.columns[column];
        if col.is_constant() {
            return self.rows.min(1);
        }
        let mut seen: SmallVec<[TermId; 32]> = SmallVec::new();
        for v in col {
            if !seen.contains(&v) {
                seen.push(v);
                if seen.len() > limit {
                    break;
                }
            }
        }
        seen.len()
    }
}

fn row_cmp(keys: &[&Column], a: usize, b: usize) -> Ordering {
    for c in keys {
        match c.get(a).cmp(&c.get(b)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows && self.columns == other.columns
    }
}

/// Row-by-row segment construction
#[derive(Debug, Clone, Default)]
pub struct SegmentBuilder {
    columns: Vec<ColumnBuilder>,
    rows: usize,
}

impl SegmentBuilder {
    /// Builder for rows of the given width
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            columns: (0..width).map(|_| ColumnBuilder::new()).collect(),
            rows: 0,
        }
    }

    /// Width of the rows
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Rows pushed so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether nothing was pushed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Appends a row; the row must have the builder width
    pub fn push_row(&mut self, row: &[TermId]) {
        debug_assert_eq!(row.len(), self.columns.len(), "row width mismatch");
        for (builder, &value) in self.columns.iter_mut().zip(row) {
            builder.push(value);
        }
        self.rows += 1;
    }

    /// Appends every row of a segment of the same width
    pub fn extend_from(&mut self, segment: &Segment) {
        for (builder, column) in self.columns.iter_mut().zip(segment.columns()) {
            builder.extend(column.iter());
        }
        self.rows += segment.len();
    }

    /// Freezes the rows into a segment
    #[must_use]
    pub fn finish(self) -> Segment {
        Segment {
            columns: self.columns.into_iter().map(ColumnBuilder::finish).collect(),
            rows: self.rows,
            origin: None,
        }
    }
}
