//! Immutable columns of term ids.
//!
//! A column is either an owned buffer, a window over a buffer owned by
//! someone else (typically the fact store), or a run of one repeated value.
//! Cloning a column never copies its values.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{ReasonerError, Result};
use crate::model::TermId;

/// A column of a segment
#[derive(Debug, Clone)]
pub enum Column {
    /// Values owned by this column
    Owned(Arc<[TermId]>),
    /// The same value repeated `len` times
    Constant {
        /// The repeated value
        value: TermId,
        /// Number of rows
        len: usize,
    },
    /// A window `[offset, offset + len)` over a shared buffer
    View {
        /// Shared backing buffer
        data: Arc<[TermId]>,
        /// First row of the window
        offset: usize,
        /// Number of rows
        len: usize,
    },
}

impl Default for Column {
    fn default() -> Self {
        Column::Constant { value: 0, len: 0 }
    }
}

impl Column {
    /// Column owning the given values
    #[must_use]
    pub fn from_vec(values: Vec<TermId>) -> Self {
        Column::Owned(values.into())
    }

    /// Column repeating one value
    #[must_use]
    pub fn constant(value: TermId, len: usize) -> Self {
        Column::Constant { value, len }
    }

    /// Zero-copy window over a shared buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::ShapeMismatch`] when the window exceeds the buffer.
    pub fn view(data: Arc<[TermId]>, offset: usize, len: usize) -> Result<Self> {
        if offset + len > data.len() {
            return Err(ReasonerError::ShapeMismatch {
                expected: data.len(),
                found: offset + len,
            });
        }
        Ok(Column::View { data, offset, len })
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Column::Owned(data) => data.len(),
            Column::Constant { len, .. } | Column::View { len, .. } => *len,
        }
    }

    /// Whether the column has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `row`; panics when out of bounds, like slice indexing
    #[must_use]
    pub fn get(&self, row: usize) -> TermId {
        match self {
            Column::Owned(data) => data[row],
            Column::Constant { value, len } => {
                assert!(row < *len, "row {row} out of bounds for column of {len}");
                *value
            }
            Column::View { data, offset, len } => {
                assert!(row < *len, "row {row} out of bounds for column of {len}");
                data[offset + row]
            }
        }
    }

    /// Whether every row holds the same value by construction
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self, Column::Constant { .. })
    }

    /// Whether the values live in a buffer shared with a source
    #[must_use]
    pub fn is_view(&self) -> bool {
        matches!(self, Column::View { .. })
    }

    /// Contiguous values, when the column is backed by a buffer
    #[must_use]
    pub fn as_slice(&self) -> Option<&[TermId]> {
        match self {
            Column::Owned(data) => Some(data),
            Column::View { data, offset, len } => Some(&data[*offset..offset + len]),
            Column::Constant { .. } => None,
        }
    }

    /// Forward reader over the values
    #[must_use]
    pub fn iter(&self) -> ColumnReader<'_> {
        ColumnReader {
            column: self,
            next: 0,
        }
    }

    /// Copies the values out
    #[must_use]
    pub fn to_vec(&self) -> Vec<TermId> {
        match self.as_slice() {
            Some(values) => values.to_vec(),
            None => self.iter().collect(),
        }
    }

    /// Zero-copy sub-range `[start, start + len)`, clamped to the column
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Column {
        let start = start.min(self.len());
        let len = len.min(self.len() - start);
        match self {
            Column::Owned(data) => Column::View {
                data: Arc::clone(data),
                offset: start,
                len,
            },
            Column::Constant { value, .. } => Column::Constant { value: *value, len },
            Column::View { data, offset, .. } => Column::View {
                data: Arc::clone(data),
                offset: offset + start,
                len,
            },
        }
    }

    /// Gathers rows in the given order
    #[must_use]
    pub fn permute(&self, rows: &[usize]) -> Column {
        match self {
            Column::Constant { value, .. } => Column::constant(*value, rows.len()),
            _ => {
                let mut builder = ColumnBuilder::with_capacity(rows.len());
                for &row in rows {
                    builder.push(self.get(row));
                }
                builder.finish()
            }
        }
    }

    /// Whether values never decrease
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        match self.as_slice() {
            Some(values) => values.windows(2).all(|w| w[0] <= w[1]),
            None => true,
        }
    }

    /// Ascending copy; constant and already sorted columns are returned as is
    #[must_use]
    pub fn sort(&self) -> Column {
        if self.is_sorted() {
            return self.clone();
        }
        let mut values = self.to_vec();
        values.sort_unstable();
        Column::from_vec(values)
    }

    /// Ascending copy without duplicates
    #[must_use]
    pub fn sort_unique(&self) -> Column {
        match self {
            Column::Constant { value, len } => Column::constant(*value, (*len).min(1)),
            _ => self.sort().unique(),
        }
    }

    /// Drops consecutive duplicates
    #[must_use]
    pub fn unique(&self) -> Column {
        match self {
            Column::Constant { value, len } => Column::constant(*value, (*len).min(1)),
            _ => {
                let mut values = self.to_vec();
                let before = values.len();
                values.dedup();
                if values.len() == before {
                    self.clone()
                } else {
                    Column::from_vec(values)
                }
            }
        }
    }

    /// Number of distinct values of a sorted column
    #[must_use]
    pub fn count_distinct_sorted(&self) -> usize {
        match self {
            Column::Constant { len, .. } => (*len).min(1),
            _ => {
                let mut count = 0;
                let mut last = None;
                for v in self.iter() {
                    if last != Some(v) {
                        count += 1;
                        last = Some(v);
                    }
                }
                count
            }
        }
    }

    /// Values present in both sorted-unique columns
    #[must_use]
    pub fn intersect(&self, other: &Column) -> Column {
        merge_walk(self, other, true)
    }

    /// Values of this sorted-unique column absent from the other
    #[must_use]
    pub fn difference(&self, other: &Column) -> Column {
        merge_walk(self, other, false)
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for Column {}

impl From<Vec<TermId>> for Column {
    fn from(values: Vec<TermId>) -> Self {
        Column::from_vec(values)
    }
}

impl<'a> IntoIterator for &'a Column {
    type Item = TermId;
    type IntoIter = ColumnReader<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn merge_walk(left: &Column, right: &Column, keep_common: bool) -> Column {
    let mut builder = ColumnBuilder::new();
    let mut r = right.iter().peekable();
    for v in left {
        while r.next_if(|&x| x < v).is_some() {}
        let common = r.peek() == Some(&v);
        if common == keep_common {
            builder.push(v);
        }
    }
    builder.finish()
}

/// Forward reader over a column
#[derive(Debug, Clone)]
pub struct ColumnReader<'a> {
    column: &'a Column,
    next: usize,
}

impl ColumnReader<'_> {
    /// Row the next call to `next` returns
    #[must_use]
    pub fn position(&self) -> usize {
        self.next
    }
}

impl Iterator for ColumnReader<'_> {
    type Item = TermId;

    fn next(&mut self) -> Option<TermId> {
        if self.next >= self.column.len() {
            return None;
        }
        let value = self.column.get(self.next);
        self.next += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.column.len() - self.next;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for ColumnReader<'_> {}

/// Append-only column buffer that compresses single-valued output
#[derive(Debug, Clone, Default)]
pub struct ColumnBuilder {
    values: Vec<TermId>,
    all_equal: bool,
}

impl ColumnBuilder {
    /// Empty builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            all_equal: true,
        }
    }

    /// Empty builder with room for `capacity` values
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            all_equal: true,
        }
    }

    /// Appends a value
    pub fn push(&mut self, value: TermId) {
        if let Some(&first) = self.values.first() {
            self.all_equal &= first == value;
        }
        self.values.push(value);
    }

    /// Number of values pushed so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was pushed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value pushed last
    #[must_use]
    pub fn last(&self) -> Option<TermId> {
        self.values.last().copied()
    }

    /// Freezes the buffer; a run of one value becomes a constant column
    #[must_use]
    pub fn finish(self) -> Column {
        match self.values.first() {
            Some(&value) if self.all_equal && self.values.len() > 1 => {
                Column::constant(value, self.values.len())
            }
            _ => Column::from_vec(self.values),
        }
    }
}

impl Extend<TermId> for ColumnBuilder {
    fn extend<I: IntoIterator<Item = TermId>>(&mut self, iter: I) {
        for v in iter {
            self.push(v);
        }
    }
}

impl FromIterator<TermId> for ColumnBuilder {
    fn from_iter<I: IntoIterator<Item = TermId>>(iter: I) -> Self {
        let mut builder = ColumnBuilder::new();
        builder.extend(iter);
        builder
    }
}

/// Lexicographic comparison of two rows given as column lists
pub(crate) fn compare_rows(
    left: &[Column],
    left_row: usize,
    right: &[Column],
    right_row: usize,
) -> Ordering {
    for (l, r) in left.iter().zip(right) {
        match l.get(left_row).cmp(&r.get(right_row)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}
