//! Compressed sparse row storage, used for node stars and turn lookups.

use crate::error::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An immutable sparse matrix in compressed sparse row format.
///
/// The entries of row `r` are stored contiguously in `row_index[r]..row_index[r + 1]`,
/// ordered by column.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Csr<T> {
    /// The value of each nonzero entry.
    values: Vec<T>,
    /// The column of each nonzero entry.
    column_index: Vec<usize>,
    /// Row offsets into `values` and `column_index`, of length `rows + 1`.
    row_index: Vec<usize>,
    /// The rows with at least one entry, in ascending order.
    nonzero_rows: Vec<usize>,
    /// The number of columns.
    columns: usize,
}

impl<T: Copy> Csr<T> {
    /// Builds a matrix from parallel arrays of row indices, column indices and values.
    ///
    /// Entries are stably sorted by row, then column, unless `sorted` asserts that the
    /// input is already in that order.
    pub fn new(
        rows: &[usize],
        columns: &[usize],
        values: &[T],
        shape: (usize, usize),
        sorted: bool,
    ) -> Result<Self> {
        if rows.len() != columns.len() || rows.len() != values.len() {
            return Err(Error::LengthMismatch {
                rows: rows.len(),
                columns: columns.len(),
                values: values.len(),
            });
        }
        let (tot_rows, tot_columns) = shape;
        if let Some((&row, &column)) = rows
            .iter()
            .zip(columns)
            .find(|&(&r, &c)| r >= tot_rows || c >= tot_columns)
        {
            return Err(Error::OutOfBounds {
                row,
                column,
                rows: tot_rows,
                columns: tot_columns,
            });
        }

        let mut order = (0..rows.len()).collect::<Vec<_>>();
        if sorted {
            debug_assert!(order.windows(2).all(|w| rows[w[0]] <= rows[w[1]]));
        } else {
            order.sort_by_key(|&i| (rows[i], columns[i]));
        }

        let mut row_index = vec![0; tot_rows + 1];
        for &row in rows {
            row_index[row + 1] += 1;
        }
        for r in 0..tot_rows {
            row_index[r + 1] += row_index[r];
        }
        let nonzero_rows = (0..tot_rows)
            .filter(|&r| row_index[r + 1] > row_index[r])
            .collect();

        Ok(Self {
            values: order.iter().map(|&i| values[i]).collect(),
            column_index: order.iter().map(|&i| columns[i]).collect(),
            row_index,
            nonzero_rows,
            columns: tot_columns,
        })
    }

    /// Builds a matrix from unsorted `(row, column, value)` triples.
    pub fn from_triples(
        triples: impl IntoIterator<Item = (usize, usize, T)>,
        shape: (usize, usize),
    ) -> Result<Self> {
        let mut rows = vec![];
        let mut columns = vec![];
        let mut values = vec![];
        for (row, column, value) in triples {
            rows.push(row);
            columns.push(column);
            values.push(value);
        }
        Self::new(&rows, &columns, &values, shape, false)
    }

    /// Gets the values of the given row. Empty rows yield an empty slice.
    pub fn get_row(&self, row: usize) -> &[T] {
        match self.bounds(row) {
            Some((start, end)) => &self.values[start..end],
            None => &[],
        }
    }

    /// Gets the columns of the given row. Empty rows yield an empty slice.
    pub fn get_columns(&self, row: usize) -> &[usize] {
        match self.bounds(row) {
            Some((start, end)) => &self.column_index[start..end],
            None => &[],
        }
    }

    /// Iterates over the `(column, value)` pairs of a row.
    pub fn iter_row(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        self.get_columns(row)
            .iter()
            .copied()
            .zip(self.get_row(row).iter().copied())
    }

    /// The rows which contain at least one entry, in ascending order.
    pub fn nonzero_rows(&self) -> &[usize] {
        &self.nonzero_rows
    }

    /// The number of entries stored in a row.
    pub fn row_len(&self, row: usize) -> usize {
        self.bounds(row).map_or(0, |(start, end)| end - start)
    }

    /// The `(rows, columns)` shape of the matrix.
    pub fn shape(&self) -> (usize, usize) {
        (self.row_index.len() - 1, self.columns)
    }

    /// The total number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    fn bounds(&self, row: usize) -> Option<(usize, usize)> {
        let start = *self.row_index.get(row)?;
        let end = *self.row_index.get(row + 1)?;
        Some((start, end))
    }
}
