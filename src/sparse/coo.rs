//! Coordinate (triplet) storage.

use std::fmt;

use super::{condense_indices, fmt_entries, permute_in_place, Format, SparseMatrix};

/// Sparse matrix as parallel arrays of row indices, column indices and values.
///
/// Entries may arrive in any order and may repeat until [`SparseMatrix::sort`]
/// orders them row-major and sums the duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub row_indices: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<f64>,
    pub row_list: Vec<usize>,
    pub col_list: Vec<usize>,
}

impl CooMatrix {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            nrows: n_rows,
            ncols: n_cols,
            ..Self::default()
        }
    }

    /// Build from `(row, col, value)` triplets, kept in the given order.
    pub fn from_triplets(n_rows: usize, n_cols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut m = Self::new(n_rows, n_cols);
        for &(row, col, val) in triplets {
            m.add_value(row, col, val);
        }
        m
    }
}

impl SparseMatrix for CooMatrix {
    const FORMAT: Format = Format::Coo;

    fn with_dims(n_rows: usize, n_cols: usize) -> Self {
        Self::new(n_rows, n_cols)
    }

    fn from_sparse<S: SparseMatrix>(other: &S) -> Self {
        let mut m = Self::new(other.n_rows(), other.n_cols());
        m.row_indices.reserve(other.nnz());
        m.col_indices.reserve(other.nnz());
        m.values.reserve(other.nnz());
        other.apply(|row, col, val| m.add_value(row, col, val));
        m.row_list = other.row_list().to_vec();
        m.col_list = other.col_list().to_vec();
        m
    }

    fn n_rows(&self) -> usize {
        self.nrows
    }

    fn n_cols(&self) -> usize {
        self.ncols
    }

    fn nnz(&self) -> usize {
        self.values.len()
    }

    fn resize(&mut self, n_rows: usize, n_cols: usize) {
        self.nrows = n_rows;
        self.ncols = n_cols;
    }

    fn add_value(&mut self, row: usize, col: usize, value: f64) {
        self.row_indices.push(row);
        self.col_indices.push(col);
        self.values.push(value);
    }

    fn sort(&mut self) {
        let nnz = self.nnz();
        if nnz == 0 {
            return;
        }

        let mut perm: Vec<usize> = (0..nnz).collect();
        perm.sort_by_key(|&k| (self.row_indices[k], self.col_indices[k]));
        {
            let (rows, cols, vals) = (
                &mut self.row_indices,
                &mut self.col_indices,
                &mut self.values,
            );
            permute_in_place(&perm, |a, b| {
                rows.swap(a, b);
                cols.swap(a, b);
                vals.swap(a, b);
            });
        }

        // Collapse adjacent duplicates.
        let mut write = 1;
        for k in 1..nnz {
            let (row, col, val) = (self.row_indices[k], self.col_indices[k], self.values[k]);
            if row == self.row_indices[write - 1] && col == self.col_indices[write - 1] {
                self.values[write - 1] += val;
            } else {
                self.row_indices[write] = row;
                self.col_indices[write] = col;
                self.values[write] = val;
                write += 1;
            }
        }
        self.row_indices.truncate(write);
        self.col_indices.truncate(write);
        self.values.truncate(write);
    }

    fn condense_rows(&mut self) {
        self.nrows = condense_indices(&mut self.row_indices, self.nrows, &mut self.row_list);
    }

    fn condense_cols(&mut self) {
        self.ncols = condense_indices(&mut self.col_indices, self.ncols, &mut self.col_list);
    }

    fn row_list(&self) -> &[usize] {
        &self.row_list
    }

    fn col_list(&self) -> &[usize] {
        &self.col_list
    }

    fn apply<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        for k in 0..self.values.len() {
            f(self.row_indices[k], self.col_indices[k], self.values[k]);
        }
    }

    fn apply_with<F>(&self, x: &[f64], b: &mut [f64], mut f: F)
    where
        F: FnMut(usize, usize, f64, &[f64], &mut [f64]),
    {
        for k in 0..self.values.len() {
            f(self.row_indices[k], self.col_indices[k], self.values[k], x, b);
        }
    }

    fn map_cols<F: FnMut(usize) -> usize>(&mut self, mut f: F) {
        for c in self.col_indices.iter_mut() {
            *c = f(*c);
        }
    }

    fn transpose(&self) -> Self {
        Self {
            nrows: self.ncols,
            ncols: self.nrows,
            row_indices: self.col_indices.clone(),
            col_indices: self.row_indices.clone(),
            values: self.values.clone(),
            row_list: self.col_list.clone(),
            col_list: self.row_list.clone(),
        }
    }
}

impl fmt::Display for CooMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_entries(self, f)
    }
}
