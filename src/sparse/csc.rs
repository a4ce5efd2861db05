//! Compressed Sparse Column (CSC) matrix.

use std::fmt;
use std::ops::Range;

use super::{
    compress_by, condense_indices, condense_ptr, fmt_entries, regroup_compressed,
    sort_compressed, Format, SparseMatrix,
};

/// Sparse matrix in Compressed Sparse Column format.
///
/// Mirrors [`super::CsrMatrix`] with the roles of rows and columns swapped:
/// `col_pointers` is extended lazily over skipped columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub values: Vec<f64>,
    pub row_indices: Vec<usize>,
    pub col_pointers: Vec<usize>,
    pub row_list: Vec<usize>,
    pub col_list: Vec<usize>,
}

impl CscMatrix {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: Vec::new(),
            row_indices: Vec::new(),
            col_pointers: vec![0],
            row_list: Vec::new(),
            col_list: Vec::new(),
        }
    }

    pub fn from_parts(
        nrows: usize,
        ncols: usize,
        col_pointers: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(col_pointers.len(), ncols + 1);
        debug_assert!(col_pointers.windows(2).all(|w| w[0] <= w[1]));
        Self {
            nrows,
            ncols,
            values,
            row_indices,
            col_pointers,
            row_list: Vec::new(),
            col_list: Vec::new(),
        }
    }

    /// Build from triplets, summing duplicates.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let coo = super::CooMatrix::from_triplets(nrows, ncols, triplets);
        let mut m = Self::from_sparse(&coo);
        m.sort();
        m
    }

    pub fn col_range(&self, col: usize) -> Range<usize> {
        let nnz = self.values.len();
        let start = self.col_pointers.get(col).copied().unwrap_or(nnz);
        let end = self.col_pointers.get(col + 1).copied().unwrap_or(nnz);
        start..end
    }

    pub fn col_len(&self, col: usize) -> usize {
        self.col_range(col).len()
    }

    /// Move the diagonal entry of every column to the front of that column.
    pub fn move_diag(&mut self) {
        self.seal();
        for col in 0..self.ncols {
            let range = self.col_range(col);
            let start = range.start;
            if let Some(pos) = self.row_indices[range].iter().position(|&r| r == col) {
                self.row_indices[start..=start + pos].rotate_right(1);
                self.values[start..=start + pos].rotate_right(1);
            }
        }
    }

    fn seal(&mut self) {
        let nnz = self.values.len();
        self.col_pointers.resize(self.ncols + 1, nnz);
        let end = self.col_pointers[self.ncols];
        self.row_indices.truncate(end);
        self.values.truncate(end);
    }
}

impl SparseMatrix for CscMatrix {
    const FORMAT: Format = Format::Csc;

    fn with_dims(n_rows: usize, n_cols: usize) -> Self {
        Self::new(n_rows, n_cols)
    }

    fn from_sparse<S: SparseMatrix>(other: &S) -> Self {
        let (col_pointers, row_indices, values) =
            compress_by(other, other.n_cols(), |row, col| (col, row));
        let mut m = Self::from_parts(other.n_rows(), other.n_cols(), col_pointers, row_indices, values);
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
        self.seal();
    }

    fn add_value(&mut self, row: usize, col: usize, value: f64) {
        let nnz = self.values.len();
        while self.col_pointers.len() <= col {
            self.col_pointers.push(nnz);
        }
        if col + 1 < self.col_pointers.len() {
            // Later cols are already laid out: insert at the end of this col.
            let at = self.col_pointers[col + 1];
            self.row_indices.insert(at, row);
            self.values.insert(at, value);
            for p in &mut self.col_pointers[col + 1..] {
                *p += 1;
            }
        } else {
            self.row_indices.push(row);
            self.values.push(value);
        }
    }

    fn sort(&mut self) {
        self.seal();
        sort_compressed(&mut self.col_pointers, &mut self.row_indices, &mut self.values);
    }

    fn condense_rows(&mut self) {
        self.nrows = condense_indices(&mut self.row_indices, self.nrows, &mut self.row_list);
    }

    fn condense_cols(&mut self) {
        self.seal();
        self.ncols = condense_ptr(&mut self.col_pointers, &mut self.col_list);
    }

    fn row_list(&self) -> &[usize] {
        &self.row_list
    }

    fn col_list(&self) -> &[usize] {
        &self.col_list
    }

    fn apply<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        for col in 0..self.ncols {
            for idx in self.col_range(col) {
                f(self.row_indices[idx], col, self.values[idx]);
            }
        }
    }

    fn apply_with<F>(&self, x: &[f64], b: &mut [f64], mut f: F)
    where
        F: FnMut(usize, usize, f64, &[f64], &mut [f64]),
    {
        for col in 0..self.ncols {
            for idx in self.col_range(col) {
                f(self.row_indices[idx], col, self.values[idx], x, b);
            }
        }
    }

    /// Columns are the grouping axis here, so remapping them regroups the
    /// entries; relative order within each new column is preserved.
    fn map_cols<F: FnMut(usize) -> usize>(&mut self, mut f: F) {
        self.seal();
        let mut triplets = Vec::with_capacity(self.nnz());
        for col in 0..self.ncols {
            let range = self.col_range(col);
            if range.is_empty() {
                continue;
            }
            let new_col = f(col);
            for idx in range {
                triplets.push((self.row_indices[idx], new_col, self.values[idx]));
            }
        }
        let ncols = triplets.iter().map(|t| t.1 + 1).max().unwrap_or(0).max(self.ncols);
        let coo = super::CooMatrix::from_triplets(self.nrows, ncols, &triplets);
        let mut regrouped = Self::from_sparse(&coo);
        regrouped.ncols = self.ncols;
        regrouped.seal();
        regrouped.row_list = std::mem::take(&mut self.row_list);
        regrouped.col_list = std::mem::take(&mut self.col_list);
        *self = regrouped;
    }

    fn transpose(&self) -> Self {
        let mut sealed = self.clone();
        sealed.seal();
        let (col_pointers, row_indices, values) = regroup_compressed(
            &sealed.col_pointers,
            &sealed.row_indices,
            &sealed.values,
            self.nrows,
        );
        let mut t = Self::from_parts(self.ncols, self.nrows, col_pointers, row_indices, values);
        t.row_list = self.col_list.clone();
        t.col_list = self.row_list.clone();
        t
    }
}

impl fmt::Display for CscMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_entries(self, f)
    }
}
