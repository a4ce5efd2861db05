//! Compressed Sparse Row (CSR) matrix.
//!
//! The default layout for distributed blocks: halo exchange of matrix rows,
//! transpose and the nodal split all operate on CSR.

use std::fmt;
use std::ops::Range;

use super::{
    compress_by, condense_indices, condense_ptr, fmt_entries, regroup_compressed,
    sort_compressed, Format, SparseMatrix,
};

/// Sparse matrix in Compressed Sparse Row format.
///
/// While a matrix is being assembled `row_pointers` may cover only the rows
/// inserted so far; rows past its end are empty, and the last covered row
/// extends to `nnz`. Any mutating structural operation pads it back to
/// `nrows + 1` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    pub nrows: usize,
    pub ncols: usize,
    /// Non-zero values, stored row by row.
    pub values: Vec<f64>,
    /// Column index for each non-zero value.
    pub col_indices: Vec<usize>,
    /// `row_pointers[i]` is the index into values/col_indices where row i starts.
    pub row_pointers: Vec<usize>,
    pub row_list: Vec<usize>,
    pub col_list: Vec<usize>,
}

impl CsrMatrix {
    /// Create an empty matrix with no non-zero entries.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_pointers: vec![0],
            row_list: Vec::new(),
            col_list: Vec::new(),
        }
    }

    /// Build CSR matrix from (row, col, value) triplets.
    /// Duplicate entries at the same (row, col) are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let coo = super::CooMatrix::from_triplets(nrows, ncols, triplets);
        let mut m = Self::from_sparse(&coo);
        m.sort();
        m
    }

    /// Build from raw compressed arrays. `row_pointers` must have
    /// `nrows + 1` monotonically non-decreasing entries.
    pub fn from_parts(
        nrows: usize,
        ncols: usize,
        row_pointers: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(row_pointers.len(), nrows + 1);
        debug_assert!(row_pointers.windows(2).all(|w| w[0] <= w[1]));
        Self {
            nrows,
            ncols,
            values,
            col_indices,
            row_pointers,
            row_list: Vec::new(),
            col_list: Vec::new(),
        }
    }

    /// Entry range of `row` in `col_indices`/`values`.
    pub fn row_range(&self, row: usize) -> Range<usize> {
        let nnz = self.values.len();
        let start = self.row_pointers.get(row).copied().unwrap_or(nnz);
        let end = self.row_pointers.get(row + 1).copied().unwrap_or(nnz);
        start..end
    }

    /// Number of nonzeros stored in `row`.
    pub fn row_len(&self, row: usize) -> usize {
        self.row_range(row).len()
    }

    /// Move the diagonal entry of every row to the front of that row.
    pub fn move_diag(&mut self) {
        self.seal();
        for row in 0..self.nrows {
            let range = self.row_range(row);
            let start = range.start;
            if let Some(pos) = self.col_indices[range].iter().position(|&c| c == row) {
                self.col_indices[start..=start + pos].rotate_right(1);
                self.values[start..=start + pos].rotate_right(1);
            }
        }
    }

    /// Pad or truncate `row_pointers` to exactly `nrows + 1` entries.
    fn seal(&mut self) {
        let nnz = self.values.len();
        self.row_pointers.resize(self.nrows + 1, nnz);
        let end = self.row_pointers[self.nrows];
        self.col_indices.truncate(end);
        self.values.truncate(end);
    }
}

impl SparseMatrix for CsrMatrix {
    const FORMAT: Format = Format::Csr;

    fn with_dims(n_rows: usize, n_cols: usize) -> Self {
        Self::new(n_rows, n_cols)
    }

    fn from_sparse<S: SparseMatrix>(other: &S) -> Self {
        let (row_pointers, col_indices, values) =
            compress_by(other, other.n_rows(), |row, col| (row, col));
        let mut m = Self::from_parts(other.n_rows(), other.n_cols(), row_pointers, col_indices, values);
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
        while self.row_pointers.len() <= row {
            self.row_pointers.push(nnz);
        }
        if row + 1 < self.row_pointers.len() {
            // Later rows are already laid out: insert at the end of this row.
            let at = self.row_pointers[row + 1];
            self.col_indices.insert(at, col);
            self.values.insert(at, value);
            for p in &mut self.row_pointers[row + 1..] {
                *p += 1;
            }
        } else {
            self.col_indices.push(col);
            self.values.push(value);
        }
    }

    fn sort(&mut self) {
        self.seal();
        sort_compressed(&mut self.row_pointers, &mut self.col_indices, &mut self.values);
    }

    fn condense_rows(&mut self) {
        self.seal();
        self.nrows = condense_ptr(&mut self.row_pointers, &mut self.row_list);
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
        for row in 0..self.nrows {
            for idx in self.row_range(row) {
                f(row, self.col_indices[idx], self.values[idx]);
            }
        }
    }

    fn apply_with<F>(&self, x: &[f64], b: &mut [f64], mut f: F)
    where
        F: FnMut(usize, usize, f64, &[f64], &mut [f64]),
    {
        for row in 0..self.nrows {
            for idx in self.row_range(row) {
                f(row, self.col_indices[idx], self.values[idx], x, b);
            }
        }
    }

    fn map_cols<F: FnMut(usize) -> usize>(&mut self, mut f: F) {
        for c in self.col_indices.iter_mut() {
            *c = f(*c);
        }
    }

    fn transpose(&self) -> Self {
        let mut sealed = self.clone();
        sealed.seal();
        let (row_pointers, col_indices, values) = regroup_compressed(
            &sealed.row_pointers,
            &sealed.col_indices,
            &sealed.values,
            self.ncols,
        );
        let mut t = Self::from_parts(self.ncols, self.nrows, row_pointers, col_indices, values);
        t.row_list = self.col_list.clone();
        t.col_list = self.row_list.clone();
        t
    }
}

impl fmt::Display for CsrMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_entries(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_matrix() {
        let m = CsrMatrix::new(3, 3);
        assert_eq!(m.nnz(), 0);
        assert_eq!(m.row_range(2), 0..0);
    }

    #[test]
    fn test_from_triplets_simple() {
        // 2x2 identity matrix
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.to_dense(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_from_triplets_duplicates_summed() {
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 0, 2.0), (1, 1, 3.0)]);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.to_dense(), vec![vec![3.0, 0.0], vec![0.0, 3.0]]);
    }

    #[test]
    fn add_value_skips_empty_rows() {
        let mut m = CsrMatrix::new(5, 4);
        m.add_value(1, 3, 1.0);
        m.add_value(1, 0, 2.0);
        m.add_value(3, 2, 3.0);
        assert_eq!(m.row_range(0), 0..0);
        assert_eq!(m.row_range(1), 0..2);
        assert_eq!(m.row_range(2), 2..2);
        assert_eq!(m.row_range(3), 2..3);
        assert_eq!(m.row_range(4), 3..3);

        m.sort();
        assert_eq!(m.row_pointers, vec![0, 0, 2, 2, 3, 3]);
        assert_eq!(m.col_indices, vec![0, 3, 2]);
        assert_eq!(m.values, vec![2.0, 1.0, 3.0]);
    }

    #[test]
    fn add_value_out_of_row_order_shifts_later_rows() {
        let mut m = CsrMatrix::new(3, 3);
        m.add_value(2, 1, 1.0);
        m.add_value(0, 2, 2.0);
        m.add_value(2, 0, 3.0);
        m.sort();
        assert_eq!(m.row_pointers, vec![0, 1, 1, 3]);
        assert_eq!(m.col_indices, vec![2, 0, 1]);
        assert_eq!(m.values, vec![2.0, 3.0, 1.0]);
    }

    #[test]
    fn sort_twice_matches_once() {
        let mut m = CsrMatrix::new(3, 3);
        m.add_value(0, 2, 1.0);
        m.add_value(0, 2, 1.0);
        m.add_value(0, 0, 1.0);
        m.add_value(2, 1, 4.0);
        m.sort();
        let once = m.clone();
        m.sort();
        assert_eq!(m, once);
    }

    #[test]
    fn condense_rows_drops_empty_rows() {
        let mut m = CsrMatrix::from_triplets(4, 3, &[(1, 0, 1.0), (3, 2, 2.0), (3, 0, 3.0)]);
        m.condense_rows();
        assert_eq!(m.nrows, 2);
        assert_eq!(m.row_list, vec![1, 3]);
        assert_eq!(m.row_pointers, vec![0, 1, 3]);
        assert_eq!(m.to_dense(), vec![vec![1.0, 0.0, 0.0], vec![3.0, 0.0, 2.0]]);
    }

    #[test]
    fn condense_cols_renumbers_columns() {
        let mut m = CsrMatrix::from_triplets(2, 10, &[(0, 9, 1.0), (1, 4, 2.0)]);
        m.condense_cols();
        assert_eq!(m.ncols, 2);
        assert_eq!(m.col_list, vec![4, 9]);
        assert_eq!(m.col_indices, vec![1, 0]);
    }

    #[test]
    fn test_multiply() {
        // [[2, 1], [0, 3]] * [1, 2] = [4, 6]
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 2.0), (0, 1, 1.0), (1, 1, 3.0)]);
        let mut y = vec![9.0; 2];
        m.multiply(&[1.0, 2.0], &mut y);
        assert_eq!(y, vec![4.0, 6.0]);
    }

    #[test]
    fn multiply_transpose_matches_transposed_multiply() {
        let m = CsrMatrix::from_triplets(2, 3, &[(0, 0, 2.0), (0, 2, 1.0), (1, 1, 3.0)]);
        let x = [1.0, -1.0];
        let mut b1 = vec![0.0; 3];
        let mut b2 = vec![0.0; 3];
        m.multiply_transpose(&x, &mut b1);
        m.transpose().multiply(&x, &mut b2);
        assert_eq!(b1, b2);
        assert_eq!(b1, vec![2.0, -3.0, 1.0]);
    }

    #[test]
    fn transpose_keeps_rows_sorted() {
        let m = CsrMatrix::from_triplets(3, 3, &[(0, 1, 1.0), (2, 1, 2.0), (1, 0, 3.0)]);
        let t = m.transpose();
        assert_eq!(t.row_pointers, vec![0, 1, 3, 3]);
        assert_eq!(t.col_indices, vec![1, 0, 2]);
        assert_eq!(t.transpose(), m);
    }

    #[test]
    fn move_diag_puts_diagonal_first() {
        let mut m = CsrMatrix::from_triplets(2, 3, &[(0, 0, 1.0), (1, 0, 2.0), (1, 1, 3.0), (1, 2, 4.0)]);
        m.move_diag();
        assert_eq!(m.col_indices, vec![0, 1, 0, 2]);
        assert_eq!(m.values, vec![1.0, 3.0, 2.0, 4.0]);
    }
}
