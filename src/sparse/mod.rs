//! Local sparse storage for one process's block of a distributed matrix.
//!
//! Three layouts share one data model of `(row, col, value)` nonzeros:
//! coordinate (`CooMatrix`), compressed sparse row (`CsrMatrix`) and
//! compressed sparse column (`CscMatrix`). All three implement
//! [`SparseMatrix`], whose `apply`/`apply_with` traversal is the only loop
//! over nonzeros; multiply, residual and printing are built on top of it.

mod convert;
mod coo;
mod csc;
mod csr;

pub use coo::CooMatrix;
pub use csc::CscMatrix;
pub use csr::CsrMatrix;

use std::fmt;

/// Physical layout of a local sparse block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Coo,
    Csr,
    Csc,
}

/// Capability interface shared by every local sparse layout.
///
/// Every layout accepts entries in any order. Compressed layouts append in
/// O(1) while rows (CSR) or columns (CSC) arrive in non-decreasing order and
/// shift later entries otherwise.
pub trait SparseMatrix: Clone + fmt::Debug + Send + Sync {
    const FORMAT: Format;

    /// Create an empty matrix with the given dimensions.
    fn with_dims(n_rows: usize, n_cols: usize) -> Self;

    /// Re-encode any other layout into this one, preserving every triple.
    fn from_sparse<S: SparseMatrix>(other: &S) -> Self;

    fn n_rows(&self) -> usize;
    fn n_cols(&self) -> usize;

    /// Number of retained nonzeros.
    fn nnz(&self) -> usize;

    /// Set the matrix dimensions. Compressed layouts drop groups past the
    /// new bound on the grouping axis.
    fn resize(&mut self, n_rows: usize, n_cols: usize);

    fn add_value(&mut self, row: usize, col: usize, value: f64);

    /// Order entries by (primary, secondary) axis and sum duplicates.
    fn sort(&mut self);

    /// Remove empty rows, recording new row -> original row in `row_list`.
    fn condense_rows(&mut self);

    /// Remove empty columns, recording new col -> original col in `col_list`.
    fn condense_cols(&mut self);

    fn row_list(&self) -> &[usize];
    fn col_list(&self) -> &[usize];

    /// Visit every nonzero once, in storage order.
    fn apply<F: FnMut(usize, usize, f64)>(&self, f: F);

    /// Visit every nonzero once with a read-only input and a mutable output.
    fn apply_with<F>(&self, x: &[f64], b: &mut [f64], f: F)
    where
        F: FnMut(usize, usize, f64, &[f64], &mut [f64]);

    /// Rewrite the column index of every nonzero. Dimensions are unchanged,
    /// so new indices must fit `n_cols`. `f` only sees columns that hold
    /// entries.
    fn map_cols<F: FnMut(usize) -> usize>(&mut self, f: F);

    /// Local transpose in the same layout.
    fn transpose(&self) -> Self;

    /// b = A * x
    fn multiply(&self, x: &[f64], b: &mut [f64]) {
        b[..self.n_rows()].fill(0.0);
        self.multiply_add(x, b);
    }

    /// b += A * x
    fn multiply_add(&self, x: &[f64], b: &mut [f64]) {
        self.apply_with(x, b, |row, col, val, xd, bd| bd[row] += val * xd[col]);
    }

    /// b = A^T * x
    fn multiply_transpose(&self, x: &[f64], b: &mut [f64]) {
        b[..self.n_cols()].fill(0.0);
        self.multiply_transpose_add(x, b);
    }

    /// b += A^T * x
    fn multiply_transpose_add(&self, x: &[f64], b: &mut [f64]) {
        self.apply_with(x, b, |row, col, val, xd, bd| bd[col] += val * xd[row]);
    }

    /// r = b - A * x
    fn residual(&self, x: &[f64], b: &[f64], r: &mut [f64]) {
        let n = self.n_rows();
        r[..n].copy_from_slice(&b[..n]);
        self.apply_with(x, r, |row, col, val, xd, rd| rd[row] -= val * xd[col]);
    }

    /// All nonzeros as `(row, col, value)` in storage order.
    fn triplets(&self) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::with_capacity(self.nnz());
        self.apply(|row, col, val| out.push((row, col, val)));
        out
    }

    /// Convert to dense matrix (row-major). For testing and small matrices only.
    fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.n_cols()]; self.n_rows()];
        self.apply(|row, col, val| dense[row][col] += val);
        dense
    }
}

/// Apply a sort permutation in place by following its cycles.
///
/// `perm[i]` is the current position of the element that belongs at `i`.
/// `swap(a, b)` must exchange positions `a` and `b` in every parallel array.
pub(crate) fn permute_in_place<F: FnMut(usize, usize)>(perm: &[usize], mut swap: F) {
    let mut done = vec![false; perm.len()];
    for i in 0..perm.len() {
        if done[i] {
            continue;
        }
        done[i] = true;
        let mut prev = i;
        let mut j = perm[i];
        while j != i {
            swap(prev, j);
            done[j] = true;
            prev = j;
            j = perm[j];
        }
    }
}

/// Sort the secondary indices within every group of a compressed layout and
/// sum duplicates, compacting the arrays. `ptr` must cover every group.
pub(crate) fn sort_compressed(ptr: &mut [usize], idx: &mut Vec<usize>, vals: &mut Vec<f64>) {
    let n_groups = ptr.len() - 1;
    let mut start = ptr[0];
    let mut write = 0;
    ptr[0] = 0;
    for g in 0..n_groups {
        let end = ptr[g + 1];
        if end > start {
            let mut perm: Vec<usize> = (0..end - start).collect();
            perm.sort_by_key(|&k| idx[start + k]);
            {
                let seg_idx = &mut idx[start..end];
                let seg_vals = &mut vals[start..end];
                permute_in_place(&perm, |a, b| {
                    seg_idx.swap(a, b);
                    seg_vals.swap(a, b);
                });
            }

            let group_start = write;
            for k in start..end {
                let (i, v) = (idx[k], vals[k]);
                if write > group_start && idx[write - 1] == i {
                    vals[write - 1] += v;
                } else {
                    idx[write] = i;
                    vals[write] = v;
                    write += 1;
                }
            }
        }
        ptr[g + 1] = write;
        start = end;
    }
    idx.truncate(write);
    vals.truncate(write);
}

/// Drop empty groups from a compressed offset array.
///
/// Returns the new number of groups. `list` maps condensed group to the
/// original group, composed with any earlier condensation.
pub(crate) fn condense_ptr(ptr: &mut Vec<usize>, list: &mut Vec<usize>) -> usize {
    let n_groups = ptr.len() - 1;
    let mut kept = Vec::with_capacity(n_groups);
    let mut new_ptr = Vec::with_capacity(n_groups + 1);
    new_ptr.push(0);
    for g in 0..n_groups {
        if ptr[g + 1] > ptr[g] {
            kept.push(g);
            new_ptr.push(ptr[g + 1]);
        }
    }
    *list = compose_list(list, kept);
    *ptr = new_ptr;
    list.len()
}

/// Renumber the indices stored in `idx` densely, dropping unused ones.
///
/// Returns the new dimension. `list` maps new index to original index,
/// composed with any earlier condensation.
pub(crate) fn condense_indices(idx: &mut [usize], dim: usize, list: &mut Vec<usize>) -> usize {
    let bound = idx.iter().map(|&i| i + 1).max().unwrap_or(0).max(dim);
    let mut used = vec![false; bound];
    for &i in idx.iter() {
        used[i] = true;
    }

    let mut orig_to_new = vec![usize::MAX; bound];
    let mut kept = Vec::new();
    for (orig, &u) in used.iter().enumerate() {
        if u {
            orig_to_new[orig] = kept.len();
            kept.push(orig);
        }
    }
    for i in idx.iter_mut() {
        *i = orig_to_new[*i];
    }
    *list = compose_list(list, kept);
    list.len()
}

fn compose_list(previous: &[usize], kept: Vec<usize>) -> Vec<usize> {
    if previous.is_empty() {
        kept
    } else {
        kept.into_iter().map(|k| previous[k]).collect()
    }
}

/// Regroup a compressed layout along its secondary axis.
///
/// Given offsets over `n_groups` groups with secondary indices in
/// `[0, n_other)`, returns offsets over `n_other` groups whose secondary
/// indices are the original group ids. Within each new group entries keep
/// traversal order, so a sorted input produces a sorted output.
pub(crate) fn regroup_compressed(
    ptr: &[usize],
    idx: &[usize],
    vals: &[f64],
    n_other: usize,
) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let n_groups = ptr.len() - 1;
    let nnz = ptr[n_groups];
    let mut new_ptr = vec![0usize; n_other + 1];
    for &i in &idx[..nnz] {
        new_ptr[i + 1] += 1;
    }
    for i in 0..n_other {
        new_ptr[i + 1] += new_ptr[i];
    }

    let mut next = new_ptr.clone();
    let mut new_idx = vec![0usize; nnz];
    let mut new_vals = vec![0.0; nnz];
    for g in 0..n_groups {
        for k in ptr[g]..ptr[g + 1] {
            let slot = next[idx[k]];
            new_idx[slot] = g;
            new_vals[slot] = vals[k];
            next[idx[k]] += 1;
        }
    }
    (new_ptr, new_idx, new_vals)
}

/// Build compressed arrays grouped by `key` from any traversal.
pub(crate) fn compress_by<S, K>(
    other: &S,
    n_groups: usize,
    key: K,
) -> (Vec<usize>, Vec<usize>, Vec<f64>)
where
    S: SparseMatrix,
    K: Fn(usize, usize) -> (usize, usize),
{
    let mut ptr = vec![0usize; n_groups + 1];
    other.apply(|row, col, _| ptr[key(row, col).0 + 1] += 1);
    for g in 0..n_groups {
        ptr[g + 1] += ptr[g];
    }

    let nnz = ptr[n_groups];
    let mut next = ptr.clone();
    let mut idx = vec![0usize; nnz];
    let mut vals = vec![0.0; nnz];
    other.apply(|row, col, val| {
        let (group, secondary) = key(row, col);
        let slot = next[group];
        idx[slot] = secondary;
        vals[slot] = val;
        next[group] += 1;
    });
    (ptr, idx, vals)
}

/// Print one nonzero per line, as `A[row][col] = value`.
pub(crate) fn fmt_entries<S: SparseMatrix>(m: &S, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (row, col, val) in m.triplets() {
        writeln!(f, "A[{row}][{col}] = {val:e}")?;
    }
    Ok(())
}
