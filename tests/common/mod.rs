//! Shared helpers: reference matrices built identically on every rank, and
//! the slices of them each rank owns.

#![allow(dead_code)]

use std::sync::Arc;

use distmat::{CommConfig, Communicator, Context, ParCsrMatrix, Partition};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ctx_with_ppn(comm: Arc<dyn Communicator>, ppn: usize) -> Context {
    Context::with_config(comm, CommConfig::default().with_procs_per_node(ppn)).unwrap()
}

/// Dense `n_rows x n_cols` matrix with roughly `density` nonzeros, the
/// same on every rank for a given seed.
pub fn random_dense(n_rows: usize, n_cols: usize, density: f64, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_rows)
        .map(|_| {
            (0..n_cols)
                .map(|_| {
                    if rng.gen::<f64>() < density {
                        rng.gen_range(-5.0..5.0)
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

pub fn dense_multiply(a: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
    a.iter()
        .map(|row| row.iter().zip(x).map(|(a, x)| a * x).sum())
        .collect()
}

pub fn dense_transpose(a: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n_cols = a.first().map_or(0, Vec::len);
    (0..n_cols)
        .map(|j| a.iter().map(|row| row[j]).collect())
        .collect()
}

/// A deterministic global vector of length `n`.
pub fn global_vector(n: usize) -> Vec<f64> {
    (0..n).map(|i| 1.0 + 0.25 * i as f64 - 0.01 * (i * i) as f64).collect()
}

pub fn local_rows(a: &[Vec<f64>], part: &Partition) -> Vec<Vec<f64>> {
    a[part.local_rows()].to_vec()
}

/// 5-point Laplacian on an `nx x nx` grid, rows in lexicographic order.
pub fn laplacian_2d(ctx: &Context, nx: usize) -> ParCsrMatrix {
    let n = nx * nx;
    let part = Partition::new(ctx, n, n).unwrap();
    let mut a = ParCsrMatrix::new(Arc::clone(&part));
    for (local, row) in part.local_rows().enumerate() {
        let (i, j) = (row / nx, row % nx);
        if i > 0 {
            a.add_value(local, row - nx, -1.0);
        }
        if j > 0 {
            a.add_value(local, row - 1, -1.0);
        }
        a.add_value(local, row, 4.0);
        if j + 1 < nx {
            a.add_value(local, row + 1, -1.0);
        }
        if i + 1 < nx {
            a.add_value(local, row + nx, -1.0);
        }
    }
    a.finalize().unwrap();
    a
}
