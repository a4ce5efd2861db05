//! Distributed products against a dense reference on 1 to 4 ranks.

mod common;

use approx::assert_abs_diff_eq;
use distmat::{
    Context, CooMatrix, CscMatrix, CsrMatrix, ParMatrix, Partition, SparseMatrix, ThreadComm,
};

use common::{dense_multiply, dense_transpose, global_vector, local_rows, random_dense};

const N_ROWS: usize = 13;
const N_COLS: usize = 11;

fn check_products<M: SparseMatrix>(num_ranks: usize, tap: bool) {
    let a_dense = random_dense(N_ROWS, N_COLS, 0.3, 42);
    let x = global_vector(N_COLS);
    let y = global_vector(N_ROWS);
    let ax = dense_multiply(&a_dense, &x);
    let aty = dense_multiply(&dense_transpose(&a_dense), &y);

    ThreadComm::run(num_ranks, |comm| {
        let ctx = common::ctx_with_ppn(comm, 2);
        let part = Partition::new(&ctx, N_ROWS, N_COLS).unwrap();
        let mut a = ParMatrix::<M>::from_dense(part.clone(), &local_rows(&a_dense, &part)).unwrap();
        if tap {
            a.init_tap_comm().unwrap();
        }

        let mut b = vec![0.0; part.local_num_rows];
        a.multiply(&x[part.local_cols()], &mut b, tap).unwrap();
        for (got, want) in b.iter().zip(&ax[part.local_rows()]) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
        }

        let rhs = vec![1.0; part.local_num_rows];
        let mut r = vec![0.0; part.local_num_rows];
        a.residual(&x[part.local_cols()], &rhs, &mut r, tap).unwrap();
        for (got, want) in r.iter().zip(&ax[part.local_rows()]) {
            assert_abs_diff_eq!(*got, 1.0 - *want, epsilon = 1e-10);
        }

        let mut bt = vec![0.0; part.local_num_cols];
        a.multiply_transpose(&y[part.local_rows()], &mut bt, tap).unwrap();
        for (got, want) in bt.iter().zip(&aty[part.local_cols()]) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
        }
    });
}

#[test]
fn csr_products_match_dense() {
    common::init_tracing();
    for n in 1..=4 {
        check_products::<CsrMatrix>(n, false);
    }
}

#[test]
fn csc_products_match_dense() {
    for n in 1..=4 {
        check_products::<CscMatrix>(n, false);
    }
}

#[test]
fn coo_products_match_dense() {
    for n in 1..=4 {
        check_products::<CooMatrix>(n, false);
    }
}

#[test]
fn tap_products_match_dense() {
    for n in 2..=4 {
        check_products::<CsrMatrix>(n, true);
    }
}

#[test]
fn more_ranks_than_rows() {
    let a_dense = random_dense(3, 3, 0.8, 7);
    let x = global_vector(3);
    let ax = dense_multiply(&a_dense, &x);
    ThreadComm::run(5, |comm| {
        let ctx = Context::new(comm);
        let part = Partition::new(&ctx, 3, 3).unwrap();
        let a = ParMatrix::<CsrMatrix>::from_dense(part.clone(), &local_rows(&a_dense, &part)).unwrap();
        let mut b = vec![0.0; part.local_num_rows];
        a.multiply(&x[part.local_cols()], &mut b, false).unwrap();
        for (got, want) in b.iter().zip(&ax[part.local_rows()]) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
        }
    });
}

#[test]
fn wrong_vector_length_is_rejected() {
    let got = ThreadComm::run(2, |comm| {
        let ctx = Context::new(comm);
        let a = common::laplacian_2d(&ctx, 3);
        let mut b = vec![0.0; a.local_num_rows()];
        a.multiply(&[1.0], &mut b, false).is_err()
    });
    assert_eq!(got, vec![true, true]);
}
