//! Copies between local layouts of a distributed matrix.

mod common;

use std::sync::Arc;

use distmat::{
    Context, ParCooMatrix, ParCscMatrix, ParCsrMatrix, ParMatrix, Partition, SparseMatrix,
    ThreadComm,
};

use common::{global_vector, local_rows, random_dense};

#[test]
fn finalized_copies_agree() {
    common::init_tracing();
    let a_dense = random_dense(10, 10, 0.3, 5);
    let x = global_vector(10);
    ThreadComm::run(3, |comm| {
        let ctx = Context::new(comm);
        let part = Partition::new(&ctx, 10, 10).unwrap();
        let coo: ParCooMatrix = ParMatrix::from_dense(part.clone(), &local_rows(&a_dense, &part)).unwrap();
        let csr: ParCsrMatrix = coo.convert();
        let csc: ParCscMatrix = csr.convert();
        let back: ParCooMatrix = csc.convert();

        assert!(Arc::ptr_eq(coo.partition(), csc.partition()));
        assert_eq!(csc.off_proc_column_map(), coo.off_proc_column_map());
        assert_eq!(back.local_global_csr(), coo.local_global_csr());
        assert!(csc.comm_pkg().is_some());

        let local = &x[part.local_cols()];
        let mut b_coo = vec![0.0; part.local_num_rows];
        let mut b_csc = vec![0.0; part.local_num_rows];
        coo.multiply(local, &mut b_coo, false).unwrap();
        csc.multiply(local, &mut b_csc, false).unwrap();
        for (a, b) in b_coo.iter().zip(&b_csc) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    });
}

#[test]
fn unfinalized_copy_keeps_global_columns() {
    let got = ThreadComm::run(2, |comm| {
        let ctx = Context::new(comm);
        let mut a = ParCooMatrix::with_dims(&ctx, 4, 4).unwrap();
        let other = if ctx.rank() == 0 { 3 } else { 0 };
        a.add_value(1, other, 2.0);
        a.add_value(0, other, 1.0);
        let mut csr: ParCsrMatrix = a.convert();
        assert!(!csr.is_finalized());
        assert_eq!(csr.off_proc.n_cols(), 4);
        csr.finalize().unwrap();
        (csr.off_proc_column_map().to_vec(), csr.off_proc.triplets())
    });
    assert_eq!(got[0], (vec![3], vec![(0, 0, 1.0), (1, 0, 2.0)]));
    assert_eq!(got[1], (vec![0], vec![(0, 0, 1.0), (1, 0, 2.0)]));
}

#[test]
fn global_csr_constructor_routes_columns() {
    let got = ThreadComm::run(2, |comm| {
        let ctx = Context::new(comm);
        let part = Partition::new(&ctx, 4, 4).unwrap();
        // Each rank: row 0 touches columns 0 and 3, row 1 column 1.
        let a = ParCscMatrix::from_global_csr(part, &[0, 2, 3], &[0, 3, 1], &[1.0, 2.0, 3.0]).unwrap();
        (a.on_proc.nnz(), a.off_proc_column_map().to_vec())
    });
    assert_eq!(got[0], (2, vec![3]));
    assert_eq!(got[1], (1, vec![0, 1]));
}
