//! Distributed transpose.

mod common;

use distmat::{
    Context, CooMatrix, CscMatrix, CsrMatrix, DistMatError, HaloExchange, ParCsrMatrix, ParMatrix,
    Partition, SparseMatrix, ThreadComm,
};

use common::{dense_transpose, local_rows, random_dense};

fn check_transpose<M: SparseMatrix>(num_ranks: usize, n_rows: usize, n_cols: usize) {
    let a_dense = random_dense(n_rows, n_cols, 0.35, 11);
    let t_dense = dense_transpose(&a_dense);

    ThreadComm::run(num_ranks, |comm| {
        let ctx = Context::new(comm);
        let part = Partition::new(&ctx, n_rows, n_cols).unwrap();
        let a = ParMatrix::<M>::from_dense(part.clone(), &local_rows(&a_dense, &part)).unwrap();
        let t = a.transpose().unwrap();

        assert_eq!(t.global_num_rows(), n_cols);
        assert_eq!(t.global_num_cols(), n_rows);
        assert_eq!(t.partition().local_rows(), part.local_cols());
        let expected = CsrMatrix::from_triplets(
            t.local_num_rows(),
            n_rows,
            &local_rows(&t_dense, t.partition())
                .iter()
                .enumerate()
                .flat_map(|(r, row)| {
                    row.iter()
                        .enumerate()
                        .filter(|(_, v)| **v != 0.0)
                        .map(move |(c, v)| (r, c, *v))
                })
                .collect::<Vec<_>>(),
        );
        assert_eq!(t.local_global_csr(), expected);

        let tt = t.transpose().unwrap();
        assert_eq!(tt.local_global_csr(), a.local_global_csr());
        assert_eq!(tt.off_proc_column_map(), a.off_proc_column_map());
    });
}

#[test]
fn transpose_twice_reproduces_csr() {
    common::init_tracing();
    for n in 2..=4 {
        check_transpose::<CsrMatrix>(n, 10, 10);
        check_transpose::<CsrMatrix>(n, 9, 14);
    }
}

#[test]
fn transpose_twice_reproduces_other_layouts() {
    check_transpose::<CscMatrix>(3, 12, 8);
    check_transpose::<CooMatrix>(3, 12, 8);
}

#[test]
fn transpose_has_non_empty_off_process_block() {
    let got = ThreadComm::run(2, |comm| {
        let ctx = Context::new(comm);
        let a = common::laplacian_2d(&ctx, 4);
        let t = a.transpose().unwrap();
        (a.off_proc.nnz(), t.off_proc.nnz(), t.comm_pkg().map(|p| p.recv_size()))
    });
    for (a_off, t_off, recv) in got {
        assert!(a_off > 0);
        // The Laplacian is symmetric, so the halo has the same shape.
        assert_eq!(a_off, t_off);
        assert_eq!(recv, Some(4));
    }
}

#[test]
fn transpose_without_package_is_an_error() {
    let got = ThreadComm::run(2, |comm| {
        let ctx = Context::new(comm);
        let mut a = ParCsrMatrix::with_dims(&ctx, 4, 4).unwrap();
        a.add_value(0, 3, 1.0);
        a.finalize_with(false, 0).unwrap();
        matches!(a.transpose(), Err(DistMatError::MissingCommPkg(_)))
    });
    assert_eq!(got, vec![true, true]);
}
