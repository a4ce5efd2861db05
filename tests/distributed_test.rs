//! Multi-process tests over MPI.
//!
//! These tests require MPI and the `distributed` feature flag.
//! Run with: mpirun -n 2 cargo test --features distributed --test distributed_test
//!
//! Without MPI installed, these tests are excluded from the default build.

#![cfg(feature = "distributed")]

use std::sync::Arc;

use distmat::comm::MpiComm;
use distmat::{Communicator, Context, ParCsrMatrix, ParVector, Partition};

#[test]
fn distributed_tridiagonal_product() {
    let _universe = mpi::initialize().expect("MPI init failed");
    let comm: Arc<dyn Communicator> = Arc::new(MpiComm::new());
    let ctx = Context::new(comm);

    let n = 4 * ctx.num_procs();
    let part = Partition::new(&ctx, n, n).unwrap();
    let mut a = ParCsrMatrix::new(part.clone());
    for (local, row) in part.local_rows().enumerate() {
        if row > 0 {
            a.add_value(local, row - 1, -1.0);
        }
        a.add_value(local, row, 2.0);
        if row + 1 < n {
            a.add_value(local, row + 1, -1.0);
        }
    }
    a.finalize().expect("finalize failed");
    a.init_tap_comm().expect("tap init failed");

    let mut x = ParVector::from_cols(&part);
    x.set_const_value(1.0);
    for tap in [false, true] {
        let mut b = ParVector::from_rows(&part);
        a.multiply(&x, &mut b, tap).expect("multiply failed");
        // Only the two boundary rows of the global matrix have a nonzero sum.
        let norm = b.norm(1.0).expect("norm failed");
        assert!((norm - 2.0).abs() < 1e-12, "||A*1||_1 = {norm}, expected 2");
    }
}
