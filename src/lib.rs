//! Distributed sparse matrices.
//!
//! Rows of a matrix are partitioned across ranks; each rank keeps the
//! columns it owns and the columns owned elsewhere in separate local blocks
//! and fetches the off-process vector entries it needs through a halo
//! exchange, either directly or routed by node topology.

pub mod comm;
pub mod comm_pkg;
pub mod config;
pub mod error;
pub mod par_matrix;
pub mod partition;
pub mod sparse;
pub mod tap_comm;
pub mod vector;

pub use comm::{Communicator, SingleProcessComm, ThreadComm};
pub use comm_pkg::{CommPkg, HaloExchange};
pub use config::CommConfig;
pub use error::{DistMatError, Result};
pub use par_matrix::{ParCooMatrix, ParCscMatrix, ParCsrMatrix, ParMatrix};
pub use partition::{Context, Partition, Topology};
pub use sparse::{CooMatrix, CscMatrix, CsrMatrix, SparseMatrix};
pub use tap_comm::TapCommPkg;
pub use vector::ParVector;
