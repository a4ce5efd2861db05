//! MPI communication backend.
//!
//! Requires the `distributed` feature flag and an MPI installation.
//!
//! # Usage
//!
//! The caller must initialize MPI before constructing `MpiComm`:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::new();
//! ```
//!
//! Exchanges post every send as a non-blocking request inside one request
//! scope, then block on the matching receives, so ranks never need to agree
//! on a send/receive ordering.

use ::mpi::collective::SystemOperation;
use ::mpi::topology::SimpleCommunicator;
use ::mpi::traits::*;

use super::{Communicator, Tag};
use crate::error::{DistMatError, Result};

/// Communicator over the MPI world communicator.
#[derive(Debug, Default, Clone, Copy)]
pub struct MpiComm;

impl MpiComm {
    /// Panics inside MPI calls if `mpi::initialize()` has not been called.
    pub fn new() -> Self {
        Self
    }

    fn exchange<T>(tag: Tag, sends: Vec<(usize, Vec<T>)>, sources: &[usize]) -> Vec<Vec<T>>
    where
        T: Equivalence,
    {
        let world = SimpleCommunicator::world();
        ::mpi::request::scope(|scope| {
            let requests: Vec<_> = sends
                .iter()
                .map(|(dest, data)| {
                    world
                        .process_at_rank(*dest as i32)
                        .immediate_send_with_tag(scope, &data[..], tag as i32)
                })
                .collect();
            let received = sources
                .iter()
                .map(|&src| {
                    let (msg, _status) = world
                        .process_at_rank(src as i32)
                        .receive_vec_with_tag::<T>(tag as i32);
                    msg
                })
                .collect();
            for request in requests {
                request.wait();
            }
            received
        })
    }
}

fn to_wire(v: Vec<usize>) -> Vec<u64> {
    v.into_iter().map(|i| i as u64).collect()
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        SimpleCommunicator::world().rank() as usize
    }

    fn num_ranks(&self) -> usize {
        SimpleCommunicator::world().size() as usize
    }

    fn exchange_values(
        &self,
        tag: Tag,
        sends: Vec<(usize, Vec<f64>)>,
        sources: &[usize],
    ) -> Result<Vec<Vec<f64>>> {
        Ok(Self::exchange(tag, sends, sources))
    }

    fn exchange_indices(
        &self,
        tag: Tag,
        sends: Vec<(usize, Vec<usize>)>,
        sources: &[usize],
    ) -> Result<Vec<Vec<usize>>> {
        let sends = sends.into_iter().map(|(d, v)| (d, to_wire(v))).collect();
        Ok(Self::exchange::<u64>(tag, sends, sources)
            .into_iter()
            .map(|v| v.into_iter().map(|i| i as usize).collect())
            .collect())
    }

    fn all_to_all_counts(&self, counts: &[usize]) -> Result<Vec<usize>> {
        let world = SimpleCommunicator::world();
        let n = world.size() as usize;
        if counts.len() != n {
            return Err(DistMatError::DimensionMismatch(format!(
                "all_to_all_counts got {} counts for {n} ranks",
                counts.len()
            )));
        }
        let send = to_wire(counts.to_vec());
        let mut recv = vec![0u64; n];
        world.all_to_all_into(&send[..], &mut recv[..]);
        Ok(recv.into_iter().map(|c| c as usize).collect())
    }

    fn all_gather_index(&self, value: usize) -> Result<Vec<usize>> {
        let world = SimpleCommunicator::world();
        let mut recv = vec![0u64; world.size() as usize];
        world.all_gather_into(&(value as u64), &mut recv[..]);
        Ok(recv.into_iter().map(|v| v as usize).collect())
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64> {
        let world = SimpleCommunicator::world();
        let mut global = 0.0f64;
        world.all_reduce_into(&local, &mut global, SystemOperation::sum());
        Ok(global)
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64> {
        let world = SimpleCommunicator::world();
        let mut global = 0.0f64;
        world.all_reduce_into(&local, &mut global, SystemOperation::max());
        Ok(global)
    }

    fn barrier(&self) -> Result<()> {
        SimpleCommunicator::world().barrier();
        Ok(())
    }
}
