//! Communication backend abstraction for distributed matrices.
//!
//! Every distributed operation talks to its peers through [`Communicator`]:
//! tagged point-to-point exchanges for halo traffic plus the handful of
//! collectives needed to discover communication patterns.
//!
//! Implementations: [`SingleProcessComm`] (one rank, self-messages only),
//! [`ThreadComm`] (ranks simulated by threads in one process) and `MpiComm`
//! (behind the `distributed` feature).

mod thread;
#[cfg(feature = "distributed")]
mod mpi_comm;

pub use thread::ThreadComm;
#[cfg(feature = "distributed")]
pub use mpi_comm::MpiComm;

use std::fmt;

use crate::error::{DistMatError, Result};

/// Message tag. Each communication stage owns a distinct tag range so
/// messages from different stages never match each other.
pub type Tag = u16;

/// Tag ranges used across the crate.
///
/// A [`crate::comm_pkg::CommStage`] uses four consecutive tags starting at its
/// base: forward values, reverse values, row structure, row values.
pub mod tags {
    use super::Tag;

    /// Request lists exchanged while building any communication pattern.
    pub const PATTERN: Tag = 1;
    /// Off-process columns shipped to their owners by distributed transpose.
    pub const TRANSPOSE: Tag = 2;

    pub const FLAT: Tag = 16;
    pub const TAP_LOCAL_L: Tag = 32;
    pub const TAP_LOCAL_S: Tag = 48;
    pub const TAP_GLOBAL: Tag = 64;
    pub const TAP_LOCAL_R: Tag = 80;
    pub const NODAL: Tag = 96;

    /// Reserved for collectives implemented on top of point-to-point.
    pub const COLLECTIVE: Tag = 0xFF00;
}

/// Abstraction over inter-process communication.
///
/// All operations are collective over the set of ranks that take part in
/// the exchange: every send posted by one rank must be matched by a
/// receive on the destination, with the same tag. Messages between one
/// (source, destination, tag) triple are delivered in posting order.
/// Sending to oneself is allowed.
pub trait Communicator: Send + Sync + fmt::Debug {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn num_ranks(&self) -> usize;

    /// Post every `(destination, payload)` send, then receive one message
    /// from each rank in `sources`, returned in `sources` order.
    fn exchange_values(
        &self,
        tag: Tag,
        sends: Vec<(usize, Vec<f64>)>,
        sources: &[usize],
    ) -> Result<Vec<Vec<f64>>>;

    /// Same as [`Communicator::exchange_values`] for index payloads.
    fn exchange_indices(
        &self,
        tag: Tag,
        sends: Vec<(usize, Vec<usize>)>,
        sources: &[usize],
    ) -> Result<Vec<Vec<usize>>>;

    /// `counts[p]` is what this rank sends to `p`; returns what every rank
    /// sends to this one.
    fn all_to_all_counts(&self, counts: &[usize]) -> Result<Vec<usize>>;

    /// Gather one index from every rank, in rank order.
    fn all_gather_index(&self, value: usize) -> Result<Vec<usize>>;

    /// Sum a local scalar across all ranks.
    fn all_reduce_sum(&self, local: f64) -> Result<f64>;

    /// Max of a local scalar across all ranks.
    fn all_reduce_max(&self, local: f64) -> Result<f64>;

    /// Synchronization barrier.
    fn barrier(&self) -> Result<()>;
}

/// Communicator for a single process.
///
/// Collectives pass values through unchanged and the only valid peer is
/// rank 0 itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcessComm;

impl SingleProcessComm {
    fn self_exchange<T>(sends: Vec<(usize, Vec<T>)>, sources: &[usize]) -> Result<Vec<Vec<T>>> {
        if let Some(&(dest, _)) = sends.iter().find(|(dest, _)| *dest != 0) {
            return Err(DistMatError::Comm(format!(
                "single process cannot send to rank {dest}"
            )));
        }
        if let Some(&src) = sources.iter().find(|&&src| src != 0) {
            return Err(DistMatError::Comm(format!(
                "single process cannot receive from rank {src}"
            )));
        }
        let mut pending = sends.into_iter().map(|(_, data)| data);
        sources
            .iter()
            .map(|_| {
                pending
                    .next()
                    .ok_or_else(|| DistMatError::Comm("receive without matching send".into()))
            })
            .collect()
    }
}

impl Communicator for SingleProcessComm {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn exchange_values(
        &self,
        _tag: Tag,
        sends: Vec<(usize, Vec<f64>)>,
        sources: &[usize],
    ) -> Result<Vec<Vec<f64>>> {
        Self::self_exchange(sends, sources)
    }

    fn exchange_indices(
        &self,
        _tag: Tag,
        sends: Vec<(usize, Vec<usize>)>,
        sources: &[usize],
    ) -> Result<Vec<Vec<usize>>> {
        Self::self_exchange(sends, sources)
    }

    fn all_to_all_counts(&self, counts: &[usize]) -> Result<Vec<usize>> {
        Ok(counts.to_vec())
    }

    fn all_gather_index(&self, value: usize) -> Result<Vec<usize>> {
        Ok(vec![value])
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64> {
        Ok(local)
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64> {
        Ok(local)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}
