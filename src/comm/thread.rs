//! In-process communicator: every rank is a thread sharing one mailbox table.
//!
//! Used to run multi-rank code paths without an MPI installation. Sends
//! never block; receives wait on the destination's condition variable until
//! a message from the requested (source, tag) arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{tags, Communicator, Tag};
use crate::error::{DistMatError, Result};

#[derive(Debug)]
enum Payload {
    Values(Vec<f64>),
    Indices(Vec<usize>),
}

#[derive(Debug, Default)]
struct Mailbox {
    queues: Mutex<HashMap<(usize, Tag), VecDeque<Payload>>>,
    arrived: Condvar,
}

#[derive(Debug)]
struct World {
    mailboxes: Vec<Mailbox>,
    /// Set when any rank panics so blocked receivers fail instead of hanging.
    poisoned: AtomicBool,
}

impl World {
    fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
        for mailbox in &self.mailboxes {
            let _queues = mailbox.queues.lock();
            mailbox.arrived.notify_all();
        }
    }
}

/// One rank's handle on a thread-simulated world.
#[derive(Debug, Clone)]
pub struct ThreadComm {
    rank: usize,
    world: Arc<World>,
}

impl ThreadComm {
    /// Create handles for `num_ranks` ranks sharing one world.
    pub fn world(num_ranks: usize) -> Vec<ThreadComm> {
        let world = Arc::new(World {
            mailboxes: (0..num_ranks).map(|_| Mailbox::default()).collect(),
            poisoned: AtomicBool::new(false),
        });
        (0..num_ranks)
            .map(|rank| ThreadComm {
                rank,
                world: Arc::clone(&world),
            })
            .collect()
    }

    /// Run `f` once per rank on its own thread and collect the results in
    /// rank order. A panic on any rank is propagated to the caller.
    pub fn run<F, R>(num_ranks: usize, f: F) -> Vec<R>
    where
        F: Fn(Arc<dyn Communicator>) -> R + Sync,
        R: Send,
    {
        let comms = Self::world(num_ranks);
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || {
                        let _guard = PoisonOnPanic(Arc::clone(&comm.world));
                        f(Arc::new(comm))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }

    fn post(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()> {
        let mailbox = self.world.mailboxes.get(dest).ok_or_else(|| {
            DistMatError::Comm(format!(
                "rank {dest} out of range for {} ranks",
                self.num_ranks()
            ))
        })?;
        mailbox
            .queues
            .lock()
            .entry((self.rank, tag))
            .or_default()
            .push_back(payload);
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn take(&self, source: usize, tag: Tag) -> Result<Payload> {
        if source >= self.num_ranks() {
            return Err(DistMatError::Comm(format!(
                "rank {source} out of range for {} ranks",
                self.num_ranks()
            )));
        }
        let mailbox = &self.world.mailboxes[self.rank];
        let mut queues = mailbox.queues.lock();
        loop {
            if let Some(payload) = queues.get_mut(&(source, tag)).and_then(VecDeque::pop_front) {
                return Ok(payload);
            }
            if self.world.poisoned.load(Ordering::SeqCst) {
                return Err(DistMatError::Comm(format!(
                    "rank {} gave up waiting on rank {source}: a peer panicked",
                    self.rank
                )));
            }
            mailbox.arrived.wait(&mut queues);
        }
    }

    fn take_values(&self, source: usize, tag: Tag) -> Result<Vec<f64>> {
        match self.take(source, tag)? {
            Payload::Values(v) => Ok(v),
            Payload::Indices(_) => Err(DistMatError::Comm(format!(
                "expected values from rank {source} with tag {tag}, got indices"
            ))),
        }
    }

    fn take_indices(&self, source: usize, tag: Tag) -> Result<Vec<usize>> {
        match self.take(source, tag)? {
            Payload::Indices(v) => Ok(v),
            Payload::Values(_) => Err(DistMatError::Comm(format!(
                "expected indices from rank {source} with tag {tag}, got values"
            ))),
        }
    }

    fn gather_indices(&self, tag: Tag, value: Vec<usize>) -> Result<Vec<Vec<usize>>> {
        let n = self.num_ranks();
        for dest in 0..n {
            self.post(dest, tag, Payload::Indices(value.clone()))?;
        }
        (0..n).map(|src| self.take_indices(src, tag)).collect()
    }

    fn gather_value(&self, tag: Tag, value: f64) -> Result<Vec<f64>> {
        let n = self.num_ranks();
        for dest in 0..n {
            self.post(dest, tag, Payload::Values(vec![value]))?;
        }
        (0..n)
            .map(|src| {
                let v = self.take_values(src, tag)?;
                v.first().copied().ok_or(DistMatError::MessageSize {
                    rank: src,
                    expected: 1,
                    actual: 0,
                })
            })
            .collect()
    }
}

struct PoisonOnPanic(Arc<World>);

impl Drop for PoisonOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.poison();
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.world.mailboxes.len()
    }

    fn exchange_values(
        &self,
        tag: Tag,
        sends: Vec<(usize, Vec<f64>)>,
        sources: &[usize],
    ) -> Result<Vec<Vec<f64>>> {
        for (dest, data) in sends {
            self.post(dest, tag, Payload::Values(data))?;
        }
        sources.iter().map(|&src| self.take_values(src, tag)).collect()
    }

    fn exchange_indices(
        &self,
        tag: Tag,
        sends: Vec<(usize, Vec<usize>)>,
        sources: &[usize],
    ) -> Result<Vec<Vec<usize>>> {
        for (dest, data) in sends {
            self.post(dest, tag, Payload::Indices(data))?;
        }
        sources.iter().map(|&src| self.take_indices(src, tag)).collect()
    }

    fn all_to_all_counts(&self, counts: &[usize]) -> Result<Vec<usize>> {
        let n = self.num_ranks();
        if counts.len() != n {
            return Err(DistMatError::DimensionMismatch(format!(
                "all_to_all_counts got {} counts for {n} ranks",
                counts.len()
            )));
        }
        let tag = tags::COLLECTIVE;
        for (dest, &count) in counts.iter().enumerate() {
            self.post(dest, tag, Payload::Indices(vec![count]))?;
        }
        (0..n)
            .map(|src| {
                let v = self.take_indices(src, tag)?;
                v.first().copied().ok_or(DistMatError::MessageSize {
                    rank: src,
                    expected: 1,
                    actual: 0,
                })
            })
            .collect()
    }

    fn all_gather_index(&self, value: usize) -> Result<Vec<usize>> {
        let gathered = self.gather_indices(tags::COLLECTIVE + 1, vec![value])?;
        Ok(gathered.into_iter().flatten().collect())
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64> {
        // Summed in rank order so every rank gets bit-identical results.
        Ok(self.gather_value(tags::COLLECTIVE + 2, local)?.into_iter().sum())
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64> {
        Ok(self
            .gather_value(tags::COLLECTIVE + 3, local)?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    fn barrier(&self) -> Result<()> {
        self.gather_indices(tags::COLLECTIVE + 4, Vec::new()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_results_in_rank_order() {
        let ranks = ThreadComm::run(4, |comm| comm.rank());
        assert_eq!(ranks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn ring_exchange() {
        let got = ThreadComm::run(3, |comm| {
            let n = comm.num_ranks();
            let next = (comm.rank() + 1) % n;
            let prev = (comm.rank() + n - 1) % n;
            comm.exchange_values(tags::FLAT, vec![(next, vec![comm.rank() as f64])], &[prev])
                .unwrap()
        });
        assert_eq!(got, vec![vec![vec![2.0]], vec![vec![0.0]], vec![vec![1.0]]]);
    }

    #[test]
    fn messages_with_same_tag_arrive_in_order() {
        let got = ThreadComm::run(2, |comm| {
            let other = 1 - comm.rank();
            comm.exchange_indices(tags::FLAT, vec![(other, vec![1]), (other, vec![2])], &[other, other])
                .unwrap()
        });
        assert_eq!(got[0], vec![vec![1], vec![2]]);
        assert_eq!(got[1], vec![vec![1], vec![2]]);
    }

    #[test]
    fn collectives_agree_across_ranks() {
        let got = ThreadComm::run(3, |comm| {
            let r = comm.rank();
            let counts: Vec<usize> = (0..3).map(|p| 10 * r + p).collect();
            (
                comm.all_to_all_counts(&counts).unwrap(),
                comm.all_gather_index(r * r).unwrap(),
                comm.all_reduce_sum(r as f64 + 0.5).unwrap(),
                comm.all_reduce_max(r as f64).unwrap(),
                comm.barrier().is_ok(),
            )
        });
        for (r, (a2a, gathered, sum, max, barrier)) in got.into_iter().enumerate() {
            assert_eq!(a2a, vec![r, 10 + r, 20 + r]);
            assert_eq!(gathered, vec![0, 1, 4]);
            assert_eq!(sum, 4.5);
            assert_eq!(max, 2.0);
            assert!(barrier);
        }
    }

    #[test]
    fn mismatched_payload_kind_is_an_error() {
        let got = ThreadComm::run(1, |comm| {
            comm.exchange_values(tags::FLAT, vec![(0, vec![1.0])], &[]).unwrap();
            comm.exchange_indices(tags::FLAT, vec![], &[0]).is_err()
        });
        assert!(got[0]);
    }

    #[test]
    fn out_of_range_destination_is_an_error() {
        let got = ThreadComm::run(2, |comm| {
            comm.exchange_values(tags::FLAT, vec![(5, vec![1.0])], &[]).is_err()
        });
        assert_eq!(got, vec![true, true]);
    }
}
