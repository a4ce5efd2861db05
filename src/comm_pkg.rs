//! Halo exchange for the off-process columns of a distributed matrix.
//!
//! A communication pattern is a [`CommStage`]: what this rank receives
//! (per source rank, the keys it asked for) and what it sends (per
//! destination rank, the positions in its local buffer to pack). Stages are
//! built collectively from request lists, then reused for every exchange.
//! [`CommPkg`] is a single stage straight from column owners to requesters;
//! the topology-aware package in [`crate::tap_comm`] chains several.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::comm::{tags, Communicator, Tag};
use crate::error::{DistMatError, Result};
use crate::par_matrix::ParMatrix;
use crate::partition::{Context, Partition};
use crate::sparse::{CsrMatrix, SparseMatrix};

/// One side of a communication pattern.
///
/// Message `i` goes to or comes from `procs[i]` and covers
/// `indices[indptr[i]..indptr[i + 1]]`. On the send side the indices are
/// positions in the local source buffer; on the receive side they are the
/// keys (global columns) that were requested, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommData {
    pub procs: Vec<usize>,
    pub indptr: Vec<usize>,
    pub indices: Vec<usize>,
}

impl Default for CommData {
    fn default() -> Self {
        Self {
            procs: Vec::new(),
            indptr: vec![0],
            indices: Vec::new(),
        }
    }
}

impl CommData {
    pub fn num_msgs(&self) -> usize {
        self.procs.len()
    }

    /// Total number of entries over all messages.
    pub fn size_msgs(&self) -> usize {
        self.indices.len()
    }

    pub fn range(&self, msg: usize) -> Range<usize> {
        self.indptr[msg]..self.indptr[msg + 1]
    }

    fn push_msg<I: IntoIterator<Item = usize>>(&mut self, proc: usize, indices: I) {
        self.procs.push(proc);
        self.indices.extend(indices);
        self.indptr.push(self.indices.len());
    }
}

/// Exchange request lists and learn what every other rank wants from this
/// one. Collective.
///
/// `requests[p]` lists the keys this rank needs from rank `p`. Returns the
/// receive side of the pattern and, per requesting rank, its key list.
pub(crate) fn exchange_requests(
    comm: &dyn Communicator,
    requests: BTreeMap<usize, Vec<usize>>,
) -> Result<(CommData, Vec<(usize, Vec<usize>)>)> {
    let n = comm.num_ranks();
    let mut counts = vec![0usize; n];
    let mut recv = CommData::default();
    let mut sends = Vec::with_capacity(requests.len());
    for (proc, keys) in requests {
        if keys.is_empty() {
            continue;
        }
        counts[proc] = keys.len();
        recv.push_msg(proc, keys.iter().copied());
        sends.push((proc, keys));
    }

    let incoming = comm.all_to_all_counts(&counts)?;
    let sources: Vec<usize> = (0..n).filter(|&p| incoming[p] > 0).collect();
    let lists = comm.exchange_indices(tags::PATTERN, sends, &sources)?;
    sources
        .into_iter()
        .zip(lists)
        .map(|(src, keys)| {
            if keys.len() == incoming[src] {
                Ok((src, keys))
            } else {
                Err(DistMatError::MessageSize {
                    rank: src,
                    expected: incoming[src],
                    actual: keys.len(),
                })
            }
        })
        .collect::<Result<Vec<_>>>()
        .map(|incoming| (recv, incoming))
}

/// Rows travelling through a halo exchange: compressed rows with global
/// column indices.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBuffer {
    pub row_ptr: Vec<usize>,
    pub cols: Vec<usize>,
    pub vals: Vec<f64>,
}

impl Default for RowBuffer {
    fn default() -> Self {
        Self {
            row_ptr: vec![0],
            cols: Vec::new(),
            vals: Vec::new(),
        }
    }
}

impl RowBuffer {
    pub fn n_rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        (&self.cols[range.clone()], &self.vals[range])
    }

    pub fn push_row(&mut self, cols: &[usize], vals: &[f64]) {
        self.cols.extend_from_slice(cols);
        self.vals.extend_from_slice(vals);
        self.row_ptr.push(self.cols.len());
    }

    /// Rows of a CSR matrix, column indices untouched.
    pub fn from_csr(m: &CsrMatrix) -> Self {
        let mut buf = Self::default();
        for row in 0..m.nrows {
            let range = m.row_range(row);
            buf.push_row(&m.col_indices[range.clone()], &m.values[range]);
        }
        buf
    }

    pub fn into_csr(self, ncols: usize) -> CsrMatrix {
        CsrMatrix::from_parts(self.row_ptr.len() - 1, ncols, self.row_ptr, self.cols, self.vals)
    }
}

/// A communication pattern plus the tag range its messages use.
#[derive(Debug, Clone)]
pub struct CommStage {
    pub send: CommData,
    pub recv: CommData,
    tag: Tag,
}

impl CommStage {
    /// Build a stage from request lists. Collective.
    ///
    /// `to_local` turns a key requested from this rank into a position in
    /// the buffer this rank will send from.
    pub fn new<F>(
        comm: &dyn Communicator,
        tag: Tag,
        requests: BTreeMap<usize, Vec<usize>>,
        to_local: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> Result<usize>,
    {
        let (recv, incoming) = exchange_requests(comm, requests)?;
        Self::from_incoming(tag, recv, incoming, to_local)
    }

    pub(crate) fn from_incoming<F>(
        tag: Tag,
        recv: CommData,
        incoming: Vec<(usize, Vec<usize>)>,
        mut to_local: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> Result<usize>,
    {
        let mut send = CommData::default();
        for (proc, keys) in incoming {
            let positions = keys
                .into_iter()
                .map(&mut to_local)
                .collect::<Result<Vec<_>>>()?;
            send.push_msg(proc, positions);
        }
        Ok(Self { send, recv, tag })
    }

    /// A stage that sends and receives nothing.
    pub fn empty(tag: Tag) -> Self {
        Self {
            send: CommData::default(),
            recv: CommData::default(),
            tag,
        }
    }

    /// Pack `source` per the send side and return everything received,
    /// concatenated in receive order.
    pub fn communicate_values(&self, comm: &dyn Communicator, source: &[f64]) -> Result<Vec<f64>> {
        let sends = (0..self.send.num_msgs())
            .map(|i| {
                let packed = self.send.indices[self.send.range(i)]
                    .iter()
                    .map(|&k| source[k])
                    .collect();
                (self.send.procs[i], packed)
            })
            .collect();
        let received = comm.exchange_values(self.tag, sends, &self.recv.procs)?;

        let mut out = Vec::with_capacity(self.recv.size_msgs());
        for (i, msg) in received.into_iter().enumerate() {
            let expected = self.recv.range(i).len();
            if msg.len() != expected {
                return Err(DistMatError::MessageSize {
                    rank: self.recv.procs[i],
                    expected,
                    actual: msg.len(),
                });
            }
            out.extend(msg);
        }
        Ok(out)
    }

    /// Reverse of [`CommStage::communicate_values`]: `values` is laid out like
    /// the receive buffer and is sent back to its owners, which add each
    /// value into `dest` at the matching send position.
    pub fn communicate_reverse(
        &self,
        comm: &dyn Communicator,
        values: &[f64],
        dest: &mut [f64],
    ) -> Result<()> {
        let sends = (0..self.recv.num_msgs())
            .map(|i| (self.recv.procs[i], values[self.recv.range(i)].to_vec()))
            .collect();
        let received = comm.exchange_values(self.tag + 1, sends, &self.send.procs)?;

        for (i, msg) in received.into_iter().enumerate() {
            let range = self.send.range(i);
            if msg.len() != range.len() {
                return Err(DistMatError::MessageSize {
                    rank: self.send.procs[i],
                    expected: range.len(),
                    actual: msg.len(),
                });
            }
            for (&k, v) in self.send.indices[range].iter().zip(msg) {
                dest[k] += v;
            }
        }
        Ok(())
    }

    /// Ship whole rows of `source`. Each message carries
    /// `len, col, col, .., len, col, ..` in one index payload and the values
    /// in a second payload.
    pub fn communicate_rows(&self, comm: &dyn Communicator, source: &RowBuffer) -> Result<RowBuffer> {
        let mut idx_sends = Vec::with_capacity(self.send.num_msgs());
        let mut val_sends = Vec::with_capacity(self.send.num_msgs());
        for i in 0..self.send.num_msgs() {
            let mut idx = Vec::new();
            let mut vals = Vec::new();
            for &row in &self.send.indices[self.send.range(i)] {
                let (cols, v) = source.row(row);
                idx.push(cols.len());
                idx.extend_from_slice(cols);
                vals.extend_from_slice(v);
            }
            idx_sends.push((self.send.procs[i], idx));
            val_sends.push((self.send.procs[i], vals));
        }
        let idx_msgs = comm.exchange_indices(self.tag + 2, idx_sends, &self.recv.procs)?;
        let val_msgs = comm.exchange_values(self.tag + 3, val_sends, &self.recv.procs)?;

        let mut out = RowBuffer::default();
        for (i, (idx, vals)) in idx_msgs.into_iter().zip(val_msgs).enumerate() {
            let rank = self.recv.procs[i];
            let malformed = || DistMatError::Comm(format!("malformed row message from rank {rank}"));
            let (mut pos, mut vpos) = (0, 0);
            for _ in self.recv.range(i) {
                let len = *idx.get(pos).ok_or_else(malformed)?;
                let cols = idx.get(pos + 1..pos + 1 + len).ok_or_else(malformed)?;
                let v = vals.get(vpos..vpos + len).ok_or_else(malformed)?;
                out.push_row(cols, v);
                pos += 1 + len;
                vpos += len;
            }
            if pos != idx.len() || vpos != vals.len() {
                return Err(malformed());
            }
        }
        Ok(out)
    }

    /// Number of ranks this stage sends to.
    pub fn num_sends(&self) -> usize {
        self.send.num_msgs()
    }
}

/// A prebuilt halo exchange: fetch the off-process entries a matrix needs,
/// or push contributions back to their owners.
pub trait HaloExchange: fmt::Debug + Send + Sync {
    /// Length of the local buffer the exchange sends from.
    fn local_size(&self) -> usize;

    /// Number of off-process values delivered by [`HaloExchange::communicate`].
    fn recv_size(&self) -> usize;

    /// Fetch the off-process entries of the distributed vector whose local
    /// part is `x`, aligned with the off-process column map. Collective.
    fn communicate(&self, x: &[f64]) -> Result<Vec<f64>>;

    /// Reverse exchange: `values` is aligned with the off-process column map;
    /// each value is added into `result` on the rank that owns its column.
    /// Collective.
    fn communicate_transpose(&self, values: &[f64], result: &mut [f64]) -> Result<()>;

    /// Fetch whole off-process rows, aligned with the off-process column map.
    /// `rows` holds this rank's local rows with global column indices.
    fn communicate_rows(&self, rows: &RowBuffer) -> Result<RowBuffer>;

    /// Fetch the rows of `b` matching this exchange's off-process columns as
    /// a CSR matrix with global column indices, each row sorted.
    fn communicate_matrix<M: SparseMatrix>(&self, b: &ParMatrix<M>) -> Result<CsrMatrix>
    where
        Self: Sized,
    {
        let received = self.communicate_rows(&b.global_row_buffer())?;
        let mut m = received.into_csr(b.partition().global_num_cols);
        m.sort();
        Ok(m)
    }
}

pub(crate) fn check_len(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(DistMatError::DimensionMismatch(format!(
            "{what} has length {actual}, expected {expected}"
        )))
    }
}

/// Direct exchange between column owners and the ranks that need them.
#[derive(Debug, Clone)]
pub struct CommPkg {
    ctx: Context,
    stage: CommStage,
    local_size: usize,
}

impl CommPkg {
    /// Build the pattern for `off_proc_column_map`, which must be strictly
    /// increasing global columns. Collective.
    pub fn new(partition: &Partition, off_proc_column_map: &[usize]) -> Result<Self> {
        Self::with_tag(partition, off_proc_column_map, tags::FLAT)
    }

    pub(crate) fn with_tag(
        partition: &Partition,
        off_proc_column_map: &[usize],
        tag: Tag,
    ) -> Result<Self> {
        let _span = tracing::debug_span!(
            "comm_pkg_init",
            rank = partition.rank(),
            off_proc_cols = off_proc_column_map.len()
        )
        .entered();

        if !off_proc_column_map.windows(2).all(|w| w[0] < w[1]) {
            return Err(DistMatError::InvalidPartition(
                "off-process column map must be strictly increasing".into(),
            ));
        }
        let mut requests: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &col in off_proc_column_map {
            if col >= partition.global_num_cols {
                return Err(DistMatError::InvalidPartition(format!(
                    "column {col} outside {} global columns",
                    partition.global_num_cols
                )));
            }
            requests.entry(partition.col_owner(col)).or_default().push(col);
        }

        let first = partition.first_local_col;
        let stage = CommStage::new(partition.comm(), tag, requests, |col| {
            if partition.owns_col(col) {
                Ok(col - first)
            } else {
                Err(DistMatError::Comm(format!(
                    "column {col} requested from rank {} which does not own it",
                    partition.rank()
                )))
            }
        })?;
        tracing::debug!(
            recv_msgs = stage.recv.num_msgs(),
            send_msgs = stage.send.num_msgs(),
            send_size = stage.send.size_msgs(),
            "comm pkg built"
        );

        Ok(Self {
            ctx: partition.ctx().clone(),
            stage,
            local_size: partition.local_num_cols,
        })
    }

    pub fn send_data(&self) -> &CommData {
        &self.stage.send
    }

    pub fn recv_data(&self) -> &CommData {
        &self.stage.recv
    }

    pub fn stage(&self) -> &CommStage {
        &self.stage
    }
}

impl HaloExchange for CommPkg {
    fn local_size(&self) -> usize {
        self.local_size
    }

    fn recv_size(&self) -> usize {
        self.stage.recv.size_msgs()
    }

    fn communicate(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_len("local vector", x.len(), self.local_size)?;
        self.stage.communicate_values(self.ctx.comm(), x)
    }

    fn communicate_transpose(&self, values: &[f64], result: &mut [f64]) -> Result<()> {
        check_len("off-process values", values.len(), self.recv_size())?;
        check_len("local result", result.len(), self.local_size)?;
        self.stage.communicate_reverse(self.ctx.comm(), values, result)
    }

    fn communicate_rows(&self, rows: &RowBuffer) -> Result<RowBuffer> {
        check_len("local rows", rows.n_rows(), self.local_size)?;
        self.stage.communicate_rows(self.ctx.comm(), rows)
    }
}
