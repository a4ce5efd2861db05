//! Distributed sparse matrix.
//!
//! Rows are partitioned across ranks. Each rank stores its rows as two local
//! blocks: `on_proc` holds the columns this rank owns (local column
//! indices), `off_proc` the columns owned elsewhere. Until [`ParMatrix::finalize`]
//! the off-process block is indexed by global column; finalize condenses it
//! to the columns actually used and records them in the off-process column
//! map, then builds the halo exchange that feeds them.

mod nodal;

pub use nodal::NodalSplit;

use std::sync::Arc;

use crate::comm::tags;
use crate::comm_pkg::{check_len, CommPkg, HaloExchange, RowBuffer};
use crate::error::{DistMatError, Result};
use crate::partition::{Context, Partition};
use crate::sparse::{CooMatrix, CscMatrix, CsrMatrix, SparseMatrix};
use crate::tap_comm::TapCommPkg;

pub type ParCooMatrix = ParMatrix<CooMatrix>;
pub type ParCsrMatrix = ParMatrix<CsrMatrix>;
pub type ParCscMatrix = ParMatrix<CscMatrix>;

#[derive(Debug, Clone)]
pub struct ParMatrix<M: SparseMatrix> {
    partition: Arc<Partition>,
    pub on_proc: M,
    pub off_proc: M,
    local_row_map: Vec<usize>,
    on_proc_column_map: Vec<usize>,
    /// Global column of every off-process column, strictly increasing.
    off_proc_column_map: Vec<usize>,
    /// Scalar columns per off-process column in the halo exchange; 0 when
    /// unexpanded.
    block_cols: usize,
    /// `off_proc` still uses global column indices.
    off_proc_global: bool,
    comm_pkg: Option<Arc<CommPkg>>,
    tap_comm_pkg: Option<Arc<TapCommPkg>>,
}

impl<M: SparseMatrix> ParMatrix<M> {
    /// An empty matrix over `partition`.
    pub fn new(partition: Arc<Partition>) -> Self {
        let on_proc = M::with_dims(partition.local_num_rows, partition.local_num_cols);
        let off_proc = M::with_dims(partition.local_num_rows, partition.global_num_cols);
        Self {
            local_row_map: partition.local_rows().collect(),
            on_proc_column_map: partition.local_cols().collect(),
            partition,
            on_proc,
            off_proc,
            off_proc_column_map: Vec::new(),
            block_cols: 0,
            off_proc_global: true,
            comm_pkg: None,
            tap_comm_pkg: None,
        }
    }

    /// An empty matrix over an even partition.
    pub fn with_dims(ctx: &Context, global_num_rows: usize, global_num_cols: usize) -> Result<Self> {
        Ok(Self::new(Partition::new(ctx, global_num_rows, global_num_cols)?))
    }

    /// Assemble from prebuilt local blocks. `on_proc` uses local column
    /// indices, `off_proc` global ones. Not finalized.
    pub fn from_blocks(partition: Arc<Partition>, on_proc: M, off_proc: M) -> Result<Self> {
        let rows = partition.local_num_rows;
        if on_proc.n_rows() != rows || on_proc.n_cols() != partition.local_num_cols {
            return Err(DistMatError::DimensionMismatch(format!(
                "on-process block is {}x{}, partition needs {rows}x{}",
                on_proc.n_rows(),
                on_proc.n_cols(),
                partition.local_num_cols
            )));
        }
        if off_proc.n_rows() != rows || off_proc.n_cols() != partition.global_num_cols {
            return Err(DistMatError::DimensionMismatch(format!(
                "off-process block is {}x{}, partition needs {rows}x{}",
                off_proc.n_rows(),
                off_proc.n_cols(),
                partition.global_num_cols
            )));
        }
        let mut m = Self::new(partition);
        m.on_proc = on_proc;
        m.off_proc = off_proc;
        Ok(m)
    }

    /// Build from this rank's rows in compressed form with global column
    /// indices, then finalize. Collective.
    pub fn from_global_csr(
        partition: Arc<Partition>,
        row_ptr: &[usize],
        cols: &[usize],
        vals: &[f64],
    ) -> Result<Self> {
        check_len("row pointer", row_ptr.len(), partition.local_num_rows + 1)?;
        check_len("values", vals.len(), cols.len())?;
        let mut on = CooMatrix::new(partition.local_num_rows, partition.local_num_cols);
        let mut off = CooMatrix::new(partition.local_num_rows, partition.global_num_cols);
        for row in 0..partition.local_num_rows {
            for k in row_ptr[row]..row_ptr[row + 1] {
                let col = cols[k];
                if col >= partition.global_num_cols {
                    return Err(DistMatError::DimensionMismatch(format!(
                        "column {col} outside {} global columns",
                        partition.global_num_cols
                    )));
                }
                if partition.owns_col(col) {
                    on.add_value(row, col - partition.first_local_col, vals[k]);
                } else {
                    off.add_value(row, col, vals[k]);
                }
            }
        }
        let mut m = Self::from_blocks(partition, M::from_sparse(&on), M::from_sparse(&off))?;
        m.finalize()?;
        Ok(m)
    }

    /// Build from this rank's dense rows (`local_num_rows` rows of
    /// `global_num_cols` entries), skipping zeros, then finalize. Collective.
    pub fn from_dense(partition: Arc<Partition>, local_rows: &[Vec<f64>]) -> Result<Self> {
        check_len("dense rows", local_rows.len(), partition.local_num_rows)?;
        let mut row_ptr = vec![0];
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for row in local_rows {
            check_len("dense row", row.len(), partition.global_num_cols)?;
            for (col, &v) in row.iter().enumerate().filter(|(_, v)| **v != 0.0) {
                cols.push(col);
                vals.push(v);
            }
            row_ptr.push(cols.len());
        }
        Self::from_global_csr(partition, &row_ptr, &cols, &vals)
    }

    /// Copy into another local layout. Shares the partition and the halo
    /// exchanges; blocks and maps are copied.
    pub fn convert<N: SparseMatrix>(&self) -> ParMatrix<N> {
        ParMatrix {
            partition: Arc::clone(&self.partition),
            on_proc: N::from_sparse(&self.on_proc),
            off_proc: N::from_sparse(&self.off_proc),
            local_row_map: self.local_row_map.clone(),
            on_proc_column_map: self.on_proc_column_map.clone(),
            off_proc_column_map: self.off_proc_column_map.clone(),
            block_cols: self.block_cols,
            off_proc_global: self.off_proc_global,
            comm_pkg: self.comm_pkg.clone(),
            tap_comm_pkg: self.tap_comm_pkg.clone(),
        }
    }

    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    pub fn global_num_rows(&self) -> usize {
        self.partition.global_num_rows
    }

    pub fn global_num_cols(&self) -> usize {
        self.partition.global_num_cols
    }

    pub fn local_num_rows(&self) -> usize {
        self.partition.local_num_rows
    }

    pub fn local_nnz(&self) -> usize {
        self.on_proc.nnz() + self.off_proc.nnz()
    }

    /// Nonzeros summed over every rank. Collective.
    pub fn global_nnz(&self) -> Result<usize> {
        let counts = self.partition.comm().all_gather_index(self.local_nnz())?;
        Ok(counts.into_iter().sum())
    }

    /// Global row of every local row.
    pub fn local_row_map(&self) -> &[usize] {
        &self.local_row_map
    }

    /// Global column of every on-process column.
    pub fn on_proc_column_map(&self) -> &[usize] {
        &self.on_proc_column_map
    }

    /// Global column of every off-process column. Empty before finalize.
    pub fn off_proc_column_map(&self) -> &[usize] {
        &self.off_proc_column_map
    }

    pub fn off_proc_num_cols(&self) -> usize {
        self.off_proc_column_map.len()
    }

    /// The scalar columns the halo exchanges were built over: the
    /// off-process column map, each entry expanded into `block_cols`
    /// consecutive scalar columns when block expansion was requested.
    pub fn comm_column_map(&self) -> Vec<usize> {
        if self.block_cols == 0 {
            return self.off_proc_column_map.clone();
        }
        let b = self.block_cols;
        self.off_proc_column_map
            .iter()
            .flat_map(|&col| col * b..(col + 1) * b)
            .collect()
    }

    pub fn block_cols(&self) -> usize {
        self.block_cols
    }

    pub fn is_finalized(&self) -> bool {
        !self.off_proc_global
    }

    pub fn comm_pkg(&self) -> Option<&CommPkg> {
        self.comm_pkg.as_deref()
    }

    pub fn tap_comm_pkg(&self) -> Option<&TapCommPkg> {
        self.tap_comm_pkg.as_deref()
    }

    /// Add `value` at (`local_row`, `global_col`). Columns owned by this
    /// rank go to the on-process block, all others to the off-process block.
    /// Duplicates are summed at the next finalize.
    pub fn add_value(&mut self, local_row: usize, global_col: usize, value: f64) {
        if self.partition.owns_col(global_col) {
            let col = global_col - self.partition.first_local_col;
            self.on_proc.add_value(local_row, col, value);
        } else {
            if !self.off_proc_global {
                self.globalize_off_proc();
            }
            self.off_proc.add_value(local_row, global_col, value);
        }
    }

    /// Same as [`ParMatrix::add_value`] with a global row, which must be
    /// owned by this rank.
    pub fn add_global_value(&mut self, global_row: usize, global_col: usize, value: f64) -> Result<()> {
        if !self.partition.local_rows().contains(&global_row) {
            return Err(DistMatError::InvalidPartition(format!(
                "row {global_row} is not owned by rank {}",
                self.partition.rank()
            )));
        }
        self.add_value(global_row - self.partition.first_local_row, global_col, value);
        Ok(())
    }

    /// Back to global off-process column indices so new entries can join.
    fn globalize_off_proc(&mut self) {
        let map = std::mem::take(&mut self.off_proc_column_map);
        // Widen first: global indices must fit before they are written.
        self.off_proc
            .resize(self.partition.local_num_rows, self.partition.global_num_cols);
        self.off_proc.map_cols(|c| map[c]);
        self.off_proc_global = true;
    }

    fn condense_off_proc(&mut self) {
        let mut cols = Vec::with_capacity(self.off_proc.nnz());
        self.off_proc.apply(|_, col, _| cols.push(col));
        cols.sort_unstable();
        cols.dedup();
        self.off_proc
            .map_cols(|g| cols.binary_search(&g).unwrap_or_else(|pos| pos));
        self.off_proc.resize(self.partition.local_num_rows, cols.len());
        self.off_proc_column_map = cols;
        self.off_proc_global = false;
    }

    /// Sort both blocks, condense the off-process block and build the flat
    /// halo exchange. Collective.
    pub fn finalize(&mut self) -> Result<()> {
        self.finalize_with(true, 0)
    }

    /// Finalize, optionally skipping the halo exchange, and optionally
    /// expanding every off-process column into `block_cols` scalar columns
    /// for the exchange. Calling it again without new entries changes
    /// nothing. Collective when `create_comm` is set.
    pub fn finalize_with(&mut self, create_comm: bool, block_cols: usize) -> Result<()> {
        let partition = Arc::clone(&self.partition);
        let _span = tracing::debug_span!(
            "par_matrix_finalize",
            rank = partition.rank(),
            format = ?M::FORMAT,
            block_cols
        )
        .entered();

        self.on_proc.sort();
        self.off_proc.sort();
        let mut changed = block_cols != self.block_cols;
        if self.off_proc_global {
            self.condense_off_proc();
            changed = true;
        }
        self.block_cols = block_cols;

        if !create_comm {
            if changed {
                self.comm_pkg = None;
                self.tap_comm_pkg = None;
            }
            return Ok(());
        }

        // Every rank rebuilds together, or none does.
        let stale = changed || self.comm_pkg.is_none();
        let any_stale = partition.comm().all_reduce_max(if stale { 1.0 } else { 0.0 })? > 0.0;
        if any_stale {
            let comm_partition = self.comm_partition();
            let map = self.comm_column_map();
            self.comm_pkg = Some(Arc::new(CommPkg::with_tag(&comm_partition, &map, tags::FLAT)?));
            if let Some(aggregate) = self.tap_comm_pkg.as_ref().map(|t| t.is_aggregated()) {
                self.tap_comm_pkg = Some(Arc::new(TapCommPkg::new(&comm_partition, &map, aggregate)?));
            }
        }
        tracing::debug!(
            on_proc_nnz = self.on_proc.nnz(),
            off_proc_nnz = self.off_proc.nnz(),
            off_proc_cols = self.off_proc_column_map.len(),
            rebuilt = any_stale,
            "finalized"
        );
        Ok(())
    }

    fn comm_partition(&self) -> Arc<Partition> {
        if self.block_cols == 0 {
            Arc::clone(&self.partition)
        } else {
            self.partition.scale_cols(self.block_cols)
        }
    }

    /// Build the topology-aware halo exchange with the configured
    /// aggregation setting. Collective.
    pub fn init_tap_comm(&mut self) -> Result<()> {
        let aggregate = self.partition.ctx().config().aggregate;
        self.init_tap_comm_with(aggregate)
    }

    /// Build the topology-aware halo exchange. Collective.
    pub fn init_tap_comm_with(&mut self, aggregate: bool) -> Result<()> {
        if self.off_proc_global {
            return Err(DistMatError::MissingCommPkg(
                "finalize before building topology-aware communication",
            ));
        }
        let comm_partition = self.comm_partition();
        let map = self.comm_column_map();
        self.tap_comm_pkg = Some(Arc::new(TapCommPkg::new(&comm_partition, &map, aggregate)?));
        Ok(())
    }

    fn halo(&self, tap: bool) -> Result<&dyn HaloExchange> {
        if self.off_proc_global {
            return Err(DistMatError::MissingCommPkg("matrix is not finalized"));
        }
        if tap {
            self.tap_comm_pkg
                .as_deref()
                .map(|p| p as &dyn HaloExchange)
                .ok_or(DistMatError::MissingCommPkg("topology-aware package not built"))
        } else {
            self.comm_pkg
                .as_deref()
                .map(|p| p as &dyn HaloExchange)
                .ok_or(DistMatError::MissingCommPkg("flat package not built"))
        }
    }

    fn scalar_halo(&self, tap: bool) -> Result<&dyn HaloExchange> {
        if self.block_cols > 0 {
            return Err(DistMatError::NotImplemented(
                "scalar products on block-expanded column maps",
            ));
        }
        self.halo(tap)
    }

    /// b = A * x, where `x` and `b` are this rank's parts of distributed
    /// vectors. Collective.
    pub fn multiply(&self, x: &[f64], b: &mut [f64], tap: bool) -> Result<()> {
        let halo = self.scalar_halo(tap)?;
        check_len("x", x.len(), self.partition.local_num_cols)?;
        check_len("b", b.len(), self.partition.local_num_rows)?;
        let x_off = halo.communicate(x)?;
        self.on_proc.multiply(x, b);
        self.off_proc.multiply_add(&x_off, b);
        Ok(())
    }

    /// r = b - A * x. Collective.
    pub fn residual(&self, x: &[f64], b: &[f64], r: &mut [f64], tap: bool) -> Result<()> {
        let halo = self.scalar_halo(tap)?;
        check_len("x", x.len(), self.partition.local_num_cols)?;
        check_len("b", b.len(), self.partition.local_num_rows)?;
        check_len("r", r.len(), self.partition.local_num_rows)?;
        let x_off = halo.communicate(x)?;
        self.on_proc.residual(x, b, r);
        self.off_proc
            .apply_with(&x_off, r, |row, col, val, xd, rd| rd[row] -= val * xd[col]);
        Ok(())
    }

    /// b = A^T * x, where `x` follows the row partition and `b` the column
    /// partition. Off-process contributions are summed on their owners.
    /// Collective.
    pub fn multiply_transpose(&self, x: &[f64], b: &mut [f64], tap: bool) -> Result<()> {
        let halo = self.scalar_halo(tap)?;
        check_len("x", x.len(), self.partition.local_num_rows)?;
        check_len("b", b.len(), self.partition.local_num_cols)?;
        let mut w = vec![0.0; self.off_proc_column_map.len()];
        self.off_proc.multiply_transpose_add(x, &mut w);
        self.on_proc.multiply_transpose(x, b);
        halo.communicate_transpose(&w, b)
    }

    /// This rank's rows with global column indices, as one CSR block.
    pub fn local_global_csr(&self) -> CsrMatrix {
        let first_col = self.partition.first_local_col;
        let mut coo = CooMatrix::new(self.partition.local_num_rows, self.partition.global_num_cols);
        self.on_proc
            .apply(|row, col, val| coo.add_value(row, col + first_col, val));
        if self.off_proc_global {
            self.off_proc.apply(|row, col, val| coo.add_value(row, col, val));
        } else {
            let map = &self.off_proc_column_map;
            self.off_proc
                .apply(|row, col, val| coo.add_value(row, map[col], val));
        }
        let mut csr = CsrMatrix::from_sparse(&coo);
        csr.sort();
        csr
    }

    pub(crate) fn global_row_buffer(&self) -> RowBuffer {
        RowBuffer::from_csr(&self.local_global_csr())
    }

    /// Dense lookup from a column offset within this rank's column range
    /// to its position in the on-process column map, `None` where absent.
    pub fn partition_to_local_column_lookup(&self) -> Vec<Option<usize>> {
        let first = self.partition.first_local_col;
        let mut lookup = vec![None; self.partition.local_num_cols];
        for (local, &global) in self.on_proc_column_map.iter().enumerate() {
            lookup[global - first] = Some(local);
        }
        lookup
    }

    /// Distributed transpose. The result is finalized with a flat halo
    /// exchange. Collective.
    pub fn transpose(&self) -> Result<ParMatrix<M>> {
        let partition = &self.partition;
        let _span = tracing::debug_span!("par_matrix_transpose", rank = partition.rank()).entered();
        if self.block_cols > 0 {
            return Err(DistMatError::NotImplemented("transpose of block-expanded matrices"));
        }
        let pkg = self
            .comm_pkg
            .as_deref()
            .ok_or(DistMatError::MissingCommPkg("transpose needs the flat package"))?;
        let comm = partition.comm();
        let send = pkg.send_data();
        let recv = pkg.recv_data();

        // Ship each off-process column to its owner as
        // `len, global_row, ..` plus the values.
        let off_cols = CscMatrix::from_sparse(&self.off_proc);
        let mut idx_sends = Vec::with_capacity(recv.num_msgs());
        let mut val_sends = Vec::with_capacity(recv.num_msgs());
        for i in 0..recv.num_msgs() {
            let mut idx = Vec::new();
            let mut vals = Vec::new();
            for col in recv.range(i) {
                let range = off_cols.col_range(col);
                idx.push(range.len());
                idx.extend(off_cols.row_indices[range.clone()].iter().map(|&r| self.local_row_map[r]));
                vals.extend_from_slice(&off_cols.values[range]);
            }
            idx_sends.push((recv.procs[i], idx));
            val_sends.push((recv.procs[i], vals));
        }
        let idx_msgs = comm.exchange_indices(tags::TRANSPOSE, idx_sends, &send.procs)?;
        let val_msgs = comm.exchange_values(tags::TRANSPOSE + 1, val_sends, &send.procs)?;

        let part_t = partition.transpose();
        let mut off_t = CooMatrix::new(part_t.local_num_rows, part_t.global_num_cols);
        for (i, (idx, vals)) in idx_msgs.into_iter().zip(val_msgs).enumerate() {
            let rank = send.procs[i];
            let malformed = || DistMatError::Comm(format!("malformed transpose message from rank {rank}"));
            let (mut pos, mut vpos) = (0, 0);
            for &row_t in &send.indices[send.range(i)] {
                let len = *idx.get(pos).ok_or_else(malformed)?;
                let rows = idx.get(pos + 1..pos + 1 + len).ok_or_else(malformed)?;
                let v = vals.get(vpos..vpos + len).ok_or_else(malformed)?;
                for (&global_row, &val) in rows.iter().zip(v) {
                    off_t.add_value(row_t, global_row, val);
                }
                pos += 1 + len;
                vpos += len;
            }
            if pos != idx.len() || vpos != vals.len() {
                return Err(malformed());
            }
        }

        let on_t = self.on_proc.transpose();
        let mut t = ParMatrix::from_blocks(part_t, on_t, M::from_sparse(&off_t))?;
        t.finalize()?;
        Ok(t)
    }

    /// Print every local nonzero with global indices, one per line.
    pub fn print(&self) -> String {
        let first_row = self.partition.first_local_row;
        self.local_global_csr()
            .triplets()
            .into_iter()
            .map(|(row, col, val)| format!("A[{}][{col}] = {val:e}\n", row + first_row))
            .collect()
    }
}
