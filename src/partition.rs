//! Ownership of global rows and columns across ranks.
//!
//! Each rank owns one contiguous range of rows and one contiguous range of
//! columns. A [`Partition`] records every rank's ranges, so mapping a global
//! index to its owner is a binary search and needs no communication.
//! Partitions are immutable once built and shared between matrices through
//! `Arc`.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::comm::Communicator;
use crate::config::CommConfig;
use crate::error::{DistMatError, Result};

/// Grouping of ranks into physical nodes.
///
/// Ranks are placed in SMP order: node `n` holds the consecutive ranks
/// `n * ppn .. (n + 1) * ppn`, the last node possibly fewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    procs_per_node: usize,
    num_procs: usize,
}

impl Topology {
    pub fn new(num_procs: usize, procs_per_node: usize) -> Self {
        Self {
            procs_per_node: procs_per_node.max(1),
            num_procs,
        }
    }

    /// Every rank on one node.
    pub fn single_node(num_procs: usize) -> Self {
        Self::new(num_procs, num_procs)
    }

    pub fn procs_per_node(&self) -> usize {
        self.procs_per_node
    }

    pub fn num_nodes(&self) -> usize {
        self.num_procs.div_ceil(self.procs_per_node)
    }

    pub fn node_of(&self, rank: usize) -> usize {
        rank / self.procs_per_node
    }

    /// Position of `rank` within its node.
    pub fn local_rank(&self, rank: usize) -> usize {
        rank % self.procs_per_node
    }

    pub fn members(&self, node: usize) -> Range<usize> {
        let start = node * self.procs_per_node;
        start..(start + self.procs_per_node).min(self.num_procs)
    }

    /// The rank on `node` that handles all traffic between `node` and `peer`.
    ///
    /// Node pairs are spread over the members so no single rank carries all
    /// inter-node messages.
    pub fn partner(&self, node: usize, peer: usize) -> usize {
        let members = self.members(node);
        members.start + peer % members.len()
    }
}

/// Communicator handle, node layout and settings threaded through every
/// distributed object.
#[derive(Clone)]
pub struct Context {
    comm: Arc<dyn Communicator>,
    topology: Topology,
    config: CommConfig,
}

impl Context {
    /// Single-node layout with default settings.
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        let topology = Topology::single_node(comm.num_ranks());
        Self {
            comm,
            topology,
            config: CommConfig::default(),
        }
    }

    pub fn with_config(comm: Arc<dyn Communicator>, config: CommConfig) -> Result<Self> {
        config.validate()?;
        let n = comm.num_ranks();
        let topology = match config.procs_per_node {
            Some(ppn) => Topology::new(n, ppn),
            None => Topology::single_node(n),
        };
        Ok(Self {
            comm,
            topology,
            config,
        })
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn comm_handle(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn num_procs(&self) -> usize {
        self.comm.num_ranks()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("rank", &self.rank())
            .field("num_procs", &self.num_procs())
            .field("topology", &self.topology)
            .field("config", &self.config)
            .finish()
    }
}

/// Row and column ownership for a distributed matrix.
#[derive(Debug, Clone)]
pub struct Partition {
    pub global_num_rows: usize,
    pub global_num_cols: usize,
    pub first_local_row: usize,
    pub local_num_rows: usize,
    pub first_local_col: usize,
    pub local_num_cols: usize,
    /// `row_starts[p]..row_starts[p + 1]` are the rows owned by rank p.
    row_starts: Vec<usize>,
    col_starts: Vec<usize>,
    ctx: Context,
}

/// Split `n` into `parts` contiguous ranges, the first `n % parts` one longer.
fn even_starts(n: usize, parts: usize) -> Vec<usize> {
    let base = n / parts;
    let extra = n % parts;
    let mut starts = Vec::with_capacity(parts + 1);
    starts.push(0);
    for p in 0..parts {
        let len = base + usize::from(p < extra);
        starts.push(starts[p] + len);
    }
    starts
}

fn prefix_starts(sizes: &[usize]) -> Vec<usize> {
    let mut starts = Vec::with_capacity(sizes.len() + 1);
    starts.push(0);
    for &s in sizes {
        starts.push(starts[starts.len() - 1] + s);
    }
    starts
}

/// Owner of `index` given ascending range starts. Empty ranges are skipped.
fn owner_of(starts: &[usize], index: usize) -> usize {
    starts.partition_point(|&s| s <= index) - 1
}

impl Partition {
    /// Even split of rows and of columns. Needs no communication.
    pub fn new(ctx: &Context, global_num_rows: usize, global_num_cols: usize) -> Result<Arc<Self>> {
        let n = ctx.num_procs();
        Self::from_starts(
            ctx.clone(),
            global_num_rows,
            global_num_cols,
            even_starts(global_num_rows, n),
            even_starts(global_num_cols, n),
        )
    }

    /// Every rank supplies its own local sizes; ranges are laid out in rank
    /// order. Collective.
    pub fn from_local_sizes(
        ctx: &Context,
        global_num_rows: usize,
        global_num_cols: usize,
        local_num_rows: usize,
        local_num_cols: usize,
    ) -> Result<Arc<Self>> {
        let comm = ctx.comm();
        let row_sizes = comm.all_gather_index(local_num_rows)?;
        let col_sizes = comm.all_gather_index(local_num_cols)?;
        Self::from_starts(
            ctx.clone(),
            global_num_rows,
            global_num_cols,
            prefix_starts(&row_sizes),
            prefix_starts(&col_sizes),
        )
    }

    /// Even split in units of whole `block_rows x block_cols` blocks, so no
    /// block straddles two ranks.
    pub fn block_aligned(
        ctx: &Context,
        global_num_rows: usize,
        global_num_cols: usize,
        block_rows: usize,
        block_cols: usize,
    ) -> Result<Arc<Self>> {
        if block_rows == 0
            || block_cols == 0
            || global_num_rows % block_rows != 0
            || global_num_cols % block_cols != 0
        {
            return Err(DistMatError::InvalidPartition(format!(
                "{global_num_rows}x{global_num_cols} is not a whole number of {block_rows}x{block_cols} blocks"
            )));
        }
        let n = ctx.num_procs();
        let scale = |starts: Vec<usize>, b: usize| starts.into_iter().map(|s| s * b).collect();
        Self::from_starts(
            ctx.clone(),
            global_num_rows,
            global_num_cols,
            scale(even_starts(global_num_rows / block_rows, n), block_rows),
            scale(even_starts(global_num_cols / block_cols, n), block_cols),
        )
    }

    fn from_starts(
        ctx: Context,
        global_num_rows: usize,
        global_num_cols: usize,
        row_starts: Vec<usize>,
        col_starts: Vec<usize>,
    ) -> Result<Arc<Self>> {
        let n = ctx.num_procs();
        for (what, starts, global) in [
            ("rows", &row_starts, global_num_rows),
            ("cols", &col_starts, global_num_cols),
        ] {
            if starts.len() != n + 1 || starts[n] != global {
                return Err(DistMatError::InvalidPartition(format!(
                    "local {what} sum to {}, expected {global}",
                    starts.last().copied().unwrap_or(0)
                )));
            }
        }
        let rank = ctx.rank();
        Ok(Arc::new(Self {
            global_num_rows,
            global_num_cols,
            first_local_row: row_starts[rank],
            local_num_rows: row_starts[rank + 1] - row_starts[rank],
            first_local_col: col_starts[rank],
            local_num_cols: col_starts[rank + 1] - col_starts[rank],
            row_starts,
            col_starts,
            ctx,
        }))
    }

    /// Partition of the transposed matrix: row and column ranges swap.
    pub fn transpose(&self) -> Arc<Self> {
        Arc::new(Self {
            global_num_rows: self.global_num_cols,
            global_num_cols: self.global_num_rows,
            first_local_row: self.first_local_col,
            local_num_rows: self.local_num_cols,
            first_local_col: self.first_local_row,
            local_num_cols: self.local_num_rows,
            row_starts: self.col_starts.clone(),
            col_starts: self.row_starts.clone(),
            ctx: self.ctx.clone(),
        })
    }

    /// Partition whose every column is expanded into `block_cols` scalar
    /// columns.
    pub fn scale_cols(&self, block_cols: usize) -> Arc<Self> {
        Arc::new(Self {
            global_num_cols: self.global_num_cols * block_cols,
            first_local_col: self.first_local_col * block_cols,
            local_num_cols: self.local_num_cols * block_cols,
            col_starts: self.col_starts.iter().map(|&s| s * block_cols).collect(),
            ..self.clone()
        })
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.ctx.comm()
    }

    pub fn topology(&self) -> &Topology {
        self.ctx.topology()
    }

    pub fn rank(&self) -> usize {
        self.ctx.rank()
    }

    pub fn num_procs(&self) -> usize {
        self.ctx.num_procs()
    }

    pub fn local_rows(&self) -> Range<usize> {
        self.first_local_row..self.first_local_row + self.local_num_rows
    }

    pub fn local_cols(&self) -> Range<usize> {
        self.first_local_col..self.first_local_col + self.local_num_cols
    }

    pub fn owns_col(&self, global_col: usize) -> bool {
        self.local_cols().contains(&global_col)
    }

    pub fn row_owner(&self, global_row: usize) -> usize {
        owner_of(&self.row_starts, global_row)
    }

    pub fn col_owner(&self, global_col: usize) -> usize {
        owner_of(&self.col_starts, global_col)
    }

    pub fn row_starts(&self) -> &[usize] {
        &self.row_starts
    }

    pub fn col_starts(&self) -> &[usize] {
        &self.col_starts
    }

    /// Columns owned by all ranks of `node`, contiguous under SMP ordering.
    pub fn node_cols(&self, node: usize) -> Range<usize> {
        let members = self.topology().members(node);
        self.col_starts[members.start]..self.col_starts[members.end]
    }
}
