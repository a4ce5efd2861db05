//! Node-level view of a distributed matrix.
//!
//! Ranks on one node can read each other's vector entries without network
//! traffic, so a node-aware solver wants the local rows split by node
//! rather than by rank: columns owned anywhere on this node versus columns
//! owned on other nodes.

use crate::comm::tags;
use crate::comm_pkg::CommPkg;
use crate::error::{DistMatError, Result};
use crate::sparse::{CooMatrix, CsrMatrix, SparseMatrix};

use super::ParMatrix;

/// This rank's rows split at node boundaries.
#[derive(Debug, Clone)]
pub struct NodalSplit {
    /// Columns relative to `first_node_col`.
    pub on_node: CsrMatrix,
    /// Condensed columns; `off_node_column_map` gives their global index.
    pub off_node: CsrMatrix,
    pub first_node_col: usize,
    pub node_num_cols: usize,
    pub off_node_column_map: Vec<usize>,
    /// Exchange over `off_node_column_map`, when requested.
    pub comm_pkg: Option<CommPkg>,
}

impl<M: SparseMatrix> ParMatrix<M> {
    /// Split the local rows into on-node and off-node blocks.
    ///
    /// Precondition: the ranks of a node own one contiguous, gap-free column
    /// range, which holds for SMP rank placement. Collective when
    /// `create_comm` is set.
    pub fn proc_to_nodal(&self, create_comm: bool) -> Result<NodalSplit> {
        if !self.is_finalized() {
            return Err(DistMatError::MissingCommPkg("finalize before the nodal split"));
        }
        let partition = &self.partition;
        let topo = partition.topology();
        let node = topo.node_of(partition.rank());
        let node_cols = partition.node_cols(node);
        let _span = tracing::debug_span!(
            "proc_to_nodal",
            rank = partition.rank(),
            node,
            first_node_col = node_cols.start,
            node_num_cols = node_cols.len()
        )
        .entered();

        let rows = partition.local_num_rows;
        let first = node_cols.start;
        let mut on_node = CooMatrix::new(rows, node_cols.len());
        let mut off_node = CooMatrix::new(rows, partition.global_num_cols);

        let first_local = partition.first_local_col;
        self.on_proc
            .apply(|row, col, val| on_node.add_value(row, col + first_local - first, val));
        let map = self.off_proc_column_map();
        self.off_proc.apply(|row, col, val| {
            let global = map[col];
            if node_cols.contains(&global) {
                on_node.add_value(row, global - first, val);
            } else {
                off_node.add_value(row, global, val);
            }
        });

        let mut off_node_column_map = Vec::with_capacity(off_node.nnz());
        off_node.apply(|_, col, _| off_node_column_map.push(col));
        off_node_column_map.sort_unstable();
        off_node_column_map.dedup();
        off_node.map_cols(|g| off_node_column_map.binary_search(&g).unwrap_or_else(|pos| pos));
        off_node.resize(rows, off_node_column_map.len());

        let mut on_node = CsrMatrix::from_sparse(&on_node);
        on_node.sort();
        let mut off_node = CsrMatrix::from_sparse(&off_node);
        off_node.sort();

        let comm_pkg = if create_comm {
            Some(CommPkg::with_tag(partition, &off_node_column_map, tags::NODAL)?)
        } else {
            None
        };
        tracing::debug!(
            on_node_nnz = on_node.nnz(),
            off_node_nnz = off_node.nnz(),
            off_node_cols = off_node_column_map.len(),
            "nodal split"
        );

        Ok(NodalSplit {
            on_node,
            off_node,
            first_node_col: first,
            node_num_cols: node_cols.len(),
            off_node_column_map,
            comm_pkg,
        })
    }
}
