//! Topology-aware halo exchange.
//!
//! Off-process columns are split by where their owner lives. Columns owned
//! on this node arrive directly from their owner (`local_l`). Columns owned
//! on another node travel over the network, either directly from the owner
//! or, when aggregating, in three hops:
//!
//! 1. `local_s`: owners on node B hand the requested values to B's partner
//!    for node A.
//! 2. `global`: that partner sends one message to A's partner for node B,
//!    carrying the union of everything node A asked of node B.
//! 3. `local_r`: A's partner redistributes to the ranks on A that asked.
//!
//! Partners are chosen by [`crate::partition::Topology::partner`], so each
//! node pair exchanges at most one message per direction.

use std::collections::{BTreeMap, HashMap};

use crate::comm::tags;
use crate::comm_pkg::{check_len, exchange_requests, CommStage, HaloExchange, RowBuffer};
use crate::error::{DistMatError, Result};
use crate::partition::{Context, Partition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Position in the `local_l` receive buffer.
    OnNode(usize),
    /// Position in the buffer delivered by the inter-node route.
    OffNode(usize),
}

#[derive(Debug, Clone)]
enum InterNode {
    Direct {
        global: CommStage,
    },
    Aggregated {
        local_s: CommStage,
        global: CommStage,
        local_r: CommStage,
    },
}

impl InterNode {
    fn global(&self) -> &CommStage {
        match self {
            InterNode::Direct { global } | InterNode::Aggregated { global, .. } => global,
        }
    }

    fn recv_size(&self) -> usize {
        match self {
            InterNode::Direct { global } => global.recv.size_msgs(),
            InterNode::Aggregated { local_r, .. } => local_r.recv.size_msgs(),
        }
    }
}

/// Map each received key to its position in the receive buffer.
fn key_positions(stage: &CommStage) -> HashMap<usize, usize> {
    stage
        .recv
        .indices
        .iter()
        .enumerate()
        .map(|(pos, &key)| (key, pos))
        .collect()
}

fn lookup(positions: &HashMap<usize, usize>, col: usize) -> Result<usize> {
    positions
        .get(&col)
        .copied()
        .ok_or_else(|| DistMatError::Comm(format!("column {col} was never gathered for forwarding")))
}

fn sorted_unique(mut requests: BTreeMap<usize, Vec<usize>>) -> BTreeMap<usize, Vec<usize>> {
    for cols in requests.values_mut() {
        cols.sort_unstable();
        cols.dedup();
    }
    requests
}

/// Halo exchange that routes traffic by node.
#[derive(Debug, Clone)]
pub struct TapCommPkg {
    ctx: Context,
    local_l: CommStage,
    inter_node: InterNode,
    slots: Vec<Slot>,
    local_size: usize,
}

impl TapCommPkg {
    /// Build the staged pattern for `off_proc_column_map` (strictly
    /// increasing global columns). Collective.
    pub fn new(partition: &Partition, off_proc_column_map: &[usize], aggregate: bool) -> Result<Self> {
        let rank = partition.rank();
        let _span = tracing::debug_span!(
            "tap_comm_init",
            rank,
            aggregate,
            off_proc_cols = off_proc_column_map.len()
        )
        .entered();

        if !off_proc_column_map.windows(2).all(|w| w[0] < w[1]) {
            return Err(DistMatError::InvalidPartition(
                "off-process column map must be strictly increasing".into(),
            ));
        }
        let comm = partition.comm();
        let topo = *partition.topology();
        let my_node = topo.node_of(rank);
        let first = partition.first_local_col;
        let owned = |col: usize| {
            if partition.owns_col(col) {
                Ok(col - first)
            } else {
                Err(DistMatError::Comm(format!(
                    "column {col} requested from rank {rank} which does not own it"
                )))
            }
        };

        let mut on_node: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut off_node = Vec::new();
        for &col in off_proc_column_map {
            if col >= partition.global_num_cols {
                return Err(DistMatError::InvalidPartition(format!(
                    "column {col} outside {} global columns",
                    partition.global_num_cols
                )));
            }
            let owner = partition.col_owner(col);
            if topo.node_of(owner) == my_node {
                on_node.entry(owner).or_default().push(col);
            } else {
                off_node.push(col);
            }
        }
        let local_l = CommStage::new(comm, tags::TAP_LOCAL_L, on_node, owned)?;

        let inter_node = if aggregate {
            // Hop 3 requests: ask my partner for each remote node.
            let mut r_req: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for &col in &off_node {
                let node = topo.node_of(partition.col_owner(col));
                r_req.entry(topo.partner(my_node, node)).or_default().push(col);
            }
            let (r_recv, r_incoming) = exchange_requests(comm, r_req)?;

            // Hop 2 requests: as a partner, ask the remote partner for the
            // union of what my node mates need.
            let mut g_req: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for col in r_incoming.iter().flat_map(|(_, cols)| cols.iter().copied()) {
                let node = topo.node_of(partition.col_owner(col));
                g_req.entry(topo.partner(node, my_node)).or_default().push(col);
            }
            let (g_recv, g_incoming) = exchange_requests(comm, sorted_unique(g_req))?;

            // Hop 1 requests: gather what remote partners asked for from the
            // owners on my node.
            let mut s_req: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for col in g_incoming.iter().flat_map(|(_, cols)| cols.iter().copied()) {
                let owner = partition.col_owner(col);
                if topo.node_of(owner) != my_node {
                    return Err(DistMatError::Comm(format!(
                        "rank {rank} asked to forward column {col} owned off its node"
                    )));
                }
                s_req.entry(owner).or_default().push(col);
            }
            let local_s = CommStage::new(comm, tags::TAP_LOCAL_S, sorted_unique(s_req), owned)?;

            let s_pos = key_positions(&local_s);
            let global = CommStage::from_incoming(tags::TAP_GLOBAL, g_recv, g_incoming, |col| {
                lookup(&s_pos, col)
            })?;
            let g_pos = key_positions(&global);
            let local_r = CommStage::from_incoming(tags::TAP_LOCAL_R, r_recv, r_incoming, |col| {
                lookup(&g_pos, col)
            })?;
            InterNode::Aggregated {
                local_s,
                global,
                local_r,
            }
        } else {
            let mut requests: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for &col in &off_node {
                requests.entry(partition.col_owner(col)).or_default().push(col);
            }
            InterNode::Direct {
                global: CommStage::new(comm, tags::TAP_GLOBAL, requests, owned)?,
            }
        };

        let l_pos = key_positions(&local_l);
        let remote_stage = match &inter_node {
            InterNode::Direct { global } => global,
            InterNode::Aggregated { local_r, .. } => local_r,
        };
        let r_pos = key_positions(remote_stage);
        let slots = off_proc_column_map
            .iter()
            .map(|&col| match l_pos.get(&col) {
                Some(&p) => Ok(Slot::OnNode(p)),
                None => lookup(&r_pos, col).map(Slot::OffNode),
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            on_node_msgs = local_l.recv.num_msgs(),
            inter_node_msgs = inter_node.global().num_sends(),
            inter_node_size = inter_node.global().send.size_msgs(),
            "tap comm pkg built"
        );

        Ok(Self {
            ctx: partition.ctx().clone(),
            local_l,
            inter_node,
            slots,
            local_size: partition.local_num_cols,
        })
    }

    pub fn is_aggregated(&self) -> bool {
        matches!(self.inter_node, InterNode::Aggregated { .. })
    }

    /// The direct on-node stage.
    pub fn local_l(&self) -> &CommStage {
        &self.local_l
    }

    /// The stage whose messages cross node boundaries.
    pub fn global(&self) -> &CommStage {
        self.inter_node.global()
    }

    pub fn local_s(&self) -> Option<&CommStage> {
        match &self.inter_node {
            InterNode::Aggregated { local_s, .. } => Some(local_s),
            InterNode::Direct { .. } => None,
        }
    }

    pub fn local_r(&self) -> Option<&CommStage> {
        match &self.inter_node {
            InterNode::Aggregated { local_r, .. } => Some(local_r),
            InterNode::Direct { .. } => None,
        }
    }
}

impl HaloExchange for TapCommPkg {
    fn local_size(&self) -> usize {
        self.local_size
    }

    fn recv_size(&self) -> usize {
        self.slots.len()
    }

    fn communicate(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_len("local vector", x.len(), self.local_size)?;
        let comm = self.ctx.comm();
        let remote = match &self.inter_node {
            InterNode::Direct { global } => global.communicate_values(comm, x)?,
            InterNode::Aggregated {
                local_s,
                global,
                local_r,
            } => {
                let gathered = local_s.communicate_values(comm, x)?;
                let crossed = global.communicate_values(comm, &gathered)?;
                local_r.communicate_values(comm, &crossed)?
            }
        };
        let local = self.local_l.communicate_values(comm, x)?;
        Ok(self
            .slots
            .iter()
            .map(|slot| match *slot {
                Slot::OnNode(p) => local[p],
                Slot::OffNode(p) => remote[p],
            })
            .collect())
    }

    fn communicate_transpose(&self, values: &[f64], result: &mut [f64]) -> Result<()> {
        check_len("off-process values", values.len(), self.slots.len())?;
        check_len("local result", result.len(), self.local_size)?;
        let comm = self.ctx.comm();

        let mut local = vec![0.0; self.local_l.recv.size_msgs()];
        let mut remote = vec![0.0; self.inter_node.recv_size()];
        for (slot, &v) in self.slots.iter().zip(values) {
            match *slot {
                Slot::OnNode(p) => local[p] += v,
                Slot::OffNode(p) => remote[p] += v,
            }
        }

        match &self.inter_node {
            InterNode::Direct { global } => global.communicate_reverse(comm, &remote, result)?,
            InterNode::Aggregated {
                local_s,
                global,
                local_r,
            } => {
                let mut crossed = vec![0.0; global.recv.size_msgs()];
                local_r.communicate_reverse(comm, &remote, &mut crossed)?;
                let mut gathered = vec![0.0; local_s.recv.size_msgs()];
                global.communicate_reverse(comm, &crossed, &mut gathered)?;
                local_s.communicate_reverse(comm, &gathered, result)?;
            }
        }
        self.local_l.communicate_reverse(comm, &local, result)
    }

    fn communicate_rows(&self, rows: &RowBuffer) -> Result<RowBuffer> {
        check_len("local rows", rows.n_rows(), self.local_size)?;
        let comm = self.ctx.comm();
        let remote = match &self.inter_node {
            InterNode::Direct { global } => global.communicate_rows(comm, rows)?,
            InterNode::Aggregated {
                local_s,
                global,
                local_r,
            } => {
                let gathered = local_s.communicate_rows(comm, rows)?;
                let crossed = global.communicate_rows(comm, &gathered)?;
                local_r.communicate_rows(comm, &crossed)?
            }
        };
        let local = self.local_l.communicate_rows(comm, rows)?;

        let mut out = RowBuffer::default();
        for slot in &self.slots {
            let (cols, vals) = match *slot {
                Slot::OnNode(p) => local.row(p),
                Slot::OffNode(p) => remote.row(p),
            };
            out.push_row(cols, vals);
        }
        Ok(out)
    }
}
