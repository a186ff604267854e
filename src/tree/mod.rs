//! Hierarchical buffer: leaf partitions under a fixed tree of selection nodes.
//!
//! Every node caches the leaf it would serve next. Inserts and removals
//! refresh the cache along the leaf-to-root path, so `select_next` and `peek`
//! only read the root.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, Result};
use crate::packet_context::PacketContext;

mod partition;
mod policy;

pub use partition::Partition;
use policy::{ChildHead, DrrState, NodePolicy};

pub type PartitionId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySpec {
    StrictPriority,
    Drr { quanta: Vec<u64> },
    Rank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildSpec {
    Partition(PartitionId),
    Node(NodeSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub policy: PolicySpec,
    pub children: Vec<ChildSpec>,
}

impl NodeSpec {
    /// 按给定顺序排优先级的单层树
    pub fn strict_priority(ids: impl IntoIterator<Item = PartitionId>) -> Self {
        Self {
            policy: PolicySpec::StrictPriority,
            children: ids.into_iter().map(ChildSpec::Partition).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildRef {
    Leaf(usize),
    Node(usize),
}

#[derive(Debug)]
struct Node {
    children: Vec<ChildRef>,
    policy: NodePolicy,
    parent: Option<(usize, usize)>,
    // 子树里的包数
    backlog: usize,
    // 子树下一次会服务的叶子
    head: Option<usize>,
}

#[derive(Debug)]
pub struct PartitionTree<T> {
    partitions: Vec<Partition<T>>,
    // 叶子 -> (父节点, 在父节点中的位置)
    leaf_parent: Vec<(usize, usize)>,
    index: HashMap<PartitionId, usize>,
    // nodes[0] 是根
    nodes: Vec<Node>,
    total_bytes: u64,
    total_packets: usize,
}

impl<T> PartitionTree<T> {
    /// 每个分区必须且只能在树里出现一次
    pub fn new(spec: &NodeSpec, partitions: Vec<Partition<T>>) -> Result<Self> {
        if partitions.is_empty() {
            return Err(ConfigError::NoPartitions);
        }

        let mut index = HashMap::with_capacity(partitions.len());
        for (i, p) in partitions.iter().enumerate() {
            if index.insert(p.id(), i).is_some() {
                return Err(ConfigError::DuplicatePartition(p.id()));
            }
        }

        let mut tree = Self {
            leaf_parent: vec![(usize::MAX, usize::MAX); partitions.len()],
            partitions,
            index,
            nodes: Vec::new(),
            total_bytes: 0,
            total_packets: 0,
        };
        tree.build_node(spec, None)?;

        if let Some(p) = tree
            .leaf_parent
            .iter()
            .position(|&(node, _)| node == usize::MAX)
        {
            return Err(ConfigError::InvalidTree(format!(
                "partition {} is not attached to the tree",
                tree.partitions[p].id()
            )));
        }
        Ok(tree)
    }

    fn build_node(&mut self, spec: &NodeSpec, parent: Option<(usize, usize)>) -> Result<usize> {
        if spec.children.is_empty() {
            return Err(ConfigError::InvalidTree("node without children".into()));
        }
        let policy = match &spec.policy {
            PolicySpec::StrictPriority => NodePolicy::StrictPriority,
            PolicySpec::Rank => NodePolicy::Rank,
            PolicySpec::Drr { quanta } => {
                if quanta.len() != spec.children.len() {
                    return Err(ConfigError::InvalidTree(format!(
                        "drr node has {} children but {} quanta",
                        spec.children.len(),
                        quanta.len()
                    )));
                }
                if quanta.contains(&0) {
                    return Err(ConfigError::InvalidTree("drr quantum must be positive".into()));
                }
                NodePolicy::Drr(DrrState::new(quanta.clone()))
            }
        };

        let id = self.nodes.len();
        self.nodes.push(Node {
            children: Vec::with_capacity(spec.children.len()),
            policy,
            parent,
            backlog: 0,
            head: None,
        });

        for (pos, child) in spec.children.iter().enumerate() {
            let child_ref = match child {
                ChildSpec::Partition(pid) => {
                    let leaf = *self
                        .index
                        .get(pid)
                        .ok_or(ConfigError::UnknownPartition(*pid))?;
                    if self.leaf_parent[leaf].0 != usize::MAX {
                        return Err(ConfigError::InvalidTree(format!(
                            "partition {pid} appears more than once"
                        )));
                    }
                    self.leaf_parent[leaf] = (id, pos);
                    ChildRef::Leaf(leaf)
                }
                ChildSpec::Node(sub) => ChildRef::Node(self.build_node(sub, Some((id, pos)))?),
            };
            self.nodes[id].children.push(child_ref);
        }
        Ok(id)
    }

    pub fn contains(&self, id: PartitionId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition<T>> {
        self.index.get(&id).map(|&i| &self.partitions[i])
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition<T>> {
        self.partitions.iter()
    }

    pub fn occupied_bytes(&self, id: PartitionId) -> Option<u64> {
        self.partition(id).map(Partition::occupied_bytes)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.total_packets
    }

    pub fn is_empty(&self) -> bool {
        self.total_packets == 0
    }

    /// 分区不存在时为 false
    pub fn fits(&self, id: PartitionId, len: usize) -> bool {
        self.partition(id).is_some_and(|p| p.fits(len))
    }

    /// 入队前查询目标分区的丢包概率
    pub fn drop_probability(&self, id: PartitionId, now: Duration) -> f64 {
        self.partition(id)
            .map_or(0.0, |p| p.drop_probability(now))
    }

    pub fn on_congestion_drop(&mut self, id: PartitionId) {
        if let Some(&leaf) = self.index.get(&id) {
            self.partitions[leaf].on_congestion_drop();
        }
    }

    /// 容量不足或分区不存在时原样退回
    pub fn insert(
        &mut self,
        id: PartitionId,
        ctx: PacketContext<T>,
        now: Duration,
    ) -> std::result::Result<(), PacketContext<T>> {
        let Some(&leaf) = self.index.get(&id) else {
            return Err(ctx);
        };
        let was_empty = self.partitions[leaf].is_empty();
        let len = ctx.pkt_len as u64;
        self.partitions[leaf].push(ctx, now)?;
        self.total_bytes += len;
        self.total_packets += 1;

        let (mut node, mut pos) = self.leaf_parent[leaf];
        let mut activated = was_empty;
        loop {
            let n = &mut self.nodes[node];
            let node_was_empty = n.backlog == 0;
            n.backlog += 1;
            if activated {
                n.policy.on_activate(pos);
            }
            let parent = n.parent;
            self.refresh_head(node);
            activated = node_was_empty;
            match parent {
                Some((p, ppos)) => (node, pos) = (p, ppos),
                None => break,
            }
        }
        Ok(())
    }

    /// 自根向下按各节点策略选出的分区；同样的状态永远给同样的结果
    pub fn select_next(&self) -> Option<PartitionId> {
        self.nodes[0].head.map(|leaf| self.partitions[leaf].id())
    }

    pub fn peek(&self) -> Option<&PacketContext<T>> {
        self.nodes[0]
            .head
            .and_then(|leaf| self.partitions[leaf].head())
    }

    /// 取出分区最老的包。对空分区调用属于调用方的逻辑错误
    pub fn remove_head(&mut self, id: PartitionId, now: Duration) -> Option<PacketContext<T>> {
        let leaf = *self.index.get(&id)?;
        debug_assert!(
            !self.partitions[leaf].is_empty(),
            "remove_head on empty partition {id}"
        );
        let Some(ctx) = self.partitions[leaf].pop(now) else {
            warn!(partition = id, "remove_head on empty partition");
            return None;
        };
        self.total_bytes -= ctx.pkt_len as u64;
        self.total_packets -= 1;

        let (mut node, mut pos) = self.leaf_parent[leaf];
        let mut now_empty = self.partitions[leaf].is_empty();
        loop {
            let n = &mut self.nodes[node];
            n.backlog -= 1;
            n.policy.on_dequeue(pos, ctx.pkt_len, now_empty);
            now_empty = n.backlog == 0;
            let parent = n.parent;
            self.refresh_head(node);
            match parent {
                Some((p, ppos)) => (node, pos) = (p, ppos),
                None => break,
            }
        }
        Some(ctx)
    }

    fn child_leaf(&self, child: ChildRef) -> Option<usize> {
        match child {
            ChildRef::Leaf(leaf) => (!self.partitions[leaf].is_empty()).then_some(leaf),
            ChildRef::Node(n) => self.nodes[n].head,
        }
    }

    fn refresh_head(&mut self, node: usize) {
        let heads: Vec<Option<ChildHead>> = self.nodes[node]
            .children
            .iter()
            .map(|&c| {
                self.child_leaf(c)
                    .and_then(|leaf| self.partitions[leaf].head())
                    .map(|ctx| ChildHead {
                        len: ctx.pkt_len,
                        rank: ctx.rank,
                    })
            })
            .collect();
        let head = self.nodes[node]
            .policy
            .select(&heads)
            .and_then(|pos| self.child_leaf(self.nodes[node].children[pos]));
        self.nodes[node].head = head;
    }
}
