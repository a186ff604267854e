use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::trace;

use crate::error::{ConfigError, Result};
use crate::packet_context::PacketContext;
use crate::pipeline::program::{
    ActionSpec, CounterPredicate, Ipv4Prefix, MatchSpec, Program, ValueRange, load_program,
};
use crate::pipeline::{Decision, Pipeline};
use crate::tree::PartitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    SetPartition(PartitionId),
    SetRank(u64),
    RankFromLen,
    Count(usize),
    Drop,
    NoOp,
}

#[derive(Debug, Clone)]
struct Matcher {
    src: Option<Ipv4Prefix>,
    dst: Option<Ipv4Prefix>,
    proto: Option<u8>,
    src_port: Option<ValueRange>,
    dst_port: Option<ValueRange>,
    dscp: Option<u8>,
    len: Option<ValueRange>,
    qdepth: Option<ValueRange>,
    avg_qdepth: Option<ValueRange>,
    // (计数器下标, modulo, remainder)
    counter: Option<(usize, u64, u64)>,
}

impl Matcher {
    fn matches<T>(&self, ctx: &PacketContext<T>, counters: &[u64]) -> bool {
        let h = &ctx.headers;
        let in_range = |r: &Option<ValueRange>, v: u64| r.is_none_or(|r| r.contains(v));

        self.src.is_none_or(|p| p.contains(h.src))
            && self.dst.is_none_or(|p| p.contains(h.dst))
            && self.proto.is_none_or(|p| p == h.proto)
            && self.dscp.is_none_or(|d| d == h.dscp)
            && in_range(&self.src_port, h.src_port as u64)
            && in_range(&self.dst_port, h.dst_port as u64)
            && in_range(&self.len, ctx.pkt_len as u64)
            && in_range(&self.qdepth, ctx.meta.qdepth)
            && in_range(&self.avg_qdepth, ctx.meta.avg_qdepth)
            && self
                .counter
                .is_none_or(|(idx, modulo, rem)| counters[idx] % modulo == rem)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    matcher: Matcher,
    actions: Vec<Action>,
    hits: u64,
}

#[derive(Debug, Clone)]
struct Table {
    name: String,
    entries: Vec<Entry>,
    default_actions: Vec<Action>,
    misses: u64,
}

// ==========================================
// 表驱动的决策流水线
// 表按顺序执行，每张表命中第一条匹配的表项，否则走缺省动作
// ==========================================
#[derive(Debug, Clone)]
pub struct TablePipeline {
    tables: Vec<Table>,
    counter_names: HashMap<String, usize>,
    counters: Vec<u64>,
    partitions: HashSet<PartitionId>,
    default_partition: PartitionId,
}

impl TablePipeline {
    pub fn compile(program: &Program) -> Result<Self> {
        let mut pipeline = Self {
            tables: Vec::new(),
            counter_names: HashMap::new(),
            counters: Vec::new(),
            partitions: program.partition_ids().collect(),
            default_partition: program.default_partition()?,
        };

        for name in &program.counters {
            let idx = pipeline.counters.len();
            pipeline.counter_names.insert(name.clone(), idx);
            pipeline.counters.push(0);
        }

        for spec in &program.tables {
            pipeline.tables.push(Table {
                name: spec.name.clone(),
                entries: Vec::new(),
                default_actions: Vec::new(),
                misses: 0,
            });
            for entry in &spec.entries {
                pipeline.add_entry(&spec.name, &entry.matcher, &entry.actions)?;
            }
            pipeline.set_default(&spec.name, &spec.default_actions)?;
        }
        Ok(pipeline)
    }

    /// 读程序文件并编译
    pub fn load(path: &Path) -> Result<Self> {
        Self::compile(&load_program(path)?)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| ConfigError::UnknownTable(name.to_string()))
    }

    fn counter_index(&self, name: &str) -> Result<usize> {
        self.counter_names
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownCounter(name.to_string()))
    }

    fn compile_action(&self, spec: &ActionSpec) -> Result<Action> {
        Ok(match spec {
            ActionSpec::SetPartition(id) => {
                if !self.partitions.contains(id) {
                    return Err(ConfigError::UnknownPartition(*id));
                }
                Action::SetPartition(*id)
            }
            ActionSpec::SetRank(rank) => Action::SetRank(*rank),
            ActionSpec::RankFromLen => Action::RankFromLen,
            ActionSpec::Count(name) => Action::Count(self.counter_index(name)?),
            ActionSpec::Drop => Action::Drop,
            ActionSpec::NoOp => Action::NoOp,
        })
    }

    fn compile_matcher(&self, spec: &MatchSpec) -> Result<Matcher> {
        let counter = match &spec.counter {
            Some(CounterPredicate {
                name,
                modulo,
                remainder,
            }) => {
                if *modulo == 0 {
                    return Err(ConfigError::InvalidMatch(format!(
                        "counter `{name}` predicate with zero modulo"
                    )));
                }
                Some((self.counter_index(name)?, *modulo, *remainder))
            }
            None => None,
        };
        Ok(Matcher {
            src: spec.src,
            dst: spec.dst,
            proto: spec.proto,
            src_port: spec.src_port,
            dst_port: spec.dst_port,
            dscp: spec.dscp,
            len: spec.len,
            qdepth: spec.qdepth,
            avg_qdepth: spec.avg_qdepth,
            counter,
        })
    }

    /// 追加表项，优先级低于已有表项
    pub fn add_entry(
        &mut self,
        table: &str,
        matcher: &MatchSpec,
        actions: &[ActionSpec],
    ) -> Result<()> {
        let matcher = self.compile_matcher(matcher)?;
        let actions = actions
            .iter()
            .map(|a| self.compile_action(a))
            .collect::<Result<Vec<_>>>()?;
        self.table_mut(table)?.entries.push(Entry {
            matcher,
            actions,
            hits: 0,
        });
        Ok(())
    }

    pub fn set_default(&mut self, table: &str, actions: &[ActionSpec]) -> Result<()> {
        let actions = actions
            .iter()
            .map(|a| self.compile_action(a))
            .collect::<Result<Vec<_>>>()?;
        self.table_mut(table)?.default_actions = actions;
        Ok(())
    }

    pub fn set_counter(&mut self, name: &str, value: u64) -> Result<()> {
        let idx = self.counter_index(name)?;
        self.counters[idx] = value;
        Ok(())
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counter_names.get(name).map(|&i| self.counters[i])
    }

    /// (命中次数, 未命中次数)
    pub fn table_hits(&self, name: &str) -> Option<(u64, u64)> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .map(|t| (t.entries.iter().map(|e| e.hits).sum(), t.misses))
    }
}

impl<T> Pipeline<T> for TablePipeline {
    fn decide(&mut self, ctx: &mut PacketContext<T>) -> Decision {
        let default_partition = self.default_partition;
        let Self {
            tables, counters, ..
        } = self;

        let mut partition = ctx.partition;
        let mut rank = ctx.rank;

        for table in tables.iter_mut() {
            let actions = match table
                .entries
                .iter_mut()
                .find(|e| e.matcher.matches(ctx, counters))
            {
                Some(entry) => {
                    entry.hits += 1;
                    &entry.actions
                }
                None => {
                    table.misses += 1;
                    &table.default_actions
                }
            };

            for action in actions {
                match *action {
                    Action::SetPartition(id) => partition = Some(id),
                    Action::SetRank(r) => rank = r,
                    Action::RankFromLen => rank = ctx.pkt_len as u64,
                    Action::Count(idx) => counters[idx] = counters[idx].wrapping_add(1),
                    Action::Drop => {
                        trace!(table = %table.name, "program drop");
                        return Decision::Drop;
                    }
                    Action::NoOp => {}
                }
            }
        }

        let partition = partition.unwrap_or(default_partition);
        ctx.partition = Some(partition);
        ctx.rank = rank;
        Decision::Admit { partition, rank }
    }
}
