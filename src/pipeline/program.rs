use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{CongestionThresholds, QueueSize};
use crate::error::{ConfigError, Result};
use crate::tree::{NodeSpec, PartitionId};

/// 程序文件 (JSON) 的完整内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Program {
    pub partitions: Vec<PartitionSpec>,
    #[serde(default)]
    pub tree: Option<NodeSpec>,
    #[serde(default)]
    pub default_partition: Option<PartitionId>,
    #[serde(default)]
    pub counters: Vec<String>,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionSpec {
    pub id: PartitionId,
    #[serde(default)]
    pub capacity: Option<QueueSize>,
    #[serde(default)]
    pub congestion: Option<CongestionThresholds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<EntrySpec>,
    #[serde(default)]
    pub default_actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntrySpec {
    #[serde(rename = "match", default)]
    pub matcher: MatchSpec,
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSpec {
    SetPartition(PartitionId),
    SetRank(u64),
    RankFromLen,
    Count(String),
    Drop,
    NoOp,
}

/// 缺省字段即通配
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchSpec {
    pub src: Option<Ipv4Prefix>,
    pub dst: Option<Ipv4Prefix>,
    pub proto: Option<u8>,
    pub src_port: Option<ValueRange>,
    pub dst_port: Option<ValueRange>,
    pub dscp: Option<u8>,
    pub len: Option<ValueRange>,
    pub qdepth: Option<ValueRange>,
    pub avg_qdepth: Option<ValueRange>,
    pub counter: Option<CounterPredicate>,
}

/// counter % modulo == remainder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterPredicate {
    pub name: String,
    pub modulo: u64,
    #[serde(default)]
    pub remainder: u64,
}

/// 闭区间，JSON 里写单个数或 [lo, hi]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr", into = "RangeRepr")]
pub struct ValueRange {
    pub lo: u64,
    pub hi: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RangeRepr {
    Exact(u64),
    Span(u64, u64),
}

impl ValueRange {
    pub fn exact(v: u64) -> Self {
        Self { lo: v, hi: v }
    }

    pub fn contains(&self, v: u64) -> bool {
        self.lo <= v && v <= self.hi
    }
}

impl TryFrom<RangeRepr> for ValueRange {
    type Error = String;

    fn try_from(value: RangeRepr) -> std::result::Result<Self, Self::Error> {
        match value {
            RangeRepr::Exact(v) => Ok(Self::exact(v)),
            RangeRepr::Span(lo, hi) if lo <= hi => Ok(Self { lo, hi }),
            RangeRepr::Span(lo, hi) => Err(format!("empty range [{lo}, {hi}]")),
        }
    }
}

impl From<ValueRange> for RangeRepr {
    fn from(value: ValueRange) -> Self {
        if value.lo == value.hi {
            RangeRepr::Exact(value.lo)
        } else {
            RangeRepr::Span(value.lo, value.hi)
        }
    }
}

impl FromStr for ValueRange {
    type Err = String;

    /// "5" 或 "5..10"
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| format!("invalid number `{v}`"))
        };
        match s.split_once("..") {
            Some((lo, hi)) => RangeRepr::Span(parse(lo)?, parse(hi)?).try_into(),
            None => Ok(Self::exact(parse(s)?)),
        }
    }
}

/// "10.1.0.0/16"，不带掩码时按 /32
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Prefix {
    addr: Ipv4Addr,
    len: u8,
}

impl Ipv4Prefix {
    fn mask(&self) -> u32 {
        if self.len == 0 {
            0
        } else {
            u32::MAX << (32 - self.len as u32)
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = self.mask();
        u32::from(ip) & mask == u32::from(self.addr) & mask
    }
}

impl FromStr for Ipv4Prefix {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((a, l)) => (
                a,
                l.parse::<u8>()
                    .map_err(|_| format!("invalid prefix length in `{s}`"))?,
            ),
            None => (s, 32),
        };
        if len > 32 {
            return Err(format!("prefix length {len} out of range"));
        }
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| format!("invalid address in `{s}`"))?;
        Ok(Self { addr, len })
    }
}

impl TryFrom<String> for Ipv4Prefix {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Prefix> for String {
    fn from(value: Ipv4Prefix) -> Self {
        format!("{}/{}", value.addr, value.len)
    }
}

impl Program {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.partitions.iter().map(|p| p.id)
    }

    /// 程序没给树时：按声明顺序的严格优先级
    pub fn tree_spec(&self) -> NodeSpec {
        self.tree
            .clone()
            .unwrap_or_else(|| NodeSpec::strict_priority(self.partition_ids()))
    }

    /// 缺省分区：显式声明的，否则第一个
    pub fn default_partition(&self) -> Result<PartitionId> {
        let first = self
            .partitions
            .first()
            .map(|p| p.id)
            .ok_or(ConfigError::NoPartitions)?;
        let id = self.default_partition.unwrap_or(first);
        if !self.partition_ids().any(|p| p == id) {
            return Err(ConfigError::UnknownPartition(id));
        }
        Ok(id)
    }
}

/// 读入并解析程序文件，任何问题都是初始化期的致命错误
pub fn load_program(path: &Path) -> Result<Program> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Program::from_json(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ChildSpec, PolicySpec};

    #[test]
    fn parses_full_program() {
        let program = Program::from_json(
            r#"{
                "partitions": [
                    { "id": 0, "capacity": { "bytes": 1000 } },
                    { "id": 1, "congestion": { "min_th": { "bytes": 200 }, "max_th": { "bytes": 800 } } }
                ],
                "tree": { "policy": { "drr": { "quanta": [1500, 500] } },
                          "children": [ { "partition": 1 }, { "partition": 0 } ] },
                "default_partition": 1,
                "counters": ["seen"],
                "tables": [{
                    "name": "classify",
                    "entries": [
                        { "match": { "dst": "10.2.1.0/24", "dst_port": [5000, 5999] },
                          "actions": [ { "set_partition": 0 }, { "set_rank": 3 }, { "count": "seen" } ] },
                        { "match": { "counter": { "name": "seen", "modulo": 4 } }, "actions": ["drop"] }
                    ],
                    "default_actions": ["rank_from_len"]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(program.partitions.len(), 2);
        assert_eq!(program.partitions[0].capacity, Some(QueueSize::Bytes(1000)));
        assert_eq!(program.default_partition().unwrap(), 1);
        let tree = program.tree_spec();
        assert_eq!(tree.policy, PolicySpec::Drr { quanta: vec![1500, 500] });
        assert_eq!(tree.children[0], ChildSpec::Partition(1));

        let table = &program.tables[0];
        assert_eq!(table.entries[0].matcher.dst_port, Some(ValueRange { lo: 5000, hi: 5999 }));
        assert_eq!(table.entries[1].actions, vec![ActionSpec::Drop]);
        assert_eq!(table.default_actions, vec![ActionSpec::RankFromLen]);
        assert_eq!(
            table.entries[1].matcher.counter.as_ref().map(|c| c.remainder),
            Some(0)
        );
    }

    #[test]
    fn default_tree_is_strict_priority_in_declaration_order() {
        let program =
            Program::from_json(r#"{ "partitions": [ { "id": 4 }, { "id": 2 } ] }"#).unwrap();
        assert_eq!(program.tree_spec(), NodeSpec::strict_priority([4, 2]));
        assert_eq!(program.default_partition().unwrap(), 4);
    }

    #[test]
    fn rejects_unknown_fields_and_bad_ranges() {
        assert!(Program::from_json(r#"{ "partitions": [], "bogus": 1 }"#).is_err());
        assert!(
            Program::from_json(
                r#"{ "partitions": [{ "id": 0 }],
                     "tables": [{ "name": "t", "entries": [{ "match": { "len": [10, 1] }, "actions": [] }] }] }"#
            )
            .is_err()
        );
    }

    #[test]
    fn prefix_matching() {
        let p: Ipv4Prefix = "10.1.0.0/16".parse().unwrap();
        assert!(p.contains(Ipv4Addr::new(10, 1, 200, 3)));
        assert!(!p.contains(Ipv4Addr::new(10, 2, 0, 1)));
        let any: Ipv4Prefix = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains(Ipv4Addr::new(192, 168, 1, 1)));
        let host: Ipv4Prefix = "10.0.0.1".parse().unwrap();
        assert!(host.contains(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!host.contains(Ipv4Addr::new(10, 0, 0, 2)));
        assert!("10.0.0.0/33".parse::<Ipv4Prefix>().is_err());
    }

    #[test]
    fn value_range_from_str() {
        assert_eq!("7".parse::<ValueRange>().unwrap(), ValueRange::exact(7));
        assert_eq!(
            "10..20".parse::<ValueRange>().unwrap(),
            ValueRange { lo: 10, hi: 20 }
        );
        assert!("20..10".parse::<ValueRange>().is_err());
    }
}
