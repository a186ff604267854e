use crate::packet_context::PacketContext;
use crate::tree::PartitionId;

mod commands;
mod program;
mod table;

pub use commands::{apply_commands, load_commands};
pub use program::{
    ActionSpec, CounterPredicate, EntrySpec, Ipv4Prefix, MatchSpec, PartitionSpec, Program,
    TableSpec, ValueRange, load_program,
};
pub use table::TablePipeline;

/// 流水线对单个包的裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Drop,
    Admit { partition: PartitionId, rank: u64 },
}

/// 每包执行一次的分类/准入程序。
///
/// 同一个 qdisc 的所有包串行经过同一个实例；程序自己的状态只能随包确定性地变化，
/// 同样的状态 + 同样的包必须得到同样的裁决和同样的新状态。
pub trait Pipeline<T>: Send {
    fn decide(&mut self, ctx: &mut PacketContext<T>) -> Decision;
}

// 测试或简单场景直接用闭包当程序
impl<T, F> Pipeline<T> for F
where
    F: FnMut(&mut PacketContext<T>) -> Decision + Send,
{
    fn decide(&mut self, ctx: &mut PacketContext<T>) -> Decision {
        self(ctx)
    }
}
