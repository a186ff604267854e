use crate::packet_context::PacketContext;
use crate::stats::{DropReason, QdiscStats};

mod builder;
mod programmable_qdisc;
mod shared_qdisc;

pub use builder::{CheckedBuilder, QdiscBuilder};
pub use programmable_qdisc::ProgrammableQdisc;
pub use shared_qdisc::SharedQdisc;

/// 被拒绝的包连同原因一起退回调用方，丢包是数据不是错误
#[derive(Debug)]
pub struct Rejected<T> {
    pub ctx: PacketContext<T>,
    pub reason: DropReason,
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> PacketContext<T> {
        self.ctx
    }
}

pub trait Qdisc<T> {
    fn enqueue(&mut self, ctx: PacketContext<T>) -> Result<(), Rejected<T>>;
    fn peek(&self) -> Option<&PacketContext<T>>;
    fn dequeue(&mut self) -> Option<PacketContext<T>>;
    fn stats(&self) -> QdiscStats;
}
