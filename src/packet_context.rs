use std::time::Duration;

use crate::five_tuple::FiveTuple;
use crate::tree::PartitionId;

/// 程序可见的队列元数据，入队前由 qdisc 盖戳
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketMeta {
    /// 当前所有分区的瞬时字节数
    pub qdepth: u64,
    /// 聚合 EWMA 量化到 queue_size_bits 位后的值
    pub avg_qdepth: u64,
}

#[derive(Debug)]
pub struct PacketContext<T> {
    pub msg: T,

    // 记账长度，入队后不允许再改
    pub pkt_len: usize,
    pub headers: FiveTuple,

    // 程序写回的分类结果
    pub partition: Option<PartitionId>,
    pub rank: u64,

    pub arrival_time: Duration,
    pub meta: PacketMeta,
}

impl<T> PacketContext<T> {
    pub fn new(msg: T, pkt_len: usize) -> Self {
        Self {
            msg,
            pkt_len,
            headers: FiveTuple::default(),
            partition: None,
            rank: 0,
            arrival_time: Duration::ZERO,
            meta: PacketMeta::default(),
        }
    }
}

impl<T: AsRef<[u8]>> PacketContext<T> {
    /// 长度取自报文实体本身
    pub fn from_payload(msg: T) -> Self {
        let pkt_len = msg.as_ref().len();
        Self::new(msg, pkt_len)
    }
}
