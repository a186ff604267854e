use std::collections::VecDeque;
use std::time::Duration;

use crate::config::QueueSize;
use crate::estimator::CongestionEstimator;
use crate::packet_context::PacketContext;
use crate::tree::PartitionId;

/// 叶子缓冲区：FIFO + 字节记账 + 自己的拥塞估计器
#[derive(Debug)]
pub struct Partition<T> {
    id: PartitionId,
    queue: VecDeque<PacketContext<T>>,
    occupied_bytes: u64,
    capacity: QueueSize,
    estimator: CongestionEstimator,
}

impl<T> Partition<T> {
    pub fn new(id: PartitionId, capacity: QueueSize, estimator: CongestionEstimator) -> Self {
        Self {
            id,
            queue: VecDeque::new(),
            occupied_bytes: 0,
            capacity,
            estimator,
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn occupied_bytes(&self) -> u64 {
        self.occupied_bytes
    }

    pub fn capacity(&self) -> QueueSize {
        self.capacity
    }

    pub fn estimator(&self) -> &CongestionEstimator {
        &self.estimator
    }

    pub fn head(&self) -> Option<&PacketContext<T>> {
        self.queue.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketContext<T>> {
        self.queue.iter()
    }

    /// 再放一个 len 字节的包是否不超容量
    pub fn fits(&self, len: usize) -> bool {
        self.capacity.admits(self.occupied_bytes, self.queue.len(), len)
    }

    pub(crate) fn drop_probability(&self, now: Duration) -> f64 {
        self.estimator.drop_probability(now)
    }

    pub(crate) fn on_congestion_drop(&mut self) {
        self.estimator.on_congestion_drop();
    }

    /// 超出容量时原样退回，不改任何状态
    pub(crate) fn push(
        &mut self,
        ctx: PacketContext<T>,
        now: Duration,
    ) -> Result<(), PacketContext<T>> {
        if !self.fits(ctx.pkt_len) {
            return Err(ctx);
        }
        self.occupied_bytes += ctx.pkt_len as u64;
        self.queue.push_back(ctx);
        self.estimator.update(self.occupied_bytes, now);
        self.estimator.on_admit();
        Ok(())
    }

    pub(crate) fn pop(&mut self, now: Duration) -> Option<PacketContext<T>> {
        let ctx = self.queue.pop_front()?;
        self.occupied_bytes -= ctx.pkt_len as u64;
        self.estimator.update(self.occupied_bytes, now);
        Some(ctx)
    }
}
