use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::config::QdiscConfig;
use crate::estimator::{Ewma, quantize};
use crate::modifier::PacketModifier;
use crate::observer::{BufferEvent, QueueObserver};
use crate::packet_context::{PacketContext, PacketMeta};
use crate::pipeline::{Decision, Pipeline};
use crate::qdisc::{Qdisc, Rejected};
use crate::stats::{DropReason, QdiscStats};
use crate::tree::{PartitionId, PartitionTree};

/// 运行中的可编程队列：解析 -> 程序裁决 -> 容量准入 -> 拥塞准入 -> 调度树
pub struct ProgrammableQdisc<T> {
    pub(super) config: QdiscConfig,
    pub(super) tree: PartitionTree<T>,
    pub(super) pipeline: Box<dyn Pipeline<T>>,
    pub(super) modifiers: Vec<Box<dyn PacketModifier<T>>>,
    pub(super) observers: Vec<Box<dyn QueueObserver<T>>>,
    pub(super) clock: Box<dyn Clock>,
    // 所有分区合计字节数的 EWMA，只用于给程序盖 avg_qdepth
    pub(super) aggregate: Ewma,
    // avg_qdepth 量化的满刻度 (所有分区容量之和)
    pub(super) full_scale: f64,
    pub(super) rng: StdRng,
    pub(super) stats: QdiscStats,
}

impl<T> ProgrammableQdisc<T> {
    pub fn config(&self) -> &QdiscConfig {
        &self.config
    }

    pub fn tree(&self) -> &PartitionTree<T> {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn backlog_bytes(&self) -> u64 {
        self.tree.total_bytes()
    }

    pub fn occupied_bytes(&self, partition: PartitionId) -> Option<u64> {
        self.tree.occupied_bytes(partition)
    }

    pub fn select_next(&self) -> Option<PartitionId> {
        self.tree.select_next()
    }

    fn stamp_meta(&self) -> PacketMeta {
        PacketMeta {
            qdepth: self.tree.total_bytes(),
            avg_qdepth: quantize(
                self.aggregate.avg(),
                self.full_scale,
                self.config.queue_size_bits,
            ),
        }
    }

    fn reject(&mut self, ctx: PacketContext<T>, reason: DropReason, now: Duration) -> Rejected<T> {
        self.stats.record_drop(reason, ctx.pkt_len);
        for obs in self.observers.iter_mut() {
            obs.on_drop(&ctx, reason, now);
        }
        Rejected { ctx, reason }
    }

    fn notify_bytes(&mut self, old_total: u64, now: Duration) {
        let new_total = self.tree.total_bytes();
        self.aggregate.update(new_total as f64, now);
        for obs in self.observers.iter_mut() {
            obs.on_bytes_in_queue(old_total, new_total, now);
        }
    }
}

impl<T> Qdisc<T> for ProgrammableQdisc<T> {
    fn enqueue(&mut self, mut ctx: PacketContext<T>) -> Result<(), Rejected<T>> {
        let now = self.clock.now();
        ctx.arrival_time = now;

        // 1. 解析阶段
        for m in &self.modifiers {
            m.process(&mut ctx);
        }
        ctx.meta = self.stamp_meta();

        // 2. 程序裁决
        let partition = match self.pipeline.decide(&mut ctx) {
            Decision::Drop => {
                trace!(len = ctx.pkt_len, "dropped by program");
                return Err(self.reject(ctx, DropReason::Program, now));
            }
            Decision::Admit { partition, rank } => {
                ctx.partition = Some(partition);
                ctx.rank = rank;
                partition
            }
        };
        if !self.tree.contains(partition) {
            warn!(partition, "program selected an unknown partition, dropping");
            return Err(self.reject(ctx, DropReason::Program, now));
        }

        // 3. 容量准入：放不下一律算溢出，不参与随机丢包
        if !self.tree.fits(partition, ctx.pkt_len) {
            debug!(partition, len = ctx.pkt_len, "overflow drop");
            return Err(self.reject(ctx, DropReason::Overflow, now));
        }

        // 4. 拥塞准入：概率为 0 时不消耗随机数
        let p = self.tree.drop_probability(partition, now);
        if p > 0.0 && self.rng.gen_range(0.0..1.0) < p {
            self.tree.on_congestion_drop(partition);
            debug!(partition, p, "congestion drop");
            return Err(self.reject(ctx, DropReason::Congestion, now));
        }

        let old_bytes = self.tree.occupied_bytes(partition).unwrap_or(0);
        let old_total = self.tree.total_bytes();
        let len = ctx.pkt_len;
        if let Err(ctx) = self.tree.insert(partition, ctx, now) {
            debug!(partition, len, old_bytes, "overflow drop");
            return Err(self.reject(ctx, DropReason::Overflow, now));
        }
        self.stats.record_enqueue(len);

        let ev = BufferEvent {
            partition,
            old_bytes,
            new_bytes: old_bytes + len as u64,
            time: now,
        };
        trace!(partition, len, bytes = ev.new_bytes, "enqueued");
        for obs in self.observers.iter_mut() {
            obs.on_enqueue(&ev);
        }
        self.notify_bytes(old_total, now);
        Ok(())
    }

    fn peek(&self) -> Option<&PacketContext<T>> {
        self.tree.peek()
    }

    fn dequeue(&mut self) -> Option<PacketContext<T>> {
        let partition = self.tree.select_next()?;
        let now = self.clock.now();
        let old_bytes = self.tree.occupied_bytes(partition).unwrap_or(0);
        let old_total = self.tree.total_bytes();

        let ctx = self.tree.remove_head(partition, now)?;
        self.stats.record_dequeue(ctx.pkt_len);

        let ev = BufferEvent {
            partition,
            old_bytes,
            new_bytes: old_bytes - ctx.pkt_len as u64,
            time: now,
        };
        trace!(partition, len = ctx.pkt_len, bytes = ev.new_bytes, "dequeued");
        for obs in self.observers.iter_mut() {
            obs.on_dequeue(&ev);
        }
        self.notify_bytes(old_total, now);
        Some(ctx)
    }

    fn stats(&self) -> QdiscStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CongestionThresholds, QueueSize};
    use crate::observer::{TraceEvent, TraceRecorder};
    use crate::pipeline::Program;
    use crate::qdisc::QdiscBuilder;

    fn program(json: &str) -> Program {
        Program::from_json(json).unwrap()
    }

    fn pkt(tag: u32, len: usize) -> PacketContext<u32> {
        PacketContext::new(tag, len)
    }

    #[test]
    fn stamps_queue_metadata_before_decision() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = seen.clone();
        let mut q = QdiscBuilder::<u32>::new(QdiscConfig::default())
            .program(program(r#"{ "partitions": [ { "id": 0 } ] }"#))
            .pipeline(move |ctx: &mut PacketContext<u32>| {
                log.lock().push(ctx.meta.qdepth);
                Decision::Admit {
                    partition: 0,
                    rank: 0,
                }
            })
            .build()
            .unwrap();
        q.enqueue(pkt(1, 100)).unwrap();
        q.enqueue(pkt(2, 40)).unwrap();
        q.enqueue(pkt(3, 1)).unwrap();
        assert_eq!(*seen.lock(), vec![0, 100, 140]);
    }

    #[test]
    fn unknown_partition_is_a_program_drop() {
        let recorder = TraceRecorder::new();
        let mut q = QdiscBuilder::<u32>::new(QdiscConfig::default())
            .program(program(r#"{ "partitions": [ { "id": 0 } ] }"#))
            .pipeline(|_: &mut PacketContext<u32>| Decision::Admit {
                partition: 9,
                rank: 0,
            })
            .observer(recorder.clone())
            .build()
            .unwrap();
        let rejected = q.enqueue(pkt(1, 100)).unwrap_err();
        assert_eq!(rejected.reason, DropReason::Program);
        assert_eq!(rejected.into_inner().msg, 1);
        assert_eq!(q.backlog_bytes(), 0);
        assert_eq!(recorder.drops(), vec![(Some(9), DropReason::Program)]);
    }

    #[test]
    fn full_congestion_always_drops() {
        // w = 1 时平均值就是瞬时值，超过 max_th 必丢
        let config = QdiscConfig {
            queue_weight: 1.0,
            congestion: Some(CongestionThresholds::bytes(100.0, 200.0)),
            partition_capacity: QueueSize::Bytes(10_000),
            ..QdiscConfig::default()
        };
        let mut q = QdiscBuilder::<u32>::new(config)
            .program(program(r#"{ "partitions": [ { "id": 0 } ] }"#))
            .clock(ManualClock::new())
            .build()
            .unwrap();
        q.enqueue(pkt(1, 100)).unwrap();
        q.enqueue(pkt(2, 100)).unwrap();
        for tag in 3..10 {
            let rejected = q.enqueue(pkt(tag, 100)).unwrap_err();
            assert_eq!(rejected.reason, DropReason::Congestion);
        }
        assert_eq!(q.stats().dropped(DropReason::Congestion).packets, 7);
        assert_eq!(q.occupied_bytes(0), Some(200));
    }

    #[test]
    fn traces_carry_old_and_new_bytes() {
        let recorder = TraceRecorder::new();
        let clock = ManualClock::new();
        let mut q = QdiscBuilder::<u32>::new(QdiscConfig::default())
            .program(program(r#"{ "partitions": [ { "id": 4 } ] }"#))
            .observer(recorder.clone())
            .clock(clock.clone())
            .build()
            .unwrap();

        clock.set(Duration::from_millis(1));
        q.enqueue(pkt(1, 300)).unwrap();
        clock.set(Duration::from_millis(2));
        assert_eq!(q.dequeue().map(|c| c.msg), Some(1));

        let ev = |old_bytes, new_bytes, ms| BufferEvent {
            partition: 4,
            old_bytes,
            new_bytes,
            time: Duration::from_millis(ms),
        };
        assert_eq!(
            recorder.events(),
            vec![
                TraceEvent::Enqueue(ev(0, 300, 1)),
                TraceEvent::BytesInQueue {
                    old: 0,
                    new: 300,
                    time: Duration::from_millis(1)
                },
                TraceEvent::Dequeue(ev(300, 0, 2)),
                TraceEvent::BytesInQueue {
                    old: 300,
                    new: 0,
                    time: Duration::from_millis(2)
                },
            ]
        );
    }

    #[test]
    fn arrival_time_comes_from_clock() {
        let clock = ManualClock::new();
        let mut q = QdiscBuilder::<u32>::new(QdiscConfig::default())
            .program(program(r#"{ "partitions": [ { "id": 0 } ] }"#))
            .clock(clock.clone())
            .build()
            .unwrap();
        clock.set(Duration::from_secs(3));
        q.enqueue(pkt(1, 10)).unwrap();
        assert_eq!(q.peek().map(|c| c.arrival_time), Some(Duration::from_secs(3)));
        assert_eq!(q.peek().and_then(|c| c.partition), Some(0));
    }
}
