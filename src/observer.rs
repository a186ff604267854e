use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tracing::info;

use crate::packet_context::PacketContext;
use crate::stats::DropReason;
use crate::tree::PartitionId;

/// 分区字节数的一次变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferEvent {
    pub partition: PartitionId,
    pub old_bytes: u64,
    pub new_bytes: u64,
    pub time: Duration,
}

/// qdisc 的观察者，生命周期跟随所属的 qdisc 实例
pub trait QueueObserver<T>: Send {
    fn on_enqueue(&mut self, _ev: &BufferEvent) {}

    fn on_dequeue(&mut self, _ev: &BufferEvent) {}

    fn on_drop(&mut self, _ctx: &PacketContext<T>, _reason: DropReason, _time: Duration) {}

    /// 所有分区合计字节数的变化
    fn on_bytes_in_queue(&mut self, _old: u64, _new: u64, _time: Duration) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Enqueue(BufferEvent),
    Dequeue(BufferEvent),
    Drop {
        partition: Option<PartitionId>,
        pkt_len: usize,
        reason: DropReason,
        time: Duration,
    },
    BytesInQueue {
        old: u64,
        new: u64,
        time: Duration,
    },
}

// ==========================================
// 事件记录器：clone 出来的句柄共享同一份记录
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    pub fn drops(&self) -> Vec<(Option<PartitionId>, DropReason)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Drop {
                    partition, reason, ..
                } => Some((*partition, *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<T> QueueObserver<T> for TraceRecorder {
    fn on_enqueue(&mut self, ev: &BufferEvent) {
        self.events.lock().push(TraceEvent::Enqueue(*ev));
    }

    fn on_dequeue(&mut self, ev: &BufferEvent) {
        self.events.lock().push(TraceEvent::Dequeue(*ev));
    }

    fn on_drop(&mut self, ctx: &PacketContext<T>, reason: DropReason, time: Duration) {
        self.events.lock().push(TraceEvent::Drop {
            partition: ctx.partition,
            pkt_len: ctx.pkt_len,
            reason,
            time,
        });
    }

    fn on_bytes_in_queue(&mut self, old: u64, new: u64, time: Duration) {
        self.events
            .lock()
            .push(TraceEvent::BytesInQueue { old, new, time });
    }
}

// ==========================================
// 分区统计表 (速率 + 积压水位)
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    // 每个报告周期清零
    pub in_pkts: u64,
    pub drop_pkts: u64,
    pub out_pkts: u64,
    pub out_bytes: u64,

    // 永不清零
    pub backlog_pkts: u64,
    pub backlog_bytes: u64,
}

/// 监控面板：按仿真时间周期性输出每个分区的速率和积压
#[derive(Debug)]
pub struct StatsMonitor {
    name: String,
    interval: Duration,
    stats: BTreeMap<PartitionId, PartitionStats>,
    unclassified_drops: u64,
    last_report: Duration,
}

impl StatsMonitor {
    pub fn new(name: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            interval,
            stats: BTreeMap::new(),
            unclassified_drops: 0,
            last_report: Duration::ZERO,
        }
    }

    pub fn partition(&self, id: PartitionId) -> Option<PartitionStats> {
        self.stats.get(&id).copied()
    }

    fn check_and_report(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_report);
        if self.interval.is_zero() || elapsed < self.interval {
            return;
        }
        let secs = elapsed.as_secs_f64();
        let now_str = Local::now().format("%H:%M:%S").to_string();

        info!(
            monitor = %self.name,
            wall = %now_str,
            sim_time = now.as_secs_f64(),
            "partition | in(pkt/s) | drop(pkt/s) | out(pkt/s) | Mbps | backlog(pkt/KB)"
        );

        let mut total_bytes = 0;
        let mut total_backlog = 0;
        for (id, stat) in self.stats.iter_mut() {
            let mbps = (stat.out_bytes as f64 * 8.0) / 1_000_000.0 / secs;
            info!(
                "{:<9} | {:<9.1} | {:<11.1} | {:<10.1} | {:<6.2} | {} / {:.1}",
                id,
                stat.in_pkts as f64 / secs,
                stat.drop_pkts as f64 / secs,
                stat.out_pkts as f64 / secs,
                mbps,
                stat.backlog_pkts,
                stat.backlog_bytes as f64 / 1024.0
            );
            total_bytes += stat.out_bytes;
            total_backlog += stat.backlog_bytes;

            stat.in_pkts = 0;
            stat.drop_pkts = 0;
            stat.out_pkts = 0;
            stat.out_bytes = 0;
        }
        info!(
            "TOTAL     | {:.2} Mbps | {:.1}KB backlog | {} unclassified drops",
            (total_bytes as f64 * 8.0) / 1_000_000.0 / secs,
            total_backlog as f64 / 1024.0,
            self.unclassified_drops
        );

        self.last_report = now;
    }
}

impl<T> QueueObserver<T> for StatsMonitor {
    fn on_enqueue(&mut self, ev: &BufferEvent) {
        let stat = self.stats.entry(ev.partition).or_default();
        stat.in_pkts += 1;
        stat.backlog_pkts += 1;
        stat.backlog_bytes = ev.new_bytes;
        self.check_and_report(ev.time);
    }

    fn on_dequeue(&mut self, ev: &BufferEvent) {
        let stat = self.stats.entry(ev.partition).or_default();
        stat.out_pkts += 1;
        stat.out_bytes += ev.old_bytes - ev.new_bytes;
        stat.backlog_pkts = stat.backlog_pkts.saturating_sub(1);
        stat.backlog_bytes = ev.new_bytes;
        self.check_and_report(ev.time);
    }

    fn on_drop(&mut self, ctx: &PacketContext<T>, _reason: DropReason, time: Duration) {
        match ctx.partition {
            Some(id) => self.stats.entry(id).or_default().drop_pkts += 1,
            None => self.unclassified_drops += 1,
        }
        self.check_and_report(time);
    }
}
