use std::fmt;

/// 丢包原因，统计和 trace 都按它分桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// 程序显式丢弃
    Program,
    /// 拥塞估计器按概率丢弃
    Congestion,
    /// 分区容量不够
    Overflow,
}

impl DropReason {
    pub const ALL: [DropReason; 3] = [
        DropReason::Program,
        DropReason::Congestion,
        DropReason::Overflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Program => "program drop",
            DropReason::Congestion => "congestion drop",
            DropReason::Overflow => "overflow drop",
        }
    }

    fn index(&self) -> usize {
        match self {
            DropReason::Program => 0,
            DropReason::Congestion => 1,
            DropReason::Overflow => 2,
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub packets: u64,
    pub bytes: u64,
}

impl Counter {
    fn add(&mut self, bytes: usize) {
        self.packets += 1;
        self.bytes += bytes as u64;
    }
}

/// 累计统计快照，只增不减
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QdiscStats {
    pub enqueued: Counter,
    pub dequeued: Counter,
    dropped: [Counter; 3],
}

impl QdiscStats {
    pub fn dropped(&self, reason: DropReason) -> Counter {
        self.dropped[reason.index()]
    }

    pub fn total_dropped(&self) -> Counter {
        self.dropped.iter().fold(Counter::default(), |acc, c| Counter {
            packets: acc.packets + c.packets,
            bytes: acc.bytes + c.bytes,
        })
    }

    /// 当前还在缓冲区里的包数
    pub fn backlog_packets(&self) -> u64 {
        self.enqueued.packets - self.dequeued.packets
    }

    pub(crate) fn record_enqueue(&mut self, bytes: usize) {
        self.enqueued.add(bytes);
    }

    pub(crate) fn record_dequeue(&mut self, bytes: usize) {
        self.dequeued.add(bytes);
    }

    pub(crate) fn record_drop(&mut self, reason: DropReason, bytes: usize) {
        self.dropped[reason.index()].add(bytes);
    }
}
