use std::sync::Arc;

use parking_lot::Mutex;

use crate::packet_context::PacketContext;
use crate::qdisc::{ProgrammableQdisc, Qdisc, Rejected};
use crate::stats::QdiscStats;

/// 多线程入口：整条入队/出队路径在同一把锁里完成
pub struct SharedQdisc<T> {
    inner: Arc<Mutex<ProgrammableQdisc<T>>>,
}

impl<T> Clone for SharedQdisc<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedQdisc<T> {
    pub fn new(qdisc: ProgrammableQdisc<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(qdisc)),
        }
    }

    pub fn enqueue(&self, ctx: PacketContext<T>) -> Result<(), Rejected<T>> {
        self.inner.lock().enqueue(ctx)
    }

    pub fn dequeue(&self) -> Option<PacketContext<T>> {
        self.inner.lock().dequeue()
    }

    pub fn stats(&self) -> QdiscStats {
        self.inner.lock().stats()
    }

    /// 持锁执行任意只读/读写操作，比如查看队头
    pub fn with<R>(&self, f: impl FnOnce(&mut ProgrammableQdisc<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
