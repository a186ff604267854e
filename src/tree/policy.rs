use std::collections::VecDeque;

/// 子节点当前会被选中的那个包的摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChildHead {
    pub len: usize,
    pub rank: u64,
}

// ==========================================
// 节点选择策略
// select 只读，状态只在出入队时推进
// ==========================================
#[derive(Debug, Clone)]
pub(crate) enum NodePolicy {
    /// 下标越小优先级越高
    StrictPriority,
    /// 按字节的加权公平 (DRR)
    Drr(DrrState),
    /// 子节点队头 rank 最小者优先
    Rank,
}

impl NodePolicy {
    pub(crate) fn select(&self, heads: &[Option<ChildHead>]) -> Option<usize> {
        match self {
            NodePolicy::StrictPriority => heads.iter().position(Option::is_some),
            NodePolicy::Drr(drr) => drr
                .select(heads)
                .or_else(|| heads.iter().position(Option::is_some)),
            NodePolicy::Rank => heads
                .iter()
                .enumerate()
                .filter_map(|(i, h)| h.map(|h| (h.rank, i)))
                .min()
                .map(|(_, i)| i),
        }
    }

    /// 子节点从空变为非空
    pub(crate) fn on_activate(&mut self, child: usize) {
        if let NodePolicy::Drr(drr) = self {
            drr.activate(child);
        }
    }

    /// 子节点送出了 len 字节
    pub(crate) fn on_dequeue(&mut self, child: usize, len: usize, now_empty: bool) {
        if let NodePolicy::Drr(drr) = self {
            drr.charge(child, len, now_empty);
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DrrState {
    quanta: Vec<u64>,
    deficits: Vec<u64>,
    // 有包的子节点，按轮询顺序
    active: VecDeque<usize>,
}

impl DrrState {
    pub(crate) fn new(quanta: Vec<u64>) -> Self {
        let deficits = vec![0; quanta.len()];
        Self {
            quanta,
            deficits,
            active: VecDeque::new(),
        }
    }

    /// 队头包要等几轮充值才付得起
    fn rounds(&self, child: usize, len: usize) -> u64 {
        let len = len as u64;
        let deficit = self.deficits[child];
        if len <= deficit {
            0
        } else {
            (len - deficit).div_ceil(self.quanta[child])
        }
    }

    // 等价于逐个弹出队头、钱不够就充值排到队尾的循环，
    // 赢家是 (轮数, 轮询位置) 最小的那个
    fn select(&self, heads: &[Option<ChildHead>]) -> Option<usize> {
        self.active
            .iter()
            .enumerate()
            .filter_map(|(pos, &child)| {
                heads
                    .get(child)
                    .copied()
                    .flatten()
                    .map(|h| (self.rounds(child, h.len), pos, child))
            })
            .min()
            .map(|(_, _, child)| child)
    }

    fn activate(&mut self, child: usize) {
        if !self.active.contains(&child) {
            self.deficits[child] = 0;
            self.active.push_back(child);
        }
    }

    // 把 select 里模拟的那几轮真正记账：
    // 排在赢家前面的被检查了 k+1 次，后面的 k 次
    fn charge(&mut self, child: usize, len: usize, now_empty: bool) {
        let Some(pos) = self.active.iter().position(|&c| c == child) else {
            return;
        };
        let k = self.rounds(child, len);

        for (i, &c) in self.active.iter().enumerate() {
            if i < pos {
                self.deficits[c] += (k + 1) * self.quanta[c];
            } else if i > pos {
                self.deficits[c] += k * self.quanta[c];
            }
        }
        self.deficits[child] =
            (self.deficits[child] + k * self.quanta[child]).saturating_sub(len as u64);

        // 赢家留在队头，继续花剩下的额度
        self.active.rotate_left(pos);
        if now_empty {
            self.active.pop_front();
            self.deficits[child] = 0;
        }
    }

    #[cfg(test)]
    pub(crate) fn deficit(&self, child: usize) -> u64 {
        self.deficits[child]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(len: usize) -> Option<ChildHead> {
        Some(ChildHead { len, rank: 0 })
    }

    #[test]
    fn strict_priority_takes_lowest_index() {
        let p = NodePolicy::StrictPriority;
        assert_eq!(p.select(&[None, head(10), head(10)]), Some(1));
        assert_eq!(p.select(&[None, None]), None);
    }

    #[test]
    fn rank_breaks_ties_by_index() {
        let p = NodePolicy::Rank;
        let heads = [
            Some(ChildHead { len: 1, rank: 5 }),
            Some(ChildHead { len: 1, rank: 3 }),
            Some(ChildHead { len: 1, rank: 3 }),
        ];
        assert_eq!(p.select(&heads), Some(1));
    }

    #[test]
    fn drr_shares_bytes_by_quantum() {
        let mut drr = DrrState::new(vec![1000, 500]);
        drr.activate(0);
        drr.activate(1);

        // 两边都一直有 500 字节的包，服务比例应为 2:1
        let heads = [head(500), head(500)];
        let mut served = [0usize; 2];
        for _ in 0..30 {
            let child = drr.select(&heads).unwrap();
            served[child] += 1;
            drr.charge(child, 500, false);
        }
        assert_eq!(served, [20, 10]);
    }

    #[test]
    fn drr_select_is_pure() {
        let mut drr = DrrState::new(vec![300, 300]);
        drr.activate(0);
        drr.activate(1);
        let heads = [head(1000), head(200)];
        let first = drr.select(&heads);
        assert_eq!(first, drr.select(&heads));
        assert_eq!(first, Some(1));
        assert_eq!(drr.deficit(0), 0);
    }

    #[test]
    fn drr_resets_drained_child() {
        let mut drr = DrrState::new(vec![500, 500]);
        drr.activate(0);
        drr.activate(1);
        let heads = [head(400), head(400)];
        let child = drr.select(&heads).unwrap();
        assert_eq!(child, 0);
        drr.charge(0, 400, true);
        assert_eq!(drr.deficit(0), 0);
        assert_eq!(drr.select(&[None, head(400)]), Some(1));
    }
}
