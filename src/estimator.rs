//! Queue-length averaging and the RED-style drop curve.

use std::time::Duration;

use crate::config::DataRate;

/// 指数加权平均，带空闲衰减
#[derive(Debug, Clone)]
pub struct Ewma {
    avg: f64,
    weight: f64,
    // 每秒能发多少个平均大小的包，用于空闲衰减
    pkts_per_sec: f64,
    idle_since: Option<Duration>,
}

impl Ewma {
    pub fn new(weight: f64, mean_pkt_size: u32, link_bandwidth: DataRate) -> Self {
        Self {
            avg: 0.0,
            weight,
            pkts_per_sec: link_bandwidth.bytes_per_sec() / mean_pkt_size.max(1) as f64,
            // 开局就是空队列
            idle_since: Some(Duration::ZERO),
        }
    }

    pub fn avg(&self) -> f64 {
        self.avg
    }

    /// 队列空闲期间，相当于每个"本可发送的包"都采样到 0
    fn decayed(&self, now: Duration) -> f64 {
        match self.idle_since {
            Some(start) => {
                let idle = now.saturating_sub(start).as_secs_f64();
                let m = idle * self.pkts_per_sec;
                self.avg * (1.0 - self.weight).powf(m)
            }
            None => self.avg,
        }
    }

    pub fn update(&mut self, sample: f64, now: Duration) -> f64 {
        self.avg = self.decayed(now);
        self.avg = (1.0 - self.weight) * self.avg + self.weight * sample;
        self.idle_since = if sample <= 0.0 { Some(now) } else { None };
        self.avg
    }
}

/// 分区的拥塞估计器：EWMA + 线性丢包曲线
#[derive(Debug, Clone)]
pub struct CongestionEstimator {
    ewma: Ewma,
    // (min_th, max_th, max_p)，None 则永远不丢
    thresholds: Option<(f64, f64, f64)>,
    count_spacing: bool,
    // 上次拥塞丢包以来放行的包数
    count: u32,
    mean_pkt_size: u32,
}

impl CongestionEstimator {
    pub fn new(
        weight: f64,
        mean_pkt_size: u32,
        link_bandwidth: DataRate,
        thresholds: Option<(f64, f64, f64)>,
        count_spacing: bool,
    ) -> Self {
        Self {
            ewma: Ewma::new(weight, mean_pkt_size, link_bandwidth),
            thresholds,
            count_spacing,
            count: 0,
            mean_pkt_size,
        }
    }

    pub fn avg_bytes(&self) -> f64 {
        self.ewma.avg()
    }

    /// 以平均包大小为单位的平均队长
    pub fn avg_packets(&self) -> f64 {
        self.ewma.avg() / self.mean_pkt_size.max(1) as f64
    }

    /// 占用变化时调用，返回新的丢包概率
    pub fn update(&mut self, occupied_bytes: u64, now: Duration) -> f64 {
        let avg = self.ewma.update(occupied_bytes as f64, now);
        if self.curve(avg) == 0.0 {
            self.count = 0;
        }
        self.probability_with_count(avg)
    }

    /// 入队前查询，不改状态
    pub fn drop_probability(&self, now: Duration) -> f64 {
        self.probability_with_count(self.ewma.decayed(now))
    }

    /// 给定平均队长时的基础概率，对 avg 单调不减
    pub fn curve(&self, avg: f64) -> f64 {
        let Some((min_th, max_th, max_p)) = self.thresholds else {
            return 0.0;
        };
        if avg <= min_th {
            0.0
        } else if avg >= max_th {
            1.0
        } else {
            max_p * (avg - min_th) / (max_th - min_th)
        }
    }

    fn probability_with_count(&self, avg: f64) -> f64 {
        let pb = self.curve(avg);
        if !self.count_spacing || pb <= 0.0 || pb >= 1.0 {
            return pb;
        }
        // pa = pb / (1 - count * pb)，让相邻两次丢包的间隔更均匀
        let denom = 1.0 - self.count as f64 * pb;
        if denom <= pb {
            1.0
        } else {
            (pb / denom).min(1.0)
        }
    }

    pub fn on_admit(&mut self) {
        if self.count_spacing {
            self.count = self.count.saturating_add(1);
        }
    }

    pub fn on_congestion_drop(&mut self) {
        self.count = 0;
    }
}

/// 把 [0, full_scale] 映射到 queue_size_bits 位无符号整数
pub fn quantize(value: f64, full_scale: f64, bits: u32) -> u64 {
    let max = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    if full_scale <= 0.0 || value <= 0.0 {
        return 0;
    }
    let ratio = (value / full_scale).min(1.0);
    (ratio * max as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red(min: f64, max: f64, max_p: f64) -> CongestionEstimator {
        CongestionEstimator::new(
            0.002,
            500,
            DataRate::from_mbps(10),
            Some((min, max, max_p)),
            false,
        )
    }

    #[test]
    fn ewma_follows_weight() {
        let mut ewma = Ewma::new(0.5, 500, DataRate::from_mbps(10));
        assert_eq!(ewma.update(100.0, Duration::ZERO), 50.0);
        assert_eq!(ewma.update(100.0, Duration::ZERO), 75.0);
        assert_eq!(ewma.update(0.0, Duration::ZERO), 37.5);
    }

    #[test]
    fn weight_one_tracks_instantaneous_queue() {
        let mut ewma = Ewma::new(1.0, 500, DataRate::from_mbps(10));
        assert_eq!(ewma.update(800.0, Duration::ZERO), 800.0);
        assert_eq!(ewma.update(300.0, Duration::ZERO), 300.0);
    }

    #[test]
    fn idle_time_decays_average() {
        let mut ewma = Ewma::new(0.5, 1250, DataRate::from_mbps(10));
        ewma.update(1000.0, Duration::ZERO);
        ewma.update(0.0, Duration::from_millis(1));
        let before = ewma.avg();
        // 10Mbps、1250 字节：每毫秒 1 个包，空闲 2ms 衰减 (1-w)^2
        let after = ewma.update(0.0, Duration::from_millis(3));
        assert!((after - before * 0.25 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn curve_boundaries() {
        let est = red(200.0, 800.0, 1.0);
        assert_eq!(est.curve(0.0), 0.0);
        assert_eq!(est.curve(200.0), 0.0);
        assert!((est.curve(500.0) - 0.5).abs() < 1e-12);
        assert_eq!(est.curve(800.0), 1.0);
        assert_eq!(est.curve(5000.0), 1.0);
    }

    #[test]
    fn max_p_scales_between_thresholds_only() {
        let est = red(200.0, 800.0, 0.1);
        assert!((est.curve(500.0) - 0.05).abs() < 1e-12);
        assert_eq!(est.curve(800.0), 1.0);
    }

    #[test]
    fn no_thresholds_never_drops() {
        let mut est =
            CongestionEstimator::new(1.0, 500, DataRate::from_mbps(10), None, false);
        assert_eq!(est.update(u64::MAX / 2, Duration::ZERO), 0.0);
    }

    #[test]
    fn count_spacing_raises_probability_between_drops() {
        let mut est = CongestionEstimator::new(
            1.0,
            500,
            DataRate::from_mbps(10),
            Some((200.0, 800.0, 1.0)),
            true,
        );
        let p0 = est.update(260, Duration::ZERO);
        assert!((p0 - 0.1).abs() < 1e-12);
        for _ in 0..5 {
            est.on_admit();
        }
        let p5 = est.drop_probability(Duration::ZERO);
        assert!((p5 - 0.2).abs() < 1e-12);
        est.on_congestion_drop();
        assert!((est.drop_probability(Duration::ZERO) - 0.1).abs() < 1e-12);

        // 边界值不受计数修正影响
        est.update(900, Duration::ZERO);
        assert_eq!(est.drop_probability(Duration::ZERO), 1.0);
        est.update(100, Duration::ZERO);
        assert_eq!(est.drop_probability(Duration::ZERO), 0.0);
    }

    #[test]
    fn quantize_maps_to_bit_range() {
        assert_eq!(quantize(0.0, 1000.0, 8), 0);
        assert_eq!(quantize(1000.0, 1000.0, 8), 255);
        assert_eq!(quantize(5000.0, 1000.0, 8), 255);
        assert_eq!(quantize(500.0, 1000.0, 16), 32768);
        assert_eq!(quantize(10.0, 0.0, 16), 0);
        assert_eq!(quantize(1.0, 1.0, 32), u32::MAX as u64);
    }
}
