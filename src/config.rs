use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// 分区容量，按字节或按包数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueSize {
    Bytes(u64),
    Packets(u64),
}

impl QueueSize {
    pub fn is_zero(&self) -> bool {
        matches!(self, QueueSize::Bytes(0) | QueueSize::Packets(0))
    }

    /// 再放进一个 pkt_len 字节的包后是否仍在上限内
    pub fn admits(&self, occupied_bytes: u64, occupied_pkts: usize, pkt_len: usize) -> bool {
        match *self {
            QueueSize::Bytes(limit) => occupied_bytes + pkt_len as u64 <= limit,
            QueueSize::Packets(limit) => (occupied_pkts as u64) < limit,
        }
    }

    /// 折算成字节，用于量化满刻度
    pub fn as_bytes(&self, mean_pkt_size: u32) -> u64 {
        match *self {
            QueueSize::Bytes(b) => b,
            QueueSize::Packets(p) => p * mean_pkt_size as u64,
        }
    }
}

impl Default for QueueSize {
    fn default() -> Self {
        QueueSize::Packets(1000)
    }
}

/// 链路速率，配置里写成 "10Mbps" 这样的字符串
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate {
    bits_per_sec: u64,
}

impl DataRate {
    pub const fn from_bps(bits_per_sec: u64) -> Self {
        Self { bits_per_sec }
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self::from_bps(mbps * 1_000_000)
    }

    pub fn bits_per_sec(&self) -> u64 {
        self.bits_per_sec
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.bits_per_sec as f64 / 8.0
    }

    /// 在该速率下发送 bytes 个字节所需的时间
    pub fn tx_time(&self, bytes: u64) -> Duration {
        if self.bits_per_sec == 0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(bytes as f64 * 8.0 / self.bits_per_sec as f64)
    }
}

impl FromStr for DataRate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let value: f64 = num
            .parse()
            .map_err(|_| format!("invalid data rate `{s}`"))?;
        let scale = match unit.trim() {
            "" | "bps" | "b/s" => 1.0,
            "Kbps" | "kbps" | "Kb/s" => 1e3,
            "Mbps" | "mbps" | "Mb/s" => 1e6,
            "Gbps" | "gbps" | "Gb/s" => 1e9,
            other => return Err(format!("unknown data rate unit `{other}`")),
        };
        Ok(Self::from_bps((value * scale).round() as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(value: DataRate) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.bits_per_sec)
    }
}

/// 门限：直接给字节数，或者给排队时延再按链路速率折算
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    Bytes(f64),
    DelayMs(f64),
}

impl Threshold {
    pub fn to_bytes(&self, link_bandwidth: DataRate) -> f64 {
        match *self {
            Threshold::Bytes(b) => b,
            Threshold::DelayMs(ms) => link_bandwidth.bytes_per_sec() * ms / 1000.0,
        }
    }
}

fn default_max_p() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionThresholds {
    pub min_th: Threshold,
    pub max_th: Threshold,
    #[serde(default = "default_max_p")]
    pub max_p: f64,
}

impl CongestionThresholds {
    pub fn bytes(min_th: f64, max_th: f64) -> Self {
        Self {
            min_th: Threshold::Bytes(min_th),
            max_th: Threshold::Bytes(max_th),
            max_p: 1.0,
        }
    }

    /// 折算成字节门限并检查 0 <= min < max、0 < max_p <= 1
    pub fn resolve(&self, link_bandwidth: DataRate) -> Result<(f64, f64, f64)> {
        let min_th = self.min_th.to_bytes(link_bandwidth);
        let max_th = self.max_th.to_bytes(link_bandwidth);
        if !(min_th >= 0.0 && max_th > min_th) {
            return Err(ConfigError::InvalidThresholds(format!(
                "need 0 <= min_th < max_th, got {min_th} / {max_th}"
            )));
        }
        if !(self.max_p > 0.0 && self.max_p <= 1.0) {
            return Err(ConfigError::InvalidThresholds(format!(
                "max_p must be in (0, 1], got {}",
                self.max_p
            )));
        }
        Ok((min_th, max_th, self.max_p))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QdiscConfig {
    pub program_file: Option<PathBuf>,
    pub commands_file: Option<PathBuf>,

    // 程序没有声明容量的分区使用这个值
    pub partition_capacity: QueueSize,

    pub queue_weight: f64,
    pub mean_pkt_size: u32,
    pub link_bandwidth: DataRate,
    pub queue_size_bits: u32,

    // 程序没有声明门限的分区使用这组门限，None 表示不做拥塞丢包
    pub congestion: Option<CongestionThresholds>,
    pub count_spacing: bool,
    pub seed: u64,
}

impl Default for QdiscConfig {
    fn default() -> Self {
        Self {
            program_file: None,
            commands_file: None,
            partition_capacity: QueueSize::default(),
            queue_weight: 0.002,
            mean_pkt_size: 500,
            link_bandwidth: DataRate::from_mbps(10),
            queue_size_bits: 16,
            congestion: None,
            count_spacing: false,
            seed: 1,
        }
    }
}

impl QdiscConfig {
    pub fn with_program(path: impl Into<PathBuf>) -> Self {
        Self {
            program_file: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// 数值参数校验，程序文件是否存在由 qdisc 的 check_config 负责
    pub fn validate(&self) -> Result<()> {
        if !(self.queue_weight > 0.0 && self.queue_weight <= 1.0) {
            return Err(ConfigError::InvalidWeight(self.queue_weight));
        }
        if self.partition_capacity.is_zero() {
            return Err(ConfigError::InvalidCapacity);
        }
        if self.mean_pkt_size == 0 {
            return Err(ConfigError::InvalidMeanPktSize);
        }
        if self.link_bandwidth.bits_per_sec() == 0 {
            return Err(ConfigError::InvalidBandwidth);
        }
        if !(1..=32).contains(&self.queue_size_bits) {
            return Err(ConfigError::InvalidQueueSizeBits(self.queue_size_bits));
        }
        if let Some(th) = &self.congestion {
            th.resolve(self.link_bandwidth)?;
        }
        Ok(())
    }
}
