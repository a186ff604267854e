use std::path::PathBuf;

use thiserror::Error;

use crate::tree::PartitionId;

/// 初始化阶段的致命错误，出现即不能进入 Running
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("program file has not been configured")]
    MissingProgram,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed program: {0}")]
    Json(#[from] serde_json::Error),

    #[error("commands file line {line}: {reason}")]
    Command { line: usize, reason: String },

    #[error("program declares no partitions")]
    NoPartitions,

    #[error("unknown partition {0}")]
    UnknownPartition(PartitionId),

    #[error("duplicate partition {0}")]
    DuplicatePartition(PartitionId),

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("unknown counter `{0}`")]
    UnknownCounter(String),

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("invalid match: {0}")]
    InvalidMatch(String),

    #[error("invalid scheduling tree: {0}")]
    InvalidTree(String),

    #[error("queue weight must be in (0, 1], got {0}")]
    InvalidWeight(f64),

    #[error("capacity must be greater than zero")]
    InvalidCapacity,

    #[error("invalid congestion thresholds: {0}")]
    InvalidThresholds(String),

    #[error("link bandwidth must be greater than zero")]
    InvalidBandwidth,

    #[error("mean packet size must be greater than zero")]
    InvalidMeanPktSize,

    #[error("queue size bits must be in 1..=32, got {0}")]
    InvalidQueueSizeBits(u32),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
