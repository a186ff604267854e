//! Programmable egress queue discipline.
//!
//! A per-packet decision program classifies each packet into a partition,
//! a RED-style estimator per partition turns the smoothed backlog into a
//! drop probability, and a scheduling tree over the partitions picks what
//! leaves next.

pub mod clock;
pub mod config;
pub mod error;
pub mod estimator;
pub mod five_tuple;
pub mod modifier;
pub mod observer;
pub mod packet_context;
pub mod pipeline;
pub mod qdisc;
pub mod stats;
pub mod tree;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CongestionThresholds, DataRate, QdiscConfig, QueueSize, Threshold};
pub use error::{ConfigError, Result};
pub use observer::{BufferEvent, QueueObserver, StatsMonitor, TraceEvent, TraceRecorder};
pub use packet_context::{PacketContext, PacketMeta};
pub use pipeline::{Decision, Pipeline, Program, TablePipeline};
pub use qdisc::{CheckedBuilder, ProgrammableQdisc, Qdisc, QdiscBuilder, Rejected, SharedQdisc};
pub use stats::{Counter, DropReason, QdiscStats};
pub use tree::{NodeSpec, PartitionId, PartitionTree};
