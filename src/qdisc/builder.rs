use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::QdiscConfig;
use crate::error::{ConfigError, Result};
use crate::estimator::{CongestionEstimator, Ewma};
use crate::modifier::{PacketModifier, default_modifiers};
use crate::observer::QueueObserver;
use crate::pipeline::{Pipeline, Program, TablePipeline, load_commands, load_program};
use crate::qdisc::ProgrammableQdisc;
use crate::stats::QdiscStats;
use crate::tree::{Partition, PartitionTree};

// ==========================================
// 生命周期：QdiscBuilder (未配置)
//   -> check_config      -> CheckedBuilder (配置合法)
//   -> initialize_params -> ProgrammableQdisc (运行中)
// 每一步都消耗上一步的值，跳步在类型上就写不出来
// ==========================================

pub struct QdiscBuilder<T> {
    config: QdiscConfig,
    program: Option<Program>,
    pipeline: Option<Box<dyn Pipeline<T>>>,
    modifiers: Vec<Box<dyn PacketModifier<T>>>,
    observers: Vec<Box<dyn QueueObserver<T>>>,
    clock: Box<dyn Clock>,
}

impl<T> QdiscBuilder<T> {
    pub fn new(config: QdiscConfig) -> Self {
        Self {
            config,
            program: None,
            pipeline: None,
            modifiers: Vec::new(),
            observers: Vec::new(),
            clock: Box::new(SystemClock::new()),
        }
    }

    /// 直接给出程序，优先于 program_file
    pub fn program(mut self, program: Program) -> Self {
        self.program = Some(program);
        self
    }

    /// 替换由程序表编译出来的流水线；分区和树仍然来自程序
    pub fn pipeline(mut self, pipeline: impl Pipeline<T> + 'static) -> Self {
        self.pipeline = Some(Box::new(pipeline));
        self
    }

    pub fn modifier(mut self, modifier: impl PacketModifier<T> + 'static) -> Self {
        self.modifiers.push(Box::new(modifier));
        self
    }

    pub fn observer(mut self, observer: impl QueueObserver<T> + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn check_config(self) -> Result<CheckedBuilder<T>> {
        if self.program.is_none() && self.config.program_file.is_none() {
            return Err(ConfigError::MissingProgram);
        }
        self.config.validate()?;
        Ok(CheckedBuilder { inner: self })
    }

    /// check_config + initialize_params
    pub fn build(self) -> Result<ProgrammableQdisc<T>> {
        self.check_config()?.initialize_params()
    }
}

impl<T: AsRef<[u8]>> QdiscBuilder<T> {
    /// 装上默认解析链：真实长度 + 五元组
    pub fn default_modifiers(mut self) -> Self {
        self.modifiers.extend(default_modifiers());
        self
    }
}

/// 配置已通过校验、还没有分配任何运行期状态
pub struct CheckedBuilder<T> {
    inner: QdiscBuilder<T>,
}

impl<T> CheckedBuilder<T> {
    pub fn config(&self) -> &QdiscConfig {
        &self.inner.config
    }

    pub fn initialize_params(self) -> Result<ProgrammableQdisc<T>> {
        let QdiscBuilder {
            config,
            program,
            pipeline,
            modifiers,
            observers,
            clock,
        } = self.inner;

        let program = match (program, &config.program_file) {
            (Some(program), _) => program,
            (None, Some(path)) => load_program(path)?,
            (None, None) => return Err(ConfigError::MissingProgram),
        };

        let pipeline: Box<dyn Pipeline<T>> = match pipeline {
            Some(p) => {
                if config.commands_file.is_some() {
                    warn!("commands file ignored: pipeline was injected");
                }
                p
            }
            None => {
                let mut tables = TablePipeline::compile(&program)?;
                if let Some(path) = &config.commands_file {
                    let n = load_commands(&mut tables, path)?;
                    info!(commands = n, path = %path.display(), "commands loaded");
                }
                Box::new(tables)
            }
        };

        let mut partitions = Vec::with_capacity(program.partitions.len());
        let mut full_scale = 0u64;
        for spec in &program.partitions {
            let capacity = spec.capacity.unwrap_or(config.partition_capacity);
            if capacity.is_zero() {
                warn!(partition = spec.id, "partition has zero capacity and will never admit");
            }
            let thresholds = spec
                .congestion
                .or(config.congestion)
                .map(|th| th.resolve(config.link_bandwidth))
                .transpose()?;
            full_scale += capacity.as_bytes(config.mean_pkt_size);
            partitions.push(Partition::new(
                spec.id,
                capacity,
                CongestionEstimator::new(
                    config.queue_weight,
                    config.mean_pkt_size,
                    config.link_bandwidth,
                    thresholds,
                    config.count_spacing,
                ),
            ));
        }
        let tree = PartitionTree::new(&program.tree_spec(), partitions)?;

        info!(
            partitions = program.partitions.len(),
            tables = program.tables.len(),
            link = %config.link_bandwidth,
            weight = config.queue_weight,
            seed = config.seed,
            "qdisc initialized"
        );

        Ok(ProgrammableQdisc {
            tree,
            pipeline,
            modifiers,
            observers,
            clock,
            aggregate: Ewma::new(
                config.queue_weight,
                config.mean_pkt_size,
                config.link_bandwidth,
            ),
            full_scale: full_scale as f64,
            rng: StdRng::seed_from_u64(config.seed),
            stats: QdiscStats::default(),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::QueueSize;

    fn two_partitions() -> Program {
        Program::from_json(r#"{ "partitions": [ { "id": 0 }, { "id": 1, "capacity": { "bytes": 0 } } ] }"#)
            .unwrap()
    }

    #[test]
    fn missing_program_fails_check() {
        let err = QdiscBuilder::<()>::new(QdiscConfig::default())
            .check_config()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingProgram));
    }

    #[test]
    fn invalid_numbers_fail_check() {
        let config = QdiscConfig {
            queue_weight: 1.5,
            ..QdiscConfig::default()
        };
        let err = QdiscBuilder::<()>::new(config)
            .program(two_partitions())
            .check_config()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidWeight(_)));
    }

    #[test]
    fn unreadable_program_fails_initialize() {
        let checked = QdiscBuilder::<()>::new(QdiscConfig::with_program("/nonexistent/p4.json"))
            .check_config()
            .unwrap();
        assert!(matches!(
            checked.initialize_params().err().unwrap(),
            ConfigError::Io { .. }
        ));
    }

    #[test]
    fn loads_program_and_commands_from_files() {
        let mut program = tempfile::NamedTempFile::new().unwrap();
        write!(
            program,
            r#"{{ "partitions": [ {{ "id": 0 }}, {{ "id": 1 }} ], "tables": [ {{ "name": "classify" }} ] }}"#
        )
        .unwrap();
        let mut commands = tempfile::NamedTempFile::new().unwrap();
        writeln!(commands, "table_set_default classify set_partition => 1").unwrap();

        let config = QdiscConfig {
            program_file: Some(program.path().to_path_buf()),
            commands_file: Some(commands.path().to_path_buf()),
            ..QdiscConfig::default()
        };
        let qdisc = QdiscBuilder::<()>::new(config).build().unwrap();
        assert_eq!(qdisc.tree().partitions().count(), 2);
        assert_eq!(
            qdisc.tree().partition(0).map(|p| p.capacity()),
            Some(QueueSize::Packets(1000))
        );
    }

    #[test]
    fn bad_command_line_is_fatal() {
        let mut commands = tempfile::NamedTempFile::new().unwrap();
        writeln!(commands, "table_add missing drop").unwrap();
        let config = QdiscConfig {
            commands_file: Some(commands.path().to_path_buf()),
            ..QdiscConfig::default()
        };
        let err = QdiscBuilder::<()>::new(config)
            .program(two_partitions())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Command { line: 1, .. }));
    }

    #[test]
    fn program_capacity_overrides_default() {
        let qdisc = QdiscBuilder::<()>::new(QdiscConfig::default())
            .program(two_partitions())
            .build()
            .unwrap();
        assert!(qdisc.tree().partition(1).unwrap().capacity().is_zero());
    }
}
