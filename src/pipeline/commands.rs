use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::pipeline::program::{ActionSpec, CounterPredicate, MatchSpec};
use crate::pipeline::table::TablePipeline;

// ==========================================
// 运行时表项文件，每行一条命令：
//   table_add <table> <action> [key=value ...] [=> <param>]
//   table_set_default <table> <action> [=> <param>]
//   counter_set <counter> <value>
// '#' 之后为注释
// ==========================================

pub fn load_commands(pipeline: &mut TablePipeline, path: &Path) -> Result<usize> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    apply_commands(pipeline, &raw)
}

/// 返回执行的命令条数
pub fn apply_commands(pipeline: &mut TablePipeline, text: &str) -> Result<usize> {
    let mut applied = 0;
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        apply_line(pipeline, line).map_err(|e| match e {
            ConfigError::Command { reason, .. } => ConfigError::Command {
                line: line_no,
                reason,
            },
            other => ConfigError::Command {
                line: line_no,
                reason: other.to_string(),
            },
        })?;
        applied += 1;
    }
    debug!(applied, "commands applied");
    Ok(applied)
}

fn bad(reason: impl Into<String>) -> ConfigError {
    ConfigError::Command {
        line: 0,
        reason: reason.into(),
    }
}

fn apply_line(pipeline: &mut TablePipeline, line: &str) -> Result<()> {
    let (head, param) = match line.split_once("=>") {
        Some((h, p)) => (h.trim(), Some(p.trim())),
        None => (line, None),
    };
    let mut words = head.split_whitespace();
    let cmd = words.next().ok_or_else(|| bad("empty command"))?;

    match cmd {
        "table_add" => {
            let table = words.next().ok_or_else(|| bad("missing table name"))?;
            let action = words.next().ok_or_else(|| bad("missing action"))?;
            let action = parse_action(action, param)?;
            let mut matcher = MatchSpec::default();
            for kv in words {
                parse_key(&mut matcher, kv)?;
            }
            pipeline.add_entry(table, &matcher, &[action])
        }
        "table_set_default" => {
            let table = words.next().ok_or_else(|| bad("missing table name"))?;
            let action = words.next().ok_or_else(|| bad("missing action"))?;
            if words.next().is_some() {
                return Err(bad("table_set_default takes no match keys"));
            }
            pipeline.set_default(table, &[parse_action(action, param)?])
        }
        "counter_set" => {
            let name = words.next().ok_or_else(|| bad("missing counter name"))?;
            let value = words
                .next()
                .ok_or_else(|| bad("missing counter value"))?
                .parse::<u64>()
                .map_err(|_| bad("counter value must be an integer"))?;
            pipeline.set_counter(name, value)
        }
        other => Err(bad(format!("unknown command `{other}`"))),
    }
}

fn parse_action(name: &str, param: Option<&str>) -> Result<ActionSpec> {
    let need = |what: &str| param.ok_or_else(|| bad(format!("action `{name}` needs {what}")));
    let no_param = |spec: ActionSpec| match param {
        Some(_) => Err(bad(format!("action `{name}` takes no parameter"))),
        None => Ok(spec),
    };

    match name {
        "set_partition" => need("a partition id")?
            .parse()
            .map(ActionSpec::SetPartition)
            .map_err(|_| bad("partition id must be an integer")),
        "set_rank" => need("a rank")?
            .parse()
            .map(ActionSpec::SetRank)
            .map_err(|_| bad("rank must be an integer")),
        "count" => Ok(ActionSpec::Count(need("a counter name")?.to_string())),
        "rank_from_len" => no_param(ActionSpec::RankFromLen),
        "drop" => no_param(ActionSpec::Drop),
        "no_op" => no_param(ActionSpec::NoOp),
        other => Err(ConfigError::UnknownAction(other.to_string())),
    }
}

fn parse_key(m: &mut MatchSpec, kv: &str) -> Result<()> {
    let (key, value) = kv
        .split_once('=')
        .ok_or_else(|| bad(format!("expected key=value, got `{kv}`")))?;
    let num = |v: &str| v.parse::<u8>().map_err(|_| bad(format!("invalid {key} `{v}`")));

    match key {
        "src" => m.src = Some(value.parse().map_err(bad)?),
        "dst" => m.dst = Some(value.parse().map_err(bad)?),
        "proto" => m.proto = Some(num(value)?),
        "dscp" => m.dscp = Some(num(value)?),
        "src_port" => m.src_port = Some(value.parse().map_err(bad)?),
        "dst_port" => m.dst_port = Some(value.parse().map_err(bad)?),
        "len" => m.len = Some(value.parse().map_err(bad)?),
        "qdepth" => m.qdepth = Some(value.parse().map_err(bad)?),
        "avg_qdepth" => m.avg_qdepth = Some(value.parse().map_err(bad)?),
        "counter" => {
            // name:modulo[:remainder]
            let mut parts = value.split(':');
            let name = parts.next().unwrap_or_default();
            let modulo = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| bad("counter predicate is name:modulo[:remainder]"))?;
            let remainder = match parts.next() {
                Some(v) => v.parse().map_err(|_| bad("invalid counter remainder"))?,
                None => 0,
            };
            m.counter = Some(CounterPredicate {
                name: name.to_string(),
                modulo,
                remainder,
            });
        }
        other => return Err(bad(format!("unknown match key `{other}`"))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::Ipv4Addr;

    use super::*;
    use crate::packet_context::PacketContext;
    use crate::pipeline::program::Program;
    use crate::pipeline::{Decision, Pipeline};

    fn pipeline() -> TablePipeline {
        let program = Program::from_json(
            r#"{
                "partitions": [ { "id": 0 }, { "id": 1 } ],
                "counters": ["hits"],
                "tables": [ { "name": "classify" } ]
            }"#,
        )
        .unwrap();
        TablePipeline::compile(&program).unwrap()
    }

    fn udp(dst_port: u16) -> PacketContext<()> {
        let mut ctx = PacketContext::new((), 100);
        ctx.headers.dst = Ipv4Addr::new(10, 2, 1, 1);
        ctx.headers.proto = 17;
        ctx.headers.dst_port = dst_port;
        ctx
    }

    #[test]
    fn applies_table_commands() {
        let mut p = pipeline();
        let n = apply_commands(
            &mut p,
            "# priority for port 5000 range\n\
             table_add classify set_partition dst=10.2.0.0/16 dst_port=5000..5999 => 0\n\
             table_add classify drop dst_port=23\n\
             \n\
             table_set_default classify set_partition => 1\n\
             counter_set hits 41   # start value\n",
        )
        .unwrap();
        assert_eq!(n, 4);
        assert_eq!(p.counter("hits"), Some(41));

        assert_eq!(
            p.decide(&mut udp(5001)),
            Decision::Admit {
                partition: 0,
                rank: 0
            }
        );
        assert_eq!(p.decide(&mut udp(23)), Decision::Drop);
        assert_eq!(
            p.decide(&mut udp(80)),
            Decision::Admit {
                partition: 1,
                rank: 0
            }
        );
    }

    #[test]
    fn reports_offending_line() {
        let mut p = pipeline();
        let err = apply_commands(&mut p, "table_add classify drop\ntable_add nowhere drop\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Command { line: 2, .. }), "{err}");

        let err = apply_commands(&mut p, "table_add classify set_partition => 7").unwrap_err();
        assert!(matches!(err, ConfigError::Command { line: 1, .. }));

        let err = apply_commands(&mut p, "table_add classify drop port=1").unwrap_err();
        assert!(err.to_string().contains("unknown match key"));

        let err = apply_commands(&mut p, "table_add classify set_rank").unwrap_err();
        assert!(err.to_string().contains("needs a rank"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "table_add classify count counter=hits:2:1 => hits").unwrap();
        let mut p = pipeline();
        assert_eq!(load_commands(&mut p, file.path()).unwrap(), 1);

        assert!(matches!(
            load_commands(&mut p, Path::new("/nonexistent/commands.txt")),
            Err(ConfigError::Io { .. })
        ));
    }
}
