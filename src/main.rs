use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use p4_qdisc::five_tuple::build_ipv4_udp;
use p4_qdisc::{
    Clock, DataRate, DropReason, ManualClock, PacketContext, Qdisc, QdiscBuilder, QdiscConfig,
    StatsMonitor,
};

const SIM_TIME: Duration = Duration::from_secs(5);

// 恒定码率的 UDP 源
struct Source {
    name: &'static str,
    src: Ipv4Addr,
    dst_port: u16,
    dscp: u8,
    pkt_len: usize,
    interval: Duration,
    next: Duration,
}

impl Source {
    fn new(
        name: &'static str,
        src: Ipv4Addr,
        dst_port: u16,
        dscp: u8,
        pkt_len: usize,
        rate: DataRate,
    ) -> Self {
        Self {
            name,
            src,
            dst_port,
            dscp,
            pkt_len,
            interval: rate.tx_time(pkt_len as u64),
            next: Duration::ZERO,
        }
    }

    fn packet(&self) -> Vec<u8> {
        build_ipv4_udp(
            self.src,
            Ipv4Addr::new(10, 2, 0, 1),
            40000,
            self.dst_port,
            self.dscp,
            self.pkt_len,
        )
    }
}

// 用法: p4_qdisc [program.json] [commands.txt]
fn main() -> p4_qdisc::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let program = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("programs/red.json"));
    let config = QdiscConfig {
        commands_file: args.next().map(PathBuf::from),
        ..QdiscConfig::with_program(program)
    };
    let link = config.link_bandwidth;

    // 1. 仿真时钟 + 默认解析链 + 每秒一张监控表
    let clock = ManualClock::new();
    let mut qdisc = QdiscBuilder::<Vec<u8>>::new(config)
        .clock(clock.clone())
        .default_modifiers()
        .observer(StatsMonitor::new("egress", Duration::from_secs(1)))
        .build()?;

    // 2. 三路源挤一条 10Mbps 的瓶颈：语音 1Mbps + 两路各 6Mbps 的批量流
    let mut sources = vec![
        Source::new(
            "voice",
            Ipv4Addr::new(10, 3, 0, 1),
            5060,
            46,
            200,
            DataRate::from_mbps(1),
        ),
        Source::new(
            "bulk-a",
            Ipv4Addr::new(10, 1, 0, 1),
            9000,
            0,
            1000,
            DataRate::from_mbps(6),
        ),
        Source::new(
            "bulk-b",
            Ipv4Addr::new(10, 4, 0, 1),
            9001,
            0,
            1000,
            DataRate::from_mbps(6),
        ),
    ];
    let mut offered = vec![0u64; sources.len()];
    // 按源地址归账的出队字节数
    let mut delivered = vec![0u64; sources.len()];
    let mut link_free = Duration::ZERO;

    // 3. 事件循环：链路空闲且有包就发，否则推进到下一个到达
    loop {
        let next_arrival = sources
            .iter()
            .map(|s| s.next)
            .min()
            .unwrap_or(SIM_TIME);
        let next_tx = (!qdisc.is_empty()).then(|| link_free.max(clock.now()));

        match next_tx {
            Some(t) if t <= next_arrival => {
                clock.set(t);
                if let Some(ctx) = qdisc.dequeue() {
                    if let Some(i) = sources.iter().position(|s| s.src == ctx.headers.src) {
                        delivered[i] += ctx.pkt_len as u64;
                    }
                    link_free = t + link.tx_time(ctx.pkt_len as u64);
                }
            }
            _ => {
                if next_arrival >= SIM_TIME {
                    break;
                }
                clock.set(next_arrival);
                for (i, s) in sources.iter_mut().enumerate() {
                    if s.next != next_arrival {
                        continue;
                    }
                    offered[i] += 1;
                    // 丢包已经记进统计和监控，这里不用再管
                    let _ = qdisc.enqueue(PacketContext::from_payload(s.packet()));
                    s.next += s.interval;
                }
            }
        }
    }

    // 4. 汇总
    let secs = SIM_TIME.as_secs_f64();
    let mbps = |bytes: u64| bytes as f64 * 8.0 / 1e6 / secs;
    let stats = qdisc.stats();
    for ((s, n), rx) in sources.iter().zip(&offered).zip(&delivered) {
        info!(
            source = s.name,
            offered = n,
            tx_mbps = mbps(*n * s.pkt_len as u64),
            rx_bytes = rx,
            rx_mbps = mbps(*rx),
            "source summary"
        );
    }
    for reason in DropReason::ALL {
        let c = stats.dropped(reason);
        info!(%reason, packets = c.packets, bytes = c.bytes, "drops");
    }
    info!(
        enqueued = stats.enqueued.packets,
        dequeued = stats.dequeued.packets,
        backlog = qdisc.backlog_bytes(),
        goodput_mbps = mbps(delivered.iter().sum()),
        "🏁 simulation finished"
    );
    Ok(())
}
