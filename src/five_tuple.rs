// five_tuple.rs
use std::net::Ipv4Addr;

/// 程序可以匹配的报头字段，非 IPv4 报文保持全零
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub dscp: u8,
}

impl Default for FiveTuple {
    fn default() -> Self {
        Self {
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            proto: 0,
            src_port: 0,
            dst_port: 0,
            dscp: 0,
        }
    }
}

impl From<&Vec<u8>> for FiveTuple {
    fn from(value: &Vec<u8>) -> Self {
        value.as_slice().into()
    }
}

impl From<&[u8]> for FiveTuple {
    fn from(payload: &[u8]) -> Self {
        let mut t = FiveTuple::default();

        // IPv4 头至少 20 字节
        if payload.len() < 20 {
            return t;
        }

        if (payload[0] >> 4) != 4 {
            return t;
        }

        let ihl = (payload[0] & 0x0F) as usize * 4;
        if ihl < 20 || payload.len() < ihl {
            return t;
        }

        // ToS 高 6 位
        t.dscp = payload[1] >> 2;
        t.proto = payload[9];
        t.src = Ipv4Addr::new(payload[12], payload[13], payload[14], payload[15]);
        t.dst = Ipv4Addr::new(payload[16], payload[17], payload[18], payload[19]);

        // 端口只对 TCP=6 / UDP=17 有意义
        if (t.proto == 6 || t.proto == 17) && payload.len() >= ihl + 4 {
            t.src_port = u16::from_be_bytes([payload[ihl], payload[ihl + 1]]);
            t.dst_port = u16::from_be_bytes([payload[ihl + 2], payload[ihl + 3]]);
        }

        t
    }
}

/// 构造一个最小的 IPv4/UDP 报文，测试和演示程序共用
pub fn build_ipv4_udp(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    dscp: u8,
    total_len: usize,
) -> Vec<u8> {
    let total_len = total_len.max(28);
    let mut buf = vec![0u8; total_len];
    buf[0] = 0x45;
    buf[1] = dscp << 2;
    buf[2..4].copy_from_slice(&(total_len.min(u16::MAX as usize) as u16).to_be_bytes());
    buf[8] = 64;
    buf[9] = 17;
    buf[12..16].copy_from_slice(&src.octets());
    buf[16..20].copy_from_slice(&dst.octets());
    buf[20..22].copy_from_slice(&src_port.to_be_bytes());
    buf[22..24].copy_from_slice(&dst_port.to_be_bytes());
    buf[24..26].copy_from_slice(&((total_len - 20) as u16).to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udp_header() {
        let pkt = build_ipv4_udp(
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Addr::new(10, 2, 1, 1),
            4000,
            9,
            46,
            100,
        );
        let t = FiveTuple::from(pkt.as_slice());
        assert_eq!(t.src, Ipv4Addr::new(10, 1, 1, 1));
        assert_eq!(t.dst, Ipv4Addr::new(10, 2, 1, 1));
        assert_eq!(t.proto, 17);
        assert_eq!(t.src_port, 4000);
        assert_eq!(t.dst_port, 9);
        assert_eq!(t.dscp, 46);
    }

    #[test]
    fn short_or_non_ipv4_payload_is_blank() {
        assert_eq!(FiveTuple::from(&[0u8; 10][..]), FiveTuple::default());

        let mut pkt = build_ipv4_udp(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 1, 2, 0, 64);
        pkt[0] = 0x65;
        assert_eq!(FiveTuple::from(pkt.as_slice()), FiveTuple::default());
    }

    #[test]
    fn ports_ignored_for_other_protocols() {
        let mut pkt = build_ipv4_udp(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 1, 2, 0, 64);
        pkt[9] = 1;
        let t = FiveTuple::from(pkt.as_slice());
        assert_eq!(t.proto, 1);
        assert_eq!((t.src_port, t.dst_port), (0, 0));
    }
}
