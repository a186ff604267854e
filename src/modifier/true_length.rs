use crate::modifier::PacketModifier;
use crate::packet_context::PacketContext;

// ==========================================
// 真实体积还原 (True Length Modifier)
// 截断拷贝的报文按 IPv4 Total Length 记账
// ==========================================
#[derive(Debug, Default)]
pub struct TrueLengthModifier;

impl TrueLengthModifier {
    pub fn new() -> Self {
        Self
    }
}

impl<T: AsRef<[u8]>> PacketModifier<T> for TrueLengthModifier {
    fn process(&self, ctx: &mut PacketContext<T>) {
        let data = ctx.msg.as_ref();

        // 不是 IPv4 就保持调用方给的长度
        if data.len() < 4 || data[0] >> 4 != 4 {
            return;
        }

        let total_length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if total_length > 0 {
            ctx.pkt_len = total_length;
        }
    }
}
