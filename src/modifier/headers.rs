use crate::five_tuple::FiveTuple;
use crate::modifier::PacketModifier;
use crate::packet_context::PacketContext;

// ==========================================
// 报头提取：把五元组 + DSCP 填进面单
// ==========================================
#[derive(Debug, Default)]
pub struct HeaderModifier;

impl HeaderModifier {
    pub fn new() -> Self {
        Self
    }
}

impl<T: AsRef<[u8]>> PacketModifier<T> for HeaderModifier {
    fn process(&self, ctx: &mut PacketContext<T>) {
        ctx.headers = FiveTuple::from(ctx.msg.as_ref());
    }
}
