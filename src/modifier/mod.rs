use crate::packet_context::PacketContext;

mod headers;
mod true_length;

pub use headers::HeaderModifier;
pub use true_length::TrueLengthModifier;

/// 程序运行之前的解析阶段，只负责往面单上盖戳
pub trait PacketModifier<T>: Send {
    fn process(&self, ctx: &mut PacketContext<T>);
}

/// qdisc 默认装配的解析链
pub fn default_modifiers<T: AsRef<[u8]>>() -> Vec<Box<dyn PacketModifier<T>>> {
    vec![Box::new(TrueLengthModifier::new()), Box::new(HeaderModifier::new())]
}
