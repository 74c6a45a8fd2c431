//! Strategy platform readers.

mod http;
mod joinquant;
mod ricequant;
mod types;
mod xueqiu;

pub use http::PlatformClient;
pub use joinquant::JoinQuantSource;
pub use ricequant::RiceQuantSource;
pub use types::*;
pub use xueqiu::XueQiuSource;
