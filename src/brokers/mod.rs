//! Trading clients: the remote automation host and the paper account.

mod paper;
mod remote;

pub use paper::{PaperConfig, PaperFill, PaperStats, PaperTrader};
pub use remote::{security_code, RemoteLogin, RemoteTrader};
