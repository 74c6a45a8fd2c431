//! Data models for signals, orders and account balances.

mod account;
mod order;
mod signal;

pub use account::{AccountBalances, Holding};
pub use order::{Order, OrderResult};
pub use signal::{sort_for_dispatch, SignalAction, SignalId, SignalSize, TradeSignal};
