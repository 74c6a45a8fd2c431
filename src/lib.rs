//! Strategy mirror
//!
//! Follows strategies published on XueQiu, JoinQuant and RiceQuant and
//! replays their trades into one or more brokerage accounts, scaled to each
//! account's capital.

pub mod api;
pub mod brokers;
pub mod db;
pub mod errors;
pub mod follow;
pub mod models;
pub mod registry;
pub mod settings;
pub mod telemetry;
pub mod traits;
pub mod trading;

pub use errors::{SyncError, SyncResult};
pub use follow::{follow, FollowHandle, SessionSummary};
pub use registry::{follower, use_broker, BrokerKind, Follower, FollowerOptions, PlatformKind, Trader, TraderOptions};
pub use traits::{StrategySource, TradingClient};
pub use trading::{CapitalConfig, FollowConfig, RetryConfig, Subscription};
