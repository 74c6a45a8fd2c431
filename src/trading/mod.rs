//! Trading logic: capital scaling, deduplication and the sync engine.

mod config;
mod dedup;
mod position_scaler;
mod report;
mod subscriber;
mod sync_engine;

pub use config::{FollowConfig, RetryConfig};
pub use dedup::Deduplicator;
pub use position_scaler::PositionScaler;
pub use report::{CycleReport, DispatchOutcome, DispatchRecord, SessionStats};
pub use subscriber::{CapitalConfig, Subscriber, Subscription};
pub use sync_engine::{preview_capital, submit_with_retry, EngineState, SyncEngine};
