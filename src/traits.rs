use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::SyncResult;
use crate::models::{AccountBalances, Order, OrderResult, TradeSignal};

// ---------------------------------------------------------------------------
// Trading client (sink)
// ---------------------------------------------------------------------------

/// A brokerage account that can execute abstract orders.
///
/// Implementations are shared between follow loops behind an `Arc`, so any
/// session state they keep must be internally synchronized.
#[async_trait]
pub trait TradingClient: Send + Sync {
    /// Short name used in logs (e.g. "paper", "ht_client").
    fn name(&self) -> &str;

    /// Submit an order.
    ///
    /// Fails with `Auth`, `RejectedOrder` or `TransientNetwork`.
    async fn submit(&self, order: &Order) -> SyncResult<OrderResult>;

    /// Cancel a previously submitted order by its broker id.
    async fn cancel(&self, order_id: &str) -> SyncResult<()>;

    /// Current cash and holdings.
    async fn balances(&self) -> SyncResult<AccountBalances>;
}

// ---------------------------------------------------------------------------
// Strategy source
// ---------------------------------------------------------------------------

/// A published strategy whose trades are mirrored.
#[async_trait]
pub trait StrategySource: Send + Sync {
    /// Short name used in logs (e.g. "xueqiu").
    fn name(&self) -> &str;

    /// Trade signals currently visible for a strategy.
    ///
    /// May return a superset of what was returned before; filtering for new
    /// events is the caller's job. Fails with `Auth` or `TransientNetwork`.
    async fn fetch_signals(&self, strategy_id: &str) -> SyncResult<Vec<TradeSignal>>;

    /// Current net asset value per unit of the strategy (1.0 at inception).
    ///
    /// Platforms without a unit NAV report `Decimal::ONE`.
    async fn net_asset_value(&self, strategy_id: &str) -> SyncResult<Decimal>;

    /// Latest price of an instrument, used to size relative signals.
    async fn current_price(&self, instrument: &str) -> SyncResult<Decimal>;
}
