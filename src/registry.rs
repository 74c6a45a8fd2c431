//! Broker and platform registry.
//!
//! Names resolve through static alias tables (case-insensitive, English or
//! Chinese) to a closed set of variants. Unknown names are a configuration
//! error.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{JoinQuantSource, RiceQuantSource, XueQiuSource};
use crate::brokers::{PaperConfig, PaperTrader, RemoteLogin, RemoteTrader};
use crate::db::SignalLedger;
use crate::errors::{SyncError, SyncResult};
use crate::follow::{follow, FollowHandle};
use crate::models::{AccountBalances, Order, OrderResult, TradeSignal};
use crate::traits::{StrategySource, TradingClient};
use crate::trading::{FollowConfig, Subscription};

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

// ==================== Brokers ====================

/// Supported brokerage accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// XueQiu simulated portfolio account
    XueQiu,
    /// Galaxy Securities desktop client
    YinheClient,
    /// Huatai Securities desktop client
    HuataiClient,
    /// Guojin Securities desktop client
    GuojinClient,
    /// In-memory dry-run account
    Paper,
}

impl BrokerKind {
    pub const ALL: [BrokerKind; 5] = [
        BrokerKind::XueQiu,
        BrokerKind::YinheClient,
        BrokerKind::HuataiClient,
        BrokerKind::GuojinClient,
        BrokerKind::Paper,
    ];

    /// Canonical key, also sent to the remote host.
    pub fn key(&self) -> &'static str {
        match self {
            BrokerKind::XueQiu => "xq",
            BrokerKind::YinheClient => "yh_client",
            BrokerKind::HuataiClient => "ht_client",
            BrokerKind::GuojinClient => "gj_client",
            BrokerKind::Paper => "paper",
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            BrokerKind::XueQiu => &["xq", "xueqiu", "雪球"],
            BrokerKind::YinheClient => &["yh_client", "银河客户端"],
            BrokerKind::HuataiClient => &["ht_client", "华泰客户端"],
            BrokerKind::GuojinClient => &["gj_client", "国金客户端"],
            BrokerKind::Paper => &["paper", "模拟"],
        }
    }

    /// Whether orders go through a remote automation host.
    pub fn is_remote(&self) -> bool {
        !matches!(self, BrokerKind::Paper)
    }
}

fn broker_table() -> &'static HashMap<String, BrokerKind> {
    static TABLE: OnceLock<HashMap<String, BrokerKind>> = OnceLock::new();
    TABLE.get_or_init(|| {
        BrokerKind::ALL
            .iter()
            .flat_map(|kind| kind.aliases().iter().map(move |alias| (normalize(alias), *kind)))
            .collect()
    })
}

impl FromStr for BrokerKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        broker_table()
            .get(&normalize(s))
            .copied()
            .ok_or_else(|| SyncError::config(format!("unknown broker '{}'", s.trim())))
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What a broker needs to be constructed.
#[derive(Debug, Clone, Default)]
pub struct TraderOptions {
    /// Base URL of the remote trading host (required for remote brokers)
    pub remote_url: Option<String>,
    /// Paper account settings
    pub paper: PaperConfig,
}

/// A constructed trading client, one variant per broker.
pub enum Trader {
    XueQiu(RemoteTrader),
    YinheClient(RemoteTrader),
    HuataiClient(RemoteTrader),
    GuojinClient(RemoteTrader),
    Paper(PaperTrader),
}

impl Trader {
    pub fn kind(&self) -> BrokerKind {
        match self {
            Trader::XueQiu(_) => BrokerKind::XueQiu,
            Trader::YinheClient(_) => BrokerKind::YinheClient,
            Trader::HuataiClient(_) => BrokerKind::HuataiClient,
            Trader::GuojinClient(_) => BrokerKind::GuojinClient,
            Trader::Paper(_) => BrokerKind::Paper,
        }
    }

    fn inner(&self) -> &dyn TradingClient {
        match self {
            Trader::XueQiu(t) | Trader::YinheClient(t) | Trader::HuataiClient(t) | Trader::GuojinClient(t) => t as &dyn TradingClient,
            Trader::Paper(t) => t as &dyn TradingClient,
        }
    }

    /// Log in on the remote host. A no-op for the paper account.
    pub async fn prepare(&self, login: &RemoteLogin) -> SyncResult<()> {
        match self {
            Trader::XueQiu(t) | Trader::YinheClient(t) | Trader::HuataiClient(t) | Trader::GuojinClient(t) => {
                t.prepare(login).await
            }
            Trader::Paper(_) => Ok(()),
        }
    }

    pub fn as_paper(&self) -> Option<&PaperTrader> {
        match self {
            Trader::Paper(t) => Some(t),
            _ => None,
        }
    }
}

#[async_trait]
impl TradingClient for Trader {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn submit(&self, order: &Order) -> SyncResult<OrderResult> {
        self.inner().submit(order).await
    }

    async fn cancel(&self, order_id: &str) -> SyncResult<()> {
        self.inner().cancel(order_id).await
    }

    async fn balances(&self) -> SyncResult<AccountBalances> {
        self.inner().balances().await
    }
}

/// Build the trading client registered under `name`.
pub fn use_broker(name: &str, options: TraderOptions) -> SyncResult<Trader> {
    let kind: BrokerKind = name.parse()?;

    Ok(match kind {
        BrokerKind::Paper => Trader::Paper(PaperTrader::new(options.paper)),
        BrokerKind::XueQiu => Trader::XueQiu(remote_trader(kind, &options)?),
        BrokerKind::YinheClient => Trader::YinheClient(remote_trader(kind, &options)?),
        BrokerKind::HuataiClient => Trader::HuataiClient(remote_trader(kind, &options)?),
        BrokerKind::GuojinClient => Trader::GuojinClient(remote_trader(kind, &options)?),
    })
}

fn remote_trader(kind: BrokerKind, options: &TraderOptions) -> SyncResult<RemoteTrader> {
    let url = options
        .remote_url
        .as_deref()
        .ok_or_else(|| SyncError::config(format!("broker '{}' needs a remote_url", kind)))?;
    let remote = RemoteTrader::new(kind.key(), url)?;

    info!(broker = %kind, host = %url, "Trading client created");
    Ok(remote)
}

// ==================== Platforms ====================

/// Supported strategy platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    RiceQuant,
    JoinQuant,
    XueQiu,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 3] = [PlatformKind::RiceQuant, PlatformKind::JoinQuant, PlatformKind::XueQiu];

    pub fn key(&self) -> &'static str {
        match self {
            PlatformKind::RiceQuant => "rq",
            PlatformKind::JoinQuant => "jq",
            PlatformKind::XueQiu => "xq",
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            PlatformKind::RiceQuant => &["rq", "ricequant", "米筐"],
            PlatformKind::JoinQuant => &["jq", "joinquant", "聚宽"],
            PlatformKind::XueQiu => &["xq", "xueqiu", "雪球"],
        }
    }
}

fn platform_table() -> &'static HashMap<String, PlatformKind> {
    static TABLE: OnceLock<HashMap<String, PlatformKind>> = OnceLock::new();
    TABLE.get_or_init(|| {
        PlatformKind::ALL
            .iter()
            .flat_map(|kind| kind.aliases().iter().map(move |alias| (normalize(alias), *kind)))
            .collect()
    })
}

impl FromStr for PlatformKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        platform_table()
            .get(&normalize(s))
            .copied()
            .ok_or_else(|| SyncError::config(format!("unknown platform '{}'", s.trim())))
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What a platform reader needs to be constructed.
#[derive(Debug, Clone, Default)]
pub struct FollowerOptions {
    /// Logged-in session cookie
    pub cookie: Option<String>,
    /// Override the platform's base URL
    pub base_url: Option<String>,
}

/// A constructed platform reader, one variant per platform.
#[derive(Clone)]
pub enum Follower {
    RiceQuant(Arc<RiceQuantSource>),
    JoinQuant(Arc<JoinQuantSource>),
    XueQiu(Arc<XueQiuSource>),
}

impl Follower {
    pub fn kind(&self) -> PlatformKind {
        match self {
            Follower::RiceQuant(_) => PlatformKind::RiceQuant,
            Follower::JoinQuant(_) => PlatformKind::JoinQuant,
            Follower::XueQiu(_) => PlatformKind::XueQiu,
        }
    }

    /// The reader behind this follower, shareable across follow loops.
    pub fn source(&self) -> Arc<dyn StrategySource> {
        match self {
            Follower::RiceQuant(s) => s.clone() as Arc<dyn StrategySource>,
            Follower::JoinQuant(s) => s.clone() as Arc<dyn StrategySource>,
            Follower::XueQiu(s) => s.clone() as Arc<dyn StrategySource>,
        }
    }

    /// Start one follow loop.
    pub async fn follow(
        &self,
        strategy_id: &str,
        subscriptions: Vec<Subscription>,
        config: FollowConfig,
        ledger: Option<Arc<SignalLedger>>,
    ) -> SyncResult<FollowHandle> {
        follow(self.source(), strategy_id, subscriptions, config, ledger).await
    }

    /// Start an independent loop per strategy, all feeding the same
    /// subscribers.
    ///
    /// If any strategy fails to start, the loops already started are stopped
    /// and the error is returned.
    pub async fn follow_all(
        &self,
        strategy_ids: &[String],
        subscriptions: Vec<Subscription>,
        config: FollowConfig,
        ledger: Option<Arc<SignalLedger>>,
    ) -> SyncResult<Vec<FollowHandle>> {
        let mut handles = Vec::with_capacity(strategy_ids.len());

        for strategy_id in strategy_ids {
            match self
                .follow(strategy_id, subscriptions.clone(), config.clone(), ledger.clone())
                .await
            {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(strategy = %strategy_id, error = %e, "Failed to start follow loop, stopping the others");
                    for handle in handles {
                        let _ = handle.stop().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(handles)
    }
}

#[async_trait]
impl StrategySource for Follower {
    fn name(&self) -> &str {
        match self {
            Follower::RiceQuant(s) => s.name(),
            Follower::JoinQuant(s) => s.name(),
            Follower::XueQiu(s) => s.name(),
        }
    }

    async fn fetch_signals(&self, strategy_id: &str) -> SyncResult<Vec<TradeSignal>> {
        self.source().fetch_signals(strategy_id).await
    }

    async fn net_asset_value(&self, strategy_id: &str) -> SyncResult<Decimal> {
        self.source().net_asset_value(strategy_id).await
    }

    async fn current_price(&self, instrument: &str) -> SyncResult<Decimal> {
        self.source().current_price(instrument).await
    }
}

/// Build the platform reader registered under `name`.
pub fn follower(name: &str, options: FollowerOptions) -> SyncResult<Follower> {
    let kind: PlatformKind = name.parse()?;
    let cookie = options.cookie.as_deref();

    let follower = match (kind, options.base_url.as_deref()) {
        (PlatformKind::RiceQuant, Some(url)) => Follower::RiceQuant(Arc::new(RiceQuantSource::with_base_url(url, cookie)?)),
        (PlatformKind::RiceQuant, None) => Follower::RiceQuant(Arc::new(RiceQuantSource::new(cookie)?)),
        (PlatformKind::JoinQuant, Some(url)) => Follower::JoinQuant(Arc::new(JoinQuantSource::with_base_url(url, cookie)?)),
        (PlatformKind::JoinQuant, None) => Follower::JoinQuant(Arc::new(JoinQuantSource::new(cookie)?)),
        (PlatformKind::XueQiu, Some(url)) => Follower::XueQiu(Arc::new(XueQiuSource::with_base_urls(url, url, cookie)?)),
        (PlatformKind::XueQiu, None) => Follower::XueQiu(Arc::new(XueQiuSource::new(cookie)?)),
    };

    info!(platform = %kind, "Follower created");
    Ok(follower)
}
