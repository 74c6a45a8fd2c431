//! TOML session file read by the `follow` command.
//!
//! ```toml
//! platform = "xq"
//! strategies = ["ZH123456"]
//! cookie = "xq_a_token=..."
//!
//! [follow]
//! poll_interval_ms = 2000
//!
//! [[subscribers]]
//! label = "main"
//! broker = "ht_client"
//! remote_url = "http://10.0.0.5:1430"
//! total_assets = "50000"
//! ```

use std::path::Path;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::brokers::{PaperConfig, RemoteLogin};
use crate::errors::{SyncError, SyncResult};
use crate::registry::{use_broker, FollowerOptions, Trader, TraderOptions};
use crate::traits::TradingClient;
use crate::trading::{CapitalConfig, FollowConfig, Subscription};

/// Capital assumed when a subscriber names neither figure.
pub const DEFAULT_INITIAL_ASSETS: Decimal = dec!(10000);

/// One `[[subscribers]]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriberSettings {
    /// Defaults to the broker key plus its position in the file
    #[serde(default)]
    pub label: Option<String>,

    pub broker: String,

    #[serde(default)]
    pub initial_assets: Option<Decimal>,

    #[serde(default)]
    pub total_assets: Option<Decimal>,

    #[serde(default)]
    pub remote_url: Option<String>,

    /// Sent to the remote host's `/prepare` before following
    #[serde(default)]
    pub login: Option<RemoteLogin>,

    #[serde(default)]
    pub paper: Option<PaperConfig>,
}

impl SubscriberSettings {
    /// Label used in logs and the ledger.
    pub fn label_or(&self, index: usize) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.broker.trim(), index + 1))
    }

    /// Capital settings, defaulting to [`DEFAULT_INITIAL_ASSETS`].
    pub fn capital(&self) -> CapitalConfig {
        match (self.initial_assets, self.total_assets) {
            (None, None) => CapitalConfig::initial(DEFAULT_INITIAL_ASSETS),
            (initial_assets, total_assets) => CapitalConfig {
                initial_assets,
                total_assets,
            },
        }
    }
}

/// A whole follow session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Platform key or alias ("xq", "聚宽", ...)
    pub platform: String,

    pub strategies: Vec<String>,

    #[serde(default)]
    pub cookie: Option<String>,

    /// Override the platform's base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// SQLite URL of the signal ledger
    #[serde(default)]
    pub ledger: Option<String>,

    #[serde(default)]
    pub follow: FollowConfig,

    #[serde(default)]
    pub subscribers: Vec<SubscriberSettings>,
}

/// A subscription together with the client it trades through.
pub struct Account {
    pub subscription: Subscription,
    pub trader: Arc<Trader>,
}

impl SessionSettings {
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> SyncResult<Self> {
        let settings: SessionSettings =
            toml::from_str(content).map_err(|e| SyncError::config(format!("invalid session file: {}", e)))?;

        if settings.strategies.is_empty() {
            return Err(SyncError::config("session lists no strategies"));
        }
        if settings.subscribers.is_empty() {
            return Err(SyncError::config("session lists no subscribers"));
        }
        settings.follow.validate()?;

        Ok(settings)
    }

    pub fn follower_options(&self) -> FollowerOptions {
        FollowerOptions {
            cookie: self.cookie.clone(),
            base_url: self.base_url.clone(),
        }
    }

    /// Build a trading client per subscriber, logging remote ones in.
    pub async fn build_accounts(&self) -> SyncResult<Vec<Account>> {
        let mut accounts = Vec::with_capacity(self.subscribers.len());

        for (index, sub) in self.subscribers.iter().enumerate() {
            let label = sub.label_or(index);
            let trader = use_broker(
                &sub.broker,
                TraderOptions {
                    remote_url: sub.remote_url.clone(),
                    paper: sub.paper.clone().unwrap_or_default(),
                },
            )?;

            if let Some(login) = &sub.login {
                trader.prepare(login).await?;
            }

            let trader = Arc::new(trader);
            info!(subscriber = %label, broker = %trader.kind(), "Subscriber ready");

            accounts.push(Account {
                subscription: Subscription::new(label, trader.clone() as Arc<dyn TradingClient>, sub.capital()),
                trader,
            });
        }

        Ok(accounts)
    }
}
