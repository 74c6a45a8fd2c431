//! Client for a remote trading host.
//!
//! Desktop brokerage clients and the XueQiu simulated account are driven by
//! an automation host on a Windows machine; this client speaks its JSON API:
//! `/prepare`, `/balance`, `/position`, `/buy`, `/sell`, `/market_buy`,
//! `/market_sell` and `/cancel_entrust`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{SyncError, SyncResult};
use crate::models::{AccountBalances, Holding, Order, OrderResult, SignalAction};
use crate::traits::TradingClient;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Login details forwarded to the host's `/prepare` endpoint.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RemoteLogin {
    pub user: Option<String>,
    pub password: Option<String>,
    /// Path of the client executable on the host
    pub exe_path: Option<String>,
    /// Communication password some brokers require
    pub comm_password: Option<String>,
}

impl std::fmt::Debug for RemoteLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLogin")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("exe_path", &self.exe_path)
            .field("comm_password", &self.comm_password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Serialize)]
struct PrepareRequest<'a> {
    broker: &'a str,
    #[serde(flatten)]
    login: &'a RemoteLogin,
}

#[derive(Serialize)]
struct TradeRequest {
    security: String,
    amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    entrust_no: &'a str,
}

/// Acknowledgement returned by the host for trade calls.
#[derive(Debug, Deserialize)]
struct EntrustResponse {
    #[serde(default)]
    entrust_no: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Cash summary, keyed the way the desktop clients label it.
#[derive(Debug, Deserialize)]
struct RemoteBalance {
    #[serde(alias = "资金余额", alias = "current_balance", default)]
    cash: Decimal,
    #[serde(alias = "可用金额", alias = "enable_balance", default)]
    available: Decimal,
    #[serde(alias = "总资产", alias = "asset_balance", default)]
    total: Decimal,
}

#[derive(Debug, Deserialize)]
struct RemotePosition {
    #[serde(alias = "证券代码", alias = "stock_code")]
    code: String,
    #[serde(alias = "股票余额", alias = "当前持仓", alias = "current_amount", default)]
    shares: Decimal,
    #[serde(alias = "可用余额", alias = "enable_amount", default)]
    available: Decimal,
    #[serde(alias = "市价", alias = "当前价", alias = "last_price", default)]
    price: Decimal,
}

/// Host responses are either a single object or a one-element list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Strip exchange markers: "SH600036" / "600036.XSHG" → "600036".
pub fn security_code(instrument: &str) -> &str {
    let trimmed = instrument.trim();
    let code = trimmed.split('.').next().unwrap_or(trimmed);
    let upper_prefix = code.get(..2).map(|p| p.to_ascii_uppercase());
    match upper_prefix.as_deref() {
        Some("SH") | Some("SZ") | Some("BJ") => &code[2..],
        _ => code,
    }
}

/// Trading client backed by a remote automation host.
pub struct RemoteTrader {
    broker: String,
    client: Client,
    base_url: String,
}

impl RemoteTrader {
    /// Create a client for `broker` ("ht_client", "xq", ...) on the host at `base_url`.
    pub fn new(broker: impl Into<String>, base_url: &str) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            broker: broker.into(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Log the host's client in.
    pub async fn prepare(&self, login: &RemoteLogin) -> SyncResult<()> {
        let request = PrepareRequest {
            broker: &self.broker,
            login,
        };
        let _: serde_json::Value = self.post("/prepare", &request).await?;
        info!(broker = %self.broker, host = %self.base_url, "Remote client prepared");
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching");
        let response = self.client.get(&url).send().await?;
        Self::decode(response, path).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> SyncResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Posting");
        let response = self.client.post(&url).json(body).send().await?;
        Self::decode(response, path).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> SyncResult<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_broker_status(status, &body));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::transient(format!("unexpected response from {}: {}", path, e)))
    }

    /// POST an order and read the host's acknowledgement.
    ///
    /// Once the host answers 2xx the order has been placed, so an unreadable
    /// acknowledgement is final: sending the order again would trade twice.
    async fn post_order(&self, path: &str, request: &TradeRequest) -> SyncResult<EntrustResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Posting order");
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_broker_status(status, &body));
        }

        let body = response.text().await.map_err(|e| {
            SyncError::rejected(format!("{} accepted the order, acknowledgement unreadable: {}", path, e))
        })?;
        serde_json::from_str(&body).map_err(|e| {
            SyncError::rejected(format!("{} accepted the order, acknowledgement unreadable: {}", path, e))
        })
    }

    fn trade_request(order: &Order) -> SyncResult<TradeRequest> {
        let amount = order
            .quantity
            .trunc()
            .to_u64()
            .ok_or_else(|| SyncError::config(format!("quantity {} does not fit a share count", order.quantity)))?;
        let price = match order.price {
            Some(p) => Some(
                p.to_f64()
                    .ok_or_else(|| SyncError::config(format!("price {} is not representable", p)))?,
            ),
            None => None,
        };

        Ok(TradeRequest {
            security: security_code(&order.instrument).to_string(),
            amount,
            price,
        })
    }
}

#[async_trait]
impl TradingClient for RemoteTrader {
    fn name(&self) -> &str {
        &self.broker
    }

    async fn submit(&self, order: &Order) -> SyncResult<OrderResult> {
        let request = Self::trade_request(order)?;
        let path = match (order.action, order.price.is_some()) {
            (SignalAction::Buy, true) => "/buy",
            (SignalAction::Sell, true) => "/sell",
            (SignalAction::Buy, false) => "/market_buy",
            (SignalAction::Sell, false) => "/market_sell",
        };

        let ack = self.post_order(path, &request).await?;
        let order_id = match ack.entrust_no {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(SyncError::rejected(
                    ack.message.unwrap_or_else(|| "no entrust number returned".to_string()),
                ))
            }
        };

        Ok(OrderResult {
            order_id,
            message: ack.message,
        })
    }

    async fn cancel(&self, order_id: &str) -> SyncResult<()> {
        let _: serde_json::Value = self
            .post("/cancel_entrust", &CancelRequest { entrust_no: order_id })
            .await?;
        Ok(())
    }

    async fn balances(&self) -> SyncResult<AccountBalances> {
        let balance = match self.get::<OneOrMany<RemoteBalance>>("/balance").await? {
            OneOrMany::One(b) => b,
            OneOrMany::Many(list) => list
                .into_iter()
                .next()
                .ok_or_else(|| SyncError::transient("empty balance response"))?,
        };
        let positions = match self.get::<OneOrMany<RemotePosition>>("/position").await? {
            OneOrMany::One(p) => vec![p],
            OneOrMany::Many(list) => list,
        };

        Ok(AccountBalances {
            cash: balance.cash,
            available_cash: balance.available,
            total_assets: balance.total,
            holdings: positions
                .into_iter()
                .map(|p| Holding {
                    instrument: p.code,
                    shares: p.shares,
                    available: p.available,
                    last_price: p.price,
                })
                .collect(),
        })
    }
}
