//! JoinQuant simulated-trading reader.
//!
//! Transactions carry exact share counts, copied as absolute signals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

use crate::errors::{SyncError, SyncResult};
use crate::models::{SignalAction, SignalSize, TradeSignal};
use crate::traits::StrategySource;

use super::http::{cst_today, parse_cst, PlatformClient};
use super::types::*;

const JOINQUANT_BASE: &str = "https://www.joinquant.com";

/// Client for one JoinQuant account's live backtests.
pub struct JoinQuantSource {
    client: PlatformClient,
}

impl JoinQuantSource {
    pub fn new(cookie: Option<&str>) -> SyncResult<Self> {
        Self::with_base_url(JOINQUANT_BASE, cookie)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: &str, cookie: Option<&str>) -> SyncResult<Self> {
        Ok(Self {
            client: PlatformClient::new(base_url, cookie)?,
        })
    }
}

/// Pull the security code out of "平安银行(000001.XSHE)".
fn security_of(stock: &str) -> Option<&str> {
    let open = stock.rfind(['(', '（'])?;
    let rest = &stock[open..];
    let inner = rest.get(rest.chars().next()?.len_utf8()..)?;
    let close = inner.find([')', '）'])?;
    let code = inner[..close].trim();
    (!code.is_empty()).then_some(code)
}

fn action_of(raw: &str) -> Option<SignalAction> {
    match raw.trim() {
        "买" | "买入" => Some(SignalAction::Buy),
        "卖" | "卖出" => Some(SignalAction::Sell),
        other => match other.to_uppercase().as_str() {
            "BUY" => Some(SignalAction::Buy),
            "SELL" => Some(SignalAction::Sell),
            _ => None,
        },
    }
}

/// "1000股" → 1000
fn shares_of(raw: &str) -> Option<Decimal> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    Decimal::from_str(&digits).ok()
}

/// Accepts full timestamps or a bare "HH:MM" on `date`.
fn time_of(date: &str, raw: &str) -> Option<DateTime<Utc>> {
    parse_cst(raw).or_else(|| {
        let clock = raw.trim();
        let padded = if clock.len() == 5 { format!("{}:00", clock) } else { clock.to_string() };
        parse_cst(&format!("{} {}", date, padded))
    })
}

/// Convert a day's transactions, skipping anything malformed.
pub fn transactions_to_signals(strategy_id: &str, date: &str, transactions: Vec<JoinQuantTransaction>) -> Vec<TradeSignal> {
    transactions
        .into_iter()
        .filter_map(|t| {
            let Some(instrument) = security_of(&t.stock) else {
                warn!(stock = %t.stock, "Unrecognised JoinQuant security");
                return None;
            };
            let Some(action) = action_of(&t.transaction) else {
                warn!(side = %t.transaction, "Unknown JoinQuant transaction side");
                return None;
            };
            let Some(shares) = shares_of(&t.amount).map(|s| s.abs()).filter(|s| !s.is_zero()) else {
                warn!(amount = %t.amount, "Unreadable JoinQuant amount");
                return None;
            };
            let Some(observed_at) = time_of(date, &t.time) else {
                warn!(time = %t.time, "Unreadable JoinQuant time");
                return None;
            };

            let signal = TradeSignal::new(strategy_id, instrument, action, SignalSize::Shares(shares), observed_at);
            let price = t.price.as_deref().and_then(|p| Decimal::from_str(p.trim()).ok());
            Some(match price {
                Some(p) if p > Decimal::ZERO => signal.with_price(p),
                _ => signal,
            })
        })
        .collect()
}

#[async_trait]
impl StrategySource for JoinQuantSource {
    fn name(&self) -> &str {
        "joinquant"
    }

    async fn fetch_signals(&self, strategy_id: &str) -> SyncResult<Vec<TradeSignal>> {
        let date = cst_today();
        let envelope: JoinQuantEnvelope = self
            .client
            .get_json(
                "/algorithm/live/transactionDetail",
                &[("backtestId", strategy_id.to_string()), ("date", date.clone())],
            )
            .await?;

        Ok(transactions_to_signals(strategy_id, &date, envelope.data.transaction))
    }

    /// Share counts are absolute, so the NAV never scales anything.
    async fn net_asset_value(&self, _strategy_id: &str) -> SyncResult<Decimal> {
        Ok(Decimal::ONE)
    }

    async fn current_price(&self, instrument: &str) -> SyncResult<Decimal> {
        Err(SyncError::config(format!(
            "joinquant does not quote prices (asked for {})",
            instrument
        )))
    }
}
