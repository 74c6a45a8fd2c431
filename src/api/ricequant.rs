//! RiceQuant simulated-trading reader.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;

use crate::errors::{SyncError, SyncResult};
use crate::models::{SignalAction, SignalSize, TradeSignal};
use crate::traits::StrategySource;

use super::http::{parse_cst, PlatformClient};
use super::types::*;

const RICEQUANT_BASE: &str = "https://www.ricequant.com";

/// Status code RiceQuant puts in the body when the session is gone.
const RQ_NOT_LOGGED_IN: i64 = 401;

/// Client for RiceQuant simulation runs.
pub struct RiceQuantSource {
    client: PlatformClient,
}

impl RiceQuantSource {
    pub fn new(cookie: Option<&str>) -> SyncResult<Self> {
        Self::with_base_url(RICEQUANT_BASE, cookie)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: &str, cookie: Option<&str>) -> SyncResult<Self> {
        Ok(Self {
            client: PlatformClient::new(base_url, cookie)?,
        })
    }
}

/// Unwrap a RiceQuant envelope into signals.
///
/// The HTTP status is 200 even on failure; the body code says what happened.
pub fn envelope_to_signals(run_id: &str, envelope: RiceQuantEnvelope) -> SyncResult<Vec<TradeSignal>> {
    match envelope.code {
        200 => {}
        RQ_NOT_LOGGED_IN => return Err(SyncError::auth(envelope.message)),
        code => {
            return Err(SyncError::transient(format!(
                "ricequant returned code {}: {}",
                code, envelope.message
            )))
        }
    }

    let trades = envelope.resp.map(|r| r.trades).unwrap_or_default();

    Ok(trades
        .into_iter()
        .filter_map(|t| {
            let action = match t.side.to_uppercase().as_str() {
                "BUY" => SignalAction::Buy,
                "SELL" => SignalAction::Sell,
                _ => {
                    warn!(side = %t.side, "Unknown RiceQuant trade side");
                    return None;
                }
            };
            let shares = t.quantity.abs();
            if shares.is_zero() {
                warn!(instrument = %t.order_book_id, "RiceQuant trade with zero quantity");
                return None;
            }
            let Some(observed_at) = parse_cst(&t.time) else {
                warn!(time = %t.time, "Unreadable RiceQuant trade time");
                return None;
            };

            let signal = TradeSignal::new(run_id, t.order_book_id, action, SignalSize::Shares(shares), observed_at);
            Some(match t.price {
                Some(p) if p > Decimal::ZERO => signal.with_price(p),
                _ => signal,
            })
        })
        .collect())
}

#[async_trait]
impl StrategySource for RiceQuantSource {
    fn name(&self) -> &str {
        "ricequant"
    }

    async fn fetch_signals(&self, strategy_id: &str) -> SyncResult<Vec<TradeSignal>> {
        let envelope: RiceQuantEnvelope = self
            .client
            .get_json("/api/simulation/trades", &[("run_id", strategy_id.to_string())])
            .await?;

        envelope_to_signals(strategy_id, envelope)
    }

    /// Share counts are absolute, so the NAV never scales anything.
    async fn net_asset_value(&self, _strategy_id: &str) -> SyncResult<Decimal> {
        Ok(Decimal::ONE)
    }

    async fn current_price(&self, instrument: &str) -> SyncResult<Decimal> {
        Err(SyncError::config(format!(
            "ricequant does not quote prices (asked for {})",
            instrument
        )))
    }
}
