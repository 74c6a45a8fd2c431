//! XueQiu portfolio ("cube") reader.
//!
//! Rebalancings report weight changes, so signals come out relative: a
//! move from 10% to 25% is a BUY of 0.15 of the portfolio.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::warn;

use crate::errors::{SyncError, SyncResult};
use crate::models::{SignalAction, SignalSize, TradeSignal};
use crate::traits::StrategySource;

use super::http::PlatformClient;
use super::types::*;

const XUEQIU_BASE: &str = "https://xueqiu.com";
const XUEQIU_QUOTE_BASE: &str = "https://stock.xueqiu.com";

/// Rebalancings fetched per poll.
const HISTORY_PAGE_SIZE: u32 = 20;

/// Client for XueQiu cube rebalancing history.
pub struct XueQiuSource {
    web: PlatformClient,
    quotes: PlatformClient,
}

impl XueQiuSource {
    pub fn new(cookie: Option<&str>) -> SyncResult<Self> {
        Self::with_base_urls(XUEQIU_BASE, XUEQIU_QUOTE_BASE, cookie)
    }

    /// Create with custom base URLs (for testing).
    pub fn with_base_urls(web: &str, quotes: &str, cookie: Option<&str>) -> SyncResult<Self> {
        Ok(Self {
            web: PlatformClient::new(web, cookie)?,
            quotes: PlatformClient::new(quotes, cookie)?,
        })
    }
}

/// Turn a page of rebalancings into signals, skipping anything malformed.
pub fn rebalancings_to_signals(strategy_id: &str, page: RebalancingPage) -> Vec<TradeSignal> {
    let mut signals = Vec::new();

    for rebalancing in page.list {
        if rebalancing.status != "success" {
            continue;
        }

        for item in rebalancing.rebalancing_histories {
            let Some(target) = item.target_weight else {
                warn!(rebalancing = rebalancing.id, stock = %item.stock_symbol, "Rebalancing item without target weight");
                continue;
            };
            let previous = item.prev_weight_adjusted.unwrap_or(Decimal::ZERO);
            let delta = target - previous;
            if delta.is_zero() {
                continue;
            }

            let millis = item.updated_at.unwrap_or(rebalancing.created_at);
            let Some(observed_at) = from_millis(millis) else {
                warn!(rebalancing = rebalancing.id, millis, "Unreadable rebalancing timestamp");
                continue;
            };

            let (action, weight) = if delta > Decimal::ZERO {
                (SignalAction::Buy, delta)
            } else {
                (SignalAction::Sell, -delta)
            };
            let fraction = weight / dec!(100);
            if fraction > Decimal::ONE {
                warn!(stock = %item.stock_symbol, delta = %delta, "Weight change above 100%");
                continue;
            }

            let mut signal = TradeSignal::new(
                strategy_id,
                item.stock_symbol,
                action,
                SignalSize::Relative(fraction),
                observed_at,
            );
            if let Some(price) = item.price.filter(|p| *p > Decimal::ZERO) {
                signal = signal.with_price(price);
            }
            signals.push(signal);
        }
    }

    signals
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[async_trait]
impl StrategySource for XueQiuSource {
    fn name(&self) -> &str {
        "xueqiu"
    }

    async fn fetch_signals(&self, strategy_id: &str) -> SyncResult<Vec<TradeSignal>> {
        let page: RebalancingPage = self
            .web
            .get_json(
                "/cubes/rebalancing/history.json",
                &[
                    ("cube_symbol", strategy_id.to_string()),
                    ("count", HISTORY_PAGE_SIZE.to_string()),
                    ("page", "1".to_string()),
                ],
            )
            .await?;

        Ok(rebalancings_to_signals(strategy_id, page))
    }

    async fn net_asset_value(&self, strategy_id: &str) -> SyncResult<Decimal> {
        let quotes: HashMap<String, CubeQuote> = self
            .web
            .get_json("/cubes/quote.json", &[("code", strategy_id.to_string())])
            .await?;

        quotes
            .get(strategy_id)
            .map(|q| q.net_value)
            .ok_or_else(|| SyncError::config(format!("unknown XueQiu portfolio {}", strategy_id)))
    }

    async fn current_price(&self, instrument: &str) -> SyncResult<Decimal> {
        let envelope: StockQuoteEnvelope = self
            .quotes
            .get_json("/v5/stock/quote.json", &[("symbol", instrument.to_string())])
            .await?;

        envelope
            .data
            .quote
            .and_then(|q| q.current)
            .ok_or_else(|| SyncError::transient(format!("no quote for {}", instrument)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &str = r#"{
        "count": 2, "page": 1,
        "list": [
            {
                "id": 2, "status": "success", "created_at": 1709256660000,
                "rebalancing_histories": [
                    {"stock_symbol": "SH600036", "stock_name": "招商银行",
                     "prev_weight_adjusted": "10", "target_weight": "25",
                     "price": "35.50", "updated_at": 1709256660000},
                    {"stock_symbol": "SZ000001", "stock_name": "平安银行",
                     "prev_weight_adjusted": "20", "target_weight": "12.5",
                     "price": "10.20", "updated_at": 1709256660000},
                    {"stock_symbol": "SH601318", "stock_name": "中国平安",
                     "prev_weight_adjusted": "5", "target_weight": null},
                    {"stock_symbol": "SH600519", "stock_name": "贵州茅台",
                     "prev_weight_adjusted": "8", "target_weight": "8"}
                ]
            },
            {
                "id": 1, "status": "canceled", "created_at": 1709170260000,
                "rebalancing_histories": [
                    {"stock_symbol": "SH600036", "target_weight": "40"}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_rebalancings_to_signals() {
        let page: RebalancingPage = serde_json::from_str(HISTORY).unwrap();
        let signals = rebalancings_to_signals("ZH010389", page);

        assert_eq!(signals.len(), 2);

        assert_eq!(signals[0].instrument, "SH600036");
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[0].size, SignalSize::Relative(dec!(0.15)));
        assert_eq!(signals[0].price, Some(dec!(35.50)));

        assert_eq!(signals[1].action, SignalAction::Sell);
        assert_eq!(signals[1].size, SignalSize::Relative(dec!(0.075)));
    }

    #[test]
    fn test_same_rebalancing_same_ids() {
        let first = rebalancings_to_signals("ZH1", serde_json::from_str(HISTORY).unwrap());
        let again = rebalancings_to_signals("ZH1", serde_json::from_str(HISTORY).unwrap());
        let ids: Vec<_> = first.iter().map(|s| s.signal_id.clone()).collect();
        let ids_again: Vec<_> = again.iter().map(|s| s.signal_id.clone()).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn test_new_position_counts_from_zero() {
        let page: RebalancingPage = serde_json::from_str(
            r#"{"list": [{"id": 3, "status": "success", "created_at": 1709256660000,
                "rebalancing_histories": [{"stock_symbol": "SH600036", "target_weight": "30"}]}]}"#,
        )
        .unwrap();
        let signals = rebalancings_to_signals("ZH1", page);
        assert_eq!(signals[0].size, SignalSize::Relative(dec!(0.3)));
        assert_eq!(signals[0].price, None);
    }
}
