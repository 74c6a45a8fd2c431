//! Response types for the strategy platforms' JSON endpoints.

use rust_decimal::Decimal;
use serde::Deserialize;

// ==================== XueQiu ====================

/// Page of portfolio rebalancings from /cubes/rebalancing/history.json.
#[derive(Debug, Clone, Deserialize)]
pub struct RebalancingPage {
    #[serde(default)]
    pub list: Vec<Rebalancing>,
}

/// One rebalancing of a XueQiu portfolio ("cube").
#[derive(Debug, Clone, Deserialize)]
pub struct Rebalancing {
    pub id: i64,
    #[serde(default)]
    pub status: String,
    /// Milliseconds since epoch
    pub created_at: i64,
    #[serde(default)]
    pub rebalancing_histories: Vec<RebalancingItem>,
}

/// Weight change of one stock within a rebalancing.
#[derive(Debug, Clone, Deserialize)]
pub struct RebalancingItem {
    pub stock_symbol: String,
    #[serde(default)]
    pub stock_name: String,
    /// Weight before the change, in percent (absent for a new position)
    #[serde(default)]
    pub prev_weight_adjusted: Option<Decimal>,
    /// Weight after the change, in percent
    pub target_weight: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Milliseconds since epoch
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Cube quote entry from /cubes/quote.json (keyed by symbol).
#[derive(Debug, Clone, Deserialize)]
pub struct CubeQuote {
    pub symbol: String,
    pub net_value: Decimal,
}

/// Stock quote envelope from /v5/stock/quote.json.
#[derive(Debug, Clone, Deserialize)]
pub struct StockQuoteEnvelope {
    pub data: StockQuoteData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockQuoteData {
    pub quote: Option<StockQuote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockQuote {
    pub symbol: String,
    pub current: Option<Decimal>,
}

// ==================== JoinQuant ====================

/// Envelope of /algorithm/live/transactionDetail.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinQuantEnvelope {
    pub data: JoinQuantData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinQuantData {
    #[serde(default)]
    pub transaction: Vec<JoinQuantTransaction>,
}

/// One filled transaction of a JoinQuant simulated strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinQuantTransaction {
    /// "YYYY-MM-DD HH:MM:SS" in exchange local time
    pub time: String,
    /// e.g. "平安银行(000001.XSHE)"
    pub stock: String,
    /// "买" / "卖"
    pub transaction: String,
    /// e.g. "1000股"
    pub amount: String,
    #[serde(default)]
    pub price: Option<String>,
}

// ==================== RiceQuant ====================

/// Envelope of /api/simulation/trades.
#[derive(Debug, Clone, Deserialize)]
pub struct RiceQuantEnvelope {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub resp: Option<RiceQuantResp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiceQuantResp {
    #[serde(default)]
    pub trades: Vec<RiceQuantTrade>,
}

/// One trade of a RiceQuant simulated strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct RiceQuantTrade {
    pub order_book_id: String,
    pub side: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    /// "YYYY-MM-DD HH:MM:SS" in exchange local time
    pub time: String,
}
