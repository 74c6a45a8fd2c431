//! In-memory paper broker for dry runs.
//!
//! Orders fill immediately at their limit price; cash and holdings are
//! tracked so oversized orders are rejected the way a real broker would.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::{SyncError, SyncResult};
use crate::models::{AccountBalances, Holding, Order, OrderResult, SignalAction};
use crate::traits::TradingClient;

/// Paper trading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Starting cash
    pub initial_capital: Decimal,

    /// Commission charged on each fill (0.0 to 1.0)
    pub fee_rate: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(10000),
            fee_rate: Decimal::ZERO,
        }
    }
}

/// A filled paper order.
#[derive(Debug, Clone, Serialize)]
pub struct PaperFill {
    pub order_id: String,
    pub instrument: String,
    pub action: SignalAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PaperBook {
    cash: Decimal,
    holdings: HashMap<String, Holding>,
    fills: Vec<PaperFill>,
    total_fees: Decimal,
}

/// Paper trading account.
pub struct PaperTrader {
    config: PaperConfig,
    book: Mutex<PaperBook>,
}

impl PaperTrader {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                cash: config.initial_capital,
                ..Default::default()
            }),
            config,
        }
    }

    /// Start with existing positions (instrument, shares, price).
    pub fn with_holdings(config: PaperConfig, holdings: Vec<(String, Decimal, Decimal)>) -> Self {
        let mut book = PaperBook {
            cash: config.initial_capital,
            ..Default::default()
        };
        for (instrument, shares, price) in holdings {
            let mut holding = Holding::new(instrument.clone(), shares);
            holding.last_price = price;
            book.holdings.insert(instrument, holding);
        }

        Self {
            config,
            book: Mutex::new(book),
        }
    }

    pub async fn fills(&self) -> Vec<PaperFill> {
        self.book.lock().await.fills.clone()
    }

    pub async fn stats(&self) -> PaperStats {
        let book = self.book.lock().await;
        let market_value: Decimal = book.holdings.values().map(Holding::market_value).sum();
        let equity = book.cash + market_value;

        PaperStats {
            initial_capital: self.config.initial_capital,
            cash: book.cash,
            market_value,
            equity,
            return_pct: if self.config.initial_capital.is_zero() {
                Decimal::ZERO
            } else {
                (equity - self.config.initial_capital) / self.config.initial_capital
            },
            open_positions: book.holdings.len(),
            fills: book.fills.len(),
            total_fees: book.total_fees,
        }
    }
}

#[async_trait]
impl TradingClient for PaperTrader {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit(&self, order: &Order) -> SyncResult<OrderResult> {
        let price = order
            .price
            .ok_or_else(|| SyncError::rejected(format!("paper fills need a limit price ({})", order.instrument)))?;
        if order.quantity <= Decimal::ZERO {
            return Err(SyncError::rejected(format!("quantity {} is not positive", order.quantity)));
        }

        let mut book = self.book.lock().await;
        let notional = price * order.quantity;
        let fee = notional * self.config.fee_rate;

        match order.action {
            SignalAction::Buy => {
                if notional + fee > book.cash {
                    return Err(SyncError::rejected(format!(
                        "insufficient cash: need {}, have {}",
                        notional + fee,
                        book.cash
                    )));
                }
                book.cash -= notional + fee;
                let holding = book
                    .holdings
                    .entry(order.instrument.clone())
                    .or_insert_with(|| Holding::new(order.instrument.clone(), Decimal::ZERO));
                holding.shares += order.quantity;
                holding.available += order.quantity;
                holding.last_price = price;
            }
            SignalAction::Sell => {
                let held = book.holdings.get(&order.instrument).map(|h| h.available).unwrap_or_default();
                if order.quantity > held {
                    return Err(SyncError::rejected(format!(
                        "insufficient shares of {}: need {}, have {}",
                        order.instrument, order.quantity, held
                    )));
                }
                book.cash += notional - fee;
                if let Some(holding) = book.holdings.get_mut(&order.instrument) {
                    holding.shares -= order.quantity;
                    holding.available -= order.quantity;
                    holding.last_price = price;
                    if holding.shares.is_zero() {
                        book.holdings.remove(&order.instrument);
                    }
                }
            }
        }

        let order_id = uuid::Uuid::new_v4().to_string();
        book.total_fees += fee;
        book.fills.push(PaperFill {
            order_id: order_id.clone(),
            instrument: order.instrument.clone(),
            action: order.action,
            quantity: order.quantity,
            price,
            fee,
            filled_at: Utc::now(),
        });

        info!(
            order_id = %order_id,
            instrument = %order.instrument,
            action = %order.action,
            quantity = %order.quantity,
            price = %price,
            "[PAPER] Filled"
        );

        Ok(OrderResult {
            order_id,
            message: Some("filled".to_string()),
        })
    }

    async fn cancel(&self, order_id: &str) -> SyncResult<()> {
        let book = self.book.lock().await;
        if book.fills.iter().any(|f| f.order_id == order_id) {
            Err(SyncError::rejected(format!("order {} already filled", order_id)))
        } else {
            Err(SyncError::rejected(format!("unknown order {}", order_id)))
        }
    }

    async fn balances(&self) -> SyncResult<AccountBalances> {
        let book = self.book.lock().await;
        let mut holdings: Vec<Holding> = book.holdings.values().cloned().collect();
        holdings.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        let market_value: Decimal = holdings.iter().map(Holding::market_value).sum();

        Ok(AccountBalances {
            cash: book.cash,
            available_cash: book.cash,
            total_assets: book.cash + market_value,
            holdings,
        })
    }
}

/// Paper trading statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PaperStats {
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub market_value: Decimal,
    pub equity: Decimal,
    pub return_pct: Decimal,
    pub open_positions: usize,
    pub fills: usize,
    pub total_fees: Decimal,
}

impl std::fmt::Display for PaperStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^50}", " PAPER ACCOUNT ")?;
        writeln!(f, "Initial Capital:  ¥{:.2}", self.initial_capital)?;
        writeln!(f, "Cash:             ¥{:.2}", self.cash)?;
        writeln!(f, "Market Value:     ¥{:.2}", self.market_value)?;
        writeln!(f, "Equity:           ¥{:.2} ({:.2}%)", self.equity, self.return_pct * dec!(100))?;
        writeln!(f)?;
        writeln!(f, "Open Positions:   {}", self.open_positions)?;
        writeln!(f, "Fills:            {}", self.fills)?;
        writeln!(f, "Total Fees:       ¥{:.2}", self.total_fees)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}
