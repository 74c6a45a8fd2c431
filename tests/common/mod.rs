//! Scripted sources and brokers for driving follow loops in tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use strategy_mirror::models::{AccountBalances, Holding, Order, OrderResult, SignalAction, SignalSize, TradeSignal};
use strategy_mirror::{FollowConfig, RetryConfig, StrategySource, SyncError, SyncResult, TradingClient};

pub const STRATEGY: &str = "ZH010389";

/// Strategy source returning whatever signals it was last given.
pub struct ScriptedSource {
    signals: Mutex<Vec<TradeSignal>>,
    prices: Mutex<HashMap<String, Decimal>>,
    nav: Decimal,
    fetch_error: Mutex<Option<SyncError>>,
    fetches: Mutex<usize>,
}

impl ScriptedSource {
    pub fn new(signals: Vec<TradeSignal>) -> Arc<Self> {
        Self::with_nav(signals, dec!(1))
    }

    pub fn with_nav(signals: Vec<TradeSignal>, nav: Decimal) -> Arc<Self> {
        Arc::new(Self {
            signals: Mutex::new(signals),
            prices: Mutex::new(HashMap::new()),
            nav,
            fetch_error: Mutex::new(None),
            fetches: Mutex::new(0),
        })
    }

    pub fn set_signals(&self, signals: Vec<TradeSignal>) {
        *self.signals.lock().unwrap() = signals;
    }

    pub fn set_price(&self, instrument: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(instrument.to_string(), price);
    }

    pub fn fail_fetches_with(&self, error: Option<SyncError>) {
        *self.fetch_error.lock().unwrap() = error;
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl StrategySource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_signals(&self, _strategy_id: &str) -> SyncResult<Vec<TradeSignal>> {
        *self.fetches.lock().unwrap() += 1;
        if let Some(e) = self.fetch_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.signals.lock().unwrap().clone())
    }

    async fn net_asset_value(&self, _strategy_id: &str) -> SyncResult<Decimal> {
        Ok(self.nav)
    }

    async fn current_price(&self, instrument: &str) -> SyncResult<Decimal> {
        Ok(self
            .prices
            .lock()
            .unwrap()
            .get(instrument)
            .copied()
            .unwrap_or(dec!(50)))
    }
}

/// Broker that records orders and fails according to a script.
#[derive(Default)]
pub struct ScriptedBroker {
    orders: Mutex<Vec<Order>>,
    failures: Mutex<VecDeque<SyncError>>,
    fail_always: Mutex<Option<SyncError>>,
    attempts: Mutex<usize>,
    holdings: Vec<Holding>,
    delay: Duration,
}

impl ScriptedBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next submissions with these errors, then succeed.
    pub fn failing(errors: Vec<SyncError>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(errors.into()),
            ..Default::default()
        })
    }

    /// Fail every submission with `error` until `recover` is called.
    pub fn always_failing(error: SyncError) -> Arc<Self> {
        Arc::new(Self {
            fail_always: Mutex::new(Some(error)),
            ..Default::default()
        })
    }

    pub fn holding(instrument: &str, shares: Decimal) -> Arc<Self> {
        Arc::new(Self {
            holdings: vec![Holding::new(instrument, shares)],
            ..Default::default()
        })
    }

    /// Every submission takes `delay` to complete.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub fn recover(&self) {
        *self.fail_always.lock().unwrap() = None;
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl TradingClient for ScriptedBroker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, order: &Order) -> SyncResult<OrderResult> {
        *self.attempts.lock().unwrap() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(e) = self.fail_always.lock().unwrap().clone() {
            return Err(e);
        }
        if let Some(e) = self.failures.lock().unwrap().pop_front() {
            return Err(e);
        }

        let mut orders = self.orders.lock().unwrap();
        orders.push(order.clone());
        Ok(OrderResult::new(format!("E{}", orders.len())))
    }

    async fn cancel(&self, _order_id: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn balances(&self) -> SyncResult<AccountBalances> {
        Ok(AccountBalances {
            holdings: self.holdings.clone(),
            ..Default::default()
        })
    }
}

/// Config with millisecond timings so loops turn over quickly.
pub fn fast_config() -> FollowConfig {
    FollowConfig {
        poll_interval_ms: 10,
        retry: RetryConfig {
            max_attempts: 3,
            initial_interval_ms: 1,
            max_interval_ms: 5,
            randomization_factor: 0.0,
            ..Default::default()
        },
        signal_expiry_secs: None,
        ..Default::default()
    }
}

/// A fixed trading-day timestamp plus `minute` minutes.
pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap() + chrono::Duration::minutes(minute)
}

pub fn relative(instrument: &str, action: SignalAction, fraction: Decimal, minute: i64) -> TradeSignal {
    TradeSignal::new(STRATEGY, instrument, action, SignalSize::Relative(fraction), at(minute))
}

pub fn shares(instrument: &str, action: SignalAction, count: Decimal, minute: i64) -> TradeSignal {
    TradeSignal::new(STRATEGY, instrument, action, SignalSize::Shares(count), at(minute))
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
