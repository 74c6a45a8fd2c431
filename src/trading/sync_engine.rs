//! Sync engine: polls one strategy and replays its new signals into every
//! subscriber account.
//!
//! One call to [`SyncEngine::run_cycle`] is one pass through
//! `Idle → Polling → Dispatching → Idle`. Within a cycle each subscriber
//! sees the batch in `observed_at` order; subscribers run concurrently and
//! never block each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use chrono::Utc;
use futures::future::{join_all, try_join_all};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::db::SignalLedger;
use crate::errors::{SyncError, SyncResult};
use crate::models::{sort_for_dispatch, Order, OrderResult, SignalAction, SignalSize, TradeSignal};
use crate::traits::{StrategySource, TradingClient};

use super::{
    CapitalConfig, CycleReport, Deduplicator, DispatchOutcome, DispatchRecord, FollowConfig,
    PositionScaler, RetryConfig, SessionStats, Subscriber, Subscription,
};

/// Where a follow loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Polling,
    Dispatching,
    /// Terminal; the loop has exited
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Polling => "polling",
            EngineState::Dispatching => "dispatching",
            EngineState::Stopped => "stopped",
        }
    }
}

/// Signals and instrument prices gathered while polling.
struct PollBatch {
    signals: Vec<TradeSignal>,
    prices: HashMap<String, Decimal>,
}

/// Engine for one strategy and its subscribers.
pub struct SyncEngine {
    strategy_id: String,
    source: Arc<dyn StrategySource>,
    subscribers: Vec<Subscriber>,
    scaler: PositionScaler,
    config: FollowConfig,
    ledger: Option<Arc<SignalLedger>>,
    stats: SessionStats,
    state_tx: watch::Sender<EngineState>,
}

impl SyncEngine {
    /// Validate a follow request and build the engine for it.
    ///
    /// Resolves each subscriber's capital scale once (fetching the strategy
    /// NAV only if some subscriber gave `initial_assets` alone) and seeds
    /// dedup sets from the ledger when one is attached.
    pub async fn subscribe(
        source: Arc<dyn StrategySource>,
        strategy_id: impl Into<String>,
        subscriptions: Vec<Subscription>,
        config: FollowConfig,
        ledger: Option<Arc<SignalLedger>>,
    ) -> SyncResult<Self> {
        let strategy_id = strategy_id.into();
        config.validate()?;

        if strategy_id.trim().is_empty() {
            return Err(SyncError::config("strategy id must not be empty"));
        }
        if subscriptions.is_empty() {
            return Err(SyncError::config(format!(
                "no subscribers given for strategy {}",
                strategy_id
            )));
        }

        let nav = if subscriptions.iter().any(|s| s.capital.needs_nav()) {
            let nav = source.net_asset_value(&strategy_id).await?;
            info!(strategy = %strategy_id, nav = %nav, "Fetched strategy net asset value");
            Some(nav)
        } else {
            None
        };

        let mut subscribers = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let capital_scale = subscription.capital.resolve(nav)?;

            let dedup = match &ledger {
                Some(ledger) => Deduplicator::seeded(
                    ledger.load_applied(&strategy_id, &subscription.label).await?,
                ),
                None => Deduplicator::new(),
            };

            info!(
                strategy = %strategy_id,
                subscriber = %subscription.label,
                broker = %subscription.client.name(),
                capital = %capital_scale,
                seeded = dedup.len(),
                "Subscribed"
            );

            subscribers.push(Subscriber::new(
                subscription.label,
                subscription.client,
                capital_scale,
                dedup,
            ));
        }

        let (state_tx, _) = watch::channel(EngineState::Idle);

        Ok(Self {
            strategy_id,
            source,
            subscribers,
            scaler: PositionScaler::new(&config),
            config,
            ledger,
            stats: SessionStats::default(),
            state_tx,
        })
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn config(&self) -> &FollowConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions from another task.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    /// True while at least one subscriber can still receive orders.
    pub fn has_active_subscribers(&self) -> bool {
        self.subscribers.iter().any(Subscriber::is_active)
    }

    /// Move to the terminal state.
    pub fn stop(&mut self) {
        self.set_state(EngineState::Stopped);
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(strategy = %self.strategy_id, from = previous.as_str(), to = state.as_str(), "State change");
        }
    }

    /// Run one polling and dispatch pass.
    ///
    /// Source-scoped failures (the signal fetch or price lookups) abort the
    /// cycle and are returned; an `Auth` failure there also stops the engine.
    /// Subscriber-scoped failures are recorded in the report instead.
    pub async fn run_cycle(&mut self) -> SyncResult<CycleReport> {
        if self.state() == EngineState::Stopped {
            return Err(SyncError::config(format!(
                "follow loop for {} is already stopped",
                self.strategy_id
            )));
        }

        let started_at = Utc::now();
        self.set_state(EngineState::Polling);

        let batch = match self.poll().await {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.fetch_failures += 1;
                if e.is_fatal() {
                    error!(strategy = %self.strategy_id, error = %e, "Strategy source refused credentials, stopping");
                    self.set_state(EngineState::Stopped);
                } else {
                    warn!(strategy = %self.strategy_id, error = %e, "Poll failed, retrying next cycle");
                    self.set_state(EngineState::Idle);
                }
                return Err(e);
            }
        };

        self.set_state(EngineState::Dispatching);
        let records = self.dispatch(&batch).await;

        let report = CycleReport {
            strategy_id: self.strategy_id.clone(),
            signals_seen: batch.signals.len(),
            records,
            started_at,
            finished_at: Utc::now(),
        };
        self.stats.absorb(&report);

        if !report.records.is_empty() {
            info!(
                strategy = %self.strategy_id,
                signals = report.signals_seen,
                dispatched = report.records.len(),
                submitted = report.submitted(),
                failures = report.failures().count(),
                "Cycle complete"
            );
        }

        if self.has_active_subscribers() {
            self.set_state(EngineState::Idle);
        } else {
            error!(strategy = %self.strategy_id, "Every subscriber is suspended, stopping");
            self.set_state(EngineState::Stopped);
        }

        Ok(report)
    }

    /// Fetch and order the current batch, then price what still needs sizing.
    async fn poll(&self) -> SyncResult<PollBatch> {
        let mut signals = self.source.fetch_signals(&self.strategy_id).await?;
        sort_for_dispatch(&mut signals);

        let now = Utc::now();
        let expiry = self.config.signal_expiry();

        let mut wanted: Vec<&str> = Vec::new();
        for signal in &signals {
            if !matches!(signal.size, SignalSize::Relative(_)) {
                continue;
            }
            if expiry.is_some_and(|max_age| signal.age(now) > max_age) {
                continue;
            }
            let pending = self
                .subscribers
                .iter()
                .any(|s| s.is_active() && !s.dedup.already_applied(signal));
            if pending && !wanted.contains(&signal.instrument.as_str()) {
                wanted.push(&signal.instrument);
            }
        }

        let quotes = try_join_all(wanted.iter().map(|instrument| async move {
            let price = self.source.current_price(instrument).await?;
            Ok::<_, SyncError>((instrument.to_string(), price))
        }))
        .await?;

        debug!(
            strategy = %self.strategy_id,
            signals = signals.len(),
            priced = quotes.len(),
            "Polled source"
        );

        Ok(PollBatch {
            signals,
            prices: quotes.into_iter().collect(),
        })
    }

    async fn dispatch(&mut self, batch: &PollBatch) -> Vec<DispatchRecord> {
        let Self {
            strategy_id,
            subscribers,
            scaler,
            config,
            ledger,
            ..
        } = self;

        let ctx = DispatchContext {
            strategy_id: strategy_id.as_str(),
            scaler: &*scaler,
            config: &*config,
            ledger: ledger.as_deref(),
            batch,
        };

        let per_subscriber = join_all(
            subscribers
                .iter_mut()
                .filter(|s| s.is_active())
                .map(|subscriber| ctx.run(subscriber)),
        )
        .await;

        per_subscriber.into_iter().flatten().collect()
    }
}

/// Borrowed view of the engine shared by concurrent subscriber dispatches.
struct DispatchContext<'a> {
    strategy_id: &'a str,
    scaler: &'a PositionScaler,
    config: &'a FollowConfig,
    ledger: Option<&'a SignalLedger>,
    batch: &'a PollBatch,
}

/// How a failed step affects the rest of the subscriber's batch.
enum Halt {
    Continue,
    Stop,
}

impl DispatchContext<'_> {
    /// Replay the batch, in order, into one subscriber.
    ///
    /// A failure that leaves a signal unapplied ends this subscriber's pass so
    /// later signals cannot overtake it; the whole remainder is retried next
    /// cycle.
    async fn run(&self, subscriber: &mut Subscriber) -> Vec<DispatchRecord> {
        let now = Utc::now();
        let expiry = self.config.signal_expiry();
        let mut records = Vec::new();
        let mut last_submit: Option<Instant> = None;

        for signal in &self.batch.signals {
            if subscriber.dedup.already_applied(signal) {
                continue;
            }

            if let Some(max_age) = expiry {
                if signal.age(now) > max_age {
                    debug!(
                        subscriber = %subscriber.label,
                        signal = %signal.signal_id,
                        age_secs = signal.age(now).num_seconds(),
                        "Signal expired, skipping"
                    );
                    records.push(self.settle(subscriber, signal, DispatchOutcome::Expired, 0).await);
                    continue;
                }
            }

            let price = self.batch.prices.get(&signal.instrument).copied();
            let order = match self.scaler.compute_order(subscriber.capital_scale(), signal, price) {
                Ok(Some(order)) => order,
                Ok(None) => {
                    debug!(subscriber = %subscriber.label, signal = %signal.signal_id, "Scaled to zero shares");
                    records.push(self.settle(subscriber, signal, DispatchOutcome::NoOp, 0).await);
                    continue;
                }
                Err(e) => {
                    let (record, _) = self.fail(subscriber, signal, e, 0).await;
                    records.push(record);
                    break;
                }
            };

            let order = if self.config.cap_sells_to_holdings && order.action == SignalAction::Sell {
                match cap_sell(subscriber.client.as_ref(), order).await {
                    Ok(Some(order)) => order,
                    Ok(None) => {
                        info!(
                            subscriber = %subscriber.label,
                            instrument = %signal.instrument,
                            "Nothing held to sell"
                        );
                        records.push(self.settle(subscriber, signal, DispatchOutcome::NoOp, 0).await);
                        continue;
                    }
                    Err(e) => {
                        let (record, halt) = self.fail(subscriber, signal, e, 0).await;
                        records.push(record);
                        match halt {
                            Halt::Continue => continue,
                            Halt::Stop => break,
                        }
                    }
                }
            } else {
                order
            };

            if let Some(previous) = last_submit {
                let wait = self.config.order_interval().saturating_sub(previous.elapsed());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }

            let (result, attempts) =
                submit_with_retry(subscriber.client.as_ref(), &order, &self.config.retry, &subscriber.label).await;
            last_submit = Some(Instant::now());

            match result {
                Ok(ack) => {
                    info!(
                        subscriber = %subscriber.label,
                        instrument = %order.instrument,
                        action = %order.action,
                        quantity = %order.quantity,
                        price = ?order.price,
                        order_id = %ack.order_id,
                        attempts,
                        "Order submitted"
                    );
                    records.push(self.settle(subscriber, signal, DispatchOutcome::Submitted(ack), attempts).await);
                }
                Err(e) => {
                    let (record, halt) = self.fail(subscriber, signal, e, attempts).await;
                    records.push(record);
                    if let Halt::Stop = halt {
                        break;
                    }
                }
            }
        }

        records
    }

    /// Record a final outcome and mark the signal applied.
    async fn settle(
        &self,
        subscriber: &mut Subscriber,
        signal: &TradeSignal,
        outcome: DispatchOutcome,
        attempts: u32,
    ) -> DispatchRecord {
        subscriber.dedup.mark_applied(signal);
        if let Some(ledger) = self.ledger {
            if let Err(e) = ledger
                .record_applied(self.strategy_id, &subscriber.label, &signal.signal_id)
                .await
            {
                warn!(subscriber = %subscriber.label, error = %e, "Failed to persist applied signal");
            }
        }
        self.record(subscriber, signal, outcome, attempts).await
    }

    /// Classify a failure for one signal.
    async fn fail(
        &self,
        subscriber: &mut Subscriber,
        signal: &TradeSignal,
        err: SyncError,
        attempts: u32,
    ) -> (DispatchRecord, Halt) {
        match err {
            SyncError::RejectedOrder(reason) => {
                warn!(
                    subscriber = %subscriber.label,
                    signal = %signal.signal_id,
                    reason = %reason,
                    "Order rejected by broker"
                );
                let record = self
                    .settle(subscriber, signal, DispatchOutcome::Rejected(reason), attempts)
                    .await;
                (record, Halt::Continue)
            }
            SyncError::Auth(ref reason) => {
                error!(
                    subscriber = %subscriber.label,
                    reason = %reason,
                    "Broker refused credentials, suspending subscriber"
                );
                subscriber.suspend(reason.clone());
                let record = self
                    .record(subscriber, signal, DispatchOutcome::Suspended(err), attempts)
                    .await;
                (record, Halt::Stop)
            }
            SyncError::TransientNetwork(_) => {
                warn!(
                    subscriber = %subscriber.label,
                    signal = %signal.signal_id,
                    attempts,
                    error = %err,
                    "Retries exhausted, deferring to next cycle"
                );
                let record = self
                    .record(subscriber, signal, DispatchOutcome::Deferred(err), attempts)
                    .await;
                (record, Halt::Stop)
            }
            SyncError::Configuration(_) => {
                error!(
                    subscriber = %subscriber.label,
                    signal = %signal.signal_id,
                    error = %err,
                    "Cannot build order"
                );
                let record = self
                    .record(subscriber, signal, DispatchOutcome::Failed(err), attempts)
                    .await;
                (record, Halt::Stop)
            }
        }
    }

    async fn record(
        &self,
        subscriber: &Subscriber,
        signal: &TradeSignal,
        outcome: DispatchOutcome,
        attempts: u32,
    ) -> DispatchRecord {
        let record = DispatchRecord {
            subscriber: subscriber.label.clone(),
            signal_id: signal.signal_id.clone(),
            instrument: signal.instrument.clone(),
            action: signal.action,
            attempts,
            outcome,
            at: Utc::now(),
        };
        if let Some(ledger) = self.ledger {
            if let Err(e) = ledger.record_dispatch(self.strategy_id, &record).await {
                warn!(subscriber = %subscriber.label, error = %e, "Failed to log dispatch");
            }
        }
        record
    }
}

/// Clamp a sell order to the sellable shares the account reports.
///
/// `Ok(None)` when nothing is held.
async fn cap_sell(client: &dyn TradingClient, mut order: Order) -> SyncResult<Option<Order>> {
    let sellable = client.balances().await?.sellable(&order.instrument);
    if sellable <= Decimal::ZERO {
        return Ok(None);
    }
    if order.quantity > sellable {
        debug!(
            instrument = %order.instrument,
            requested = %order.quantity,
            sellable = %sellable,
            "Capping sell to holdings"
        );
        order.quantity = sellable;
    }
    Ok(Some(order))
}

/// Submit an order, retrying transient failures with exponential backoff.
///
/// Returns the final result together with the number of attempts made.
pub async fn submit_with_retry(
    client: &dyn TradingClient,
    order: &Order,
    retry: &RetryConfig,
    label: &str,
) -> (SyncResult<OrderResult>, u32) {
    let mut policy = retry.policy();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match client.submit(order).await {
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                let delay = policy
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_millis(retry.max_interval_ms));
                warn!(
                    subscriber = %label,
                    instrument = %order.instrument,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Submission failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            result => return (result, attempt),
        }
    }
}

/// Capital figure a subscriber would get, without subscribing.
pub async fn preview_capital(
    source: &dyn StrategySource,
    strategy_id: &str,
    capital: CapitalConfig,
) -> SyncResult<Decimal> {
    let nav = if capital.needs_nav() {
        Some(source.net_asset_value(strategy_id).await?)
    } else {
        None
    };
    capital.resolve(nav)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountBalances;
    use crate::models::Holding;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct StubSource {
        signals: Mutex<Vec<TradeSignal>>,
        price: Mutex<Decimal>,
        nav: Decimal,
        fail_with: Mutex<Option<SyncError>>,
    }

    impl StubSource {
        fn new(signals: Vec<TradeSignal>) -> Arc<Self> {
            Arc::new(Self {
                signals: Mutex::new(signals),
                price: Mutex::new(dec!(50)),
                nav: dec!(1),
                fail_with: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl StrategySource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_signals(&self, _strategy_id: &str) -> SyncResult<Vec<TradeSignal>> {
            if let Some(e) = self.fail_with.lock().unwrap().clone() {
                return Err(e);
            }
            Ok(self.signals.lock().unwrap().clone())
        }

        async fn net_asset_value(&self, _strategy_id: &str) -> SyncResult<Decimal> {
            Ok(self.nav)
        }

        async fn current_price(&self, _instrument: &str) -> SyncResult<Decimal> {
            Ok(*self.price.lock().unwrap())
        }
    }

    #[derive(Default)]
    struct StubBroker {
        orders: Mutex<Vec<Order>>,
        failures: Mutex<VecDeque<SyncError>>,
        holdings: Vec<Holding>,
    }

    impl StubBroker {
        fn failing(errors: Vec<SyncError>) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(errors.into()),
                ..Default::default()
            })
        }

        fn submitted(&self) -> Vec<Order> {
            self.orders.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TradingClient for StubBroker {
        fn name(&self) -> &str {
            "stub"
        }

        async fn submit(&self, order: &Order) -> SyncResult<OrderResult> {
            if let Some(e) = self.failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            let mut orders = self.orders.lock().unwrap();
            orders.push(order.clone());
            Ok(OrderResult::new(orders.len().to_string()))
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

    fn fast_config() -> FollowConfig {
        FollowConfig {
            poll_interval_ms: 10,
            retry: RetryConfig {
                max_attempts: 3,
                initial_interval_ms: 1,
                max_interval_ms: 5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn buy(instrument: &str, fraction: Decimal, offset_ms: i64) -> TradeSignal {
        TradeSignal::new(
            "ZH1",
            instrument,
            SignalAction::Buy,
            SignalSize::Relative(fraction),
            Utc::now() + chrono::Duration::milliseconds(offset_ms),
        )
    }

    async fn engine(
        source: Arc<StubSource>,
        subs: Vec<(&str, Arc<StubBroker>, CapitalConfig)>,
        config: FollowConfig,
    ) -> SyncEngine {
        let subscriptions = subs
            .into_iter()
            .map(|(label, broker, capital)| Subscription::new(label, broker, capital))
            .collect();
        SyncEngine::subscribe(source, "ZH1", subscriptions, config, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cycle_submits_once() {
        let source = StubSource::new(vec![buy("SH600036", dec!(0.1), 0)]);
        let broker = Arc::new(StubBroker::default());
        let mut engine = engine(
            source,
            vec![("a", broker.clone(), CapitalConfig::total(dec!(100000)))],
            fast_config(),
        )
        .await;

        let first = engine.run_cycle().await.unwrap();
        let second = engine.run_cycle().await.unwrap();

        assert_eq!(first.submitted(), 1);
        assert!(second.records.is_empty());
        assert_eq!(broker.submitted().len(), 1);
        assert_eq!(broker.submitted()[0].quantity, dec!(200));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_rejection_is_final_and_does_not_block() {
        let source = StubSource::new(vec![
            buy("SH600036", dec!(0.1), 0),
            buy("SH601318", dec!(0.1), 10),
        ]);
        let broker = StubBroker::failing(vec![SyncError::rejected("insufficient funds")]);
        let mut engine = engine(
            source,
            vec![("a", broker.clone(), CapitalConfig::total(dec!(100000)))],
            fast_config(),
        )
        .await;

        let report = engine.run_cycle().await.unwrap();
        assert!(matches!(report.records[0].outcome, DispatchOutcome::Rejected(_)));
        assert!(matches!(report.records[1].outcome, DispatchOutcome::Submitted(_)));

        let again = engine.run_cycle().await.unwrap();
        assert!(again.records.is_empty());
        assert_eq!(broker.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_signal_holds_back_later_ones() {
        let source = StubSource::new(vec![
            buy("SH600036", dec!(0.1), 0),
            buy("SH601318", dec!(0.1), 10),
        ]);
        let broker = StubBroker::failing(vec![
            SyncError::transient("timeout"),
            SyncError::transient("timeout"),
            SyncError::transient("timeout"),
        ]);
        let mut engine = engine(
            source,
            vec![("a", broker.clone(), CapitalConfig::total(dec!(100000)))],
            fast_config(),
        )
        .await;

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].attempts, 3);
        assert!(matches!(report.records[0].outcome, DispatchOutcome::Deferred(_)));
        assert!(broker.submitted().is_empty());

        let retry = engine.run_cycle().await.unwrap();
        assert_eq!(retry.submitted(), 2);
        let instruments: Vec<_> = broker.submitted().into_iter().map(|o| o.instrument).collect();
        assert_eq!(instruments, vec!["SH600036", "SH601318"]);
    }

    #[tokio::test]
    async fn test_zero_quote_defers_signal() {
        let source = StubSource::new(vec![buy("SH600036", dec!(0.1), 0)]);
        *source.price.lock().unwrap() = Decimal::ZERO;
        let broker = Arc::new(StubBroker::default());
        let mut engine = engine(
            source.clone(),
            vec![("a", broker.clone(), CapitalConfig::total(dec!(100000)))],
            FollowConfig {
                signal_expiry_secs: None,
                ..fast_config()
            },
        )
        .await;

        let report = engine.run_cycle().await.unwrap();
        assert!(matches!(report.records[0].outcome, DispatchOutcome::Deferred(_)));
        assert!(broker.submitted().is_empty());

        *source.price.lock().unwrap() = dec!(50);
        let retry = engine.run_cycle().await.unwrap();
        assert_eq!(retry.submitted(), 1);
        assert_eq!(broker.submitted()[0].quantity, dec!(200));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_unrepresentable_expiry() {
        let source = StubSource::new(vec![buy("SH600036", dec!(0.1), 0)]);
        let broker = Arc::new(StubBroker::default());
        let config = FollowConfig {
            signal_expiry_secs: Some(u64::MAX),
            ..fast_config()
        };
        let subscriptions = vec![Subscription::new("a", broker, CapitalConfig::total(dec!(1000)))];

        let err = SyncEngine::subscribe(source, "ZH1", subscriptions, config, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_expired_signal_is_skipped() {
        let stale = TradeSignal::new(
            "ZH1",
            "SH600036",
            SignalAction::Buy,
            SignalSize::Relative(dec!(0.1)),
            Utc::now() - chrono::Duration::minutes(10),
        );
        let source = StubSource::new(vec![stale]);
        let broker = Arc::new(StubBroker::default());
        let mut engine = engine(
            source,
            vec![("a", broker.clone(), CapitalConfig::total(dec!(100000)))],
            fast_config(),
        )
        .await;

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.records[0].outcome, DispatchOutcome::Expired);
        assert!(broker.submitted().is_empty());
        assert_eq!(engine.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_sell_capped_to_holdings() {
        let sell = TradeSignal::new(
            "ZH1",
            "SH600036",
            SignalAction::Sell,
            SignalSize::Shares(dec!(1000)),
            Utc::now(),
        );
        let unheld = TradeSignal::new(
            "ZH1",
            "SH601318",
            SignalAction::Sell,
            SignalSize::Shares(dec!(1000)),
            Utc::now() + chrono::Duration::milliseconds(5),
        );
        let source = StubSource::new(vec![sell, unheld]);
        let broker = Arc::new(StubBroker {
            holdings: vec![Holding::new("SH600036", dec!(300))],
            ..Default::default()
        });
        let config = FollowConfig {
            cap_sells_to_holdings: true,
            ..fast_config()
        };
        let mut engine = engine(
            source,
            vec![("a", broker.clone(), CapitalConfig::total(dec!(100000)))],
            config,
        )
        .await;

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(broker.submitted()[0].quantity, dec!(300));
        assert_eq!(report.records[1].outcome, DispatchOutcome::NoOp);
    }

    #[tokio::test]
    async fn test_source_auth_stops_engine() {
        let source = StubSource::new(vec![]);
        *source.fail_with.lock().unwrap() = Some(SyncError::auth("cookie expired"));
        let broker = Arc::new(StubBroker::default());
        let mut engine = engine(
            source,
            vec![("a", broker, CapitalConfig::total(dec!(1000)))],
            fast_config(),
        )
        .await;

        assert!(engine.run_cycle().await.unwrap_err().is_fatal());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_transient_fetch_keeps_running() {
        let source = StubSource::new(vec![]);
        *source.fail_with.lock().unwrap() = Some(SyncError::transient("502"));
        let broker = Arc::new(StubBroker::default());
        let mut engine = engine(
            source.clone(),
            vec![("a", broker, CapitalConfig::total(dec!(1000)))],
            fast_config(),
        )
        .await;

        assert!(engine.run_cycle().await.is_err());
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.stats().fetch_failures, 1);

        *source.fail_with.lock().unwrap() = None;
        assert!(engine.run_cycle().await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_empty_request() {
        let source = StubSource::new(vec![]);
        let result = SyncEngine::subscribe(source, "ZH1", vec![], fast_config(), None).await;
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_preview_capital_uses_nav() {
        let source = Arc::new(StubSource {
            signals: Mutex::new(vec![]),
            price: Mutex::new(dec!(1)),
            nav: dec!(1.5),
            fail_with: Mutex::new(None),
        });
        let capital = preview_capital(source.as_ref(), "ZH1", CapitalConfig::initial(dec!(10000)))
            .await
            .unwrap();
        assert_eq!(capital, dec!(15000));
    }
}
