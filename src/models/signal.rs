//! Trade signals observed in a source strategy.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a signal (and of the order it produces).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How big the source trade was.
///
/// Platforms either report a change in portfolio weight or an exact share
/// count, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSize {
    /// Fraction of the source portfolio, expected in (0, 1]
    Relative(Decimal),
    /// Exact share count, copied without scaling
    Shares(Decimal),
}

/// Stable identity of one real-world trade event.
///
/// Built only from fields the platform reports for the event itself, so
/// polling the same event twice reproduces the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(String);

impl SignalId {
    pub fn derive(
        strategy_id: &str,
        observed_at: DateTime<Utc>,
        instrument: &str,
        action: SignalAction,
    ) -> Self {
        Self(format!(
            "{}|{}|{}|{}",
            strategy_id,
            observed_at.timestamp_millis(),
            instrument,
            action.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SignalId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observed change in a source strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Dedup identity, derived in [`TradeSignal::new`]
    pub signal_id: SignalId,

    /// Strategy the signal was read from
    pub strategy_id: String,

    /// Security identifier as the platform reports it (e.g. "SH600036")
    pub instrument: String,

    pub action: SignalAction,

    pub size: SignalSize,

    /// Execution price reported by the source, if any
    #[serde(default)]
    pub price: Option<Decimal>,

    /// Logical timestamp from the source, used to order a poll batch
    pub observed_at: DateTime<Utc>,
}

impl TradeSignal {
    pub fn new(
        strategy_id: impl Into<String>,
        instrument: impl Into<String>,
        action: SignalAction,
        size: SignalSize,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let strategy_id = strategy_id.into();
        let instrument = instrument.into();
        let signal_id = SignalId::derive(&strategy_id, observed_at, &instrument, action);

        Self {
            signal_id,
            strategy_id,
            instrument,
            action,
            size,
            price: None,
            observed_at,
        }
    }

    /// Attach the source's execution price.
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn relative_size(&self) -> Option<Decimal> {
        match self.size {
            SignalSize::Relative(r) => Some(r),
            SignalSize::Shares(_) => None,
        }
    }

    pub fn absolute_shares(&self) -> Option<Decimal> {
        match self.size {
            SignalSize::Shares(s) => Some(s),
            SignalSize::Relative(_) => None,
        }
    }

    /// Age of the signal relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }
}

/// Sort a poll batch into dispatch order: `observed_at` ascending.
///
/// The sort is stable, so signals sharing a timestamp keep the order the
/// platform returned them in.
pub fn sort_for_dispatch(signals: &mut [TradeSignal]) {
    signals.sort_by_key(|s| s.observed_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_signal_id_is_reproducible() {
        let a = TradeSignal::new("ZH010389", "SH600036", SignalAction::Buy, SignalSize::Relative(dec!(0.1)), ts(0));
        let b = TradeSignal::new("ZH010389", "SH600036", SignalAction::Buy, SignalSize::Relative(dec!(0.1)), ts(0))
            .with_price(dec!(35.2));

        assert_eq!(a.signal_id, b.signal_id);
    }

    #[test]
    fn test_signal_id_distinguishes_events() {
        let base = TradeSignal::new("ZH1", "SH600036", SignalAction::Buy, SignalSize::Shares(dec!(100)), ts(0));
        let later = TradeSignal::new("ZH1", "SH600036", SignalAction::Buy, SignalSize::Shares(dec!(100)), ts(1));
        let sell = TradeSignal::new("ZH1", "SH600036", SignalAction::Sell, SignalSize::Shares(dec!(100)), ts(0));
        let other = TradeSignal::new("ZH2", "SH600036", SignalAction::Buy, SignalSize::Shares(dec!(100)), ts(0));

        assert_ne!(base.signal_id, later.signal_id);
        assert_ne!(base.signal_id, sell.signal_id);
        assert_ne!(base.signal_id, other.signal_id);
    }

    #[test]
    fn test_size_accessors() {
        let rel = TradeSignal::new("s", "i", SignalAction::Buy, SignalSize::Relative(dec!(0.25)), ts(0));
        assert_eq!(rel.relative_size(), Some(dec!(0.25)));
        assert_eq!(rel.absolute_shares(), None);

        let abs = TradeSignal::new("s", "i", SignalAction::Sell, SignalSize::Shares(dec!(300)), ts(0));
        assert_eq!(abs.relative_size(), None);
        assert_eq!(abs.absolute_shares(), Some(dec!(300)));
    }

    #[test]
    fn test_sort_for_dispatch_is_stable() {
        let mut batch = vec![
            TradeSignal::new("s", "B", SignalAction::Buy, SignalSize::Shares(dec!(1)), ts(5)),
            TradeSignal::new("s", "A", SignalAction::Buy, SignalSize::Shares(dec!(1)), ts(1)),
            TradeSignal::new("s", "C", SignalAction::Buy, SignalSize::Shares(dec!(1)), ts(5)),
        ];
        sort_for_dispatch(&mut batch);

        let order: Vec<_> = batch.iter().map(|s| s.instrument.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }
}
