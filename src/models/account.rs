//! Account balances reported by a trading client.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shares of one instrument held in a subscriber account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Security identifier
    pub instrument: String,

    /// Total shares held
    pub shares: Decimal,

    /// Shares that can be sold right now (T+1 markets lock same-day buys)
    #[serde(default)]
    pub available: Decimal,

    /// Last known price per share
    #[serde(default)]
    pub last_price: Decimal,
}

impl Holding {
    pub fn new(instrument: impl Into<String>, shares: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            shares,
            available: shares,
            last_price: Decimal::ZERO,
        }
    }

    /// Market value at the last known price.
    pub fn market_value(&self) -> Decimal {
        self.shares * self.last_price
    }
}

/// Cash and holdings of one subscriber account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalances {
    /// Cash balance
    pub cash: Decimal,

    /// Cash usable for new buys
    #[serde(default)]
    pub available_cash: Decimal,

    /// Cash plus market value of holdings
    #[serde(default)]
    pub total_assets: Decimal,

    #[serde(default)]
    pub holdings: Vec<Holding>,
}

impl AccountBalances {
    /// Holding for an instrument, if any.
    pub fn holding(&self, instrument: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.instrument == instrument)
    }

    /// Shares of `instrument` that can be sold now (zero when not held).
    pub fn sellable(&self, instrument: &str) -> Decimal {
        self.holding(instrument)
            .map(|h| h.available)
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sellable() {
        let mut locked = Holding::new("SZ000001", dec!(500));
        locked.available = dec!(200);

        let balances = AccountBalances {
            cash: dec!(1000),
            available_cash: dec!(1000),
            total_assets: dec!(6000),
            holdings: vec![Holding::new("SH600036", dec!(300)), locked],
        };

        assert_eq!(balances.sellable("SH600036"), dec!(300));
        assert_eq!(balances.sellable("SZ000001"), dec!(200));
        assert_eq!(balances.sellable("SH601318"), Decimal::ZERO);
    }

    #[test]
    fn test_market_value() {
        let mut h = Holding::new("SH600036", dec!(100));
        h.last_price = dec!(35.5);
        assert_eq!(h.market_value(), dec!(3550));
    }
}
