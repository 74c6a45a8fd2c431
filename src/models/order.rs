//! Broker-agnostic orders and their results.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::{SignalAction, SignalId};

/// An absolute order computed for one subscriber from one signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Signal this order replays
    pub signal_id: SignalId,

    pub instrument: String,

    pub action: SignalAction,

    /// Whole shares (already rounded to the lot size)
    pub quantity: Decimal,

    /// Limit price after slippage; `None` lets the broker price it
    pub price: Option<Decimal>,
}

impl Order {
    /// Cash needed (or raised) if the order fills at its limit price.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.map(|p| p * self.quantity)
    }
}

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Broker-side identifier (entrust number), usable with `cancel`
    pub order_id: String,

    /// Free-form status message from the broker
    #[serde(default)]
    pub message: Option<String>,
}

impl OrderResult {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_notional() {
        let order = Order {
            signal_id: SignalId::from("x".to_string()),
            instrument: "SH600036".to_string(),
            action: SignalAction::Buy,
            quantity: dec!(200),
            price: Some(dec!(50)),
        };
        assert_eq!(order.notional(), Some(dec!(10000)));

        let market = Order { price: None, ..order };
        assert_eq!(market.notional(), None);
    }
}
