//! Converts source-relative signals into absolute orders for a subscriber.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::{SyncError, SyncResult};
use crate::models::{Order, SignalAction, SignalSize, TradeSignal};

use super::FollowConfig;

/// Decimal places kept on limit prices.
const PRICE_DP: u32 = 3;

/// Calculator for per-subscriber order sizes.
#[derive(Debug, Clone)]
pub struct PositionScaler {
    lot_size: Decimal,
    slippage: Decimal,
}

impl PositionScaler {
    pub fn new(config: &FollowConfig) -> Self {
        Self {
            lot_size: config.lot_size,
            slippage: config.slippage,
        }
    }

    /// Compute the order a subscriber should place for a signal.
    ///
    /// # Arguments
    /// * `capital_scale` - The subscriber's effective capital
    /// * `signal` - Signal being replayed
    /// * `current_price` - Latest price of the instrument (needed for relative signals)
    ///
    /// # Returns
    /// `Ok(None)` when the scaled quantity rounds to zero: a valid no-op,
    /// not a failure.
    pub fn compute_order(
        &self,
        capital_scale: Decimal,
        signal: &TradeSignal,
        current_price: Option<Decimal>,
    ) -> SyncResult<Option<Order>> {
        if capital_scale <= Decimal::ZERO {
            return Err(SyncError::config(format!(
                "capital scale must be positive, got {}",
                capital_scale
            )));
        }

        let quantity = match signal.size {
            SignalSize::Relative(fraction) => {
                if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
                    return Err(SyncError::config(format!(
                        "signal {} has relative size {} outside (0, 1]",
                        signal.signal_id, fraction
                    )));
                }
                // a missing quote is bad source data; retry on a later poll
                let price = match current_price {
                    Some(p) if p > Decimal::ZERO => p,
                    _ => {
                        return Err(SyncError::transient(format!(
                            "no usable price for {} to size signal {}",
                            signal.instrument, signal.signal_id
                        )))
                    }
                };
                let raw = (capital_scale * fraction / price).floor();
                self.round_to_lot(raw)
            }
            SignalSize::Shares(shares) => {
                if shares <= Decimal::ZERO {
                    return Err(SyncError::config(format!(
                        "signal {} has non-positive share count {}",
                        signal.signal_id, shares
                    )));
                }
                shares
            }
        };

        if quantity.is_zero() {
            return Ok(None);
        }

        let reference = signal.price.or(current_price);

        Ok(Some(Order {
            signal_id: signal.signal_id.clone(),
            instrument: signal.instrument.clone(),
            action: signal.action,
            quantity,
            price: reference.map(|p| self.apply_slippage(p, signal.action)),
        }))
    }

    /// Round a share count down to a whole number of lots.
    fn round_to_lot(&self, quantity: Decimal) -> Decimal {
        (quantity / self.lot_size).floor() * self.lot_size
    }

    /// Move the limit price against us so the order still fills.
    fn apply_slippage(&self, price: Decimal, action: SignalAction) -> Decimal {
        let adjusted = match action {
            SignalAction::Buy => price * (Decimal::ONE + self.slippage),
            SignalAction::Sell => price * (Decimal::ONE - self.slippage),
        };
        adjusted.round_dp_with_strategy(PRICE_DP, RoundingStrategy::MidpointAwayFromZero)
    }
}
