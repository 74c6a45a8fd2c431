//! Subscriber accounts following a strategy.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{SyncError, SyncResult};
use crate::traits::TradingClient;

use super::Deduplicator;

/// Capital settings supplied when subscribing.
///
/// `initial_assets` is scaled by the strategy's net asset value at
/// subscription time; `total_assets` is taken as-is and wins when both are
/// given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapitalConfig {
    #[serde(default)]
    pub initial_assets: Option<Decimal>,

    #[serde(default)]
    pub total_assets: Option<Decimal>,
}

impl CapitalConfig {
    pub fn initial(initial_assets: Decimal) -> Self {
        Self {
            initial_assets: Some(initial_assets),
            total_assets: None,
        }
    }

    pub fn total(total_assets: Decimal) -> Self {
        Self {
            initial_assets: None,
            total_assets: Some(total_assets),
        }
    }

    /// Whether resolving needs the strategy's current NAV.
    pub fn needs_nav(&self) -> bool {
        self.total_assets.is_none() && self.initial_assets.is_some()
    }

    /// Derive the single effective capital figure.
    ///
    /// Sign checks happen when orders are sized, so a bad figure surfaces
    /// per signal instead of refusing the whole subscription.
    pub fn resolve(&self, nav: Option<Decimal>) -> SyncResult<Decimal> {
        if let Some(total) = self.total_assets {
            return Ok(total);
        }
        match (self.initial_assets, nav) {
            (Some(initial), Some(nav)) => Ok(initial * nav),
            (Some(_), None) => Err(SyncError::config(
                "initial_assets needs the strategy's net asset value",
            )),
            (None, _) => Err(SyncError::config(
                "one of initial_assets or total_assets is required",
            )),
        }
    }
}

/// A request to follow a strategy with one trading account.
#[derive(Clone)]
pub struct Subscription {
    /// Name used in logs and in the signal ledger
    pub label: String,
    pub client: Arc<dyn TradingClient>,
    pub capital: CapitalConfig,
}

impl Subscription {
    pub fn new(label: impl Into<String>, client: Arc<dyn TradingClient>, capital: CapitalConfig) -> Self {
        Self {
            label: label.into(),
            client,
            capital,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("client", &self.client.name())
            .field("capital", &self.capital)
            .finish()
    }
}

/// Runtime state of one subscriber inside a follow loop.
pub struct Subscriber {
    pub label: String,
    pub client: Arc<dyn TradingClient>,
    capital_scale: Decimal,
    pub dedup: Deduplicator,
    suspended: Option<String>,
}

impl Subscriber {
    pub fn new(
        label: impl Into<String>,
        client: Arc<dyn TradingClient>,
        capital_scale: Decimal,
        dedup: Deduplicator,
    ) -> Self {
        Self {
            label: label.into(),
            client,
            capital_scale,
            dedup,
            suspended: None,
        }
    }

    /// Effective capital, fixed for the life of the subscription.
    pub fn capital_scale(&self) -> Decimal {
        self.capital_scale
    }

    pub fn is_active(&self) -> bool {
        self.suspended.is_none()
    }

    /// Stop dispatching to this subscriber for the rest of the session.
    pub fn suspend(&mut self, reason: impl Into<String>) {
        self.suspended = Some(reason.into());
    }

    pub fn suspension_reason(&self) -> Option<&str> {
        self.suspended.as_deref()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("label", &self.label)
            .field("client", &self.client.name())
            .field("capital_scale", &self.capital_scale)
            .field("applied", &self.dedup.len())
            .field("suspended", &self.suspended)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_total_overrides_initial() {
        let capital = CapitalConfig {
            initial_assets: Some(dec!(10000)),
            total_assets: Some(dec!(5000)),
        };
        assert!(!capital.needs_nav());
        assert_eq!(capital.resolve(Some(dec!(1.8))).unwrap(), dec!(5000));
        assert_eq!(capital.resolve(None).unwrap(), dec!(5000));
    }

    #[test]
    fn test_initial_scaled_by_nav() {
        let capital = CapitalConfig::initial(dec!(10000));
        assert!(capital.needs_nav());
        assert_eq!(capital.resolve(Some(dec!(1.25))).unwrap(), dec!(12500));
        assert!(capital.resolve(None).is_err());
    }

    #[test]
    fn test_missing_capital() {
        let err = CapitalConfig::default().resolve(Some(Decimal::ONE)).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
