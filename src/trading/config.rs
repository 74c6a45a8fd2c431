//! Follow session configuration.

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::{SyncError, SyncResult};

/// Retry policy for transient submission failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total submission attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_interval_ms: u64,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Upper bound for a single delay
    pub max_interval_ms: u64,

    /// Jitter applied to each delay (0.0 to 1.0)
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 500,
            multiplier: 2.0,
            max_interval_ms: 10_000,
            randomization_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Fresh backoff schedule for one order.
    ///
    /// The schedule itself never gives up; `max_attempts` bounds it.
    pub fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_multiplier(self.multiplier)
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Configuration for one follow session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    /// Pause between the end of one cycle and the next poll
    pub poll_interval_ms: u64,

    /// Transient-failure retry policy
    pub retry: RetryConfig,

    /// Signals older than this are not traded (None disables the check)
    pub signal_expiry_secs: Option<u64>,

    /// Price concession on limit orders (0.01 = buy 1% higher, sell 1% lower)
    pub slippage: Decimal,

    /// Minimum pause between two submissions to the same subscriber
    pub order_interval_ms: u64,

    /// Scaled quantities round down to a multiple of this
    pub lot_size: Decimal,

    /// Cap SELL quantities at what the subscriber actually holds
    pub cap_sells_to_holdings: bool,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            retry: RetryConfig::default(),
            signal_expiry_secs: Some(120),
            slippage: Decimal::ZERO,
            order_interval_ms: 0,
            lot_size: dec!(1),
            cap_sells_to_holdings: false,
        }
    }
}

impl FollowConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn order_interval(&self) -> Duration {
        Duration::from_millis(self.order_interval_ms)
    }

    /// Maximum signal age, `None` when expiry is off.
    ///
    /// A value too large for a `chrono::Duration` never expires anything;
    /// `validate` rejects such values up front.
    pub fn signal_expiry(&self) -> Option<chrono::Duration> {
        self.signal_expiry_secs.and_then(expiry_from_secs)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(SyncError::config("retry.max_attempts must be at least 1"));
        }
        if self.lot_size <= Decimal::ZERO {
            return Err(SyncError::config("lot_size must be positive"));
        }
        if self.slippage < Decimal::ZERO || self.slippage >= Decimal::ONE {
            return Err(SyncError::config("slippage must be in [0, 1)"));
        }
        if let Some(secs) = self.signal_expiry_secs {
            if expiry_from_secs(secs).is_none() {
                return Err(SyncError::config(format!("signal_expiry_secs {} is out of range", secs)));
            }
        }
        Ok(())
    }
}

fn expiry_from_secs(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn test_defaults_are_valid() {
        assert!(FollowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_attempts = FollowConfig {
            retry: RetryConfig { max_attempts: 0, ..Default::default() },
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());

        let bad_lot = FollowConfig { lot_size: Decimal::ZERO, ..Default::default() };
        assert!(bad_lot.validate().is_err());

        let bad_slippage = FollowConfig { slippage: dec!(1.5), ..Default::default() };
        assert!(bad_slippage.validate().is_err());
    }

    #[test]
    fn test_signal_expiry_bounds() {
        let largest = i64::MAX as u64 / 1_000;
        let far = FollowConfig { signal_expiry_secs: Some(largest), ..Default::default() };
        assert!(far.validate().is_ok());
        assert_eq!(far.signal_expiry(), chrono::Duration::try_seconds(largest as i64));

        for secs in [largest + 1, 10_000_000_000_000_000, u64::MAX] {
            let cfg = FollowConfig { signal_expiry_secs: Some(secs), ..Default::default() };
            assert!(matches!(cfg.validate(), Err(SyncError::Configuration(_))));
            assert_eq!(cfg.signal_expiry(), None);
        }

        let off = FollowConfig { signal_expiry_secs: None, ..Default::default() };
        assert!(off.validate().is_ok());
        assert_eq!(off.signal_expiry(), None);
    }

    #[test]
    fn test_policy_grows_and_never_ends() {
        let retry = RetryConfig {
            initial_interval_ms: 100,
            multiplier: 2.0,
            max_interval_ms: 400,
            randomization_factor: 0.0,
            ..Default::default()
        };
        let mut policy = retry.policy();

        for expected_ms in [100, 200, 400, 400] {
            let delay = policy.next_backoff().unwrap();
            assert!(delay >= Duration::from_millis(expected_ms));
            assert!(delay < Duration::from_millis(expected_ms + 1));
        }
    }

    #[test]
    fn test_partial_toml() {
        let cfg: FollowConfig = toml::from_str("poll_interval_ms = 5000\nslippage = \"0.01\"").unwrap();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.slippage, dec!(0.01));
        assert_eq!(cfg.retry.max_attempts, 3);
    }
}
