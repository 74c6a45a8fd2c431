//! Per-cycle dispatch records and cumulative session statistics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::SyncError;
use crate::models::{OrderResult, SignalAction, SignalId};

/// What happened to one (subscriber, signal) pair in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Broker accepted the order
    Submitted(OrderResult),
    /// Scaled (or capped) quantity was zero; nothing to send
    NoOp,
    /// Signal was older than the expiry window
    Expired,
    /// Broker refused the order; never resubmitted
    Rejected(String),
    /// Transient failures used up every retry attempt; retried next cycle
    Deferred(SyncError),
    /// Configuration problem; left for a fix and restart
    Failed(SyncError),
    /// Credentials refused; subscriber suspended
    Suspended(SyncError),
}

impl DispatchOutcome {
    /// Whether the signal is now in the subscriber's dedup set.
    pub fn marks_applied(&self) -> bool {
        matches!(
            self,
            Self::Submitted(_) | Self::NoOp | Self::Expired | Self::Rejected(_)
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Rejected(_) | Self::Deferred(_) | Self::Failed(_) | Self::Suspended(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted(_) => "submitted",
            Self::NoOp => "noop",
            Self::Expired => "expired",
            Self::Rejected(_) => "rejected",
            Self::Deferred(_) => "deferred",
            Self::Failed(_) => "failed",
            Self::Suspended(_) => "suspended",
        }
    }
}

/// One dispatch decision, kept for observability.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub subscriber: String,
    pub signal_id: SignalId,
    pub instrument: String,
    pub action: SignalAction,
    /// Submission attempts made (0 when nothing was sent)
    pub attempts: u32,
    pub outcome: DispatchOutcome,
    pub at: DateTime<Utc>,
}

/// Result of one POLLING → DISPATCHING pass.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub strategy_id: String,
    /// Signals returned by the source this cycle
    pub signals_seen: usize,
    pub records: Vec<DispatchRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn submitted(&self) -> usize {
        self.count(|o| matches!(o, DispatchOutcome::Submitted(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchRecord> {
        self.records.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn records_for<'a>(&'a self, subscriber: &'a str) -> impl Iterator<Item = &'a DispatchRecord> {
        self.records.iter().filter(move |r| r.subscriber == subscriber)
    }

    fn count(&self, pred: impl Fn(&DispatchOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Running totals over a follow session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub cycles: u64,
    pub fetch_failures: u64,
    pub submitted: u64,
    pub noops: u64,
    pub expired: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub failed: u64,
    pub suspended: u64,
}

impl SessionStats {
    pub fn absorb(&mut self, report: &CycleReport) {
        self.cycles += 1;
        for record in &report.records {
            match record.outcome {
                DispatchOutcome::Submitted(_) => self.submitted += 1,
                DispatchOutcome::NoOp => self.noops += 1,
                DispatchOutcome::Expired => self.expired += 1,
                DispatchOutcome::Rejected(_) => self.rejected += 1,
                DispatchOutcome::Deferred(_) => self.deferred += 1,
                DispatchOutcome::Failed(_) => self.failed += 1,
                DispatchOutcome::Suspended(_) => self.suspended += 1,
            }
        }
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cycles:          {} ({} fetch failures)", self.cycles, self.fetch_failures)?;
        writeln!(f, "Submitted:       {}", self.submitted)?;
        writeln!(f, "No-op / Expired: {} / {}", self.noops, self.expired)?;
        writeln!(f, "Rejected:        {}", self.rejected)?;
        writeln!(f, "Deferred:        {}", self.deferred)?;
        writeln!(f, "Failed:          {}", self.failed)?;
        write!(f, "Suspended:       {}", self.suspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subscriber: &str, outcome: DispatchOutcome) -> DispatchRecord {
        DispatchRecord {
            subscriber: subscriber.to_string(),
            signal_id: SignalId::from(format!("{}-sig", subscriber)),
            instrument: "SH600036".to_string(),
            action: SignalAction::Buy,
            attempts: 1,
            outcome,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_outcome_bookkeeping() {
        assert!(DispatchOutcome::NoOp.marks_applied());
        assert!(!DispatchOutcome::NoOp.is_failure());
        assert!(DispatchOutcome::Rejected("no cash".into()).marks_applied());
        assert!(DispatchOutcome::Rejected("no cash".into()).is_failure());
        assert!(!DispatchOutcome::Deferred(SyncError::transient("timeout")).marks_applied());
        assert!(!DispatchOutcome::Suspended(SyncError::auth("expired")).marks_applied());
    }

    #[test]
    fn test_stats_absorb() {
        let report = CycleReport {
            strategy_id: "ZH1".to_string(),
            signals_seen: 3,
            records: vec![
                record("a", DispatchOutcome::Submitted(OrderResult::new("1"))),
                record("b", DispatchOutcome::Rejected("limit".into())),
                record("b", DispatchOutcome::Deferred(SyncError::transient("timeout"))),
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let mut stats = SessionStats::default();
        stats.absorb(&report);

        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.deferred, 1);
        assert_eq!(report.submitted(), 1);
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.records_for("b").count(), 2);
    }
}
