//! SQLite ledger for follow sessions.
//!
//! Stores what a restart needs to avoid replaying trades:
//! - Applied signal ids per (strategy, subscriber)
//! - A log of every dispatch decision, for inspection after the fact

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::errors::SyncResult;
use crate::models::SignalId;
use crate::trading::{DispatchOutcome, DispatchRecord};

/// Connection pool over the ledger database.
pub struct SignalLedger {
    pool: SqlitePool,
}

/// One row of the dispatch log.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredDispatch {
    pub id: i64,
    pub strategy_id: String,
    pub subscriber: String,
    pub signal_id: String,
    pub instrument: String,
    pub action: String,
    pub outcome: String,
    pub detail: Option<String>,
    pub attempts: i64,
    pub recorded_at: String,
}

/// Dispatch count for one subscriber and outcome.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OutcomeCount {
    pub subscriber: String,
    pub outcome: String,
    pub count: i64,
}

impl SignalLedger {
    /// Open (creating if needed) a ledger database.
    pub async fn new(database_url: &str) -> SyncResult<Self> {
        // every connection to :memory: is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;

        Ok(ledger)
    }

    async fn run_migrations(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applied_signals (
                strategy_id TEXT NOT NULL,
                subscriber TEXT NOT NULL,
                signal_id TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (strategy_id, subscriber, signal_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy_id TEXT NOT NULL,
                subscriber TEXT NOT NULL,
                signal_id TEXT NOT NULL,
                instrument TEXT NOT NULL,
                action TEXT NOT NULL,
                outcome TEXT NOT NULL,
                detail TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_dispatch_log_strategy ON dispatch_log(strategy_id, subscriber)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Applied Signals ====================

    /// Signal ids already applied for a subscriber of a strategy.
    pub async fn load_applied(&self, strategy_id: &str, subscriber: &str) -> SyncResult<Vec<SignalId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT signal_id FROM applied_signals WHERE strategy_id = ? AND subscriber = ?",
        )
        .bind(strategy_id)
        .bind(subscriber)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| SignalId::from(id)).collect())
    }

    pub async fn record_applied(
        &self,
        strategy_id: &str,
        subscriber: &str,
        signal_id: &SignalId,
    ) -> SyncResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO applied_signals (strategy_id, subscriber, signal_id) VALUES (?, ?, ?)",
        )
        .bind(strategy_id)
        .bind(subscriber)
        .bind(signal_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Dispatch Log ====================

    pub async fn record_dispatch(&self, strategy_id: &str, record: &DispatchRecord) -> SyncResult<()> {
        let detail = match &record.outcome {
            DispatchOutcome::Submitted(ack) => Some(ack.order_id.clone()),
            DispatchOutcome::Rejected(reason) => Some(reason.clone()),
            DispatchOutcome::Deferred(e) | DispatchOutcome::Failed(e) | DispatchOutcome::Suspended(e) => {
                Some(e.to_string())
            }
            DispatchOutcome::NoOp | DispatchOutcome::Expired => None,
        };

        sqlx::query(
            r#"
            INSERT INTO dispatch_log (
                strategy_id, subscriber, signal_id, instrument, action,
                outcome, detail, attempts, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(strategy_id)
        .bind(&record.subscriber)
        .bind(record.signal_id.as_str())
        .bind(&record.instrument)
        .bind(record.action.as_str())
        .bind(record.outcome.label())
        .bind(detail)
        .bind(i64::from(record.attempts))
        .bind(record.at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent dispatches for a strategy, newest first.
    pub async fn recent_dispatches(&self, strategy_id: &str, limit: i64) -> SyncResult<Vec<StoredDispatch>> {
        let rows = sqlx::query_as::<_, StoredDispatch>(
            "SELECT * FROM dispatch_log WHERE strategy_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(strategy_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Dispatch counts grouped by subscriber and outcome.
    pub async fn outcome_counts(&self, strategy_id: &str) -> SyncResult<Vec<OutcomeCount>> {
        let rows = sqlx::query_as::<_, OutcomeCount>(
            r#"
            SELECT subscriber, outcome, COUNT(*) AS count
            FROM dispatch_log
            WHERE strategy_id = ?
            GROUP BY subscriber, outcome
            ORDER BY subscriber, outcome
            "#,
        )
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use crate::models::{OrderResult, SignalAction};
    use chrono::Utc;

    async fn ledger() -> SignalLedger {
        SignalLedger::new("sqlite::memory:").await.unwrap()
    }

    fn record(subscriber: &str, signal: &str, outcome: DispatchOutcome) -> DispatchRecord {
        DispatchRecord {
            subscriber: subscriber.to_string(),
            signal_id: SignalId::from(signal.to_string()),
            instrument: "SH600036".to_string(),
            action: SignalAction::Buy,
            attempts: 1,
            outcome,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_applied_signals_are_scoped() {
        let ledger = ledger().await;
        let id = SignalId::from("ZH1|1700000000000|SH600036|BUY".to_string());

        ledger.record_applied("ZH1", "alice", &id).await.unwrap();
        ledger.record_applied("ZH1", "alice", &id).await.unwrap();

        assert_eq!(ledger.load_applied("ZH1", "alice").await.unwrap(), vec![id.clone()]);
        assert!(ledger.load_applied("ZH1", "bob").await.unwrap().is_empty());
        assert!(ledger.load_applied("ZH2", "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_log() {
        let ledger = ledger().await;

        ledger
            .record_dispatch("ZH1", &record("alice", "s1", DispatchOutcome::Submitted(OrderResult::new("88"))))
            .await
            .unwrap();
        ledger
            .record_dispatch("ZH1", &record("alice", "s2", DispatchOutcome::Rejected("no cash".into())))
            .await
            .unwrap();
        ledger
            .record_dispatch(
                "ZH1",
                &record("bob", "s1", DispatchOutcome::Deferred(SyncError::transient("timeout"))),
            )
            .await
            .unwrap();

        let recent = ledger.recent_dispatches("ZH1", 10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].subscriber, "bob");
        assert_eq!(recent[2].detail.as_deref(), Some("88"));

        let counts = ledger.outcome_counts("ZH1").await.unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(
            counts[0],
            OutcomeCount { subscriber: "alice".into(), outcome: "rejected".into(), count: 1 }
        );
    }
}
