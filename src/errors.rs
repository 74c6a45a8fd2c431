//! Error taxonomy shared by the sync engine, trading clients and strategy sources.

use reqwest::StatusCode;
use serde::Serialize;

/// Every failure the follower can observe falls into one of four kinds.
///
/// The kind decides what the engine does with it: configuration errors are
/// surfaced without retry, auth errors stop whatever they are scoped to,
/// transient errors are retried with backoff, rejected orders are recorded
/// and never resubmitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("order rejected: {0}")]
    RejectedOrder(String),
}

impl SyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::RejectedOrder(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Stops the loop (or subscriber) it is scoped to.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Short label used in log fields and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Auth(_) => "auth",
            Self::TransientNetwork(_) => "transient_network",
            Self::RejectedOrder(_) => "rejected_order",
        }
    }

    /// Classify a non-success HTTP status from a broker endpoint.
    ///
    /// Client errors other than auth mean the broker refused the order.
    pub fn from_broker_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Self::Auth(format!("{} - {}", status, body))
            }
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                Self::TransientNetwork(format!("{} - {}", status, body))
            }
            s if s.is_client_error() => Self::RejectedOrder(format!("{} - {}", status, body)),
            _ => Self::TransientNetwork(format!("{} - {}", status, body)),
        }
    }

    /// Classify a non-success HTTP status from a strategy platform.
    ///
    /// Anything but auth is retried on the next poll.
    pub fn from_platform_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Self::Auth(format!("{} - {}", status, body))
            }
            _ => Self::TransientNetwork(format!("{} - {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Self::Auth(e.to_string());
            }
        }
        if e.is_builder() {
            return Self::Configuration(e.to_string());
        }
        // timeouts, connect failures, truncated bodies and bad JSON all clear up on a later poll
        Self::TransientNetwork(e.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        Self::TransientNetwork(format!("ledger: {}", e))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_status_classification() {
        assert!(SyncError::from_broker_status(StatusCode::UNAUTHORIZED, "").is_fatal());
        assert!(SyncError::from_broker_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(SyncError::from_broker_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert_eq!(
            SyncError::from_broker_status(StatusCode::BAD_REQUEST, "no cash").kind(),
            "rejected_order"
        );
    }

    #[test]
    fn test_platform_status_never_rejects() {
        let err = SyncError::from_platform_status(StatusCode::NOT_FOUND, "gone");
        assert!(err.is_transient());
        assert!(SyncError::from_platform_status(StatusCode::FORBIDDEN, "").is_fatal());
    }
}
