//! Per-subscriber record of signals already acted on.

use std::collections::HashSet;

use crate::models::{SignalId, TradeSignal};

/// Set of applied signal ids for one subscriber.
///
/// Grows for the lifetime of the follow session and never evicts. Entries
/// are added only once the outcome of a signal is final for this subscriber
/// (submitted, rejected, expired or a zero-size no-op).
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    applied: HashSet<SignalId>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from ids recorded by an earlier session.
    pub fn seeded(ids: impl IntoIterator<Item = SignalId>) -> Self {
        Self {
            applied: ids.into_iter().collect(),
        }
    }

    pub fn already_applied(&self, signal: &TradeSignal) -> bool {
        self.applied.contains(&signal.signal_id)
    }

    /// Returns false if the signal was already marked.
    pub fn mark_applied(&mut self, signal: &TradeSignal) -> bool {
        self.applied.insert(signal.signal_id.clone())
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}
