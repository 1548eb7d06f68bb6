//! Operator-approved system updates
//!
//! The agent can only propose a patch; it sits here until the operator
//! approves or rejects it. Running the patch is somebody else's job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Declared risk of a proposed update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    High,
}

/// A patch awaiting operator authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    pub description: String,
    pub code: String,
    pub risk_level: RiskLevel,
}

/// Operator verdict on a pending update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    Approved,
    Rejected,
}

/// Holds at most one pending update; a new proposal replaces the old one
#[derive(Debug, Clone)]
pub struct UpdateQueue {
    tx: Arc<watch::Sender<Option<PendingUpdate>>>,
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Queue a proposal for the operator
    pub fn propose(&self, update: PendingUpdate) {
        tracing::info!(
            description = %update.description,
            risk = ?update.risk_level,
            "system update awaiting authorization"
        );
        self.tx.send_replace(Some(update));
    }

    /// The update awaiting a decision
    #[must_use]
    pub fn pending(&self) -> Option<PendingUpdate> {
        self.tx.borrow().clone()
    }

    /// Resolve the pending update, returning it
    pub fn decide(&self, decision: UpdateDecision) -> Option<PendingUpdate> {
        let update = self.tx.send_replace(None);
        if let Some(update) = &update {
            tracing::info!(description = %update.description, ?decision, "system update decided");
        }
        update
    }

    /// Observe proposals as they arrive
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<PendingUpdate>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(description: &str) -> PendingUpdate {
        PendingUpdate {
            description: description.to_string(),
            code: "noop".to_string(),
            risk_level: RiskLevel::Low,
        }
    }

    #[test]
    fn newer_proposal_replaces_older() {
        let queue = UpdateQueue::new();
        queue.propose(update("first"));
        queue.propose(update("second"));
        assert_eq!(queue.pending().unwrap().description, "second");
    }

    #[test]
    fn decide_clears_pending() {
        let queue = UpdateQueue::new();
        assert!(queue.decide(UpdateDecision::Rejected).is_none());

        queue.propose(update("ui"));
        let decided = queue.decide(UpdateDecision::Approved).unwrap();
        assert_eq!(decided.description, "ui");
        assert!(queue.pending().is_none());
    }

    #[test]
    fn risk_level_wire_form() {
        let parsed: PendingUpdate = serde_json::from_value(serde_json::json!({
            "description": "d", "code": "c", "riskLevel": "LOW"
        }))
        .unwrap();
        assert_eq!(parsed.risk_level, RiskLevel::Low);
    }
}
