//! Connection state machine shared by both session variants

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::{Error, Result};

/// Externally observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Terminal for the session instance
    Error,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Error | Self::Disconnected)
                | (Self::Connected, Self::Disconnected | Self::Error)
        )
    }

    /// Whether no further transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Observable holder of one session's connection state
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Start in `Disconnected`
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns error if the transition is not in the table
    pub fn transition(&self, next: ConnectionState) -> Result<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                tracing::debug!(from = %state, to = %next, "connection state");
                *state = next;
                true
            } else {
                result = Err(Error::Session(format!(
                    "illegal connection transition {state} -> {next}"
                )));
                false
            }
        });
        result
    }

    /// Move to `Error` from any live state
    pub fn fail(&self) {
        if let Err(e) = self.transition(ConnectionState::Error) {
            tracing::debug!(error = %e, "already terminal");
        }
    }

    /// Observe transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
