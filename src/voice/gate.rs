//! Wake-word gate
//!
//! Decides whether the agent is in STANDBY (ignoring ordinary speech) or
//! ACTIVE (forwarding everything) from recognized transcripts. Matching is a
//! literal, case-insensitive substring test against a small fixed phrase set.

use tokio::sync::watch;

use crate::config::WakeConfig;

/// Turn-taking state of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    /// Listening for the wake phrase only
    #[default]
    Standby,
    /// Processing all input
    Active,
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standby => write!(f, "STANDBY"),
            Self::Active => write!(f, "ACTIVE"),
        }
    }
}

/// What a transcript means to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Contains the wake phrase
    Wake,
    /// Contains a termination phrase
    Sleep,
    /// Anything else
    Ordinary,
}

/// A recognized utterance, normalized and tagged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationEvent {
    /// Lower-cased, trimmed transcript
    pub transcript: String,
    /// Classification tag
    pub kind: EventKind,
}

/// Acknowledgement the session should emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Woken by the bare wake phrase
    Online,
    /// Returned to standby
    StandingBy,
}

/// What the caller does with the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Pass the (trimmed, original-case) text to the provider
    Forward(String),
    /// Record and drop
    Ignore,
    /// Fully handled by the gate
    Consumed,
}

/// Result of classifying one transcript against a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Tagged event
    pub event: ActivationEvent,
    /// State before the event
    pub previous: ActivationState,
    /// State after the event
    pub next_state: ActivationState,
    /// Acknowledgement to emit, if any
    pub ack: Option<Ack>,
    /// What to do with the transcript
    pub disposition: Disposition,
}

impl Classification {
    /// Whether the event changed the activation state
    #[must_use]
    pub fn transitioned(&self) -> bool {
        self.previous != self.next_state
    }
}

/// Pure transition table over recognized transcripts
#[derive(Debug, Clone)]
pub struct WakeWordGate {
    wake_phrase: String,
    termination_phrases: Vec<String>,
}

impl WakeWordGate {
    /// Create a gate for a wake phrase and a set of termination phrases
    #[must_use]
    pub fn new(wake_phrase: &str, termination_phrases: Vec<String>) -> Self {
        let termination_phrases: Vec<String> = termination_phrases
            .into_iter()
            .map(|p| normalize(&p))
            .filter(|p| !p.is_empty())
            .collect();
        let wake_phrase = normalize(wake_phrase);

        tracing::debug!(
            wake_phrase = %wake_phrase,
            termination = ?termination_phrases,
            "wake-word gate initialized"
        );

        Self {
            wake_phrase,
            termination_phrases,
        }
    }

    /// Create a gate from configuration
    #[must_use]
    pub fn from_config(config: &WakeConfig) -> Self {
        Self::new(&config.phrase, config.termination_phrases.clone())
    }

    /// The normalized wake phrase
    #[must_use]
    pub fn wake_phrase(&self) -> &str {
        &self.wake_phrase
    }

    /// The normalized termination phrases
    #[must_use]
    pub fn termination_phrases(&self) -> &[String] {
        &self.termination_phrases
    }

    /// Tag a transcript without reference to any state
    #[must_use]
    pub fn tag(&self, transcript: &str) -> ActivationEvent {
        let normalized = normalize(transcript);
        let kind = if self
            .termination_phrases
            .iter()
            .any(|p| normalized.contains(p.as_str()))
        {
            EventKind::Sleep
        } else if !self.wake_phrase.is_empty() && normalized.contains(self.wake_phrase.as_str()) {
            EventKind::Wake
        } else {
            EventKind::Ordinary
        };

        ActivationEvent {
            transcript: normalized,
            kind,
        }
    }

    /// Classify a transcript against the current state
    #[must_use]
    pub fn classify(&self, transcript: &str, current: ActivationState) -> Classification {
        let event = self.tag(transcript);
        let text = transcript.trim().to_string();

        let (next_state, ack, disposition) = if event.transcript.is_empty() {
            (current, None, Disposition::Ignore)
        } else {
            match (current, event.kind) {
                (ActivationState::Active, EventKind::Sleep) => (
                    ActivationState::Standby,
                    Some(Ack::StandingBy),
                    Disposition::Consumed,
                ),
                (ActivationState::Active, _) => {
                    (ActivationState::Active, None, Disposition::Forward(text))
                }
                (ActivationState::Standby, EventKind::Wake) => {
                    if self.is_bare_wake(&event.transcript) {
                        (ActivationState::Active, Some(Ack::Online), Disposition::Consumed)
                    } else {
                        (ActivationState::Active, None, Disposition::Forward(text))
                    }
                }
                // Already asleep: a dismissal, even one naming the agent, keeps standby
                (ActivationState::Standby, EventKind::Sleep | EventKind::Ordinary) => {
                    (ActivationState::Standby, None, Disposition::Ignore)
                }
            }
        };

        Classification {
            event,
            previous: current,
            next_state,
            ack,
            disposition,
        }
    }

    /// Whether the transcript is the wake phrase and nothing else
    fn is_bare_wake(&self, normalized: &str) -> bool {
        normalized
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .trim()
            == self.wake_phrase
    }
}

/// The single owned activation flag
///
/// Each `apply` reads, classifies and writes in one step. Observers (the
/// capture pipeline) see the flag through a watch channel.
#[derive(Debug)]
pub struct GateState {
    gate: WakeWordGate,
    tx: watch::Sender<ActivationState>,
}

impl GateState {
    /// Create a gate state starting in STANDBY
    #[must_use]
    pub fn new(gate: WakeWordGate) -> Self {
        let (tx, _rx) = watch::channel(ActivationState::Standby);
        Self { gate, tx }
    }

    /// Current activation state
    #[must_use]
    pub fn state(&self) -> ActivationState {
        *self.tx.borrow()
    }

    /// Classify a transcript and apply the resulting transition
    pub fn apply(&mut self, transcript: &str) -> Classification {
        let classification = self.gate.classify(transcript, self.state());

        if classification.transitioned() {
            tracing::info!(
                from = %classification.previous,
                to = %classification.next_state,
                transcript = %classification.event.transcript,
                "activation state changed"
            );
            self.tx.send_replace(classification.next_state);
        }

        classification
    }

    /// Return to STANDBY
    pub fn reset(&mut self) {
        self.tx.send_replace(ActivationState::Standby);
    }

    /// Observe the activation flag
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ActivationState> {
        self.tx.subscribe()
    }

    /// The underlying transition table
    #[must_use]
    pub const fn gate(&self) -> &WakeWordGate {
        &self.gate
    }
}

/// Lower-case and trim
fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
