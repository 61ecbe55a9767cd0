//! Phase automaton of a negotiation run.

use serde::{Deserialize, Serialize};

/// Negotiation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationPhase {
    /// Nothing done yet.
    Start,
    /// STARTTLS in progress.
    Tls,
    /// Waiting for a fresh feature snapshot after a stream reset.
    FeatureRefresh,
    /// Running SASL providers.
    Sasl,
    /// Terminal state - stream secured and authenticated.
    Done,
    /// Terminal state - negotiation failed, the stream is unusable.
    Failed,
}

impl NegotiationPhase {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Get valid transitions from current state.
    pub fn valid_transitions(&self) -> &'static [NegotiationPhase] {
        match self {
            Self::Start => &[Self::Tls, Self::Failed],
            Self::Tls => &[Self::FeatureRefresh, Self::Sasl, Self::Failed],
            Self::FeatureRefresh => &[Self::Sasl, Self::Done, Self::Failed],
            Self::Sasl => &[Self::FeatureRefresh, Self::Failed],
            Self::Done => &[],
            Self::Failed => &[],
        }
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: NegotiationPhase) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Events that drive phase transitions.
#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    /// TLS negotiator invoked.
    TlsStarted,
    /// TLS is now active on the stream.
    TlsEstablished,
    /// TLS was skipped without error.
    TlsSkipped,
    /// A fresh feature snapshot arrived.
    FeaturesReceived,
    /// A SASL provider authenticated the stream.
    Authenticated,
    /// Negotiation failed.
    Error(String),
}
