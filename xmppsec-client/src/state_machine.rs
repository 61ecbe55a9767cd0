//! Phase tracking for one negotiation run.

use xmppsec_core::{NegotiationError, NegotiationEvent, NegotiationPhase, NegotiationResult};

/// Validates the phase order of one negotiation run.
///
/// Each step is checked against the phase table and traced at `debug`. An
/// out-of-order step is an `Internal` error. The orchestrator owns one per
/// run and drops it afterwards; callers learn the outcome from the returned
/// `Result`, never from the final phase.
#[derive(Debug)]
pub struct NegotiationStateMachine {
    phase: NegotiationPhase,
    authenticated: bool,
}

impl NegotiationStateMachine {
    /// Create a new state machine.
    pub fn new() -> Self {
        Self {
            phase: NegotiationPhase::Start,
            authenticated: false,
        }
    }

    /// Get current phase.
    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// TLS negotiator invoked.
    pub fn on_tls_started(&mut self) -> NegotiationResult<()> {
        self.transition(NegotiationEvent::TlsStarted)
    }

    /// TLS negotiator returned.
    pub fn on_tls_outcome(&mut self, established: bool) -> NegotiationResult<()> {
        if established {
            self.transition(NegotiationEvent::TlsEstablished)
        } else {
            self.transition(NegotiationEvent::TlsSkipped)
        }
    }

    /// A fresh feature snapshot arrived.
    pub fn on_features_received(&mut self) -> NegotiationResult<()> {
        self.transition(NegotiationEvent::FeaturesReceived)
    }

    /// A SASL provider authenticated the stream.
    pub fn on_authenticated(&mut self) -> NegotiationResult<()> {
        self.transition(NegotiationEvent::Authenticated)
    }

    /// Negotiation failed. Only traces the move to `Failed`.
    pub fn fail(&mut self, reason: &NegotiationError) {
        // Failed is reachable from every non-terminal phase.
        let _ = self.transition(NegotiationEvent::Error(reason.to_string()));
    }

    fn transition(&mut self, event: NegotiationEvent) -> NegotiationResult<()> {
        let next = match (&self.phase, &event) {
            (NegotiationPhase::Start, NegotiationEvent::TlsStarted) => NegotiationPhase::Tls,
            (NegotiationPhase::Tls, NegotiationEvent::TlsEstablished) => {
                NegotiationPhase::FeatureRefresh
            }
            (NegotiationPhase::Tls, NegotiationEvent::TlsSkipped) => NegotiationPhase::Sasl,
            (NegotiationPhase::FeatureRefresh, NegotiationEvent::FeaturesReceived) => {
                if self.authenticated {
                    NegotiationPhase::Done
                } else {
                    NegotiationPhase::Sasl
                }
            }
            (NegotiationPhase::Sasl, NegotiationEvent::Authenticated) => {
                NegotiationPhase::FeatureRefresh
            }
            (_, NegotiationEvent::Error(_)) => NegotiationPhase::Failed,
            _ => {
                return Err(NegotiationError::Internal(format!(
                    "Invalid transition from {:?} on {:?}",
                    self.phase, event
                )));
            }
        };

        if self.phase.can_transition_to(next) {
            tracing::debug!("Negotiation phase: {:?} -> {:?}", self.phase, next);
            if matches!(event, NegotiationEvent::Authenticated) {
                self.authenticated = true;
            }
            self.phase = next;
            Ok(())
        } else {
            Err(NegotiationError::Internal(format!(
                "Invalid phase transition: {:?} -> {:?}",
                self.phase, next
            )))
        }
    }
}

impl Default for NegotiationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_flow() {
        let mut sm = NegotiationStateMachine::new();
        assert_eq!(sm.phase(), NegotiationPhase::Start);

        sm.on_tls_started().unwrap();
        sm.on_tls_outcome(true).unwrap();
        assert_eq!(sm.phase(), NegotiationPhase::FeatureRefresh);

        sm.on_features_received().unwrap();
        assert_eq!(sm.phase(), NegotiationPhase::Sasl);

        sm.on_authenticated().unwrap();
        assert!(sm.is_authenticated());
        sm.on_features_received().unwrap();
        assert_eq!(sm.phase(), NegotiationPhase::Done);
    }

    #[test]
    fn plaintext_flow() {
        let mut sm = NegotiationStateMachine::new();
        sm.on_tls_started().unwrap();
        sm.on_tls_outcome(false).unwrap();
        assert_eq!(sm.phase(), NegotiationPhase::Sasl);
    }

    #[test]
    fn sasl_before_tls_is_rejected() {
        let mut sm = NegotiationStateMachine::new();
        let err = sm.on_authenticated().unwrap_err();
        assert!(matches!(err, NegotiationError::Internal(_)));
        assert_eq!(sm.phase(), NegotiationPhase::Start);
    }

    #[test]
    fn failure_is_terminal() {
        let mut sm = NegotiationStateMachine::new();
        sm.on_tls_started().unwrap();
        sm.fail(&NegotiationError::tls("STARTTLS not supported by peer"));
        assert_eq!(sm.phase(), NegotiationPhase::Failed);

        assert!(sm.on_tls_outcome(true).is_err());
        sm.fail(&NegotiationError::Internal("again".to_string()));
        assert_eq!(sm.phase(), NegotiationPhase::Failed);
    }
}
