//! SASL mechanism capabilities and the mechanism registry.

use std::any::Any;
use std::sync::Arc;

use crate::credentials::CredentialProvider;
use crate::error::NegotiationResult;

/// What the peer answered to an `auth` or `response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslStep {
    /// The peer sent a challenge.
    Challenge(Vec<u8>),
    /// Authentication succeeded, possibly with additional data.
    Success(Option<Vec<u8>>),
}

/// Challenge/response channel on the stream.
///
/// A peer rejection surfaces as
/// [`NegotiationError::Sasl`](crate::NegotiationError::Sasl) carrying the
/// reported condition.
#[async_trait::async_trait]
pub trait SaslChannel: Send {
    /// Start an exchange with `mechanism`.
    async fn initiate(
        &mut self,
        mechanism: &str,
        initial_response: Option<&[u8]>,
    ) -> NegotiationResult<SaslStep>;

    /// Answer the last challenge.
    async fn respond(&mut self, payload: &[u8]) -> NegotiationResult<SaslStep>;

    /// Abort the exchange in progress.
    async fn abort(&mut self) -> NegotiationResult<()>;
}

/// Value a mechanism returns from [`SaslMechanism::any_supported`] and gets
/// back in [`SaslMechanism::authenticate`].
///
/// Only the mechanism knows what is inside; everyone else passes it on.
pub struct MechanismToken {
    name: String,
    payload: Option<Box<dyn Any + Send + Sync>>,
}

impl MechanismToken {
    /// Token naming the selected wire mechanism, e.g. `SCRAM-SHA-256`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref())
    }
}

impl std::fmt::Debug for MechanismToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MechanismToken")
            .field("name", &self.name)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

/// One SASL mechanism variant.
#[async_trait::async_trait]
pub trait SaslMechanism: Send + Sync {
    /// Family name used in logs, e.g. `SCRAM`.
    fn name(&self) -> &str;

    /// Whether the mechanism exposes the secret and must only run over TLS.
    fn requires_tls(&self) -> bool {
        false
    }

    /// Given the names the peer offers, decide whether this variant can be
    /// used.
    fn any_supported(&self, offered: &[String]) -> Option<MechanismToken>;

    /// Run the exchange to completion.
    async fn authenticate(
        &self,
        channel: &mut dyn SaslChannel,
        token: &MechanismToken,
        credentials: &mut dyn CredentialProvider,
    ) -> NegotiationResult<()>;
}

/// Ordered list of mechanism variants, highest priority first.
#[derive(Clone, Default)]
pub struct MechanismRegistry {
    mechanisms: Vec<Arc<dyn SaslMechanism>>,
}

impl MechanismRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mechanism with lower priority than those already registered.
    pub fn register(&mut self, mechanism: Arc<dyn SaslMechanism>) {
        self.mechanisms.push(mechanism);
    }

    pub fn with(mut self, mechanism: Arc<dyn SaslMechanism>) -> Self {
        self.register(mechanism);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mechanisms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mechanisms.len()
    }

    /// Mechanism names in priority order.
    pub fn names(&self) -> Vec<&str> {
        self.mechanisms.iter().map(|m| m.name()).collect()
    }

    /// Candidate list for one provider call. Mechanisms that need TLS are
    /// left out unless TLS is active.
    pub fn candidates(&self, tls_active: bool) -> Vec<Arc<dyn SaslMechanism>> {
        self.mechanisms
            .iter()
            .filter(|m| tls_active || !m.requires_tls())
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for MechanismRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Pick the first candidate, in priority order, usable with `offered`.
pub fn find_supported(
    candidates: &[Arc<dyn SaslMechanism>],
    offered: &[String],
) -> Option<(usize, MechanismToken)> {
    candidates
        .iter()
        .enumerate()
        .find_map(|(index, m)| m.any_supported(offered).map(|token| (index, token)))
}
