//! SASL negotiation.
//!
//! A provider picks mechanisms from its registry in priority order, runs the
//! exchange through the stream's [`SaslChannel`] and classifies whatever the
//! peer reports:
//!
//! - authentication failures re-prompt and retry, up to `max_attempts`
//! - mechanism rejections drop the mechanism and move on to the next one
//! - anything else is handed back to the caller unchanged

use std::sync::Arc;

use async_trait::async_trait;
use xmppsec_core::{
    find_supported, CredentialCache, CredentialProvider, CredentialRequest, CredentialSource,
    Credentials, FailureClass, Jid, MechanismRegistry, MechanismToken, NegotiationError,
    NegotiationResult, SaslChannel, SaslFailure, SaslMechanism, Secret, StaticCredentials,
    StreamFeatures, TlsHandle, XmlStream,
};

/// Default number of password prompts per mechanism.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One way of authenticating the stream.
#[async_trait]
pub trait SaslProvider: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Try to authenticate. `Ok(false)` means no mechanism this provider
    /// can use is on offer.
    async fn execute(
        &self,
        jid: &Jid,
        features: &StreamFeatures,
        stream: &mut dyn XmlStream,
        tls: Option<&TlsHandle>,
    ) -> NegotiationResult<bool>;
}

/// Password authentication.
pub struct PasswordSaslProvider {
    source: Arc<dyn CredentialSource>,
    registry: MechanismRegistry,
    max_attempts: u32,
}

impl PasswordSaslProvider {
    pub fn new(source: Arc<dyn CredentialSource>, registry: MechanismRegistry) -> Self {
        Self {
            source,
            registry,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Password prompts per mechanism. Zero is a configuration error.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> NegotiationResult<Self> {
        if max_attempts == 0 {
            return Err(NegotiationError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        self.max_attempts = max_attempts;
        Ok(self)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[async_trait]
impl SaslProvider for PasswordSaslProvider {
    fn name(&self) -> &str {
        "password"
    }

    async fn execute(
        &self,
        jid: &Jid,
        features: &StreamFeatures,
        stream: &mut dyn XmlStream,
        tls: Option<&TlsHandle>,
    ) -> NegotiationResult<bool> {
        let offered = offered_mechanisms(features)?;
        let identity = jid.bare();
        let mode = CredentialMode::Password {
            source: self.source.as_ref(),
            max_attempts: self.max_attempts,
        };

        negotiate_mechanisms(
            self.name(),
            &identity,
            self.registry.candidates(tls.is_some()),
            offered,
            stream,
            &mode,
        )
        .await
    }
}

/// Certificate based authentication (EXTERNAL).
///
/// Only engages when the TLS session presented a client certificate.
pub struct ExternalSaslProvider {
    registry: MechanismRegistry,
}

impl ExternalSaslProvider {
    pub fn new(registry: MechanismRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SaslProvider for ExternalSaslProvider {
    fn name(&self) -> &str {
        "external"
    }

    async fn execute(
        &self,
        jid: &Jid,
        features: &StreamFeatures,
        stream: &mut dyn XmlStream,
        tls: Option<&TlsHandle>,
    ) -> NegotiationResult<bool> {
        let offered = offered_mechanisms(features)?;

        if !tls.is_some_and(|handle| handle.client_certificate) {
            tracing::debug!("no client certificate on the stream, skipping EXTERNAL");
            return Ok(false);
        }

        let identity = jid.bare();
        let mode = CredentialMode::Fixed(Credentials {
            username: identity.to_string(),
            secret: Secret::new(""),
        });

        negotiate_mechanisms(
            self.name(),
            &identity,
            self.registry.candidates(true),
            offered,
            stream,
            &mode,
        )
        .await
    }
}

fn offered_mechanisms(features: &StreamFeatures) -> NegotiationResult<&[String]> {
    features.sasl_mechanisms().ok_or_else(|| {
        NegotiationError::SaslUnavailable("remote side does not support SASL".to_string())
    })
}

enum CredentialMode<'a> {
    /// Prompt the source, retrying authentication failures.
    Password {
        source: &'a dyn CredentialSource,
        max_attempts: u32,
    },
    /// Fixed credentials, one attempt.
    Fixed(Credentials),
}

impl CredentialMode<'_> {
    fn max_attempts(&self) -> u32 {
        match self {
            Self::Password { max_attempts, .. } => *max_attempts,
            Self::Fixed(_) => 1,
        }
    }
}

enum MechanismOutcome {
    Authenticated,
    Rejected,
}

enum AttemptOutcome {
    Authenticated,
    AuthFailed(NegotiationError),
    Rejected(SaslFailure),
}

async fn negotiate_mechanisms(
    provider: &str,
    jid: &Jid,
    mut candidates: Vec<Arc<dyn SaslMechanism>>,
    offered: &[String],
    stream: &mut dyn XmlStream,
    mode: &CredentialMode<'_>,
) -> NegotiationResult<bool> {
    let mut cache = CredentialCache::new();

    while let Some((index, token)) = find_supported(&candidates, offered) {
        let mechanism = candidates.remove(index);
        tracing::debug!(
            "{} provider trying {} as {}",
            provider,
            mechanism.name(),
            token.name()
        );

        match attempt_loop(mechanism.as_ref(), &token, jid, stream, mode, &mut cache).await? {
            MechanismOutcome::Authenticated => {
                tracing::info!("authenticated as {} using {}", jid, token.name());
                return Ok(true);
            }
            MechanismOutcome::Rejected => continue,
        }
    }

    tracing::debug!("{} provider found no usable mechanism", provider);
    Ok(false)
}

async fn attempt_loop(
    mechanism: &dyn SaslMechanism,
    token: &MechanismToken,
    jid: &Jid,
    stream: &mut dyn XmlStream,
    mode: &CredentialMode<'_>,
    cache: &mut CredentialCache,
) -> NegotiationResult<MechanismOutcome> {
    let max_attempts = mode.max_attempts();
    let mut last_error = None;

    for attempt in 0..max_attempts {
        let outcome = match mode {
            CredentialMode::Password { source, .. } => {
                let mut request = CredentialRequest::new(*source, jid, attempt, cache);
                run_mechanism(mechanism, token, stream.sasl_channel(), &mut request).await?
            }
            CredentialMode::Fixed(credentials) => {
                let mut fixed = StaticCredentials(credentials.clone());
                run_mechanism(mechanism, token, stream.sasl_channel(), &mut fixed).await?
            }
        };

        if cache.abort_latched() {
            return Err(NegotiationError::aborted_by_user());
        }

        match outcome {
            AttemptOutcome::Authenticated => return Ok(MechanismOutcome::Authenticated),
            AttemptOutcome::Rejected(failure) => {
                tracing::info!("{} rejected by peer: {}", token.name(), failure);
                return Ok(MechanismOutcome::Rejected);
            }
            AttemptOutcome::AuthFailed(err) => {
                tracing::warn!(
                    "{} attempt {}/{} failed: {}",
                    token.name(),
                    attempt + 1,
                    max_attempts,
                    err
                );
                cache.clear();
                last_error = Some(err);
            }
        }
    }

    debug_assert!(last_error.is_some(), "attempts exhausted without a failure");
    Err(last_error.unwrap_or_else(|| {
        NegotiationError::Internal(format!(
            "{} attempts exhausted without a recorded failure",
            token.name()
        ))
    }))
}

async fn run_mechanism(
    mechanism: &dyn SaslMechanism,
    token: &MechanismToken,
    channel: &mut dyn SaslChannel,
    credentials: &mut dyn CredentialProvider,
) -> NegotiationResult<AttemptOutcome> {
    match mechanism.authenticate(channel, token, credentials).await {
        Ok(()) => Ok(AttemptOutcome::Authenticated),
        Err(NegotiationError::Sasl(failure)) => match failure.class() {
            FailureClass::Authentication => Ok(AttemptOutcome::AuthFailed(
                NegotiationError::from_auth_failure(&failure),
            )),
            FailureClass::MechanismRejected => Ok(AttemptOutcome::Rejected(failure)),
            FailureClass::Unclassified => Err(NegotiationError::Sasl(failure)),
        },
        Err(err) => Err(err),
    }
}
