//! Stream security negotiation: STARTTLS, then SASL with provider fallback.

use std::sync::Arc;
use std::time::Duration;

use xmppsec_core::{
    CredentialSource, Jid, MechanismRegistry, NegotiationError, NegotiationResult,
    StreamFeatures, TlsHandle, XmlStream,
};

use crate::config::NegotiationConfig;
use crate::sasl::{PasswordSaslProvider, SaslProvider};
use crate::starttls::{StartTlsProvider, TlsNegotiator};
use crate::state_machine::NegotiationStateMachine;
use crate::tls::TlsConfigFactory;

/// Result of a successful negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationOutcome {
    /// Active TLS session, if STARTTLS was negotiated.
    pub tls: Option<TlsHandle>,
    /// Features received after the final stream reset.
    pub features: StreamFeatures,
}

/// Negotiate TLS once, then try each SASL provider in order.
///
/// The first provider that authenticates wins. A provider that finds no
/// usable mechanism hands over to the next one, and so does a provider whose
/// credentials were rejected, unless the user aborted. When every provider
/// is used up the last credential rejection is returned, or
/// [`NegotiationError::SaslUnavailable`] if there was none.
///
/// On error the stream is in an undefined state and must be closed.
pub async fn negotiate_stream_security(
    tls: &dyn TlsNegotiator,
    providers: &[Arc<dyn SaslProvider>],
    timeout: Duration,
    jid: &Jid,
    features: &StreamFeatures,
    stream: &mut dyn XmlStream,
) -> NegotiationResult<NegotiationOutcome> {
    if providers.is_empty() {
        return Err(NegotiationError::Configuration(
            "at least one SASL provider is required".to_string(),
        ));
    }

    // Order checks and debug tracing only; the phase is not reported.
    let mut phases = NegotiationStateMachine::new();
    let result = run(&mut phases, tls, providers, timeout, jid, features, stream).await;
    if let Err(err) = &result {
        tracing::debug!("negotiation with {} failed: {}", jid.domainpart(), err);
        phases.fail(err);
    }
    result
}

async fn run(
    phases: &mut NegotiationStateMachine,
    tls: &dyn TlsNegotiator,
    providers: &[Arc<dyn SaslProvider>],
    timeout: Duration,
    jid: &Jid,
    features: &StreamFeatures,
    stream: &mut dyn XmlStream,
) -> NegotiationResult<NegotiationOutcome> {
    phases.on_tls_started()?;
    let handle = tls.execute(jid, features, stream).await?.into_handle();
    phases.on_tls_outcome(handle.is_some())?;

    let mut features = features.clone();
    if handle.is_some() {
        features = refresh_features(stream, timeout).await?;
        phases.on_features_received()?;
    }

    let mut last_auth_error = None;
    for provider in providers {
        match provider
            .execute(jid, &features, stream, handle.as_ref())
            .await
        {
            Ok(true) => {
                phases.on_authenticated()?;
                let features = refresh_features(stream, timeout).await?;
                phases.on_features_received()?;
                return Ok(NegotiationOutcome {
                    tls: handle,
                    features,
                });
            }
            Ok(false) => {
                tracing::debug!("{} provider not applicable", provider.name());
            }
            Err(err @ NegotiationError::Authentication { .. }) if !err.is_user_abort() => {
                tracing::warn!("{} provider failed: {}", provider.name(), err);
                last_auth_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_auth_error.unwrap_or_else(|| {
        NegotiationError::SaslUnavailable("no common mechanisms".to_string())
    }))
}

/// Reset the stream and wait at most `timeout` for fresh features.
pub async fn refresh_features(
    stream: &mut dyn XmlStream,
    timeout: Duration,
) -> NegotiationResult<StreamFeatures> {
    tokio::time::timeout(timeout, stream.reset_stream_and_get_features(timeout))
        .await
        .map_err(|_| NegotiationError::Timeout(timeout))?
}

/// A TLS negotiator bound to an ordered list of SASL providers.
#[derive(Clone)]
pub struct SecurityLayer {
    tls: Arc<dyn TlsNegotiator>,
    providers: Vec<Arc<dyn SaslProvider>>,
}

impl SecurityLayer {
    pub fn new(
        tls: Arc<dyn TlsNegotiator>,
        providers: Vec<Arc<dyn SaslProvider>>,
    ) -> NegotiationResult<Self> {
        if providers.is_empty() {
            return Err(NegotiationError::Configuration(
                "at least one SASL provider is required".to_string(),
            ));
        }
        Ok(Self { tls, providers })
    }

    /// STARTTLS and password authentication as configured.
    pub fn from_config(
        config: &NegotiationConfig,
        source: Arc<dyn CredentialSource>,
        registry: MechanismRegistry,
    ) -> NegotiationResult<Self> {
        config.validate()?;
        let tls = StartTlsProvider::new(config.tls.clone(), config.require_starttls);
        let password: Arc<dyn SaslProvider> = Arc::new(
            PasswordSaslProvider::new(source, registry)
                .with_max_attempts(config.max_auth_attempts)?,
        );
        Self::new(Arc::new(tls), vec![password])
    }

    pub fn providers(&self) -> &[Arc<dyn SaslProvider>] {
        &self.providers
    }

    pub async fn negotiate(
        &self,
        timeout: Duration,
        jid: &Jid,
        features: &StreamFeatures,
        stream: &mut dyn XmlStream,
    ) -> NegotiationResult<NegotiationOutcome> {
        negotiate_stream_security(
            self.tls.as_ref(),
            &self.providers,
            timeout,
            jid,
            features,
            stream,
        )
        .await
    }
}

/// Required STARTTLS followed by password authentication.
///
/// Fails with [`NegotiationError::Configuration`] if `max_attempts` is zero.
pub fn tls_with_password_based_authentication(
    source: Arc<dyn CredentialSource>,
    registry: MechanismRegistry,
    factory: impl TlsConfigFactory + 'static,
    max_attempts: u32,
) -> NegotiationResult<SecurityLayer> {
    let password: Arc<dyn SaslProvider> =
        Arc::new(PasswordSaslProvider::new(source, registry).with_max_attempts(max_attempts)?);
    SecurityLayer::new(Arc::new(StartTlsProvider::new(factory, true)), vec![password])
}
