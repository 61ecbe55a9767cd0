//! STARTTLS negotiation.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use xmppsec_core::{
    Element, Jid, NegotiationError, NegotiationResult, QName, StreamFeatures, TlsHandle,
    XmlStream, NS_STARTTLS,
};

use crate::tls::TlsConfigFactory;

/// Result of the TLS phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsOutcome {
    /// TLS is active on the stream.
    Established(TlsHandle),
    /// TLS was not negotiated and is not required.
    Skipped,
}

impl TlsOutcome {
    pub fn into_handle(self) -> Option<TlsHandle> {
        match self {
            Self::Established(handle) => Some(handle),
            Self::Skipped => None,
        }
    }
}

/// Transport layer security negotiation.
#[async_trait]
pub trait TlsNegotiator: Send + Sync {
    async fn execute(
        &self,
        jid: &Jid,
        features: &StreamFeatures,
        stream: &mut dyn XmlStream,
    ) -> NegotiationResult<TlsOutcome>;
}

/// Negotiates STARTTLS on an existing stream.
///
/// With `required == false` negotiation may continue in plaintext if
/// STARTTLS is unavailable or refused before it started. Once the peer has
/// answered `proceed` there is no way back: any upgrade error is fatal.
pub struct StartTlsProvider {
    factory: Arc<dyn TlsConfigFactory>,
    required: bool,
}

impl StartTlsProvider {
    pub fn new(factory: impl TlsConfigFactory + 'static, required: bool) -> Self {
        Self {
            factory: Arc::new(factory),
            required,
        }
    }

    pub fn required(&self) -> bool {
        self.required
    }

    fn fail_if_required(&self, reason: &str) -> NegotiationResult<TlsOutcome> {
        if self.required {
            return Err(NegotiationError::tls(reason));
        }
        tracing::warn!("{}, continuing without TLS", reason);
        Ok(TlsOutcome::Skipped)
    }

    async fn upgrade(&self, jid: &Jid, stream: &mut dyn XmlStream) -> NegotiationResult<TlsHandle> {
        let config = self
            .factory
            .build()
            .map_err(|e| NegotiationError::tls_caused_by("no usable TLS configuration", e))?;

        let server_name = ServerName::try_from(jid.domainpart().to_string()).map_err(|e| {
            NegotiationError::tls_caused_by(
                format!("invalid server name {}", jid.domainpart()),
                e,
            )
        })?;

        stream
            .starttls(config, server_name)
            .await
            .map_err(|e| match e {
                NegotiationError::Tls { .. } => e,
                other => NegotiationError::tls_caused_by("TLS connection failed", other),
            })
    }
}

#[async_trait]
impl TlsNegotiator for StartTlsProvider {
    async fn execute(
        &self,
        jid: &Jid,
        features: &StreamFeatures,
        stream: &mut dyn XmlStream,
    ) -> NegotiationResult<TlsOutcome> {
        if !features.supports_starttls() {
            return self.fail_if_required("STARTTLS not supported by peer");
        }

        if !stream.supports_starttls() {
            return self.fail_if_required("STARTTLS not supported by us");
        }

        let reply = stream
            .send_and_wait_for(
                vec![Element::new(NS_STARTTLS, "starttls")],
                &[
                    QName::new(NS_STARTTLS, "proceed"),
                    QName::new(NS_STARTTLS, "failure"),
                ],
            )
            .await?;

        if !reply.is(NS_STARTTLS, "proceed") {
            return self.fail_if_required("STARTTLS failed on remote side");
        }

        tracing::info!("engaging STARTTLS with {}", jid.domainpart());
        match self.upgrade(jid, stream).await {
            Ok(handle) => {
                tracing::debug!(
                    "TLS established: {:?} {:?}",
                    handle.protocol_version,
                    handle.cipher_suite
                );
                Ok(TlsOutcome::Established(handle))
            }
            Err(e) => {
                tracing::error!("STARTTLS failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::TlsSettings;
    use std::error::Error as _;
    use xmppsec_testkit::{Action, Expect, ScriptedStream, StartTlsReply};

    fn jid() -> Jid {
        "alice@example.org/laptop".parse().unwrap()
    }

    fn provider(required: bool) -> StartTlsProvider {
        StartTlsProvider::new(TlsSettings::default(), required)
    }

    fn tls_features() -> StreamFeatures {
        StreamFeatures::new().with_starttls(false)
    }

    fn tls_reason(err: &NegotiationError) -> &str {
        match err {
            NegotiationError::Tls { reason, .. } => reason,
            other => panic!("expected TLS failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn peer_without_starttls() {
        let mut stream = ScriptedStream::new(Vec::new());
        let features = StreamFeatures::new().with_mechanisms(["PLAIN"]);

        let err = provider(true)
            .execute(&jid(), &features, &mut stream)
            .await
            .unwrap_err();
        assert_eq!(tls_reason(&err), "STARTTLS not supported by peer");

        let outcome = provider(false)
            .execute(&jid(), &features, &mut stream)
            .await
            .unwrap();
        assert_eq!(outcome, TlsOutcome::Skipped);
        assert!(stream.actions().is_empty());
    }

    #[tokio::test]
    async fn transport_without_starttls() {
        let mut stream = ScriptedStream::new(Vec::new()).without_starttls_support();

        let err = provider(true)
            .execute(&jid(), &tls_features(), &mut stream)
            .await
            .unwrap_err();
        assert_eq!(tls_reason(&err), "STARTTLS not supported by us");

        let outcome = provider(false)
            .execute(&jid(), &tls_features(), &mut stream)
            .await
            .unwrap();
        assert_eq!(outcome, TlsOutcome::Skipped);
        assert!(stream.actions().is_empty());
    }

    #[tokio::test]
    async fn remote_failure_required() {
        let mut stream = ScriptedStream::new([Expect::StartTls(StartTlsReply::Failure)]);
        let err = provider(true)
            .execute(&jid(), &tls_features(), &mut stream)
            .await
            .unwrap_err();
        assert_eq!(tls_reason(&err), "STARTTLS failed on remote side");
        stream.assert_finished();
    }

    #[tokio::test]
    async fn remote_failure_optional() {
        let mut stream = ScriptedStream::new([Expect::StartTls(StartTlsReply::Failure)]);
        let outcome = provider(false)
            .execute(&jid(), &tls_features(), &mut stream)
            .await
            .unwrap();
        assert_eq!(outcome, TlsOutcome::Skipped);
        assert_eq!(
            stream.actions(),
            &[Action::Sent(vec![QName::new(NS_STARTTLS, "starttls")])]
        );
    }

    #[tokio::test]
    async fn proceed_upgrades_against_domain() {
        let mut stream = ScriptedStream::new([
            Expect::StartTls(StartTlsReply::Proceed),
            Expect::upgrade("example.org"),
        ]);
        let outcome = provider(true)
            .execute(&jid(), &tls_features(), &mut stream)
            .await
            .unwrap();

        let handle = outcome.into_handle().unwrap();
        assert_eq!(handle.server_name, "example.org");
        assert_eq!(
            stream.actions()[1],
            Action::Upgraded {
                server_name: "example.org".to_string()
            }
        );
        stream.assert_finished();
    }

    #[tokio::test]
    async fn upgrade_failure_is_fatal_even_when_optional() {
        let mut stream = ScriptedStream::new([
            Expect::StartTls(StartTlsReply::Proceed),
            Expect::Upgrade(Err("certificate not valid for name".to_string())),
        ]);
        let err = provider(false)
            .execute(&jid(), &tls_features(), &mut stream)
            .await
            .unwrap_err();

        assert_eq!(tls_reason(&err), "TLS connection failed");
        assert_eq!(
            err.source().map(|cause| cause.to_string()),
            Some("transport error: certificate not valid for name".to_string())
        );
        stream.assert_finished();
    }

    /// Stream whose upgrade fails the way `TlsTransport` does.
    struct FailingHandshake(ScriptedStream);

    #[async_trait]
    impl XmlStream for FailingHandshake {
        async fn send_and_wait_for(
            &mut self,
            outbound: Vec<Element>,
            expected: &[QName],
        ) -> NegotiationResult<Element> {
            self.0.send_and_wait_for(outbound, expected).await
        }

        fn supports_starttls(&self) -> bool {
            true
        }

        async fn starttls(
            &mut self,
            _config: Arc<rustls::ClientConfig>,
            server_name: ServerName<'static>,
        ) -> NegotiationResult<TlsHandle> {
            Err(NegotiationError::tls(format!(
                "TLS handshake with {} failed",
                server_name.to_str()
            )))
        }

        async fn reset_stream_and_get_features(
            &mut self,
            timeout: std::time::Duration,
        ) -> NegotiationResult<StreamFeatures> {
            self.0.reset_stream_and_get_features(timeout).await
        }

        fn sasl_channel(&mut self) -> &mut dyn xmppsec_core::SaslChannel {
            self.0.sasl_channel()
        }
    }

    #[tokio::test]
    async fn tls_errors_from_the_stream_are_not_wrapped_again() {
        let mut stream =
            FailingHandshake(ScriptedStream::new([Expect::StartTls(StartTlsReply::Proceed)]));
        let err = provider(false)
            .execute(&jid(), &tls_features(), &mut stream)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "TLS failure: TLS handshake with example.org failed");
        assert!(err.source().is_none());
        stream.0.assert_finished();
    }

    #[tokio::test]
    async fn invalid_server_name_is_fatal() {
        let mut stream = ScriptedStream::new([Expect::StartTls(StartTlsReply::Proceed)]);
        let jid: Jid = "alice@not a host".parse().unwrap();
        let err = provider(false)
            .execute(&jid, &tls_features(), &mut stream)
            .await
            .unwrap_err();

        assert!(tls_reason(&err).starts_with("invalid server name"));
        stream.assert_finished();
    }

    #[tokio::test]
    async fn broken_tls_config_is_fatal_after_proceed() {
        let mut stream = ScriptedStream::new([Expect::StartTls(StartTlsReply::Proceed)]);
        let provider = StartTlsProvider::new(
            TlsSettings::default().with_ca_file("/nonexistent/xmppsec/ca.pem"),
            false,
        );
        let err = provider
            .execute(&jid(), &tls_features(), &mut stream)
            .await
            .unwrap_err();
        assert_eq!(tls_reason(&err), "no usable TLS configuration");
    }
}
