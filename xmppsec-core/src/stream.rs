//! The XML stream as seen by the negotiation code.
//!
//! Framing and parsing live elsewhere; negotiation only needs to send a few
//! elements, wait for specific replies, upgrade the transport and reset the
//! stream. [`XmlStream`] is that contract.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;

use crate::error::NegotiationResult;
use crate::features::StreamFeatures;
use crate::sasl::SaslChannel;

/// STARTTLS namespace (RFC 6120, Section 5).
pub const NS_STARTTLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
/// SASL namespace (RFC 6120, Section 6).
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
/// Stream namespace.
pub const NS_STREAMS: &str = "http://etherx.jabber.org/streams";

/// Namespace-qualified element name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local)
    }
}

/// A minimal element tree, enough for negotiation nonzas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: Option<String>,
}

impl Element {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            name: QName::new(namespace, local),
            attrs: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Whether this element has the given qualified name.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.name.namespace == namespace && self.name.local == local
    }

    /// First child with the given qualified name.
    pub fn child(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(namespace, local))
    }

    /// All children with the given qualified name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(namespace, local))
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An active TLS session on the stream.
///
/// Once a negotiation run holds a handle, TLS stays on for the rest of the
/// run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsHandle {
    /// Name the server certificate was verified against.
    pub server_name: String,
    /// Negotiated protocol version, e.g. `TLSv1_3`.
    pub protocol_version: Option<String>,
    /// Negotiated cipher suite, e.g. `TLS13_AES_128_GCM_SHA256`.
    pub cipher_suite: Option<String>,
    /// Length of the certificate chain the server presented.
    pub peer_certificates: usize,
    /// Whether a client certificate was available for the handshake.
    pub client_certificate: bool,
}

impl TlsHandle {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            protocol_version: None,
            cipher_suite: None,
            peer_certificates: 0,
            client_certificate: false,
        }
    }

    pub fn with_client_certificate(mut self) -> Self {
        self.client_certificate = true;
        self
    }
}

/// The stream collaborator used during negotiation.
///
/// A negotiation holds `&mut` access for its whole run; there is never more
/// than one negotiation per stream.
#[async_trait::async_trait]
pub trait XmlStream: Send {
    /// Send `outbound` and wait until an element matching one of `expected`
    /// arrives.
    async fn send_and_wait_for(
        &mut self,
        outbound: Vec<Element>,
        expected: &[QName],
    ) -> NegotiationResult<Element>;

    /// Whether the underlying transport can be upgraded to TLS in place.
    fn supports_starttls(&self) -> bool;

    /// Upgrade the transport to TLS, verifying the peer against
    /// `server_name`. No data may be read through the old transport after
    /// this starts.
    async fn starttls(
        &mut self,
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
    ) -> NegotiationResult<TlsHandle>;

    /// Restart the stream and wait at most `timeout` for the new features.
    async fn reset_stream_and_get_features(
        &mut self,
        timeout: Duration,
    ) -> NegotiationResult<StreamFeatures>;

    /// Channel for SASL challenge/response exchanges on this stream.
    fn sasl_channel(&mut self) -> &mut dyn SaslChannel;
}
