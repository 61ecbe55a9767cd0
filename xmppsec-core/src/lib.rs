//! # xmppsec-core
//!
//! Core library for negotiating stream security (STARTTLS, then SASL) on an
//! XMPP-style XML stream.
//!
//! This crate provides the data model, the error taxonomy, the negotiation
//! phase automaton and the traits through which negotiation talks to the
//! stream, to SASL mechanisms and to credential sources.

pub mod credentials;
pub mod error;
pub mod features;
pub mod jid;
pub mod sasl;
pub mod state;
pub mod stream;

pub use credentials::{
    credential_fn, CredentialCache, CredentialProvider, CredentialRequest, CredentialSource,
    Credentials, Secret, StaticCredentials,
};
pub use error::{
    FailureClass, NegotiationError, NegotiationResult, SaslCondition, SaslFailure,
    ABORTED_BY_USER,
};
pub use features::StreamFeatures;
pub use jid::{Jid, JidParseError};
pub use sasl::{find_supported, MechanismRegistry, MechanismToken, SaslChannel, SaslMechanism, SaslStep};
pub use state::{NegotiationEvent, NegotiationPhase};
pub use stream::{Element, QName, TlsHandle, XmlStream, NS_SASL, NS_STARTTLS, NS_STREAMS};

/// Re-exported so stream implementations use the same TLS types.
pub use rustls;
