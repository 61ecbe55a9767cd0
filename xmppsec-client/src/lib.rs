//! xmppsec client - STARTTLS and SASL negotiation for XML streams.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use xmppsec_client::{tls_with_password_based_authentication, TlsSettings};
//! use xmppsec_core::{credential_fn, Jid, MechanismRegistry, Secret, StreamFeatures, XmlStream};
//!
//! async fn secure(
//!     stream: &mut dyn XmlStream,
//!     features: &StreamFeatures,
//!     registry: MechanismRegistry,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let jid: Jid = "alice@example.org/laptop".parse()?;
//!     let source = Arc::new(credential_fn(|_, _| Some(Secret::new("hunter2"))));
//!     let layer = tls_with_password_based_authentication(
//!         source,
//!         registry,
//!         TlsSettings::default().with_ca_file("/etc/ssl/certs/ca-certificates.crt"),
//!         3,
//!     )?;
//!
//!     let outcome = layer
//!         .negotiate(Duration::from_secs(60), &jid, features, stream)
//!         .await?;
//!     println!("TLS: {:?}", outcome.tls);
//!
//!     Ok(())
//! }
//! ```

mod config;
mod negotiate;
mod sasl;
mod starttls;
mod state_machine;
mod tls;
mod transport;

pub use config::NegotiationConfig;
pub use negotiate::{
    negotiate_stream_security, refresh_features, tls_with_password_based_authentication,
    NegotiationOutcome, SecurityLayer,
};
pub use sasl::{ExternalSaslProvider, PasswordSaslProvider, SaslProvider, DEFAULT_MAX_ATTEMPTS};
pub use starttls::{StartTlsProvider, TlsNegotiator, TlsOutcome};
pub use state_machine::NegotiationStateMachine;
pub use tls::{
    default_tls_config, ClientIdentity, FixedTlsConfig, TlsConfigFactory, TlsMaterialError,
    TlsSettings,
};
pub use transport::TlsTransport;
