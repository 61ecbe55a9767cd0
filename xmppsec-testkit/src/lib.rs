//! Test doubles for stream security negotiation.
//!
//! - [`ScriptedStream`]: an [`XmlStream`](xmppsec_core::XmlStream) that
//!   follows a script of expected actions and peer replies
//! - [`ScriptedMechanism`]: SASL mechanism stand-in
//! - [`RecordingCredentialSource`]: credential source that records calls
//! - [`init_tracing`]: log output for tests

mod credentials;
mod mechanism;
mod stream;

pub use credentials::RecordingCredentialSource;
pub use mechanism::ScriptedMechanism;
pub use stream::{Action, AuthReply, Expect, ResetReply, ScriptedStream, StartTlsReply};

use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber. `RUST_LOG` overrides the
/// default `debug` level. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
    tracing::trace!("test tracing initialised");
}
