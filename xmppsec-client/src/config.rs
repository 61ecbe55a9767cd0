//! Negotiation configuration.

use std::time::Duration;

use xmppsec_core::{NegotiationError, NegotiationResult};

use crate::tls::TlsSettings;

/// Stream security negotiation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// Upper bound for each wait on fresh stream features.
    pub negotiation_timeout: Duration,
    /// Fail unless STARTTLS succeeds.
    pub require_starttls: bool,
    /// Password prompts per SASL mechanism.
    pub max_auth_attempts: u32,
    /// TLS material.
    pub tls: TlsSettings,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(60),
            require_starttls: true,
            max_auth_attempts: 3,
            tls: TlsSettings::default(),
        }
    }
}

impl NegotiationConfig {
    /// Set the feature refresh timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Continue without TLS if the peer or transport cannot do STARTTLS.
    pub fn optional_starttls(mut self) -> Self {
        self.require_starttls = false;
        self
    }

    /// Set the number of password prompts per mechanism.
    pub fn with_max_auth_attempts(mut self, attempts: u32) -> Self {
        self.max_auth_attempts = attempts;
        self
    }

    /// Set TLS material.
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Check the values a negotiation cannot run with.
    pub fn validate(&self) -> NegotiationResult<()> {
        if self.max_auth_attempts == 0 {
            return Err(NegotiationError::Configuration(
                "max_auth_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
