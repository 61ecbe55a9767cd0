//! Stand-in SASL mechanisms.
//!
//! They do no cryptography. Each fetches credentials once, sends `auth`
//! under the wire name chosen by `any_supported`, answers every challenge
//! with a fixed response and stops at success or failure. That is enough
//! to drive the negotiation logic against a [`ScriptedStream`](crate::ScriptedStream).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use xmppsec_core::{
    CredentialProvider, Credentials, MechanismToken, NegotiationResult, SaslChannel,
    SaslMechanism, SaslStep,
};

/// Mechanism double with a configurable set of wire names.
#[derive(Debug, Clone)]
pub struct ScriptedMechanism {
    family: String,
    wire_names: Vec<String>,
    requires_tls: bool,
    seen: Arc<Mutex<Vec<Credentials>>>,
}

impl ScriptedMechanism {
    pub fn new<I, S>(family: impl Into<String>, wire_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            family: family.into(),
            wire_names: wire_names.into_iter().map(Into::into).collect(),
            requires_tls: false,
            seen: Arc::default(),
        }
    }

    /// Challenge-response family, strongest variant first.
    pub fn scram() -> Self {
        Self::new("SCRAM", ["SCRAM-SHA-256", "SCRAM-SHA-1"])
    }

    /// Plaintext-equivalent; only offered over TLS.
    pub fn plain() -> Self {
        Self::new("PLAIN", ["PLAIN"]).tls_only()
    }

    pub fn external() -> Self {
        Self::new("EXTERNAL", ["EXTERNAL"])
    }

    pub fn tls_only(mut self) -> Self {
        self.requires_tls = true;
        self
    }

    /// Credentials obtained by every exchange so far, in order.
    pub fn credentials_seen(&self) -> Vec<Credentials> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SaslMechanism for ScriptedMechanism {
    fn name(&self) -> &str {
        &self.family
    }

    fn requires_tls(&self) -> bool {
        self.requires_tls
    }

    fn any_supported(&self, offered: &[String]) -> Option<MechanismToken> {
        self.wire_names
            .iter()
            .find(|name| offered.contains(name))
            .map(MechanismToken::new)
    }

    async fn authenticate(
        &self,
        channel: &mut dyn SaslChannel,
        token: &MechanismToken,
        credentials: &mut dyn CredentialProvider,
    ) -> NegotiationResult<()> {
        let creds = credentials.credentials().await?;
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(creds.clone());
        }

        let mut step = channel
            .initiate(token.name(), Some(creds.username.as_bytes()))
            .await?;
        loop {
            match step {
                SaslStep::Success(_) => return Ok(()),
                SaslStep::Challenge(_) => {
                    step = channel.respond(creds.secret.expose().as_bytes()).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuthReply, Expect, ScriptedStream};
    use xmppsec_core::{Secret, StaticCredentials};

    fn offered(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_strongest_offered_variant() {
        let scram = ScriptedMechanism::scram();
        let token = scram
            .any_supported(&offered(&["PLAIN", "SCRAM-SHA-1", "SCRAM-SHA-256"]))
            .unwrap();
        assert_eq!(token.name(), "SCRAM-SHA-256");
        assert!(scram.any_supported(&offered(&["PLAIN"])).is_none());
        assert!(ScriptedMechanism::plain().requires_tls());
    }

    #[tokio::test]
    async fn answers_challenges_until_success() {
        let scram = ScriptedMechanism::scram();
        let mut stream = ScriptedStream::new([
            Expect::auth("SCRAM-SHA-1", AuthReply::Challenge(b"r=nonce".to_vec())),
            Expect::Response(AuthReply::Challenge(b"v=sig".to_vec())),
            Expect::Response(AuthReply::Success),
        ]);
        let mut creds = StaticCredentials(Credentials {
            username: "alice".to_string(),
            secret: Secret::new("pw"),
        });

        scram
            .authenticate(&mut stream, &MechanismToken::new("SCRAM-SHA-1"), &mut creds)
            .await
            .unwrap();

        stream.assert_finished();
        assert_eq!(scram.credentials_seen().len(), 1);
    }
}
