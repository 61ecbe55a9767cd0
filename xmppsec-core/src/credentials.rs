//! Credential retrieval for SASL mechanisms.
//!
//! A [`CredentialSource`] is whatever asks the user (or a keyring) for a
//! password. Mechanisms never see the source directly: they get a
//! [`CredentialProvider`], which for password providers is a
//! [`CredentialRequest`] bound to one attempt and to the [`CredentialCache`]
//! of the attempt loop.

use crate::error::{NegotiationError, NegotiationResult};
use crate::jid::Jid;

/// A password. `Debug` does not print the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Source of passwords.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    /// Return the password for `jid` on attempt `attempt` (0-indexed), or
    /// `None` to abort authentication.
    async fn password(&self, jid: &Jid, attempt: u32) -> NegotiationResult<Option<Secret>>;
}

/// A [`CredentialSource`] backed by a plain closure.
pub struct FnCredentialSource<F>(F);

/// Wrap a closure as a [`CredentialSource`].
pub fn credential_fn<F>(f: F) -> FnCredentialSource<F>
where
    F: Fn(&Jid, u32) -> Option<Secret> + Send + Sync,
{
    FnCredentialSource(f)
}

#[async_trait::async_trait]
impl<F> CredentialSource for FnCredentialSource<F>
where
    F: Fn(&Jid, u32) -> Option<Secret> + Send + Sync,
{
    async fn password(&self, jid: &Jid, attempt: u32) -> NegotiationResult<Option<Secret>> {
        Ok((self.0)(jid, attempt))
    }
}

/// Credentials handed to a mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

/// What a mechanism calls to obtain credentials during its exchange.
#[async_trait::async_trait]
pub trait CredentialProvider: Send {
    async fn credentials(&mut self) -> NegotiationResult<Credentials>;
}

/// Scratch state of one attempt loop.
#[derive(Debug, Default)]
pub struct CredentialCache {
    cached: Option<Secret>,
    abort_latched: bool,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self) -> Option<&Secret> {
        self.cached.as_ref()
    }

    /// Whether the source signalled abort at some point.
    pub fn abort_latched(&self) -> bool {
        self.abort_latched
    }

    pub fn store(&mut self, secret: Secret) {
        self.cached = Some(secret);
    }

    /// Forget the cached password so the next attempt prompts again.
    /// The abort latch stays set.
    pub fn clear(&mut self) {
        self.cached = None;
    }

    pub fn latch_abort(&mut self) {
        self.abort_latched = true;
    }
}

/// Credential lookup for a single attempt.
pub struct CredentialRequest<'a> {
    source: &'a dyn CredentialSource,
    jid: &'a Jid,
    attempt: u32,
    cache: &'a mut CredentialCache,
}

impl<'a> CredentialRequest<'a> {
    /// `jid` should be bare; its localpart becomes the username.
    pub fn new(
        source: &'a dyn CredentialSource,
        jid: &'a Jid,
        attempt: u32,
        cache: &'a mut CredentialCache,
    ) -> Self {
        Self {
            source,
            jid,
            attempt,
            cache,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn username(&self) -> String {
        self.jid.localpart().unwrap_or_default().to_string()
    }
}

#[async_trait::async_trait]
impl CredentialProvider for CredentialRequest<'_> {
    async fn credentials(&mut self) -> NegotiationResult<Credentials> {
        if let Some(secret) = self.cache.cached() {
            return Ok(Credentials {
                username: self.username(),
                secret: secret.clone(),
            });
        }

        match self.source.password(self.jid, self.attempt).await? {
            Some(secret) => {
                self.cache.store(secret.clone());
                Ok(Credentials {
                    username: self.username(),
                    secret,
                })
            }
            None => {
                self.cache.latch_abort();
                Err(NegotiationError::aborted_by_user())
            }
        }
    }
}

/// Fixed credentials, for mechanisms that need no password (EXTERNAL).
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&mut self) -> NegotiationResult<Credentials> {
        Ok(self.0.clone())
    }
}
