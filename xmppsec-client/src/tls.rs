//! TLS client configuration for STARTTLS.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use xmppsec_core::{NegotiationError, NegotiationResult};

/// Produces a fresh TLS client configuration for each upgrade.
pub trait TlsConfigFactory: Send + Sync {
    fn build(&self) -> NegotiationResult<Arc<rustls::ClientConfig>>;
}

impl<F> TlsConfigFactory for F
where
    F: Fn() -> NegotiationResult<Arc<rustls::ClientConfig>> + Send + Sync,
{
    fn build(&self) -> NegotiationResult<Arc<rustls::ClientConfig>> {
        self()
    }
}

/// Always hands out the same prebuilt configuration.
#[derive(Debug, Clone)]
pub struct FixedTlsConfig(pub Arc<rustls::ClientConfig>);

impl TlsConfigFactory for FixedTlsConfig {
    fn build(&self) -> NegotiationResult<Arc<rustls::ClientConfig>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Errors loading TLS material from disk.
#[derive(Debug, Error)]
pub enum TlsMaterialError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("invalid CA certificate in {}: {source}", .path.display())]
    InvalidCa {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("invalid client certificate: {0}")]
    InvalidClientCert(#[source] rustls::Error),
}

impl From<TlsMaterialError> for NegotiationError {
    fn from(err: TlsMaterialError) -> Self {
        NegotiationError::Configuration(err.to_string())
    }
}

/// Client certificate used for SASL EXTERNAL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Path to certificate chain (PEM).
    pub cert_path: PathBuf,
    /// Path to private key (PEM).
    pub key_path: PathBuf,
}

/// File-based TLS settings.
///
/// Without a CA bundle the root store is empty, so every server
/// certificate fails verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// CA bundle (PEM) trusted for server certificates.
    pub ca_path: Option<PathBuf>,
    /// Client certificate, if any.
    pub client_identity: Option<ClientIdentity>,
}

impl TlsSettings {
    /// Trust the CA certificates in `path`.
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    /// Present the given client certificate.
    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_identity = Some(ClientIdentity {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    fn client_config(&self) -> Result<rustls::ClientConfig, TlsMaterialError> {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(path) = &self.ca_path {
            for cert in load_certs(path)? {
                roots
                    .add(cert)
                    .map_err(|source| TlsMaterialError::InvalidCa {
                        path: path.clone(),
                        source,
                    })?;
            }
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        match &self.client_identity {
            Some(identity) => {
                let chain = load_certs(&identity.cert_path)?;
                let key = load_key(&identity.key_path)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(TlsMaterialError::InvalidClientCert)
            }
            None => Ok(builder.with_no_client_auth()),
        }
    }
}

impl TlsConfigFactory for TlsSettings {
    fn build(&self) -> NegotiationResult<Arc<rustls::ClientConfig>> {
        Ok(Arc::new(self.client_config()?))
    }
}

/// Default configuration: TLS 1.2+ with an empty root store.
pub fn default_tls_config() -> NegotiationResult<Arc<rustls::ClientConfig>> {
    TlsSettings::default().build()
}

fn open(path: &Path) -> Result<BufReader<File>, TlsMaterialError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsMaterialError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsMaterialError> {
    rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsMaterialError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsMaterialError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsMaterialError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsMaterialError::NoPrivateKey(path.to_path_buf()))
}
