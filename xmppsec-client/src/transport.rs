//! TCP transport that can be upgraded to TLS in place.

use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use xmppsec_core::{NegotiationError, NegotiationResult, TlsHandle};

/// Byte transport underneath an XML stream.
///
/// Starts out as plain TCP. [`TlsTransport::starttls`] consumes the TCP
/// stream; if the handshake fails the transport is left poisoned and every
/// read or write fails.
pub enum TlsTransport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Poisoned,
}

impl TlsTransport {
    /// Connect to server.
    pub async fn connect(addr: impl ToSocketAddrs) -> NegotiationResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NegotiationError::Transport(format!("Connection failed: {}", e)))?;
        Ok(Self::Plain(stream))
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        Self::Plain(stream)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub fn is_poisoned(&self) -> bool {
        matches!(self, Self::Poisoned)
    }

    /// Only a plain TCP transport can be upgraded.
    pub fn supports_starttls(&self) -> bool {
        matches!(self, Self::Plain(_))
    }

    /// Run the TLS handshake over the current TCP stream.
    pub async fn starttls(
        &mut self,
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
    ) -> NegotiationResult<TlsHandle> {
        let tcp = match mem::replace(self, Self::Poisoned) {
            Self::Plain(tcp) => tcp,
            other => {
                let state = if other.is_tls() { "TLS" } else { "poisoned" };
                *self = other;
                return Err(NegotiationError::Transport(format!(
                    "cannot start TLS on a {} transport",
                    state
                )));
            }
        };

        let name = server_name.to_str().into_owned();
        let client_certificate = config.client_auth_cert_resolver.has_certs();

        let tls = TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(|e| {
                NegotiationError::tls_caused_by(format!("TLS handshake with {} failed", name), e)
            })?;

        let (_, session) = tls.get_ref();
        let handle = TlsHandle {
            server_name: name,
            protocol_version: session.protocol_version().map(|v| format!("{:?}", v)),
            cipher_suite: session
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite())),
            peer_certificates: session.peer_certificates().map_or(0, |certs| certs.len()),
            client_certificate,
        };
        tracing::debug!("TLS session with {}: {:?}", handle.server_name, handle.protocol_version);

        *self = Self::Tls(Box::new(tls));
        Ok(handle)
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport poisoned by failed TLS upgrade")
}

impl AsyncRead for TlsTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
            Self::Poisoned => Poll::Ready(Err(poisoned())),
        }
    }
}

impl AsyncWrite for TlsTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
            Self::Poisoned => Poll::Ready(Err(poisoned())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
            Self::Poisoned => Poll::Ready(Err(poisoned())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
            Self::Poisoned => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    fn localhost_identity() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        (cert.der().clone(), key)
    }

    fn acceptor(cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> TlsAcceptor {
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }

    fn trusting(cert: CertificateDer<'static>) -> Arc<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert).unwrap();
        Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }

    fn server_name(name: &str) -> ServerName<'static> {
        ServerName::try_from(name.to_string()).unwrap()
    }

    #[tokio::test]
    async fn upgrade_in_place() {
        let (cert, key) = localhost_identity();
        let acceptor = acceptor(cert.clone(), key);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 8];
            tcp.read_exact(&mut request).await.unwrap();
            assert_eq!(&request, b"starttls");
            tcp.write_all(b"proceed").await.unwrap();

            let mut tls = acceptor.accept(tcp).await.unwrap();
            let mut ping = [0u8; 4];
            tls.read_exact(&mut ping).await.unwrap();
            tls.write_all(b"pong").await.unwrap();
            tls.flush().await.unwrap();
        });

        let mut transport = TlsTransport::connect(addr).await.unwrap();
        assert!(transport.supports_starttls());
        transport.write_all(b"starttls").await.unwrap();
        let mut reply = [0u8; 7];
        transport.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"proceed");

        let handle = transport
            .starttls(trusting(cert.clone()), server_name("localhost"))
            .await
            .unwrap();
        assert!(transport.is_tls());
        assert!(!transport.supports_starttls());
        assert_eq!(handle.server_name, "localhost");
        assert!(handle.protocol_version.is_some());
        assert!(handle.cipher_suite.is_some());
        assert_eq!(handle.peer_certificates, 1);
        assert!(!handle.client_certificate);

        transport.write_all(b"ping").await.unwrap();
        let mut pong = [0u8; 4];
        transport.read_exact(&mut pong).await.unwrap();
        assert_eq!(&pong, b"pong");

        let err = transport
            .starttls(trusting(cert), server_name("localhost"))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Transport(_)));
        assert!(transport.is_tls());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn failed_handshake_poisons() {
        let (cert, _) = localhost_identity();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let _ = tcp.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let mut transport = TlsTransport::connect(addr).await.unwrap();
        let err = transport
            .starttls(trusting(cert), server_name("localhost"))
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::Tls { .. }));
        assert!(transport.is_poisoned());
        assert!(!transport.supports_starttls());

        let read = transport.read(&mut [0u8; 1]).await.unwrap_err();
        assert_eq!(read.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn certificate_name_mismatch() {
        let (cert, key) = localhost_identity();
        let acceptor = acceptor(cert.clone(), key);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ = acceptor.accept(tcp).await;
        });

        let mut transport = TlsTransport::connect(addr).await.unwrap();
        let err = transport
            .starttls(trusting(cert), server_name("example.org"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("example.org"));
        assert!(transport.is_poisoned());
    }
}
