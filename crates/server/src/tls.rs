// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! TLS termination for the proxy listener.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::Router;
use der::Decode;
use hyper::server::conn::Http;
use rustls::{Certificate, PrivateKey, ServerConfig};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use zeroize::Zeroizing;

/// The proxy's certificate chain and private key.
#[derive(Clone)]
pub struct Identity {
    certs: Vec<Vec<u8>>,
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("certs", &self.certs.len())
            .finish_non_exhaustive()
    }
}

impl Identity {
    pub fn load(crt: impl AsRef<Path>, key: impl AsRef<Path>) -> anyhow::Result<Self> {
        let crt = crt.as_ref();
        let key = key.as_ref();

        // Load the crt file.
        let crt = std::io::BufReader::new(
            std::fs::File::open(crt)
                .with_context(|| format!("failed to open {}", crt.display()))?,
        );

        // Load the key file.
        let key = std::io::BufReader::new(
            std::fs::File::open(key)
                .with_context(|| format!("failed to open {}", key.display()))?,
        );

        Self::read(crt, key)
    }

    pub fn read(mut crt: impl BufRead, mut key: impl BufRead) -> anyhow::Result<Self> {
        let certs = rustls_pemfile::certs(&mut crt).context("failed to read certificate file")?;
        if certs.is_empty() {
            return Err(anyhow!("invalid certificate file"));
        }

        let key = loop {
            match rustls_pemfile::read_one(&mut key).context("failed to read key file")? {
                Some(rustls_pemfile::Item::PKCS8Key(buf))
                | Some(rustls_pemfile::Item::ECKey(buf))
                | Some(rustls_pemfile::Item::RSAKey(buf)) => break Zeroizing::new(buf),
                Some(_) => continue,
                None => return Err(anyhow!("invalid key file")),
            }
        };

        // Validate the syntax of the certificates.
        for crt in certs.iter() {
            x509::Certificate::from_der(crt).context("invalid certificate file")?;
        }

        Ok(Self { certs, key })
    }

    /// Builds a TLS 1.3 only acceptor.
    pub fn acceptor(&self) -> anyhow::Result<TlsAcceptor> {
        let certs = self.certs.iter().cloned().map(Certificate).collect();
        let mut config = ServerConfig::builder()
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(certs, PrivateKey(self.key.to_vec()))
            .context("certificate and key do not form a usable TLS identity")?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub handshake: Duration,
    pub header_read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            header_read: Duration::from_secs(1),
        }
    }
}

/// Consecutive `accept` failures on the proxy listener.
#[derive(Debug, Default)]
struct AcceptErrors(u32);

impl AcceptErrors {
    const LIMIT: u32 = 5;
    const BACKOFF: Duration = Duration::from_secs(1);

    /// Returns how long to pause before accepting again, or an error once
    /// the listener is unusable or has failed `LIMIT` times in a row.
    fn record(&mut self, e: std::io::Error) -> anyhow::Result<Option<Duration>> {
        use std::io::ErrorKind::*;

        match e.kind() {
            // The peer gave up before we got to it.
            ConnectionAborted | ConnectionReset | ConnectionRefused => {
                debug!("connection dropped before accept: {e}");
                return Ok(None);
            }
            InvalidInput => return Err(anyhow::Error::new(e).context("proxy listener unusable")),
            _ => (),
        }

        self.0 += 1;
        if self.0 >= Self::LIMIT {
            return Err(anyhow::Error::new(e)
                .context(format!("proxy listener failed {} times in a row", self.0)));
        }

        // Mostly fd or buffer exhaustion; give in-flight requests time to free some.
        warn!(failures = self.0, "failed to accept connection: {e}");
        Ok(Some(Self::BACKOFF))
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Accepts TLS connections and serves `app` on each until `shutdown` fires.
///
/// On shutdown the listener is closed at once, connections still in their
/// handshake are dropped, and open connections are told to finish their
/// current request. The function returns when all of them have.
///
/// A listener that keeps failing cancels `shutdown` itself, drains, and
/// returns the error.
pub async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: CancellationToken,
    timeouts: Timeouts,
) -> anyhow::Result<()> {
    let mut http = Http::new();
    http.http1_only(true)
        .http1_header_read_timeout(timeouts.header_read);

    let mut errors = AcceptErrors::default();
    let mut conns = JoinSet::new();
    let result = loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break Ok(()),
            Some(_) = conns.join_next(), if !conns.is_empty() => continue,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => {
                    errors.reset();
                    accepted
                }
                Err(e) => match errors.record(e) {
                    Ok(None) => continue,
                    Ok(Some(pause)) => {
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break Ok(()),
                            _ = tokio::time::sleep(pause) => continue,
                        }
                    }
                    Err(e) => {
                        error!("{e:#}");
                        shutdown.cancel();
                        break Err(e);
                    }
                },
            },
        };

        let acceptor = acceptor.clone();
        let http = http.clone();
        let svc = app.clone();
        let shutdown = shutdown.clone();
        conns.spawn(
            async move {
                let handshake = timeout(timeouts.handshake, acceptor.accept(stream));
                let stream = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("shutdown during TLS handshake");
                        return;
                    }
                    done = handshake => match done {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(e)) => {
                            debug!("TLS handshake failed: {e}");
                            return;
                        }
                        Err(_) => {
                            debug!("TLS handshake timed out");
                            return;
                        }
                    },
                };

                let conn = http.serve_connection(stream, svc);
                tokio::pin!(conn);
                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(e) = result {
                    debug!("connection error: {e}");
                }
            }
            .instrument(tracing::debug_span!("connection", %peer)),
        );
    };

    drop(listener);
    info!(open = conns.len(), "proxy draining connections");
    while conns.join_next().await.is_some() {}
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::init;

    use std::io::ErrorKind;

    use attestation::testing::TlsIdentity;
    use rstest::rstest;
    use tokio::io::AsyncReadExt;

    #[test]
    fn reads_rcgen_identity() {
        let id = TlsIdentity::generate("localhost");
        let identity = Identity::read(id.cert_pem.as_bytes(), id.key_pem.as_bytes()).unwrap();
        assert!(identity.acceptor().is_ok());
    }

    #[test]
    fn rejects_missing_key() {
        let id = TlsIdentity::generate("localhost");
        let err = Identity::read(id.cert_pem.as_bytes(), id.cert_pem.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("invalid key file"));
    }

    #[test]
    fn rejects_missing_certificate() {
        let id = TlsIdentity::generate("localhost");
        let err = Identity::read(id.key_pem.as_bytes(), id.key_pem.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("invalid certificate file"));
    }

    fn acceptor() -> TlsAcceptor {
        let id = TlsIdentity::generate("localhost");
        Identity::read(id.cert_pem.as_bytes(), id.key_pem.as_bytes())
            .unwrap()
            .acceptor()
            .unwrap()
    }

    fn patient() -> Timeouts {
        Timeouts {
            handshake: Duration::from_secs(30),
            header_read: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn waiting_connections_are_not_accepted_after_shutdown() {
        init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut waiting = Vec::new();
        for _ in 0..16 {
            waiting.push(tokio::net::TcpStream::connect(addr).await.unwrap());
        }

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let served = timeout(
            Duration::from_secs(2),
            serve(listener, acceptor(), Router::new(), shutdown, patient()),
        )
        .await;
        assert!(matches!(served, Ok(Ok(()))));

        // The listener is gone, so nobody ever answers the waiting clients.
        for mut stream in waiting {
            let mut buf = [0u8; 1];
            let read = timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
            assert!(!matches!(read, Ok(Ok(n)) if n > 0));
        }
    }

    #[tokio::test]
    async fn shutdown_interrupts_handshakes() {
        init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(serve(
            listener,
            acceptor(),
            Router::new(),
            shutdown.clone(),
            patient(),
        ));

        // Connects but never starts a TLS handshake.
        let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown.cancel();
        let served = timeout(Duration::from_secs(2), server).await;
        assert!(matches!(served, Ok(Ok(Ok(())))));
    }

    #[rstest]
    #[case(ErrorKind::ConnectionAborted)]
    #[case(ErrorKind::ConnectionReset)]
    fn dropped_peers_are_skipped(#[case] kind: ErrorKind) {
        let mut errors = AcceptErrors::default();
        for _ in 0..2 * AcceptErrors::LIMIT {
            assert_eq!(errors.record(kind.into()).unwrap(), None);
        }
    }

    #[test]
    fn exhaustion_backs_off_then_fails() {
        // EMFILE on Linux.
        let emfile = || std::io::Error::from_raw_os_error(24);

        let mut errors = AcceptErrors::default();
        for _ in 1..AcceptErrors::LIMIT {
            assert_eq!(
                errors.record(emfile()).unwrap(),
                Some(AcceptErrors::BACKOFF)
            );
        }
        let err = errors.record(emfile()).unwrap_err();
        assert!(err.to_string().contains("in a row"));
    }

    #[test]
    fn success_resets_failures() {
        let mut errors = AcceptErrors::default();
        for _ in 0..3 * AcceptErrors::LIMIT {
            for _ in 1..AcceptErrors::LIMIT {
                assert!(errors.record(ErrorKind::Other.into()).is_ok());
            }
            errors.reset();
        }
    }

    #[test]
    fn broken_listener_fails_at_once() {
        let mut errors = AcceptErrors::default();
        assert!(errors.record(ErrorKind::InvalidInput.into()).is_err());
    }
}
