// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::time::Duration;

use attestation::testing::{QuoteFactory, TlsIdentity};
use attestation::{CertBundle, CertificateBinder};
use attested_proxy_client::{Rejection, TrustBootstrapClient, TrustedCertificate};
use attested_proxy_server::lifecycle::{Handle, Lifecycle, Phase};
use attested_proxy_server::tls::{Identity, Timeouts};
use attested_proxy_server::{Config, Server, State};
use axum::routing::get;
use axum::Router;
use rstest::rstest;
use tokio::task::JoinHandle;

const HEALTHY: &str = "upstream is healthy";

fn upstream() -> SocketAddr {
    let app = Router::new()
        .route("/health", get(|| async { HEALTHY }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "finally"
            }),
        );

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));
    addr
}

struct Running {
    api: SocketAddr,
    proxy: SocketAddr,
    handle: Handle,
    run: JoinHandle<anyhow::Result<()>>,
}

async fn start(identity: &TlsIdentity, bundle: CertBundle) -> Running {
    let config = Config {
        cert_service_addr: "127.0.0.1:0".parse().unwrap(),
        proxy_addr: "127.0.0.1:0".parse().unwrap(),
        upstream: format!("http://{}", upstream()).parse().unwrap(),
        api_header_timeout: Duration::from_secs(5),
        proxy: Timeouts {
            handshake: Duration::from_secs(5),
            header_read: Duration::from_secs(5),
        },
    };

    let tls = Identity::read(identity.cert_pem.as_bytes(), identity.key_pem.as_bytes()).unwrap();
    let server = Server::bind(config, State::new(bundle).unwrap(), tls)
        .await
        .unwrap();
    let api = server.cert_service_addr().unwrap();
    let proxy = server.proxy_addr().unwrap();

    let mut lifecycle = Lifecycle::new(Duration::from_secs(5));
    server.start(&mut lifecycle).unwrap();
    let mut handle = lifecycle.handle();
    let run = tokio::spawn(lifecycle.run());
    handle.wait_for(Phase::Running).await;

    Running {
        api,
        proxy,
        handle,
        run,
    }
}

/// An HTTPS client that reaches the proxy under the name on its certificate.
fn https(trusted: &TrustedCertificate, proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .use_preconfigured_tls(trusted.tls_config().unwrap())
        .https_only(true)
        .resolve("localhost", proxy)
        .build()
        .unwrap()
}

#[tokio::test]
async fn bootstrap_then_proxy() {
    let factory = QuoteFactory::new();
    let identity = TlsIdentity::generate("localhost");

    let cert = identity.ca_pem.clone().into_bytes();
    let quote = CertificateBinder::new(factory.clone())
        .bind(&cert)
        .await
        .unwrap();
    let server = start(&identity, CertBundle::new(cert.clone(), quote)).await;

    let client = TrustBootstrapClient::new(factory.policy());
    let trusted = client
        .bootstrap(&format!("http://{}/", server.api))
        .await
        .into_result()
        .unwrap();
    assert_eq!(trusted.pem(), &cert[..]);
    assert_eq!(client.binding_comparisons(), 1);

    let url = format!("https://localhost:{}/health", server.proxy.port());
    let rsp = https(&trusted, server.proxy).get(&url).send().await.unwrap();
    assert_eq!(rsp.status(), reqwest::StatusCode::OK);
    assert_eq!(rsp.text().await.unwrap(), HEALTHY);

    server.handle.terminate();
    server.run.await.unwrap().unwrap();
    assert_eq!(server.handle.phase(), Phase::Stopped);
}

#[tokio::test]
async fn other_roots_cannot_reach_proxy() {
    let factory = QuoteFactory::new();
    let identity = TlsIdentity::generate("localhost");
    let cert = identity.ca_pem.clone().into_bytes();
    let quote = factory.quote(attestation::ReportData::commit(&cert).as_bytes());
    let server = start(&identity, CertBundle::new(cert, quote)).await;

    let stranger = TlsIdentity::generate("localhost");
    let client = reqwest::Client::builder()
        .tls_built_in_root_certs(false)
        .add_root_certificate(reqwest::Certificate::from_pem(stranger.ca_pem.as_bytes()).unwrap())
        .resolve("localhost", server.proxy)
        .build()
        .unwrap();

    let url = format!("https://localhost:{}/health", server.proxy.port());
    assert!(client.get(&url).send().await.is_err());

    server.handle.terminate();
    server.run.await.unwrap().unwrap();
}

#[rstest]
#[case::zeroed([0u8; 64])]
#[case::other_certificate(*attestation::ReportData::commit(b"not the published certificate").as_bytes())]
#[tokio::test]
async fn unbound_quote_is_rejected(#[case] report_data: [u8; 64]) {
    let factory = QuoteFactory::new();
    let identity = TlsIdentity::generate("localhost");
    let cert = identity.ca_pem.clone().into_bytes();
    let server = start(&identity, CertBundle::new(cert, factory.quote(&report_data))).await;

    let client = TrustBootstrapClient::new(factory.policy());
    let decision = client.bootstrap(&format!("http://{}/", server.api)).await;
    assert!(matches!(
        decision.into_result(),
        Err(Rejection::BindingMismatch)
    ));

    server.handle.terminate();
    server.run.await.unwrap().unwrap();
}

#[tokio::test]
async fn drain_finishes_in_flight_and_refuses_new() {
    let factory = QuoteFactory::new();
    let identity = TlsIdentity::generate("localhost");
    let cert = identity.ca_pem.clone().into_bytes();
    let quote = factory.quote(attestation::ReportData::commit(&cert).as_bytes());
    let server = start(&identity, CertBundle::new(cert, quote)).await;

    let trusted = TrustBootstrapClient::new(factory.policy())
        .bootstrap(&format!("http://{}/", server.api))
        .await
        .into_result()
        .unwrap();

    let url = format!("https://localhost:{}/slow", server.proxy.port());
    let https = https(&trusted, server.proxy);
    let in_flight = tokio::spawn(async move { https.get(&url).send().await?.text().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    server.handle.terminate();

    assert_eq!(in_flight.await.unwrap().unwrap(), "finally");
    server.run.await.unwrap().unwrap();
    assert_eq!(server.handle.phase(), Phase::Stopped);

    assert!(tokio::net::TcpStream::connect(server.proxy).await.is_err());
    assert!(tokio::net::TcpStream::connect(server.api).await.is_err());
}
