// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications, clippy::all)]

pub mod lifecycle;
pub mod proxy;
pub mod tls;

use lifecycle::Lifecycle;
use proxy::Upstream;
use tls::{Identity, Timeouts};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use attestation::CertBundle;
use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use http::Uri;
use tokio::net::TcpListener;
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse,
    TraceLayer,
};
use tower_http::LatencyUnit;
use tracing::{info, Level, Span};

/// The certificate bundle, serialized once and served as is.
#[derive(Clone, Debug)]
pub struct State {
    bundle: CertBundle,
    json: Bytes,
}

impl State {
    pub fn new(bundle: CertBundle) -> anyhow::Result<Self> {
        let json = bundle
            .to_json()
            .context("failed to serialize certificate bundle")?;

        Ok(Self {
            bundle,
            json: json.into(),
        })
    }

    pub fn bundle(&self) -> &CertBundle {
        &self.bundle
    }
}

#[derive(Debug, Clone, Default)]
struct SpanMaker;

impl<B> tower_http::trace::MakeSpan<B> for SpanMaker {
    fn make_span(&mut self, request: &axum::http::request::Request<B>) -> Span {
        let reqid = uuid::Uuid::new_v4();
        tracing::span!(
            Level::INFO,
            "request",
            method = %request.method(),
            uri = %request.uri(),
            version = ?request.version(),
            headers = ?request.headers(),
            request_id = %reqid,
        )
    }
}

pub(crate) fn traced(router: Router) -> Router {
    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(SpanMaker)
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(
                DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Micros),
            )
            .on_body_chunk(DefaultOnBodyChunk::new())
            .on_eos(
                DefaultOnEos::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Micros),
            )
            .on_failure(
                DefaultOnFailure::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Micros),
            ),
    )
}

/// The plaintext certificate distribution endpoint.
pub fn app(state: State) -> Router {
    traced(
        Router::new()
            .route("/", get(bundle))
            .layer(Extension(Arc::new(state))),
    )
}

async fn bundle(Extension(state): Extension<Arc<State>>) -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/json")], state.json.clone())
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cert_service_addr: SocketAddr,
    pub proxy_addr: SocketAddr,
    pub upstream: Uri,
    pub api_header_timeout: Duration,
    pub proxy: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cert_service_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            proxy_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            upstream: Uri::from_static("http://127.0.0.1:8082"),
            api_header_timeout: Duration::from_millis(200),
            proxy: Timeouts::default(),
        }
    }
}

/// Both listeners, bound and ready to be started.
pub struct Server {
    config: Config,
    state: State,
    identity: Identity,
    upstream: Upstream,
    api: TcpListener,
    proxy: TcpListener,
}

impl Server {
    /// Binds both listeners. Any failure here is fatal to startup.
    pub async fn bind(config: Config, state: State, identity: Identity) -> anyhow::Result<Self> {
        let upstream = Upstream::new(config.upstream.clone())?;

        let api = TcpListener::bind(config.cert_service_addr)
            .await
            .with_context(|| {
                format!(
                    "failed to bind certificate service to {}",
                    config.cert_service_addr
                )
            })?;
        let proxy = TcpListener::bind(config.proxy_addr)
            .await
            .with_context(|| format!("failed to bind proxy to {}", config.proxy_addr))?;

        Ok(Self {
            config,
            state,
            identity,
            upstream,
            api,
            proxy,
        })
    }

    pub fn cert_service_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.api.local_addr()?)
    }

    pub fn proxy_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.proxy.local_addr()?)
    }

    /// Hands both servers to `lifecycle` as supervised tasks.
    pub fn start(self, lifecycle: &mut Lifecycle) -> anyhow::Result<()> {
        let token = lifecycle.token();
        let acceptor = self.identity.acceptor()?;

        info!(addr = %self.api.local_addr()?, "starting certificate service");
        let api = axum::Server::from_tcp(self.api.into_std()?)
            .map_err(|e| anyhow!("failed to start certificate service: {e}"))?
            .http1_header_read_timeout(self.config.api_header_timeout)
            .serve(app(self.state).into_make_service())
            .with_graceful_shutdown(token.clone().cancelled_owned());
        lifecycle.spawn("certificate service", async move {
            api.await.context("certificate service failed")
        });

        info!(
            addr = %self.proxy.local_addr()?,
            upstream = %self.config.upstream,
            "starting TLS proxy"
        );
        lifecycle.spawn(
            "proxy",
            tls::serve(
                self.proxy,
                acceptor,
                proxy::app(self.upstream),
                token,
                self.config.proxy,
            ),
        );

        Ok(())
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the level picked by `debug`; `RUST_LOG_JSON` forces
/// JSON output the same as `json`.
pub fn init_tracing(json: bool, debug: bool) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if json || std::env::var("RUST_LOG_JSON").is_ok() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| anyhow!("failed to initialize logging: {e}"))
}

/// Root span tagging every log line with the service name and, optionally,
/// a per-process random id.
pub fn service_span(service: &str, uid: bool) -> Span {
    if uid {
        tracing::info_span!("service", name = %service, uid = %uuid::Uuid::new_v4())
    } else {
        tracing::info_span!("service", name = %service)
    }
}

#[cfg(test)]
mod tests {
    use super::init_tracing;
    use std::sync::Once;

    static TRACING: Once = Once::new();

    pub(crate) fn init() {
        TRACING.call_once(|| {
            let _ = init_tracing(false, true);
        });
    }

    mod bundle {
        use super::super::{app, State};
        use super::init;

        use attestation::testing::QuoteFactory;
        use attestation::{CertBundle, ReportData};
        use axum::body::Body;
        use http::header::CONTENT_TYPE;
        use http::{Method, Request, StatusCode};
        use rstest::rstest;
        use tower::ServiceExt; // for `app.oneshot()`

        fn state() -> State {
            let cert = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".to_vec();
            let quote = QuoteFactory::new().quote(ReportData::commit(&cert).as_bytes());
            State::new(CertBundle::new(cert, quote)).unwrap()
        }

        #[tokio::test]
        async fn serves_bundle() {
            init();
            let state = state();
            let expected = state.bundle().clone();

            let request = Request::builder().uri("/").body(Body::empty()).unwrap();
            let response = app(state).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            assert_eq!(CertBundle::from_json(&body).unwrap(), expected);
        }

        #[tokio::test]
        async fn idempotent() {
            init();
            let app = app(state());

            let mut bodies = Vec::new();
            for _ in 0..3 {
                let request = Request::builder().uri("/").body(Body::empty()).unwrap();
                let response = app.clone().oneshot(request).await.unwrap();
                bodies.push(hyper::body::to_bytes(response.into_body()).await.unwrap());
            }
            assert!(bodies.windows(2).all(|w| w[0] == w[1]));
        }

        #[tokio::test]
        async fn concurrent_readers() {
            init();
            let app = app(state());

            let tasks = (0..32)
                .map(|_| {
                    let app = app.clone();
                    tokio::spawn(async move {
                        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
                        let response = app.oneshot(request).await.unwrap();
                        assert_eq!(response.status(), StatusCode::OK);
                        hyper::body::to_bytes(response.into_body()).await.unwrap()
                    })
                })
                .collect::<Vec<_>>();

            let mut bodies = Vec::new();
            for task in tasks {
                bodies.push(task.await.unwrap());
            }
            assert!(bodies.windows(2).all(|w| w[0] == w[1]));
        }

        #[rstest]
        #[case(Method::POST, "/", StatusCode::METHOD_NOT_ALLOWED)]
        #[case(Method::PUT, "/", StatusCode::METHOD_NOT_ALLOWED)]
        #[case(Method::GET, "/cert", StatusCode::NOT_FOUND)]
        #[tokio::test]
        async fn read_only(#[case] method: Method, #[case] uri: &str, #[case] status: StatusCode) {
            init();
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let response = app(state()).oneshot(request).await.unwrap();
            assert_eq!(response.status(), status);
        }
    }
}
