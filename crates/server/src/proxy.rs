// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Forwarding of every request to one fixed upstream.

use std::sync::Arc;

use anyhow::{anyhow, ensure};
use axum::routing::any;
use axum::Router;
use http::header::{HeaderName, CONNECTION};
use http::uri::{Authority, Scheme};
use http::{HeaderMap, Request, Response, StatusCode, Uri, Version};
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use tracing::{debug, warn};

/// Headers scoped to a single connection, never forwarded.
const HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The upstream base URL and a pooled client for reaching it.
#[derive(Clone, Debug)]
pub struct Upstream {
    scheme: Scheme,
    authority: Authority,
    path: String,
    query: String,
    client: Client<HttpConnector>,
}

impl Upstream {
    pub fn new(target: Uri) -> anyhow::Result<Self> {
        let scheme = target
            .scheme()
            .cloned()
            .ok_or_else(|| anyhow!("upstream {target} has no scheme"))?;
        ensure!(
            scheme == Scheme::HTTP,
            "upstream {target} must be a plain http url"
        );
        let authority = target
            .authority()
            .cloned()
            .ok_or_else(|| anyhow!("upstream {target} has no host"))?;

        Ok(Self {
            scheme,
            authority,
            path: target.path().to_string(),
            query: target.query().unwrap_or_default().to_string(),
            client: Client::new(),
        })
    }

    /// Maps a request URI onto the upstream: paths are joined with exactly
    /// one slash and queries are concatenated with `&`.
    pub fn rewrite(&self, uri: &Uri) -> Result<Uri, http::Error> {
        let path = join(&self.path, uri.path());

        let query = uri.query().unwrap_or_default();
        let query = match (self.query.is_empty(), query.is_empty()) {
            (false, false) => format!("{}&{}", self.query, query),
            _ => format!("{}{}", self.query, query),
        };

        let path_and_query = match query.is_empty() {
            true => path,
            false => format!("{path}?{query}"),
        };

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }
}

fn join(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Strips hop-by-hop headers, including any named by `Connection`.
fn strip_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }

    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

fn bad_gateway() -> Response<Body> {
    let mut rsp = Response::new(Body::empty());
    *rsp.status_mut() = StatusCode::BAD_GATEWAY;
    rsp
}

/// Relays `req` upstream with only its hop-by-hop headers removed. No
/// `X-Forwarded-For` or `Forwarded` header is added, so the upstream never
/// learns the client address.
async fn forward(upstream: Arc<Upstream>, mut req: Request<Body>) -> Response<Body> {
    let uri = match upstream.rewrite(req.uri()) {
        Ok(uri) => uri,
        Err(e) => {
            debug!("cannot map {} onto upstream: {e}", req.uri());
            let mut rsp = Response::new(Body::empty());
            *rsp.status_mut() = StatusCode::BAD_REQUEST;
            return rsp;
        }
    };

    *req.uri_mut() = uri;
    *req.version_mut() = Version::HTTP_11;
    strip_hop_headers(req.headers_mut());

    match upstream.client.request(req).await {
        Ok(mut rsp) => {
            strip_hop_headers(rsp.headers_mut());
            rsp
        }
        Err(e) => {
            warn!("upstream request failed: {e}");
            bad_gateway()
        }
    }
}

/// The proxy application: every method and path goes upstream.
pub fn app(upstream: Upstream) -> Router {
    let upstream = Arc::new(upstream);
    crate::traced(Router::new().fallback(any(move |req: Request<Body>| {
        let upstream = upstream.clone();
        async move { forward(upstream, req).await }
    })))
}
