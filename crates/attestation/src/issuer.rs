// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Quote issuance.

use crate::binding::ReportData;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// The attestation subsystem could not be reached.
    #[error("attestation service unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The attestation subsystem answered without a quote.
    #[error("attestation request failed: {0}")]
    RequestFailed(String),
}

/// Produces a quote whose user data is the given report data.
#[async_trait]
pub trait QuoteIssuer: Send + Sync {
    async fn request_quote(&self, data: &ReportData) -> Result<Vec<u8>, IssueError>;
}

#[async_trait]
impl<T: QuoteIssuer + ?Sized> QuoteIssuer for std::sync::Arc<T> {
    async fn request_quote(&self, data: &ReportData) -> Result<Vec<u8>, IssueError> {
        (**self).request_quote(data).await
    }
}

/// Talks to a DCAP quote service exposing `GET /attest/{hex report data}`.
#[derive(Clone, Debug)]
pub struct DcapIssuer {
    base: Url,
    http: Client,
}

impl DcapIssuer {
    pub fn new(base: Url) -> Self {
        Self::with_client(base, Client::new())
    }

    pub fn with_client(base: Url, http: Client) -> Self {
        Self { base, http }
    }

    fn endpoint(&self, data: &ReportData) -> Result<Url, IssueError> {
        let path = format!("attest/{}", data.to_hex());
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }

        base.join(&path)
            .map_err(|e| IssueError::RequestFailed(format!("invalid quote service url: {e}")))
    }
}

#[async_trait]
impl QuoteIssuer for DcapIssuer {
    async fn request_quote(&self, data: &ReportData) -> Result<Vec<u8>, IssueError> {
        let url = self.endpoint(data)?;
        debug!(%url, "requesting quote");

        let rsp = self.http.get(url).send().await.map_err(|e| {
            warn!("quote service unreachable: {e}");
            IssueError::Unavailable(e.into())
        })?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(IssueError::RequestFailed(format!(
                "quote service returned {status}"
            )));
        }

        let quote = rsp
            .bytes()
            .await
            .map_err(|e| IssueError::Unavailable(e.into()))?;
        if quote.is_empty() {
            return Err(IssueError::RequestFailed("empty quote".into()));
        }

        Ok(quote.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;

    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use rstest::rstest;

    async fn serve(app: Router) -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));
        addr
    }

    async fn echo(Path(hex): Path<String>) -> Vec<u8> {
        hex.into_bytes()
    }

    #[tokio::test]
    async fn requests_hex_report_data() {
        let addr = serve(Router::new().route("/attest/:hex", get(echo))).await;
        let issuer = DcapIssuer::new(format!("http://{addr}").parse().unwrap());

        let data = ReportData::commit(b"certificate");
        let quote = issuer.request_quote(&data).await.unwrap();
        assert_eq!(quote, data.to_hex().into_bytes());
    }

    #[tokio::test]
    async fn keeps_base_path() {
        let addr = serve(Router::new().route("/dcap/attest/:hex", get(echo))).await;
        let issuer = DcapIssuer::new(format!("http://{addr}/dcap").parse().unwrap());

        let data = ReportData::commit(b"certificate");
        assert!(issuer.request_quote(&data).await.is_ok());
    }

    #[rstest]
    #[case(StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(StatusCode::NOT_FOUND)]
    #[case(StatusCode::NO_CONTENT)]
    #[tokio::test]
    async fn failed_request(#[case] status: StatusCode) {
        let app = Router::new().route("/attest/:hex", get(move || async move { status }));
        let addr = serve(app).await;
        let issuer = DcapIssuer::new(format!("http://{addr}").parse().unwrap());

        let err = issuer
            .request_quote(&ReportData::commit(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::RequestFailed(..)), "{err}");
    }

    #[tokio::test]
    async fn unreachable_service() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let issuer = DcapIssuer::new(format!("http://{addr}").parse().unwrap());

        let err = issuer
            .request_quote(&ReportData::commit(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::Unavailable(..)), "{err}");
    }
}
