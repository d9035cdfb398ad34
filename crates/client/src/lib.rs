// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Client side of attested certificate distribution.
//!
//! [`TrustBootstrapClient::bootstrap`] fetches a [`CertBundle`], checks the
//! quote inside it and the binding between quote and certificate, and only
//! then hands out a TLS configuration rooted at that single certificate.

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications, clippy::all)]

use std::sync::atomic::{AtomicUsize, Ordering};

use attestation::{
    AttestationVerifier, CertBundle, Policy, Quote, QuoteError, ReportData, TdxVerifier,
};
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info, warn};

/// Why a certificate was not trusted. Each variant names the failing step.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("failed to fetch certificate bundle: {0}")]
    FetchFailed(String),

    #[error("malformed quote: {0}")]
    MalformedQuote(#[from] QuoteError),

    #[error("unsupported quote type: version {0}")]
    UnsupportedQuoteType(u16),

    #[error("attestation verification failed: {0}")]
    AttestationInvalid(String),

    #[error("certificate hash does not match the quote's user data")]
    BindingMismatch,

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
}

impl Rejection {
    pub fn step(&self) -> &'static str {
        match self {
            Rejection::FetchFailed(..) => "fetch",
            Rejection::MalformedQuote(..) => "parse",
            Rejection::UnsupportedQuoteType(..) => "version",
            Rejection::AttestationInvalid(..) => "verify",
            Rejection::BindingMismatch => "binding",
            Rejection::InvalidCertificate(..) => "trust",
        }
    }
}

/// A certificate whose binding to a verified quote has been checked.
#[derive(Clone, Debug)]
pub struct TrustedCertificate {
    pem: Vec<u8>,
    der: Vec<u8>,
    roots: RootCertStore,
}

impl TrustedCertificate {
    fn new(pem: &[u8]) -> Result<Self, Rejection> {
        let mut reader = pem;
        let certs = rustls_pemfile::certs(&mut reader)
            .map_err(|e| Rejection::InvalidCertificate(e.to_string()))?;
        let [der]: [Vec<u8>; 1] = certs.try_into().map_err(|certs: Vec<_>| {
            Rejection::InvalidCertificate(format!(
                "expected exactly one certificate, found {}",
                certs.len()
            ))
        })?;

        let mut roots = RootCertStore::empty();
        roots
            .add(&rustls::Certificate(der.clone()))
            .map_err(|e| Rejection::InvalidCertificate(e.to_string()))?;

        Ok(Self {
            pem: pem.to_vec(),
            der,
            roots,
        })
    }

    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// A trust store whose only root is this certificate.
    pub fn roots(&self) -> &RootCertStore {
        &self.roots
    }

    /// TLS 1.3 client configuration trusting only this certificate.
    pub fn tls_config(&self) -> anyhow::Result<ClientConfig> {
        Ok(ClientConfig::builder()
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_root_certificates(self.roots.clone())
            .with_no_client_auth())
    }

    /// An HTTPS client that refuses servers not chaining to this certificate.
    pub fn https_client(&self) -> anyhow::Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .use_preconfigured_tls(self.tls_config()?)
            .https_only(true)
            .build()?)
    }
}

#[derive(Debug)]
pub enum TrustDecision {
    Trusted(TrustedCertificate),
    Rejected(Rejection),
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustDecision::Trusted(..))
    }

    pub fn into_result(self) -> Result<TrustedCertificate, Rejection> {
        match self {
            TrustDecision::Trusted(cert) => Ok(cert),
            TrustDecision::Rejected(reason) => Err(reason),
        }
    }
}

/// Decides whether to trust the certificate published by a distribution
/// server.
pub struct TrustBootstrapClient<V = TdxVerifier> {
    verifier: V,
    policy: Policy,
    http: reqwest::Client,
    comparisons: AtomicUsize,
}

impl TrustBootstrapClient<TdxVerifier> {
    pub fn new(policy: Policy) -> Self {
        Self::with_verifier(TdxVerifier, policy)
    }
}

impl<V: AttestationVerifier> TrustBootstrapClient<V> {
    pub fn with_verifier(verifier: V, policy: Policy) -> Self {
        Self {
            verifier,
            policy,
            http: reqwest::Client::new(),
            comparisons: AtomicUsize::new(0),
        }
    }

    /// Replaces the plaintext client used to fetch bundles.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// How many certificate-to-quote comparisons this client has made.
    pub fn binding_comparisons(&self) -> usize {
        self.comparisons.load(Ordering::SeqCst)
    }

    /// Fetches the bundle at `url` and decides whether to trust it.
    pub async fn bootstrap(&self, url: &str) -> TrustDecision {
        match self.fetch(url).await {
            Ok(bundle) => self.evaluate(&bundle),
            Err(reason) => Self::reject(reason),
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<CertBundle, Rejection> {
        let fetch = |e: reqwest::Error| Rejection::FetchFailed(e.to_string());

        debug!(url, "fetching certificate bundle");
        let body = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|rsp| rsp.error_for_status())
            .map_err(fetch)?
            .bytes()
            .await
            .map_err(fetch)?;

        CertBundle::from_json(&body).map_err(|e| Rejection::FetchFailed(e.to_string()))
    }

    /// Runs every check on an already fetched bundle.
    pub fn evaluate(&self, bundle: &CertBundle) -> TrustDecision {
        match self.check(bundle) {
            Ok(cert) => {
                info!("certificate trusted");
                TrustDecision::Trusted(cert)
            }
            Err(reason) => Self::reject(reason),
        }
    }

    fn reject(reason: Rejection) -> TrustDecision {
        warn!(step = reason.step(), "certificate rejected: {reason}");
        TrustDecision::Rejected(reason)
    }

    fn check(&self, bundle: &CertBundle) -> Result<TrustedCertificate, Rejection> {
        let quote = match self.verifier.parse_quote(&bundle.quote) {
            Ok(quote) => quote,
            Err(QuoteError::UnsupportedQuoteVersion(v)) => {
                return Err(Rejection::UnsupportedQuoteType(v))
            }
            Err(e) => return Err(Rejection::MalformedQuote(e)),
        };

        match &quote {
            Quote::V4(..) => (),
            Quote::V5(..) => return Err(Rejection::UnsupportedQuoteType(quote.version())),
        }

        self.verifier
            .verify(&quote, &self.policy)
            .map_err(|e| Rejection::AttestationInvalid(format!("{e:#}")))?;

        self.comparisons.fetch_add(1, Ordering::SeqCst);
        if !ReportData::commit(&bundle.cert).matches(quote.user_data()) {
            return Err(Rejection::BindingMismatch);
        }

        TrustedCertificate::new(&bundle.cert)
    }
}
