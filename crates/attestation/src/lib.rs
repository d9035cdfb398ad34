// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Evidence handling for attested certificate distribution.
//!
//! A certificate is bound into a TDX quote by placing its SHA-256 digest in
//! the quote's `REPORTDATA`. The [`binding`] module builds that commitment
//! and asks a [`issuer::QuoteIssuer`] for a quote over it; [`tdx`] parses and
//! verifies the resulting quote on the other side.

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications, clippy::all)]

pub mod binding;
pub mod bundle;
pub mod crypto;
pub mod issuer;
pub mod tdx;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use binding::{CertificateBinder, ReportData};
pub use bundle::CertBundle;
pub use issuer::{DcapIssuer, IssueError, QuoteIssuer};
pub use tdx::quote::error::QuoteError;
pub use tdx::quote::Quote;
pub use tdx::TdxVerifier;

use std::io::BufRead;

use anyhow::{anyhow, Context};

/// Turns raw quote bytes into a verified quote.
///
/// Parsing and verification are separate steps so callers can tell a
/// structurally broken quote from one that fails cryptographic checks.
pub trait AttestationVerifier: Send + Sync {
    fn parse_quote<'a>(&self, bytes: &'a [u8]) -> Result<Quote<'a>, QuoteError>;

    fn verify(&self, quote: &Quote<'_>, policy: &Policy) -> anyhow::Result<()>;
}

/// What a verifier accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Policy {
    roots: Vec<Vec<u8>>,
    min_qe_svn: u16,
    min_pce_svn: u16,
}

impl Policy {
    /// A policy trusting the given DER-encoded PCK root certificates.
    pub fn new(roots: Vec<Vec<u8>>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    /// Reads every PEM certificate from `pem` as a trusted root.
    pub fn read(mut pem: impl BufRead) -> anyhow::Result<Self> {
        let roots = rustls_pemfile::certs(&mut pem).context("failed to read root certificates")?;
        if roots.is_empty() {
            return Err(anyhow!("no root certificates found"));
        }

        Ok(Self::new(roots))
    }

    pub fn with_min_svn(mut self, qe: u16, pce: u16) -> Self {
        self.min_qe_svn = qe;
        self.min_pce_svn = pce;
        self
    }

    pub fn roots(&self) -> &[Vec<u8>] {
        &self.roots
    }

    pub fn min_qe_svn(&self) -> u16 {
        self.min_qe_svn
    }

    pub fn min_pce_svn(&self) -> u16 {
        self.min_pce_svn
    }
}

#[cfg(test)]
mod tests {
    use super::Policy;

    #[test]
    fn policy_from_pem() {
        let factory = crate::testing::QuoteFactory::new();
        let policy = Policy::read(factory.root_pem().as_bytes()).unwrap();
        assert_eq!(policy, factory.policy());
    }

    #[test]
    fn policy_without_roots() {
        assert!(Policy::read(&b"nothing to see here\n"[..]).is_err());
    }
}
