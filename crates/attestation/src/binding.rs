// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Binding a certificate to an attestation quote.

use crate::crypto::sha256;
use crate::issuer::{IssueError, QuoteIssuer};

use subtle::ConstantTimeEq;
use tracing::{debug, info};

/// The 64-byte `REPORTDATA` committing to a certificate.
///
/// The first 32 bytes hold the SHA-256 digest of the certificate bytes
/// exactly as distributed. The upper 32 bytes are zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportData([u8; 64]);

impl ReportData {
    /// Computes the commitment for `cert`.
    pub fn commit(cert: &[u8]) -> Self {
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(&sha256(cert));
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Compares against a quote's user data without early exit.
    pub fn matches(&self, user_data: &[u8]) -> bool {
        self.0[..].ct_eq(user_data).into()
    }
}

impl AsRef<[u8]> for ReportData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Obtains a quote whose user data commits to a certificate.
#[derive(Clone, Debug)]
pub struct CertificateBinder<I> {
    issuer: I,
}

impl<I: QuoteIssuer> CertificateBinder<I> {
    pub fn new(issuer: I) -> Self {
        Self { issuer }
    }

    /// Requests a quote over [`ReportData::commit`] of `cert`.
    ///
    /// There is exactly one attempt. Both failure kinds are fatal to the
    /// caller's startup.
    pub async fn bind(&self, cert: &[u8]) -> Result<Vec<u8>, IssueError> {
        let data = ReportData::commit(cert);
        debug!(report_data = %data.to_hex(), "requesting quote");

        let quote = self.issuer.request_quote(&data).await?;
        info!(len = quote.len(), "certificate bound to attestation quote");
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::QuoteFactory;
    use crate::{AttestationVerifier, TdxVerifier};

    use async_trait::async_trait;
    use quickcheck::quickcheck;

    const CERT: &[u8] = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    quickcheck! {
        fn commitment_is_deterministic(cert: Vec<u8>) -> bool {
            ReportData::commit(&cert) == ReportData::commit(&cert)
        }

        fn commitment_sees_every_bit(cert: Vec<u8>, index: usize, bit: u8) -> bool {
            if cert.is_empty() {
                return true;
            }

            let mut flipped = cert.clone();
            flipped[index % cert.len()] ^= 1 << (bit % 8);
            ReportData::commit(&cert) != ReportData::commit(&flipped)
        }

        fn upper_half_is_zero(cert: Vec<u8>) -> bool {
            ReportData::commit(&cert).as_bytes()[32..] == [0u8; 32]
        }
    }

    #[test]
    fn matches_only_the_same_commitment() {
        let data = ReportData::commit(CERT);
        assert!(data.matches(data.as_bytes()));
        assert!(!data.matches(ReportData::commit(b"other").as_bytes()));
        assert!(!data.matches(&[0u8; 64]));
        assert!(!data.matches(&data.as_bytes()[..32]));
    }

    #[test]
    fn hex_encoding() {
        let data = ReportData::commit(b"abc");
        assert_eq!(
            &data.to_hex()[..64],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(&data.to_hex()[64..], "0".repeat(64));
    }

    #[tokio::test]
    async fn bound_quote_commits_to_certificate() {
        let factory = QuoteFactory::new();
        let quote = CertificateBinder::new(factory.clone())
            .bind(CERT)
            .await
            .unwrap();

        let verifier = TdxVerifier;
        let parsed = verifier.parse_quote(&quote).unwrap();
        verifier.verify(&parsed, &factory.policy()).unwrap();
        assert!(ReportData::commit(CERT).matches(parsed.user_data()));
        assert!(!ReportData::commit(b"another certificate").matches(parsed.user_data()));
    }

    struct Offline;

    #[async_trait]
    impl QuoteIssuer for Offline {
        async fn request_quote(&self, _: &ReportData) -> Result<Vec<u8>, IssueError> {
            Err(IssueError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn issuer_failure_propagates() {
        let err = CertificateBinder::new(Offline).bind(CERT).await.unwrap_err();
        assert!(matches!(err, IssueError::Unavailable(..)));
    }
}
