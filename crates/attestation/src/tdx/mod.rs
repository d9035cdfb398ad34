// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

pub mod quote;

use crate::crypto::{sha256, TbsCertificateExt, ES256};
use crate::{AttestationVerifier, Policy};
use quote::error::QuoteError;
use quote::Quote;

use anyhow::{anyhow, ensure, Result};
use der::Decode;
use p256::ecdsa::signature::Verifier;
use tracing::debug;
use x509::{Certificate, TbsCertificate};

/// Verifies ECDSA-P256 TDX quotes against a set of trusted PCK roots.
///
/// Collateral (TCB info, QE identity) and revocation lists are not
/// consulted; the quote is trusted when its certification chain ends at a
/// configured root and every signature along the way holds.
#[derive(Clone, Debug, Default)]
pub struct TdxVerifier;

impl TdxVerifier {
    /// Walks the PCK chain from the root to the leaf and returns the leaf.
    pub fn trusted<'c>(
        &self,
        chain: &'c [Certificate<'c>],
        policy: &Policy,
    ) -> Result<&'c TbsCertificate<'c>> {
        let root = chain.first().ok_or_else(|| anyhow!("empty PCK chain"))?;
        let anchored = policy.roots().iter().any(|r| {
            Certificate::from_der(r)
                .map(|r| r == *root)
                .unwrap_or(false)
        });
        ensure!(anchored, "PCK chain does not end at a trusted root");

        let mut signer = &root.tbs_certificate;
        for cert in chain.iter() {
            signer = signer.verify_issued(cert)?;
        }

        Ok(signer)
    }
}

impl AttestationVerifier for TdxVerifier {
    fn parse_quote<'a>(&self, bytes: &'a [u8]) -> Result<Quote<'a>, QuoteError> {
        Quote::parse(bytes)
    }

    fn verify(&self, quote: &Quote<'_>, policy: &Policy) -> Result<()> {
        let sign = quote.signature_data();

        // Parse the certificate chain.
        let chain = sign
            .qe
            .cert
            .chain()
            .iter()
            .map(|c| Certificate::from_der(c))
            .collect::<Result<Vec<_>, _>>()?;
        let pck = self.trusted(&chain, policy)?;

        // Validate the QE report.
        pck.verify_signed(sign.qe.rprt, ES256, &sign.qe.sign.to_der()?)?;

        // Validate the Attestation Key.
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(&sha256([sign.key.as_ref(), sign.qe.auth.as_ref()].concat()));
        ensure!(
            data[..] == *sign.qe.report_data(),
            "untrusted ecdsa attestation key"
        );

        // Verify the signature on the TD report.
        let vkey = p256::ecdsa::VerifyingKey::from_sec1_bytes(sign.key.sec1())?;
        vkey.verify(quote.signed(), &sign.sig.ecdsa()?)?;

        // Verify the PCE security version.
        let header = quote.header();
        ensure!(
            header.pce_svn >= policy.min_pce_svn(),
            "untrusted pce: {}",
            header.pce_svn
        );

        // Verify the QE security version.
        ensure!(
            header.qe_svn >= policy.min_qe_svn(),
            "untrusted qe: {}",
            header.qe_svn
        );

        debug!(version = quote.version(), "tdx quote verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{QuoteFactory, V4_SIGNATURE_OFFSET};

    use rstest::rstest;

    fn verify(factory: &QuoteFactory, bytes: &[u8]) -> Result<()> {
        let verifier = TdxVerifier;
        let quote = verifier.parse_quote(bytes)?;
        verifier.verify(&quote, &factory.policy())
    }

    #[rstest]
    #[case(4)]
    #[case(5)]
    fn genuine(#[case] version: u16) {
        let factory = QuoteFactory::new();
        let bytes = match version {
            4 => factory.quote(&[1u8; 64]),
            _ => factory.quote_v5(&[1u8; 64]),
        };
        verify(&factory, &bytes).unwrap();
    }

    #[test]
    fn corrupted_signature() {
        let factory = QuoteFactory::new();
        let mut bytes = factory.quote(&[0u8; 64]);
        bytes[V4_SIGNATURE_OFFSET] ^= 0x01;
        assert!(verify(&factory, &bytes).is_err());
    }

    #[test]
    fn tampered_report_data() {
        let factory = QuoteFactory::new();
        let mut bytes = factory.quote(&[0u8; 64]);
        bytes[crate::testing::REPORT_DATA_OFFSET] ^= 0x80;
        assert!(verify(&factory, &bytes).is_err());
    }

    #[test]
    fn untrusted_root() {
        let factory = QuoteFactory::new();
        let other = QuoteFactory::new();
        let bytes = factory.quote(&[0u8; 64]);

        let verifier = TdxVerifier;
        let quote = verifier.parse_quote(&bytes).unwrap();
        let err = verifier.verify(&quote, &other.policy()).unwrap_err();
        assert!(err.to_string().contains("trusted root"));
    }

    #[test]
    fn empty_policy_trusts_nothing() {
        let factory = QuoteFactory::new();
        let bytes = factory.quote(&[0u8; 64]);

        let verifier = TdxVerifier;
        let quote = verifier.parse_quote(&bytes).unwrap();
        assert!(verifier.verify(&quote, &Policy::default()).is_err());
    }

    #[test]
    fn security_version_floor() {
        let factory = QuoteFactory::new();
        let bytes = factory.quote(&[0u8; 64]);

        let verifier = TdxVerifier;
        let quote = verifier.parse_quote(&bytes).unwrap();
        let policy = factory.policy().with_min_svn(u16::MAX, 0);
        let err = verifier.verify(&quote, &policy).unwrap_err();
        assert!(err.to_string().contains("untrusted qe"));
    }
}
