// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use super::error::QuoteError;
use super::qe::QuotingEnclave;
use super::traits::{FromBytes, ParseBytes, Steal};

use anyhow::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey([u8; 65]);

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0[1..]
    }
}

impl<'a> FromBytes<'a> for PublicKey {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (key, bytes): (&[u8; 64], _) = bytes.parse()?;

        // Encode the key as SEC1.
        let mut sec1 = [0u8; 65];
        sec1[0] = 4;
        sec1[1..].copy_from_slice(key);

        Ok((Self(sec1), bytes))
    }
}

impl PublicKey {
    pub fn sec1(&self) -> &[u8] {
        &self.0
    }
}

/// Raw `r || s` ECDSA signature, 32 bytes each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl<'a> FromBytes<'a> for Signature {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (raw, bytes) = bytes.parse()?;
        Ok((Self(raw), bytes))
    }
}

impl Signature {
    pub fn ecdsa(&self) -> Result<p256::ecdsa::Signature> {
        Ok(p256::ecdsa::Signature::try_from(&self.0[..])?)
    }

    /// ECDSA-Sig-Value ::= SEQUENCE {
    ///    r INTEGER,
    ///    s INTEGER
    /// }
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.ecdsa()?.to_der().as_bytes().to_vec())
    }
}

/// Quote signature data: the attestation key's signature over the signed
/// region, the attestation key itself, and the QE certification of it.
#[derive(Clone, Debug)]
pub struct SignatureData<'a> {
    pub sig: Signature,
    pub key: PublicKey,
    pub qe: QuotingEnclave<'a>,
}

impl SignatureData<'_> {
    /// Certification data type wrapping the QE report.
    pub const QE_REPORT_CERT_DATA: u16 = 6;
}

impl<'a> FromBytes<'a> for SignatureData<'a> {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (len, bytes): (u32, _) = bytes.parse()?;
        let (data, rest) = bytes.steal(len as usize)?;

        let (sig, data) = data.parse()?;
        let (key, data) = data.parse()?;

        let (typ, data): (u16, _) = data.parse()?;
        if typ != Self::QE_REPORT_CERT_DATA {
            return Err(QuoteError::UnsupportedCertDataType(typ));
        }
        let (size, data): (u32, _) = data.parse()?;
        let (cert, data) = data.steal(size as usize)?;
        if !data.is_empty() {
            return Err(QuoteError::UnexpectedLength(
                "signature data",
                len as usize,
                len as usize - data.len(),
            ));
        }

        let (qe, cert) = cert.parse()?;
        if !cert.is_empty() {
            return Err(QuoteError::UnexpectedLength(
                "QE certification data",
                size as usize,
                size as usize - cert.len(),
            ));
        }

        Ok((SignatureData { sig, key, qe }, rest))
    }
}
