// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use super::super::error::QuoteError;
use super::super::traits::{FromBytes, ParseBytes, Steal};

#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Data {
    /// DER certificates ordered from the root to the PCK leaf.
    PckCertChain(Vec<Vec<u8>>),
}

impl Data {
    pub const PCK_CERT_CHAIN: u16 = 5;

    pub fn chain(&self) -> &[Vec<u8>] {
        match self {
            Data::PckCertChain(chain) => chain,
        }
    }
}

impl<'a> FromBytes<'a> for Data {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (typ, bytes): (u16, _) = bytes.parse()?;
        let (len, bytes): (u32, _) = bytes.parse()?;
        let (buf, bytes) = bytes.steal(len as usize)?;

        match typ {
            Self::PCK_CERT_CHAIN => {
                let chain = std::str::from_utf8(buf)
                    .map_err(|e| QuoteError::CertChainParse(e.to_string()))?
                    .trim_end_matches('\0')
                    .replace("-----END CERTIFICATE-----", "-----END CERTIFICATE-----\n");

                let mut certs = rustls_pemfile::certs(&mut chain.as_bytes())
                    .map_err(|e| QuoteError::CertChainParse(e.to_string()))?;
                if certs.is_empty() {
                    return Err(QuoteError::CertChainParse("empty PCK chain".into()));
                }

                certs.reverse();
                Ok((Self::PckCertChain(certs), bytes))
            }

            typ => Err(QuoteError::UnsupportedCertDataType(typ)),
        }
    }
}
