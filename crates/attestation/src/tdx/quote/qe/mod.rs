// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

pub mod auth;
pub mod cert;

use super::error::QuoteError;
use super::es256::Signature;
use super::traits::{FromBytes, ParseBytes};

/// The Quoting Enclave's certification of the attestation key.
#[derive(Clone, Debug)]
pub struct QuotingEnclave<'a> {
    pub rprt: &'a [u8; 384],
    pub sign: Signature,
    pub auth: auth::Data<'a>,
    pub cert: cert::Data,
}

impl QuotingEnclave<'_> {
    const REPORT_DATA_OFFSET: usize = 320;

    /// The `REPORTDATA` field of the QE's SGX report.
    pub fn report_data(&self) -> &[u8] {
        &self.rprt[Self::REPORT_DATA_OFFSET..]
    }
}

impl<'a> FromBytes<'a> for QuotingEnclave<'a> {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (rprt, bytes) = bytes.parse()?;
        let (sign, bytes) = bytes.parse()?;
        let (auth, bytes) = bytes.parse()?;
        let (cert, bytes) = bytes.parse()?;
        let qe = Self {
            rprt,
            sign,
            auth,
            cert,
        };

        Ok((qe, bytes))
    }
}
