// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Intel TDX DCAP quotes, versions 4 and 5.
//!
//! The layout follows the Intel TDX DCAP Quote Generation Library reference:
//! a 48-byte header, the TD report body, and ECDSA signature data whose
//! certification chain ends at the Intel SGX root CA.
//! <https://download.01.org/intel-sgx/latest/dcap-latest/linux/docs/Intel_TDX_DCAP_Quoting_Library_API.pdf>

pub mod body;
pub mod error;
pub mod es256;
pub mod header;
pub mod qe;
pub mod traits;

use body::{Body, TdReport10};
use error::QuoteError;
use es256::SignatureData;
use header::Header;
use traits::{FromBytes, ParseBytes};

#[derive(Clone, Debug)]
pub struct QuoteV4<'a> {
    pub header: Header,
    pub body: TdReport10,
    signed: &'a [u8],
    pub sign: SignatureData<'a>,
}

#[derive(Clone, Debug)]
pub struct QuoteV5<'a> {
    pub header: Header,
    pub body: Body,
    signed: &'a [u8],
    pub sign: SignatureData<'a>,
}

/// A parsed TDX quote.
///
/// The set of versions is closed: anything else fails to parse with
/// [`QuoteError::UnsupportedQuoteVersion`].
#[derive(Clone, Debug)]
pub enum Quote<'a> {
    V4(QuoteV4<'a>),
    V5(QuoteV5<'a>),
}

impl<'a> FromBytes<'a> for QuoteV4<'a> {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let all = bytes;
        let (header, bytes) = bytes.parse()?;
        let (body, bytes) = bytes.parse()?;
        let signed = &all[..all.len() - bytes.len()];
        let (sign, bytes) = bytes.parse()?;

        let quote = Self {
            header,
            body,
            signed,
            sign,
        };

        Ok((quote, bytes))
    }
}

impl<'a> FromBytes<'a> for QuoteV5<'a> {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let all = bytes;
        let (header, bytes) = bytes.parse()?;
        let (body, bytes) = bytes.parse()?;
        let signed = &all[..all.len() - bytes.len()];
        let (sign, bytes) = bytes.parse()?;

        let quote = Self {
            header,
            body,
            signed,
            sign,
        };

        Ok((quote, bytes))
    }
}

impl<'a> FromBytes<'a> for Quote<'a> {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (version, _): (u16, _) = bytes.parse()?;

        match version {
            4 => bytes.parse().map(|(q, b)| (Quote::V4(q), b)),
            5 => bytes.parse().map(|(q, b)| (Quote::V5(q), b)),
            v => Err(QuoteError::UnsupportedQuoteVersion(v)),
        }
    }
}

impl<'a> Quote<'a> {
    /// Parses a complete quote, rejecting trailing bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, QuoteError> {
        let (quote, rest): (Self, _) = bytes.parse()?;
        if !rest.is_empty() {
            return Err(QuoteError::TrailingBytes(rest.len()));
        }

        Ok(quote)
    }

    pub fn version(&self) -> u16 {
        self.header().version
    }

    pub fn header(&self) -> &Header {
        match self {
            Quote::V4(q) => &q.header,
            Quote::V5(q) => &q.header,
        }
    }

    pub fn report(&self) -> &TdReport10 {
        match self {
            Quote::V4(q) => &q.body,
            Quote::V5(q) => q.body.report(),
        }
    }

    /// The 64-byte `REPORTDATA` the TD supplied when the quote was generated.
    pub fn user_data(&self) -> &[u8; 64] {
        &self.report().report_data
    }

    /// The bytes covered by the attestation key signature.
    pub fn signed(&self) -> &'a [u8] {
        match self {
            Quote::V4(q) => q.signed,
            Quote::V5(q) => q.signed,
        }
    }

    pub fn signature_data(&self) -> &SignatureData<'a> {
        match self {
            Quote::V4(q) => &q.sign,
            Quote::V5(q) => &q.sign,
        }
    }
}
