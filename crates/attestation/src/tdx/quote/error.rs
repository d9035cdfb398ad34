// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use core::fmt::{self, Display};

/// Structural failure while decoding a quote.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuoteError {
    Truncated { needed: usize, remaining: usize },
    UnsupportedQuoteVersion(u16),
    UnsupportedKeyType(u16),
    UnsupportedTeeType(u32),
    UnsupportedBodyType(u16),
    UnexpectedLength(&'static str, usize, usize),
    UnsupportedCertDataType(u16),
    CertChainParse(String),
    TrailingBytes(usize),
}

impl Display for QuoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteError::Truncated { needed, remaining } => {
                write!(
                    f,
                    "Quote truncated: needed {} bytes, {} remaining",
                    needed, remaining
                )
            }
            QuoteError::UnsupportedQuoteVersion(version) => {
                write!(f, "Unsupported quote version {}", version)
            }
            QuoteError::UnsupportedKeyType(key) => {
                write!(f, "Unsupported attestation key type {}", key)
            }
            QuoteError::UnsupportedTeeType(tee) => {
                write!(f, "Unsupported TEE type {:#x}", tee)
            }
            QuoteError::UnsupportedBodyType(body) => {
                write!(f, "Unsupported quote body type {}", body)
            }
            QuoteError::UnexpectedLength(ident, actual, expected) => {
                write!(
                    f,
                    "The {} slice had an unexpected length of {}, expected {}",
                    ident, actual, expected
                )
            }
            QuoteError::UnsupportedCertDataType(typ) => {
                write!(f, "Unsupported certification data type {}", typ)
            }
            QuoteError::CertChainParse(message) => {
                write!(f, "Certificate chain parse error: {}", message)
            }
            QuoteError::TrailingBytes(count) => {
                write!(f, "{} unexpected trailing bytes after quote", count)
            }
        }
    }
}

impl std::error::Error for QuoteError {}
