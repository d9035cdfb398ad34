// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use super::super::error::QuoteError;
use super::super::traits::{FromBytes, ParseBytes, Steal};

/// QE authentication data, hashed together with the attestation key.
#[derive(Clone, Debug)]
pub struct Data<'a>(&'a [u8]);

impl<'a> AsRef<[u8]> for Data<'a> {
    fn as_ref(&self) -> &[u8] {
        self.0
    }
}

impl<'a> FromBytes<'a> for Data<'a> {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (len, bytes): (u16, _) = bytes.parse()?;
        let (buf, bytes) = bytes.steal(len.into())?;
        Ok((Self(buf), bytes))
    }
}
