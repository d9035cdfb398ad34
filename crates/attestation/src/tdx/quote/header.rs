// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use super::error::QuoteError;
use super::traits::{FromBytes, ParseBytes};

/// The 48-byte header that opens every TDX quote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub key_type: u16,
    pub tee_type: u32,
    pub qe_svn: u16,
    pub pce_svn: u16,
    pub qe_vendor_id: [u8; 16],
    pub user_data: [u8; 20],
}

impl Header {
    pub const SIZE: usize = 48;

    /// ECDSA-256-with-P-256 curve.
    pub const KEY_TYPE_ES256: u16 = 2;

    pub const TEE_TYPE_TDX: u32 = 0x81;

    pub const QE_VENDOR_ID_INTEL: [u8; 16] = [
        0x93, 0x9a, 0x72, 0x33, 0xf7, 0x9c, 0x4c, 0xa9, 0x94, 0x0a, 0x0d, 0xb3, 0x95, 0x7f, 0x06,
        0x07,
    ];
}

impl<'a> FromBytes<'a> for Header {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (version, bytes): (u16, _) = bytes.parse()?;
        let (key_type, bytes): (u16, _) = bytes.parse()?;
        let (tee_type, bytes): (u32, _) = bytes.parse()?;

        if key_type != Self::KEY_TYPE_ES256 {
            return Err(QuoteError::UnsupportedKeyType(key_type));
        }

        if tee_type != Self::TEE_TYPE_TDX {
            return Err(QuoteError::UnsupportedTeeType(tee_type));
        }

        let (qe_svn, bytes) = bytes.parse()?;
        let (pce_svn, bytes) = bytes.parse()?;
        let (qe_vendor_id, bytes) = bytes.parse()?;
        let (user_data, bytes) = bytes.parse()?;

        let header = Self {
            version,
            key_type,
            tee_type,
            qe_svn,
            pce_svn,
            qe_vendor_id,
            user_data,
        };

        Ok((header, bytes))
    }
}
