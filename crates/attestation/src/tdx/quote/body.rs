// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use super::error::QuoteError;
use super::traits::{FromBytes, ParseBytes};

/// TD report body as produced by TDX 1.0 modules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TdReport10 {
    pub tee_tcb_svn: [u8; 16],
    pub mr_seam: [u8; 48],
    pub mr_signer_seam: [u8; 48],
    pub seam_attributes: [u8; 8],
    pub td_attributes: [u8; 8],
    pub xfam: [u8; 8],
    pub mr_td: [u8; 48],
    pub mr_config_id: [u8; 48],
    pub mr_owner: [u8; 48],
    pub mr_owner_config: [u8; 48],
    pub rtmr: [[u8; 48]; 4],
    pub report_data: [u8; 64],
}

impl TdReport10 {
    pub const SIZE: usize = 584;
}

impl<'a> FromBytes<'a> for TdReport10 {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (tee_tcb_svn, bytes) = bytes.parse()?;
        let (mr_seam, bytes) = bytes.parse()?;
        let (mr_signer_seam, bytes) = bytes.parse()?;
        let (seam_attributes, bytes) = bytes.parse()?;
        let (td_attributes, bytes) = bytes.parse()?;
        let (xfam, bytes) = bytes.parse()?;
        let (mr_td, bytes) = bytes.parse()?;
        let (mr_config_id, bytes) = bytes.parse()?;
        let (mr_owner, bytes) = bytes.parse()?;
        let (mr_owner_config, bytes) = bytes.parse()?;
        let (rtmr0, bytes) = bytes.parse()?;
        let (rtmr1, bytes) = bytes.parse()?;
        let (rtmr2, bytes) = bytes.parse()?;
        let (rtmr3, bytes) = bytes.parse()?;
        let (report_data, bytes) = bytes.parse()?;

        let body = Self {
            tee_tcb_svn,
            mr_seam,
            mr_signer_seam,
            seam_attributes,
            td_attributes,
            xfam,
            mr_td,
            mr_config_id,
            mr_owner,
            mr_owner_config,
            rtmr: [rtmr0, rtmr1, rtmr2, rtmr3],
            report_data,
        };

        Ok((body, bytes))
    }
}

/// TD report body as produced by TDX 1.5 modules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TdReport15 {
    pub base: TdReport10,
    pub tee_tcb_svn2: [u8; 16],
    pub mr_service_td: [u8; 48],
}

impl TdReport15 {
    pub const SIZE: usize = 648;
}

impl<'a> FromBytes<'a> for TdReport15 {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (base, bytes) = bytes.parse()?;
        let (tee_tcb_svn2, bytes) = bytes.parse()?;
        let (mr_service_td, bytes) = bytes.parse()?;

        let body = Self {
            base,
            tee_tcb_svn2,
            mr_service_td,
        };

        Ok((body, bytes))
    }
}

/// The report body carried by a v5 quote, selected by its body descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Td10(TdReport10),
    Td15(TdReport15),
}

impl Body {
    pub const TYPE_TD10: u16 = 2;
    pub const TYPE_TD15: u16 = 3;

    pub fn report(&self) -> &TdReport10 {
        match self {
            Body::Td10(body) => body,
            Body::Td15(body) => &body.base,
        }
    }
}

impl<'a> FromBytes<'a> for Body {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (typ, bytes): (u16, _) = bytes.parse()?;
        let (size, bytes): (u32, _) = bytes.parse()?;
        let size = size as usize;

        match typ {
            Self::TYPE_TD10 if size == TdReport10::SIZE => {
                let (body, bytes) = bytes.parse()?;
                Ok((Body::Td10(body), bytes))
            }
            Self::TYPE_TD15 if size == TdReport15::SIZE => {
                let (body, bytes) = bytes.parse()?;
                Ok((Body::Td15(body), bytes))
            }
            Self::TYPE_TD10 => Err(QuoteError::UnexpectedLength(
                "TD 1.0 report body",
                size,
                TdReport10::SIZE,
            )),
            Self::TYPE_TD15 => Err(QuoteError::UnexpectedLength(
                "TD 1.5 report body",
                size,
                TdReport15::SIZE,
            )),
            typ => Err(QuoteError::UnsupportedBodyType(typ)),
        }
    }
}
