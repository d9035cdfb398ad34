// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use super::error::QuoteError;

pub trait Steal<T> {
    fn steal(&self, len: usize) -> Result<(&[T], &[T]), QuoteError>;
}

impl<T> Steal<T> for [T] {
    fn steal(&self, len: usize) -> Result<(&[T], &[T]), QuoteError> {
        if self.len() < len {
            return Err(QuoteError::Truncated {
                needed: len,
                remaining: self.len(),
            });
        }

        Ok(self.split_at(len))
    }
}

pub trait FromBytes<'a>: Sized {
    type Error;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error>;
}

impl<'a, const N: usize> FromBytes<'a> for &'a [u8; N] {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        let (lhs, rhs) = bytes.steal(N)?;
        let lhs = lhs.try_into().map_err(|_| QuoteError::Truncated {
            needed: N,
            remaining: lhs.len(),
        })?;
        Ok((lhs, rhs))
    }
}

impl<'a, const N: usize> FromBytes<'a> for [u8; N] {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        bytes.parse().map(|(l, r): (&[u8; N], _)| (*l, r))
    }
}

impl<'a> FromBytes<'a> for u16 {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        bytes
            .parse()
            .map(|(l, r): ([u8; 2], _)| (u16::from_le_bytes(l), r))
    }
}

impl<'a> FromBytes<'a> for u32 {
    type Error = QuoteError;

    fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Self::Error> {
        bytes
            .parse()
            .map(|(l, r): ([u8; 4], _)| (u32::from_le_bytes(l), r))
    }
}

pub trait ParseBytes<'a, T: FromBytes<'a>> {
    type Error;

    fn parse(self) -> Result<(T, &'a [u8]), T::Error>;
}

impl<'a, T: FromBytes<'a>> ParseBytes<'a, T> for &'a [u8] {
    type Error = T::Error;

    fn parse(self) -> Result<(T, &'a [u8]), Self::Error> {
        T::from_bytes(self)
    }
}
