// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

mod cert;
mod hashing;
mod spki;

pub use self::cert::TbsCertificateExt;
pub use self::hashing::sha256;
pub use self::spki::{SubjectPublicKeyInfoExt, ES256};
