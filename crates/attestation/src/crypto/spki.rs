// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, Result};
use spki::{AlgorithmIdentifier, SubjectPublicKeyInfo};

use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, ID_EC_PUBLIC_KEY as ECPK, SECP_256_R_1 as P256,
    SECP_384_R_1 as P384,
};

pub const ES256: AlgorithmIdentifier<'static> = AlgorithmIdentifier {
    oid: ECDSA_WITH_SHA_256,
    parameters: None,
};

pub trait SubjectPublicKeyInfoExt {
    /// Verifies a signature
    ///
    /// The signature on the specified body will be validated with the
    /// specified algorithm. Note that the signature is provided in the
    /// already encoded form as it would appear in an X.509 certificate.
    /// Raw `r || s` signatures from a quote have to be DER-encoded first.
    fn verify(&self, body: &[u8], algo: AlgorithmIdentifier<'_>, signature: &[u8]) -> Result<()>;
}

impl SubjectPublicKeyInfoExt for SubjectPublicKeyInfo<'_> {
    fn verify(&self, body: &[u8], algo: AlgorithmIdentifier<'_>, sign: &[u8]) -> Result<()> {
        match (self.algorithm.oids()?, (algo.oid, algo.parameters)) {
            ((ECPK, Some(P256)), (ECDSA_WITH_SHA_256, None)) => {
                use p256::ecdsa::signature::Verifier;
                let vkey = p256::ecdsa::VerifyingKey::from_sec1_bytes(self.subject_public_key)?;
                let sig = p256::ecdsa::Signature::from_der(sign)?;
                Ok(vkey.verify(body, &sig)?)
            }

            ((ECPK, Some(P384)), (ECDSA_WITH_SHA_384, None)) => {
                use p384::ecdsa::signature::Verifier;
                let vkey = p384::ecdsa::VerifyingKey::from_sec1_bytes(self.subject_public_key)?;
                let sig = p384::ecdsa::Signature::from_der(sign)?;
                Ok(vkey.verify(body, &sig)?)
            }

            (key, (oid, _)) => Err(anyhow!(
                "unsupported key {:?} for signature algorithm {}",
                key,
                oid
            )),
        }
    }
}
