// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use super::SubjectPublicKeyInfoExt;

use std::time::SystemTime;

use anyhow::{anyhow, bail, ensure, Result};
use const_oid::db::rfc5280::{ID_CE_BASIC_CONSTRAINTS, ID_CE_KEY_USAGE};
use der::{Decode, Encode};
use spki::AlgorithmIdentifier;
use x509::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages};
use x509::ext::Extension;
use x509::{Certificate, TbsCertificate};

/// What a certificate is being used for when its extensions are checked.
#[derive(Clone, Copy, Debug)]
enum Role<'r, 'c> {
    /// Signing arbitrary data, such as a QE report.
    Signer,

    /// Issuing `child`.
    Issuer(&'r TbsCertificate<'c>),
}

fn basic_constraints(tbs: &TbsCertificate<'_>) -> Result<Option<BasicConstraints>> {
    let mut found = tbs
        .extensions
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter(|e| e.extn_id == ID_CE_BASIC_CONSTRAINTS);

    let bc = match found.next() {
        Some(e) => BasicConstraints::from_der(e.extn_value)?,
        None => return Ok(None),
    };
    ensure!(found.next().is_none(), "duplicate basic constraints");
    Ok(Some(bc))
}

/// Returns whether `ext` was understood; errors if it forbids `role`.
fn check(issuer: &TbsCertificate<'_>, ext: &Extension<'_>, role: Role<'_, '_>) -> Result<bool> {
    match (ext.extn_id, role) {
        (ID_CE_KEY_USAGE, role) => {
            let ku = KeyUsage::from_der(ext.extn_value)?;
            let (needed, what) = match role {
                Role::Signer => (KeyUsages::DigitalSignature, "sign reports"),
                Role::Issuer(..) => (KeyUsages::KeyCertSign, "issue certificates"),
            };
            ensure!(ku.0.contains(needed), "certificate may not {what}");
            Ok(true)
        }

        (ID_CE_BASIC_CONSTRAINTS, Role::Signer) => {
            BasicConstraints::from_der(ext.extn_value)?;
            Ok(true)
        }

        (ID_CE_BASIC_CONSTRAINTS, Role::Issuer(child)) => {
            let parent = BasicConstraints::from_der(ext.extn_value)?;
            ensure!(parent.ca, "issuer is not a CA");

            // A self-signed root is exempt from its own path length.
            if issuer.subject_public_key_info == child.subject_public_key_info {
                return Ok(true);
            }

            if let Some(child) = basic_constraints(child)?.filter(|c| c.ca) {
                match (parent.path_len_constraint, child.path_len_constraint) {
                    (Some(p), Some(c)) if c >= p => bail!("path length exceeded"),
                    (Some(..), None) => bail!("missing path length"),
                    _ => (),
                }
            }
            Ok(true)
        }

        _ => Ok(false),
    }
}

pub trait TbsCertificateExt {
    /// Verifies `signature` over `body`, made directly by this certificate's
    /// key. Used for the QE report, which the PCK certificate signs.
    fn verify_signed(
        &self,
        body: &[u8],
        algo: AlgorithmIdentifier<'_>,
        signature: &[u8],
    ) -> Result<()>;

    /// Verifies that this certificate issued `cert` and returns the child's
    /// body so a chain can be walked link by link.
    fn verify_issued<'r, 'c>(&self, cert: &'r Certificate<'c>) -> Result<&'r TbsCertificate<'c>>;
}

impl TbsCertificateExt for TbsCertificate<'_> {
    fn verify_signed(
        &self,
        body: &[u8],
        algo: AlgorithmIdentifier<'_>,
        signature: &[u8],
    ) -> Result<()> {
        usable(self, Role::Signer)?;
        self.subject_public_key_info.verify(body, algo, signature)
    }

    fn verify_issued<'r, 'c>(&self, cert: &'r Certificate<'c>) -> Result<&'r TbsCertificate<'c>> {
        let child = &cert.tbs_certificate;
        ensure!(child.issuer == self.subject, "issuer name mismatch");
        ensure!(
            child.issuer_unique_id == self.subject_unique_id,
            "issuer id mismatch"
        );

        usable(self, Role::Issuer(child))?;

        let body = child.to_vec()?;
        let sign = cert
            .signature
            .as_bytes()
            .ok_or_else(|| anyhow!("invalid signature encoding"))?;
        self.subject_public_key_info
            .verify(&body, cert.signature_algorithm, sign)?;

        Ok(child)
    }
}

/// Checks the validity window and every extension of `tbs` for `role`.
fn usable(tbs: &TbsCertificate<'_>, role: Role<'_, '_>) -> Result<()> {
    let now = SystemTime::now();
    ensure!(
        tbs.validity.not_before.to_system_time() <= now,
        "certificate not yet valid"
    );
    ensure!(
        tbs.validity.not_after.to_system_time() >= now,
        "certificate expired"
    );

    for ext in tbs.extensions.as_deref().unwrap_or(&[]) {
        if !check(tbs, ext, role)? && ext.critical {
            bail!("unhandled critical extension: {}", ext.extn_id);
        }
    }

    Ok(())
}
