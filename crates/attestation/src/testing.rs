// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Fixtures for exercising attestation without TDX hardware.
//!
//! [`QuoteFactory`] plays the part of the quoting enclave: it owns a PCK
//! root and leaf certificate plus an attestation key and signs well-formed
//! TDX quotes over arbitrary report data.

use crate::binding::ReportData;
use crate::crypto::sha256;
use crate::issuer::{IssueError, QuoteIssuer};
use crate::tdx::quote::body::{Body, TdReport10};
use crate::tdx::quote::es256::SignatureData;
use crate::tdx::quote::header::Header;
use crate::tdx::quote::qe::cert;
use crate::Policy;

use std::sync::Arc;

use async_trait::async_trait;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};

/// Offset of `REPORTDATA` inside a v4 quote.
pub const REPORT_DATA_OFFSET: usize = Header::SIZE + TdReport10::SIZE - 64;

/// Offset of the attestation key signature inside a v4 quote.
pub const V4_SIGNATURE_OFFSET: usize = Header::SIZE + TdReport10::SIZE + 4;

pub const QE_SVN: u16 = 8;
pub const PCE_SVN: u16 = 13;

const QE_AUTH_DATA: &[u8] = b"attested-proxy test quoting enclave";

fn params(cn: &str, sans: Vec<String>) -> CertificateParams {
    let mut params = CertificateParams::new(sans);
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.not_before = date_time_ymd(2020, 1, 1);
    params.not_after = date_time_ymd(2049, 12, 31);
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, cn);
    params
}

fn ca(cn: &str) -> Certificate {
    let mut params = params(cn, Vec::new());
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    Certificate::from_params(params).expect("failed to generate CA certificate")
}

fn signing_key(pkcs8: &[u8]) -> SigningKey {
    SigningKey::from_pkcs8_der(pkcs8).expect("rcgen produced an unusable P-256 key")
}

struct Inner {
    root_pem: String,
    root_der: Vec<u8>,
    chain_pem: String,
    pck: SigningKey,
    att: SigningKey,
}

/// Issues TDX quotes signed by a throwaway PCK hierarchy.
#[derive(Clone)]
pub struct QuoteFactory(Arc<Inner>);

impl Default for QuoteFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteFactory {
    pub fn new() -> Self {
        let root = ca("Test SGX Root CA");

        let mut leaf = params("Test SGX PCK Certificate", Vec::new());
        leaf.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
        ];
        let leaf = Certificate::from_params(leaf).expect("failed to generate PCK certificate");

        // Serialize once; ECDSA signatures differ between calls.
        let root_pem = root.serialize_pem().expect("failed to encode root");
        let leaf_pem = leaf
            .serialize_pem_with_signer(&root)
            .expect("failed to sign PCK certificate");
        let root_der = rustls_pemfile::certs(&mut root_pem.as_bytes())
            .expect("failed to decode root")
            .remove(0);

        let att = KeyPair::generate(&PKCS_ECDSA_P256_SHA256).expect("failed to generate key");

        Self(Arc::new(Inner {
            chain_pem: format!("{leaf_pem}{root_pem}"),
            root_pem,
            root_der,
            pck: signing_key(&leaf.serialize_private_key_der()),
            att: signing_key(&att.serialize_der()),
        }))
    }

    pub fn root_pem(&self) -> &str {
        &self.0.root_pem
    }

    pub fn root_der(&self) -> &[u8] {
        &self.0.root_der
    }

    /// A policy trusting exactly this factory's root.
    pub fn policy(&self) -> Policy {
        Policy::new(vec![self.0.root_der.clone()])
    }

    /// A v4 quote over `report_data`.
    pub fn quote(&self, report_data: &[u8; 64]) -> Vec<u8> {
        self.build(4, report_data)
    }

    /// A v5 quote carrying a TDX 1.0 body over `report_data`.
    pub fn quote_v5(&self, report_data: &[u8; 64]) -> Vec<u8> {
        self.build(5, report_data)
    }

    fn build(&self, version: u16, report_data: &[u8; 64]) -> Vec<u8> {
        let mut signed = Vec::new();
        signed.extend_from_slice(&version.to_le_bytes());
        signed.extend_from_slice(&Header::KEY_TYPE_ES256.to_le_bytes());
        signed.extend_from_slice(&Header::TEE_TYPE_TDX.to_le_bytes());
        signed.extend_from_slice(&QE_SVN.to_le_bytes());
        signed.extend_from_slice(&PCE_SVN.to_le_bytes());
        signed.extend_from_slice(&Header::QE_VENDOR_ID_INTEL);
        signed.extend_from_slice(&[0u8; 20]);
        if version == 5 {
            signed.extend_from_slice(&Body::TYPE_TD10.to_le_bytes());
            signed.extend_from_slice(&(TdReport10::SIZE as u32).to_le_bytes());
        }

        let mut body = [0u8; TdReport10::SIZE];
        body[TdReport10::SIZE - 64..].copy_from_slice(report_data);
        signed.extend_from_slice(&body);

        let sig: Signature = self.0.att.sign(&signed);
        let key = VerifyingKey::from(&self.0.att).to_encoded_point(false);
        let key = &key.as_bytes()[1..];

        // The QE report commits to the attestation key and auth data.
        let mut report = [0u8; 384];
        report[320..352].copy_from_slice(&sha256([key, QE_AUTH_DATA].concat()));
        let report_sig: Signature = self.0.pck.sign(&report);

        let mut cert = Vec::new();
        cert.extend_from_slice(&report);
        cert.extend_from_slice(&report_sig.to_bytes());
        cert.extend_from_slice(&(QE_AUTH_DATA.len() as u16).to_le_bytes());
        cert.extend_from_slice(QE_AUTH_DATA);
        cert.extend_from_slice(&cert::Data::PCK_CERT_CHAIN.to_le_bytes());
        cert.extend_from_slice(&(self.0.chain_pem.len() as u32).to_le_bytes());
        cert.extend_from_slice(self.0.chain_pem.as_bytes());

        let mut data = Vec::new();
        data.extend_from_slice(&sig.to_bytes());
        data.extend_from_slice(key);
        data.extend_from_slice(&SignatureData::QE_REPORT_CERT_DATA.to_le_bytes());
        data.extend_from_slice(&(cert.len() as u32).to_le_bytes());
        data.extend_from_slice(&cert);

        let mut quote = signed;
        quote.extend_from_slice(&(data.len() as u32).to_le_bytes());
        quote.extend_from_slice(&data);
        quote
    }
}

#[async_trait]
impl QuoteIssuer for QuoteFactory {
    async fn request_quote(&self, data: &ReportData) -> Result<Vec<u8>, IssueError> {
        Ok(self.quote(data.as_bytes()))
    }
}

/// A CA plus a server certificate it issued, all PEM encoded.
#[derive(Clone, Debug)]
pub struct TlsIdentity {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
}

impl TlsIdentity {
    pub fn generate(host: &str) -> Self {
        let ca = ca("Test Proxy CA");

        let mut leaf = params(host, vec![host.to_string()]);
        leaf.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        leaf.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let leaf = Certificate::from_params(leaf).expect("failed to generate server certificate");

        Self {
            ca_pem: ca.serialize_pem().expect("failed to encode CA"),
            cert_pem: leaf
                .serialize_pem_with_signer(&ca)
                .expect("failed to sign server certificate"),
            key_pem: leaf.serialize_private_key_pem(),
        }
    }
}
