//! Local certificate signing against the cluster CA.
//!
//! Leaf key pairs are ECDSA P-256. A certificate signing request is built from
//! the new key and signed by the CA loaded from its secret; the subject, usages
//! and validity of the issued certificate are set by the signer, not taken from
//! the request.

use rcgen::{
    string::Ia5String, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use x509_parser::prelude::*;

/// Fraction of the lifetime after which a certificate is re-issued, in percent
pub const ROTATION_THRESHOLD_PERCENT: i64 = 80;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("certificate signing failed: {0}")]
    Signing(String),

    #[error("certificate parsing error: {0}")]
    Parse(String),

    #[error("invalid DNS name '{0}'")]
    InvalidDnsName(String),
}

pub type Result<T> = std::result::Result<T, PkiError>;

/// Usage a leaf certificate is issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    DigitalSignature,
    KeyEncipherment,
    ClientAuth,
    ServerAuth,
}

/// Strip carriage returns and one trailing newline so PEM text compares equal
/// regardless of how it was encoded
pub fn sanitize_cert(pem: &str) -> String {
    let unix = pem.replace('\r', "");
    unix.strip_suffix('\n').unwrap_or(&unix).to_string()
}

/// Parse PEM-encoded data and return the DER bytes
fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let parsed = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::Parse(format!("failed to parse PEM: {e}")))?;
    Ok(parsed.contents().to_vec())
}

/// Validity window and subject of an issued certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Unix timestamp
    pub not_before: i64,
    /// Unix timestamp
    pub not_after: i64,
    pub common_name: String,
}

impl CertificateInfo {
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::Parse(format!("failed to parse certificate: {e}")))?;
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
        })
    }

    /// Whether `now` is past the rotation point of the certificate's lifetime
    pub fn needs_rotation(&self, now: i64) -> bool {
        let lifetime = self.not_after - self.not_before;
        if lifetime <= 0 {
            return true;
        }
        (now - self.not_before) * 100 >= lifetime * ROTATION_THRESHOLD_PERCENT
    }
}

/// Certificate, private key and CA bundle of an issued leaf
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_pem: String,
}

/// Leaf certificate to issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRequest {
    pub common_name: String,
    /// Subject alternative names; the common name is always included
    pub dns_names: Vec<String>,
    pub usages: Vec<KeyUsage>,
    pub validity_days: i64,
}

/// Cluster certificate authority loaded from its secret
#[derive(Clone)]
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load a CA from its PEM certificate and key
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::Parse(format!("failed to parse CA key: {e}")))?;
        parse_pem(cert_pem)?;
        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        })
    }

    /// Create a self-signed CA
    pub fn self_signed(common_name: &str, validity_days: i64) -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params, validity_days);

        let key_pair = KeyPair::generate()
            .map_err(|e| PkiError::KeyGeneration(format!("failed to generate CA key: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| PkiError::Signing(format!("failed to create CA cert: {e}")))?;
        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Generate a key pair, build a signing request for it and sign it
    pub fn issue(&self, request: &LeafRequest) -> Result<IssuedCertificate> {
        let key_pair = KeyPair::generate()
            .map_err(|e| PkiError::KeyGeneration(format!("failed to generate leaf key: {e}")))?;

        let mut csr_params = CertificateParams::default();
        csr_params.distinguished_name = distinguished_name(&request.common_name);
        let csr_pem = csr_params
            .serialize_request(&key_pair)
            .and_then(|csr| csr.pem())
            .map_err(|e| PkiError::Signing(format!("failed to create CSR: {e}")))?;

        let cert_pem = self.sign_csr(&csr_pem, request)?;
        Ok(IssuedCertificate {
            cert_pem: sanitize_cert(&cert_pem),
            key_pem: sanitize_cert(&key_pair.serialize_pem()),
            ca_pem: sanitize_cert(&self.cert_pem),
        })
    }

    /// Sign a CSR, overriding its subject, usages and validity from `request`
    pub fn sign_csr(&self, csr_pem: &str, request: &LeafRequest) -> Result<String> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| PkiError::Signing(format!("failed to parse CSR: {e}")))?;

        csr.params.distinguished_name = distinguished_name(&request.common_name);
        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages = request
            .usages
            .iter()
            .filter_map(|usage| match usage {
                KeyUsage::DigitalSignature => Some(KeyUsagePurpose::DigitalSignature),
                KeyUsage::KeyEncipherment => Some(KeyUsagePurpose::KeyEncipherment),
                KeyUsage::ClientAuth | KeyUsage::ServerAuth => None,
            })
            .collect();
        csr.params.extended_key_usages = request
            .usages
            .iter()
            .filter_map(|usage| match usage {
                KeyUsage::ClientAuth => Some(ExtendedKeyUsagePurpose::ClientAuth),
                KeyUsage::ServerAuth => Some(ExtendedKeyUsagePurpose::ServerAuth),
                KeyUsage::DigitalSignature | KeyUsage::KeyEncipherment => None,
            })
            .collect();
        csr.params.subject_alt_names = subject_alt_names(request)?;
        set_validity(&mut csr.params, request.validity_days);

        let ca_key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| PkiError::Parse(format!("failed to load CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| PkiError::Parse(format!("failed to create issuer: {e}")))?;
        let signed = csr
            .signed_by(&issuer)
            .map_err(|e| PkiError::Signing(format!("failed to sign certificate: {e}")))?;
        Ok(signed.pem())
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn
}

fn set_validity(params: &mut CertificateParams, days: i64) {
    let now = ::time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + ::time::Duration::days(days);
}

fn subject_alt_names(request: &LeafRequest) -> Result<Vec<SanType>> {
    let mut names = vec![request.common_name.clone()];
    for name in &request.dns_names {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
        .into_iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(|_| PkiError::InvalidDnsName(name))
        })
        .collect()
}
