//! Parsed TLS material: certificates, keypairs and CA pools.
//!
//! PEM decoding and X.509 parsing use `x509-parser`; private keys are parsed
//! with `rcgen` so the key can be matched against the leaf certificate.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::error::{CertError, Result};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";
const PKCS8_LABEL: &str = "PRIVATE KEY";

/// Metadata extracted from an X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Serial number, colon-separated hex.
    pub serial: String,
    pub subject: String,
    pub issuer: String,
    /// Unix seconds, clamped to 0 for pre-1970 dates.
    pub not_before: u64,
    pub not_after: u64,
    /// SHA-256 over the DER encoding.
    pub fingerprint: [u8; 32],
}

impl CertificateInfo {
    fn from_x509(cert: &X509Certificate<'_>, der: &[u8]) -> Self {
        let clamp = |ts: i64| if ts >= 0 { ts as u64 } else { 0 };
        Self {
            serial: cert.tbs_certificate.raw_serial_as_string(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: clamp(cert.validity().not_before.timestamp()),
            not_after: clamp(cert.validity().not_after.timestamp()),
            fingerprint: Sha256::digest(der).into(),
        }
    }

    /// Fingerprint as lowercase hex.
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Both bounds inclusive.
    pub fn is_valid_at(&self, timestamp: u64) -> bool {
        self.not_before <= timestamp && timestamp <= self.not_after
    }
}

/// A DER certificate together with its parsed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    info: CertificateInfo,
}

impl Certificate {
    /// Parse a DER-encoded X.509 certificate.
    pub fn from_der(der: Vec<u8>, path: &Path) -> Result<Self> {
        let info = {
            let (_, cert) = X509Certificate::from_der(&der).map_err(|e| CertError::Certificate {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            CertificateInfo::from_x509(&cert, &der)
        };
        Ok(Self { der, info })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }
}

/// A certificate chain and its matching private key, loaded as one unit.
#[derive(Clone)]
pub struct Keypair {
    chain: Vec<Certificate>,
    private_key: Vec<u8>,
}

impl Keypair {
    /// Read a PEM certificate chain and a PKCS#8 PEM private key.
    ///
    /// The first certificate of `cert_path` is the leaf; the key must belong
    /// to it.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let chain = parse_certificates(&read_file(cert_path)?, cert_path)?;
        let leaf = chain
            .first()
            .ok_or_else(|| CertError::NoCertificate(cert_path.to_path_buf()))?;

        let private_key = parse_private_key(&read_file(key_path)?, key_path)?;
        let key_pair = rcgen::KeyPair::try_from(private_key.as_slice()).map_err(|e| {
            CertError::PrivateKey {
                path: key_path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let leaf_spki = {
            let (_, cert) = X509Certificate::from_der(leaf.der()).map_err(|e| {
                CertError::Certificate {
                    path: cert_path.to_path_buf(),
                    reason: e.to_string(),
                }
            })?;
            cert.public_key().raw.to_vec()
        };
        if key_pair.public_key_der() != leaf_spki {
            return Err(CertError::KeyMismatch {
                cert: cert_path.to_path_buf(),
                key: key_path.to_path_buf(),
            });
        }

        Ok(Self { chain, private_key })
    }

    pub fn leaf(&self) -> &CertificateInfo {
        // Construction guarantees a non-empty chain.
        &self.chain[0].info
    }

    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// PKCS#8 DER of the private key.
    pub fn private_key_der(&self) -> &[u8] {
        &self.private_key
    }

    /// Identity used in logs: the leaf serial number.
    pub fn id(&self) -> &str {
        &self.leaf().serial
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("leaf", self.leaf())
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// The set of trusted CA certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaPool {
    certs: Vec<Certificate>,
}

impl CaPool {
    /// Read every CA bundle; each file must contribute at least one certificate.
    pub fn from_pem_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut certs = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let parsed = parse_certificates(&read_file(path)?, path)?;
            if parsed.is_empty() {
                return Err(CertError::NoCaCertificates(path.to_path_buf()));
            }
            certs.extend(parsed);
        }
        Ok(Self { certs })
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn contains_fingerprint(&self, fingerprint: &[u8; 32]) -> bool {
        self.certs.iter().any(|c| &c.info.fingerprint == fingerprint)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| CertError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Collect every `CERTIFICATE` block, ignoring other block types.
fn parse_certificates(data: &[u8], path: &Path) -> Result<Vec<Certificate>> {
    let mut certs = Vec::new();
    for pem in Pem::iter_from_buffer(data) {
        let pem = pem.map_err(|e| CertError::Certificate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if pem.label == CERTIFICATE_LABEL {
            certs.push(Certificate::from_der(pem.contents, path)?);
        }
    }
    Ok(certs)
}

fn parse_private_key(data: &[u8], path: &Path) -> Result<Vec<u8>> {
    for pem in Pem::iter_from_buffer(data) {
        let pem = pem.map_err(|e| CertError::PrivateKey {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        match pem.label.as_str() {
            PKCS8_LABEL => return Ok(pem.contents),
            "RSA PRIVATE KEY" | "EC PRIVATE KEY" | "ENCRYPTED PRIVATE KEY" => {
                return Err(CertError::PrivateKey {
                    path: path.to_path_buf(),
                    reason: format!("unsupported key format {:?}, expected PKCS#8", pem.label),
                });
            }
            _ => continue,
        }
    }
    Err(CertError::NoPrivateKey(path.to_path_buf()))
}
