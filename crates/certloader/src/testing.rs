//! Certificate fixtures for unit tests.

use std::path::{Path, PathBuf};

use rcgen::{BasicConstraints, CertificateParams, DnType, DnValue, IsCa, KeyPair};
use x509_parser::prelude::*;

fn self_signed(common_name: &str, ca: bool) -> (String, String, String) {
    let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    let (_, parsed) = X509Certificate::from_der(cert.der()).unwrap();
    let serial = parsed.tbs_certificate.raw_serial_as_string();
    (cert.pem(), key.serialize_pem(), serial)
}

/// Write `tls.crt` / `tls.key` into `dir`; returns the paths and the serial.
pub(crate) fn write_keypair(dir: &Path, common_name: &str) -> (PathBuf, PathBuf, String) {
    let (cert_pem, key_pem, serial) = self_signed(common_name, false);
    let cert = dir.join("tls.crt");
    let key = dir.join("tls.key");
    std::fs::write(&cert, cert_pem).unwrap();
    std::fs::write(&key, key_pem).unwrap();
    (cert, key, serial)
}

/// Write a self-signed CA certificate to `dir/name`.
pub(crate) fn write_ca(dir: &Path, name: &str, common_name: &str) -> PathBuf {
    let (cert_pem, _, _) = self_signed(common_name, true);
    let path = dir.join(name);
    std::fs::write(&path, cert_pem).unwrap();
    path
}
