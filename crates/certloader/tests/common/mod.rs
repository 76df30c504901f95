//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use certwatch_loader::{CredentialPaths, WatcherConfig};
use rcgen::{BasicConstraints, CertificateParams, DnType, DnValue, IsCa, KeyPair};
use x509_parser::prelude::*;

pub const WINDOW: Duration = Duration::from_millis(50);

pub struct Pem {
    pub cert: String,
    pub key: String,
    pub serial: String,
}

pub fn self_signed(common_name: &str, ca: bool) -> Pem {
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
    Pem {
        cert: cert.pem(),
        key: key.serialize_pem(),
        serial: parsed.tbs_certificate.raw_serial_as_string(),
    }
}

/// Write through a temp file and rename, like most secret writers do.
pub fn atomic_write(path: &Path, contents: &str) {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents).unwrap();
    std::fs::rename(&tmp, path).unwrap();
}

/// Write a fresh keypair; returns its serial.
pub fn write_keypair(dir: &Path) -> String {
    let pem = self_signed("node.certwatch.test", false);
    atomic_write(&dir.join("tls.key"), &pem.key);
    atomic_write(&dir.join("tls.crt"), &pem.cert);
    pem.serial
}

pub fn write_ca(dir: &Path) {
    let pem = self_signed("certwatch test CA", true);
    atomic_write(&dir.join("ca.crt"), &pem.cert);
}

pub fn config(dir: &Path) -> WatcherConfig {
    let paths = CredentialPaths::new(
        vec![dir.join("ca.crt")],
        Some(dir.join("tls.crt")),
        Some(dir.join("tls.key")),
    );
    WatcherConfig::new(paths).with_coalesce_window(WINDOW)
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

pub fn paths_in(dir: &Path) -> Vec<PathBuf> {
    ["tls.crt", "tls.key", "ca.crt"]
        .iter()
        .map(|f| dir.join(f))
        .collect()
}
