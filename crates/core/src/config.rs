use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default quiet window used to coalesce bursts of filesystem events.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Default capacity of the event queue between the OS watcher and the loop.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> Result<T> {
    match profiled_env_opt(profile, key) {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: v,
        }),
        None => Ok(default),
    }
}

// ── Paths ─────────────────────────────────────────────────────

/// Which credential a watched file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathRole {
    KeypairCert,
    KeypairKey,
    CertificateAuthority,
}

impl PathRole {
    /// Cert and key files are reloaded together as one keypair.
    pub fn is_keypair(self) -> bool {
        matches!(self, PathRole::KeypairCert | PathRole::KeypairKey)
    }
}

impl fmt::Display for PathRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRole::KeypairCert => write!(f, "keypair-cert"),
            PathRole::KeypairKey => write!(f, "keypair-key"),
            PathRole::CertificateAuthority => write!(f, "ca"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPath {
    pub path: PathBuf,
    pub role: PathRole,
}

/// The set of files making up a TLS configuration.
///
/// Any role may be left empty when it is not required; an empty role counts
/// as satisfied for readiness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPaths {
    pub ca_files: Vec<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

fn non_empty(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

impl CredentialPaths {
    /// Build from raw inputs, treating empty paths as absent.
    pub fn new<I, P>(ca_files: I, cert_file: Option<PathBuf>, key_file: Option<PathBuf>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            ca_files: ca_files
                .into_iter()
                .map(Into::into)
                .filter(|p: &PathBuf| !p.as_os_str().is_empty())
                .collect(),
            cert_file: non_empty(cert_file),
            key_file: non_empty(key_file),
        }
    }

    /// Reject a certificate without its key (or the reverse).
    pub fn validate(&self) -> Result<()> {
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(ConfigError::InvalidKeypair);
        }
        Ok(())
    }

    pub fn has_keypair(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }

    pub fn has_custom_ca(&self) -> bool {
        !self.ca_files.is_empty()
    }

    /// Classify every configured file by role.
    ///
    /// A path configured both as part of the keypair and as a CA file is
    /// tracked once, with the keypair role.
    pub fn tracked_paths(&self) -> Vec<TrackedPath> {
        let mut tracked: Vec<TrackedPath> = Vec::new();
        let mut push = |path: &Path, role: PathRole| {
            if tracked.iter().all(|t| t.path.as_path() != path) {
                tracked.push(TrackedPath {
                    path: path.to_path_buf(),
                    role,
                });
            }
        };
        if let Some(cert) = &self.cert_file {
            push(cert.as_path(), PathRole::KeypairCert);
        }
        if let Some(key) = &self.key_file {
            push(key.as_path(), PathRole::KeypairKey);
        }
        for ca in &self.ca_files {
            push(ca.as_path(), PathRole::CertificateAuthority);
        }
        tracked
    }

    fn from_env_profiled(p: &str) -> Self {
        let ca_files: Vec<String> = profiled_env_opt(p, "CERTWATCH_CA_FILES")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        Self::new(
            ca_files,
            profiled_env_opt(p, "CERTWATCH_CERT_FILE").map(PathBuf::from),
            profiled_env_opt(p, "CERTWATCH_KEY_FILE").map(PathBuf::from),
        )
    }
}

// ── Watcher ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub paths: CredentialPaths,
    /// Quiet window after the first event for a role before reloading it.
    pub coalesce_window: Duration,
    /// Capacity of the filesystem event queue.
    pub event_buffer: usize,
}

impl WatcherConfig {
    pub fn new(paths: CredentialPaths) -> Self {
        Self {
            profile: String::new(),
            paths,
            coalesce_window: DEFAULT_COALESCE_WINDOW,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CERTWATCH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self> {
        let profile = env_or("CERTWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let paths = CredentialPaths::from_env_profiled(p);
        paths.validate()?;
        let coalesce_ms = profiled_env_parse(
            p,
            "CERTWATCH_COALESCE_MS",
            DEFAULT_COALESCE_WINDOW.as_millis() as u64,
        )?;
        let event_buffer = profiled_env_parse(p, "CERTWATCH_EVENT_BUFFER", DEFAULT_EVENT_BUFFER)?;
        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CERTWATCH_EVENT_BUFFER".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(Self {
            profile: p.to_string(),
            paths,
            coalesce_window: Duration::from_millis(coalesce_ms),
            event_buffer,
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        };
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  cert_file:   {}", show(&self.paths.cert_file));
        tracing::info!("  key_file:    {}", show(&self.paths.key_file));
        tracing::info!("  ca_files:    {}", self.paths.ca_files.len());
        tracing::info!("  coalesce:    {}ms", self.coalesce_window.as_millis());
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "cert_file": self.paths.cert_file,
            "key_file": self.paths.key_file,
            "ca_files": self.paths.ca_files,
            "coalesce_ms": self.coalesce_window.as_millis() as u64,
            "event_buffer": self.event_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(ca: &[&str], cert: &str, key: &str) -> CredentialPaths {
        CredentialPaths::new(
            ca.iter().copied(),
            Some(PathBuf::from(cert)),
            Some(PathBuf::from(key)),
        )
    }

    #[test]
    fn empty_inputs_are_absent() {
        let p = paths(&["", "/etc/ca.pem", ""], "", "");
        assert_eq!(p.ca_files, vec![PathBuf::from("/etc/ca.pem")]);
        assert!(p.cert_file.is_none());
        assert!(p.key_file.is_none());
        assert!(!p.has_keypair());
        assert!(p.has_custom_ca());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn half_keypair_is_rejected() {
        let p = paths(&[], "/tls/tls.crt", "");
        assert_eq!(p.validate(), Err(ConfigError::InvalidKeypair));
        let p = paths(&[], "", "/tls/tls.key");
        assert_eq!(p.validate(), Err(ConfigError::InvalidKeypair));
    }

    #[test]
    fn tracked_paths_classify_roles() {
        let p = paths(&["/tls/ca.crt", "/tls/extra-ca.crt"], "/tls/tls.crt", "/tls/tls.key");
        let tracked = p.tracked_paths();
        assert_eq!(tracked.len(), 4);
        assert_eq!(tracked[0].role, PathRole::KeypairCert);
        assert_eq!(tracked[1].role, PathRole::KeypairKey);
        assert!(tracked[2..].iter().all(|t| t.role == PathRole::CertificateAuthority));
    }

    #[test]
    fn keypair_role_wins_over_ca() {
        let p = paths(&["/tls/tls.crt", "/tls/ca.crt"], "/tls/tls.crt", "/tls/tls.key");
        let tracked = p.tracked_paths();
        assert_eq!(tracked.len(), 3);
        let shared: Vec<_> = tracked
            .iter()
            .filter(|t| t.path == Path::new("/tls/tls.crt"))
            .collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].role, PathRole::KeypairCert);
    }

    #[test]
    fn for_profile_reads_prefixed_keys() {
        env::set_var("CWTESTA_CERTWATCH_CERT_FILE", "/a/tls.crt");
        env::set_var("CWTESTA_CERTWATCH_KEY_FILE", "/a/tls.key");
        env::set_var("CWTESTA_CERTWATCH_CA_FILES", "/a/ca1.pem, /a/ca2.pem");
        env::set_var("CWTESTA_CERTWATCH_COALESCE_MS", "250");

        let cfg = WatcherConfig::for_profile("cwtesta").unwrap();
        assert_eq!(cfg.profile_label(), "CWTESTA");
        assert_eq!(cfg.paths.cert_file, Some(PathBuf::from("/a/tls.crt")));
        assert_eq!(cfg.paths.ca_files.len(), 2);
        assert_eq!(cfg.coalesce_window, Duration::from_millis(250));
        assert_eq!(cfg.event_buffer, DEFAULT_EVENT_BUFFER);
    }

    #[test]
    fn summary_lists_paths_and_window() {
        let cfg = WatcherConfig::new(paths(&["/tls/ca.crt"], "/tls/tls.crt", "/tls/tls.key"))
            .with_coalesce_window(Duration::from_millis(40));
        cfg.log_summary();

        let summary = cfg.summary();
        assert_eq!(summary["profile"], "default");
        assert_eq!(summary["cert_file"], "/tls/tls.crt");
        assert_eq!(summary["key_file"], "/tls/tls.key");
        assert_eq!(summary["ca_files"][0], "/tls/ca.crt");
        assert_eq!(summary["coalesce_ms"], 40);
        assert_eq!(summary["event_buffer"], DEFAULT_EVENT_BUFFER as u64);
    }

    #[test]
    fn summary_without_keypair_is_null() {
        let cfg = WatcherConfig::new(paths(&["/tls/ca.crt"], "", ""));
        let summary = cfg.summary();
        assert!(summary["cert_file"].is_null());
        assert!(summary["key_file"].is_null());
    }

    #[test]
    fn for_profile_rejects_bad_numbers() {
        env::set_var("CWTESTB_CERTWATCH_COALESCE_MS", "soon");
        let err = WatcherConfig::for_profile("cwtestb").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CERTWATCH_COALESCE_MS"));
    }
}
