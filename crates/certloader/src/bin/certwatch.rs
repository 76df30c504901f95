//! certwatch: keep a TLS keypair and CA bundle loaded and log rotations.
//!
//! Waits for the configured files to appear, reports when the credentials
//! become ready, then keeps reloading them on change until Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use certwatch_loader::{future_watcher, CredentialPaths, FileReloader, Watcher, WatcherConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Watch TLS credential files and reload them on change.
#[derive(Parser, Debug)]
#[command(name = "certwatch", version, about)]
struct Cli {
    /// CA bundle to trust (repeatable). Defaults to CERTWATCH_CA_FILES.
    #[arg(long = "ca-file")]
    ca_files: Vec<PathBuf>,

    /// Certificate chain file. Defaults to CERTWATCH_CERT_FILE.
    #[arg(long)]
    cert_file: Option<PathBuf>,

    /// PKCS#8 private key file. Defaults to CERTWATCH_KEY_FILE.
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Quiet window for coalescing change bursts, in milliseconds.
    #[arg(long)]
    coalesce_ms: Option<u64>,
}

impl Cli {
    /// Command-line values win over the environment.
    fn into_config(self, mut config: WatcherConfig) -> anyhow::Result<WatcherConfig> {
        if !self.ca_files.is_empty() || self.cert_file.is_some() || self.key_file.is_some() {
            let ca_files = if self.ca_files.is_empty() {
                config.paths.ca_files.clone()
            } else {
                self.ca_files
            };
            config.paths = CredentialPaths::new(
                ca_files,
                self.cert_file.or(config.paths.cert_file.take()),
                self.key_file.or(config.paths.key_file.take()),
            );
            config.paths.validate()?;
        }
        if let Some(ms) = self.coalesce_ms {
            config.coalesce_window = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn log_credentials(watcher: &Watcher<FileReloader>) {
    let (keypair, ca_pool) = watcher.store().keypair_and_ca_pool();
    match keypair {
        Some(kp) => info!(
            serial = %kp.id(),
            subject = %kp.leaf().subject,
            not_after = kp.leaf().not_after,
            "serving keypair"
        ),
        None => info!("no keypair configured"),
    }
    match ca_pool {
        Some(pool) => info!(certs = pool.len(), "trusting CA pool"),
        None => info!("no custom CA configured"),
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    certwatch_core::load_dotenv();
    let cli = Cli::parse();
    let config = cli.into_config(WatcherConfig::from_env()?)?;
    config.log_summary();

    if !config.paths.has_keypair() && !config.paths.has_custom_ca() {
        warn!("no credential files configured, nothing to watch");
    }

    let pending = future_watcher(&config).context("failed to start watching credential files")?;
    let stop = pending.stop.clone();

    let watcher = tokio::select! {
        delivered = pending.ready => match delivered {
            Ok(watcher) => watcher,
            Err(_) => {
                info!("watcher stopped before credentials became ready");
                return Ok(());
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted while waiting for credentials");
            stop.stop();
            return Ok(());
        }
    };

    info!("TLS credentials ready");
    log_credentials(&watcher);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    watcher.stop();
    watcher.stopped().await;
    info!("certwatch exited cleanly");
    Ok(())
}
