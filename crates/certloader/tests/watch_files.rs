//! End-to-end tests against real files and the OS watcher.

mod common;

use std::time::Duration;

use certwatch_loader::{future_watcher, CertError, CredentialStore, Watcher};
use tempfile::TempDir;

use common::{config, eventually, write_ca, write_keypair};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn new_watcher_requires_existing_files() {
    let dir = TempDir::new().unwrap();
    let err = Watcher::new(&config(dir.path())).unwrap_err();
    assert!(matches!(err, CertError::Io { .. }));
}

#[tokio::test]
async fn missing_directory_is_a_construction_error() {
    let dir = TempDir::new().unwrap();
    let gone = dir.path().join("not-yet");
    let err = future_watcher(&config(&gone)).unwrap_err();
    assert!(matches!(err, CertError::Notify(_)));
}

#[tokio::test]
async fn rotation_is_picked_up() {
    let dir = TempDir::new().unwrap();
    let first = write_keypair(dir.path());
    write_ca(dir.path());

    let watcher = Watcher::new(&config(dir.path())).unwrap();
    assert!(watcher.store().ready());
    assert_eq!(watcher.store().keypair().unwrap().id(), first);
    let generation = watcher.store().ca_generation();

    let second = write_keypair(dir.path());
    write_ca(dir.path());
    assert_ne!(first, second);

    let store = watcher.store();
    assert!(
        eventually(TIMEOUT, || {
            store.keypair().map(|k| k.id() == second).unwrap_or(false)
                && store.ca_generation() > generation
        })
        .await,
        "rotation not observed"
    );
    watcher.stop();
    watcher.stopped().await;
}

#[tokio::test]
async fn malformed_write_keeps_last_good_material() {
    let dir = TempDir::new().unwrap();
    let serial = write_keypair(dir.path());
    write_ca(dir.path());
    let watcher = Watcher::new(&config(dir.path())).unwrap();

    common::atomic_write(&dir.path().join("tls.crt"), "not a certificate\n");
    common::atomic_write(&dir.path().join("ca.crt"), "-----BEGIN CERTIFICATE-----\n");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let store = watcher.store();
    assert!(store.ready());
    assert_eq!(store.keypair().unwrap().id(), serial);
    assert_eq!(store.ca_pool().unwrap().len(), 1);
    watcher.stop();
}

#[tokio::test]
async fn future_watcher_is_ready_when_files_exist() {
    let dir = TempDir::new().unwrap();
    let serial = write_keypair(dir.path());
    write_ca(dir.path());

    let pending = future_watcher(&config(dir.path())).unwrap();
    let watcher = tokio::time::timeout(TIMEOUT, pending.ready)
        .await
        .expect("not delivered")
        .expect("stopped before ready");

    assert!(watcher.store().ready());
    assert_eq!(watcher.store().keypair().unwrap().id(), serial);
    watcher.stop();
}

#[tokio::test]
async fn future_watcher_waits_for_files() {
    let dir = TempDir::new().unwrap();
    let pending = future_watcher(&config(dir.path())).unwrap();
    let mut ready = pending.ready;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(ready.try_recv().is_err());

    let serial = write_keypair(dir.path());
    write_ca(dir.path());

    let watcher = tokio::time::timeout(TIMEOUT, ready)
        .await
        .expect("not delivered")
        .expect("stopped before ready");
    assert!(watcher.store().ready());
    assert_eq!(watcher.store().keypair().unwrap().id(), serial);
    watcher.stop();
}

#[tokio::test]
async fn future_watcher_stop_closes_channel() {
    let dir = TempDir::new().unwrap();
    let pending = future_watcher(&config(dir.path())).unwrap();

    pending.stop.stop();
    pending.stop.stop();
    let result = tokio::time::timeout(TIMEOUT, pending.ready)
        .await
        .expect("receiver not resolved");
    assert!(result.is_err());
}
