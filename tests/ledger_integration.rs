//! Integration tests for the on-disk download ledger.

use ripper_core::config::DatabaseConfig;
use ripper_core::{Ledger, LedgerError, MediaType, Provider};
use tempfile::TempDir;

fn database_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        downloads_enabled: true,
        downloads_path: dir.path().join("data").join("downloads.db"),
        failed_downloads_enabled: true,
        failed_downloads_path: dir.path().join("data").join("failed.db"),
    }
}

// ==================== Persistence ====================

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().expect("temp dir");
    let config = database_config(&dir);

    let ledger = Ledger::open(&config).await.expect("open");
    ledger.record_success("123").await.expect("record success");
    ledger
        .record_failure(Provider::Tidal, MediaType::Album, "456", "region locked")
        .await
        .expect("record failure");
    ledger.close().await;

    let reopened = Ledger::open(&config).await.expect("reopen");
    assert!(reopened.contains("123").await.expect("contains"));
    assert!(
        reopened
            .contains_failed(Provider::Tidal, MediaType::Album, "456")
            .await
            .expect("contains_failed")
    );
    let failures = reopened.failures().await.expect("failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].source, "tidal");
    assert_eq!(failures[0].reason.as_deref(), Some("region locked"));
}

#[tokio::test]
async fn test_open_creates_missing_parent_directories() {
    let dir = TempDir::new().expect("temp dir");
    let config = database_config(&dir);

    let _ledger = Ledger::open(&config).await.expect("open");

    assert!(config.downloads_path.exists());
    assert!(config.failed_downloads_path.exists());
}

#[tokio::test]
async fn test_failure_does_not_mark_id_succeeded() {
    let dir = TempDir::new().expect("temp dir");
    let config = database_config(&dir);
    let ledger = Ledger::open(&config).await.expect("open");

    ledger
        .record_failure(Provider::Deezer, MediaType::Track, "9", "gone")
        .await
        .expect("record failure");

    assert!(!ledger.contains("9").await.expect("contains"));
}

// ==================== Toggles ====================

#[tokio::test]
async fn test_disabled_tables_remember_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = database_config(&dir);
    config.downloads_enabled = false;
    config.failed_downloads_enabled = false;

    let ledger = Ledger::open(&config).await.expect("open");
    ledger.record_success("1").await.expect("record success");
    ledger
        .record_failure(Provider::Qobuz, MediaType::Track, "1", "x")
        .await
        .expect("record failure");

    assert!(!ledger.contains("1").await.expect("contains"));
    assert!(ledger.failures().await.expect("failures").is_empty());
    assert!(!config.downloads_path.exists());
}

#[tokio::test]
async fn test_only_failed_table_enabled() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = database_config(&dir);
    config.downloads_enabled = false;

    let ledger = Ledger::open(&config).await.expect("open");
    ledger.record_success("1").await.expect("record success");
    ledger
        .record_failure(Provider::Qobuz, MediaType::Playlist, "p", "empty")
        .await
        .expect("record failure");

    assert!(!ledger.contains("1").await.expect("contains"));
    assert!(
        ledger
            .contains_failed(Provider::Qobuz, MediaType::Playlist, "p")
            .await
            .expect("contains_failed")
    );
}

// ==================== Errors ====================

#[tokio::test]
async fn test_corrupted_file_is_an_open_error() {
    let dir = TempDir::new().expect("temp dir");
    let config = database_config(&dir);
    std::fs::create_dir_all(config.downloads_path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&config.downloads_path, b"not a valid sqlite file\x00\x00\x00")
        .expect("write corrupted file");

    let err = Ledger::open(&config).await.expect_err("corrupted file must not open");

    assert!(matches!(err, LedgerError::Open { .. }), "got {err:?}");
}
