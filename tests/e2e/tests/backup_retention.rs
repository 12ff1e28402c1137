//! Backup scheduling and retention journeys.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use memento_core::{
    BackupConfig, BackupService, Memory, RetentionPolicy, SqliteStore,
};
use memento_e2e_tests::test_memory;
use tempfile::TempDir;

fn seed_backup(dir: &Path, name: &str, age: chrono::Duration) {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, b"seeded backup").unwrap();
    let mtime = std::time::SystemTime::from(chrono::Utc::now() - age);
    let file = std::fs::File::options().append(true).open(&path).unwrap();
    file.set_modified(mtime).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn retention_scenario() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(Some(dir.path().join("live.db"))).unwrap());
    store
        .store(&Memory::build(test_memory("snapshot payload")))
        .unwrap();

    let backup_dir = dir.path().join("backups");
    for (name, age) in [
        ("a-1h.db", chrono::Duration::hours(1)),
        ("a-2h.db", chrono::Duration::hours(2)),
        ("a-3h.db", chrono::Duration::hours(3)),
        ("b-26h.db", chrono::Duration::hours(26)),
        ("b-48h.db", chrono::Duration::hours(48)),
        ("c-8d.db", chrono::Duration::days(8)),
        ("c-14d.db", chrono::Duration::days(14)),
        ("d-31d.db", chrono::Duration::days(31)),
    ] {
        seed_backup(&backup_dir, name, age);
    }

    let service = BackupService::new(
        Arc::clone(&store),
        BackupConfig {
            retention: RetentionPolicy {
                hourly: 2,
                daily: 1,
                weekly: 1,
                monthly: 1,
            },
            ..BackupConfig::new(backup_dir)
        },
    );

    let report = service.backup_now().await.unwrap();
    assert!(report.verified);

    let remaining = service.list_backups().unwrap();
    assert!(remaining.len() <= 6, "kept {} files", remaining.len());
    // The fresh backup survived.
    assert!(remaining.iter().any(|b| b.path == report.path));
    // The monthly tier keeps the >30d file.
    assert!(remaining.iter().any(|b| b.path.ends_with("d-31d.db")));
    // Both 7-30d files cannot both be retained.
    let weekly = remaining
        .iter()
        .filter(|b| b.path.ends_with("c-8d.db") || b.path.ends_with("c-14d.db"))
        .count();
    assert_eq!(weekly, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduler_ticks_and_stops() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(Some(dir.path().join("live.db"))).unwrap());
    store
        .store(&Memory::build(test_memory("scheduled payload")))
        .unwrap();

    let service = Arc::new(BackupService::new(
        Arc::clone(&store),
        BackupConfig {
            interval: Duration::from_millis(200),
            ..BackupConfig::new(dir.path().join("backups"))
        },
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(Arc::clone(&service).start(shutdown_rx));

    // Give the timer a few periods.
    tokio::time::sleep(Duration::from_millis(700)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("scheduler stops promptly")
        .unwrap();

    let backups = service.list_backups().unwrap();
    assert!(!backups.is_empty(), "expected at least one scheduled backup");

    // Each backup restores into a working store.
    let target = dir.path().join("restored.db");
    service.restore(&backups[0].path, &target).await.unwrap();
    let restored = SqliteStore::open(Some(target)).unwrap();
    assert_eq!(restored.stats().unwrap().total_memories, 1);
}
