//! Backup service
//!
//! Scheduled consistent snapshots of the storage engine with integrity
//! verification and tiered (hourly/daily/weekly/monthly) retention.
//!
//! Snapshots go through SQLite's online backup API, never a file copy of a
//! live database. One backup is in flight at a time; listing is unlocked.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::storage::SqliteStore;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// How many backups each age tier keeps.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Backups younger than 24h
    pub hourly: usize,
    /// 1-7 days
    pub daily: usize,
    /// 7-30 days
    pub weekly: usize,
    /// 30-365 days; anything older is deleted unconditionally
    pub monthly: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            hourly: 24,
            daily: 7,
            weekly: 4,
            monthly: 12,
        }
    }
}

/// Backup service configuration.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    pub interval: Duration,
    pub verify_backups: bool,
    pub retention: RetentionPolicy,
}

impl BackupConfig {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            interval: Duration::from_secs(3600),
            verify_backups: true,
            retention: RetentionPolicy::default(),
        }
    }
}

// ============================================================================
// REPORTS
// ============================================================================

/// Outcome of one backup run.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_ms: u64,
    pub verified: bool,
    pub pruned: usize,
}

/// Metadata of one backup file on disk.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Service health report.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupHealth {
    pub status: HealthStatus,
    pub last_backup: Option<DateTime<Utc>>,
    pub next_backup: Option<DateTime<Utc>>,
    pub total_backups: usize,
    pub directory: PathBuf,
    pub disk_used_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Scheduled snapshot + retention service over one [`SqliteStore`].
pub struct BackupService {
    store: Arc<SqliteStore>,
    config: BackupConfig,
    /// Serializes snapshot runs; listing stays unlocked
    in_flight: tokio::sync::Mutex<()>,
    last_backup: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl BackupService {
    pub fn new(store: Arc<SqliteStore>, config: BackupConfig) -> Self {
        Self {
            store,
            config,
            in_flight: tokio::sync::Mutex::new(()),
            last_backup: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Take one consistent snapshot now.
    ///
    /// Concurrent calls serialize; each produces its own timestamped file.
    /// Retention runs after a successful snapshot and its errors never fail
    /// the backup.
    pub async fn backup_now(&self) -> Result<BackupReport> {
        let _guard = self.in_flight.lock().await;
        let started = Instant::now();
        let now = Utc::now();

        std::fs::create_dir_all(&self.config.backup_dir)?;
        let file_name = format!("memento-{}.db", now.format("%Y%m%d-%H%M%S%.3f"));
        let path = self.config.backup_dir.join(file_name);

        self.store.backup_to(&path)?;
        let size_bytes = std::fs::metadata(&path)?.len();

        let verified = if self.config.verify_backups {
            match verify_snapshot(&path) {
                Ok(()) => true,
                Err(err) => {
                    // A snapshot that fails verification is worse than no
                    // snapshot.
                    let _ = std::fs::remove_file(&path);
                    return Err(err);
                }
            }
        } else {
            false
        };

        if let Ok(mut last) = self.last_backup.lock() {
            *last = Some(now);
        }

        let pruned = match self.apply_retention(now) {
            Ok(pruned) => pruned,
            Err(err) => {
                tracing::warn!(error = %err, "retention pruning failed");
                0
            }
        };

        let report = BackupReport {
            path,
            size_bytes,
            duration_ms: started.elapsed().as_millis() as u64,
            verified,
            pruned,
        };
        tracing::info!(
            path = %report.path.display(),
            size_bytes = report.size_bytes,
            duration_ms = report.duration_ms,
            verified = report.verified,
            pruned = report.pruned,
            "backup complete"
        );
        Ok(report)
    }

    /// Backup files directly in the backup dir, newest first.
    ///
    /// Only `.db` files count; subdirectories and other extensions are
    /// ignored. A missing directory is an error.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&self.config.backup_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            let metadata = entry.metadata()?;
            let timestamp: DateTime<Utc> = metadata.modified()?.into();
            backups.push(BackupInfo {
                path,
                timestamp,
                size_bytes: metadata.len(),
            });
        }
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    /// Tiered retention pruning relative to `now`. Returns files deleted.
    fn apply_retention(&self, now: DateTime<Utc>) -> Result<usize> {
        let backups = self.list_backups()?;

        let mut hourly: Vec<&BackupInfo> = Vec::new();
        let mut daily: Vec<&BackupInfo> = Vec::new();
        let mut weekly: Vec<&BackupInfo> = Vec::new();
        let mut monthly: Vec<&BackupInfo> = Vec::new();
        let mut expired: Vec<&BackupInfo> = Vec::new();

        for backup in &backups {
            let age = now.signed_duration_since(backup.timestamp);
            if age > chrono::Duration::days(365) {
                expired.push(backup);
            } else if age > chrono::Duration::days(30) {
                monthly.push(backup);
            } else if age > chrono::Duration::days(7) {
                weekly.push(backup);
            } else if age > chrono::Duration::hours(24) {
                daily.push(backup);
            } else {
                hourly.push(backup);
            }
        }

        let mut pruned = 0;
        let policy = &self.config.retention;
        // Lists come newest-first from list_backups; keep the N newest of
        // each tier.
        for (tier, keep) in [
            (hourly, policy.hourly),
            (daily, policy.daily),
            (weekly, policy.weekly),
            (monthly, policy.monthly),
        ] {
            for backup in tier.into_iter().skip(keep) {
                std::fs::remove_file(&backup.path)?;
                pruned += 1;
            }
        }
        for backup in expired {
            std::fs::remove_file(&backup.path)?;
            pruned += 1;
        }

        if pruned > 0 {
            tracing::info!(pruned, "retention pruned old backups");
        }
        Ok(pruned)
    }

    /// Restore a backup to a target path. The target database must be
    /// offline.
    pub async fn restore(&self, backup_path: &Path, target_path: &Path) -> Result<()> {
        let _guard = self.in_flight.lock().await;

        verify_snapshot(backup_path)?;
        std::fs::copy(backup_path, target_path)?;
        let file = std::fs::File::open(target_path)?;
        file.sync_all()?;
        verify_snapshot(target_path)?;
        tracing::info!(
            backup = %backup_path.display(),
            target = %target_path.display(),
            "restore complete"
        );
        Ok(())
    }

    /// Service health. No backups yet is healthy (service just started).
    pub fn health(&self) -> BackupHealth {
        let last_backup = self.last_backup.lock().ok().and_then(|l| *l);
        let (status, total_backups, disk_used_bytes) = match self.list_backups() {
            Ok(backups) => {
                let disk: u64 = backups.iter().map(|b| b.size_bytes).sum();
                let status = match (last_backup, backups.first()) {
                    (None, _) => HealthStatus::Healthy,
                    (Some(last), _)
                        if Utc::now().signed_duration_since(last)
                            > chrono::Duration::from_std(self.config.interval * 2)
                                .unwrap_or_else(|_| chrono::Duration::days(7)) =>
                    {
                        HealthStatus::Warning
                    }
                    _ => HealthStatus::Healthy,
                };
                (status, backups.len(), disk)
            }
            Err(_) => (HealthStatus::Error, 0, 0),
        };

        BackupHealth {
            status,
            last_backup,
            next_backup: last_backup.map(|last| {
                last + chrono::Duration::from_std(self.config.interval)
                    .unwrap_or_else(|_| chrono::Duration::hours(1))
            }),
            total_backups,
            directory: self.config.backup_dir.clone(),
            disk_used_bytes,
        }
    }

    /// Timer loop: one backup per interval until `shutdown` fires.
    pub async fn start(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays fast.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.backup_now().await {
                        tracing::error!(error = %err, "scheduled backup failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("backup scheduler stopping");
                    break;
                }
            }
        }
    }
}

/// Open a snapshot read-only and run its integrity check.
fn verify_snapshot(path: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| Error::Integrity(format!("cannot open snapshot: {}", e)))?;
    let result: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|e| Error::Integrity(format!("integrity check failed to run: {}", e)))?;
    if result != "ok" {
        return Err(Error::Integrity(format!(
            "snapshot {} failed integrity check: {}",
            path.display(),
            result
        )));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
