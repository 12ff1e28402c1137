//! Schema migrations.
//!
//! Migrations are numbered `NNNN_name.up.sql` / `NNNN_name.down.sql` pairs.
//! The crate ships its own schema as embedded files ([`MigrationManager::builtin`]);
//! deployments can point at an external directory instead
//! ([`MigrationManager::from_dir`]). Applied versions are tracked in
//! `schema_migrations(version, applied_at)`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{Error, Result};

/// A single up/down migration.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version parsed from the zero-padded numeric filename prefix
    pub version: u32,
    /// Human-readable name from the filename
    pub name: String,
    /// SQL applied by `up`
    pub up: String,
    /// SQL applied by `down`; rollbacks past a version without one fail
    pub down: Option<String>,
}

/// Discovers, tracks and applies migrations.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    migrations: Vec<Migration>,
}

impl MigrationManager {
    /// The crate's embedded schema migrations.
    pub fn builtin() -> Self {
        let migrations = vec![
            Migration {
                version: 1,
                name: "initial_schema".to_string(),
                up: include_str!("../../migrations/0001_initial_schema.up.sql").to_string(),
                down: Some(
                    include_str!("../../migrations/0001_initial_schema.down.sql").to_string(),
                ),
            },
            Migration {
                version: 2,
                name: "full_text_index".to_string(),
                up: include_str!("../../migrations/0002_full_text_index.up.sql").to_string(),
                down: Some(
                    include_str!("../../migrations/0002_full_text_index.down.sql").to_string(),
                ),
            },
            Migration {
                version: 3,
                name: "unknown_type_stats".to_string(),
                up: include_str!("../../migrations/0003_unknown_type_stats.up.sql").to_string(),
                down: Some(
                    include_str!("../../migrations/0003_unknown_type_stats.down.sql").to_string(),
                ),
            },
        ];
        Self { migrations }
    }

    /// Discover migrations from a directory.
    ///
    /// Files with a non-numeric prefix, and `.down.sql` files without an
    /// `.up.sql` partner, are ignored.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut ups: BTreeMap<u32, (String, String)> = BTreeMap::new();
        let mut downs: BTreeMap<u32, String> = BTreeMap::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            if let Some((version, name)) = parse_migration_name(file_name, ".up.sql") {
                let sql = std::fs::read_to_string(entry.path())?;
                if ups.insert(version, (name, sql)).is_some() {
                    return Err(Error::InvalidInput(format!(
                        "duplicate migration version {} in {}",
                        version,
                        dir.display()
                    )));
                }
            } else if let Some((version, _)) = parse_migration_name(file_name, ".down.sql") {
                let sql = std::fs::read_to_string(entry.path())?;
                downs.insert(version, sql);
            }
        }

        let migrations = ups
            .into_iter()
            .map(|(version, (name, up))| Migration {
                version,
                name,
                up,
                down: downs.remove(&version),
            })
            .collect();

        Ok(Self { migrations })
    }

    /// The highest known migration version, if any.
    pub fn latest(&self) -> Option<u32> {
        self.migrations.last().map(|m| m.version)
    }

    /// The highest applied version, `None` when no migration has run.
    pub fn version(&self, conn: &Connection) -> Result<Option<u32>> {
        ensure_tracking_table(conn)?;
        let version: Option<u32> =
            conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })?;
        Ok(version)
    }

    /// Apply every migration above the current version, ascending.
    /// Re-running on an up-to-date database is a no-op.
    pub fn up(&self, conn: &Connection) -> Result<u32> {
        ensure_tracking_table(conn)?;
        let current = self.version(conn)?.unwrap_or(0);
        let mut applied = 0;

        for migration in &self.migrations {
            if migration.version <= current {
                continue;
            }
            tracing::info!(
                version = migration.version,
                name = %migration.name,
                "applying migration"
            );
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(&migration.up)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![migration.version, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            applied += 1;
        }

        Ok(applied)
    }

    /// Roll back all applied migrations, descending.
    pub fn down(&self, conn: &Connection) -> Result<u32> {
        ensure_tracking_table(conn)?;
        let mut rolled_back = 0;

        for migration in self.migrations.iter().rev() {
            let is_applied: bool = conn.query_row(
                "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get::<_, i64>(0).map(|n| n > 0),
            )?;
            if !is_applied {
                continue;
            }
            let Some(down) = &migration.down else {
                return Err(Error::InvalidInput(format!(
                    "migration {} has no down script",
                    migration.version
                )));
            };
            tracing::info!(
                version = migration.version,
                name = %migration.name,
                "rolling back migration"
            );
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(down)?;
            tx.execute(
                "DELETE FROM schema_migrations WHERE version = ?1",
                params![migration.version],
            )?;
            tx.commit()?;
            rolled_back += 1;
        }

        Ok(rolled_back)
    }
}

fn ensure_tracking_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Parse `NNNN_name<suffix>` into `(version, name)`.
fn parse_migration_name(file_name: &str, suffix: &str) -> Option<(u32, String)> {
    let stem = file_name.strip_suffix(suffix)?;
    let (prefix, name) = stem.split_once('_')?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version: u32 = prefix.parse().ok()?;
    Some((version, name.to_string()))
}
