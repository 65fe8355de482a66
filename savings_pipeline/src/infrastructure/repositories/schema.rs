// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! SQLite store bootstrap.
//!
//! The store is the serialization point between the orchestration engine
//! and the reprocessing controller: one writer at a time, readers never
//! blocked mid-run. Setup establishes that contract before any component
//! touches a table — write-ahead logging is switched on and the migration
//! set (schema plus the shipped configuration rows every stage refuses to
//! run without) is applied.

use sqlx::migrate::MigrateDatabase;
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Brings a connected pool up to the current store contract: WAL journal
/// mode, then any pending migrations.
///
/// Idempotent by construction — applied migrations are tracked by sqlx,
/// and switching an already-WAL database to WAL is a no-op.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    debug!("journal mode set to WAL");

    sqlx::migrate!("../migrations").run(pool).await?;
    info!("store schema and shipped configuration are current");
    Ok(())
}

/// Opens the store at `database_url`, creating the file on first run, and
/// applies [`ensure_schema`]. The single startup entry point for the
/// binary and the integration tests.
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if !sqlx::Sqlite::database_exists(database_url).await? {
        info!(store = %database_url, "creating store on first run");
        sqlx::Sqlite::create_database(database_url).await?;
    }

    let pool = SqlitePool::connect(database_url).await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Folds the write-ahead log back into the main database file.
///
/// Called once after a successful run: the run's writes all land in the
/// WAL, and truncating it here keeps the log from growing across batches
/// and keeps the main file self-contained for operator backups.
pub async fn checkpoint_wal(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await?;
    debug!("write-ahead log folded into the main database file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqlitePool {
        let path = dir.path().join("store.db");
        initialize_database(&format!("sqlite://{}", path.display()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_run_creates_the_store_with_seeded_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_store(&dir).await;

        // The shipped thresholds must land with the schema: stages refuse
        // to start against an unconfigured store.
        let config_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unified_config")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(config_rows > 0, "shipped configuration missing after init");
    }

    #[tokio::test]
    async fn store_runs_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_store(&dir).await;

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn reopening_an_existing_store_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let first = open_store(&dir).await;
        let tables_after_first: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(&first)
                .await
                .unwrap();
        first.close().await;

        let second = open_store(&dir).await;
        let tables_after_second: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(&second)
                .await
                .unwrap();
        assert_eq!(tables_after_first, tables_after_second);
    }

    #[tokio::test]
    async fn checkpoint_succeeds_after_writes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_store(&dir).await;

        sqlx::query(
            "INSERT INTO available_products_raw (platform, source, method, bank_name, account_type, aer_rate) \
             VALUES ('raisin', 'moneyfacts', 'easy_access', 'Paragon Bank', 'easy_access', 4.4)",
        )
        .execute(&pool)
        .await
        .unwrap();

        checkpoint_wal(&pool).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM available_products_raw")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1, "checkpoint must not lose committed writes");
    }
}
