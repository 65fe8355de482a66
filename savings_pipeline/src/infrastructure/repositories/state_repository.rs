// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline State Repository
//!
//! Two pieces of mutual-exclusion state live here:
//!
//! - the `orchestrator_pipeline_status` singleton (row id = 1) that guards
//!   concurrent full-pipeline runs, and
//! - `processing_state` lock rows that guard reprocessing invocations,
//!   with stale locks (older than ten minutes) reclaimed as failed.
//!
//! Both guards rely on SQLite serializing writers: the conditional UPDATE /
//! guarded INSERT either wins or observes the other winner.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use savings_pipeline_domain::{BatchStatus, PipelineError, PipelineStatus, ProcessingLock};

/// A lock row older than this belongs to a dead process.
pub fn lock_staleness() -> Duration {
    Duration::minutes(10)
}

#[derive(Debug, Clone)]
pub struct StateRepository {
    pool: SqlitePool,
}

impl StateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Reads the pipeline status singleton.
    pub async fn status(&self) -> Result<PipelineStatus, PipelineError> {
        let row = sqlx::query(
            "SELECT is_running, current_stage, batch_id, started_at FROM orchestrator_pipeline_status WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("reading pipeline status: {}", e)))?;

        let Some(row) = row else {
            return Ok(PipelineStatus::idle());
        };

        let started_at: Option<String> = row.get("started_at");
        Ok(PipelineStatus {
            is_running: row.get::<i64, _>("is_running") != 0,
            current_stage: row.get("current_stage"),
            batch_id: row.get("batch_id"),
            started_at: started_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        })
    }

    /// Claims the run guard. Fails with `CONCURRENT_EXECUTION` when another
    /// run holds it — the conditional UPDATE is the atomic test-and-set.
    pub async fn try_begin_run(&self, batch_id: &str) -> Result<(), PipelineError> {
        // Read first: a run holding the store's write lock would otherwise
        // surface as a generic database error instead of the refusal.
        let current = self.status().await?;
        if current.is_running {
            return Err(PipelineError::ConcurrentExecution(format!(
                "pipeline already running (batch {:?}, stage {:?})",
                current.batch_id, current.current_stage
            )));
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE orchestrator_pipeline_status \
             SET is_running = 1, current_stage = 'initializing', batch_id = ?, started_at = ?, updated_at = ? \
             WHERE id = 1 AND is_running = 0",
        )
        .bind(batch_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("claiming pipeline status: {}", e)))?;

        if result.rows_affected() == 0 {
            let status = self.status().await?;
            return Err(PipelineError::ConcurrentExecution(format!(
                "pipeline already running (batch {:?}, stage {:?})",
                status.batch_id, status.current_stage
            )));
        }
        Ok(())
    }

    /// Records the stage the run is currently in. Takes the run connection:
    /// the store allows one writer at a time, so mid-run status writes must
    /// ride the run's own transaction.
    pub async fn set_stage(&self, conn: &mut sqlx::SqliteConnection, stage: &str) -> Result<(), PipelineError> {
        sqlx::query("UPDATE orchestrator_pipeline_status SET current_stage = ?, updated_at = ? WHERE id = 1")
            .bind(stage)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::database_failed(format!("updating pipeline stage: {}", e)))?;
        Ok(())
    }

    /// Releases the run guard.
    pub async fn reset_idle(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE orchestrator_pipeline_status \
             SET is_running = 0, current_stage = NULL, batch_id = NULL, started_at = NULL, updated_at = ? \
             WHERE id = 1",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("resetting pipeline status: {}", e)))?;
        Ok(())
    }

    /// Startup recovery: a status row claiming to run for longer than the
    /// caller's budget marks a crashed engine and is reset to idle.
    pub async fn recover_stale_status(&self, budget: Duration) -> Result<bool, PipelineError> {
        let status = self.status().await?;
        if status.is_stale(Utc::now(), budget) {
            tracing::warn!(
                batch_id = ?status.batch_id,
                "resetting stale pipeline status from previous run"
            );
            self.reset_idle().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Acquires the exclusive processing lock for `process_type`.
    ///
    /// Stale running locks are reclaimed as failed first; if a live lock
    /// remains, acquisition fails with `LOCK_UNAVAILABLE` and the caller
    /// skips this invocation.
    pub async fn acquire_lock(&self, process_type: &str, metadata: Option<&str>) -> Result<i64, PipelineError> {
        let stale_cutoff = (Utc::now() - lock_staleness()).to_rfc3339();
        sqlx::query(
            "UPDATE processing_state SET status = 'failed', completed_at = ?, metadata = 'reclaimed stale lock' \
             WHERE process_type = ? AND status = 'running' AND started_at < ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(process_type)
        .bind(&stale_cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("reclaiming stale locks: {}", e)))?;

        // Guarded INSERT: only succeeds when no running lock remains.
        let result = sqlx::query(
            "INSERT INTO processing_state (process_type, status, started_at, metadata) \
             SELECT ?, 'running', ?, ? \
             WHERE NOT EXISTS (SELECT 1 FROM processing_state WHERE process_type = ? AND status = 'running')",
        )
        .bind(process_type)
        .bind(Utc::now().to_rfc3339())
        .bind(metadata)
        .bind(process_type)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("acquiring processing lock: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::LockUnavailable(format!(
                "'{}' lock already held",
                process_type
            )));
        }
        Ok(result.last_insert_rowid())
    }

    /// Releases a lock with its final status.
    pub async fn release_lock(
        &self,
        lock_id: i64,
        status: BatchStatus,
        metadata: Option<&str>,
    ) -> Result<(), PipelineError> {
        sqlx::query("UPDATE processing_state SET status = ?, completed_at = ?, metadata = COALESCE(?, metadata) WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(metadata)
            .bind(lock_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::database_failed(format!("releasing processing lock: {}", e)))?;
        Ok(())
    }

    /// True when a live (non-stale) running lock exists for the type.
    pub async fn lock_held(&self, process_type: &str) -> Result<bool, PipelineError> {
        let row = sqlx::query(
            "SELECT id, process_type, status, started_at, metadata FROM processing_state \
             WHERE process_type = ? AND status = 'running' ORDER BY id DESC LIMIT 1",
        )
        .bind(process_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("checking processing lock: {}", e)))?;

        let Some(row) = row else { return Ok(false) };
        let started_at: String = row.get("started_at");
        let lock = ProcessingLock {
            id: row.get("id"),
            process_type: row.get("process_type"),
            status: BatchStatus::Running,
            started_at: started_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now() - lock_staleness() - lock_staleness()),
            metadata: row.get("metadata"),
        };
        Ok(!lock.is_stale(Utc::now(), lock_staleness()))
    }
}
