// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Repository
//!
//! Persistence for the regulatory audit trail: batch rows, per-stage
//! counters, per-product rows, dedup group rows, the corruption record,
//! and data quality reports. The recorder buffers; this repository writes.

use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use savings_pipeline_domain::entities::audit::{
    CorruptionAuditRecord, DedupGroupRecord, DedupSummaryRecord, FrnAuditRecord, IngestionAuditRecord,
    QualityReport,
};
use savings_pipeline_domain::{BatchStatus, PipelineError};

#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the batch row eagerly so every later audit row can reference
    /// its id. Uses the pool: the batch must exist even if an atomic run
    /// later rolls back.
    pub async fn insert_batch(&self, batch_id: &str, pipeline_id: &str) -> Result<(), PipelineError> {
        sqlx::query("INSERT INTO pipeline_batch (batch_id, pipeline_id, status, started_at) VALUES (?, ?, 'running', ?)")
            .bind(batch_id)
            .bind(pipeline_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("inserting batch row: {}", e)))?;
        Ok(())
    }

    /// Marks the batch completed or failed.
    pub async fn complete_batch(
        &self,
        batch_id: &str,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        sqlx::query("UPDATE pipeline_batch SET status = ?, completed_at = ?, error_message = ? WHERE batch_id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(error_message)
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("completing batch row: {}", e)))?;
        Ok(())
    }

    /// Pre-inserts one zero-counted row per stage, giving other components
    /// a stable row to reference before any stage runs.
    pub async fn init_stage_rows(&self, batch_id: &str, stages: &[&str]) -> Result<(), PipelineError> {
        for (index, stage) in stages.iter().enumerate() {
            sqlx::query(
                "INSERT INTO pipeline_audit (batch_id, stage, stage_order, passed, rejected, duration_ms) \
                 VALUES (?, ?, ?, 0, 0, 0) ON CONFLICT(batch_id, stage) DO NOTHING",
            )
            .bind(batch_id)
            .bind(stage)
            .bind((index + 1) as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("initializing stage audit rows: {}", e)))?;
        }
        Ok(())
    }

    /// Updates a stage's counters at flush time.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_stage_row(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        stage: &str,
        passed: i64,
        rejected: i64,
        duration_ms: i64,
        detail: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        let detail_json = detail.map(|d| d.to_string());
        sqlx::query(
            "UPDATE pipeline_audit SET passed = ?, rejected = ?, duration_ms = ?, detail_json = ?, error_message = ? \
             WHERE batch_id = ? AND stage = ?",
        )
        .bind(passed)
        .bind(rejected)
        .bind(duration_ms)
        .bind(detail_json)
        .bind(error_message)
        .bind(batch_id)
        .bind(stage)
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("updating stage audit row: {}", e)))?;
        Ok(())
    }

    /// Verbose-level per-item rows.
    pub async fn insert_item_row(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        stage: &str,
        item_key: &str,
        status: &str,
        detail: Option<&serde_json::Value>,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO pipeline_audit_items (batch_id, stage, item_key, status, detail_json) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(stage)
        .bind(item_key)
        .bind(status)
        .bind(detail.map(|d| d.to_string()))
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("inserting audit item row: {}", e)))?;
        Ok(())
    }

    pub async fn insert_ingestion_rows(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        records: &[IngestionAuditRecord],
    ) -> Result<(), PipelineError> {
        for record in records {
            sqlx::query(
                "INSERT INTO json_ingestion_audit \
                 (batch_id, source, method, bank_name, original_platform, normalized_platform, status, \
                  rejection_reasons, quality_flags, corruption_severity) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(batch_id)
            .bind(&record.source)
            .bind(&record.method)
            .bind(&record.bank_name)
            .bind(record.original_platform.as_deref())
            .bind(record.normalized_platform.as_deref())
            .bind(record.status.as_str())
            .bind(serde_json::to_string(&record.rejection_reasons)?)
            .bind(serde_json::to_string(&record.quality_flags)?)
            .bind(record.corruption_severity.as_deref())
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("inserting ingestion audit row: {}", e)))?;
        }
        Ok(())
    }

    pub async fn insert_corruption_row(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        record: &CorruptionAuditRecord,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO json_ingestion_corruption_audit \
             (batch_id, source, method, total_products, validation_failures, failure_rate, threshold) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(&record.source)
        .bind(&record.method)
        .bind(record.total_products)
        .bind(record.validation_failures)
        .bind(record.failure_rate)
        .bind(record.threshold)
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("inserting corruption audit row: {}", e)))?;
        Ok(())
    }

    pub async fn insert_frn_rows(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        records: &[FrnAuditRecord],
    ) -> Result<(), PipelineError> {
        for record in records {
            sqlx::query(
                "INSERT INTO frn_matching_audit \
                 (batch_id, bank_name, normalized_name, frn, frn_status, frn_source, confidence, \
                  candidates_json, normalization_steps_json) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(batch_id)
            .bind(&record.bank_name)
            .bind(&record.normalized_name)
            .bind(record.frn.as_deref())
            .bind(record.frn_status.as_str())
            .bind(record.frn_source.as_str())
            .bind(record.confidence)
            .bind(serde_json::to_string(&record.candidates)?)
            .bind(serde_json::to_string(&record.normalization_steps)?)
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("inserting FRN audit row: {}", e)))?;
        }
        Ok(())
    }

    pub async fn insert_dedup_summary(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        summary: &DedupSummaryRecord,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO deduplication_audit \
             (batch_id, total_products, group_count, fscs_violations, selected_count, dropped_count, \
              reason_histogram_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(summary.total_products)
        .bind(summary.group_count)
        .bind(summary.fscs_violations)
        .bind(summary.selected_count)
        .bind(summary.dropped_count)
        .bind(summary.reason_histogram.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("inserting dedup summary: {}", e)))?;
        Ok(())
    }

    pub async fn insert_dedup_groups(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        groups: &[DedupGroupRecord],
    ) -> Result<(), PipelineError> {
        for group in groups {
            sqlx::query(
                "INSERT INTO deduplication_groups \
                 (batch_id, business_key, normalized_bank_name, platform_category, product_count, winner_json, \
                  selection_reason, quality_scores_json, competing_json, fscs_compliant) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(batch_id)
            .bind(&group.business_key)
            .bind(&group.normalized_bank_name)
            .bind(&group.platform_category)
            .bind(group.product_count)
            .bind(group.winner.to_string())
            .bind(group.selection_reason.as_str())
            .bind(serde_json::to_string(&group.quality_scores)?)
            .bind(serde_json::to_string(&group.competing)?)
            .bind(group.fscs_compliant)
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("inserting dedup group row: {}", e)))?;
        }
        Ok(())
    }

    /// Persists a data quality report on the run connection — quality
    /// storage failure must never abort the run, so callers warn and
    /// continue.
    pub async fn insert_quality_report(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        report: &QualityReport,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO data_quality_reports \
             (batch_id, overall_score, flow_json, integrity_json, dedup_json, anomalies_json, comparison) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(report.overall_score)
        .bind(report.flow.to_string())
        .bind(report.integrity.to_string())
        .bind(report.dedup.to_string())
        .bind(serde_json::to_string(&report.anomalies)?)
        .bind(report.comparison.as_deref())
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("inserting quality report: {}", e)))?;
        Ok(())
    }

    /// The most recent prior quality score, for the rolling comparison.
    pub async fn previous_quality_score(&self, current_batch_id: &str) -> Result<Option<f64>, PipelineError> {
        let row = sqlx::query(
            "SELECT overall_score FROM data_quality_reports WHERE batch_id != ? ORDER BY id DESC LIMIT 1",
        )
        .bind(current_batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("reading previous quality score: {}", e)))?;
        Ok(row.map(|r| r.get("overall_score")))
    }
}
