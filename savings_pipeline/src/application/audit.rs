// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Audit Recorder
//!
//! Batch-scoped, buffered capture of per-stage counts, timings, and
//! rejection metadata. Records accumulate in memory during the run and are
//! flushed in one transaction at the end, so a rolled-back atomic run
//! leaves no orphaned stage rows.
//!
//! Two operations are deliberately eager (pool-backed, outside the run
//! transaction): `create_batch`, so the batch id exists even when the run
//! later rolls back, and `initialize_all_stages`, which pre-inserts one
//! zero-counted row per stage for other components to reference.
//!
//! A disabled recorder is a no-op: every buffering call returns before
//! touching a buffer, and flush does nothing.

use tracing::{debug, warn};

use savings_pipeline_bootstrap::config::AuditLevel;
use savings_pipeline_domain::entities::audit::{
    CorruptionAuditRecord, DedupGroupRecord, DedupSummaryRecord, FrnAuditRecord, IngestionAuditRecord,
    IngestionAuditStatus,
};
use savings_pipeline_domain::{BatchStatus, PipelineError};
use sqlx::SqliteConnection;

use crate::infrastructure::repositories::AuditRepository;

/// Pipeline stages in execution order; also the audit stage-row order.
pub const STAGES: [&str; 4] = ["json_ingestion", "frn_matching", "deduplication", "data_quality"];

#[derive(Debug, Clone, Default)]
struct StageUpdate {
    passed: i64,
    rejected: i64,
    duration_ms: i64,
    detail: Option<serde_json::Value>,
    error_message: Option<String>,
}

/// Buffered audit recorder for one pipeline batch.
pub struct AuditRecorder {
    repo: AuditRepository,
    enabled: bool,
    level: AuditLevel,
    persist_rejected: bool,
    batch_id: Option<String>,
    stage_updates: std::collections::HashMap<String, StageUpdate>,
    ingestion: Vec<IngestionAuditRecord>,
    corruption: Option<CorruptionAuditRecord>,
    frn: Vec<FrnAuditRecord>,
    dedup_groups: Vec<DedupGroupRecord>,
    dedup_summary: Option<DedupSummaryRecord>,
}

impl AuditRecorder {
    pub fn new(repo: AuditRepository, enabled: bool, level: AuditLevel, persist_rejected: bool) -> Self {
        Self {
            repo,
            enabled,
            level,
            persist_rejected,
            batch_id: None,
            stage_updates: std::collections::HashMap::new(),
            ingestion: Vec::new(),
            corruption: None,
            frn: Vec::new(),
            dedup_groups: Vec::new(),
            dedup_summary: None,
        }
    }

    /// A recorder that records nothing; used when audit is disabled in
    /// production builds.
    pub fn disabled(repo: AuditRepository) -> Self {
        Self::new(repo, false, AuditLevel::Minimal, false)
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    /// Opens the batch row eagerly.
    pub async fn create_batch(&mut self, batch_id: &str, pipeline_id: &str) -> Result<(), PipelineError> {
        self.batch_id = Some(batch_id.to_string());
        if !self.enabled {
            return Ok(());
        }
        self.repo.insert_batch(batch_id, pipeline_id).await
    }

    /// Pre-inserts one zero-counted row per stage.
    pub async fn initialize_all_stages(&self) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(batch_id) = self.batch_id.as_deref() else {
            return Err(PipelineError::internal_error("audit batch not created"));
        };
        self.repo.init_stage_rows(batch_id, &STAGES).await
    }

    /// Buffers a stage's counters.
    pub fn record(&mut self, stage: &str, passed: usize, rejected: usize, duration_ms: u64) {
        if !self.enabled {
            return;
        }
        let update = self.stage_updates.entry(stage.to_string()).or_default();
        update.passed += passed as i64;
        update.rejected += rejected as i64;
        update.duration_ms += duration_ms as i64;
    }

    /// Buffers a stage error. The stage row keeps its counters; the error
    /// message is attached at flush.
    pub fn record_error(&mut self, stage: &str, error: &PipelineError, context: &str) {
        if !self.enabled {
            return;
        }
        let update = self.stage_updates.entry(stage.to_string()).or_default();
        update.error_message = Some(format!("{}: {} ({})", error.error_code(), error, context));
    }

    /// Attaches structured stage detail (verbose levels only persist it).
    pub fn record_detail(&mut self, stage: &str, detail: serde_json::Value) {
        if !self.enabled || self.level == AuditLevel::Minimal {
            return;
        }
        self.stage_updates.entry(stage.to_string()).or_default().detail = Some(detail);
    }

    pub fn push_ingestion(&mut self, record: IngestionAuditRecord) {
        if !self.enabled {
            return;
        }
        self.ingestion.push(record);
    }

    pub fn set_corruption(&mut self, record: CorruptionAuditRecord) {
        if !self.enabled {
            return;
        }
        self.corruption = Some(record);
    }

    pub fn push_frn(&mut self, record: FrnAuditRecord) {
        if !self.enabled {
            return;
        }
        self.frn.push(record);
    }

    pub fn push_dedup_group(&mut self, record: DedupGroupRecord) {
        if !self.enabled {
            return;
        }
        self.dedup_groups.push(record);
    }

    pub fn set_dedup_summary(&mut self, record: DedupSummaryRecord) {
        if !self.enabled {
            return;
        }
        self.dedup_summary = Some(record);
    }

    /// Flushes every buffered record inside the caller's transaction.
    ///
    /// Level gating: `minimal` persists stage counters only; `standard`
    /// adds the per-product and per-group rows; `verbose` adds
    /// `pipeline_audit_items` rows for every product (or, with
    /// persist-rejected set at standard level, for rejected products only).
    pub async fn flush(&mut self, conn: &mut SqliteConnection) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(batch_id) = self.batch_id.clone() else {
            return Err(PipelineError::internal_error("audit batch not created"));
        };

        for (stage, update) in &self.stage_updates {
            self.repo
                .update_stage_row(
                    conn,
                    &batch_id,
                    stage,
                    update.passed,
                    update.rejected,
                    update.duration_ms,
                    update.detail.as_ref(),
                    update.error_message.as_deref(),
                )
                .await?;
        }

        if self.level != AuditLevel::Minimal {
            self.repo.insert_ingestion_rows(conn, &batch_id, &self.ingestion).await?;
            self.repo.insert_frn_rows(conn, &batch_id, &self.frn).await?;
            self.repo.insert_dedup_groups(conn, &batch_id, &self.dedup_groups).await?;
            if let Some(summary) = &self.dedup_summary {
                self.repo.insert_dedup_summary(conn, &batch_id, summary).await?;
            }
        }
        if let Some(corruption) = &self.corruption {
            // Corruption evidence is kept even at minimal level.
            self.repo.insert_corruption_row(conn, &batch_id, corruption).await?;
        }

        let persist_all_items = self.level == AuditLevel::Verbose;
        if persist_all_items || self.persist_rejected {
            for record in &self.ingestion {
                let is_reject = record.status != IngestionAuditStatus::Passed;
                if persist_all_items || (self.persist_rejected && is_reject) {
                    let detail = serde_json::to_value(record)?;
                    self.repo
                        .insert_item_row(
                            conn,
                            &batch_id,
                            "json_ingestion",
                            &record.bank_name,
                            record.status.as_str(),
                            Some(&detail),
                        )
                        .await?;
                }
            }
        }

        debug!(
            batch_id = %batch_id,
            ingestion_rows = self.ingestion.len(),
            frn_rows = self.frn.len(),
            group_rows = self.dedup_groups.len(),
            "audit buffers flushed"
        );
        self.clear_buffers();
        Ok(())
    }

    /// Persists the evidence that explains a failed run — the corruption
    /// record and any buffered stage errors — outside the rolled-back run
    /// transaction. Regular buffers are left untouched.
    pub async fn flush_failure_evidence(&mut self, conn: &mut SqliteConnection) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(batch_id) = self.batch_id.clone() else {
            return Ok(());
        };
        if let Some(corruption) = &self.corruption {
            self.repo.insert_corruption_row(conn, &batch_id, corruption).await?;
            self.corruption = None;
        }
        for (stage, update) in &self.stage_updates {
            if update.error_message.is_some() {
                self.repo
                    .update_stage_row(
                        conn,
                        &batch_id,
                        stage,
                        update.passed,
                        update.rejected,
                        update.duration_ms,
                        update.detail.as_ref(),
                        update.error_message.as_deref(),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Marks the batch's terminal status. Failures here warn and continue —
    /// audit persistence must never take the run down.
    pub async fn complete_batch(&self, status: BatchStatus, error: Option<&PipelineError>) {
        if !self.enabled {
            return;
        }
        let Some(batch_id) = self.batch_id.as_deref() else {
            return;
        };
        let message = error.map(|e| format!("{}: {}", e.error_code(), e));
        if let Err(persist_err) = self.repo.complete_batch(batch_id, status, message.as_deref()).await {
            warn!(batch_id = %batch_id, "failed to complete audit batch: {}", persist_err);
        }
    }

    fn clear_buffers(&mut self) {
        self.stage_updates.clear();
        self.ingestion.clear();
        self.corruption = None;
        self.frn.clear();
        self.dedup_groups.clear();
        self.dedup_summary = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_recorder() -> AuditRecorder {
        let pool = sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        AuditRecorder::disabled(AuditRepository::new(pool))
    }

    #[tokio::test]
    async fn disabled_recorder_buffers_nothing() {
        let mut recorder = disabled_recorder();
        recorder.record("json_ingestion", 10, 2, 5);
        recorder.push_ingestion(IngestionAuditRecord {
            source: "moneyfacts".into(),
            method: "easy_access".into(),
            bank_name: "HSBC".into(),
            original_platform: None,
            normalized_platform: None,
            status: IngestionAuditStatus::Passed,
            rejection_reasons: vec![],
            quality_flags: vec![],
            corruption_severity: None,
        });
        assert!(recorder.stage_updates.is_empty());
        assert!(recorder.ingestion.is_empty());
    }

    #[tokio::test]
    async fn record_accumulates_per_stage() {
        let pool = sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        let mut recorder = AuditRecorder::new(AuditRepository::new(pool), true, AuditLevel::Standard, false);
        recorder.record("json_ingestion", 10, 2, 5);
        recorder.record("json_ingestion", 5, 1, 3);
        let update = &recorder.stage_updates["json_ingestion"];
        assert_eq!(update.passed, 15);
        assert_eq!(update.rejected, 3);
        assert_eq!(update.duration_ms, 8);
    }
}
