// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Orchestration Engine
//!
//! Drives the stage sequence `ingestion → frn_matching → deduplication →
//! [data_quality]` with two commit modes:
//!
//! - **Atomic** — the whole run executes inside one store transaction;
//!   commit on success, rollback on any critical error. Incompatible with
//!   `stop_after`, so the engine silently switches to incremental when an
//!   early exit is requested.
//! - **Incremental** — stages commit independently; intermediate data is
//!   visible to observers.
//!
//! The rebuild path loads the *entire* raw table before FRN matching and
//! deduplication so cross-source duplicates actually meet each other; it
//! runs inside the normal pipeline after ingestion and standalone via
//! `--rebuild-only`.
//!
//! Concurrency is guarded by the status singleton: a second run aborts with
//! `CONCURRENT_EXECUTION` before touching any table. On startup, a status
//! row stuck in `running` for longer than three stage budgets is reset —
//! the marker of a crashed engine.

use chrono::Utc;
use regex::Regex;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use savings_pipeline_bootstrap::cli::StopAfterStage;
use savings_pipeline_bootstrap::EngineSettings;
use savings_pipeline_domain::services::bank_normalizer::FrnNameNormalizer;
use savings_pipeline_domain::{BatchIdGenerator, BatchStatus, FrnStatus, PipelineError, PipelineEvent, StageProgress};

use crate::application::audit::AuditRecorder;
use crate::application::results::PipelineResult;
use crate::application::stages::data_quality::{DataQualityAnalyzer, PipelineCounts};
use crate::application::stages::{DeduplicationStage, FrnMatchingStage, IngestionStage};
use crate::infrastructure::config::{
    ConfigLoader, DataQualityConfig, DeduplicationConfig, FrnMatchingConfig, IngestionConfig, OrchestrationConfig,
    RuleEngine,
};
use crate::infrastructure::repositories::{schema, AuditRepository, FrnRepository, ProductRepository, StateRepository};

/// A crashed run is recognized after this many stage budgets.
const STALE_STATUS_FACTOR: i32 = 3;

/// One run's inputs.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub files: Vec<PathBuf>,
    pub stop_after: Option<StopAfterStage>,
    pub rebuild_only: bool,
}

/// The orchestration engine.
pub struct PipelineOrchestrator {
    pool: SqlitePool,
    settings: EngineSettings,
    loader: ConfigLoader,
    products: ProductRepository,
    frn: FrnRepository,
    audit: AuditRepository,
    state: StateRepository,
    batch_ids: BatchIdGenerator,
    events: broadcast::Sender<PipelineEvent>,
}

impl PipelineOrchestrator {
    pub fn new(pool: SqlitePool, settings: EngineSettings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            loader: ConfigLoader::new(pool.clone()),
            products: ProductRepository::new(pool.clone()),
            frn: FrnRepository::new(pool.clone()),
            audit: AuditRepository::new(pool.clone()),
            state: StateRepository::new(pool.clone()),
            batch_ids: BatchIdGenerator::new(),
            events,
            pool,
            settings,
        }
    }

    /// UI subscription to the typed event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Startup: recover a stale status row, then rebuild the FRN lookup
    /// cache wholesale so manual overrides made since the last run apply.
    pub async fn initialize(&self) -> Result<(), PipelineError> {
        let orchestration = OrchestrationConfig::load(&self.loader).await?;
        let staleness = chrono::Duration::milliseconds(orchestration.stage_timeout_ms * STALE_STATUS_FACTOR as i64);
        self.state.recover_stale_status(staleness).await?;

        let frn_config = FrnMatchingConfig::load(&self.loader).await?;
        let normalizer = FrnNameNormalizer::new(
            frn_config.normalization_prefixes,
            frn_config.normalization_suffixes,
            frn_config.normalization_abbreviations,
        );
        self.frn
            .rebuild_lookup_cache(&normalizer)
            .await
            .map_err(|e| PipelineError::ServiceInitFailed(format!("FRN cache rebuild: {}", e)))?;
        Ok(())
    }

    /// Runs the pipeline. Returns the structured result on success and a
    /// typed error on critical failure; recoverable errors travel inside
    /// the result.
    pub async fn run(&self, options: &PipelineOptions) -> Result<PipelineResult, PipelineError> {
        let batch_id = self.batch_ids.next_id();

        self.state.try_begin_run(&batch_id).await?;

        let started = Instant::now();
        let mut recorder = AuditRecorder::new(
            self.audit.clone(),
            self.settings.audit_enabled,
            self.settings.audit_level,
            self.settings.audit_persist_rejected,
        );
        let mut result = PipelineResult::new(batch_id.clone());

        self.emit(PipelineEvent::Started {
            batch_id: batch_id.clone(),
            timestamp: Utc::now(),
        });

        let outcome = self.execute(&batch_id, options, &mut recorder, &mut result).await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                result.success = true;
                result.canonical_count = self.products.canonical_count().await.unwrap_or(0) as usize;
                recorder.complete_batch(BatchStatus::Completed, None).await;

                if !options.rebuild_only {
                    self.cleanup_input_files(&options.files).await;
                }
                if let Err(e) = schema::checkpoint_wal(&self.pool).await {
                    warn!("WAL checkpoint failed: {}", e);
                }
                self.write_audit_sidecar(&result);

                self.state.reset_idle().await?;
                self.emit(PipelineEvent::Completed {
                    batch_id: batch_id.clone(),
                    canonical_count: result.canonical_count,
                    duration_ms: result.duration_ms,
                    timestamp: Utc::now(),
                });
                info!(batch_id = %batch_id, "pipeline completed");
                Ok(result)
            }
            Err(error) => {
                let stage = self.state.status().await.ok().and_then(|s| s.current_stage);
                if let Some(stage_name) = &stage {
                    recorder.record_error(stage_name, &error, "pipeline run aborted");
                }
                // Failure evidence (the corruption record especially) must
                // survive the rolled-back transaction.
                if let Ok(mut conn) = self.pool.acquire().await {
                    if let Err(e) = recorder.flush_failure_evidence(&mut conn).await {
                        warn!("failed to persist failure evidence: {}", e);
                    }
                }
                recorder.complete_batch(BatchStatus::Failed, Some(&error)).await;

                if let Err(e) = self.state.reset_idle().await {
                    warn!("failed to reset pipeline status: {}", e);
                }
                self.emit(PipelineEvent::Failed {
                    batch_id: batch_id.clone(),
                    error_type: error.error_code().to_string(),
                    stage,
                    message: error.to_string(),
                    timestamp: Utc::now(),
                });
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        batch_id: &str,
        options: &PipelineOptions,
        recorder: &mut AuditRecorder,
        result: &mut PipelineResult,
    ) -> Result<(), PipelineError> {
        let orchestration = OrchestrationConfig::load(&self.loader).await?;

        let atomic = self.settings.atomic && options.stop_after.is_none();
        if self.settings.atomic && options.stop_after.is_some() {
            debug!("atomic mode downgraded to incremental: stop-after requested");
        }

        recorder.create_batch(batch_id, "savings-pipeline").await?;
        recorder.initialize_all_stages().await?;

        if atomic {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| PipelineError::database_failed(format!("beginning run transaction: {}", e)))?;
            let staged = self
                .run_stages(&mut tx, batch_id, options, &orchestration, recorder, result)
                .await;
            match staged {
                Ok(()) => {
                    recorder.flush(&mut tx).await?;
                    tx.commit()
                        .await
                        .map_err(|e| PipelineError::database_failed(format!("committing run transaction: {}", e)))?;
                    Ok(())
                }
                Err(error) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!("rollback failed: {}", rollback_err);
                    }
                    Err(error)
                }
            }
        } else {
            // Incremental: one pooled connection, autocommit per statement —
            // each stage's writes are visible as soon as they land.
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| PipelineError::database_failed(format!("acquiring run connection: {}", e)))?;
            self.run_stages(&mut conn, batch_id, options, &orchestration, recorder, result)
                .await?;
            recorder.flush(&mut conn).await?;
            Ok(())
        }
    }

    async fn run_stages(
        &self,
        conn: &mut sqlx::SqliteConnection,
        batch_id: &str,
        options: &PipelineOptions,
        orchestration: &OrchestrationConfig,
        recorder: &mut AuditRecorder,
        result: &mut PipelineResult,
    ) -> Result<(), PipelineError> {
        let request_id = Uuid::new_v4();
        let run_started = Instant::now();
        let mut counts = PipelineCounts::default();

        // ── Stage 1: ingestion ─────────────────────────────────────────
        if !options.rebuild_only {
            self.stage_started(conn, batch_id, "json_ingestion", request_id, 0).await?;
            let stage_started = Instant::now();

            let ingestion_config = IngestionConfig::load(&self.loader).await?;
            let rules = RuleEngine::load(&self.pool).await?;
            let platforms = self.loader.load_platforms().await?;
            let sources = self.loader.load_sources().await?;
            let mut ingestion = IngestionStage::new(ingestion_config, rules, platforms, sources);

            let ingest_all = async {
                let mut passed = 0usize;
                let mut rejected = 0usize;
                let mut rate_filtered = 0usize;
                for file in &options.files {
                    let outcome = ingestion.ingest_file(conn, &self.products, recorder, file).await?;
                    passed += outcome.passed.len();
                    rate_filtered += outcome
                        .rejected
                        .iter()
                        .filter(|r| r.kind == savings_pipeline_domain::RejectionKind::RateFiltered)
                        .count();
                    rejected += outcome.rejected.len();
                }
                ingestion.finish(recorder)?;
                Ok::<_, PipelineError>((passed, rejected, rate_filtered))
            };
            let (passed, rejected, rate_filtered) =
                with_timeout("json_ingestion", orchestration.stage_timeout_ms, ingest_all).await?;

            let duration = stage_started.elapsed().as_millis() as u64;
            counts.input = passed + rejected;
            counts.passed = passed;
            counts.rejected = rejected - rate_filtered;
            counts.rate_filtered = rate_filtered;
            recorder.record("json_ingestion", passed, rejected, duration);
            result.record_stage("json_ingestion", passed, rejected, duration);
            self.stage_completed(batch_id, "json_ingestion", passed, rejected, duration, request_id, 25)
                .await;

            if options.stop_after == Some(StopAfterStage::JsonIngestion) {
                debug!("stopping after json_ingestion");
                return Ok(());
            }
        }

        // ── Rebuild path: FRN matching over the full raw table ─────────
        self.stage_started(conn, batch_id, "frn_matching", request_id, 25).await?;
        let stage_started = Instant::now();

        let frn_config = FrnMatchingConfig::load(&self.loader).await?;
        let frn_stage = FrnMatchingStage::build(frn_config, &self.frn).await?;
        let all_raw = self.products.load_all_raw(conn).await?;
        if options.rebuild_only {
            counts.input = all_raw.len();
        }

        let frn_timeout = frn_stage.stage_timeout_ms();
        let enriched = with_timeout(
            "frn_matching",
            frn_timeout,
            frn_stage.enrich_all(conn, &self.products, &self.frn, recorder, all_raw),
        )
        .await?;

        let duration = stage_started.elapsed().as_millis() as u64;
        counts.enriched = enriched.len();
        counts.frn_matched = enriched.iter().filter(|e| e.frn_status == FrnStatus::Matched).count();
        recorder.record("frn_matching", enriched.len(), 0, duration);
        result.record_stage("frn_matching", enriched.len(), 0, duration);
        self.stage_completed(batch_id, "frn_matching", enriched.len(), 0, duration, request_id, 50)
            .await;

        if options.stop_after == Some(StopAfterStage::FrnMatching) {
            debug!("stopping after frn_matching");
            return Ok(());
        }

        // ── Stage 3: deduplication and canonical replacement ───────────
        self.stage_started(conn, batch_id, "deduplication", request_id, 50).await?;
        let stage_started = Instant::now();

        let dedup_config = DeduplicationConfig::load(&self.loader).await?;
        let platforms = self.loader.load_platforms().await?;
        let dedup_stage = DeduplicationStage::new(dedup_config, platforms);

        let outcome = with_timeout(
            "deduplication",
            orchestration.stage_timeout_ms,
            dedup_stage.run(conn, &self.products, recorder, enriched),
        )
        .await?;

        self.products.archive_canonical(conn, "pipeline_replacement").await?;
        self.products.replace_canonical(conn, batch_id, &outcome.winners).await?;

        let duration = stage_started.elapsed().as_millis() as u64;
        counts.canonical = outcome.winners.len();
        counts.groups = outcome.group_count;
        counts.fscs_violations = outcome.fscs_violations;
        let dropped = outcome.input_count - outcome.winners.len();
        recorder.record("deduplication", outcome.winners.len(), dropped, duration);
        result.record_stage("deduplication", outcome.winners.len(), dropped, duration);
        self.stage_completed(
            batch_id,
            "deduplication",
            outcome.winners.len(),
            dropped,
            duration,
            request_id,
            if self.settings.data_quality { 75 } else { 100 },
        )
        .await;

        if options.stop_after == Some(StopAfterStage::Deduplication) {
            debug!("stopping after deduplication");
            return Ok(());
        }

        // ── Stage 4 (optional): data quality ───────────────────────────
        if self.settings.data_quality {
            self.stage_started(conn, batch_id, "data_quality", request_id, 75).await?;
            let stage_started = Instant::now();

            let quality_config = DataQualityConfig::load(&self.loader).await?;
            let analyzer = DataQualityAnalyzer::new(quality_config, self.settings.data_quality_verbose);
            counts.duration_ms = run_started.elapsed().as_millis() as u64;
            let report = analyzer.analyze(conn, &self.audit, batch_id, &counts, &outcome.winners).await;

            let duration = stage_started.elapsed().as_millis() as u64;
            recorder.record("data_quality", outcome.winners.len(), 0, duration);
            recorder.record_detail("data_quality", serde_json::json!({ "overall_score": report.overall_score }));
            result.record_stage("data_quality", outcome.winners.len(), 0, duration);
            self.stage_completed(batch_id, "data_quality", outcome.winners.len(), 0, duration, request_id, 100)
                .await;
        }

        Ok(())
    }

    async fn stage_started(
        &self,
        conn: &mut sqlx::SqliteConnection,
        batch_id: &str,
        stage: &str,
        request_id: Uuid,
        total_progress: u8,
    ) -> Result<(), PipelineError> {
        self.state.set_stage(conn, stage).await?;
        self.emit(PipelineEvent::StageStarted {
            batch_id: batch_id.to_string(),
            stage: stage.to_string(),
        });
        self.emit(PipelineEvent::Progress(StageProgress {
            request_id,
            current_stage: stage.to_string(),
            stage_progress: 0,
            total_progress,
            message: format!("{} started", stage),
        }));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn stage_completed(
        &self,
        batch_id: &str,
        stage: &str,
        passed: usize,
        rejected: usize,
        duration_ms: u64,
        request_id: Uuid,
        total_progress: u8,
    ) {
        self.emit(PipelineEvent::StageCompleted {
            batch_id: batch_id.to_string(),
            stage: stage.to_string(),
            passed,
            rejected,
            duration_ms,
        });
        self.emit(PipelineEvent::Progress(StageProgress {
            request_id,
            current_stage: stage.to_string(),
            stage_progress: 100,
            total_progress,
            message: format!("{} completed: {} passed, {} rejected", stage, passed, rejected),
        }));
    }

    /// Removes every sibling artifact of each successfully ingested input
    /// file: anything sharing the `<platform>-` prefix and `-<timestamp>`
    /// marker (raw captures, scraper logs, the normalized feed itself).
    /// Missing or unlinkable files warn, never fail.
    async fn cleanup_input_files(&self, files: &[PathBuf]) {
        let Ok(pattern) = Regex::new(r"^(.+)-normalized-(.+)\.json$") else {
            return;
        };
        for file in files {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(captures) = pattern.captures(name) else {
                debug!(file = %file.display(), "input file does not match cleanup pattern");
                continue;
            };
            let platform = &captures[1];
            let timestamp = &captures[2];
            let dir = file.parent().unwrap_or_else(|| Path::new("."));

            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), "cleanup could not read directory: {}", e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let entry_name = entry.file_name();
                let Some(entry_name) = entry_name.to_str() else { continue };
                if entry_name.starts_with(&format!("{}-", platform)) && entry_name.contains(&format!("-{}", timestamp))
                {
                    match tokio::fs::remove_file(entry.path()).await {
                        Ok(()) => debug!(file = %entry.path().display(), "cleaned up input artifact"),
                        Err(e) => warn!(file = %entry.path().display(), "cleanup failed: {}", e),
                    }
                }
            }
        }
    }

    /// Optional side-channel copy of the run summary for external tooling.
    fn write_audit_sidecar(&self, result: &PipelineResult) {
        let Some(path) = &self.settings.audit_output else { return };
        match serde_json::to_string_pretty(result) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(path = %path.display(), "audit sidecar write failed: {}", e);
                }
            }
            Err(e) => warn!("audit sidecar serialization failed: {}", e),
        }
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is normal in CLI runs.
        let _ = self.events.send(event);
    }
}

async fn with_timeout<T>(
    stage: &str,
    budget_ms: i64,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    let budget = std::time::Duration::from_millis(budget_ms.max(0) as u64);
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::timeout(format!(
            "stage '{}' exceeded its {} ms budget",
            stage, budget_ms
        ))),
    }
}
