// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Ingestion Stage
//!
//! Parses input JSON batches, validates every product against declarative
//! rules and configurable ranges, applies per-account-type rate floors,
//! normalizes platform/source pairs, and writes the survivors to the raw
//! table under their `(source, method)` origin — after clearing exactly
//! that origin, never the whole table.
//!
//! Two rejection classes are kept strictly apart:
//!
//! - **validation failures** feed the corruption fuse;
//! - **rate-filtered** products (below the configured floor for their
//!   account type) do not — a quiet rate environment is not corruption.
//!
//! The corruption fuse trips when the validation-failure fraction across
//! the *run* exceeds the configured threshold, checked every 100 products
//! and once at the end.

use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use savings_pipeline_domain::entities::audit::{CorruptionAuditRecord, IngestionAuditRecord, IngestionAuditStatus};
use savings_pipeline_domain::value_objects::platform::normalize_platform_name;
use savings_pipeline_domain::{AccountType, ParsedProduct, PipelineError, RawProduct, RejectedProduct, RejectionKind};
use serde::Deserialize;

use crate::application::audit::AuditRecorder;
use crate::infrastructure::config::{Facts, IngestionConfig, PlatformDirectory, RuleEngine, RuleEventType, SourceDirectory};
use crate::infrastructure::repositories::ProductRepository;

/// Products between corruption-fuse checks.
const CORRUPTION_CHECK_INTERVAL: u64 = 100;

/// The feed envelope: origin metadata plus the product list.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedBatch {
    pub metadata: FeedMetadata,
    pub products: Vec<RawProduct>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedMetadata {
    pub source: String,
    pub method: String,
}

/// Per-origin ingestion result.
#[derive(Debug, Default)]
pub struct IngestionOutcome {
    pub passed: Vec<ParsedProduct>,
    pub rejected: Vec<RejectedProduct>,
    pub per_platform: HashMap<String, usize>,
}

/// Run-scoped corruption tracker. Rate-filtered rejections never count.
#[derive(Debug)]
struct CorruptionTracker {
    total: u64,
    failures: u64,
    threshold: f64,
}

impl CorruptionTracker {
    fn new(threshold: f64) -> Self {
        Self {
            total: 0,
            failures: 0,
            threshold,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }

    /// Records one product; every `CORRUPTION_CHECK_INTERVAL` products the
    /// fuse is evaluated.
    fn record(&mut self, validation_failed: bool) -> Result<(), PipelineError> {
        self.total += 1;
        if validation_failed {
            self.failures += 1;
        }
        if self.total % CORRUPTION_CHECK_INTERVAL == 0 {
            self.check()?;
        }
        Ok(())
    }

    fn check(&self) -> Result<(), PipelineError> {
        if self.failure_rate() > self.threshold {
            return Err(PipelineError::data_corruption(format!(
                "{:.1}% of {} products failed validation (threshold {:.1}%)",
                self.failure_rate() * 100.0,
                self.total,
                self.threshold * 100.0
            )));
        }
        Ok(())
    }

    fn severity(&self) -> &'static str {
        let rate = self.failure_rate();
        if rate > self.threshold {
            "critical"
        } else if rate > self.threshold / 2.0 {
            "elevated"
        } else {
            "normal"
        }
    }
}

/// The ingestion stage. One instance lives for the whole run so the
/// corruption tracker spans every input file.
pub struct IngestionStage {
    config: IngestionConfig,
    rules: RuleEngine,
    platforms: PlatformDirectory,
    sources: SourceDirectory,
    tracker: CorruptionTracker,
    /// Origin of the file currently being ingested, for corruption audit.
    current_origin: Option<(String, String)>,
}

impl IngestionStage {
    pub fn new(
        config: IngestionConfig,
        rules: RuleEngine,
        platforms: PlatformDirectory,
        sources: SourceDirectory,
    ) -> Self {
        let threshold = config.corruption_threshold;
        Self {
            config,
            rules,
            platforms,
            sources,
            tracker: CorruptionTracker::new(threshold),
            current_origin: None,
        }
    }

    /// Ingests one feed file.
    pub async fn ingest_file(
        &mut self,
        conn: &mut SqliteConnection,
        repo: &ProductRepository,
        recorder: &mut AuditRecorder,
        path: &Path,
    ) -> Result<IngestionOutcome, PipelineError> {
        debug!(file = %path.display(), "ingesting feed file");
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::IoError(format!("reading {}: {}", path.display(), e)))?;
        let batch: FeedBatch = serde_json::from_str(&contents).map_err(|e| {
            PipelineError::validation_failed(format!("{}: invalid feed envelope: {}", path.display(), e))
        })?;
        self.ingest_batch(conn, repo, recorder, batch).await
    }

    /// Ingests one in-memory batch. Each batch is processed independently
    /// so its `(source, method)` origin is preserved end to end.
    pub async fn ingest_batch(
        &mut self,
        conn: &mut SqliteConnection,
        repo: &ProductRepository,
        recorder: &mut AuditRecorder,
        batch: FeedBatch,
    ) -> Result<IngestionOutcome, PipelineError> {
        if batch.metadata.source.trim().is_empty() || batch.metadata.method.trim().is_empty() {
            return Err(PipelineError::validation_failed(
                "feed metadata must carry non-empty source and method",
            ));
        }
        let source = batch.metadata.source.trim().to_lowercase();
        let method = batch.metadata.method.trim().to_string();
        self.current_origin = Some((source.clone(), method.clone()));

        let cleared = repo.clear_origin(conn, &source, &method).await?;
        debug!(source = %source, method = %method, cleared, "cleared raw origin");

        let mut outcome = IngestionOutcome::default();
        for mut product in batch.products {
            product.source = source.clone();
            product.method = method.clone();
            let decision = self.evaluate_product(&product);

            let validation_failed = matches!(&decision, ProductDecision::Rejected(r, _) if r.kind == RejectionKind::Validation);
            if let Err(fuse) = self.tracker.record(validation_failed) {
                self.record_corruption(recorder);
                return Err(fuse);
            }

            match decision {
                ProductDecision::Passed(parsed, quality_flags) => {
                    recorder.push_ingestion(IngestionAuditRecord {
                        source: source.clone(),
                        method: method.clone(),
                        bank_name: parsed.raw.bank_name.clone(),
                        original_platform: product_platform(&parsed.raw),
                        normalized_platform: Some(parsed.normalized_platform.clone()),
                        status: IngestionAuditStatus::Passed,
                        rejection_reasons: Vec::new(),
                        quality_flags,
                        corruption_severity: None,
                    });
                    *outcome.per_platform.entry(parsed.normalized_platform.clone()).or_default() += 1;
                    outcome.passed.push(parsed);
                }
                ProductDecision::Rejected(rejected, quality_flags) => {
                    recorder.push_ingestion(IngestionAuditRecord {
                        source: source.clone(),
                        method: method.clone(),
                        bank_name: rejected.bank_name.clone(),
                        original_platform: rejected.platform.clone(),
                        normalized_platform: None,
                        status: IngestionAuditStatus::from_rejection(rejected.kind),
                        rejection_reasons: rejected.reasons.clone(),
                        quality_flags,
                        corruption_severity: (rejected.kind == RejectionKind::Validation)
                            .then(|| self.tracker.severity().to_string()),
                    });
                    outcome.rejected.push(rejected);
                }
            }
        }

        repo.insert_raw(conn, &outcome.passed).await?;
        info!(
            source = %source,
            method = %method,
            passed = outcome.passed.len(),
            rejected = outcome.rejected.len(),
            "origin ingested"
        );
        Ok(outcome)
    }

    /// Final corruption check, once at the end of the run.
    pub fn finish(&self, recorder: &mut AuditRecorder) -> Result<(), PipelineError> {
        if let Err(fuse) = self.tracker.check() {
            self.record_corruption(recorder);
            return Err(fuse);
        }
        Ok(())
    }

    fn record_corruption(&self, recorder: &mut AuditRecorder) {
        let (source, method) = self
            .current_origin
            .clone()
            .unwrap_or_else(|| ("unknown".into(), "unknown".into()));
        warn!(
            source = %source,
            method = %method,
            rate = self.tracker.failure_rate(),
            "corruption fuse tripped"
        );
        recorder.set_corruption(CorruptionAuditRecord {
            source,
            method,
            total_products: self.tracker.total as i64,
            validation_failures: self.tracker.failures as i64,
            failure_rate: self.tracker.failure_rate(),
            threshold: self.tracker.threshold,
        });
    }

    /// Source-specific platform normalization: a product listed by an
    /// aggregator under the aggregator's own name is the bank's direct
    /// product surfaced through that aggregator's comparison pages.
    fn normalize_platform(&self, platform: Option<&str>, source: &str) -> String {
        let normalized = normalize_platform_name(platform.unwrap_or(source));
        let normalized_source = normalize_platform_name(source);
        if normalized == normalized_source && self.platforms.is_known_aggregator(&normalized_source) {
            "direct".to_string()
        } else {
            normalized
        }
    }

    fn evaluate_product(&self, raw: &RawProduct) -> ProductDecision {
        let mut validation_errors: Vec<String> = Vec::new();
        let mut quality_flags: Vec<String> = Vec::new();

        let account_type = match raw.parsed_account_type() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                validation_errors.push(format!("invalid_account_type:{}", raw.account_type));
                None
            }
        };
        if raw.bank_name.trim().is_empty() {
            validation_errors.push("bank_name_missing".to_string());
        }
        if raw.aer_rate.is_none() {
            validation_errors.push("aer_rate_missing".to_string());
        }

        let normalized_platform = self.normalize_platform(raw.platform.as_deref(), &raw.source);

        // Configurable range checks.
        let mut ranges_ok = true;
        if let Some(aer) = raw.aer_rate {
            if aer < self.config.aer_rate_min || aer > self.config.aer_rate_max {
                validation_errors.push(format!("aer_rate_out_of_range:{}", aer));
                ranges_ok = false;
            }
        }
        match account_type {
            Some(AccountType::FixedTerm) => match raw.term_months {
                Some(term) if term < self.config.term_months_min || term > self.config.term_months_max => {
                    validation_errors.push(format!("term_months_out_of_range:{}", term));
                    ranges_ok = false;
                }
                None => {
                    validation_errors.push("term_months_missing".to_string());
                    ranges_ok = false;
                }
                _ => {}
            },
            Some(AccountType::Notice) => match raw.notice_period_days {
                Some(days) if days < self.config.notice_days_min || days > self.config.notice_days_max => {
                    validation_errors.push(format!("notice_period_out_of_range:{}", days));
                    ranges_ok = false;
                }
                None => {
                    validation_errors.push("notice_period_missing".to_string());
                    ranges_ok = false;
                }
                _ => {}
            },
            _ => {}
        }

        // Declarative rules over the product facts.
        let facts = self.build_facts(raw, account_type, &normalized_platform, validation_errors.is_empty(), ranges_ok);
        for event in self.rules.evaluate("ingestion", &facts) {
            match event.event_type {
                RuleEventType::RejectProduct => validation_errors.push(event.reason()),
                RuleEventType::FlagValidationError => quality_flags.push(event.reason()),
                RuleEventType::Other(_) => {}
            }
        }

        if !validation_errors.is_empty() {
            return ProductDecision::Rejected(
                RejectedProduct {
                    bank_name: raw.bank_name.clone(),
                    platform: product_platform(raw),
                    source: raw.source.clone(),
                    method: raw.method.clone(),
                    kind: RejectionKind::Validation,
                    reasons: validation_errors,
                },
                quality_flags,
            );
        }

        // Rate-threshold filter, classified apart from validation. Both
        // values are present once the error list is empty.
        let (Some(account_type), Some(aer)) = (account_type, raw.aer_rate) else {
            return ProductDecision::Rejected(
                RejectedProduct {
                    bank_name: raw.bank_name.clone(),
                    platform: product_platform(raw),
                    source: raw.source.clone(),
                    method: raw.method.clone(),
                    kind: RejectionKind::Validation,
                    reasons: vec!["incomplete_product".to_string()],
                },
                quality_flags,
            );
        };
        if self.config.rate_filtering_enabled {
            let floor = self.config.min_rate_for(account_type);
            if aer < floor {
                return ProductDecision::Rejected(
                    RejectedProduct {
                        bank_name: raw.bank_name.clone(),
                        platform: product_platform(raw),
                        source: raw.source.clone(),
                        method: raw.method.clone(),
                        kind: RejectionKind::RateFiltered,
                        reasons: vec![format!("rate_filtered:{:.2}<{:.2}", aer, floor)],
                    },
                    quality_flags,
                );
            }
        }

        let parsed = ParsedProduct {
            raw: raw.clone(),
            account_type,
            platform_priority: self.platforms.priority(&normalized_platform),
            source_reliability: self.sources.reliability(&raw.source, 0.5),
            normalized_platform,
        };
        ProductDecision::Passed(parsed, quality_flags)
    }

    fn build_facts(
        &self,
        raw: &RawProduct,
        account_type: Option<AccountType>,
        platform: &str,
        required_fields_complete: bool,
        valid_ranges: bool,
    ) -> Facts {
        let mut facts = Facts::new();
        if let Some(aer) = raw.aer_rate {
            facts.set("aer_rate", aer);
        }
        if let Some(account_type) = account_type {
            facts.set("account_type", account_type.as_str());
            facts.set("min_rate_threshold", self.config.min_rate_for(account_type));
        }
        facts.set("platform", platform);
        if !raw.bank_name.trim().is_empty() {
            facts.set("bank_name", raw.bank_name.as_str());
        }
        if let Some(min_deposit) = raw.min_deposit {
            facts.set("min_deposit", min_deposit);
        }
        if let Some(term) = raw.term_months {
            facts.set("term_months", term);
        }
        if let Some(days) = raw.notice_period_days {
            facts.set("notice_period_days", days);
        }
        facts.set("fscs_protected", raw.fscs_protected);
        facts.set("required_fields_complete", required_fields_complete);
        facts.set("valid_ranges", valid_ranges);
        facts
    }
}

fn product_platform(raw: &RawProduct) -> Option<String> {
    raw.platform.clone()
}

enum ProductDecision {
    Passed(ParsedProduct, Vec<String>),
    Rejected(RejectedProduct, Vec<String>),
}
