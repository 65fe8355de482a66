// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Records
//!
//! Typed audit rows buffered by the recorder and flushed in one
//! transaction at end of run. Completeness is an invariant: one ingestion
//! row per product that reached ingestion, one FRN row per enriched
//! product, one group row per dedup group plus one batch summary.

use serde::{Deserialize, Serialize};

use crate::entities::product::RejectionKind;
use crate::value_objects::frn_match::{FrnSource, FrnStatus};
use crate::value_objects::selection_reason::SelectionReason;

/// Per-product ingestion audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionAuditRecord {
    pub source: String,
    pub method: String,
    pub bank_name: String,
    pub original_platform: Option<String>,
    pub normalized_platform: Option<String>,
    /// `passed`, or the rejection kind's audit status.
    pub status: IngestionAuditStatus,
    pub rejection_reasons: Vec<String>,
    pub quality_flags: Vec<String>,
    pub corruption_severity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionAuditStatus {
    Passed,
    Rejected,
    RateFiltered,
}

impl IngestionAuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionAuditStatus::Passed => "passed",
            IngestionAuditStatus::Rejected => "rejected",
            IngestionAuditStatus::RateFiltered => "rate_filtered",
        }
    }

    pub fn from_rejection(kind: RejectionKind) -> Self {
        match kind {
            RejectionKind::Validation => IngestionAuditStatus::Rejected,
            RejectionKind::RateFiltered => IngestionAuditStatus::RateFiltered,
        }
    }
}

/// Corruption fuse audit row, recorded when a run aborts on systematic
/// validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionAuditRecord {
    pub source: String,
    pub method: String,
    pub total_products: i64,
    pub validation_failures: i64,
    pub failure_rate: f64,
    pub threshold: f64,
}

/// Per-product FRN matching audit row, including the candidates that were
/// considered and the normalization trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrnAuditRecord {
    pub bank_name: String,
    pub normalized_name: String,
    pub frn: Option<String>,
    pub frn_status: FrnStatus,
    pub frn_source: FrnSource,
    pub confidence: f64,
    pub candidates: Vec<FrnCandidate>,
    pub normalization_steps: Vec<String>,
}

/// A candidate considered during FRN resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrnCandidate {
    pub frn: String,
    pub search_name: String,
    pub confidence: f64,
    pub match_type: String,
}

/// One deduplication group row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupGroupRecord {
    pub business_key: String,
    pub normalized_bank_name: String,
    pub platform_category: String,
    pub product_count: i64,
    pub winner: serde_json::Value,
    pub selection_reason: SelectionReason,
    pub quality_scores: Vec<f64>,
    pub competing: Vec<String>,
    pub fscs_compliant: bool,
}

/// The per-batch deduplication summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSummaryRecord {
    pub total_products: i64,
    pub group_count: i64,
    pub fscs_violations: i64,
    pub selected_count: i64,
    pub dropped_count: i64,
    pub reason_histogram: serde_json::Value,
}

/// Persisted data quality report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub overall_score: f64,
    pub flow: serde_json::Value,
    pub integrity: serde_json::Value,
    pub dedup: serde_json::Value,
    pub anomalies: Vec<String>,
    /// `improving`, `degrading`, or `stable` against the prior batch.
    pub comparison: Option<String>,
}
