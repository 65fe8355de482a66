// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Data Quality Analyzer
//!
//! Optional post-stage that scores the run: pipeline flow (attrition,
//! throughput), integrity (weighted components from config), deduplication
//! effectiveness, and anomaly detection. Produces a 0–100 overall score and
//! a rolling comparison against the prior batch (±2 is stable).
//!
//! Report persistence failure never aborts the run; the analyzer warns and
//! the pipeline completes.

use tracing::{debug, info, warn};

use savings_pipeline_domain::entities::audit::QualityReport;
use savings_pipeline_domain::{FinalProduct, SelectionReason};

use crate::infrastructure::config::DataQualityConfig;
use crate::infrastructure::repositories::AuditRepository;

/// High-rate outlier margin over the mean AER.
const OUTLIER_MARGIN: f64 = 0.10;
/// Runs longer than this are flagged.
const LONG_PROCESSING_MS: u64 = 60_000;
/// Scores within this band of the prior batch are `stable`.
const STABLE_TOLERANCE: f64 = 2.0;

/// Counters the orchestrator hands the analyzer.
#[derive(Debug, Clone, Default)]
pub struct PipelineCounts {
    pub input: usize,
    pub passed: usize,
    pub rejected: usize,
    pub rate_filtered: usize,
    pub enriched: usize,
    pub frn_matched: usize,
    pub canonical: usize,
    pub fscs_violations: usize,
    pub groups: usize,
    pub duration_ms: u64,
}

pub struct DataQualityAnalyzer {
    config: DataQualityConfig,
    verbose: bool,
}

impl DataQualityAnalyzer {
    pub fn new(config: DataQualityConfig, verbose: bool) -> Self {
        Self { config, verbose }
    }

    /// Analyzes the run and persists the report. Always returns a report;
    /// storage failure is logged, not propagated.
    pub async fn analyze(
        &self,
        conn: &mut sqlx::SqliteConnection,
        audit_repo: &AuditRepository,
        batch_id: &str,
        counts: &PipelineCounts,
        winners: &[FinalProduct],
    ) -> QualityReport {
        let flow = self.flow_stats(counts);
        let (integrity_score, integrity) = self.integrity(counts, winners);
        let (dedup_score, dedup) = self.dedup_effectiveness(counts, winners);
        let anomalies = self.anomalies(counts, winners);

        let mut overall = 100.0 * (0.6 * integrity_score + 0.4 * dedup_score);
        overall -= 5.0 * anomalies.len() as f64;
        let overall_score = overall.clamp(0.0, 100.0);

        let comparison = match audit_repo.previous_quality_score(batch_id).await {
            Ok(Some(previous)) => Some(compare_scores(overall_score, previous)),
            Ok(None) => None,
            Err(e) => {
                warn!("could not read prior quality score: {}", e);
                None
            }
        };

        let report = QualityReport {
            overall_score,
            flow,
            integrity,
            dedup,
            anomalies,
            comparison,
        };

        if self.verbose {
            debug!(report = %serde_json::to_string(&report).unwrap_or_default(), "data quality detail");
        }
        info!(
            score = overall_score,
            comparison = report.comparison.as_deref().unwrap_or("n/a"),
            anomalies = report.anomalies.len(),
            "data quality analyzed"
        );

        if let Err(e) = audit_repo.insert_quality_report(conn, batch_id, &report).await {
            warn!("quality report persistence failed (run continues): {}", e);
        }
        report
    }

    fn flow_stats(&self, counts: &PipelineCounts) -> serde_json::Value {
        let attrition = if counts.input == 0 {
            0.0
        } else {
            1.0 - counts.canonical as f64 / counts.input as f64
        };
        let throughput = if counts.duration_ms == 0 {
            0.0
        } else {
            counts.input as f64 / (counts.duration_ms as f64 / 1000.0)
        };
        serde_json::json!({
            "input": counts.input,
            "passed": counts.passed,
            "rejected": counts.rejected,
            "rate_filtered": counts.rate_filtered,
            "enriched": counts.enriched,
            "canonical": counts.canonical,
            "attrition": attrition,
            "throughput_per_sec": throughput,
        })
    }

    /// Weighted integrity score. Component weights come from configuration;
    /// the shipped store weights them 0.3/0.3/0.2/0.2.
    fn integrity(&self, counts: &PipelineCounts, winners: &[FinalProduct]) -> (f64, serde_json::Value) {
        let missing_fields = if winners.is_empty() {
            1.0
        } else {
            let populated: f64 = winners
                .iter()
                .map(|w| {
                    let raw = &w.enriched.parsed.raw;
                    let fields = [
                        raw.gross_rate.is_some(),
                        raw.min_deposit.is_some(),
                        raw.max_deposit.is_some(),
                        raw.scrape_date.is_some(),
                    ];
                    fields.iter().filter(|&&p| p).count() as f64 / fields.len() as f64
                })
                .sum();
            populated / winners.len() as f64
        };
        let invalid_ranges = if winners.is_empty() {
            1.0
        } else {
            let valid = winners.iter().filter(|w| w.aer_rate() > 0.0).count();
            valid as f64 / winners.len() as f64
        };
        let frn_match_rate = if counts.enriched == 0 {
            0.0
        } else {
            counts.frn_matched as f64 / counts.enriched as f64
        };
        let consistency = if winners.is_empty() {
            1.0
        } else {
            let consistent = winners
                .iter()
                .filter(|w| !w.enriched.parsed.raw.source.is_empty() && !w.platform().is_empty())
                .count();
            consistent as f64 / winners.len() as f64
        };

        let weight = |name: &str| self.config.integrity_weights.get(name).copied().unwrap_or(0.0);
        let score = weight("missing_fields") * missing_fields
            + weight("invalid_ranges") * invalid_ranges
            + weight("frn_match_rate") * frn_match_rate
            + weight("consistency") * consistency;

        (
            score,
            serde_json::json!({
                "missing_fields": missing_fields,
                "invalid_ranges": invalid_ranges,
                "frn_match_rate": frn_match_rate,
                "consistency": consistency,
                "score": score,
            }),
        )
    }

    fn dedup_effectiveness(&self, counts: &PipelineCounts, winners: &[FinalProduct]) -> (f64, serde_json::Value) {
        let mut histogram = std::collections::BTreeMap::new();
        for winner in winners {
            *histogram.entry(winner.selection_reason.as_str()).or_insert(0i64) += 1;
        }
        let with_competition = winners.iter().filter(|w| w.duplicate_count > 1).count();
        let cross_platform_ratio = if winners.is_empty() {
            0.0
        } else {
            with_competition as f64 / winners.len() as f64
        };
        let preferred_retained = winners
            .iter()
            .filter(|w| w.selection_reason == SelectionReason::PreferredPlatformRetained)
            .count();
        let preferred_retention = if with_competition == 0 {
            1.0
        } else {
            preferred_retained as f64 / with_competition as f64
        };
        // Effectiveness rewards real duplicate collapse and preferred
        // retention equally.
        let score = 0.5 * cross_platform_ratio + 0.5 * preferred_retention;
        (
            score,
            serde_json::json!({
                "groups": counts.groups,
                "cross_platform_ratio": cross_platform_ratio,
                "preferred_retention": preferred_retention,
                "selection_reasons": histogram,
            }),
        )
    }

    fn anomalies(&self, counts: &PipelineCounts, winners: &[FinalProduct]) -> Vec<String> {
        let mut anomalies = Vec::new();

        if !winners.is_empty() {
            let mean = winners.iter().map(|w| w.aer_rate()).sum::<f64>() / winners.len() as f64;
            let outliers = winners
                .iter()
                .filter(|w| w.aer_rate() > mean * (1.0 + OUTLIER_MARGIN))
                .count();
            if outliers > 0 {
                anomalies.push(format!(
                    "{} high-rate outliers above {:.2}% (mean {:.2}%)",
                    outliers,
                    mean * (1.0 + OUTLIER_MARGIN),
                    mean
                ));
            }
        }

        let frn_match_rate = if counts.enriched == 0 {
            1.0
        } else {
            counts.frn_matched as f64 / counts.enriched as f64
        };
        if frn_match_rate < self.config.anomaly_frn_match_rate_min {
            anomalies.push(format!(
                "FRN match rate {:.0}% below configured minimum {:.0}%",
                frn_match_rate * 100.0,
                self.config.anomaly_frn_match_rate_min * 100.0
            ));
        }

        if counts.duration_ms > LONG_PROCESSING_MS {
            anomalies.push(format!("processing took {} ms", counts.duration_ms));
        }

        anomalies
    }
}

fn compare_scores(current: f64, previous: f64) -> String {
    let delta = current - previous;
    if delta > STABLE_TOLERANCE {
        "improving".to_string()
    } else if delta < -STABLE_TOLERANCE {
        "degrading".to_string()
    } else {
        "stable".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_uses_the_stable_band() {
        assert_eq!(compare_scores(80.0, 77.0), "improving");
        assert_eq!(compare_scores(74.0, 77.0), "degrading");
        assert_eq!(compare_scores(78.5, 77.0), "stable");
        assert_eq!(compare_scores(75.5, 77.0), "stable");
    }
}
