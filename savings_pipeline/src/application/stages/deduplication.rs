// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Deduplication Stage
//!
//! Groups products by FSCS-safe business key and selects one winner per
//! group under strict separation rules:
//!
//! 1. **FSCS bank separation** — a group containing more than one distinct
//!    normalized bank name is split per bank. This is a warning, never an
//!    error, and the split groups are flagged for review: records from
//!    different banks must never collapse, whatever their rates say.
//! 2. **Direct/aggregator separation** — within a single-bank group,
//!    products on configured direct platforms form their own sub-group and
//!    never compete with aggregator listings.
//! 3. **Preferred platforms** — an operator-designated aggregator is
//!    retained unless some non-preferred product beats it by more than its
//!    configured rate tolerance.
//! 4. **Rate-tolerance bucketing** — remaining candidates whose AERs sit
//!    within the configured basis-point tolerance of each other are true
//!    duplicates; each bucket elects a winner by quality score, ties broken
//!    by higher AER.
//!
//! The business key never contains platform, FRN, deposit bounds, or rate —
//! rate comparison happens inside a key group, not in the key.

use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use tracing::{info, warn};

use savings_pipeline_domain::entities::audit::{DedupGroupRecord, DedupSummaryRecord};
use savings_pipeline_domain::services::bank_normalizer::DedupNameNormalizer;
use savings_pipeline_domain::{
    BusinessKey, EnrichedProduct, FinalProduct, PipelineError, PlatformCategory, SelectionReason,
};

use crate::application::audit::AuditRecorder;
use crate::infrastructure::config::{DeduplicationConfig, PlatformDirectory};
use crate::infrastructure::repositories::ProductRepository;

/// Per-run deduplication result.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub winners: Vec<FinalProduct>,
    pub group_count: usize,
    pub fscs_violations: usize,
    pub input_count: usize,
}

struct Annotated {
    product: EnrichedProduct,
    dedup_bank: String,
    key: BusinessKey,
    category: PlatformCategory,
    score: f64,
}

impl Annotated {
    fn identifier(&self) -> String {
        match self.product.parsed.raw.id {
            Some(id) => format!("raw:{}", id),
            None => format!(
                "{}|{}|{:.2}",
                self.product.platform(),
                self.product.bank_name(),
                self.product.aer_rate()
            ),
        }
    }
}

/// The deduplication stage.
pub struct DeduplicationStage {
    config: DeduplicationConfig,
    normalizer: DedupNameNormalizer,
    platforms: PlatformDirectory,
}

impl DeduplicationStage {
    pub fn new(config: DeduplicationConfig, platforms: PlatformDirectory) -> Self {
        let normalizer = DedupNameNormalizer::new(config.corporate_suffixes.clone());
        Self {
            config,
            normalizer,
            platforms,
        }
    }

    /// Runs deduplication over the enriched product set, persists business
    /// keys back to the raw table, and records group and summary audit rows.
    pub async fn run(
        &self,
        conn: &mut SqliteConnection,
        repo: &ProductRepository,
        recorder: &mut AuditRecorder,
        products: Vec<EnrichedProduct>,
    ) -> Result<DedupOutcome, PipelineError> {
        let input_count = products.len();
        let annotated: Vec<Annotated> = products
            .into_iter()
            .map(|product| {
                let dedup_bank = self.normalizer.normalize(&product.parsed.raw.bank_name);
                let key = BusinessKey::new(
                    &dedup_bank,
                    product.parsed.account_type,
                    product.parsed.raw.term_months,
                    product.parsed.raw.notice_period_days,
                );
                let category = PlatformCategory::classify(product.platform(), &self.config.direct_platforms);
                let score = self.quality_score(&product);
                Annotated {
                    product,
                    dedup_bank,
                    key,
                    category,
                    score,
                }
            })
            .collect();

        // Persist business keys first so the quality analyzer can join raw
        // rows to groups whatever selection decides.
        for item in &annotated {
            repo.write_back_business_key(
                conn,
                &item.product.parsed.raw.bank_name,
                item.product.platform(),
                item.product.parsed.account_type,
                item.product.aer_rate(),
                item.key.as_str(),
            )
            .await?;
        }

        let (winners, groups, fscs_violations) = self.select_winners(annotated);

        let mut histogram: BTreeMap<&'static str, i64> = BTreeMap::new();
        for group in &groups {
            *histogram.entry(group.selection_reason.as_str()).or_default() += 1;
            recorder.push_dedup_group(group.clone());
        }
        recorder.set_dedup_summary(DedupSummaryRecord {
            total_products: input_count as i64,
            group_count: groups.len() as i64,
            fscs_violations: fscs_violations as i64,
            selected_count: winners.len() as i64,
            dropped_count: (input_count - winners.len()) as i64,
            reason_histogram: serde_json::to_value(&histogram)?,
        });

        info!(
            input = input_count,
            groups = groups.len(),
            winners = winners.len(),
            fscs_violations,
            "deduplication complete"
        );

        Ok(DedupOutcome {
            group_count: groups.len(),
            fscs_violations,
            input_count,
            winners,
        })
    }

    /// Grouping, FSCS split, partition, and winner selection. Pure in-memory
    /// logic, deterministic for a given input order and configuration.
    fn select_winners(&self, annotated: Vec<Annotated>) -> (Vec<FinalProduct>, Vec<DedupGroupRecord>, usize) {
        let mut by_key: BTreeMap<String, Vec<Annotated>> = BTreeMap::new();
        for item in annotated {
            by_key.entry(item.key.as_str().to_string()).or_default().push(item);
        }

        // Candidate groups start as business-key groups, then key groups
        // that share a resolved FRN and the same non-bank key shape are
        // merged: a shared-brand listing and its parent institution are
        // candidate duplicates even though their bank names (and therefore
        // keys) differ, and the FSCS check below must see them together to
        // rule on them.
        let mut candidates: Vec<Vec<Annotated>> = Vec::new();
        let mut frn_slot: std::collections::HashMap<(String, String), usize> = std::collections::HashMap::new();
        for (key, members) in by_key {
            let shape = key.split_once('|').map(|(_, rest)| rest.to_string()).unwrap_or_default();
            let existing = members.iter().find_map(|m| {
                m.product
                    .frn
                    .as_ref()
                    .and_then(|frn| frn_slot.get(&(shape.clone(), frn.clone())).copied())
            });
            let index = match existing {
                Some(index) => {
                    candidates[index].extend(members);
                    index
                }
                None => {
                    candidates.push(members);
                    candidates.len() - 1
                }
            };
            for member in &candidates[index] {
                if let Some(frn) = &member.product.frn {
                    frn_slot.insert((shape.clone(), frn.clone()), index);
                }
            }
        }

        let mut winners = Vec::new();
        let mut groups = Vec::new();
        let mut fscs_violations = 0usize;

        for members in candidates {
            // FSCS compliance check before any competition.
            let mut by_bank: BTreeMap<String, Vec<Annotated>> = BTreeMap::new();
            for member in members {
                by_bank.entry(member.dedup_bank.clone()).or_default().push(member);
            }
            let fscs_split = by_bank.len() > 1;
            if fscs_split {
                fscs_violations += 1;
                warn!(
                    banks = by_bank.len(),
                    "FSCS violation: distinct banks grouped as duplicate candidates; splitting group"
                );
            }

            for (bank, bank_members) in by_bank {
                let whole_group_single = !fscs_split && bank_members.len() == 1;
                let (direct, aggregator): (Vec<Annotated>, Vec<Annotated>) =
                    bank_members.into_iter().partition(|m| m.category == PlatformCategory::Direct);
                let cross_platform = !direct.is_empty() && !aggregator.is_empty();

                for partition in [direct, aggregator] {
                    if partition.is_empty() {
                        continue;
                    }
                    // Same bank and same key shape: every partition member
                    // carries the same business key.
                    let key = partition[0].key.as_str().to_string();
                    let (winner_index, reason) =
                        self.select_in_partition(&partition, whole_group_single, cross_platform, fscs_split);
                    groups.push(self.group_record(&key, &bank, &partition, winner_index, reason, fscs_split));
                    winners.push(self.final_product(partition, winner_index, reason, fscs_split));
                }
            }
        }

        (winners, groups, fscs_violations)
    }

    fn select_in_partition(
        &self,
        partition: &[Annotated],
        whole_group_single: bool,
        cross_platform: bool,
        fscs_split: bool,
    ) -> (usize, SelectionReason) {
        if partition.len() == 1 {
            let reason = if fscs_split {
                SelectionReason::FscsBankSeparation
            } else if whole_group_single {
                SelectionReason::SingleProduct
            } else if cross_platform {
                SelectionReason::CrossPlatformSelection
            } else {
                SelectionReason::SingleProduct
            };
            return (0, reason);
        }

        // Preferred-platform retention: a preferred product survives unless
        // a non-preferred one beats it by more than its tolerance.
        let mut retained: Option<(usize, i64)> = None;
        for (index, member) in partition.iter().enumerate() {
            let Some(preferred) = self.config.preferred(member.product.platform()) else {
                continue;
            };
            let beaten = partition.iter().any(|other| {
                self.config.preferred(other.product.platform()).is_none()
                    && other.product.aer_rate() > member.product.aer_rate() + preferred.rate_tolerance
            });
            if !beaten {
                let better = match retained {
                    Some((_, best_priority)) => preferred.priority < best_priority,
                    None => true,
                };
                if better {
                    retained = Some((index, preferred.priority));
                }
            }
        }
        if let Some((index, _)) = retained {
            return (index, SelectionReason::PreferredPlatformRetained);
        }

        // Rate-tolerance bucketing among non-preferred candidates.
        let tolerance = self.config.rate_tolerance();
        let mut candidates: Vec<usize> = (0..partition.len())
            .filter(|&i| self.config.preferred(partition[i].product.platform()).is_none())
            .collect();
        if candidates.is_empty() {
            // Every member is preferred and every one was beaten by the
            // others' rates; fall back to straight quality selection.
            candidates = (0..partition.len()).collect();
        }
        candidates.sort_by(|&a, &b| {
            partition[b]
                .product
                .aer_rate()
                .partial_cmp(&partition[a].product.aer_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut buckets: Vec<Vec<usize>> = Vec::new();
        for index in candidates {
            match buckets.last_mut() {
                Some(bucket)
                    if (partition[bucket[0]].product.aer_rate() - partition[index].product.aer_rate()).abs()
                        <= tolerance =>
                {
                    bucket.push(index);
                }
                _ => buckets.push(vec![index]),
            }
        }

        let bucket_winner = |bucket: &[usize]| -> usize {
            bucket
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    partition[a]
                        .score
                        .partial_cmp(&partition[b].score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            partition[a]
                                .product
                                .aer_rate()
                                .partial_cmp(&partition[b].product.aer_rate())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                })
                .unwrap_or(bucket[0])
        };

        let per_bucket: Vec<usize> = buckets.iter().map(|b| bucket_winner(b)).collect();
        let winner = per_bucket
            .iter()
            .copied()
            .max_by(|&a, &b| {
                partition[a]
                    .score
                    .partial_cmp(&partition[b].score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        partition[a]
                            .product
                            .aer_rate()
                            .partial_cmp(&partition[b].product.aer_rate())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            })
            .unwrap_or(per_bucket[0]);

        let winning_bucket_len = buckets
            .iter()
            .find(|bucket| bucket.contains(&winner))
            .map(Vec::len)
            .unwrap_or(1);

        let all_singletons = buckets.iter().all(|b| b.len() == 1);
        let reason = if fscs_split {
            SelectionReason::FscsBankSeparation
        } else if winning_bucket_len > 1 {
            SelectionReason::RateToleranceDeduplication
        } else if buckets.len() > 1 && all_singletons {
            // The grouped products share an identity but none sit within
            // rate tolerance of each other; the best one is published.
            SelectionReason::NoDuplicatesFound
        } else {
            SelectionReason::QualityScoreSelection
        };
        (winner, reason)
    }

    /// Quality score: configurable weighted sum plus the FRN bonus, capped.
    /// Weights are applied exactly as configured — never renormalized.
    fn quality_score(&self, product: &EnrichedProduct) -> f64 {
        let rate_score = (product.aer_rate() / self.config.max_rate_for_scoring).min(self.config.quality_score_max);
        let platform_reliability = self
            .platforms
            .reliability(product.platform(), self.config.default_platform_reliability);
        let completeness = self.completeness(product);
        let reliability = if product.frn.is_some() {
            product.frn_confidence
        } else {
            platform_reliability
        };

        let mut score = self.config.rate_score_weight * rate_score
            + self.config.platform_score_weight * platform_reliability
            + self.config.completeness_score_weight * completeness
            + self.config.reliability_score_weight * reliability;
        if product.frn.is_some() {
            score += self.config.frn_quality_bonus;
        }
        score.min(self.config.quality_score_max)
    }

    /// Fraction of the configured completeness fields that are populated.
    fn completeness(&self, product: &EnrichedProduct) -> f64 {
        if self.config.completeness_fields.is_empty() {
            return 0.0;
        }
        let raw = &product.parsed.raw;
        let populated = self
            .config
            .completeness_fields
            .iter()
            .filter(|field| match field.as_str() {
                "bank_name" => !raw.bank_name.trim().is_empty(),
                "platform" => !product.parsed.normalized_platform.is_empty(),
                "account_type" => true,
                "aer_rate" => raw.aer_rate.is_some(),
                "gross_rate" => raw.gross_rate.is_some(),
                "term_months" => raw.term_months.is_some(),
                "notice_period_days" => raw.notice_period_days.is_some(),
                "min_deposit" => raw.min_deposit.is_some(),
                "max_deposit" => raw.max_deposit.is_some(),
                "scrape_date" => raw.scrape_date.is_some(),
                "frn" => product.frn.is_some(),
                _ => false,
            })
            .count();
        populated as f64 / self.config.completeness_fields.len() as f64
    }

    fn group_record(
        &self,
        key: &str,
        bank: &str,
        partition: &[Annotated],
        winner_index: usize,
        reason: SelectionReason,
        fscs_split: bool,
    ) -> DedupGroupRecord {
        let winner = &partition[winner_index];
        DedupGroupRecord {
            business_key: key.to_string(),
            normalized_bank_name: bank.to_string(),
            platform_category: winner.category.as_str().to_string(),
            product_count: partition.len() as i64,
            winner: serde_json::json!({
                "bank_name": winner.product.bank_name(),
                "platform": winner.product.platform(),
                "aer_rate": winner.product.aer_rate(),
                "quality_score": winner.score,
            }),
            selection_reason: reason,
            quality_scores: partition.iter().map(|m| m.score).collect(),
            competing: partition
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != winner_index)
                .map(|(_, m)| m.identifier())
                .collect(),
            fscs_compliant: !fscs_split,
        }
    }

    fn final_product(
        &self,
        mut partition: Vec<Annotated>,
        winner_index: usize,
        reason: SelectionReason,
        fscs_split: bool,
    ) -> FinalProduct {
        let competing: Vec<String> = partition
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != winner_index)
            .map(|(_, m)| m.identifier())
            .collect();
        let duplicate_count = partition.len() as i64;
        let winner = partition.swap_remove(winner_index);
        FinalProduct {
            business_key: winner.key,
            quality_score: winner.score,
            duplicate_count,
            selection_reason: reason,
            competing_product_ids: competing,
            fscs_compliant: !fscs_split,
            platform_category: winner.category,
            enriched: winner.product,
        }
    }
}
