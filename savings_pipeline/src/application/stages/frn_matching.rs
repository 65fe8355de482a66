// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # FRN Matching Stage
//!
//! Resolves every bank name to a Firm Reference Number through three paths,
//! in order:
//!
//! 1. **Exact** — case-insensitive equality of the normalized name against
//!    rank-1 cache entries.
//! 2. **Fuzzy** — Levenshtein similarity between space-stripped normalized
//!    forms across all rank-1 entries, gated by the configured similarity
//!    threshold and maximum edit distance, with an early exit at 0.99.
//! 3. **Alias** — substring containment against shared-brand and
//!    name-variation entries.
//!
//! The winner is banded by the configured confidence thresholds into
//! `MATCHED`, `RESEARCH_QUEUE`, or `NO_MATCH`. Weak and unknown names are
//! queued for manual research unless the name is a configured generic term,
//! already queued, or the queue is at capacity.

use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use savings_pipeline_domain::entities::audit::{FrnAuditRecord, FrnCandidate};
use savings_pipeline_domain::services::bank_normalizer::FrnNameNormalizer;
use savings_pipeline_domain::value_objects::frn_match::CacheMatchType;
use savings_pipeline_domain::{EnrichedProduct, FrnSource, FrnStatus, ParsedProduct, PipelineError};

use crate::application::audit::AuditRecorder;
use crate::infrastructure::config::FrnMatchingConfig;
use crate::infrastructure::repositories::{FrnCacheEntry, FrnRepository, ProductRepository};

/// Similarity at or above this ends the fuzzy scan immediately.
const FUZZY_EARLY_EXIT: f64 = 0.99;

/// In-memory view of the lookup cache, rebuilt whenever the SQL cache is.
pub struct FrnLookupCache {
    exact: HashMap<String, FrnCacheEntry>,
    rank1: Vec<FrnCacheEntry>,
    aliases: Vec<FrnCacheEntry>,
}

impl FrnLookupCache {
    pub fn from_entries(entries: Vec<FrnCacheEntry>) -> Self {
        let mut exact = HashMap::new();
        let mut rank1 = Vec::new();
        let mut aliases = Vec::new();
        for entry in entries {
            if matches!(entry.match_type, CacheMatchType::SharedBrand | CacheMatchType::NameVariation) {
                aliases.push(entry.clone());
            }
            if entry.match_rank == 1 {
                exact.insert(entry.search_name.clone(), entry.clone());
                rank1.push(entry);
            }
        }
        Self { exact, rank1, aliases }
    }

    pub fn len(&self) -> usize {
        self.rank1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rank1.is_empty()
    }
}

struct Resolution {
    normalized: String,
    frn: Option<String>,
    confidence: f64,
    status: FrnStatus,
    source: FrnSource,
    match_type: Option<String>,
    candidates: Vec<FrnCandidate>,
}

/// The FRN matching stage.
pub struct FrnMatchingStage {
    config: FrnMatchingConfig,
    normalizer: FrnNameNormalizer,
    cache: FrnLookupCache,
}

impl FrnMatchingStage {
    /// Builds the stage: normalizer from the configured word lists, cache
    /// from the rebuilt lookup table.
    pub async fn build(config: FrnMatchingConfig, frn_repo: &FrnRepository) -> Result<Self, PipelineError> {
        let normalizer = FrnNameNormalizer::new(
            config.normalization_prefixes.clone(),
            config.normalization_suffixes.clone(),
            config.normalization_abbreviations.clone(),
        );
        let cache = FrnLookupCache::from_entries(frn_repo.load_cache_entries().await?);
        debug!(entries = cache.len(), "FRN matching stage ready");
        Ok(Self {
            config,
            normalizer,
            cache,
        })
    }

    pub fn normalizer(&self) -> &FrnNameNormalizer {
        &self.normalizer
    }

    pub fn stage_timeout_ms(&self) -> i64 {
        self.config.stage_timeout_ms
    }

    /// Enriches every parsed product with its FRN resolution, writes the
    /// resolution back to the raw table, and records one audit row per
    /// product.
    pub async fn enrich_all(
        &self,
        conn: &mut SqliteConnection,
        repo: &ProductRepository,
        frn_repo: &FrnRepository,
        recorder: &mut AuditRecorder,
        products: Vec<ParsedProduct>,
    ) -> Result<Vec<EnrichedProduct>, PipelineError> {
        let mut enriched = Vec::with_capacity(products.len());
        let mut matched = 0usize;

        for parsed in products {
            let resolution = self.resolve(&parsed.raw.bank_name);

            if resolution.status != FrnStatus::Matched {
                self.maybe_queue_research(conn, frn_repo, &parsed, &resolution).await?;
            }
            if resolution.status == FrnStatus::Matched {
                matched += 1;
            }

            if let Some(raw_id) = parsed.raw.id {
                repo.write_back_frn(
                    conn,
                    raw_id,
                    &resolution.normalized,
                    resolution.frn.as_deref(),
                    resolution.confidence,
                )
                .await?;
            }

            recorder.push_frn(FrnAuditRecord {
                bank_name: parsed.raw.bank_name.clone(),
                normalized_name: resolution.normalized.clone(),
                frn: resolution.frn.clone(),
                frn_status: resolution.status,
                frn_source: resolution.source,
                confidence: resolution.confidence,
                candidates: resolution.candidates.clone(),
                normalization_steps: vec![
                    parsed.raw.bank_name.clone(),
                    resolution.normalized.clone(),
                    self.normalizer.normalize_compact(&parsed.raw.bank_name),
                ],
            });

            enriched.push(EnrichedProduct {
                normalized_bank_name: resolution.normalized,
                frn: resolution.frn,
                frn_confidence: resolution.confidence,
                frn_status: resolution.status,
                frn_source: resolution.source,
                match_type: resolution.match_type,
                parsed,
            });
        }

        info!(
            total = enriched.len(),
            matched,
            "FRN matching complete"
        );
        Ok(enriched)
    }

    fn resolve(&self, bank_name: &str) -> Resolution {
        let normalized = self.normalizer.normalize(bank_name);
        let mut candidates = Vec::new();

        // Exact path.
        if let Some(entry) = self.cache.exact.get(&normalized) {
            candidates.push(candidate_of(entry, entry.confidence_score));
            return self.classify(normalized, Some(entry), entry.confidence_score, FrnSource::Exact, candidates);
        }

        // Fuzzy path over rank-1 entries, space-stripped forms.
        let compact: String = normalized.split_whitespace().collect();
        let mut best: Option<(&FrnCacheEntry, f64, usize)> = None;
        if !compact.is_empty() {
            for entry in &self.cache.rank1 {
                let entry_compact: String = entry.search_name.split_whitespace().collect();
                if entry_compact.is_empty() {
                    continue;
                }
                let similarity = strsim::normalized_levenshtein(&compact, &entry_compact);
                let distance = strsim::levenshtein(&compact, &entry_compact);
                if similarity > best.as_ref().map(|(_, s, _)| *s).unwrap_or(0.0) {
                    best = Some((entry, similarity, distance));
                }
                if similarity >= FUZZY_EARLY_EXIT {
                    break;
                }
            }
        }
        if let Some((entry, similarity, distance)) = best {
            if similarity >= self.config.fuzzy_threshold && distance as i64 <= self.config.max_edit_distance {
                let confidence = similarity * self.config.fuzzy_match_confidence;
                candidates.push(candidate_of(entry, confidence));
                return self.classify(normalized, Some(entry), confidence, FrnSource::Fuzzy, candidates);
            }
        }

        // Alias path: substring search over shared brands and variations.
        let alias = self
            .cache
            .aliases
            .iter()
            .filter(|entry| {
                entry.search_name.contains(normalized.as_str()) || normalized.contains(entry.search_name.as_str())
            })
            .max_by(|a, b| {
                a.confidence_score
                    .partial_cmp(&b.confidence_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(entry) = alias {
            candidates.push(candidate_of(entry, entry.confidence_score));
            return self.classify(normalized, Some(entry), entry.confidence_score, FrnSource::Alias, candidates);
        }

        Resolution {
            normalized,
            frn: None,
            confidence: 0.0,
            status: FrnStatus::NoMatch,
            source: FrnSource::None,
            match_type: None,
            candidates,
        }
    }

    fn classify(
        &self,
        normalized: String,
        entry: Option<&FrnCacheEntry>,
        confidence: f64,
        source: FrnSource,
        candidates: Vec<FrnCandidate>,
    ) -> Resolution {
        let status = if confidence >= self.config.confidence_threshold_high {
            FrnStatus::Matched
        } else if confidence >= self.config.confidence_threshold_low {
            FrnStatus::ResearchQueue
        } else {
            FrnStatus::NoMatch
        };
        // A weak candidate's FRN still travels with the product so manual
        // review sees what the engine almost chose.
        Resolution {
            normalized,
            frn: entry.map(|e| e.frn.clone()).filter(|_| status != FrnStatus::NoMatch),
            confidence,
            status,
            source: if status == FrnStatus::NoMatch { FrnSource::None } else { source },
            match_type: entry.map(|e| e.match_type.as_str().to_string()),
            candidates,
        }
    }

    /// Research-queue gating: generic terms never queue, duplicates never
    /// queue, and a full queue logs instead of growing.
    async fn maybe_queue_research(
        &self,
        conn: &mut SqliteConnection,
        frn_repo: &FrnRepository,
        parsed: &ParsedProduct,
        resolution: &Resolution,
    ) -> Result<(), PipelineError> {
        let name = &resolution.normalized;
        if name.is_empty() {
            return Ok(());
        }
        if self.config.generic_terms.iter().any(|term| term.eq_ignore_ascii_case(name)) {
            return Ok(());
        }
        if frn_repo.is_queued(conn, name).await? {
            return Ok(());
        }
        if frn_repo.research_queue_size(conn).await? >= self.config.research_queue_max_size {
            warn!(bank_name = %name, "research queue at capacity; not enqueueing");
            return Ok(());
        }
        frn_repo
            .enqueue_research(conn, name, &parsed.normalized_platform, &parsed.raw.source)
            .await
    }
}

fn candidate_of(entry: &FrnCacheEntry, confidence: f64) -> FrnCandidate {
    FrnCandidate {
        frn: entry.frn.clone(),
        search_name: entry.search_name.clone(),
        confidence,
        match_type: entry.match_type.as_str().to_string(),
    }
}
