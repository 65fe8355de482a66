// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # FRN Repository
//!
//! Maintains the derived FRN lookup cache and the research queue.
//!
//! The cache is rebuilt wholesale — never patched — from three source
//! tables, in priority order: manual overrides, Bank of England
//! institutions, and shared brands. For every canonical name the loader
//! inserts the 2×2×2 cross product of name variations (prefix removal ×
//! suffix removal × abbreviation expansion). A SQL post-pass then assigns
//! `match_rank` so the top-priority entry per search name is rank 1 and
//! unique.
//!
//! Rebuild cost is deliberately O(N × variation count) at startup; that
//! eliminates staleness after manual-override changes, which trigger an
//! immediate rebuild.

use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use savings_pipeline_domain::services::bank_normalizer::FrnNameNormalizer;
use savings_pipeline_domain::value_objects::frn_match::CacheMatchType;
use savings_pipeline_domain::PipelineError;

/// One lookup-cache row.
#[derive(Debug, Clone)]
pub struct FrnCacheEntry {
    pub frn: String,
    pub canonical_name: String,
    pub search_name: String,
    pub match_type: CacheMatchType,
    pub confidence_score: f64,
    pub priority_rank: i64,
    pub match_rank: i64,
}

/// Base confidences per source table. These express provenance trust, not
/// match quality; match quality comes from the resolution path.
const OVERRIDE_CONFIDENCE: f64 = 1.0;
const INSTITUTION_CONFIDENCE: f64 = 0.95;
const VARIATION_CONFIDENCE: f64 = 0.85;
const SHARED_BRAND_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct FrnRepository {
    pool: SqlitePool,
}

impl FrnRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Rebuilds the lookup cache from its three source tables.
    pub async fn rebuild_lookup_cache(&self, normalizer: &FrnNameNormalizer) -> Result<usize, PipelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::database_failed(format!("beginning cache rebuild: {}", e)))?;

        sqlx::query("DELETE FROM frn_lookup_helper_cache")
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::database_failed(format!("clearing lookup cache: {}", e)))?;

        let mut inserted = 0usize;

        // Manual overrides: highest priority, single canonical variation
        // each — an operator wrote the exact name they want matched.
        let overrides = sqlx::query("SELECT bank_name, frn, canonical_name, confidence_score FROM frn_manual_overrides")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| PipelineError::database_failed(format!("reading manual overrides: {}", e)))?;
        for row in overrides {
            let bank_name: String = row.get("bank_name");
            let frn: String = row.get("frn");
            let canonical: Option<String> = row.get("canonical_name");
            let confidence: f64 = row.get("confidence_score");
            let canonical = canonical.unwrap_or_else(|| bank_name.clone());
            let search_name = normalizer.normalize(&bank_name);
            inserted += insert_cache_row(
                &mut tx,
                &frn,
                &canonical,
                &search_name,
                "frn_manual_overrides",
                CacheMatchType::ManualOverride,
                if confidence > 0.0 { confidence } else { OVERRIDE_CONFIDENCE },
            )
            .await?;
        }

        // Institutions: the full variation cross product per firm name.
        let institutions = sqlx::query("SELECT frn, firm_name FROM boe_institutions")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| PipelineError::database_failed(format!("reading institutions: {}", e)))?;
        for row in institutions {
            let frn: String = row.get("frn");
            let firm_name: String = row.get("firm_name");
            let variations = normalizer.generate_variations(&firm_name);
            for (index, variation) in variations.iter().enumerate() {
                // The unmodified normalized name is a direct match; every
                // generated alternative is a name variation.
                let (match_type, confidence) = if index == 0 {
                    (CacheMatchType::DirectMatch, INSTITUTION_CONFIDENCE)
                } else {
                    (CacheMatchType::NameVariation, VARIATION_CONFIDENCE)
                };
                inserted +=
                    insert_cache_row(&mut tx, &frn, &firm_name, variation, "boe_institutions", match_type, confidence)
                        .await?;
            }
        }

        // Shared brands: a brand name maps to its owning institution's FRN.
        let brands = sqlx::query("SELECT frn, brand_name FROM boe_shared_brands")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| PipelineError::database_failed(format!("reading shared brands: {}", e)))?;
        for row in brands {
            let frn: String = row.get("frn");
            let brand_name: String = row.get("brand_name");
            for variation in normalizer.generate_variations(&brand_name) {
                inserted += insert_cache_row(
                    &mut tx,
                    &frn,
                    &brand_name,
                    &variation,
                    "boe_shared_brands",
                    CacheMatchType::SharedBrand,
                    SHARED_BRAND_CONFIDENCE,
                )
                .await?;
            }
        }

        // Post-pass: rank entries per search name so rank 1 is the unique
        // top-priority row.
        sqlx::query(
            "WITH ranked AS ( \
                SELECT id, ROW_NUMBER() OVER ( \
                    PARTITION BY search_name \
                    ORDER BY priority_rank ASC, confidence_score DESC, id ASC \
                ) AS rn FROM frn_lookup_helper_cache \
             ) \
             UPDATE frn_lookup_helper_cache \
             SET match_rank = (SELECT rn FROM ranked WHERE ranked.id = frn_lookup_helper_cache.id)",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| PipelineError::database_failed(format!("assigning match ranks: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| PipelineError::database_failed(format!("committing cache rebuild: {}", e)))?;

        info!(entries = inserted, "FRN lookup cache rebuilt");
        Ok(inserted)
    }

    /// Loads rank-1 entries plus alias-searchable entries into memory for
    /// per-product resolution.
    pub async fn load_cache_entries(&self) -> Result<Vec<FrnCacheEntry>, PipelineError> {
        let rows = sqlx::query(
            "SELECT frn, canonical_name, search_name, match_type, confidence_score, priority_rank, match_rank \
             FROM frn_lookup_helper_cache ORDER BY search_name, match_rank",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("loading lookup cache: {}", e)))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let match_type_str: String = row.get("match_type");
            let Some(match_type) = CacheMatchType::parse(&match_type_str) else {
                continue;
            };
            entries.push(FrnCacheEntry {
                frn: row.get("frn"),
                canonical_name: row.get("canonical_name"),
                search_name: row.get("search_name"),
                match_type,
                confidence_score: row.get("confidence_score"),
                priority_rank: row.get("priority_rank"),
                match_rank: row.get("match_rank"),
            });
        }
        debug!(entries = entries.len(), "loaded FRN cache entries");
        Ok(entries)
    }

    /// Adds a manual override. The caller must rebuild the cache afterwards
    /// so the override takes effect immediately.
    pub async fn add_manual_override(
        &self,
        bank_name: &str,
        frn: &str,
        canonical_name: Option<&str>,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO frn_manual_overrides (bank_name, frn, canonical_name) VALUES (?, ?, ?) \
             ON CONFLICT(bank_name) DO UPDATE SET frn = excluded.frn, canonical_name = excluded.canonical_name",
        )
        .bind(bank_name)
        .bind(frn)
        .bind(canonical_name)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("adding manual override: {}", e)))?;
        Ok(())
    }

    /// Current research queue size. Rides the run connection so queue
    /// writes and reads stay inside the run's transaction.
    pub async fn research_queue_size(&self, conn: &mut sqlx::SqliteConnection) -> Result<i64, PipelineError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM frn_research_queue")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| PipelineError::database_failed(format!("counting research queue: {}", e)))
    }

    /// True when the name is already queued for research.
    pub async fn is_queued(&self, conn: &mut sqlx::SqliteConnection, bank_name: &str) -> Result<bool, PipelineError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM frn_research_queue WHERE bank_name = ?")
            .bind(bank_name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| PipelineError::database_failed(format!("checking research queue: {}", e)))?;
        Ok(row.is_some())
    }

    /// Enqueues an unknown name. Append-only; duplicates are ignored.
    pub async fn enqueue_research(
        &self,
        conn: &mut sqlx::SqliteConnection,
        bank_name: &str,
        platform: &str,
        source: &str,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO frn_research_queue (bank_name, platform, source) VALUES (?, ?, ?) \
             ON CONFLICT(bank_name) DO NOTHING",
        )
        .bind(bank_name)
        .bind(platform)
        .bind(source)
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("enqueueing research entry: {}", e)))?;
        Ok(())
    }

    /// Lists queued names for manual review.
    pub async fn list_research_queue(&self) -> Result<Vec<(String, Option<String>, Option<String>)>, PipelineError> {
        let rows = sqlx::query("SELECT bank_name, platform, source FROM frn_research_queue ORDER BY first_seen")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::database_failed(format!("listing research queue: {}", e)))?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("bank_name"), row.get("platform"), row.get("source")))
            .collect())
    }

    /// Resolves a queued name into a manual override and removes it from
    /// the queue. The caller must rebuild the cache afterwards.
    pub async fn resolve_research_entry(&self, bank_name: &str, frn: &str) -> Result<(), PipelineError> {
        self.add_manual_override(bank_name, frn, None).await?;
        sqlx::query("DELETE FROM frn_research_queue WHERE bank_name = ?")
            .bind(bank_name)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("resolving research entry: {}", e)))?;
        Ok(())
    }
}

async fn insert_cache_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    frn: &str,
    canonical_name: &str,
    search_name: &str,
    source_table: &str,
    match_type: CacheMatchType,
    confidence: f64,
) -> Result<usize, PipelineError> {
    if search_name.is_empty() {
        return Ok(0);
    }
    sqlx::query(
        "INSERT INTO frn_lookup_helper_cache \
         (frn, canonical_name, search_name, source_table, match_type, confidence_score, priority_rank) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(frn)
    .bind(canonical_name)
    .bind(search_name)
    .bind(source_table)
    .bind(match_type.as_str())
    .bind(confidence)
    .bind(match_type.priority_rank())
    .execute(&mut **tx)
    .await
    .map_err(|e| PipelineError::database_failed(format!("inserting cache row: {}", e)))?;
    Ok(1)
}
