// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Product Repository
//!
//! Owns the raw/clean table protocol:
//!
//! - the raw table is append-only within a run and cleared only per
//!   `(source, method)` before a fresh ingestion of that origin — never
//!   globally;
//! - FRN matching and deduplication patch the raw table in place
//!   (normalized name, FRN, confidence, business key);
//! - the canonical table is replaced wholesale, with the outgoing rows
//!   archived to `historical_products` first;
//! - the reprocessing fallback copies unprocessed raw rows straight into
//!   the canonical table under `fallback_<rowid>` keys.
//!
//! Every mutation takes `&mut SqliteConnection` so the orchestrator decides
//! transaction boundaries (one transaction in atomic mode, one per stage in
//! incremental mode).

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use savings_pipeline_domain::{
    AccountType, EnrichedProduct, FinalProduct, FrnSource, FrnStatus, ParsedProduct, PipelineError, RawProduct,
};

#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Deletes raw rows of exactly this `(source, method)` origin. Called
    /// before re-ingesting that origin; other origins are untouched.
    pub async fn clear_origin(
        &self,
        conn: &mut SqliteConnection,
        source: &str,
        method: &str,
    ) -> Result<u64, PipelineError> {
        let result = sqlx::query("DELETE FROM available_products_raw WHERE source = ? AND method = ?")
            .bind(source)
            .bind(method)
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::database_failed(format!("clearing raw origin: {}", e)))?;
        Ok(result.rows_affected())
    }

    /// Inserts passed products for one origin.
    pub async fn insert_raw(
        &self,
        conn: &mut SqliteConnection,
        products: &[ParsedProduct],
    ) -> Result<(), PipelineError> {
        for product in products {
            let raw = &product.raw;
            sqlx::query(
                "INSERT INTO available_products_raw \
                 (platform, source, method, bank_name, account_type, aer_rate, gross_rate, term_months, \
                  notice_period_days, min_deposit, max_deposit, fscs_protected, platform_priority, \
                  source_reliability, scrape_date) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&product.normalized_platform)
            .bind(&raw.source)
            .bind(&raw.method)
            .bind(&raw.bank_name)
            .bind(product.account_type.as_str())
            .bind(raw.aer_rate.unwrap_or(0.0))
            .bind(raw.gross_rate)
            .bind(raw.term_months)
            .bind(raw.notice_period_days)
            .bind(raw.min_deposit)
            .bind(raw.max_deposit)
            .bind(raw.fscs_protected)
            .bind(product.platform_priority)
            .bind(product.source_reliability)
            .bind(raw.scrape_date.map(|d| d.to_rfc3339()))
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("inserting raw product: {}", e)))?;
        }
        Ok(())
    }

    /// Loads the entire raw table as parsed products — the input to the
    /// rebuild path, so cross-source deduplication sees every origin.
    pub async fn load_all_raw(&self, conn: &mut SqliteConnection) -> Result<Vec<ParsedProduct>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id, platform, source, method, bank_name, account_type, aer_rate, gross_rate, \
             term_months, notice_period_days, min_deposit, max_deposit, fscs_protected, \
             platform_priority, source_reliability, scrape_date \
             FROM available_products_raw ORDER BY id",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| PipelineError::database_failed(format!("loading raw table: {}", e)))?;

        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            let account_type_str: String = row.get("account_type");
            let account_type = AccountType::parse(&account_type_str)?;
            let platform: String = row.get("platform");
            let scrape_date: Option<String> = row.get("scrape_date");
            let raw = RawProduct {
                id: Some(row.get("id")),
                platform: Some(platform.clone()),
                source: row.get("source"),
                method: row.get("method"),
                bank_name: row.get("bank_name"),
                account_type: account_type_str,
                aer_rate: Some(row.get("aer_rate")),
                gross_rate: row.get("gross_rate"),
                term_months: row.get("term_months"),
                notice_period_days: row.get("notice_period_days"),
                min_deposit: row.get("min_deposit"),
                max_deposit: row.get("max_deposit"),
                fscs_protected: row.get::<i64, _>("fscs_protected") != 0,
                scrape_date: scrape_date.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
            };
            products.push(ParsedProduct {
                raw,
                account_type,
                normalized_platform: platform,
                platform_priority: row.get("platform_priority"),
                source_reliability: row.get("source_reliability"),
            });
        }
        Ok(products)
    }

    /// Loads the raw table with its FRN patches applied, for the
    /// deduplication-only reprocessing path.
    pub async fn load_all_enriched(&self, conn: &mut SqliteConnection) -> Result<Vec<EnrichedProduct>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id, platform, source, method, bank_name, normalized_bank_name, account_type, aer_rate, \
             gross_rate, term_months, notice_period_days, min_deposit, max_deposit, fscs_protected, frn, \
             confidence_score, platform_priority, source_reliability, scrape_date \
             FROM available_products_raw ORDER BY id",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| PipelineError::database_failed(format!("loading enriched raw table: {}", e)))?;

        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            let account_type_str: String = row.get("account_type");
            let account_type = AccountType::parse(&account_type_str)?;
            let platform: String = row.get("platform");
            let scrape_date: Option<String> = row.get("scrape_date");
            let bank_name: String = row.get("bank_name");
            let normalized: Option<String> = row.get("normalized_bank_name");
            let frn: Option<String> = row.get("frn");
            let confidence: Option<f64> = row.get("confidence_score");
            let raw = RawProduct {
                id: Some(row.get("id")),
                platform: Some(platform.clone()),
                source: row.get("source"),
                method: row.get("method"),
                bank_name: bank_name.clone(),
                account_type: account_type_str,
                aer_rate: Some(row.get("aer_rate")),
                gross_rate: row.get("gross_rate"),
                term_months: row.get("term_months"),
                notice_period_days: row.get("notice_period_days"),
                min_deposit: row.get("min_deposit"),
                max_deposit: row.get("max_deposit"),
                fscs_protected: row.get::<i64, _>("fscs_protected") != 0,
                scrape_date: scrape_date.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
            };
            let frn_status = if frn.is_some() { FrnStatus::Matched } else { FrnStatus::NoMatch };
            products.push(EnrichedProduct {
                parsed: ParsedProduct {
                    raw,
                    account_type,
                    normalized_platform: platform,
                    platform_priority: row.get("platform_priority"),
                    source_reliability: row.get("source_reliability"),
                },
                normalized_bank_name: normalized.unwrap_or(bank_name),
                frn_confidence: confidence.unwrap_or(0.0),
                frn_status,
                frn_source: if frn.is_some() { FrnSource::Exact } else { FrnSource::None },
                frn,
                match_type: None,
            });
        }
        Ok(products)
    }

    /// Writes an FRN resolution back to its raw row.
    pub async fn write_back_frn(
        &self,
        conn: &mut SqliteConnection,
        raw_id: i64,
        normalized_bank_name: &str,
        frn: Option<&str>,
        confidence: f64,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE available_products_raw SET normalized_bank_name = ?, frn = ?, confidence_score = ? WHERE id = ?",
        )
        .bind(normalized_bank_name)
        .bind(frn)
        .bind(confidence)
        .bind(raw_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("writing FRN back to raw row: {}", e)))?;
        Ok(())
    }

    /// Persists a business key to every raw row matching the identifying
    /// tuple, so the quality analyzer can join raw rows to dedup groups.
    pub async fn write_back_business_key(
        &self,
        conn: &mut SqliteConnection,
        bank_name: &str,
        platform: &str,
        account_type: AccountType,
        aer_rate: f64,
        business_key: &str,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE available_products_raw SET business_key = ? \
             WHERE bank_name = ? AND platform = ? AND account_type = ? AND aer_rate = ?",
        )
        .bind(business_key)
        .bind(bank_name)
        .bind(platform)
        .bind(account_type.as_str())
        .bind(aer_rate)
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("writing business key back: {}", e)))?;
        Ok(())
    }

    /// Archives current canonical rows into `historical_products`.
    pub async fn archive_canonical(
        &self,
        conn: &mut SqliteConnection,
        reason: &str,
    ) -> Result<u64, PipelineError> {
        let result = sqlx::query(
            "INSERT INTO historical_products \
             (batch_id, platform, source, bank_name, frn, account_type, aer_rate, gross_rate, term_months, \
              notice_period_days, min_deposit, max_deposit, fscs_protected, business_key, quality_score, \
              selection_reason, platform_category, archive_reason) \
             SELECT batch_id, platform, source, bank_name, frn, account_type, aer_rate, gross_rate, term_months, \
              notice_period_days, min_deposit, max_deposit, fscs_protected, business_key, quality_score, \
              selection_reason, platform_category, ? \
             FROM available_products",
        )
        .bind(reason)
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("archiving canonical rows: {}", e)))?;
        Ok(result.rows_affected())
    }

    /// Replaces the canonical table with the new winner set. Inside one
    /// transaction this is atomic: observers see the old snapshot until
    /// commit, the new snapshot after.
    pub async fn replace_canonical(
        &self,
        conn: &mut SqliteConnection,
        batch_id: &str,
        winners: &[FinalProduct],
    ) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM available_products")
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("clearing canonical table: {}", e)))?;

        for winner in winners {
            let enriched = &winner.enriched;
            let raw = &enriched.parsed.raw;
            let competing = serde_json::to_string(&winner.competing_product_ids)?;
            sqlx::query(
                "INSERT INTO available_products \
                 (batch_id, platform, source, bank_name, normalized_bank_name, frn, frn_status, frn_source, \
                  frn_confidence, account_type, aer_rate, gross_rate, term_months, notice_period_days, \
                  min_deposit, max_deposit, fscs_protected, business_key, quality_score, duplicate_count, \
                  selection_reason, competing_product_ids, fscs_compliant, platform_category) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(batch_id)
            .bind(&enriched.parsed.normalized_platform)
            .bind(&raw.source)
            .bind(&raw.bank_name)
            .bind(&enriched.normalized_bank_name)
            .bind(enriched.frn.as_deref())
            .bind(enriched.frn_status.as_str())
            .bind(enriched.frn_source.as_str())
            .bind(enriched.frn_confidence)
            .bind(enriched.parsed.account_type.as_str())
            .bind(raw.aer_rate.unwrap_or(0.0))
            .bind(raw.gross_rate)
            .bind(raw.term_months)
            .bind(raw.notice_period_days)
            .bind(raw.min_deposit)
            .bind(raw.max_deposit)
            .bind(raw.fscs_protected)
            .bind(winner.business_key.as_str())
            .bind(winner.quality_score)
            .bind(winner.duplicate_count)
            .bind(winner.selection_reason.as_str())
            .bind(&competing)
            .bind(winner.fscs_compliant)
            .bind(winner.platform_category.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("inserting canonical product: {}", e)))?;
        }
        Ok(())
    }

    /// Marks raw rows as processed by the reprocessing path.
    pub async fn mark_raw_processed(&self, conn: &mut SqliteConnection) -> Result<u64, PipelineError> {
        let result = sqlx::query("UPDATE available_products_raw SET processed_at = ? WHERE processed_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("marking raw rows processed: {}", e)))?;
        Ok(result.rows_affected())
    }

    /// Fallback copy-through: archive the canonical table, then copy
    /// unprocessed raw rows into it under `fallback_<rowid>` business keys
    /// with a metadata marker. Returns the number of rows copied.
    pub async fn fallback_copy_through(&self, conn: &mut SqliteConnection) -> Result<u64, PipelineError> {
        self.archive_canonical(conn, "fallback_processing").await?;

        sqlx::query("DELETE FROM available_products")
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::persistence_failed(format!("clearing canonical for fallback: {}", e)))?;

        let result = sqlx::query(
            "INSERT INTO available_products \
             (platform, source, bank_name, normalized_bank_name, frn, frn_status, frn_source, frn_confidence, \
              account_type, aer_rate, gross_rate, term_months, notice_period_days, min_deposit, max_deposit, \
              fscs_protected, business_key, quality_score, duplicate_count, selection_reason, fscs_compliant, \
              platform_category, metadata) \
             SELECT platform, source, bank_name, normalized_bank_name, frn, \
                    CASE WHEN frn IS NULL THEN 'NO_MATCH' ELSE 'MATCHED' END, 'NONE', \
                    COALESCE(confidence_score, 0.0), account_type, aer_rate, gross_rate, term_months, \
                    notice_period_days, min_deposit, max_deposit, fscs_protected, \
                    'fallback_' || id, 0.0, 0, 'fallback_copy_through', 1, \
                    CASE WHEN platform = 'direct' THEN 'direct' ELSE 'aggregator' END, \
                    '{\"fallback\":true}' \
             FROM available_products_raw WHERE processed_at IS NULL",
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| PipelineError::persistence_failed(format!("fallback copy-through: {}", e)))?;

        Ok(result.rows_affected())
    }

    /// Count of canonical rows, off the pool (used by summaries and the
    /// quality analyzer).
    pub async fn canonical_count(&self) -> Result<i64, PipelineError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM available_products")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::database_failed(format!("counting canonical rows: {}", e)))
    }

    /// Count of raw rows not yet seen by the reprocessing path.
    pub async fn unprocessed_raw_count(&self) -> Result<i64, PipelineError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM available_products_raw WHERE processed_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::database_failed(format!("counting unprocessed raw rows: {}", e)))
    }
}
