// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Common Test Helpers
//!
//! Shared utilities for integration tests: a temp-dir store with migrations
//! (including the seeded configuration) applied, seeding helpers for FRN
//! source tables, config overrides, and feed-file writers.

use sqlx::SqlitePool;
use std::path::PathBuf;
use tempfile::TempDir;

use savings_pipeline::infrastructure::repositories::schema;
use savings_pipeline_bootstrap::EngineSettings;

/// Creates a fresh store in its own temp directory. Keep the `TempDir`
/// alive for the duration of the test.
pub async fn test_store() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("pipeline_test.db");
    let url = format!("sqlite://{}", db_path.display());
    let pool = schema::initialize_database(&url).await.unwrap();
    (pool, dir)
}

/// Engine settings for tests: atomic, audit on at standard level, data
/// quality off unless a test opts in.
pub fn engine_settings() -> EngineSettings {
    EngineSettings::default()
}

pub async fn seed_institution(pool: &SqlitePool, frn: &str, firm_name: &str) {
    sqlx::query("INSERT OR REPLACE INTO boe_institutions (frn, firm_name) VALUES (?, ?)")
        .bind(frn)
        .bind(firm_name)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_shared_brand(pool: &SqlitePool, frn: &str, brand_name: &str) {
    sqlx::query("INSERT OR IGNORE INTO boe_shared_brands (frn, brand_name) VALUES (?, ?)")
        .bind(frn)
        .bind(brand_name)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_manual_override(pool: &SqlitePool, bank_name: &str, frn: &str) {
    sqlx::query("INSERT OR REPLACE INTO frn_manual_overrides (bank_name, frn) VALUES (?, ?)")
        .bind(bank_name)
        .bind(frn)
        .execute(pool)
        .await
        .unwrap();
}

/// Overrides a config value; the row must use the right declared type.
pub async fn set_config(pool: &SqlitePool, category: &str, key: &str, value: &str, config_type: &str) {
    sqlx::query(
        "INSERT INTO unified_config (category, config_key, config_value, config_type) VALUES (?, ?, ?, ?) \
         ON CONFLICT(category, config_key) DO UPDATE SET config_value = excluded.config_value, \
         config_type = excluded.config_type",
    )
    .bind(category)
    .bind(key)
    .bind(value)
    .bind(config_type)
    .execute(pool)
    .await
    .unwrap();
}

/// Writes a feed file named `<prefix>-normalized-<timestamp>.json`.
pub fn write_feed(
    dir: &TempDir,
    prefix: &str,
    timestamp: &str,
    source: &str,
    method: &str,
    products: serde_json::Value,
) -> PathBuf {
    let path = dir.path().join(format!("{}-normalized-{}.json", prefix, timestamp));
    let feed = serde_json::json!({
        "metadata": { "source": source, "method": method },
        "products": products,
    });
    std::fs::write(&path, serde_json::to_string_pretty(&feed).unwrap()).unwrap();
    path
}

pub async fn canonical_rows(pool: &SqlitePool) -> Vec<(String, String, String, f64)> {
    sqlx::query_as::<_, (String, String, String, f64)>(
        "SELECT bank_name, platform, selection_reason, aer_rate FROM available_products ORDER BY bank_name, platform",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}
