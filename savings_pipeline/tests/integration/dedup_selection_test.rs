// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Deduplication selection rules: preferred-platform retention and its
//! tolerance boundary, direct/aggregator separation, and rate-tolerance
//! bucketing.

use crate::common;
use savings_pipeline::application::{PipelineOptions, PipelineOrchestrator};

async fn run_feed(pool: &sqlx::SqlitePool, dir: &tempfile::TempDir, timestamp: &str, products: serde_json::Value) {
    let feed = common::write_feed(dir, "moneyfacts", timestamp, "moneyfacts", "easy_access", products);
    let orchestrator = PipelineOrchestrator::new(pool.clone(), common::engine_settings());
    orchestrator.initialize().await.unwrap();
    let result = orchestrator
        .run(&PipelineOptions {
            files: vec![feed],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn preferred_platform_is_retained_within_tolerance() {
    let (pool, dir) = common::test_store().await;

    run_feed(
        &pool,
        &dir,
        "1752310000",
        serde_json::json!([
            {
                "bankName": "Paragon Bank",
                "platform": "hargreaves lansdown",
                "accountType": "easy_access",
                "aerRate": 4.30,
                "fscsProtected": true
            },
            {
                "bankName": "Paragon Bank",
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": 4.35,
                "fscsProtected": true
            }
        ]),
    )
    .await;

    let rows = common::canonical_rows(&pool).await;
    assert_eq!(rows.len(), 1);
    let (_, platform, reason, aer) = &rows[0];
    assert_eq!(platform, "hargreaves lansdown");
    assert_eq!(reason, "preferred_platform_retained");
    assert!((aer - 4.30).abs() < 1e-9);
}

#[tokio::test]
async fn competitor_beyond_tolerance_displaces_preferred() {
    let (pool, dir) = common::test_store().await;

    run_feed(
        &pool,
        &dir,
        "1752310001",
        serde_json::json!([
            {
                "bankName": "Paragon Bank",
                "platform": "hargreaves lansdown",
                "accountType": "easy_access",
                "aerRate": 4.30,
                "fscsProtected": true
            },
            {
                "bankName": "Paragon Bank",
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": 4.45,
                "fscsProtected": true
            }
        ]),
    )
    .await;

    let rows = common::canonical_rows(&pool).await;
    assert_eq!(rows.len(), 1);
    let (_, platform, reason, aer) = &rows[0];
    assert_eq!(platform, "raisin");
    assert!(
        reason == "quality_score_selection" || reason == "rate_tolerance_deduplication",
        "unexpected reason {}",
        reason
    );
    assert!((aer - 4.45).abs() < 1e-9);
}

#[tokio::test]
async fn direct_and_aggregator_listings_never_compete() {
    let (pool, dir) = common::test_store().await;

    run_feed(
        &pool,
        &dir,
        "1752310002",
        serde_json::json!([
            {
                "bankName": "Paragon Bank",
                "platform": "direct",
                "accountType": "easy_access",
                "aerRate": 4.20,
                "fscsProtected": true
            },
            {
                "bankName": "Paragon Bank",
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": 4.50,
                "fscsProtected": true
            }
        ]),
    )
    .await;

    // The higher aggregator rate must not displace the direct listing.
    let rows = common::canonical_rows(&pool).await;
    assert_eq!(rows.len(), 2, "one row per platform category");
    for (_, _, reason, _) in &rows {
        assert_eq!(reason, "cross_platform_selection");
    }

    // No dedup group mixes the two categories.
    let categories: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT platform_category FROM deduplication_groups ORDER BY platform_category")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(categories.len(), 2);
}

#[tokio::test]
async fn products_within_tolerance_collapse_to_one() {
    let (pool, dir) = common::test_store().await;

    run_feed(
        &pool,
        &dir,
        "1752310003",
        serde_json::json!([
            {
                "bankName": "Paragon Bank",
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": 4.50,
                "fscsProtected": true
            },
            {
                "bankName": "Paragon Bank",
                "platform": "flagstone",
                "accountType": "easy_access",
                "aerRate": 4.45,
                "fscsProtected": true
            }
        ]),
    )
    .await;

    let rows = common::canonical_rows(&pool).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].2, "rate_tolerance_deduplication");

    let duplicate_count: i64 = sqlx::query_scalar("SELECT duplicate_count FROM available_products")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(duplicate_count, 2);
}

#[tokio::test]
async fn fixed_term_products_key_on_their_term() {
    let (pool, dir) = common::test_store().await;

    run_feed(
        &pool,
        &dir,
        "1752310004",
        serde_json::json!([
            {
                "bankName": "Paragon Bank",
                "platform": "raisin",
                "accountType": "fixed_term",
                "aerRate": 4.60,
                "termMonths": 12,
                "fscsProtected": true
            },
            {
                "bankName": "Paragon Bank",
                "platform": "flagstone",
                "accountType": "fixed_term",
                "aerRate": 4.60,
                "termMonths": 24,
                "fscsProtected": true
            }
        ]),
    )
    .await;

    // Different terms are different products: both survive.
    let keys: Vec<(String,)> = sqlx::query_as("SELECT business_key FROM available_products ORDER BY business_key")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys[0].0.ends_with("|term_12"));
    assert!(keys[1].0.ends_with("|term_24"));
}
