// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end pipeline runs over a real store: the happy path, the FSCS
//! split, rate filtering, the corruption fuse, audit completeness, the
//! concurrency guard, and idempotent re-runs.

use crate::common;
use savings_pipeline::application::{PipelineOptions, PipelineOrchestrator};
use savings_pipeline_bootstrap::cli::StopAfterStage;

#[tokio::test]
async fn single_product_resolves_frn_and_lands_as_direct() {
    let (pool, dir) = common::test_store().await;
    common::seed_institution(&pool, "114216", "HSBC UK Bank plc").await;

    let feed = common::write_feed(
        &dir,
        "moneyfacts",
        "1752300000",
        "moneyfacts",
        "easy_access",
        serde_json::json!([{
            "bankName": "HSBC UK",
            "platform": "moneyfacts",
            "accountType": "easy_access",
            "aerRate": 4.10,
            "fscsProtected": true
        }]),
    );

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
    assert_eq!(result.canonical_count, 1);

    let (platform, frn, business_key, reason): (String, Option<String>, String, String) = sqlx::query_as(
        "SELECT platform, frn, business_key, selection_reason FROM available_products",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(platform, "direct");
    assert_eq!(frn.as_deref(), Some("114216"));
    assert!(business_key.starts_with("HSBC|easy_access"), "key was {}", business_key);
    assert_eq!(reason, "single_product");
}

#[tokio::test]
async fn shared_brand_group_splits_per_bank() {
    let (pool, dir) = common::test_store().await;
    common::seed_institution(&pool, "124659", "Goldman Sachs International Bank").await;
    common::seed_shared_brand(&pool, "124659", "Marcus").await;

    let feed = common::write_feed(
        &dir,
        "moneyfacts",
        "1752300001",
        "moneyfacts",
        "easy_access",
        serde_json::json!([
            {
                "bankName": "Marcus",
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": 4.50,
                "fscsProtected": true
            },
            {
                "bankName": "Goldman Sachs International Bank",
                "platform": "flagstone",
                "accountType": "easy_access",
                "aerRate": 4.50,
                "fscsProtected": true
            }
        ]),
    );

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
    assert_eq!(result.canonical_count, 2, "different banks must never collapse");

    let group_reasons: Vec<(String, String)> = sqlx::query_as(
        "SELECT normalized_bank_name, selection_reason FROM deduplication_groups ORDER BY normalized_bank_name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(group_reasons.len(), 2, "one group row per bank");
    for (_, reason) in &group_reasons {
        assert_eq!(reason, "fscs_bank_separation");
    }

    let violations = common::count(&pool, "SELECT COALESCE(SUM(fscs_violations), 0) FROM deduplication_audit").await;
    assert!(violations >= 1);
}

#[tokio::test]
async fn below_floor_products_are_rate_filtered_not_corrupt() {
    let (pool, dir) = common::test_store().await;

    let feed = common::write_feed(
        &dir,
        "moneyfacts",
        "1752300002",
        "moneyfacts",
        "easy_access",
        serde_json::json!([{
            "bankName": "Sleepy Bank",
            "platform": "raisin",
            "accountType": "easy_access",
            "aerRate": 1.20,
            "fscsProtected": true
        }]),
    );

    let orchestrator = PipelineOrchestrator::new(pool.clone(), common::engine_settings());
    orchestrator.initialize().await.unwrap();
    let result = orchestrator
        .run(&PipelineOptions {
            files: vec![feed],
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(result.success, "rate filtering is not a failure");
    assert_eq!(result.canonical_count, 0);

    let status: String = sqlx::query_scalar("SELECT status FROM json_ingestion_audit")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "rate_filtered");

    let corruption_rows = common::count(&pool, "SELECT COUNT(*) FROM json_ingestion_corruption_audit").await;
    assert_eq!(corruption_rows, 0, "rate-filtered products never feed the fuse");
}

#[tokio::test]
async fn systematic_validation_failure_aborts_with_corruption() {
    let (pool, dir) = common::test_store().await;

    // 600 products with a null AER, then 400 valid: the fuse trips at the
    // first interval check, long before the valid tail.
    let mut products = Vec::new();
    for i in 0..1000 {
        if i < 600 {
            products.push(serde_json::json!({
                "bankName": format!("Broken Bank {}", i),
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": null,
                "fscsProtected": true
            }));
        } else {
            products.push(serde_json::json!({
                "bankName": format!("Fine Bank {}", i),
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": 4.0,
                "fscsProtected": true
            }));
        }
    }
    let feed = common::write_feed(
        &dir,
        "moneyfacts",
        "1752300003",
        "moneyfacts",
        "easy_access",
        serde_json::Value::Array(products),
    );

    let orchestrator = PipelineOrchestrator::new(pool.clone(), common::engine_settings());
    orchestrator.initialize().await.unwrap();
    let error = orchestrator
        .run(&PipelineOptions {
            files: vec![feed],
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert_eq!(error.error_code(), "DATA_CORRUPTION");

    // Canonical and raw tables are untouched (atomic rollback), but the
    // corruption evidence survives.
    assert_eq!(common::count(&pool, "SELECT COUNT(*) FROM available_products").await, 0);
    assert_eq!(common::count(&pool, "SELECT COUNT(*) FROM available_products_raw").await, 0);
    assert_eq!(
        common::count(&pool, "SELECT COUNT(*) FROM json_ingestion_corruption_audit").await,
        1
    );
    let batch_status: String = sqlx::query_scalar("SELECT status FROM pipeline_batch")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(batch_status, "failed");
}

#[tokio::test]
async fn audit_rows_cover_every_product_and_stage() {
    let (pool, dir) = common::test_store().await;
    common::seed_institution(&pool, "204574", "Shawbrook Bank Limited").await;

    let feed = common::write_feed(
        &dir,
        "flagstone",
        "1752300004",
        "flagstone",
        "easy_access",
        serde_json::json!([
            {
                "bankName": "Shawbrook Bank",
                "platform": "flagstone",
                "accountType": "easy_access",
                "aerRate": 4.40,
                "fscsProtected": true
            },
            {
                "bankName": "Shawbrook Bank",
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": 4.42,
                "fscsProtected": true
            },
            {
                "bankName": "",
                "platform": "raisin",
                "accountType": "easy_access",
                "aerRate": 4.0,
                "fscsProtected": true
            }
        ]),
    );

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

    let batch_id: String = sqlx::query_scalar("SELECT batch_id FROM pipeline_batch ORDER BY started_at DESC LIMIT 1")
        .fetch_one(&pool)
        .await
        .unwrap();

    // One ingestion row per product that reached the stage.
    let ingestion_rows = common::count(&pool, "SELECT COUNT(*) FROM json_ingestion_audit").await;
    assert_eq!(ingestion_rows, 3);

    // One FRN row per enriched (passed) product.
    let frn_rows = common::count(&pool, "SELECT COUNT(*) FROM frn_matching_audit").await;
    assert_eq!(frn_rows, 2);

    // One group row per dedup group plus one summary row.
    let group_rows = common::count(&pool, "SELECT COUNT(*) FROM deduplication_groups").await;
    let summary_rows = common::count(&pool, "SELECT COUNT(*) FROM deduplication_audit").await;
    assert_eq!(group_rows, 1);
    assert_eq!(summary_rows, 1);

    // Every audit row carries the same batch id, and the stage rows were
    // pre-initialized in order.
    for table in [
        "json_ingestion_audit",
        "frn_matching_audit",
        "deduplication_groups",
        "deduplication_audit",
    ] {
        let distinct: i64 = sqlx::query_scalar(&format!("SELECT COUNT(DISTINCT batch_id) FROM {}", table))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(distinct, 1, "{} batch ids", table);
        let matches: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE batch_id = ?", table))
                .bind(&batch_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(matches > 0, "{} rows belong to the run batch", table);
    }
    let stage_rows = common::count(&pool, "SELECT COUNT(*) FROM pipeline_audit").await;
    assert_eq!(stage_rows, 4, "one pre-initialized row per stage");
}

#[tokio::test]
async fn second_run_is_refused_while_first_holds_the_status_row() {
    let (pool, dir) = common::test_store().await;

    sqlx::query(
        "UPDATE orchestrator_pipeline_status SET is_running = 1, current_stage = 'deduplication', \
         batch_id = 'other', started_at = ? WHERE id = 1",
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&pool)
    .await
    .unwrap();

    let feed = common::write_feed(
        &dir,
        "moneyfacts",
        "1752300005",
        "moneyfacts",
        "easy_access",
        serde_json::json!([]),
    );

    let orchestrator = PipelineOrchestrator::new(pool.clone(), common::engine_settings());
    orchestrator.initialize().await.unwrap();
    let error = orchestrator
        .run(&PipelineOptions {
            files: vec![feed],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(error.error_code(), "CONCURRENT_EXECUTION");
}

#[tokio::test]
async fn rerunning_identical_input_is_idempotent() {
    let (pool, dir) = common::test_store().await;
    common::seed_institution(&pool, "204574", "Shawbrook Bank Limited").await;

    let products = serde_json::json!([
        {
            "bankName": "Shawbrook Bank",
            "platform": "flagstone",
            "accountType": "easy_access",
            "aerRate": 4.40,
            "fscsProtected": true
        },
        {
            "bankName": "Shawbrook Bank",
            "platform": "raisin",
            "accountType": "easy_access",
            "aerRate": 4.42,
            "fscsProtected": true
        }
    ]);

    let orchestrator = PipelineOrchestrator::new(pool.clone(), common::engine_settings());
    orchestrator.initialize().await.unwrap();

    let feed = common::write_feed(&dir, "moneyfacts", "1752300006", "moneyfacts", "easy_access", products.clone());
    orchestrator
        .run(&PipelineOptions {
            files: vec![feed],
            ..Default::default()
        })
        .await
        .unwrap();
    let first: Vec<(String, f64)> =
        sqlx::query_as("SELECT business_key, quality_score FROM available_products ORDER BY business_key")
            .fetch_all(&pool)
            .await
            .unwrap();

    // Cleanup removed the first feed file; write the identical feed again.
    let feed = common::write_feed(&dir, "moneyfacts", "1752300007", "moneyfacts", "easy_access", products);
    orchestrator
        .run(&PipelineOptions {
            files: vec![feed],
            ..Default::default()
        })
        .await
        .unwrap();
    let second: Vec<(String, f64)> =
        sqlx::query_as("SELECT business_key, quality_score FROM available_products ORDER BY business_key")
            .fetch_all(&pool)
            .await
            .unwrap();

    assert_eq!(first, second, "same input and config must produce the same canonical set");
}

#[tokio::test]
async fn stop_after_ingestion_leaves_canonical_untouched() {
    let (pool, dir) = common::test_store().await;

    let feed = common::write_feed(
        &dir,
        "moneyfacts",
        "1752300008",
        "moneyfacts",
        "easy_access",
        serde_json::json!([{
            "bankName": "Paragon Bank",
            "platform": "raisin",
            "accountType": "easy_access",
            "aerRate": 4.25,
            "fscsProtected": true
        }]),
    );

    let orchestrator = PipelineOrchestrator::new(pool.clone(), common::engine_settings());
    orchestrator.initialize().await.unwrap();
    let result = orchestrator
        .run(&PipelineOptions {
            files: vec![feed],
            stop_after: Some(StopAfterStage::JsonIngestion),
            rebuild_only: false,
        })
        .await
        .unwrap();

    assert!(result.success);
    // Early exit downgraded the run to incremental, so the raw rows are
    // visible while the canonical table stayed empty.
    assert_eq!(common::count(&pool, "SELECT COUNT(*) FROM available_products_raw").await, 1);
    assert_eq!(common::count(&pool, "SELECT COUNT(*) FROM available_products").await, 0);
}
