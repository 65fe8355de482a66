// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Reprocessing controller resilience: the circuit breaker lifecycle,
//! processing-lock exclusivity and stale reclamation, and fallback
//! copy-through.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common;
use savings_pipeline::application::reprocessing::{ReprocessExecutor, ReprocessingController};
use savings_pipeline::application::ControllerStats;
use savings_pipeline::infrastructure::repositories::StateRepository;
use savings_pipeline_bootstrap::CancellationToken;
use savings_pipeline_domain::{BatchStatus, PipelineError};

/// Fails the first `failures` invocations, then succeeds.
struct FlakyExecutor {
    remaining_failures: AtomicI64,
}

impl FlakyExecutor {
    fn new(failures: i64) -> Self {
        Self {
            remaining_failures: AtomicI64::new(failures),
        }
    }
}

#[async_trait]
impl ReprocessExecutor for FlakyExecutor {
    async fn execute(&self, _pool: &SqlitePool) -> Result<usize, PipelineError> {
        if self.remaining_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
            Err(PipelineError::stage_execution_failed("injected failure"))
        } else {
            Ok(0)
        }
    }
}

async fn wait_for(controller: &ReprocessingController, predicate: impl Fn(&ControllerStats) -> bool) {
    for _ in 0..200 {
        if predicate(&controller.stats()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached; stats: {:?}", controller.stats());
}

#[tokio::test]
async fn breaker_opens_after_consecutive_failures_then_recovers() {
    let (pool, _dir) = common::test_store().await;
    common::set_config(&pool, "reprocessing", "circuit_breaker_threshold", "3", "number").await;
    common::set_config(&pool, "reprocessing", "circuit_breaker_reset_ms", "200", "number").await;
    // Keep fallback out of this scenario.
    common::set_config(&pool, "reprocessing", "fallback_failure_threshold", "100", "number").await;

    let cancel = CancellationToken::new();
    let controller = ReprocessingController::start_with_executor(
        pool.clone(),
        cancel.clone(),
        Arc::new(FlakyExecutor::new(3)),
    )
    .await
    .unwrap();

    for _ in 0..3 {
        controller.trigger_manual_processing(Some("test".into())).await;
    }
    wait_for(&controller, |stats| stats.state == "open" && stats.total_errors >= 3).await;

    // Work is refused while the breaker is open.
    controller.trigger_manual_processing(Some("refused".into())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.stats().total_invocations, 3);

    // After the reset window the next trigger probes half-open; the
    // executor now succeeds and the breaker closes.
    tokio::time::sleep(Duration::from_millis(250)).await;
    controller.trigger_manual_processing(Some("probe".into())).await;
    wait_for(&controller, |stats| stats.state == "closed" && stats.consecutive_errors == 0).await;

    let stats = controller.stats();
    assert!(stats.total_errors >= 3);
    assert_eq!(stats.consecutive_errors, 0);

    controller.shutdown().await;
}

#[tokio::test]
async fn manual_reset_closes_an_open_breaker() {
    let (pool, _dir) = common::test_store().await;
    common::set_config(&pool, "reprocessing", "circuit_breaker_threshold", "1", "number").await;
    common::set_config(&pool, "reprocessing", "fallback_failure_threshold", "100", "number").await;

    let cancel = CancellationToken::new();
    let controller = ReprocessingController::start_with_executor(
        pool.clone(),
        cancel.clone(),
        Arc::new(FlakyExecutor::new(1)),
    )
    .await
    .unwrap();

    controller.trigger_manual_processing(None).await;
    wait_for(&controller, |stats| stats.state == "open").await;

    controller.reset_circuit_breaker();
    assert_eq!(controller.stats().state, "closed");

    controller.shutdown().await;
}

#[tokio::test]
async fn stale_locks_are_reclaimed_before_granting() {
    let (pool, _dir) = common::test_store().await;
    let state = StateRepository::new(pool.clone());

    // A running lock from a dead process, well past the staleness window.
    let stale_start = (chrono::Utc::now() - chrono::Duration::minutes(20)).to_rfc3339();
    sqlx::query("INSERT INTO processing_state (process_type, status, started_at) VALUES ('deduplication_reprocess', 'running', ?)")
        .bind(&stale_start)
        .execute(&pool)
        .await
        .unwrap();

    let lock_id = state.acquire_lock("deduplication_reprocess", None).await.unwrap();

    let reclaimed: String =
        sqlx::query_scalar("SELECT status FROM processing_state WHERE started_at = ?")
            .bind(&stale_start)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(reclaimed, "failed");

    state.release_lock(lock_id, BatchStatus::Completed, None).await.unwrap();
}

#[tokio::test]
async fn live_locks_exclude_second_acquisition() {
    let (pool, _dir) = common::test_store().await;
    let state = StateRepository::new(pool.clone());

    let lock_id = state.acquire_lock("deduplication_reprocess", None).await.unwrap();
    let second = state.acquire_lock("deduplication_reprocess", None).await;
    assert!(matches!(second, Err(PipelineError::LockUnavailable(_))));

    state.release_lock(lock_id, BatchStatus::Completed, None).await.unwrap();
    state.acquire_lock("deduplication_reprocess", None).await.unwrap();
}

#[tokio::test]
async fn repeated_failure_triggers_fallback_copy_through() {
    let (pool, _dir) = common::test_store().await;
    common::set_config(&pool, "reprocessing", "fallback_failure_threshold", "1", "number").await;
    common::set_config(&pool, "reprocessing", "circuit_breaker_threshold", "10", "number").await;

    // Unprocessed raw rows awaiting the canonical table.
    sqlx::query(
        "INSERT INTO available_products_raw (platform, source, method, bank_name, account_type, aer_rate) \
         VALUES ('raisin', 'moneyfacts', 'easy_access', 'Paragon Bank', 'easy_access', 4.4)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let cancel = CancellationToken::new();
    let controller = ReprocessingController::start_with_executor(
        pool.clone(),
        cancel.clone(),
        Arc::new(FlakyExecutor::new(i64::MAX)),
    )
    .await
    .unwrap();

    controller.trigger_manual_processing(None).await;
    wait_for(&controller, |stats| stats.fallback_runs >= 1).await;
    // The fallback transaction commits after the stats bump; wait for the
    // copied row to appear.
    for _ in 0..200 {
        if common::count(&pool, "SELECT COUNT(*) FROM available_products").await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let business_key: String = sqlx::query_scalar("SELECT business_key FROM available_products")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(business_key.starts_with("fallback_"), "key was {}", business_key);

    let unprocessed = common::count(
        &pool,
        "SELECT COUNT(*) FROM available_products_raw WHERE processed_at IS NULL",
    )
    .await;
    assert_eq!(unprocessed, 0, "raw rows are marked processed");

    controller.shutdown().await;
}
