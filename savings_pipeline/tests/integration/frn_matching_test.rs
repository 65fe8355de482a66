// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! FRN matching against a real lookup cache: rank priorities, the three
//! resolution paths, research-queue gating, and manual-override
//! immediacy.

use sqlx::SqlitePool;

use crate::common;
use savings_pipeline::application::audit::AuditRecorder;
use savings_pipeline::application::stages::FrnMatchingStage;
use savings_pipeline::infrastructure::config::{ConfigLoader, FrnMatchingConfig};
use savings_pipeline::infrastructure::repositories::{AuditRepository, FrnRepository, ProductRepository};
use savings_pipeline_domain::services::bank_normalizer::FrnNameNormalizer;
use savings_pipeline_domain::{AccountType, FrnSource, FrnStatus, ParsedProduct, RawProduct};

fn parsed(bank: &str) -> ParsedProduct {
    ParsedProduct {
        raw: RawProduct {
            id: None,
            platform: Some("raisin".into()),
            source: "moneyfacts".into(),
            method: "easy_access".into(),
            bank_name: bank.into(),
            account_type: "easy_access".into(),
            aer_rate: Some(4.0),
            gross_rate: None,
            term_months: None,
            notice_period_days: None,
            min_deposit: None,
            max_deposit: None,
            fscs_protected: true,
            scrape_date: None,
        },
        account_type: AccountType::EasyAccess,
        normalized_platform: "raisin".into(),
        platform_priority: 70,
        source_reliability: 0.9,
    }
}

async fn rebuild_cache(pool: &SqlitePool) -> FrnRepository {
    let loader = ConfigLoader::new(pool.clone());
    let config = FrnMatchingConfig::load(&loader).await.unwrap();
    let normalizer = FrnNameNormalizer::new(
        config.normalization_prefixes,
        config.normalization_suffixes,
        config.normalization_abbreviations,
    );
    let repo = FrnRepository::new(pool.clone());
    repo.rebuild_lookup_cache(&normalizer).await.unwrap();
    repo
}

async fn build_stage(pool: &SqlitePool) -> (FrnMatchingStage, FrnRepository) {
    let repo = rebuild_cache(pool).await;
    let loader = ConfigLoader::new(pool.clone());
    let config = FrnMatchingConfig::load(&loader).await.unwrap();
    let stage = FrnMatchingStage::build(config, &repo).await.unwrap();
    (stage, repo)
}

async fn enrich_one(pool: &SqlitePool, stage: &FrnMatchingStage, repo: &FrnRepository, bank: &str) -> savings_pipeline_domain::EnrichedProduct {
    let products_repo = ProductRepository::new(pool.clone());
    let mut recorder = AuditRecorder::disabled(AuditRepository::new(pool.clone()));
    let mut conn = pool.acquire().await.unwrap();
    let mut enriched = stage
        .enrich_all(&mut conn, &products_repo, repo, &mut recorder, vec![parsed(bank)])
        .await
        .unwrap();
    enriched.remove(0)
}

#[tokio::test]
async fn manual_overrides_outrank_shared_brands() {
    let (pool, _dir) = common::test_store().await;
    common::seed_shared_brand(&pool, "124659", "Marcus").await;
    common::seed_manual_override(&pool, "Marcus", "999999").await;
    rebuild_cache(&pool).await;

    let (frn, match_type): (String, String) = sqlx::query_as(
        "SELECT frn, match_type FROM frn_lookup_helper_cache WHERE search_name = 'MARCUS' AND match_rank = 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(frn, "999999");
    assert_eq!(match_type, "manual_override");
}

#[tokio::test]
async fn exact_match_resolves_normalized_institution_names() {
    let (pool, _dir) = common::test_store().await;
    common::seed_institution(&pool, "204574", "Shawbrook Bank Limited").await;

    let (stage, repo) = build_stage(&pool).await;
    let enriched = enrich_one(&pool, &stage, &repo, "Shawbrook Bank").await;

    assert_eq!(enriched.frn.as_deref(), Some("204574"));
    assert_eq!(enriched.frn_status, FrnStatus::Matched);
    assert_eq!(enriched.frn_source, FrnSource::Exact);
    assert_eq!(enriched.normalized_bank_name, "SHAWBROOK");
}

#[tokio::test]
async fn typo_resolves_through_the_fuzzy_path() {
    let (pool, _dir) = common::test_store().await;
    common::seed_institution(&pool, "204574", "Shawbrook Bank Limited").await;
    // The fuzzy confidence for a one-edit name lands just under the default
    // high threshold; this deployment accepts it as a match.
    common::set_config(&pool, "frn_matching", "confidence_threshold_high", "0.75", "number").await;

    let (stage, repo) = build_stage(&pool).await;
    let enriched = enrich_one(&pool, &stage, &repo, "Sawbrook Bank").await;

    assert_eq!(enriched.frn.as_deref(), Some("204574"));
    assert_eq!(enriched.frn_status, FrnStatus::Matched);
    assert_eq!(enriched.frn_source, FrnSource::Fuzzy);
    assert!(enriched.frn_confidence > 0.75 && enriched.frn_confidence < 0.85);
}

#[tokio::test]
async fn brand_substring_resolves_through_the_alias_path() {
    let (pool, _dir) = common::test_store().await;
    common::seed_institution(&pool, "121873", "Clydesdale Bank plc").await;
    common::seed_shared_brand(&pool, "121873", "Virgin Money").await;

    let (stage, repo) = build_stage(&pool).await;
    let enriched = enrich_one(&pool, &stage, &repo, "Virgin Money Cash Isa").await;

    assert_eq!(enriched.frn.as_deref(), Some("121873"));
    assert_eq!(enriched.frn_source, FrnSource::Alias);
}

#[tokio::test]
async fn research_queue_respects_its_capacity() {
    let (pool, _dir) = common::test_store().await;
    common::set_config(&pool, "frn_matching", "research_queue_max_size", "1", "number").await;

    let (stage, repo) = build_stage(&pool).await;
    let first = enrich_one(&pool, &stage, &repo, "Completely Unknown Savings Co").await;
    let second = enrich_one(&pool, &stage, &repo, "Another Mystery Deposits House").await;

    assert_eq!(first.frn_status, FrnStatus::NoMatch);
    assert_eq!(second.frn_status, FrnStatus::NoMatch);

    let queued = common::count(&pool, "SELECT COUNT(*) FROM frn_research_queue").await;
    assert_eq!(queued, 1, "the capped queue takes the first unknown only");
}

#[tokio::test]
async fn generic_terms_are_never_queued() {
    let (pool, _dir) = common::test_store().await;

    let (stage, repo) = build_stage(&pool).await;
    let enriched = enrich_one(&pool, &stage, &repo, "Bank").await;

    assert_eq!(enriched.frn_status, FrnStatus::NoMatch);
    let queued = common::count(&pool, "SELECT COUNT(*) FROM frn_research_queue").await;
    assert_eq!(queued, 0);
}

#[tokio::test]
async fn manual_override_takes_effect_after_cache_rebuild() {
    let (pool, _dir) = common::test_store().await;

    let (stage, repo) = build_stage(&pool).await;
    let before = enrich_one(&pool, &stage, &repo, "Sidecar Savings").await;
    assert_eq!(before.frn_status, FrnStatus::NoMatch);

    repo.add_manual_override("Sidecar Savings", "999001", None).await.unwrap();
    let (stage, repo) = build_stage(&pool).await;
    let after = enrich_one(&pool, &stage, &repo, "Sidecar Savings").await;

    assert_eq!(after.frn.as_deref(), Some("999001"));
    assert_eq!(after.frn_status, FrnStatus::Matched);
}
