// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Configuration Loader
//!
//! Fetches category-scoped parameters from the `unified_config` table and
//! materializes them into typed per-stage configuration structs. The
//! contract is strict: a stage config fails to load with
//! `CONFIG_LOAD_FAILED` naming the first absent key. There are no defaults
//! baked into code — the store is the single source of every threshold.
//!
//! Platform priorities/categories and scraper reliabilities come from their
//! own tables (`platforms`, `scraper_sources`); their load failures surface
//! as `PLATFORM_CONFIG_FAILED`.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use savings_pipeline_domain::{AccountType, ConfigValue, PipelineError};

/// Reads configuration categories from the store.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pool: SqlitePool,
}

impl ConfigLoader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Loads every active key of a category. The category existing but
    /// being empty is indistinguishable from it being absent; both fail at
    /// the first required key.
    pub async fn load_category(&self, category: &str) -> Result<CategoryConfig, PipelineError> {
        let rows = sqlx::query(
            "SELECT config_key, config_value, config_type FROM unified_config \
             WHERE category = ? AND is_active = 1",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("loading config category '{}': {}", category, e)))?;

        let mut values = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("config_key");
            let raw: String = row.get("config_value");
            let config_type: String = row.get("config_type");
            let value = ConfigValue::parse(&raw, &config_type).map_err(|e| {
                PipelineError::config_load_failed(format!("category '{}' key '{}': {}", category, key, e))
            })?;
            values.insert(key, value);
        }

        Ok(CategoryConfig {
            category: category.to_string(),
            values,
        })
    }

    /// Loads the platform directory (priority, category, reliability).
    pub async fn load_platforms(&self) -> Result<PlatformDirectory, PipelineError> {
        let rows = sqlx::query("SELECT platform_name, priority, category, reliability FROM platforms WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::PlatformConfigFailed(format!("loading platforms table: {}", e)))?;

        if rows.is_empty() {
            return Err(PipelineError::PlatformConfigFailed(
                "platforms table is empty".to_string(),
            ));
        }

        let mut directory = PlatformDirectory {
            priorities: HashMap::new(),
            categories: HashMap::new(),
            reliabilities: HashMap::new(),
        };
        for row in rows {
            let name: String = row.get("platform_name");
            let name = name.to_lowercase();
            directory.priorities.insert(name.clone(), row.get("priority"));
            directory.categories.insert(name.clone(), row.get("category"));
            if let Some(reliability) = row.get::<Option<f64>, _>("reliability") {
                directory.reliabilities.insert(name, reliability);
            }
        }
        Ok(directory)
    }

    /// Loads scraper source reliabilities.
    pub async fn load_sources(&self) -> Result<SourceDirectory, PipelineError> {
        let rows = sqlx::query("SELECT source, reliability FROM scraper_sources WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::PlatformConfigFailed(format!("loading scraper_sources table: {}", e)))?;

        let mut reliabilities = HashMap::with_capacity(rows.len());
        for row in rows {
            let source: String = row.get("source");
            reliabilities.insert(source.to_lowercase(), row.get("reliability"));
        }
        Ok(SourceDirectory { reliabilities })
    }
}

/// A loaded configuration category with strict typed access.
#[derive(Debug, Clone)]
pub struct CategoryConfig {
    category: String,
    values: HashMap<String, ConfigValue>,
}

impl CategoryConfig {
    fn get(&self, key: &str) -> Result<&ConfigValue, PipelineError> {
        self.values.get(key).ok_or_else(|| {
            PipelineError::config_load_failed(format!(
                "category '{}' is missing required key '{}'",
                self.category, key
            ))
        })
    }

    pub fn require_f64(&self, key: &str) -> Result<f64, PipelineError> {
        self.get(key)?.as_f64().map_err(|e| self.contextualize(key, e))
    }

    pub fn require_i64(&self, key: &str) -> Result<i64, PipelineError> {
        self.get(key)?.as_i64().map_err(|e| self.contextualize(key, e))
    }

    pub fn require_bool(&self, key: &str) -> Result<bool, PipelineError> {
        self.get(key)?.as_bool().map_err(|e| self.contextualize(key, e))
    }

    pub fn require_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, PipelineError> {
        self.get(key)?.as_typed_json().map_err(|e| self.contextualize(key, e))
    }

    fn contextualize(&self, key: &str, err: PipelineError) -> PipelineError {
        PipelineError::config_load_failed(format!("category '{}' key '{}': {}", self.category, key, err))
    }
}

/// Platform priorities, direct/aggregator categories, and reliabilities.
#[derive(Debug, Clone)]
pub struct PlatformDirectory {
    pub priorities: HashMap<String, i64>,
    pub categories: HashMap<String, String>,
    pub reliabilities: HashMap<String, f64>,
}

impl PlatformDirectory {
    pub fn priority(&self, platform: &str) -> i64 {
        self.priorities.get(&platform.to_lowercase()).copied().unwrap_or(0)
    }

    pub fn reliability(&self, platform: &str, default: f64) -> f64 {
        self.reliabilities
            .get(&platform.to_lowercase())
            .copied()
            .unwrap_or(default)
    }

    /// True when the platform row classifies the name as an aggregator.
    pub fn is_known_aggregator(&self, platform: &str) -> bool {
        self.categories
            .get(&platform.to_lowercase())
            .map(|c| c == "aggregator")
            .unwrap_or(false)
    }
}

/// Scraper source reliability scores.
#[derive(Debug, Clone)]
pub struct SourceDirectory {
    pub reliabilities: HashMap<String, f64>,
}

impl SourceDirectory {
    pub fn reliability(&self, source: &str, default: f64) -> f64 {
        self.reliabilities.get(&source.to_lowercase()).copied().unwrap_or(default)
    }
}

/// Ingestion stage thresholds (category `ingestion`).
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub rate_filtering_enabled: bool,
    pub min_rate_easy_access: f64,
    pub min_rate_notice: f64,
    pub min_rate_fixed_term: f64,
    pub aer_rate_min: f64,
    pub aer_rate_max: f64,
    pub term_months_min: i64,
    pub term_months_max: i64,
    pub notice_days_min: i64,
    pub notice_days_max: i64,
    pub corruption_threshold: f64,
}

impl IngestionConfig {
    pub async fn load(loader: &ConfigLoader) -> Result<Self, PipelineError> {
        let config = loader.load_category("ingestion").await?;
        Ok(Self {
            rate_filtering_enabled: config.require_bool("rate_filtering_enabled")?,
            min_rate_easy_access: config.require_f64("min_rate_easy_access")?,
            min_rate_notice: config.require_f64("min_rate_notice")?,
            min_rate_fixed_term: config.require_f64("min_rate_fixed_term")?,
            aer_rate_min: config.require_f64("aer_rate_min")?,
            aer_rate_max: config.require_f64("aer_rate_max")?,
            term_months_min: config.require_i64("term_months_min")?,
            term_months_max: config.require_i64("term_months_max")?,
            notice_days_min: config.require_i64("notice_days_min")?,
            notice_days_max: config.require_i64("notice_days_max")?,
            corruption_threshold: config.require_f64("corruption_threshold")?,
        })
    }

    /// The configured AER floor for an account type.
    pub fn min_rate_for(&self, account_type: AccountType) -> f64 {
        match account_type {
            AccountType::EasyAccess => self.min_rate_easy_access,
            AccountType::Notice => self.min_rate_notice,
            AccountType::FixedTerm => self.min_rate_fixed_term,
        }
    }
}

/// FRN matching thresholds and normalization word lists
/// (category `frn_matching`).
#[derive(Debug, Clone)]
pub struct FrnMatchingConfig {
    pub fuzzy_threshold: f64,
    pub max_edit_distance: i64,
    pub fuzzy_match_confidence: f64,
    pub confidence_threshold_high: f64,
    pub confidence_threshold_low: f64,
    pub research_queue_max_size: i64,
    pub generic_terms: Vec<String>,
    pub normalization_prefixes: Vec<String>,
    pub normalization_suffixes: Vec<String>,
    pub normalization_abbreviations: Vec<(String, String)>,
    pub stage_timeout_ms: i64,
}

impl FrnMatchingConfig {
    pub async fn load(loader: &ConfigLoader) -> Result<Self, PipelineError> {
        let config = loader.load_category("frn_matching").await?;
        let abbreviations: HashMap<String, String> = config.require_json("normalization_abbreviations")?;
        Ok(Self {
            fuzzy_threshold: config.require_f64("fuzzy_threshold")?,
            max_edit_distance: config.require_i64("max_edit_distance")?,
            fuzzy_match_confidence: config.require_f64("fuzzy_match_confidence")?,
            confidence_threshold_high: config.require_f64("confidence_threshold_high")?,
            confidence_threshold_low: config.require_f64("confidence_threshold_low")?,
            research_queue_max_size: config.require_i64("research_queue_max_size")?,
            generic_terms: config.require_json("generic_terms")?,
            normalization_prefixes: config.require_json("normalization_prefixes")?,
            normalization_suffixes: config.require_json("normalization_suffixes")?,
            normalization_abbreviations: abbreviations.into_iter().collect(),
            stage_timeout_ms: config.require_i64("stage_timeout_ms")?,
        })
    }
}

/// A preferred aggregator with its retention tolerance.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PreferredPlatform {
    pub platform: String,
    pub priority: i64,
    pub rate_tolerance: f64,
}

/// Deduplication thresholds and scoring weights (category `deduplication`).
#[derive(Debug, Clone)]
pub struct DeduplicationConfig {
    pub rate_tolerance_bp: i64,
    pub quality_score_max: f64,
    pub rate_score_weight: f64,
    pub platform_score_weight: f64,
    pub completeness_score_weight: f64,
    pub reliability_score_weight: f64,
    pub frn_quality_bonus: f64,
    pub max_rate_for_scoring: f64,
    pub default_platform_reliability: f64,
    pub completeness_fields: Vec<String>,
    pub corporate_suffixes: Vec<String>,
    pub preferred_platforms: Vec<PreferredPlatform>,
    pub direct_platforms: Vec<String>,
}

impl DeduplicationConfig {
    pub async fn load(loader: &ConfigLoader) -> Result<Self, PipelineError> {
        let config = loader.load_category("deduplication").await?;
        Ok(Self {
            rate_tolerance_bp: config.require_i64("rate_tolerance_bp")?,
            quality_score_max: config.require_f64("quality_score_max")?,
            rate_score_weight: config.require_f64("rate_score_weight")?,
            platform_score_weight: config.require_f64("platform_score_weight")?,
            completeness_score_weight: config.require_f64("completeness_score_weight")?,
            reliability_score_weight: config.require_f64("reliability_score_weight")?,
            frn_quality_bonus: config.require_f64("frn_quality_bonus")?,
            max_rate_for_scoring: config.require_f64("max_rate_for_scoring")?,
            default_platform_reliability: config.require_f64("default_platform_reliability")?,
            completeness_fields: config.require_json("completeness_fields")?,
            corporate_suffixes: config.require_json("corporate_suffixes")?,
            preferred_platforms: config.require_json("preferred_platforms")?,
            direct_platforms: config.require_json("direct_platforms")?,
        })
    }

    /// Basis points as a rate decimal (10 bp → 0.10 on a percentage AER).
    pub fn rate_tolerance(&self) -> f64 {
        self.rate_tolerance_bp as f64 / 100.0
    }

    pub fn preferred(&self, platform: &str) -> Option<&PreferredPlatform> {
        self.preferred_platforms
            .iter()
            .find(|p| p.platform.eq_ignore_ascii_case(platform))
    }
}

/// Data quality analyzer weights (category `data_quality`).
#[derive(Debug, Clone)]
pub struct DataQualityConfig {
    pub integrity_weights: HashMap<String, f64>,
    pub anomaly_frn_match_rate_min: f64,
}

impl DataQualityConfig {
    pub async fn load(loader: &ConfigLoader) -> Result<Self, PipelineError> {
        let config = loader.load_category("data_quality").await?;
        Ok(Self {
            integrity_weights: config.require_json("integrity_weights")?,
            anomaly_frn_match_rate_min: config.require_f64("anomaly_frn_match_rate_min")?,
        })
    }
}

/// Orchestration budgets (category `orchestration`).
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    pub stage_timeout_ms: i64,
}

impl OrchestrationConfig {
    pub async fn load(loader: &ConfigLoader) -> Result<Self, PipelineError> {
        let config = loader.load_category("orchestration").await?;
        Ok(Self {
            stage_timeout_ms: config.require_i64("stage_timeout_ms")?,
        })
    }
}

/// Reprocessing controller thresholds (category `reprocessing`).
#[derive(Debug, Clone)]
pub struct ReprocessingConfig {
    pub processing_timeout_ms: i64,
    pub circuit_breaker_threshold: i64,
    pub circuit_breaker_reset_ms: i64,
    pub fallback_failure_threshold: i64,
}

impl ReprocessingConfig {
    pub async fn load(loader: &ConfigLoader) -> Result<Self, PipelineError> {
        let config = loader.load_category("reprocessing").await?;
        Ok(Self {
            processing_timeout_ms: config.require_i64("processing_timeout_ms")?,
            circuit_breaker_threshold: config.require_i64("circuit_breaker_threshold")?,
            circuit_breaker_reset_ms: config.require_i64("circuit_breaker_reset_ms")?,
            fallback_failure_threshold: config.require_i64("fallback_failure_threshold")?,
        })
    }
}
