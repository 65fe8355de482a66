// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Product Record Chain
//!
//! Products flow through the pipeline as a chain of progressively richer
//! records, each stage owning exactly one transition:
//!
//! ```text
//! RawProduct ──ingestion──▶ ParsedProduct ──frn matching──▶ EnrichedProduct
//!                                                                 │
//!                            FinalProduct ◀──deduplication────────┘
//! ```
//!
//! `RawProduct` is the wire shape (camelCase JSON from the scrapers) plus
//! the `(source, method)` origin from the feed envelope. Later records wrap
//! their predecessor rather than copying fields, so provenance survives to
//! the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::account_type::AccountType;
use crate::value_objects::business_key::BusinessKey;
use crate::value_objects::frn_match::{FrnSource, FrnStatus};
use crate::value_objects::platform::PlatformCategory;
use crate::value_objects::selection_reason::SelectionReason;

/// A product as landed from a scraper feed.
///
/// `source` and `method` come from the feed envelope, not the product
/// object; ingestion stamps them before validation so every later record
/// and audit row can name its origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProduct {
    /// Raw-table rowid once persisted; absent for in-memory batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub method: String,
    pub bank_name: String,
    pub account_type: String,
    #[serde(default)]
    pub aer_rate: Option<f64>,
    #[serde(default)]
    pub gross_rate: Option<f64>,
    #[serde(default)]
    pub term_months: Option<i64>,
    #[serde(default)]
    pub notice_period_days: Option<i64>,
    #[serde(default)]
    pub min_deposit: Option<f64>,
    #[serde(default)]
    pub max_deposit: Option<f64>,
    #[serde(default)]
    pub fscs_protected: bool,
    #[serde(default, alias = "scrapedAt")]
    pub scrape_date: Option<DateTime<Utc>>,
}

impl RawProduct {
    /// Parses the account type, failing with a validation error for
    /// unclassifiable products.
    pub fn parsed_account_type(&self) -> Result<AccountType, crate::PipelineError> {
        AccountType::parse(&self.account_type)
    }
}

/// A validated product with its platform normalized and origin scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedProduct {
    pub raw: RawProduct,
    pub account_type: AccountType,
    /// Platform after source-specific normalization (e.g. a moneyfacts
    /// listing whose platform string is also `moneyfacts` maps to `direct`).
    pub normalized_platform: String,
    pub platform_priority: i64,
    pub source_reliability: f64,
}

impl ParsedProduct {
    pub fn aer_rate(&self) -> f64 {
        self.raw.aer_rate.unwrap_or(0.0)
    }
}

/// Why ingestion refused a product. Rate-filtered products are tracked
/// separately because they never count toward the corruption fuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Validation,
    RateFiltered,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::Validation => "rejected",
            RejectionKind::RateFiltered => "rate_filtered",
        }
    }
}

/// A product ingestion refused, with every reason that applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedProduct {
    pub bank_name: String,
    pub platform: Option<String>,
    pub source: String,
    pub method: String,
    pub kind: RejectionKind,
    pub reasons: Vec<String>,
}

/// A parsed product with its FRN resolution attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedProduct {
    pub parsed: ParsedProduct,
    pub normalized_bank_name: String,
    pub frn: Option<String>,
    pub frn_confidence: f64,
    pub frn_status: FrnStatus,
    pub frn_source: FrnSource,
    /// Cache-entry provenance of the winning candidate, when one exists.
    pub match_type: Option<String>,
}

impl EnrichedProduct {
    pub fn aer_rate(&self) -> f64 {
        self.parsed.aer_rate()
    }

    pub fn bank_name(&self) -> &str {
        &self.parsed.raw.bank_name
    }

    pub fn platform(&self) -> &str {
        &self.parsed.normalized_platform
    }
}

/// A canonical product as published to the clean table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalProduct {
    pub enriched: EnrichedProduct,
    pub business_key: BusinessKey,
    pub quality_score: f64,
    pub duplicate_count: i64,
    pub selection_reason: SelectionReason,
    pub competing_product_ids: Vec<String>,
    pub fscs_compliant: bool,
    pub platform_category: PlatformCategory,
}

impl FinalProduct {
    pub fn aer_rate(&self) -> f64 {
        self.enriched.aer_rate()
    }

    pub fn bank_name(&self) -> &str {
        self.enriched.bank_name()
    }

    pub fn platform(&self) -> &str {
        self.enriched.platform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_product_deserializes_camel_case_feed_json() {
        let json = r#"{
            "bankName": "HSBC UK",
            "platform": "moneyfacts",
            "accountType": "easy_access",
            "aerRate": 4.10,
            "grossRate": 4.02,
            "fscsProtected": true,
            "scrapedAt": "2025-07-01T06:00:00Z"
        }"#;
        let product: RawProduct = serde_json::from_str(json).unwrap();
        assert_eq!(product.bank_name, "HSBC UK");
        assert_eq!(product.aer_rate, Some(4.10));
        assert!(product.fscs_protected);
        assert_eq!(product.parsed_account_type().unwrap(), AccountType::EasyAccess);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"bankName": "Marcus", "accountType": "easy_access"}"#;
        let product: RawProduct = serde_json::from_str(json).unwrap();
        assert_eq!(product.aer_rate, None);
        assert_eq!(product.term_months, None);
        assert!(!product.fscs_protected);
    }

    #[test]
    fn rejection_kind_strings_match_audit_statuses() {
        assert_eq!(RejectionKind::Validation.as_str(), "rejected");
        assert_eq!(RejectionKind::RateFiltered.as_str(), "rate_filtered");
    }
}
