// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Business Key Value Object
//!
//! The business key is the platform-agnostic identity of an
//! otherwise-duplicate product across aggregators:
//!
//! `NORMALIZED_BANK|account_type[|term_<months>][|notice_<days>]`
//!
//! It deliberately excludes platform, FRN, deposit bounds, and rate — rate
//! comparison happens *within* a key group, never in the key itself. A rate
//! in the key would split true duplicates that differ by a basis point; a
//! platform in the key would defeat cross-platform deduplication entirely.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::value_objects::account_type::AccountType;

/// Composite, FSCS-safe product identity used for duplicate grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessKey(String);

impl BusinessKey {
    /// Builds a key from its components.
    ///
    /// `normalized_bank_name` must already be the dedup-normalized form
    /// (see `services::bank_normalizer::DedupNameNormalizer`); the key does
    /// no further normalization. Term and notice segments appear only when
    /// present, so an easy-access key is exactly `BANK|easy_access`.
    pub fn new(
        normalized_bank_name: &str,
        account_type: AccountType,
        term_months: Option<i64>,
        notice_period_days: Option<i64>,
    ) -> Self {
        let mut key = format!("{}|{}", normalized_bank_name, account_type.as_str());
        if let Some(term) = term_months {
            key.push_str(&format!("|term_{}", term));
        }
        if let Some(notice) = notice_period_days {
            key.push_str(&format!("|notice_{}", notice));
        }
        BusinessKey(key)
    }

    /// Wraps an already-formatted key read back from the store.
    pub fn from_stored(key: impl Into<String>) -> Self {
        BusinessKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The normalized bank-name segment of the key.
    pub fn bank_segment(&self) -> &str {
        self.0.split('|').next().unwrap_or("")
    }
}

impl Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
