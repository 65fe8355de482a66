// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Account Type Value Object
//!
//! Type-safe account classification for savings products. The three account
//! types drive per-type rate floors during ingestion, the term/notice range
//! checks, and the business-key shape during deduplication.
//!
//! Parsing is deliberately forgiving about separators and case — feed
//! sources disagree on `easy_access` vs `Easy Access` vs `easy-access` —
//! but the canonical form is always the snake_case wire value.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::PipelineError;

/// Savings product account type.
///
/// The canonical wire and storage representation is the snake_case string
/// (`easy_access`, `notice`, `fixed_term`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    EasyAccess,
    Notice,
    FixedTerm,
}

impl AccountType {
    /// Canonical snake_case form used in business keys, config keys, and
    /// the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::EasyAccess => "easy_access",
            AccountType::Notice => "notice",
            AccountType::FixedTerm => "fixed_term",
        }
    }

    /// Parses a feed-supplied account type string.
    ///
    /// Accepts any case and any of space/hyphen/underscore separators.
    /// Unknown values fail validation — an unclassifiable product cannot be
    /// range-checked or keyed.
    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        let normalized: String = value
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "easy_access" => Ok(AccountType::EasyAccess),
            "notice" => Ok(AccountType::Notice),
            "fixed_term" | "fixed" | "fixed_rate" => Ok(AccountType::FixedTerm),
            other => Err(PipelineError::validation_failed(format!(
                "unknown account type '{}'",
                other
            ))),
        }
    }

    /// True when the type carries a `term_months` component.
    pub fn has_term(&self) -> bool {
        matches!(self, AccountType::FixedTerm)
    }

    /// True when the type carries a `notice_period_days` component.
    pub fn has_notice(&self) -> bool {
        matches!(self, AccountType::Notice)
    }

    /// All account types, in rate-floor configuration order.
    pub fn all() -> [AccountType; 3] {
        [AccountType::EasyAccess, AccountType::Notice, AccountType::FixedTerm]
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
