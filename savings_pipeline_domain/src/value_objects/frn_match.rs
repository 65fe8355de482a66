// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! FRN match classification types.
//!
//! `FrnStatus` is the confidence-banded outcome of resolution; `FrnSource`
//! records which path produced the winning candidate; `CacheMatchType`
//! tags lookup-cache rows with their provenance and drives priority ranking
//! (manual overrides outrank direct Bank of England matches, which outrank
//! generated name variations, which outrank shared brands).

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Outcome of resolving a bank name to a Firm Reference Number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrnStatus {
    Matched,
    ResearchQueue,
    NoMatch,
}

impl FrnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrnStatus::Matched => "MATCHED",
            FrnStatus::ResearchQueue => "RESEARCH_QUEUE",
            FrnStatus::NoMatch => "NO_MATCH",
        }
    }
}

impl Display for FrnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resolution path produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrnSource {
    Exact,
    Fuzzy,
    Alias,
    None,
}

impl FrnSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrnSource::Exact => "EXACT",
            FrnSource::Fuzzy => "FUZZY",
            FrnSource::Alias => "ALIAS",
            FrnSource::None => "NONE",
        }
    }
}

impl Display for FrnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a lookup-cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMatchType {
    ManualOverride,
    DirectMatch,
    NameVariation,
    SharedBrand,
}

impl CacheMatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMatchType::ManualOverride => "manual_override",
            CacheMatchType::DirectMatch => "direct_match",
            CacheMatchType::NameVariation => "name_variation",
            CacheMatchType::SharedBrand => "shared_brand",
        }
    }

    /// Lower rank wins when several cache rows share a search name.
    pub fn priority_rank(&self) -> i64 {
        match self {
            CacheMatchType::ManualOverride => 1,
            CacheMatchType::DirectMatch => 2,
            CacheMatchType::NameVariation => 3,
            CacheMatchType::SharedBrand => 4,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual_override" => Some(CacheMatchType::ManualOverride),
            "direct_match" => Some(CacheMatchType::DirectMatch),
            "name_variation" => Some(CacheMatchType::NameVariation),
            "shared_brand" => Some(CacheMatchType::SharedBrand),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_override_first() {
        assert!(CacheMatchType::ManualOverride.priority_rank() < CacheMatchType::DirectMatch.priority_rank());
        assert!(CacheMatchType::DirectMatch.priority_rank() < CacheMatchType::NameVariation.priority_rank());
        assert!(CacheMatchType::NameVariation.priority_rank() < CacheMatchType::SharedBrand.priority_rank());
    }

    #[test]
    fn status_strings_are_stable() {
        assert_eq!(FrnStatus::ResearchQueue.as_str(), "RESEARCH_QUEUE");
        assert_eq!(FrnSource::Fuzzy.as_str(), "FUZZY");
    }

    #[test]
    fn cache_match_type_round_trips() {
        for t in [
            CacheMatchType::ManualOverride,
            CacheMatchType::DirectMatch,
            CacheMatchType::NameVariation,
            CacheMatchType::SharedBrand,
        ] {
            assert_eq!(CacheMatchType::parse(t.as_str()), Some(t));
        }
    }
}
