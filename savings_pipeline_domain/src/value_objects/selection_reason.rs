// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Selection-reason taxonomy for deduplication groups.
//!
//! The audit trail records these strings verbatim; compliance tooling
//! filters on them, so they are part of the external contract and must
//! never be reworded.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Why a product was selected (or a group resolved) during deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    SingleProduct,
    FscsBankSeparation,
    CrossPlatformSelection,
    NoDuplicatesFound,
    PreferredPlatformRetained,
    RateToleranceDeduplication,
    QualityScoreSelection,
}

impl SelectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionReason::SingleProduct => "single_product",
            SelectionReason::FscsBankSeparation => "fscs_bank_separation",
            SelectionReason::CrossPlatformSelection => "cross_platform_selection",
            SelectionReason::NoDuplicatesFound => "no_duplicates_found",
            SelectionReason::PreferredPlatformRetained => "preferred_platform_retained",
            SelectionReason::RateToleranceDeduplication => "rate_tolerance_deduplication",
            SelectionReason::QualityScoreSelection => "quality_score_selection",
        }
    }
}

impl Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings_match_the_audit_contract() {
        assert_eq!(SelectionReason::SingleProduct.as_str(), "single_product");
        assert_eq!(SelectionReason::FscsBankSeparation.as_str(), "fscs_bank_separation");
        assert_eq!(
            SelectionReason::PreferredPlatformRetained.as_str(),
            "preferred_platform_retained"
        );
        assert_eq!(
            SelectionReason::RateToleranceDeduplication.as_str(),
            "rate_tolerance_deduplication"
        );
    }

    #[test]
    fn serde_serializes_snake_case() {
        let json = serde_json::to_string(&SelectionReason::QualityScoreSelection).unwrap();
        assert_eq!(json, "\"quality_score_selection\"");
    }
}
