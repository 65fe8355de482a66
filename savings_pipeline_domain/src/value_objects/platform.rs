// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Platform category classification.
//!
//! A `direct` platform is a bank's own channel; an `aggregator` is a
//! third-party marketplace. The two never compete inside a business-key
//! group — FSCS advice differs depending on who holds the client money.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Whether a platform is a bank's own channel or a marketplace listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformCategory {
    Direct,
    Aggregator,
}

impl PlatformCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformCategory::Direct => "direct",
            PlatformCategory::Aggregator => "aggregator",
        }
    }

    /// Classifies a normalized platform name against the configured set of
    /// direct platforms.
    pub fn classify(platform: &str, direct_platforms: &[String]) -> Self {
        let lowered = platform.trim().to_ascii_lowercase();
        if direct_platforms.iter().any(|d| d.eq_ignore_ascii_case(&lowered)) {
            PlatformCategory::Direct
        } else {
            PlatformCategory::Aggregator
        }
    }
}

impl Display for PlatformCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalizes a feed-supplied platform string: trimmed, lowercased,
/// whitespace collapsed. Idempotent.
pub fn normalize_platform_name(platform: &str) -> String {
    platform
        .trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
