// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Store-backed configuration and the declarative rules engine.

pub mod loader;
pub mod rules;

pub use loader::{
    CategoryConfig, ConfigLoader, DataQualityConfig, DeduplicationConfig, FrnMatchingConfig, IngestionConfig,
    OrchestrationConfig, PlatformDirectory, PreferredPlatform, ReprocessingConfig, SourceDirectory,
};
pub use rules::{Facts, FiredEvent, RuleEngine, RuleEventType};
