// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Environment Settings
//!
//! The single place the process environment is read. Every engine switch
//! exposed as an environment variable is captured here once at startup and
//! passed down explicitly — no component reads `std::env` on its own.

use std::path::PathBuf;

/// Audit detail levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditLevel {
    Minimal,
    #[default]
    Standard,
    Verbose,
}

impl AuditLevel {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "minimal" => AuditLevel::Minimal,
            "verbose" => AuditLevel::Verbose,
            _ => AuditLevel::Standard,
        }
    }
}

/// Engine behaviour switches sourced from the environment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// `PIPELINE_VERBOSE` — INFO log level.
    pub verbose: bool,
    /// `PIPELINE_DEBUG` — DEBUG log level (wins over verbose).
    pub debug: bool,
    /// `PIPELINE_ATOMIC` — one store transaction for the whole run.
    /// Defaults to true.
    pub atomic: bool,
    /// `PIPELINE_DATA_QUALITY` — run the data quality analyzer post-stage.
    pub data_quality: bool,
    /// `DATA_QUALITY_VERBOSE` — include per-metric detail in quality logs.
    pub data_quality_verbose: bool,
    /// `PIPELINE_AUDIT_ENABLED` — defaults to true; disabled audit is a
    /// no-op recorder.
    pub audit_enabled: bool,
    /// `PIPELINE_AUDIT_LEVEL` — minimal | standard | verbose.
    pub audit_level: AuditLevel,
    /// `PIPELINE_AUDIT_PERSIST_REJECTED` — keep per-item rows for rejects.
    pub audit_persist_rejected: bool,
    /// `PIPELINE_AUDIT_OUTPUT` — optional side-channel file for audit JSON.
    pub audit_output: Option<PathBuf>,
    /// `DATABASE_PATH` — overrides the store location.
    pub database_path: Option<PathBuf>,
}

impl EngineSettings {
    /// Reads every engine switch from the process environment.
    pub fn from_env() -> Self {
        Self {
            verbose: env_flag("PIPELINE_VERBOSE", false),
            debug: env_flag("PIPELINE_DEBUG", false),
            atomic: env_flag("PIPELINE_ATOMIC", true),
            data_quality: env_flag("PIPELINE_DATA_QUALITY", false),
            data_quality_verbose: env_flag("DATA_QUALITY_VERBOSE", false),
            audit_enabled: env_flag("PIPELINE_AUDIT_ENABLED", true),
            audit_level: std::env::var("PIPELINE_AUDIT_LEVEL")
                .map(|v| AuditLevel::parse(&v))
                .unwrap_or_default(),
            audit_persist_rejected: env_flag("PIPELINE_AUDIT_PERSIST_REJECTED", false),
            audit_output: std::env::var("PIPELINE_AUDIT_OUTPUT").ok().map(PathBuf::from),
            database_path: std::env::var("DATABASE_PATH").ok().map(PathBuf::from),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: false,
            atomic: true,
            data_quality: false,
            data_quality_verbose: false,
            audit_enabled: true,
            audit_level: AuditLevel::Standard,
            audit_persist_rejected: false,
            audit_output: None,
            database_path: None,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_atomic_with_standard_audit() {
        let settings = EngineSettings::default();
        assert!(settings.atomic);
        assert!(settings.audit_enabled);
        assert_eq!(settings.audit_level, AuditLevel::Standard);
        assert!(!settings.data_quality);
    }

    #[test]
    fn audit_level_parses_known_values() {
        assert_eq!(AuditLevel::parse("minimal"), AuditLevel::Minimal);
        assert_eq!(AuditLevel::parse("VERBOSE"), AuditLevel::Verbose);
        assert_eq!(AuditLevel::parse("anything-else"), AuditLevel::Standard);
    }
}
