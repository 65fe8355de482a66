// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface
//!
//! Flat CLI surface for the pipeline engine:
//!
//! ```bash
//! savings_pipeline --files 'feeds/*-normalized-*.json'
//! savings_pipeline --rebuild-only
//! savings_pipeline --stop-after frn_matching --files feed.json
//! ```
//!
//! `--files` patterns are glob-expanded here so the engine only ever sees
//! concrete paths. Expansion is ordered: files run in the order their
//! patterns were given, then lexicographically within a pattern.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::logger::BootstrapLogger;

/// Stages the pipeline may be short-circuited after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum StopAfterStage {
    JsonIngestion,
    FrnMatching,
    Deduplication,
    DataQuality,
}

impl StopAfterStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopAfterStage::JsonIngestion => "json_ingestion",
            StopAfterStage::FrnMatching => "frn_matching",
            StopAfterStage::Deduplication => "deduplication",
            StopAfterStage::DataQuality => "data_quality",
        }
    }
}

/// Savings-product pipeline engine.
#[derive(Debug, Parser)]
#[command(name = "savings_pipeline")]
#[command(about = "Savings Pipeline RS - normalizes, FRN-matches, and deduplicates scraped savings-product feeds")]
#[command(version)]
pub struct Cli {
    /// Input feed files (glob patterns supported)
    #[arg(long, value_name = "PATHS", num_args = 1..)]
    pub files: Vec<String>,

    /// Stop the pipeline after the named stage completes
    #[arg(long, value_enum)]
    pub stop_after: Option<StopAfterStage>,

    /// Skip ingestion; run FRN matching and deduplication over the full raw table
    #[arg(long)]
    pub rebuild_only: bool,
}

/// Parses the process arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

impl Cli {
    /// Expands `--files` patterns into concrete paths.
    ///
    /// A pattern with no glob metacharacters is passed through untouched so
    /// a missing literal path still reaches the engine and fails with a
    /// useful error instead of silently expanding to nothing. A glob that
    /// matches nothing, an unreadable directory entry, and a malformed
    /// pattern are each reported through the bootstrap logger — an empty
    /// expansion usually means a misconfigured feed directory.
    pub fn expanded_files(&self, logger: &dyn BootstrapLogger) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for pattern in &self.files {
            let is_glob = pattern.contains(['*', '?', '[']);
            match glob::glob(pattern) {
                Ok(entries) => {
                    let mut matched = Vec::new();
                    for entry in entries {
                        match entry {
                            Ok(path) => matched.push(path),
                            Err(e) => logger.warn(&format!("skipping unreadable glob entry: {}", e)),
                        }
                    }
                    matched.sort();
                    if matched.is_empty() && !is_glob {
                        paths.push(PathBuf::from(pattern));
                    } else {
                        if matched.is_empty() {
                            logger.warn(&format!("pattern '{}' matched no feed files", pattern));
                        }
                        paths.extend(matched);
                    }
                }
                Err(e) => {
                    logger.warn(&format!("malformed glob pattern '{}': {}", pattern, e));
                    paths.push(PathBuf::from(pattern));
                }
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{BootstrapLevel, CapturingLogger, NoOpLogger};
    use std::fs;

    #[test]
    fn parses_stop_after_values() {
        let cli = Cli::parse_from(["savings_pipeline", "--stop-after", "frn_matching"]);
        assert_eq!(cli.stop_after, Some(StopAfterStage::FrnMatching));
    }

    #[test]
    fn parses_rebuild_only() {
        let cli = Cli::parse_from(["savings_pipeline", "--rebuild-only"]);
        assert!(cli.rebuild_only);
        assert!(cli.files.is_empty());
    }

    #[test]
    fn expands_glob_patterns_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b-normalized-2.json", "a-normalized-1.json"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        let pattern = dir.path().join("*-normalized-*.json");
        let cli = Cli::parse_from(["savings_pipeline", "--files", pattern.to_str().unwrap()]);
        let files = cli.expanded_files(&NoOpLogger);
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a-normalized-1.json"));
    }

    #[test]
    fn literal_missing_path_is_preserved() {
        let cli = Cli::parse_from(["savings_pipeline", "--files", "/nonexistent/feed.json"]);
        let files = cli.expanded_files(&NoOpLogger);
        assert_eq!(files, vec![PathBuf::from("/nonexistent/feed.json")]);
    }

    #[test]
    fn empty_glob_expansion_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*-normalized-*.json");
        let cli = Cli::parse_from(["savings_pipeline", "--files", pattern.to_str().unwrap()]);

        let logger = CapturingLogger::new();
        let files = cli.expanded_files(&logger);

        assert!(files.is_empty());
        let warnings = logger.messages_at(BootstrapLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("matched no feed files"));
    }
}
