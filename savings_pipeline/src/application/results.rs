// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Structured run results returned to the CLI and embedded in UI events.

use serde::{Deserialize, Serialize};

/// Per-stage outcome counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub passed: usize,
    pub rejected: usize,
    pub duration_ms: u64,
}

/// The structured summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub batch_id: String,
    pub success: bool,
    pub stages: Vec<StageOutcome>,
    pub canonical_count: usize,
    /// Recoverable errors carried through the run (never fatal on their own).
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn new(batch_id: String) -> Self {
        Self {
            batch_id,
            success: false,
            stages: Vec::new(),
            canonical_count: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn record_stage(&mut self, stage: &str, passed: usize, rejected: usize, duration_ms: u64) {
        self.stages.push(StageOutcome {
            stage: stage.to_string(),
            passed,
            rejected,
            duration_ms,
        });
    }

    /// Human-readable summary printed by the CLI on completion.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "batch {} {} in {} ms\n",
            self.batch_id,
            if self.success { "completed" } else { "failed" },
            self.duration_ms
        ));
        for stage in &self.stages {
            out.push_str(&format!(
                "  {:<16} passed {:>6}  rejected {:>6}  ({} ms)\n",
                stage.stage, stage.passed, stage.rejected, stage.duration_ms
            ));
        }
        out.push_str(&format!("  canonical products: {}\n", self.canonical_count));
        if !self.errors.is_empty() {
            out.push_str(&format!("  recoverable errors: {}\n", self.errors.len()));
            for error in &self.errors {
                out.push_str(&format!("    - {}\n", error));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_every_stage() {
        let mut result = PipelineResult::new("b-1".into());
        result.record_stage("json_ingestion", 10, 2, 15);
        result.record_stage("deduplication", 8, 0, 4);
        result.success = true;
        let summary = result.summary();
        assert!(summary.contains("json_ingestion"));
        assert!(summary.contains("deduplication"));
        assert!(summary.contains("completed"));
    }
}
