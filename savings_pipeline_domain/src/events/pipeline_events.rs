// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Events
//!
//! Typed events published on the UI channel during orchestration and the
//! triggers consumed by the reprocessing controller. Serialization is part
//! of the contract — the desktop UI deserializes these payloads directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress payload carried by `PipelineEvent::Progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    pub request_id: Uuid,
    pub current_stage: String,
    /// Completion of the current stage, 0–100.
    pub stage_progress: u8,
    /// Completion of the whole run, 0–100.
    pub total_progress: u8,
    pub message: String,
}

/// Lifecycle events emitted by the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PipelineEvent {
    #[serde(rename = "pipeline:started")]
    Started {
        batch_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "pipeline:stage-started")]
    StageStarted { batch_id: String, stage: String },
    #[serde(rename = "pipeline:stage-completed")]
    StageCompleted {
        batch_id: String,
        stage: String,
        passed: usize,
        rejected: usize,
        duration_ms: u64,
    },
    #[serde(rename = "pipeline:completed")]
    Completed {
        batch_id: String,
        canonical_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "pipeline:failed")]
    Failed {
        batch_id: String,
        error_type: String,
        stage: Option<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "pipeline:progress")]
    Progress(StageProgress),
}

/// Events that wake the reprocessing controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "kebab-case")]
pub enum ReprocessTrigger {
    #[serde(rename = "scraper:completed")]
    ScraperCompleted { source: String },
    #[serde(rename = "manual:trigger")]
    Manual { requested_by: Option<String> },
    #[serde(rename = "recovery:trigger")]
    Recovery,
}

impl ReprocessTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReprocessTrigger::ScraperCompleted { .. } => "scraper:completed",
            ReprocessTrigger::Manual { .. } => "manual:trigger",
            ReprocessTrigger::Recovery => "recovery:trigger",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_event_serializes_with_error_type() {
        let event = PipelineEvent::Failed {
            batch_id: "b1".into(),
            error_type: "DATA_CORRUPTION".into(),
            stage: Some("json_ingestion".into()),
            message: "62% of products failed validation".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "pipeline:failed");
        assert_eq!(json["error_type"], "DATA_CORRUPTION");
    }

    #[test]
    fn trigger_names_are_stable() {
        assert_eq!(ReprocessTrigger::Recovery.as_str(), "recovery:trigger");
        assert_eq!(
            ReprocessTrigger::ScraperCompleted { source: "raisin".into() }.as_str(),
            "scraper:completed"
        );
    }
}
