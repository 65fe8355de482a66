// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Pipeline run state: batches, the status singleton, and processing locks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Lifecycle status of a pipeline batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        match value {
            "running" => Ok(BatchStatus::Running),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(PipelineError::internal_error(format!(
                "unknown batch status '{}'",
                other
            ))),
        }
    }
}

/// One pipeline run. Created eagerly by the orchestrator so audit rows can
/// reference a stable batch id before any stage executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBatch {
    pub batch_id: String,
    pub pipeline_id: String,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PipelineBatch {
    pub fn new(batch_id: String, pipeline_id: String) -> Self {
        Self {
            batch_id,
            pipeline_id,
            status: BatchStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

/// The singleton status row guarding concurrent orchestration runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub is_running: bool,
    pub current_stage: Option<String>,
    pub batch_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl PipelineStatus {
    pub fn idle() -> Self {
        Self {
            is_running: false,
            current_stage: None,
            batch_id: None,
            started_at: None,
        }
    }

    /// True when the row claims a run is in flight but has been for longer
    /// than the caller's staleness budget — the marker of a crashed engine.
    pub fn is_stale(&self, now: DateTime<Utc>, budget: Duration) -> bool {
        match (self.is_running, self.started_at) {
            (true, Some(started)) => now - started > budget,
            (true, None) => true,
            _ => false,
        }
    }
}

/// An exclusive processing-lock row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLock {
    pub id: i64,
    pub process_type: String,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub metadata: Option<String>,
}

impl ProcessingLock {
    /// A running lock older than the staleness window belongs to a dead
    /// process and may be reclaimed.
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.status == BatchStatus::Running && now - self.started_at > staleness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_running_status_is_not_stale() {
        let status = PipelineStatus {
            is_running: true,
            current_stage: Some("ingestion".into()),
            batch_id: Some("b".into()),
            started_at: Some(Utc::now()),
        };
        assert!(!status.is_stale(Utc::now(), Duration::minutes(15)));
    }

    #[test]
    fn old_running_status_is_stale() {
        let status = PipelineStatus {
            is_running: true,
            current_stage: None,
            batch_id: None,
            started_at: Some(Utc::now() - Duration::minutes(60)),
        };
        assert!(status.is_stale(Utc::now(), Duration::minutes(15)));
    }

    #[test]
    fn running_status_without_start_time_is_stale() {
        let status = PipelineStatus {
            is_running: true,
            current_stage: None,
            batch_id: None,
            started_at: None,
        };
        assert!(status.is_stale(Utc::now(), Duration::minutes(15)));
    }

    #[test]
    fn lock_staleness_requires_running_state() {
        let lock = ProcessingLock {
            id: 1,
            process_type: "deduplication".into(),
            status: BatchStatus::Completed,
            started_at: Utc::now() - Duration::minutes(60),
            metadata: None,
        };
        assert!(!lock.is_stale(Utc::now(), Duration::minutes(10)));
    }
}
