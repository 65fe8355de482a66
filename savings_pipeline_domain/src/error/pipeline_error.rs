// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! Hierarchical error type for the savings-product pipeline. Errors fall into
//! three behavioural classes the orchestration engine acts on:
//!
//! - **Critical** — abort the run, roll back the enclosing transaction in
//!   atomic mode, reset the pipeline status singleton:
//!   `ConfigLoadFailed`, `DatabaseFailed`, `ServiceInitFailed`,
//!   `StageExecutionFailed`, `PersistenceFailed`, `ConcurrentExecution`,
//!   `DataCorruption`
//! - **Recoverable** — recorded against the run and carried into the
//!   returned result, never fatal on their own: individual validation
//!   failures, rule parse errors, audit persistence failures
//! - **Transient** — skip this invocation and retry later:
//!   `LockUnavailable`, `TimeoutError`, `CircuitOpen`
//!
//! Every variant carries a human-readable message; `error_code()` yields the
//! stable machine-readable code surfaced on the CLI and the UI event channel.

use thiserror::Error;

/// Domain-specific errors for the savings-product pipeline.
///
/// Each variant represents a specific failure mode and is designed to carry
/// enough context for diagnostics without leaking store internals.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Configuration load failed: {0}")]
    ConfigLoadFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseFailed(String),

    #[error("Service initialization failed: {0}")]
    ServiceInitFailed(String),

    #[error("Stage execution failed: {0}")]
    StageExecutionFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Concurrent execution refused: {0}")]
    ConcurrentExecution(String),

    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Business rules failed: {0}")]
    BusinessRulesFailed(String),

    #[error("Platform configuration failed: {0}")]
    PlatformConfigFailed(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Processing lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// Creates a new configuration load error
    pub fn config_load_failed(msg: impl Into<String>) -> Self {
        Self::ConfigLoadFailed(msg.into())
    }

    /// Creates a new database error
    pub fn database_failed(msg: impl Into<String>) -> Self {
        Self::DatabaseFailed(msg.into())
    }

    /// Creates a new stage execution error
    pub fn stage_execution_failed(msg: impl Into<String>) -> Self {
        Self::StageExecutionFailed(msg.into())
    }

    /// Creates a new persistence error
    pub fn persistence_failed(msg: impl Into<String>) -> Self {
        Self::PersistenceFailed(msg.into())
    }

    /// Creates a new data corruption error
    pub fn data_corruption(msg: impl Into<String>) -> Self {
        Self::DataCorruption(msg.into())
    }

    /// Creates a new validation error
    pub fn validation_failed(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    /// Creates a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::TimeoutError(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Critical errors abort the run and roll back the enclosing store
    /// transaction when the engine runs in atomic mode.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            PipelineError::ConfigLoadFailed(_)
                | PipelineError::DatabaseFailed(_)
                | PipelineError::ServiceInitFailed(_)
                | PipelineError::StageExecutionFailed(_)
                | PipelineError::PersistenceFailed(_)
                | PipelineError::ConcurrentExecution(_)
                | PipelineError::DataCorruption(_)
        )
    }

    /// Transient errors skip the current invocation; the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::LockUnavailable(_) | PipelineError::TimeoutError(_) | PipelineError::CircuitOpen(_)
        )
    }

    /// Recoverable errors are appended to the run's error list and never
    /// abort the pipeline on their own.
    pub fn is_recoverable(&self) -> bool {
        !self.is_critical() && !self.is_transient()
    }

    /// Stable machine-readable code for the CLI summary and UI events.
    pub fn error_code(&self) -> &'static str {
        match self {
            PipelineError::ConfigLoadFailed(_) => "CONFIG_LOAD_FAILED",
            PipelineError::DatabaseFailed(_) => "DATABASE_FAILED",
            PipelineError::ServiceInitFailed(_) => "SERVICE_INIT_FAILED",
            PipelineError::StageExecutionFailed(_) => "STAGE_EXECUTION_FAILED",
            PipelineError::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            PipelineError::ConcurrentExecution(_) => "CONCURRENT_EXECUTION",
            PipelineError::DataCorruption(_) => "DATA_CORRUPTION",
            PipelineError::ValidationFailed(_) => "VALIDATION_FAILED",
            PipelineError::BusinessRulesFailed(_) => "BUSINESS_RULES_FAILED",
            PipelineError::PlatformConfigFailed(_) => "PLATFORM_CONFIG_FAILED",
            PipelineError::TimeoutError(_) => "TIMEOUT",
            PipelineError::SerializationError(_) => "SERIALIZATION_ERROR",
            PipelineError::IoError(_) => "IO_ERROR",
            PipelineError::LockUnavailable(_) => "LOCK_UNAVAILABLE",
            PipelineError::CircuitOpen(_) => "CIRCUIT_OPEN",
            PipelineError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Gets the error category for log grouping
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::ConfigLoadFailed(_) => "configuration",
            PipelineError::DatabaseFailed(_) | PipelineError::PersistenceFailed(_) => "storage",
            PipelineError::ServiceInitFailed(_) => "initialization",
            PipelineError::StageExecutionFailed(_) => "processing",
            PipelineError::ConcurrentExecution(_) | PipelineError::LockUnavailable(_) => "concurrency",
            PipelineError::DataCorruption(_) => "corruption",
            PipelineError::ValidationFailed(_) => "validation",
            PipelineError::BusinessRulesFailed(_) => "rules",
            PipelineError::PlatformConfigFailed(_) => "configuration",
            PipelineError::TimeoutError(_) => "timeout",
            PipelineError::SerializationError(_) => "serialization",
            PipelineError::IoError(_) => "io",
            PipelineError::CircuitOpen(_) => "resilience",
            PipelineError::InternalError(_) => "internal",
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}
