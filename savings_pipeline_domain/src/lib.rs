// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Savings Pipeline Domain
//!
//! Pure domain layer for the savings-product pipeline engine. This crate
//! holds the business logic that is independent of any runtime, store, or
//! interface concern:
//!
//! - **Entities**: the product record chain (raw → parsed → enriched →
//!   final), pipeline batches, processing locks, and the pipeline status
//!   singleton
//! - **Value objects**: account types, business keys, batch ids, typed
//!   configuration values, FRN match classifications, selection reasons
//! - **Domain services**: bank-name normalization for FRN matching and for
//!   FSCS-safe business keys, including the lookup-cache variation generator
//! - **Events**: typed pipeline lifecycle and reprocessing trigger events
//! - **Errors**: the `PipelineError` hierarchy shared by every layer
//!
//! The crate deliberately has no `tokio`, `sqlx`, or `tracing` dependency.
//! Infrastructure adapts these types to the store; the application layer
//! drives them through the orchestration engine.

pub mod entities;
pub mod error;
pub mod events;
pub mod services;
pub mod value_objects;

pub use entities::pipeline_batch::{BatchStatus, PipelineBatch, PipelineStatus, ProcessingLock};
pub use entities::product::{
    EnrichedProduct, FinalProduct, ParsedProduct, RawProduct, RejectedProduct, RejectionKind,
};
pub use error::PipelineError;
pub use events::pipeline_events::{PipelineEvent, ReprocessTrigger, StageProgress};
pub use value_objects::account_type::AccountType;
pub use value_objects::batch_id::BatchIdGenerator;
pub use value_objects::business_key::BusinessKey;
pub use value_objects::config_value::ConfigValue;
pub use value_objects::frn_match::{FrnSource, FrnStatus};
pub use value_objects::platform::PlatformCategory;
pub use value_objects::selection_reason::SelectionReason;
