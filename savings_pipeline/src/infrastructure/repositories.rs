// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! SQLite repositories.
//!
//! Methods that must participate in the run's transaction take an explicit
//! `&mut SqliteConnection`; in atomic mode the orchestrator passes its
//! transaction connection, in incremental mode a per-stage one. Read-only
//! helpers work off the pool.

pub mod audit_repository;
pub mod frn_repository;
pub mod product_repository;
pub mod schema;
pub mod state_repository;

pub use audit_repository::AuditRepository;
pub use frn_repository::{FrnCacheEntry, FrnRepository};
pub use product_repository::ProductRepository;
pub use state_repository::StateRepository;
