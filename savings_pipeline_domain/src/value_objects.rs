// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects for the savings-product pipeline.
//!
//! Immutable, validated types following Domain-Driven Design value object
//! patterns: equality by value, no identity, construction validates.

pub mod account_type;
pub mod batch_id;
pub mod business_key;
pub mod config_value;
pub mod frn_match;
pub mod platform;
pub mod selection_reason;

pub use account_type::AccountType;
pub use batch_id::BatchIdGenerator;
pub use business_key::BusinessKey;
pub use config_value::ConfigValue;
pub use frn_match::{CacheMatchType, FrnSource, FrnStatus};
pub use platform::PlatformCategory;
pub use selection_reason::SelectionReason;
