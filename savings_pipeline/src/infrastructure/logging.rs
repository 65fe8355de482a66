// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Logger Initialization
//!
//! Level-gated diagnostic output driven by two environment switches,
//! captured once into `EngineSettings`:
//!
//! - `PIPELINE_DEBUG=true` → DEBUG
//! - `PIPELINE_VERBOSE=true` → INFO
//! - otherwise → WARN
//!
//! ERROR and WARN always emit. Output is single-line compact structured
//! text; no format is promised to downstream tooling.

use savings_pipeline_bootstrap::EngineSettings;
use tracing::Level;

/// Initializes the global tracing subscriber from the engine settings.
///
/// Safe to call more than once; only the first call installs a subscriber
/// (subsequent calls are ignored, which keeps tests independent).
pub fn init_tracing(settings: &EngineSettings) {
    let level = if settings.debug {
        Level::DEBUG
    } else if settings.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_max_level(level)
        .with_target(false)
        .finish();

    // A pre-installed subscriber (e.g. in tests) wins; that is fine.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
