// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Savings Pipeline CLI
//!
//! Entry point for the pipeline engine:
//!
//! ```bash
//! savings_pipeline --files 'feeds/*-normalized-*.json'
//! savings_pipeline --rebuild-only
//! savings_pipeline --stop-after deduplication --files feed.json
//! ```
//!
//! Behaviour switches come from the environment (`PIPELINE_ATOMIC`,
//! `PIPELINE_VERBOSE`, `PIPELINE_DEBUG`, `PIPELINE_DATA_QUALITY`, the
//! `PIPELINE_AUDIT_*` family, `DATABASE_PATH`); the CLI carries only
//! run-shaping flags. Exit code is 0 on success, 1 on any failure, with a
//! structured summary on stdout either way.

use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, error};

use savings_pipeline::application::{PipelineOptions, PipelineOrchestrator, PipelineResult};
use savings_pipeline::infrastructure::logging;
use savings_pipeline::infrastructure::repositories::schema;
use savings_pipeline_bootstrap::{parse_cli, Cli, ConsoleLogger, EngineSettings, ExitCode};

/// Default store location when `DATABASE_PATH` is unset.
const DEFAULT_DATABASE_PATH: &str = "./savings_pipeline.db";

#[tokio::main]
async fn main() {
    let settings = EngineSettings::from_env();
    logging::init_tracing(&settings);
    let cli = parse_cli();

    match run(cli, settings).await {
        Ok(result) => {
            print!("{}", result.summary());
            ExitCode::Success.exit()
        }
        Err(e) => {
            error!("pipeline failed: {:#}", e);
            eprintln!("pipeline failed: {:#}", e);
            ExitCode::Error.exit()
        }
    }
}

async fn run(cli: Cli, settings: EngineSettings) -> Result<PipelineResult> {
    let database_path = settings
        .database_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));
    let database_url = format!("sqlite://{}", database_path.display());
    debug!(database = %database_url, "initializing store");

    let pool = schema::initialize_database(&database_url).await?;

    let orchestrator = PipelineOrchestrator::new(pool, settings);
    orchestrator.initialize().await?;

    let options = PipelineOptions {
        files: cli.expanded_files(&ConsoleLogger),
        stop_after: cli.stop_after,
        rebuild_only: cli.rebuild_only,
    };
    if options.files.is_empty() && !options.rebuild_only {
        debug!("no input files supplied; running rebuild over the existing raw table");
    }

    let result = orchestrator.run(&options).await?;
    Ok(result)
}
