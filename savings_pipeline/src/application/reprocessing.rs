// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Reprocessing Controller
//!
//! Event-driven re-runs of deduplication, wrapped in a resilience layer:
//!
//! - an mpsc event bus delivering `scraper:completed`, `manual:trigger`,
//!   and `recovery:trigger` to a single supervisor task;
//! - the exclusive processing lock (stale locks reclaimed after ten
//!   minutes);
//! - a per-invocation timeout;
//! - a circuit breaker (`closed → open → half_open → closed`) that refuses
//!   work after the configured run of consecutive failures and probes again
//!   after the reset interval;
//! - fallback copy-through while the breaker is still closed: unprocessed
//!   raw rows land in the canonical table under `fallback_<rowid>` keys,
//!   and raw rows are marked processed even when the fallback itself fails
//!   so the system cannot thrash;
//! - a failsafe interval that fires `recovery:trigger` every five minutes
//!   when nothing else is running and the breaker is not open.
//!
//! The supervisor task owns the breaker state; listeners only send to the
//! channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use savings_pipeline_bootstrap::CancellationToken;
use savings_pipeline_domain::{BatchIdGenerator, BatchStatus, PipelineError, ReprocessTrigger};

use crate::application::audit::AuditRecorder;
use crate::application::stages::DeduplicationStage;
use crate::infrastructure::config::{ConfigLoader, DeduplicationConfig, ReprocessingConfig};
use crate::infrastructure::repositories::{AuditRepository, ProductRepository, StateRepository};

/// The processing-lock type owned by this controller.
const LOCK_TYPE: &str = "deduplication_reprocess";
/// Failsafe cadence.
const FAILSAFE_INTERVAL: Duration = Duration::from_secs(300);
/// Event bus depth; scraper callbacks never block on a slow consumer.
const BUS_CAPACITY: usize = 32;

/// The work a trigger invokes. Abstracted so tests can inject failures.
#[async_trait]
pub trait ReprocessExecutor: Send + Sync {
    async fn execute(&self, pool: &SqlitePool) -> Result<usize, PipelineError>;
}

/// Default executor: deduplicate the FRN-patched raw table and replace the
/// canonical table.
pub struct DedupRebuildExecutor {
    batch_ids: BatchIdGenerator,
}

impl DedupRebuildExecutor {
    pub fn new() -> Self {
        Self {
            batch_ids: BatchIdGenerator::new(),
        }
    }
}

impl Default for DedupRebuildExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReprocessExecutor for DedupRebuildExecutor {
    async fn execute(&self, pool: &SqlitePool) -> Result<usize, PipelineError> {
        let loader = ConfigLoader::new(pool.clone());
        let config = DeduplicationConfig::load(&loader).await?;
        let platforms = loader.load_platforms().await?;
        let products = ProductRepository::new(pool.clone());
        let stage = DeduplicationStage::new(config, platforms);
        // Reprocessing runs outside a pipeline batch; group auditing
        // belongs to full runs, so the recorder here is a no-op.
        let mut recorder = AuditRecorder::disabled(AuditRepository::new(pool.clone()));

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| PipelineError::database_failed(format!("beginning reprocess transaction: {}", e)))?;
        let enriched = products.load_all_enriched(&mut tx).await?;
        let outcome = stage.run(&mut tx, &products, &mut recorder, enriched).await?;
        products.archive_canonical(&mut tx, "reprocess_replacement").await?;
        let batch_id = self.batch_ids.next_id();
        products.replace_canonical(&mut tx, &batch_id, &outcome.winners).await?;
        products.mark_raw_processed(&mut tx).await?;
        tx.commit()
            .await
            .map_err(|e| PipelineError::database_failed(format!("committing reprocess transaction: {}", e)))?;
        Ok(outcome.winners.len())
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_errors: i64,
    opened_at: Option<Instant>,
    total_invocations: u64,
    total_errors: u64,
    fallback_runs: u64,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_errors: 0,
            opened_at: None,
            total_invocations: 0,
            total_errors: 0,
            fallback_runs: 0,
        }
    }
}

/// Controller statistics for admin surfaces.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ControllerStats {
    pub state: String,
    pub total_invocations: u64,
    pub total_errors: u64,
    pub consecutive_errors: i64,
    pub fallback_runs: u64,
}

struct Inner {
    pool: SqlitePool,
    config: ReprocessingConfig,
    state_repo: StateRepository,
    products: ProductRepository,
    executor: Arc<dyn ReprocessExecutor>,
    breaker: Mutex<Breaker>,
}

/// The reprocessing controller handle.
pub struct ReprocessingController {
    inner: Arc<Inner>,
    bus: mpsc::Sender<ReprocessTrigger>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReprocessingController {
    /// Starts the controller with the default deduplication executor.
    pub async fn start(pool: SqlitePool, cancel: CancellationToken) -> Result<Self, PipelineError> {
        Self::start_with_executor(pool, cancel, Arc::new(DedupRebuildExecutor::new())).await
    }

    /// Starts the controller with a caller-supplied executor.
    pub async fn start_with_executor(
        pool: SqlitePool,
        cancel: CancellationToken,
        executor: Arc<dyn ReprocessExecutor>,
    ) -> Result<Self, PipelineError> {
        let loader = ConfigLoader::new(pool.clone());
        let config = ReprocessingConfig::load(&loader).await?;

        let inner = Arc::new(Inner {
            state_repo: StateRepository::new(pool.clone()),
            products: ProductRepository::new(pool.clone()),
            executor,
            breaker: Mutex::new(Breaker::new()),
            config,
            pool,
        });

        let (bus, mut rx) = mpsc::channel::<ReprocessTrigger>(BUS_CAPACITY);

        // Supervisor: the only task that touches the breaker through work.
        let supervisor_inner = Arc::clone(&inner);
        let supervisor_cancel = cancel.clone();
        let supervisor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = supervisor_cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(trigger) => supervisor_inner.handle_trigger(trigger).await,
                        None => break,
                    },
                }
            }
            debug!("reprocessing supervisor stopped");
        });

        // Failsafe: periodic recovery trigger when the system is quiet.
        let failsafe_inner = Arc::clone(&inner);
        let failsafe_cancel = cancel.clone();
        let failsafe_bus = bus.clone();
        let failsafe = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = failsafe_cancel.cancelled() => break,
                    _ = tokio::time::sleep(FAILSAFE_INTERVAL) => {}
                }
                if failsafe_cancel.is_cancelled() {
                    break;
                }
                let breaker_open = failsafe_inner.breaker.lock().state == BreakerState::Open;
                let busy = failsafe_inner.state_repo.lock_held(LOCK_TYPE).await.unwrap_or(true);
                if !breaker_open && !busy {
                    debug!("failsafe interval firing recovery trigger");
                    let _ = failsafe_bus.send(ReprocessTrigger::Recovery).await;
                }
            }
            debug!("reprocessing failsafe stopped");
        });

        Ok(Self {
            inner,
            bus,
            cancel,
            tasks: Mutex::new(vec![supervisor, failsafe]),
        })
    }

    /// Listener entry point for scraper completion callbacks.
    pub async fn notify_scraper_completed(&self, source: &str) {
        let _ = self
            .bus
            .send(ReprocessTrigger::ScraperCompleted {
                source: source.to_string(),
            })
            .await;
    }

    /// Admin: request an immediate reprocessing run.
    pub async fn trigger_manual_processing(&self, requested_by: Option<String>) {
        let _ = self.bus.send(ReprocessTrigger::Manual { requested_by }).await;
    }

    /// Admin: force the breaker closed.
    pub fn reset_circuit_breaker(&self) {
        let mut breaker = self.inner.breaker.lock();
        breaker.state = BreakerState::Closed;
        breaker.consecutive_errors = 0;
        breaker.opened_at = None;
        info!("circuit breaker reset to closed");
    }

    /// Admin: current statistics.
    pub fn stats(&self) -> ControllerStats {
        let breaker = self.inner.breaker.lock();
        ControllerStats {
            state: breaker.state.as_str().to_string(),
            total_invocations: breaker.total_invocations,
            total_errors: breaker.total_errors,
            consecutive_errors: breaker.consecutive_errors,
            fallback_runs: breaker.fallback_runs,
        }
    }

    /// Clears timers and listeners. Safe to call once; subsequent triggers
    /// are dropped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        info!("reprocessing controller shut down");
    }
}

impl Inner {
    async fn handle_trigger(self: &Arc<Self>, trigger: ReprocessTrigger) {
        // Breaker gate. An open breaker past its reset window downgrades to
        // half-open and lets exactly this invocation probe.
        let probing = {
            let mut breaker = self.breaker.lock();
            match breaker.state {
                BreakerState::Open => {
                    let reset = Duration::from_millis(self.config.circuit_breaker_reset_ms.max(0) as u64);
                    let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or(reset);
                    if elapsed >= reset {
                        breaker.state = BreakerState::HalfOpen;
                        debug!(trigger = trigger.as_str(), "circuit breaker half-open probe");
                        true
                    } else {
                        debug!(trigger = trigger.as_str(), "circuit breaker open; refusing work");
                        return;
                    }
                }
                BreakerState::HalfOpen => true,
                BreakerState::Closed => false,
            }
        };

        // Exclusive lock; a held lock means another invocation is live and
        // this one is simply skipped.
        let lock_id = match self.state_repo.acquire_lock(LOCK_TYPE, Some(trigger.as_str())).await {
            Ok(id) => id,
            Err(PipelineError::LockUnavailable(msg)) => {
                debug!(trigger = trigger.as_str(), "skipping reprocess: {}", msg);
                return;
            }
            Err(other) => {
                warn!("lock acquisition failed: {}", other);
                return;
            }
        };

        self.breaker.lock().total_invocations += 1;
        let timeout = Duration::from_millis(self.config.processing_timeout_ms.max(0) as u64);
        let run = tokio::time::timeout(timeout, self.executor.execute(&self.pool)).await;
        let outcome = match run {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(PipelineError::timeout(format!(
                "reprocessing exceeded {} ms",
                self.config.processing_timeout_ms
            ))),
        };

        match outcome {
            Ok(count) => {
                info!(trigger = trigger.as_str(), products = count, "reprocessing succeeded");
                let _ = self
                    .state_repo
                    .release_lock(lock_id, BatchStatus::Completed, None)
                    .await;
                let mut breaker = self.breaker.lock();
                if probing {
                    info!("half-open probe succeeded; circuit breaker closed");
                }
                breaker.state = BreakerState::Closed;
                breaker.consecutive_errors = 0;
                breaker.opened_at = None;
            }
            Err(error) => {
                warn!(trigger = trigger.as_str(), "reprocessing failed: {}", error);
                let _ = self
                    .state_repo
                    .release_lock(lock_id, BatchStatus::Failed, Some(&error.to_string()))
                    .await;

                let run_fallback = {
                    let mut breaker = self.breaker.lock();
                    breaker.total_errors += 1;
                    breaker.consecutive_errors += 1;
                    if probing {
                        breaker.state = BreakerState::Open;
                        breaker.opened_at = Some(Instant::now());
                        warn!("half-open probe failed; circuit breaker reopened");
                        false
                    } else if breaker.consecutive_errors >= self.config.circuit_breaker_threshold {
                        breaker.state = BreakerState::Open;
                        breaker.opened_at = Some(Instant::now());
                        warn!(
                            consecutive = breaker.consecutive_errors,
                            "circuit breaker opened"
                        );
                        false
                    } else {
                        breaker.consecutive_errors >= self.config.fallback_failure_threshold
                    }
                };

                if run_fallback {
                    self.run_fallback().await;
                }
            }
        }
    }

    /// Fallback copy-through. Raw rows are marked processed even when the
    /// copy fails, as specified, so repeated failures cannot thrash.
    async fn run_fallback(self: &Arc<Self>) {
        warn!("running fallback copy-through");
        self.breaker.lock().fallback_runs += 1;

        let copy = async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| PipelineError::database_failed(format!("beginning fallback transaction: {}", e)))?;
            let copied = self.products.fallback_copy_through(&mut tx).await?;
            self.products.mark_raw_processed(&mut tx).await?;
            tx.commit()
                .await
                .map_err(|e| PipelineError::database_failed(format!("committing fallback transaction: {}", e)))?;
            Ok::<u64, PipelineError>(copied)
        };

        match copy.await {
            Ok(copied) => info!(copied, "fallback copy-through complete"),
            Err(error) => {
                warn!("fallback copy-through failed: {}", error);
                if let Ok(mut conn) = self.pool.acquire().await {
                    match self.products.mark_raw_processed(&mut conn).await {
                        Ok(marked) => warn!(marked, "raw rows marked processed despite fallback failure"),
                        Err(e) => warn!("could not mark raw rows processed: {}", e),
                    }
                }
            }
        }
    }
}
