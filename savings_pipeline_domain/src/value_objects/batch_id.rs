// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Batch Id Generation
//!
//! Every pipeline run is identified by a batch id that must never collide —
//! not across processes, and not across rapid re-creation inside one
//! process. The id composes four components:
//!
//! `<unix-millis>-<process-id>-<monotonic-counter>-<random-suffix>`
//!
//! The timestamp orders batches, the process id separates concurrent
//! engines, the counter separates batches created in the same millisecond,
//! and the random suffix guards against counter resets after restart within
//! the same millisecond.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide batch id generator.
///
/// One instance is created at engine startup and shared by every component
/// that opens batches. The counter is monotonic for the process lifetime.
#[derive(Debug)]
pub struct BatchIdGenerator {
    counter: AtomicU64,
}

impl BatchIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Generates the next batch id.
    pub fn next_id(&self) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let pid = std::process::id();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        format!("{}-{}-{}-{}", millis, pid, seq, suffix)
    }
}

impl Default for BatchIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rapid_generation_never_collides() {
        let generator = BatchIdGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generator.next_id()), "batch id collision");
        }
    }

    #[test]
    fn id_carries_all_four_components() {
        let generator = BatchIdGenerator::new();
        let id = generator.next_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert!(parts[0].parse::<i64>().is_ok(), "timestamp component");
        assert_eq!(parts[1], std::process::id().to_string(), "pid component");
        assert!(parts[2].parse::<u64>().is_ok(), "counter component");
        assert_eq!(parts[3].len(), 6, "random suffix");
    }

    #[test]
    fn counter_is_monotonic() {
        let generator = BatchIdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        let seq = |id: &str| id.split('-').nth(2).unwrap().parse::<u64>().unwrap();
        assert!(seq(&second) > seq(&first));
    }
}
