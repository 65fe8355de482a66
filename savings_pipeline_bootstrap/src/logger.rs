// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Logger
//!
//! Logging seam for bootstrap-phase code — argument handling, glob
//! expansion, environment capture. Bootstrap diagnostics matter (a feed
//! pattern that silently matches nothing is a misconfigured cron job, not
//! a quiet success), but bootstrap code must stay testable without
//! producing output, so callers receive the seam rather than calling a
//! logging backend directly.

/// Severity of a bootstrap diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Logging seam for bootstrap-phase code.
///
/// One required method; the severity helpers are provided.
pub trait BootstrapLogger: Send + Sync {
    /// Records one diagnostic at the given severity.
    fn log(&self, level: BootstrapLevel, message: &str);

    fn error(&self, message: &str) {
        self.log(BootstrapLevel::Error, message);
    }

    fn warn(&self, message: &str) {
        self.log(BootstrapLevel::Warn, message);
    }

    fn info(&self, message: &str) {
        self.log(BootstrapLevel::Info, message);
    }

    fn debug(&self, message: &str) {
        self.log(BootstrapLevel::Debug, message);
    }
}

/// Routes bootstrap diagnostics into the tracing subscriber, tagged with
/// the phase so they are distinguishable from engine output.
pub struct ConsoleLogger;

impl BootstrapLogger for ConsoleLogger {
    fn log(&self, level: BootstrapLevel, message: &str) {
        match level {
            BootstrapLevel::Error => tracing::error!(phase = "bootstrap", "{}", message),
            BootstrapLevel::Warn => tracing::warn!(phase = "bootstrap", "{}", message),
            BootstrapLevel::Info => tracing::info!(phase = "bootstrap", "{}", message),
            BootstrapLevel::Debug => tracing::debug!(phase = "bootstrap", "{}", message),
        }
    }
}

/// Discards every diagnostic; keeps bootstrap tests quiet.
pub struct NoOpLogger;

impl BootstrapLogger for NoOpLogger {
    fn log(&self, _level: BootstrapLevel, _message: &str) {}
}

/// Captures diagnostics so tests can assert on them.
#[cfg(test)]
#[derive(Default)]
pub struct CapturingLogger {
    entries: std::sync::Mutex<Vec<(BootstrapLevel, String)>>,
}

#[cfg(test)]
impl CapturingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded at the given severity.
    pub fn messages_at(&self, level: BootstrapLevel) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(entry_level, _)| *entry_level == level)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[cfg(test)]
impl BootstrapLogger for CapturingLogger {
    fn log(&self, level: BootstrapLevel, message: &str) {
        self.entries.lock().unwrap().push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_helpers_tag_the_right_level() {
        let logger = CapturingLogger::new();
        logger.error("e");
        logger.warn("w1");
        logger.warn("w2");
        logger.debug("d");

        assert_eq!(logger.messages_at(BootstrapLevel::Error), vec!["e"]);
        assert_eq!(logger.messages_at(BootstrapLevel::Warn), vec!["w1", "w2"]);
        assert_eq!(logger.messages_at(BootstrapLevel::Debug), vec!["d"]);
        assert!(logger.messages_at(BootstrapLevel::Info).is_empty());
    }

    #[test]
    fn noop_logger_discards_everything() {
        let logger = NoOpLogger;
        logger.error("dropped");
        logger.info("dropped");
    }
}
