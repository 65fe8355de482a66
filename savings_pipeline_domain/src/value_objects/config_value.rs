// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Typed Configuration Value
//!
//! The `unified_config` table stores every value as text tagged with a type
//! column (`number | boolean | string | json`). `ConfigValue` is the typed
//! in-memory form: a tagged variant with strict accessors that fail loudly
//! on mismatch rather than coercing. A threshold read as the wrong type is a
//! configuration defect, not something to paper over.

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// A configuration value parsed from its stored `(config_value, config_type)`
/// pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl ConfigValue {
    /// Parses a raw stored value according to its declared type tag.
    pub fn parse(raw: &str, config_type: &str) -> Result<Self, PipelineError> {
        match config_type {
            "boolean" => match raw.trim() {
                "true" | "1" => Ok(ConfigValue::Bool(true)),
                "false" | "0" => Ok(ConfigValue::Bool(false)),
                other => Err(PipelineError::config_load_failed(format!(
                    "'{}' is not a boolean",
                    other
                ))),
            },
            "number" => {
                let trimmed = raw.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Ok(ConfigValue::Int(i))
                } else {
                    trimmed
                        .parse::<f64>()
                        .map(ConfigValue::Float)
                        .map_err(|_| PipelineError::config_load_failed(format!("'{}' is not a number", trimmed)))
                }
            }
            "string" => Ok(ConfigValue::Text(raw.to_string())),
            "json" => serde_json::from_str(raw)
                .map(ConfigValue::Json)
                .map_err(|e| PipelineError::config_load_failed(format!("invalid json config value: {}", e))),
            other => Err(PipelineError::config_load_failed(format!(
                "unknown config type '{}'",
                other
            ))),
        }
    }

    /// Strict boolean accessor.
    pub fn as_bool(&self) -> Result<bool, PipelineError> {
        match self {
            ConfigValue::Bool(b) => Ok(*b),
            other => Err(type_mismatch("boolean", other)),
        }
    }

    /// Strict integral accessor. A float value is not an integer.
    pub fn as_i64(&self) -> Result<i64, PipelineError> {
        match self {
            ConfigValue::Int(i) => Ok(*i),
            other => Err(type_mismatch("integer", other)),
        }
    }

    /// Numeric accessor. Integers widen to f64; nothing else does.
    pub fn as_f64(&self) -> Result<f64, PipelineError> {
        match self {
            ConfigValue::Float(f) => Ok(*f),
            ConfigValue::Int(i) => Ok(*i as f64),
            other => Err(type_mismatch("number", other)),
        }
    }

    /// Strict string accessor.
    pub fn as_str(&self) -> Result<&str, PipelineError> {
        match self {
            ConfigValue::Text(s) => Ok(s),
            other => Err(type_mismatch("string", other)),
        }
    }

    /// Strict JSON accessor.
    pub fn as_json(&self) -> Result<&serde_json::Value, PipelineError> {
        match self {
            ConfigValue::Json(v) => Ok(v),
            other => Err(type_mismatch("json", other)),
        }
    }

    /// Deserializes a JSON-typed value into a concrete shape.
    pub fn as_typed_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, PipelineError> {
        let value = self.as_json()?;
        serde_json::from_value(value.clone())
            .map_err(|e| PipelineError::config_load_failed(format!("json config shape mismatch: {}", e)))
    }

    fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Int(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::Text(_) => "string",
            ConfigValue::Json(_) => "json",
        }
    }
}

fn type_mismatch(wanted: &str, got: &ConfigValue) -> PipelineError {
    PipelineError::config_load_failed(format!("expected {} config value, found {}", wanted, got.type_name()))
}
