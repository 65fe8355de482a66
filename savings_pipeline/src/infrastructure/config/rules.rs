// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Declarative Rules Engine
//!
//! Compiles rows of `unified_business_rules` into predicates over a facts
//! record and evaluates them in stable priority order (highest first).
//!
//! The condition grammar is a JSON object with a single `all` or `any`
//! group of `{fact, operator, value}` leaves:
//!
//! ```json
//! {"any": [
//!   {"fact": "bank_name", "operator": "is_null"},
//!   {"fact": "aer_rate", "operator": "less_than", "value": 0.0}
//! ]}
//! ```
//!
//! A rule that fails to parse is logged and skipped — one malformed rule
//! must never take the load down. Unknown facts evaluate as null.

use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::warn;

use savings_pipeline_domain::PipelineError;

/// Event types a fired rule can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEventType {
    RejectProduct,
    FlagValidationError,
    Other(String),
}

impl RuleEventType {
    fn parse(value: &str) -> Self {
        match value {
            "reject_product" => RuleEventType::RejectProduct,
            "flag_validation_error" => RuleEventType::FlagValidationError,
            other => RuleEventType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanInclusive,
    GreaterThan,
    GreaterThanInclusive,
    In,
    NotIn,
    Contains,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Deserialize)]
struct Condition {
    fact: String,
    operator: Operator,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
enum ConditionGroup {
    #[serde(rename = "all")]
    All(Vec<Condition>),
    #[serde(rename = "any")]
    Any(Vec<Condition>),
}

/// A rule compiled from its stored row.
#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    priority: i64,
    event_type: RuleEventType,
    event_params: serde_json::Value,
    conditions: ConditionGroup,
}

/// The facts a rule evaluates against.
#[derive(Debug, Clone, Default)]
pub struct Facts(HashMap<String, serde_json::Value>);

impl Facts {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn set(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    fn get(&self, name: &str) -> serde_json::Value {
        self.0.get(name).cloned().unwrap_or(serde_json::Value::Null)
    }
}

/// An event emitted by a fired rule.
#[derive(Debug, Clone)]
pub struct FiredEvent {
    pub rule_name: String,
    pub event_type: RuleEventType,
    pub params: serde_json::Value,
}

impl FiredEvent {
    /// The `reason` event parameter, falling back to the rule name.
    pub fn reason(&self) -> String {
        self.params
            .get("reason")
            .and_then(|r| r.as_str())
            .map(|r| r.to_string())
            .unwrap_or_else(|| self.rule_name.clone())
    }
}

/// Rules compiled per category, evaluated in priority order.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules_by_category: HashMap<String, Vec<CompiledRule>>,
}

impl RuleEngine {
    /// Loads and compiles every enabled rule.
    ///
    /// Individual parse failures warn and skip the offending rule; only a
    /// store failure aborts.
    pub async fn load(pool: &SqlitePool) -> Result<Self, PipelineError> {
        let rows = sqlx::query(
            "SELECT rule_category, rule_name, conditions_json, event_type, event_params_json, priority \
             FROM unified_business_rules WHERE enabled = 1",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| PipelineError::database_failed(format!("loading business rules: {}", e)))?;

        let mut rules_by_category: HashMap<String, Vec<CompiledRule>> = HashMap::new();
        for row in rows {
            let category: String = row.get("rule_category");
            let name: String = row.get("rule_name");
            let conditions_json: String = row.get("conditions_json");
            let event_type: String = row.get("event_type");
            let event_params_json: Option<String> = row.get("event_params_json");
            let priority: i64 = row.get("priority");

            let conditions: ConditionGroup = match serde_json::from_str(&conditions_json) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(rule = %name, category = %category, "skipping unparseable rule conditions: {}", e);
                    continue;
                }
            };
            let event_params = match event_params_json.as_deref() {
                Some(raw) if !raw.is_empty() => match serde_json::from_str(raw) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(rule = %name, category = %category, "skipping rule with bad event params: {}", e);
                        continue;
                    }
                },
                _ => serde_json::Value::Null,
            };

            rules_by_category.entry(category).or_default().push(CompiledRule {
                name,
                priority,
                event_type: RuleEventType::parse(&event_type),
                event_params,
                conditions,
            });
        }

        // Stable sort keeps insertion order among equal priorities.
        for rules in rules_by_category.values_mut() {
            rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        }

        Ok(Self { rules_by_category })
    }

    /// Evaluates a category's rules and returns the fired events in
    /// priority order.
    pub fn evaluate(&self, category: &str, facts: &Facts) -> Vec<FiredEvent> {
        let Some(rules) = self.rules_by_category.get(category) else {
            return Vec::new();
        };
        rules
            .iter()
            .filter(|rule| evaluate_group(&rule.conditions, facts))
            .map(|rule| FiredEvent {
                rule_name: rule.name.clone(),
                event_type: rule.event_type.clone(),
                params: rule.event_params.clone(),
            })
            .collect()
    }

    pub fn rule_count(&self, category: &str) -> usize {
        self.rules_by_category.get(category).map(Vec::len).unwrap_or(0)
    }
}

fn evaluate_group(group: &ConditionGroup, facts: &Facts) -> bool {
    match group {
        ConditionGroup::All(conditions) => conditions.iter().all(|c| evaluate_condition(c, facts)),
        ConditionGroup::Any(conditions) => conditions.iter().any(|c| evaluate_condition(c, facts)),
    }
}

fn evaluate_condition(condition: &Condition, facts: &Facts) -> bool {
    use serde_json::Value;

    let fact = facts.get(&condition.fact);
    let expected = condition.value.clone().unwrap_or(Value::Null);

    match condition.operator {
        Operator::IsNull => fact.is_null(),
        Operator::NotNull => !fact.is_null(),
        Operator::Equal => values_equal(&fact, &expected),
        Operator::NotEqual => !values_equal(&fact, &expected),
        Operator::LessThan => compare(&fact, &expected).map(|o| o == std::cmp::Ordering::Less).unwrap_or(false),
        Operator::LessThanInclusive => compare(&fact, &expected)
            .map(|o| o != std::cmp::Ordering::Greater)
            .unwrap_or(false),
        Operator::GreaterThan => compare(&fact, &expected)
            .map(|o| o == std::cmp::Ordering::Greater)
            .unwrap_or(false),
        Operator::GreaterThanInclusive => compare(&fact, &expected)
            .map(|o| o != std::cmp::Ordering::Less)
            .unwrap_or(false),
        Operator::In => expected
            .as_array()
            .map(|arr| arr.iter().any(|v| values_equal(&fact, v)))
            .unwrap_or(false),
        Operator::NotIn => expected
            .as_array()
            .map(|arr| !arr.iter().any(|v| values_equal(&fact, v)))
            .unwrap_or(false),
        Operator::Contains => match (&fact, &expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|v| values_equal(v, needle)),
            _ => false,
        },
    }
}

/// Equality with numeric coercion: `4` and `4.0` are the same threshold.
fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn compare(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    let x = a.as_f64()?;
    let y = b.as_f64()?;
    x.partial_cmp(&y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(conditions: &str, event_type: RuleEventType, priority: i64, name: &str) -> CompiledRule {
        CompiledRule {
            name: name.to_string(),
            priority,
            event_type,
            event_params: json!({"reason": name}),
            conditions: serde_json::from_str(conditions).unwrap(),
        }
    }

    fn engine_with(rules: Vec<CompiledRule>) -> RuleEngine {
        let mut by_category = HashMap::new();
        let mut rules = rules;
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        by_category.insert("ingestion".to_string(), rules);
        RuleEngine {
            rules_by_category: by_category,
        }
    }

    #[test]
    fn any_group_fires_on_first_matching_leaf() {
        let engine = engine_with(vec![rule(
            r#"{"any":[{"fact":"bank_name","operator":"is_null"},{"fact":"aer_rate","operator":"is_null"}]}"#,
            RuleEventType::RejectProduct,
            100,
            "missing_required_fields",
        )]);

        let mut facts = Facts::new();
        facts.set("bank_name", "HSBC");
        // aer_rate fact absent -> null
        let fired = engine.evaluate("ingestion", &facts);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].reason(), "missing_required_fields");
    }

    #[test]
    fn all_group_requires_every_leaf() {
        let engine = engine_with(vec![rule(
            r#"{"all":[{"fact":"fscs_protected","operator":"equal","value":false},{"fact":"aer_rate","operator":"greater_than","value":5.0}]}"#,
            RuleEventType::FlagValidationError,
            10,
            "suspicious_unprotected_rate",
        )]);

        let mut facts = Facts::new();
        facts.set("fscs_protected", false);
        facts.set("aer_rate", 4.0);
        assert!(engine.evaluate("ingestion", &facts).is_empty());

        facts.set("aer_rate", 5.5);
        assert_eq!(engine.evaluate("ingestion", &facts).len(), 1);
    }

    #[test]
    fn rules_fire_in_priority_order() {
        let engine = engine_with(vec![
            rule(
                r#"{"all":[{"fact":"x","operator":"not_null"}]}"#,
                RuleEventType::FlagValidationError,
                1,
                "low",
            ),
            rule(
                r#"{"all":[{"fact":"x","operator":"not_null"}]}"#,
                RuleEventType::RejectProduct,
                100,
                "high",
            ),
        ]);
        let mut facts = Facts::new();
        facts.set("x", 1);
        let fired = engine.evaluate("ingestion", &facts);
        assert_eq!(fired[0].rule_name, "high");
        assert_eq!(fired[1].rule_name, "low");
    }

    #[test]
    fn numeric_equality_coerces_int_and_float() {
        assert!(values_equal(&json!(4), &json!(4.0)));
        assert!(!values_equal(&json!(4), &json!(4.1)));
    }

    #[test]
    fn in_operator_matches_membership() {
        let engine = engine_with(vec![rule(
            r#"{"all":[{"fact":"account_type","operator":"in","value":["easy_access","notice"]}]}"#,
            RuleEventType::FlagValidationError,
            5,
            "membership",
        )]);
        let mut facts = Facts::new();
        facts.set("account_type", "easy_access");
        assert_eq!(engine.evaluate("ingestion", &facts).len(), 1);
        facts.set("account_type", "fixed_term");
        assert!(engine.evaluate("ingestion", &facts).is_empty());
    }

    #[test]
    fn unknown_category_fires_nothing() {
        let engine = RuleEngine::default();
        assert!(engine.evaluate("ingestion", &Facts::new()).is_empty());
    }
}
