//! Conflict detection and resolution between handler outputs.
//!
//! ```text
//! conflict type             | rule
//! --------------------------|--------------------------------------
//! classification_mismatch   | higher self-reported confidence wins
//! data_inconsistency        | larger serialized payload wins
//! anything else             | first-listed option wins
//! ```
//!
//! Ties always go to the earlier option.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::registry::{HandlerKind, HandlerRegistry};
use crate::workflow::{ExecutionResult, NodeStatus};

/// Kind of disagreement between outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConflictKind {
    ClassificationMismatch,
    DataInconsistency,
    /// Caller-supplied type with no dedicated rule.
    Other(String),
}

impl ConflictKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ClassificationMismatch => "classification_mismatch",
            Self::DataInconsistency => "data_inconsistency",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ConflictKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "classification_mismatch" => Self::ClassificationMismatch,
            "data_inconsistency" => Self::DataInconsistency,
            _ => Self::Other(name),
        }
    }
}

impl From<ConflictKind> for String {
    fn from(kind: ConflictKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictOption {
    pub node_id: String,
    pub handler: HandlerKind,
    pub value: Value,
    /// Explicit confidence; otherwise read from `value.confidence`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ConflictOption {
    pub fn new(node_id: impl Into<String>, handler: HandlerKind, value: Value) -> Self {
        Self {
            node_id: node_id.into(),
            handler,
            value,
            confidence: None,
        }
    }

    pub fn self_reported_confidence(&self) -> Option<f64> {
        self.confidence
            .or_else(|| self.value.get("confidence").and_then(Value::as_f64))
            .filter(|c| c.is_finite())
    }

    fn payload_size(&self) -> usize {
        serde_json::to_string(&self.value).map_or(0, |s| s.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub options: Vec<ConflictOption>,
    pub description: String,
}

/// Which rule picked the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    HigherConfidence,
    LargerPayload,
    FirstListed,
}

impl std::fmt::Display for ResolutionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HigherConfidence => write!(f, "higher confidence"),
            Self::LargerPayload => write!(f, "larger payload"),
            Self::FirstListed => write!(f, "first listed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: ConflictKind,
    pub winner: String,
    pub chosen: Value,
    pub rule: ResolutionRule,
    pub candidates: Vec<String>,
}

impl Resolution {
    pub fn describe(&self) -> String {
        format!(
            "{}: chose {} over {} ({})",
            self.kind,
            self.winner,
            self.candidates
                .iter()
                .filter(|c| **c != self.winner)
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            self.rule
        )
    }
}

/// Stateless detector and resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Pairs of completed nodes whose profiles declare a conflict and whose
    /// outputs disagree.
    pub fn detect(&self, result: &ExecutionResult, registry: &HandlerRegistry) -> Vec<Conflict> {
        let completed: Vec<(&str, HandlerKind, &Value)> = result
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Completed)
            .filter_map(|n| {
                result
                    .outputs
                    .get(&n.node_id)
                    .map(|v| (n.node_id.as_str(), n.handler, v))
            })
            .collect();

        let mut conflicts = Vec::new();
        for (i, (a_id, a_kind, a_value)) in completed.iter().enumerate() {
            for (b_id, b_kind, b_value) in &completed[i + 1..] {
                let declared = match (registry.profile(*a_kind), registry.profile(*b_kind)) {
                    (Some(a), Some(b)) => a.conflicts(b),
                    _ => false,
                };
                if !declared {
                    continue;
                }
                let Some((kind, description)) = disagreement(a_id, a_value, b_id, b_value) else {
                    continue;
                };
                debug!(a = a_id, b = b_id, kind = %kind, "Conflict detected");
                conflicts.push(Conflict {
                    kind,
                    options: vec![
                        ConflictOption::new(*a_id, *a_kind, (*a_value).clone()),
                        ConflictOption::new(*b_id, *b_kind, (*b_value).clone()),
                    ],
                    description,
                });
            }
        }
        conflicts
    }

    /// Pick a winner. `None` only when the conflict has no options.
    pub fn resolve(&self, conflict: &Conflict) -> Option<Resolution> {
        let first = conflict.options.first()?;
        let (winner, rule) = match conflict.kind {
            ConflictKind::ClassificationMismatch => (
                best_by(&conflict.options, |o| {
                    o.self_reported_confidence().unwrap_or(f64::NEG_INFINITY)
                }),
                ResolutionRule::HigherConfidence,
            ),
            ConflictKind::DataInconsistency => (
                best_by(&conflict.options, |o| o.payload_size() as f64),
                ResolutionRule::LargerPayload,
            ),
            ConflictKind::Other(_) => (first, ResolutionRule::FirstListed),
        };

        Some(Resolution {
            kind: conflict.kind.clone(),
            winner: winner.node_id.clone(),
            chosen: winner.value.clone(),
            rule,
            candidates: conflict.options.iter().map(|o| o.node_id.clone()).collect(),
        })
    }

    pub fn resolve_all(&self, conflicts: &[Conflict]) -> Vec<Resolution> {
        conflicts.iter().filter_map(|c| self.resolve(c)).collect()
    }
}

/// First option with the strictly greatest key.
fn best_by<F>(options: &[ConflictOption], key: F) -> &ConflictOption
where
    F: Fn(&ConflictOption) -> f64,
{
    let mut best = &options[0];
    let mut best_key = key(best);
    for option in &options[1..] {
        let k = key(option);
        if k > best_key {
            best = option;
            best_key = k;
        }
    }
    best
}

fn disagreement(a_id: &str, a: &Value, b_id: &str, b: &Value) -> Option<(ConflictKind, String)> {
    let a_category = a.get("category").and_then(Value::as_str);
    let b_category = b.get("category").and_then(Value::as_str);
    if let (Some(x), Some(y)) = (a_category, b_category) {
        if x != y {
            return Some((
                ConflictKind::ClassificationMismatch,
                format!("{a_id} says '{x}', {b_id} says '{y}'"),
            ));
        }
    }

    match (a.as_object(), b.as_object()) {
        (Some(a_map), Some(b_map)) => {
            let differing: Vec<&str> = a_map
                .iter()
                .filter(|(key, value)| b_map.get(*key).is_some_and(|other| other != *value))
                .map(|(key, _)| key.as_str())
                .collect();
            (!differing.is_empty()).then(|| {
                (
                    ConflictKind::DataInconsistency,
                    format!("{a_id} and {b_id} disagree on: {}", differing.join(", ")),
                )
            })
        }
        _ => (a != b).then(|| {
            (
                ConflictKind::DataInconsistency,
                format!("{a_id} and {b_id} returned different results"),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn option(id: &str, value: Value) -> ConflictOption {
        ConflictOption::new(id, HandlerKind::Work, value)
    }

    #[test]
    fn test_classification_mismatch_prefers_confidence() {
        let conflict = Conflict {
            kind: ConflictKind::ClassificationMismatch,
            options: vec![
                option("work", json!({"category": "work", "confidence": 0.6})),
                option("personal", json!({"category": "personal", "confidence": 0.8})),
            ],
            description: String::new(),
        };
        let resolution = ConflictResolver::new().resolve(&conflict).unwrap();
        assert_eq!(resolution.winner, "personal");
        assert_eq!(resolution.rule, ResolutionRule::HigherConfidence);
        assert!(resolution.describe().contains("chose personal over work"));
    }

    #[test]
    fn test_missing_confidence_loses_and_ties_go_first() {
        let conflict = Conflict {
            kind: ConflictKind::ClassificationMismatch,
            options: vec![
                option("a", json!({"category": "x"})),
                option("b", json!({"category": "y", "confidence": 0.1})),
            ],
            description: String::new(),
        };
        assert_eq!(ConflictResolver::new().resolve(&conflict).unwrap().winner, "b");

        let tie = Conflict {
            kind: ConflictKind::ClassificationMismatch,
            options: vec![
                option("a", json!({"confidence": 0.5})),
                option("b", json!({"confidence": 0.5})),
            ],
            description: String::new(),
        };
        assert_eq!(ConflictResolver::new().resolve(&tie).unwrap().winner, "a");
    }

    #[test]
    fn test_data_inconsistency_prefers_larger_payload() {
        let conflict = Conflict {
            kind: ConflictKind::DataInconsistency,
            options: vec![
                option("short", json!({"amount": 1})),
                option("detailed", json!({"amount": 1, "currency": "EUR", "memo": "rent"})),
            ],
            description: String::new(),
        };
        let resolution = ConflictResolver::new().resolve(&conflict).unwrap();
        assert_eq!(resolution.winner, "detailed");
        assert_eq!(resolution.rule, ResolutionRule::LargerPayload);
    }

    #[test]
    fn test_unknown_kind_first_listed_wins() {
        let conflict = Conflict {
            kind: ConflictKind::from("tone_disagreement".to_string()),
            options: vec![option("a", json!(1)), option("b", json!({"much": "bigger"}))],
            description: String::new(),
        };
        let resolution = ConflictResolver::new().resolve(&conflict).unwrap();
        assert_eq!(resolution.winner, "a");
        assert_eq!(resolution.rule, ResolutionRule::FirstListed);
        assert_eq!(
            serde_json::to_value(&resolution.kind).unwrap(),
            json!("tone_disagreement")
        );
    }

    #[test]
    fn test_empty_conflict_has_no_resolution() {
        let conflict = Conflict {
            kind: ConflictKind::DataInconsistency,
            options: vec![],
            description: String::new(),
        };
        assert!(ConflictResolver::new().resolve(&conflict).is_none());
    }

    #[test]
    fn test_disagreement_classification() {
        let (kind, _) = disagreement(
            "a",
            &json!({"category": "work"}),
            "b",
            &json!({"category": "personal"}),
        )
        .unwrap();
        assert_eq!(kind, ConflictKind::ClassificationMismatch);

        let (kind, description) = disagreement(
            "a",
            &json!({"category": "work", "due": "mon"}),
            "b",
            &json!({"category": "work", "due": "tue", "extra": 1}),
        )
        .unwrap();
        assert_eq!(kind, ConflictKind::DataInconsistency);
        assert!(description.contains("due"));

        assert!(disagreement("a", &json!({"x": 1}), "b", &json!({"y": 2})).is_none());
    }

    #[test]
    fn test_kind_roundtrip_through_string() {
        for name in ["classification_mismatch", "data_inconsistency", "custom"] {
            let kind = ConflictKind::from(name.to_string());
            assert_eq!(String::from(kind), name);
        }
    }
}
