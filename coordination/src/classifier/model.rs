//! External model-based classification service.
//!
//! The reply schema is enforced strictly: any missing field, unknown category
//! or out-of-range confidence is a [`ClassificationServiceError::MalformedReply`],
//! never a silently defaulted structure. Unknown extra keys are ignored, the
//! same as for synthesis replies.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::category::Category;
use crate::config::ModelEndpointConfig;
use crate::error::ClassificationServiceError;
use crate::model_client::{strip_code_fence, ChatClient, ChatError};

/// Category name and definition as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    pub name: Category,
    pub definition: String,
}

impl CategoryDefinition {
    pub fn all() -> Vec<Self> {
        Category::ALL
            .iter()
            .map(|c| Self {
                name: *c,
                definition: c.definition().to_string(),
            })
            .collect()
    }
}

/// Request sent to the classification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelClassificationRequest {
    pub text: String,
    /// Rule-based best guess, offered as context.
    pub baseline: Option<Category>,
    pub categories: Vec<CategoryDefinition>,
}

/// Validated reply from the classification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelClassificationReply {
    pub category: Category,
    pub confidence: f64,
    pub reasoning: String,
    pub key_indicators: Vec<String>,
    pub suggested_tags: Vec<String>,
    pub secondary: Option<(Category, f64)>,
    /// Explicit sub-spans of the input, keyed by category.
    pub segments: BTreeMap<Category, String>,
}

/// Wire shape before validation. Everything required is non-optional here so
/// a missing key fails deserialization.
#[derive(Deserialize)]
struct RawReply {
    category: String,
    confidence: f64,
    reasoning: String,
    key_indicators: Vec<String>,
    suggested_tags: Vec<String>,
    #[serde(default)]
    secondary_category: Option<String>,
    #[serde(default)]
    secondary_confidence: Option<f64>,
    #[serde(default)]
    segments: BTreeMap<String, String>,
}

fn malformed(reason: impl Into<String>) -> ClassificationServiceError {
    ClassificationServiceError::MalformedReply(reason.into())
}

fn parse_category(field: &str, raw: &str) -> Result<Category, ClassificationServiceError> {
    Category::from_alias(raw).ok_or_else(|| malformed(format!("{field}: unknown category '{raw}'")))
}

fn check_confidence(field: &str, value: f64) -> Result<f64, ClassificationServiceError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(malformed(format!("{field}: {value} is not within [0, 1]")))
    }
}

/// Parse and validate a model reply body.
pub fn parse_classification_reply(
    raw: &str,
) -> Result<ModelClassificationReply, ClassificationServiceError> {
    let body = strip_code_fence(raw);
    let reply: RawReply =
        serde_json::from_str(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;

    let category = parse_category("category", &reply.category)?;
    let confidence = check_confidence("confidence", reply.confidence)?;

    let secondary = match (reply.secondary_category, reply.secondary_confidence) {
        (None, None) => None,
        (Some(name), Some(conf)) => Some((
            parse_category("secondary_category", &name)?,
            check_confidence("secondary_confidence", conf)?,
        )),
        _ => {
            return Err(malformed(
                "secondary_category and secondary_confidence must appear together",
            ))
        }
    };

    let mut segments = BTreeMap::new();
    for (name, span) in reply.segments {
        let category = parse_category("segments", &name)?;
        if !span.trim().is_empty() {
            segments.insert(category, span);
        }
    }

    Ok(ModelClassificationReply {
        category,
        confidence,
        reasoning: reply.reasoning,
        key_indicators: reply.key_indicators,
        suggested_tags: reply.suggested_tags,
        secondary,
        segments,
    })
}

/// Classification backend seam.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(
        &self,
        request: &ModelClassificationRequest,
    ) -> Result<ModelClassificationReply, ClassificationServiceError>;
}

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You classify short personal notes into exactly one category.
Reply with a single JSON object and nothing else:
{
  "category": "<category name>",
  "confidence": <number between 0 and 1>,
  "reasoning": "<one sentence>",
  "key_indicators": ["<word or phrase>", ...],
  "suggested_tags": ["<tag>", ...],
  "secondary_category": "<category name, optional>",
  "secondary_confidence": <number between 0 and 1, optional>,
  "segments": {"<category name>": "<exact sub-span of the note>"}
}
Use "emotional" in suggested_tags when the note expresses feelings and
"recurring" when it describes something that keeps happening."#;

/// Classification service backed by an OpenAI-compatible chat endpoint.
pub struct ChatClassificationService {
    client: ChatClient,
}

impl ChatClassificationService {
    pub fn new(config: ModelEndpointConfig, timeout: Duration) -> Result<Self, ClassificationServiceError> {
        let client = ChatClient::new(config, timeout)
            .map_err(|e| ClassificationServiceError::RequestFailed(e.to_string()))?;
        Ok(Self { client })
    }

    fn build_user_prompt(request: &ModelClassificationRequest) -> String {
        let mut prompt = String::from("## Categories\n\n");
        for def in &request.categories {
            prompt.push_str(&format!("- {}: {}\n", def.name, def.definition));
        }
        if let Some(baseline) = request.baseline {
            prompt.push_str(&format!("\n## Rule-based guess\n\n{baseline}\n"));
        }
        prompt.push_str(&format!("\n## Note\n\n{}\n", request.text));
        prompt
    }
}

#[async_trait]
impl ClassificationService for ChatClassificationService {
    async fn classify(
        &self,
        request: &ModelClassificationRequest,
    ) -> Result<ModelClassificationReply, ClassificationServiceError> {
        let user_prompt = Self::build_user_prompt(request);
        let content = self
            .client
            .complete(CLASSIFY_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| match e {
                ChatError::Status { status, body } => {
                    ClassificationServiceError::BadStatus { status, body }
                }
                ChatError::EmptyReply => malformed("empty reply"),
                ChatError::Decode(reason) => malformed(reason),
                other => ClassificationServiceError::RequestFailed(other.to_string()),
            })?;
        parse_classification_reply(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "category": "work",
        "confidence": 0.8,
        "reasoning": "mentions a deadline",
        "key_indicators": ["deadline"],
        "suggested_tags": ["work"]
    }"#;

    #[test]
    fn test_parse_minimal_reply() {
        let reply = parse_classification_reply(VALID).unwrap();
        assert_eq!(reply.category, Category::Work);
        assert_eq!(reply.confidence, 0.8);
        assert!(reply.secondary.is_none());
        assert!(reply.segments.is_empty());
    }

    #[test]
    fn test_parse_fenced_reply_with_secondary_and_segments() {
        let raw = r#"```json
{"category": "health", "confidence": 0.7, "reasoning": "r",
 "key_indicators": [], "suggested_tags": ["emotional"],
 "secondary_category": "finance", "secondary_confidence": 0.45,
 "segments": {"finance": "paid $80 copay", "health": "  "}}
```"#;
        let reply = parse_classification_reply(raw).unwrap();
        assert_eq!(reply.secondary, Some((Category::Finance, 0.45)));
        assert_eq!(reply.segments.len(), 1);
        assert_eq!(reply.segments[&Category::Finance], "paid $80 copay");
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let raw = r#"{"category": "work", "confidence": 0.8}"#;
        let err = parse_classification_reply(raw).unwrap_err();
        assert!(matches!(err, ClassificationServiceError::MalformedReply(_)));
    }

    #[test]
    fn test_extra_keys_are_ignored() {
        let raw = VALID.replace("\"reasoning\"", "\"model\": \"local\", \"reasoning\"");
        assert_eq!(parse_classification_reply(&raw).unwrap().category, Category::Work);
    }

    #[test]
    fn test_out_of_range_confidence_is_malformed() {
        let raw = VALID.replace("0.8", "1.7");
        assert!(parse_classification_reply(&raw).is_err());
    }

    #[test]
    fn test_unknown_category_is_malformed() {
        let raw = VALID.replace("\"work\",", "\"gardening\",");
        let err = parse_classification_reply(&raw).unwrap_err();
        assert!(err.to_string().contains("gardening"));
    }

    #[test]
    fn test_half_secondary_is_malformed() {
        let raw = VALID.replace("\"reasoning\"", "\"secondary_category\": \"ideas\", \"reasoning\"");
        assert!(parse_classification_reply(&raw).is_err());
    }

    #[test]
    fn test_prose_reply_is_malformed() {
        let err = parse_classification_reply("I think this is about work.").unwrap_err();
        assert!(matches!(err, ClassificationServiceError::MalformedReply(_)));
    }

    #[test]
    fn test_user_prompt_includes_baseline_and_definitions() {
        let request = ModelClassificationRequest {
            text: "budget review".into(),
            baseline: Some(Category::Finance),
            categories: CategoryDefinition::all(),
        };
        let prompt = ChatClassificationService::build_user_prompt(&request);
        assert!(prompt.contains("## Rule-based guess\n\nfinance"));
        assert!(prompt.contains("- ideas: "));
        assert!(prompt.ends_with("budget review\n"));
    }
}
