//! Classification property tests: confidence bounds and ranking across
//! varied inputs.
//!
//! Tests verify:
//! - Every confidence (primary and secondary) lies in [0, 1]
//! - No secondary outranks the primary
//! - Secondaries are ordered highest first
//! - The rule fallback is deterministic

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use triage_coordination::classifier::{ModelClassificationReply, ModelClassificationRequest};
use triage_coordination::config::ClassifierConfig;
use triage_coordination::{
    Category, ClassificationResult, ClassificationService, ClassificationServiceError,
    ContentClassifier,
};

/// Varied note bodies: empty, punctuation, long, every category, mixed, and
/// pattern hits.
fn corpus() -> Vec<String> {
    let mut texts: Vec<String> = [
        "",
        "   \n\t ",
        "?!... ;; -- ###",
        "gym rent",
        "Standup moved, client deadline, sprint release, manager wants the roadmap",
        "Dinner with family and my sister's birthday this weekend",
        "Headache again, slept 5 hours of sleep, doctor says less stress",
        "Paid $1200 rent, credit card bill and the tax invoice",
        "TIL how to read a chapter a day; course on a new language",
        "What if we could build a side project prototype for the startup idea",
        "Paid the rent, then the gym; feeling stressed about the project deadline",
        "meeting family gym budget course idea",
        "I feel anxious every night, looking back it keeps happening, urgent",
        "€50 £20 $3 and 200mg twice, 10 km run, Q3 planning",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    texts.push("meeting deadline client ".repeat(2_000));
    texts.push("a".repeat(50_000));
    texts
}

fn assert_bounded_and_ranked(result: &ClassificationResult, context: &str) {
    assert!(
        (0.0..=1.0).contains(&result.confidence),
        "{context}: primary confidence out of range: {}",
        result.confidence
    );
    for secondary in &result.secondary {
        assert!(
            (0.0..=1.0).contains(&secondary.confidence),
            "{context}: secondary {} out of range: {}",
            secondary.category,
            secondary.confidence
        );
        assert!(
            secondary.confidence <= result.confidence,
            "{context}: secondary {} ({}) outranks primary {} ({})",
            secondary.category,
            secondary.confidence,
            result.primary,
            result.confidence
        );
        assert_ne!(secondary.category, result.primary, "{context}: primary listed as secondary");
    }
    for pair in result.secondary.windows(2) {
        assert!(
            pair[0].confidence >= pair[1].confidence,
            "{context}: secondaries not ordered"
        );
    }
}

/// Replies with a fixed, already-validated structure.
struct FixedReply {
    reply: ModelClassificationReply,
}

#[async_trait]
impl ClassificationService for FixedReply {
    async fn classify(
        &self,
        _request: &ModelClassificationRequest,
    ) -> Result<ModelClassificationReply, ClassificationServiceError> {
        Ok(self.reply.clone())
    }
}

struct Refusing;

#[async_trait]
impl ClassificationService for Refusing {
    async fn classify(
        &self,
        _request: &ModelClassificationRequest,
    ) -> Result<ModelClassificationReply, ClassificationServiceError> {
        Err(ClassificationServiceError::RequestFailed("connection refused".into()))
    }
}

fn reply(
    category: Category,
    confidence: f64,
    secondary: Option<(Category, f64)>,
) -> ModelClassificationReply {
    ModelClassificationReply {
        category,
        confidence,
        reasoning: "scripted".into(),
        key_indicators: vec![],
        suggested_tags: vec![],
        secondary,
        segments: BTreeMap::new(),
    }
}

/// Edge-case replies: extreme confidences, a secondary equal to the primary,
/// and a secondary far above the primary.
fn edge_replies() -> Vec<ModelClassificationReply> {
    let mut replies = Vec::new();
    for category in Category::ALL {
        let other = Category::ALL[(category.index() + 1) % Category::ALL.len()];
        replies.push(reply(category, 0.0, None));
        replies.push(reply(category, 1.0, None));
        replies.push(reply(category, 0.5, Some((category, 1.0))));
        replies.push(reply(category, 0.0, Some((other, 1.0))));
        replies.push(reply(category, 1.0, Some((other, 1.0))));
    }
    replies
}

// ── Property: rule fallback stays bounded and ranked ───────────────

#[tokio::test]
async fn prop_fallback_confidences_bounded() {
    let rules_only = ContentClassifier::new(ClassifierConfig::default());
    let refused =
        ContentClassifier::new(ClassifierConfig::default()).with_service(Arc::new(Refusing));

    for (i, text) in corpus().iter().enumerate() {
        for (name, classifier) in [("rules_only", &rules_only), ("refused", &refused)] {
            let result = classifier.classify(text, None).await;
            assert!(result.is_fallback(), "text #{i}: expected fallback");
            assert!(result.confidence <= ClassifierConfig::default().fallback_cap);
            assert_bounded_and_ranked(&result, &format!("{name} text #{i}"));
        }
    }
}

// ── Property: fused results stay bounded and ranked ────────────────

#[tokio::test]
async fn prop_fused_confidences_bounded() {
    let texts = corpus();
    for (r, model_reply) in edge_replies().into_iter().enumerate() {
        let classifier = ContentClassifier::new(ClassifierConfig::default())
            .with_service(Arc::new(FixedReply { reply: model_reply }));
        for (i, text) in texts.iter().enumerate() {
            let result = classifier.classify(text, None).await;
            assert_bounded_and_ranked(&result, &format!("reply #{r} text #{i}"));
        }
    }
}

// ── Property: hinted results stay bounded ──────────────────────────

#[tokio::test]
async fn prop_hinted_confidences_bounded() {
    let classifier = ContentClassifier::new(ClassifierConfig::default());
    let hints = [
        "work",
        "journal/2024/05.md",
        "fitness:log",
        "\\money\\receipts",
        "study/notes",
        "brainstorm",
        "unmapped/folder",
        "",
    ];
    for (i, text) in corpus().iter().enumerate() {
        for hint in hints {
            let result = classifier.classify(text, Some(hint)).await;
            assert_bounded_and_ranked(&result, &format!("hint '{hint}' text #{i}"));
        }
    }
}

// ── Property: fallback is deterministic ────────────────────────────

#[tokio::test]
async fn prop_fallback_deterministic() {
    let classifier = ContentClassifier::new(ClassifierConfig::default());
    for text in corpus() {
        let a = classifier.classify(&text, None).await;
        let b = classifier.classify(&text, None).await;
        assert_eq!(a, b);
    }
}
