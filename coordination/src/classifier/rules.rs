//! Rule-based category scoring.
//!
//! Pure and deterministic: the same text always yields the same scores, which
//! is what makes the classifier's fallback path reproducible.
//!
//! ```text
//! keyword hit  → +0.1 (each distinct keyword once)
//! phrase hit   → +0.2 (each pattern once)
//! normalize    → score / Σ scores   (uniform when Σ = 0)
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::category::Category;

pub const KEYWORD_WEIGHT: f64 = 0.1;
pub const PHRASE_WEIGHT: f64 = 0.2;

/// Keyword list and phrase patterns for one category.
struct CategoryRules {
    category: Category,
    keywords: &'static [&'static str],
    phrases: Vec<Regex>,
}

/// A tag suggested by the rules independent of the winning category.
struct TagRule {
    tag: &'static str,
    keywords: &'static [&'static str],
    phrase: Regex,
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static classifier pattern should compile")
}

static CATEGORY_RULES: LazyLock<Vec<CategoryRules>> = LazyLock::new(|| {
    vec![
        CategoryRules {
            category: Category::Work,
            keywords: &[
                "meeting", "deadline", "deployed", "deploy", "project", "client", "manager",
                "sprint", "standup", "presentation", "colleague", "coworker", "boss", "office",
                "release", "stakeholder", "roadmap", "ticket",
            ],
            phrases: vec![
                compile(r"\b(action items?|follow[- ]up with|on[- ]call|pull request|performance review)\b"),
                compile(r"\bq[1-4]\s+(goals|planning|targets)\b"),
            ],
        },
        CategoryRules {
            category: Category::Personal,
            keywords: &[
                "family", "friend", "friends", "mom", "dad", "partner", "birthday", "wedding",
                "weekend", "kids", "vacation", "relationship", "dinner", "home", "anniversary",
            ],
            phrases: vec![
                compile(r"\b(date night|catch up with|my (wife|husband|son|daughter|sister|brother))\b"),
            ],
        },
        CategoryRules {
            category: Category::Health,
            keywords: &[
                "doctor", "workout", "gym", "sleep", "headache", "anxiety", "stress", "exercise",
                "diet", "medication", "therapy", "symptoms", "sick", "injury", "dentist",
            ],
            phrases: vec![
                compile(r"\b(blood pressure|heart rate|mental health|feel(ing)? (sick|exhausted|burned out))\b"),
                compile(r"\b\d+\s*(mg|km|miles|steps|hours of sleep)\b"),
            ],
        },
        CategoryRules {
            category: Category::Finance,
            keywords: &[
                "budget", "money", "invoice", "rent", "salary", "tax", "taxes", "investment",
                "savings", "expense", "expenses", "bank", "mortgage", "bill", "bills", "spent",
            ],
            phrases: vec![
                compile(r"[$€£]\s?\d+"),
                compile(r"\b(credit card|401k|emergency fund|pay(ing)? off)\b"),
            ],
        },
        CategoryRules {
            category: Category::Learning,
            keywords: &[
                "learn", "learned", "learning", "course", "book", "reading", "study", "lecture",
                "tutorial", "chapter", "practice", "skill", "language", "podcast",
            ],
            phrases: vec![compile(r"\b(til|today i learned|how to|deep dive into)\b")],
        },
        CategoryRules {
            category: Category::Ideas,
            keywords: &[
                "idea", "ideas", "brainstorm", "startup", "concept", "prototype", "invent",
                "imagine", "app", "pitch",
            ],
            phrases: vec![compile(r"\b(what if|could build|side project|wouldn't it be)\b")],
        },
    ]
});

static TAG_RULES: LazyLock<Vec<TagRule>> = LazyLock::new(|| {
    vec![
        TagRule {
            tag: "emotional",
            keywords: &[
                "anxious", "stressed", "sad", "angry", "overwhelmed", "excited", "frustrated",
                "lonely", "grateful", "upset", "worried", "scared", "happy",
            ],
            phrase: compile(r"\bi (feel|felt)\b"),
        },
        TagRule {
            tag: "recurring",
            keywords: &["again", "always", "habit", "routine", "daily", "weekly"],
            phrase: compile(r"\b(every (day|week|morning|night)|keeps? happening)\b"),
        },
        TagRule {
            tag: "reflection",
            keywords: &["reflect", "reflecting", "lesson", "realized", "hindsight"],
            phrase: compile(r"\blooking back\b"),
        },
        TagRule {
            tag: "urgent",
            keywords: &["urgent", "asap", "immediately", "critical"],
            phrase: compile(r"\bright away\b"),
        },
    ]
});

/// Score detail for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: Category,
    /// Weighted hits before normalization.
    pub raw: f64,
    /// Share of the total across categories.
    pub normalized: f64,
    /// Matched keywords and phrase fragments, in rule order.
    pub indicators: Vec<String>,
}

/// Scores for every category in [`Category::ALL`] order, plus rule tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScores {
    scores: Vec<CategoryScore>,
    tags: Vec<String>,
}

impl RuleScores {
    /// Normalized score of a category.
    pub fn get(&self, category: Category) -> f64 {
        self.scores[category.index()].normalized
    }

    pub fn detail(&self, category: Category) -> &CategoryScore {
        &self.scores[category.index()]
    }

    pub fn indicators(&self, category: Category) -> &[String] {
        &self.scores[category.index()].indicators
    }

    /// Whether any category rule matched.
    pub fn has_indicators(&self) -> bool {
        self.scores.iter().any(|s| !s.indicators.is_empty())
    }

    /// Highest normalized score; ties go to the earlier category.
    pub fn best(&self) -> Category {
        let mut best = &self.scores[0];
        for score in &self.scores[1..] {
            if score.normalized > best.normalized {
                best = score;
            }
        }
        best.category
    }

    /// All categories, highest score first, ties in enumeration order.
    pub fn ranked(&self) -> Vec<(Category, f64)> {
        let mut ranked: Vec<(Category, f64)> =
            self.scores.iter().map(|s| (s.category, s.normalized)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
    }

    pub fn as_map(&self) -> BTreeMap<Category, f64> {
        self.scores.iter().map(|s| (s.category, s.normalized)).collect()
    }

    /// Tags suggested by content patterns (e.g. "emotional", "recurring").
    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// Score `text` against every category's keyword and phrase rules.
pub fn score_rules(text: &str) -> RuleScores {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .collect();
    let has_token = |word: &str| tokens.iter().any(|t| *t == word);

    let mut scores: Vec<CategoryScore> = Vec::with_capacity(Category::ALL.len());
    for rules in CATEGORY_RULES.iter() {
        let mut indicators = Vec::new();
        let mut keyword_hits: u32 = 0;
        let mut phrase_hits: u32 = 0;

        for keyword in rules.keywords {
            if has_token(*keyword) {
                indicators.push((*keyword).to_string());
                keyword_hits += 1;
            }
        }
        for phrase in &rules.phrases {
            if let Some(m) = phrase.find(&lowered) {
                indicators.push(m.as_str().trim().to_string());
                phrase_hits += 1;
            }
        }

        scores.push(CategoryScore {
            category: rules.category,
            raw: f64::from(keyword_hits) * KEYWORD_WEIGHT + f64::from(phrase_hits) * PHRASE_WEIGHT,
            normalized: 0.0,
            indicators,
        });
    }

    let total: f64 = scores.iter().map(|s| s.raw).sum();
    let uniform = 1.0 / scores.len() as f64;
    for score in &mut scores {
        score.normalized = if total > 0.0 {
            score.raw / total
        } else {
            uniform
        };
    }

    let tags = TAG_RULES
        .iter()
        .filter(|rule| rule.keywords.iter().any(|k| has_token(*k)) || rule.phrase.is_match(&lowered))
        .map(|rule| rule.tag.to_string())
        .collect();

    debug!(total, "Rule scoring complete");
    RuleScores { scores, tags }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_table_covers_every_category_in_order() {
        let order: Vec<Category> = CATEGORY_RULES.iter().map(|r| r.category).collect();
        assert_eq!(order, Category::ALL.to_vec());
    }

    #[test]
    fn test_keyword_hits_dominate() {
        let scores = score_rules("Tomorrow's meeting moved before the deadline, so we deployed early.");
        assert_eq!(scores.best(), Category::Work);
        assert_eq!(scores.indicators(Category::Work), ["meeting", "deadline", "deployed"]);
        assert!((scores.detail(Category::Work).raw - 0.3).abs() < 1e-9);
        assert!((scores.get(Category::Work) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_phrase_weighs_double() {
        let scores = score_rules("what if we had a budget");
        // ideas: phrase (0.2); finance: keyword (0.1)
        assert!((scores.detail(Category::Ideas).raw - 0.2).abs() < 1e-9);
        assert!((scores.detail(Category::Finance).raw - 0.1).abs() < 1e-9);
        assert_eq!(scores.best(), Category::Ideas);
    }

    #[test]
    fn test_empty_text_is_uniform() {
        let scores = score_rules("");
        assert!(!scores.has_indicators());
        for category in Category::ALL {
            assert!((scores.get(category) - 1.0 / 6.0).abs() < 1e-9);
        }
        assert_eq!(scores.best(), Category::Work);
    }

    #[test]
    fn test_ties_resolve_by_enumeration_order() {
        // one keyword each for health and finance
        let scores = score_rules("gym rent");
        assert_eq!(scores.get(Category::Health), scores.get(Category::Finance));
        assert_eq!(scores.best(), Category::Health);
        let ranked = scores.ranked();
        assert_eq!(ranked[0].0, Category::Health);
        assert_eq!(ranked[1].0, Category::Finance);
    }

    #[test]
    fn test_normalized_scores_sum_to_one() {
        let scores = score_rules("Spent $40 at the gym after the client meeting, feeling stressed");
        let sum: f64 = scores.as_map().values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tags_detected() {
        let scores = score_rules("I feel overwhelmed, this keeps happening every week");
        assert_eq!(scores.tags(), ["emotional", "recurring"]);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let scores = score_rules("homework");
        assert!(scores.indicators(Category::Personal).is_empty());
    }
}
