//! The closed set of semantic categories.

use serde::{Deserialize, Serialize};

/// Semantic bucket an input is routed to.
///
/// Declaration order is significant: it is the tie-break order whenever two
/// categories score the same.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Work,
    Personal,
    Health,
    Finance,
    Learning,
    Ideas,
}

impl Category {
    /// Every category, in tie-break order.
    pub const ALL: [Category; 6] = [
        Category::Work,
        Category::Personal,
        Category::Health,
        Category::Finance,
        Category::Learning,
        Category::Ideas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
            Self::Health => "health",
            Self::Finance => "finance",
            Self::Learning => "learning",
            Self::Ideas => "ideas",
        }
    }

    /// One-line definition sent to the model service.
    pub fn definition(&self) -> &'static str {
        match self {
            Self::Work => "Job tasks, meetings, projects, colleagues, deadlines and deployments",
            Self::Personal => "Family, friends, relationships, home life and personal events",
            Self::Health => "Physical and mental health, exercise, sleep, symptoms and treatment",
            Self::Finance => "Money, budgets, bills, income, spending, taxes and investments",
            Self::Learning => "Courses, books, studying, new skills and things learned",
            Self::Ideas => "Brainstorms, product or project ideas, inventions and what-ifs",
        }
    }

    /// Position in [`Category::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Resolve a name or alias (case-insensitive).
    pub fn from_alias(raw: &str) -> Option<Self> {
        let name = raw.trim().to_ascii_lowercase();
        let category = match name.as_str() {
            "work" | "job" | "office" | "career" => Self::Work,
            "personal" | "journal" | "diary" | "family" | "life" => Self::Personal,
            "health" | "fitness" | "medical" | "wellness" => Self::Health,
            "finance" | "money" | "budget" | "finances" => Self::Finance,
            "learning" | "study" | "course" | "reading" | "education" => Self::Learning,
            "ideas" | "idea" | "brainstorm" | "inspiration" => Self::Ideas,
            _ => return None,
        };
        Some(category)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_alias(s).ok_or_else(|| format!("unknown category '{s}'"))
    }
}
