//! Knowledge registration proposals and article construction.

use crate::config::RegistrationConfig;
use serde::{Deserialize, Serialize};

/// Publication status of a created article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    /// Saved but not visible to other workers.
    Draft,
    /// Visible to everyone.
    Published,
}

impl ArticleStatus {
    /// Wire / display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }
}

/// Candidate article extracted from a conversation by the analysis service.
///
/// Exists only while the orchestrator waits for the user's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistrationProposal {
    /// Article title.
    pub title: String,
    /// One-paragraph summary.
    pub summary: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Category as proposed (normalized on save).
    pub category: String,
    /// Risk level as proposed (normalized on save).
    pub risk_level: String,
    /// Article body.
    pub content: String,
}

/// Payload for the knowledge creation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewArticle {
    /// Article title.
    pub title: String,
    /// Category from the controlled vocabulary.
    pub category: String,
    /// Risk level from the controlled vocabulary.
    pub risk_level: String,
    /// Work type tag.
    pub work_type: String,
    /// Article body.
    pub content: String,
    /// Tags.
    pub tags: Vec<String>,
    /// Publication status.
    pub status: ArticleStatus,
}

/// A stored article as read back from the knowledge store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Article id.
    pub id: String,
    /// Article fields.
    #[serde(flatten)]
    pub fields: NewArticle,
}

/// Map `value` onto `vocabulary`, falling back to `default`.
///
/// Matching is case-insensitive and trims whitespace; `aliases` may map
/// localized labels onto vocabulary entries.
pub fn normalize_vocabulary(
    value: &str,
    vocabulary: &[String],
    aliases: &std::collections::BTreeMap<String, String>,
    default: &str,
) -> String {
    let wanted = value.trim().to_lowercase();
    if let Some(hit) = vocabulary.iter().find(|v| v.to_lowercase() == wanted) {
        return hit.clone();
    }
    if let Some(target) = aliases.get(value.trim())
        && let Some(hit) = vocabulary.iter().find(|v| *v == target)
    {
        return hit.clone();
    }
    default.to_owned()
}

impl RegistrationProposal {
    /// Build the article to create, normalizing category and risk level.
    pub fn to_article(&self, status: ArticleStatus, config: &RegistrationConfig) -> NewArticle {
        let category = normalize_vocabulary(
            &self.category,
            &config.categories,
            &config.aliases,
            &config.default_category,
        );
        let risk_level = normalize_vocabulary(
            &self.risk_level,
            &config.risk_levels,
            &config.aliases,
            &config.default_risk_level,
        );
        let content = if self.content.trim().is_empty() {
            self.summary.clone()
        } else {
            self.content.clone()
        };
        NewArticle {
            title: self.title.trim().to_owned(),
            category,
            risk_level,
            work_type: config.work_type.clone(),
            content,
            tags: self
                .tags
                .iter()
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .collect(),
            status,
        }
    }

    /// Whether the proposal carries enough to be worth asking about.
    pub fn is_usable(&self) -> bool {
        !self.title.trim().is_empty()
            && !(self.content.trim().is_empty() && self.summary.trim().is_empty())
    }

    /// Fill the `{title}` placeholder of a prompt template.
    pub fn prompt(&self, template: &str) -> String {
        template.replace("{title}", self.title.trim())
    }
}

/// Inline reference token for an article, resolvable by the presentation layer.
pub fn reference_token(id: &str) -> String {
    format!("[[knowledge:{id}]]")
}
