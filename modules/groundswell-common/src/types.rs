use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Dimension of the embedding vectors produced by the embedding model.
pub const EMBEDDING_DIM: usize = 1536;

// --- Raw posts ---

/// An ingested but un-enriched post from a source forum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    /// Globally unique within the source (e.g. a Reddit fullname like `t3_abc123`).
    pub id: String,
    pub source: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub score: i64,
    pub url: String,
    /// Sub-community the post came from (e.g. a subreddit name).
    pub sub_source: String,
    /// Unix seconds.
    pub created_at: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RawPost {
    /// Title and body joined for text analysis and embedding.
    pub fn content(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

// --- Enrichment enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Unprocessed,
    Processing,
    Processed,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Unprocessed => "unprocessed",
            PostStatus::Processing => "processing",
            PostStatus::Processed => "processed",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unprocessed" => Some(PostStatus::Unprocessed),
            "processing" => Some(PostStatus::Processing),
            "processed" => Some(PostStatus::Processed),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Bug,
    FeatureRequest,
    Question,
    Discussion,
    Documentation,
    Other,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Bug => "bug",
            Classification::FeatureRequest => "feature_request",
            Classification::Question => "question",
            Classification::Discussion => "discussion",
            Classification::Documentation => "documentation",
            Classification::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bug" => Some(Classification::Bug),
            "feature_request" => Some(Classification::FeatureRequest),
            "question" => Some(Classification::Question),
            "discussion" => Some(Classification::Discussion),
            "documentation" => Some(Classification::Documentation),
            "other" => Some(Classification::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(SentimentLabel::Positive),
            "neutral" => Some(SentimentLabel::Neutral),
            "negative" => Some(SentimentLabel::Negative),
            _ => None,
        }
    }
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Enriched posts ---

/// A post after traversing (part of) the enrichment pipeline.
///
/// Fields written by a stage are set at most once per successful pipeline
/// execution; absent values mean the owning stage has not run or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedPost {
    pub post_id: String,
    pub status: PostStatus,
    pub is_spam: Option<bool>,
    pub has_pii: Option<bool>,
    pub moderation_notes: Option<String>,
    pub is_valid: Option<bool>,
    pub validity_reason: Option<String>,
    pub classification: Option<Classification>,
    pub classification_confidence: Option<f64>,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub sentiment_label: Option<SentimentLabel>,
    pub sentiment_score: Option<f64>,
    pub category_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Partial enrichment write produced by a single stage.
///
/// `None` fields are left untouched by the store, so each stage only ever
/// touches the columns it owns.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentUpdate {
    pub is_spam: Option<bool>,
    pub has_pii: Option<bool>,
    pub moderation_notes: Option<String>,
    pub is_valid: Option<bool>,
    pub validity_reason: Option<String>,
    pub classification: Option<Classification>,
    pub classification_confidence: Option<f64>,
    pub summary: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub embedding: Option<Vec<f32>>,
    pub sentiment_label: Option<SentimentLabel>,
    pub sentiment_score: Option<f64>,
    pub category_id: Option<i64>,
    pub cluster_id: Option<i64>,
}

// --- Mentions ---

/// Append-only record tying a processed post to its (cluster, category,
/// sentiment) at ingest time. Exactly one per successfully enriched post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub post_id: String,
    pub cluster_id: i64,
    pub category_id: i64,
    pub sentiment_score: f64,
    pub engagement_score: f64,
    pub mentioned_at: DateTime<Utc>,
}

// --- Derived problems ---

/// A sub-problem extracted from a post that itself becomes a virtual
/// enriched record with a synthetic `<orig>-Derived-<uuid>` id.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DerivedProblem {
    pub label: String,
    pub explanation: String,
    pub industry: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            PostStatus::Unprocessed,
            PostStatus::Processing,
            PostStatus::Processed,
            PostStatus::Failed,
        ] {
            assert_eq!(PostStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PostStatus::parse("bogus"), None);
    }

    #[test]
    fn classification_serde_uses_snake_case() {
        let json = serde_json::to_string(&Classification::FeatureRequest).unwrap();
        assert_eq!(json, "\"feature_request\"");
        assert_eq!(Classification::parse("feature_request"), Some(Classification::FeatureRequest));
    }

    #[test]
    fn raw_post_content_joins_title_and_body() {
        let post = RawPost {
            id: "t3_abc".into(),
            source: "reddit".into(),
            title: "title".into(),
            body: "body".into(),
            author: "a".into(),
            score: 1,
            url: String::new(),
            sub_source: "startups".into(),
            created_at: 0,
            metadata: serde_json::Value::Null,
        };
        assert_eq!(post.content(), "title\n\nbody");
    }
}
