//! Mutable state threaded through one post's stage sequence.

use groundswell_common::{Classification, DerivedProblem, RawPost, SentimentLabel};

/// SpamCheck outcome: rules OR LLM, combined.
#[derive(Debug, Clone, Default)]
pub struct SpamVerdict {
    pub is_spam: bool,
    pub has_pii: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidityVerdict {
    pub is_valid: bool,
    pub reason: String,
    pub derived_problems: Vec<DerivedProblem>,
}

#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub classification: Classification,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct SemanticOutcome {
    pub summary: String,
    pub keywords: Vec<String>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct SentimentOutcome {
    pub label: SentimentLabel,
    pub score: f64,
    pub confidence: f64,
}

/// Envelope recorded for every stage call, successful or not.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: &'static str,
    pub success: bool,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub tokens_used: u32,
}

/// Per-post pipeline state. Stages fill their own slot exactly once; later
/// stages read earlier slots and may find them absent after a failure.
#[derive(Debug)]
pub struct PipelineState {
    pub raw: RawPost,
    pub spam: Option<SpamVerdict>,
    pub validity: Option<ValidityVerdict>,
    pub classification: Option<ClassificationOutcome>,
    pub semantic: Option<SemanticOutcome>,
    pub sentiment: Option<SentimentOutcome>,
    pub category_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub cluster_created: bool,
    pub mention_recorded: bool,
    pub records: Vec<StageRecord>,
}

impl PipelineState {
    pub fn new(raw: RawPost) -> Self {
        Self {
            raw,
            spam: None,
            validity: None,
            classification: None,
            semantic: None,
            sentiment: None,
            category_id: None,
            cluster_id: None,
            cluster_created: false,
            mention_recorded: false,
            records: Vec::new(),
        }
    }

    pub fn post_id(&self) -> &str {
        &self.raw.id
    }

    /// Spawn the state for one derived problem, inheriting the parent's spam
    /// verdict.
    pub fn derive(&self, child: RawPost) -> Self {
        let mut state = Self::new(child);
        state.spam = self.spam.clone();
        state.validity = Some(ValidityVerdict {
            is_valid: true,
            reason: "Derived from parent post".to_string(),
            derived_problems: Vec::new(),
        });
        state
    }
}
