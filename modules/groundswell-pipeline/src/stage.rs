//! The stage capability and the early-termination predicate.

use anyhow::Result;
use async_trait::async_trait;

use crate::pipeline::PipelineDeps;
use crate::state::PipelineState;

/// Outcome of one stage run. `success = false` is a captured failure: the
/// pipeline records it and keeps going. A store I/O failure is returned as
/// `Err` from `run` instead and fails the whole pipeline.
#[derive(Debug, Default)]
pub struct StageOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub tokens_used: u32,
    /// Truncated stage output for the audit trail.
    pub output: Option<serde_json::Value>,
}

impl StageOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn ok_with(output: serde_json::Value, tokens_used: u32) -> Self {
        Self {
            success: true,
            error: None,
            tokens_used,
            output: Some(output),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn failed_with_tokens(error: impl Into<String>, tokens_used: u32) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            tokens_used,
            output: None,
        }
    }
}

/// One enrichment step. Stages are small values; the pipeline is a fixed
/// list of them plus [`should_stop`].
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome>;
}

/// Early-termination rule: stop on spam or PII, and on an explicit
/// invalid verdict. A missing validity verdict (failed stage) does not
/// stop the pipeline.
pub fn should_stop(state: &PipelineState) -> bool {
    if let Some(spam) = &state.spam {
        if spam.is_spam || spam.has_pii {
            return true;
        }
    }
    if let Some(validity) = &state.validity {
        if !validity.is_valid {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SpamVerdict, ValidityVerdict};
    use groundswell_common::RawPost;

    fn state() -> PipelineState {
        PipelineState::new(RawPost {
            id: "t3_a".into(),
            source: "reddit".into(),
            title: "t".into(),
            body: "b".into(),
            author: "a".into(),
            score: 0,
            url: String::new(),
            sub_source: "s".into(),
            created_at: 0,
            metadata: serde_json::Value::Null,
        })
    }

    #[test]
    fn stops_on_spam_or_pii() {
        let mut s = state();
        s.spam = Some(SpamVerdict {
            is_spam: true,
            has_pii: false,
            notes: None,
        });
        assert!(should_stop(&s));

        s.spam = Some(SpamVerdict {
            is_spam: false,
            has_pii: true,
            notes: None,
        });
        assert!(should_stop(&s));
    }

    #[test]
    fn stops_on_invalid_verdict() {
        let mut s = state();
        s.validity = Some(ValidityVerdict {
            is_valid: false,
            reason: "too short".into(),
            derived_problems: Vec::new(),
        });
        assert!(should_stop(&s));
    }

    #[test]
    fn missing_verdicts_continue() {
        let s = state();
        assert!(!should_stop(&s));
    }

    #[test]
    fn clean_verdicts_continue() {
        let mut s = state();
        s.spam = Some(SpamVerdict::default());
        s.validity = Some(ValidityVerdict {
            is_valid: true,
            reason: "ok".into(),
            derived_problems: Vec::new(),
        });
        assert!(!should_stop(&s));
    }
}
