//! Spam / PII screening: fixed ruleset OR'd with an LLM verdict.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use groundswell_common::EnrichmentUpdate;

use crate::llm::LlmError;
use crate::pipeline::PipelineDeps;
use crate::stage::{Stage, StageOutcome};
use crate::state::{PipelineState, SpamVerdict};

static SSN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn regex"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
});
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(?\b\d{3}\)?[-.\s]\d{3}[-.\s]?\d{4}\b").expect("phone regex"));
static CREDIT_CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").expect("card regex"));

/// Lowercase substrings that flag promotional spam.
const SPAM_INDICATORS: [&str; 12] = [
    "buy now",
    "click here",
    "free money",
    "limited time",
    "act now",
    "100% free",
    "no credit check",
    "make money fast",
    "work from home",
    "risk free",
    "winner winner",
    "congratulations you",
];

#[derive(Debug, Deserialize, JsonSchema)]
struct SpamLlmVerdict {
    is_spam: bool,
    has_pii: bool,
    notes: Option<String>,
}

pub struct SpamCheck;

/// Rule half of the verdict: PII regexes plus spam-indicator substrings.
fn rule_verdict(title: &str, body: &str) -> (bool, bool) {
    let text = format!("{title}\n{body}");
    let has_pii = SSN_RE.is_match(&text)
        || EMAIL_RE.is_match(&text)
        || PHONE_RE.is_match(&text)
        || CREDIT_CARD_RE.is_match(&text);

    let lowered = text.to_lowercase();
    let is_spam = SPAM_INDICATORS
        .iter()
        .any(|indicator| lowered.contains(indicator));

    (is_spam, has_pii)
}

#[async_trait]
impl Stage for SpamCheck {
    fn name(&self) -> &'static str {
        "spam_check"
    }

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome> {
        let (rule_spam, rule_pii) = rule_verdict(&state.raw.title, &state.raw.body);

        let system = "You are a content moderator for a product-feedback platform. \
                      Judge whether the post is promotional spam and whether it contains \
                      personally identifiable information (SSNs, emails, phone numbers, \
                      card numbers, home addresses).";
        let user = format!(
            "Title: {}\n\nBody: {}",
            state.raw.title, state.raw.body
        );

        let (verdict, tokens) = match deps.llm.structured::<SpamLlmVerdict>(system, &user).await {
            Ok((llm, tokens)) => (
                SpamVerdict {
                    is_spam: rule_spam || llm.is_spam,
                    has_pii: rule_pii || llm.has_pii,
                    notes: llm.notes,
                },
                tokens,
            ),
            // The rule-based half still applies when the model's answer is
            // unusable or the provider is down.
            Err(LlmError::Parse(e)) | Err(LlmError::Transport(e)) => {
                debug!(post_id = state.post_id(), error = e.as_str(), "Spam LLM unavailable, rules only");
                (
                    SpamVerdict {
                        is_spam: rule_spam,
                        has_pii: rule_pii,
                        notes: None,
                    },
                    0,
                )
            }
            Err(LlmError::Cancelled) => anyhow::bail!("cancelled"),
        };

        let output = serde_json::json!({
            "is_spam": verdict.is_spam,
            "has_pii": verdict.has_pii,
        });

        deps.posts
            .apply_update(
                state.post_id(),
                &EnrichmentUpdate {
                    is_spam: Some(verdict.is_spam),
                    has_pii: Some(verdict.has_pii),
                    moderation_notes: verdict.notes.clone(),
                    ..Default::default()
                },
            )
            .await?;

        state.spam = Some(verdict);
        Ok(StageOutcome::ok_with(output, tokens))
    }
}
