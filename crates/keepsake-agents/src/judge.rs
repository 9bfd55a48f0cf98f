//! Safety classification of conversation text.
//!
//! The judge asks a chat model for a one-word verdict and fails open: a
//! missing, empty or unreadable verdict, or a provider error, counts as safe.

use std::sync::{Arc, LazyLock};

use keepsake_common::{Message, Usage};
use regex::Regex;
use tracing::{debug, error, warn};

use crate::providers::{ChatMessage, ChatRole, LlmProvider, LlmRequest};

static UNSAFE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUNSAFE\b").expect("verdict regex should compile"));
static SAFE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSAFE\b").expect("verdict regex should compile"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgePolicy {
    pub prohibited_categories: Vec<String>,
    /// Replacement text shown when content is blocked.
    pub blocked_message: String,
}

impl JudgePolicy {
    pub fn from_config(config: &keepsake_config::JudgeConfig) -> Self {
        Self {
            prohibited_categories: config.prohibited_categories.clone(),
            blocked_message: config.blocked_message.clone(),
        }
    }

    fn instructions(&self) -> String {
        let mut prompt = String::from(
            "You are a content safety classifier. Decide whether the text you are given \
             is safe to show in a conversation with a vulnerable user.",
        );
        if !self.prohibited_categories.is_empty() {
            prompt.push_str("\nThe following categories are prohibited:\n");
            for category in &self.prohibited_categories {
                prompt.push_str("- ");
                prompt.push_str(category);
                prompt.push('\n');
            }
        }
        prompt.push_str("\nAnswer with exactly one word: SAFE or UNSAFE.");
        prompt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    Unsafe,
}

impl Verdict {
    pub fn is_safe(self) -> bool {
        matches!(self, Verdict::Safe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Judgement {
    pub verdict: Verdict,
    pub usage: Option<Usage>,
}

/// Read a verdict out of a classifier reply. `UNSAFE` wins over `SAFE`.
pub fn parse_verdict(reply: &str) -> Option<Verdict> {
    if UNSAFE_WORD.is_match(reply) {
        Some(Verdict::Unsafe)
    } else if SAFE_WORD.is_match(reply) {
        Some(Verdict::Safe)
    } else {
        None
    }
}

pub struct SafetyJudge {
    provider: Arc<dyn LlmProvider>,
    model: String,
    policy: JudgePolicy,
}

impl SafetyJudge {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, policy: JudgePolicy) -> Self {
        Self {
            provider,
            model: model.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &JudgePolicy {
        &self.policy
    }

    /// The assistant message that stands in for blocked content.
    pub fn blocked_message(&self) -> Message {
        Message::assistant(Some(self.policy.blocked_message.clone()), Vec::new()).released()
    }

    pub async fn evaluate(&self, text: &str) -> Judgement {
        if text.trim().is_empty() {
            warn!("judge received empty text, treating as safe");
            return Judgement {
                verdict: Verdict::Safe,
                usage: None,
            };
        }

        let request = LlmRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::text(ChatRole::User, text)],
            system: Some(self.policy.instructions()),
            max_tokens: Some(8),
            temperature: Some(0.0),
            tools: Vec::new(),
        };

        match self.provider.complete(&request).await {
            Ok(response) => {
                let reply = response.text();
                let verdict = match parse_verdict(&reply) {
                    Some(verdict) => verdict,
                    None => {
                        warn!(reply = %reply, "judge reply has no verdict, treating as safe");
                        Verdict::Safe
                    }
                };
                debug!(?verdict, "judge verdict");
                Judgement {
                    verdict,
                    usage: response.usage,
                }
            }
            Err(e) => {
                error!("judge invocation failed, treating as safe: {e}");
                Judgement {
                    verdict: Verdict::Safe,
                    usage: None,
                }
            }
        }
    }
}
