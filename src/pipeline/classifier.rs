//! Task classifier: one LLM call per email, returning summary, urgency and category.
//!
//! The prompt carries subject, sender, a flattened body and a line of keyword
//! signals. The model is asked for one JSON object; anything else is a
//! `ClassificationError` and the caller skips the message.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ClassificationError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::MailMessage;
use crate::pipeline::sanitize::prepare_prompt_body;
use crate::tasks::model::Urgency;

const CLASSIFIER_TEMPERATURE: f32 = 0.3;
const CLASSIFIER_MAX_TOKENS: u32 = 400;

/// Summaries longer than this are cut.
pub const SUMMARY_MAX_CHARS: usize = 300;

const DEFAULT_CATEGORY: &str = "GENERAL";

const URGENT_WORDS: &[&str] = &[
    "urgent",
    "urgente",
    "urgência",
    "urgencia",
    "asap",
    "immediately",
    "imediato",
    "imediatamente",
];

const SAME_DAY_WORDS: &[&str] = &[
    "today",
    "hoje",
    "tonight",
    "hoje à noite",
    "eod",
    "end of day",
    "fim do dia",
    "within 24h",
    "em 24h",
];

/// Outcome of one classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub summary: String,
    pub urgency: Urgency,
    pub category: String,
    pub confidence: Option<f64>,
}

/// Keyword signals computed before the LLM call.
///
/// Heuristic; the model sees them in the prompt and `classify` uses them to
/// escalate an explicit same-day urgent request the model under-rated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrgencySignals {
    /// "urgent", "urgente", "asap", "imediato", ...
    pub explicit_urgency: bool,
    /// "today", "hoje", "eod", ...
    pub same_day_deadline: bool,
}

impl UrgencySignals {
    pub fn analyze(subject: Option<&str>, body: &str) -> Self {
        let haystack = format!("{} {}", subject.unwrap_or_default(), body).to_lowercase();
        let words: Vec<&str> = haystack
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let matches = |needles: &[&str]| {
            needles.iter().any(|needle| {
                if needle.contains(' ') {
                    haystack.contains(needle)
                } else {
                    words.contains(needle)
                }
            })
        };

        Self {
            explicit_urgency: matches(URGENT_WORDS),
            same_day_deadline: matches(SAME_DAY_WORDS),
        }
    }

    /// Urgency language plus a same-day deadline.
    pub fn forces_urgent(&self) -> bool {
        self.explicit_urgency && self.same_day_deadline
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.explicit_urgency {
            parts.push("explicit urgency language");
        }
        if self.same_day_deadline {
            parts.push("same-day deadline");
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Wire shape of the model's JSON object. Portuguese keys are accepted for
/// prompts tuned in that language.
#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default, alias = "resumo_tarefa", alias = "resumo")]
    summary: Option<String>,
    #[serde(default, alias = "urgencia", alias = "nivel_urgencia")]
    urgency: Option<String>,
    #[serde(default, alias = "categoria_sugerida", alias = "categoria")]
    category: Option<String>,
    #[serde(default, alias = "confianca")]
    confidence: Option<f64>,
}

/// Turns an email into a task description via an `LlmProvider`.
pub struct TaskClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl TaskClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn classify(
        &self,
        message: &MailMessage,
    ) -> Result<ClassificationResult, ClassificationError> {
        let body = prepare_prompt_body(&message.body);
        let signals = UrgencySignals::analyze(message.subject.as_deref(), &body);

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(message, &body, &signals)),
        ])
        .with_temperature(CLASSIFIER_TEMPERATURE)
        .with_max_tokens(CLASSIFIER_MAX_TOKENS)
        .with_json_output();

        let response = self.llm.complete(request).await?;
        let mut result = parse_classification(&response.content).inspect_err(|e| {
            warn!(
                message_id = %message.id,
                error = %e,
                "Classifier output rejected"
            );
        })?;

        if signals.forces_urgent() && result.urgency != Urgency::Urgent {
            debug!(
                message_id = %message.id,
                model_urgency = %result.urgency,
                "Escalating to URGENT on same-day urgent request"
            );
            result.urgency = Urgency::Urgent;
        }

        debug!(
            message_id = %message.id,
            urgency = %result.urgency,
            category = %result.category,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Message classified"
        );
        Ok(result)
    }
}

fn build_system_prompt() -> String {
    format!(
        r#"You turn operational emails into short task cards for a logistics team.

Reply with ONE JSON object and nothing else:
{{"summary": "...", "urgency": "URGENT|MEDIUM|ROUTINE", "category": "...", "confidence": 0.0-1.0}}

## summary
Telegraphic bullet lines, at most {SUMMARY_MAX_CHARS} characters in total:
- Route: origin → destination (omit if none)
- Load: quantities and units; when several values appear, also give the total
- Action: the immediate thing someone has to do
No greetings, no restating the subject.

## urgency
- URGENT: deadline within 24 hours, or explicit urgency words ("urgent", "urgente", "imediato", "hoje", "today", "asap")
- MEDIUM: deadline in 1 to 3 days, or clearly important but not immediate
- ROUTINE: no explicit deadline, administrative or informational content

## category
One upper-case word such as OPERATIONS, FINANCE, HR, SALES, SUPPORT, COMPLIANCE, GENERAL.

## confidence
Your confidence in the urgency and category, from 0.0 to 1.0."#
    )
}

fn build_user_prompt(message: &MailMessage, body: &str, signals: &UrgencySignals) -> String {
    let from = match (&message.from_name, &message.from_address) {
        (Some(name), Some(addr)) => format!("{name} <{addr}>"),
        (None, Some(addr)) => addr.clone(),
        (Some(name), None) => name.clone(),
        (None, None) => "unknown".to_string(),
    };

    format!(
        "Subject: {}\nFrom: {}\nReceived: {}\nSignals: {}\n\nBody:\n{}",
        message.subject.as_deref().unwrap_or("(no subject)"),
        from,
        message.received_at.to_rfc3339(),
        signals.describe(),
        body,
    )
}

fn parse_classification(text: &str) -> Result<ClassificationResult, ClassificationError> {
    let raw: RawClassification = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ClassificationError::Parse(format!("{e}")))?;

    let summary = raw
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ClassificationError::MissingSummary)?;
    let summary = if summary.chars().count() > SUMMARY_MAX_CHARS {
        summary.chars().take(SUMMARY_MAX_CHARS).collect()
    } else {
        summary
    };

    let urgency = match raw.urgency.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => value.parse().unwrap_or_else(|_| {
            warn!(urgency = value, "Unknown urgency level, using ROUTINE");
            Urgency::Routine
        }),
        _ => Urgency::Routine,
    };

    let category = raw
        .category
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let confidence = raw.confidence.map(|c| c.clamp(0.0, 1.0));

    Ok(ClassificationResult {
        summary,
        urgency,
        category,
        confidence,
    })
}

/// The JSON payload of a reply, with an optional ``` or ```json fence removed.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```")
        .map(|rest| rest.strip_prefix("json").unwrap_or(rest))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .map_or(trimmed, str::trim)
}
