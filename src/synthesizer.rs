//! Answer synthesis with a deterministic fallback.
//!
//! The generation backend is never allowed to fail a search: if the answer
//! call errors or times out, an extractive answer is assembled from the top
//! retrieved items and marked `degraded`. Related-query suggestions are
//! likewise best-effort and collapse to an empty list on failure.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::embedding::classify_reqwest;
use crate::error::{BackendError, GenerationError};
use crate::prompt;
use crate::query_log::UsageSink;
use crate::types::{RetrievedItem, SynthesizedAnswer, TokenUsage, UsagePurpose, UsageRecord};

pub const FALLBACK_MODEL_ID: &str = "extractive-fallback";

/// Items used to build the extractive answer.
const FALLBACK_ITEMS: usize = 3;
const FALLBACK_BODY_CHARS: usize = 280;

/// Output budget for the related-queries call.
const RELATED_MAX_TOKENS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, GenerationError>;
}

// ============ OpenAI-compatible HTTP backend ============

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Calls `POST {endpoint}/chat/completions` with bearer auth.
pub struct HttpGenerationBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpGenerationBackend {
    pub fn new(client: reqwest::Client, endpoint: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, GenerationError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body }.into());
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(GenerationError::NoChoices)?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ChatCompletion { text, usage })
    }
}

// ============ Model table ============

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub context_window: usize,
    /// USD per 1K input tokens.
    pub input_rate: f64,
    /// USD per 1K output tokens.
    pub output_rate: f64,
}

const UNKNOWN_MODEL: ModelSpec = ModelSpec {
    context_window: 8_192,
    input_rate: 0.0,
    output_rate: 0.0,
};

static MODEL_SPECS: Lazy<HashMap<&'static str, ModelSpec>> = Lazy::new(|| {
    HashMap::from([
        ("gpt-4o", ModelSpec { context_window: 128_000, input_rate: 0.0025, output_rate: 0.01 }),
        ("gpt-4o-mini", ModelSpec { context_window: 128_000, input_rate: 0.00015, output_rate: 0.0006 }),
        ("gpt-4-turbo", ModelSpec { context_window: 128_000, input_rate: 0.01, output_rate: 0.03 }),
        ("gpt-4", ModelSpec { context_window: 8_192, input_rate: 0.03, output_rate: 0.06 }),
        ("gpt-3.5-turbo", ModelSpec { context_window: 16_385, input_rate: 0.0005, output_rate: 0.0015 }),
    ])
});

pub fn model_spec(model_id: &str) -> ModelSpec {
    MODEL_SPECS.get(model_id).copied().unwrap_or(UNKNOWN_MODEL)
}

/// `input/1000 * input_rate + output/1000 * output_rate`.
pub fn cost_usd(model_id: &str, usage: TokenUsage) -> f64 {
    let spec = model_spec(model_id);
    usage.input_tokens as f64 / 1000.0 * spec.input_rate
        + usage.output_tokens as f64 / 1000.0 * spec.output_rate
}

// ============ Synthesizer ============

/// Stateless between calls; safe to share behind an `Arc`.
pub struct AnswerSynthesizer {
    backend: Arc<dyn GenerationBackend>,
    usage_sink: Arc<dyn UsageSink>,
    sink_timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        usage_sink: Arc<dyn UsageSink>,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            usage_sink,
            sink_timeout,
        }
    }

    /// Produce an answer for `original_query` from `items`. Infallible:
    /// generation failures yield a degraded extractive answer instead.
    pub async fn synthesize(
        &self,
        original_query: &str,
        items: &[RetrievedItem],
        model_id: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> SynthesizedAnswer {
        let request = build_answer_request(original_query, items, model_id, temperature, max_tokens);
        let started = Instant::now();

        match self.backend.complete(&request).await {
            Ok(completion) if !completion.text.trim().is_empty() => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.record_usage(model_id, UsagePurpose::Answer, completion.usage, latency_ms)
                    .await;
                SynthesizedAnswer {
                    text: completion.text.trim().to_string(),
                    model_id: model_id.to_string(),
                    token_usage: completion.usage,
                    latency_ms,
                    degraded: false,
                }
            }
            Ok(_) => {
                log::warn!("generation backend returned an empty answer, using extractive fallback");
                extractive_answer(items, started.elapsed())
            }
            Err(e) => {
                log::warn!("generation failed, using extractive fallback: {:#}", e);
                extractive_answer(items, started.elapsed())
            }
        }
    }

    /// Up to `count` follow-up searches. Best-effort: any failure is logged
    /// and yields an empty list.
    pub async fn related_queries(
        &self,
        original_query: &str,
        items: &[RetrievedItem],
        model_id: &str,
        count: usize,
    ) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }

        let request = ChatRequest {
            model: model_id.to_string(),
            messages: vec![ChatMessage::user(prompt::related_queries_prompt(
                original_query,
                items,
                count,
            ))],
            temperature: 0.7,
            max_tokens: RELATED_MAX_TOKENS,
        };
        let started = Instant::now();

        match self.backend.complete(&request).await {
            Ok(completion) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.record_usage(model_id, UsagePurpose::RelatedQueries, completion.usage, latency_ms)
                    .await;
                prompt::parse_suggestions(&completion.text, original_query, count)
            }
            Err(e) => {
                log::warn!("related query generation failed, returning none: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn record_usage(&self, model_id: &str, purpose: UsagePurpose, usage: TokenUsage, latency_ms: u64) {
        let record = UsageRecord {
            model_id: model_id.to_string(),
            purpose,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: cost_usd(model_id, usage),
            latency_ms,
            timestamp: Utc::now(),
        };
        log::debug!(
            "{:?} call on {} used {} tokens (${:.6})",
            purpose,
            model_id,
            usage.total(),
            record.cost_usd
        );

        match tokio::time::timeout(self.sink_timeout, self.usage_sink.record(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("usage record dropped: {:#}", e),
            Err(_) => log::warn!("usage record dropped: sink timed out"),
        }
    }
}

/// System persona plus a user turn holding the (budget-trimmed) context and
/// the caller's original query.
pub fn build_answer_request(
    original_query: &str,
    items: &[RetrievedItem],
    model_id: &str,
    temperature: f32,
    max_tokens: u32,
) -> ChatRequest {
    let spec = model_spec(model_id);
    let overhead = prompt::estimate_tokens(prompt::SYSTEM_PERSONA)
        + prompt::estimate_tokens(&prompt::answer_user_message("", original_query));
    let budget = spec
        .context_window
        .saturating_sub(max_tokens as usize)
        .saturating_sub(overhead);

    let context = prompt::trim_to_budget(&prompt::build_context_block(items), budget);

    ChatRequest {
        model: model_id.to_string(),
        messages: vec![
            ChatMessage::system(prompt::SYSTEM_PERSONA),
            ChatMessage::user(prompt::answer_user_message(&context, original_query)),
        ],
        temperature,
        max_tokens,
    }
}

/// Deterministic answer listing the top retrieved items.
pub fn extractive_answer(items: &[RetrievedItem], elapsed: Duration) -> SynthesizedAnswer {
    let text = if items.is_empty() {
        "I couldn't find anything in our library that matches your question. \
         Try rephrasing it or ask an instructor at your next class."
            .to_string()
    } else {
        let mut text = String::from("Here is what I found in our library that matches your question:\n");
        for (i, item) in items.iter().take(FALLBACK_ITEMS).enumerate() {
            let title = if item.payload.title.is_empty() {
                format!("{} {}", item.origin_collection, item.id)
            } else {
                item.payload.title.clone()
            };
            let body = prompt::truncate_chars(&item.payload.body, FALLBACK_BODY_CHARS);
            if body.is_empty() {
                text.push_str(&format!("\n{}. {}", i + 1, title));
            } else {
                text.push_str(&format!("\n{}. {}: {}", i + 1, title, body));
            }
        }
        text
    };

    SynthesizedAnswer {
        text,
        model_id: FALLBACK_MODEL_ID.to_string(),
        token_usage: TokenUsage::default(),
        latency_ms: elapsed.as_millis() as u64,
        degraded: true,
    }
}

#[test]
fn test_cost_uses_rate_table() {
    let usage = TokenUsage {
        input_tokens: 2_000,
        output_tokens: 500,
    };
    let cost = cost_usd("gpt-4o", usage);
    assert!((cost - (2.0 * 0.0025 + 0.5 * 0.01)).abs() < 1e-12);
    assert_eq!(cost_usd("some-local-model", usage), 0.0);
}

#[test]
fn test_unknown_model_gets_default_window() {
    assert_eq!(model_spec("mystery").context_window, 8_192);
    assert_eq!(model_spec("gpt-4o-mini").context_window, 128_000);
}

#[test]
fn test_answer_request_carries_original_query() {
    let request = build_answer_request("How do I tie my BELT?", &[], "gpt-4o-mini", 0.2, 300);
    assert_eq!(request.messages.len(), 2);
    assert_eq!(request.messages[0].role, Role::System);
    assert!(request.messages[1].content.contains("How do I tie my BELT?"));
    assert_eq!(request.max_tokens, 300);
}
