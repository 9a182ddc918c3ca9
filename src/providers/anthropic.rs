// ── Switchyard: Anthropic-Shaped Adapter ───────────────────────────────────
// Translates to the Messages API and normalizes its event stream back
// into OpenAI-shaped chunks. All Anthropic-specific wire knowledge lives
// here: system-prompt hoisting, role coercion, the published-name table,
// and the event-type mapping.

use super::{
    backend_client, chunk_channel, error_from_response, single_chunk_stream, spawn_sse_reader,
    BackendAdapter, StreamResponse,
};
use crate::error::ProviderError;
use crate::store::ModelRecord;
use crate::types::{ChatChunk, ChatRequest, ChunkChoice, ChunkDelta, TokenUsage};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

/// Internal model name → published API name. Unmapped names pass through.
const MODEL_NAME_MAP: &[(&str, &str)] = &[
    ("claude-sonnet-4", "claude-sonnet-4-20250514"),
    ("claude-haiku-3-5", "claude-3-5-haiku-20241022"),
    ("claude-opus-4", "claude-opus-4-20250514"),
];

pub struct AnthropicAdapter {
    client: Client,
    version: String,
}

impl AnthropicAdapter {
    pub fn new(version: impl Into<String>) -> Self {
        AnthropicAdapter { client: backend_client(), version: version.into() }
    }

    fn published_name(internal: &str) -> &str {
        MODEL_NAME_MAP
            .iter()
            .find(|(from, _)| *from == internal)
            .map(|(_, to)| *to)
            .unwrap_or(internal)
    }

    /// Hoist system messages into the top-level `system` field; keep
    /// assistant turns, coerce every other role to `user`.
    fn format_messages(request: &ChatRequest) -> (Option<String>, Vec<Value>) {
        let mut system_parts = Vec::new();
        let mut formatted = Vec::new();

        for msg in request.message_list() {
            if msg.role == "system" {
                system_parts.push(msg.text().to_string());
                continue;
            }
            let role = if msg.role == "assistant" { "assistant" } else { "user" };
            formatted.push(json!({"role": role, "content": msg.text()}));
        }

        let system = if system_parts.is_empty() { None } else { Some(system_parts.join("\n")) };
        (system, formatted)
    }

    fn build_body(model: &ModelRecord, request: &ChatRequest, stream: bool) -> Value {
        let (system, messages) = Self::format_messages(request);
        let mut body = json!({
            "model": Self::published_name(model.api_model_name()),
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(model.max_output_tokens),
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = request.top_p {
            body["top_p"] = json!(p);
        }
        match &request.stop {
            Some(Value::String(s)) => body["stop_sequences"] = json!([s]),
            Some(Value::Array(seq)) => body["stop_sequences"] = json!(seq),
            _ => {}
        }
        body
    }

    fn map_stop_reason(reason: Option<&str>) -> &'static str {
        match reason {
            Some("max_tokens") => "length",
            // end_turn, stop_sequence, and anything new all read as stop.
            _ => "stop",
        }
    }

    /// Single chunk for a non-streaming Messages response: text blocks
    /// joined, stop reason mapped, usage carried over.
    fn chunk_from_message(model: &ModelRecord, chunk_id: &str, payload: &Value) -> ChatChunk {
        let text: String = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"].as_str() == Some("text"))
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let mut chunk = ChatChunk::new(chunk_id, model.id.clone());
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta { role: Some("assistant".into()), content: Some(text) },
            finish_reason: Some(Self::map_stop_reason(payload["stop_reason"].as_str()).into()),
        });
        chunk.usage = anthropic_usage(&payload["usage"], 0);
        chunk
    }
}

fn anthropic_usage(usage: &Value, carried_input: u64) -> Option<TokenUsage> {
    let input = usage["input_tokens"].as_u64().unwrap_or(carried_input);
    let output = usage["output_tokens"].as_u64().unwrap_or(0);
    if input == 0 && output == 0 {
        return None;
    }
    Some(TokenUsage { prompt_tokens: input, completion_tokens: output, total_tokens: input + output })
}

/// Stateful event translator for one stream: remembers the input-token
/// count from `message_start` so the usage emitted at `message_delta` is
/// complete.
pub(crate) struct EventTranslator {
    chunk_id: String,
    model_id: String,
    input_tokens: u64,
}

impl EventTranslator {
    pub fn new(chunk_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        EventTranslator { chunk_id: chunk_id.into(), model_id: model_id.into(), input_tokens: 0 }
    }

    fn base_chunk(&self) -> ChatChunk {
        ChatChunk::new(self.chunk_id.clone(), self.model_id.clone())
    }

    /// Map one event payload to at most one normalized chunk. Event
    /// types outside the mapping are skipped.
    pub fn translate(&mut self, data: &str) -> Option<ChatChunk> {
        let event: Value = serde_json::from_str(data).ok()?;
        match event["type"].as_str()? {
            "message_start" => {
                self.input_tokens = event["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0);
                let mut chunk = self.base_chunk();
                chunk.choices.push(ChunkChoice {
                    index: 0,
                    delta: ChunkDelta { role: Some("assistant".into()), content: None },
                    finish_reason: None,
                });
                Some(chunk)
            }
            "content_block_delta" => {
                let text = event["delta"]["text"].as_str().unwrap_or("");
                if text.is_empty() {
                    return None;
                }
                let mut chunk = self.base_chunk();
                chunk.choices.push(ChunkChoice {
                    index: 0,
                    delta: ChunkDelta { role: None, content: Some(text.to_string()) },
                    finish_reason: None,
                });
                Some(chunk)
            }
            "message_delta" => {
                let mut chunk = self.base_chunk();
                chunk.choices.push(ChunkChoice {
                    index: 0,
                    delta: ChunkDelta::default(),
                    finish_reason: Some(
                        AnthropicAdapter::map_stop_reason(event["delta"]["stop_reason"].as_str()).into(),
                    ),
                });
                chunk.usage = anthropic_usage(&event["usage"], self.input_tokens);
                Some(chunk)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl BackendAdapter for AnthropicAdapter {
    async fn send(&self, model: &ModelRecord, request: &ChatRequest) -> Result<StreamResponse, ProviderError> {
        // Unlike the OpenAI shape, this API never runs open.
        let api_key = model.resolve_api_key().ok_or_else(|| {
            ProviderError::MissingCredential(format!(
                "{} requires {}",
                model.id,
                model.api_key_env.as_deref().unwrap_or("an API key env var")
            ))
        })?;

        let url = format!("{}/messages", model.endpoint.trim_end_matches('/'));
        let stream = request.wants_stream();
        let body = Self::build_body(model, request, stream);

        debug!("[anthropic] POST {url} model={}", body["model"].as_str().unwrap_or("?"));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.version)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let chunk_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        if stream {
            let mut translator = EventTranslator::new(chunk_id, model.id.clone());
            let (tx, rx) = chunk_channel();
            let reader = spawn_sse_reader(response, tx, move |data| translator.translate(data));
            Ok(StreamResponse::new(model.clone(), rx, reader))
        } else {
            let payload: Value = response.json().await.map_err(ProviderError::from_reqwest)?;
            let chunk = Self::chunk_from_message(model, &chunk_id, &payload);
            Ok(single_chunk_stream(model.clone(), chunk))
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
