// ── Switchyard: OpenAI-Shaped Adapter ──────────────────────────────────────
// The default wire format: co-located and LAN inference servers, OpenAI
// itself, and every compatible gateway. Chunks already arrive in the
// normalized shape, so translation is a straight JSON parse.

use super::{
    backend_client, chunk_channel, error_from_response, single_chunk_stream, spawn_sse_reader,
    BackendAdapter, StreamResponse,
};
use crate::error::ProviderError;
use crate::store::ModelRecord;
use crate::types::{ChatChunk, ChatRequest, ChunkChoice, ChunkDelta, TokenUsage};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde_json::{json, Value};

pub struct OpenAiAdapter {
    client: Client,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        OpenAiAdapter { client: backend_client() }
    }

    fn build_body(model: &ModelRecord, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": model.api_model_name(),
            "messages": request.messages.clone().unwrap_or(Value::Array(vec![])),
            "stream": stream,
            "max_tokens": request.max_tokens.unwrap_or(model.max_output_tokens),
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = request.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = stop.clone();
        }
        body
    }

    /// Parse one `data:` payload into a chunk. Unparseable payloads are
    /// skipped rather than killing the stream.
    fn parse_chunk(data: &str) -> Option<ChatChunk> {
        match serde_json::from_str::<ChatChunk>(data) {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                warn!("[openai] Skipping unparseable stream payload: {e}");
                None
            }
        }
    }

    /// Synthesize the single chunk for a non-streaming completion.
    fn chunk_from_completion(model: &ModelRecord, payload: &Value) -> ChatChunk {
        let choice = &payload["choices"][0];
        let mut chunk = ChatChunk::new(
            payload["id"].as_str().unwrap_or("chatcmpl-0"),
            payload["model"].as_str().unwrap_or(model.api_model_name()),
        );
        if let Some(created) = payload["created"].as_i64() {
            chunk.created = created;
        }
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: Some("assistant".into()),
                content: choice["message"]["content"].as_str().map(str::to_string),
            },
            finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        });
        chunk.usage = usage_from_value(&payload["usage"]);
        chunk
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn usage_from_value(usage: &Value) -> Option<TokenUsage> {
    let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0);
    let completion = usage["completion_tokens"].as_u64().unwrap_or(0);
    if prompt == 0 && completion == 0 {
        return None;
    }
    Some(TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(prompt + completion),
    })
}

#[async_trait]
impl BackendAdapter for OpenAiAdapter {
    async fn send(&self, model: &ModelRecord, request: &ChatRequest) -> Result<StreamResponse, ProviderError> {
        let url = format!("{}/chat/completions", model.endpoint.trim_end_matches('/'));
        let stream = request.wants_stream();
        let body = Self::build_body(model, request, stream);

        debug!("[openai] POST {url} model={}", model.api_model_name());

        let mut req = self.client.post(&url).header("Content-Type", "application/json");
        // Bearer auth only when the record names a credential that
        // resolves non-empty; local and LAN backends run open.
        if let Some(key) = model.resolve_api_key() {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req.json(&body).send().await.map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        if stream {
            let (tx, rx) = chunk_channel();
            let reader = spawn_sse_reader(response, tx, Self::parse_chunk);
            Ok(StreamResponse::new(model.clone(), rx, reader))
        } else {
            let payload: Value = response.json().await.map_err(ProviderError::from_reqwest)?;
            let chunk = Self::chunk_from_completion(model, &payload);
            Ok(single_chunk_stream(model.clone(), chunk))
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
