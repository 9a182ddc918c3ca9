// ── Switchyard: Tier-2 Classifier ──────────────────────────────────────────
// One call to a small co-located model that labels the request. The tier
// is strictly best-effort: any failure — network, non-2xx, empty content,
// unparseable output, out-of-whitelist values — degrades to known-good
// defaults and never surfaces an error to the router.

use crate::types::{truncate_utf8, ClassificationResult, Complexity, TASK_TYPES};
use log::{debug, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// The classifier only ever sees this much of the preview.
const PREVIEW_WINDOW_BYTES: usize = 500;

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

const SYSTEM_PROMPT: &str = "You label chat requests for a model router. \
Respond with a single JSON object and nothing else, no prose, no markdown: \
{\"complexity\": one of \"simple\"|\"medium\"|\"complex\"|\"reasoning\", \
\"task_type\": one of \"coding\"|\"math\"|\"reasoning\"|\"tool_use\"|\"summarization\"|\"extraction\"|\"simple_qa\"|\"conversation\"|\"classification\"|\"analysis\"|\"writing\"|\"multi_step\", \
\"estimated_tokens\": integer, \
\"sensitive\": boolean (true when the text contains credentials, personal data, or anything that must not leave the local network)}";

pub struct Classifier {
    client: Client,
    endpoint: String,
    model: String,
}

impl Classifier {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, model, DEFAULT_TIMEOUT_MS)
    }

    pub fn with_timeout(endpoint: impl Into<String>, model: impl Into<String>, timeout_ms: u64) -> Self {
        Classifier {
            client: Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Label a request preview. Infallible by contract.
    pub async fn classify(&self, preview: &str) -> ClassificationResult {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": format!(
                    "Classify this request:\n\n{}",
                    truncate_utf8(preview, PREVIEW_WINDOW_BYTES)
                )},
            ],
            "stream": false,
            "temperature": 0,
        });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("[classifier] Request failed, using defaults: {e}");
                return ClassificationResult::default();
            }
        };

        if !response.status().is_success() {
            warn!("[classifier] HTTP {} from classifier, using defaults", response.status().as_u16());
            return ClassificationResult::default();
        }

        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("[classifier] Unreadable response body, using defaults: {e}");
                return ClassificationResult::default();
            }
        };

        let content = payload["choices"][0]["message"]["content"].as_str().unwrap_or("");
        if content.trim().is_empty() {
            warn!("[classifier] Empty completion, using defaults");
            return ClassificationResult::default();
        }

        let result = parse_classification(content);
        debug!(
            "[classifier] {} / {} (~{} tokens, sensitive={})",
            result.complexity.as_str(),
            result.task_type,
            result.estimated_tokens,
            result.sensitive
        );
        result
    }
}

/// Parse raw classifier output into a clamped result. Defaults are
/// substituted per field, so one bad value never poisons the rest.
pub fn parse_classification(raw: &str) -> ClassificationResult {
    let stripped = strip_code_fence(raw);
    let parsed: Value = match serde_json::from_str(stripped) {
        Ok(v) => v,
        Err(_) => {
            warn!("[classifier] Unparseable output, using defaults");
            return ClassificationResult::default();
        }
    };

    let defaults = ClassificationResult::default();

    let complexity = parsed["complexity"]
        .as_str()
        .and_then(Complexity::parse)
        .unwrap_or(defaults.complexity);

    let task_type = parsed["task_type"]
        .as_str()
        .filter(|t| TASK_TYPES.contains(t))
        .map(str::to_string)
        .unwrap_or(defaults.task_type);

    let estimated_tokens = parsed["estimated_tokens"]
        .as_i64()
        .filter(|t| *t > 0)
        .unwrap_or(defaults.estimated_tokens);

    let sensitive = parsed["sensitive"].as_bool().unwrap_or(defaults.sensitive);

    ClassificationResult { complexity, task_type, estimated_tokens, sensitive }
}

/// Drop an optional ```/```json fence around the payload.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    inner.trim()
}

// ── Tests ──────────────────────────────────────────────────────────────────
