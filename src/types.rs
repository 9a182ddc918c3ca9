// ── Switchyard: Wire Types ─────────────────────────────────────────────────
// Shapes shared across the HTTP surface, the routing pipeline, and the
// backend adapters. Everything that leaves or enters the process as JSON
// lives here; registry row types live in `store::`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Helpers ────────────────────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` without splitting a UTF-8
/// character. Returns a slice of the original.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ── Incoming chat request ──────────────────────────────────────────────────

/// One message of an OpenAI-shaped chat request. `content` stays a raw
/// `Value` so validation can distinguish string / null / structured and the
/// OpenAI adapter can pass it through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

impl ChatMessage {
    /// The message content as text, empty for null/structured content.
    pub fn text(&self) -> &str {
        self.content.as_str().unwrap_or("")
    }
}

/// Body of `POST /v1/chat/completions`. Unrecognized fields are dropped;
/// only the listed overrides travel onward to backends.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Value>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop: Option<Value>,
}

impl ChatRequest {
    /// Parsed messages. Valid only after `validate()` has passed.
    pub fn message_list(&self) -> Vec<ChatMessage> {
        let Some(Value::Array(items)) = &self.messages else {
            return Vec::new();
        };
        items
            .iter()
            .map(|m| ChatMessage {
                role: m.get("role").and_then(Value::as_str).unwrap_or("").to_string(),
                content: m.get("content").cloned().unwrap_or(Value::Null),
            })
            .collect()
    }

    /// Whether the client asked for a streamed response (the default).
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(true)
    }

    /// Reject syntactically invalid requests. Returns the message for a
    /// 400 `invalid_request_error` body.
    pub fn validate(&self) -> Result<(), String> {
        let Some(messages) = &self.messages else {
            return Err("'messages' is required".into());
        };
        let Value::Array(items) = messages else {
            return Err("'messages' must be an array".into());
        };
        if items.is_empty() {
            return Err("'messages' must contain at least one message".into());
        }
        for (i, m) in items.iter().enumerate() {
            let role = m.get("role").and_then(Value::as_str).unwrap_or("");
            if !matches!(role, "system" | "user" | "assistant") {
                return Err(format!("messages[{i}].role must be one of system, user, assistant"));
            }
            match m.get("content") {
                None | Some(Value::Null) | Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(format!("messages[{i}].content must be a string or null"));
                }
            }
        }
        if let Some(mt) = self.max_tokens {
            if mt < 1 {
                return Err("'max_tokens' must be >= 1".into());
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err("'temperature' must be between 0 and 2".into());
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err("'top_p' must be between 0 and 1".into());
            }
        }
        Ok(())
    }
}

// ── Normalized streaming chunk ─────────────────────────────────────────────
// Every backend wire format is translated into this OpenAI-shaped chunk;
// the completion handler forwards it verbatim.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token usage reported by the backend (for metering).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ChatChunk {
    /// An empty chunk stamped with id/created/model, ready for deltas.
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        ChatChunk {
            id: id.into(),
            object: "chat.completion.chunk".into(),
            created: unix_now(),
            model: model.into(),
            choices: Vec::new(),
            usage: None,
        }
    }

    /// Content delta of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }

    /// Finish reason of the first choice, if any.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

// ── Non-streaming completion response ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

// ── Classification ─────────────────────────────────────────────────────────

/// Complexity bands the classifier may emit. Anything else clamps to
/// `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    Reasoning,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
            Complexity::Reasoning => "reasoning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Complexity::Simple),
            "medium" => Some(Complexity::Medium),
            "complex" => Some(Complexity::Complex),
            "reasoning" => Some(Complexity::Reasoning),
            _ => None,
        }
    }
}

/// The closed task-type whitelist the classifier may emit.
pub const TASK_TYPES: [&str; 12] = [
    "coding",
    "math",
    "reasoning",
    "tool_use",
    "summarization",
    "extraction",
    "simple_qa",
    "conversation",
    "classification",
    "analysis",
    "writing",
    "multi_step",
];

/// The closed capability vocabulary models are tagged with.
pub const CAPABILITIES: [&str; 13] = [
    "coding",
    "math",
    "complex_logic",
    "tool_calling",
    "summarization",
    "extraction",
    "simple_qa",
    "conversation",
    "classification",
    "analysis",
    "writing",
    "multi_step",
    "reasoning",
];

/// Output of the Tier-2 classifier, already clamped to the whitelists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub complexity: Complexity,
    pub task_type: String,
    pub estimated_tokens: i64,
    pub sensitive: bool,
}

impl Default for ClassificationResult {
    fn default() -> Self {
        ClassificationResult {
            complexity: Complexity::Medium,
            task_type: "conversation".into(),
            estimated_tokens: 1000,
            sensitive: false,
        }
    }
}

// ── Request metadata ───────────────────────────────────────────────────────

/// What Tier-1 rules match against, extracted once per request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub text_preview: String,
    pub estimated_tokens: i64,
    pub has_media: bool,
    pub source: Option<String>,
    pub channel: Option<String>,
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(body: Value) -> ChatRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate_utf8(s, 2);
        assert!(t.len() <= 2);
        assert!(s.starts_with(t));
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn validate_requires_messages() {
        assert!(req(json!({})).validate().is_err());
        assert!(req(json!({"messages": "nope"})).validate().is_err());
        assert!(req(json!({"messages": []})).validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_role_and_content() {
        let bad_role = req(json!({"messages": [{"role": "robot", "content": "hi"}]}));
        assert!(bad_role.validate().is_err());

        let bad_content = req(json!({"messages": [{"role": "user", "content": [{"type": "image"}]}]}));
        assert!(bad_content.validate().is_err());

        let null_content = req(json!({"messages": [{"role": "assistant", "content": null}]}));
        assert!(null_content.validate().is_ok());
    }

    #[test]
    fn validate_checks_override_ranges() {
        let base = json!({"messages": [{"role": "user", "content": "hi"}]});

        let mut r = req(base.clone());
        r.max_tokens = Some(0);
        assert!(r.validate().is_err());

        let mut r = req(base.clone());
        r.temperature = Some(2.5);
        assert!(r.validate().is_err());

        let mut r = req(base.clone());
        r.top_p = Some(-0.1);
        assert!(r.validate().is_err());

        let mut r = req(base);
        r.max_tokens = Some(1);
        r.temperature = Some(0.0);
        r.top_p = Some(1.0);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn wants_stream_defaults_true() {
        assert!(req(json!({"messages": []})).wants_stream());
        let mut r = ChatRequest::default();
        r.stream = Some(false);
        assert!(!r.wants_stream());
    }

    #[test]
    fn chunk_serializes_without_empty_options() {
        let mut chunk = ChatChunk::new("chatcmpl-1", "lan/some-model");
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta { role: None, content: Some("hi".into()) },
            finish_reason: None,
        });
        let s = serde_json::to_string(&chunk).unwrap();
        assert!(!s.contains("finish_reason"));
        assert!(!s.contains("usage"));
        assert!(s.contains("\"content\":\"hi\""));
    }

    #[test]
    fn classification_defaults() {
        let d = ClassificationResult::default();
        assert_eq!(d.complexity, Complexity::Medium);
        assert_eq!(d.task_type, "conversation");
        assert_eq!(d.estimated_tokens, 1000);
        assert!(!d.sensitive);
    }
}
