// ── Switchyard: Backend Adapters ───────────────────────────────────────────
// One adapter per wire format. Each translates the gateway request into
// the backend's shape, opens the call, and hands back a StreamResponse:
// a bounded pull-driven sequence of normalized OpenAI-shaped chunks plus
// the record of the model that is actually serving.
//
// Streaming contract: one-shot consumption; dropping (or aborting) the
// response cancels the upstream fetch; the channel is bounded so a slow
// client backpressures the backend read.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

use crate::error::ProviderError;
use crate::store::ModelRecord;
use crate::types::{ChatChunk, ChatRequest};
use async_trait::async_trait;
use futures::StreamExt;
use log::warn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// In-flight chunks buffered between the backend reader and the client
/// writer. Small on purpose: a stalled client stalls the backend read.
const CHUNK_BUFFER: usize = 32;

/// Connect timeout for backend calls.
pub(crate) const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Overall deadline for one backend call, stream included.
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 120;

/// A live backend stream, annotated with the serving model.
pub struct StreamResponse {
    rx: mpsc::Receiver<Result<ChatChunk, ProviderError>>,
    reader: JoinHandle<()>,
    /// The model actually serving this request (not necessarily the
    /// rank-1 candidate).
    pub model: ModelRecord,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("model", &self.model)
            .finish()
    }
}

impl StreamResponse {
    pub fn new(
        model: ModelRecord,
        rx: mpsc::Receiver<Result<ChatChunk, ProviderError>>,
        reader: JoinHandle<()>,
    ) -> Self {
        StreamResponse { rx, reader, model }
    }

    /// Pull the next normalized chunk; `None` means the stream ended.
    pub async fn next_chunk(&mut self) -> Option<Result<ChatChunk, ProviderError>> {
        self.rx.recv().await
    }

    /// Cancel the upstream fetch.
    pub fn abort(&self) {
        self.reader.abort();
    }
}

impl Drop for StreamResponse {
    fn drop(&mut self) {
        // A dropped response must not leave the backend read running.
        self.reader.abort();
    }
}

/// The seam every backend sits behind. Adapters are stateless aside from
/// their HTTP client; registry writes stay in the dispatcher.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn send(&self, model: &ModelRecord, request: &ChatRequest) -> Result<StreamResponse, ProviderError>;
}

/// Build the shared HTTP client for backend calls.
pub(crate) fn backend_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

/// Incremental SSE line decoder. Bytes arrive in arbitrary slices; a
/// partial trailing line is carried between feeds so chunks are never
/// duplicated or dropped at read boundaries.
#[derive(Default)]
pub(crate) struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes; returns the complete lines it
    /// unlocked, trimmed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim().to_string();
            self.buffer.drain(..=line_end);
            lines.push(line);
        }
        lines
    }
}

/// Drive a backend SSE body through a translator, forwarding normalized
/// chunks into `tx`. `translate` returns `Some(chunk)` to forward, `None`
/// to skip the event; a `data: [DONE]` line ends the stream. Comment
/// lines (leading `:`) and blank lines are discarded.
pub(crate) fn spawn_sse_reader<F>(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<ChatChunk, ProviderError>>,
    mut translate: F,
) -> JoinHandle<()>
where
    F: FnMut(&str) -> Option<ChatChunk> + Send + 'static,
{
    tokio::spawn(async move {
        let mut byte_stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();

        while let Some(result) = byte_stream.next().await {
            let bytes = match result {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(Err(ProviderError::from_reqwest(e))).await;
                    return;
                }
            };

            for line in buffer.feed(&bytes) {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return;
                }
                if let Some(chunk) = translate(data) {
                    // A closed receiver means the client went away; stop
                    // reading so the upstream fetch is dropped.
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

/// Deliver a single pre-built chunk as a one-element stream (the
/// non-streaming path shares the StreamResponse shape).
pub(crate) fn single_chunk_stream(
    model: ModelRecord,
    chunk: ChatChunk,
) -> StreamResponse {
    let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
    let reader = tokio::spawn(async move {
        let _ = tx.send(Ok(chunk)).await;
    });
    StreamResponse::new(model, rx, reader)
}

/// Open a bounded chunk channel.
pub(crate) fn chunk_channel() -> (
    mpsc::Sender<Result<ChatChunk, ProviderError>>,
    mpsc::Receiver<Result<ChatChunk, ProviderError>>,
) {
    mpsc::channel(CHUNK_BUFFER)
}

/// Turn a non-2xx backend response into a classified ProviderError,
/// consuming (a truncated slice of) the body for the message.
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let message = format!("API error {status}: {}", crate::types::truncate_utf8(&body, 200));
    warn!("[adapter] Backend error {status}: {}", crate::types::truncate_utf8(&body, 200));

    if status == 429 {
        ProviderError::RateLimited { message, retry_after_secs: retry_after }
    } else {
        ProviderError::Api { status, message }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
