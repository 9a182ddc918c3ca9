// ── Switchyard: Completion Handler ─────────────────────────────────────────
// Glues the router and dispatcher to the client: validates, routes,
// dispatches, then either relays the normalized stream as SSE or
// aggregates it into one completion object. Exactly one request-log row
// is written per request, after the stream ends, priced against the
// model that actually served it.

use super::{error_response, gateway_error_response, sanitize_channel, sanitize_source, SharedState};
use crate::budget::BudgetLedger;
use crate::error::GatewayError;
use crate::providers::StreamResponse;
use crate::routing::RoutingDecision;
use crate::store::{ModelRecord, RegistryStore, RequestLogRow};
use crate::types::{
    truncate_utf8, unix_now, ChatCompletion, ChatRequest, CompletionChoice, CompletionMessage,
    TokenUsage,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use log::{error, warn};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

/// Stored request previews are capped at this many bytes.
const PREVIEW_BYTES: usize = 200;

pub async fn chat_completions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request_error", format!("Invalid JSON body: {e}"))
        }
    };
    if let Err(msg) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request_error", msg);
    }

    let source = sanitize_source(&headers);
    let channel = sanitize_channel(&headers);

    // ── Route ──────────────────────────────────────────────────────
    let decision = match state.router.route(&request, source.clone(), channel.clone()).await {
        Ok(d) => d,
        Err(e) => return gateway_error_response(e),
    };
    let routing_headers = routing_headers(&decision);

    // ── Dispatch ───────────────────────────────────────────────────
    // The backend leg always streams; the client's `stream` flag only
    // shapes the response format below.
    let mut backend_request = request.clone();
    backend_request.stream = Some(true);
    let stream = match state.dispatcher.dispatch(&decision.candidates, &backend_request).await {
        Ok(s) => s,
        Err(e) => return gateway_error_response(e),
    };

    let ctx = RequestContext {
        store: state.store.clone(),
        ledger: state.ledger.clone(),
        source,
        channel,
        tier: decision.tier as i64,
        rule_id: decision.rule_id,
        classification: decision
            .classification
            .as_ref()
            .and_then(|c| serde_json::to_string(c).ok()),
        model: stream.model.clone(),
        preview: extract_preview(&request),
        started,
    };

    if request.wants_stream() {
        stream_response(stream, ctx, routing_headers)
    } else {
        aggregate_response(stream, ctx, routing_headers).await
    }
}

/// `X-Router-*` response headers describing the decision.
fn routing_headers(decision: &RoutingDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(first) = decision.candidates.first() {
        if let Ok(v) = HeaderValue::from_str(&first.model.id) {
            headers.insert("x-router-model", v);
        }
    }
    if let Ok(v) = HeaderValue::from_str(&decision.tier.to_string()) {
        headers.insert("x-router-tier", v);
    }
    if let Some(classification) = &decision.classification {
        if let Ok(json) = serde_json::to_string(classification) {
            if let Ok(v) = HeaderValue::from_str(&json) {
                headers.insert("x-router-classification", v);
            }
        }
    }
    headers
}

fn extract_preview(request: &ChatRequest) -> String {
    let messages = request.message_list();
    let text = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.text().to_string())
        .unwrap_or_default();
    truncate_utf8(&text, PREVIEW_BYTES).to_string()
}

/// Everything needed to write the one request-log row at stream end.
struct RequestContext {
    store: Arc<RegistryStore>,
    ledger: Arc<BudgetLedger>,
    source: Option<String>,
    channel: Option<String>,
    tier: i64,
    rule_id: Option<i64>,
    classification: Option<String>,
    model: ModelRecord,
    preview: String,
    started: Instant,
}

impl RequestContext {
    /// Record cost and the log row. Consumes the context, so accounting
    /// is structurally at-most-once; failures are non-fatal.
    fn finalize(self, usage: TokenUsage, success: bool) {
        let input = usage.prompt_tokens as i64;
        let output = usage.completion_tokens as i64;

        let cost = match self.ledger.record_request_cost(&self.model, input, output) {
            Ok(cost) => cost,
            Err(e) => {
                error!("[gateway] Ledger update failed for {}: {e}", self.model.id);
                BudgetLedger::cost_usd(&self.model, input, output)
            }
        };

        let row = RequestLogRow {
            source: self.source,
            channel: self.channel,
            tier: self.tier,
            rule_id: self.rule_id,
            classification: self.classification,
            selected_model: self.model.id.clone(),
            preview: self.preview,
            input_tokens: input,
            output_tokens: output,
            cost_usd: cost,
            latency_ms: self.started.elapsed().as_millis() as i64,
            success,
        };
        if let Err(e) = self.store.insert_request_log(&row) {
            error!("[gateway] Request log write failed for {}: {e}", self.model.id);
        }
    }
}

/// Fold one usage report into the running total. Backends report usage
/// on the last chunk(s); later non-zero fields win.
fn merge_usage(acc: &mut TokenUsage, incoming: &TokenUsage) {
    if incoming.prompt_tokens > 0 {
        acc.prompt_tokens = incoming.prompt_tokens;
    }
    if incoming.completion_tokens > 0 {
        acc.completion_tokens = incoming.completion_tokens;
    }
    acc.total_tokens = acc.prompt_tokens + acc.completion_tokens;
}

// ── Streaming path ─────────────────────────────────────────────────────────

/// Relay the normalized stream as SSE. The pump task owns the backend
/// stream and the log context; it survives client disconnects, so the
/// log row is written in every exit path.
fn stream_response(stream: StreamResponse, ctx: RequestContext, extra: HeaderMap) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(32);

    tokio::spawn(pump_stream(stream, tx, ctx));

    let sse = Sse::new(ReceiverStream::new(rx));
    let mut response = sse.into_response();
    response.headers_mut().extend(extra);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn pump_stream(
    mut stream: StreamResponse,
    tx: tokio::sync::mpsc::Sender<Result<Event, Infallible>>,
    ctx: RequestContext,
) {
    let mut usage = TokenUsage::default();
    let success;

    loop {
        match stream.next_chunk().await {
            Some(Ok(chunk)) => {
                if let Some(u) = &chunk.usage {
                    merge_usage(&mut usage, u);
                }
                let data = match serde_json::to_string(&chunk) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("[gateway] Dropping unserializable chunk: {e}");
                        continue;
                    }
                };
                if tx.send(Ok(Event::default().data(data))).await.is_err() {
                    // Client went away: abort the backend fetch and
                    // account for what was delivered so far.
                    stream.abort();
                    success = false;
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("[gateway] Stream from {} failed mid-flight: {e}", stream.model.id);
                let body = serde_json::json!({"error": {"message": e.to_string(), "type": "server_error"}});
                let _ = tx.send(Ok(Event::default().data(body.to_string()))).await;
                success = false;
                break;
            }
            None => {
                let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
                success = true;
                break;
            }
        }
    }

    ctx.finalize(usage, success);
}

// ── Aggregate path ─────────────────────────────────────────────────────────

/// Pull the whole stream, then answer with a single completion object.
async fn aggregate_response(mut stream: StreamResponse, ctx: RequestContext, extra: HeaderMap) -> Response {
    let mut chunks = Vec::new();
    let mut usage = TokenUsage::default();
    let mut failed = false;

    while let Some(item) = stream.next_chunk().await {
        match item {
            Ok(chunk) => {
                if let Some(u) = &chunk.usage {
                    merge_usage(&mut usage, u);
                }
                chunks.push(chunk);
            }
            Err(e) => {
                warn!("[gateway] Backend stream failed during aggregation: {e}");
                failed = true;
                break;
            }
        }
    }

    if chunks.is_empty() || failed {
        ctx.finalize(usage, false);
        return gateway_error_response(GatewayError::EmptyBackendResponse);
    }

    let content: String = chunks.iter().filter_map(|c| c.content()).collect();
    let finish_reason = chunks
        .iter()
        .rev()
        .find_map(|c| c.finish_reason().map(str::to_string))
        .or_else(|| Some("stop".into()));
    let id = chunks
        .first()
        .map(|c| c.id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()));

    let completion = ChatCompletion {
        id,
        object: "chat.completion".into(),
        created: unix_now(),
        model: stream.model.id.clone(),
        choices: vec![CompletionChoice {
            index: 0,
            message: CompletionMessage { role: "assistant".into(), content },
            finish_reason,
        }],
        usage: (usage.total_tokens > 0).then_some(usage),
    };

    ctx.finalize(usage, true);

    let mut response = axum::Json(completion).into_response();
    response.headers_mut().extend(extra);
    response
}

// ── Tests ──────────────────────────────────────────────────────────────────
