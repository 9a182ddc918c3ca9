// End-to-end flows over a seeded in-memory registry: routing tiers,
// dispatch escalation, failure bookkeeping, and the HTTP surface. Backend
// and classifier endpoints are canned raw-TCP HTTP stubs.

use serde_json::{json, Value};
use std::sync::Arc;
use switchyard::config::GatewayConfig;
use switchyard::server::{build_app, AppState};
use switchyard::store::ModelLocation;
use switchyard::types::ChatRequest;
use switchyard::{BudgetLedger, Classifier, Dispatcher, RegistryStore, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// ── Canned HTTP stubs ──────────────────────────────────────────────────────

fn http_json(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn http_sse(events: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{}",
        events
    )
}

fn http_status(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Serve the same canned response to every connection.
async fn spawn_stub(response: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            let response = response.clone();
            tokio::spawn(async move {
                // Drain the request (headers + declared body) before answering.
                let mut data = Vec::new();
                let mut buf = [0u8; 8192];
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    data.extend_from_slice(&buf[..n]);
                    if let Some(pos) = find_subslice(&data, b"\r\n\r\n") {
                        let head = String::from_utf8_lossy(&data[..pos]).to_ascii_lowercase();
                        let content_length = head
                            .lines()
                            .find_map(|l| l.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if data.len() >= pos + 4 + content_length {
                            break;
                        }
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

/// A classifier stub that always answers with the given labels.
async fn classifier_stub(complexity: &str, task_type: &str, tokens: i64, sensitive: bool) -> String {
    let label = json!({
        "complexity": complexity,
        "task_type": task_type,
        "estimated_tokens": tokens,
        "sensitive": sensitive,
    });
    let body = json!({"choices": [{"message": {"role": "assistant", "content": label.to_string()}}]});
    spawn_stub(http_json(&body.to_string())).await
}

/// A classifier endpoint nothing listens on: Tier-2 degrades to defaults.
fn dead_classifier() -> Classifier {
    Classifier::with_timeout("http://127.0.0.1:1", "stub", 300)
}

fn chat_request(body: Value) -> ChatRequest {
    serde_json::from_value(body).unwrap()
}

fn seeded() -> (Arc<RegistryStore>, Arc<BudgetLedger>) {
    let store = Arc::new(RegistryStore::open_in_memory().unwrap());
    let ledger = Arc::new(BudgetLedger::new(store.clone()));
    (store, ledger)
}

// ── Routing tiers ──────────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_short_circuits_to_self_model_without_classifier() {
    let (store, ledger) = seeded();
    let router = Router::new(store.clone(), ledger, dead_classifier());

    let request = chat_request(json!({"messages": [{"role": "user", "content": "ping"}]}));
    let decision = router.route(&request, Some("heartbeat".into()), None).await.unwrap();

    assert_eq!(decision.tier, 1);
    assert!(decision.classification.is_none(), "classifier must not run for tier-1");
    assert_eq!(decision.candidates.len(), 1);
    let self_model = store.load_policy().unwrap().router_model_id.unwrap();
    assert_eq!(decision.candidates[0].model.id, self_model);
    assert_eq!(decision.candidates[0].rank, 1);
}

#[tokio::test]
async fn greeting_matches_the_priority_40_rule() {
    let (store, ledger) = seeded();
    let router = Router::new(store.clone(), ledger, dead_classifier());

    let request = chat_request(json!({"messages": [{"role": "user", "content": "hello"}]}));
    let decision = router.route(&request, None, None).await.unwrap();

    assert_eq!(decision.tier, 1);
    let rule_id = decision.rule_id.unwrap();
    let rule = store
        .load_rules()
        .unwrap()
        .into_iter()
        .find(|r| r.id == rule_id)
        .unwrap();
    assert_eq!(rule.priority, 40);
    let self_model = store.load_policy().unwrap().router_model_id.unwrap();
    assert_eq!(decision.candidates[0].model.id, self_model);
}

#[tokio::test]
async fn classify_then_select_prefers_free_lan_coder() {
    let (store, ledger) = seeded();
    let classifier_url = classifier_stub("complex", "coding", 2000, false).await;
    let router = Router::new(store, ledger, Classifier::new(classifier_url, "stub"));

    let request = chat_request(json!({"messages": [{"role": "user", "content": "Write a Python web server"}]}));
    let decision = router.route(&request, None, None).await.unwrap();

    assert_eq!(decision.tier, 2);
    let classification = decision.classification.unwrap();
    assert_eq!(classification.task_type, "coding");
    assert_eq!(classification.estimated_tokens, 2000);

    let first = &decision.candidates[0].model;
    assert_eq!(first.location, ModelLocation::Lan);
    assert!(first.quality_score >= 65);
    assert_eq!(first.id, "lan/qwen3-coder-30b");
}

#[tokio::test]
async fn sensitive_requests_exclude_cloud_and_fall_back_through_tier_3() {
    let (store, ledger) = seeded();
    let classifier_url = classifier_stub("medium", "conversation", 500, true).await;
    let router = Router::new(store.clone(), ledger, Classifier::new(classifier_url, "stub"));

    let request = chat_request(json!({"messages": [{"role": "user", "content": "my password is hunter2"}]}));
    let decision = router.route(&request, None, None).await.unwrap();

    assert_eq!(decision.tier, 2);
    assert!(decision
        .candidates
        .iter()
        .all(|c| c.model.location != ModelLocation::Cloud));

    // With every non-cloud model down, only Tier-3 remains, and it is
    // allowed to hand out the cloud fallback despite sensitivity.
    for m in store.list_enabled_models().unwrap() {
        if m.location != ModelLocation::Cloud {
            store.set_model_health(&m.id, false).unwrap();
        }
    }
    let decision = router.route(&request, None, None).await.unwrap();
    assert_eq!(decision.tier, 3);
    assert_eq!(decision.candidates[0].model.id, "anthropic/claude-haiku-3-5");
    assert_eq!(decision.candidates[0].model.location, ModelLocation::Cloud);
}

// ── Dispatch across real HTTP backends ─────────────────────────────────────

#[tokio::test]
async fn retry_escalates_from_refused_local_to_lan_stub() {
    let (store, ledger) = seeded();

    // Local model: closed port. LAN coder: live SSE stub.
    let sse = http_sse(concat!(
        "data: {\"id\":\"chatcmpl-s\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"hi \"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-s\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"there\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2,\"total_tokens\":6}}\n\n",
        "data: [DONE]\n\n",
    ));
    let lan_url = spawn_stub(sse).await;
    store.set_model_endpoint("local/qwen3-8b", "http://127.0.0.1:1/v1").unwrap();
    store.set_model_endpoint("lan/qwen3-coder-30b", &lan_url).unwrap();

    let classifier_url = classifier_stub("complex", "coding", 2000, false).await;
    let router = Router::new(store.clone(), ledger, Classifier::new(classifier_url, "stub"));
    let dispatcher = Dispatcher::new(store.clone(), "2023-06-01");

    let request = chat_request(json!({
        "messages": [{"role": "user", "content": "Write a Python web server"}],
    }));

    // Force the local model to the front of the list to exercise escalation.
    let mut decision = router.route(&request, None, None).await.unwrap();
    let local = store.get_model("local/qwen3-8b").unwrap().unwrap();
    decision.candidates.insert(0, switchyard::routing::RankedCandidate { model: local, rank: 0 });

    let mut stream = dispatcher.dispatch(&decision.candidates, &request).await.unwrap();
    assert_eq!(stream.model.id, "lan/qwen3-coder-30b");

    let mut content = String::new();
    let mut usage = None;
    while let Some(chunk) = stream.next_chunk().await {
        let chunk = chunk.unwrap();
        if let Some(text) = chunk.content() {
            content.push_str(text);
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
    }
    assert_eq!(content, "hi there");
    assert_eq!(usage.unwrap().total_tokens, 6);

    // The refused local model is benched immediately.
    assert!(!store.get_model("local/qwen3-8b").unwrap().unwrap().healthy);
}

#[tokio::test]
async fn backend_429_benches_the_provider_for_the_window() {
    let (store, ledger) = seeded();
    let limited = spawn_stub(http_status(429, "Too Many Requests", r#"{"error":{"message":"rate limit"}}"#)).await;
    store.set_model_endpoint("anthropic/claude-haiku-3-5", &limited).unwrap();
    std::env::set_var("SWITCHYARD_TEST_ANTHROPIC_KEY", "sk-test");
    store
        .set_model_api_key_env("anthropic/claude-haiku-3-5", Some("SWITCHYARD_TEST_ANTHROPIC_KEY"))
        .unwrap();

    let dispatcher = Dispatcher::new(store.clone(), "2023-06-01");
    let request = chat_request(json!({"messages": [{"role": "user", "content": "hi"}]}));
    let haiku = store.get_model("anthropic/claude-haiku-3-5").unwrap().unwrap();
    let candidates = vec![switchyard::routing::RankedCandidate { model: haiku, rank: 1 }];

    let err = dispatcher.dispatch(&candidates, &request).await.unwrap_err();
    assert!(matches!(err, switchyard::GatewayError::NoAvailableModel));

    // Provider row is set with retry_after ≈ now + 60s…
    let retry_after = store.provider_retry_after("anthropic").unwrap().unwrap();
    let now = chrono::Utc::now().timestamp();
    assert!((retry_after - now - 60).abs() <= 2);

    // …and no anthropic model is selectable until it expires.
    let selector = switchyard::routing::CandidateSelector::new(store.clone(), ledger);
    let candidates = selector
        .select(&switchyard::routing::SelectionCriteria {
            quality_floor: 0,
            capability: None,
            sensitive: false,
            estimated_tokens: 100,
        })
        .unwrap();
    assert!(candidates.iter().all(|c| c.model.provider != "anthropic"));
}

#[tokio::test]
async fn empty_stream_yields_zero_chunks() {
    let (store, _) = seeded();
    let empty = spawn_stub(http_sse("data: [DONE]\n\n")).await;
    store.set_model_endpoint("local/qwen3-8b", &empty).unwrap();

    let dispatcher = Dispatcher::new(store.clone(), "2023-06-01");
    let request = chat_request(json!({"messages": [{"role": "user", "content": "hi"}]}));
    let local = store.get_model("local/qwen3-8b").unwrap().unwrap();
    let candidates = vec![switchyard::routing::RankedCandidate { model: local, rank: 1 }];

    // A backend that terminates without sending a single data chunk.
    let mut stream = dispatcher.dispatch(&candidates, &request).await.unwrap();
    let mut count = 0;
    while let Some(item) = stream.next_chunk().await {
        if item.is_ok() {
            count += 1;
        }
    }
    assert_eq!(count, 0, "no usable chunks should arrive");
}

// ── HTTP surface ───────────────────────────────────────────────────────────

async fn spawn_gateway(store: Arc<RegistryStore>, api_key: Option<String>, classifier_url: String) -> String {
    let ledger = Arc::new(BudgetLedger::new(store.clone()));
    let router = Arc::new(Router::new(
        store.clone(),
        ledger.clone(),
        Classifier::with_timeout(classifier_url.clone(), "stub", 1000),
    ));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), "2023-06-01"));
    let config = Arc::new(GatewayConfig {
        port: 0,
        db_path: std::path::PathBuf::new(),
        classifier_url,
        classifier_model: "stub".into(),
        health_interval_ms: 60_000,
        api_key,
        anthropic_version: "2023-06-01".into(),
    });
    let state = Arc::new(AppState { store, ledger, router, dispatcher, config });
    let app = build_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn validation_errors_are_openai_shaped_400s() {
    let (store, _) = seeded();
    let base = spawn_gateway(store, None, "http://127.0.0.1:1".into()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "auto"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}], "temperature": 9}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn gateway_key_gates_everything_but_health() {
    let (store, _) = seeded();
    let base = spawn_gateway(store, Some("sk-gw-secret".into()), "http://127.0.0.1:1".into()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200, "liveness stays open");

    let resp = client.get(format!("{base}/v1/models")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");

    let resp = client
        .get(format!("{base}/v1/models"))
        .header("Authorization", "Bearer sk-gw-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn models_listing_is_openai_shaped() {
    let (store, _) = seeded();
    let base = spawn_gateway(store, None, "http://127.0.0.1:1".into()).await;

    let resp = reqwest::get(format!("{base}/v1/models")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "list");
    let data = body["data"].as_array().unwrap();
    assert!(!data.is_empty());
    assert_eq!(data[0]["object"], "model");
    assert!(data[0]["created"].as_i64().unwrap() > 0);
    // Co-located fleet lists ahead of cloud.
    assert_eq!(data[0]["id"], "local/qwen3-8b");
}

#[tokio::test]
async fn options_answers_204() {
    let (store, _) = seeded();
    let base = spawn_gateway(store, None, "http://127.0.0.1:1".into()).await;
    let client = reqwest::Client::new();

    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{base}/anything/at/all"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
}

#[tokio::test]
async fn heartbeat_completion_round_trips_with_headers_and_one_log_row() {
    let (store, _) = seeded();

    // The backend leg always streams; the stub answers with chunked SSE
    // even though the client asked for a plain completion object.
    let sse = http_sse(concat!(
        "data: {\"id\":\"chatcmpl-stub\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"po\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-stub\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ng\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1,\"total_tokens\":4}}\n\n",
        "data: [DONE]\n\n",
    ));
    let backend = spawn_stub(sse).await;
    store.set_model_endpoint("local/qwen3-8b", &backend).unwrap();

    let base = spawn_gateway(store.clone(), None, "http://127.0.0.1:1".into()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .header("X-Router-Source", "heartbeat")
        .json(&json!({
            "model": "auto",
            "messages": [{"role": "user", "content": "ping"}],
            "stream": false,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers().get("x-router-tier").unwrap(), "1");
    assert_eq!(resp.headers().get("x-router-model").unwrap(), "local/qwen3-8b");
    assert!(resp.headers().get("x-router-classification").is_none());

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "local/qwen3-8b");
    assert_eq!(body["choices"][0]["message"]["content"], "pong");

    let logs = store.recent_request_logs(10).unwrap();
    assert_eq!(logs.len(), 1, "exactly one log row per request");
    assert_eq!(logs[0].selected_model, "local/qwen3-8b");
    assert_eq!(logs[0].tier, 1);
    assert_eq!(logs[0].input_tokens, 3);
    assert_eq!(logs[0].output_tokens, 1);
    assert_eq!(logs[0].cost_usd, 0.0);
    assert!(logs[0].success);
    assert_eq!(logs[0].source.as_deref(), Some("heartbeat"));
}

#[tokio::test]
async fn streamed_completion_relays_sse_and_terminates_with_done() {
    let (store, _) = seeded();
    let sse = http_sse(concat!(
        ": keepalive comment\n",
        "data: {\"id\":\"chatcmpl-s\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"po\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-s\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ng\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1,\"total_tokens\":4}}\n\n",
        "data: [DONE]\n\n",
    ));
    let backend = spawn_stub(sse).await;
    store.set_model_endpoint("local/qwen3-8b", &backend).unwrap();

    let base = spawn_gateway(store.clone(), None, "http://127.0.0.1:1".into()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .header("X-Router-Source", "heartbeat")
        .json(&json!({"messages": [{"role": "user", "content": "ping"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let body = resp.text().await.unwrap();
    assert!(body.contains("\"content\":\"po\""));
    assert!(body.contains("\"content\":\"ng\""));
    assert!(body.trim_end().ends_with("data: [DONE]"));

    // The pump finalizes after the client has drained the stream.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let logs = store.recent_request_logs(10).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].success);
    assert_eq!(logs[0].input_tokens, 3);
}

#[tokio::test]
async fn empty_backend_response_is_a_502_with_failure_log() {
    let (store, _) = seeded();
    // A backend that terminates the stream without a single data chunk.
    let empty = spawn_stub(http_sse("data: [DONE]\n\n")).await;
    store.set_model_endpoint("local/qwen3-8b", &empty).unwrap();

    let base = spawn_gateway(store.clone(), None, "http://127.0.0.1:1".into()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .header("X-Router-Source", "heartbeat")
        .json(&json!({"messages": [{"role": "user", "content": "ping"}], "stream": false}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "server_error");

    let logs = store.recent_request_logs(10).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
}

#[tokio::test]
async fn reject_everything_surfaces_503() {
    let (store, _) = seeded();
    // Replace the rule table with a single catch-all reject.
    store.clear_rules().unwrap();
    store
        .insert_rule(&switchyard::store::RoutingRule {
            id: 0,
            priority: 1,
            source: None,
            channel: None,
            pattern: None,
            token_max: None,
            has_media: None,
            target_model_id: None,
            action: switchyard::store::RuleAction::Reject,
            description: Some("maintenance: reject everything".into()),
        })
        .unwrap();

    let base = spawn_gateway(store, None, "http://127.0.0.1:1".into()).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "No available model");
}
