// ── Switchyard: Retrying Dispatcher ────────────────────────────────────────
// Walks the ranked candidate list strictly in order. A failed candidate
// first has its failure classified and persisted (rate-limit row, health
// row, or direct unhealthy flip), then the next candidate is tried. The
// same model is never retried; escalation happens only by moving down
// the list.

use crate::error::{GatewayError, GatewayResult, ProviderError};
use crate::providers::{AnthropicAdapter, BackendAdapter, OpenAiAdapter, StreamResponse};
use crate::routing::RankedCandidate;
use crate::store::{ModelRecord, RegistryStore, WireFormat};
use crate::types::{unix_now, ChatRequest};
use log::{error, info, warn};
use std::sync::Arc;

pub struct Dispatcher {
    store: Arc<RegistryStore>,
    openai: Arc<dyn BackendAdapter>,
    anthropic: Arc<dyn BackendAdapter>,
}

impl Dispatcher {
    pub fn new(store: Arc<RegistryStore>, anthropic_version: &str) -> Self {
        Self::with_adapters(
            store,
            Arc::new(OpenAiAdapter::new()),
            Arc::new(AnthropicAdapter::new(anthropic_version)),
        )
    }

    /// Adapter injection seam; tests use mock adapters here.
    pub fn with_adapters(
        store: Arc<RegistryStore>,
        openai: Arc<dyn BackendAdapter>,
        anthropic: Arc<dyn BackendAdapter>,
    ) -> Self {
        Dispatcher { store, openai, anthropic }
    }

    fn adapter_for(&self, format: WireFormat) -> &dyn BackendAdapter {
        match format {
            WireFormat::Anthropic => self.anthropic.as_ref(),
            WireFormat::OpenAi => self.openai.as_ref(),
        }
    }

    /// Try candidates in rank order; the returned stream carries the
    /// model that actually answered.
    pub async fn dispatch(
        &self,
        candidates: &[RankedCandidate],
        request: &ChatRequest,
    ) -> GatewayResult<StreamResponse> {
        for candidate in candidates {
            let model = &candidate.model;
            match self.adapter_for(model.wire_format).send(model, request).await {
                Ok(stream) => {
                    info!("[dispatch] rank {} -> {}", candidate.rank, model.id);
                    if let Err(e) = self.store.touch_last_used(&model.id) {
                        error!("[dispatch] Failed to stamp last_used for {}: {e}", model.id);
                    }
                    return Ok(stream);
                }
                Err(err) => {
                    warn!("[dispatch] {} failed at rank {}: {err}", model.id, candidate.rank);
                    self.note_failure(model, &err);
                }
            }
        }
        Err(GatewayError::NoAvailableModel)
    }

    /// Classify one failure and update persistent state. Store write
    /// failures here are themselves non-fatal: the next candidate still
    /// gets its chance.
    fn note_failure(&self, model: &ModelRecord, err: &ProviderError) {
        let message = err.to_string().to_lowercase();

        // Rate limits are provider-scoped: one 429 benches every model
        // behind the same provider for the window.
        if err.status() == Some(429) || message.contains("429") || message.contains("rate limit") {
            if let Err(e) = self.store.mark_provider_limited(&model.provider, unix_now()) {
                error!("[dispatch] Failed to mark {} rate-limited: {e}", model.provider);
            }
            return;
        }

        // Server errors count toward the health threshold like failed
        // probes do; a single 500 does not bench the model.
        if let Some(status) = err.status() {
            if (500..600).contains(&status) {
                if let Err(e) = self.store.record_probe_failure(&model.id, &err.to_string()) {
                    error!("[dispatch] Failed to record health row for {}: {e}", model.id);
                }
                return;
            }
        }

        // Connection-class failures bench the model immediately.
        let connection_class = matches!(err, ProviderError::Timeout(_))
            || message.contains("timeout")
            || message.contains("timed out")
            || message.contains("connection refused")
            || message.contains("connection reset")
            || message.contains("econnrefused")
            || message.contains("econnreset")
            || message.contains("etimedout");
        if connection_class {
            if let Err(e) = self.store.set_model_health(&model.id, false) {
                error!("[dispatch] Failed to flip {} unhealthy: {e}", model.id);
            }
        }
        // Anything else (4xx, credential problems) leaves state untouched.
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::single_chunk_stream;
    use crate::store::RATE_LIMIT_WINDOW_SECS;
    use crate::types::ChatChunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted adapter: fails with the scripted error for listed model
    /// ids, answers with a one-chunk stream for everything else.
    struct MockAdapter {
        fail_ids: Vec<String>,
        error: fn() -> ProviderError,
        calls: AtomicUsize,
    }

    impl MockAdapter {
        fn new(fail_ids: &[&str], error: fn() -> ProviderError) -> Arc<Self> {
            Arc::new(MockAdapter {
                fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
                error,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BackendAdapter for MockAdapter {
        async fn send(&self, model: &ModelRecord, _request: &ChatRequest) -> Result<StreamResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_ids.contains(&model.id) {
                return Err((self.error)());
            }
            let mut chunk = ChatChunk::new("chatcmpl-mock", model.id.clone());
            chunk.choices.push(crate::types::ChunkChoice {
                index: 0,
                delta: crate::types::ChunkDelta { role: None, content: Some("ok".into()) },
                finish_reason: Some("stop".into()),
            });
            Ok(single_chunk_stream(model.clone(), chunk))
        }
    }

    fn candidates(store: &RegistryStore, ids: &[&str]) -> Vec<RankedCandidate> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RankedCandidate {
                model: store.get_model(id).unwrap().unwrap(),
                rank: i as u32 + 1,
            })
            .collect()
    }

    fn request() -> ChatRequest {
        serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn escalates_to_next_candidate_on_connection_failure() {
        let store = Arc::new(RegistryStore::open_in_memory().unwrap());
        let adapter = MockAdapter::new(&["local/qwen3-8b"], || {
            ProviderError::Transport("connection refused: tcp connect error".into())
        });
        let dispatcher = Dispatcher::with_adapters(store.clone(), adapter.clone(), adapter.clone());

        let list = candidates(&store, &["local/qwen3-8b", "lan/qwen3-coder-30b"]);
        let stream = dispatcher.dispatch(&list, &request()).await.unwrap();

        // The LAN model answered, and the local model is now benched.
        assert_eq!(stream.model.id, "lan/qwen3-coder-30b");
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
        assert!(!store.get_model("local/qwen3-8b").unwrap().unwrap().healthy);
    }

    #[tokio::test]
    async fn rate_limit_marks_the_provider_not_the_model() {
        let store = Arc::new(RegistryStore::open_in_memory().unwrap());
        let adapter = MockAdapter::new(&["anthropic/claude-sonnet-4"], || ProviderError::RateLimited {
            message: "API error 429: rate limit".into(),
            retry_after_secs: None,
        });
        let dispatcher = Dispatcher::with_adapters(store.clone(), adapter.clone(), adapter);

        let list = candidates(&store, &["anthropic/claude-sonnet-4"]);
        let err = dispatcher.dispatch(&list, &request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoAvailableModel));

        assert_eq!(store.list_limited_providers().unwrap(), vec!["anthropic".to_string()]);
        let retry_after = store.provider_retry_after("anthropic").unwrap().unwrap();
        let expected = unix_now() + RATE_LIMIT_WINDOW_SECS;
        assert!((retry_after - expected).abs() <= 2);
        // The model itself stays healthy: the bench is provider-scoped.
        assert!(store.get_model("anthropic/claude-sonnet-4").unwrap().unwrap().healthy);
    }

    #[tokio::test]
    async fn server_errors_count_toward_the_health_threshold() {
        let store = Arc::new(RegistryStore::open_in_memory().unwrap());
        let adapter = MockAdapter::new(&["lan/llama-3.3-70b"], || ProviderError::Api {
            status: 502,
            message: "API error 502: upstream crashed".into(),
        });
        let dispatcher = Dispatcher::with_adapters(store.clone(), adapter.clone(), adapter);

        let list = candidates(&store, &["lan/llama-3.3-70b"]);

        // Two failures: logged, still healthy.
        for _ in 0..2 {
            let _ = dispatcher.dispatch(&list, &request()).await;
        }
        assert!(store.get_model("lan/llama-3.3-70b").unwrap().unwrap().healthy);
        assert_eq!(store.latest_consecutive_failures("lan/llama-3.3-70b").unwrap(), 2);

        // Third failure crosses the threshold.
        let _ = dispatcher.dispatch(&list, &request()).await;
        assert!(!store.get_model("lan/llama-3.3-70b").unwrap().unwrap().healthy);
    }

    #[tokio::test]
    async fn client_errors_leave_state_untouched() {
        let store = Arc::new(RegistryStore::open_in_memory().unwrap());
        let adapter = MockAdapter::new(&["openai/gpt-4o-mini"], || ProviderError::Api {
            status: 400,
            message: "API error 400: bad request".into(),
        });
        let dispatcher = Dispatcher::with_adapters(store.clone(), adapter.clone(), adapter);

        let list = candidates(&store, &["openai/gpt-4o-mini"]);
        let _ = dispatcher.dispatch(&list, &request()).await;

        assert!(store.get_model("openai/gpt-4o-mini").unwrap().unwrap().healthy);
        assert!(store.list_limited_providers().unwrap().is_empty());
        assert_eq!(store.latest_consecutive_failures("openai/gpt-4o-mini").unwrap(), 0);
    }

    #[tokio::test]
    async fn success_stamps_last_used() {
        let store = Arc::new(RegistryStore::open_in_memory().unwrap());
        let adapter = MockAdapter::new(&[], || unreachable!());
        let dispatcher = Dispatcher::with_adapters(store.clone(), adapter.clone(), adapter);

        let list = candidates(&store, &["local/qwen3-8b"]);
        let _ = dispatcher.dispatch(&list, &request()).await.unwrap();
        assert!(store.get_model("local/qwen3-8b").unwrap().unwrap().last_used.is_some());
    }
}
