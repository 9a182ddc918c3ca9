// ── Switchyard: Router Orchestrator ────────────────────────────────────────
// Extracts request metadata, runs the three tiers in order, and produces
// a RoutingDecision for the dispatcher. Tier-1 is the deterministic rule
// table; Tier-2 classifies and selects; Tier-3 is the configured
// fallback. "No available model" is the only failure this stage emits.

pub mod classifier;
pub mod rules;
pub mod selector;

pub use classifier::Classifier;
pub use rules::{RuleMatcher, RuleOutcome, RulesCache};
pub use selector::{CandidateSelector, RankedCandidate, SelectionCriteria};

use crate::budget::BudgetLedger;
use crate::error::{GatewayError, GatewayResult};
use crate::store::{RegistryStore, RuleAction};
use crate::types::{ChatRequest, ClassificationResult, RequestMeta};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

/// The routing engine's verdict for one request.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Which tier produced the decision (1..3).
    pub tier: u8,
    /// The rule that matched, when one did (including the classify rule
    /// that chained into Tier-2).
    pub rule_id: Option<i64>,
    /// Present iff Tier-2 ran.
    pub classification: Option<ClassificationResult>,
    /// Ranked candidates; never empty.
    pub candidates: Vec<RankedCandidate>,
}

pub struct Router {
    store: Arc<RegistryStore>,
    matcher: RuleMatcher,
    classifier: Classifier,
    selector: CandidateSelector,
}

impl Router {
    pub fn new(store: Arc<RegistryStore>, ledger: Arc<BudgetLedger>, classifier: Classifier) -> Self {
        Router {
            matcher: RuleMatcher::new(store.clone()),
            selector: CandidateSelector::new(store.clone(), ledger),
            classifier,
            store,
        }
    }

    /// Drop the cached rule table after operator edits.
    pub fn invalidate_rules(&self) {
        self.matcher.invalidate_cache();
    }

    /// Run the three tiers. `Err(NoAvailableModel)` means a rejection
    /// rule fired or every tier came up empty.
    pub async fn route(&self, request: &ChatRequest, source: Option<String>, channel: Option<String>) -> GatewayResult<RoutingDecision> {
        let meta = extract_metadata(request, source, channel);

        // ── Tier 1: rule table ─────────────────────────────────────
        let mut matched_rule_id = None;
        if let RuleOutcome::Match(rule) = self.matcher.evaluate(&meta)? {
            matched_rule_id = Some(rule.id);
            match rule.action {
                RuleAction::Route | RuleAction::RouteSelf => {
                    let target = match rule.action {
                        RuleAction::Route => rule.target_model_id.clone(),
                        _ => rule.target_model_id.clone().or(self.store.load_policy()?.router_model_id),
                    };
                    match target.as_deref().map(|id| self.store.get_model(id)).transpose()?.flatten() {
                        Some(model) => {
                            info!("[router] Tier-1 rule {} -> {}", rule.id, model.id);
                            return Ok(RoutingDecision {
                                tier: 1,
                                rule_id: Some(rule.id),
                                classification: None,
                                candidates: vec![RankedCandidate { model, rank: 1 }],
                            });
                        }
                        None => {
                            // The rule names a model the registry does not
                            // have; fall through to Tier-2.
                            warn!(
                                "[router] Rule {} targets unknown model {:?}, falling through",
                                rule.id, target
                            );
                        }
                    }
                }
                RuleAction::Reject => {
                    info!("[router] Tier-1 rule {} rejected the request", rule.id);
                    return Err(GatewayError::NoAvailableModel);
                }
                RuleAction::Classify | RuleAction::Queue => {
                    debug!("[router] Rule {} chains to the classifier", rule.id);
                }
            }
        }

        // ── Tier 2: classify then select ───────────────────────────
        let classification = self.classifier.classify(&meta.text_preview).await;
        let tables = self.store.load_lookup_tables()?;
        let criteria = SelectionCriteria {
            quality_floor: tables.quality_floor(classification.complexity.as_str()),
            capability: tables.capability(&classification.task_type),
            sensitive: classification.sensitive,
            estimated_tokens: classification.estimated_tokens,
        };
        let candidates = self.selector.select(&criteria)?;
        if !candidates.is_empty() {
            info!(
                "[router] Tier-2 {} candidates, best {}",
                candidates.len(),
                candidates[0].model.id
            );
            return Ok(RoutingDecision {
                tier: 2,
                rule_id: matched_rule_id,
                classification: Some(classification),
                candidates,
            });
        }

        // ── Tier 3: configured fallback ────────────────────────────
        let fallback = self.selector.fallback_candidates()?;
        if !fallback.is_empty() {
            info!("[router] Tier-3 fallback {}", fallback[0].model.id);
            return Ok(RoutingDecision {
                tier: 3,
                rule_id: matched_rule_id,
                classification: Some(classification),
                candidates: fallback,
            });
        }

        Err(GatewayError::NoAvailableModel)
    }
}

/// Pull the rule-matching metadata out of a request. The preview is the
/// last user message's string content; structured content counts as
/// media and contributes nothing to the preview.
pub fn extract_metadata(request: &ChatRequest, source: Option<String>, channel: Option<String>) -> RequestMeta {
    let messages = request.message_list();

    let text_preview = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.text().to_string())
        .unwrap_or_default();

    let total_chars: usize = messages.iter().map(|m| m.text().chars().count()).sum();
    let estimated_tokens = ((total_chars as i64) + 3) / 4;
    let estimated_tokens = estimated_tokens.max(100);

    let has_media = messages
        .iter()
        .any(|m| !matches!(m.content, Value::String(_) | Value::Null));

    RequestMeta { text_preview, estimated_tokens, has_media, source, channel }
}

// ── Tests ──────────────────────────────────────────────────────────────────
