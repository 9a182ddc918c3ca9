// ── Switchyard: Candidate Selector & Tier-3 Fallback ───────────────────────
// Hard filters in a fixed order, then the soft quality-tolerance step,
// then the three-key sort. Every model that survives is ranked 1..N and
// the dispatcher tries them strictly in that order.

use crate::budget::BudgetLedger;
use crate::error::GatewayResult;
use crate::store::{ModelLocation, ModelRecord, RegistryStore, RoutingPolicy};
use crate::types::unix_now;
use log::debug;
use serde::Serialize;
use std::sync::Arc;

/// What the selector filters against, mapped from a classification.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub quality_floor: i64,
    pub capability: Option<String>,
    pub sensitive: bool,
    pub estimated_tokens: i64,
}

/// A model that passed every filter, with its 1-based dispatch order.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub model: ModelRecord,
    pub rank: u32,
}

pub struct CandidateSelector {
    store: Arc<RegistryStore>,
    ledger: Arc<BudgetLedger>,
}

impl CandidateSelector {
    pub fn new(store: Arc<RegistryStore>, ledger: Arc<BudgetLedger>) -> Self {
        CandidateSelector { store, ledger }
    }

    /// Filter and rank the fleet for one request.
    pub fn select(&self, criteria: &SelectionCriteria) -> GatewayResult<Vec<RankedCandidate>> {
        // Expired rate-limit rows are cleared lazily, right before the
        // pool is read; the budget gate is evaluated once per request.
        self.store.clear_expired_limits(unix_now())?;
        let budget_exceeded = self.ledger.is_exceeded()?;
        let policy = self.store.load_policy()?;

        let mut pool = self
            .store
            .list_enabled_healthy_models(criteria.capability.as_deref())?;

        let limited = self.store.list_limited_providers()?;
        pool.retain(|m| !limited.contains(&m.provider));

        pool.retain(|m| m.context_window >= criteria.estimated_tokens);

        if criteria.sensitive {
            pool.retain(|m| m.location != ModelLocation::Cloud);
        }

        if budget_exceeded {
            pool.retain(|m| m.location != ModelLocation::Cloud);
        }

        let pool = apply_quality_tolerance(pool, criteria.quality_floor, policy.quality_tolerance);

        Ok(rank(pool, &policy))
    }

    /// Tier-3: a single-entry list naming the policy's fallback model,
    /// ignoring the privacy and budget gates. Empty when unset,
    /// disabled, or unhealthy.
    pub fn fallback_candidates(&self) -> GatewayResult<Vec<RankedCandidate>> {
        let policy = self.store.load_policy()?;
        let Some(fallback_id) = policy.fallback_model_id else {
            return Ok(Vec::new());
        };
        let Some(model) = self.store.get_model(&fallback_id)? else {
            debug!("[selector] Fallback model {fallback_id} not in registry");
            return Ok(Vec::new());
        };
        if !model.enabled || !model.healthy {
            return Ok(Vec::new());
        }
        Ok(vec![RankedCandidate { model, rank: 1 }])
    }
}

/// Strict set first; when empty, only zero-priced models may reach above
/// their weight (quality ≥ floor − tolerance ∧ price_out = 0).
fn apply_quality_tolerance(pool: Vec<ModelRecord>, floor: i64, tolerance: i64) -> Vec<ModelRecord> {
    let strict: Vec<ModelRecord> = pool.iter().filter(|m| m.quality_score >= floor).cloned().collect();
    if !strict.is_empty() {
        return strict;
    }
    pool.into_iter()
        .filter(|m| m.quality_score >= floor - tolerance && m.price_out == 0.0)
        .collect()
}

/// Three-key lexicographic order: location preference, combined price
/// ascending, quality descending. Ranks are assigned 1..N in sort order.
fn rank(mut pool: Vec<ModelRecord>, policy: &RoutingPolicy) -> Vec<RankedCandidate> {
    pool.sort_by(|a, b| {
        policy
            .location_rank(a.location)
            .cmp(&policy.location_rank(b.location))
            .then(a.combined_price().total_cmp(&b.combined_price()))
            .then(b.quality_score.cmp(&a.quality_score))
    });
    pool.into_iter()
        .enumerate()
        .map(|(i, model)| RankedCandidate { model, rank: i as u32 + 1 })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────
