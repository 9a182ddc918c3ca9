// ── Switchyard: Budget Ledger ──────────────────────────────────────────────
// Per-day and per-month cost accumulation plus the routing gate. Cost is
// recorded once per completed request, after the stream has fully
// delivered, against the model that actually served it.

use crate::error::GatewayResult;
use crate::store::{BudgetStatus, ModelRecord, RegistryStore};
use chrono::Utc;
use std::sync::Arc;

pub struct BudgetLedger {
    store: Arc<RegistryStore>,
}

impl BudgetLedger {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        BudgetLedger { store }
    }

    /// `(in × price_in + out × price_out) / 1e6`, in USD.
    pub fn cost_usd(model: &ModelRecord, input_tokens: i64, output_tokens: i64) -> f64 {
        (input_tokens as f64 * model.price_in + output_tokens as f64 * model.price_out) / 1_000_000.0
    }

    /// Record one completed request against the serving model. Zero-cost
    /// requests (free models, zero usage) are a no-op; priced requests
    /// update the daily and monthly rows independently. Returns the cost.
    pub fn record_request_cost(
        &self,
        model: &ModelRecord,
        input_tokens: i64,
        output_tokens: i64,
    ) -> GatewayResult<f64> {
        let cost = Self::cost_usd(model, input_tokens, output_tokens);
        if cost <= 0.0 {
            return Ok(cost);
        }

        let (day, month) = period_keys();
        self.store.upsert_spend("daily", &day, cost, input_tokens, output_tokens)?;
        self.store.upsert_spend("monthly", &month, cost, input_tokens, output_tokens)?;
        Ok(cost)
    }

    /// True iff either period's accumulated spend has reached its policy
    /// limit. Limits of zero (or below) never gate.
    pub fn is_exceeded(&self) -> GatewayResult<bool> {
        let policy = self.store.load_policy()?;
        let (day, month) = period_keys();

        let daily = self.store.get_spend("daily", &day)?;
        if policy.daily_budget_usd > 0.0 && daily.total_spend_usd >= policy.daily_budget_usd {
            return Ok(true);
        }

        let monthly = self.store.get_spend("monthly", &month)?;
        Ok(policy.monthly_budget_usd > 0.0 && monthly.total_spend_usd >= policy.monthly_budget_usd)
    }

    pub fn status(&self) -> GatewayResult<BudgetStatus> {
        let policy = self.store.load_policy()?;
        let (day, month) = period_keys();
        Ok(BudgetStatus {
            daily_spend: self.store.get_spend("daily", &day)?.total_spend_usd,
            daily_limit: policy.daily_budget_usd,
            monthly_spend: self.store.get_spend("monthly", &month)?.total_spend_usd,
            monthly_limit: policy.monthly_budget_usd,
        })
    }
}

/// (ISO date, year-month) keys for the current UTC instant.
fn period_keys() -> (String, String) {
    let now = Utc::now();
    (now.format("%Y-%m-%d").to_string(), now.format("%Y-%m").to_string())
}

// ── Tests ──────────────────────────────────────────────────────────────────
