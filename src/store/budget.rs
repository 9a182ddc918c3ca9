// ── Switchyard: Budget Ledger Rows ─────────────────────────────────────────
// Daily and monthly spend accumulators. The upsert is a single statement
// so concurrent priced requests never lose an increment.

use super::RegistryStore;
use crate::error::GatewayResult;
use rusqlite::params;
use serde::Serialize;

/// One accumulator row, keyed by (period_type, period_key).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpendRow {
    pub total_spend_usd: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub request_count: i64,
}

/// Spends and limits surfaced on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub daily_spend: f64,
    pub daily_limit: f64,
    pub monthly_spend: f64,
    pub monthly_limit: f64,
}

impl RegistryStore {
    /// Atomically add one priced request to the given period row.
    pub fn upsert_spend(
        &self,
        period_type: &str,
        period_key: &str,
        cost_usd: f64,
        input_tokens: i64,
        output_tokens: i64,
    ) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO budget_ledger
                     (period_type, period_key, total_spend_usd, input_tokens, output_tokens, request_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)
                 ON CONFLICT (period_type, period_key) DO UPDATE SET
                     total_spend_usd = total_spend_usd + excluded.total_spend_usd,
                     input_tokens = input_tokens + excluded.input_tokens,
                     output_tokens = output_tokens + excluded.output_tokens,
                     request_count = request_count + 1",
                params![period_type, period_key, cost_usd, input_tokens, output_tokens],
            )?;
            Ok(())
        })
    }

    /// Read one period row; missing rows read as all-zero.
    pub fn get_spend(&self, period_type: &str, period_key: &str) -> GatewayResult<SpendRow> {
        self.with_conn(|c| {
            match c.query_row(
                "SELECT total_spend_usd, input_tokens, output_tokens, request_count
                 FROM budget_ledger WHERE period_type = ?1 AND period_key = ?2",
                params![period_type, period_key],
                |r| {
                    Ok(SpendRow {
                        total_spend_usd: r.get(0)?,
                        input_tokens: r.get(1)?,
                        output_tokens: r.get(2)?,
                        request_count: r.get(3)?,
                    })
                },
            ) {
                Ok(row) => Ok(row),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(SpendRow::default()),
                Err(e) => Err(e),
            }
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
