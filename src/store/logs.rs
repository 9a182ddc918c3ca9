// ── Switchyard: Health & Request Log Rows ──────────────────────────────────
// The health log is append-only; the model's `healthy` flag is derived
// from the consecutive-failure counter carried on each row. The request
// log gets exactly one row per completed request.

use super::RegistryStore;
use crate::error::GatewayResult;
use rusqlite::{params, Row};
use serde::Serialize;

/// Consecutive probe failures before a model is flipped unhealthy.
pub const UNHEALTHY_THRESHOLD: i64 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct HealthLogRow {
    pub model_id: String,
    pub is_healthy: bool,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
    pub consecutive_failures: i64,
}

/// One completed request, as recorded by the completion handler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestLogRow {
    pub source: Option<String>,
    pub channel: Option<String>,
    pub tier: i64,
    pub rule_id: Option<i64>,
    pub classification: Option<String>,
    pub selected_model: String,
    pub preview: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub success: bool,
}

impl RegistryStore {
    /// Consecutive-failure counter on the most recent log row for a
    /// model; 0 when no row exists yet.
    pub fn latest_consecutive_failures(&self, model_id: &str) -> GatewayResult<i64> {
        self.with_conn(|c| {
            match c.query_row(
                "SELECT consecutive_failures FROM health_log
                 WHERE model_id = ?1 ORDER BY id DESC LIMIT 1",
                params![model_id],
                |r| r.get(0),
            ) {
                Ok(v) => Ok(v),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
                Err(e) => Err(e),
            }
        })
    }

    pub fn insert_health_log(&self, row: &HealthLogRow) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO health_log
                     (model_id, is_healthy, latency_ms, error, consecutive_failures)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.model_id, row.is_healthy, row.latency_ms, row.error, row.consecutive_failures],
            )?;
            Ok(())
        })
    }

    /// Record one probe failure: appends a log row with counter+1 and
    /// flips the model unhealthy once the threshold is reached. Returns
    /// the new counter. Shared by the health monitor and the
    /// dispatcher's 5xx path.
    pub fn record_probe_failure(&self, model_id: &str, error: &str) -> GatewayResult<i64> {
        let failures = self.latest_consecutive_failures(model_id)? + 1;
        self.insert_health_log(&HealthLogRow {
            model_id: model_id.to_string(),
            is_healthy: false,
            latency_ms: None,
            error: Some(error.to_string()),
            consecutive_failures: failures,
        })?;
        if failures >= UNHEALTHY_THRESHOLD {
            self.set_model_health(model_id, false)?;
        } else {
            self.touch_last_health_check(model_id)?;
        }
        Ok(failures)
    }

    /// Record one successful probe: healthy row, counter reset, flag set.
    pub fn record_probe_success(&self, model_id: &str, latency_ms: i64) -> GatewayResult<()> {
        self.insert_health_log(&HealthLogRow {
            model_id: model_id.to_string(),
            is_healthy: true,
            latency_ms: Some(latency_ms),
            error: None,
            consecutive_failures: 0,
        })?;
        self.set_model_health(model_id, true)
    }

    pub fn insert_request_log(&self, row: &RequestLogRow) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO request_log
                     (source, channel, tier, rule_id, classification, selected_model,
                      preview, input_tokens, output_tokens, cost_usd, latency_ms, success)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    row.source,
                    row.channel,
                    row.tier,
                    row.rule_id,
                    row.classification,
                    row.selected_model,
                    row.preview,
                    row.input_tokens,
                    row.output_tokens,
                    row.cost_usd,
                    row.latency_ms,
                    row.success
                ],
            )?;
            Ok(())
        })
    }

    /// Drop health rows older than `health_days` and request rows older
    /// than `request_days`. Returns (health_deleted, request_deleted).
    pub fn prune_logs(&self, health_days: i64, request_days: i64) -> GatewayResult<(usize, usize)> {
        self.with_conn(|c| {
            let health = c.execute(
                "DELETE FROM health_log WHERE created_at < datetime('now', ?1)",
                params![format!("-{health_days} days")],
            )?;
            let requests = c.execute(
                "DELETE FROM request_log WHERE created_at < datetime('now', ?1)",
                params![format!("-{request_days} days")],
            )?;
            Ok((health, requests))
        })
    }

    /// Most recent request-log rows, newest first. Used by tests.
    pub fn recent_request_logs(&self, limit: i64) -> GatewayResult<Vec<RequestLogRow>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT source, channel, tier, rule_id, classification, selected_model,
                        preview, input_tokens, output_tokens, cost_usd, latency_ms, success
                 FROM request_log ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], request_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }
}

fn request_row(r: &Row<'_>) -> rusqlite::Result<RequestLogRow> {
    Ok(RequestLogRow {
        source: r.get(0)?,
        channel: r.get(1)?,
        tier: r.get(2)?,
        rule_id: r.get(3)?,
        classification: r.get(4)?,
        selected_model: r.get(5)?,
        preview: r.get(6)?,
        input_tokens: r.get(7)?,
        output_tokens: r.get(8)?,
        cost_usd: r.get(9)?,
        latency_ms: r.get(10)?,
        success: r.get(11)?,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────
