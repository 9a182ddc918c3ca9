// ── Switchyard: Model Registry Rows ────────────────────────────────────────
// The model record is the unit the whole pipeline trades in: the selector
// filters and ranks them, the dispatcher hands them to adapters, the
// ledger prices against them.

use super::RegistryStore;
use crate::error::GatewayResult;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

/// Deployment class of a model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLocation {
    CoLocated,
    Lan,
    Cloud,
}

impl ModelLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelLocation::CoLocated => "co_located",
            ModelLocation::Lan => "lan",
            ModelLocation::Cloud => "cloud",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "co_located" => Some(ModelLocation::CoLocated),
            "lan" => Some(ModelLocation::Lan),
            "cloud" => Some(ModelLocation::Cloud),
            _ => None,
        }
    }
}

/// Wire protocol spoken by a model endpoint. Unknown tags fall back to
/// the OpenAI shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    pub display_name: String,
    pub provider: String,
    pub location: ModelLocation,
    pub endpoint: String,
    pub wire_format: WireFormat,
    pub api_key_env: Option<String>,
    pub quality_score: i64,
    pub context_window: i64,
    pub max_output_tokens: i64,
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub supports_reasoning: bool,
    pub price_in: f64,
    pub price_out: f64,
    pub price_cache_read: f64,
    pub price_cache_write: f64,
    pub latency_p50_ms: Option<i64>,
    pub latency_p99_ms: Option<i64>,
    pub hardware: Option<String>,
    pub enabled: bool,
    pub healthy: bool,
    pub last_health_check: Option<String>,
    pub last_used: Option<String>,
    pub created_at: String,
}

impl ModelRecord {
    /// The name sent on the wire: the part after the provider prefix
    /// (`anthropic/claude-sonnet-4` → `claude-sonnet-4`). Ids without a
    /// prefix pass through whole.
    pub fn api_model_name(&self) -> &str {
        self.id.split('/').next_back().unwrap_or(&self.id)
    }

    /// Combined per-mtok price used as the ranking cost key.
    pub fn combined_price(&self) -> f64 {
        self.price_in + self.price_out
    }

    /// Resolve the credential named by `api_key_env`, treating empty
    /// values as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        let var = self.api_key_env.as_deref()?;
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let location: String = row.get("location")?;
        let wire_format: String = row.get("wire_format")?;
        Ok(ModelRecord {
            id: row.get("id")?,
            display_name: row.get("display_name")?,
            provider: row.get("provider")?,
            location: ModelLocation::parse(&location).unwrap_or(ModelLocation::Cloud),
            endpoint: row.get("endpoint")?,
            wire_format: match wire_format.as_str() {
                "anthropic" => WireFormat::Anthropic,
                _ => WireFormat::OpenAi,
            },
            api_key_env: row.get("api_key_env")?,
            quality_score: row.get("quality_score")?,
            context_window: row.get("context_window")?,
            max_output_tokens: row.get("max_output_tokens")?,
            supports_tools: row.get("supports_tools")?,
            supports_vision: row.get("supports_vision")?,
            supports_reasoning: row.get("supports_reasoning")?,
            price_in: row.get("price_in")?,
            price_out: row.get("price_out")?,
            price_cache_read: row.get("price_cache_read")?,
            price_cache_write: row.get("price_cache_write")?,
            latency_p50_ms: row.get("latency_p50_ms")?,
            latency_p99_ms: row.get("latency_p99_ms")?,
            hardware: row.get("hardware")?,
            enabled: row.get("enabled")?,
            healthy: row.get("healthy")?,
            last_health_check: row.get("last_health_check")?,
            last_used: row.get("last_used")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl RegistryStore {
    /// Fetch one model by id.
    pub fn get_model(&self, id: &str) -> GatewayResult<Option<ModelRecord>> {
        self.with_conn(|c| {
            match c.query_row("SELECT * FROM models WHERE id = ?1", params![id], ModelRecord::from_row) {
                Ok(m) => Ok(Some(m)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    /// The selector's base set: enabled and currently healthy models,
    /// optionally restricted to a capability via the capability index.
    pub fn list_enabled_healthy_models(
        &self,
        capability: Option<&str>,
    ) -> GatewayResult<Vec<ModelRecord>> {
        self.with_conn(|c| {
            let mut out = Vec::new();
            match capability {
                Some(cap) => {
                    let mut stmt = c.prepare(
                        "SELECT m.* FROM models m
                         INNER JOIN model_capabilities mc ON mc.model_id = m.id
                         WHERE m.enabled = 1 AND m.healthy = 1 AND mc.capability = ?1",
                    )?;
                    let rows = stmt.query_map(params![cap], ModelRecord::from_row)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
                None => {
                    let mut stmt =
                        c.prepare("SELECT * FROM models WHERE enabled = 1 AND healthy = 1")?;
                    let rows = stmt.query_map([], ModelRecord::from_row)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
            }
            Ok(out)
        })
    }

    /// All enabled models regardless of health (health monitor probes
    /// these; `/v1/models` lists them ordered by location then quality).
    pub fn list_enabled_models(&self) -> GatewayResult<Vec<ModelRecord>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT * FROM models WHERE enabled = 1
                 ORDER BY CASE location
                     WHEN 'co_located' THEN 0
                     WHEN 'lan' THEN 1
                     ELSE 2
                 END, quality_score DESC",
            )?;
            let rows = stmt.query_map([], ModelRecord::from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Set the derived healthy flag and refresh the probe timestamp.
    pub fn set_model_health(&self, id: &str, healthy: bool) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute(
                "UPDATE models SET healthy = ?2, last_health_check = datetime('now') WHERE id = ?1",
                params![id, healthy],
            )?;
            Ok(())
        })
    }

    /// Refresh the probe timestamp without touching the healthy flag.
    pub fn touch_last_health_check(&self, id: &str) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute(
                "UPDATE models SET last_health_check = datetime('now') WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }

    /// Stamp the model as having just served a request.
    pub fn touch_last_used(&self, id: &str) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute("UPDATE models SET last_used = datetime('now') WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Operator edit: repoint a model at a different endpoint.
    pub fn set_model_endpoint(&self, id: &str, endpoint: &str) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute("UPDATE models SET endpoint = ?2 WHERE id = ?1", params![id, endpoint])?;
            Ok(())
        })
    }

    /// Operator edit: change (or clear) the credential env var a model
    /// resolves at call time.
    pub fn set_model_api_key_env(&self, id: &str, env: Option<&str>) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute("UPDATE models SET api_key_env = ?2 WHERE id = ?1", params![id, env])?;
            Ok(())
        })
    }

    /// (total, healthy) counts over enabled models, for the health endpoint.
    pub fn model_health_counts(&self) -> GatewayResult<(i64, i64)> {
        self.with_conn(|c| {
            c.query_row(
                "SELECT COUNT(*), COALESCE(SUM(healthy), 0) FROM models WHERE enabled = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
