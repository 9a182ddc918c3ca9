// ── Switchyard: Model Listing & Liveness ───────────────────────────────────

use super::SharedState;
use crate::types::unix_now;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDateTime;
use log::error;
use serde_json::json;

/// `GET /v1/models` — OpenAI list shape over the enabled fleet, already
/// ordered by location then quality descending by the store.
pub async fn list_models(State(state): State<SharedState>) -> Response {
    let models = match state.store.list_enabled_models() {
        Ok(m) => m,
        Err(e) => {
            error!("[gateway] Model listing failed: {e}");
            return super::error_response(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "Registry unavailable");
        }
    };

    let data: Vec<_> = models
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "object": "model",
                "created": created_unix(&m.created_at),
                "owned_by": m.provider,
            })
        })
        .collect();

    Json(json!({"object": "list", "data": data})).into_response()
}

/// `GET /health` — 200 when the store answers and at least one enabled
/// model is healthy, else 503. Always reports counts and budget state.
pub async fn health(State(state): State<SharedState>) -> Response {
    let database_ok = state.store.is_reachable();

    let (total, healthy) = if database_ok {
        state.store.model_health_counts().unwrap_or((0, 0))
    } else {
        (0, 0)
    };

    let budget = state.ledger.status().ok();
    let ok = database_ok && healthy > 0;

    let body = json!({
        "status": if ok { "ok" } else { "degraded" },
        "database": if database_ok { "ok" } else { "unreachable" },
        "models": {
            "total": total,
            "healthy": healthy,
            "unhealthy": total - healthy,
        },
        "budget": budget.map(|b| json!({
            "daily_spend": b.daily_spend,
            "daily_limit": b.daily_limit,
            "monthly_spend": b.monthly_spend,
            "monthly_limit": b.monthly_limit,
        })),
    });

    let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}

/// SQLite `datetime('now')` strings to unix seconds; unparseable stamps
/// read as "now" rather than lying with 0.
fn created_unix(stamp: &str) -> i64 {
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_else(|_| unix_now())
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_parses_sqlite_datetime() {
        let ts = created_unix("2025-03-01 12:00:00");
        assert_eq!(ts, 1_740_830_400);
        // Garbage falls back to the current time, never zero.
        assert!(created_unix("not a date") > 1_500_000_000);
    }
}
