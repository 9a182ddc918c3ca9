// ── Switchyard: Provider Rate-Limit Rows ───────────────────────────────────
// A provider marked limited excludes every model behind it from selection
// until `retry_after` passes; expiry is lazy (cleared on the next
// selection pass), never an explicit unlock.

use super::RegistryStore;
use crate::error::GatewayResult;
use rusqlite::params;

/// How long a 429 keeps a provider out of the candidate pool.
pub const RATE_LIMIT_WINDOW_SECS: i64 = 60;

impl RegistryStore {
    /// Mark a provider limited for the standard window starting at `now`
    /// (epoch seconds).
    pub fn mark_provider_limited(&self, provider: &str, now: i64) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO provider_rate_limits (provider, is_limited, limited_since, retry_after)
                 VALUES (?1, 1, ?2, ?3)
                 ON CONFLICT (provider) DO UPDATE SET
                     is_limited = 1,
                     limited_since = excluded.limited_since,
                     retry_after = excluded.retry_after",
                params![provider, now, now + RATE_LIMIT_WINDOW_SECS],
            )?;
            Ok(())
        })
    }

    /// Clear rows whose window has passed. Called before each candidate
    /// selection.
    pub fn clear_expired_limits(&self, now: i64) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute(
                "UPDATE provider_rate_limits
                 SET is_limited = 0, limited_since = NULL, retry_after = NULL
                 WHERE is_limited = 1 AND retry_after IS NOT NULL AND retry_after < ?1",
                params![now],
            )?;
            Ok(())
        })
    }

    /// Providers currently excluded from selection.
    pub fn list_limited_providers(&self) -> GatewayResult<Vec<String>> {
        self.with_conn(|c| {
            let mut stmt =
                c.prepare("SELECT provider FROM provider_rate_limits WHERE is_limited = 1")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// The retry_after stamp for a provider, for tests and debugging.
    pub fn provider_retry_after(&self, provider: &str) -> GatewayResult<Option<i64>> {
        self.with_conn(|c| {
            match c.query_row(
                "SELECT retry_after FROM provider_rate_limits WHERE provider = ?1 AND is_limited = 1",
                params![provider],
                |r| r.get(0),
            ) {
                Ok(v) => Ok(Some(v)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
