// ── Switchyard: Registry Store ─────────────────────────────────────────────
// Typed access to the embedded SQLite registry: models, capabilities,
// rules, policy, lookup tables, budget ledger, rate limits, health and
// request logs. One connection behind a Mutex; every method is a single
// short prepared-statement step, so callers can treat store calls as
// non-suspending.
//
// Failure policy: read failures are fatal to the current request;
// log/ledger write failures are non-fatal and swallowed at the call site
// (logged to stderr, request continues).

pub mod budget;
pub mod limits;
pub mod logs;
pub mod models;
pub mod rules;
pub mod schema;

pub use budget::{BudgetStatus, SpendRow};
pub use limits::RATE_LIMIT_WINDOW_SECS;
pub use logs::{HealthLogRow, RequestLogRow, UNHEALTHY_THRESHOLD};
pub use models::{ModelLocation, ModelRecord, WireFormat};
pub use rules::{LookupTables, RoutingPolicy, RoutingRule, RuleAction};

use crate::error::GatewayResult;
use log::info;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

/// Thread-safe registry wrapper. Concurrent readers are serialized through
/// the mutex; WAL keeps on-disk readers cheap.
pub struct RegistryStore {
    pub(crate) conn: Mutex<Connection>,
}

impl RegistryStore {
    /// Open (or create) the registry database and run migrations.
    pub fn open(path: &Path) -> GatewayResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("[store] Opening registry at {}", path.display());

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory registry for tests.
    pub fn open_in_memory() -> GatewayResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> GatewayResult<Self> {
        // WAL for concurrent on-disk readers; a no-op on :memory:.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(RegistryStore { conn: Mutex::new(conn) })
    }

    /// Run `f` with the locked connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> GatewayResult<T> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&conn)?)
    }

    /// True when the underlying database answers a trivial query.
    pub fn is_reachable(&self) -> bool {
        self.with_conn(|c| c.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)))
            .is_ok()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_migrates_and_seeds() {
        let store = RegistryStore::open_in_memory().unwrap();
        assert!(store.is_reachable());

        // Seeded registry is non-empty and routable out of the box.
        let models = store.list_enabled_healthy_models(None).unwrap();
        assert!(!models.is_empty());
        let rules = store.load_rules().unwrap();
        assert!(!rules.is_empty());
        let policy = store.load_policy().unwrap();
        assert!(policy.fallback_model_id.is_some());
    }

    #[test]
    fn migrations_are_idempotent() {
        let store = RegistryStore::open_in_memory().unwrap();
        // Re-running against the same connection must be a no-op.
        store
            .with_conn(|c| {
                schema::run_migrations(c).map_err(|_| rusqlite::Error::InvalidQuery)?;
                Ok(())
            })
            .unwrap();
        let models = store.list_enabled_healthy_models(None).unwrap();
        assert!(!models.is_empty());
    }
}
