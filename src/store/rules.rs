// ── Switchyard: Rules, Policy & Lookup Rows ────────────────────────────────

use super::RegistryStore;
use crate::error::GatewayResult;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a matched rule tells the router to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Route to `target_model_id`.
    Route,
    /// Route to the configured self model.
    RouteSelf,
    /// Hand off to the Tier-2 classifier.
    Classify,
    /// Refuse the request ("no available model").
    Reject,
    /// Reserved; currently falls through like `classify`.
    Queue,
}

impl RuleAction {
    fn parse(s: &str) -> Self {
        match s {
            "route" => RuleAction::Route,
            "route_self" => RuleAction::RouteSelf,
            "reject" => RuleAction::Reject,
            "queue" => RuleAction::Queue,
            _ => RuleAction::Classify,
        }
    }
}

/// One row of the Tier-1 rule table. Absent predicates are wildcards; a
/// rule with no predicates at all is a catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: i64,
    pub priority: i64,
    pub source: Option<String>,
    pub channel: Option<String>,
    pub pattern: Option<String>,
    pub token_max: Option<i64>,
    pub has_media: Option<bool>,
    pub target_model_id: Option<String>,
    pub action: RuleAction,
    pub description: Option<String>,
}

impl RoutingRule {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let action: String = row.get("action")?;
        Ok(RoutingRule {
            id: row.get("id")?,
            priority: row.get("priority")?,
            source: row.get("source")?,
            channel: row.get("channel")?,
            pattern: row.get("pattern")?,
            token_max: row.get("token_max")?,
            has_media: row.get("has_media")?,
            target_model_id: row.get("target_model_id")?,
            action: RuleAction::parse(&action),
            description: row.get("description")?,
        })
    }
}

/// The routing policy singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub min_quality_score: i64,
    pub max_cost_per_mtok: f64,
    pub max_latency_ms: i64,
    pub preferred_locations: String,
    pub quality_tolerance: i64,
    pub daily_budget_usd: f64,
    pub monthly_budget_usd: f64,
    pub fallback_model_id: Option<String>,
    pub router_model_id: Option<String>,
}

impl RoutingPolicy {
    /// Index of a location in the comma-separated preference order;
    /// unlisted locations sort last.
    pub fn location_rank(&self, location: super::ModelLocation) -> usize {
        let tag = location.as_str();
        self.preferred_locations
            .split(',')
            .map(str::trim)
            .position(|loc| loc == tag)
            .unwrap_or(usize::MAX)
    }
}

/// The two small classification-to-selection lookup tables, loaded whole.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    pub complexity_floor: HashMap<String, i64>,
    pub task_capability: HashMap<String, String>,
}

impl LookupTables {
    /// Quality floor for a complexity band; unknown bands default to the
    /// `medium` floor of 40.
    pub fn quality_floor(&self, complexity: &str) -> i64 {
        self.complexity_floor.get(complexity).copied().unwrap_or(40)
    }

    /// Capability for a task type; unknown task types select without a
    /// capability filter.
    pub fn capability(&self, task_type: &str) -> Option<String> {
        self.task_capability.get(task_type).cloned()
    }
}

impl RegistryStore {
    /// All enabled rules ordered by priority ascending. Callers go
    /// through the rules cache; this is the uncached read.
    pub fn load_rules(&self) -> GatewayResult<Vec<RoutingRule>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT * FROM routing_rules WHERE enabled = 1 ORDER BY priority ASC, id ASC",
            )?;
            let rows = stmt.query_map([], RoutingRule::from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// The policy singleton. A registry without one is unusable, so a
    /// missing row is an error rather than a default.
    pub fn load_policy(&self) -> GatewayResult<RoutingPolicy> {
        self.with_conn(|c| {
            c.query_row("SELECT * FROM routing_policy WHERE id = 1", [], |row| {
                Ok(RoutingPolicy {
                    min_quality_score: row.get("min_quality_score")?,
                    max_cost_per_mtok: row.get("max_cost_per_mtok")?,
                    max_latency_ms: row.get("max_latency_ms")?,
                    preferred_locations: row.get("preferred_locations")?,
                    quality_tolerance: row.get("quality_tolerance")?,
                    daily_budget_usd: row.get("daily_budget_usd")?,
                    monthly_budget_usd: row.get("monthly_budget_usd")?,
                    fallback_model_id: row.get("fallback_model_id")?,
                    router_model_id: row.get("router_model_id")?,
                })
            })
        })
    }

    /// Operator edit: add a rule. Callers should invalidate the rules
    /// cache afterwards.
    pub fn insert_rule(&self, rule: &RoutingRule) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO routing_rules
                     (priority, source, channel, pattern, token_max, has_media,
                      target_model_id, action, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    rule.priority,
                    rule.source,
                    rule.channel,
                    rule.pattern,
                    rule.token_max,
                    rule.has_media,
                    rule.target_model_id,
                    match rule.action {
                        RuleAction::Route => "route",
                        RuleAction::RouteSelf => "route_self",
                        RuleAction::Classify => "classify",
                        RuleAction::Reject => "reject",
                        RuleAction::Queue => "queue",
                    },
                    rule.description,
                ],
            )?;
            Ok(())
        })
    }

    /// Operator edit: drop the whole rule table (tests and re-seeding).
    pub fn clear_rules(&self) -> GatewayResult<()> {
        self.with_conn(|c| {
            c.execute("DELETE FROM routing_rules", [])?;
            Ok(())
        })
    }

    pub fn load_lookup_tables(&self) -> GatewayResult<LookupTables> {
        self.with_conn(|c| {
            let mut tables = LookupTables::default();

            let mut stmt = c.prepare("SELECT complexity, quality_floor FROM complexity_floor")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (k, v) = row?;
                tables.complexity_floor.insert(k, v);
            }

            let mut stmt = c.prepare("SELECT task_type, capability FROM task_capability")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
            for row in rows {
                let (k, v) = row?;
                tables.task_capability.insert(k, v);
            }

            Ok(tables)
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
