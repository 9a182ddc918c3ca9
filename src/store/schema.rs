// ── Switchyard: Schema & Migrations ────────────────────────────────────────
// Versioned, idempotent migrations tracked in `_migrations`. Each entry
// runs at most once per database; the statements themselves are also
// written to be re-runnable (IF NOT EXISTS / INSERT OR IGNORE) so a
// half-applied batch can be replayed safely.
//
// Migration 0002 seeds a default fleet, rule table, policy and lookup
// tables so a fresh gateway is routable out of the box. Operators edit
// these rows afterwards; re-running never clobbers their edits.

use crate::error::GatewayResult;
use log::info;
use rusqlite::{params, Connection};

pub fn run_migrations(conn: &Connection) -> GatewayResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM _migrations WHERE name = ?1)",
            params![name],
            |r| r.get(0),
        )?;
        if applied {
            continue;
        }
        info!("[store] Applying migration {name}");
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO _migrations (name) VALUES (?1)", params![name])?;
    }

    Ok(())
}

const MIGRATIONS: &[(&str, &str)] = &[("0001_registry", REGISTRY_SCHEMA), ("0002_seed", SEED_DATA)];

const REGISTRY_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS models (
        id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        provider TEXT NOT NULL,
        location TEXT NOT NULL CHECK (location IN ('co_located', 'lan', 'cloud')),
        endpoint TEXT NOT NULL,
        wire_format TEXT NOT NULL DEFAULT 'openai',
        api_key_env TEXT,
        quality_score INTEGER NOT NULL DEFAULT 50,
        context_window INTEGER NOT NULL DEFAULT 8192,
        max_output_tokens INTEGER NOT NULL DEFAULT 4096,
        supports_tools INTEGER NOT NULL DEFAULT 0,
        supports_vision INTEGER NOT NULL DEFAULT 0,
        supports_reasoning INTEGER NOT NULL DEFAULT 0,
        price_in REAL NOT NULL DEFAULT 0,
        price_out REAL NOT NULL DEFAULT 0,
        price_cache_read REAL NOT NULL DEFAULT 0,
        price_cache_write REAL NOT NULL DEFAULT 0,
        latency_p50_ms INTEGER,
        latency_p99_ms INTEGER,
        hardware TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        healthy INTEGER NOT NULL DEFAULT 1,
        last_health_check TEXT,
        last_used TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS model_capabilities (
        model_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
        capability TEXT NOT NULL,
        PRIMARY KEY (model_id, capability)
    );

    CREATE TABLE IF NOT EXISTS routing_rules (
        id INTEGER PRIMARY KEY,
        priority INTEGER NOT NULL,
        source TEXT,
        channel TEXT,
        pattern TEXT,
        token_max INTEGER,
        has_media INTEGER,
        target_model_id TEXT,
        action TEXT NOT NULL DEFAULT 'classify'
            CHECK (action IN ('route', 'route_self', 'classify', 'reject', 'queue')),
        enabled INTEGER NOT NULL DEFAULT 1,
        description TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_rules_priority ON routing_rules(enabled, priority);

    CREATE TABLE IF NOT EXISTS routing_policy (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        min_quality_score INTEGER NOT NULL DEFAULT 0,
        max_cost_per_mtok REAL NOT NULL DEFAULT 0,
        max_latency_ms INTEGER NOT NULL DEFAULT 0,
        preferred_locations TEXT NOT NULL DEFAULT 'co_located,lan,cloud',
        quality_tolerance INTEGER NOT NULL DEFAULT 0,
        daily_budget_usd REAL NOT NULL DEFAULT 0,
        monthly_budget_usd REAL NOT NULL DEFAULT 0,
        fallback_model_id TEXT,
        router_model_id TEXT
    );

    CREATE TABLE IF NOT EXISTS complexity_floor (
        complexity TEXT PRIMARY KEY,
        quality_floor INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS task_capability (
        task_type TEXT PRIMARY KEY,
        capability TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS budget_ledger (
        period_type TEXT NOT NULL CHECK (period_type IN ('daily', 'monthly')),
        period_key TEXT NOT NULL,
        total_spend_usd REAL NOT NULL DEFAULT 0,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        request_count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (period_type, period_key)
    );

    CREATE TABLE IF NOT EXISTS provider_rate_limits (
        provider TEXT PRIMARY KEY,
        is_limited INTEGER NOT NULL DEFAULT 0,
        limited_since INTEGER,
        retry_after INTEGER,
        rpm_count INTEGER NOT NULL DEFAULT 0,
        tpm_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS health_log (
        id INTEGER PRIMARY KEY,
        model_id TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        is_healthy INTEGER NOT NULL,
        latency_ms INTEGER,
        error TEXT,
        consecutive_failures INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_health_model ON health_log(model_id, id);
    CREATE INDEX IF NOT EXISTS idx_health_created ON health_log(created_at);

    CREATE TABLE IF NOT EXISTS request_log (
        id INTEGER PRIMARY KEY,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        source TEXT,
        channel TEXT,
        tier INTEGER NOT NULL,
        rule_id INTEGER,
        classification TEXT,
        selected_model TEXT NOT NULL,
        preview TEXT,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        cost_usd REAL NOT NULL DEFAULT 0,
        latency_ms INTEGER NOT NULL DEFAULT 0,
        success INTEGER NOT NULL DEFAULT 1
    );
    CREATE INDEX IF NOT EXISTS idx_request_created ON request_log(created_at);
";

const SEED_DATA: &str = "
    -- ── Default fleet ──────────────────────────────────────────────
    -- Zero-priced co-located / LAN models, priced cloud models.
    INSERT OR IGNORE INTO models
        (id, display_name, provider, location, endpoint, wire_format, api_key_env,
         quality_score, context_window, max_output_tokens,
         supports_tools, supports_vision, supports_reasoning,
         price_in, price_out, price_cache_read, price_cache_write,
         latency_p50_ms, latency_p99_ms, hardware)
    VALUES
        ('local/qwen3-8b', 'Qwen3 8B (gateway host)', 'local', 'co_located',
         'http://127.0.0.1:11434/v1', 'openai', NULL,
         35, 32768, 4096, 1, 0, 0, 0, 0, 0, 0, 180, 900, 'RTX 4090, 24GB'),
        ('lan/qwen3-coder-30b', 'Qwen3 Coder 30B', 'lan', 'lan',
         'http://10.20.0.12:8080/v1', 'openai', NULL,
         70, 131072, 8192, 1, 0, 0, 0, 0, 0, 0, 420, 2600, '2x RTX 3090'),
        ('lan/llama-3.3-70b', 'Llama 3.3 70B', 'lan', 'lan',
         'http://10.20.0.13:8080/v1', 'openai', NULL,
         72, 131072, 8192, 1, 0, 0, 0, 0, 0, 0, 550, 3400, '4x A5000'),
        ('anthropic/claude-sonnet-4', 'Claude Sonnet 4', 'anthropic', 'cloud',
         'https://api.anthropic.com/v1', 'anthropic', 'ANTHROPIC_API_KEY',
         92, 200000, 8192, 1, 1, 1, 3.0, 15.0, 0.3, 3.75, 900, 6000, NULL),
        ('anthropic/claude-haiku-3-5', 'Claude Haiku 3.5', 'anthropic', 'cloud',
         'https://api.anthropic.com/v1', 'anthropic', 'ANTHROPIC_API_KEY',
         78, 200000, 8192, 1, 1, 0, 0.8, 4.0, 0.08, 1.0, 600, 3500, NULL),
        ('openai/gpt-4o-mini', 'GPT-4o mini', 'openai', 'cloud',
         'https://api.openai.com/v1', 'openai', 'OPENAI_API_KEY',
         75, 128000, 16384, 1, 1, 0, 0.15, 0.6, 0.075, 0, 650, 3800, NULL);

    INSERT OR IGNORE INTO model_capabilities (model_id, capability) VALUES
        ('local/qwen3-8b', 'conversation'),
        ('local/qwen3-8b', 'simple_qa'),
        ('local/qwen3-8b', 'classification'),
        ('local/qwen3-8b', 'summarization'),
        ('local/qwen3-8b', 'extraction'),
        ('lan/qwen3-coder-30b', 'coding'),
        ('lan/qwen3-coder-30b', 'math'),
        ('lan/qwen3-coder-30b', 'tool_calling'),
        ('lan/qwen3-coder-30b', 'analysis'),
        ('lan/qwen3-coder-30b', 'multi_step'),
        ('lan/qwen3-coder-30b', 'extraction'),
        ('lan/llama-3.3-70b', 'complex_logic'),
        ('lan/llama-3.3-70b', 'analysis'),
        ('lan/llama-3.3-70b', 'writing'),
        ('lan/llama-3.3-70b', 'summarization'),
        ('lan/llama-3.3-70b', 'conversation'),
        ('lan/llama-3.3-70b', 'multi_step'),
        ('anthropic/claude-sonnet-4', 'coding'),
        ('anthropic/claude-sonnet-4', 'math'),
        ('anthropic/claude-sonnet-4', 'complex_logic'),
        ('anthropic/claude-sonnet-4', 'tool_calling'),
        ('anthropic/claude-sonnet-4', 'analysis'),
        ('anthropic/claude-sonnet-4', 'writing'),
        ('anthropic/claude-sonnet-4', 'multi_step'),
        ('anthropic/claude-sonnet-4', 'reasoning'),
        ('anthropic/claude-haiku-3-5', 'conversation'),
        ('anthropic/claude-haiku-3-5', 'simple_qa'),
        ('anthropic/claude-haiku-3-5', 'summarization'),
        ('anthropic/claude-haiku-3-5', 'extraction'),
        ('anthropic/claude-haiku-3-5', 'classification'),
        ('anthropic/claude-haiku-3-5', 'writing'),
        ('openai/gpt-4o-mini', 'conversation'),
        ('openai/gpt-4o-mini', 'simple_qa'),
        ('openai/gpt-4o-mini', 'summarization'),
        ('openai/gpt-4o-mini', 'extraction'),
        ('openai/gpt-4o-mini', 'classification'),
        ('openai/gpt-4o-mini', 'tool_calling'),
        ('openai/gpt-4o-mini', 'writing');

    -- ── Rule table ─────────────────────────────────────────────────
    INSERT OR IGNORE INTO routing_rules
        (id, priority, source, channel, pattern, token_max, has_media,
         target_model_id, action, description)
    VALUES
        (1, 10, 'heartbeat', NULL, NULL, NULL, NULL, NULL, 'route_self',
         'Heartbeat pings stay on the self model'),
        (2, 20, 'cron', NULL, NULL, 4000, NULL, NULL, 'route_self',
         'Short scheduled jobs stay local'),
        (3, 40, NULL, NULL,
         '^(hi|hello|hey|yo|thanks|thank you|good (morning|afternoon|evening))[.!?\\s]*$',
         NULL, NULL, NULL, 'route_self', 'Greetings never need a big model'),
        (4, 50, NULL, NULL, NULL, NULL, 1, 'anthropic/claude-sonnet-4', 'route',
         'Media requests go straight to a vision-capable model'),
        (5, 900, NULL, NULL, NULL, NULL, NULL, NULL, 'classify',
         'Catch-all: hand off to the classifier');

    -- ── Policy singleton ───────────────────────────────────────────
    INSERT OR IGNORE INTO routing_policy
        (id, min_quality_score, max_cost_per_mtok, max_latency_ms,
         preferred_locations, quality_tolerance, daily_budget_usd,
         monthly_budget_usd, fallback_model_id, router_model_id)
    VALUES
        (1, 30, 20.0, 30000, 'co_located,lan,cloud', 10, 10.0, 150.0,
         'anthropic/claude-haiku-3-5', 'local/qwen3-8b');

    -- ── Lookup tables ──────────────────────────────────────────────
    INSERT OR IGNORE INTO complexity_floor (complexity, quality_floor) VALUES
        ('simple', 0), ('medium', 40), ('complex', 65), ('reasoning', 80);

    INSERT OR IGNORE INTO task_capability (task_type, capability) VALUES
        ('coding', 'coding'),
        ('math', 'math'),
        ('reasoning', 'complex_logic'),
        ('tool_use', 'tool_calling'),
        ('summarization', 'summarization'),
        ('extraction', 'extraction'),
        ('simple_qa', 'simple_qa'),
        ('conversation', 'conversation'),
        ('classification', 'classification'),
        ('analysis', 'analysis'),
        ('writing', 'writing'),
        ('multi_step', 'multi_step');
";
