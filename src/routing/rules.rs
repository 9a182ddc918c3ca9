// ── Switchyard: Tier-1 Rule Matcher ────────────────────────────────────────
// Deterministic rule-table evaluation. Rules are iterated in ascending
// priority; the first rule whose specified predicates all hold wins.
// Unspecified predicates are wildcards. Regex predicates see at most the
// first 500 characters of the preview; a pattern that fails to compile
// skips that one rule, never the whole tier.

use crate::error::GatewayResult;
use crate::store::{RegistryStore, RoutingRule};
use crate::types::{truncate_utf8, RequestMeta};
use log::warn;
use parking_lot::Mutex;
use regex::RegexBuilder;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a loaded rule table may be served from memory.
pub const RULES_CACHE_TTL: Duration = Duration::from_secs(5);

/// Regex predicates only ever see this much of the preview, capping
/// worst-case pattern cost.
const PATTERN_WINDOW_BYTES: usize = 500;

/// Outcome of a Tier-1 pass.
#[derive(Debug, Clone)]
pub enum RuleOutcome {
    Match(RoutingRule),
    NoMatch,
}

/// Small per-process cache of the enabled rule table, fronted by a
/// monotonic timestamp. Stale reads are acceptable up to the TTL;
/// operator edits call `invalidate`.
#[derive(Default)]
pub struct RulesCache {
    inner: Mutex<Option<(Instant, Arc<Vec<RoutingRule>>)>>,
}

impl RulesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the cached table when fresh, else reload from the store.
    pub fn load(&self, store: &RegistryStore) -> GatewayResult<Arc<Vec<RoutingRule>>> {
        {
            let guard = self.inner.lock();
            if let Some((stamp, rules)) = guard.as_ref() {
                if stamp.elapsed() < RULES_CACHE_TTL {
                    return Ok(rules.clone());
                }
            }
        }

        let fresh = Arc::new(store.load_rules()?);
        *self.inner.lock() = Some((Instant::now(), fresh.clone()));
        Ok(fresh)
    }

    /// Drop the cached table so the next load hits the store.
    pub fn invalidate(&self) {
        *self.inner.lock() = None;
    }
}

/// Evaluate the rule table against request metadata.
pub struct RuleMatcher {
    store: Arc<RegistryStore>,
    cache: RulesCache,
}

impl RuleMatcher {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        RuleMatcher { store, cache: RulesCache::new() }
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// First matching rule in priority order, or `NoMatch`.
    pub fn evaluate(&self, meta: &RequestMeta) -> GatewayResult<RuleOutcome> {
        let rules = self.cache.load(&self.store)?;
        for rule in rules.iter() {
            if rule_matches(rule, meta) {
                return Ok(RuleOutcome::Match(rule.clone()));
            }
        }
        Ok(RuleOutcome::NoMatch)
    }
}

/// All specified predicates must hold. Used directly by tests.
pub fn rule_matches(rule: &RoutingRule, meta: &RequestMeta) -> bool {
    if let Some(source) = &rule.source {
        if meta.source.as_deref() != Some(source.as_str()) {
            return false;
        }
    }

    if let Some(channel) = &rule.channel {
        if meta.channel.as_deref() != Some(channel.as_str()) {
            return false;
        }
    }

    if let Some(token_max) = rule.token_max {
        if meta.estimated_tokens > token_max {
            return false;
        }
    }

    if let Some(has_media) = rule.has_media {
        if meta.has_media != has_media {
            return false;
        }
    }

    if let Some(pattern) = &rule.pattern {
        let re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                warn!("[router] Rule {} has an invalid pattern, skipping: {e}", rule.id);
                return false;
            }
        };
        let haystack = truncate_utf8(&meta.text_preview, PATTERN_WINDOW_BYTES);
        if !re.is_match(haystack) {
            return false;
        }
    }

    true
}

// ── Tests ──────────────────────────────────────────────────────────────────
