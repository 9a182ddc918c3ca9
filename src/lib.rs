// Switchyard — model-agnostic LLM gateway.
//
// Accepts OpenAI-compatible chat completions and dispatches each request
// to one backend from a heterogeneous fleet (co-located, LAN, cloud).
// Routing is a three-tier decision engine: a deterministic rule table, a
// small co-located classifier model, and a configured fallback. The
// registry (models, rules, policy, budget, health) lives in embedded
// SQLite; the dispatcher retries across ranked candidates and normalizes
// every backend's stream into OpenAI-shaped chunks.

pub mod budget;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod providers;
pub mod routing;
pub mod server;
pub mod store;
pub mod types;

pub use budget::BudgetLedger;
pub use config::GatewayConfig;
pub use dispatch::Dispatcher;
pub use error::{GatewayError, GatewayResult, ProviderError};
pub use health::HealthMonitor;
pub use routing::{Classifier, Router, RoutingDecision};
pub use store::RegistryStore;
