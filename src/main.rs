// Switchyard gateway binary: load config, open the registry, start the
// background loops, serve the HTTP surface.

use log::{error, info};
use std::sync::Arc;
use switchyard::server::{build_app, AppState};
use switchyard::{BudgetLedger, Classifier, Dispatcher, GatewayConfig, HealthMonitor, RegistryStore, Router};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match GatewayConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("[gateway] {e}");
            std::process::exit(1);
        }
    };

    let store = match RegistryStore::open(&config.db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("[gateway] Cannot open registry: {e}");
            std::process::exit(1);
        }
    };

    let ledger = Arc::new(BudgetLedger::new(store.clone()));
    let classifier = Classifier::new(&config.classifier_url, &config.classifier_model);
    let router = Arc::new(Router::new(store.clone(), ledger.clone(), classifier));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), &config.anthropic_version));

    let _probes = HealthMonitor::new(store.clone(), config.health_interval_ms).spawn();
    let _retention = switchyard::health::spawn_retention(store.clone());

    let port = config.port;
    let state = Arc::new(AppState {
        store,
        ledger,
        router,
        dispatcher,
        config: Arc::new(config),
    });
    let app = build_app(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("[gateway] Bind {addr} failed: {e}");
            std::process::exit(1);
        }
    };
    info!("[gateway] Listening on http://{addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("[gateway] Server error: {e}");
        std::process::exit(1);
    }
}
