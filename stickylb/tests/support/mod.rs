//! 統合テスト用のアプリケーション組み立てヘルパー

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use stickylb::balancer::RoutingEngine;
use stickylb::config::{AppConfig, BalanceRule};
use stickylb::health::HealthProber;
use stickylb::registry::ServerRegistry;
use stickylb::session::SessionTable;
use stickylb::AppState;

/// インメモリストアで`AppState`を構築する
pub async fn build_state(
    rules: Vec<BalanceRule>,
    session_lifetime_secs: u64,
    admin_token: Option<&str>,
) -> AppState {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let mut config = AppConfig::default();
    config.admin.token = admin_token.map(str::to_string);
    config.app.session_lifetime = session_lifetime_secs;
    config.worker.balance = rules.clone();

    let registry = ServerRegistry::load(pool).await.expect("registry load");
    let prober = HealthProber::new("health", Duration::from_millis(500));
    let engine = RoutingEngine::new(
        registry.clone(),
        SessionTable::new(),
        prober.clone(),
        rules,
        Duration::from_secs(session_lifetime_secs),
    );

    AppState {
        config: Arc::new(config),
        registry,
        prober,
        engine,
        http_client: reqwest::Client::new(),
    }
}
