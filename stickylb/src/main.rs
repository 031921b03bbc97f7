//! stickylb Server Entry Point

use anyhow::Context;
use clap::Parser;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use stickylb::balancer::RoutingEngine;
use stickylb::config::AppConfig;
use stickylb::health::HealthProber;
use stickylb::registry::ServerRegistry;
use stickylb::session::SessionTable;
use stickylb::{api, logging, server, AppState};
use tracing::info;

/// コマンドライン引数
#[derive(Debug, Parser)]
#[command(name = "stickylb", version, about = "Cookie-sticky reverse proxy load balancer")]
struct Cli {
    /// 設定ファイルパス（YAML）
    #[arg(short, long, env = "STICKYLB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load(cli.config.as_deref())?);

    // レジストリストアへ接続。起動時に到達できなければ致命的エラー
    // （空カタログでの部分稼働はしない）
    let connect_options = SqliteConnectOptions::from_str(&config.registry.database_url)
        .context("invalid registry database URL")?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(connect_options)
        .await
        .context("registry store unavailable")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("registry store migration failed")?;

    let registry = ServerRegistry::load(pool).await?;
    let sessions = SessionTable::new();
    let prober = HealthProber::new(
        config.worker.health.clone(),
        Duration::from_secs(config.worker.probe_timeout_secs),
    );
    let engine = RoutingEngine::new(
        registry.clone(),
        sessions,
        prober.clone(),
        config.worker.balance.clone(),
        Duration::from_secs(config.app.session_lifetime),
    );

    let state = AppState {
        config: config.clone(),
        registry,
        prober,
        engine,
        http_client: reqwest::Client::new(),
    };

    info!(
        rules = config.worker.balance.len(),
        cookie = %config.app.cookie,
        "stickylb starting"
    );

    let admin_app = api::create_admin_app(state.clone());
    let proxy_app = api::create_proxy_app(state);

    let bind_addr = config.bind_addr();
    let admin_bind_addr = config.admin_bind_addr();

    // データプレーンと管理プレーンを並行稼働させる
    tokio::join!(
        server::run(proxy_app, &bind_addr, "stickylb data plane"),
        server::run(admin_app, &admin_bind_addr, "stickylb admin API"),
    );

    Ok(())
}
