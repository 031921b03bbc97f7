//! ロギング初期化
//!
//! `RUST_LOG`で上書き可能なEnvFilter付きのtracing初期化

use tracing_subscriber::EnvFilter;

/// グローバルのtracingサブスクライバーを初期化する
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stickylb=info,info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
