//! REST APIハンドラー
//!
//! 2つのリスナーを提供する:
//! - 管理プレーン: レジストリCRUD（Bearerトークン保護）
//! - データプレーン: 全リクエストを選択されたバックエンドへ転送

pub mod auth;
pub mod error;
pub mod proxy;
pub mod servers;

use crate::AppState;
use axum::routing::{delete, get};
use axum::{middleware, Router};

/// 管理プレーンのルーターを構築する
pub fn create_admin_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/servers",
            get(servers::list_servers).post(servers::add_server),
        )
        .route("/api/servers/health", get(servers::list_servers_with_health))
        .route("/api/servers/:key", delete(servers::remove_server))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_token,
        ))
        .with_state(state)
}

/// データプレーンのルーターを構築する
///
/// パスを問わず全リクエストをルーティングエンジンに通す。
pub fn create_proxy_app(state: AppState) -> Router {
    Router::new().fallback(proxy::forward).with_state(state)
}
