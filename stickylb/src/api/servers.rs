//! サーバー管理API
//!
//! レジストリの薄いCRUDラッパー

use crate::api::error::AppError;
use crate::common::types::{Protocol, Server, ServerWithHealth};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

/// サーバー登録リクエスト
#[derive(Debug, Deserialize)]
pub struct AddServerRequest {
    /// 接続プロトコル
    pub protocol: Protocol,
    /// アドレス
    pub addr: String,
    /// データプレーンポート
    pub port: String,
    /// ヘルスチェック用ポート（任意）
    #[serde(default)]
    pub worker_port: Option<String>,
}

/// サーバー一覧を取得する
pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<Server>> {
    Json(state.registry.list().await)
}

/// ヘルススナップショット付きのサーバー一覧を取得する
///
/// 全サーバーを並列にプローブし、到達可否と負荷を付与して返す。
pub async fn list_servers_with_health(
    State(state): State<AppState>,
) -> Json<Vec<ServerWithHealth>> {
    let servers = state.registry.list().await;
    let results = state.prober.probe_all(servers).await;

    Json(
        results
            .into_iter()
            .map(|(server, health)| ServerWithHealth { server, health })
            .collect(),
    )
}

/// サーバーを登録する
///
/// 成功時は201と採番済みの`Server`、`(addr, port)`重複時は409。
pub async fn add_server(
    State(state): State<AppState>,
    Json(request): Json<AddServerRequest>,
) -> Result<(StatusCode, Json<Server>), AppError> {
    let server = state
        .registry
        .add(
            request.protocol,
            request.addr,
            request.port,
            request.worker_port,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(server)))
}

/// サーバーを削除する
///
/// 存在しないキーはサイレントno-op。いずれも204。
pub async fn remove_server(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.registry.remove(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
