//! ヘルスプローバー
//!
//! サーバーごとに1本の並列プローブを発行し（fan-out）、全件の完了を
//! 待ってから（fan-in）到達可能な候補を負荷で縮約する。早期打ち切りは
//! しない。縮約には全候補の比較が必要なため。

use crate::common::error::{LbError, LbResult};
use crate::common::types::{HealthSnapshot, Server};
use reqwest::Client;
use serde::Deserialize;
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{debug, error, warn};

/// ヘルスエンドポイントのレスポンスボディ
///
/// 契約: `GET {protocol}://{addr}:{worker_port}/{health_path}`
/// → 200 + `{"active_tasks": <int>, "cpu_load_avg": <float>}`
#[derive(Debug, Deserialize)]
struct ProbeBody {
    active_tasks: u64,
    cpu_load_avg: f64,
}

/// ヘルスプローバー
#[derive(Clone)]
pub struct HealthProber {
    /// HTTPクライアント（接続・リクエスト全体の両方にタイムアウト）
    client: Client,
    /// ヘルスエンドポイントのパス
    health_path: String,
}

impl HealthProber {
    /// 新しいプローバーを作成する
    ///
    /// `timeout`は接続時間だけでなくリクエスト全体を制限する。
    /// 期限を超えたプローブは到達不能として扱われ、全体の決定を
    /// 失敗させることはない。
    pub fn new(health_path: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            health_path: health_path.into(),
        }
    }

    /// 単一サーバーをプローブする
    ///
    /// トランスポート成功かつHTTP 200のときのみ`reachable=true`。
    /// `worker_port`未設定のサーバーは到達不能扱い。
    pub async fn probe(&self, server: &Server) -> HealthSnapshot {
        let Some(url) = server.health_url(&self.health_path) else {
            debug!(key = %server.key, "Server has no worker port, treated as unreachable");
            return HealthSnapshot::unreachable();
        };

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(key = %server.key, error = %e, "Health probe failed");
                return HealthSnapshot::unreachable();
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!(
                key = %server.key,
                status = %response.status(),
                "Health probe returned non-200"
            );
            return HealthSnapshot::unreachable();
        }

        match response.json::<ProbeBody>().await {
            Ok(body) => HealthSnapshot {
                active_tasks: body.active_tasks,
                cpu_load_avg: body.cpu_load_avg,
                reachable: true,
            },
            Err(e) => {
                warn!(key = %server.key, error = %e, "Health probe body was not valid JSON");
                HealthSnapshot::unreachable()
            }
        }
    }

    /// 全サーバーを並列にプローブする
    ///
    /// サーバーごとに1タスクを起動し、全タスクの完了を無条件に
    /// 待ってから結果を返す。タスクは決定の外に漏れない。
    pub async fn probe_all(&self, servers: Vec<Server>) -> Vec<(Server, HealthSnapshot)> {
        let mut handles = Vec::with_capacity(servers.len());

        for server in servers {
            let prober = self.clone();
            handles.push(tokio::spawn(async move {
                let snapshot = prober.probe(&server).await;
                (server, snapshot)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(pair) => results.push(pair),
                Err(e) => error!(error = %e, "Probe task join error"),
            }
        }
        results
    }

    /// 最小負荷のサーバーを選ぶ
    ///
    /// 到達不能なサーバーは縮約前に除外する（ゼロ値のスナップショット
    /// が「最小負荷」に見えてしまうため）。候補がなければ
    /// `NoAvailableBackend`。
    pub async fn pick_least_loaded(&self, servers: Vec<Server>) -> LbResult<Server> {
        if servers.is_empty() {
            return Err(LbError::NoAvailableBackend);
        }

        let results = self.probe_all(servers).await;
        select_least_loaded(results).ok_or(LbError::NoAvailableBackend)
    }
}

/// プローブ結果から最小負荷のサーバーを選ぶ
///
/// 決定的な辞書式最小: 第一キー`active_tasks`昇順、第二キー
/// `cpu_load_avg`昇順、同値はレジストリキーで安定化する。
pub(crate) fn select_least_loaded(results: Vec<(Server, HealthSnapshot)>) -> Option<Server> {
    results
        .into_iter()
        .filter(|(_, health)| health.reachable)
        .min_by(|(a_server, a), (b_server, b)| {
            a.active_tasks
                .cmp(&b.active_tasks)
                .then_with(|| {
                    a.cpu_load_avg
                        .partial_cmp(&b.cpu_load_avg)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a_server.key.cmp(&b_server.key))
        })
        .map(|(server, _)| server)
}
