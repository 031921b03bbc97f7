//! バックエンド記述子と健全性スナップショット

use crate::common::error::LbError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// バックエンドへの接続プロトコル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// 平文HTTP
    Http,
    /// TLS（終端はバックエンド側）
    Https,
}

impl Protocol {
    /// 文字列表現を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = LbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(LbError::Config(format!("unknown protocol: {other}"))),
        }
    }
}

/// 登録済みバックエンドサーバー
///
/// `key`はレジストリが採番する `server:<integer>` 形式の安定キー。
/// `port`はデータプレーン（転送先）、`worker_port`はコントロールプレーン
/// （ヘルスエンドポイント）。ポートは外部ストア契約に合わせて文字列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// レジストリキー（`server:<integer>`）
    pub key: String,
    /// 接続プロトコル
    pub protocol: Protocol,
    /// アドレス（ホスト名またはIP）
    pub addr: String,
    /// データプレーンポート
    pub port: String,
    /// ヘルスチェック用ポート（未設定なら到達不能扱い）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_port: Option<String>,
}

impl Server {
    /// データプレーンのオリジン（`http://addr:port`）
    pub fn data_origin(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.addr, self.port)
    }

    /// ヘルスエンドポイントURL
    ///
    /// `worker_port`が未設定の場合は`None`（プローブ対象外）。
    pub fn health_url(&self, health_path: &str) -> Option<String> {
        self.worker_port.as_ref().map(|worker_port| {
            format!(
                "{}://{}:{}/{}",
                self.protocol,
                self.addr,
                worker_port,
                health_path.trim_start_matches('/')
            )
        })
    }
}

/// ヘルスプローブ1回分のスナップショット（非永続）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// バックエンドが報告した実行中タスク数
    pub active_tasks: u64,
    /// バックエンドが報告したCPUロードアベレージ
    pub cpu_load_avg: f64,
    /// トランスポート成功かつHTTP 200だったか
    pub reachable: bool,
}

impl HealthSnapshot {
    /// 到達不能サーバーのスナップショット
    ///
    /// ゼロ値の負荷を持つが、`reachable=false`のため選択候補にはならない。
    pub fn unreachable() -> Self {
        Self {
            active_tasks: 0,
            cpu_load_avg: 0.0,
            reachable: false,
        }
    }
}

/// 管理APIの「ヘルス付きサーバー一覧」エントリ
#[derive(Debug, Clone, Serialize)]
pub struct ServerWithHealth {
    /// サーバー記述子
    pub server: Server,
    /// 直近のプローブ結果
    pub health: HealthSnapshot,
}
