//! 設定管理
//!
//! YAML設定ファイルと環境変数（`STICKYLB_*`）のマージ。
//! 環境変数が設定されていればYAMLの値を上書きする。

use crate::common::error::{LbError, LbResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 環境変数を取得し、指定の型にパースする
///
/// 未設定またはパース失敗時は`default`を返す。
pub fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// 環境変数を取得する（未設定なら`default`）
pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// 負荷分散ルール
///
/// パスとメソッドの完全一致。リスト順に評価し、最初に一致した
/// ルールで最小負荷選択に切り替える。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRule {
    /// リクエストパス（完全一致）
    pub path: String,
    /// HTTPメソッド（完全一致、大文字）
    pub method: String,
}

impl BalanceRule {
    /// リクエストがこのルールに一致するか
    pub fn matches(&self, path: &str, method: &str) -> bool {
        self.path == path && self.method == method
    }
}

/// データプレーンリスナー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// バインドホスト (デフォルト: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// データプレーンポート (デフォルト: 8080)
    #[serde(default = "default_app_port")]
    pub port: u16,

    /// セッションクッキー名 (デフォルト: "stickylb_session")
    #[serde(default = "default_cookie")]
    pub cookie: String,

    /// セッション有効期間（秒）(デフォルト: 600)
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime: u64,
}

/// 管理プレーンリスナー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// バインドホスト (デフォルト: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// 管理APIポート (デフォルト: 8081)
    #[serde(default = "default_admin_port")]
    pub port: u16,

    /// 管理APIのBearerトークン（未設定なら認証なし）
    #[serde(default)]
    pub token: Option<String>,
}

/// レジストリストア設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// ストアURL (デフォルト: "sqlite://stickylb.db")
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

/// ワーカープローブ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// ヘルスエンドポイントのパス (デフォルト: "health")
    #[serde(default = "default_health_path")]
    pub health: String,

    /// プローブタイムアウト（秒、接続と全体の両方を制限）(デフォルト: 5)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// 負荷分散ルール（リスト順に評価）
    #[serde(default)]
    pub balance: Vec<BalanceRule>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_app_port() -> u16 {
    8080
}

fn default_admin_port() -> u16 {
    8081
}

fn default_cookie() -> String {
    "stickylb_session".to_string()
}

fn default_session_lifetime() -> u64 {
    600
}

fn default_database_url() -> String {
    "sqlite://stickylb.db".to_string()
}

fn default_health_path() -> String {
    "health".to_string()
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_app_port(),
            cookie: default_cookie(),
            session_lifetime: default_session_lifetime(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_admin_port(),
            token: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            health: default_health_path(),
            probe_timeout_secs: default_probe_timeout(),
            balance: Vec::new(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// データプレーン設定
    #[serde(default)]
    pub app: ListenerConfig,
    /// 管理プレーン設定
    #[serde(default)]
    pub admin: AdminConfig,
    /// レジストリストア設定
    #[serde(default)]
    pub registry: RegistryConfig,
    /// ワーカープローブ設定
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// 設定をロードする
    ///
    /// `path`が指定されていればYAMLとして読み込み、
    /// その上に環境変数による上書きを適用する。
    pub fn load(path: Option<&Path>) -> LbResult<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    LbError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| LbError::Config(format!("invalid config file: {e}")))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// 環境変数による上書き
    fn apply_env_overrides(&mut self) {
        self.app.host = env_or("STICKYLB_HOST", &self.app.host);
        self.app.port = env_parse("STICKYLB_PORT", self.app.port);
        self.app.cookie = env_or("STICKYLB_COOKIE", &self.app.cookie);
        self.app.session_lifetime =
            env_parse("STICKYLB_SESSION_LIFETIME", self.app.session_lifetime);

        self.admin.host = env_or("STICKYLB_ADMIN_HOST", &self.admin.host);
        self.admin.port = env_parse("STICKYLB_ADMIN_PORT", self.admin.port);
        if let Ok(token) = std::env::var("STICKYLB_ADMIN_TOKEN") {
            self.admin.token = Some(token);
        }

        self.registry.database_url = env_or("STICKYLB_DATABASE_URL", &self.registry.database_url);

        self.worker.health = env_or("STICKYLB_HEALTH_PATH", &self.worker.health);
        self.worker.probe_timeout_secs =
            env_parse("STICKYLB_PROBE_TIMEOUT_SECS", self.worker.probe_timeout_secs);
    }

    /// データプレーンのバインドアドレス
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.app.host, self.app.port)
    }

    /// 管理プレーンのバインドアドレス
    pub fn admin_bind_addr(&self) -> String {
        format!("{}:{}", self.admin.host, self.admin.port)
    }
}
