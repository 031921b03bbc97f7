//! stickylb
//!
//! クッキーによるセッション親和性・ラウンドロビン・オンデマンドの
//! 最小負荷選択を組み合わせたリバースプロキシ型ロードバランサー

#![warn(missing_docs)]

/// 共通型定義（エラー・バックエンド記述子）
pub mod common;

/// REST APIハンドラー（管理プレーン・データプレーン）
pub mod api;

/// ルーティング決定エンジン
pub mod balancer;

/// ヘルスプローブ集約
pub mod health;

/// サーバーレジストリ
pub mod registry;

/// セッション親和性テーブル
pub mod session;

/// レジストリストアアクセス
pub mod db;

/// 設定管理
pub mod config;

/// ロギング初期化ユーティリティ
pub mod logging;

/// サーバー起動・シャットダウンハンドリング
pub mod server;

/// アプリケーション状態
#[derive(Clone)]
pub struct AppState {
    /// アプリケーション設定
    pub config: std::sync::Arc<config::AppConfig>,
    /// サーバーレジストリ
    pub registry: registry::ServerRegistry,
    /// ヘルスプローバー
    pub prober: health::HealthProber,
    /// ルーティングエンジン
    pub engine: balancer::RoutingEngine,
    /// 共有HTTPクライアント（転送用、接続プーリング有効）
    pub http_client: reqwest::Client,
}
