//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! `LbError`は`status_code()`と`external_message()`を提供し、
//! HTTPレスポンスへのマッピングを一箇所に集約する。

use axum::http::StatusCode;
use thiserror::Error;

/// load balancerエラー型
#[derive(Debug, Error)]
pub enum LbError {
    /// レジストリストアに到達できない（起動時は致命的）
    #[error("Registry store unavailable: {0}")]
    RegistryUnavailable(String),

    /// 同一 (addr, port) のサーバーが既に登録済み
    #[error("Server already registered at {addr}:{port}")]
    DuplicateServer {
        /// 重複したアドレス
        addr: String,
        /// 重複したデータプレーンポート
        port: String,
    },

    /// 指定キーのサーバーが存在しない
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// 到達可能なバックエンドが1台もない
    #[error("No available backend")]
    NoAvailableBackend,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LbError {
    /// Returns a safe error message for external clients.
    ///
    /// Does not expose internal details such as addresses or store paths.
    /// Full error details go to the server logs via `Display`.
    pub fn external_message(&self) -> &'static str {
        match self {
            Self::RegistryUnavailable(_) => "Registry unavailable",
            Self::DuplicateServer { .. } => "Server already registered",
            Self::ServerNotFound(_) => "Server not found",
            Self::NoAvailableBackend => "No available backend",
            Self::Database(_) => "Registry store error",
            Self::Http(_) => "Backend unavailable",
            Self::Config(_) => "Configuration error",
            Self::Internal(_) => "Internal server error",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RegistryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DuplicateServer { .. } => StatusCode::CONFLICT,
            Self::ServerNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoAvailableBackend => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias
pub type LbResult<T> = Result<T, LbError>;
