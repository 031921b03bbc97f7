//! APIエラーレスポンス型
//!
//! axum用の共通エラーハンドリング

use crate::common::error::LbError;
use axum::{response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

/// Axum用のエラーレスポンス型
#[derive(Debug)]
pub struct AppError(pub LbError);

impl From<LbError> for AppError {
    fn from(err: LbError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        // 外部には external_message() のみを返し、詳細はログに残す
        warn!(error = %self.0, "Request failed");

        let status = self.0.status_code();
        let payload = json!({
            "error": self.0.external_message()
        });

        (status, Json(payload)).into_response()
    }
}
