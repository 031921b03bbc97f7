//! データプレーン転送ハンドラー
//!
//! ルーティングエンジンの決定に従ってリクエストをバックエンドへ
//! 転送する。転送が失敗した場合はクライアントに502を返すのみで、
//! リトライも別バックエンドへのフォールバックもしない（非目標）。

use crate::api::error::AppError;
use crate::common::error::LbError;
use crate::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use futures::TryStreamExt;
use std::io;
use std::net::SocketAddr;
use tracing::debug;

/// 転送時に読み込むリクエストボディの上限
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// リクエストを選択されたバックエンドへ転送する
pub async fn forward(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Result<Response, AppError> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let cookie = cookie_value(request.headers(), &state.config.app.cookie);
    let decision = state
        .engine
        .decide(cookie.as_deref(), &path, method.as_str())
        .await?;

    let url = format!("{}{}", decision.server.data_origin(), path_and_query);
    let forwarded_for = client_ip(request.headers(), peer);

    debug!(
        key = %decision.server.key,
        method = %method,
        path = %path,
        "Forwarding request"
    );

    // axum(http 1.x)とreqwest(http 0.2)で型が異なるため、
    // メソッドとヘッダーはバイト列経由で移し替える
    let outbound_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| LbError::Internal(format!("invalid method: {e}")))?;

    let mut outbound = state.http_client.request(outbound_method, &url);
    for (name, value) in request.headers() {
        if name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::CONNECTION
            || name.as_str() == "x-forwarded-for"
        {
            continue;
        }
        outbound = outbound.header(name.as_str(), value.as_bytes());
    }
    outbound = outbound.header("x-forwarded-for", forwarded_for.as_bytes());

    let body = axum::body::to_bytes(request.into_body(), MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|e| LbError::Internal(format!("failed to read request body: {e}")))?;

    let backend_response = outbound
        .body(body)
        .send()
        .await
        .map_err(|e| LbError::Http(e.to_string()))?;

    let mut response = into_axum_response(backend_response);

    if decision.fresh_token {
        let cookie = format!("{}={}; Path=/", state.config.app.cookie, decision.token);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    Ok(response)
}

/// reqwestのレスポンスをaxumレスポンスへ変換する（ボディはストリーム）
fn into_axum_response(response: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = response.headers().clone();

    let stream = response.bytes_stream().map_err(io::Error::other);
    let mut axum_response = Response::new(Body::from_stream(stream));
    *axum_response.status_mut() = status;

    for (name, value) in headers.iter() {
        // 接続管理系ヘッダーはhyper側のフレーミングに任せる
        if name == reqwest::header::CONNECTION || name == reqwest::header::TRANSFER_ENCODING {
            continue;
        }
        // 同名ヘッダーの重複（複数のSet-Cookieなど）を保持するためappend
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            axum_response
                .headers_mut()
                .append(header_name, header_value);
        }
    }

    axum_response
}

/// Cookieヘッダーから設定されたクッキーの値を取り出す
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// クライアントの実IPを解決する
///
/// `X-Real-IP` → `X-Forwarded-For` → 接続元アドレスの順で採用。
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    for name in ["x-real-ip", "x-forwarded-for"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    peer.ip().to_string()
}
