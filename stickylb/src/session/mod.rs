//! セッション親和性テーブル
//!
//! クライアントトークンから割り当て済みバックエンドへのインメモリ
//! マップ。バックエンドはレジストリキーの弱参照として保持し、利用の
//! たびにライブカタログへ再解決する（サーバーは削除されうるため）。

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// セッションエントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// 割り当て先のレジストリキー（弱参照）
    pub server_key: String,
    /// 絶対有効期限（作成時刻 + 設定された有効期間。再利用で延長しない）
    pub expires_at: DateTime<Utc>,
}

/// セッションテーブル
///
/// 1本のreaders-writerロックで保護する。ルーティングパスの参照は
/// リードロック、新規作成はライトロック。ロックをプローブや転送の
/// I/O待ちにまたがって保持してはならない。
///
/// 期限切れエントリは上書きされるだけで能動的には削除しない。
/// トークンチャーンの下ではテーブルは際限なく成長しうる（既知の
/// 特性。必要なら外部のリーパーを追加する）。
#[derive(Clone, Default)]
pub struct SessionTable {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionTable {
    /// 空のテーブルを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// セッションを取得する
    ///
    /// 存在し、かつ`expires_at`が現在時刻より厳密に後の場合のみ
    /// 返す。論理的な期限切れ判定のみで、エントリの削除はしない。
    pub async fn get(&self, token: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|session| session.expires_at > Utc::now())
            .cloned()
    }

    /// セッションを登録・上書きする
    pub async fn set(&self, token: String, session: Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(token, session);
    }

    /// 保持しているエントリ数（期限切れ含む）
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// テーブルが空か
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
