//! ルーティング決定エンジン
//!
//! リクエストごとに1パスで終端する状態機械:
//! トークン解決 → セッション解決 → ラウンドロビン割り当て →
//! ルール一致なら最小負荷選択で上書き → セッション永続化 → ハンドオフ。
//!
//! セッションロックをプローブや転送のI/O待ちにまたがって保持しない。

use crate::common::error::{LbError, LbResult};
use crate::common::types::Server;
use crate::config::BalanceRule;
use crate::health::HealthProber;
use crate::registry::ServerRegistry;
use crate::session::{Session, SessionTable};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// ルーティング決定の結果
///
/// 転送コラボレーターに渡す解決済みバックエンドと、クライアントに
/// 保存させるトークン。
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// 選択されたバックエンド
    pub server: Server,
    /// セッショントークン（クライアント提供、または新規発行）
    pub token: String,
    /// トークンが新規発行されたか（Set-Cookieが必要）
    pub fresh_token: bool,
}

/// ルーティング決定エンジン
#[derive(Clone)]
pub struct RoutingEngine {
    registry: ServerRegistry,
    sessions: SessionTable,
    prober: HealthProber,
    /// 負荷分散ルール（リスト順に評価、最初の一致が勝つ）
    rules: Arc<Vec<BalanceRule>>,
    /// セッション有効期間（秒）
    session_lifetime_secs: i64,
}

impl RoutingEngine {
    /// 新しいエンジンを作成する
    pub fn new(
        registry: ServerRegistry,
        sessions: SessionTable,
        prober: HealthProber,
        rules: Vec<BalanceRule>,
        session_lifetime: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            prober,
            rules: Arc::new(rules),
            session_lifetime_secs: session_lifetime.as_secs() as i64,
        }
    }

    /// リクエスト1件のバックエンドを決定する
    ///
    /// `cookie`は設定されたクッキーの値（あれば）。トークンがなければ
    /// 新規発行し、`fresh_token`で呼び出し元にSet-Cookieを指示する。
    ///
    /// セッションの束縛先キーはライブカタログへ再解決する。キーが
    /// 消えていればセッション無効として再割り当てする（ダングリング
    /// 参照にはしない）。
    pub async fn decide(
        &self,
        cookie: Option<&str>,
        path: &str,
        method: &str,
    ) -> LbResult<RoutingDecision> {
        let (token, fresh_token) = match cookie {
            Some(value) if !value.is_empty() => (value.to_string(), false),
            _ => (Uuid::new_v4().to_string(), true),
        };

        let bound = self.resolve_session(&token).await;

        let (mut server, expires_at) = match bound {
            Some(bound) => bound,
            None => {
                let server = self
                    .registry
                    .next_round_robin()
                    .await
                    .ok_or(LbError::NoAvailableBackend)?;
                info!(
                    key = %server.key,
                    addr = %server.addr,
                    port = %server.port,
                    "New session assigned by round robin"
                );
                let expires_at =
                    Utc::now() + ChronoDuration::seconds(self.session_lifetime_secs);
                (server, expires_at)
            }
        };

        if self.rules.iter().any(|rule| rule.matches(path, method)) {
            // ルール一致: このリクエストは集約器の最小負荷選択で解決する。
            // セッションレコードも選択結果に更新されるため、以降の
            // 非一致リクエストも期限まで同じサーバーを観測する。
            let candidates = self.registry.list().await;
            server = self.prober.pick_least_loaded(candidates).await?;
            info!(
                key = %server.key,
                path = %path,
                method = %method,
                "Balance rule matched, reassigned to least-loaded backend"
            );
        }

        self.sessions
            .set(
                token.clone(),
                Session {
                    server_key: server.key.clone(),
                    expires_at,
                },
            )
            .await;

        Ok(RoutingDecision {
            server,
            token,
            fresh_token,
        })
    }

    /// 既存セッションをライブカタログに対して解決する
    ///
    /// 期限内のセッションでも束縛先サーバーが削除済みなら無効。
    async fn resolve_session(&self, token: &str) -> Option<(Server, DateTime<Utc>)> {
        let session = self.sessions.get(token).await?;
        match self.registry.get(&session.server_key).await {
            Some(server) => Some((server, session.expires_at)),
            None => {
                debug!(
                    key = %session.server_key,
                    "Bound server vanished from registry, session invalidated"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Protocol;
    use serde_json::json;
    use sqlx::SqlitePool;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_registry() -> ServerRegistry {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        ServerRegistry::load(pool).await.unwrap()
    }

    async fn add_server(registry: &ServerRegistry, addr: &str, worker_port: Option<String>) {
        registry
            .add(Protocol::Http, addr.to_string(), "8080".to_string(), worker_port)
            .await
            .unwrap();
    }

    fn engine(
        registry: ServerRegistry,
        rules: Vec<BalanceRule>,
        lifetime: Duration,
    ) -> RoutingEngine {
        RoutingEngine::new(
            registry,
            SessionTable::new(),
            HealthProber::new("health", Duration::from_millis(500)),
            rules,
            lifetime,
        )
    }

    #[tokio::test]
    async fn test_new_sessions_cycle_through_catalog() {
        let registry = setup_registry().await;
        add_server(&registry, "10.0.0.1", None).await;
        add_server(&registry, "10.0.0.2", None).await;
        add_server(&registry, "10.0.0.3", None).await;
        let engine = engine(registry, vec![], Duration::from_secs(60));

        let mut picks = Vec::new();
        for token in ["t1", "t2", "t3", "t4"] {
            let decision = engine.decide(Some(token), "/", "GET").await.unwrap();
            picks.push(decision.server.addr);
        }

        // 挿入順に循環し、カタログサイズで折り返す
        assert_eq!(picks, ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_session_is_sticky_while_cursor_advances() {
        let registry = setup_registry().await;
        add_server(&registry, "10.0.0.1", None).await;
        add_server(&registry, "10.0.0.2", None).await;
        let engine = engine(registry, vec![], Duration::from_secs(60));

        let first = engine.decide(Some("sticky"), "/", "GET").await.unwrap();

        // 他セッションでカーソルが進む
        engine.decide(Some("other1"), "/", "GET").await.unwrap();
        engine.decide(Some("other2"), "/", "GET").await.unwrap();

        let second = engine.decide(Some("sticky"), "/", "GET").await.unwrap();
        assert_eq!(first.server.key, second.server.key);
        assert!(!second.fresh_token);
    }

    #[tokio::test]
    async fn test_expired_session_is_reassigned() {
        let registry = setup_registry().await;
        add_server(&registry, "10.0.0.1", None).await;
        add_server(&registry, "10.0.0.2", None).await;
        // 有効期間ゼロ: 作成直後から期限切れ扱い
        let engine = engine(registry, vec![], Duration::from_secs(0));

        let first = engine.decide(Some("tok"), "/", "GET").await.unwrap();
        let second = engine.decide(Some("tok"), "/", "GET").await.unwrap();

        // 新規割り当てとして次のサーバーへ進む
        assert_ne!(first.server.key, second.server.key);
    }

    #[tokio::test]
    async fn test_missing_cookie_mints_token() {
        let registry = setup_registry().await;
        add_server(&registry, "10.0.0.1", None).await;
        let engine = engine(registry, vec![], Duration::from_secs(60));

        let decision = engine.decide(None, "/", "GET").await.unwrap();
        assert!(decision.fresh_token);
        assert!(Uuid::parse_str(&decision.token).is_ok());

        let empty = engine.decide(Some(""), "/", "GET").await.unwrap();
        assert!(empty.fresh_token);
    }

    #[tokio::test]
    async fn test_empty_catalog_is_no_available_backend() {
        let registry = setup_registry().await;
        let engine = engine(registry, vec![], Duration::from_secs(60));

        let result = engine.decide(Some("tok"), "/", "GET").await;
        assert!(matches!(result, Err(LbError::NoAvailableBackend)));
    }

    #[tokio::test]
    async fn test_removed_server_invalidates_session() {
        let registry = setup_registry().await;
        add_server(&registry, "10.0.0.1", None).await;
        add_server(&registry, "10.0.0.2", None).await;
        let engine = engine(registry.clone(), vec![], Duration::from_secs(60));

        let first = engine.decide(Some("tok"), "/", "GET").await.unwrap();
        registry.remove(&first.server.key).await.unwrap();

        let second = engine.decide(Some("tok"), "/", "GET").await.unwrap();
        assert_ne!(second.server.key, first.server.key);
    }

    async fn mount_health(mock: &MockServer, active_tasks: u64, cpu_load_avg: f64) {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active_tasks": active_tasks,
                "cpu_load_avg": cpu_load_avg,
            })))
            .mount(mock)
            .await;
    }

    #[tokio::test]
    async fn test_rule_match_overrides_existing_binding() {
        let busy = MockServer::start().await;
        let idle = MockServer::start().await;
        mount_health(&busy, 9, 3.0).await;
        mount_health(&idle, 0, 0.1).await;

        let registry = setup_registry().await;
        add_server(
            &registry,
            &busy.address().ip().to_string(),
            Some(busy.address().port().to_string()),
        )
        .await;
        // 2台目は別の (addr, port) になるようデータポートを変える
        registry
            .add(
                Protocol::Http,
                idle.address().ip().to_string(),
                "8081".to_string(),
                Some(idle.address().port().to_string()),
            )
            .await
            .unwrap();

        let rules = vec![BalanceRule {
            path: "/upload".to_string(),
            method: "POST".to_string(),
        }];
        let engine = engine(registry, rules, Duration::from_secs(60));

        // ラウンドロビンで1台目（busy）に束縛される
        let first = engine.decide(Some("tok"), "/", "GET").await.unwrap();
        assert_eq!(first.server.key, "server:0");

        // ルール一致リクエストは既存束縛を無視して最小負荷を選ぶ
        let overridden = engine.decide(Some("tok"), "/upload", "POST").await.unwrap();
        assert_eq!(overridden.server.key, "server:1");

        // 再束縛はセッションレコードに永続化される
        let after = engine.decide(Some("tok"), "/", "GET").await.unwrap();
        assert_eq!(after.server.key, "server:1");
    }

    #[tokio::test]
    async fn test_rule_match_with_all_unreachable_fails() {
        let registry = setup_registry().await;
        // worker_portなし → プローブ対象外 = 到達不能
        add_server(&registry, "10.0.0.1", None).await;

        let rules = vec![BalanceRule {
            path: "/upload".to_string(),
            method: "POST".to_string(),
        }];
        let engine = engine(registry, rules, Duration::from_secs(60));

        let result = engine.decide(Some("tok"), "/upload", "POST").await;
        assert!(matches!(result, Err(LbError::NoAvailableBackend)));
    }
}
