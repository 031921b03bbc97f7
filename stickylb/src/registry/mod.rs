//! サーバーレジストリ
//!
//! バックエンドカタログをメモリ内で管理し、外部ストアと同期する。
//! ストアが真実の源であり、インメモリカタログはその書き込み成功後に
//! のみ更新する（write-then-commit）。

use crate::common::error::{LbError, LbResult};
use crate::common::types::{Protocol, Server};
use crate::db::servers as db;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// サーバーレジストリ
///
/// カタログは1本の`RwLock`で保護する。ラウンドロビンカーソルは
/// カタログのリードロックを保持したまま進めるため、並行する
/// `remove`でカタログ長が変わっても剰余が古くなることはない。
#[derive(Clone)]
pub struct ServerRegistry {
    /// インメモリカタログ（カタログ順 = 挿入順）
    servers: Arc<RwLock<Vec<Server>>>,
    /// ラウンドロビンカーソル
    cursor: Arc<AtomicUsize>,
    /// レジストリストア
    pool: SqlitePool,
}

impl ServerRegistry {
    /// ストアの全件スキャンでレジストリを構築する
    ///
    /// ストアに到達できない場合は`RegistryUnavailable`。起動時には
    /// 致命的エラーとして扱うこと（空カタログでの部分稼働はしない）。
    ///
    /// ストアのスキャン順は安定とは限らないため、カタログ順
    /// （したがってラウンドロビン順）は再起動をまたいで保証されない。
    pub async fn load(pool: SqlitePool) -> LbResult<Self> {
        let loaded = db::load_servers(&pool)
            .await
            .map_err(|e| LbError::RegistryUnavailable(e.to_string()))?;

        info!(server_count = loaded.len(), "Loaded servers from registry store");

        Ok(Self {
            servers: Arc::new(RwLock::new(loaded)),
            cursor: Arc::new(AtomicUsize::new(0)),
            pool,
        })
    }

    /// レジストリストアへの参照
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// サーバーを登録する
    ///
    /// 同一`(addr, port)`の既存エントリがあれば`DuplicateServer`。
    /// キーは現在のカタログ内容から最大の数値サフィックス+1
    /// （空なら0）を採番する。削除済みの最大キーは再利用される。
    ///
    /// 重複チェック・採番・ストア書き込みは直列化が必要なので、
    /// ライトロックを保持したままストアへ書き込む。書き込みが
    /// 失敗した場合カタログは変更されない。
    pub async fn add(
        &self,
        protocol: Protocol,
        addr: String,
        port: String,
        worker_port: Option<String>,
    ) -> LbResult<Server> {
        let mut servers = self.servers.write().await;

        if servers.iter().any(|s| s.addr == addr && s.port == port) {
            return Err(LbError::DuplicateServer { addr, port });
        }

        let key = next_key(&servers);
        let server = Server {
            key,
            protocol,
            addr,
            port,
            worker_port,
        };

        db::insert_server(&self.pool, &server).await?;
        servers.push(server.clone());

        info!(
            key = %server.key,
            addr = %server.addr,
            port = %server.port,
            "Server registered"
        );
        Ok(server)
    }

    /// サーバーを削除する
    ///
    /// 未知のキーは何もしない（サイレントno-op）。ストア削除が
    /// 成功してからカタログを更新する二段階削除。ストア削除が
    /// 失敗した場合は両者とも変更せずエラーを返す。
    pub async fn remove(&self, key: &str) -> LbResult<()> {
        let mut servers = self.servers.write().await;

        let Some(index) = servers.iter().position(|s| s.key == key) else {
            debug!(key = %key, "Remove requested for unknown server key");
            return Ok(());
        };

        db::delete_server(&self.pool, key).await?;
        servers.remove(index);

        info!(key = %key, "Server removed");
        Ok(())
    }

    /// カタログのスナップショットをカタログ順で返す
    pub async fn list(&self) -> Vec<Server> {
        self.servers.read().await.clone()
    }

    /// 登録済みサーバー数
    pub async fn count(&self) -> usize {
        self.servers.read().await.len()
    }

    /// キーでサーバーを取得する
    pub async fn get(&self, key: &str) -> Option<Server> {
        self.servers
            .read()
            .await
            .iter()
            .find(|s| s.key == key)
            .cloned()
    }

    /// ラウンドロビンで次のサーバーを選ぶ
    ///
    /// カタログが空なら`None`。カーソルの加算と剰余はリードロック
    /// 保持中に行う。
    pub async fn next_round_robin(&self) -> Option<Server> {
        let servers = self.servers.read().await;
        if servers.is_empty() {
            return None;
        }
        let cursor = self.cursor.fetch_add(1, Ordering::SeqCst);
        Some(servers[cursor % servers.len()].clone())
    }
}

/// 次のレジストリキーを採番する
///
/// 現在の内容から最大の数値サフィックスを再計算するため、最大番号の
/// サーバーを削除して追加し直すとその番号が再利用される。
fn next_key(servers: &[Server]) -> String {
    let next = servers
        .iter()
        .filter_map(|s| s.key.strip_prefix("server:"))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .map(|max| max + 1)
        .unwrap_or(0);
    format!("server:{next}")
}
