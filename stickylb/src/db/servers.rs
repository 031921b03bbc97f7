//! サーバーレジストリのストア操作
//!
//! 外部ストア契約: キーは `server:<integer>`、フィールドは
//! `protocol` / `addr` / `port` / `worker_port`（すべて文字列）。

use crate::common::types::{Protocol, Server};
use sqlx::SqlitePool;
use tracing::warn;

/// ストア上のサーバー行
#[derive(Debug, sqlx::FromRow)]
struct ServerRow {
    key: String,
    protocol: String,
    addr: String,
    port: String,
    worker_port: Option<String>,
}

impl ServerRow {
    /// 行を`Server`へ変換する
    ///
    /// 不正なプロトコル値を持つ行は警告を出してスキップする。
    fn into_server(self) -> Option<Server> {
        match self.protocol.parse::<Protocol>() {
            Ok(protocol) => Some(Server {
                key: self.key,
                protocol,
                addr: self.addr,
                port: self.port,
                worker_port: self.worker_port,
            }),
            Err(_) => {
                warn!(
                    key = %self.key,
                    protocol = %self.protocol,
                    "Skipping server row with unknown protocol"
                );
                None
            }
        }
    }
}

/// 全サーバーをロードする
///
/// ORDER BYを付けない全件スキャン。ストアのスキャン順は安定とは
/// 限らないため、再起動をまたいだカタログ順序は保証されない。
pub async fn load_servers(pool: &SqlitePool) -> Result<Vec<Server>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ServerRow>(
        "SELECT key, protocol, addr, port, worker_port FROM servers",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(ServerRow::into_server).collect())
}

/// サーバーを書き込む
pub async fn insert_server(pool: &SqlitePool, server: &Server) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO servers (key, protocol, addr, port, worker_port)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&server.key)
    .bind(server.protocol.as_str())
    .bind(&server.addr)
    .bind(&server.port)
    .bind(&server.worker_port)
    .execute(pool)
    .await?;

    Ok(())
}

/// サーバーを削除する
pub async fn delete_server(pool: &SqlitePool, key: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM servers WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    fn server(key: &str, port: &str) -> Server {
        Server {
            key: key.to_string(),
            protocol: Protocol::Http,
            addr: "127.0.0.1".to_string(),
            port: port.to_string(),
            worker_port: Some("9090".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let pool = setup_test_db().await;

        insert_server(&pool, &server("server:0", "8080"))
            .await
            .unwrap();
        insert_server(&pool, &server("server:1", "8081"))
            .await
            .unwrap();

        let loaded = load_servers(&pool).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|s| s.key == "server:0"));
        assert!(loaded.iter().any(|s| s.key == "server:1"));
    }

    #[tokio::test]
    async fn test_delete() {
        let pool = setup_test_db().await;
        insert_server(&pool, &server("server:0", "8080"))
            .await
            .unwrap();

        assert!(delete_server(&pool, "server:0").await.unwrap());
        assert!(!delete_server(&pool, "server:0").await.unwrap());
        assert!(load_servers(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_unknown_protocol() {
        let pool = setup_test_db().await;
        sqlx::query("INSERT INTO servers (key, protocol, addr, port) VALUES (?, ?, ?, ?)")
            .bind("server:7")
            .bind("gopher")
            .bind("127.0.0.1")
            .bind("8080")
            .execute(&pool)
            .await
            .unwrap();

        let loaded = load_servers(&pool).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_null_worker_port_roundtrip() {
        let pool = setup_test_db().await;
        let mut s = server("server:0", "8080");
        s.worker_port = None;
        insert_server(&pool, &s).await.unwrap();

        let loaded = load_servers(&pool).await.unwrap();
        assert_eq!(loaded[0].worker_port, None);
    }
}
