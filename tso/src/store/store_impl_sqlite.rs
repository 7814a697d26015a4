use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tokio::runtime::Runtime;

use super::store::TsoStore;
use crate::TsoResult;

pub struct SqliteStore {
    conn_pool: SqlitePool,
    rt: Runtime,
}

impl TsoStore for SqliteStore {
    fn load_timestamp(&self, path: &str) -> TsoResult<u64> {
        self.rt.block_on(async {
            let record = sqlx::query::<Sqlite>("SELECT ts FROM tso_timestamp WHERE path = $1")
                .bind(path)
                .map(|row| row.get::<String, _>("ts"))
                .fetch_optional(&self.conn_pool)
                .await?;
            match record {
                Some(ts) => Ok(ts.parse::<u64>()?),
                None => Ok(0),
            }
        })
    }

    fn save_timestamp(&self, path: &str, ts: u64, node_id: &str) -> TsoResult<()> {
        self.rt.block_on(async {
            sqlx::query::<Sqlite>(
                "INSERT INTO tso_timestamp (path, ts, node, updated) \
                 VALUES ($1, $2, $3, CURRENT_TIMESTAMP) \
                 ON CONFLICT(path) DO UPDATE SET ts = $2, node = $3, updated = CURRENT_TIMESTAMP",
            )
            .bind(path)
            // stored as text: the save point is an unsigned 64-bit value
            .bind(ts.to_string())
            .bind(node_id)
            .execute(&self.conn_pool)
            .await?;
            Ok(())
        })
    }
}

impl SqliteStore {
    pub fn new(url: &str) -> Self {
        let rt = Runtime::new().expect("create sqlite store runtime failed");
        let conn_pool = rt.block_on(async {
            let pool = SqlitePool::connect(url)
                .await
                .expect("connect sqlite store failed");
            pool.execute(
                "CREATE TABLE IF NOT EXISTS tso_timestamp (
                    path TEXT NOT NULL PRIMARY KEY,
                    ts TEXT NOT NULL,
                    node TEXT NOT NULL,
                    updated TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
            )
            .await
            .expect("create tso_timestamp table failed");
            pool
        });
        SqliteStore { conn_pool, rt }
    }
}
