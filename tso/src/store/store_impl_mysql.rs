use sqlx::{MySql, MySqlPool, Row};
use tokio::runtime::Runtime;

use super::store::TsoStore;
use crate::TsoResult;

pub struct MySqlStore {
    conn_pool: MySqlPool,
    rt: Runtime,
}

impl TsoStore for MySqlStore {
    fn load_timestamp(&self, path: &str) -> TsoResult<u64> {
        self.rt.block_on(async {
            let record = sqlx::query::<MySql>("SELECT ts FROM tso_timestamp WHERE path = ?")
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
            let affected = sqlx::query::<MySql>(
                "UPDATE tso_timestamp SET ts = ?, node = ? WHERE path = ?",
            )
            .bind(ts.to_string())
            .bind(node_id)
            .bind(path)
            .execute(&self.conn_pool)
            .await?
            .rows_affected();

            if affected == 0 {
                sqlx::query::<MySql>(
                    "INSERT IGNORE INTO tso_timestamp (path, ts, node) VALUES (?, ?, ?)",
                )
                .bind(path)
                .bind(ts.to_string())
                .bind(node_id)
                .execute(&self.conn_pool)
                .await?;
            }

            Ok(())
        })
    }
}

impl MySqlStore {
    pub fn new(url: &str) -> Self {
        let rt = Runtime::new().expect("create mysql store runtime failed");
        let conn_pool = MySqlPool::connect_lazy(url).expect("parse mysql store url failed");
        MySqlStore { conn_pool, rt }
    }
}
