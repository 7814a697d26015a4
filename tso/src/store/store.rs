use crate::TsoResult;

use super::{
    store_impl_mem::MemStore, store_impl_mysql::MySqlStore, store_impl_sqlite::SqliteStore,
};

/// Persistence of the timestamp save point, keyed by allocator path.
pub trait TsoStore: Send + Sync {
    /// Load the persisted save point of the allocator at `path`, 0 when absent.
    fn load_timestamp(&self, path: &str) -> TsoResult<u64>;

    /// Persist the save point of the allocator at `path`.
    fn save_timestamp(&self, path: &str, ts: u64, node_id: &str) -> TsoResult<()>;
}

pub enum TsoStoreKind {
    MySql(String),
    /// `sqlite::memory:` or a database file path
    Sqlite(String),
    /// process-local, for tests and single-node demos
    Memory,
}

pub struct TsoStoreFactory;

impl TsoStoreFactory {
    pub fn get_instance(kind: &TsoStoreKind) -> Box<dyn TsoStore> {
        match kind {
            TsoStoreKind::MySql(url) => Box::new(MySqlStore::new(url)),
            TsoStoreKind::Sqlite(url) => Box::new(SqliteStore::new(url)),
            TsoStoreKind::Memory => Box::new(MemStore::default()),
        }
    }
}
