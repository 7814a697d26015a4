mod store;
mod store_impl_mem;
mod store_impl_mysql;
mod store_impl_sqlite;

pub use store::{TsoStore, TsoStoreFactory, TsoStoreKind};
