use std::collections::HashMap;

use parking_lot::Mutex;

use super::store::TsoStore;
use crate::TsoResult;

/// Process-local store. Timestamps survive allocator resets but not the
/// process, which is exactly what tests and single-node demos need.
#[derive(Default)]
pub struct MemStore {
    timestamps: Mutex<HashMap<String, u64>>,
}

impl TsoStore for MemStore {
    fn load_timestamp(&self, path: &str) -> TsoResult<u64> {
        Ok(self.timestamps.lock().get(path).copied().unwrap_or(0))
    }

    fn save_timestamp(&self, path: &str, ts: u64, _node_id: &str) -> TsoResult<()> {
        self.timestamps.lock().insert(path.to_owned(), ts);
        Ok(())
    }
}
