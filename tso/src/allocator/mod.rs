mod allocator_manager;
mod global_allocator;
mod local_allocator;
mod timestamp;
mod timestamp_oracle;

use std::sync::Arc;

pub use allocator_manager::{
    filter_unavailable_leadership, filter_uninitialized, AllocatorGroup, AllocatorGroupFilter,
    AllocatorManager,
};
pub use global_allocator::GlobalTsoAllocator;
pub use local_allocator::LocalTsoAllocator;
pub use timestamp::{Timestamp, UnixTimeStamp};

use crate::{store::TsoStore, TsoResult};

/// Max reset gap callback, re-evaluated by allocators on demand so it tracks
/// live reconfiguration.
pub type MaxResetTsGapFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// A TSO allocator variant: one Global per cluster, one Local per dc-location.
/// Both expose the same timestamp capability set; the Local variant adds the
/// election verbs the manager's leader loop drives.
pub enum TsoAllocator {
    Global(GlobalTsoAllocator),
    Local(LocalTsoAllocator),
}

impl TsoAllocator {
    /// Load persisted state and prepare to serve.
    pub fn initialize(&self, store: &dyn TsoStore) -> TsoResult<()> {
        match self {
            TsoAllocator::Global(allocator) => allocator.initialize(store),
            TsoAllocator::Local(allocator) => allocator.initialize(store),
        }
    }

    /// Whether the allocator has been initialized since its latest campaign.
    pub fn is_initialized(&self) -> bool {
        match self {
            TsoAllocator::Global(allocator) => allocator.is_initialized(),
            TsoAllocator::Local(allocator) => allocator.is_initialized(),
        }
    }

    /// Advance the in-memory clock and persist the checkpoint when due.
    pub fn update_tso(&self, store: &dyn TsoStore) -> TsoResult<()> {
        match self {
            TsoAllocator::Global(allocator) => allocator.update_tso(store),
            TsoAllocator::Local(allocator) => allocator.update_tso(store),
        }
    }

    /// Allocate `count` consecutive timestamps atomically.
    pub fn generate_ts(&self, count: u32) -> TsoResult<Timestamp> {
        match self {
            TsoAllocator::Global(allocator) => allocator.generate_ts(count),
            TsoAllocator::Local(allocator) => allocator.generate_ts(count),
        }
    }

    /// Clear in-memory state, invalidating outstanding logical counters.
    pub fn reset(&self) {
        match self {
            TsoAllocator::Global(allocator) => allocator.reset(),
            TsoAllocator::Local(allocator) => allocator.reset(),
        }
    }

    pub fn as_global(&self) -> Option<&GlobalTsoAllocator> {
        match self {
            TsoAllocator::Global(allocator) => Some(allocator),
            TsoAllocator::Local(_) => None,
        }
    }

    pub fn as_local(&self) -> Option<&LocalTsoAllocator> {
        match self {
            TsoAllocator::Global(_) => None,
            TsoAllocator::Local(allocator) => Some(allocator),
        }
    }
}
