mod allocator;
mod bootstrap;
mod cluster;
mod config;
mod error;
mod metric;
mod store;
mod util;

pub use allocator::{
    filter_unavailable_leadership, filter_uninitialized, AllocatorGroup, AllocatorGroupFilter,
    AllocatorManager, GlobalTsoAllocator, LocalTsoAllocator, MaxResetTsGapFn, Timestamp,
    TsoAllocator, UnixTimeStamp,
};
pub use bootstrap::{Bootstrap, CancelScope};
pub use cluster::{
    AlwaysLeader, ElectionBoard, Lease, MemLeadership, Participant, ParticipantInfo, TsoLeadership,
};
pub use config::Config;
pub use error::TsoError;
pub use store::{TsoStore, TsoStoreFactory, TsoStoreKind};
pub use util::constant::Constant;

pub type TsoResult<T> = anyhow::Result<T>;
