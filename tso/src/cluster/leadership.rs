use std::fmt::Debug;

use crate::{bootstrap::CancelScope, TsoResult};

use super::ParticipantInfo;

/// A lease-backed exclusive claim over a named key in a coordination store.
pub trait TsoLeadership: Send + Sync + Debug {
    /// campaign the leader key with the given lease and hold the claim on success
    fn campaign(&self, lease_timeout_millis: u64, leader_data: &str) -> TsoResult<()>;
    /// deletes the current leader key so everyone can campaign again
    fn delete_leader_key(&self) -> TsoResult<()>;

    /// returns whether the leadership is still available
    fn check(&self) -> bool;
    /// the persisted leader value and its revision, if any
    fn get_leader(&self) -> TsoResult<(Option<ParticipantInfo>, i64)>;

    /// keep the leadership available by renewing the lease until the scope is
    /// cancelled; returns immediately
    fn keep(&self, scope: CancelScope);
    /// block until the leader key changes after `revision`, is deleted, or the
    /// scope is cancelled; usually used to restart an election as soon as the
    /// current leader steps down
    fn watch(&self, revision: i64, scope: CancelScope);
    /// drop the claim: close the lease and stop advertising leadership
    fn reset(&self);
}

/// Leadership of a node that is its own leader by construction, used when the
/// enclosing server's leadership governs the allocator.
pub struct AlwaysLeader;

impl TsoLeadership for AlwaysLeader {
    fn campaign(&self, _: u64, _: &str) -> TsoResult<()> {
        unreachable!("AlwaysLeader does not campaign")
    }

    fn delete_leader_key(&self) -> TsoResult<()> {
        unreachable!("AlwaysLeader has no leader key")
    }

    fn check(&self) -> bool {
        true
    }

    fn get_leader(&self) -> TsoResult<(Option<ParticipantInfo>, i64)> {
        unreachable!("AlwaysLeader has no persisted leader")
    }

    fn keep(&self, _: CancelScope) {
        unreachable!("AlwaysLeader does not keep a lease")
    }

    fn watch(&self, _: i64, _: CancelScope) {
        unreachable!("AlwaysLeader has no leader key to watch")
    }

    fn reset(&self) {
        // nothing to drop
    }
}

impl Debug for AlwaysLeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AlwaysLeader")
    }
}
