use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::{
    allocator::AllocatorManager,
    cluster::{AlwaysLeader, ElectionBoard, MemLeadership, Participant},
    config::Config,
    store::TsoStoreFactory,
    util::{constant::Constant, key_path::KeyPath},
    TsoResult,
};

/// Cancellation scope shared by every task spawned on behalf of one owner.
///
/// The scope is the ctx/cancel pair in one value: cloning hands it to a task,
/// `cancel` may be called from any thread and is idempotent, and a `child`
/// scope is cancelled together with its parent. Tasks observe cancellation by
/// polling `is_cancelled` at their loop boundaries.
#[derive(Clone, Debug)]
pub struct CancelScope {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelScope>>,
}

impl CancelScope {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: None,
        }
    }

    /// A scope that fires when either itself or this scope is cancelled.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Block the calling thread until the scope is cancelled.
    pub fn wait_cancelled(&self) {
        while !self.is_cancelled() {
            thread::sleep(Duration::from_millis(Constant::LOOP_MIN_INTERVAL_MILLIS));
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Bootstrap;

impl Bootstrap {
    /// Build a whole node: member identity, store, allocator manager, one
    /// leadership per configured dc-location, and the updating daemon.
    pub fn start_server(
        config: Config,
        server_scope: CancelScope,
    ) -> TsoResult<Arc<AllocatorManager>> {
        let root_path = KeyPath::root_path(config.cluster_id);
        let member = Arc::new(Participant::new(&config.name));
        let store = TsoStoreFactory::get_instance(&config.store_kind);

        let max_reset_ts_gap = config.max_reset_ts_gap_millis;
        let manager = AllocatorManager::new(
            &config,
            member,
            Arc::from(store),
            Arc::new(move || max_reset_ts_gap),
        );

        // The global allocator rides on this server's own leadership, which is
        // maintained elsewhere; a single node is always its own leader.
        manager.set_up_allocator(
            server_scope.child(),
            Constant::GLOBAL_DC_LOCATION,
            Arc::new(AlwaysLeader),
        )?;

        let board = Arc::new(ElectionBoard::default());
        for dc_location in &config.dc_locations {
            let leadership = MemLeadership::new(
                board.clone(),
                KeyPath::allocator_leader_path(&root_path, dc_location),
                &format!("{} local tso allocator leader election", dc_location),
            );
            manager.set_up_allocator(server_scope.child(), dc_location, Arc::new(leadership))?;
        }

        manager.start_allocator_daemon(server_scope);
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::CancelScope;

    #[test]
    fn cancel_is_idempotent() {
        let scope = CancelScope::new();
        assert!(!scope.is_cancelled());
        scope.cancel();
        scope.cancel();
        assert!(scope.is_cancelled());
    }

    #[test]
    fn parent_cancellation_reaches_children() {
        let parent = CancelScope::new();
        let child = parent.child();
        let grandchild = child.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn child_cancellation_stays_local() {
        let parent = CancelScope::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let scope = CancelScope::new();
        let other = scope.clone();
        other.cancel();
        assert!(scope.is_cancelled());
    }
}
