use std::{collections::HashMap, sync::Arc, thread, time::Duration};

use parking_lot::RwLock;
use scopeguard::defer;

use crate::{
    allocator::{GlobalTsoAllocator, LocalTsoAllocator, MaxResetTsGapFn, TsoAllocator},
    bootstrap::CancelScope,
    cluster::{Participant, TsoLeadership},
    config::Config,
    error::TsoError,
    metric::DaemonMetric,
    store::TsoStore,
    util::{constant::Constant, key_path::KeyPath},
    Timestamp, TsoResult,
};

/// Exclusion predicate over allocator groups: a group is enumerated only when
/// no supplied filter returns true for it.
pub type AllocatorGroupFilter = fn(&AllocatorGroup) -> bool;

/// excludes groups whose allocator has not been initialized since its latest campaign
pub fn filter_uninitialized(ag: &AllocatorGroup) -> bool {
    !ag.allocator.is_initialized()
}

/// excludes groups whose leadership is not currently held
pub fn filter_unavailable_leadership(ag: &AllocatorGroup) -> bool {
    !ag.leadership.check()
}

/// One dc-location's allocator bound to its leadership and cancellation scope.
pub struct AllocatorGroup {
    dc_location: String,
    /// Scope shared by every task spawned for this group. Cancelling it is the
    /// fatal signal upwards: it tells the enclosing server the allocator can't
    /// work on, and every task bound to the group exits promptly.
    parent_scope: CancelScope,
    /// For the Global TSO Allocator this is the server's own leadership; for a
    /// Local TSO Allocator it is the DC-level certificate allowing the
    /// allocator to generate TSO for local transactions in its DC.
    leadership: Arc<dyn TsoLeadership>,
    allocator: Arc<TsoAllocator>,
}

impl AllocatorGroup {
    pub fn dc_location(&self) -> &str {
        &self.dc_location
    }

    pub fn allocator(&self) -> &Arc<TsoAllocator> {
        &self.allocator
    }

    pub fn leadership(&self) -> &Arc<dyn TsoLeadership> {
        &self.leadership
    }
}

/// AllocatorManager is used to manage the TSO allocators this server holds.
/// It is in charge of maintaining each allocator's leadership, keeping their
/// clocks advancing, and forwarding TSO allocation requests to the allocator
/// owning the requested dc-location.
pub struct AllocatorManager {
    /// dc-location -> allocator group; the sole authority on which allocators exist
    allocator_groups: RwLock<HashMap<String, Arc<AllocatorGroup>>>,
    /// for election use
    member: Arc<Participant>,
    store: Arc<dyn TsoStore>,
    update_pool: rayon::ThreadPool,
    metric: DaemonMetric,

    // tso config
    root_path: String,
    leader_lease_millis: u64,
    leader_tick_interval_millis: u64,
    save_interval_millis: u64,
    update_physical_interval_millis: u64,
    max_reset_ts_gap: MaxResetTsGapFn,
}

impl AllocatorManager {
    pub fn new(
        config: &Config,
        member: Arc<Participant>,
        store: Arc<dyn TsoStore>,
        max_reset_ts_gap: MaxResetTsGapFn,
    ) -> Arc<Self> {
        let update_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.allocator_worker_size)
            .thread_name(|worker_idx| format!("tso-allocator-worker-{}", worker_idx))
            .build()
            .expect("create tso allocator worker pool failed");

        Arc::new(Self {
            allocator_groups: RwLock::new(HashMap::new()),
            member,
            store,
            update_pool,
            metric: DaemonMetric::default(),
            root_path: KeyPath::root_path(config.cluster_id),
            leader_lease_millis: config.leader_lease_millis,
            leader_tick_interval_millis: config.leader_tick_interval_millis,
            save_interval_millis: config.save_interval_millis,
            update_physical_interval_millis: config.update_physical_interval_millis,
            max_reset_ts_gap,
        })
    }

    /// Set up the allocator serving `dc_location`, which registers its group
    /// and puts it under the allocator daemon. An allocator should only be set
    /// up once; it may be initialized and reset many times as elections go.
    ///
    /// The global allocator is initialized here synchronously; on failure the
    /// group stays registered but uninitialized (the daemon filters it out)
    /// and setting it up again retries the initialization. A local allocator
    /// instead joins its dc's election, which is self-healing, so local setup
    /// never fails.
    pub fn set_up_allocator(
        self: &Arc<Self>,
        parent_scope: CancelScope,
        dc_location: &str,
        leadership: Arc<dyn TsoLeadership>,
    ) -> TsoResult<()> {
        if dc_location.is_empty() {
            anyhow::bail!("dc-location must not be empty");
        }

        let tso_path = KeyPath::allocator_path(&self.root_path, dc_location);
        let allocator = if dc_location == Constant::GLOBAL_DC_LOCATION {
            TsoAllocator::Global(GlobalTsoAllocator::new(
                self.member.get_name(),
                &tso_path,
                self.save_interval_millis,
                self.update_physical_interval_millis,
                self.max_reset_ts_gap.clone(),
                leadership.clone(),
            ))
        } else {
            TsoAllocator::Local(LocalTsoAllocator::new(
                self.member.clone(),
                dc_location,
                &tso_path,
                self.save_interval_millis,
                self.update_physical_interval_millis,
                self.max_reset_ts_gap.clone(),
                leadership.clone(),
            ))
        };
        let allocator = Arc::new(allocator);

        // Update or create the group. Registration happens before any task
        // can observe it, so enumeration never sees a half-built entry.
        let group = Arc::new(AllocatorGroup {
            dc_location: dc_location.to_owned(),
            parent_scope: parent_scope.clone(),
            leadership,
            allocator: allocator.clone(),
        });
        self.allocator_groups
            .write()
            .insert(dc_location.to_owned(), group);

        if dc_location == Constant::GLOBAL_DC_LOCATION {
            // The global allocator only depends on the server's own
            // leadership, so it can be initialized directly here.
            allocator.initialize(self.store.as_ref())?;
        } else {
            // Join in the dc's local allocator election
            let manager = Arc::clone(self);
            thread::Builder::new()
                .name(format!("tso-leader-loop-{}", dc_location))
                .spawn(move || manager.allocator_leader_loop(parent_scope, allocator))
                .expect("spawn local tso allocator leader loop failed");
        }
        Ok(())
    }

    /// Per-group reconciliation: observe the current leader, watch it until it
    /// changes, then campaign, until the parent scope is cancelled.
    fn allocator_leader_loop(&self, parent_scope: CancelScope, allocator: Arc<TsoAllocator>) {
        let Some(allocator) = allocator.as_local() else {
            return;
        };
        loop {
            if parent_scope.is_cancelled() {
                log::info!(
                    "server is closed, return local tso allocator leader loop, dc-location: {}, name: {}",
                    allocator.dc_location(),
                    self.member.get_name()
                );
                return;
            }

            let (allocator_leader, check_again) = allocator.check_allocator_leader();
            if check_again {
                continue;
            }
            if let Some((allocator_leader, revision)) = allocator_leader {
                log::info!(
                    "start to watch the local tso allocator leader, dc-location: {}, leader: {:?}, name: {}",
                    allocator.dc_location(),
                    allocator_leader,
                    self.member.get_name()
                );
                // watch_allocator_leader keeps blocking and only returns once
                // the observed leader key has changed or the scope fired
                allocator.watch_allocator_leader(&parent_scope, allocator_leader, revision);
                log::info!(
                    "local tso allocator leader has changed, try to re-campaign a local tso allocator leader, dc-location: {}",
                    allocator.dc_location()
                );
            }
            self.campaign_allocator_leader(&parent_scope, allocator);
        }
    }

    /// One campaign attempt: on success, hold the leadership until the lease
    /// expires or the scope fires, then demote with a paired reset.
    fn campaign_allocator_leader(&self, parent_scope: &CancelScope, allocator: &LocalTsoAllocator) {
        log::info!(
            "start to campaign local tso allocator leader, dc-location: {}, name: {}",
            allocator.dc_location(),
            self.member.get_name()
        );
        if let Err(e) = allocator.campaign_allocator_leader(self.leader_lease_millis) {
            match e.downcast_ref::<TsoError>() {
                Some(TsoError::CampaignConflict) => log::info!(
                    "campaign local tso allocator leader meets conflict, another server may campaign successfully, dc-location: {}, name: {}",
                    allocator.dc_location(),
                    self.member.get_name()
                ),
                _ => log::error!(
                    "failed to campaign local tso allocator leader, dc-location: {}, error: {}",
                    allocator.dc_location(),
                    e
                ),
            }
            return;
        }

        // Start keepalive for the Local TSO Allocator leadership and enable
        // the Local TSO service. Whatever way this function is left, the
        // child scope is cancelled and allocator and leadership are reset
        // together, so a demoted group never keeps advertising leadership.
        let scope = parent_scope.child();
        defer! {
            scope.cancel();
            self.reset_allocator_group(allocator.dc_location());
        }

        // maintain the Local TSO Allocator leader
        allocator.keep_allocator_leader(scope.clone());
        log::info!(
            "campaign local tso allocator leader ok, dc-location: {}, name: {}",
            allocator.dc_location(),
            self.member.get_name()
        );

        log::info!(
            "initialize the local tso allocator, dc-location: {}, name: {}",
            allocator.dc_location(),
            self.member.get_name()
        );
        if let Err(e) = allocator.initialize(self.store.as_ref()) {
            log::error!(
                "failed to initialize the local tso allocator, dc-location: {}, error: {}",
                allocator.dc_location(),
                e
            );
            return;
        }
        allocator.enable_allocator_leader();
        log::info!(
            "local tso allocator leader is ready to serve, dc-location: {}, name: {}",
            allocator.dc_location(),
            self.member.get_name()
        );

        loop {
            thread::sleep(Duration::from_millis(self.leader_tick_interval_millis));
            if scope.is_cancelled() {
                log::info!(
                    "server is closed, reset the local tso allocator, dc-location: {}, name: {}",
                    allocator.dc_location(),
                    self.member.get_name()
                );
                return;
            }
            if !allocator.is_still_allocator_leader() {
                log::info!(
                    "no longer a local tso allocator leader because lease has expired, the leader will step down, dc-location: {}, name: {}",
                    allocator.dc_location(),
                    self.member.get_name()
                );
                return;
            }
        }
    }

    /// Run the TSO updating daemon on its own thread until the scope fires.
    pub fn start_allocator_daemon(self: &Arc<Self>, server_scope: CancelScope) {
        let manager = Arc::clone(self);
        thread::Builder::new()
            .name("tso-allocator-daemon".into())
            .spawn(move || manager.allocator_daemon(server_scope))
            .expect("spawn tso allocator daemon failed");
    }

    /// Advance every working allocator once per update step. A tick waits for
    /// the whole fan-out to drain, so at most one update per allocator is in
    /// flight and a slow group backpressures the next tick instead of piling up.
    fn allocator_daemon(&self, server_scope: CancelScope) {
        log::info!("entering into allocator daemon");
        loop {
            thread::sleep(Duration::from_millis(self.update_physical_interval_millis));
            if server_scope.is_cancelled() {
                break;
            }
            self.metric.tick_event.inc();

            // Filter out the allocators without leadership and the uninitialized
            let allocator_groups =
                self.get_allocator_groups(&[filter_uninitialized, filter_unavailable_leadership]);
            // Update each allocator concurrently
            self.update_pool.scope(|scope| {
                for allocator_group in &allocator_groups {
                    scope.spawn(move |_| self.update_allocator(allocator_group));
                }
            });
        }
        log::info!("exit allocator daemon");
    }

    /// Update the allocator in the group once.
    fn update_allocator(&self, allocator_group: &AllocatorGroup) {
        if allocator_group.parent_scope.is_cancelled() {
            // Resetting the allocator will clear the TSO in memory
            allocator_group.allocator.reset();
            return;
        }
        if !allocator_group.leadership.check() {
            log::info!(
                "allocator doesn't campaign leadership yet, dc-location: {}",
                allocator_group.dc_location
            );
            thread::sleep(Duration::from_millis(Constant::NO_LEADERSHIP_PAUSE_MILLIS));
            return;
        }
        if let Err(e) = allocator_group.allocator.update_tso(self.store.as_ref()) {
            log::warn!(
                "failed to update allocator's timestamp, dc-location: {}, error: {}",
                allocator_group.dc_location,
                e
            );
            self.metric.err_update_event.inc();
            // An update failure means the persistence layer rejected a
            // monotonicity-preserving write; serving from this allocator any
            // further could hand out stale timestamps. Cancel the scope so
            // the enclosing server rebuilds the group.
            allocator_group.parent_scope.cancel();
        }
    }

    /// HandleTSORequest forwards TSO allocation requests to the correct TSO allocator.
    #[fastrace::trace]
    pub fn handle_tso_request(&self, dc_location: &str, count: u32) -> TsoResult<Timestamp> {
        // the lock only covers the lookup, never the allocation itself
        let allocator = {
            match self.allocator_groups.read().get(dc_location) {
                Some(allocator_group) => allocator_group.allocator.clone(),
                None => anyhow::bail!(TsoError::GetAllocator(format!(
                    "{} allocator not found, generate timestamp failed",
                    dc_location
                ))),
            }
        };
        allocator.generate_ts(count)
    }

    /// Reset the group's allocator and leadership together. Usually called
    /// before re-triggering an allocator leader campaign.
    fn reset_allocator_group(&self, dc_location: &str) {
        let allocator_groups = self.allocator_groups.write();
        if let Some(allocator_group) = allocator_groups.get(dc_location) {
            allocator_group.allocator.reset();
            allocator_group.leadership.reset();
        }
    }

    fn get_allocator_groups(&self, filters: &[AllocatorGroupFilter]) -> Vec<Arc<AllocatorGroup>> {
        let allocator_groups = self.allocator_groups.read();
        let mut selected = Vec::new();
        for allocator_group in allocator_groups.values() {
            if filters.iter().all(|filter| !filter(allocator_group)) {
                selected.push(allocator_group.clone());
            }
        }
        selected
    }

    /// Get the allocator serving `dc_location`.
    pub fn get_allocator(&self, dc_location: &str) -> TsoResult<Arc<TsoAllocator>> {
        match self.allocator_groups.read().get(dc_location) {
            Some(allocator_group) => Ok(allocator_group.allocator.clone()),
            None => anyhow::bail!(TsoError::GetAllocator(format!(
                "{} allocator not found",
                dc_location
            ))),
        }
    }

    /// Get all allocators surviving the filters, in unspecified order.
    pub fn get_allocators(&self, filters: &[AllocatorGroupFilter]) -> Vec<Arc<TsoAllocator>> {
        self.get_allocator_groups(filters)
            .iter()
            .map(|allocator_group| allocator_group.allocator.clone())
            .collect()
    }
}
