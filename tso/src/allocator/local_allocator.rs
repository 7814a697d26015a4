use std::{sync::Arc, thread, time::Duration};

use parking_lot::Mutex;
use prometheus::IntGauge;

use crate::{
    bootstrap::CancelScope,
    cluster::{Participant, ParticipantInfo, TsoLeadership},
    error::TsoError,
    metric::tso_role_gauge,
    store::TsoStore,
    util::constant::Constant,
    Timestamp, TsoResult,
};

use super::{timestamp_oracle::TimestampOracle, MaxResetTsGapFn};

/// The per-dc TSO allocator. Unlike the global one it holds a DC-level
/// leadership of its own, campaigned and maintained by the manager's leader
/// loop through the election verbs below.
pub struct LocalTsoAllocator {
    dc_location: String,
    /// for election use
    member: Arc<Participant>,
    leadership: Arc<dyn TsoLeadership>,
    timestamp_oracle: TimestampOracle,
    /// the dc leader this node currently observes; this member itself once enabled
    allocator_leader: Mutex<Option<ParticipantInfo>>,
    tso_allocator_role_gauge: IntGauge,
}

impl LocalTsoAllocator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        member: Arc<Participant>,
        dc_location: &str,
        tso_path: &str,
        save_interval_millis: u64,
        update_physical_interval_millis: u64,
        max_reset_ts_gap: MaxResetTsGapFn,
        leadership: Arc<dyn TsoLeadership>,
    ) -> Self {
        let timestamp_oracle = TimestampOracle::new(
            member.get_name(),
            dc_location,
            tso_path,
            save_interval_millis,
            update_physical_interval_millis,
            max_reset_ts_gap,
        );
        Self {
            dc_location: dc_location.to_owned(),
            member,
            leadership,
            timestamp_oracle,
            allocator_leader: Mutex::new(None),
            tso_allocator_role_gauge: tso_role_gauge(dc_location),
        }
    }

    pub fn dc_location(&self) -> &str {
        &self.dc_location
    }

    /// Synchronize TSO with the store and prepare the memory for allocation.
    pub fn initialize(&self, store: &dyn TsoStore) -> TsoResult<()> {
        self.tso_allocator_role_gauge.set(1);
        self.timestamp_oracle.sync_timestamp(store)
    }

    pub fn is_initialized(&self) -> bool {
        self.timestamp_oracle.is_initialized()
    }

    /// Advance the TSO in memory and extend the persisted time window when due.
    pub fn update_tso(&self, store: &dyn TsoStore) -> TsoResult<()> {
        self.timestamp_oracle.update_timestamp(store)
    }

    /// Generate `count` consecutive timestamps atomically.
    pub fn generate_ts(&self, count: u32) -> TsoResult<Timestamp> {
        if !self.leadership.check() {
            self.timestamp_oracle.metric.not_leader_event.inc();
            anyhow::bail!(TsoError::NotLeader(self.dc_location.clone()));
        }
        self.timestamp_oracle
            .get_timestamp(self.leadership.as_ref(), count)
    }

    /// Reset the allocator: clear the TSO in memory and the observed leader.
    pub fn reset(&self) {
        self.tso_allocator_role_gauge.set(0);
        self.timestamp_oracle.reset_timestamp();
        self.allocator_leader.lock().take();
    }

    /// Checks if someone else holds the dc's allocator leadership. Returns the
    /// observed leader with its revision, plus whether the observation must be
    /// retried right away.
    pub fn check_allocator_leader(&self) -> (Option<(ParticipantInfo, i64)>, bool) {
        match self.leadership.get_leader() {
            Ok((Some(leader), revision)) => {
                if self.member.is_same(&leader) {
                    // We are the persisted leader without holding the lease, which
                    // means a previous campaign went wrong. Delete the key and let
                    // everyone (including us) campaign from a clean slate.
                    log::warn!(
                        "the local tso allocator leader has not changed, delete and campaign again, dc-location: {}, old-leader: {:?}",
                        self.dc_location,
                        leader
                    );
                    if let Err(e) = self.leadership.delete_leader_key() {
                        log::error!(
                            "deleting the local tso allocator leader key meets error, dc-location: {}, error: {}",
                            self.dc_location,
                            e
                        );
                        thread::sleep(Duration::from_millis(Constant::LOOP_MIN_INTERVAL_MILLIS));
                        (None, true)
                    } else {
                        // the campaign can start immediately
                        (None, false)
                    }
                } else {
                    (Some((leader, revision)), false)
                }
            }
            Ok((None, _)) => {
                // no leader yet
                (None, false)
            }
            Err(e) => {
                log::error!(
                    "getting the local tso allocator leader meets error, dc-location: {}, error: {}",
                    self.dc_location,
                    e
                );
                thread::sleep(Duration::from_millis(Constant::LOOP_MIN_INTERVAL_MILLIS));
                (None, true)
            }
        }
    }

    /// Watch the observed leader until it changes or the scope is cancelled.
    pub fn watch_allocator_leader(
        &self,
        scope: &CancelScope,
        leader: ParticipantInfo,
        revision: i64,
    ) {
        self.allocator_leader.lock().replace(leader);
        self.leadership.watch(revision, scope.clone());
        self.allocator_leader.lock().take();
    }

    /// Join the dc's allocator leader election with the given lease.
    pub fn campaign_allocator_leader(&self, lease_timeout_millis: u64) -> TsoResult<()> {
        self.leadership
            .campaign(lease_timeout_millis, self.member.member_value())
    }

    /// Renew the allocator leadership until the scope is cancelled.
    pub fn keep_allocator_leader(&self, scope: CancelScope) {
        self.leadership.keep(scope);
    }

    /// Whether the leader lease backing this allocator is still held.
    pub fn is_still_allocator_leader(&self) -> bool {
        self.leadership.check()
    }

    /// Declare this member the serving allocator leader of its dc.
    pub fn enable_allocator_leader(&self) {
        self.allocator_leader
            .lock()
            .replace(self.member.member().clone());
    }

    pub fn get_allocator_leader(&self) -> Option<ParticipantInfo> {
        self.allocator_leader.lock().clone()
    }
}
