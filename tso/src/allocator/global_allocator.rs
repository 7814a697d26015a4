use std::sync::Arc;

use prometheus::IntGauge;

use crate::{
    cluster::TsoLeadership, error::TsoError, metric::tso_role_gauge, store::TsoStore,
    util::constant::Constant, Timestamp, TsoResult,
};

use super::{timestamp_oracle::TimestampOracle, MaxResetTsGapFn};

/// The cluster-wide TSO allocator. Its leadership is the enclosing server's
/// own leadership, maintained elsewhere, so it runs no leader loop and is
/// initialized right at setup.
pub struct GlobalTsoAllocator {
    leadership: Arc<dyn TsoLeadership>,
    timestamp_oracle: TimestampOracle,
    tso_allocator_role_gauge: IntGauge,
}

impl GlobalTsoAllocator {
    pub fn new(
        node_name: &str,
        tso_path: &str,
        save_interval_millis: u64,
        update_physical_interval_millis: u64,
        max_reset_ts_gap: MaxResetTsGapFn,
        leadership: Arc<dyn TsoLeadership>,
    ) -> Self {
        Self {
            leadership,
            timestamp_oracle: TimestampOracle::new(
                node_name,
                Constant::GLOBAL_DC_LOCATION,
                tso_path,
                save_interval_millis,
                update_physical_interval_millis,
                max_reset_ts_gap,
            ),
            tso_allocator_role_gauge: tso_role_gauge(Constant::GLOBAL_DC_LOCATION),
        }
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
    /// The TSO allocator must have been initialized before calling.
    pub fn generate_ts(&self, count: u32) -> TsoResult<Timestamp> {
        if !self.leadership.check() {
            self.timestamp_oracle.metric.not_leader_event.inc();
            anyhow::bail!(TsoError::NotLeader(Constant::GLOBAL_DC_LOCATION.to_owned()));
        }
        self.timestamp_oracle
            .get_timestamp(self.leadership.as_ref(), count)
    }

    /// Set the TSO to a caller-supplied value.
    ///
    /// Cannot move the TSO backwards in any case; with `ignore_smaller` a
    /// smaller input is silently ignored instead of rejected, and
    /// `skip_upper_bound_check` lifts the max-gap ceiling.
    pub fn set_tso(
        &self,
        store: &dyn TsoStore,
        ts: u64,
        ignore_smaller: bool,
        skip_upper_bound_check: bool,
    ) -> TsoResult<()> {
        self.timestamp_oracle.reset_user_timestamp(
            store,
            self.leadership.as_ref(),
            ts,
            ignore_smaller,
            skip_upper_bound_check,
        )
    }

    /// current TSO in memory
    pub fn get_current_tso(&self) -> TsoResult<Timestamp> {
        let (current_physical, current_logical) = self.timestamp_oracle.get_tso_obj();
        if current_physical == 0 {
            anyhow::bail!("timestamp in memory isn't initialized");
        }
        Ok(Timestamp::new(current_physical, current_logical))
    }

    /// Reset the allocator: clear the TSO in memory and stop advertising.
    pub fn reset(&self) {
        self.tso_allocator_role_gauge.set(0);
        self.timestamp_oracle.reset_timestamp();
    }
}
