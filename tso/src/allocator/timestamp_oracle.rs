use std::{sync::atomic::AtomicU64, time::Duration};

use coarsetime::{Clock, Instant};
use parking_lot::RwLock;

use crate::{
    allocator::timestamp::UnixTimeStamp, cluster::TsoLeadership, metric::TsoMetric,
    store::TsoStore, util::constant::Constant, TsoResult,
};

use super::{timestamp::Timestamp, MaxResetTsGapFn};

/// UpdateTimestampGuard is the min timestamp interval.
/// (Millisecond)
const UPDATE_TIMESTAMP_GUARD: i64 = 1;
/// JET_LAG_WARNING_THRESHOLD is the warning threshold of jetLag in `update_timestamp`.
/// In case of a small `update_physical_interval`, the `3 * update_physical_interval`
/// would also be small and trigger unnecessary warnings about clock offset.
/// It's an empirical value.
/// (Millisecond)
const JET_LAG_WARNING_THRESHOLD: i64 = 150;
/// If logical >= Timestamp::MAX_LOGICAL, retry get
const GET_TS_MAX_RETRY_COUNT: usize = 10;

/// TsoObject is used to store the current TSO in memory
#[derive(Default)]
struct TsoObject {
    physical_millis: UnixTimeStamp,
    logical: u32,
    update_time_millis: UnixTimeStamp,
}

/// TimestampOracle is used to maintain the logic of TSO.
pub struct TimestampOracle {
    /// tso service node name
    node_name: String,
    /// storage path of this allocator's save point, distinct per dc-location
    tso_path: String,
    /// Config
    save_interval: u64,
    update_physical_interval: u64,
    max_reset_ts_gap: MaxResetTsGapFn,
    /// memory stored
    tso_obj: RwLock<TsoObject>,
    /// last timestamp window stored
    last_saved_time: AtomicU64,
    /// observability
    pub(crate) metric: TsoMetric,
}

impl TimestampOracle {
    pub(crate) fn new(
        node_name: &str,
        dc_location: &str,
        tso_path: &str,
        save_interval_millis: u64,
        update_physical_interval_millis: u64,
        max_reset_ts_gap: MaxResetTsGapFn,
    ) -> Self {
        Self {
            node_name: node_name.to_owned(),
            tso_path: tso_path.to_owned(),
            save_interval: save_interval_millis,
            update_physical_interval: update_physical_interval_millis,
            max_reset_ts_gap,
            tso_obj: RwLock::new(TsoObject::default()),
            last_saved_time: 0.into(),
            metric: TsoMetric::new(dc_location),
        }
    }

    fn set_tso_obj_physical(&self, next_millis: u64, force: bool) {
        let mut tso_obj = self.tso_obj.upgradable_read();
        // Do not update the zero physical time if the `force` flag is false
        if tso_obj.physical_millis == 0 && !force {
            return;
        }
        // make sure the ts won't fall back
        if next_millis > tso_obj.physical_millis {
            tso_obj.with_upgraded(|x| {
                x.physical_millis = next_millis;
                x.logical = 0;
                x.update_time_millis = Clock::now_since_epoch().as_millis();
            })
        }
    }

    pub fn get_tso_obj(&self) -> (u64, u32) {
        let tso_obj = self.tso_obj.read();

        if tso_obj.physical_millis == 0 {
            (0, 0)
        } else {
            (tso_obj.physical_millis, tso_obj.logical)
        }
    }

    fn get_last_saved_time(&self) -> UnixTimeStamp {
        self.last_saved_time
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    fn set_last_saved_time(&self, ts: UnixTimeStamp) {
        self.last_saved_time
            .store(ts, std::sync::atomic::Ordering::Relaxed);
    }

    /// add the TSO's logical part with the given count and return the new TSO result
    #[fastrace::trace]
    fn generate(&self, count: u32) -> (u64, u32) {
        let mut tso_obj = self.tso_obj.write();

        if tso_obj.physical_millis == 0 {
            return (0, 0);
        }

        let physical_millis = tso_obj.physical_millis;
        tso_obj.logical += count;
        let logical = tso_obj.logical;
        tso_obj.update_time_millis = Clock::now_since_epoch().as_millis();
        (physical_millis, logical)
    }
}

impl TimestampOracle {
    /// Synchronize the timestamp with the store: if the current system time is
    /// behind the persisted save point, allocation continues from the save
    /// point, otherwise the system time wins and a new save point is written.
    #[fastrace::trace]
    pub fn sync_timestamp(&self, store: &dyn TsoStore) -> TsoResult<()> {
        log::info!("start to sync timestamp, tso-path: {}", self.tso_path);
        self.metric.sync_event.inc();

        let last = store.load_timestamp(self.tso_path.as_str())?;
        let last_saved_time = self.get_last_saved_time();

        // We could skip the synchronization if the following conditions are met:
        //   1. The timestamp in memory has been initialized.
        //   2. The last saved timestamp in store is not zero.
        //   3. The last saved timestamp in memory is not zero.
        //   4. The last saved timestamp in store is equal to the last saved timestamp in memory.
        // 1 is to ensure the timestamp in memory could always be initialized. 2-4 are to ensure
        // the synchronization could be skipped safely.
        if self.is_initialized() && last != 0 && last_saved_time != 0 && last == last_saved_time {
            log::info!(
                "skip sync timestamp, last: {}, last-saved: {}",
                last,
                last_saved_time
            );
            self.metric.skip_sync_event.inc();
            return Ok(());
        }

        let mut next = Clock::now_since_epoch().as_millis();

        // If the current system time minus the saved store timestamp is less than
        // `UPDATE_TIMESTAMP_GUARD`, allocation starts from the saved store timestamp.
        if next < last || next - last < UPDATE_TIMESTAMP_GUARD as u64 {
            log::warn!(
                "system time may be incorrect, last: {}, last-saved: {}, next: {}",
                last,
                last_saved_time,
                next
            );
            next = last + UPDATE_TIMESTAMP_GUARD as u64;
        }
        let save = next + self.save_interval;
        let start = Instant::now();
        if let Err(e) = store.save_timestamp(&self.tso_path, save, &self.node_name) {
            self.metric.err_save_sync_ts_event.inc();
            anyhow::bail!(e);
        }
        self.set_last_saved_time(save);
        self.metric
            .sync_save_duration
            .observe(start.elapsed().as_secs() as f64);

        self.metric.sync_ok_event.inc();
        log::info!(
            "sync and save timestamp, last: {}, last-saved: {}, next: {}",
            last,
            last_saved_time,
            next
        );

        self.set_tso_obj_physical(next, true);
        Ok(())
    }

    /// Check whether the timestampOracle is initialized.
    /// There are two situations we have an uninitialized TSO:
    /// 1. When `sync_timestamp` has not been called yet.
    /// 2. When `reset_timestamp` has been called already.
    pub(crate) fn is_initialized(&self) -> bool {
        self.tso_obj.read().physical_millis != 0
    }

    /// Update the TSO in memory with the specified TSO atomically.
    /// When `ignore_smaller` is true, the smaller-tso resetting error is swallowed.
    /// Cannot set a timestamp >= current + max_reset_ts_gap unless
    /// `skip_upper_bound_check` is set.
    #[fastrace::trace]
    pub fn reset_user_timestamp(
        &self,
        store: &dyn TsoStore,
        leadership: &dyn TsoLeadership,
        tso: u64,
        ignore_smaller: bool,
        skip_upper_bound_check: bool,
    ) -> TsoResult<()> {
        if !leadership.check() {
            self.metric.err_lease_reset_ts_event.inc();
            anyhow::bail!("lease expired");
        }

        let mut tso_obj = self.tso_obj.upgradable_read();

        let next_ts = Timestamp::from_u64(tso);
        let logical_diff = (next_ts.logical as i64) - (tso_obj.logical as i64);
        let physical_diff = (next_ts.physical_millis as i64) - (tso_obj.physical_millis as i64);

        // do not update if the next physical time is before the current one
        if physical_diff < 0 {
            self.metric.err_reset_small_physical_ts_event.inc();
            if ignore_smaller {
                return Ok(());
            } else {
                anyhow::bail!("the specified ts is smaller than now");
            }
        }

        // do not update if the next logical time is not ahead either
        if physical_diff == 0 && logical_diff <= 0 {
            self.metric.err_reset_small_logical_ts_event.inc();
            if ignore_smaller {
                return Ok(());
            } else {
                anyhow::bail!("the specified counter is smaller than now");
            }
        }

        // do not update if the physical time jumps too far ahead
        if !skip_upper_bound_check && physical_diff >= (self.max_reset_ts_gap)() as i64 {
            self.metric.err_reset_large_ts_event.inc();
            anyhow::bail!("the specified ts is too larger than now");
        }

        // save into store only if nextPhysical is close to lastSavedTime
        if (self.get_last_saved_time() as i64) - (next_ts.physical_millis as i64)
            <= UPDATE_TIMESTAMP_GUARD
        {
            let save = next_ts.physical_millis + self.save_interval;
            let start = Instant::now();
            if let Err(e) = store.save_timestamp(&self.tso_path, save, &self.node_name) {
                self.metric.err_save_reset_ts_event.inc();
                anyhow::bail!(e);
            }
            self.set_last_saved_time(save);
            self.metric
                .reset_save_duration
                .observe(start.elapsed().as_secs() as f64);
        }

        // save into memory only if nextPhysical or nextLogical is greater
        tso_obj.with_upgraded(|x| {
            x.physical_millis = next_ts.physical_millis;
            x.logical = next_ts.logical;
            x.update_time_millis = Clock::now_since_epoch().as_millis();
        });
        self.metric.reset_tso_ok_event.inc();
        Ok(())
    }

    /// Called on every update tick to drive the TSO forward.
    ///
    /// This function will do two things:
    ///  1. When the logical time is going to be used up, increase the current physical time.
    ///  2. When the time window is not big enough, which means the saved time minus the next
    ///     physical time is less than or equal to `UPDATE_TIMESTAMP_GUARD`, the time window
    ///     needs to be updated by saving next physical time plus the save interval.
    ///
    /// Constraints this function must satisfy:
    /// 1. The saved time is monotonically increasing.
    /// 2. The physical time is monotonically increasing.
    /// 3. The physical time is always less than the saved timestamp.
    ///
    /// NOTICE: this function should be called after the TSO in memory has been initialized
    /// and must not be called once the TSO in memory has been reset.
    #[fastrace::trace]
    pub fn update_timestamp(&self, store: &dyn TsoStore) -> TsoResult<()> {
        if !self.is_initialized() {
            anyhow::bail!("timestamp in memory has not been initialized");
        }

        let (prev_physical, prev_logical) = self.get_tso_obj();
        self.metric.tso_physical_gauge.set(prev_physical as f64);
        self.metric
            .tso_physical_gap_gauge
            .set((Clock::now_since_epoch().as_millis().saturating_sub(prev_physical)) as f64);

        let now = Clock::now_since_epoch().as_millis();

        self.metric.save_event.inc();

        // warn if the clock offset is large
        let jet_lag = (now as i64) - (prev_physical as i64);
        if jet_lag > 3 * self.update_physical_interval as i64 && jet_lag > JET_LAG_WARNING_THRESHOLD
        {
            log::warn!(
                "clock offset, jet-lag: {}, prev-physical: {}, now: {}, update-physical-interval: {}",
                jet_lag,
                prev_physical,
                now,
                self.update_physical_interval
            );
            self.metric.slow_save_event.inc();
        }

        // system time fallback
        if jet_lag < 0 {
            self.metric.system_time_slow_event.inc();
        }

        // If the system time is greater, it will be synchronized with the system time.
        let next = if jet_lag > UPDATE_TIMESTAMP_GUARD {
            now
        } else if prev_logical > Timestamp::MAX_LOGICAL / 2 {
            // The reason for choosing maxLogical/2 is that it's big enough for common cases.
            // There are enough timestamps to allocate before the next update.
            log::warn!(
                "the logical time may not be enough, prev-logical: {}",
                prev_logical
            );
            prev_physical + 1
        } else {
            // It will still use the previous physical time to alloc the timestamp.
            self.metric.skip_save_event.inc();
            return Ok(());
        };

        // It is not safe to increase the physical time to `next`.
        // The time window needs to be updated and saved to store.
        if (self.get_last_saved_time() as i64) - (next as i64) <= UPDATE_TIMESTAMP_GUARD {
            let save = next + self.save_interval;
            let start = Instant::now();
            if let Err(e) = store.save_timestamp(&self.tso_path, save, &self.node_name) {
                log::warn!(
                    "save timestamp failed, tso-path: {}, error: {}",
                    self.tso_path,
                    e
                );
                self.metric.err_save_update_ts_event.inc();
                anyhow::bail!(e);
            }

            self.set_last_saved_time(save);
            self.metric
                .update_save_duration
                .observe(start.elapsed().as_secs() as f64);
        }

        // save into memory
        self.set_tso_obj_physical(next, false);

        Ok(())
    }

    /// Get a timestamp; when the logical time runs out this blocks until
    /// `update_timestamp` has advanced the physical part.
    #[fastrace::trace]
    pub fn get_timestamp(&self, leadership: &dyn TsoLeadership, count: u32) -> TsoResult<Timestamp> {
        if count == 0 {
            anyhow::bail!("tso count should be positive");
        }

        for i in 0..GET_TS_MAX_RETRY_COUNT {
            let (current_physical, _) = self.get_tso_obj();

            if current_physical == 0 {
                // If it's the leader, sync_timestamp may not have completed yet
                if leadership.check() {
                    std::thread::sleep(Duration::from_millis(Constant::LOOP_MIN_INTERVAL_MILLIS));
                    continue;
                }
                self.metric.not_leader_anymore_event.inc();
                anyhow::bail!("timestamp in memory isn't initialized");
            }

            // get a new TSO result with the given count
            let (physical_millis, logical) = self.generate(count);
            if physical_millis == 0 {
                anyhow::bail!("timestamp in memory has been reset");
            }
            if logical >= Timestamp::MAX_LOGICAL {
                log::warn!(
                    "logical part outside of max logical interval, please check ntp time, or adjust the update-physical-interval, retry-count: {}",
                    i
                );
                self.metric.logical_overflow_event.inc();
                std::thread::sleep(Duration::from_millis(self.update_physical_interval));
                continue;
            }

            // In case the lease expired after the first check
            if !leadership.check() {
                anyhow::bail!("requested tso is not the leader anymore");
            }

            return Ok(Timestamp {
                physical_millis,
                logical,
                reserved: 0,
            });
        }
        self.metric.exceeded_max_retry_event.inc();
        anyhow::bail!("generate tso maximum number of retries exceeded");
    }

    /// Reset the timestamp in memory, invalidating outstanding logical counters.
    pub fn reset_timestamp(&self) {
        log::info!("reset the timestamp in memory, tso-path: {}", self.tso_path);

        let mut tso_obj = self.tso_obj.write();
        tso_obj.physical_millis = 0;
        tso_obj.logical = 0;
        tso_obj.update_time_millis = 0;

        self.set_last_saved_time(0);
    }
}
