use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts};

fn event(name: &str, help: &str, dc_location: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help).const_label("dc", dc_location))
        .expect("metric options are static")
}

fn duration(name: &str, help: &str, dc_location: &str) -> Histogram {
    Histogram::with_opts(HistogramOpts::new(name, help).const_label("dc", dc_location))
        .expect("metric options are static")
}

/// `1` while the allocator of this dc-location is serving, `0` otherwise.
pub fn tso_role_gauge(dc_location: &str) -> IntGauge {
    IntGauge::with_opts(
        Opts::new("tso_allocator_role", "TSO allocator on serving or not").const_label("dc", dc_location),
    )
    .expect("metric options are static")
}

/// Per-allocator timestampOracle event counters and durations.
pub struct TsoMetric {
    // synchronize
    pub sync_event: IntCounter,
    pub skip_sync_event: IntCounter,
    pub sync_ok_event: IntCounter,
    pub err_save_sync_ts_event: IntCounter,
    // user reset
    pub err_lease_reset_ts_event: IntCounter,
    pub err_reset_small_physical_ts_event: IntCounter,
    pub err_reset_small_logical_ts_event: IntCounter,
    pub err_reset_large_ts_event: IntCounter,
    pub err_save_reset_ts_event: IntCounter,
    pub reset_tso_ok_event: IntCounter,
    // update
    pub save_event: IntCounter,
    pub slow_save_event: IntCounter,
    pub system_time_slow_event: IntCounter,
    pub skip_save_event: IntCounter,
    pub err_save_update_ts_event: IntCounter,
    // get
    pub not_leader_event: IntCounter,
    pub not_leader_anymore_event: IntCounter,
    pub logical_overflow_event: IntCounter,
    pub exceeded_max_retry_event: IntCounter,
    // operation durations
    pub sync_save_duration: Histogram,
    pub reset_save_duration: Histogram,
    pub update_save_duration: Histogram,
    // clock observation
    pub tso_physical_gauge: Gauge,
    pub tso_physical_gap_gauge: Gauge,
}

impl TsoMetric {
    pub fn new(dc_location: &str) -> Self {
        Self {
            sync_event: event("tso_sync_event", "TSO synchronize times", dc_location),
            skip_sync_event: event("tso_skip_sync_event", "TSO synchronize skip times", dc_location),
            sync_ok_event: event("tso_sync_ok_event", "TSO synchronize ok times", dc_location),
            err_save_sync_ts_event: event(
                "tso_err_save_sync_ts_event",
                "TSO synchronize save error times",
                dc_location,
            ),
            err_lease_reset_ts_event: event(
                "tso_err_lease_reset_ts_event",
                "TSO user reset with expired lease times",
                dc_location,
            ),
            err_reset_small_physical_ts_event: event(
                "tso_err_reset_small_physical_ts_event",
                "TSO user reset with smaller physical time times",
                dc_location,
            ),
            err_reset_small_logical_ts_event: event(
                "tso_err_reset_small_logical_ts_event",
                "TSO user reset with smaller logical time times",
                dc_location,
            ),
            err_reset_large_ts_event: event(
                "tso_err_reset_large_ts_event",
                "TSO user reset beyond the max gap times",
                dc_location,
            ),
            err_save_reset_ts_event: event(
                "tso_err_save_reset_ts_event",
                "TSO user reset save error times",
                dc_location,
            ),
            reset_tso_ok_event: event("tso_reset_tso_ok_event", "TSO user reset ok times", dc_location),
            save_event: event("tso_save_event", "TSO update save times", dc_location),
            slow_save_event: event("tso_slow_save_event", "TSO update slow times", dc_location),
            system_time_slow_event: event(
                "tso_system_time_slow_event",
                "TSO update with system time fallback times",
                dc_location,
            ),
            skip_save_event: event("tso_skip_save_event", "TSO update save skip times", dc_location),
            err_save_update_ts_event: event(
                "tso_err_save_update_ts_event",
                "TSO update save error times",
                dc_location,
            ),
            not_leader_event: event(
                "tso_not_leader_event",
                "TSO get rejected for not being leader times",
                dc_location,
            ),
            not_leader_anymore_event: event(
                "tso_not_leader_anymore_event",
                "TSO get with uninitialized memory as non-leader times",
                dc_location,
            ),
            logical_overflow_event: event(
                "tso_logical_overflow_event",
                "TSO get with logical overflow times",
                dc_location,
            ),
            exceeded_max_retry_event: event(
                "tso_exceeded_max_retry_event",
                "TSO get exceeded max retry times",
                dc_location,
            ),
            sync_save_duration: duration(
                "tso_sync_save_duration",
                "TSO synchronize save duration",
                dc_location,
            ),
            reset_save_duration: duration(
                "tso_reset_save_duration",
                "TSO user reset save duration",
                dc_location,
            ),
            update_save_duration: duration(
                "tso_update_save_duration",
                "TSO update save duration",
                dc_location,
            ),
            tso_physical_gauge: Gauge::with_opts(
                Opts::new("tso_physical", "TSO physical value in memory").const_label("dc", dc_location),
            )
            .expect("metric options are static"),
            tso_physical_gap_gauge: Gauge::with_opts(
                Opts::new("tso_physical_gap", "gap between system time and TSO physical value")
                    .const_label("dc", dc_location),
            )
            .expect("metric options are static"),
        }
    }
}

/// Allocator updating daemon counters.
pub struct DaemonMetric {
    pub tick_event: IntCounter,
    pub err_update_event: IntCounter,
}

impl Default for DaemonMetric {
    fn default() -> Self {
        Self {
            tick_event: IntCounter::new("tso_daemon_tick_event", "allocator daemon tick times")
                .expect("metric options are static"),
            err_update_event: IntCounter::new(
                "tso_daemon_err_update_event",
                "allocator daemon update failure times",
            )
            .expect("metric options are static"),
        }
    }
}
