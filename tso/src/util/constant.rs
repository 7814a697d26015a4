pub struct Constant;

impl Constant {
    pub const ROOT_PATH: &'static str = "/tso";

    /// Reserved dc-location label of the cluster-wide allocator.
    /// Must never collide with a real data-center label.
    pub const GLOBAL_DC_LOCATION: &'static str = "global";

    /// pause before giving a group that lost its leadership mid-tick another chance
    pub const NO_LEADERSHIP_PAUSE_MILLIS: u64 = 200;

    /// minimum loop interval
    pub const LOOP_MIN_INTERVAL_MILLIS: u64 = 100;

    /// poll cadence of the in-process election board watch
    pub const WATCH_POLL_INTERVAL_MILLIS: u64 = 10;
}
