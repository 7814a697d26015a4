use crate::store::TsoStoreKind;

pub struct Config {
    /// node name, unique in cluster
    pub name: String,
    /// namespace under the storage root, shared by every node of one cluster
    pub cluster_id: u64,
    /// dc-locations this node joins the Local TSO allocator elections for
    pub dc_locations: Vec<String>,

    pub allocator_worker_size: usize,
    pub store_kind: TsoStoreKind,

    /// defines the time within which a TSO allocator leader must renew its lease,
    /// otherwise the leader key expires and other nodes can campaign again
    pub leader_lease_millis: u64,
    /// the interval a serving leader re-checks its own lease at
    pub leader_tick_interval_millis: u64,

    /// how far ahead of the in-memory clock the persisted save point is kept
    pub save_interval_millis: u64,
    /// The interval to update the physical part of timestamp. At most 1<<18 TSOs
    /// can be generated per interval, so the smaller the value, the more TSOs
    /// provided at the price of CPU time.
    pub update_physical_interval_millis: u64,
    /// the max gap to reset the TSO to a user-specified value
    pub max_reset_ts_gap_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "tso-server-1".into(),
            cluster_id: 0,
            dc_locations: Vec::new(),

            allocator_worker_size: 4,
            store_kind: TsoStoreKind::Sqlite("sqlite::memory:".into()),

            leader_lease_millis: 3000,
            leader_tick_interval_millis: 50,
            save_interval_millis: 3000,
            update_physical_interval_millis: 50,
            max_reset_ts_gap_millis: 24 * 60 * 60 * 1000,
        }
    }
}
