#![allow(dead_code)]

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use tso::{
    AllocatorManager, CancelScope, Config, Participant, ParticipantInfo, TsoError, TsoLeadership,
    TsoResult, TsoStore, TsoStoreKind,
};

/// Shared, ordered record of everything the mocks observe.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == event)
    }

    pub fn index_of(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// In-memory `TsoStore` with failure and latency injection, plus per-path
/// tracking of how many saves overlap in time.
pub struct MockStore {
    events: Arc<EventLog>,
    timestamps: Mutex<HashMap<String, u64>>,
    fail_save: AtomicBool,
    save_delay_millis: AtomicU64,
    in_flight: Mutex<HashMap<String, u64>>,
    max_in_flight: Mutex<HashMap<String, u64>>,
}

impl MockStore {
    pub fn new(events: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self {
            events,
            timestamps: Mutex::new(HashMap::new()),
            fail_save: AtomicBool::new(false),
            save_delay_millis: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn set_save_delay(&self, millis: u64) {
        self.save_delay_millis.store(millis, Ordering::SeqCst);
    }

    /// The most saves ever observed in flight at once for `path`.
    pub fn max_in_flight(&self, path: &str) -> u64 {
        self.max_in_flight
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl TsoStore for MockStore {
    fn load_timestamp(&self, path: &str) -> TsoResult<u64> {
        self.events.push(format!("load:{}", path));
        Ok(self
            .timestamps
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0))
    }

    fn save_timestamp(&self, path: &str, ts: u64, _node_id: &str) -> TsoResult<()> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let n = in_flight.entry(path.to_owned()).or_insert(0);
            *n += 1;
            let mut max = self.max_in_flight.lock().unwrap();
            let m = max.entry(path.to_owned()).or_insert(0);
            if *n > *m {
                *m = *n;
            }
        }

        let delay = self.save_delay_millis.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }

        let result = if self.fail_save.load(Ordering::SeqCst) {
            Err(anyhow::anyhow!("injected save failure"))
        } else {
            self.timestamps.lock().unwrap().insert(path.to_owned(), ts);
            self.events.push(format!("save:{}", path));
            Ok(())
        };

        *self
            .in_flight
            .lock()
            .unwrap()
            .get_mut(path)
            .expect("in-flight entry exists") -= 1;
        result
    }
}

/// Scriptable `TsoLeadership`: leadership state, campaign outcome, persisted
/// leader, and watch release are all driven by the test.
pub struct MockLeadership {
    name: String,
    events: Arc<EventLog>,
    leader: AtomicBool,
    campaign_ok: AtomicBool,
    persistent_leader: Mutex<Option<(ParticipantInfo, i64)>>,
    watch_release: AtomicBool,
}

impl MockLeadership {
    pub fn new(name: &str, events: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            events,
            leader: AtomicBool::new(false),
            campaign_ok: AtomicBool::new(true),
            persistent_leader: Mutex::new(None),
            watch_release: AtomicBool::new(false),
        })
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    pub fn set_campaign_ok(&self, ok: bool) {
        self.campaign_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_persistent_leader(&self, leader: Option<(ParticipantInfo, i64)>) {
        *self.persistent_leader.lock().unwrap() = leader;
    }

    pub fn release_watch(&self) {
        self.watch_release.store(true, Ordering::SeqCst);
    }
}

impl TsoLeadership for MockLeadership {
    fn campaign(&self, lease_timeout_millis: u64, _leader_data: &str) -> TsoResult<()> {
        self.events
            .push(format!("{}:campaign:{}", self.name, lease_timeout_millis));
        if self.campaign_ok.load(Ordering::SeqCst) {
            self.leader.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            // pace retries the way a remote election would
            thread::sleep(Duration::from_millis(10));
            anyhow::bail!(TsoError::CampaignConflict)
        }
    }

    fn delete_leader_key(&self) -> TsoResult<()> {
        self.events.push(format!("{}:delete-leader-key", self.name));
        self.persistent_leader.lock().unwrap().take();
        Ok(())
    }

    fn check(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn get_leader(&self) -> TsoResult<(Option<ParticipantInfo>, i64)> {
        self.events.push(format!("{}:get-leader", self.name));
        // remote read latency
        thread::sleep(Duration::from_millis(2));
        match self.persistent_leader.lock().unwrap().clone() {
            Some((leader, revision)) => Ok((Some(leader), revision)),
            None => Ok((None, 0)),
        }
    }

    fn keep(&self, _scope: CancelScope) {
        self.events.push(format!("{}:keep", self.name));
    }

    fn watch(&self, revision: i64, scope: CancelScope) {
        self.events.push(format!("{}:watch:{}", self.name, revision));
        while !self.watch_release.load(Ordering::SeqCst) && !scope.is_cancelled() {
            thread::sleep(Duration::from_millis(5));
        }
        self.watch_release.store(false, Ordering::SeqCst);
        self.events.push(format!("{}:watch-return", self.name));
    }

    fn reset(&self) {
        self.events.push(format!("{}:reset", self.name));
        self.leader.store(false, Ordering::SeqCst);
    }
}

impl Debug for MockLeadership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("MockLeadership({})", self.name))
    }
}

/// Short intervals so scenarios settle fast; a zero save interval makes every
/// update tick hit the store, which the failure-injection tests rely on.
pub fn test_config() -> Config {
    Config {
        name: "pd-test".into(),
        cluster_id: 0,
        dc_locations: Vec::new(),
        allocator_worker_size: 4,
        store_kind: TsoStoreKind::Memory,
        leader_lease_millis: 3000,
        leader_tick_interval_millis: 10,
        save_interval_millis: 0,
        update_physical_interval_millis: 10,
        max_reset_ts_gap_millis: 24 * 60 * 60 * 1000,
    }
}

pub fn build_manager(config: &Config, store: Arc<MockStore>) -> Arc<AllocatorManager> {
    let member = Arc::new(Participant::new(&config.name));
    let max_reset_ts_gap = config.max_reset_ts_gap_millis;
    AllocatorManager::new(config, member, store, Arc::new(move || max_reset_ts_gap))
}

pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// A manager with one local allocator already campaigned, initialized and serving.
pub struct LocalFixture {
    pub manager: Arc<AllocatorManager>,
    pub leadership: Arc<MockLeadership>,
    pub store: Arc<MockStore>,
    pub events: Arc<EventLog>,
    pub server_scope: CancelScope,
    pub group_scope: CancelScope,
}

pub fn leading_local_fixture(dc_location: &str) -> LocalFixture {
    let events = Arc::new(EventLog::default());
    let store = MockStore::new(events.clone());
    let config = test_config();
    let manager = build_manager(&config, store.clone());

    let server_scope = CancelScope::new();
    let group_scope = server_scope.child();
    let leadership = MockLeadership::new(dc_location, events.clone());
    manager
        .set_up_allocator(group_scope.clone(), dc_location, leadership.clone())
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || manager
            .handle_tso_request(dc_location, 1)
            .is_ok()),
        "local allocator never became ready, events: {:?}",
        events.snapshot()
    );

    LocalFixture {
        manager,
        leadership,
        store,
        events,
        server_scope,
        group_scope,
    }
}
