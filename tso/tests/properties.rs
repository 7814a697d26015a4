mod common;

use std::{sync::Arc, thread, time::Duration};

use common::{EventLog, MockLeadership, MockStore};
use tso::{
    filter_unavailable_leadership, filter_uninitialized, AllocatorGroup, AlwaysLeader, CancelScope,
    Constant, ParticipantInfo,
};

fn exclude_everything(_: &AllocatorGroup) -> bool {
    true
}

/// Park a local group in the watch state so it never campaigns.
fn parked_leadership(name: &str, events: &Arc<EventLog>) -> Arc<MockLeadership> {
    let leadership = MockLeadership::new(name, events.clone());
    leadership.set_persistent_leader(Some((ParticipantInfo::new("pd-other", 99), 1)));
    leadership
}

#[test]
fn registry_holds_one_group_per_dc() {
    let events = Arc::new(EventLog::default());
    let store = MockStore::new(events.clone());
    let config = common::test_config();
    let manager = common::build_manager(&config, store);
    let scope = CancelScope::new();

    manager
        .set_up_allocator(
            scope.child(),
            Constant::GLOBAL_DC_LOCATION,
            Arc::new(AlwaysLeader),
        )
        .unwrap();
    let dc1 = parked_leadership("dc1", &events);
    manager
        .set_up_allocator(scope.child(), "dc1", dc1.clone())
        .unwrap();
    // setting the same dc up again replaces the entry instead of adding one
    manager
        .set_up_allocator(scope.child(), "dc1", dc1)
        .unwrap();
    manager
        .set_up_allocator(scope.child(), "dc2", parked_leadership("dc2", &events))
        .unwrap();

    assert_eq!(manager.get_allocators(&[]).len(), 3);
    assert!(manager.get_allocator("dc1").is_ok());
    assert!(manager.get_allocator("dc3").is_err());

    // an empty dc-location is rejected outright
    assert!(manager
        .set_up_allocator(scope.child(), "", parked_leadership("dc4", &events))
        .is_err());

    scope.cancel();
}

#[test]
fn filters_exclude_exactly_the_matching_groups() {
    let events = Arc::new(EventLog::default());
    let store = MockStore::new(events.clone());
    let config = common::test_config();
    let manager = common::build_manager(&config, store);
    let scope = CancelScope::new();

    // global: initialized with available leadership
    manager
        .set_up_allocator(
            scope.child(),
            Constant::GLOBAL_DC_LOCATION,
            Arc::new(AlwaysLeader),
        )
        .unwrap();
    // dc1: parked in the watch, so uninitialized and without leadership
    let dc1 = parked_leadership("dc1", &events);
    manager
        .set_up_allocator(scope.child(), "dc1", dc1.clone())
        .unwrap();

    assert_eq!(manager.get_allocators(&[]).len(), 2);
    assert_eq!(manager.get_allocators(&[filter_uninitialized]).len(), 1);
    assert_eq!(
        manager
            .get_allocators(&[filter_unavailable_leadership])
            .len(),
        1
    );
    assert_eq!(
        manager
            .get_allocators(&[filter_uninitialized, filter_unavailable_leadership])
            .len(),
        1
    );
    assert_eq!(manager.get_allocators(&[exclude_everything]).len(), 0);

    // leadership without initialization is filtered independently
    dc1.set_leader(true);
    assert_eq!(
        manager
            .get_allocators(&[filter_unavailable_leadership])
            .len(),
        2
    );
    assert_eq!(manager.get_allocators(&[filter_uninitialized]).len(), 1);

    scope.cancel();
}

#[test]
fn timestamps_stay_monotonic_across_recampaign() {
    let fixture = common::leading_local_fixture("dc1");

    let mut last = fixture.manager.handle_tso_request("dc1", 1).unwrap();
    for _ in 0..5 {
        let ts = fixture.manager.handle_tso_request("dc1", 3).unwrap();
        assert!(ts > last);
        last = ts;
    }

    // expire the lease; the loop demotes the group and campaigns again
    fixture.events.clear();
    fixture.leadership.set_leader(false);
    assert!(common::wait_until(Duration::from_secs(1), || {
        fixture.events.contains("dc1:reset")
    }));
    assert!(common::wait_until(Duration::from_secs(2), || {
        fixture.manager.handle_tso_request("dc1", 1).is_ok()
    }));

    // everything allocated after recovery lies beyond the old timeline
    let after = fixture.manager.handle_tso_request("dc1", 1).unwrap();
    assert!(after > last);

    fixture.server_scope.cancel();
}

#[test]
fn at_most_one_update_per_allocator_in_flight() {
    let events = Arc::new(EventLog::default());
    let store = MockStore::new(events.clone());
    let config = common::test_config();
    let manager = common::build_manager(&config, store.clone());
    let scope = CancelScope::new();

    manager
        .set_up_allocator(
            scope.child(),
            Constant::GLOBAL_DC_LOCATION,
            Arc::new(AlwaysLeader),
        )
        .unwrap();
    for dc_location in ["dc1", "dc2"] {
        manager
            .set_up_allocator(
                scope.child(),
                dc_location,
                MockLeadership::new(dc_location, events.clone()),
            )
            .unwrap();
        assert!(common::wait_until(Duration::from_secs(2), || {
            manager.handle_tso_request(dc_location, 1).is_ok()
        }));
    }

    // make every save slow enough that overlapping updates would be caught
    store.set_save_delay(30);
    manager.start_allocator_daemon(scope.clone());
    thread::sleep(Duration::from_millis(500));

    for path in ["/tso/0", "/tso/0/dc1", "/tso/0/dc2"] {
        assert!(
            store.max_in_flight(path) <= 1,
            "overlapping updates on {}",
            path
        );
    }
    // and updates did happen
    assert!(events.count_prefix("save:") > 0);

    scope.cancel();
}

#[test]
fn cancellation_stops_all_activity_promptly() {
    let fixture = common::leading_local_fixture("dc1");
    fixture
        .manager
        .start_allocator_daemon(fixture.server_scope.clone());
    thread::sleep(Duration::from_millis(100));

    fixture.server_scope.cancel();

    // give every loop a couple of ticks to observe the cancellation
    thread::sleep(Duration::from_millis(300));
    fixture.events.clear();
    thread::sleep(Duration::from_millis(300));
    assert!(
        fixture.events.snapshot().is_empty(),
        "activity after cancellation: {:?}",
        fixture.events.snapshot()
    );
}
