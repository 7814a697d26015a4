use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use coarsetime::Clock;
use parking_lot::Mutex;

use crate::{bootstrap::CancelScope, error::TsoError, util::constant::Constant, TsoResult};

use super::{lease::Lease, leadership::TsoLeadership, participant::ParticipantInfo};

/// Process-local coordination store for leader keys. Every leadership handle
/// of one cluster shares a board; a key is alive exactly while its lease is.
#[derive(Default)]
pub struct ElectionBoard {
    entries: Mutex<HashMap<String, BoardEntry>>,
    revision: AtomicI64,
}

struct BoardEntry {
    value: String,
    lease: Arc<Lease>,
    mod_revision: i64,
}

impl ElectionBoard {
    fn next_revision(&self) -> i64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The campaign transaction: succeeds only while no live lease holds the key.
    fn put_if_absent(&self, key: &str, value: &str, lease: Arc<Lease>) -> TsoResult<i64> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if !entry.lease.is_expired() {
                anyhow::bail!(TsoError::CampaignConflict);
            }
        }
        let mod_revision = self.next_revision();
        entries.insert(
            key.to_owned(),
            BoardEntry {
                value: value.to_owned(),
                lease,
                mod_revision,
            },
        );
        Ok(mod_revision)
    }

    fn get(&self, key: &str) -> Option<(String, i64)> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| !entry.lease.is_expired())
            .map(|entry| (entry.value.clone(), entry.mod_revision))
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }
}

/// In-process `TsoLeadership` over a shared `ElectionBoard`, standing in for
/// an external coordination store.
pub struct MemLeadership {
    /// what this election is for
    purpose: String,
    board: Arc<ElectionBoard>,
    leader_key: String,
    /// the lease backing the current claim
    lease: Mutex<Option<Arc<Lease>>>,
}

impl MemLeadership {
    pub fn new(board: Arc<ElectionBoard>, leader_key: String, purpose: &str) -> Self {
        Self {
            purpose: purpose.into(),
            board,
            leader_key,
            lease: Mutex::new(None),
        }
    }

    fn current_lease(&self) -> Option<Arc<Lease>> {
        self.lease.lock().clone()
    }
}

impl TsoLeadership for MemLeadership {
    fn campaign(&self, lease_timeout_millis: u64, leader_data: &str) -> TsoResult<()> {
        // Create a new lease to campaign with
        let new_lease = Arc::new(Lease::new(&self.purpose, lease_timeout_millis));
        new_lease.grant();

        // The leader key must not be held by anyone else
        if let Err(e) = self
            .board
            .put_if_absent(&self.leader_key, leader_data, new_lease.clone())
        {
            new_lease.close();
            return Err(e);
        }

        log::info!(
            "write leader value to leader key ok, leader-key: {}, purpose: {}",
            self.leader_key,
            self.purpose
        );
        *self.lease.lock() = Some(new_lease);
        Ok(())
    }

    fn delete_leader_key(&self) -> TsoResult<()> {
        if self.board.delete(&self.leader_key) {
            // Drop the claim as soon as possible
            self.reset();
            log::info!(
                "delete the leader key ok, leader-key: {}, purpose: {}",
                self.leader_key,
                self.purpose
            );
            Ok(())
        } else {
            anyhow::bail!(TsoError::CampaignConflict)
        }
    }

    fn check(&self) -> bool {
        self.current_lease()
            .map(|lease| !lease.is_expired())
            .unwrap_or(false)
    }

    fn get_leader(&self) -> TsoResult<(Option<ParticipantInfo>, i64)> {
        if let Some((value, mod_revision)) = self.board.get(&self.leader_key) {
            if let Ok(info) = serde_json::from_str::<ParticipantInfo>(&value) {
                return Ok((Some(info), mod_revision));
            }
        }
        Ok((None, 0))
    }

    fn keep(&self, scope: CancelScope) {
        let Some(lease) = self.current_lease() else {
            return;
        };
        let interval = (lease.timeout_millis() / 3).max(1);
        let purpose = self.purpose.clone();
        thread::Builder::new()
            .name("tso-lease-keeper".into())
            .spawn(move || {
                log::info!(
                    "start lease keep alive worker, interval: {} millis, purpose: {}",
                    interval,
                    purpose
                );
                let mut last_time = Clock::now_since_epoch().as_millis();
                loop {
                    if scope.is_cancelled() || lease.is_expired() {
                        break;
                    }
                    lease.renew();
                    thread::sleep(Duration::from_millis(interval));

                    let now = Clock::now_since_epoch().as_millis();
                    if now - last_time > interval * 2 {
                        log::warn!(
                            "the interval between keeping alive lease is too long, last-time: {}, purpose: {}",
                            last_time,
                            purpose
                        );
                    }
                    last_time = now;
                }
                log::info!("lease keep alive worker stopped, purpose: {}", purpose);
            })
            .expect("spawn lease keep alive worker failed");
    }

    fn watch(&self, revision: i64, scope: CancelScope) {
        loop {
            if scope.is_cancelled() {
                log::info!(
                    "server is closed, exit leader watch loop, revision: {}, leader-key: {}, purpose: {}",
                    revision,
                    self.leader_key,
                    self.purpose
                );
                return;
            }
            match self.board.get(&self.leader_key) {
                None => {
                    log::info!(
                        "current leadership is deleted, leader-key: {}, purpose: {}",
                        self.leader_key,
                        self.purpose
                    );
                    return;
                }
                Some((_, mod_revision)) if mod_revision > revision => {
                    log::info!(
                        "current leadership is updated, revision: {}, leader-key: {}, purpose: {}",
                        mod_revision,
                        self.leader_key,
                        self.purpose
                    );
                    return;
                }
                Some(_) => {}
            }
            thread::sleep(Duration::from_millis(Constant::WATCH_POLL_INTERVAL_MILLIS));
        }
    }

    fn reset(&self) {
        if let Some(lease) = self.lease.lock().take() {
            lease.close();
        }
    }
}

impl Debug for MemLeadership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("MemLeadership over {}", self.leader_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Participant;

    fn leadership(board: &Arc<ElectionBoard>, name: &str) -> (MemLeadership, String) {
        let member = Participant::new(name);
        (
            MemLeadership::new(board.clone(), "/tso/0/dc-1/leader".into(), "test election"),
            member.member_value().to_owned(),
        )
    }

    #[test]
    fn second_campaign_conflicts_until_lease_dies() {
        let board = Arc::new(ElectionBoard::default());
        let (first, first_value) = leadership(&board, "pd-1");
        let (second, second_value) = leadership(&board, "pd-2");

        first.campaign(60_000, &first_value).unwrap();
        assert!(first.check());

        let err = second.campaign(60_000, &second_value).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TsoError>(),
            Some(TsoError::CampaignConflict)
        ));
        assert!(!second.check());

        // once the holder resets, the key is free again
        first.reset();
        assert!(!first.check());
        second.campaign(60_000, &second_value).unwrap();
        assert!(second.check());
    }

    #[test]
    fn get_leader_returns_the_holder() {
        let board = Arc::new(ElectionBoard::default());
        let (leadership, value) = leadership(&board, "pd-1");

        let (none, revision) = leadership.get_leader().unwrap();
        assert!(none.is_none());
        assert_eq!(revision, 0);

        leadership.campaign(60_000, &value).unwrap();
        let (leader, revision) = leadership.get_leader().unwrap();
        assert_eq!(leader.unwrap().name(), "pd-1");
        assert!(revision > 0);
    }

    #[test]
    fn watch_returns_on_deletion() {
        let board = Arc::new(ElectionBoard::default());
        let (holder, value) = leadership(&board, "pd-1");
        holder.campaign(60_000, &value).unwrap();
        let (_, revision) = holder.get_leader().unwrap();

        let (observer, _) = leadership(&board, "pd-2");
        let handle = thread::spawn(move || {
            observer.watch(revision, CancelScope::new());
        });

        thread::sleep(Duration::from_millis(50));
        holder.delete_leader_key().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn watch_unblocks_on_scope_cancel() {
        let board = Arc::new(ElectionBoard::default());
        let (holder, value) = leadership(&board, "pd-1");
        holder.campaign(60_000, &value).unwrap();

        let (observer, _) = leadership(&board, "pd-2");
        let scope = CancelScope::new();
        let watcher_scope = scope.clone();
        let handle = thread::spawn(move || {
            observer.watch(1, watcher_scope);
        });

        thread::sleep(Duration::from_millis(50));
        scope.cancel();
        handle.join().unwrap();
    }
}
