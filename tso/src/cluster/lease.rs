use std::sync::atomic::{AtomicU64, Ordering};

use coarsetime::Clock;

/// Lease is the low-level mechanism for campaigning and renewing elected
/// leadership: the claim is held exactly while the expire time lies in the
/// future, so keeping leadership means renewing before it passes.
#[derive(Debug)]
pub struct Lease {
    /// what this election is for
    purpose: String,
    lease_timeout_millis: u64,
    /// unix millis; 0 means not granted yet or already closed
    expire_time: AtomicU64,
}

impl Lease {
    pub fn new(purpose: &str, lease_timeout_millis: u64) -> Self {
        Self {
            purpose: purpose.into(),
            lease_timeout_millis,
            expire_time: 0.into(),
        }
    }

    /// start the lease lifetime from now
    pub fn grant(&self) {
        self.expire_time.store(
            Clock::now_since_epoch().as_millis() + self.lease_timeout_millis,
            Ordering::SeqCst,
        );
        log::info!(
            "lease granted, lease-timeout: {} millis, purpose: {}",
            self.lease_timeout_millis,
            self.purpose
        );
    }

    /// Push the expire time one lease timeout ahead. A closed lease stays
    /// closed, whichever thread the renewal races with.
    pub fn renew(&self) {
        let next = Clock::now_since_epoch().as_millis() + self.lease_timeout_millis;
        let mut current = self.expire_time.load(Ordering::SeqCst);
        loop {
            if current == 0 || current >= next {
                return;
            }
            match self.expire_time.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// checks if the lease is expired; if so, the holder should step down and
    /// try to re-elect
    pub fn is_expired(&self) -> bool {
        let expire_time = self.expire_time.load(Ordering::SeqCst);
        expire_time == 0 || Clock::now_since_epoch().as_millis() > expire_time
    }

    pub fn close(&self) {
        self.expire_time.store(0, Ordering::SeqCst);
        log::info!("lease closed, purpose: {}", self.purpose);
    }

    pub fn timeout_millis(&self) -> u64 {
        self.lease_timeout_millis
    }
}

#[cfg(test)]
mod tests {
    use super::Lease;

    #[test]
    fn lease_lifecycle() {
        let lease = Lease::new("test election", 60_000);
        assert!(lease.is_expired());

        lease.grant();
        assert!(!lease.is_expired());

        lease.renew();
        assert!(!lease.is_expired());

        lease.close();
        assert!(lease.is_expired());

        // renewing a closed lease must not resurrect it
        lease.renew();
        assert!(lease.is_expired());
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let lease = Lease::new("test election", 0);
        lease.grant();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(lease.is_expired());
    }
}
