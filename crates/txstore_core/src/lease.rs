//! In-process per-object leases.
//!
//! Two transactions that write the same staged-file object would share one
//! staged path; whichever commits last would promote the other's bytes. A
//! lease serializes them: the first transaction to open a store for a key
//! holds the lease until that store is released, and others wait up to the
//! configured timeout.
//!
//! Leases only coordinate transactions inside one process.

use crate::error::{CoreError, CoreResult};
use crate::types::{BlobKey, TransactionId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Table of held leases, keyed by blob.
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    held: Mutex<HashMap<BlobKey, TransactionId>>,
    released: Condvar,
}

impl LeaseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquires the lease on `key` for `txn`, waiting up to `timeout`.
    ///
    /// A transaction that already holds the lease gets a non-owning guard,
    /// so the lease is released only when its first guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LeaseTimeout`] if another transaction still
    /// holds the lease when the timeout elapses.
    pub fn acquire(
        self: &Arc<Self>,
        key: &BlobKey,
        txn: TransactionId,
        timeout: Duration,
    ) -> CoreResult<Lease> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();
        let mut timed_out = false;

        loop {
            match held.get(key) {
                None => {
                    held.insert(key.clone(), txn);
                    debug!(%key, %txn, "lease acquired");
                    return Ok(self.guard(key, txn, true));
                }
                Some(holder) if *holder == txn => {
                    return Ok(self.guard(key, txn, false));
                }
                Some(_) if timed_out => {
                    return Err(CoreError::LeaseTimeout {
                        key: key.clone(),
                        waited: timeout,
                    });
                }
                Some(holder) => {
                    trace!(%key, %txn, holder = %holder, "waiting for lease");
                    timed_out = self.released.wait_until(&mut held, deadline).timed_out();
                }
            }
        }
    }

    /// Returns the transaction holding the lease on `key`.
    #[must_use]
    pub fn holder(&self, key: &BlobKey) -> Option<TransactionId> {
        self.held.lock().get(key).copied()
    }

    /// Returns the number of held leases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    /// Returns true if no lease is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }

    fn guard(self: &Arc<Self>, key: &BlobKey, txn: TransactionId, owned: bool) -> Lease {
        Lease {
            registry: Arc::clone(self),
            key: key.clone(),
            txn,
            owned,
        }
    }

    fn release(&self, key: &BlobKey, txn: TransactionId) {
        let mut held = self.held.lock();
        if held.get(key) == Some(&txn) {
            held.remove(key);
            debug!(%key, %txn, "lease released");
            self.released.notify_all();
        }
    }
}

/// A held lease. Dropping the owning guard releases it.
pub struct Lease {
    registry: Arc<LeaseRegistry>,
    key: BlobKey,
    txn: TransactionId,
    owned: bool,
}

impl Lease {
    /// Returns the leased key.
    #[must_use]
    pub fn key(&self) -> &BlobKey {
        &self.key
    }

    /// Returns the holding transaction.
    #[must_use]
    pub fn txn(&self) -> TransactionId {
        self.txn
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.owned {
            self.registry.release(&self.key, self.txn);
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("txn", &self.txn)
            .field("owned", &self.owned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectId, ObjectType};
    use std::thread;

    fn key(id: u64) -> BlobKey {
        BlobKey::new(ObjectType::new("document").unwrap(), ObjectId::new(id))
    }

    #[test]
    fn second_transaction_times_out() {
        let registry = LeaseRegistry::new();
        let a = TransactionId::generate();
        let b = TransactionId::generate();

        let _held = registry.acquire(&key(1), a, Duration::ZERO).unwrap();
        let result = registry.acquire(&key(1), b, Duration::from_millis(20));
        assert!(matches!(result, Err(CoreError::LeaseTimeout { .. })));
        assert_eq!(registry.holder(&key(1)), Some(a));
    }

    #[test]
    fn different_keys_do_not_conflict() {
        let registry = LeaseRegistry::new();
        let _a = registry
            .acquire(&key(1), TransactionId::generate(), Duration::ZERO)
            .unwrap();
        let _b = registry
            .acquire(&key(2), TransactionId::generate(), Duration::ZERO)
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reacquire_in_same_transaction() {
        let registry = LeaseRegistry::new();
        let txn = TransactionId::generate();

        let first = registry.acquire(&key(1), txn, Duration::ZERO).unwrap();
        let second = registry.acquire(&key(1), txn, Duration::ZERO).unwrap();
        drop(second);
        assert_eq!(registry.holder(&key(1)), Some(txn));
        drop(first);
        assert!(registry.is_empty());
    }

    #[test]
    fn waiter_gets_lease_after_release() {
        let registry = LeaseRegistry::new();
        let held = registry
            .acquire(&key(7), TransactionId::generate(), Duration::ZERO)
            .unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let txn = TransactionId::generate();
                registry
                    .acquire(&key(7), txn, Duration::from_secs(5))
                    .map(|lease| lease.txn() == txn)
            })
        };

        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap().unwrap());
        assert!(registry.is_empty());
    }
}
