//! Distributed lease: a time-bounded, crash-safe lock.
//!
//! The lease is data in the shared store (a random owner token with a
//! TTL), not in-process lock state, so correctness holds across process
//! crashes: a holder that dies simply lets the TTL elapse and the lease
//! becomes acquirable again. Release is a compare-and-delete of the
//! owner token, so a slow holder can never release a successor's lease.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use herald_store::{StateStore, StoreError};

/// A held lease. At most one holder exists per key at any time; a lease
/// held past its TTL is indistinguishable from unlocked to other
/// parties.
pub struct DistributedLease {
    store: Arc<dyn StateStore>,
    key: String,
    token: String,
}

impl DistributedLease {
    /// Try to acquire the lease at `key` for `ttl`.
    ///
    /// Returns `None` when another holder currently owns it — that is
    /// expected contention, not an error.
    pub async fn acquire(
        store: Arc<dyn StateStore>,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Self>, StoreError> {
        let token = Uuid::new_v4().to_string();
        let acquired = store
            .set_nx(key, token.clone().into_bytes(), ttl)
            .await?;
        if acquired {
            tracing::debug!(key = %key, "lease acquired");
            Ok(Some(Self {
                store,
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Release the lease if this holder still owns it.
    ///
    /// Returns `false` when the lease already expired and was possibly
    /// re-acquired by someone else.
    pub async fn release(self) -> Result<bool, StoreError> {
        let released = self
            .store
            .delete_if_match(&self.key, self.token.as_bytes())
            .await?;
        if !released {
            tracing::debug!(key = %self.key, "lease expired before release");
        }
        Ok(released)
    }

    /// The owner token stored for this lease.
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_store::MemoryStateStore;

    #[tokio::test]
    async fn test_exclusive_acquisition_and_release() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());

        let lease = DistributedLease::acquire(Arc::clone(&store), "lock:a", Duration::from_secs(5))
            .await
            .unwrap()
            .expect("first acquire succeeds");

        assert!(
            DistributedLease::acquire(Arc::clone(&store), "lock:a", Duration::from_secs(5))
                .await
                .unwrap()
                .is_none(),
            "second acquire must be refused while held"
        );

        assert!(lease.release().await.unwrap());

        assert!(
            DistributedLease::acquire(store, "lock:a", Duration::from_secs(5))
                .await
                .unwrap()
                .is_some(),
            "released lease is acquirable again"
        );
    }

    #[tokio::test]
    async fn test_expired_lease_is_acquirable() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());

        let stale =
            DistributedLease::acquire(Arc::clone(&store), "lock:b", Duration::from_millis(30))
                .await
                .unwrap()
                .expect("acquire");

        tokio::time::sleep(Duration::from_millis(60)).await;

        let fresh = DistributedLease::acquire(Arc::clone(&store), "lock:b", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(fresh.is_some(), "expired lease behaves as unlocked");

        // The stale holder must not be able to release the new lease.
        assert!(!stale.release().await.unwrap());
        assert!(
            DistributedLease::acquire(store, "lock:b", Duration::from_secs(5))
                .await
                .unwrap()
                .is_none(),
            "fresh lease still held after stale release attempt"
        );
    }
}
