//! The [`Db`] handle and its transactional [`Tx`] guard.
//!
//! Transactions are globally serialized by an async mutex: [`Db::begin`]
//! takes the owned guard and snapshots the state, mutations apply directly
//! to the live state, [`Tx::commit`] discards the snapshot, and dropping an
//! uncommitted [`Tx`] restores it. This gives every caller genuine
//! rollback-on-error with plain `?` propagation.
//!
//! Customer-scoped write paths additionally serialize on a per-customer
//! advisory lock via [`Db::with_customer_lock`]; distinct customers proceed
//! concurrently up to the (short) transaction sections.

use std::{
    collections::HashMap,
    future::Future,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use tokio::sync::OwnedMutexGuard;
use tracing::trace;

use crate::state::DbState;

#[derive(Clone)]
pub struct Db {
    state: Arc<tokio::sync::Mutex<DbState>>,
    customer_locks: Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Db {
    pub fn new() -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(DbState::default())),
            customer_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Begin a transaction. Holds the global db lock until commit/rollback;
    /// keep transaction sections short and never perform provider I/O while
    /// one is open.
    pub async fn begin(&self) -> Tx {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Tx {
            guard,
            snapshot: Some(snapshot),
        }
    }

    /// Run `fut` while holding the advisory lock for `customer_id`.
    ///
    /// All mutations of customer-scoped rows (services, invoices, credits,
    /// payments, escrow log) must go through here; this removes the need for
    /// optimistic-concurrency retries on those rows.
    pub async fn with_customer_lock<T, Fut>(
        &self,
        customer_id: seal_common::ids::CustomerId,
        fut: Fut,
    ) -> T
    where
        Fut: Future<Output = T>,
    {
        let lock = {
            let mut locks = self
                .customer_locks
                .lock()
                .expect("customer lock registry poisoned");
            locks
                .entry(customer_id.to_i64())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;
        trace!(%customer_id, "acquired customer lock");
        fut.await
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

/// An open transaction. Dereferences to [`DbState`] for table access.
///
/// Dropping without [`Tx::commit`] rolls every mutation back.
#[must_use]
pub struct Tx {
    guard: OwnedMutexGuard<DbState>,
    /// `Some` until committed; restored on drop for rollback.
    snapshot: Option<DbState>,
}

impl Tx {
    /// Publish this transaction's mutations.
    pub fn commit(mut self) {
        self.snapshot = None;
    }

    /// Explicit rollback; equivalent to dropping the transaction.
    pub fn rollback(self) {}
}

impl Drop for Tx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

impl Deref for Tx {
    type Target = DbState;
    fn deref(&self) -> &DbState {
        &self.guard
    }
}

impl DerefMut for Tx {
    fn deref_mut(&mut self) -> &mut DbState {
        &mut self.guard
    }
}

#[cfg(test)]
mod test {
    use seal_common::{
        amount::UsdCents, ids::CustomerId, time::TimestampMs,
    };

    use super::*;
    use crate::rows::Customer;

    fn test_customer(id: CustomerId) -> Customer {
        Customer {
            id,
            wallet_address: format!("0xwallet{}", id.0),
            escrow_balance: UsdCents::ZERO,
            spending_limit: UsdCents::ZERO,
            current_period_start: None,
            current_period_charged: UsdCents::ZERO,
            paid_once: false,
            escrow_contract_id: None,
            stripe_customer_id: None,
            paypal_email: None,
            provider_priority:
                seal_common::ids::ProviderKind::DEFAULT_PRIORITY.to_vec(),
            created_at: TimestampMs::UNIX_EPOCH,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn commit_publishes() {
        let db = Db::new();
        let mut tx = db.begin().await;
        let cid = tx.insert_customer(test_customer);
        tx.commit();

        let tx = db.begin().await;
        assert!(tx.customer(cid).is_some());
    }

    #[tokio::test]
    async fn drop_rolls_back() {
        let db = Db::new();
        let cid = {
            let mut tx = db.begin().await;
            let cid = tx.insert_customer(test_customer);
            // No commit: dropped here.
            cid
        };

        let tx = db.begin().await;
        assert!(tx.customer(cid).is_none());

        // Id assignment also rolled back: the next insert reuses the id.
        drop(tx);
        let mut tx = db.begin().await;
        let cid2 = tx.insert_customer(test_customer);
        tx.commit();
        assert_eq!(cid, cid2);
    }

    #[tokio::test]
    async fn customer_locks_serialize_same_customer() {
        let db = Db::new();
        let cid = {
            let mut tx = db.begin().await;
            let cid = tx.insert_customer(test_customer);
            tx.commit();
            cid
        };

        // 20 concurrent read-modify-writes over the same balance, each in
        // its own transaction under the customer lock. Without the lock the
        // read-modify-write pairs would interleave.
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                db.with_customer_lock(cid, async {
                    let balance = {
                        let tx = db.begin().await;
                        tx.customer(cid).unwrap().escrow_balance
                    };
                    tokio::task::yield_now().await;
                    let mut tx = db.begin().await;
                    tx.customer_mut(cid).unwrap().escrow_balance = balance
                        .checked_add(UsdCents::from_cents_u32(100))
                        .unwrap();
                    tx.commit();
                })
                .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let tx = db.begin().await;
        assert_eq!(
            tx.customer(cid).unwrap().escrow_balance,
            UsdCents::from_cents_u32(2000)
        );
    }
}
