//! Derivation index allocation.
//!
//! `allocate` runs inside a caller-supplied transaction: the counter
//! read-modify-write is only published when that transaction commits, so a
//! rollback leaves the counter untouched. Indices are strictly monotonic per
//! process group and are never recycled, even when the owning key row is
//! soft-deleted.

use seal_common::vaults::ProcessGroup;

use crate::db::Tx;

/// Atomically allocate the next derivation index for `pg` inside `tx`,
/// returning the old counter value.
pub fn allocate(tx: &mut Tx, pg: ProcessGroup) -> u64 {
    tx.system_control.alloc_derivation_index(pg)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use seal_common::{
        ids::{CustomerId, ServiceId, SealKeyId},
        time::TimestampMs,
        vaults::ProcessGroup,
    };

    use super::*;
    use crate::{db::Db, rows::SealKey};

    #[tokio::test]
    async fn sequential_allocations_are_dense() {
        let db = Db::new();
        for expected in 0..10u64 {
            let mut tx = db.begin().await;
            assert_eq!(allocate(&mut tx, ProcessGroup::Pg1), expected);
            tx.commit();
        }
    }

    #[tokio::test]
    async fn rollback_leaves_counter_unchanged() {
        let db = Db::new();

        {
            let mut tx = db.begin().await;
            assert_eq!(allocate(&mut tx, ProcessGroup::Pg1), 0);
            // Dropped without commit.
        }

        let mut tx = db.begin().await;
        assert_eq!(allocate(&mut tx, ProcessGroup::Pg1), 0);
        tx.commit();

        let mut tx = db.begin().await;
        assert_eq!(allocate(&mut tx, ProcessGroup::Pg1), 1);
        tx.commit();
    }

    #[tokio::test]
    async fn pg_counters_are_isolated() {
        let db = Db::new();
        let mut tx = db.begin().await;
        assert_eq!(allocate(&mut tx, ProcessGroup::Pg1), 0);
        assert_eq!(allocate(&mut tx, ProcessGroup::Pg1), 1);
        // PG2 is untouched by PG1 allocations; the same integer may appear
        // in both namespaces.
        assert_eq!(allocate(&mut tx, ProcessGroup::Pg2), 0);
        tx.commit();
    }

    /// 50 concurrent allocations yield 50 pairwise-distinct indices spanning
    /// exactly `(initial, initial + 50]` and advance the counter by 50.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_are_unique() {
        let db = Db::new();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                let mut tx = db.begin().await;
                let index = allocate(&mut tx, ProcessGroup::Pg1);
                tokio::task::yield_now().await;
                tx.commit();
                index
            }));
        }

        let mut indices = BTreeSet::new();
        for task in tasks {
            assert!(indices.insert(task.await.unwrap()));
        }
        assert_eq!(indices.len(), 50);
        assert_eq!(*indices.first().unwrap(), 0);
        assert_eq!(*indices.last().unwrap(), 49);

        let tx = db.begin().await;
        assert_eq!(tx.system_control.next_derivation_index.pg1, 50);
    }

    /// Mixed-PG concurrency: indices are distinct within each namespace.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mixed_pg_allocations() {
        let db = Db::new();

        let mut tasks = Vec::new();
        for i in 0..40 {
            let db = db.clone();
            let pg = if i % 2 == 0 {
                ProcessGroup::Pg1
            } else {
                ProcessGroup::Pg2
            };
            tasks.push(tokio::spawn(async move {
                let mut tx = db.begin().await;
                let index = allocate(&mut tx, pg);
                tx.commit();
                (pg, index)
            }));
        }

        let mut pg1 = BTreeSet::new();
        let mut pg2 = BTreeSet::new();
        for task in tasks {
            let (pg, index) = task.await.unwrap();
            match pg {
                ProcessGroup::Pg1 => assert!(pg1.insert(index)),
                ProcessGroup::Pg2 => assert!(pg2.insert(index)),
            }
        }
        assert_eq!(pg1.len(), 20);
        assert_eq!(pg2.len(), 20);
    }

    /// Soft-deleting a key must not free its index; the next allocation
    /// returns the next unused counter value.
    #[tokio::test]
    async fn soft_delete_never_recycles() {
        let db = Db::new();
        let now = TimestampMs::UNIX_EPOCH;

        let (key_id, index) = {
            let mut tx = db.begin().await;
            let index = allocate(&mut tx, ProcessGroup::Pg1);
            let key_id = tx.insert_seal_key(|id: SealKeyId| SealKey {
                id,
                customer_id: CustomerId(1),
                service_id: ServiceId(1),
                process_group: ProcessGroup::Pg1,
                derivation_index: index,
                public_key: "pk".to_owned(),
                is_user_enabled: true,
                created_at: now,
                deleted_at: None,
            });
            tx.commit();
            (key_id, index)
        };
        assert_eq!(index, 0);

        // Soft delete the key.
        {
            let mut tx = db.begin().await;
            tx.seal_keys.get_mut(&key_id).unwrap().deleted_at = Some(now);
            tx.commit();
        }

        // The freed-looking index is not reused.
        let mut tx = db.begin().await;
        assert_eq!(allocate(&mut tx, ProcessGroup::Pg1), 1);
        tx.commit();
    }
}
