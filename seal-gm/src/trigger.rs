//! [`SyncTrigger`] implementations.
//!
//! The billing layer pokes the GM after committing a config mutation. On
//! the GM itself the poke is a direct queue submission; an external API
//! tier reaches the GM over HTTP. Both are fire-and-forget: the pending
//! indicator in the store guarantees the periodic sync picks up anything a
//! lost poke missed.

use std::sync::Arc;

use seal_api::{models::QueueTaskResponse, rest::RestClient};
use seal_billing::SyncTrigger;
use seal_common::{ids::CustomerId, task::SealTask};
use tracing::debug;

use crate::queue::{GmTask, TaskQueue};

/// In-process trigger: submissions go straight onto the GM queue.
pub struct QueueSyncTrigger {
    queue: TaskQueue,
}

impl QueueSyncTrigger {
    pub fn new(queue: TaskQueue) -> Arc<Self> {
        Arc::new(Self { queue })
    }
}

impl SyncTrigger for QueueSyncTrigger {
    fn sync_all(&self) {
        let outcome = self.queue.submit(GmTask::SyncAll);
        debug!(?outcome, "queued sync-all");
    }

    fn reconcile(&self, customer_id: CustomerId) {
        let outcome =
            self.queue.submit(GmTask::ReconcilePayments(customer_id));
        debug!(?outcome, "queued reconcile-payments");
    }
}

/// HTTP trigger for processes that don't host the queue. Failures to reach
/// the GM are logged and dropped; the mutation has already committed and
/// the periodic sync will cover it.
pub struct HttpSyncTrigger {
    rest: RestClient,
    gm_url: String,
}

impl HttpSyncTrigger {
    pub fn new(gm_url: impl Into<String>) -> anyhow::Result<Arc<Self>> {
        let rest =
            RestClient::new(seal_common::constants::LM_POLL_TIMEOUT)?;
        Ok(Arc::new(Self {
            rest,
            gm_url: gm_url.into(),
        }))
    }
}

impl SyncTrigger for HttpSyncTrigger {
    fn sync_all(&self) {
        let rest = self.rest.clone();
        let url = format!("{}/api/queue/sync-all?async=true", self.gm_url);
        SealTask::spawn("trigger-sync-all", async move {
            if let Err(e) = rest.post_empty::<QueueTaskResponse>(&url).await {
                debug!("sync-all trigger failed (non-fatal): {e}");
            }
        })
        .detach();
    }

    fn reconcile(&self, customer_id: CustomerId) {
        let rest = self.rest.clone();
        let url = format!(
            "{}/api/queue/reconcile-payments?async=true&customerId={}",
            self.gm_url, customer_id,
        );
        SealTask::spawn("trigger-reconcile", async move {
            if let Err(e) = rest.post_empty::<QueueTaskResponse>(&url).await {
                debug!("reconcile trigger failed (non-fatal): {e}");
            }
        })
        .detach();
    }
}
