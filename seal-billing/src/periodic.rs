//! The periodic billing job.
//!
//! Runs on the coordinator (monthly in production, stepped by tests): closes
//! due drafts, applies scheduled downgrades, advances scheduled
//! cancellations through their grace period, retries pending charges, and
//! leaves every customer with a fresh draft.

use std::time::Duration;

use seal_api::error::ApiError;
use seal_common::{
    constants::CANCELLATION_GRACE_DAYS,
    ids::CustomerId,
    time::TimestampMs,
    vaults::PerVault,
};
use seal_store::rows::ServiceState;
use tracing::{info, instrument, warn};

use crate::engine::{
    mark_customer_config_changed, soft_delete_service_keys, BillingEngine,
};

const CANCELLATION_GRACE: Duration =
    Duration::from_secs(CANCELLATION_GRACE_DAYS as u64 * 24 * 60 * 60);

impl BillingEngine {
    /// Run one pass of the periodic job over every customer.
    #[instrument(skip(self), name = "(periodic-job)")]
    pub async fn run_periodic_job(&self) -> Result<(), ApiError> {
        let customer_ids: Vec<CustomerId> = {
            let tx = self.db.begin().await;
            tx.customers.keys().copied().collect()
        };

        for customer_id in customer_ids {
            let result = self
                .db
                .with_customer_lock(customer_id, async {
                    self.run_periodic_for_customer(customer_id).await
                })
                .await;
            if let Err(e) = result {
                // One customer's failure must not starve the rest.
                warn!(%customer_id, "periodic job failed: {e}");
            }
        }

        self.sync.sync_all();
        Ok(())
    }

    async fn run_periodic_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<(), ApiError> {
        self.close_due_invoices_locked(customer_id).await?;
        self.advance_cancellations_locked(customer_id).await?;
        self.reconcile_payments_locked(customer_id).await?;
        self.sync_draft_locked(customer_id).await?;
        Ok(())
    }

    /// Walk scheduled cancellations through
    /// `{enabled, disabled} -> cancellation_pending -> not_provisioned`.
    async fn advance_cancellations_locked(
        &self,
        customer_id: CustomerId,
    ) -> Result<(), ApiError> {
        let now = self.clock.now();
        let mut config_changed = false;

        let mut tx = self.db.begin().await;
        for service_id in tx.service_ids_of_customer(customer_id) {
            let service = tx.services.get_mut(&service_id).expect("listed");

            // Scheduled date reached: enter the 7-day grace.
            if let Some(scheduled_for) = service.cancellation_scheduled_for {
                if matches!(
                    service.state,
                    ServiceState::Enabled | ServiceState::Disabled
                ) && now >= scheduled_for
                {
                    service.state = ServiceState::CancellationPending;
                    service.is_user_enabled = false;
                    service.cancellation_effective_at =
                        Some(scheduled_for.saturating_add(CANCELLATION_GRACE));
                    crate::engine::set_service_keys_enabled(
                        &mut tx, service_id, false,
                    );
                    config_changed = true;
                    info!(%service_id, "cancellation pending");
                    continue;
                }
            }

            // Grace expired: reset the row, retain its identity.
            let service = tx.services.get_mut(&service_id).expect("listed");
            if service.state == ServiceState::CancellationPending {
                let effective_at = service
                    .cancellation_effective_at
                    .unwrap_or(TimestampMs::UNIX_EPOCH);
                if now >= effective_at {
                    service.state = ServiceState::NotProvisioned;
                    service.is_user_enabled = false;
                    service.paid_once = false;
                    service.subscription_charge_pending = false;
                    service.sub_pending_invoice_id = None;
                    service.scheduled_tier = None;
                    service.cancellation_scheduled_for = None;
                    service.cancellation_effective_at = None;
                    service.cancellation_credit_id = None;
                    service.ip_allowlist = PerVault::default();
                    soft_delete_service_keys(&mut tx, service_id, now);
                    config_changed = true;
                    info!(%service_id, "cancellation finalized; row reset");
                }
            }
        }

        if config_changed {
            mark_customer_config_changed(&mut tx, customer_id);
        }
        tx.commit();
        Ok(())
    }
}
