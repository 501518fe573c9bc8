//! Payment reconciliation: retry every pending subscription charge for a
//! customer.
//!
//! Triggered by (a) deposits that may have moved escrow from insufficient
//! to sufficient, (b) the monthly periodic job, (c) manual admin action.
//! Idempotent: a second run with no intervening deposit is a no-op.

use seal_api::error::ApiError;
use seal_common::ids::{CustomerId, ServiceId};
use seal_store::rows::ServiceState;
use strum::VariantArray as _;
use tracing::{info, instrument};

use crate::engine::{
    mark_service_config_changed, service_mut, set_service_keys_enabled,
    BillingEngine,
};

/// What a reconciliation pass accomplished.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Services whose pending invoice was fully paid this pass.
    pub recovered: Vec<ServiceId>,
    /// Services still blocked on payment.
    pub still_pending: Vec<ServiceId>,
}

impl BillingEngine {
    /// Retry the provider chain for every service of `customer_id` with a
    /// pending subscription invoice.
    #[instrument(skip(self), name = "(reconcile-payments)")]
    pub async fn reconcile_payments(
        &self,
        customer_id: CustomerId,
    ) -> Result<ReconcileReport, ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                self.reconcile_payments_locked(customer_id).await
            })
            .await
    }

    /// [`BillingEngine::reconcile_payments`] body, for callers already
    /// holding the customer lock (the periodic job).
    pub(crate) async fn reconcile_payments_locked(
        &self,
        customer_id: CustomerId,
    ) -> Result<ReconcileReport, ApiError> {
        self.require_customer(customer_id).await?;

        let blocked: Vec<ServiceId> = {
            let tx = self.db.begin().await;
            tx.service_ids_of_customer(customer_id)
                .into_iter()
                .filter(|sid| {
                    tx.services[sid].sub_pending_invoice_id.is_some()
                })
                .collect()
        };
        if blocked.is_empty() {
            return Ok(ReconcileReport::default());
        }

        let mut report = ReconcileReport::default();
        for service_id in blocked {
            // Retries the referenced invoice amount and, on success, clears
            // the pending flags, promotes `paid_once`, and issues the
            // unused-month credit.
            if !self.settle_pending_subscription(service_id).await? {
                report.still_pending.push(service_id);
                continue;
            }

            // The service is paid up: bring it live.
            let mut tx = self.db.begin().await;
            let service = service_mut(&mut tx, service_id)?;
            service.state = ServiceState::Enabled;
            service.is_user_enabled = true;
            set_service_keys_enabled(&mut tx, service_id, true);
            mark_service_config_changed(
                &mut tx,
                service_id,
                seal_common::vaults::VaultType::VARIANTS,
            )?;
            tx.commit();

            report.recovered.push(service_id);
        }

        self.sync_draft_locked(customer_id).await?;
        if !report.recovered.is_empty() {
            self.sync.sync_all();
        }

        info!(
            recovered = report.recovered.len(),
            still_pending = report.still_pending.len(),
            "reconciliation pass finished"
        );
        Ok(report)
    }
}
