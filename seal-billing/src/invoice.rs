//! Invoice settlement and the draft lifecycle.
//!
//! Settlement order is fixed: credits are not a provider and are always
//! applied first (FIFO by expiry, then creation), then the remaining amount
//! is dispatched down the customer's provider chain. A `requires_action`
//! outcome stops the chain: the user has an interstitial to complete, so
//! trying further providers would double-bill them.

use seal_api::error::ApiError;
use seal_common::{
    amount::UsdCents,
    ids::{CustomerId, InvoiceId, ProviderKind, ServiceId},
    time::TimestampMs,
};
use seal_store::rows::{
    BillingRecord, CreditReason, CustomerCredit, InvoiceLineItem,
    InvoicePayment, InvoiceStatus, LineItemType, PaymentSource,
};
use strum::VariantArray as _;
use tracing::{info, instrument, warn};

use crate::{
    catalog,
    engine::{service_mut, service_ref, BillingEngine},
    proration,
    providers::{ChargeRequest, PaymentProvider},
};

/// The result of settling an invoice.
#[derive(Debug)]
pub enum SettleOutcome {
    Paid,
    /// The invoice stays pending with `payment_action_url` set.
    RequiresAction { url: String },
    /// The chain was exhausted (or empty); the invoice stays open.
    Unpaid { reason: String, retryable: bool },
}

impl BillingEngine {
    fn provider(
        &self,
        kind: ProviderKind,
    ) -> Option<&dyn PaymentProvider> {
        self.providers
            .iter()
            .find(|p| p.kind() == kind)
            .map(|p| p.as_ref())
    }

    /// Settle an open invoice: apply credits FIFO, then dispatch the
    /// remainder through the provider chain. Idempotent on paid invoices.
    ///
    /// The caller must hold the customer lock.
    #[instrument(skip(self), name = "(settle-invoice)")]
    pub(crate) async fn settle_invoice(
        &self,
        customer_id: CustomerId,
        invoice_id: InvoiceId,
    ) -> Result<SettleOutcome, ApiError> {
        let now = self.clock.now();

        // Stage 1: credits.
        let outstanding = {
            let mut tx = self.db.begin().await;
            let invoice = tx.invoices.get(&invoice_id).ok_or_else(|| {
                ApiError::consistency(format!("No invoice {invoice_id}"))
            })?;
            match invoice.status {
                InvoiceStatus::Paid => return Ok(SettleOutcome::Paid),
                InvoiceStatus::Pending | InvoiceStatus::Failed => {}
                other => {
                    return Err(ApiError::consistency(format!(
                        "Cannot settle invoice {invoice_id} in status \
                         {other:?}"
                    )));
                }
            }

            let mut outstanding = invoice.amount_outstanding();
            for credit_id in tx.consumable_credit_ids(customer_id, now) {
                if outstanding.is_zero() {
                    break;
                }
                let credit =
                    tx.credits.get_mut(&credit_id).expect("id just listed");
                let used = credit.remaining.min(outstanding);
                credit.remaining = credit
                    .remaining
                    .checked_sub(used)
                    .expect("used <= remaining");
                outstanding = outstanding.saturating_sub(used);
                tx.insert_payment(|id| InvoicePayment {
                    id,
                    invoice_id,
                    customer_id,
                    source: PaymentSource::Credit,
                    reference_id: Some(format!("credit-{}", credit_id.0)),
                    amount: used,
                    created_at: now,
                });
            }

            let invoice =
                tx.invoices.get_mut(&invoice_id).expect("checked above");
            invoice.amount_paid = invoice.amount.saturating_sub(outstanding);
            if outstanding.is_zero() {
                invoice.status = InvoiceStatus::Paid;
                invoice.payment_action_url = None;
                invoice.failure_reason = None;
            }
            tx.commit();
            outstanding
        };
        if outstanding.is_zero() {
            info!(%invoice_id, "invoice fully covered by credits");
            return Ok(SettleOutcome::Paid);
        }

        // Stage 2: the provider chain, in the customer's priority order.
        let priority = {
            let tx = self.db.begin().await;
            tx.customer(customer_id)
                .ok_or_else(|| {
                    ApiError::not_found(format!("No customer {customer_id}"))
                })?
                .provider_priority
                .clone()
        };

        let req = ChargeRequest::new(
            customer_id,
            outstanding,
            invoice_id,
            format!("Seal invoice {invoice_id}"),
        );

        let mut last_reason = "no configured payment provider".to_owned();
        let mut any_tried = false;
        let mut any_retryable = false;

        for kind in priority {
            let Some(provider) = self.provider(kind) else { continue };
            if !provider.is_configured(customer_id).await {
                continue;
            }
            any_tried = true;

            let result = provider.charge(&req).await;
            if result.success {
                let mut tx = self.db.begin().await;
                tx.insert_payment(|id| InvoicePayment {
                    id,
                    invoice_id,
                    customer_id,
                    source: provider_source(kind),
                    reference_id: result.reference_id.clone(),
                    amount: outstanding,
                    created_at: now,
                });
                let invoice =
                    tx.invoices.get_mut(&invoice_id).expect("checked above");
                invoice.amount_paid = invoice.amount;
                invoice.status = InvoiceStatus::Paid;
                invoice.payment_action_url = None;
                invoice.failure_reason = None;
                if let Some(digest) = &result.tx_digest {
                    invoice.tx_digest = Some(digest.clone());
                }
                tx.commit();
                info!(%invoice_id, provider = %kind, "invoice paid");
                return Ok(SettleOutcome::Paid);
            }

            if result.is_requires_action() {
                let url = result.hosted_invoice_url.clone().unwrap_or_default();
                let mut tx = self.db.begin().await;
                let invoice =
                    tx.invoices.get_mut(&invoice_id).expect("checked above");
                invoice.status = InvoiceStatus::Pending;
                invoice.payment_action_url = Some(url.clone());
                invoice.failure_reason = Some("requires_action".to_owned());
                tx.commit();
                info!(%invoice_id, provider = %kind, "charge awaiting user action");
                // Do not try subsequent providers: user action is pending.
                return Ok(SettleOutcome::RequiresAction { url });
            }

            let code = result
                .error_code
                .map(|c| c.as_str())
                .unwrap_or("unknown_error");
            warn!(%invoice_id, provider = %kind, code, "charge declined");
            last_reason = format!("{kind}: {code}");
            any_retryable |= result.retryable;
        }

        // Chain exhausted. Hard declines park the invoice as failed; an
        // empty / transient chain leaves it pending for the periodic retry.
        let hard_failure = any_tried && !any_retryable;
        let mut tx = self.db.begin().await;
        let invoice = tx.invoices.get_mut(&invoice_id).expect("checked above");
        invoice.status = if hard_failure {
            InvoiceStatus::Failed
        } else {
            InvoiceStatus::Pending
        };
        invoice.failure_reason = Some(last_reason.clone());
        tx.commit();

        Ok(SettleOutcome::Unpaid {
            reason: last_reason,
            retryable: any_retryable || !any_tried,
        })
    }

    /// Retry the pending subscription invoice blocking `service_id`, if any.
    /// Returns whether the service is now fully paid.
    ///
    /// On success this performs the reconciliation bookkeeping: pending
    /// flags cleared, `paid_once` promoted on service and customer, and a
    /// never-expiring credit issued for the unused remainder of the current
    /// month, computed from the invoice amount (NOT a recalculated tier
    /// price, since the amount may reflect prior proration or upgrades).
    pub(crate) async fn settle_pending_subscription(
        &self,
        service_id: ServiceId,
    ) -> Result<bool, ApiError> {
        let (customer_id, pending_invoice) = {
            let tx = self.db.begin().await;
            let service = service_ref(&tx, service_id)?;
            (service.customer_id, service.sub_pending_invoice_id)
        };
        let Some(invoice_id) = pending_invoice else {
            return Ok(true);
        };

        match self.settle_invoice(customer_id, invoice_id).await? {
            SettleOutcome::Paid => {}
            outcome => {
                info!(%service_id, ?outcome, "pending invoice still unpaid");
                return Ok(false);
            }
        }

        let now = self.clock.now();
        let today = self.clock.today_utc();

        let mut tx = self.db.begin().await;
        let invoice_amount = tx
            .invoices
            .get(&invoice_id)
            .map(|inv| inv.amount)
            .unwrap_or(UsdCents::ZERO);

        let service = service_mut(&mut tx, service_id)?;
        service.sub_pending_invoice_id = None;
        service.subscription_charge_pending = false;
        service.paid_once = true;
        if let Some(customer) = tx.customer_mut(customer_id) {
            customer.paid_once = true;
        }

        let credit_amount =
            proration::unused_month_credit(invoice_amount, today);
        if !credit_amount.is_zero() {
            tx.insert_credit(|id| CustomerCredit {
                id,
                customer_id,
                remaining: credit_amount,
                expires_at: None,
                reason: CreditReason::Reconciliation,
                created_at: now,
            });
        }
        tx.commit();

        info!(%service_id, %credit_amount, "pending subscription reconciled");
        Ok(true)
    }

    /// Re-sync the customer's draft invoice with current state. The caller
    /// must hold the customer lock; [`BillingEngine::sync_draft_invoice`] is
    /// the locking wrapper.
    pub(crate) async fn sync_draft_locked(
        &self,
        customer_id: CustomerId,
    ) -> Result<(), ApiError> {
        let now = self.clock.now();
        let today = self.clock.today_utc();

        let mut tx = self.db.begin().await;

        // Every existing service row participates in billing, whatever its
        // state; the draft only exists for participants.
        let services: Vec<_> = tx
            .service_ids_of_customer(customer_id)
            .into_iter()
            .map(|sid| {
                let svc = &tx.services[&sid];
                (
                    svc.service_type,
                    svc.effective_tier(),
                    svc.bills_next_period(),
                )
            })
            .collect();

        let draft_id = match tx.draft_invoice_id(customer_id) {
            Some(id) => id,
            None => {
                if services.is_empty() {
                    return Ok(());
                }
                let period_start = TimestampMs::from_date_utc(
                    proration::next_month_start(today),
                );
                tx.insert_invoice(|id| BillingRecord {
                    id,
                    customer_id,
                    status: InvoiceStatus::Draft,
                    amount: UsdCents::ZERO,
                    amount_paid: UsdCents::ZERO,
                    billing_period_start: period_start,
                    due_date: period_start,
                    payment_action_url: None,
                    tx_digest: None,
                    failure_reason: None,
                    created_at: now,
                })
            }
        };

        // Drafts are mutable: rebuild the line items from scratch.
        for li_id in tx.line_item_ids_of_invoice(draft_id) {
            tx.line_items.remove(&li_id);
        }

        let mut subtotal = UsdCents::ZERO;

        // One subscription line per service that will bill next period.
        // Services with a pending charge or a scheduled cancellation are
        // excluded: they will not generate a future monthly charge.
        for (service_type, effective_tier, bills) in &services {
            if !bills {
                continue;
            }
            let price = catalog::monthly_price(*effective_tier);
            subtotal = subtotal.checked_add(price)?;
            let (service_type, effective_tier) = (*service_type, *effective_tier);
            tx.insert_line_item(|id| InvoiceLineItem {
                id,
                invoice_id: draft_id,
                item_type: LineItemType::Subscription(effective_tier),
                quantity: 1,
                unit_price: price,
                amount_cents: price.cents(),
                service_type: Some(service_type),
                credit_month: None,
            });
        }

        // Usage line items, maintained by the external stats pipeline.
        let usage = tx.usage_charges.get(&draft_id).cloned().unwrap_or_default();
        for row in usage {
            let amount = row.unit_price.checked_mul(row.quantity)?;
            subtotal = subtotal.checked_add(amount)?;
            tx.insert_line_item(|id| InvoiceLineItem {
                id,
                invoice_id: draft_id,
                item_type: LineItemType::Requests,
                quantity: row.quantity,
                unit_price: row.unit_price,
                amount_cents: amount.cents(),
                service_type: Some(row.service_type),
                credit_month: None,
            });
        }

        // A single aggregated credit preview row. The invoice amount stays
        // gross; credits settle as payment rows at period close.
        let credit_balance = tx.credit_balance(customer_id, now);
        if !credit_balance.is_zero() && !services.is_empty() {
            let month = today.format("%Y-%m").to_string();
            tx.insert_line_item(|id| InvoiceLineItem {
                id,
                invoice_id: draft_id,
                item_type: LineItemType::Credit,
                quantity: 1,
                unit_price: UsdCents::ZERO,
                amount_cents: -credit_balance.cents(),
                service_type: None,
                credit_month: Some(month),
            });
        }

        let invoice = tx.invoices.get_mut(&draft_id).expect("just resolved");
        invoice.amount = subtotal;
        tx.commit();
        Ok(())
    }

    /// Public locking wrapper around [`BillingEngine::sync_draft_locked`].
    pub async fn sync_draft_invoice(
        &self,
        customer_id: CustomerId,
    ) -> Result<(), ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                self.sync_draft_locked(customer_id).await
            })
            .await
    }

    /// If the customer's draft period has started, close it: draft ->
    /// pending, credits, provider chain, then downgrade application and a
    /// fresh draft. The caller must hold the customer lock.
    pub(crate) async fn close_due_invoices_locked(
        &self,
        customer_id: CustomerId,
    ) -> Result<(), ApiError> {
        let now = self.clock.now();
        let today = self.clock.today_utc();

        let due_draft = {
            let tx = self.db.begin().await;
            tx.draft_invoice_id(customer_id).filter(|draft_id| {
                let draft = &tx.invoices[draft_id];
                today >= draft.billing_period_start.to_date_utc()
            })
        };
        let Some(draft_id) = due_draft else {
            return Ok(());
        };

        // Final resync, then freeze: a pending invoice is immutable apart
        // from payment outcome fields.
        self.sync_draft_locked(customer_id).await?;
        {
            let mut tx = self.db.begin().await;
            let invoice =
                tx.invoices.get_mut(&draft_id).expect("resolved above");
            invoice.status = InvoiceStatus::Pending;
            invoice.due_date = now;
            tx.commit();
        }

        let outcome = self.settle_invoice(customer_id, draft_id).await?;

        // The boundary has passed: scheduled downgrades take effect. The
        // just-closed invoice already billed the downgraded price via
        // `effective_tier`.
        {
            let mut tx = self.db.begin().await;
            for sid in tx.service_ids_of_customer(customer_id) {
                let service =
                    tx.services.get_mut(&sid).expect("id just listed");
                if let Some(new_tier) = service.scheduled_tier.take() {
                    info!(service_id = %sid, tier = %new_tier, "downgrade applied");
                    service.tier = new_tier;
                }
            }
            tx.commit();
        }

        if let SettleOutcome::Unpaid { ref reason, .. } = outcome {
            // Park every service billed by this invoice until the charge
            // reconciles.
            warn!(%customer_id, %reason, "monthly invoice unpaid");
            let mut tx = self.db.begin().await;
            let billed: Vec<ServiceId> = tx
                .service_ids_of_customer(customer_id)
                .into_iter()
                .filter(|sid| tx.services[sid].bills_next_period())
                .collect();
            for sid in billed {
                let service = service_mut(&mut tx, sid)?;
                if service.state == seal_store::rows::ServiceState::Enabled {
                    service.state = seal_store::rows::ServiceState::Disabled;
                }
                service.subscription_charge_pending = true;
                service.sub_pending_invoice_id = Some(draft_id);
                crate::engine::set_service_keys_enabled(&mut tx, sid, false);
                crate::engine::mark_service_config_changed(
                    &mut tx,
                    sid,
                    seal_common::vaults::VaultType::VARIANTS,
                )?;
            }
            tx.commit();
        }

        // Fresh draft for the new period.
        self.sync_draft_locked(customer_id).await?;
        Ok(())
    }
}

fn provider_source(kind: ProviderKind) -> PaymentSource {
    match kind {
        ProviderKind::Escrow => PaymentSource::Escrow,
        ProviderKind::Stripe => PaymentSource::Stripe,
        ProviderKind::Paypal => PaymentSource::Paypal,
    }
}
