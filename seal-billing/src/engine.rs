//! The billing engine: subscription lifecycle orchestration.
//!
//! Every public operation serializes on the customer's advisory lock, then
//! works in short transactions: mutate-and-commit around each provider call,
//! never across one. State transitions follow the service lifecycle
//!
//! ```text
//! not_provisioned -> provisioning -> {enabled | disabled}
//!                 -> cancellation_pending -> not_provisioned
//! ```
//!
//! with the invariant that an `enabled` service is user-enabled, has paid at
//! least once, and has no subscription charge outstanding.

use std::sync::Arc;

use chrono::Datelike;
use seal_api::error::{ApiError, ApiErrorKind};
use seal_common::{
    amount::UsdCents,
    constants::RESUBSCRIBE_COOLDOWN_DAYS,
    ids::{CustomerId, ServiceId, ServiceTier, ServiceType},
    time::{Clock, TimestampMs},
    vaults::{PerVault, ProcessGroup, VaultType},
};
use seal_store::{
    alloc,
    rows::{
        BillingRecord, CreditReason, Customer, CustomerCredit, InvoiceStatus,
        RetiredService, SealKey, ServiceInstance, ServiceState,
    },
    Db, Tx,
};
use strum::VariantArray as _;
use tracing::{info, instrument, warn};

use crate::{
    catalog,
    invoice::SettleOutcome,
    proration,
    providers::{EscrowProvider, PaymentProvider},
    SyncTrigger,
};

/// Outcome of [`BillingEngine::subscribe`]. The service row exists in all
/// cases; only `settle` distinguishes a live service from one awaiting
/// payment.
#[derive(Debug)]
pub struct SubscribeOutcome {
    pub service_id: ServiceId,
    pub settle: SettleOutcome,
}

impl SubscribeOutcome {
    /// The caller-facing payment error, when the first charge didn't go
    /// through. The service row exists either way.
    pub fn settle_error(&self) -> Option<ApiError> {
        match self.settle {
            SettleOutcome::Paid => None,
            _ => Some(settle_failure_error(&self.settle)),
        }
    }
}

/// Outcome of [`BillingEngine::schedule_cancellation`].
#[derive(Debug, Eq, PartialEq)]
pub enum CancellationOutcome {
    /// Unpaid service: the row was deleted immediately.
    Deleted,
    /// Paid service: transition scheduled for the next period boundary.
    Scheduled { effective_at: TimestampMs },
}

/// Outcome of [`BillingEngine::change_tier`].
#[derive(Debug, Eq, PartialEq)]
pub enum TierChangeOutcome {
    /// Upgrade applied; the prorated delta was charged immediately.
    Upgraded { charged: UsdCents },
    /// Downgrade recorded; applied at the next period boundary.
    DowngradeScheduled { to: ServiceTier },
}

#[derive(Clone)]
pub struct BillingEngine {
    pub(crate) db: Db,
    pub(crate) clock: Clock,
    pub(crate) providers: Vec<Arc<dyn PaymentProvider>>,
    pub(crate) escrow: Arc<EscrowProvider>,
    pub(crate) sync: Arc<dyn SyncTrigger>,
}

impl BillingEngine {
    pub fn new(
        db: Db,
        clock: Clock,
        providers: Vec<Arc<dyn PaymentProvider>>,
        escrow: Arc<EscrowProvider>,
        sync: Arc<dyn SyncTrigger>,
    ) -> Self {
        Self {
            db,
            clock,
            providers,
            escrow,
            sync,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Look up a customer by wallet address, creating the row on first
    /// contact.
    pub async fn get_or_create_customer(
        &self,
        wallet_address: &str,
    ) -> CustomerId {
        let now = self.clock.now();
        let mut tx = self.db.begin().await;
        if let Some(existing) = tx
            .customers
            .values()
            .find(|c| c.wallet_address == wallet_address)
        {
            let id = existing.id;
            drop(tx);
            return id;
        }
        let wallet_address = wallet_address.to_owned();
        let id = tx.insert_customer(|id| Customer {
            id,
            wallet_address,
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
            created_at: now,
            deleted_at: None,
        });
        tx.commit();
        info!(customer_id = %id, "created customer");
        id
    }

    // --- Subscription lifecycle --- //

    /// Subscribe `(customer, service_type)` to `tier`: provision the service
    /// row, allocate its gateway key, and charge the first month.
    #[instrument(skip(self), name = "(subscribe)")]
    pub async fn subscribe(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
        tier: ServiceTier,
    ) -> Result<SubscribeOutcome, ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                self.subscribe_locked(customer_id, service_type, tier).await
            })
            .await
    }

    async fn subscribe_locked(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
        tier: ServiceTier,
    ) -> Result<SubscribeOutcome, ApiError> {
        let now = self.clock.now();
        let today = self.clock.today_utc();
        let price = catalog::monthly_price(tier);

        // Provision the service row, key, and first invoice.
        let (service_id, invoice_id) = {
            let mut tx = self.db.begin().await;
            tx.customer(customer_id).ok_or_else(|| {
                ApiError::not_found(format!("No customer {customer_id}"))
            })?;
            if tx.find_service_id(customer_id, service_type).is_some() {
                return Err(ApiError::invalid_input(format!(
                    "Customer {customer_id} is already subscribed to \
                     {service_type}"
                )));
            }

            // Unpaid-cancellation identity: a retired row blocks
            // re-subscription for the cooldown, then donates its id back.
            let reused_id = match tx
                .retired_services
                .get(&(customer_id, service_type))
            {
                Some(retired) => {
                    let cooldown = std::time::Duration::from_secs(
                        u64::from(RESUBSCRIBE_COOLDOWN_DAYS) * 24 * 60 * 60,
                    );
                    let elapsed = now
                        .duration_since(retired.deleted_at)
                        .unwrap_or_default();
                    if elapsed < cooldown {
                        return Err(ApiError::invalid_input(format!(
                            "Service was cancelled recently; re-subscription \
                             is allowed after a {RESUBSCRIBE_COOLDOWN_DAYS}-day \
                             cooldown"
                        )));
                    }
                    let id = retired.service_id;
                    tx.retired_services.remove(&(customer_id, service_type));
                    Some(id)
                }
                None => None,
            };

            let make_row = |id: ServiceId| ServiceInstance {
                id,
                customer_id,
                service_type,
                tier,
                state: ServiceState::Provisioning,
                is_user_enabled: false,
                paid_once: false,
                subscription_charge_pending: false,
                sub_pending_invoice_id: None,
                scheduled_tier: None,
                cancellation_scheduled_for: None,
                cancellation_effective_at: None,
                cancellation_credit_id: None,
                config_change_vault_seq: PerVault::default(),
                ip_allowlist: PerVault::default(),
                created_at: now,
            };
            let service_id = match reused_id {
                Some(id) => {
                    tx.insert_service_with_id(id, make_row(id));
                    id
                }
                None => tx.insert_service(make_row),
            };

            // One gateway key per subscription, allocated inside this
            // transaction so a failure rolls the index back too.
            let index = alloc::allocate(&mut tx, ProcessGroup::Pg1);
            tx.insert_seal_key(|id| SealKey {
                id,
                customer_id,
                service_id,
                process_group: ProcessGroup::Pg1,
                derivation_index: index,
                public_key: format!("pk-pg1-{index}"),
                is_user_enabled: false,
                created_at: now,
                deleted_at: None,
            });

            let period_start =
                TimestampMs::from_date_utc(proration::month_start(today));
            let invoice_id = tx.insert_invoice(|id| BillingRecord {
                id,
                customer_id,
                status: InvoiceStatus::Pending,
                amount: price,
                amount_paid: UsdCents::ZERO,
                billing_period_start: period_start,
                due_date: now,
                payment_action_url: None,
                tx_digest: None,
                failure_reason: None,
                created_at: now,
            });
            tx.commit();
            (service_id, invoice_id)
        };

        // Charge the first month: credits first, then the provider chain.
        let settle = self.settle_invoice(customer_id, invoice_id).await?;

        let mut tx = self.db.begin().await;
        match &settle {
            SettleOutcome::Paid => {
                let service = service_mut(&mut tx, service_id)?;
                service.state = ServiceState::Enabled;
                service.is_user_enabled = true;
                service.paid_once = true;
                set_service_keys_enabled(&mut tx, service_id, true);
                if let Some(customer) = tx.customer_mut(customer_id) {
                    customer.paid_once = true;
                }
                mark_service_config_changed(
                    &mut tx,
                    service_id,
                    VaultType::VARIANTS,
                )?;
            }
            SettleOutcome::RequiresAction { .. }
            | SettleOutcome::Unpaid { .. } => {
                let service = service_mut(&mut tx, service_id)?;
                service.state = ServiceState::Disabled;
                service.subscription_charge_pending = true;
                service.sub_pending_invoice_id = Some(invoice_id);
            }
        }
        tx.commit();

        self.sync_draft_locked(customer_id).await?;
        if matches!(settle, SettleOutcome::Paid) {
            self.sync.sync_all();
        }

        info!(%service_id, ?settle, "subscribe finished");
        Ok(SubscribeOutcome { service_id, settle })
    }

    /// Enable a disabled service. Retries any pending subscription invoice
    /// first; the enable proceeds only if the retry fully pays it.
    #[instrument(skip(self), name = "(enable-service)")]
    pub async fn enable_service(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Result<(), ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                self.enable_service_locked(customer_id, service_type).await
            })
            .await
    }

    async fn enable_service_locked(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Result<(), ApiError> {
        let service_id = self.require_service(customer_id, service_type).await?;

        {
            let tx = self.db.begin().await;
            let service = service_ref(&tx, service_id)?;
            match service.state {
                ServiceState::Enabled => return Ok(()),
                ServiceState::Disabled => {}
                other => {
                    return Err(ApiError::invalid_input(format!(
                        "Cannot enable a service in state '{}'",
                        other.as_str()
                    )));
                }
            }
        }

        // An unpaid pending invoice blocks the enable unless its retry pays
        // in full.
        if !self.settle_pending_subscription(service_id).await? {
            return Err(ApiError::invalid_input(
                "Service has an unpaid pending invoice; deposit funds and \
                 retry",
            ));
        }

        let mut tx = self.db.begin().await;
        let service = service_mut(&mut tx, service_id)?;
        service.state = ServiceState::Enabled;
        service.is_user_enabled = true;
        set_service_keys_enabled(&mut tx, service_id, true);
        mark_service_config_changed(&mut tx, service_id, VaultType::VARIANTS)?;
        tx.commit();

        self.sync.sync_all();
        Ok(())
    }

    /// Disable an enabled service. No billing effect; the subscription still
    /// renews until cancelled.
    #[instrument(skip(self), name = "(disable-service)")]
    pub async fn disable_service(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Result<(), ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                let service_id =
                    self.require_service(customer_id, service_type).await?;

                let mut tx = self.db.begin().await;
                let service = service_mut(&mut tx, service_id)?;
                match service.state {
                    ServiceState::Disabled => return Ok(()),
                    ServiceState::Enabled => {}
                    other =>
                        return Err(ApiError::invalid_input(format!(
                            "Cannot disable a service in state '{}'",
                            other.as_str()
                        ))),
                }
                service.state = ServiceState::Disabled;
                service.is_user_enabled = false;
                set_service_keys_enabled(&mut tx, service_id, false);
                mark_service_config_changed(
                    &mut tx,
                    service_id,
                    VaultType::VARIANTS,
                )?;
                tx.commit();

                self.sync.sync_all();
                Ok(())
            })
            .await
    }

    /// Schedule cancellation. An unpaid service is deleted immediately; a
    /// paid one transitions at the next period boundary, then sits out a
    /// 7-day grace before its row is reset.
    #[instrument(skip(self), name = "(schedule-cancellation)")]
    pub async fn schedule_cancellation(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Result<CancellationOutcome, ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                self.schedule_cancellation_locked(customer_id, service_type)
                    .await
            })
            .await
    }

    async fn schedule_cancellation_locked(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Result<CancellationOutcome, ApiError> {
        let service_id = self.require_service(customer_id, service_type).await?;
        let now = self.clock.now();
        let today = self.clock.today_utc();

        let mut tx = self.db.begin().await;
        let service = service_ref(&tx, service_id)?;

        if !service.paid_once {
            // Never-paid cancellation is an immediate delete; the id is
            // archived so re-subscription reuses it after the cooldown.
            soft_delete_service_keys(&mut tx, service_id, now);
            tx.services.remove(&service_id);
            tx.retired_services.insert(
                (customer_id, service_type),
                RetiredService {
                    service_id,
                    deleted_at: now,
                },
            );
            // The gateway must drop the customer's keys.
            mark_customer_config_changed(&mut tx, customer_id);
            tx.commit();

            self.sync_draft_locked(customer_id).await?;
            self.sync.sync_all();
            info!(%service_id, "unpaid service deleted on cancellation");
            return Ok(CancellationOutcome::Deleted);
        }

        if service.cancellation_scheduled_for.is_some() {
            return Err(ApiError::invalid_input(
                "Cancellation is already scheduled",
            ));
        }
        if !matches!(
            service.state,
            ServiceState::Enabled | ServiceState::Disabled
        ) {
            return Err(ApiError::invalid_input(format!(
                "Cannot cancel a service in state '{}'",
                service.state.as_str()
            )));
        }

        let effective_at = TimestampMs::from_date_utc(
            proration::next_month_start(today),
        );
        let credit_amount = proration::unused_month_credit(
            catalog::monthly_price(service.tier),
            today,
        );
        let credit_id = if credit_amount.is_zero() {
            None
        } else {
            Some(tx.insert_credit(|id| CustomerCredit {
                id,
                customer_id,
                remaining: credit_amount,
                expires_at: None,
                reason: CreditReason::Cancellation,
                created_at: now,
            }))
        };

        let service = service_mut(&mut tx, service_id)?;
        service.cancellation_scheduled_for = Some(effective_at);
        service.cancellation_credit_id = credit_id;
        tx.commit();

        self.sync_draft_locked(customer_id).await?;
        info!(%service_id, %effective_at, "cancellation scheduled");
        Ok(CancellationOutcome::Scheduled { effective_at })
    }

    /// Undo a scheduled cancellation and claw back its credit.
    #[instrument(skip(self), name = "(undo-cancellation)")]
    pub async fn undo_cancellation(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Result<(), ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                let service_id =
                    self.require_service(customer_id, service_type).await?;

                let mut tx = self.db.begin().await;
                let service = service_mut(&mut tx, service_id)?;
                if service.cancellation_scheduled_for.is_none() {
                    return Err(ApiError::invalid_input(
                        "No cancellation is scheduled",
                    ));
                }
                service.cancellation_scheduled_for = None;
                service.cancellation_effective_at = None;
                let credit_id = service.cancellation_credit_id.take();
                if let Some(credit_id) = credit_id {
                    tx.credits.remove(&credit_id);
                }
                tx.commit();

                self.sync_draft_locked(customer_id).await?;
                Ok(())
            })
            .await
    }

    /// Change tier: upgrades charge a prorated delta immediately through the
    /// provider chain; downgrades are scheduled for the period boundary and
    /// never produce immediate charges.
    #[instrument(skip(self), name = "(change-tier)")]
    pub async fn change_tier(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
        new_tier: ServiceTier,
    ) -> Result<TierChangeOutcome, ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                self.change_tier_locked(customer_id, service_type, new_tier)
                    .await
            })
            .await
    }

    async fn change_tier_locked(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
        new_tier: ServiceTier,
    ) -> Result<TierChangeOutcome, ApiError> {
        let service_id = self.require_service(customer_id, service_type).await?;
        let now = self.clock.now();
        let today = self.clock.today_utc();

        let current_tier = {
            let tx = self.db.begin().await;
            let service = service_ref(&tx, service_id)?;
            if !matches!(
                service.state,
                ServiceState::Enabled | ServiceState::Disabled
            ) {
                return Err(ApiError::invalid_input(format!(
                    "Cannot change tier of a service in state '{}'",
                    service.state.as_str()
                )));
            }
            if service.tier == new_tier && service.scheduled_tier.is_none() {
                return Err(ApiError::invalid_input(
                    "Service is already on that tier",
                ));
            }
            service.tier
        };

        if !catalog::is_upgrade(current_tier, new_tier) {
            // Downgrade (or reverting a scheduled downgrade to the current
            // tier): applied at the next period boundary.
            let mut tx = self.db.begin().await;
            let service = service_mut(&mut tx, service_id)?;
            service.scheduled_tier =
                (new_tier != service.tier).then_some(new_tier);
            tx.commit();

            self.sync_draft_locked(customer_id).await?;
            return Ok(TierChangeOutcome::DowngradeScheduled { to: new_tier });
        }

        // Upgrade: prorated delta for the remainder of the month, charged
        // now.
        let full_delta = catalog::monthly_price(new_tier)
            .checked_sub(catalog::monthly_price(current_tier))
            .expect("upgrade price delta is positive");
        let days_remaining =
            proration::days_in_month(today) - today.day0();
        let delta = proration::prorate(full_delta, days_remaining, today);

        let invoice_id = {
            let mut tx = self.db.begin().await;
            let period_start =
                TimestampMs::from_date_utc(proration::month_start(today));
            let invoice_id = tx.insert_invoice(|id| BillingRecord {
                id,
                customer_id,
                status: InvoiceStatus::Pending,
                amount: delta,
                amount_paid: UsdCents::ZERO,
                billing_period_start: period_start,
                due_date: now,
                payment_action_url: None,
                tx_digest: None,
                failure_reason: None,
                created_at: now,
            });
            tx.commit();
            invoice_id
        };

        match self.settle_invoice(customer_id, invoice_id).await? {
            SettleOutcome::Paid => {
                let mut tx = self.db.begin().await;
                let service = service_mut(&mut tx, service_id)?;
                service.tier = new_tier;
                service.scheduled_tier = None;
                mark_service_config_changed(
                    &mut tx,
                    service_id,
                    VaultType::VARIANTS,
                )?;
                tx.commit();

                self.sync_draft_locked(customer_id).await?;
                self.sync.sync_all();
                Ok(TierChangeOutcome::Upgraded { charged: delta })
            }
            outcome => {
                // The upgrade is all-or-nothing: void the delta invoice and
                // keep the current tier.
                let mut tx = self.db.begin().await;
                if let Some(invoice) = tx.invoices.get_mut(&invoice_id) {
                    invoice.status = InvoiceStatus::Void;
                }
                tx.commit();
                warn!(%service_id, ?outcome, "upgrade charge failed");
                Err(settle_failure_error(&outcome))
            }
        }
    }

    // --- Wallet / limits --- //

    /// Fund the customer's escrow. Kicks a fire-and-forget reconciliation,
    /// since the deposit may have moved escrow from insufficient to
    /// sufficient.
    pub async fn deposit(
        &self,
        customer_id: CustomerId,
        amount: UsdCents,
    ) -> Result<String, ApiError> {
        let digest = self
            .db
            .with_customer_lock(customer_id, async {
                self.require_customer(customer_id).await?;
                self.escrow
                    .deposit(customer_id, amount)
                    .await
                    .map_err(ApiError::from)
            })
            .await?;
        self.sync.reconcile(customer_id);
        Ok(digest)
    }

    pub async fn withdraw(
        &self,
        customer_id: CustomerId,
        amount: UsdCents,
    ) -> Result<String, ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                self.require_customer(customer_id).await?;
                self.escrow.withdraw(customer_id, amount).await.map_err(|e| {
                    ApiError::new(
                        ApiErrorKind::InsufficientFunds,
                        format!("{e:#}"),
                    )
                })
            })
            .await
    }

    /// Set the escrow rolling spending limit. Zero means unlimited.
    pub async fn set_spending_limit(
        &self,
        customer_id: CustomerId,
        limit: UsdCents,
    ) -> Result<(), ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                let mut tx = self.db.begin().await;
                let customer =
                    tx.customer_mut(customer_id).ok_or_else(|| {
                        ApiError::not_found(format!(
                            "No customer {customer_id}"
                        ))
                    })?;
                customer.spending_limit = limit;
                tx.commit();
                Ok(())
            })
            .await
    }

    // --- Internal helpers --- //

    pub(crate) async fn require_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<(), ApiError> {
        let tx = self.db.begin().await;
        tx.customer(customer_id)
            .map(|_| ())
            .ok_or_else(|| {
                ApiError::not_found(format!("No customer {customer_id}"))
            })
    }

    pub(crate) async fn require_service(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Result<ServiceId, ApiError> {
        let tx = self.db.begin().await;
        tx.find_service_id(customer_id, service_type).ok_or_else(|| {
            ApiError::not_found(format!(
                "Customer {customer_id} has no {service_type} service"
            ))
        })
    }
}

/// Map a non-paid settle outcome to the caller-facing error.
pub(crate) fn settle_failure_error(outcome: &SettleOutcome) -> ApiError {
    match outcome {
        SettleOutcome::Paid => ApiError::server("settle succeeded"),
        SettleOutcome::RequiresAction { url } => ApiError::new(
            ApiErrorKind::RequiresAction,
            format!("Payment requires user action: {url}"),
        ),
        SettleOutcome::Unpaid { reason, retryable } => {
            let kind = if *retryable {
                ApiErrorKind::TransientProvider
            } else if reason.contains("insufficient") {
                ApiErrorKind::InsufficientFunds
            } else {
                ApiErrorKind::PaymentDeclined
            };
            ApiError::new(kind, format!("Payment failed: {reason}"))
        }
    }
}

pub(crate) fn service_ref<'t>(
    tx: &'t Tx,
    service_id: ServiceId,
) -> Result<&'t ServiceInstance, ApiError> {
    tx.services.get(&service_id).ok_or_else(|| {
        ApiError::consistency(format!("Service {service_id} disappeared"))
    })
}

pub(crate) fn service_mut<'t>(
    tx: &'t mut Tx,
    service_id: ServiceId,
) -> Result<&'t mut ServiceInstance, ApiError> {
    tx.services.get_mut(&service_id).ok_or_else(|| {
        ApiError::consistency(format!("Service {service_id} disappeared"))
    })
}

/// Flip `is_user_enabled` on all live keys of a service.
pub(crate) fn set_service_keys_enabled(
    tx: &mut Tx,
    service_id: ServiceId,
    enabled: bool,
) {
    for key_id in tx.live_seal_key_ids(service_id) {
        if let Some(key) = tx.seal_keys.get_mut(&key_id) {
            key.is_user_enabled = enabled;
        }
    }
}

/// Soft-delete all live keys of a service. Indices are never recycled.
pub(crate) fn soft_delete_service_keys(
    tx: &mut Tx,
    service_id: ServiceId,
    now: TimestampMs,
) {
    for key_id in tx.live_seal_key_ids(service_id) {
        if let Some(key) = tx.seal_keys.get_mut(&key_id) {
            key.deleted_at = Some(now);
            key.is_user_enabled = false;
        }
    }
}

/// Record a pending gateway-config change for `service_id` on each vault
/// type and stamp the expected seqs onto the service row.
pub(crate) fn mark_service_config_changed(
    tx: &mut Tx,
    service_id: ServiceId,
    vault_types: &[VaultType],
) -> Result<(), ApiError> {
    for vault_type in vault_types {
        let seq = tx.system_control.mark_config_changed(*vault_type);
        let service = service_mut(tx, service_id)?;
        *service.config_change_vault_seq.get_mut(*vault_type) = Some(seq);
    }
    Ok(())
}

/// Record a pending change on every vault type without a surviving service
/// row to stamp (deletion paths).
pub(crate) fn mark_customer_config_changed(
    tx: &mut Tx,
    _customer_id: CustomerId,
) {
    for vault_type in VaultType::VARIANTS {
        tx.system_control.mark_config_changed(*vault_type);
    }
}
