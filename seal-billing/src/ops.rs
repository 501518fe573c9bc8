//! The transactional ops surface consumed by the HTTP tier.
//!
//! These compose the engine, the derivation-index allocator, and
//! `mark_config_changed` into the operations external collaborators call.
//! Gateway-config mutations stamp the expected vault seq onto the service
//! row inside the transaction; the GM poke happens after commit and is
//! allowed to fail.

use std::{net::IpAddr, str::FromStr};

use seal_api::{
    error::ApiError,
    models::{
        BillingViewResponse, DraftInvoiceView, LineItemView,
        ProviderInfoView, ServiceView, VaultSyncView,
    },
};
use seal_common::{
    constants::LM_FRESHNESS_WINDOW,
    ids::{CustomerId, Network, ProviderKind, ServiceType},
    vaults::{VaultSeq, VaultType},
};
use seal_store::rows::{InvoiceStatus, ServiceState};
use strum::VariantArray as _;
use tracing::{info, instrument};

use crate::engine::{service_mut, service_ref, BillingEngine};

impl BillingEngine {
    /// Replace the gateway IP allowlist for `(service, network)`.
    ///
    /// Entries must be IPv4/IPv6 addresses or CIDR prefixes; validation
    /// happens before any state mutation. Returns the recorded config
    /// change seq.
    #[instrument(skip(self, entries), name = "(set-ip-allowlist)")]
    pub async fn set_ip_allowlist(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
        network: Network,
        entries: Vec<String>,
    ) -> Result<VaultSeq, ApiError> {
        for entry in &entries {
            if !is_valid_allowlist_entry(entry) {
                return Err(ApiError::invalid_input(format!(
                    "Invalid IP allowlist entry: '{entry}'"
                )));
            }
        }

        let vault_type = VaultType::for_mutation(service_type, network);
        let seq = self
            .db
            .with_customer_lock(customer_id, async {
                let service_id =
                    self.require_service(customer_id, service_type).await?;

                let mut tx = self.db.begin().await;
                let service = service_mut(&mut tx, service_id)?;
                if !matches!(
                    service.state,
                    ServiceState::Enabled | ServiceState::Disabled
                ) {
                    return Err(ApiError::invalid_input(format!(
                        "Cannot configure a service in state '{}'",
                        service.state.as_str()
                    )));
                }
                *service.ip_allowlist.get_mut(vault_type) = entries;

                let seq = tx.system_control.mark_config_changed(vault_type);
                let service = service_mut(&mut tx, service_id)?;
                *service.config_change_vault_seq.get_mut(vault_type) =
                    Some(seq);
                tx.commit();
                Ok::<_, ApiError>(seq)
            })
            .await?;

        // Post-commit, fire-and-forget: the periodic sync covers a missed
        // poke.
        self.sync.sync_all();

        info!(%customer_id, %vault_type, %seq, "ip allowlist updated");
        Ok(seq)
    }

    /// Current state of one service, for mutation responses.
    pub async fn service_view(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Result<ServiceView, ApiError> {
        let service_id =
            self.require_service(customer_id, service_type).await?;
        let tx = self.db.begin().await;
        let service = service_ref(&tx, service_id)?;

        let payment_action_url =
            service.sub_pending_invoice_id.and_then(|inv_id| {
                tx.invoices
                    .get(&inv_id)
                    .and_then(|inv| inv.payment_action_url.clone())
            });

        Ok(ServiceView {
            customer_id,
            service_type,
            state: service.state.as_str().to_owned(),
            tier: service.tier,
            scheduled_tier: service.scheduled_tier,
            is_user_enabled: service.is_user_enabled,
            paid_once: service.paid_once,
            subscription_charge_pending: service.subscription_charge_pending,
            cancellation_scheduled_for: service.cancellation_scheduled_for,
            payment_action_url,
        })
    }

    /// The customer billing dashboard: balances, the draft invoice,
    /// provider display info, and the per-vault fleet sync indicator.
    pub async fn billing_view(
        &self,
        customer_id: CustomerId,
    ) -> Result<BillingViewResponse, ApiError> {
        self.require_customer(customer_id).await?;
        let now = self.clock.now();

        // Snapshot everything store-side in one transaction.
        let (escrow_balance, credit_balance, draft, priority, vault_sync) = {
            let tx = self.db.begin().await;
            let customer = tx
                .customer(customer_id)
                .ok_or_else(|| ApiError::not_found("No such customer"))?;

            let draft = tx.draft_invoice_id(customer_id).map(|draft_id| {
                let invoice = &tx.invoices[&draft_id];
                let line_items = tx
                    .line_item_ids_of_invoice(draft_id)
                    .into_iter()
                    .map(|li_id| {
                        let li = &tx.line_items[&li_id];
                        LineItemView {
                            item_type: li.item_type.wire_name(),
                            quantity: li.quantity,
                            unit_price: li.unit_price,
                            amount_cents: li.amount_cents,
                            service_type: li.service_type,
                        }
                    })
                    .collect();
                DraftInvoiceView {
                    billing_period_start: invoice.billing_period_start,
                    due_date: invoice.due_date,
                    amount: invoice.amount,
                    line_items,
                }
            });

            let service_seqs = tx
                .find_service_id(customer_id, ServiceType::Seal)
                .map(|sid| tx.services[&sid].config_change_vault_seq);

            let vault_sync = VaultType::VARIANTS
                .iter()
                .map(|vt| {
                    let config_change_seq =
                        service_seqs.and_then(|seqs| *seqs.get(*vt));
                    let min_applied_seq = tx.fleet_min_applied_seq(
                        *vt,
                        now,
                        LM_FRESHNESS_WINDOW,
                    );
                    let synced = match config_change_seq {
                        None => true,
                        Some(seq) => min_applied_seq
                            .map(|min| seq <= min)
                            .unwrap_or(false),
                    };
                    VaultSyncView {
                        vault_type: *vt,
                        config_change_seq,
                        min_applied_seq,
                        synced,
                    }
                })
                .collect();

            (
                customer.escrow_balance,
                tx.credit_balance(customer_id, now),
                draft,
                customer.provider_priority.clone(),
                vault_sync,
            )
        };

        // Provider info involves live lookups (escrow is computed live).
        let mut providers = Vec::with_capacity(priority.len());
        for (i, kind) in priority.iter().enumerate() {
            let Some(provider) =
                self.providers.iter().find(|p| p.kind() == *kind)
            else {
                continue;
            };
            providers.push(ProviderInfoView {
                provider: kind.as_str().to_owned(),
                priority: (i + 1) as u32,
                configured: provider.is_configured(customer_id).await,
                display: provider.get_info(customer_id).await,
            });
        }

        Ok(BillingViewResponse {
            customer_id,
            escrow_balance,
            credit_balance,
            draft,
            providers,
            vault_sync,
        })
    }

    /// Whether a recorded config change seq is live across the whole fleet.
    pub async fn is_change_synced(
        &self,
        vault_type: VaultType,
        seq: VaultSeq,
    ) -> bool {
        let now = self.clock.now();
        let tx = self.db.begin().await;
        tx.fleet_min_applied_seq(vault_type, now, LM_FRESHNESS_WINDOW)
            .map(|min| seq <= min)
            .unwrap_or(false)
    }

    // --- Payment instrument admin --- //

    /// Put a (mock) card on file for the customer.
    pub async fn configure_stripe_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<(), ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                let mut tx = self.db.begin().await;
                let customer =
                    tx.customer_mut(customer_id).ok_or_else(|| {
                        ApiError::not_found("No such customer")
                    })?;
                customer.stripe_customer_id =
                    Some(format!("cus_seal_{}", customer_id.to_i64()));
                tx.commit();
                Ok(())
            })
            .await
    }

    /// Link a PayPal account for the customer.
    pub async fn configure_paypal_customer(
        &self,
        customer_id: CustomerId,
        email: String,
    ) -> Result<(), ApiError> {
        self.db
            .with_customer_lock(customer_id, async {
                let mut tx = self.db.begin().await;
                let customer =
                    tx.customer_mut(customer_id).ok_or_else(|| {
                        ApiError::not_found("No such customer")
                    })?;
                customer.paypal_email = Some(email);
                tx.commit();
                Ok(())
            })
            .await
    }

    /// Reorder the customer's provider chain.
    pub async fn set_provider_priority(
        &self,
        customer_id: CustomerId,
        priority: Vec<ProviderKind>,
    ) -> Result<(), ApiError> {
        if priority.is_empty() {
            return Err(ApiError::invalid_input(
                "Provider priority cannot be empty",
            ));
        }
        self.db
            .with_customer_lock(customer_id, async {
                let mut tx = self.db.begin().await;
                let customer =
                    tx.customer_mut(customer_id).ok_or_else(|| {
                        ApiError::not_found("No such customer")
                    })?;
                customer.provider_priority = priority;
                tx.commit();
                Ok(())
            })
            .await
    }

    /// The customer's open (non-draft, unpaid) invoices. Admin/debug view.
    pub async fn open_invoice_count(&self, customer_id: CustomerId) -> usize {
        let tx = self.db.begin().await;
        tx.invoices
            .values()
            .filter(|inv| {
                inv.customer_id == customer_id
                    && matches!(
                        inv.status,
                        InvoiceStatus::Pending | InvoiceStatus::Failed
                    )
            })
            .count()
    }
}

/// An allowlist entry is an IP address or a CIDR prefix.
fn is_valid_allowlist_entry(entry: &str) -> bool {
    match entry.split_once('/') {
        None => IpAddr::from_str(entry).is_ok(),
        Some((addr, prefix)) => {
            let Ok(addr) = IpAddr::from_str(addr) else {
                return false;
            };
            let Ok(prefix) = prefix.parse::<u8>() else {
                return false;
            };
            match addr {
                IpAddr::V4(_) => prefix <= 32,
                IpAddr::V6(_) => prefix <= 128,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allowlist_entry_validation() {
        assert!(is_valid_allowlist_entry("10.0.0.1"));
        assert!(is_valid_allowlist_entry("10.0.0.0/8"));
        assert!(is_valid_allowlist_entry("2001:db8::1"));
        assert!(is_valid_allowlist_entry("2001:db8::/48"));

        assert!(!is_valid_allowlist_entry("10.0.0.0/33"));
        assert!(!is_valid_allowlist_entry("2001:db8::/129"));
        assert!(!is_valid_allowlist_entry("example.com"));
        assert!(!is_valid_allowlist_entry("10.0.0"));
        assert!(!is_valid_allowlist_entry(""));
    }
}
