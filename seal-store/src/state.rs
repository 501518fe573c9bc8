//! The full table set behind a [`Db`](crate::db::Db), plus the query and
//! insert helpers the billing engine and coordinators are written against.
//!
//! Tables are `BTreeMap`s so iteration order is deterministic, which keeps
//! FIFO tie-breaks (credits, payments) and test assertions stable.

use std::collections::BTreeMap;

use seal_common::{
    ids::{
        CreditId, CustomerId, EscrowTxId, InvoiceId, LineItemId, LmId,
        PaymentRowId, SealKeyId, ServiceId, ServiceType,
    },
    time::TimestampMs,
    vaults::VaultType,
};
use serde::{Deserialize, Serialize};

use crate::{
    rows::{
        BillingRecord, Customer, CustomerCredit, EscrowTransaction,
        InvoiceLineItem, InvoicePayment, InvoiceStatus, LmStatusRow,
        RetiredService, SealKey, ServiceInstance, UsageCharge,
    },
    system_control::SystemControl,
};

/// Monotonic per-table id counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct NextIds {
    customer: i64,
    service: i64,
    invoice: i64,
    line_item: i64,
    credit: i64,
    payment: i64,
    escrow_tx: i64,
    seal_key: i64,
}

fn bump(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// Every persisted table. Owned exclusively by the [`Db`](crate::db::Db)
/// mutex; reachable only through a [`Tx`](crate::db::Tx).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DbState {
    next_ids: NextIds,
    pub customers: BTreeMap<CustomerId, Customer>,
    pub services: BTreeMap<ServiceId, ServiceInstance>,
    pub invoices: BTreeMap<InvoiceId, BillingRecord>,
    pub line_items: BTreeMap<LineItemId, InvoiceLineItem>,
    pub credits: BTreeMap<CreditId, CustomerCredit>,
    pub payments: BTreeMap<PaymentRowId, InvoicePayment>,
    pub escrow_txs: BTreeMap<EscrowTxId, EscrowTransaction>,
    pub seal_keys: BTreeMap<SealKeyId, SealKey>,
    pub lm_status: BTreeMap<(LmId, VaultType), LmStatusRow>,
    /// Usage aggregates keyed by draft invoice id, written by the external
    /// stats pipeline.
    pub usage_charges: BTreeMap<InvoiceId, Vec<UsageCharge>>,
    pub retired_services: BTreeMap<(CustomerId, ServiceType), RetiredService>,
    pub system_control: SystemControl,
}

impl DbState {
    // --- Inserts (id assignment) --- //

    /// Insert a customer row, assigning its id.
    pub fn insert_customer(
        &mut self,
        build: impl FnOnce(CustomerId) -> Customer,
    ) -> CustomerId {
        let id = CustomerId(bump(&mut self.next_ids.customer));
        self.customers.insert(id, build(id));
        id
    }

    pub fn insert_service(
        &mut self,
        build: impl FnOnce(ServiceId) -> ServiceInstance,
    ) -> ServiceId {
        let id = ServiceId(bump(&mut self.next_ids.service));
        self.services.insert(id, build(id));
        id
    }

    /// Insert a service row reusing a previously retired id (re-subscription
    /// identity).
    pub fn insert_service_with_id(
        &mut self,
        id: ServiceId,
        row: ServiceInstance,
    ) {
        debug_assert!(!self.services.contains_key(&id));
        self.services.insert(id, row);
    }

    pub fn insert_invoice(
        &mut self,
        build: impl FnOnce(InvoiceId) -> BillingRecord,
    ) -> InvoiceId {
        let id = InvoiceId(bump(&mut self.next_ids.invoice));
        self.invoices.insert(id, build(id));
        id
    }

    pub fn insert_line_item(
        &mut self,
        build: impl FnOnce(LineItemId) -> InvoiceLineItem,
    ) -> LineItemId {
        let id = LineItemId(bump(&mut self.next_ids.line_item));
        self.line_items.insert(id, build(id));
        id
    }

    pub fn insert_credit(
        &mut self,
        build: impl FnOnce(CreditId) -> CustomerCredit,
    ) -> CreditId {
        let id = CreditId(bump(&mut self.next_ids.credit));
        self.credits.insert(id, build(id));
        id
    }

    pub fn insert_payment(
        &mut self,
        build: impl FnOnce(PaymentRowId) -> InvoicePayment,
    ) -> PaymentRowId {
        let id = PaymentRowId(bump(&mut self.next_ids.payment));
        self.payments.insert(id, build(id));
        id
    }

    pub fn insert_escrow_tx(
        &mut self,
        build: impl FnOnce(EscrowTxId) -> EscrowTransaction,
    ) -> EscrowTxId {
        let id = EscrowTxId(bump(&mut self.next_ids.escrow_tx));
        self.escrow_txs.insert(id, build(id));
        id
    }

    pub fn insert_seal_key(
        &mut self,
        build: impl FnOnce(SealKeyId) -> SealKey,
    ) -> SealKeyId {
        let id = SealKeyId(bump(&mut self.next_ids.seal_key));
        self.seal_keys.insert(id, build(id));
        id
    }

    // --- Queries --- //

    pub fn customer(&self, id: CustomerId) -> Option<&Customer> {
        self.customers.get(&id)
    }

    pub fn customer_mut(&mut self, id: CustomerId) -> Option<&mut Customer> {
        self.customers.get_mut(&id)
    }

    /// Find the live service row for (customer, service type).
    pub fn find_service_id(
        &self,
        customer_id: CustomerId,
        service_type: ServiceType,
    ) -> Option<ServiceId> {
        self.services
            .values()
            .find(|s| {
                s.customer_id == customer_id && s.service_type == service_type
            })
            .map(|s| s.id)
    }

    /// All live service ids owned by a customer, in id order.
    pub fn service_ids_of_customer(
        &self,
        customer_id: CustomerId,
    ) -> Vec<ServiceId> {
        self.services
            .values()
            .filter(|s| s.customer_id == customer_id)
            .map(|s| s.id)
            .collect()
    }

    /// The customer's single draft invoice, if one exists.
    pub fn draft_invoice_id(
        &self,
        customer_id: CustomerId,
    ) -> Option<InvoiceId> {
        self.invoices
            .values()
            .find(|inv| {
                inv.customer_id == customer_id
                    && inv.status == InvoiceStatus::Draft
            })
            .map(|inv| inv.id)
    }

    /// Line item ids of an invoice, in insertion order.
    pub fn line_item_ids_of_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Vec<LineItemId> {
        self.line_items
            .values()
            .filter(|li| li.invoice_id == invoice_id)
            .map(|li| li.id)
            .collect()
    }

    /// Payment rows of an invoice, ordered by creation.
    pub fn payment_ids_of_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Vec<PaymentRowId> {
        self.payments
            .values()
            .filter(|p| p.invoice_id == invoice_id)
            .map(|p| p.id)
            .collect()
    }

    /// Credit ids with remaining balance, in consumption order: soonest
    /// expiry first (never-expiring last), then by creation time.
    pub fn consumable_credit_ids(
        &self,
        customer_id: CustomerId,
        now: TimestampMs,
    ) -> Vec<CreditId> {
        let mut ids: Vec<&CustomerCredit> = self
            .credits
            .values()
            .filter(|c| {
                c.customer_id == customer_id
                    && !c.remaining.is_zero()
                    && c.expires_at.map(|exp| exp > now).unwrap_or(true)
            })
            .collect();
        ids.sort_by_key(|c| {
            (c.expires_at.is_none(), c.expires_at, c.created_at, c.id)
        });
        ids.into_iter().map(|c| c.id).collect()
    }

    /// Sum of non-expired remaining credit.
    pub fn credit_balance(
        &self,
        customer_id: CustomerId,
        now: TimestampMs,
    ) -> seal_common::amount::UsdCents {
        self.consumable_credit_ids(customer_id, now)
            .iter()
            .map(|id| self.credits[id].remaining)
            .sum()
    }

    /// Seal key ids belonging to a service, live ones only.
    pub fn live_seal_key_ids(&self, service_id: ServiceId) -> Vec<SealKeyId> {
        self.seal_keys
            .values()
            .filter(|k| k.service_id == service_id && k.deleted_at.is_none())
            .map(|k| k.id)
            .collect()
    }

    /// Upsert the polled status row for one (LM, vault type).
    pub fn upsert_lm_status(&mut self, row: LmStatusRow) {
        self.lm_status
            .insert((row.lm_id.clone(), row.vault_type), row);
    }

    /// The fleet-wide minimum applied seq for `vault_type` over live LM
    /// rows, or [`None`] if no live rows exist.
    ///
    /// A row is live if it was seen within `freshness` of `now` and its last
    /// poll produced no error.
    pub fn fleet_min_applied_seq(
        &self,
        vault_type: VaultType,
        now: TimestampMs,
        freshness: std::time::Duration,
    ) -> Option<seal_common::vaults::VaultSeq> {
        self.lm_status
            .values()
            .filter(|row| {
                row.vault_type == vault_type
                    && row.last_error.is_none()
                    && now
                        .duration_since(row.last_seen_at)
                        .map(|age| age <= freshness)
                        .unwrap_or(true)
            })
            .map(|row| row.applied_seq.unwrap_or_default())
            .min()
    }
}
