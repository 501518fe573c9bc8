//! Row structs for every persisted entity, plus their status enums.
//!
//! Rows own their data outright; cross-entity references are integer ids
//! only. A row struct should carry no behavior beyond small predicates over
//! its own fields; multi-row logic belongs in the billing engine.

use seal_common::{
    amount::UsdCents,
    ids::{
        CreditId, CustomerId, EscrowTxId, InvoiceId, LineItemId, LmId,
        PaymentRowId, ProviderKind, SealKeyId, ServiceId, ServiceTier,
        ServiceType,
    },
    time::TimestampMs,
    vaults::{PerVault, ProcessGroup, VaultSeq, VaultType},
};
use serde::{Deserialize, Serialize};

/// One row per customer. Created on first authenticated contact; never
/// destroyed (soft delete only).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    /// Unique on-chain wallet address.
    pub wallet_address: String,
    /// Mirror of the funded escrow balance, in cents.
    pub escrow_balance: UsdCents,
    /// Escrow rolling spending limit; zero means unlimited.
    pub spending_limit: UsdCents,
    /// Start of the current 28-day spending period, if one has begun.
    pub current_period_start: Option<TimestampMs>,
    /// Amount charged within the current spending period.
    pub current_period_charged: UsdCents,
    /// Whether this customer has ever settled an invoice.
    pub paid_once: bool,
    /// On-chain escrow contract object id, once one exists.
    pub escrow_contract_id: Option<String>,
    /// Stripe customer id, once a card is on file.
    pub stripe_customer_id: Option<String>,
    /// Linked PayPal account, once one is on file.
    pub paypal_email: Option<String>,
    /// Provider chain order for this customer, priority 1..N.
    pub provider_priority: Vec<ProviderKind>,
    pub created_at: TimestampMs,
    pub deleted_at: Option<TimestampMs>,
}

/// Subscription lifecycle state of a [`ServiceInstance`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    NotProvisioned,
    Provisioning,
    Disabled,
    Enabled,
    CancellationPending,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotProvisioned => "not_provisioned",
            Self::Provisioning => "provisioning",
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::CancellationPending => "cancellation_pending",
        }
    }
}

/// One row per (customer, service type).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: ServiceId,
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
    pub tier: ServiceTier,
    pub state: ServiceState,
    pub is_user_enabled: bool,
    /// Whether this service has ever settled an invoice.
    pub paid_once: bool,
    /// True while an initial / retried subscription charge is outstanding.
    pub subscription_charge_pending: bool,
    /// The unpaid invoice blocking this service, if any. Non-null iff a
    /// billing record in {pending, failed} references this service.
    pub sub_pending_invoice_id: Option<InvoiceId>,
    /// Pending downgrade target, applied at the next period boundary.
    /// Non-null only in {enabled, disabled}.
    pub scheduled_tier: Option<ServiceTier>,
    pub cancellation_scheduled_for: Option<TimestampMs>,
    pub cancellation_effective_at: Option<TimestampMs>,
    /// Credit issued for the unused month remainder when cancellation was
    /// scheduled; clawed back by undo.
    pub cancellation_credit_id: Option<CreditId>,
    /// Per-vault-type seq of the last recorded gateway-config mutation.
    pub config_change_vault_seq: PerVault<Option<VaultSeq>>,
    /// Per-vault-type gateway IP allowlist, verbatim as validated.
    pub ip_allowlist: PerVault<Vec<String>>,
    pub created_at: TimestampMs,
}

impl ServiceInstance {
    /// The tier the next monthly charge will be priced at.
    pub fn effective_tier(&self) -> ServiceTier {
        self.scheduled_tier.unwrap_or(self.tier)
    }

    /// Whether this service contributes a subscription line item to the
    /// upcoming draft invoice.
    pub fn bills_next_period(&self) -> bool {
        matches!(self.state, ServiceState::Enabled | ServiceState::Disabled)
            && !self.subscription_charge_pending
            && self.cancellation_scheduled_for.is_none()
    }
}

/// Invoice lifecycle status.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Paid,
    Failed,
    Void,
}

/// A monthly invoice. A draft is mutable (line items resynced from current
/// state); a non-draft is append-only except for payment outcome fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: InvoiceId,
    pub customer_id: CustomerId,
    pub status: InvoiceStatus,
    pub amount: UsdCents,
    pub amount_paid: UsdCents,
    pub billing_period_start: TimestampMs,
    pub due_date: TimestampMs,
    /// Set when a charge is paused on a 3DS interstitial.
    pub payment_action_url: Option<String>,
    /// On-chain digest of the escrow charge that paid this invoice.
    pub tx_digest: Option<String>,
    /// Why the last payment attempt failed, for the periodic retry.
    pub failure_reason: Option<String>,
    pub created_at: TimestampMs,
}

impl BillingRecord {
    pub fn amount_outstanding(&self) -> UsdCents {
        self.amount.saturating_sub(self.amount_paid)
    }
}

/// Line item type tag.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemType {
    /// `subscription_<tier>`
    Subscription(ServiceTier),
    Requests,
    Addon(String),
    Credit,
}

impl LineItemType {
    pub fn wire_name(&self) -> String {
        match self {
            Self::Subscription(tier) => format!("subscription_{tier}"),
            Self::Requests => "requests".to_owned(),
            Self::Addon(name) => format!("addon_{name}"),
            Self::Credit => "credit".to_owned(),
        }
    }
}

/// A line on a [`BillingRecord`]. Credits appear as negative amounts, so the
/// amount field is a raw signed cent count.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: LineItemId,
    pub invoice_id: InvoiceId,
    pub item_type: LineItemType,
    pub quantity: u32,
    pub unit_price: UsdCents,
    pub amount_cents: i64,
    pub service_type: Option<ServiceType>,
    /// `"YYYY-MM"` month a credit was earned in, where applicable.
    pub credit_month: Option<String>,
}

/// Why a credit was issued.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    /// Unused-month remainder issued when a late charge reconciles.
    Reconciliation,
    /// Unused-month remainder issued at cancellation.
    Cancellation,
    /// Operator-issued.
    Manual,
}

/// Customer credit balance entry, consumed FIFO by expiry then creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomerCredit {
    pub id: CreditId,
    pub customer_id: CustomerId,
    pub remaining: UsdCents,
    pub expires_at: Option<TimestampMs>,
    pub reason: CreditReason,
    pub created_at: TimestampMs,
}

/// The payment source an [`InvoicePayment`] row attributes to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    Credit,
    Escrow,
    Stripe,
    Paypal,
}

/// Attribution row linking a [`BillingRecord`] to a payment source. The sum
/// of payment amounts for a billing record never exceeds its amount.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoicePayment {
    pub id: PaymentRowId,
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub source: PaymentSource,
    /// Provider-side reference (Stripe invoice id, escrow digest, credit id).
    pub reference_id: Option<String>,
    pub amount: UsdCents,
    pub created_at: TimestampMs,
}

/// On-chain escrow intent kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowOp {
    Deposit,
    Withdraw,
    Charge,
    Credit,
}

/// Append-only log of on-chain escrow intents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: EscrowTxId,
    pub customer_id: CustomerId,
    pub op: EscrowOp,
    pub amount: UsdCents,
    pub digest: String,
    pub success: bool,
    pub created_at: TimestampMs,
}

/// A provisioned gateway key. `(process_group, derivation_index)` is
/// globally unique, forever; soft delete never frees the index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealKey {
    pub id: SealKeyId,
    pub customer_id: CustomerId,
    pub service_id: ServiceId,
    pub process_group: ProcessGroup,
    pub derivation_index: u64,
    pub public_key: String,
    pub is_user_enabled: bool,
    pub created_at: TimestampMs,
    pub deleted_at: Option<TimestampMs>,
}

/// Latest polled state of one (LM, vault type). Stale when `last_seen_at`
/// falls outside the freshness window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LmStatusRow {
    pub lm_id: LmId,
    pub vault_type: VaultType,
    pub applied_seq: Option<VaultSeq>,
    pub processing_seq: Option<VaultSeq>,
    pub entries: u64,
    pub last_seen_at: TimestampMs,
    pub last_error: Option<String>,
}

/// One usage aggregate row attached to a draft invoice, maintained by the
/// external stats pipeline. Read-only from the billing engine's perspective.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageCharge {
    pub invoice_id: InvoiceId,
    pub service_type: ServiceType,
    pub quantity: u32,
    pub unit_price: UsdCents,
}

/// Identity archive for services deleted by unpaid cancellation. On
/// re-subscription after the cooldown, the retired instance id is reused.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetiredService {
    pub service_id: ServiceId,
    pub deleted_at: TimestampMs,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn line_item_wire_names() {
        assert_eq!(
            LineItemType::Subscription(ServiceTier::Pro).wire_name(),
            "subscription_pro"
        );
        assert_eq!(LineItemType::Credit.wire_name(), "credit");
        assert_eq!(
            LineItemType::Addon("support".to_owned()).wire_name(),
            "addon_support"
        );
    }
}
